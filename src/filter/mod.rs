// Filter glue - one monitor per host filter instance
//
// - settings: the persisted settings document
// - delay_queue: optional host-clock delay in front of the monitor
// - monitor_filter: lifecycle, mute handling, linked volume, property sheet

pub mod delay_queue;
pub mod monitor_filter;
pub mod settings;

pub use delay_queue::DelayQueue;
pub use monitor_filter::{FilterEvent, FilterProperties, MonitorFactory, MonitorFilter, NumericRange};
pub use settings::{MonitorFilterSettings, MonitorTarget, MuteMode};
