pub mod level_meter;
pub mod monitor_dsp;
pub mod volume_curve;

pub use level_meter::{ChannelLevel, LevelMeter};
pub use monitor_dsp::{apply_monitor_dsp, apply_volume_only, balance_gains, DspParams};
pub use volume_curve::{db_to_def, db_to_mul, def_to_db, def_to_mul, mul_to_db, mul_to_def};
