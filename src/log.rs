use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the tracing filter directive
pub const LOG_ENV_VAR: &str = "AUDIO_MONITOR_LOG";

/// Global flag to control per-frame monitor debug logging
pub static MONITOR_DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Set monitor debug logging on/off
pub fn set_monitor_debug(enabled: bool) {
    MONITOR_DEBUG_ENABLED.store(enabled, Ordering::Relaxed);
    info!(
        "🔧 Monitor debug logging {}",
        if enabled { "ENABLED" } else { "DISABLED" }
    );
}

/// Check if monitor debug logging is enabled
pub fn is_monitor_debug_enabled() -> bool {
    MONITOR_DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Install the fmt subscriber. Returns false when a global subscriber already exists.
pub fn init_logging() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Monitor debug macro - only logs if monitor debug is enabled
#[macro_export]
macro_rules! monitor_debug {
    ($($arg:tt)*) => {
        if $crate::log::MONITOR_DEBUG_ENABLED.load(std::sync::atomic::Ordering::Relaxed) {
            tracing::debug!($($arg)*);
        }
    };
}
