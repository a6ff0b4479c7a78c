//! Internal logging helpers for structured sweepstore events.

/// Single logging target for sweepstore.
pub(crate) const LOG_TARGET: &str = "sweepstore";

macro_rules! sweep_log {
    ($level:expr, $event:expr, $fmt:expr $(, $args:expr)* $(,)?) => {{
        if log::log_enabled!(target: crate::logging::LOG_TARGET, $level) {
            log::log!(
                target: crate::logging::LOG_TARGET,
                $level,
                "event={} {}",
                $event,
                format_args!($fmt $(, $args)*)
            );
        }
    }};
}

pub(crate) use sweep_log;
