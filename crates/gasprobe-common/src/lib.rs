pub mod concurrency;
pub mod fallback;
pub mod monitoring;

pub use tracing;

/// Log the error carried by a `Result` without consuming it.
#[macro_export]
macro_rules! log_if_error {
    ($e: expr) => {
        match $e {
            Ok(v) => Ok(v),
            Err(e) => {
                $crate::tracing::warn!(message = %e);
                Err(e)
            },
        }
    };
}
