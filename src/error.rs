// Public error type for the engine's entry points. Internal assertions
// thread the same type through rather than reaching for a separate
// internal error type, since every fallible internal step already has a
// natural `IntersectError` variant to report through.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntersectError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("context mismatch: {0}")]
    ContextMismatch(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariantViolated(String),
}

pub type Result<T> = std::result::Result<T, IntersectError>;

/// Debug-only invariant check: cheap, always-compiled assertions on the hot
/// path versus checks that only make sense to pay for in debug builds.
#[macro_export]
macro_rules! debug_invariant {
    ($cond:expr, $($arg:tt)*) => {
        if cfg!(debug_assertions) && !($cond) {
            let msg = format!($($arg)*);
            log::warn!("invariant violated: {}", msg);
            return Err($crate::error::IntersectError::InternalInvariantViolated(msg));
        }
    };
}
