//! Error types for kernel scheduling operations.

use thiserror::Error;

use super::ThreadCategory;

/// Errors produced by the scheduling kernel.
///
/// Most variants are invariant violations. The background loops treat those
/// as fatal. Degraded but expected conditions, such as a gate bypass or a
/// lock wait timeout, are reported through return values, not errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Every slot of the thread table is in use.
    #[error("thread slot table exhausted (capacity {capacity})")]
    SlotTableExhausted {
        /// Table capacity.
        capacity: usize,
    },
    /// Every slot of the client wait table is in use.
    #[error("client wait table exhausted (capacity {capacity})")]
    WaitTableExhausted {
        /// Table capacity.
        capacity: usize,
    },
    /// A handle refers to a slot that was released or reused.
    #[error("stale slot handle {index}:{generation}")]
    StaleHandle {
        /// Slot index.
        index: usize,
        /// Generation carried by the handle.
        generation: u32,
    },
    /// The category is not a background category and cannot be suspended.
    #[error("thread category `{0}` cannot be suspended")]
    NotSuspendable(ThreadCategory),
    /// An active-thread count would drop below zero.
    #[error("active thread count for `{0}` would drop below zero")]
    ActiveCountUnderflow(ThreadCategory),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Internal failure (thread spawn, join, runtime).
    #[error("internal error: {0}")]
    Internal(String),
}

impl KernelError {
    /// True for invariant violations that leave scheduling state inconsistent.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SlotTableExhausted { .. }
                | Self::WaitTableExhausted { .. }
                | Self::StaleHandle { .. }
                | Self::NotSuspendable(_)
                | Self::ActiveCountUnderflow(_)
        )
    }
}

/// Log a fatal kernel error and abort the process.
///
/// Used by background loops, which have no caller to hand the error to.
pub fn abort_on_fatal(context: &str, err: &KernelError) -> ! {
    tracing::error!(context, error = %err, fatal = err.is_fatal(), "kernel invariant violated, aborting");
    std::process::abort()
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(KernelError::SlotTableExhausted { capacity: 4 }.is_fatal());
        assert!(KernelError::ActiveCountUnderflow(ThreadCategory::Master).is_fatal());
        assert!(!KernelError::InvalidConfig("x".into()).is_fatal());
        assert!(!KernelError::Internal("x".into()).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = KernelError::StaleHandle {
            index: 3,
            generation: 7,
        };
        assert_eq!(err.to_string(), "stale slot handle 3:7");
        let err = KernelError::NotSuspendable(ThreadCategory::Console);
        assert_eq!(err.to_string(), "thread category `console` cannot be suspended");
    }
}
