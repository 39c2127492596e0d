//! Admission from async code.
//!
//! Entering the gate may block until another thread leaves, so async callers
//! run it on tokio's blocking pool.

use std::sync::Arc;

use crate::core::{Admission, EnterOutcome, KernelError, SchedulingContext};

/// Enter the gate without blocking the async runtime.
///
/// The admission state is moved to the blocking pool and handed back.
///
/// # Errors
///
/// `Internal` if the blocking task panicked or was cancelled.
pub async fn enter_async(
    ctx: Arc<SchedulingContext>,
    mut admission: Admission,
) -> Result<(EnterOutcome, Admission), KernelError> {
    tokio::task::spawn_blocking(move || {
        let outcome = ctx.gate().enter(&mut admission);
        (outcome, admission)
    })
    .await
    .map_err(|e| KernelError::Internal(format!("gate enter task failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[tokio::test]
    async fn test_enter_async_admits() {
        let ctx = Arc::new(SchedulingContext::new(ServerConfig::default()).unwrap());
        let (outcome, mut admission) = enter_async(Arc::clone(&ctx), Admission::new())
            .await
            .unwrap();
        assert_eq!(outcome, EnterOutcome::Immediate);
        assert!(admission.is_inside());
        ctx.gate().force_exit(&mut admission);
        assert_eq!(ctx.gate().admitted(), 0);
    }
}
