//! Native background threads.
//!
//! Starts the master scheduler, the lock-wait monitor and the error monitor on
//! named OS threads and stops them again at shutdown.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::core::{
    abort_on_fatal, EngineServices, ErrorMonitor, KernelError, LockWaitMonitor, MasterScheduler,
    SchedulingContext, ShutdownState,
};

/// How long `start` waits for the master to register.
const OPERATIONAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Handles of the running background threads.
#[derive(Debug)]
pub struct BackgroundThreads {
    ctx: Arc<SchedulingContext>,
    handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl BackgroundThreads {
    /// Spawn the background threads and wait until the master is operational.
    ///
    /// # Errors
    ///
    /// `Internal` if a thread cannot be spawned or the master does not come
    /// up in time.
    pub fn start<S: EngineServices>(
        ctx: Arc<SchedulingContext>,
        services: Arc<S>,
    ) -> Result<Self, KernelError> {
        let mut handles = Vec::with_capacity(3);

        let master = MasterScheduler::new(Arc::clone(&ctx), Arc::clone(&services));
        handles.push((
            "kernel-master",
            spawn_named("kernel-master", move || {
                if let Err(e) = master.run() {
                    abort_on_fatal("master scheduler", &e);
                }
            })?,
        ));

        let monitor = LockWaitMonitor::new(Arc::clone(&ctx), Arc::clone(&services));
        handles.push((
            "kernel-lock-monitor",
            spawn_named("kernel-lock-monitor", move || {
                monitor.run();
            })?,
        ));

        let errors = ErrorMonitor::new(Arc::clone(&ctx), services);
        handles.push((
            "kernel-error-monitor",
            spawn_named("kernel-error-monitor", move || errors.run())?,
        ));

        let threads = Self {
            ctx,
            handles: Mutex::new(handles),
        };

        if !threads.ctx.operational().wait_timeout(OPERATIONAL_TIMEOUT) {
            threads.shutdown(Duration::from_millis(100));
            return Err(KernelError::Internal(
                "master scheduler did not become operational".into(),
            ));
        }
        info!("background threads started");
        Ok(threads)
    }

    /// Advance shutdown to its last phase and join every thread, waiting at
    /// most `timeout` for each. Returns how many threads joined cleanly.
    pub fn shutdown(&self, timeout: Duration) -> usize {
        self.ctx.begin_shutdown(ShutdownState::Cleanup);
        self.ctx.begin_shutdown(ShutdownState::LastPhase);

        let mut handles = self.handles.lock();
        let mut joined = 0;
        for (name, handle) in handles.drain(..) {
            let (tx, rx) = crossbeam_channel::bounded(1);
            let joiner = thread::spawn(move || {
                let _ = tx.send(handle.join().is_ok());
            });

            match rx.recv_timeout(timeout) {
                Ok(true) => {
                    debug!(thread = name, "background thread joined");
                    joined += 1;
                }
                Ok(false) => warn!(thread = name, "background thread panicked"),
                Err(_) => {
                    warn!(thread = name, "background thread did not exit in time, detaching");
                    continue;
                }
            }
            let _ = joiner.join();
        }
        info!(joined, "background threads stopped");
        joined
    }
}

fn spawn_named(
    name: &'static str,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, KernelError> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|e| KernelError::Internal(format!("spawning {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::core::ThreadCategory;
    use crate::infra::InMemoryEngine;

    #[test]
    fn test_start_and_shutdown() {
        let mut config = ServerConfig::default();
        config.master.tick_ms = 1;
        config.monitor_timing.check_interval_ms = 1;
        config.monitor_timing.error_monitor_interval_ms = 1;
        let ctx = Arc::new(SchedulingContext::new(config).unwrap());
        let engine = Arc::new(InMemoryEngine::new());

        let threads = BackgroundThreads::start(Arc::clone(&ctx), engine).unwrap();
        assert_eq!(ctx.registered_threads(ThreadCategory::Master), 1);

        assert_eq!(threads.shutdown(Duration::from_secs(5)), 3);
        assert_eq!(ctx.registered_threads(ThreadCategory::Master), 0);
        assert!(!ctx.lock_monitor_active());
    }
}
