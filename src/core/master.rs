//! The master scheduler.
//!
//! One background thread drives all periodic maintenance. It moves between
//! three states:
//!
//! - `Ticking`: one-second sub-ticks with light work, then a heavier round
//!   every ten ticks while the server stays busy.
//! - `BackgroundPass`: the server went quiet, so run the expensive work in
//!   small steps, dropping back to `Ticking` as soon as activity resumes.
//! - `Suspended`: nothing left to do; sleep until a client wakes the master.
//!
//! Each state has its own transition method and [`MasterScheduler::run`]
//! calls them in a loop until shutdown reaches its last phase.

use std::sync::Arc;
use std::thread;

use serde::Serialize;
use tracing::{debug, info};

use super::kernel::SchedulingContext;
use super::services::{EngineServices, FlushStrategy, FlushWait, Lsn, ShutdownState};
use super::thread_table::ThreadCategory;
use super::{KernelError, SlotHandle};

/// Where the master is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MasterState {
    /// Periodic sub-ticks while the server is busy.
    Ticking,
    /// Heavy maintenance while the server is quiet.
    BackgroundPass,
    /// Waiting for client activity.
    Suspended,
}

/// Counters of completed master transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MasterStats {
    /// Sub-ticks slept.
    pub ticks: u64,
    /// Full rounds completed in `Ticking`.
    pub full_rounds: u64,
    /// Background passes started.
    pub background_passes: u64,
    /// Times the master suspended itself.
    pub suspensions: u64,
}

/// Work units reported by one background pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PassWork {
    tables_remaining: usize,
    pages_flushed: usize,
    pages_purged: usize,
    bytes_merged: usize,
    bytes_archived: usize,
}

impl PassWork {
    const fn total(&self, fast_shutdown: bool) -> usize {
        let base = self.tables_remaining + self.pages_flushed + self.bytes_archived;
        if fast_shutdown {
            base
        } else {
            base + self.pages_purged + self.bytes_merged
        }
    }
}

/// The master scheduler loop.
#[derive(Debug)]
pub struct MasterScheduler<S: EngineServices> {
    ctx: Arc<SchedulingContext>,
    services: Arc<S>,
    handle: Option<SlotHandle>,
    state: MasterState,
    old_activity: u64,
    stats: MasterStats,
}

impl<S: EngineServices> MasterScheduler<S> {
    /// A scheduler that has not registered yet.
    pub fn new(ctx: Arc<SchedulingContext>, services: Arc<S>) -> Self {
        Self {
            ctx,
            services,
            handle: None,
            state: MasterState::Ticking,
            old_activity: 0,
            stats: MasterStats::default(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> MasterState {
        self.state
    }

    /// Transition counters.
    #[must_use]
    pub const fn stats(&self) -> MasterStats {
        self.stats
    }

    /// Reserve the master slot for the calling thread and mark the server
    /// operational.
    ///
    /// # Errors
    ///
    /// `SlotTableExhausted` if the thread table is full.
    pub fn register(&mut self) -> Result<SlotHandle, KernelError> {
        if let Some(handle) = self.handle {
            return Ok(handle);
        }
        let handle = self.ctx.register_worker(ThreadCategory::Master)?;
        self.handle = Some(handle);
        self.ctx.operational().set();
        info!(slot = %handle, "master scheduler registered");
        Ok(handle)
    }

    /// Run the current state's transition and move to the next state.
    ///
    /// # Errors
    ///
    /// Errors from registration or suspension. They are all fatal.
    pub fn step(&mut self) -> Result<MasterState, KernelError> {
        let next = match self.state {
            MasterState::Ticking => self.tick_round(),
            MasterState::BackgroundPass => self.background_pass(),
            MasterState::Suspended => self.suspend()?,
        };
        if next != self.state {
            debug!(from = ?self.state, to = ?next, "master state change");
        }
        self.state = next;
        Ok(next)
    }

    /// Drive the state machine until shutdown reaches its last phase.
    ///
    /// # Errors
    ///
    /// The first error from [`Self::step`].
    pub fn run(mut self) -> Result<MasterStats, KernelError> {
        let handle = self.register()?;
        while self.ctx.shutdown_state() < ShutdownState::LastPhase {
            self.step()?;
        }
        self.ctx.set_master_op("exiting");
        self.ctx.deregister_worker(handle)?;
        info!(stats = ?self.stats, "master scheduler stopped");
        Ok(self.stats)
    }

    fn activity_moved(&self) -> bool {
        self.ctx.activity_count() != self.old_activity
    }

    fn flush_log(&self) {
        self.ctx.set_master_op("flushing log");
        self.services.flush_log_up_to(Lsn::MAX, FlushWait::OneGroup);
    }

    /// One busy round: up to `ticks_per_round` sub-ticks, then the periodic
    /// flush, merge and purge.
    pub fn tick_round(&mut self) -> MasterState {
        let timing = self.ctx.config().master;

        self.ctx.set_master_op("reserving kernel mutex");
        let n_ios_very_old = self.services.io_stats().n_ios;
        self.old_activity = self.ctx.activity_count();

        for _ in 0..timing.ticks_per_round {
            let n_ios_old = self.services.io_stats().n_ios;

            self.ctx.set_master_op("sleeping");
            thread::sleep(timing.tick());
            self.stats.ticks += 1;
            if self.ctx.shutdown_state() >= ShutdownState::LastPhase {
                return MasterState::Ticking;
            }

            self.ctx.set_master_op("doing background drop tables");
            self.services.drop_pending_background_tables();
            self.ctx.set_master_op("");

            if self.ctx.config().force_recovery_no_background {
                return MasterState::Suspended;
            }

            self.flush_log();

            let io = self.services.io_stats();
            if io.pending_ios < timing.max_pending_ios
                && io.n_ios.saturating_sub(n_ios_old) < timing.idle_ios_per_tick
            {
                self.ctx.set_master_op("doing insert buffer merge");
                self.services
                    .merge_change_buffer(true, timing.merge_pages_small);
                self.flush_log();
            }

            if self.ctx.fast_shutdown_in_progress() {
                return MasterState::BackgroundPass;
            }
            if !self.activity_moved() {
                debug!("server quiet, master starts background work");
                return MasterState::BackgroundPass;
            }
        }

        self.stats.full_rounds += 1;

        let io = self.services.io_stats();
        if io.pending_ios < timing.max_pending_ios
            && io.n_ios.saturating_sub(n_ios_very_old) < timing.idle_ios_per_round
        {
            self.ctx.set_master_op("flushing buffer pool pages");
            self.services
                .flush_dirty_pages(FlushStrategy::List, timing.flush_batch_medium, Lsn::MAX);
            self.flush_log();
        }

        self.ctx.set_master_op("doing insert buffer merge");
        self.services
            .merge_change_buffer(true, timing.merge_pages_small);
        self.flush_log();

        let flush_interval_ms =
            i64::try_from(timing.purge_log_flush_interval_ms).unwrap_or(i64::MAX);
        let mut last_flush_ms = self.ctx.now_ms();
        loop {
            if self.ctx.fast_shutdown_in_progress() {
                break;
            }
            self.ctx.set_master_op("purging");
            let purged = self.services.run_purge_pass();

            let now = self.ctx.now_ms();
            if now - last_flush_ms > flush_interval_ms {
                self.flush_log();
                last_flush_ms = now;
            }
            if purged == 0 {
                break;
            }
        }

        MasterState::BackgroundPass
    }

    /// One quiet-server pass of heavy maintenance.
    ///
    /// Returns to `Ticking` the moment client activity is seen between steps.
    pub fn background_pass(&mut self) -> MasterState {
        let timing = self.ctx.config().master;
        self.stats.background_passes += 1;
        let mut work = PassWork::default();

        self.ctx.set_master_op("doing background drop tables");
        work.tables_remaining = self.services.drop_pending_background_tables();

        self.ctx.set_master_op("flushing buffer pool pages");
        work.pages_flushed =
            self.services
                .flush_dirty_pages(FlushStrategy::List, timing.flush_batch_small, Lsn::MAX);

        self.ctx.set_master_op("making checkpoint");
        self.services.checkpoint(true, false);

        self.ctx.set_master_op("reserving kernel mutex");
        if self.activity_moved() {
            return MasterState::Ticking;
        }

        let fast = self.ctx.fast_shutdown_in_progress();
        if !fast {
            self.ctx.set_master_op("purging");
            work.pages_purged = self.services.run_purge_pass();
            if self.activity_moved() {
                return MasterState::Ticking;
            }

            self.ctx.set_master_op("doing insert buffer merge");
            work.bytes_merged = self
                .services
                .merge_change_buffer(true, timing.merge_pages_large);
            if self.activity_moved() {
                return MasterState::Ticking;
            }
        }

        self.ctx.set_master_op("flushing buffer pool pages");
        work.pages_flushed +=
            self.services
                .flush_dirty_pages(FlushStrategy::List, timing.flush_batch_large, Lsn::MAX);
        if self.activity_moved() {
            return MasterState::Ticking;
        }

        self.ctx.set_master_op("waiting for buffer pool flush to end");
        self.services.wait_for_flush_batch_end(FlushStrategy::List);

        self.ctx.set_master_op("making checkpoint");
        self.services.checkpoint(true, false);
        if self.activity_moved() {
            return MasterState::Ticking;
        }

        if self.ctx.config().log_archive_on {
            self.ctx.set_master_op("archiving log");
            work.bytes_archived = self.services.archive_log(false);
        }

        if work.total(self.ctx.fast_shutdown_in_progress()) > 0 {
            MasterState::BackgroundPass
        } else {
            MasterState::Suspended
        }
    }

    /// Suspend until a client wakes the master.
    ///
    /// Returns to `Ticking` without sleeping if background drops are pending
    /// or shutdown is in its last phase.
    ///
    /// # Errors
    ///
    /// Errors from the thread table; all of them are fatal.
    pub fn suspend(&mut self) -> Result<MasterState, KernelError> {
        let handle = self.register()?;
        self.ctx.set_master_op("suspending");

        let event = {
            let mut state = self.ctx.lock_kernel();
            if self.services.pending_background_drops() > 0
                || self.ctx.shutdown_state() >= ShutdownState::LastPhase
            {
                return Ok(MasterState::Ticking);
            }
            state.threads_mut().suspend(handle, self.ctx.now_ms())?
        };

        self.stats.suspensions += 1;
        self.ctx.set_master_op("waiting for server activity");
        event.wait();
        Ok(MasterState::Ticking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::infra::memory::{InMemoryEngine, ServiceCall};

    fn quick_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.master.tick_ms = 0;
        config.master.ticks_per_round = 3;
        config
    }

    fn scheduler(config: ServerConfig) -> (MasterScheduler<InMemoryEngine>, Arc<InMemoryEngine>) {
        let ctx = Arc::new(SchedulingContext::new(config).unwrap());
        let engine = Arc::new(InMemoryEngine::new());
        let mut master = MasterScheduler::new(ctx, Arc::clone(&engine));
        master.register().unwrap();
        (master, engine)
    }

    #[test]
    fn test_register_sets_operational() {
        let (master, _) = scheduler(quick_config());
        assert!(master.ctx.operational().is_set());
        assert_eq!(master.ctx.active_threads(ThreadCategory::Master), 1);
    }

    #[test]
    fn test_quiet_server_leaves_ticking_after_first_tick() {
        let (mut master, engine) = scheduler(quick_config());
        assert_eq!(master.step().unwrap(), MasterState::BackgroundPass);
        assert_eq!(master.stats().ticks, 1);
        assert_eq!(master.stats().full_rounds, 0);
        assert!(engine.calls().contains(&ServiceCall::FlushLog));
    }

    #[test]
    fn test_idle_pass_with_no_work_suspends() {
        let (mut master, engine) = scheduler(quick_config());
        master.state = MasterState::BackgroundPass;
        assert_eq!(master.step().unwrap(), MasterState::Suspended);

        engine.add_purge_backlog(2);
        master.state = MasterState::BackgroundPass;
        assert_eq!(master.step().unwrap(), MasterState::BackgroundPass);
    }

    #[test]
    fn test_fast_shutdown_ignores_purge_work() {
        let mut config = quick_config();
        config.fast_shutdown = true;
        let (mut master, engine) = scheduler(config);
        master.ctx.begin_shutdown(ShutdownState::Cleanup);
        // Advancing the shutdown phase wakes the master, which counts as activity.
        master.old_activity = master.ctx.activity_count();
        engine.add_purge_backlog(5);

        master.state = MasterState::BackgroundPass;
        assert_eq!(master.step().unwrap(), MasterState::Suspended);
        assert!(!engine.calls().contains(&ServiceCall::Purge));
    }

    #[test]
    fn test_activity_during_pass_returns_to_ticking() {
        let (mut master, engine) = scheduler(quick_config());
        let ctx = Arc::clone(&master.ctx);
        engine.on_checkpoint(move || ctx.note_client_activity());

        master.state = MasterState::BackgroundPass;
        assert_eq!(master.step().unwrap(), MasterState::Ticking);
        assert!(!engine.calls().contains(&ServiceCall::Purge));
    }

    #[test]
    fn test_pending_drop_keeps_master_awake() {
        let (mut master, engine) = scheduler(quick_config());
        engine.add_background_drops(1);
        master.state = MasterState::Suspended;
        assert_eq!(master.step().unwrap(), MasterState::Ticking);
        assert_eq!(master.stats().suspensions, 0);
    }

    #[test]
    fn test_force_recovery_skips_background_work() {
        let mut config = quick_config();
        config.force_recovery_no_background = true;
        let (mut master, engine) = scheduler(config);
        assert_eq!(master.step().unwrap(), MasterState::Suspended);
        assert!(!engine.calls().contains(&ServiceCall::FlushLog));
    }

    #[test]
    fn test_busy_server_completes_full_round() {
        let (mut master, engine) = scheduler(quick_config());
        let ctx = Arc::clone(&master.ctx);
        engine.on_drop_tables(move || ctx.note_client_activity());
        engine.add_purge_backlog(3);

        assert_eq!(master.step().unwrap(), MasterState::BackgroundPass);
        assert_eq!(master.stats().full_rounds, 1);
        assert_eq!(master.stats().ticks, 3);
        assert_eq!(engine.purge_backlog(), 0);
    }
}
