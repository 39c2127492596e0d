//! The scheduling context.
//!
//! [`SchedulingContext`] owns every piece of mutable scheduling state and is
//! shared between threads through an `Arc`. It holds two independent locks:
//!
//! - the kernel lock, a `parking_lot::Mutex<KernelState>` guarding the thread
//!   table, the utility meters, the activity counter and the client wait table;
//! - the gate lock, private to the [`ConcurrencyGate`].
//!
//! Nothing here takes the gate lock while holding the kernel lock.
//! [`SchedulingContext::suspend_client_thread`] calls into the gate only after
//! the kernel lock has been released.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, info};

use super::client_wait::{ClientWait, ClientWaitTable, LockWaitRequest, WaitOutcome};
use super::gate::{Admission, ConcurrencyGate};
use super::meter::{max_allowed, UtilityMeters};
use super::services::ShutdownState;
use super::thread_table::{ThreadCategory, ThreadIdentity, ThreadSlotTable};
use super::{KernelError, SlotHandle};
use crate::config::{MonitorFlags, ServerConfig};
use crate::util::clock::{Clock, SystemClock, TimestampMs};
use crate::Event;

/// State guarded by the kernel lock.
#[derive(Debug)]
pub struct KernelState {
    threads: ThreadSlotTable,
    meters: UtilityMeters,
    activity: u64,
    client_waits: ClientWaitTable,
}

impl KernelState {
    /// The thread slot table.
    #[must_use]
    pub const fn threads(&self) -> &ThreadSlotTable {
        &self.threads
    }

    /// The thread slot table, mutably.
    pub fn threads_mut(&mut self) -> &mut ThreadSlotTable {
        &mut self.threads
    }

    /// Utility meter levels.
    #[must_use]
    pub const fn meters(&self) -> &UtilityMeters {
        &self.meters
    }

    /// Units of client activity seen since startup.
    #[must_use]
    pub const fn activity(&self) -> u64 {
        self.activity
    }

    /// The client lock-wait table.
    #[must_use]
    pub const fn client_waits(&self) -> &ClientWaitTable {
        &self.client_waits
    }

    /// The client lock-wait table, mutably.
    pub fn client_waits_mut(&mut self) -> &mut ClientWaitTable {
        &mut self.client_waits
    }

    /// Foreground work is running.
    #[must_use]
    pub const fn foreground_active(&self) -> bool {
        self.threads.active(ThreadCategory::Communication) > 0
    }
}

/// Row operation totals since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    /// Rows inserted.
    pub inserted: u64,
    /// Rows updated.
    pub updated: u64,
    /// Rows deleted.
    pub deleted: u64,
    /// Rows read.
    pub read: u64,
}

#[derive(Debug, Default)]
struct RowCounters {
    inserted: AtomicU64,
    updated: AtomicU64,
    deleted: AtomicU64,
    read: AtomicU64,
}

/// Shared scheduling state for one engine instance.
#[derive(Debug)]
pub struct SchedulingContext {
    config: ServerConfig,
    kernel: Mutex<KernelState>,
    gate: ConcurrencyGate,
    clock: Arc<dyn Clock>,
    operational: Event,
    lock_timeout_event: Event,
    shutdown: AtomicU8,
    fast_shutdown: AtomicBool,
    monitor_flags: Mutex<MonitorFlags>,
    master_op: Mutex<&'static str>,
    master_wakeups: AtomicU64,
    lock_monitor_active: AtomicBool,
    error_monitor_active: AtomicBool,
    rows: RowCounters,
}

impl SchedulingContext {
    /// Build a context on the system clock.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate.
    pub fn new(config: ServerConfig) -> Result<Self, KernelError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a context reading time from `clock`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate.
    pub fn with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Result<Self, KernelError> {
        config.validate().map_err(KernelError::InvalidConfig)?;

        let capacity = config.max_threads;
        let state = KernelState {
            threads: ThreadSlotTable::new(capacity)
                .with_release_logging(config.print_thread_releases),
            meters: UtilityMeters::new(config.initial_meter_level),
            activity: 0,
            client_waits: ClientWaitTable::new(capacity),
        };
        let gate = ConcurrencyGate::new(
            config.thread_concurrency,
            config.free_tickets_to_enter,
            capacity,
        );

        info!(
            thread_concurrency = config.thread_concurrency,
            max_threads = capacity,
            lock_wait_timeout_secs = config.lock_wait_timeout_secs,
            "scheduling context created"
        );

        Ok(Self {
            fast_shutdown: AtomicBool::new(config.fast_shutdown),
            monitor_flags: Mutex::new(config.monitor),
            config,
            kernel: Mutex::new(state),
            gate,
            clock,
            operational: Event::new(),
            lock_timeout_event: Event::new(),
            shutdown: AtomicU8::new(ShutdownState::None as u8),
            master_op: Mutex::new(""),
            master_wakeups: AtomicU64::new(0),
            lock_monitor_active: AtomicBool::new(false),
            error_monitor_active: AtomicBool::new(false),
            rows: RowCounters::default(),
        })
    }

    /// Configuration the context was built with.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The admission gate.
    #[must_use]
    pub const fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Current time from the context clock.
    #[must_use]
    pub fn now_ms(&self) -> TimestampMs {
        self.clock.now_ms()
    }

    /// Take the kernel lock.
    pub fn lock_kernel(&self) -> MutexGuard<'_, KernelState> {
        self.kernel.lock()
    }

    // ---- thread registration and suspension ----

    /// Register the calling thread in the thread table.
    ///
    /// # Errors
    ///
    /// `SlotTableExhausted` if the table is full.
    pub fn register_worker(&self, category: ThreadCategory) -> Result<SlotHandle, KernelError> {
        self.kernel
            .lock()
            .threads
            .reserve(category, ThreadIdentity::current())
    }

    /// Remove a thread from the table.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the thread was already deregistered.
    pub fn deregister_worker(&self, handle: SlotHandle) -> Result<ThreadCategory, KernelError> {
        self.kernel.lock().threads.release(handle)
    }

    /// Category of a registered thread.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the thread is no longer registered.
    pub fn thread_category(&self, handle: SlotHandle) -> Result<ThreadCategory, KernelError> {
        self.kernel.lock().threads.category_of(handle)
    }

    /// Threads of `category` holding a slot.
    #[must_use]
    pub fn registered_threads(&self, category: ThreadCategory) -> u32 {
        self.kernel.lock().threads.registered(category)
    }

    /// Threads of `category` counted as running.
    #[must_use]
    pub fn active_threads(&self, category: ThreadCategory) -> u32 {
        self.kernel.lock().threads.active(category)
    }

    /// Suspend the calling background thread until someone releases it.
    ///
    /// # Errors
    ///
    /// `StaleHandle`, `NotSuspendable` or `ActiveCountUnderflow`.
    pub fn suspend_worker(&self, handle: SlotHandle) -> Result<(), KernelError> {
        let event = {
            let mut state = self.kernel.lock();
            state.threads.suspend(handle, self.clock.now_ms())?
        };
        event.wait();
        Ok(())
    }

    /// Release up to `n` suspended threads of `category`.
    pub fn release_threads(&self, category: ThreadCategory, n: usize) -> usize {
        self.kernel.lock().threads.release_threads(category, n)
    }

    // ---- activity and the master ----

    /// Record one unit of client activity and wake the master if it sleeps.
    pub fn note_client_activity(&self) {
        let mut state = self.kernel.lock();
        state.activity = state.activity.wrapping_add(1);
        if state.threads.active(ThreadCategory::Master) == 0
            && state.threads.release_threads(ThreadCategory::Master, 1) > 0
        {
            self.master_wakeups.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Wake the master whether or not it looks active.
    pub fn wake_master(&self) {
        let mut state = self.kernel.lock();
        state.activity = state.activity.wrapping_add(1);
        if state.threads.release_threads(ThreadCategory::Master, 1) > 0 {
            self.master_wakeups.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Units of client activity seen so far.
    #[must_use]
    pub fn activity_count(&self) -> u64 {
        self.kernel.lock().activity
    }

    /// Times a client call actually released a suspended master.
    #[must_use]
    pub fn master_wakeups(&self) -> u64 {
        self.master_wakeups.load(Ordering::Relaxed)
    }

    /// Set once the master has registered.
    #[must_use]
    pub const fn operational(&self) -> &Event {
        &self.operational
    }

    pub(crate) fn set_master_op(&self, op: &'static str) {
        *self.master_op.lock() = op;
    }

    /// What the master is doing right now.
    #[must_use]
    pub fn master_op(&self) -> &'static str {
        *self.master_op.lock()
    }

    // ---- meters ----

    /// Count the start of foreground work of `category`.
    pub fn begin_activity(&self, category: ThreadCategory) {
        self.kernel.lock().threads.inc_active(category);
    }

    /// Count the end of foreground work of `category`.
    ///
    /// # Errors
    ///
    /// `ActiveCountUnderflow` if no such work was running.
    pub fn end_activity(&self, category: ThreadCategory) -> Result<(), KernelError> {
        self.kernel.lock().threads.dec_active(category)
    }

    /// Raise the meter of `category` and release threads up to the new
    /// allowance. Returns how many were released.
    pub fn increment_meter(&self, category: ThreadCategory, delta: u32) -> usize {
        let meter = self.config.meter(category);
        let mut state = self.kernel.lock();
        let level = state.meters.add(category, delta);
        let allowed = max_allowed(level, &meter, state.foreground_active());
        let active = state.threads.active(category);
        if allowed <= active {
            return 0;
        }
        let released = state
            .threads
            .release_threads(category, (allowed - active) as usize);
        debug!(%category, level, allowed, released, "meter raised");
        released
    }

    /// Lower the meter of the calling thread's category. If more threads of
    /// the category run than the new level allows, the caller suspends.
    ///
    /// Returns `true` if the caller was suspended and has since been released.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the handle is not registered, plus any error from
    /// suspension.
    pub fn decrement_meter(&self, handle: SlotHandle, delta: u32) -> Result<bool, KernelError> {
        let event = {
            let mut state = self.kernel.lock();
            let category = state.threads.category_of(handle)?;
            let meter = self.config.meter(category);
            let level = state.meters.sub(category, delta);
            let allowed = max_allowed(level, &meter, state.foreground_active());
            if allowed >= state.threads.active(category) {
                return Ok(false);
            }
            state.threads.suspend(handle, self.clock.now_ms())?
        };
        event.wait();
        Ok(true)
    }

    /// Current meter level of `category`.
    #[must_use]
    pub fn meter_level(&self, category: ThreadCategory) -> u32 {
        self.kernel.lock().meters.level(category)
    }

    /// With no foreground work, run half the utility workers once the meter
    /// passes its high-water mark.
    pub fn release_max_if_no_queries(&self) -> usize {
        let category = ThreadCategory::Utility;
        let meter = self.config.meter(category);
        self.release_if_no_queries(category, meter.high_water, meter.workers / 2)
    }

    /// With no foreground work, run one utility worker once the meter passes
    /// its second high-water mark.
    pub fn release_one_if_no_queries(&self) -> usize {
        let category = ThreadCategory::Utility;
        let meter = self.config.meter(category);
        self.release_if_no_queries(category, meter.high_water2, 1)
    }

    fn release_if_no_queries(&self, category: ThreadCategory, mark: u32, target: u32) -> usize {
        let mut state = self.kernel.lock();
        if state.foreground_active() {
            return 0;
        }
        let active = state.threads.active(category);
        if state.meters.level(category) <= mark || active >= target {
            return 0;
        }
        let released = state
            .threads
            .release_threads(category, (target - active) as usize);
        if released > 0 {
            info!(%category, released, "releasing background threads while idle");
        }
        released
    }

    // ---- client lock waits ----

    /// Park the calling client thread on `request` unless the lock was
    /// already granted. Wakes the lock-wait monitor.
    ///
    /// # Errors
    ///
    /// `WaitTableExhausted` if every wait slot is in use.
    pub fn client_wait_begin(
        &self,
        request: Arc<dyn LockWaitRequest>,
    ) -> Result<Option<ClientWait>, KernelError> {
        self.lock_timeout_event.set();

        let mut state = self.kernel.lock();
        if request.lock_granted() {
            return Ok(None);
        }
        let wait = state
            .client_waits
            .reserve(request, ThreadIdentity::current(), self.clock.now_ms())?;
        // A monitor scan may have reset the event since the first set; the
        // monitor only resets it under the kernel lock, so this one sticks.
        self.lock_timeout_event.set();
        Ok(Some(wait))
    }

    /// Free the wait slot and report how the wait ended.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the wait was already ended.
    pub fn client_wait_end(&self, wait: ClientWait) -> Result<WaitOutcome, KernelError> {
        let timeout = self.config.lock_wait_timeout();
        let outcome = self
            .kernel
            .lock()
            .client_waits
            .release(&wait, self.clock.now_ms(), timeout)?;
        if outcome == WaitOutcome::TimedOut {
            debug!(slot = %wait.handle(), "client lock wait timed out");
        }
        Ok(outcome)
    }

    /// Wait for `request` with the thread counted outside the engine.
    ///
    /// The thread leaves the gate before blocking, so the holder of the lock
    /// it waits for can get in, and re-enters unconditionally afterwards.
    ///
    /// # Errors
    ///
    /// `WaitTableExhausted` if every wait slot is in use.
    pub fn suspend_client_thread(
        &self,
        request: Arc<dyn LockWaitRequest>,
        admission: &mut Admission,
    ) -> Result<WaitOutcome, KernelError> {
        let Some(wait) = self.client_wait_begin(request)? else {
            return Ok(WaitOutcome::Granted);
        };

        self.gate.force_exit(admission);
        wait.wait();
        self.gate.force_enter(admission);

        self.client_wait_end(wait)
    }

    /// Wake the client thread waiting on `request_id`, if it is parked.
    pub fn client_wait_release(&self, request_id: u64) -> bool {
        self.kernel.lock().client_waits.release_request(request_id)
    }

    /// Parked client waits.
    #[must_use]
    pub fn client_waiters(&self) -> usize {
        self.kernel.lock().client_waits.waiting()
    }

    pub(crate) fn lock_timeout_event(&self) -> &Event {
        &self.lock_timeout_event
    }

    // ---- shutdown and runtime knobs ----

    /// Advance the shutdown phase. Phases never move backwards.
    ///
    /// Wakes the monitor and the master so they observe the new phase.
    pub fn begin_shutdown(&self, phase: ShutdownState) {
        let previous = self.shutdown.fetch_max(phase as u8, Ordering::SeqCst);
        if previous >= phase as u8 {
            return;
        }
        info!(?phase, "shutdown phase advanced");
        self.lock_timeout_event.set();
        self.wake_master();
    }

    /// Current shutdown phase.
    #[must_use]
    pub fn shutdown_state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.shutdown.load(Ordering::SeqCst))
    }

    /// Fast shutdown is on and shutdown has started.
    #[must_use]
    pub fn fast_shutdown_in_progress(&self) -> bool {
        self.fast_shutdown.load(Ordering::Relaxed) && self.shutdown_state() > ShutdownState::None
    }

    /// Switch fast shutdown on or off.
    pub fn set_fast_shutdown(&self, enabled: bool) {
        self.fast_shutdown.store(enabled, Ordering::Relaxed);
    }

    /// Current diagnostic toggles.
    #[must_use]
    pub fn monitor_flags(&self) -> MonitorFlags {
        *self.monitor_flags.lock()
    }

    /// Replace the diagnostic toggles and wake the monitor.
    pub fn set_monitor_flags(&self, flags: MonitorFlags) {
        *self.monitor_flags.lock() = flags;
        self.lock_timeout_event.set();
    }

    pub(crate) fn set_lock_monitor_active(&self, active: bool) {
        self.lock_monitor_active.store(active, Ordering::Relaxed);
    }

    /// The lock-wait monitor has completed a cycle since it last suspended.
    #[must_use]
    pub fn lock_monitor_active(&self) -> bool {
        self.lock_monitor_active.load(Ordering::Relaxed)
    }

    pub(crate) fn set_error_monitor_active(&self, active: bool) {
        self.error_monitor_active.store(active, Ordering::Relaxed);
    }

    /// The error monitor is running.
    #[must_use]
    pub fn error_monitor_active(&self) -> bool {
        self.error_monitor_active.load(Ordering::Relaxed)
    }

    // ---- row counters ----

    /// Count inserted rows.
    pub fn note_rows_inserted(&self, n: u64) {
        self.rows.inserted.fetch_add(n, Ordering::Relaxed);
    }

    /// Count updated rows.
    pub fn note_rows_updated(&self, n: u64) {
        self.rows.updated.fetch_add(n, Ordering::Relaxed);
    }

    /// Count deleted rows.
    pub fn note_rows_deleted(&self, n: u64) {
        self.rows.deleted.fetch_add(n, Ordering::Relaxed);
    }

    /// Count read rows.
    pub fn note_rows_read(&self, n: u64) {
        self.rows.read.fetch_add(n, Ordering::Relaxed);
    }

    /// Row totals since startup.
    #[must_use]
    pub fn row_counts(&self) -> RowCounts {
        RowCounts {
            inserted: self.rows.inserted.load(Ordering::Relaxed),
            updated: self.rows.updated.load(Ordering::Relaxed),
            deleted: self.rows.deleted.load(Ordering::Relaxed),
            read: self.rows.read.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeterConfig;
    use crate::util::clock::ManualClock;
    use std::thread;
    use std::time::Duration;

    fn context(config: ServerConfig) -> Arc<SchedulingContext> {
        Arc::new(SchedulingContext::new(config).unwrap())
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..2000 {
            if done() {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("condition never became true");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ServerConfig {
            max_threads: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(
            SchedulingContext::new(config),
            Err(KernelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_suspend_worker_is_released() {
        let ctx = context(ServerConfig::default());
        let (tx, rx) = std::sync::mpsc::channel();
        let worker = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                let handle = ctx.register_worker(ThreadCategory::Worker).unwrap();
                tx.send(handle).unwrap();
                ctx.suspend_worker(handle).unwrap();
                ctx.deregister_worker(handle).unwrap();
            })
        };
        let handle = rx.recv().unwrap();
        wait_until(|| ctx.lock_kernel().threads().is_suspended(handle).unwrap_or(false));

        assert_eq!(ctx.release_threads(ThreadCategory::Worker, 1), 1);
        worker.join().unwrap();
        assert_eq!(ctx.registered_threads(ThreadCategory::Worker), 0);
    }

    #[test]
    fn test_client_activity_wakes_suspended_master_once() {
        let ctx = context(ServerConfig::default());
        let master = ctx.register_worker(ThreadCategory::Master).unwrap();
        let event = ctx
            .lock_kernel()
            .threads_mut()
            .suspend(master, ctx.now_ms())
            .unwrap();

        ctx.note_client_activity();
        ctx.note_client_activity();
        assert!(event.is_set());
        assert_eq!(ctx.master_wakeups(), 1);
        assert_eq!(ctx.activity_count(), 2);
        assert_eq!(ctx.active_threads(ThreadCategory::Master), 1);
    }

    #[test]
    fn test_increment_meter_releases_up_to_allowance() {
        let mut config = ServerConfig::default();
        config
            .meters
            .insert(ThreadCategory::Utility, MeterConfig::default().with_workers(4));
        let ctx = context(config);

        let handles: Vec<_> = (0..4)
            .map(|_| ctx.register_worker(ThreadCategory::Utility).unwrap())
            .collect();
        {
            let mut state = ctx.lock_kernel();
            for &h in &handles {
                state.threads_mut().suspend(h, 0).unwrap();
            }
        }

        // Idle server: level 30 is below low water.
        assert_eq!(ctx.increment_meter(ThreadCategory::Utility, 0), 0);
        // Level 60 passes low water: half the workers run.
        assert_eq!(ctx.increment_meter(ThreadCategory::Utility, 30), 2);
        assert_eq!(ctx.increment_meter(ThreadCategory::Utility, 500), 0);
        assert_eq!(ctx.active_threads(ThreadCategory::Utility), 2);
    }

    #[test]
    fn test_foreground_blocks_idle_releases() {
        let mut config = ServerConfig::default();
        config.initial_meter_level = 500;
        config
            .meters
            .insert(ThreadCategory::Utility, MeterConfig::default().with_workers(2));
        let ctx = context(config);
        let h = ctx.register_worker(ThreadCategory::Utility).unwrap();
        ctx.lock_kernel().threads_mut().suspend(h, 0).unwrap();

        ctx.begin_activity(ThreadCategory::Communication);
        assert_eq!(ctx.release_one_if_no_queries(), 0);
        assert_eq!(ctx.release_max_if_no_queries(), 0);
        ctx.end_activity(ThreadCategory::Communication).unwrap();
        assert!(ctx.end_activity(ThreadCategory::Communication).is_err());

        assert_eq!(ctx.release_one_if_no_queries(), 1);
        assert_eq!(ctx.release_one_if_no_queries(), 0);
    }

    #[test]
    fn test_decrement_meter_keeps_running_within_allowance() {
        let mut config = ServerConfig::default();
        config.initial_meter_level = 900;
        config
            .meters
            .insert(ThreadCategory::Utility, MeterConfig::default().with_workers(4));
        let ctx = context(config);
        let h = ctx.register_worker(ThreadCategory::Utility).unwrap();
        assert!(!ctx.decrement_meter(h, 100).unwrap());
        assert_eq!(ctx.meter_level(ThreadCategory::Utility), 800);
    }

    #[test]
    fn test_decrement_meter_suspends_over_allowance() {
        let ctx = context(ServerConfig::default());
        let (tx, rx) = std::sync::mpsc::channel();
        let utility = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                let h = ctx.register_worker(ThreadCategory::Utility).unwrap();
                tx.send(h).unwrap();
                // One worker configured: idle allowance is 0.
                ctx.decrement_meter(h, 10).unwrap()
            })
        };
        let h = rx.recv().unwrap();
        wait_until(|| ctx.lock_kernel().threads().is_suspended(h).unwrap_or(false));
        ctx.release_threads(ThreadCategory::Utility, 1);
        assert!(utility.join().unwrap());
    }

    #[derive(Debug)]
    struct Granted(bool);

    impl LockWaitRequest for Granted {
        fn request_id(&self) -> u64 {
            1
        }

        fn lock_granted(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn test_client_wait_skipped_when_granted() {
        let ctx = context(ServerConfig::default());
        assert!(ctx.client_wait_begin(Arc::new(Granted(true))).unwrap().is_none());
        assert!(ctx.lock_timeout_event().is_set());
        assert_eq!(ctx.client_waiters(), 0);
    }

    #[test]
    fn test_client_wait_rearms_monitor_after_concurrent_scan() {
        let ctx = context(ServerConfig::default());

        // Hold the kernel lock so the client stops between its first wakeup
        // of the monitor and the slot reservation.
        let guard = ctx.lock_kernel();
        let client = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                ctx.client_wait_begin(Arc::new(Granted(false)))
                    .unwrap()
                    .unwrap()
            })
        };
        wait_until(|| ctx.lock_timeout_event().is_set());

        // A monitor scan in this window finds nothing and resets the event.
        assert_eq!(guard.client_waits().waiting(), 0);
        ctx.lock_timeout_event().reset();
        drop(guard);

        let wait = client.join().unwrap();
        assert_eq!(ctx.client_waiters(), 1);
        assert!(ctx.lock_timeout_event().is_set());
        ctx.client_wait_release(1);
        ctx.client_wait_end(wait).unwrap();
    }

    #[test]
    fn test_client_wait_times_out_by_elapsed_time() {
        let clock = Arc::new(ManualClock::new(0));
        let config = ServerConfig {
            lock_wait_timeout_secs: 1,
            ..ServerConfig::default()
        };
        let ctx = SchedulingContext::with_clock(config, clock.clone()).unwrap();
        let wait = ctx.client_wait_begin(Arc::new(Granted(false))).unwrap().unwrap();
        assert!(ctx.client_wait_release(1));
        clock.advance(1_001);
        assert_eq!(ctx.client_wait_end(wait).unwrap(), WaitOutcome::TimedOut);
    }

    #[test]
    fn test_shutdown_never_moves_back() {
        let ctx = context(ServerConfig::default());
        ctx.begin_shutdown(ShutdownState::LastPhase);
        ctx.begin_shutdown(ShutdownState::Cleanup);
        assert_eq!(ctx.shutdown_state(), ShutdownState::LastPhase);
    }

    #[test]
    fn test_row_counters() {
        let ctx = context(ServerConfig::default());
        ctx.note_rows_inserted(3);
        ctx.note_rows_read(10);
        let rows = ctx.row_counts();
        assert_eq!((rows.inserted, rows.read, rows.updated), (3, 10, 0));
    }
}
