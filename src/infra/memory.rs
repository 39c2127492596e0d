//! In-memory engine backend.
//!
//! Simulates the maintenance backlogs the scheduler drives (purge, dirty
//! pages, change buffer, log archive, deferred table drops) and the I/O they
//! generate. Every call is recorded so tests can assert on what the
//! scheduler asked for and in which order.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::core::{
    DiagnosticSection, EngineServices, FlushStrategy, FlushWait, IoStats, LockWaitRequest, Lsn,
};

/// Pages reclaimed by one purge pass at most.
pub const PURGE_BATCH_PAGES: usize = 20;

/// Bytes merged per change-buffer page.
pub const MERGE_BYTES_PER_PAGE: usize = 128;

const CALL_LOG_CAPACITY: usize = 4096;

/// One recorded call into the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCall {
    /// `flush_log_up_to`.
    FlushLog,
    /// `checkpoint`.
    Checkpoint,
    /// `archive_log`.
    Archive,
    /// `merge_change_buffer` with the requested page count.
    Merge(usize),
    /// `flush_dirty_pages` with the requested page count.
    FlushPages(FlushStrategy, usize),
    /// `wait_for_flush_batch_end`.
    WaitFlushEnd,
    /// `run_purge_pass`.
    Purge,
    /// `drop_pending_background_tables`.
    DropTables,
    /// `cancel_waiting_lock` for a request id.
    CancelLock(u64),
    /// `release_queued_behind` for a request id.
    ReleaseQueuedBehind(u64),
    /// `wake_threads_if_sema_free`.
    WakeSemaWaiters,
    /// `print_long_semaphore_waits`.
    PrintLongWaits,
}

#[derive(Debug, Default)]
struct EngineSim {
    purge_backlog: usize,
    dirty_pages: usize,
    change_buffer_pages: usize,
    archive_backlog: usize,
    background_drops: usize,
    n_ios: u64,
    pending_ios: u64,
    flushed_lsn: Lsn,
    checkpoints: u64,
    calls: VecDeque<ServiceCall>,
}

impl EngineSim {
    fn record(&mut self, call: ServiceCall) {
        if self.calls.len() == CALL_LOG_CAPACITY {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }

    fn io(&mut self, n: usize) {
        self.n_ios += n as u64;
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Engine services backed by counters in memory.
#[derive(Default)]
pub struct InMemoryEngine {
    sim: Mutex<EngineSim>,
    on_checkpoint: Mutex<Option<Hook>>,
    on_drop_tables: Mutex<Option<Hook>>,
}

impl fmt::Debug for InMemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryEngine")
            .field("sim", &*self.sim.lock())
            .finish_non_exhaustive()
    }
}

impl InMemoryEngine {
    /// An engine with empty backlogs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add undo pages for purge to reclaim.
    pub fn add_purge_backlog(&self, pages: usize) {
        self.sim.lock().purge_backlog += pages;
    }

    /// Undo pages left to purge.
    #[must_use]
    pub fn purge_backlog(&self) -> usize {
        self.sim.lock().purge_backlog
    }

    /// Dirty some buffer pool pages.
    pub fn add_dirty_pages(&self, pages: usize) {
        self.sim.lock().dirty_pages += pages;
    }

    /// Dirty pages left.
    #[must_use]
    pub fn dirty_pages(&self) -> usize {
        self.sim.lock().dirty_pages
    }

    /// Buffer some secondary-index changes.
    pub fn add_change_buffer_pages(&self, pages: usize) {
        self.sim.lock().change_buffer_pages += pages;
    }

    /// Change-buffer pages left to merge.
    #[must_use]
    pub fn change_buffer_pages(&self) -> usize {
        self.sim.lock().change_buffer_pages
    }

    /// Add log bytes waiting for the archiver.
    pub fn add_archive_backlog(&self, bytes: usize) {
        self.sim.lock().archive_backlog += bytes;
    }

    /// Defer some table drops to the background.
    pub fn add_background_drops(&self, tables: usize) {
        self.sim.lock().background_drops += tables;
    }

    /// Set the number of in-flight I/Os.
    pub fn set_pending_ios(&self, pending: u64) {
        self.sim.lock().pending_ios = pending;
    }

    /// Checkpoints taken so far.
    #[must_use]
    pub fn checkpoints(&self) -> u64 {
        self.sim.lock().checkpoints
    }

    /// Highest LSN the log was flushed to.
    #[must_use]
    pub fn flushed_lsn(&self) -> Lsn {
        self.sim.lock().flushed_lsn
    }

    /// Calls recorded so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.sim.lock().calls.iter().copied().collect()
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&self) {
        self.sim.lock().calls.clear();
    }

    /// Run `hook` after every checkpoint.
    pub fn on_checkpoint(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_checkpoint.lock() = Some(Box::new(hook));
    }

    /// Run `hook` after every background drop call.
    pub fn on_drop_tables(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_drop_tables.lock() = Some(Box::new(hook));
    }

    fn run_hook(hook: &Mutex<Option<Hook>>) {
        if let Some(hook) = hook.lock().as_ref() {
            hook();
        }
    }
}

impl EngineServices for InMemoryEngine {
    fn flush_log_up_to(&self, lsn: Lsn, _wait: FlushWait) {
        let mut sim = self.sim.lock();
        sim.record(ServiceCall::FlushLog);
        sim.flushed_lsn = sim.flushed_lsn.max(lsn);
    }

    fn checkpoint(&self, _sync: bool, _write_always: bool) {
        {
            let mut sim = self.sim.lock();
            sim.record(ServiceCall::Checkpoint);
            sim.checkpoints += 1;
        }
        Self::run_hook(&self.on_checkpoint);
    }

    fn archive_log(&self, _force: bool) -> usize {
        let mut sim = self.sim.lock();
        sim.record(ServiceCall::Archive);
        std::mem::take(&mut sim.archive_backlog)
    }

    fn merge_change_buffer(&self, _allow_ios: bool, n_pages: usize) -> usize {
        let mut sim = self.sim.lock();
        sim.record(ServiceCall::Merge(n_pages));
        let merged = n_pages.min(sim.change_buffer_pages);
        sim.change_buffer_pages -= merged;
        sim.io(merged);
        merged * MERGE_BYTES_PER_PAGE
    }

    fn flush_dirty_pages(&self, strategy: FlushStrategy, n_pages: usize, _max_lsn: Lsn) -> usize {
        let mut sim = self.sim.lock();
        sim.record(ServiceCall::FlushPages(strategy, n_pages));
        let flushed = n_pages.min(sim.dirty_pages);
        sim.dirty_pages -= flushed;
        sim.io(flushed);
        flushed
    }

    fn wait_for_flush_batch_end(&self, _strategy: FlushStrategy) {
        self.sim.lock().record(ServiceCall::WaitFlushEnd);
    }

    fn run_purge_pass(&self) -> usize {
        let mut sim = self.sim.lock();
        sim.record(ServiceCall::Purge);
        let purged = PURGE_BATCH_PAGES.min(sim.purge_backlog);
        sim.purge_backlog -= purged;
        sim.io(purged);
        purged
    }

    fn drop_pending_background_tables(&self) -> usize {
        let remaining = {
            let mut sim = self.sim.lock();
            sim.record(ServiceCall::DropTables);
            sim.background_drops = sim.background_drops.saturating_sub(1);
            sim.background_drops
        };
        Self::run_hook(&self.on_drop_tables);
        remaining
    }

    fn pending_background_drops(&self) -> usize {
        self.sim.lock().background_drops
    }

    fn io_stats(&self) -> IoStats {
        let sim = self.sim.lock();
        IoStats {
            n_ios: sim.n_ios,
            pending_ios: sim.pending_ios,
        }
    }

    fn cancel_waiting_lock(&self, request: &dyn LockWaitRequest) -> bool {
        self.sim
            .lock()
            .record(ServiceCall::CancelLock(request.request_id()));
        !request.lock_granted()
    }

    fn release_queued_behind(&self, request: &dyn LockWaitRequest) {
        self.sim
            .lock()
            .record(ServiceCall::ReleaseQueuedBehind(request.request_id()));
    }

    fn wake_threads_if_sema_free(&self) {
        self.sim.lock().record(ServiceCall::WakeSemaWaiters);
    }

    fn print_long_semaphore_waits(&self) {
        self.sim.lock().record(ServiceCall::PrintLongWaits);
    }

    fn describe(&self, section: DiagnosticSection) -> String {
        let sim = self.sim.lock();
        match section {
            DiagnosticSection::FileIo => {
                format!("{} ios, {} pending", sim.n_ios, sim.pending_ios)
            }
            DiagnosticSection::InsertBuffer => {
                format!("{} pages buffered", sim.change_buffer_pages)
            }
            DiagnosticSection::Log => format!(
                "flushed up to {}, {} checkpoints, {} bytes to archive",
                sim.flushed_lsn, sim.checkpoints, sim.archive_backlog
            ),
            DiagnosticSection::BufferPool => format!("{} dirty pages", sim.dirty_pages),
            DiagnosticSection::Transactions => {
                format!("purge backlog {} pages", sim.purge_backlog)
            }
            DiagnosticSection::Tables => {
                format!("{} tables waiting for background drop", sim.background_drops)
            }
            DiagnosticSection::Semaphores | DiagnosticSection::Tablespace => String::new(),
        }
    }
}

/// A lock request whose grant is flipped by hand.
#[derive(Debug)]
pub struct InMemoryLockRequest {
    id: u64,
    granted: AtomicBool,
}

impl InMemoryLockRequest {
    /// An ungranted request.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self {
            id,
            granted: AtomicBool::new(false),
        }
    }

    /// Mark the lock granted.
    pub fn grant(&self) {
        self.granted.store(true, Ordering::SeqCst);
    }
}

impl LockWaitRequest for InMemoryLockRequest {
    fn request_id(&self) -> u64 {
        self.id
    }

    fn lock_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }
}
