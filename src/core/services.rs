//! Call-outs into the rest of the engine.
//!
//! The scheduler decides when maintenance runs; the work itself (log flush,
//! checkpoint, buffer flush, change-buffer merge, purge, lock cancellation)
//! belongs to other subsystems. They are reached only through
//! [`EngineServices`].

use std::fmt;

use serde::{Deserialize, Serialize};

use super::client_wait::LockWaitRequest;

/// Log sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Lsn(pub u64);

impl Lsn {
    /// The largest LSN: "everything written so far".
    pub const MAX: Self = Self(u64::MAX);
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a log flush request waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlushWait {
    /// Return once the write is queued.
    NoWait,
    /// Wait for one log group to be written.
    OneGroup,
    /// Wait for every log group to be written.
    AllGroups,
}

/// Which dirty-page list a flush batch works from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlushStrategy {
    /// Least-recently-used end of the buffer pool.
    Lru,
    /// Oldest modification first; advances the checkpoint.
    List,
}

/// I/O counters sampled by the master scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoStats {
    /// Reads plus writes since startup.
    pub n_ios: u64,
    /// I/Os queued but not yet completed.
    pub pending_ios: u64,
}

/// Sections of the periodic diagnostic report owned by other subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSection {
    /// Semaphore and latch waits.
    Semaphores,
    /// Transactions and lock waits.
    Transactions,
    /// Asynchronous file I/O.
    FileIo,
    /// Insert buffer.
    InsertBuffer,
    /// Redo log.
    Log,
    /// Buffer pool and memory.
    BufferPool,
    /// Tablespace listing and validation.
    Tablespace,
    /// Data dictionary tables.
    Tables,
}

impl DiagnosticSection {
    /// Sections of the standard report, in print order.
    pub const STANDARD: [Self; 6] = [
        Self::Semaphores,
        Self::Transactions,
        Self::FileIo,
        Self::InsertBuffer,
        Self::Log,
        Self::BufferPool,
    ];
}

/// Phase of server shutdown, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ShutdownState {
    /// Running normally.
    None = 0,
    /// Shutdown started; monitors stop.
    Cleanup = 1,
    /// Final phase; the master and the error monitor stop.
    LastPhase = 2,
}

impl ShutdownState {
    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::None,
            1 => Self::Cleanup,
            _ => Self::LastPhase,
        }
    }
}

/// Services the scheduler calls into.
///
/// Implementations must be thread-safe: the master, the lock-wait monitor and
/// client threads call them concurrently. Methods that the scheduler may call
/// with the kernel lock held are noted; they must not call back into the
/// scheduling context.
pub trait EngineServices: Send + Sync + 'static {
    /// Flush the redo log up to `lsn`.
    fn flush_log_up_to(&self, lsn: Lsn, wait: FlushWait);

    /// Make a checkpoint.
    fn checkpoint(&self, sync: bool, write_always: bool);

    /// Archive the log. Returns the bytes archived.
    fn archive_log(&self, force: bool) -> usize;

    /// Merge buffered secondary-index changes. Returns the bytes merged.
    fn merge_change_buffer(&self, allow_ios: bool, n_pages: usize) -> usize;

    /// Flush up to `n_pages` dirty pages older than `max_lsn`. Returns the
    /// pages flushed.
    fn flush_dirty_pages(&self, strategy: FlushStrategy, n_pages: usize, max_lsn: Lsn) -> usize;

    /// Wait for the running flush batch of `strategy` to finish.
    fn wait_for_flush_batch_end(&self, strategy: FlushStrategy);

    /// Run one purge pass. Returns the pages purged.
    fn run_purge_pass(&self) -> usize;

    /// Drop tables whose drop was deferred. Returns how many remain.
    fn drop_pending_background_tables(&self) -> usize;

    /// Tables waiting for a deferred drop. Called with the kernel lock held.
    fn pending_background_drops(&self) -> usize;

    /// Current I/O counters.
    fn io_stats(&self) -> IoStats;

    /// Cancel the lock request a timed-out thread waits on.
    ///
    /// Returns `false` if the lock was granted in the meantime. Called with the
    /// kernel lock held.
    fn cancel_waiting_lock(&self, request: &dyn LockWaitRequest) -> bool;

    /// Grant what can be granted to requests queued behind a cancelled one.
    /// Called with the kernel lock held.
    fn release_queued_behind(&self, request: &dyn LockWaitRequest);

    /// Wake threads left waiting on semaphores that are already free.
    fn wake_threads_if_sema_free(&self) {}

    /// Report semaphore waits that have lasted too long.
    fn print_long_semaphore_waits(&self) {}

    /// Text for one section of the diagnostic report.
    fn describe(&self, section: DiagnosticSection) -> String {
        let _ = section;
        String::new()
    }
}
