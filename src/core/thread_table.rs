//! Thread slot table.
//!
//! Every engine-affiliated thread owns one slot while it lives. A slot records
//! the thread's category, whether it is suspended, when it suspended and the
//! event it waits on. The table is only touched with the kernel lock held.
//!
//! Suspension is a two-step protocol:
//!
//! 1. With the kernel lock held, [`ThreadSlotTable::suspend`] marks the slot
//!    suspended, resets its event and hands the event back.
//! 2. The caller drops the kernel lock and waits on the event.
//!
//! A releaser takes the kernel lock, clears `suspended` and sets the event in
//! [`ThreadSlotTable::release_threads`]. Both steps run under the same lock
//! and the event is level-triggered, so a release cannot slip between the
//! two and be lost.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::arena::{SlotArena, SlotHandle};
use super::KernelError;
use crate::util::clock::TimestampMs;
use crate::Event;

/// The kind of thread occupying a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadCategory {
    /// Client request thread.
    Communication,
    /// Operator console thread.
    Console,
    /// Parallel worker.
    Worker,
    /// Recovery/purge-class background utility.
    Utility,
    /// The master scheduler.
    Master,
}

impl ThreadCategory {
    /// Number of categories.
    pub const COUNT: usize = 5;

    /// Every category, in index order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Communication,
        Self::Console,
        Self::Worker,
        Self::Utility,
        Self::Master,
    ];

    /// Dense index for per-category arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Background categories may suspend themselves in the table.
    #[must_use]
    pub const fn is_background(self) -> bool {
        matches!(self, Self::Worker | Self::Utility | Self::Master)
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Communication => "communication",
            Self::Console => "console",
            Self::Worker => "worker",
            Self::Utility => "utility",
            Self::Master => "master",
        }
    }
}

impl fmt::Display for ThreadCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of the OS thread that owns a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadIdentity {
    /// Runtime thread id.
    pub id: ThreadId,
    /// Thread name, if the thread was named.
    pub name: Option<String>,
}

impl ThreadIdentity {
    /// Identity of the calling thread.
    #[must_use]
    pub fn current() -> Self {
        let me = thread::current();
        Self {
            id: me.id(),
            name: me.name().map(str::to_owned),
        }
    }
}

#[derive(Debug)]
struct ThreadSlot {
    identity: Option<ThreadIdentity>,
    category: ThreadCategory,
    suspended: bool,
    suspend_time_ms: TimestampMs,
    event: Arc<Event>,
}

/// Diagnostic view of one reserved slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    /// Slot index.
    pub index: usize,
    /// Thread category.
    pub category: ThreadCategory,
    /// Whether the thread is suspended.
    pub suspended: bool,
    /// Time of the last suspension.
    pub suspend_time_ms: TimestampMs,
    /// Thread name, if any.
    pub thread_name: Option<String>,
}

/// Fixed-capacity registry of engine threads.
#[derive(Debug)]
pub struct ThreadSlotTable {
    arena: SlotArena<ThreadSlot>,
    active: [u32; ThreadCategory::COUNT],
    registered: [u32; ThreadCategory::COUNT],
    print_releases: bool,
}

impl ThreadSlotTable {
    /// Create a table with `capacity` slots and one event per slot.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            arena: SlotArena::new(capacity, |_| ThreadSlot {
                identity: None,
                category: ThreadCategory::Communication,
                suspended: false,
                suspend_time_ms: 0,
                event: Arc::new(Event::new()),
            }),
            active: [0; ThreadCategory::COUNT],
            registered: [0; ThreadCategory::COUNT],
            print_releases: false,
        }
    }

    /// Log every suspend and release at info level instead of debug.
    #[must_use]
    pub const fn with_release_logging(mut self, enabled: bool) -> Self {
        self.print_releases = enabled;
        self
    }

    /// Table capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Reserve the first free slot for a newly registering thread.
    ///
    /// Background threads start out counted as active.
    ///
    /// # Errors
    ///
    /// `SlotTableExhausted` if every slot is taken. This is fatal.
    pub fn reserve(
        &mut self,
        category: ThreadCategory,
        identity: ThreadIdentity,
    ) -> Result<SlotHandle, KernelError> {
        let capacity = self.arena.capacity();
        let (handle, slot) = self
            .arena
            .allocate()
            .ok_or(KernelError::SlotTableExhausted { capacity })?;

        slot.identity = Some(identity);
        slot.category = category;
        slot.suspended = false;

        self.registered[category.index()] += 1;
        if category.is_background() {
            self.active[category.index()] += 1;
        }
        debug!(slot = %handle, %category, "thread slot reserved");
        Ok(handle)
    }

    /// Free a slot. Its event is kept for the next occupant.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the handle no longer refers to a reserved slot.
    pub fn release(&mut self, handle: SlotHandle) -> Result<ThreadCategory, KernelError> {
        let slot = self.arena.release(handle).ok_or(stale(handle))?;
        let category = slot.category;
        let was_running = !slot.suspended;
        slot.identity = None;
        slot.suspended = false;

        self.registered[category.index()] -= 1;
        if category.is_background() && was_running {
            self.active[category.index()] = self.active[category.index()].saturating_sub(1);
        }
        debug!(slot = %handle, %category, "thread slot released");
        Ok(category)
    }

    /// Mark the slot's thread suspended and return the event it must wait on.
    ///
    /// The caller must drop the kernel lock before waiting.
    ///
    /// # Errors
    ///
    /// `StaleHandle`, `NotSuspendable` for foreground categories, and
    /// `ActiveCountUnderflow` if the category has no active threads on record.
    pub fn suspend(
        &mut self,
        handle: SlotHandle,
        now_ms: TimestampMs,
    ) -> Result<Arc<Event>, KernelError> {
        let print_releases = self.print_releases;
        let slot = self.arena.get_mut(handle).ok_or(stale(handle))?;
        let category = slot.category;
        if !category.is_background() {
            return Err(KernelError::NotSuspendable(category));
        }
        let active = &mut self.active[category.index()];
        if *active == 0 {
            return Err(KernelError::ActiveCountUnderflow(category));
        }
        *active -= 1;

        slot.suspended = true;
        slot.suspend_time_ms = now_ms;
        slot.event.reset();

        if print_releases {
            info!(slot = %handle, %category, "suspending thread");
        } else {
            debug!(slot = %handle, %category, "suspending thread");
        }
        Ok(Arc::clone(&slot.event))
    }

    /// Release up to `n` suspended threads of `category`, lowest slot first.
    ///
    /// Returns how many were released, which may be fewer than `n`.
    pub fn release_threads(&mut self, category: ThreadCategory, n: usize) -> usize {
        let mut count = 0;
        if n == 0 {
            return count;
        }
        for (handle, slot) in self.arena.iter_mut() {
            if slot.category != category || !slot.suspended {
                continue;
            }
            slot.suspended = false;
            self.active[category.index()] += 1;
            slot.event.set();

            if self.print_releases {
                info!(slot = %handle, %category, "releasing thread");
            } else {
                debug!(slot = %handle, %category, "releasing thread");
            }

            count += 1;
            if count == n {
                break;
            }
        }
        count
    }

    /// Category of the thread holding `handle`.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the slot was released.
    pub fn category_of(&self, handle: SlotHandle) -> Result<ThreadCategory, KernelError> {
        self.arena
            .get(handle)
            .map(|s| s.category)
            .ok_or(stale(handle))
    }

    /// Whether the thread holding `handle` is suspended.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the slot was released.
    pub fn is_suspended(&self, handle: SlotHandle) -> Result<bool, KernelError> {
        self.arena
            .get(handle)
            .map(|s| s.suspended)
            .ok_or(stale(handle))
    }

    /// Slot held by the OS thread `id`, if it registered.
    #[must_use]
    pub fn find_by_identity(&self, id: ThreadId) -> Option<SlotHandle> {
        self.arena
            .iter()
            .find(|(_, s)| s.identity.as_ref().is_some_and(|i| i.id == id))
            .map(|(h, _)| h)
    }

    /// Threads of `category` currently counted as running.
    #[must_use]
    pub const fn active(&self, category: ThreadCategory) -> u32 {
        self.active[category.index()]
    }

    /// Threads of `category` holding a slot.
    #[must_use]
    pub const fn registered(&self, category: ThreadCategory) -> u32 {
        self.registered[category.index()]
    }

    /// Threads holding a slot, all categories together.
    #[must_use]
    pub fn registered_total(&self) -> usize {
        self.arena.in_use()
    }

    /// Count one more running thread of `category`.
    pub fn inc_active(&mut self, category: ThreadCategory) {
        self.active[category.index()] += 1;
    }

    /// Count one fewer running thread of `category`.
    ///
    /// # Errors
    ///
    /// `ActiveCountUnderflow` if the count is already zero.
    pub fn dec_active(&mut self, category: ThreadCategory) -> Result<(), KernelError> {
        let active = &mut self.active[category.index()];
        if *active == 0 {
            return Err(KernelError::ActiveCountUnderflow(category));
        }
        *active -= 1;
        Ok(())
    }

    /// Snapshot of every reserved slot.
    #[must_use]
    pub fn slots(&self) -> Vec<SlotInfo> {
        self.arena
            .iter()
            .map(|(h, s)| SlotInfo {
                index: h.index(),
                category: s.category,
                suspended: s.suspended,
                suspend_time_ms: s.suspend_time_ms,
                thread_name: s.identity.as_ref().and_then(|i| i.name.clone()),
            })
            .collect()
    }
}

const fn stale(handle: SlotHandle) -> KernelError {
    KernelError::StaleHandle {
        index: handle.index(),
        generation: handle.generation(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me() -> ThreadIdentity {
        ThreadIdentity::current()
    }

    #[test]
    fn test_reserve_counts_background_as_active() {
        let mut table = ThreadSlotTable::new(4);
        table.reserve(ThreadCategory::Communication, me()).unwrap();
        table.reserve(ThreadCategory::Utility, me()).unwrap();

        assert_eq!(table.active(ThreadCategory::Communication), 0);
        assert_eq!(table.active(ThreadCategory::Utility), 1);
        assert_eq!(table.registered(ThreadCategory::Communication), 1);
        assert_eq!(table.registered_total(), 2);
    }

    #[test]
    fn test_exhaustion_is_fatal() {
        let mut table = ThreadSlotTable::new(1);
        table.reserve(ThreadCategory::Worker, me()).unwrap();
        let err = table.reserve(ThreadCategory::Worker, me()).unwrap_err();
        assert_eq!(err, KernelError::SlotTableExhausted { capacity: 1 });
        assert!(err.is_fatal());
    }

    #[test]
    fn test_release_reuses_slot_and_rejects_stale_handle() {
        let mut table = ThreadSlotTable::new(2);
        let first = table.reserve(ThreadCategory::Worker, me()).unwrap();
        table.release(first).unwrap();
        assert_eq!(table.active(ThreadCategory::Worker), 0);

        let second = table.reserve(ThreadCategory::Master, me()).unwrap();
        assert_eq!(second.index(), first.index());
        assert!(matches!(
            table.category_of(first),
            Err(KernelError::StaleHandle { .. })
        ));
        assert_eq!(table.category_of(second).unwrap(), ThreadCategory::Master);
    }

    #[test]
    fn test_suspend_then_release() {
        let mut table = ThreadSlotTable::new(4);
        let a = table.reserve(ThreadCategory::Utility, me()).unwrap();
        let b = table.reserve(ThreadCategory::Utility, me()).unwrap();

        let ev_a = table.suspend(a, 100).unwrap();
        let ev_b = table.suspend(b, 100).unwrap();
        assert_eq!(table.active(ThreadCategory::Utility), 0);
        assert!(!ev_a.is_set());

        assert_eq!(table.release_threads(ThreadCategory::Utility, 1), 1);
        assert!(ev_a.is_set());
        assert!(!ev_b.is_set());
        assert!(!table.is_suspended(a).unwrap());
        assert!(table.is_suspended(b).unwrap());
        assert_eq!(table.active(ThreadCategory::Utility), 1);

        // Asking for more than are suspended releases what there is.
        assert_eq!(table.release_threads(ThreadCategory::Utility, 5), 1);
        assert_eq!(table.release_threads(ThreadCategory::Utility, 5), 0);
    }

    #[test]
    fn test_release_threads_matches_category_only() {
        let mut table = ThreadSlotTable::new(4);
        let worker = table.reserve(ThreadCategory::Worker, me()).unwrap();
        table.suspend(worker, 0).unwrap();
        assert_eq!(table.release_threads(ThreadCategory::Master, 1), 0);
        assert_eq!(table.release_threads(ThreadCategory::Worker, 0), 0);
        assert!(table.is_suspended(worker).unwrap());
    }

    #[test]
    fn test_foreground_cannot_suspend() {
        let mut table = ThreadSlotTable::new(2);
        let console = table.reserve(ThreadCategory::Console, me()).unwrap();
        assert_eq!(
            table.suspend(console, 0).unwrap_err(),
            KernelError::NotSuspendable(ThreadCategory::Console)
        );
    }

    #[test]
    fn test_dec_active_underflow() {
        let mut table = ThreadSlotTable::new(1);
        assert!(table.dec_active(ThreadCategory::Communication).is_err());
        table.inc_active(ThreadCategory::Communication);
        assert!(table.dec_active(ThreadCategory::Communication).is_ok());
    }

    #[test]
    fn test_find_by_identity() {
        let mut table = ThreadSlotTable::new(2);
        let h = table.reserve(ThreadCategory::Console, me()).unwrap();
        assert_eq!(table.find_by_identity(thread::current().id()), Some(h));
        assert_eq!(table.slots().len(), 1);
    }
}
