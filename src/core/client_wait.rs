//! Client lock-wait table.
//!
//! A client thread that must wait for a row lock parks in one of these slots.
//! The lock-wait monitor scans the table once per check interval and cancels
//! waits that ran past the timeout.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use super::arena::{SlotArena, SlotHandle};
use super::thread_table::ThreadIdentity;
use super::KernelError;
use crate::util::clock::TimestampMs;
use crate::Event;

/// The lock request a client thread waits on.
///
/// Implemented by the lock manager. The scheduling kernel only needs to know
/// whether the lock was granted and how to name the request.
pub trait LockWaitRequest: Send + Sync + Debug {
    /// Stable identifier of the request.
    fn request_id(&self) -> u64;

    /// True once the lock has been granted and the thread may run.
    fn lock_granted(&self) -> bool;
}

/// How a client lock wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WaitOutcome {
    /// The lock was granted (or the wait was cancelled for another reason).
    Granted,
    /// The wait exceeded the lock wait timeout.
    TimedOut,
}

/// A parked client wait, returned by `client_wait_begin`.
#[derive(Debug)]
#[must_use = "a client wait must be ended with `client_wait_end`"]
pub struct ClientWait {
    handle: SlotHandle,
    event: Arc<Event>,
}

impl ClientWait {
    /// Slot the wait occupies.
    pub const fn handle(&self) -> SlotHandle {
        self.handle
    }

    /// Block until the lock is granted or the monitor cancels the wait.
    pub fn wait(&self) {
        self.event.wait();
    }

    /// Block for at most `timeout`. Returns `true` if woken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.event.wait_timeout(timeout)
    }
}

/// Result of one monitor scan over the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// At least one slot was in use.
    pub some_waits: bool,
    /// Waits cancelled by this scan.
    pub cancelled: usize,
}

/// Diagnostic view of one parked client wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientWaitInfo {
    /// Slot index.
    pub index: usize,
    /// Request the thread waits on.
    pub request_id: Option<u64>,
    /// Name of the waiting thread, if any.
    pub thread_name: Option<String>,
    /// When the wait began.
    pub suspend_time_ms: TimestampMs,
    /// Cancelled by the monitor.
    pub timed_out: bool,
}

#[derive(Debug)]
struct ClientWaitSlot {
    identity: Option<ThreadIdentity>,
    request: Option<Arc<dyn LockWaitRequest>>,
    suspend_time_ms: TimestampMs,
    timed_out: bool,
    event: Arc<Event>,
}

/// Fixed-capacity table of client lock waits. Lives under the kernel lock.
#[derive(Debug)]
pub struct ClientWaitTable {
    arena: SlotArena<ClientWaitSlot>,
}

impl ClientWaitTable {
    /// Table with `capacity` slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            arena: SlotArena::new(capacity, |_| ClientWaitSlot {
                identity: None,
                request: None,
                suspend_time_ms: 0,
                timed_out: false,
                event: Arc::new(Event::new()),
            }),
        }
    }

    /// Park `request` in the first free slot and reset its event.
    ///
    /// # Errors
    ///
    /// `WaitTableExhausted` if every slot is in use.
    pub fn reserve(
        &mut self,
        request: Arc<dyn LockWaitRequest>,
        identity: ThreadIdentity,
        now_ms: TimestampMs,
    ) -> Result<ClientWait, KernelError> {
        let capacity = self.arena.capacity();
        let (handle, slot) = self
            .arena
            .allocate()
            .ok_or(KernelError::WaitTableExhausted { capacity })?;

        debug!(slot = %handle, request = request.request_id(), "client lock wait begins");
        slot.identity = Some(identity);
        slot.request = Some(request);
        slot.suspend_time_ms = now_ms;
        slot.timed_out = false;
        slot.event.reset();

        Ok(ClientWait {
            handle,
            event: Arc::clone(&slot.event),
        })
    }

    /// Free the slot and classify the wait.
    ///
    /// A wait counts as timed out if the monitor cancelled it, or if it
    /// simply lasted longer than `timeout`.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the wait was already ended.
    pub fn release(
        &mut self,
        wait: &ClientWait,
        now_ms: TimestampMs,
        timeout: Option<Duration>,
    ) -> Result<WaitOutcome, KernelError> {
        let handle = wait.handle;
        let slot = self.arena.release(handle).ok_or(KernelError::StaleHandle {
            index: handle.index(),
            generation: handle.generation(),
        })?;

        slot.identity = None;
        slot.request = None;
        let elapsed_ms = now_ms - slot.suspend_time_ms;
        let expired = timeout.is_some_and(|t| i128::from(elapsed_ms) > millis(t));

        if slot.timed_out || expired {
            Ok(WaitOutcome::TimedOut)
        } else {
            Ok(WaitOutcome::Granted)
        }
    }

    /// Wake the thread waiting on `request_id`, if one is parked.
    pub fn release_request(&self, request_id: u64) -> bool {
        let found = self.arena.iter().find(|(_, slot)| {
            slot.request
                .as_ref()
                .is_some_and(|r| r.request_id() == request_id)
        });
        match found {
            Some((handle, slot)) => {
                debug!(slot = %handle, request = request_id, "client lock wait released");
                slot.event.set();
                true
            }
            None => false,
        }
    }

    /// Cancel every wait older than `timeout` or stamped in the future.
    ///
    /// `cancel` runs once per expired wait, with the kernel lock still held,
    /// and returns `false` if the lock was granted in the meantime. Such a
    /// wait is left alone. Cancelled slots are flagged and their events set.
    /// With `timeout` at `None` nothing ever expires.
    pub fn expire(
        &mut self,
        now_ms: TimestampMs,
        timeout: Option<Duration>,
        mut cancel: impl FnMut(&dyn LockWaitRequest) -> bool,
    ) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        for (handle, slot) in self.arena.iter_mut() {
            outcome.some_waits = true;
            let Some(timeout) = timeout else {
                continue;
            };
            if slot.timed_out {
                continue;
            }

            let elapsed_ms = now_ms - slot.suspend_time_ms;
            if elapsed_ms >= 0 && i128::from(elapsed_ms) <= millis(timeout) {
                continue;
            }

            let Some(request) = &slot.request else {
                continue;
            };
            if !cancel(request.as_ref()) {
                debug!(
                    slot = %handle,
                    request = request.request_id(),
                    "lock granted before timeout cancel"
                );
                continue;
            }
            warn!(
                slot = %handle,
                request = request.request_id(),
                elapsed_ms,
                "lock wait timeout exceeded, cancelled"
            );
            slot.timed_out = true;
            slot.event.set();
            outcome.cancelled += 1;
        }
        outcome
    }

    /// Snapshot of every parked wait.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ClientWaitInfo> {
        self.arena
            .iter()
            .map(|(handle, slot)| ClientWaitInfo {
                index: handle.index(),
                request_id: slot.request.as_ref().map(|r| r.request_id()),
                thread_name: slot.identity.as_ref().and_then(|i| i.name.clone()),
                suspend_time_ms: slot.suspend_time_ms,
                timed_out: slot.timed_out,
            })
            .collect()
    }

    /// Number of parked waits.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.arena.in_use()
    }

    /// Table capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }
}

fn millis(d: Duration) -> i128 {
    i128::try_from(d.as_millis()).unwrap_or(i128::MAX)
}
