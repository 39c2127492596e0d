//! Concurrency admission gate.
//!
//! The gate bounds how many client threads execute inside the engine at once.
//! Threads over the limit park in a FIFO of wait slots and are admitted in
//! arrival order as others leave. A thread that gets in receives a budget of
//! free tickets; while it has tickets left, re-entering costs nothing and does
//! not touch the gate lock.
//!
//! The gate has its own lock and never takes the kernel lock.
//!
//! When a thread leaves, it counts the waiter it wakes as already admitted
//! before unlocking. The waiter therefore never re-checks the limit, and a
//! burst of exits cannot admit more waiters than there were free places.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::GATE_DISABLED_THRESHOLD;
use crate::Event;

/// Per-transaction admission state, owned by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Admission {
    tickets: u32,
    inside: bool,
}

impl Admission {
    /// A fresh admission: outside the engine, no tickets.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tickets: 0,
            inside: false,
        }
    }

    /// Free tickets left.
    #[must_use]
    pub const fn tickets(&self) -> u32 {
        self.tickets
    }

    /// Whether the gate counts this transaction as inside.
    #[must_use]
    pub const fn is_inside(&self) -> bool {
        self.inside
    }
}

/// How a call to [`ConcurrencyGate::enter`] got in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnterOutcome {
    /// The gate is disabled.
    Disabled,
    /// A free ticket was spent; the gate lock was not taken.
    Ticket,
    /// There was room below the limit.
    Immediate,
    /// No wait slot was free, so the limit was exceeded.
    Bypass,
    /// The thread waited in the queue and was released by an exiting thread.
    Queued,
}

#[derive(Debug, Clone, Copy, Default)]
struct ConcurrencySlot {
    reserved: bool,
    wait_ended: bool,
}

#[derive(Debug)]
struct GateState {
    admitted: i64,
    waiting: usize,
    slots: Vec<ConcurrencySlot>,
    queue: VecDeque<usize>,
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GateStats {
    /// Current limit.
    pub limit: usize,
    /// Threads counted inside.
    pub admitted: i64,
    /// Threads parked in the queue.
    pub waiting: usize,
    /// Times the gate lock was taken.
    pub lock_acquisitions: u64,
    /// Admissions past the limit for lack of a wait slot.
    pub bypass_admissions: u64,
    /// Admissions that went through the queue.
    pub queued_admissions: u64,
}

/// Bounded counting admission control with a FIFO of waiters.
#[derive(Debug)]
pub struct ConcurrencyGate {
    limit: AtomicUsize,
    free_tickets: u32,
    inner: Mutex<GateState>,
    events: Vec<Event>,
    lock_acquisitions: AtomicU64,
    bypass_admissions: AtomicU64,
    queued_admissions: AtomicU64,
}

impl ConcurrencyGate {
    /// A gate admitting `limit` threads, with `queue_capacity` wait slots.
    #[must_use]
    pub fn new(limit: usize, free_tickets: u32, queue_capacity: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit),
            free_tickets,
            inner: Mutex::new(GateState {
                admitted: 0,
                waiting: 0,
                slots: vec![ConcurrencySlot::default(); queue_capacity],
                queue: VecDeque::with_capacity(queue_capacity),
            }),
            events: (0..queue_capacity).map(|_| Event::new()).collect(),
            lock_acquisitions: AtomicU64::new(0),
            bypass_admissions: AtomicU64::new(0),
            queued_admissions: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
        self.inner.lock()
    }

    /// Current limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// Change the limit. A value of 500 or more disables the gate.
    pub fn set_limit(&self, limit: usize) {
        debug!(limit, "concurrency limit changed");
        self.limit.store(limit, Ordering::Relaxed);
    }

    /// Whether admission control is switched off.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.limit() >= GATE_DISABLED_THRESHOLD
    }

    /// Enter the engine, waiting in line if it is full.
    pub fn enter(&self, admission: &mut Admission) -> EnterOutcome {
        self.enter_releasing(admission, || {})
    }

    /// Enter the engine. `release_latch` runs only if the thread is about to
    /// block, so it can drop any shared latch another thread may need.
    pub fn enter_releasing(
        &self,
        admission: &mut Admission,
        release_latch: impl FnOnce(),
    ) -> EnterOutcome {
        if self.is_disabled() {
            return EnterOutcome::Disabled;
        }

        if admission.tickets > 0 {
            admission.tickets -= 1;
            return EnterOutcome::Ticket;
        }

        let mut state = self.lock();
        let limit = i64::try_from(self.limit()).unwrap_or(i64::MAX);

        if state.admitted < limit {
            state.admitted += 1;
            admission.inside = true;
            admission.tickets = self.free_tickets;
            return EnterOutcome::Immediate;
        }

        let Some(index) = state.slots.iter().position(|s| !s.reserved) else {
            state.admitted += 1;
            admission.inside = true;
            admission.tickets = 0;
            drop(state);
            self.bypass_admissions.fetch_add(1, Ordering::Relaxed);
            warn!(limit, "no free gate wait slot, admitting past the limit");
            return EnterOutcome::Bypass;
        };

        release_latch();

        state.slots[index] = ConcurrencySlot {
            reserved: true,
            wait_ended: false,
        };
        state.queue.push_back(index);
        self.events[index].reset();
        state.waiting += 1;
        drop(state);

        trace!(slot = index, "waiting for admission");
        self.events[index].wait();

        let mut state = self.lock();
        state.waiting -= 1;
        // The releasing thread already counted us in `admitted`.
        state.slots[index].reserved = false;
        if let Some(pos) = state.queue.iter().position(|&i| i == index) {
            state.queue.remove(pos);
        }
        admission.inside = true;
        admission.tickets = self.free_tickets;
        drop(state);

        self.queued_admissions.fetch_add(1, Ordering::Relaxed);
        EnterOutcome::Queued
    }

    /// Enter regardless of the limit, with no tickets.
    ///
    /// Used by a thread coming back from a lock wait.
    pub fn force_enter(&self, admission: &mut Admission) {
        if self.is_disabled() {
            return;
        }
        let mut state = self.lock();
        state.admitted += 1;
        admission.inside = true;
        admission.tickets = 0;
    }

    /// Leave the engine at the end of a statement.
    ///
    /// While tickets remain the thread stays counted inside.
    pub fn exit(&self, admission: &mut Admission) {
        if admission.tickets > 0 {
            return;
        }
        self.force_exit(admission);
    }

    /// Leave the engine now and hand the freed place to the oldest waiter.
    pub fn force_exit(&self, admission: &mut Admission) {
        if self.is_disabled() || !admission.inside {
            return;
        }

        let mut state = self.lock();
        state.admitted -= 1;
        admission.inside = false;
        admission.tickets = 0;

        let limit = i64::try_from(self.limit()).unwrap_or(i64::MAX);
        let mut woken = None;
        if state.admitted < limit {
            let next = state
                .queue
                .iter()
                .copied()
                .find(|&i| !state.slots[i].wait_ended);
            if let Some(index) = next {
                state.slots[index].wait_ended = true;
                state.admitted += 1;
                woken = Some(index);
            }
        }
        drop(state);

        if let Some(index) = woken {
            trace!(slot = index, "releasing queued thread");
            self.events[index].set();
        }
    }

    /// Threads counted inside.
    #[must_use]
    pub fn admitted(&self) -> i64 {
        self.inner.lock().admitted
    }

    /// Threads parked in the queue.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.lock().waiting
    }

    /// Snapshot of the gate counters. Does not count as a lock acquisition.
    #[must_use]
    pub fn stats(&self) -> GateStats {
        let state = self.inner.lock();
        GateStats {
            limit: self.limit(),
            admitted: state.admitted,
            waiting: state.waiting,
            lock_acquisitions: self.lock_acquisitions.load(Ordering::Relaxed),
            bypass_admissions: self.bypass_admissions.load(Ordering::Relaxed),
            queued_admissions: self.queued_admissions.load(Ordering::Relaxed),
        }
    }
}
