//! Lock-wait timeout monitor and error monitor.
//!
//! The lock-wait monitor wakes once per check interval while anyone waits for
//! a row lock or while diagnostics are switched on. Each cycle it cancels
//! waits past the lock wait timeout and, at a slower pace, logs a
//! [`MonitorReport`]. With nothing to watch it suspends on its own event,
//! which every new client wait sets.
//!
//! The error monitor is simpler: it periodically asks the engine to report
//! semaphore waits that have lasted too long.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::client_wait::{ClientWaitInfo, ScanOutcome};
use super::gate::GateStats;
use super::kernel::{RowCounts, SchedulingContext};
use super::services::{DiagnosticSection, EngineServices, ShutdownState};
use super::thread_table::ThreadCategory;
use crate::util::clock::TimestampMs;

/// Where the lock-wait monitor is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorState {
    /// Checking waits every interval.
    Active,
    /// Nothing to watch; waiting for a client wait or a flag change.
    Suspended,
    /// Shutdown reached the cleanup phase.
    Stopped,
}

/// Thread counts for one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    /// Category.
    pub category: ThreadCategory,
    /// Threads holding a slot.
    pub registered: u32,
    /// Threads counted as running.
    pub active: u32,
}

/// Row operations per second since the previous report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RowRates {
    /// Inserts per second.
    pub inserts: f64,
    /// Updates per second.
    pub updates: f64,
    /// Deletes per second.
    pub deletes: f64,
    /// Reads per second.
    pub reads: f64,
}

/// One section of text supplied by another subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSection {
    /// Which section.
    pub section: DiagnosticSection,
    /// Section text.
    pub text: String,
}

/// Periodic diagnostic report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorReport {
    /// When the report was taken.
    pub timestamp_ms: TimestampMs,
    /// Admission gate counters.
    pub gate: GateStats,
    /// Thread counts per category.
    pub threads: Vec<CategoryCount>,
    /// Parked client lock waits.
    pub client_waits: Vec<ClientWaitInfo>,
    /// What the master is doing.
    pub master_op: &'static str,
    /// Row totals.
    pub rows: RowCounts,
    /// Row rates since the previous report.
    pub rates: RowRates,
    /// Sections supplied by the engine.
    pub sections: Vec<ReportSection>,
}

impl MonitorReport {
    /// Section text, if the report carries it.
    #[must_use]
    pub fn section(&self, section: DiagnosticSection) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.section == section)
            .map(|s| s.text.as_str())
    }
}

/// Scans client lock waits and emits diagnostics.
#[derive(Debug)]
pub struct LockWaitMonitor<S: EngineServices> {
    ctx: Arc<SchedulingContext>,
    services: Arc<S>,
    state: MonitorState,
    last_report_ms: TimestampMs,
    last_table_report_ms: TimestampMs,
    last_rows: RowCounts,
    cancelled_total: u64,
}

impl<S: EngineServices> LockWaitMonitor<S> {
    /// A monitor starting in the active state.
    pub fn new(ctx: Arc<SchedulingContext>, services: Arc<S>) -> Self {
        let now = ctx.now_ms();
        let last_rows = ctx.row_counts();
        Self {
            ctx,
            services,
            state: MonitorState::Active,
            last_report_ms: now,
            last_table_report_ms: now,
            last_rows,
            cancelled_total: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> MonitorState {
        self.state
    }

    /// Waits cancelled since the monitor started.
    #[must_use]
    pub const fn cancelled_total(&self) -> u64 {
        self.cancelled_total
    }

    /// Cancel every client wait past the timeout, under the kernel lock.
    ///
    /// Also resets the monitor's own event, so a client wait that begins
    /// after this scan wakes the monitor again.
    pub fn scan_waits(&mut self) -> ScanOutcome {
        let timeout = self.ctx.config().lock_wait_timeout();
        let now = self.ctx.now_ms();
        let services = &self.services;

        let mut state = self.ctx.lock_kernel();
        let outcome = state.client_waits_mut().expire(now, timeout, |request| {
            let cancelled = services.cancel_waiting_lock(request);
            if cancelled {
                services.release_queued_behind(request);
            }
            cancelled
        });
        self.ctx.lock_timeout_event().reset();
        drop(state);

        self.cancelled_total += outcome.cancelled as u64;
        outcome
    }

    /// Build a report if one is due. Returns `None` otherwise.
    pub fn maybe_report(&mut self) -> Option<MonitorReport> {
        let timing = self.ctx.config().monitor_timing;
        let flags = self.ctx.monitor_flags();
        let now = self.ctx.now_ms();
        let elapsed_ms = now - self.last_report_ms;
        if elapsed_ms <= as_ms(timing.diagnostics_interval_ms) {
            return None;
        }

        let mut sections = Vec::new();
        let mut rates = RowRates::default();
        let standard = flags.standard || flags.locks;
        if standard {
            self.last_report_ms = now;
            sections.extend(DiagnosticSection::STANDARD.iter().map(|&section| ReportSection {
                section,
                text: self.services.describe(section),
            }));
            rates = self.row_rates(elapsed_ms);
        }

        let table_due = |last: TimestampMs| now - last > as_ms(timing.tablespace_interval_ms);
        if flags.tablespace && table_due(self.last_table_report_ms) {
            self.last_table_report_ms = now;
            sections.push(ReportSection {
                section: DiagnosticSection::Tablespace,
                text: self.services.describe(DiagnosticSection::Tablespace),
            });
        }
        if flags.table && table_due(self.last_table_report_ms) {
            self.last_table_report_ms = now;
            sections.push(ReportSection {
                section: DiagnosticSection::Tables,
                text: self.services.describe(DiagnosticSection::Tables),
            });
        }

        if !standard && sections.is_empty() {
            return None;
        }
        Some(self.build_report(now, rates, sections))
    }

    fn row_rates(&mut self, elapsed_ms: i64) -> RowRates {
        let rows = self.ctx.row_counts();
        #[allow(clippy::cast_precision_loss)]
        let per_sec =
            |new: u64, old: u64| new.saturating_sub(old) as f64 * 1000.0 / elapsed_ms as f64;
        let rates = RowRates {
            inserts: per_sec(rows.inserted, self.last_rows.inserted),
            updates: per_sec(rows.updated, self.last_rows.updated),
            deletes: per_sec(rows.deleted, self.last_rows.deleted),
            reads: per_sec(rows.read, self.last_rows.read),
        };
        self.last_rows = rows;
        rates
    }

    fn build_report(
        &self,
        now: TimestampMs,
        rates: RowRates,
        sections: Vec<ReportSection>,
    ) -> MonitorReport {
        let (threads, client_waits) = {
            let state = self.ctx.lock_kernel();
            let threads = ThreadCategory::ALL
                .iter()
                .map(|&category| CategoryCount {
                    category,
                    registered: state.threads().registered(category),
                    active: state.threads().active(category),
                })
                .collect();
            (threads, state.client_waits().snapshot())
        };

        MonitorReport {
            timestamp_ms: now,
            gate: self.ctx.gate().stats(),
            threads,
            client_waits,
            master_op: self.ctx.master_op(),
            rows: self.ctx.row_counts(),
            rates,
            sections,
        }
    }

    /// One active cycle: sleep, report if due, scan the waits.
    pub fn cycle(&mut self) -> MonitorState {
        self.ctx.set_lock_monitor_active(true);

        let interval = self.ctx.config().monitor_timing.check_interval_ms;
        thread::sleep(Duration::from_millis(interval));

        self.services.wake_threads_if_sema_free();

        if let Some(report) = self.maybe_report() {
            match serde_json::to_string(&report) {
                Ok(json) => info!(target: "engine_kernel::monitor", report = %json, "monitor output"),
                Err(e) => warn!(error = %e, "failed to serialize monitor report"),
            }
        }

        let outcome = self.scan_waits();
        if outcome.cancelled > 0 {
            debug!(cancelled = outcome.cancelled, "lock waits cancelled");
        }

        if self.ctx.shutdown_state() >= ShutdownState::Cleanup {
            return MonitorState::Stopped;
        }
        if outcome.some_waits || self.ctx.monitor_flags().any_enabled() {
            MonitorState::Active
        } else {
            MonitorState::Suspended
        }
    }

    /// Wait on the monitor event until a client wait or a flag change.
    pub fn suspend(&mut self) -> MonitorState {
        self.ctx.set_lock_monitor_active(false);
        self.ctx.lock_timeout_event().wait();
        MonitorState::Active
    }

    /// Run the current state's transition.
    pub fn step(&mut self) -> MonitorState {
        let next = match self.state {
            MonitorState::Active => self.cycle(),
            MonitorState::Suspended => self.suspend(),
            MonitorState::Stopped => MonitorState::Stopped,
        };
        self.state = next;
        next
    }

    /// Loop until shutdown reaches the cleanup phase.
    pub fn run(mut self) -> u64 {
        info!("lock wait monitor started");
        while self.step() != MonitorState::Stopped {}
        self.ctx.set_lock_monitor_active(false);
        info!(cancelled = self.cancelled_total, "lock wait monitor stopped");
        self.cancelled_total
    }
}

/// Periodically reports long semaphore waits.
#[derive(Debug)]
pub struct ErrorMonitor<S: EngineServices> {
    ctx: Arc<SchedulingContext>,
    services: Arc<S>,
}

impl<S: EngineServices> ErrorMonitor<S> {
    /// An error monitor over `services`.
    pub const fn new(ctx: Arc<SchedulingContext>, services: Arc<S>) -> Self {
        Self { ctx, services }
    }

    /// Sleep one interval and report. Returns `false` once shutdown reached
    /// its last phase.
    pub fn cycle(&self) -> bool {
        self.ctx.set_error_monitor_active(true);
        let interval = self.ctx.config().monitor_timing.error_monitor_interval_ms;
        thread::sleep(Duration::from_millis(interval));
        self.services.print_long_semaphore_waits();
        self.ctx.shutdown_state() < ShutdownState::LastPhase
    }

    /// Loop until shutdown reaches its last phase.
    pub fn run(self) {
        while self.cycle() {}
        self.ctx.set_error_monitor_active(false);
        info!("error monitor stopped");
    }
}

fn as_ms(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}
