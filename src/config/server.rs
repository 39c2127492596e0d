//! Server configuration structures.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{AppResult, ThreadCategory};

/// A concurrency limit at or above this value disables the admission gate.
pub const GATE_DISABLED_THRESHOLD: usize = 500;

/// A lock wait timeout at or above this many seconds never fires.
pub const LOCK_WAIT_TIMEOUT_INFINITE: u64 = 100_000_000;

/// Upper end of the nominal utility meter scale.
pub const METER_MAX: u32 = 1000;

/// Water marks and worker count for one thread category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Configured number of threads of this category.
    pub workers: u32,
    /// Below this level an idle server lets the category rest.
    pub low_water: u32,
    /// Level above which an idle server runs half the workers at once.
    pub high_water: u32,
    /// Level above which an idle server wakes a single worker.
    pub high_water2: u32,
    /// Level from which the category competes with foreground work.
    pub foreground: u32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            low_water: 50,
            high_water: 100,
            high_water2: 200,
            foreground: 250,
        }
    }
}

impl MeterConfig {
    /// Same thresholds with a different worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: u32) -> Self {
        self.workers = workers;
        self
    }

    /// Validate thresholds against the meter scale.
    pub fn validate(&self) -> Result<(), String> {
        if self.foreground >= METER_MAX {
            return Err(format!("foreground must be below {METER_MAX}"));
        }
        for (name, value) in [
            ("low_water", self.low_water),
            ("high_water", self.high_water),
            ("high_water2", self.high_water2),
        ] {
            if value > METER_MAX {
                return Err(format!("{name} must not exceed {METER_MAX}"));
            }
        }
        Ok(())
    }
}

/// Diagnostic output toggles. All of them can be flipped at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorFlags {
    /// Periodic full status report.
    pub standard: bool,
    /// Include lock details; keeps the lock-wait monitor awake.
    pub locks: bool,
    /// Periodic tablespace report.
    pub tablespace: bool,
    /// Periodic table dictionary report.
    pub table: bool,
}

impl MonitorFlags {
    /// True if any diagnostic output is enabled.
    #[must_use]
    pub const fn any_enabled(&self) -> bool {
        self.standard || self.locks || self.tablespace || self.table
    }
}

/// Timing and batch sizes for the master scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterTiming {
    /// Length of one sub-tick sleep.
    pub tick_ms: u64,
    /// Sub-ticks in one full round.
    pub ticks_per_round: u32,
    /// Pending I/O count under which the disk counts as idle.
    pub max_pending_ios: u64,
    /// I/Os per sub-tick under which a merge pass is allowed.
    pub idle_ios_per_tick: u64,
    /// I/Os per round under which a page flush is allowed.
    pub idle_ios_per_round: u64,
    /// Change-buffer pages merged on a sub-tick or round.
    pub merge_pages_small: usize,
    /// Change-buffer pages merged on a background pass.
    pub merge_pages_large: usize,
    /// Pages flushed at the start of a background pass.
    pub flush_batch_small: usize,
    /// Pages flushed at the end of an idle round.
    pub flush_batch_medium: usize,
    /// Pages flushed deep in a background pass.
    pub flush_batch_large: usize,
    /// Minimum spacing of log flushes inside the purge loop.
    pub purge_log_flush_interval_ms: u64,
}

impl Default for MasterTiming {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            ticks_per_round: 10,
            max_pending_ios: 3,
            idle_ios_per_tick: 10,
            idle_ios_per_round: 200,
            merge_pages_small: 5,
            merge_pages_large: 20,
            flush_batch_small: 10,
            flush_batch_medium: 50,
            flush_batch_large: 100,
            purge_log_flush_interval_ms: 1000,
        }
    }
}

impl MasterTiming {
    /// Sub-tick sleep as a duration.
    #[must_use]
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Timing for the lock-wait monitor and the error monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorTiming {
    /// Sleep between lock-wait scans.
    pub check_interval_ms: u64,
    /// Minimum spacing of the standard diagnostic report.
    pub diagnostics_interval_ms: u64,
    /// Minimum spacing of tablespace and table reports.
    pub tablespace_interval_ms: u64,
    /// Sleep between long-semaphore-wait reports.
    pub error_monitor_interval_ms: u64,
}

impl Default for MonitorTiming {
    fn default() -> Self {
        Self {
            check_interval_ms: 1000,
            diagnostics_interval_ms: 15_000,
            tablespace_interval_ms: 60_000,
            error_monitor_interval_ms: 10_000,
        }
    }
}

/// Root server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Threads allowed inside the engine at once.
    pub thread_concurrency: usize,
    /// Re-entries granted by one admission.
    pub free_tickets_to_enter: u32,
    /// Capacity of every slot table and of the gate queue.
    pub max_threads: usize,
    /// Row lock wait timeout in seconds.
    pub lock_wait_timeout_secs: u64,
    /// Skip purge and change-buffer merge when shutting down.
    pub fast_shutdown: bool,
    /// Archive the log from the background pass.
    pub log_archive_on: bool,
    /// Never run background maintenance.
    pub force_recovery_no_background: bool,
    /// Log every suspend and release at info level.
    pub print_thread_releases: bool,
    /// Diagnostic output toggles.
    pub monitor: MonitorFlags,
    /// Starting level of every meter.
    pub initial_meter_level: u32,
    /// Per-category meter settings; absent categories use the defaults.
    pub meters: BTreeMap<ThreadCategory, MeterConfig>,
    /// Master scheduler timing.
    pub master: MasterTiming,
    /// Monitor timing.
    pub monitor_timing: MonitorTiming,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut meters = BTreeMap::new();
        meters.insert(ThreadCategory::Utility, MeterConfig::default().with_workers(1));
        Self {
            thread_concurrency: 8,
            free_tickets_to_enter: 500,
            max_threads: 1000,
            lock_wait_timeout_secs: 50,
            fast_shutdown: false,
            log_archive_on: true,
            force_recovery_no_background: false,
            print_thread_releases: false,
            monitor: MonitorFlags::default(),
            initial_meter_level: 30,
            meters,
            master: MasterTiming::default(),
            monitor_timing: MonitorTiming::default(),
        }
    }
}

impl ServerConfig {
    /// Default configuration with the concurrency limit sized to the host.
    #[must_use]
    pub fn auto_tuned() -> Self {
        let cpus = num_cpus::get();
        Self {
            thread_concurrency: (cpus * 2).clamp(8, GATE_DISABLED_THRESHOLD - 1),
            ..Self::default()
        }
    }

    /// Meter settings for `category`.
    #[must_use]
    pub fn meter(&self, category: ThreadCategory) -> MeterConfig {
        self.meters.get(&category).copied().unwrap_or_default()
    }

    /// True if the admission gate is switched off.
    #[must_use]
    pub const fn gate_disabled(&self) -> bool {
        self.thread_concurrency >= GATE_DISABLED_THRESHOLD
    }

    /// Lock wait timeout, or `None` when waits never time out.
    #[must_use]
    pub const fn lock_wait_timeout(&self) -> Option<Duration> {
        if self.lock_wait_timeout_secs >= LOCK_WAIT_TIMEOUT_INFINITE {
            None
        } else {
            Some(Duration::from_secs(self.lock_wait_timeout_secs))
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.thread_concurrency == 0 {
            return Err("thread_concurrency must be greater than 0".into());
        }
        if self.max_threads == 0 {
            return Err("max_threads must be greater than 0".into());
        }
        if self.master.ticks_per_round == 0 {
            return Err("master.ticks_per_round must be greater than 0".into());
        }
        if self.monitor_timing.check_interval_ms == 0 {
            return Err("monitor_timing.check_interval_ms must be greater than 0".into());
        }
        if self.initial_meter_level > METER_MAX {
            return Err(format!("initial_meter_level must not exceed {METER_MAX}"));
        }
        for (category, meter) in &self.meters {
            meter
                .validate()
                .map_err(|e| format!("meter `{category}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the process environment.
    ///
    /// A `.env` file is honoured if present. `KERNEL_CONFIG` names an optional
    /// JSON file; the `KERNEL_*` variables below override individual values.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();

        let mut cfg = match std::env::var("KERNEL_CONFIG") {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading kernel config `{path}`"))?;
                Self::from_json_str(&text).map_err(anyhow::Error::msg)?
            }
            Err(_) => Self::default(),
        };

        if let Some(v) = env_value("KERNEL_THREAD_CONCURRENCY")? {
            cfg.thread_concurrency = v;
        }
        if let Some(v) = env_value("KERNEL_MAX_THREADS")? {
            cfg.max_threads = v;
        }
        if let Some(v) = env_value("KERNEL_LOCK_WAIT_TIMEOUT")? {
            cfg.lock_wait_timeout_secs = v;
        }
        if let Some(v) = env_value("KERNEL_FAST_SHUTDOWN")? {
            cfg.fast_shutdown = v;
        }
        if let Some(v) = env_value("KERNEL_LOG_ARCHIVE")? {
            cfg.log_archive_on = v;
        }
        if let Some(v) = env_value("KERNEL_PRINT_MONITOR")? {
            cfg.monitor.standard = v;
        }

        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}

fn env_value<T>(key: &str) -> AppResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{key}={raw}: {e}")),
        Err(_) => Ok(None),
    }
}
