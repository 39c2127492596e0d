//! Configuration models for the admission gate, meters, master loop and monitors.

pub mod server;

pub use server::{
    MasterTiming, MeterConfig, MonitorFlags, MonitorTiming, ServerConfig,
    GATE_DISABLED_THRESHOLD, LOCK_WAIT_TIMEOUT_INFINITE, METER_MAX,
};
