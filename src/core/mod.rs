//! Scheduling core: thread table, admission gate, meters, master and monitors.

pub mod arena;
pub mod client_wait;
pub mod error;
pub mod gate;
pub mod kernel;
pub mod master;
pub mod meter;
pub mod monitor;
pub mod services;
pub mod thread_table;

pub use arena::SlotHandle;
pub use client_wait::{
    ClientWait, ClientWaitInfo, ClientWaitTable, LockWaitRequest, ScanOutcome, WaitOutcome,
};
pub use error::{abort_on_fatal, AppResult, KernelError};
pub use gate::{Admission, ConcurrencyGate, EnterOutcome, GateStats};
pub use kernel::{KernelState, RowCounts, SchedulingContext};
pub use master::{MasterScheduler, MasterState, MasterStats};
pub use meter::{max_allowed, UtilityMeters};
pub use monitor::{
    CategoryCount, ErrorMonitor, LockWaitMonitor, MonitorReport, MonitorState, ReportSection,
    RowRates,
};
pub use services::{
    DiagnosticSection, EngineServices, FlushStrategy, FlushWait, IoStats, Lsn, ShutdownState,
};
pub use thread_table::{SlotInfo, ThreadCategory, ThreadIdentity, ThreadSlotTable};
