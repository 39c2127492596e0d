//! # Engine Kernel
//!
//! Concurrency admission and background-work scheduling for an embedded
//! transactional storage engine.
//!
//! Client work arrives as many independent query threads. The kernel bounds
//! how many of them run inside the engine at once, runs a small set of
//! privileged background threads for checkpointing, flushing, archiving and
//! purge, and lets any of these threads suspend itself and be resumed later
//! without deadlocking the admission gate.
//!
//! ## Components
//!
//! - **Thread slot table** ([`core::ThreadSlotTable`]): fixed-capacity registry
//!   of engine threads with generation-checked handles.
//! - **Concurrency gate** ([`core::ConcurrencyGate`]): counting admission with a
//!   FIFO of waiters and free re-entry tickets.
//! - **Suspend/resume**: a thread marks itself suspended under the kernel lock,
//!   drops the lock and waits on its [`Event`]; a releaser flips the flag under
//!   the same lock and sets the event.
//! - **Utility meters** ([`core::max_allowed`]): per-category load levels that
//!   decide how many background workers may run.
//! - **Master scheduler** ([`core::MasterScheduler`]): the background
//!   orchestrator, an explicit `Ticking` / `BackgroundPass` / `Suspended` state
//!   machine.
//! - **Lock-wait monitor** ([`core::LockWaitMonitor`]): cancels row-lock waits
//!   that run past the timeout and logs periodic diagnostics.
//!
//! The storage engine proper is reached only through [`core::EngineServices`].
//! [`infra::InMemoryEngine`] simulates it for development and tests.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use engine_kernel::config::ServerConfig;
//! use engine_kernel::core::{Admission, SchedulingContext};
//! use engine_kernel::infra::InMemoryEngine;
//! use engine_kernel::runtime::BackgroundThreads;
//!
//! engine_kernel::util::init_tracing();
//! let ctx = Arc::new(SchedulingContext::new(ServerConfig::auto_tuned())?);
//! let threads = BackgroundThreads::start(Arc::clone(&ctx), Arc::new(InMemoryEngine::new()))?;
//!
//! let mut admission = Admission::new();
//! ctx.gate().enter(&mut admission);
//! ctx.note_client_activity();
//! ctx.gate().exit(&mut admission);
//!
//! threads.shutdown(Duration::from_secs(2));
//! # Ok::<(), engine_kernel::core::KernelError>(())
//! ```

/// Scheduling core: thread table, gate, meters, master and monitors.
pub mod core;
/// Server configuration.
pub mod config;
/// The binary wait event.
pub mod event;
/// Engine service backends.
pub mod infra;
/// Native threads and async adapters.
pub mod runtime;
/// Shared utilities.
pub mod util;

pub use event::Event;
