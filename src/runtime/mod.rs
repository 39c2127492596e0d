//! Runtime adapters: native background threads and async admission.

#[cfg(feature = "tokio-runtime")]
pub mod async_gate;
pub mod threads;

#[cfg(feature = "tokio-runtime")]
pub use async_gate::enter_async;
pub use threads::BackgroundThreads;
