//! Backends for the engine services.

pub mod memory;

pub use memory::{InMemoryEngine, InMemoryLockRequest, ServiceCall};
