//! Tests for error types

use engine_kernel::core::{KernelError, ThreadCategory};

#[test]
fn test_slot_table_exhausted_error() {
    let err = KernelError::SlotTableExhausted { capacity: 1000 };
    assert_eq!(format!("{}", err), "thread slot table exhausted (capacity 1000)");
    assert!(err.is_fatal());
}

#[test]
fn test_wait_table_exhausted_error() {
    let err = KernelError::WaitTableExhausted { capacity: 8 };
    assert_eq!(format!("{}", err), "client wait table exhausted (capacity 8)");
}

#[test]
fn test_underflow_error() {
    let err = KernelError::ActiveCountUnderflow(ThreadCategory::Communication);
    assert_eq!(
        format!("{}", err),
        "active thread count for `communication` would drop below zero"
    );
}

#[test]
fn test_config_error_is_not_fatal() {
    let err = KernelError::InvalidConfig("max_threads must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: max_threads must be greater than 0"
    );
    assert!(!err.is_fatal());
}
