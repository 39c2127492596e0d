//! Tests for utility functions and the wait event

use engine_kernel::util::{now_ms, Clock, ManualClock, SystemClock};
use engine_kernel::Event;
use std::time::Duration;

#[test]
fn test_now_ms_tracks_system_clock() {
    let a = now_ms();
    let b = SystemClock.now_ms();
    assert!(b >= a);
}

#[test]
fn test_manual_clock_can_roll_back() {
    let clock = ManualClock::new(10_000);
    clock.advance(-5_000);
    assert_eq!(clock.now_ms(), 5_000);
    clock.set(42);
    assert_eq!(clock.now_ms(), 42);
}

#[test]
fn test_event_stays_set_until_reset() {
    let event = Event::new();
    event.set();
    assert!(event.wait_timeout(Duration::ZERO));
    assert!(event.wait_timeout(Duration::ZERO));
    event.reset();
    assert!(!event.wait_timeout(Duration::from_millis(1)));
}
