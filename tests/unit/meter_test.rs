//! Tests for the utility meter policy

use engine_kernel::config::MeterConfig;
use engine_kernel::core::max_allowed;

#[test]
fn test_default_marks() {
    let meter = MeterConfig::default().with_workers(8);
    assert_eq!(meter.low_water, 50);
    assert_eq!(meter.foreground, 250);
    assert_eq!(max_allowed(30, &meter, false), 0);
    assert_eq!(max_allowed(100, &meter, false), 4);
}

#[test]
fn test_foreground_scaling() {
    let meter = MeterConfig::default().with_workers(8);
    // 1 + 8 * 375 / 750 = 5
    assert_eq!(max_allowed(625, &meter, true), 5);
    assert_eq!(max_allowed(1000, &meter, true), 8);
    assert_eq!(max_allowed(5000, &meter, true), 8);
}

#[test]
fn test_raising_level_never_lowers_allowance() {
    let meter = MeterConfig::default().with_workers(3);
    for foreground in [false, true] {
        let mut previous = 0;
        for level in (0..=1000).step_by(5) {
            let allowed = max_allowed(level, &meter, foreground);
            assert!(allowed >= previous);
            assert!(allowed <= 3);
            previous = allowed;
        }
    }
}
