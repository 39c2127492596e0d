//! Utility meters and the priority policy built on them.
//!
//! A meter is a per-category load level on a nominal 0..=1000 scale. The
//! higher the level, the more background threads of the category may run.
//! While foreground work is active the category competes against it and is
//! held back until its level passes the `foreground` mark.

use super::ThreadCategory;
use crate::config::{MeterConfig, METER_MAX};

/// How many threads of a category may run at `level`.
///
/// With no foreground activity an idle server runs half of the workers once
/// the level passes `low_water`. With foreground activity nothing runs below
/// the `foreground` mark; from there the allowance grows linearly from one
/// thread up to every worker.
#[must_use]
pub fn max_allowed(level: u32, meter: &MeterConfig, foreground_active: bool) -> u32 {
    if !foreground_active {
        return if level > meter.low_water {
            meter.workers / 2
        } else {
            0
        };
    }

    if level < meter.foreground {
        return 0;
    }
    let span = u64::from(METER_MAX.saturating_sub(meter.foreground).max(1));
    let above = u64::from(level - meter.foreground);
    let scaled = 1 + u64::from(meter.workers) * above / span;
    u32::try_from(scaled.min(u64::from(meter.workers))).unwrap_or(meter.workers)
}

/// Meter levels for every category. Lives under the kernel lock.
#[derive(Debug, Clone)]
pub struct UtilityMeters {
    levels: [u32; ThreadCategory::COUNT],
}

impl UtilityMeters {
    /// Every meter starts at `initial_level`.
    #[must_use]
    pub const fn new(initial_level: u32) -> Self {
        Self {
            levels: [initial_level; ThreadCategory::COUNT],
        }
    }

    /// Current level of `category`.
    #[must_use]
    pub const fn level(&self, category: ThreadCategory) -> u32 {
        self.levels[category.index()]
    }

    /// Raise the level, saturating. Returns the new level.
    pub fn add(&mut self, category: ThreadCategory, delta: u32) -> u32 {
        let level = &mut self.levels[category.index()];
        *level = level.saturating_add(delta);
        *level
    }

    /// Lower the level, stopping at zero. Returns the new level.
    pub fn sub(&mut self, category: ThreadCategory, delta: u32) -> u32 {
        let level = &mut self.levels[category.index()];
        *level = level.saturating_sub(delta);
        *level
    }

    /// Overwrite the level.
    pub fn set(&mut self, category: ThreadCategory, level: u32) {
        self.levels[category.index()] = level;
    }
}
