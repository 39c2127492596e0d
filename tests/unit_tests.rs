//! Entry point for the unit-style tests under `tests/unit/`.

mod unit;
