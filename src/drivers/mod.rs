//! Peripheral helpers.

pub mod task_pin;
