//! Application core: the duty-cycle orchestration, zero direct I/O.
//!
//! All interaction with the bus, broker, radio, storage and power
//! hardware happens through **port traits** defined in [`ports`], keeping
//! this layer testable without real peripherals.

pub mod events;
pub mod ports;
pub mod service;
