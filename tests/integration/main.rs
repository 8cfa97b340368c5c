//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against mock adapters or the simulation backends.  All tests run on the
//! host (x86_64) with no real hardware required.

mod duty_cycle_tests;
mod epoch_tests;
mod mock_ports;
