//! SolarNode firmware library.
//!
//! Exposes the duty-cycle core and its adapters for integration testing.
//! All ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module; host builds get simulation backends.

#![deny(unused_must_use)]

pub mod app;
pub mod catalog;
pub mod config;
pub mod cycle;
pub mod error;
pub mod homie;
pub mod pins;
pub mod power;
pub mod time;

pub mod adapters;
pub mod drivers;

mod esp_link_shims;
