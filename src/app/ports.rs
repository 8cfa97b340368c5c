//! Port traits: the hexagonal boundary between the duty cycle and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ DutyCycle (domain)
//! ```
//!
//! Driven adapters (bus, broker, storage, radio, OTA, power, event sinks)
//! implement these traits.  The [`DutyCycle`](super::service::DutyCycle)
//! consumes them via generics, so the cycle core never touches hardware
//! directly.
//!
//! ## Contract notes
//!
//! - **StoragePort** writes are not durable until [`StoragePort::commit`]
//!   returns `Ok`.  Callers that gate irreversible actions on a stored value
//!   MUST commit first.
//! - **ConfigPort** implementations MUST validate before persisting.
//! - None of these ports retry.  The next wake cycle is the retry.

use core::time::Duration;

use crate::config::NodeConfig;
use crate::cycle::phase::PhaseWriter;
use crate::error::{BusError, PowerError, PublishError, StorageError};

// ───────────────────────────────────────────────────────────────
// Bus port (driven adapter: field device → domain)
// ───────────────────────────────────────────────────────────────

/// Register transport to the field device.
pub trait BusPort {
    /// Read `out.len()` consecutive input registers starting at `address`
    /// from `slave_id`.  Returns how many words were written to `out`; a
    /// short count is not an error at this layer.
    fn read(&mut self, slave_id: u8, address: u16, out: &mut [u16]) -> Result<usize, BusError>;
}

// ───────────────────────────────────────────────────────────────
// Publish port (driven adapter: domain → broker)
// ───────────────────────────────────────────────────────────────

/// Delivery intent for a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Publish/subscribe client.  Topics are relative to the device base topic.
pub trait PublishPort {
    /// Open the broker session.
    fn connect(&mut self) -> Result<(), PublishError>;

    fn publish(&mut self, topic: &str, qos: QoS, retain: bool, payload: &str) -> Result<(), PublishError>;

    /// Close the session.  Safe to call when not connected.
    fn disconnect(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS)
// ───────────────────────────────────────────────────────────────

/// Persistent integer storage in the application namespace.
pub trait StoragePort {
    /// Read a committed value.  [`StorageError::NotFound`] if never written.
    fn get_i32(&self, key: &str) -> Result<i32, StorageError>;

    /// Stage a value.  Not durable until [`commit`](Self::commit).
    fn set_i32(&mut self, key: &str, value: i32) -> Result<(), StorageError>;

    /// Make every staged write durable.
    fn commit(&mut self) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Network port (driven adapter: radio bring-up)
// ───────────────────────────────────────────────────────────────

/// Network association.  The adapter owns the `NetworkReady` writer for the
/// cycle and signals it once the link has an address; the core only waits.
pub trait NetworkPort {
    /// Begin bring-up.  Returns once association has been *started*; readiness
    /// is reported through `ready`.  An error means readiness will never come.
    fn start(&mut self, ready: PhaseWriter) -> Result<(), ConnectivityError>;

    /// Tear the link down before sleeping.
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityError {
    NoCredentials,
    InvalidSsid,
    InvalidPassword,
    StartFailed,
}

impl core::fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no WiFi credentials configured"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => {
                write!(f, "password invalid (must be 8-64 bytes for WPA2, or empty for open)")
            }
            Self::StartFailed => write!(f, "WiFi start failed"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Update port (driven adapter: OTA)
// ───────────────────────────────────────────────────────────────

/// Firmware fetch-and-apply.  Success means the new image is written and
/// marked bootable; it takes effect on the next boot.
pub trait UpdatePort {
    fn apply_update(&mut self, source: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Power port (driven adapter: low-power suspend)
// ───────────────────────────────────────────────────────────────

pub trait PowerPort {
    /// Enter deep sleep for `duration`.  Only returns if the request failed.
    fn deep_sleep(&mut self, duration: Duration) -> PowerError;

    /// Blocking delay.
    fn delay(&mut self, duration: Duration);

    /// Full chip restart.  Returns only on targets that cannot restart.
    fn restart(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`CycleEvent`](super::events::CycleEvent)s
/// through this port.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::CycleEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists node configuration.
///
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`], not
/// silently clamped.
pub trait ConfigPort {
    /// Returns [`NodeConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<NodeConfig, ConfigError>;

    fn save(&self, config: &NodeConfig) -> Result<(), ConfigError>;
}

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::error::Error for ConfigError {}
impl core::error::Error for ConnectivityError {}
