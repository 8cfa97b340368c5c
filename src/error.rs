//! Error types for the SolarNode firmware.
//!
//! Ports return their own small error enums.  Everything that can stop the
//! boot sequence (epoch counter, catalog validation, transport setup)
//! returns the unified [`Error`], which `main` wraps with context.  All
//! variants are `Copy`.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Failures that abort startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The publish transport could not be set up.
    Publish(PublishError),
    /// The epoch counter could not be read or persisted.
    Storage(StorageError),
    /// The register catalog violates an invariant.
    Catalog(CatalogError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish(e) => write!(f, "publish: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Catalog(e) => write!(f, "catalog: {e}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Bus errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// No (or an incomplete) response arrived before the transport timeout.
    Timeout,
    /// Response CRC did not match its payload.
    Crc,
    /// Response came from a different slave address.
    WrongSlave,
    /// The slave answered with a Modbus exception code.
    Exception(u8),
    /// Response length or byte count did not match the request.
    Malformed,
    /// UART write/read failed.
    Io,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "response timed out"),
            Self::Crc => write!(f, "CRC mismatch"),
            Self::WrongSlave => write!(f, "wrong slave address"),
            Self::Exception(code) => write!(f, "slave exception 0x{code:02X}"),
            Self::Malformed => write!(f, "malformed response"),
            Self::Io => write!(f, "UART I/O error"),
        }
    }
}

impl core::error::Error for BusError {}

// ---------------------------------------------------------------------------
// Publish errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishError {
    /// Broker connection could not be established.
    ConnectFailed,
    /// Not connected to the broker.
    NotConnected,
    /// The client refused to enqueue the message.
    Rejected,
    /// Topic or payload does not fit its fixed-capacity buffer.
    Overflow,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed => write!(f, "broker connect failed"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Rejected => write!(f, "publish rejected"),
            Self::Overflow => write!(f, "topic or payload too long"),
        }
    }
}

impl core::error::Error for PublishError {}

impl From<PublishError> for Error {
    fn from(e: PublishError) -> Self {
        Self::Publish(e)
    }
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::error::Error for StorageError {}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Power errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerError {
    /// The sleep request was rejected (e.g. invalid wake source config).
    SleepRejected(i32),
    /// No low-power mode on this target.
    Unsupported,
}

impl fmt::Display for PowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SleepRejected(code) => write!(f, "deep sleep rejected (err {code})"),
            Self::Unsupported => write!(f, "low-power mode unsupported"),
        }
    }
}

impl core::error::Error for PowerError {}

// ---------------------------------------------------------------------------
// Catalog errors
// ---------------------------------------------------------------------------

/// Register catalog invariant violations, detected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogError {
    /// The catalog has no nodes.
    Empty,
    /// A node or property id is not a valid Homie id.
    InvalidId(&'static str),
    /// Two nodes share an id.
    DuplicateNode,
    /// Two properties of one node share an id.
    DuplicateProperty,
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "catalog is empty"),
            Self::InvalidId(which) => write!(f, "invalid {which} id"),
            Self::DuplicateNode => write!(f, "duplicate node id"),
            Self::DuplicateProperty => write!(f, "duplicate property id within node"),
        }
    }
}

impl core::error::Error for CatalogError {}

impl From<CatalogError> for Error {
    fn from(e: CatalogError) -> Self {
        Self::Catalog(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
