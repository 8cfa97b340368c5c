//! HTTPS OTA firmware update: backed by the `esp-ota` crate.
//!
//! Flow: GET image → begin (inactive partition) → N × sequential chunk →
//! finalize (image verified) → set boot partition.  The new image takes
//! effect on the next boot; the duty cycle goes to sleep as usual.
//!
//! The `esp-ota` crate provides a safe Rust wrapper around the ESP-IDF OTA
//! partition API, and `esp-idf-svc`'s HTTP client does the fetch with the
//! built-in certificate bundle.  The simulation backend streams an in-memory
//! image through the same session state machine.

use core::fmt;
use log::{info, warn};

use crate::app::ports::UpdatePort;

const MAX_FIRMWARE_SIZE: u32 = 4 * 1024 * 1024; // 4 MB

/// Bytes moved per read/write.
const CHUNK_SIZE: usize = 4096;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    AlreadyInProgress,
    InvalidSize,
    FetchFailed,
    HttpStatus(u16),
    BeginFailed,
    WriteFailed,
    VerifyFailed,
    BootSetFailed,
    IncompleteTransfer,
    NotReceiving,
    Overflow,
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInProgress => write!(f, "OTA session already in progress"),
            Self::InvalidSize => write!(f, "firmware size missing or out of range (max 4 MB)"),
            Self::FetchFailed => write!(f, "image download failed"),
            Self::HttpStatus(code) => write!(f, "image server answered HTTP {code}"),
            Self::BeginFailed => write!(f, "OTA begin failed"),
            Self::WriteFailed => write!(f, "OTA write failed"),
            Self::VerifyFailed => write!(f, "OTA verification failed"),
            Self::BootSetFailed => write!(f, "set boot partition failed"),
            Self::IncompleteTransfer => write!(f, "finalize called before all bytes written"),
            Self::NotReceiving => write!(f, "operation requires active Receiving state"),
            Self::Overflow => write!(f, "chunk would exceed declared firmware size"),
        }
    }
}

impl core::error::Error for OtaError {}

// ── Session state machine ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaState {
    Idle,
    Receiving { expected_size: u32, bytes_written: u32 },
    Verifying,
    ReadyToReboot,
    Failed,
}

/// One image write into the inactive partition.
pub struct OtaSession {
    state: OtaState,
    #[cfg(target_os = "espidf")]
    update: Option<esp_ota::OtaUpdate>,
}

impl OtaSession {
    pub fn new() -> Self {
        Self {
            state: OtaState::Idle,
            #[cfg(target_os = "espidf")]
            update: None,
        }
    }

    pub fn state(&self) -> OtaState {
        self.state
    }

    /// Validate the declared size and open the inactive partition.
    pub fn begin(&mut self, firmware_size: u32) -> Result<(), OtaError> {
        if self.state != OtaState::Idle {
            return Err(OtaError::AlreadyInProgress);
        }
        if firmware_size == 0 || firmware_size > MAX_FIRMWARE_SIZE {
            return Err(OtaError::InvalidSize);
        }

        #[cfg(target_os = "espidf")]
        {
            let update = esp_ota::OtaUpdate::begin().map_err(|e| {
                warn!("esp-ota begin failed: {:?}", e);
                OtaError::BeginFailed
            })?;
            self.update = Some(update);
        }

        self.state = OtaState::Receiving {
            expected_size: firmware_size,
            bytes_written: 0,
        };
        info!("OTA: begin ({} bytes)", firmware_size);
        Ok(())
    }

    /// Append the next chunk.  Returns total bytes written.
    pub fn write(&mut self, data: &[u8]) -> Result<u32, OtaError> {
        let OtaState::Receiving {
            expected_size,
            bytes_written,
        } = self.state
        else {
            return Err(OtaError::NotReceiving);
        };

        let new_written = u32::try_from(data.len())
            .ok()
            .and_then(|len| bytes_written.checked_add(len))
            .filter(|&n| n <= expected_size)
            .ok_or(OtaError::Overflow)?;

        #[cfg(target_os = "espidf")]
        {
            let Some(update) = self.update.as_mut() else {
                return Err(OtaError::NotReceiving);
            };
            if let Err(e) = update.write(data) {
                warn!("esp-ota write failed: {:?}", e);
                self.abort();
                return Err(OtaError::WriteFailed);
            }
        }

        self.state = OtaState::Receiving {
            expected_size,
            bytes_written: new_written,
        };
        Ok(new_written)
    }

    /// Verify the image and mark its partition bootable.
    pub fn finalize(&mut self) -> Result<(), OtaError> {
        match self.state {
            OtaState::Receiving {
                expected_size,
                bytes_written,
            } if bytes_written == expected_size => {}
            OtaState::Receiving { .. } => return Err(OtaError::IncompleteTransfer),
            _ => return Err(OtaError::NotReceiving),
        }

        self.state = OtaState::Verifying;

        #[cfg(target_os = "espidf")]
        {
            let Some(update) = self.update.take() else {
                self.state = OtaState::Failed;
                return Err(OtaError::NotReceiving);
            };
            let mut completed = update.finalize().map_err(|e| {
                warn!("esp-ota finalize failed: {:?}", e);
                self.state = OtaState::Failed;
                OtaError::VerifyFailed
            })?;
            completed.set_as_boot_partition().map_err(|e| {
                warn!("esp-ota set_as_boot_partition failed: {:?}", e);
                self.state = OtaState::Failed;
                OtaError::BootSetFailed
            })?;
        }

        self.state = OtaState::ReadyToReboot;
        info!("OTA: finalized, new image boots next wake");
        Ok(())
    }

    /// Abort the current session; resets to Idle.
    pub fn abort(&mut self) {
        #[cfg(target_os = "espidf")]
        {
            // esp-ota aborts automatically when OtaUpdate is dropped
            self.update.take();
        }
        self.state = OtaState::Idle;
        warn!("OTA: aborted");
    }
}

impl Default for OtaSession {
    fn default() -> Self {
        Self::new()
    }
}

// ── Adapter ───────────────────────────────────────────────────

/// [`UpdatePort`] over HTTPS (device) or an in-memory image (simulation).
pub struct OtaAdapter {
    #[cfg(not(target_os = "espidf"))]
    image: Option<Vec<u8>>,
    #[cfg(not(target_os = "espidf"))]
    fetched: Vec<String>,
}

impl OtaAdapter {
    #[cfg(target_os = "espidf")]
    pub fn new() -> Self {
        Self {}
    }

    /// Simulation: `image` is served for every source; `None` makes every
    /// fetch fail.
    #[cfg(not(target_os = "espidf"))]
    pub fn simulated(image: Option<Vec<u8>>) -> Self {
        Self {
            image,
            fetched: Vec::new(),
        }
    }

    /// Simulation: sources requested so far.
    #[cfg(not(target_os = "espidf"))]
    pub fn fetched(&self) -> &[String] {
        &self.fetched
    }

    #[cfg(target_os = "espidf")]
    fn fetch_and_apply(&mut self, source: &str) -> Result<u32, OtaError> {
        use esp_idf_svc::http::Method;
        use esp_idf_svc::http::client::{Configuration, EspHttpConnection};

        let mut conn = EspHttpConnection::new(&Configuration {
            buffer_size: Some(CHUNK_SIZE),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        })
        .map_err(|e| {
            warn!("OTA: http client init failed: {}", e);
            OtaError::FetchFailed
        })?;

        conn.initiate_request(Method::Get, source, &[])
            .and_then(|()| conn.initiate_response())
            .map_err(|e| {
                warn!("OTA: request failed: {}", e);
                OtaError::FetchFailed
            })?;

        let status = conn.status();
        if status != 200 {
            return Err(OtaError::HttpStatus(status));
        }
        let size = conn
            .header("Content-Length")
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or(OtaError::InvalidSize)?;

        let mut session = OtaSession::new();
        session.begin(size)?;
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let n = match conn.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!("OTA: read failed: {}", e);
                    session.abort();
                    return Err(OtaError::FetchFailed);
                }
            };
            session.write(&buf[..n])?;
        }
        session.finalize()?;
        Ok(size)
    }

    #[cfg(not(target_os = "espidf"))]
    fn fetch_and_apply(&mut self, source: &str) -> Result<u32, OtaError> {
        self.fetched.push(source.to_owned());
        let image = self.image.as_deref().ok_or(OtaError::FetchFailed)?;
        let size = u32::try_from(image.len()).map_err(|_| OtaError::InvalidSize)?;

        let mut session = OtaSession::new();
        session.begin(size)?;
        for chunk in image.chunks(CHUNK_SIZE) {
            session.write(chunk)?;
        }
        session.finalize()?;
        Ok(size)
    }
}

#[cfg(target_os = "espidf")]
impl Default for OtaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdatePort for OtaAdapter {
    fn apply_update(&mut self, source: &str) -> bool {
        match self.fetch_and_apply(source) {
            Ok(size) => {
                info!("OTA: applied {} bytes from {}", size, source);
                true
            }
            Err(e) => {
                warn!("OTA: {}", e);
                false
            }
        }
    }
}

// ── Boot validation ───────────────────────────────────────────

/// Check OTA image state on startup and mark this firmware as valid.
///
/// Without this, the rollback watchdog reverts to the previous firmware
/// after three consecutive failed boots.
#[cfg(target_os = "espidf")]
pub fn check_rollback() {
    match esp_ota::mark_app_valid() {
        Ok(()) => info!("OTA: firmware marked valid (rollback cancelled)"),
        Err(e) => warn!("OTA: mark_app_valid failed: {:?}", e),
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn check_rollback() {
    log::info!("OTA rollback check (simulation): skipped");
}

// ── Tests ─────────────────────────────────────────────────────
