//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`] for the SolarNode.
//!
//! # Layout
//!
//! | Namespace | Key               | Type | Contents                         |
//! |-----------|-------------------|------|----------------------------------|
//! | `app`     | `restart_counter` | i32  | epoch counter                    |
//! | `solarcfg`| `nodecfg`         | blob | postcard-encoded [`NodeConfig`]  |
//! | `auth`    | `wifi_ssid`, ...  | blob | credentials                      |
//!
//! # Durability
//!
//! - Integer writes are staged until [`StoragePort::commit`]; the simulation
//!   backend keeps a separate pending map so tests can cut power between
//!   `set_i32` and `commit`.
//! - Blob writes (config, credentials) commit immediately.
//! - Encrypted NVS: on ESP32, the "auth" namespace lives on the encrypted
//!   NVS partition.  The simulation backend uses plaintext (dev/test only).

use crate::app::ports::{ConfigError, ConfigPort, StoragePort};
use crate::config::NodeConfig;
use crate::error::StorageError;
use log::info;

#[cfg(target_os = "espidf")]
use log::warn;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// Application namespace holding the epoch counter.
pub const APP_NAMESPACE: &str = "app";
const CONFIG_NAMESPACE: &str = "solarcfg";
const CONFIG_KEY: &str = "nodecfg";
const CRED_NAMESPACE: &str = "auth";

/// Credential keys in the `auth` namespace.
pub const CRED_WIFI_SSID: &str = "wifi_ssid";
pub const CRED_WIFI_PSK: &str = "wifi_psk";
pub const CRED_BROKER_PASSWORD: &str = "mqtt_pw";

#[cfg(target_os = "espidf")]
const MAX_BLOB_SIZE: usize = 4000;

// Bindgen exposes the ESP-IDF error macros as unsigned constants; compare
// against `esp_err_t` values.
#[cfg(target_os = "espidf")]
mod code {
    use esp_idf_svc::sys::*;

    pub const OK: esp_err_t = ESP_OK as esp_err_t;
    pub const NOT_FOUND: esp_err_t = ESP_ERR_NVS_NOT_FOUND as esp_err_t;
    pub const NO_SPACE: esp_err_t = ESP_ERR_NVS_NOT_ENOUGH_SPACE as esp_err_t;
    pub const NO_FREE_PAGES: esp_err_t = ESP_ERR_NVS_NO_FREE_PAGES as esp_err_t;
    pub const NEW_VERSION: esp_err_t = ESP_ERR_NVS_NEW_VERSION_FOUND as esp_err_t;
}

/// NVS keys and namespaces are at most 15 bytes plus the terminator.
#[cfg(target_os = "espidf")]
fn c_name(name: &str) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let bytes = name.as_bytes();
    let len = bytes.len().min(15);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

pub struct NvsAdapter {
    /// Read-write handle on [`APP_NAMESPACE`], open for the adapter's lifetime
    /// so staged integer writes and their commit share one handle.
    #[cfg(target_os = "espidf")]
    app: nvs_handle_t,

    #[cfg(not(target_os = "espidf"))]
    blobs: std::cell::RefCell<HashMap<String, Vec<u8>>>,
    #[cfg(not(target_os = "espidf"))]
    committed: HashMap<String, i32>,
    #[cfg(not(target_os = "espidf"))]
    pending: HashMap<String, i32>,
    #[cfg(not(target_os = "espidf"))]
    fail_commit: bool,
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// Returns `Err(StorageError::IoError)` if flash initialisation fails
    /// unrecoverably.  On first boot or after a version mismatch the NVS
    /// partition is erased and re-initialised automatically.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: nvs_flash_init / nvs_flash_erase are called from the
            // single main-task context before any concurrent NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == code::NO_FREE_PAGES || ret == code::NEW_VERSION {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != code::OK || unsafe { nvs_flash_init() } != code::OK {
                    return Err(StorageError::IoError);
                }
            } else if ret != code::OK {
                return Err(StorageError::IoError);
            }

            let ns = c_name(APP_NAMESPACE);
            let mut app: nvs_handle_t = 0;
            // SAFETY: `ns` is null-terminated and outlives the call.
            let ret = unsafe { nvs_open(ns.as_ptr() as *const _, nvs_open_mode_t_NVS_READWRITE, &mut app) };
            if ret != code::OK {
                warn!("NVS: open '{}' failed ({})", APP_NAMESPACE, ret);
                return Err(StorageError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
            Ok(Self { app })
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("NvsAdapter: simulation backend");
            Ok(Self {
                blobs: std::cell::RefCell::new(HashMap::new()),
                committed: HashMap::new(),
                pending: HashMap::new(),
                fail_commit: false,
            })
        }
    }

    /// Open an NVS namespace, execute a closure with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns = c_name(namespace);
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns.as_ptr() as *const _, mode, &mut handle) };
        if ret != code::OK {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }

    #[cfg(target_os = "espidf")]
    fn read_blob(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let result = Self::with_nvs_handle(namespace, false, |handle| {
            let key = c_name(key);
            let mut size = buf.len();
            let ret = unsafe {
                nvs_get_blob(handle, key.as_ptr() as *const _, buf.as_mut_ptr() as *mut _, &mut size)
            };
            if ret != code::OK {
                return Err(ret);
            }
            Ok(size)
        });
        match result {
            Ok(size) => Ok(size),
            Err(e) if e == code::NOT_FOUND => Err(StorageError::NotFound),
            Err(_) => Err(StorageError::IoError),
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn read_blob(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self.blobs.borrow().get(&format!("{}::{}", namespace, key)) {
            Some(data) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            None => Err(StorageError::NotFound),
        }
    }

    #[cfg(target_os = "espidf")]
    fn write_blob(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let result = Self::with_nvs_handle(namespace, true, |handle| {
            let key = c_name(key);
            let ret = unsafe {
                nvs_set_blob(handle, key.as_ptr() as *const _, data.as_ptr() as *const _, data.len())
            };
            if ret != code::OK {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != code::OK {
                return Err(ret);
            }
            Ok(())
        });
        result.map_err(|e| {
            warn!("NvsAdapter: blob write {}::{} failed ({})", namespace, key, e);
            if e == code::NO_SPACE {
                StorageError::Full
            } else {
                StorageError::IoError
            }
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn write_blob(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.blobs
            .borrow_mut()
            .insert(format!("{}::{}", namespace, key), data.to_vec());
        Ok(())
    }

    /// Size of a stored blob, `NotFound` if absent.
    #[cfg(target_os = "espidf")]
    fn blob_len(&self, namespace: &str, key: &str) -> Result<usize, StorageError> {
        let result = Self::with_nvs_handle(namespace, false, |handle| {
            let key = c_name(key);
            let mut size: usize = 0;
            let ret = unsafe { nvs_get_blob(handle, key.as_ptr() as *const _, core::ptr::null_mut(), &mut size) };
            if ret != code::OK {
                return Err(ret);
            }
            Ok(size)
        });
        match result {
            Ok(size) => Ok(size),
            Err(e) if e == code::NOT_FOUND => Err(StorageError::NotFound),
            Err(_) => Err(StorageError::IoError),
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn blob_len(&self, namespace: &str, key: &str) -> Result<usize, StorageError> {
        self.blobs
            .borrow()
            .get(&format!("{}::{}", namespace, key))
            .map(Vec::len)
            .ok_or(StorageError::NotFound)
    }
}

// ── Simulation hooks ───────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl NvsAdapter {
    /// Drop every staged, uncommitted integer write, as a power cut would.
    pub fn simulate_power_loss(&mut self) {
        if !self.pending.is_empty() {
            info!("NvsAdapter(sim): power loss, {} staged writes lost", self.pending.len());
        }
        self.pending.clear();
    }

    /// Make subsequent commits fail with `IoError`.
    pub fn set_commit_failure(&mut self, fail: bool) {
        self.fail_commit = fail;
    }
}

#[cfg(target_os = "espidf")]
impl Drop for NvsAdapter {
    fn drop(&mut self) {
        // SAFETY: `app` was opened in `new` and is closed exactly once.
        unsafe { nvs_close(self.app) };
    }
}

// ── Integer storage ────────────────────────────────────────────────

impl StoragePort for NvsAdapter {
    fn get_i32(&self, key: &str) -> Result<i32, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.committed.get(key).copied().ok_or(StorageError::NotFound)
        }

        #[cfg(target_os = "espidf")]
        {
            let key = c_name(key);
            let mut value: i32 = 0;
            let ret = unsafe { nvs_get_i32(self.app, key.as_ptr() as *const _, &mut value) };
            match ret {
                code::OK => Ok(value),
                code::NOT_FOUND => Err(StorageError::NotFound),
                e => {
                    warn!("NvsAdapter: get_i32 failed ({})", e);
                    Err(StorageError::IoError)
                }
            }
        }
    }

    fn set_i32(&mut self, key: &str, value: i32) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.pending.insert(key.to_owned(), value);
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = c_name(key);
            let ret = unsafe { nvs_set_i32(self.app, key.as_ptr() as *const _, value) };
            match ret {
                code::OK => Ok(()),
                code::NO_SPACE => Err(StorageError::Full),
                e => {
                    warn!("NvsAdapter: set_i32 failed ({})", e);
                    Err(StorageError::IoError)
                }
            }
        }
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            if self.fail_commit {
                return Err(StorageError::IoError);
            }
            self.committed.extend(self.pending.drain());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let ret = unsafe { nvs_commit(self.app) };
            if ret != code::OK {
                warn!("NvsAdapter: commit failed ({})", ret);
                return Err(StorageError::IoError);
            }
            Ok(())
        }
    }
}

// ── Configuration ──────────────────────────────────────────────────

/// Range-check every field.  Out-of-range values are rejected, never clamped.
pub fn validate_config(cfg: &NodeConfig) -> Result<(), ConfigError> {
    if !(1..=86_400).contains(&cfg.sleep_duration_secs) {
        return Err(ConfigError::ValidationFailed(
            "sleep_duration_secs must be 1–86400",
        ));
    }
    if !(2..=10_000).contains(&cfg.full_cycle_period) {
        return Err(ConfigError::ValidationFailed(
            "full_cycle_period must be 2–10000",
        ));
    }
    if !(10..=120_000).contains(&cfg.network_timeout_ms) {
        return Err(ConfigError::ValidationFailed(
            "network_timeout_ms must be 10–120000",
        ));
    }
    if !(1..=10_000).contains(&cfg.receive_window_ms) {
        return Err(ConfigError::ValidationFailed(
            "receive_window_ms must be 1–10000",
        ));
    }
    if !(10..=300_000).contains(&cfg.publish_timeout_ms) {
        return Err(ConfigError::ValidationFailed(
            "publish_timeout_ms must be 10–300000",
        ));
    }
    if cfg.receive_window_ms > cfg.publish_timeout_ms {
        return Err(ConfigError::ValidationFailed(
            "receive_window_ms must not exceed publish_timeout_ms",
        ));
    }
    if cfg.restart_delay_ms > 60_000 {
        return Err(ConfigError::ValidationFailed(
            "restart_delay_ms must be 0–60000",
        ));
    }
    if !(1..=247).contains(&cfg.bus_slave_id) {
        return Err(ConfigError::ValidationFailed(
            "bus_slave_id must be 1–247",
        ));
    }
    if !(10..=5_000).contains(&cfg.bus_timeout_ms) {
        return Err(ConfigError::ValidationFailed(
            "bus_timeout_ms must be 10–5000",
        ));
    }
    if cfg.update_enabled && !cfg.update_url.is_empty() && !cfg.update_url.starts_with("http") {
        return Err(ConfigError::ValidationFailed(
            "update_url must be an http(s) URL",
        ));
    }
    if !cfg.broker_uri.starts_with("mqtt://") && !cfg.broker_uri.starts_with("mqtts://") {
        return Err(ConfigError::ValidationFailed(
            "broker_uri must start with mqtt:// or mqtts://",
        ));
    }
    if cfg.client_id.is_empty() {
        return Err(ConfigError::ValidationFailed("client_id must not be empty"));
    }
    if cfg.base_topic.is_empty()
        || cfg.base_topic.starts_with('/')
        || cfg.base_topic.ends_with('/')
        || cfg.base_topic.contains(['#', '+'])
    {
        return Err(ConfigError::ValidationFailed(
            "base_topic must be a non-empty topic without wildcards or edge slashes",
        ));
    }
    if !(5..=3600).contains(&cfg.keepalive_secs) {
        return Err(ConfigError::ValidationFailed(
            "keepalive_secs must be 5–3600",
        ));
    }
    Ok(())
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<NodeConfig, ConfigError> {
        let len = match self.blob_len(CONFIG_NAMESPACE, CONFIG_KEY) {
            Ok(len) => len,
            Err(StorageError::NotFound) => {
                info!("NvsAdapter: no stored config, using defaults");
                return Ok(NodeConfig::default());
            }
            Err(_) => return Err(ConfigError::IoError),
        };
        #[cfg(target_os = "espidf")]
        {
            if len == 0 || len > MAX_BLOB_SIZE {
                return Err(ConfigError::Corrupted);
            }
        }

        let mut buf = vec![0u8; len];
        let n = self
            .read_blob(CONFIG_NAMESPACE, CONFIG_KEY, &mut buf)
            .map_err(|_| ConfigError::IoError)?;
        let cfg: NodeConfig = postcard::from_bytes(&buf[..n]).map_err(|_| ConfigError::Corrupted)?;
        validate_config(&cfg)?;
        info!("NvsAdapter: loaded config ({} bytes)", n);
        Ok(cfg)
    }

    fn save(&self, config: &NodeConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        self.write_blob(CONFIG_NAMESPACE, CONFIG_KEY, &bytes)
            .map_err(|e| match e {
                StorageError::Full => ConfigError::StorageFull,
                _ => ConfigError::IoError,
            })?;
        info!("NvsAdapter: config saved ({} bytes)", bytes.len());
        Ok(())
    }
}

// ── Secure credential storage ──────────────────────────────────────
//
// Credentials (WiFi PSK, broker password) are stored in the "auth" NVS
// namespace.  On ESP32, NVS encryption is enabled partition-wide via
// the nvs_key partition.  When CONFIG_NVS_ENCRYPTION is set, all nvs_open /
// nvs_get / nvs_set calls transparently use AES-XTS encryption.
impl NvsAdapter {
    /// Store a credential blob in the encrypted "auth" namespace.
    pub fn store_credential(&mut self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.write_blob(CRED_NAMESPACE, key, data)
    }

    /// Read a credential blob from the encrypted "auth" namespace.
    pub fn read_credential(&self, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.read_blob(CRED_NAMESPACE, key, buf)
    }

    /// Read a UTF-8 credential into a fixed-capacity string.
    pub fn read_credential_str<const N: usize>(&self, key: &str) -> Result<heapless::String<N>, StorageError> {
        let mut buf = [0u8; N];
        let len = self.read_credential(key, &mut buf)?;
        let s = core::str::from_utf8(&buf[..len]).map_err(|_| StorageError::IoError)?;
        let mut out = heapless::String::new();
        out.push_str(s).map_err(|_| StorageError::IoError)?;
        Ok(out)
    }
}
