//! WiFi station-mode adapter.
//!
//! Implements [`NetworkPort`]: starts association and hands the cycle's
//! `NetworkReady` writer to the IP event handler, which signals it once DHCP
//! assigns an address.  The duty cycle only ever waits on that flag.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: real ESP-IDF WiFi driver via `esp_idf_svc::wifi`.
//! - **all other targets**: simulation that signals readiness immediately
//!   when the simulated link is up.
//!
//! There is no reconnection logic: a missed association is retried by the
//! next wake cycle.

use log::{info, warn};

use crate::app::ports::{ConnectivityError, NetworkPort};
use crate::cycle::phase::PhaseWriter;

#[cfg(target_os = "espidf")]
use esp_idf_svc::{
    eventloop::{EspSubscription, EspSystemEventLoop, System},
    hal::modem::Modem,
    netif::IpEvent,
    wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi},
};

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn validate_ssid(ssid: &str) -> Result<(), ConnectivityError> {
    if ssid.is_empty() || ssid.len() > 32 {
        return Err(ConnectivityError::InvalidSsid);
    }
    if !is_printable_ascii(ssid) {
        return Err(ConnectivityError::InvalidSsid);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ConnectivityError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 {
        return Err(ConnectivityError::InvalidPassword);
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// WiFi adapter
// ───────────────────────────────────────────────────────────────

pub struct WifiAdapter {
    ssid: heapless::String<32>,
    password: heapless::String<64>,
    started: bool,

    #[cfg(target_os = "espidf")]
    wifi: EspWifi<'static>,
    #[cfg(target_os = "espidf")]
    sysloop: EspSystemEventLoop,
    /// Keeps the IP-assigned handler (and its writer) alive until `stop`.
    #[cfg(target_os = "espidf")]
    ip_subscription: Option<EspSubscription<'static, System>>,

    #[cfg(not(target_os = "espidf"))]
    link_up: bool,
    #[cfg(not(target_os = "espidf"))]
    fail_start: bool,
    /// Simulation counterpart of `ip_subscription`.
    #[cfg(not(target_os = "espidf"))]
    ip_handler_armed: bool,
}

impl WifiAdapter {
    #[cfg(target_os = "espidf")]
    pub fn new(modem: Modem, sysloop: EspSystemEventLoop) -> Result<Self, esp_idf_svc::sys::EspError> {
        let wifi = EspWifi::new(modem, sysloop.clone(), None)?;
        Ok(Self {
            ssid: heapless::String::new(),
            password: heapless::String::new(),
            started: false,
            wifi,
            sysloop,
            ip_subscription: None,
        })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self {
            ssid: heapless::String::new(),
            password: heapless::String::new(),
            started: false,
            link_up: true,
            fail_start: false,
            ip_handler_armed: false,
        }
    }

    /// Simulation: whether `start` will report readiness.
    #[cfg(not(target_os = "espidf"))]
    pub fn set_link_up(&mut self, up: bool) {
        self.link_up = up;
    }

    /// Simulation: make the driver fail after the IP handler is armed.
    #[cfg(not(target_os = "espidf"))]
    pub fn set_start_fails(&mut self, fails: bool) {
        self.fail_start = fails;
    }

    /// Simulation: whether an IP-assigned handler is registered.
    #[cfg(not(target_os = "espidf"))]
    pub fn ip_handler_armed(&self) -> bool {
        self.ip_handler_armed
    }

    pub fn set_credentials(&mut self, ssid: &str, password: &str) -> Result<(), ConnectivityError> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        self.ssid.clear();
        self.ssid.push_str(ssid).map_err(|_| ConnectivityError::InvalidSsid)?;
        self.password.clear();
        self.password
            .push_str(password)
            .map_err(|_| ConnectivityError::InvalidPassword)?;
        info!("WiFi: credentials set (SSID='{}')", self.ssid);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&mut self, ready: PhaseWriter) -> Result<(), ConnectivityError> {
        let config = Configuration::Client(ClientConfiguration {
            ssid: self
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| ConnectivityError::InvalidSsid)?,
            password: self
                .password
                .as_str()
                .try_into()
                .map_err(|_| ConnectivityError::InvalidPassword)?,
            auth_method: if self.password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });
        self.wifi.set_configuration(&config).map_err(|e| {
            warn!("WiFi: set_configuration failed: {}", e);
            ConnectivityError::StartFailed
        })?;

        // Subscribe before connecting so the assignment cannot be missed.
        let subscription = self
            .sysloop
            .subscribe::<IpEvent, _>(move |event| {
                if let IpEvent::DhcpIpAssigned(assignment) = event {
                    info!("WiFi: got IP {}", assignment.ip());
                    ready.signal();
                }
            })
            .map_err(|e| {
                warn!("WiFi: IP event subscription failed: {}", e);
                ConnectivityError::StartFailed
            })?;
        self.ip_subscription = Some(subscription);

        self.wifi.start().map_err(|e| {
            warn!("WiFi: start failed: {}", e);
            ConnectivityError::StartFailed
        })?;
        self.wifi.connect().map_err(|e| {
            warn!("WiFi: connect failed: {}", e);
            ConnectivityError::StartFailed
        })?;
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&mut self, ready: PhaseWriter) -> Result<(), ConnectivityError> {
        self.ip_handler_armed = true;
        if self.fail_start {
            warn!("WiFi(sim): driver start failed");
            return Err(ConnectivityError::StartFailed);
        }
        if self.link_up {
            info!("WiFi(sim): associated with '{}'", self.ssid);
            ready.signal();
        } else {
            info!("WiFi(sim): '{}' out of range", self.ssid);
        }
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_stop(&mut self) {
        self.ip_subscription = None;
        if let Err(e) = self.wifi.disconnect() {
            warn!("WiFi: disconnect failed: {}", e);
        }
        if let Err(e) = self.wifi.stop() {
            warn!("WiFi: stop failed: {}", e);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_stop(&mut self) {
        self.ip_handler_armed = false;
        info!("WiFi(sim): stopped");
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for WifiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────
// NetworkPort
// ───────────────────────────────────────────────────────────────

impl NetworkPort for WifiAdapter {
    fn start(&mut self, ready: PhaseWriter) -> Result<(), ConnectivityError> {
        if self.ssid.is_empty() {
            return Err(ConnectivityError::NoCredentials);
        }
        info!("WiFi: connecting to '{}'", self.ssid);
        if let Err(e) = self.platform_start(ready) {
            // A partial start may hold the IP handler; `stop` would skip it.
            self.platform_stop();
            return Err(e);
        }
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.platform_stop();
        self.started = false;
        info!("WiFi: stopped");
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::phase::{Phase, PhaseSignals};

    #[test]
    fn rejects_empty_ssid() {
        let mut a = WifiAdapter::new();
        assert_eq!(a.set_credentials("", "password123"), Err(ConnectivityError::InvalidSsid));
    }

    #[test]
    fn rejects_short_password() {
        let mut a = WifiAdapter::new();
        assert_eq!(a.set_credentials("MyNet", "short"), Err(ConnectivityError::InvalidPassword));
    }

    #[test]
    fn accepts_open_network() {
        let mut a = WifiAdapter::new();
        assert!(a.set_credentials("OpenCafe", "").is_ok());
    }

    #[test]
    fn start_without_credentials_fails() {
        let mut a = WifiAdapter::new();
        let (signals, w) = PhaseSignals::new();
        assert_eq!(a.start(w.network_ready), Err(ConnectivityError::NoCredentials));
        assert!(!signals.is_set(Phase::NetworkReady));
        assert!(!a.is_started());
    }

    #[test]
    fn start_signals_network_ready() {
        let mut a = WifiAdapter::new();
        a.set_credentials("TestNet", "password1").unwrap();
        let (signals, w) = PhaseSignals::new();
        a.start(w.network_ready).unwrap();
        assert!(signals.is_set(Phase::NetworkReady));
        a.stop();
        assert!(!a.is_started());
        assert!(!a.ip_handler_armed());
    }

    #[test]
    fn failed_start_releases_ip_handler() {
        let mut a = WifiAdapter::new();
        a.set_credentials("TestNet", "password1").unwrap();
        a.set_start_fails(true);
        let (signals, w) = PhaseSignals::new();
        assert_eq!(a.start(w.network_ready), Err(ConnectivityError::StartFailed));
        assert!(!a.is_started());
        assert!(!a.ip_handler_armed());
        assert!(!signals.is_set(Phase::NetworkReady));

        a.set_start_fails(false);
        let (signals, w) = PhaseSignals::new();
        a.start(w.network_ready).unwrap();
        assert!(signals.is_set(Phase::NetworkReady));
        assert!(a.ip_handler_armed());
        a.stop();
        assert!(!a.ip_handler_armed());
    }

    #[test]
    fn link_down_never_signals() {
        let mut a = WifiAdapter::new();
        a.set_credentials("Far", "password1").unwrap();
        a.set_link_up(false);
        let (signals, w) = PhaseSignals::new();
        a.start(w.network_ready).unwrap();
        assert!(!signals.wait_blocking(Phase::NetworkReady, core::time::Duration::from_millis(10)));
    }
}
