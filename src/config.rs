//! Node configuration parameters
//!
//! All tunable parameters for the SolarNode duty cycle.
//! Values can be overridden via NVS; secrets (WiFi PSK, broker password)
//! live in the NVS `auth` namespace, not here.

use core::time::Duration;

use serde::{Deserialize, Serialize};

/// Core node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    // --- Duty cycle ---
    /// Deep-sleep duration between wakes (seconds)
    pub sleep_duration_secs: u32,
    /// Every N-th wake is a full cycle (metadata + update check)
    pub full_cycle_period: u32,

    // --- Timeouts ---
    /// Wait for network readiness (milliseconds)
    pub network_timeout_ms: u32,
    /// Per-iteration receive window of the publish loop (milliseconds)
    pub receive_window_ms: u32,
    /// Overall bound on the publish phase (milliseconds)
    pub publish_timeout_ms: u32,
    /// Delay before restart when deep sleep is refused (milliseconds)
    pub restart_delay_ms: u32,

    // --- Field bus ---
    /// Modbus slave address of the charge controller
    pub bus_slave_id: u8,
    /// Wait for a complete response frame (milliseconds)
    pub bus_timeout_ms: u32,

    // --- Update ---
    /// Run the update check on full cycles
    pub update_enabled: bool,
    /// Firmware image URL
    pub update_url: heapless::String<128>,

    // --- Broker ---
    /// e.g. `mqtt://192.168.1.10:1883`
    pub broker_uri: heapless::String<64>,
    pub client_id: heapless::String<32>,
    pub username: heapless::String<32>,
    /// Homie device base topic
    pub base_topic: heapless::String<32>,
    /// Homie device `$name`
    pub device_name: heapless::String<32>,
    /// MQTT keep-alive (seconds)
    pub keepalive_secs: u16,
}

fn hs<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    // Defaults are compile-time literals that fit their buffers.
    let _ = out.push_str(s);
    out
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            // Duty cycle
            sleep_duration_secs: 120,
            full_cycle_period: 30,

            // Timeouts
            network_timeout_ms: 20_000,
            receive_window_ms: 500,
            publish_timeout_ms: 20_000,
            restart_delay_ms: 5_000,

            // Field bus
            bus_slave_id: 1,
            bus_timeout_ms: 500,

            // Update
            update_enabled: true,
            update_url: hs("https://firmware.local/epsolar/firmware.bin"),

            // Broker
            broker_uri: hs("mqtt://192.168.1.10:1883"),
            client_id: hs("epsolar"),
            username: hs("epsolar"),
            base_topic: hs("homie/epsolar"),
            device_name: hs("EPSolar Sensor"),
            keepalive_secs: 15,
        }
    }
}

impl NodeConfig {
    pub fn sleep_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.sleep_duration_secs))
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.network_timeout_ms))
    }

    pub fn receive_window(&self) -> Duration {
        Duration::from_millis(u64::from(self.receive_window_ms))
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.publish_timeout_ms))
    }

    pub fn bus_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.bus_timeout_ms))
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.restart_delay_ms))
    }

    /// Updates run only when enabled and a source is configured.
    pub fn updates_enabled(&self) -> bool {
        self.update_enabled && !self.update_url.is_empty()
    }
}
