//! SolarNode Firmware: Main Entry Point
//!
//! One process lifetime is one wake cycle: boot, advance the epoch, run the
//! duty cycle, deep sleep.  The next wake starts here again.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  ModbusRtu      MqttTransport   NvsAdapter     OtaAdapter      │
//! │  (BusPort)      (PublishPort)   (Storage+Cfg)  (UpdatePort)    │
//! │  WifiAdapter    LogEventSink    PowerManager                   │
//! │  (NetworkPort)  (EventSink)     (PowerPort)                    │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │          DutyCycle (orchestration, no I/O)             │    │
//! │  │  EpochGate · Poller · Handoff · Publisher · UpdateGate │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::{Context, Result};
use log::{info, warn};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::gpio::AnyIOPin;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::uart::{UartDriver, config::Config as UartConfig};
use esp_idf_svc::hal::units::Hertz;

use solarnode::adapters::log_sink::LogEventSink;
use solarnode::adapters::modbus::ModbusRtu;
use solarnode::adapters::mqtt::MqttTransport;
use solarnode::adapters::nvs::{CRED_BROKER_PASSWORD, CRED_WIFI_PSK, CRED_WIFI_SSID, NvsAdapter};
use solarnode::adapters::ota::{self, OtaAdapter};
use solarnode::adapters::wifi::WifiAdapter;
use solarnode::app::ports::ConfigPort;
use solarnode::app::service::{CyclePorts, DutyCycle};
use solarnode::catalog::{Catalog, epsolar};
use solarnode::config::NodeConfig;
use solarnode::cycle::epoch::EpochGate;
use solarnode::pins;
use solarnode::power::PowerManager;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;
    info!("SolarNode v{}", env!("CARGO_PKG_VERSION"));

    ota::check_rollback();
    let mut power = PowerManager::new(FreeRtos);
    info!("Boot: wake reason {}", power.wake_reason());

    // ── 2. Persistent state ───────────────────────────────────
    let nvs = NvsAdapter::new().context("NVS init")?;
    let config = match nvs.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            NodeConfig::default()
        }
    };
    let catalog = Catalog::new(&epsolar::NODES).context("register catalog")?;

    let ssid = nvs.read_credential_str::<32>(CRED_WIFI_SSID).unwrap_or_else(|e| {
        warn!("WiFi SSID not provisioned ({})", e);
        heapless::String::new()
    });
    let psk = nvs.read_credential_str::<64>(CRED_WIFI_PSK).unwrap_or_default();
    let broker_password = nvs.read_credential_str::<64>(CRED_BROKER_PASSWORD).unwrap_or_default();

    // Everything after this point is gated on the epoch decision, so a
    // counter that cannot be persisted stops the boot.
    let mut gate = EpochGate::new(nvs, config.full_cycle_period, config.updates_enabled());
    let epoch = gate.advance().context("restart counter")?;

    // ── 3. Adapters ───────────────────────────────────────────
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;

    let mut network = WifiAdapter::new(peripherals.modem, sysloop)?;
    if let Err(e) = network.set_credentials(&ssid, &psk) {
        warn!("WiFi: {}", e);
    }

    // SAFETY: the bus pins are not claimed by any other driver.
    let (tx, rx) = unsafe { (AnyIOPin::new(pins::BUS_TX_GPIO), AnyIOPin::new(pins::BUS_RX_GPIO)) };
    let uart = UartDriver::new(
        peripherals.uart1,
        tx,
        rx,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &UartConfig::default().baudrate(Hertz(pins::BUS_BAUD)),
    )
    .context("bus UART")?;

    let mut transport = MqttTransport::new(&config, broker_password, &catalog)?;
    transport.set_advertise(epoch.full_cycle);

    let mut ports = CyclePorts {
        bus: ModbusRtu::new(uart).with_timeout(config.bus_timeout()),
        network,
        transport,
        updater: OtaAdapter::new(),
    };
    let mut sink = LogEventSink::new();

    // ── 4. One wake cycle ─────────────────────────────────────
    let mut cycle = DutyCycle::new(&config, catalog);
    let report = cycle.run(epoch, &mut gate, &mut ports, &mut sink);
    info!(
        "Cycle {}: polled {}/{} failed, published {} (+{} attributes), update {:?}",
        report.epoch.counter,
        report.poll.read,
        report.poll.failed,
        report.publish.values,
        report.publish.attributes,
        report.update
    );

    // ── 5. Sleep (returns only if suspending and restarting failed) ──
    cycle.sleep(&mut ports.network, &mut power, &mut sink);
    Ok(())
}
