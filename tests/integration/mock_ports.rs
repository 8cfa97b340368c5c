//! Mock port adapters for integration tests.
//!
//! Each mock records what the cycle asked of it so tests can assert on the
//! full history without real UART, radio or broker.

use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::Duration;

use solarnode::app::events::CycleEvent;
use solarnode::app::ports::{
    BusPort, ConnectivityError, EventSink, NetworkPort, PowerPort, PublishPort, QoS, UpdatePort,
};
use solarnode::catalog::{NodeDescriptor, RegisterDescriptor, RegisterWidth, ValueFormat};
use solarnode::cycle::CycleState;
use solarnode::cycle::phase::PhaseWriter;
use solarnode::error::{BusError, PowerError, PublishError};

// ── Test catalogs ─────────────────────────────────────────────

const fn reg(id: &'static str, address: u16, width: RegisterWidth) -> RegisterDescriptor<'static> {
    RegisterDescriptor {
        id,
        name: id,
        unit: "",
        address,
        width,
        format: ValueFormat::Decimal,
    }
}

pub static ARRAY_PROPS: [RegisterDescriptor<'static>; 2] = [
    reg("voltage", 0x10, RegisterWidth::Uint16),
    reg("power", 0x11, RegisterWidth::Uint32),
];
pub static BATTERY_PROPS: [RegisterDescriptor<'static>; 2] = [
    reg("temperature", 0x20, RegisterWidth::Int16),
    reg("level", 0x21, RegisterWidth::Uint16),
];

/// Two nodes of two properties each.
pub static TWO_BY_TWO: [NodeDescriptor<'static>; 2] = [
    NodeDescriptor {
        id: "array",
        name: "Array",
        properties: &ARRAY_PROPS,
    },
    NodeDescriptor {
        id: "battery",
        name: "Battery",
        properties: &BATTERY_PROPS,
    },
];

pub static NINE_PROPS: [RegisterDescriptor<'static>; 9] = [
    reg("p0", 0x40, RegisterWidth::Uint16),
    reg("p1", 0x41, RegisterWidth::Uint16),
    reg("p2", 0x42, RegisterWidth::Uint16),
    reg("p3", 0x43, RegisterWidth::Uint16),
    reg("p4", 0x44, RegisterWidth::Uint16),
    reg("p5", 0x45, RegisterWidth::Uint16),
    reg("p6", 0x46, RegisterWidth::Uint16),
    reg("p7", 0x47, RegisterWidth::Uint16),
    reg("p8", 0x48, RegisterWidth::Uint16),
];

/// One node with nine single-register properties.
pub static NINE: [NodeDescriptor<'static>; 1] = [NodeDescriptor {
    id: "bank",
    name: "Bank",
    properties: &NINE_PROPS,
}];

// ── MockBus ───────────────────────────────────────────────────

/// Answers every address with its own value unless told to fail.
#[derive(Default)]
pub struct MockBus {
    pub values: BTreeMap<u16, u16>,
    pub failing: BTreeSet<u16>,
    pub latency: Duration,
    pub reads: Vec<u16>,
}

#[allow(dead_code)]
impl MockBus {
    pub fn failing_at(address: u16) -> Self {
        let mut bus = Self::default();
        bus.failing.insert(address);
        bus
    }
}

impl BusPort for MockBus {
    fn read(&mut self, _slave_id: u8, address: u16, out: &mut [u16]) -> Result<usize, BusError> {
        self.reads.push(address);
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        if self.failing.contains(&address) {
            return Err(BusError::Timeout);
        }
        for (slot, addr) in out.iter_mut().zip(address..) {
            *slot = self.values.get(&addr).copied().unwrap_or(addr);
        }
        Ok(out.len())
    }
}

// ── MockNetwork ───────────────────────────────────────────────

pub struct MockNetwork {
    pub link_up: bool,
    pub starts: u32,
    pub stops: u32,
}

#[allow(dead_code)]
impl MockNetwork {
    pub fn up() -> Self {
        Self {
            link_up: true,
            starts: 0,
            stops: 0,
        }
    }

    pub fn down() -> Self {
        Self {
            link_up: false,
            ..Self::up()
        }
    }
}

impl NetworkPort for MockNetwork {
    fn start(&mut self, ready: PhaseWriter) -> Result<(), ConnectivityError> {
        self.starts += 1;
        if self.link_up {
            ready.signal();
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.stops += 1;
    }
}

// ── MockBroker ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Default)]
pub struct MockBroker {
    pub refuse_connect: bool,
    /// Held inside `connect`, letting the poller run ahead.
    pub connect_delay: Duration,
    pub connected: bool,
    pub disconnects: u32,
    pub sent: Vec<Published>,
}

#[allow(dead_code)]
impl MockBroker {
    pub fn topics(&self) -> Vec<&str> {
        self.sent.iter().map(|p| p.topic.as_str()).collect()
    }

    /// Live value topics (`{node}/{prop}`), in send order.
    pub fn values(&self) -> Vec<(&str, &str)> {
        self.sent
            .iter()
            .filter(|p| !p.topic.contains('$'))
            .map(|p| (p.topic.as_str(), p.payload.as_str()))
            .collect()
    }

    pub fn attributes(&self) -> usize {
        self.sent
            .iter()
            .filter(|p| p.topic.contains('$') && p.topic != "$state")
            .count()
    }
}

impl PublishPort for MockBroker {
    fn connect(&mut self) -> Result<(), PublishError> {
        if !self.connect_delay.is_zero() {
            thread::sleep(self.connect_delay);
        }
        if self.refuse_connect {
            return Err(PublishError::ConnectFailed);
        }
        self.connected = true;
        Ok(())
    }

    fn publish(&mut self, topic: &str, qos: QoS, retain: bool, payload: &str) -> Result<(), PublishError> {
        if !self.connected {
            return Err(PublishError::NotConnected);
        }
        self.sent.push(Published {
            topic: topic.to_owned(),
            payload: payload.to_owned(),
            qos,
            retain,
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.disconnects += 1;
    }
}

// ── MockUpdater ───────────────────────────────────────────────

pub struct MockUpdater {
    pub succeed: bool,
    pub sources: Vec<String>,
}

#[allow(dead_code)]
impl MockUpdater {
    pub fn succeeding() -> Self {
        Self {
            succeed: true,
            sources: Vec::new(),
        }
    }

    pub fn failing() -> Self {
        Self {
            succeed: false,
            sources: Vec::new(),
        }
    }
}

impl UpdatePort for MockUpdater {
    fn apply_update(&mut self, source: &str) -> bool {
        self.sources.push(source.to_owned());
        self.succeed
    }
}

// ── MockPower ─────────────────────────────────────────────────

#[derive(Default)]
pub struct MockPower {
    pub sleeps: Vec<Duration>,
    pub delays: Vec<Duration>,
    pub restarts: u32,
}

impl PowerPort for MockPower {
    fn deep_sleep(&mut self, duration: Duration) -> PowerError {
        self.sleeps.push(duration);
        PowerError::SleepRejected(-1)
    }

    fn delay(&mut self, duration: Duration) {
        self.delays.push(duration);
    }

    fn restart(&mut self) {
        self.restarts += 1;
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<CycleEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn states(&self) -> Vec<CycleState> {
        self.events
            .iter()
            .filter_map(|e| match e {
                CycleEvent::StateChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, event: &CycleEvent) -> bool {
        self.events.contains(event)
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &CycleEvent) {
        self.events.push(event.clone());
    }
}
