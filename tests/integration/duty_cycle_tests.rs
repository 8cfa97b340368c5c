//! Integration tests for the full wake cycle: epoch → network → poll ∥
//! publish → disconnect → update → sleep.
//!
//! Everything runs on the host against the mocks in `mock_ports` and the
//! simulation backends of the real adapters.

use std::time::Duration;

use solarnode::adapters::modbus::ModbusRtu;
use solarnode::adapters::mqtt::MqttTransport;
use solarnode::adapters::nvs::NvsAdapter;
use solarnode::adapters::ota::OtaAdapter;
use solarnode::adapters::wifi::WifiAdapter;
use solarnode::app::events::CycleEvent;
use solarnode::app::ports::{QoS, StoragePort};
use solarnode::app::service::{CyclePorts, DutyCycle};
use solarnode::catalog::{Catalog, NodeDescriptor, epsolar};
use solarnode::config::NodeConfig;
use solarnode::cycle::CycleState;
use solarnode::cycle::epoch::{COUNTER_KEY, EpochGate};
use solarnode::cycle::update::UpdateOutcome;

use crate::mock_ports::{
    MockBroker, MockBus, MockNetwork, MockPower, MockUpdater, NINE, RecordingSink, TWO_BY_TWO,
};

type MockPorts = CyclePorts<MockBus, MockNetwork, MockBroker, MockUpdater>;

const FIRMWARE_URL: &str = "https://updates.test/epsolar.bin";

fn config() -> NodeConfig {
    NodeConfig {
        network_timeout_ms: 100,
        receive_window_ms: 10,
        publish_timeout_ms: 2_000,
        update_url: heapless::String::try_from(FIRMWARE_URL).unwrap(),
        ..NodeConfig::default()
    }
}

fn mock_ports() -> MockPorts {
    CyclePorts {
        bus: MockBus::default(),
        network: MockNetwork::up(),
        transport: MockBroker::default(),
        updater: MockUpdater::succeeding(),
    }
}

/// An epoch gate already advanced to `counter`.
fn gate_at(counter: u32) -> (EpochGate<NvsAdapter>, solarnode::cycle::epoch::Epoch) {
    let mut gate = EpochGate::new(NvsAdapter::new().unwrap(), 30, true);
    let mut epoch = gate.advance().unwrap();
    while epoch.counter < counter {
        epoch = gate.advance().unwrap();
    }
    (gate, epoch)
}

fn run(nodes: &'static [NodeDescriptor<'static>], counter: u32, ports: &mut MockPorts) -> (
    solarnode::app::service::CycleReport,
    RecordingSink,
    EpochGate<NvsAdapter>,
) {
    let (mut gate, epoch) = gate_at(counter);
    let mut sink = RecordingSink::default();
    let mut cycle = DutyCycle::new(&config(), Catalog::new(nodes).unwrap());
    let report = cycle.run(epoch, &mut gate, ports, &mut sink);
    (report, sink, gate)
}

// ── Full and regular cycles ───────────────────────────────────

#[test]
fn full_cycle_publishes_metadata_values_and_updates() {
    let mut ports = mock_ports();
    let (report, sink, gate) = run(&TWO_BY_TWO, 1, &mut ports);

    assert!(report.epoch.full_cycle);
    assert_eq!(report.publish.attributes, 2 * (3 + 3 * 2));
    assert_eq!(ports.transport.attributes(), 18);
    assert_eq!(
        ports.transport.values(),
        [
            ("array/voltage", "16"),
            ("array/power", "1179665"),
            ("battery/temperature", "32"),
            ("battery/level", "33"),
        ]
    );

    // Metadata first, terminal status last, everything retained at-least-once.
    assert!(ports.transport.topics()[..18].iter().all(|t| t.contains('$')));
    let last = ports.transport.sent.last().unwrap();
    assert_eq!((last.topic.as_str(), last.payload.as_str()), ("$state", "sleeping"));
    assert!(ports.transport.sent.iter().all(|p| p.qos == QoS::AtLeastOnce && p.retain));

    assert_eq!(ports.transport.disconnects, 1);
    assert_eq!(ports.updater.sources, [FIRMWARE_URL]);
    assert_eq!(report.update, UpdateOutcome::Applied { counter_reset: true });
    assert_eq!(gate.storage().get_i32(COUNTER_KEY), Ok(0));
    assert_eq!(
        sink.states(),
        [
            CycleState::AwaitNetwork,
            CycleState::Run,
            CycleState::PublishLoop,
            CycleState::Disconnect,
            CycleState::UpdateCheck,
            CycleState::Sleep,
        ]
    );
}

#[test]
fn regular_cycle_skips_metadata_and_update() {
    let mut ports = mock_ports();
    let (report, sink, gate) = run(&TWO_BY_TWO, 2, &mut ports);

    assert!(!report.epoch.full_cycle);
    assert_eq!(report.publish.attributes, 0);
    assert_eq!(ports.transport.attributes(), 0);
    assert_eq!(ports.transport.values().len(), 4);
    assert!(ports.updater.sources.is_empty());
    assert_eq!(report.update, UpdateOutcome::NotDue);
    assert_eq!(gate.storage().get_i32(COUNTER_KEY), Ok(2));
    assert!(!sink.states().contains(&CycleState::UpdateCheck));
    assert!(report.publish_confirmed);
}

// ── Failure paths ─────────────────────────────────────────────

#[test]
fn network_timeout_goes_straight_to_sleep() {
    let mut ports = mock_ports();
    ports.network = MockNetwork::down();
    let (report, sink, gate) = run(&TWO_BY_TWO, 1, &mut ports);

    assert!(!report.network_ready);
    assert!(report.elapsed >= Duration::from_millis(100));
    assert!(ports.bus.reads.is_empty());
    assert!(ports.transport.sent.is_empty());
    assert!(!ports.transport.connected);
    assert!(ports.updater.sources.is_empty(), "no update without network");
    assert!(sink.contains(&CycleEvent::NetworkUnavailable));
    assert_eq!(sink.states(), [CycleState::AwaitNetwork, CycleState::Sleep]);
    // The abandoned cycle still counts toward the epoch.
    assert_eq!(gate.storage().get_i32(COUNTER_KEY), Ok(1));
}

#[test]
fn failed_register_is_skipped_not_fatal() {
    let mut ports = mock_ports();
    ports.bus = MockBus::failing_at(0x11);
    let (report, _, _) = run(&TWO_BY_TWO, 2, &mut ports);

    assert_eq!(report.poll.read, 3);
    assert_eq!(report.poll.failed, 1);
    assert_eq!(ports.bus.reads, [0x10, 0x11, 0x20, 0x21]);
    let topics: Vec<_> = ports.transport.values().into_iter().map(|(t, _)| t).collect();
    assert_eq!(topics, ["array/voltage", "battery/temperature", "battery/level"]);
    assert!(report.publish.terminal_sent);
}

#[test]
fn full_handoff_drops_exactly_the_overflow() {
    let mut ports = mock_ports();
    // Hold the publisher in connect so the poller fills the handoff first.
    ports.transport.connect_delay = Duration::from_millis(300);
    let (mut gate, epoch) = gate_at(2);
    let mut sink = RecordingSink::default();
    let mut cycle = DutyCycle::new(&config(), Catalog::new(&NINE).unwrap());

    let report = cycle.run_with::<8, _, _, _, _, _>(epoch, &mut gate, &mut ports, &mut sink);

    assert_eq!(report.poll.read, 9);
    assert_eq!(report.poll.dropped, 1);
    assert_eq!(report.publish.values, 8);
    let topics: Vec<_> = ports.transport.values().into_iter().map(|(t, _)| t).collect();
    assert_eq!(
        topics,
        ["bank/p0", "bank/p1", "bank/p2", "bank/p3", "bank/p4", "bank/p5", "bank/p6", "bank/p7"]
    );
}

#[test]
fn broker_down_still_finishes_the_cycle() {
    let mut ports = mock_ports();
    ports.transport.refuse_connect = true;
    let (report, sink, _) = run(&TWO_BY_TWO, 2, &mut ports);

    assert!(sink.contains(&CycleEvent::BrokerUnavailable));
    assert_eq!(report.publish.values, 0);
    assert_eq!(report.publish.failures, 4 + 1);
    assert!(!report.publish.terminal_sent);
    assert!(report.publish_confirmed, "PublishComplete is signalled regardless");
    assert_eq!(report.state, CycleState::Sleep);
}

#[test]
fn failed_update_leaves_counter_for_retry() {
    let mut ports = mock_ports();
    ports.updater = MockUpdater::failing();
    let (report, _, mut gate) = run(&TWO_BY_TWO, 1, &mut ports);

    assert_eq!(report.update, UpdateOutcome::Failed);
    assert_eq!(gate.storage().get_i32(COUNTER_KEY), Ok(1));
    let next = gate.advance().unwrap();
    assert_eq!(next.counter, 2);
    assert!(!next.full_cycle);
}

#[test]
fn slow_bus_is_waited_for_window_by_window() {
    let mut ports = mock_ports();
    ports.bus.latency = Duration::from_millis(30);
    let (report, _, _) = run(&TWO_BY_TWO, 2, &mut ports);

    assert!(!report.publish.deadline_hit);
    assert_eq!(report.publish.values, 4);
    assert_eq!(ports.transport.values()[3].0, "battery/level");
}

// ── Sleep ─────────────────────────────────────────────────────

#[test]
fn refused_sleep_delays_then_restarts() {
    let cfg = config();
    let mut cycle = DutyCycle::new(&cfg, Catalog::new(&TWO_BY_TWO).unwrap());
    let mut network = MockNetwork::up();
    let mut power = MockPower::default();
    let mut sink = RecordingSink::default();

    cycle.sleep(&mut network, &mut power, &mut sink);

    assert_eq!(network.stops, 1);
    assert_eq!(power.sleeps, [cfg.sleep_duration()]);
    assert_eq!(power.delays, [cfg.restart_delay()]);
    assert_eq!(power.restarts, 1);
    assert!(sink.contains(&CycleEvent::Sleeping { secs: 120 }));
    assert!(sink.contains(&CycleEvent::SleepFailed));
}

// ── Simulated device ──────────────────────────────────────────

#[test]
fn simulated_device_full_cycle() {
    let cfg = config();
    let catalog = Catalog::new(&epsolar::NODES).unwrap();

    let mut bus = ModbusRtu::new(cfg.bus_slave_id).with_timeout(cfg.bus_timeout());
    bus.load(0x3100, &[100; 0x20]);
    bus.load(0x3200, &[0x0001; 3]);
    bus.load(0x331A, &[1320, 0xFFF6, 0xFFFF]);

    let mut network = WifiAdapter::new();
    network.set_credentials("SolarShed", "password1").unwrap();

    let mut transport = MqttTransport::new(&cfg, heapless::String::new(), &catalog).unwrap();
    let (mut gate, epoch) = gate_at(1);
    transport.set_advertise(epoch.full_cycle);

    let mut ports = CyclePorts {
        bus,
        network,
        transport,
        updater: OtaAdapter::simulated(Some(vec![0xE9; 4096])),
    };
    let mut sink = RecordingSink::default();
    let mut cycle = DutyCycle::new(&cfg, catalog);

    let report = cycle.run(epoch, &mut gate, &mut ports, &mut sink);

    assert_eq!(report.poll.read, 14);
    assert_eq!(report.poll.failed, 0);
    assert_eq!(report.publish.values, 14);
    assert_eq!(report.publish.attributes, (3 * 4 + 3 * 14) as u32);
    assert_eq!(report.update, UpdateOutcome::Applied { counter_reset: true });

    let sent = ports.transport.sent();
    assert!(sent.iter().all(|m| m.topic.starts_with("homie/epsolar/")));
    assert_eq!(sent[0].topic, "homie/epsolar/$homie");
    let current = sent
        .iter()
        .find(|m| m.topic == "homie/epsolar/battery/current")
        .unwrap();
    assert_eq!(current.payload, "-10");
    let last = sent.last().unwrap();
    assert_eq!((last.topic.as_str(), last.payload.as_str()), ("homie/epsolar/$state", "sleeping"));
    assert_eq!(ports.updater.fetched(), [FIRMWARE_URL]);
}
