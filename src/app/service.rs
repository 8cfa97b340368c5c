//! Duty cycle: the hexagonal core.
//!
//! [`DutyCycle`] runs one wake cycle end to end.  All I/O flows through
//! port traits owned by [`CyclePorts`], so the whole cycle runs against
//! mock adapters in tests.
//!
//! ```text
//!  BOOT ─▶ AWAIT_NETWORK ─(T1 timeout)──────────────────────────────▶ SLEEP
//!               │ NetworkReady                                          ▲
//!               ▼                                                       │
//!              RUN ──spawn──▶ Poller ──▶ Handoff ──▶ PUBLISH_LOOP       │
//!                                                        │              │
//!                                              DISCONNECT (T2) ─▶ UPDATE_CHECK
//! ```
//!
//! The epoch has already been advanced when [`DutyCycle::run`] is called;
//! the caller treats a failed advance as fatal.

use core::time::Duration;
use std::thread;
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::config::NodeConfig;
use crate::cycle::CycleState;
use crate::cycle::epoch::{Epoch, EpochGate};
use crate::cycle::handoff::{HANDOFF_DEPTH, Handoff};
use crate::cycle::phase::{Phase, PhaseSignals, PhaseWriters};
use crate::cycle::poller::{PollStats, Poller};
use crate::cycle::publisher::{PublishStats, Publisher};
use crate::cycle::update::{UpdateGate, UpdateOutcome};
use crate::drivers::task_pin::{self, Core, TaskSpec};

use super::events::CycleEvent;
use super::ports::{BusPort, EventSink, NetworkPort, PowerPort, PublishPort, StoragePort, UpdatePort};

/// Placement of the poller task: off the protocol core.
const POLLER_TASK: TaskSpec = TaskSpec {
    name: "poller\0",
    core: Core::App,
    priority: 5,
    stack_kb: 8,
};

// ───────────────────────────────────────────────────────────────
// Ports and report
// ───────────────────────────────────────────────────────────────

/// The adapters one cycle drives.
pub struct CyclePorts<B, N, T, U> {
    pub bus: B,
    pub network: N,
    pub transport: T,
    pub updater: U,
}

/// What happened during one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub epoch: Epoch,
    /// `NetworkReady` arrived within T1.
    pub network_ready: bool,
    pub poll: PollStats,
    pub publish: PublishStats,
    /// `PublishComplete` was observed within T2.
    pub publish_confirmed: bool,
    pub update: UpdateOutcome,
    /// State the cycle ended in.
    pub state: CycleState,
    pub elapsed: Duration,
}

impl CycleReport {
    fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            network_ready: false,
            poll: PollStats::default(),
            publish: PublishStats::default(),
            publish_confirmed: false,
            update: UpdateOutcome::NotDue,
            state: CycleState::Boot,
            elapsed: Duration::ZERO,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// DutyCycle
// ───────────────────────────────────────────────────────────────

pub struct DutyCycle<'c> {
    poller: Poller<'c>,
    publisher: Publisher<'c>,
    network_timeout: Duration,
    publish_timeout: Duration,
    sleep_duration: Duration,
    restart_delay: Duration,
    update_source: heapless::String<128>,
    /// `None` runs the poller inline before the publish loop.
    poller_task: Option<TaskSpec>,
    largest_node: usize,
    state: CycleState,
}

fn enter(state: &mut CycleState, to: CycleState, sink: &mut impl EventSink) {
    if *state != to {
        sink.emit(&CycleEvent::StateChanged { from: *state, to });
        *state = to;
    }
}

/// Open the broker session; a failure only costs this cycle's publishes.
fn open_session(transport: &mut impl PublishPort, sink: &mut impl EventSink) {
    if let Err(e) = transport.connect() {
        warn!("Cycle: broker connect failed: {}", e);
        sink.emit(&CycleEvent::BrokerUnavailable);
    }
}

impl<'c> DutyCycle<'c> {
    pub fn new(config: &NodeConfig, catalog: Catalog<'c>) -> Self {
        Self {
            poller: Poller::new(catalog, config.bus_slave_id),
            publisher: Publisher::new(catalog, config.receive_window(), config.publish_timeout()),
            network_timeout: config.network_timeout(),
            publish_timeout: config.publish_timeout(),
            sleep_duration: config.sleep_duration(),
            restart_delay: config.restart_delay(),
            update_source: config.update_url.clone(),
            poller_task: Some(POLLER_TASK),
            largest_node: catalog.largest_node(),
            state: CycleState::Boot,
        }
    }

    /// Override where the poller runs.  `None` polls inline, as on a
    /// single-core part.
    pub fn with_poller_task(mut self, task: Option<TaskSpec>) -> Self {
        self.poller_task = task;
        self
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Run one wake cycle with the node's handoff depth.
    pub fn run<S, B, N, T, U>(
        &mut self,
        epoch: Epoch,
        gate: &mut EpochGate<S>,
        ports: &mut CyclePorts<B, N, T, U>,
        sink: &mut impl EventSink,
    ) -> CycleReport
    where
        S: StoragePort,
        B: BusPort + Send,
        N: NetworkPort,
        T: PublishPort,
        U: UpdatePort,
    {
        self.run_with::<HANDOFF_DEPTH, S, B, N, T, U>(epoch, gate, ports, sink)
    }

    /// Run one wake cycle with a handoff of depth `D`.
    ///
    /// Ends in `SLEEP` without suspending; call [`sleep`](Self::sleep) next.
    pub fn run_with<const D: usize, S, B, N, T, U>(
        &mut self,
        epoch: Epoch,
        gate: &mut EpochGate<S>,
        ports: &mut CyclePorts<B, N, T, U>,
        sink: &mut impl EventSink,
    ) -> CycleReport
    where
        S: StoragePort,
        B: BusPort + Send,
        N: NetworkPort,
        T: PublishPort,
        U: UpdatePort,
    {
        let started = Instant::now();
        let mut report = CycleReport::new(epoch);
        self.state = CycleState::Boot;
        sink.emit(&CycleEvent::Started(epoch));

        let CyclePorts {
            bus,
            network,
            transport,
            updater,
        } = ports;
        let (signals, writers) = PhaseSignals::new();
        let PhaseWriters {
            network_ready,
            poll_complete,
            publish_complete,
        } = writers;

        // ── AWAIT_NETWORK ─────────────────────────────────────
        enter(&mut self.state, CycleState::AwaitNetwork, sink);
        report.network_ready = match network.start(network_ready) {
            Ok(()) => signals.wait_blocking(Phase::NetworkReady, self.network_timeout),
            Err(e) => {
                warn!("Cycle: network start failed: {}", e);
                false
            }
        };
        if !report.network_ready {
            sink.emit(&CycleEvent::NetworkUnavailable);
            enter(&mut self.state, CycleState::Sleep, sink);
            report.state = self.state;
            report.elapsed = started.elapsed();
            return report;
        }

        // ── RUN ───────────────────────────────────────────────
        // The poller starts first so bus traffic overlaps the broker
        // handshake.
        enter(&mut self.state, CycleState::Run, sink);
        if self.largest_node > D {
            warn!(
                "Cycle: largest node has {} properties, handoff holds {}",
                self.largest_node, D
            );
        }
        let handoff: Handoff<'c, D> = Handoff::new();
        let full_cycle = epoch.full_cycle;
        let poller = &self.poller;
        let publisher = &self.publisher;
        let state = &mut self.state;

        let poller_task = self.poller_task;
        let threaded = thread::scope(|s| {
            let task = poller_task?;
            let bus = &mut *bus;
            let (handoff, poll_done) = (&handoff, &poll_complete);
            let worker = match task_pin::spawn_scoped_on_core(s, task, move || {
                poller.run(bus, handoff, poll_done)
            }) {
                Ok(worker) => worker,
                Err(e) => {
                    warn!("Cycle: poller spawn failed: {}", e);
                    return None;
                }
            };

            open_session(&mut *transport, sink);

            // ── PUBLISH_LOOP ──────────────────────────────────
            enter(state, CycleState::PublishLoop, sink);
            let published = publisher.run(&mut *transport, handoff, &signals, &publish_complete, full_cycle);
            let polled = worker.join().unwrap_or_else(|_| {
                error!("Cycle: poller panicked");
                PollStats::default()
            });
            Some((polled, published))
        });

        let (polled, published) = match threaded {
            Some(done) => done,
            None => {
                sink.emit(&CycleEvent::PollerInline);
                let polled = poller.run(&mut *bus, &handoff, &poll_complete);
                open_session(&mut *transport, sink);
                enter(state, CycleState::PublishLoop, sink);
                let published = publisher.run(&mut *transport, &handoff, &signals, &publish_complete, full_cycle);
                (polled, published)
            }
        };
        report.poll = polled;
        report.publish = published;
        sink.emit(&CycleEvent::PollFinished(polled));
        sink.emit(&CycleEvent::PublishFinished(published));

        // ── DISCONNECT ────────────────────────────────────────
        enter(state, CycleState::Disconnect, sink);
        report.publish_confirmed = signals.wait_blocking(Phase::PublishComplete, self.publish_timeout);
        if !report.publish_confirmed {
            warn!("Cycle: publish not confirmed within {:?}", self.publish_timeout);
        }
        transport.disconnect();

        // ── UPDATE_CHECK ──────────────────────────────────────
        if full_cycle {
            enter(state, CycleState::UpdateCheck, sink);
        }
        report.update = UpdateGate::new(&self.update_source).check(&epoch, gate, updater);
        sink.emit(&CycleEvent::Update(report.update));

        enter(state, CycleState::Sleep, sink);
        report.state = *state;
        report.elapsed = started.elapsed();
        debug!("Cycle: {:?}", report);
        info!(
            "Cycle {} done in {} ms: {} read, {} published",
            epoch.counter,
            report.elapsed.as_millis(),
            polled.read,
            published.values
        );
        report
    }

    /// SLEEP: stop the network and suspend.
    ///
    /// Only returns if suspending failed, after the blocking delay and the
    /// restart request (which itself only returns on the host).
    pub fn sleep(&mut self, network: &mut impl NetworkPort, power: &mut impl PowerPort, sink: &mut impl EventSink) {
        enter(&mut self.state, CycleState::Sleep, sink);
        network.stop();
        sink.emit(&CycleEvent::Sleeping {
            secs: self.sleep_duration.as_secs() as u32,
        });
        let err = power.deep_sleep(self.sleep_duration);
        warn!("Sleep: {}", err);
        sink.emit(&CycleEvent::SleepFailed);
        power.delay(self.restart_delay);
        power.restart();
    }
}
