//! Publisher: the consumer side of a wake cycle.
//!
//! ```text
//!  full cycle? ──▶ attributes (whole catalog)
//!        │
//!        ▼
//!  PUBLISH_LOOP: recv(window) ──▶ {node}/{prop}
//!        │  exits when PollComplete ∧ handoff empty, or the cycle deadline passes
//!        ▼
//!  $state = sleeping ──▶ signal PublishComplete
//! ```
//!
//! Every message is sent retained at least-once so late subscribers see the
//! last known value.  A failed publish is counted and skipped; nothing is
//! retried inside a cycle.

use core::time::Duration;

use log::{debug, info, warn};

use crate::app::ports::{PublishPort, QoS};
use crate::catalog::{Catalog, Reading};
use crate::cycle::handoff::Handoff;
use crate::cycle::phase::{Phase, PhaseSignals, PhaseWriter};
use crate::error::PublishError;
use crate::homie::{self, Topic};
use crate::time::Deadline;

const QOS: QoS = QoS::AtLeastOnce;
const RETAIN: bool = true;

/// Outcome counters of one publish phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    /// Live values accepted by the transport.
    pub values: u32,
    /// Metadata publish calls made (full cycles only).
    pub attributes: u32,
    /// Publish calls the transport rejected, plus readings that could not
    /// be rendered.
    pub failures: u32,
    /// The loop gave up at the cycle deadline before `PollComplete`.
    pub deadline_hit: bool,
    /// The terminal status was accepted.
    pub terminal_sent: bool,
}

pub struct Publisher<'c> {
    catalog: Catalog<'c>,
    window: Duration,
    timeout: Duration,
}

impl<'c> Publisher<'c> {
    /// `window` bounds each receive attempt; `timeout` bounds the whole loop.
    pub fn new(catalog: Catalog<'c>, window: Duration, timeout: Duration) -> Self {
        Self {
            catalog,
            window,
            timeout,
        }
    }

    /// The full publish phase: attributes (if `full_cycle`), the drain loop,
    /// then the terminal status and `PublishComplete`.
    pub fn run<T: PublishPort, const N: usize>(
        &self,
        transport: &mut T,
        handoff: &Handoff<'c, N>,
        signals: &PhaseSignals,
        done: &PhaseWriter,
        full_cycle: bool,
    ) -> PublishStats {
        let mut stats = PublishStats::default();
        if full_cycle {
            self.publish_attributes(transport, &mut stats);
        }
        futures_lite::future::block_on(self.drain(transport, handoff, signals, &mut stats));
        self.finish(transport, done, &mut stats);
        stats
    }

    /// Advertise every node and property of the catalog.
    ///
    /// Per node: `$name`, `$type`, then `$name`, `$unit`, `$datatype` of each
    /// property, then `$properties`.  Independent of which readings arrive.
    pub fn publish_attributes<T: PublishPort>(&self, transport: &mut T, stats: &mut PublishStats) {
        for node in self.catalog.nodes() {
            let node_attrs = [
                (homie::ATTR_NAME, node.name),
                (homie::ATTR_TYPE, homie::NODE_TYPE),
            ];
            for (attr, value) in node_attrs {
                self.send(transport, homie::node_attr(node, attr), value, stats);
            }

            for prop in node.properties {
                let prop_attrs = [
                    (homie::ATTR_NAME, prop.name),
                    (homie::ATTR_UNIT, prop.unit),
                    (homie::ATTR_DATATYPE, homie::DATATYPE_INTEGER),
                ];
                for (attr, value) in prop_attrs {
                    self.send(transport, homie::property_attr(node, prop, attr), value, stats);
                }
            }

            match homie::properties_list(node) {
                Ok(list) => self.send(transport, homie::node_attr(node, homie::ATTR_PROPERTIES), &list, stats),
                Err(e) => {
                    warn!("Publish: {}/$properties: {}", node.id, e);
                    stats.failures += 1;
                }
            }
        }
        info!("Publish: {} attribute messages", stats.attributes);
    }

    /// Publish one live value to `{node}/{prop}`.
    pub fn publish_reading<T: PublishPort>(
        &self,
        transport: &mut T,
        reading: &Reading<'_>,
    ) -> Result<(), PublishError> {
        let topic = homie::property(reading.node, reading.register)?;
        let payload = homie::render_value(reading)?;
        transport.publish(&topic, QOS, RETAIN, &payload)
    }

    /// PUBLISH_LOOP.
    ///
    /// Each receive waits at most one window.  The loop ends when
    /// `PollComplete` is set and the handoff is empty; a reading pushed just
    /// before `PollComplete` is still delivered because the handoff is
    /// drained once more after the flag is observed.
    pub async fn drain<T: PublishPort, const N: usize>(
        &self,
        transport: &mut T,
        handoff: &Handoff<'c, N>,
        signals: &PhaseSignals,
        stats: &mut PublishStats,
    ) {
        let deadline = Deadline::after(self.timeout);
        loop {
            if signals.is_set(Phase::PollComplete) && handoff.is_empty() {
                break;
            }
            if deadline.expired() {
                warn!("Publish: deadline reached with {} queued", handoff.len());
                stats.deadline_hit = true;
                break;
            }

            match handoff.recv_timeout(self.window.min(deadline.remaining())).await {
                Some(reading) => self.deliver(transport, &reading, stats),
                None if self.drain_if_poll_done(transport, handoff, signals, stats) => break,
                None => debug!("Publish: window elapsed, poll still running"),
            }
        }
    }

    /// After an empty window: if `PollComplete` is set, deliver whatever
    /// landed since the window closed and report that the loop is done.
    fn drain_if_poll_done<T: PublishPort, const N: usize>(
        &self,
        transport: &mut T,
        handoff: &Handoff<'c, N>,
        signals: &PhaseSignals,
        stats: &mut PublishStats,
    ) -> bool {
        if !signals.is_set(Phase::PollComplete) {
            return false;
        }
        while let Some(reading) = handoff.try_recv() {
            self.deliver(transport, &reading, stats);
        }
        true
    }

    /// Send `$state = sleeping`, then signal `PublishComplete`.
    pub fn finish<T: PublishPort>(&self, transport: &mut T, done: &PhaseWriter, stats: &mut PublishStats) {
        match transport.publish(homie::ATTR_STATE, QOS, RETAIN, homie::STATE_SLEEPING) {
            Ok(()) => stats.terminal_sent = true,
            Err(e) => {
                warn!("Publish: $state failed: {}", e);
                stats.failures += 1;
            }
        }
        done.signal();
    }

    fn deliver<T: PublishPort>(&self, transport: &mut T, reading: &Reading<'_>, stats: &mut PublishStats) {
        match self.publish_reading(transport, reading) {
            Ok(()) => stats.values += 1,
            Err(e) => {
                warn!("Publish: {}/{}: {}", reading.node.id, reading.register.id, e);
                stats.failures += 1;
            }
        }
    }

    fn send<T: PublishPort>(
        &self,
        transport: &mut T,
        topic: Result<Topic, PublishError>,
        payload: &str,
        stats: &mut PublishStats,
    ) {
        let res = topic.and_then(|t| {
            stats.attributes += 1;
            transport.publish(&t, QOS, RETAIN, payload)
        });
        if let Err(e) = res {
            warn!("Publish: attribute failed: {}", e);
            stats.failures += 1;
        }
    }
}
