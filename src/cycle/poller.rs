//! Poller: the producer side of a wake cycle.
//!
//! Walks the catalog once, in order, reading each register run from the
//! bus.  A failed or short read is skipped (no retry, no reading); a full
//! handoff drops the reading.  Neither stops the sweep, and `PollComplete`
//! is signalled when the catalog is exhausted no matter what failed.

use log::{debug, warn};

use crate::app::ports::BusPort;
use crate::catalog::{Catalog, Reading};
use crate::cycle::handoff::Handoff;
use crate::cycle::phase::{Phase, PhaseWriter};

/// Largest register run any width needs.
const MAX_WORDS: usize = 2;

/// Outcome counters of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Registers read and decoded.
    pub read: u32,
    /// Registers whose bus read failed or came back short.
    pub failed: u32,
    /// Decoded readings lost to a full handoff.
    pub dropped: u32,
}

pub struct Poller<'c> {
    catalog: Catalog<'c>,
    slave_id: u8,
}

impl<'c> Poller<'c> {
    pub fn new(catalog: Catalog<'c>, slave_id: u8) -> Self {
        Self { catalog, slave_id }
    }

    /// Run one sweep and signal `PollComplete` through `done`.
    pub fn run<B: BusPort, const N: usize>(
        &self,
        bus: &mut B,
        handoff: &Handoff<'c, N>,
        done: &PhaseWriter,
    ) -> PollStats {
        debug_assert_eq!(done.phase(), Phase::PollComplete);
        let mut stats = PollStats::default();

        for (node, register) in self.catalog.registers() {
            let mut words = [0u16; MAX_WORDS];
            let want = register.width.registers();

            let raw = match bus.read(self.slave_id, register.address, &mut words[..want]) {
                Ok(n) => register.width.decode(&words[..n.min(want)]),
                Err(e) => {
                    warn!("Poll: {}/{} @0x{:04X} failed: {}", node.id, register.id, register.address, e);
                    stats.failed += 1;
                    continue;
                }
            };
            let Some(raw) = raw else {
                warn!("Poll: {}/{} short read", node.id, register.id);
                stats.failed += 1;
                continue;
            };

            stats.read += 1;
            if handoff.try_push(Reading { node, register, raw }) {
                debug!("Poll: {}/{} = 0x{:08X}", node.id, register.id, raw);
            } else {
                warn!("Poll: handoff full, dropped {}/{}", node.id, register.id);
                stats.dropped += 1;
            }
        }

        done.signal();
        stats
    }
}
