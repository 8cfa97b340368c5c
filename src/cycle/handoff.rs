//! Bounded handoff between the poller and the publish loop.
//!
//! Uses an `embassy-sync` bounded channel shared by reference between the
//! poller thread and the main flow.  The producer side never blocks: a push
//! into a full channel drops the reading and bumps a counter, so the poller
//! always reaches `PollComplete` on time.
//!
//! ```text
//! ┌──────────┐ try_push ┌──────────────────┐ recv_timeout ┌─────────────┐
//! │  Poller  │─────────▶│ FIFO, depth N    │─────────────▶│ Publish loop│
//! └──────────┘  (drop)  └──────────────────┘   (window)   └─────────────┘
//! ```

use core::sync::atomic::{AtomicU32, Ordering};
use core::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::catalog::Reading;
use crate::time::with_timeout;

/// Depth used by the node; larger than any EPSolar node.
pub const HANDOFF_DEPTH: usize = 16;

/// Smallest depth a handoff may be built with.
pub const MIN_HANDOFF_DEPTH: usize = 8;

pub struct Handoff<'c, const N: usize> {
    channel: Channel<CriticalSectionRawMutex, Reading<'c>, N>,
    dropped: AtomicU32,
}

impl<'c, const N: usize> Handoff<'c, N> {
    const DEPTH_OK: () = assert!(N >= MIN_HANDOFF_DEPTH, "handoff depth below minimum");

    pub const fn new() -> Self {
        let () = Self::DEPTH_OK;
        Self {
            channel: Channel::new(),
            dropped: AtomicU32::new(0),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Push without blocking.  Returns `false` (and counts a drop) when full.
    pub fn try_push(&self, reading: Reading<'c>) -> bool {
        if self.channel.try_send(reading).is_ok() {
            true
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Receive the oldest reading, waiting at most `window`.
    pub async fn recv_timeout(&self, window: Duration) -> Option<Reading<'c>> {
        if let Ok(r) = self.channel.try_receive() {
            return Some(r);
        }
        with_timeout(window, self.channel.receive()).await
    }

    /// Receive without waiting.
    pub fn try_recv(&self) -> Option<Reading<'c>> {
        self.channel.try_receive().ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    /// Readings lost to a full channel since construction.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<const N: usize> Default for Handoff<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}
