//! Phase signals: set-once, many-waiter notifications that sequence a cycle.
//!
//! ```text
//!   network bring-up ──NetworkReady──▶ ┐
//!   poller           ──PollComplete──▶ ├─▶ waiters (each with its own timeout)
//!   publish exit     ──PublishComplete▶┘
//! ```
//!
//! A fresh [`PhaseSignals`] is created per wake cycle together with exactly
//! one [`PhaseWriter`] per phase.  Owning the writer is the only way to set a
//! flag, so each flag has a single writer by construction.  Flags are never
//! cleared; setting one twice is a no-op.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::Poll;
use core::time::Duration;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;

use crate::time::with_timeout;

/// Concurrent waiters tracked per flag before the registry wakes everyone
/// early (they simply re-register).
const MAX_WAITERS: usize = 4;

/// The named phases of a wake cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Network is associated and has an address.  Written by network bring-up.
    NetworkReady,
    /// The poller has walked the whole catalog.  Written by the poller.
    PollComplete,
    /// The publish loop has exited and the terminal status was sent.
    PublishComplete,
}

impl Phase {
    pub const COUNT: usize = 3;

    const fn index(self) -> usize {
        match self {
            Self::NetworkReady => 0,
            Self::PollComplete => 1,
            Self::PublishComplete => 2,
        }
    }
}

struct Flag {
    set: AtomicBool,
    waiters: Mutex<CriticalSectionRawMutex, RefCell<MultiWakerRegistration<MAX_WAITERS>>>,
}

impl Flag {
    const fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
            waiters: Mutex::new(RefCell::new(MultiWakerRegistration::new())),
        }
    }
}

/// The per-cycle signal set.
pub struct PhaseSignals {
    flags: [Flag; Phase::COUNT],
}

/// The three writers of a cycle, handed to their owners.
pub struct PhaseWriters {
    pub network_ready: PhaseWriter,
    pub poll_complete: PhaseWriter,
    pub publish_complete: PhaseWriter,
}

impl PhaseSignals {
    /// Create a cleared signal set and its writers.
    pub fn new() -> (Arc<Self>, PhaseWriters) {
        let signals = Arc::new(Self {
            flags: [Flag::new(), Flag::new(), Flag::new()],
        });
        let writer = |phase| PhaseWriter {
            signals: Arc::clone(&signals),
            phase,
        };
        let writers = PhaseWriters {
            network_ready: writer(Phase::NetworkReady),
            poll_complete: writer(Phase::PollComplete),
            publish_complete: writer(Phase::PublishComplete),
        };
        (signals, writers)
    }

    /// Non-blocking check.
    pub fn is_set(&self, phase: Phase) -> bool {
        self.flags[phase.index()].set.load(Ordering::Acquire)
    }

    /// Wait until `phase` is set or `timeout` elapses; returns whether it was set.
    pub async fn wait(&self, phase: Phase, timeout: Duration) -> bool {
        if self.is_set(phase) {
            return true;
        }
        with_timeout(timeout, self.until_set(phase)).await.is_some()
    }

    /// Blocking form of [`wait`](Self::wait) for synchronous callers.
    pub fn wait_blocking(&self, phase: Phase, timeout: Duration) -> bool {
        futures_lite::future::block_on(self.wait(phase, timeout))
    }

    async fn until_set(&self, phase: Phase) {
        let flag = &self.flags[phase.index()];
        core::future::poll_fn(|cx| {
            if flag.set.load(Ordering::Acquire) {
                return Poll::Ready(());
            }
            flag.waiters.lock(|w| w.borrow_mut().register(cx.waker()));
            // Re-check: the writer may have fired between the load and the
            // registration.
            if flag.set.load(Ordering::Acquire) {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await;
    }

    fn signal(&self, phase: Phase) {
        let flag = &self.flags[phase.index()];
        if !flag.set.swap(true, Ordering::AcqRel) {
            flag.waiters.lock(|w| w.borrow_mut().wake());
        }
    }
}

/// Exclusive right to set one phase flag.
pub struct PhaseWriter {
    signals: Arc<PhaseSignals>,
    phase: Phase,
}

impl PhaseWriter {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Set the flag and wake every waiter.  Idempotent.
    pub fn signal(&self) {
        self.signals.signal(self.phase);
    }
}

impl core::fmt::Debug for PhaseWriter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PhaseWriter")
            .field("phase", &self.phase)
            .field("set", &self.signals.is_set(self.phase))
            .finish()
    }
}
