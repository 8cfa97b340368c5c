//! Duty-cycle primitives: the epoch gate, phase signals, the handoff
//! channel, and the two sides of a cycle (poller and publisher).
//!
//! ```text
//!   BOOT ─▶ AWAIT_NETWORK ──timeout──────────────────────────────┐
//!              │ NetworkReady                                     │
//!              ▼                                                  ▼
//!             RUN ─▶ PUBLISH_LOOP ─▶ DISCONNECT ─▶ UPDATE_CHECK ─▶ SLEEP
//!           (poller                    (full cycle only)
//!          spawned)
//! ```

pub mod epoch;
pub mod handoff;
pub mod phase;
pub mod poller;
pub mod publisher;
pub mod update;

/// Top-level states of one wake cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Boot,
    AwaitNetwork,
    Run,
    PublishLoop,
    Disconnect,
    UpdateCheck,
    Sleep,
}

impl CycleState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Boot => "BOOT",
            Self::AwaitNetwork => "AWAIT_NETWORK",
            Self::Run => "RUN",
            Self::PublishLoop => "PUBLISH_LOOP",
            Self::Disconnect => "DISCONNECT",
            Self::UpdateCheck => "UPDATE_CHECK",
            Self::Sleep => "SLEEP",
        }
    }
}

impl core::fmt::Display for CycleState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
