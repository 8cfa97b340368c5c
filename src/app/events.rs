//! Outbound cycle events.
//!
//! The [`DutyCycle`](super::service::DutyCycle) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other side
//! decide what to do with them, e.g. log to serial or record in tests.

use crate::cycle::CycleState;
use crate::cycle::epoch::Epoch;
use crate::cycle::poller::PollStats;
use crate::cycle::publisher::PublishStats;
use crate::cycle::update::UpdateOutcome;

/// Structured events emitted by the cycle core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleEvent {
    /// A cycle started with this epoch decision.
    Started(Epoch),

    /// The top-level state machine moved.
    StateChanged { from: CycleState, to: CycleState },

    /// Network bring-up failed or readiness did not arrive in time.
    NetworkUnavailable,

    /// The broker session could not be opened; publishes will fail.
    BrokerUnavailable,

    /// The poller could not get its own thread and ran inline.
    PollerInline,

    /// The poller finished its sweep.
    PollFinished(PollStats),

    /// The publish phase finished.
    PublishFinished(PublishStats),

    /// Result of the update check.
    Update(UpdateOutcome),

    /// About to suspend.
    Sleeping { secs: u32 },

    /// Deep sleep was refused; falling back to delay + restart.
    SleepFailed,
}
