//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing cycle events to the ESP-IDF logger
//! (UART / USB-CDC in production).  Lines start with a fixed tag so a
//! serial capture can be grepped per phase.

use log::{info, warn};

use crate::app::events::CycleEvent;
use crate::app::ports::EventSink;
use crate::cycle::update::UpdateOutcome;

/// Adapter that logs every [`CycleEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &CycleEvent) {
        match event {
            CycleEvent::Started(epoch) => {
                info!(
                    "BOOT | counter={} full_cycle={} update_due={}",
                    epoch.counter, epoch.full_cycle, epoch.update_due
                );
            }
            CycleEvent::StateChanged { from, to } => {
                info!("STATE | {} -> {}", from, to);
            }
            CycleEvent::NetworkUnavailable => {
                warn!("STATE | network not ready, skipping to sleep");
            }
            CycleEvent::BrokerUnavailable => {
                warn!("PUBLISH | broker unavailable");
            }
            CycleEvent::PollerInline => {
                warn!("POLL | no worker thread, polling inline");
            }
            CycleEvent::PollFinished(s) => {
                info!("POLL | read={} failed={} dropped={}", s.read, s.failed, s.dropped);
            }
            CycleEvent::PublishFinished(s) => {
                info!(
                    "PUBLISH | values={} attributes={} failures={} deadline={} terminal={}",
                    s.values, s.attributes, s.failures, s.deadline_hit, s.terminal_sent
                );
            }
            CycleEvent::Update(outcome) => match outcome {
                UpdateOutcome::NotDue => {}
                UpdateOutcome::Applied { counter_reset } => {
                    info!("UPDATE | applied, counter_reset={}", counter_reset);
                }
                UpdateOutcome::Failed => warn!("UPDATE | failed"),
            },
            CycleEvent::Sleeping { secs } => {
                info!("SLEEP | {} s", secs);
            }
            CycleEvent::SleepFailed => {
                warn!("SLEEP | refused, restarting after delay");
            }
        }
    }
}
