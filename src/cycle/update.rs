//! Update Gate: the once-per-epoch firmware update check.
//!
//! Runs after `PublishComplete` and after the broker session is closed, so
//! the image download never competes with publish traffic.  Success resets
//! the epoch counter; failure leaves it, so the next full cycle retries.

use log::{error, info, warn};

use crate::app::ports::{StoragePort, UpdatePort};
use crate::cycle::epoch::{Epoch, EpochGate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Not a full cycle, or updates are disabled.
    NotDue,
    /// The update was applied.  `counter_reset` is false if persisting the
    /// reset failed.
    Applied { counter_reset: bool },
    /// The update mechanism reported failure; counter untouched.
    Failed,
}

pub struct UpdateGate<'a> {
    source: &'a str,
}

impl<'a> UpdateGate<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source }
    }

    pub fn check<S: StoragePort, U: UpdatePort>(
        &self,
        epoch: &Epoch,
        gate: &mut EpochGate<S>,
        updater: &mut U,
    ) -> UpdateOutcome {
        if !epoch.update_due {
            return UpdateOutcome::NotDue;
        }

        info!("Update: checking {}", self.source);
        if !updater.apply_update(self.source) {
            warn!("Update: failed, counter left at {}", epoch.counter);
            return UpdateOutcome::Failed;
        }

        match gate.reset() {
            Ok(()) => UpdateOutcome::Applied { counter_reset: true },
            Err(e) => {
                error!("Update: applied but counter reset failed: {}", e);
                UpdateOutcome::Applied { counter_reset: false }
            }
        }
    }
}
