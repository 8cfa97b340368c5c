//! Epoch Gate: the persisted wake counter that decides full cycles.
//!
//! ```text
//!   boot ─▶ advance(): get ─▶ +1 ─▶ set ─▶ commit ─▶ Epoch { counter, full_cycle, update_due }
//!   successful update ─▶ reset(): set 0 ─▶ commit
//! ```
//!
//! The counter is committed before [`EpochGate::advance`] returns, so a power
//! loss after boot can never replay the same epoch's full-cycle decision.
//! Storage failures are returned, never defaulted: the caller treats them as
//! fatal.

use log::{debug, info};

use crate::app::ports::StoragePort;
use crate::error::{self, StorageError};

/// NVS key of the counter inside the application namespace.
pub const COUNTER_KEY: &str = "restart_counter";

/// Decision for the current wake cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epoch {
    /// Counter value after this cycle's increment.
    pub counter: u32,
    /// Republish metadata this cycle.
    pub full_cycle: bool,
    /// Run the update check after disconnect.
    pub update_due: bool,
}

/// `counter mod period == 1`.  A zero period never yields a full cycle.
pub fn is_full_cycle(counter: u32, period: u32) -> bool {
    counter.checked_rem(period) == Some(1)
}

pub struct EpochGate<S: StoragePort> {
    storage: S,
    period: u32,
    updates_enabled: bool,
}

impl<S: StoragePort> EpochGate<S> {
    pub fn new(storage: S, period: u32, updates_enabled: bool) -> Self {
        Self {
            storage,
            period,
            updates_enabled,
        }
    }

    /// Increment and persist the counter, then derive this cycle's flags.
    ///
    /// The stored value is an `i32`; it is read and written as the same 32
    /// bits of a `u32` so the count wraps instead of going negative.
    pub fn advance(&mut self) -> error::Result<Epoch> {
        let current = match self.storage.get_i32(COUNTER_KEY) {
            Ok(v) => v as u32,
            Err(StorageError::NotFound) => {
                info!("Epoch: no counter stored, starting from 0");
                0
            }
            Err(e) => return Err(e.into()),
        };

        let counter = current.wrapping_add(1);
        self.storage.set_i32(COUNTER_KEY, counter as i32)?;
        self.storage.commit()?;

        let full_cycle = is_full_cycle(counter, self.period);
        let epoch = Epoch {
            counter,
            full_cycle,
            update_due: full_cycle && self.updates_enabled,
        };
        debug!("Epoch: {} -> {} ({:?})", current, counter, epoch);
        Ok(epoch)
    }

    /// Persist zero.  Only called after a verified update.
    pub fn reset(&mut self) -> error::Result<()> {
        self.storage.set_i32(COUNTER_KEY, 0)?;
        self.storage.commit()?;
        info!("Epoch: counter reset");
        Ok(())
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }
}
