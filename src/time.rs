//! Timeout helpers shared by the cycle primitives.
//!
//! Timers come from the `async-io-mini` reactor (select-based, no
//! busy-spinning on the ESP32); futures are raced with `futures-lite`.
//! `std::time::Instant` is monotonic on both ESP-IDF and the host.

use core::future::Future;
use core::time::Duration;
use std::time::Instant;

/// Run `fut` until it completes or `timeout` elapses.
///
/// `fut` is polled first, so a result that is ready at the same instant the
/// timer fires still wins.
pub async fn with_timeout<F: Future>(timeout: Duration, fut: F) -> Option<F::Output> {
    futures_lite::future::or(async { Some(fut.await) }, async {
        async_io_mini::Timer::after(timeout).await;
        None
    })
    .await
}

/// A fixed point in time after which a phase gives up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Time left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}
