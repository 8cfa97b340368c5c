//! Runtime symbol providers for third-party crates.
//!
//! `async-io-mini` timers resolve their clock and wake scheduling through
//! the `embassy-time-driver` link-time hooks (`_embassy_time_now`,
//! `_embassy_time_schedule_wake`).  Ticks are microseconds (the driver's
//! default 1 MHz rate): `esp_timer_get_time` on the device, a process-local
//! monotonic clock on the host.  Wakes are served by one lazily started
//! thread on both targets.
//!
//! On the device this module also registers the `critical-section`
//! implementation, a re-entrant std mutex.  Host builds get theirs from
//! `critical-section`'s `std` feature.

use core::task::Waker;
use core::time::Duration;
use std::sync::{Condvar, Mutex, MutexGuard, Once, PoisonError};
use std::thread;

#[cfg(target_os = "espidf")]
use core::cell::{Cell, RefCell};
#[cfg(target_os = "espidf")]
use critical_section::RawRestoreState;

// ── Critical section (device) ─────────────────────────────────

#[cfg(target_os = "espidf")]
static CRITICAL_SECTION_MUTEX: Mutex<()> = Mutex::new(());

#[cfg(target_os = "espidf")]
thread_local! {
    static CRITICAL_SECTION_DEPTH: Cell<u8> = const { Cell::new(0) };
    static CRITICAL_SECTION_GUARD: RefCell<Option<MutexGuard<'static, ()>>> = const { RefCell::new(None) };
}

/// Re-entrant per thread, exclusive across threads.
#[cfg(target_os = "espidf")]
struct StdCriticalSection;

#[cfg(target_os = "espidf")]
critical_section::set_impl!(StdCriticalSection);

#[cfg(target_os = "espidf")]
unsafe impl critical_section::Impl for StdCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        CRITICAL_SECTION_DEPTH.with(|depth| {
            let d = depth.get();
            if d == 0 {
                let lock = CRITICAL_SECTION_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
                CRITICAL_SECTION_GUARD.with(|guard| *guard.borrow_mut() = Some(lock));
            }
            depth.set(d.saturating_add(1));
        });
        <RawRestoreState as Default>::default()
    }

    unsafe fn release(_restore_state: RawRestoreState) {
        CRITICAL_SECTION_DEPTH.with(|depth| {
            let d = depth.get();
            if d == 0 {
                return;
            }
            depth.set(d - 1);
            if d == 1 {
                CRITICAL_SECTION_GUARD.with(|guard| *guard.borrow_mut() = None);
            }
        });
    }
}

// ── Clock ─────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
fn now_ticks() -> u64 {
    // SAFETY: reads the monotonic high-resolution timer; no preconditions.
    unsafe { esp_idf_svc::sys::esp_timer_get_time() as u64 }
}

#[cfg(not(target_os = "espidf"))]
fn now_ticks() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_micros() as u64
}

#[unsafe(no_mangle)]
pub fn _embassy_time_now() -> u64 {
    now_ticks()
}

// ── Wake scheduling ───────────────────────────────────────────

/// Pending `(deadline tick, waker)` pairs, one per waker.
static WAKE_QUEUE: Mutex<Vec<(u64, Waker)>> = Mutex::new(Vec::new());
static WAKE_SIGNAL: Condvar = Condvar::new();
static WAKE_THREAD: Once = Once::new();

/// Stack of the wake thread; it only moves wakers around.
const WAKE_STACK: usize = 4 * 1024;

fn wake_queue() -> MutexGuard<'static, Vec<(u64, Waker)>> {
    WAKE_QUEUE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wake `waker` at or after tick `at`.
#[unsafe(no_mangle)]
pub fn _embassy_time_schedule_wake(at: u64, waker: &Waker) {
    let mut running = true;
    WAKE_THREAD.call_once(|| {
        if let Err(e) = thread::Builder::new()
            .name("time-wake".into())
            .stack_size(WAKE_STACK)
            .spawn(serve_wakes)
        {
            log::error!("Timer: wake thread spawn failed: {}", e);
            running = false;
        }
    });
    if !running {
        // Nothing will serve the queue; an early wake makes the timer re-poll.
        waker.wake_by_ref();
        return;
    }

    let mut queue = wake_queue();
    match queue.iter_mut().find(|(_, w)| w.will_wake(waker)) {
        Some(entry) => entry.0 = entry.0.min(at),
        None => queue.push((at, waker.clone())),
    }
    drop(queue);
    WAKE_SIGNAL.notify_one();
}

fn serve_wakes() {
    let mut queue = wake_queue();
    loop {
        let now = now_ticks();
        let mut due = Vec::new();
        queue.retain(|(at, waker)| {
            if *at <= now {
                due.push(waker.clone());
                false
            } else {
                true
            }
        });

        if !due.is_empty() {
            drop(queue);
            due.into_iter().for_each(Waker::wake);
            queue = wake_queue();
            continue;
        }

        queue = match queue.iter().map(|(at, _)| *at).min() {
            Some(next) => {
                WAKE_SIGNAL
                    .wait_timeout(queue, Duration::from_micros(next - now))
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => WAKE_SIGNAL.wait(queue).unwrap_or_else(PoisonError::into_inner),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn clock_is_monotonic_microseconds() {
        let a = _embassy_time_now();
        thread::sleep(Duration::from_millis(5));
        let b = _embassy_time_now();
        assert!(b - a >= 5_000);
    }

    #[test]
    fn timer_fires_through_the_wake_thread() {
        let started = Instant::now();
        futures_lite::future::block_on(async_io_mini::Timer::after(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn concurrent_timers_each_fire() {
        let handles: Vec<_> = (1..=4u64)
            .map(|i| {
                thread::spawn(move || {
                    let started = Instant::now();
                    futures_lite::future::block_on(async_io_mini::Timer::after(Duration::from_millis(5 * i)));
                    started.elapsed() >= Duration::from_millis(5 * i)
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
    }
}
