//! Power management: wake-reason detection and timed deep sleep.
//!
//! ```text
//!  cycle done ──▶ deep_sleep(T) ──ok──▶ (chip off, wakes into main)
//!                     │
//!                     └─refused──▶ delay(restart_delay) ──▶ restart()
//! ```
//!
//! The blocking delay comes from an `embedded_hal::delay::DelayNs`
//! implementation (`FreeRtos` on the device, `std::thread::sleep` on the
//! host).

use core::time::Duration;

use embedded_hal::delay::DelayNs;
use log::{info, warn};

use crate::app::ports::PowerPort;
use crate::error::PowerError;

/// Why the chip is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Cold boot, reset button, brown-out or software restart.
    PowerOn,
    /// The deep-sleep timer expired.
    Timer,
    /// Any other wake source (raw ESP-IDF cause).
    Other(u32),
}

impl core::fmt::Display for WakeReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::PowerOn => write!(f, "power-on"),
            Self::Timer => write!(f, "timer"),
            Self::Other(cause) => write!(f, "cause {}", cause),
        }
    }
}

/// Blocking delay for host builds.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

#[cfg(not(target_os = "espidf"))]
impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

pub struct PowerManager<D: DelayNs> {
    delay: D,
    #[cfg(not(target_os = "espidf"))]
    sleep_requests: Vec<Duration>,
    #[cfg(not(target_os = "espidf"))]
    restarts: u32,
}

impl<D: DelayNs> PowerManager<D> {
    pub fn new(delay: D) -> Self {
        Self {
            delay,
            #[cfg(not(target_os = "espidf"))]
            sleep_requests: Vec::new(),
            #[cfg(not(target_os = "espidf"))]
            restarts: 0,
        }
    }

    /// Read the wake cause recorded by the ROM.
    #[cfg(target_os = "espidf")]
    pub fn wake_reason(&self) -> WakeReason {
        use esp_idf_svc::sys::{
            esp_sleep_get_wakeup_cause, esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER,
            esp_sleep_source_t_ESP_SLEEP_WAKEUP_UNDEFINED,
        };

        // SAFETY: reads a value latched at boot; no preconditions.
        let cause = unsafe { esp_sleep_get_wakeup_cause() };
        #[allow(non_upper_case_globals)]
        match cause {
            esp_sleep_source_t_ESP_SLEEP_WAKEUP_UNDEFINED => WakeReason::PowerOn,
            esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER => WakeReason::Timer,
            other => WakeReason::Other(other),
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn wake_reason(&self) -> WakeReason {
        WakeReason::PowerOn
    }
}

#[cfg(not(target_os = "espidf"))]
impl<D: DelayNs> PowerManager<D> {
    /// Deep-sleep durations requested so far.
    pub fn sleep_requests(&self) -> &[Duration] {
        &self.sleep_requests
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }
}

impl<D: DelayNs> PowerPort for PowerManager<D> {
    #[cfg(target_os = "espidf")]
    fn deep_sleep(&mut self, duration: Duration) -> PowerError {
        let us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        info!("Power: deep sleep for {:?}", duration);
        // SAFETY: on success the chip powers down and this call never returns.
        let err = unsafe { esp_idf_svc::sys::esp_deep_sleep_try(us) };
        warn!("Power: deep sleep rejected (err {})", err);
        PowerError::SleepRejected(err)
    }

    #[cfg(not(target_os = "espidf"))]
    fn deep_sleep(&mut self, duration: Duration) -> PowerError {
        info!("Power(sim): deep sleep for {:?} not available", duration);
        self.sleep_requests.push(duration);
        PowerError::Unsupported
    }

    fn delay(&mut self, duration: Duration) {
        let ms = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
        self.delay.delay_ms(ms);
    }

    #[cfg(target_os = "espidf")]
    fn restart(&mut self) {
        info!("Power: restarting");
        // SAFETY: never returns.
        unsafe { esp_idf_svc::sys::esp_restart() }
    }

    #[cfg(not(target_os = "espidf"))]
    fn restart(&mut self) {
        warn!("Power(sim): restart requested");
        self.restarts += 1;
    }
}
