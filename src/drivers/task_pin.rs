//! Core-pinned scoped thread spawning for the ESP32 dual-core.
//!
//! Wraps `esp_pthread_set_cfg()` so that the next scoped spawn creates a
//! FreeRTOS task pinned to a specific CPU core with explicit priority and
//! stack size.  On non-ESP targets, falls back to a plain scoped spawn.
//!
//! # ESP-IDF Threading Model
//!
//! ESP-IDF implements `std::thread` via pthreads, which are thin wrappers
//! around FreeRTOS tasks.  `esp_pthread_set_cfg()` sets thread-local
//! configuration that applies to the *next* `pthread_create()` call from
//! the calling thread.  The config→spawn pair must not be interleaved with
//! other thread creation on the same thread.
//!
//! Spawning is scoped so the poller can borrow the bus and the handoff
//! channel from the cycle's stack frame instead of needing `'static` data.

use std::io;
use std::thread::{Builder, Scope, ScopedJoinHandle};

/// CPU core a spawned task is pinned to.  Core 0 (PRO_CPU) belongs to the
/// protocol stacks (WiFi, lwIP, MQTT) and is never a spawn target here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Core {
    /// Core 1 (APP_CPU): field-bus polling.
    App = 1,
}

/// Placement of a spawned task.
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    /// Null-terminated task name (e.g. `"poller\0"`).
    pub name: &'static str,
    pub core: Core,
    pub priority: u8,
    pub stack_kb: usize,
}

impl TaskSpec {
    fn display_name(&self) -> &'static str {
        self.name.trim_end_matches('\0')
    }
}

/// Spawn a scoped thread pinned to `spec.core`.
///
/// Returns the spawn error instead of panicking so the caller can fall back
/// to running the work inline.
#[cfg(target_os = "espidf")]
pub fn spawn_scoped_on_core<'scope, 'env, T, F>(
    scope: &'scope Scope<'scope, 'env>,
    spec: TaskSpec,
    f: F,
) -> io::Result<ScopedJoinHandle<'scope, T>>
where
    F: FnOnce() -> T + Send + 'scope,
    T: Send + 'scope,
{
    // SAFETY: plain FFI calls on a config struct we own; `spec.name` is a
    // 'static null-terminated string so the pointer outlives the thread.
    let ret = unsafe {
        let mut cfg = esp_idf_sys::esp_create_default_pthread_config();
        cfg.pin_to_core = spec.core as i32;
        cfg.prio = i32::from(spec.priority);
        cfg.stack_size = (spec.stack_kb * 1024) as i32;
        cfg.thread_name = spec.name.as_ptr() as *const _;
        esp_idf_sys::esp_pthread_set_cfg(&cfg)
    };
    if ret != esp_idf_sys::ESP_OK as i32 {
        return Err(io::Error::other(format!("esp_pthread_set_cfg failed: {ret}")));
    }

    log::info!(
        "Spawning '{}' on {:?} (pri={}, stack={}KB)",
        spec.display_name(),
        spec.core,
        spec.priority,
        spec.stack_kb
    );

    Builder::new()
        .name(spec.display_name().into())
        .spawn_scoped(scope, f)
}

/// Simulation fallback: ignores core affinity and priority.
#[cfg(not(target_os = "espidf"))]
pub fn spawn_scoped_on_core<'scope, 'env, T, F>(
    scope: &'scope Scope<'scope, 'env>,
    spec: TaskSpec,
    f: F,
) -> io::Result<ScopedJoinHandle<'scope, T>>
where
    F: FnOnce() -> T + Send + 'scope,
    T: Send + 'scope,
{
    log::debug!(
        "Spawning '{}' (sim, no core pinning, stack={}KB)",
        spec.display_name(),
        spec.stack_kb
    );

    Builder::new()
        .name(spec.display_name().into())
        .stack_size(spec.stack_kb * 1024)
        .spawn_scoped(scope, f)
}
