//! Core-pinned thread spawning.
//!
//! The link worker runs on its own OS thread so queue draining and
//! heartbeating never contend with the caller. On ESP-IDF a plain
//! `std::thread::spawn` inherits the default pthread affinity; radio
//! traffic behaves much better when the worker is pinned away from the
//! WiFi/BT stack, so this module routes thread creation through
//! `esp_pthread` with an explicit core, priority and stack size. On the
//! host it degrades to a named `std::thread` with the same stack size.
//!
//! `esp_pthread_set_cfg()` is thread-local and applies to the *next*
//! `pthread_create()` from the calling thread, so the config→spawn pair
//! must not be interleaved with other thread creation.

use crate::error::{Error, Result, TransportError};

/// Physical core selector for the dual-core ESP32 family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Core {
    /// PRO_CPU (core 0). The WiFi/BT protocol stacks live here.
    Pro = 0,
    /// APP_CPU (core 1). Preferred home for the link worker.
    App = 1,
}

/// Spawn `f` on a dedicated thread pinned to `core`.
///
/// `name` must be NUL-terminated (`"rc-link\0"`); ESP-IDF wants a C
/// string and this avoids allocating one. `priority` and `core` map
/// onto the FreeRTOS task underneath on device and are ignored on the
/// host; `stack_kib` is honored on both.
#[cfg(target_os = "espidf")]
pub fn spawn_pinned<F>(
    core: Core,
    priority: u8,
    stack_kib: usize,
    name: &'static str,
    f: F,
) -> Result<std::thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    use esp_idf_svc::sys;

    debug_assert!(name.ends_with('\0'), "thread name must be NUL-terminated");

    // Start from the IDF default config so only the fields we care
    // about are overridden; the struct layout varies across IDF
    // releases.
    let err = unsafe {
        let mut cfg = sys::esp_create_default_pthread_config();
        cfg.pin_to_core = core as i32;
        cfg.prio = priority as _;
        cfg.stack_size = (stack_kib * 1024) as _;
        cfg.thread_name = name.as_ptr() as *const _;
        sys::esp_pthread_set_cfg(&cfg)
    };
    if err != sys::ESP_OK {
        return Err(Error::Transport(TransportError::InitFailed(
            "esp_pthread_set_cfg rejected worker config",
        )));
    }

    std::thread::Builder::new()
        .stack_size(stack_kib * 1024)
        .spawn(f)
        .map_err(|_| Error::Transport(TransportError::InitFailed("worker thread spawn failed")))
}

/// Host fallback: a named thread, no affinity.
#[cfg(not(target_os = "espidf"))]
pub fn spawn_pinned<F>(
    _core: Core,
    _priority: u8,
    stack_kib: usize,
    name: &'static str,
    f: F,
) -> Result<std::thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.trim_end_matches('\0').to_string())
        .stack_size(stack_kib * 1024)
        .spawn(f)
        .map_err(|_| Error::Transport(TransportError::InitFailed("worker thread spawn failed")))
}
