//! Monotonic time source.
//!
//! The engine timestamps liveness and metrics in wrapping `u32`
//! milliseconds.
//!
//! - **`target_os = "espidf"`** — `esp_timer_get_time()`, the ESP-IDF
//!   high-resolution monotonic timer; safe from driver callback context.
//! - **`not(target_os = "espidf")`** — `std::time::Instant` anchored at
//!   first use, for host tests and simulation.

#[cfg(not(target_os = "espidf"))]
static EPOCH: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();

/// Milliseconds on the monotonic clock. Wraps after ~49.7 days; always
/// compare two readings through [`elapsed_ms`], never by subtraction.
#[cfg(target_os = "espidf")]
pub fn now_ms() -> u32 {
    ((unsafe { esp_idf_svc::sys::esp_timer_get_time() }) / 1000) as u32
}

/// Milliseconds on the monotonic clock (host fallback).
#[cfg(not(target_os = "espidf"))]
pub fn now_ms() -> u32 {
    EPOCH
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_millis() as u32
}

/// Wrap-aware distance from `then` to `now`.
pub fn elapsed_ms(now: u32, then: u32) -> u32 {
    now.wrapping_sub(then)
}

/// Whole seconds since the clock anchor (for display columns).
pub fn uptime_secs() -> u32 {
    now_ms() / 1000
}
