//! Per-direction link metrics.
//!
//! Each direction (send, receive) owns one [`LinkMetrics`]: cumulative
//! success/failure counters plus a trailing activity window for a throughput
//! figure that reacts to load changes within seconds instead of averaging
//! since boot. Everything is relaxed atomics — each direction has a single
//! writer and the counts are approximate by design, so no lock is needed and
//! recording is safe from driver callback context.
//!
//! A process-wide switch turns every update into a no-op without touching
//! call sites; presentation (the periodic table) lives with the engine
//! worker, not here.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Trailing window geometry: 50 slots of 100 ms ≈ 5 s.
pub const WINDOW_SLOTS: usize = 50;
const SLOT_MS: u32 = 100;
const WINDOW_SECS: f32 = (WINDOW_SLOTS as u32 * SLOT_MS) as f32 / 1000.0;

static METRICS_ENABLED: AtomicBool = AtomicBool::new(true);

/// Process-wide metrics switch (default on). When off, all updates no-op.
pub fn set_enabled(enable: bool) {
    METRICS_ENABLED.store(enable, Ordering::Relaxed);
}

/// Current state of the process-wide switch.
pub fn enabled() -> bool {
    METRICS_ENABLED.load(Ordering::Relaxed)
}

/// Success/failure counters with a trailing activity window.
pub struct LinkMetrics {
    ok: AtomicU32,
    err: AtomicU32,
    // Ring of per-slot delivery counts. `epochs[i]` records which absolute
    // 100 ms slot the count in `slots[i]` belongs to, so stale slots are
    // recognized without a sweeper task.
    slots: [AtomicU32; WINDOW_SLOTS],
    epochs: [AtomicU32; WINDOW_SLOTS],
}

/// Point-in-time copy handed to applications and the display.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetricsSnapshot {
    /// Cumulative successes since construction or the last reset.
    pub success: u32,
    /// Cumulative failures since construction or the last reset.
    pub failure: u32,
    /// Success percentage over both counters; 0 when nothing recorded.
    pub success_rate: f32,
    /// Successful transactions per second over the trailing window.
    pub per_second: f32,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self {
            ok: AtomicU32::new(0),
            err: AtomicU32::new(0),
            slots: core::array::from_fn(|_| AtomicU32::new(0)),
            epochs: core::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    /// Record one delivered transaction at `now_ms`.
    pub fn add_success(&self, now_ms: u32) {
        if !enabled() {
            return;
        }
        self.ok.fetch_add(1, Ordering::Relaxed);
        let epoch = now_ms / SLOT_MS;
        let idx = (epoch as usize) % WINDOW_SLOTS;
        if self.epochs[idx].swap(epoch, Ordering::Relaxed) == epoch {
            self.slots[idx].fetch_add(1, Ordering::Relaxed);
        } else {
            // Slot last used a full window ago; restart its count.
            self.slots[idx].store(1, Ordering::Relaxed);
        }
    }

    /// Record one failed transaction.
    pub fn add_failure(&self) {
        if !enabled() {
            return;
        }
        self.err.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero the counters and the activity window.
    pub fn reset(&self) {
        self.ok.store(0, Ordering::Relaxed);
        self.err.store(0, Ordering::Relaxed);
        for i in 0..WINDOW_SLOTS {
            self.slots[i].store(0, Ordering::Relaxed);
            self.epochs[i].store(0, Ordering::Relaxed);
        }
    }

    /// Snapshot the counters and the windowed rate as of `now_ms`.
    pub fn snapshot(&self, now_ms: u32) -> MetricsSnapshot {
        let ok = self.ok.load(Ordering::Relaxed);
        let err = self.err.load(Ordering::Relaxed);
        let total = ok.saturating_add(err);
        let success_rate = if total == 0 {
            0.0
        } else {
            100.0 * ok as f32 / total as f32
        };
        MetricsSnapshot {
            success: ok,
            failure: err,
            success_rate,
            per_second: self.windowed_count(now_ms) as f32 / WINDOW_SECS,
        }
    }

    fn windowed_count(&self, now_ms: u32) -> u32 {
        let current = now_ms / SLOT_MS;
        let floor = current.saturating_sub(WINDOW_SLOTS as u32 - 1);
        let mut total = 0u32;
        for i in 0..WINDOW_SLOTS {
            let epoch = self.epochs[i].load(Ordering::Relaxed);
            if epoch >= floor && epoch <= current {
                total = total.saturating_add(self.slots[i].load(Ordering::Relaxed));
            }
        }
        total
    }
}

impl Default for LinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}
