//! Engine configuration.
//!
//! `LinkConfig` carries every tunable the engine core reads: queuing mode,
//! heartbeat cadence, liveness timeout, receive wait, and the metrics
//! display interval. Radio-level knobs (channel, TX power, socket endpoints)
//! live in the per-backend config types next to each backend.

use serde::{Deserialize, Serialize};

/// Queuing policy for both directions of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkMode {
    /// Bounded multi-slot queues, enqueue-or-fail on send, oldest-evict on
    /// inbound overflow. Favors delivery over latency.
    #[default]
    Reliable,
    /// Single-slot overwrite queues, latest value wins. Favors bounded
    /// latency over completeness.
    Fast,
}

/// Engine tunables. Defaults: 100 ms heartbeat, 3x timeout, 5 ms
/// receive wait, 1 s metrics rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Queuing policy (see [`LinkMode`]).
    pub mode: LinkMode,

    // --- Liveness timing ---
    /// Heartbeat tick period. Each tick sends one heartbeat message and
    /// runs the liveness check.
    pub heartbeat_interval_ms: u32,
    /// Silence longer than this downgrades Connected → Disconnected.
    pub heartbeat_timeout_ms: u32,

    // --- Application-facing waits ---
    /// Upper bound on how long `recv_msg`/`recv_data` wait for a message.
    pub recv_timeout_ms: u32,

    // --- Presentation ---
    /// Period of the formatted metrics table when display is enabled.
    pub metrics_display_interval_ms: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mode: LinkMode::Reliable,
            heartbeat_interval_ms: 100,
            heartbeat_timeout_ms: 300,
            recv_timeout_ms: 5,
            metrics_display_interval_ms: 1000,
        }
    }
}

impl LinkConfig {
    /// Sanity-check the timing relations. Called at engine construction.
    pub fn validate(&self) -> core::result::Result<(), &'static str> {
        if self.heartbeat_interval_ms == 0 {
            return Err("heartbeat interval must be non-zero");
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err("heartbeat timeout must exceed the interval");
        }
        if self.metrics_display_interval_ms == 0 {
            return Err("metrics display interval must be non-zero");
        }
        Ok(())
    }
}
