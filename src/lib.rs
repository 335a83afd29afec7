//! Remote-control link engine library.
//!
//! Connects two microcontrollers with a fixed-layout 32-byte frame,
//! bounded send/receive queues with fast and reliable delivery
//! policies, heartbeat liveness tracking, and pluggable radio backends
//! behind the [`transport::Transport`] trait. All ESP-IDF-specific
//! code is guarded by `#[cfg(target_os = "espidf")]` within each
//! module, so the complete link logic builds and tests on the host.

#![deny(unused_must_use)]

pub mod addr;
pub mod config;
pub mod error;
pub mod link;
pub mod metrics;
pub mod transport;
pub mod wire;

// Platform plumbing (pinned task spawning, the millisecond clock).
pub mod drivers;
