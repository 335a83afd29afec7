//! Unified error types for the link engine.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! application's error handling uniform. All variants are `Copy` so they can
//! be cheaply passed across task boundaries without allocation. Liveness
//! loss and malformed frames are *not* errors — they surface as observable
//! state and absent messages; this type covers construction-time failures
//! plus sends the engine refuses to queue.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A radio backend failed to initialize or perform a driver operation.
    Transport(TransportError),
    /// Configuration is invalid.
    Config(&'static str),
    /// The engine declined to queue a send (backlog full, or the link is
    /// in the terminal error state). Never blocks, never silently drops.
    SendRefused(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::SendRefused(msg) => write!(f, "send refused: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Failures reported by a radio backend.
///
/// There is no degraded mode without a working radio, so these normally
/// surface once, from engine construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Driver bring-up failed (radio init, socket bind, callback hookup).
    InitFailed(&'static str),
    /// The requested backend is not compiled into this build.
    Unavailable(&'static str),
    /// A driver call failed after the backend's own bounded retry.
    DriverFault(&'static str),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitFailed(msg) => write!(f, "init failed: {msg}"),
            Self::Unavailable(msg) => write!(f, "backend unavailable: {msg}"),
            Self::DriverFault(msg) => write!(f, "driver fault: {msg}"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
