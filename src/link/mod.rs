//! The remote-control link: state machine, queue pipeline, worker.
//!
//! ```text
//!   application thread              worker thread            radio driver
//!  ┌──────────────────┐      ┌───────────────────────┐     ┌───────────┐
//!  │ send_data ───────┼──►───┤ outbound ──► drain ───┼──►──┤ transport │
//!  │ recv_data ◄──────┼──◄───┤ inbound                │     │  .send    │
//!  │ connect / state  │      │ heartbeat + liveness   │     └─────┬─────┘
//!  └──────────────────┘      │ metrics table          │           │ rx
//!                            └───────────▲────────────┘           ▼
//!                                        │                  ┌───────────┐
//!                                        └───── LinkHook ◄──┤ rx glue   │
//!                                          on_message       └───────────┘
//! ```
//!
//! Three execution contexts touch one link core: the application
//! through [`LinkEngine`], the per-engine worker thread, and the radio
//! driver's receive context through [`LinkHook`]. The core keeps those
//! honest — atomics for the hot state, bounded queues between contexts,
//! and a short critical-section lock for the rest.

mod core;
mod engine;
pub mod queue;
mod worker;

pub use self::core::{ConnectionState, LinkHook};
pub use self::engine::LinkEngine;
pub use self::queue::{EnqueueOutcome, MessageQueue, QUEUE_DEPTH};

// Backend unit tests build a bare core to drive their receive glue.
pub(crate) use self::core::LinkCore;
