//! Platform glue: thread pinning and the monotonic clock.

pub mod task_pin;
pub mod time;
