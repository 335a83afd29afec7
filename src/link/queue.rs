//! Bounded message queues.
//!
//! Both directions of the link pipeline buffer through a fixed-depth
//! FIFO backed by [`embassy_sync::channel::Channel`]. All push variants
//! are non-blocking and callable from driver callback context; the
//! waker embedded in the channel doubles as the worker's wake signal,
//! so a successful push is also the "queue has work" notification.
//!
//! Overflow policy is the caller's choice per push:
//! - [`MessageQueue::try_push`] refuses when full (outbound reliable),
//! - [`MessageQueue::push_evict_oldest`] drops the oldest entry to make
//!   room (inbound reliable),
//! - [`MessageQueue::push_overwrite`] clears everything first (fast
//!   mode, latest-value-wins).

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};

use crate::drivers::time;
use crate::wire::Message;

/// Default queue depth for reliable mode.
pub const QUEUE_DEPTH: usize = 10;

/// What happened to a message offered with eviction enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Stored without displacing anything.
    Stored,
    /// Stored, but the oldest queued message was dropped to make room.
    StoredAfterEvict,
    /// Not stored; the retry after eviction also found the queue full.
    Dropped,
}

impl EnqueueOutcome {
    /// True when the offered message made it into the queue.
    pub fn stored(self) -> bool {
        !matches!(self, EnqueueOutcome::Dropped)
    }
}

/// Fixed-depth FIFO of wire messages, shareable across threads.
pub struct MessageQueue<const N: usize = QUEUE_DEPTH> {
    inner: Channel<CriticalSectionRawMutex, Message, N>,
}

impl<const N: usize> MessageQueue<N> {
    pub const fn new() -> Self {
        Self {
            inner: Channel::new(),
        }
    }

    /// Enqueue without displacing anything. Returns `false` when full.
    pub fn try_push(&self, msg: Message) -> bool {
        self.inner.try_send(msg).is_ok()
    }

    /// Enqueue, evicting the oldest entry if the queue is full.
    ///
    /// The retry after eviction can still lose a race against another
    /// producer; that surfaces as [`EnqueueOutcome::Dropped`] rather
    /// than looping in callback context.
    pub fn push_evict_oldest(&self, msg: Message) -> EnqueueOutcome {
        match self.inner.try_send(msg) {
            Ok(()) => EnqueueOutcome::Stored,
            Err(TrySendError::Full(msg)) => {
                let _ = self.inner.try_receive();
                match self.inner.try_send(msg) {
                    Ok(()) => EnqueueOutcome::StoredAfterEvict,
                    Err(TrySendError::Full(_)) => EnqueueOutcome::Dropped,
                }
            }
        }
    }

    /// Replace the entire queue contents with `msg` (latest-value-wins).
    pub fn push_overwrite(&self, msg: Message) {
        let mut msg = msg;
        loop {
            while self.inner.try_receive().is_ok() {}
            match self.inner.try_send(msg) {
                Ok(()) => return,
                // A concurrent producer refilled the slot; clear again.
                Err(TrySendError::Full(m)) => msg = m,
            }
        }
    }

    /// Dequeue the oldest message, if any.
    pub fn try_pop(&self) -> Option<Message> {
        self.inner.try_receive().ok()
    }

    /// Dequeue, waiting up to `timeout_ms` for a message to arrive.
    ///
    /// Polls at millisecond granularity; a timeout of 0 degrades to a
    /// single [`Self::try_pop`].
    pub fn pop_timeout(&self, timeout_ms: u32) -> Option<Message> {
        let start = time::now_ms();
        loop {
            if let Some(msg) = self.try_pop() {
                return Some(msg);
            }
            if time::elapsed_ms(time::now_ms(), start) >= timeout_ms {
                return None;
            }
            std::thread::sleep(core::time::Duration::from_millis(1));
        }
    }

    /// Dequeue, suspending the calling task until a message arrives.
    pub async fn pop_wait(&self) -> Message {
        self.inner.receive().await
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for MessageQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
