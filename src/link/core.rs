//! Connection core: state machine, liveness tracking, the two queue
//! pipelines, and callback routing.
//!
//! [`LinkCore`] is the hub every other piece hangs off. The application
//! talks to it through [`crate::link::LinkEngine`], the worker drains it,
//! and radio backends feed it through [`LinkHook`]. Hot shared state
//! (connection state, last-receipt stamp) is plain relaxed atomics; cold
//! shared state (peer identity, registered callbacks) sits behind a short
//! critical-section lock that is never held across a driver call or user
//! callback.
//!
//! Backends call the hook from driver receive context, so everything
//! reachable from [`LinkHook`] is non-blocking: queue pushes are bounded,
//! callbacks are cloned out of the lock before invocation, and peer-table
//! changes are deferred to the worker instead of touching the driver
//! inline.

use core::cell::RefCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::{error, info, warn};

use crate::addr::{Address, DiscoveryResult};
use crate::config::{LinkConfig, LinkMode};
use crate::drivers::time;
use crate::error::{Error, Result};
use crate::link::queue::{EnqueueOutcome, MessageQueue, QUEUE_DEPTH};
use crate::metrics::{LinkMetrics, MetricsSnapshot};
use crate::wire::{Message, MessageKind, Payload, WIRE_ADDR_LEN};

// ── Connection state ────────────────────────────────────────────────────

/// Link lifecycle. Stored as a `u8` atomic inside [`LinkCore`].
///
/// `Error` is terminal: it records an unrecoverable backend failure and no
/// transition leaves it. The only recovery is rebuilding the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No live peer. Either never connected or the peer went silent.
    Disconnected = 0,
    /// `connect()` was called; waiting for the first frame from a peer.
    Connecting = 1,
    /// A peer is live: something was received within the liveness window.
    Connected = 2,
    /// The backend failed fatally. Terminal.
    Error = 3,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Disconnected),
            1 => Some(Self::Connecting),
            2 => Some(Self::Connected),
            3 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Fixed-width column label for the metrics table.
    pub fn abbrev(self) -> &'static str {
        match self {
            Self::Disconnected => "DISC",
            Self::Connecting => "CONN?",
            Self::Connected => "CONN",
            Self::Error => "ERR",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

// ── Shared slots behind the short lock ──────────────────────────────────

type ReceiveFn = dyn Fn(&Message) + Send + Sync;
type DiscoveryFn = dyn Fn(&DiscoveryResult) + Send + Sync;

#[derive(Default)]
struct Handlers {
    on_receive: Option<Arc<ReceiveFn>>,
    on_discovery: Option<Arc<DiscoveryFn>>,
}

/// Driver-side peer-table change the worker still owes the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PeerUpdate {
    /// Register this address with the driver.
    Set(Address),
    /// Drop the driver's current registration.
    Clear,
}

/// Peer identity plus the deferred driver-side update.
///
/// Adoption and loss both happen in contexts where driver calls are off
/// limits (receive callbacks, the liveness check), so the required
/// change parks in `pending` until the worker picks it up before its
/// next transmit.
#[derive(Default)]
struct PeerSlot {
    current: Option<Address>,
    pending: Option<PeerUpdate>,
}

// ── Core ────────────────────────────────────────────────────────────────

/// Shared heart of one link instance.
pub struct LinkCore {
    config: LinkConfig,
    state: AtomicU8,
    /// Monotonic stamp of the most recent frame from the peer, any type.
    last_rx_ms: AtomicU32,
    /// Set once by `connect()`; the worker sends no heartbeats before.
    heartbeats_on: AtomicBool,
    local: BlockingMutex<CriticalSectionRawMutex, RefCell<Address>>,
    peer: BlockingMutex<CriticalSectionRawMutex, RefCell<PeerSlot>>,
    handlers: BlockingMutex<CriticalSectionRawMutex, RefCell<Handlers>>,
    discovery: BlockingMutex<CriticalSectionRawMutex, RefCell<Option<DiscoveryResult>>>,
    outbound: MessageQueue<QUEUE_DEPTH>,
    inbound: MessageQueue<QUEUE_DEPTH>,
    send_metrics: LinkMetrics,
    recv_metrics: LinkMetrics,
    display_on: AtomicBool,
    display_interval_ms: AtomicU32,
    stopping: AtomicBool,
    stop_drain: Signal<CriticalSectionRawMutex, ()>,
    stop_beat: Signal<CriticalSectionRawMutex, ()>,
}

impl LinkCore {
    pub(crate) fn new(config: LinkConfig) -> Self {
        let display_interval = config.metrics_display_interval_ms;
        Self {
            config,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            last_rx_ms: AtomicU32::new(0),
            heartbeats_on: AtomicBool::new(false),
            local: BlockingMutex::new(RefCell::new(Address::default())),
            peer: BlockingMutex::new(RefCell::new(PeerSlot::default())),
            handlers: BlockingMutex::new(RefCell::new(Handlers::default())),
            discovery: BlockingMutex::new(RefCell::new(None)),
            outbound: MessageQueue::new(),
            inbound: MessageQueue::new(),
            send_metrics: LinkMetrics::new(),
            recv_metrics: LinkMetrics::new(),
            display_on: AtomicBool::new(false),
            display_interval_ms: AtomicU32::new(display_interval),
            stopping: AtomicBool::new(false),
            stop_drain: Signal::new(),
            stop_beat: Signal::new(),
        }
    }

    // ── State machine ───────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
            .unwrap_or(ConnectionState::Error)
    }

    /// Unconditional transition, except that `Error` is sticky. Returns
    /// `false` when the error latch blocked the write.
    fn store_state(&self, to: ConnectionState) -> bool {
        let mut prev = self.state.load(Ordering::Relaxed);
        loop {
            if prev == ConnectionState::Error as u8 && to != ConnectionState::Error {
                return false;
            }
            match self.state.compare_exchange_weak(
                prev,
                to as u8,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(old) => {
                    if old != to as u8 {
                        if let Some(from) = ConnectionState::from_u8(old) {
                            info!("link state {from} -> {to}");
                        }
                    }
                    return true;
                }
                Err(observed) => prev = observed,
            }
        }
    }

    /// Single-shot compare-and-swap transition; `true` exactly once per
    /// edge even with concurrent callers.
    fn transition_if(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok();
        if moved {
            info!("link state {from} -> {to}");
        }
        moved
    }

    /// Begin (or restart) connection establishment.
    ///
    /// Arms the periodic heartbeat transmission and moves to
    /// `Connecting`; the next frame from any peer latches `Connected`.
    /// Safe to call repeatedly, and a no-op once the error latch is set.
    pub fn connect(&self) {
        self.heartbeats_on.store(true, Ordering::Relaxed);
        let _ = self.store_state(ConnectionState::Connecting);
    }

    /// Whether `connect()` has armed outgoing heartbeats.
    pub(crate) fn heartbeats_on(&self) -> bool {
        self.heartbeats_on.load(Ordering::Relaxed)
    }

    /// Latch the terminal error state after an unrecoverable backend
    /// failure.
    pub(crate) fn report_fatal(&self, context: &'static str) {
        error!("fatal link failure: {context}");
        let _ = self.store_state(ConnectionState::Error);
    }

    /// Liveness check, run once per heartbeat tick.
    ///
    /// A downgrade forgets the peer entirely: the stored address and the
    /// discovery record are dropped, and the driver-side deregistration
    /// is queued for the worker. Sends fall back to broadcast until a
    /// new peer shows up.
    pub(crate) fn check_heartbeat(&self, now_ms: u32) {
        if self.state() != ConnectionState::Connected {
            return;
        }
        let idle = time::elapsed_ms(now_ms, self.last_rx_ms.load(Ordering::Relaxed));
        if idle > self.config.heartbeat_timeout_ms
            && self.transition_if(ConnectionState::Connected, ConnectionState::Disconnected)
        {
            warn!(
                "peer silent for {idle}ms (limit {}ms)",
                self.config.heartbeat_timeout_ms
            );
            self.clear_peer();
            self.discovery.lock(|cell| *cell.borrow_mut() = None);
        }
    }

    // ── Identity ────────────────────────────────────────────────────

    pub(crate) fn set_local(&self, addr: Address) {
        self.local.lock(|cell| *cell.borrow_mut() = addr);
    }

    /// This node's own radio address.
    pub fn local_addr(&self) -> Address {
        self.local.lock(|cell| cell.borrow().clone())
    }

    pub(crate) fn local_wire(&self) -> [u8; WIRE_ADDR_LEN] {
        self.local.lock(|cell| cell.borrow().to_wire())
    }

    /// Current peer, if one has been adopted or discovered.
    pub fn peer_addr(&self) -> Option<Address> {
        self.peer.lock(|cell| cell.borrow().current.clone())
    }

    /// Record `peer` as the current peer. Returns `true` when this changed
    /// the peer (first adoption or replacement); the driver-side
    /// registration is deferred to [`Self::take_peer_update`].
    pub(crate) fn adopt_peer(&self, peer: Address) -> bool {
        let adopted = self.peer.lock(|cell| {
            let mut slot = cell.borrow_mut();
            if slot.current.as_ref() == Some(&peer) {
                return false;
            }
            slot.current = Some(peer.clone());
            slot.pending = Some(PeerUpdate::Set(peer.clone()));
            true
        });
        if adopted {
            info!("peer adopted: {peer}");
        }
        adopted
    }

    /// Forget the current peer and queue the driver deregistration.
    fn clear_peer(&self) {
        self.peer.lock(|cell| {
            let mut slot = cell.borrow_mut();
            if slot.current.take().is_some() {
                slot.pending = Some(PeerUpdate::Clear);
            }
        });
    }

    /// Worker side of deferred peer changes: the registration update to
    /// push into the driver, if one is pending. Clears the pending slot.
    pub(crate) fn take_peer_update(&self) -> Option<PeerUpdate> {
        self.peer.lock(|cell| cell.borrow_mut().pending.take())
    }

    // ── Receive path (driver context via LinkHook) ──────────────────

    /// Ingest one parsed frame from a backend.
    ///
    /// Every frame is proof of life. The first one while not connected
    /// also adopts its sender as the peer and promotes the link; after
    /// that, heartbeats are consumed silently and data is queued per the
    /// configured mode, then handed to the receive callback.
    pub(crate) fn on_message(&self, msg: Message) {
        // Nothing is ingested once the error latch is set.
        if self.state() == ConnectionState::Error {
            return;
        }
        let now = time::now_ms();
        self.last_rx_ms.store(now, Ordering::Relaxed);

        let promoted = self
            .transition_if(ConnectionState::Disconnected, ConnectionState::Connected)
            || self.transition_if(ConnectionState::Connecting, ConnectionState::Connected);
        if promoted {
            self.adopt_peer(Address::from_wire(&msg.sender(), WIRE_ADDR_LEN));
        }

        match msg.kind() {
            Some(MessageKind::Data) => {}
            // Liveness only; never queued, never counted, never surfaced.
            Some(MessageKind::Heartbeat) => return,
            // Backend-internal traffic arrives through the discovery path.
            Some(MessageKind::AddrInfo) | None => return,
        }

        let outcome = match self.config.mode {
            LinkMode::Fast => {
                self.inbound.push_overwrite(msg);
                EnqueueOutcome::Stored
            }
            LinkMode::Reliable => self.inbound.push_evict_oldest(msg),
        };
        match outcome {
            EnqueueOutcome::Stored => self.recv_metrics.add_success(now),
            EnqueueOutcome::StoredAfterEvict => {
                warn!("inbound queue full; dropped oldest message");
                self.recv_metrics.add_success(now);
            }
            EnqueueOutcome::Dropped => {
                // The callback stays silent too: it only ever sees
                // messages that made it into the queue.
                warn!("inbound queue full; message lost");
                self.recv_metrics.add_failure();
                return;
            }
        }

        // Clone the handler out of the lock, then run it unlocked so it
        // may call back into the engine.
        let handler = self.handlers.lock(|h| h.borrow().on_receive.clone());
        if let Some(handler) = handler {
            handler(&msg);
        }
    }

    /// Ingest a backend discovery event (e.g. an endpoint advertisement).
    /// Adopts the peer, counts as liveness, records the result for
    /// [`Self::last_discovery`], and notifies the application.
    pub(crate) fn on_peer_discovered(&self, peer: Address, info: &str) {
        if self.state() == ConnectionState::Error {
            return;
        }
        self.last_rx_ms.store(time::now_ms(), Ordering::Relaxed);
        self.adopt_peer(peer.clone());
        let _ = self
            .transition_if(ConnectionState::Disconnected, ConnectionState::Connected)
            || self.transition_if(ConnectionState::Connecting, ConnectionState::Connected);

        let result = DiscoveryResult::new(peer, info);
        self.discovery
            .lock(|cell| *cell.borrow_mut() = Some(result.clone()));
        let handler = self.handlers.lock(|h| h.borrow().on_discovery.clone());
        if let Some(handler) = handler {
            handler(&result);
        }
    }

    /// Most recent discovery event, held until the link drops.
    pub fn last_discovery(&self) -> Option<DiscoveryResult> {
        self.discovery.lock(|cell| cell.borrow().clone())
    }

    // ── Send path ───────────────────────────────────────────────────

    /// Mode-dispatched push onto the outbound queue. `false` means the
    /// reliable queue was full and nothing was stored. Heartbeats ride
    /// this same path, so they queue and displace exactly like data.
    pub(crate) fn enqueue_outbound(&self, msg: Message) -> bool {
        match self.config.mode {
            LinkMode::Fast => {
                self.outbound.push_overwrite(msg);
                true
            }
            LinkMode::Reliable => self.outbound.try_push(msg),
        }
    }

    /// Queue a prebuilt message for transmission. Never blocks.
    ///
    /// Reliable mode refuses when the queue is full; fast mode replaces
    /// whatever is still waiting. A successful return means "queued", not
    /// "delivered" — delivery outcomes land in the send metrics.
    pub fn send_msg(&self, msg: Message) -> Result<()> {
        if self.state() == ConnectionState::Error {
            return Err(Error::SendRefused("link is in the error state"));
        }
        if self.enqueue_outbound(msg) {
            Ok(())
        } else {
            warn!("outbound queue full ({QUEUE_DEPTH} deep); send refused");
            Err(Error::SendRefused("outbound queue full"))
        }
    }

    /// Queue an application payload, stamped with the local address.
    pub fn send_data(&self, payload: &Payload) -> Result<()> {
        self.send_msg(Message::data(self.local_wire(), payload))
    }

    // ── Receive API ─────────────────────────────────────────────────

    /// Oldest queued message, waiting up to the configured receive
    /// timeout.
    pub fn recv_msg(&self) -> Option<Message> {
        self.inbound.pop_timeout(self.config.recv_timeout_ms)
    }

    /// Like [`Self::recv_msg`], but unwraps the payload of DATA messages.
    pub fn recv_data(&self) -> Option<Payload> {
        self.recv_msg()
            .filter(|m| m.kind() == Some(MessageKind::Data))
            .map(|m| m.payload())
    }

    // ── Callbacks ───────────────────────────────────────────────────

    /// Install the push-style receive callback, replacing any previous
    /// one. Runs on the backend's receive context; keep it short.
    pub fn set_on_receive<F>(&self, f: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.handlers
            .lock(|h| h.borrow_mut().on_receive = Some(Arc::new(f)));
    }

    /// Install the peer-discovery callback, replacing any previous one.
    pub fn set_on_discovery<F>(&self, f: F)
    where
        F: Fn(&DiscoveryResult) + Send + Sync + 'static,
    {
        self.handlers
            .lock(|h| h.borrow_mut().on_discovery = Some(Arc::new(f)));
    }

    // ── Metrics ─────────────────────────────────────────────────────

    pub(crate) fn note_send_outcome(&self, ok: bool, now_ms: u32) {
        if ok {
            self.send_metrics.add_success(now_ms);
        } else {
            self.send_metrics.add_failure();
        }
    }

    /// Snapshot of the send direction.
    pub fn send_snapshot(&self) -> MetricsSnapshot {
        self.send_metrics.snapshot(time::now_ms())
    }

    /// Snapshot of the receive direction.
    pub fn recv_snapshot(&self) -> MetricsSnapshot {
        self.recv_metrics.snapshot(time::now_ms())
    }

    /// Zero both directions, counters and rate windows alike.
    pub fn reset_metrics(&self) {
        self.send_metrics.reset();
        self.recv_metrics.reset();
    }

    /// Turn the periodic metrics table on or off.
    pub fn enable_metrics_display(&self, enable: bool, interval_ms: u32) {
        self.display_interval_ms
            .store(interval_ms.max(1), Ordering::Relaxed);
        self.display_on.store(enable, Ordering::Relaxed);
    }

    pub(crate) fn display_enabled(&self) -> bool {
        self.display_on.load(Ordering::Relaxed)
    }

    pub(crate) fn display_interval_ms(&self) -> u32 {
        self.display_interval_ms.load(Ordering::Relaxed)
    }

    // ── Worker plumbing ─────────────────────────────────────────────

    pub(crate) fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Next queued outbound message; suspends until one arrives.
    pub(crate) async fn wait_outbound(&self) -> Message {
        self.outbound.pop_wait().await
    }

    /// Drain helper: next outbound message without waiting.
    pub(crate) fn try_outbound(&self) -> Option<Message> {
        self.outbound.try_pop()
    }

    pub(crate) fn stop(&self) {
        self.stopping.store(true, Ordering::Relaxed);
        self.stop_drain.signal(());
        self.stop_beat.signal(());
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Relaxed)
    }

    pub(crate) async fn wait_stop_drain(&self) {
        self.stop_drain.wait().await;
    }

    pub(crate) async fn wait_stop_beat(&self) {
        self.stop_beat.wait().await;
    }
}

// ── Backend hook ────────────────────────────────────────────────────────

/// The narrow surface a radio backend sees.
///
/// Each engine instance hands its own hook to its own backend, so two
/// links in one process never share routing state. All methods are safe
/// from driver receive context.
#[derive(Clone)]
pub struct LinkHook {
    core: Arc<LinkCore>,
}

impl LinkHook {
    pub(crate) fn new(core: Arc<LinkCore>) -> Self {
        Self { core }
    }

    /// Deliver one parsed, sender-stamped frame to the engine.
    pub fn on_message(&self, msg: Message) {
        self.core.on_message(msg);
    }

    /// Report a discovered peer. Invoke outside any driver lock.
    pub fn on_peer_discovered(&self, peer: Address, info: &str) {
        self.core.on_peer_discovered(peer, info);
    }

    /// Report an unrecoverable backend failure; latches the error state.
    pub fn report_fatal(&self, context: &'static str) {
        self.core.report_fatal(context);
    }
}
