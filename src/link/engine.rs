//! The application-facing engine.
//!
//! [`LinkEngine`] ties one radio backend to one [`LinkCore`] and owns the
//! worker thread's lifetime: construction validates the config, opens the
//! transport, hooks its receive path into the core, and spawns the
//! worker; drop stops the worker and joins it. Everything in between is
//! thin delegation, so the engine type itself stays boring.

use std::sync::Arc;

use log::info;

use crate::addr::{Address, DiscoveryResult};
use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::link::core::{ConnectionState, LinkCore, LinkHook};
use crate::link::worker;
use crate::metrics::MetricsSnapshot;
use crate::transport::{self, Protocol, Transport};
use crate::wire::{Message, Payload};

/// One live link over one radio backend.
pub struct LinkEngine {
    core: Arc<LinkCore>,
    protocol: Protocol,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl LinkEngine {
    /// Bring up a link over an already-constructed backend.
    ///
    /// Fails fast on invalid timing config or backend bring-up problems;
    /// after a successful return the worker is running and received
    /// frames are being ingested. Heartbeats start with
    /// [`Self::connect`].
    pub fn new(mut transport: Box<dyn Transport>, config: LinkConfig) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let core = Arc::new(LinkCore::new(config));
        transport.open(LinkHook::new(Arc::clone(&core)))?;
        core.set_local(transport.local_addr());

        let protocol = transport.protocol();
        info!("link up: {protocol}, local address {}", core.local_addr());

        let worker = worker::spawn(Arc::clone(&core), transport)?;
        Ok(Self {
            core,
            protocol,
            worker: Some(worker),
        })
    }

    /// Bring up a link over the default backend for `protocol`.
    pub fn with_protocol(protocol: Protocol, config: LinkConfig) -> Result<Self> {
        Self::new(transport::create(protocol)?, config)
    }

    /// The radio this engine runs on.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    // ── Connection ──────────────────────────────────────────────────

    /// Start (or restart) connection establishment: arms the periodic
    /// heartbeat and latches `Connected` on the first frame from a peer.
    /// Idempotent.
    pub fn connect(&self) {
        self.core.connect();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// This node's radio address.
    pub fn local_addr(&self) -> Address {
        self.core.local_addr()
    }

    /// The adopted peer's address, once one is known. Cleared when the
    /// liveness check drops the link.
    pub fn peer_addr(&self) -> Option<Address> {
        self.core.peer_addr()
    }

    /// The most recent peer-discovery event, if the link is still up.
    pub fn last_discovery(&self) -> Option<DiscoveryResult> {
        self.core.last_discovery()
    }

    // ── Data plane ──────────────────────────────────────────────────

    /// Queue an application payload for transmission. Never blocks;
    /// refuses instead (see [`Error::SendRefused`]).
    pub fn send_data(&self, payload: &Payload) -> Result<()> {
        self.core.send_data(payload)
    }

    /// Receive the next application payload, waiting at most the
    /// configured receive timeout.
    pub fn recv_data(&self) -> Option<Payload> {
        self.core.recv_data()
    }

    /// Queue a prebuilt message (sender field and all) for transmission.
    pub fn send_msg(&self, msg: Message) -> Result<()> {
        self.core.send_msg(msg)
    }

    /// Receive the next whole message, waiting at most the configured
    /// receive timeout.
    pub fn recv_msg(&self) -> Option<Message> {
        self.core.recv_msg()
    }

    // ── Callbacks ───────────────────────────────────────────────────

    /// Push-style alternative to [`Self::recv_msg`]: runs on the
    /// backend's receive context for every data message.
    pub fn set_on_receive<F>(&self, f: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.core.set_on_receive(f);
    }

    /// Notification for backend peer discovery (endpoint advertisements
    /// and first contact on discovering backends).
    pub fn set_on_discovery<F>(&self, f: F)
    where
        F: Fn(&DiscoveryResult) + Send + Sync + 'static,
    {
        self.core.set_on_discovery(f);
    }

    // ── Metrics ─────────────────────────────────────────────────────

    /// Snapshot of the send direction (radio transmit outcomes).
    pub fn send_metrics(&self) -> MetricsSnapshot {
        self.core.send_snapshot()
    }

    /// Snapshot of the receive direction (ingest outcomes).
    pub fn recv_metrics(&self) -> MetricsSnapshot {
        self.core.recv_snapshot()
    }

    /// Zero both metric directions, counters and rate windows alike.
    pub fn reset_metrics(&self) {
        self.core.reset_metrics();
    }

    /// Toggle the periodic metrics table printed by the worker.
    pub fn enable_metrics_display(&self, enable: bool, interval_ms: u32) {
        self.core.enable_metrics_display(enable, interval_ms);
    }
}

impl Drop for LinkEngine {
    fn drop(&mut self) {
        self.core.stop();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}
