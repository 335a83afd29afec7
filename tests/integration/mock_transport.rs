//! Mock radio backend for integration tests.
//!
//! Records every driver call so tests can assert on the full transmit
//! history, and exposes the [`LinkHook`] captured at `open` so tests can
//! play the role of the radio receive interrupt. No real radio, no
//! sockets; everything runs on the host.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rclink::addr::Address;
use rclink::config::LinkConfig;
use rclink::error::TransportError;
use rclink::link::{LinkEngine, LinkHook};
use rclink::transport::{Protocol, Transport};
use rclink::wire::{MESSAGE_WIRE_SIZE, Message, MessageKind};

pub const LOCAL_MAC: [u8; 6] = [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5];
pub const PEER_MAC: [u8; 6] = [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5];

// ── Transmit record ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SentFrame {
    pub dest: Address,
    pub frame: [u8; MESSAGE_WIRE_SIZE],
}

impl SentFrame {
    pub fn kind(&self) -> Option<MessageKind> {
        Message::parse(&self.frame).and_then(|m| m.kind())
    }
}

// ── Shared recorder ───────────────────────────────────────────

/// State shared between a [`MockRadio`] (owned by the engine worker)
/// and the test body.
pub struct MockShared {
    hook: Mutex<Option<LinkHook>>,
    pub sent: Mutex<Vec<SentFrame>>,
    pub peer_sets: Mutex<Vec<Address>>,
    pub peer_unsets: AtomicU32,
    /// Total `send` calls, including failed ones.
    pub attempts: AtomicU32,
    pub fail_sends: AtomicBool,
    /// Artificial per-send latency, to prove callers never wait on it.
    pub send_delay_ms: AtomicU32,
    pub closed: AtomicBool,
}

#[allow(dead_code)]
impl MockShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            hook: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            peer_sets: Mutex::new(Vec::new()),
            peer_unsets: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            fail_sends: AtomicBool::new(false),
            send_delay_ms: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn hook(&self) -> LinkHook {
        self.hook
            .lock()
            .unwrap()
            .clone()
            .expect("transport was never opened")
    }

    /// Deliver a frame as if the radio had received it.
    pub fn inject(&self, msg: Message) {
        self.hook().on_message(msg);
    }

    pub fn inject_discovery(&self, peer: Address, info: &str) {
        self.hook().on_peer_discovered(peer, info);
    }

    pub fn inject_fatal(&self, why: &'static str) {
        self.hook().report_fatal(why);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn heartbeat_count(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.kind() == Some(MessageKind::Heartbeat))
            .count()
    }

    pub fn data_frames(&self) -> Vec<SentFrame> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.kind() == Some(MessageKind::Data))
            .cloned()
            .collect()
    }

    pub fn last_dest(&self) -> Option<Address> {
        self.sent.lock().unwrap().last().map(|s| s.dest.clone())
    }

    /// Wait until `ready` holds or `timeout` passes; returns the final
    /// verdict so asserts read naturally.
    pub fn wait_until(&self, timeout: Duration, mut ready: impl FnMut(&Self) -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if ready(self) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        ready(self)
    }
}

// ── MockRadio ─────────────────────────────────────────────────

pub struct MockRadio {
    shared: Arc<MockShared>,
    local: [u8; 6],
}

impl MockRadio {
    pub fn new(shared: Arc<MockShared>) -> Self {
        Self::with_mac(shared, LOCAL_MAC)
    }

    pub fn with_mac(shared: Arc<MockShared>, local: [u8; 6]) -> Self {
        Self { shared, local }
    }
}

impl Transport for MockRadio {
    fn protocol(&self) -> Protocol {
        Protocol::EspNow
    }

    fn open(&mut self, hook: LinkHook) -> Result<(), TransportError> {
        *self.shared.hook.lock().unwrap() = Some(hook);
        Ok(())
    }

    fn local_addr(&self) -> Address {
        Address::from_bytes(&self.local).unwrap()
    }

    fn addr_size(&self) -> usize {
        self.local.len()
    }

    fn set_peer(&mut self, peer: &Address) -> Result<(), TransportError> {
        self.shared.peer_sets.lock().unwrap().push(peer.clone());
        Ok(())
    }

    fn unset_peer(&mut self) -> Result<(), TransportError> {
        self.shared.peer_unsets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn send(
        &mut self,
        dest: &Address,
        frame: &[u8; MESSAGE_WIRE_SIZE],
    ) -> Result<(), TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::Relaxed);
        let delay = self.shared.send_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(u64::from(delay)));
        }
        if self.shared.fail_sends.load(Ordering::Relaxed) {
            return Err(TransportError::DriverFault("mock send failure"));
        }
        self.shared.sent.lock().unwrap().push(SentFrame {
            dest: dest.clone(),
            frame: *frame,
        });
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.shared.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── Convenience constructors ──────────────────────────────────

pub fn engine_with_mock(config: LinkConfig) -> (LinkEngine, Arc<MockShared>) {
    let shared = MockShared::new();
    let engine = LinkEngine::new(Box::new(MockRadio::new(Arc::clone(&shared))), config)
        .expect("engine construction");
    (engine, shared)
}

/// Config with heartbeats pushed out of the test's way, for tests that
/// need the transmit history to contain only their own frames.
pub fn quiet_config(mode: rclink::config::LinkMode) -> LinkConfig {
    LinkConfig {
        mode,
        heartbeat_interval_ms: 600_000,
        heartbeat_timeout_ms: 1_800_000,
        ..LinkConfig::default()
    }
}
