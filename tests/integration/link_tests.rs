//! Integration tests for the full engine pipeline: public API → queues →
//! worker → (mock) radio, and the receive path back up through the hook.
//!
//! These run on the host with real worker threads and real time; timing
//! asserts use generous margins so they hold on loaded CI machines.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use rclink::addr::{Address, DiscoveryResult};
use rclink::config::{LinkConfig, LinkMode};
use rclink::error::Error;
use rclink::link::{ConnectionState, LinkEngine};
use rclink::wire::{Message, Payload};

use crate::mock_transport::{
    MockRadio, MockShared, PEER_MAC, engine_with_mock, quiet_config,
};

fn payload(tag: f32) -> Payload {
    Payload {
        id1: 7,
        value1: tag,
        flags: 0x01,
        ..Payload::default()
    }
}

fn drain_all(engine: &LinkEngine) -> Vec<Payload> {
    let mut got = Vec::new();
    while let Some(p) = engine.recv_data() {
        got.push(p);
    }
    got
}

// ── Connection lifecycle ──────────────────────────────────────

#[test]
fn first_frame_promotes_and_sends_go_unicast() {
    let (engine, radio) = engine_with_mock(quiet_config(LinkMode::Reliable));
    engine.connect();
    assert_eq!(engine.state(), ConnectionState::Connecting);

    radio.inject(Message::data(PEER_MAC, &payload(1.0)));
    assert!(radio.wait_until(Duration::from_secs(1), |_| {
        engine.state() == ConnectionState::Connected
    }));

    let peer = Address::from_bytes(&PEER_MAC).unwrap();
    assert_eq!(engine.peer_addr(), Some(peer.clone()));

    engine.send_data(&payload(2.0)).unwrap();
    assert!(radio.wait_until(Duration::from_secs(1), |r| r.sent_count() == 1));
    assert_eq!(radio.last_dest(), Some(peer.clone()));
    // The worker registered the peer with the driver before sending.
    assert_eq!(radio.peer_sets.lock().unwrap().as_slice(), &[peer]);
}

#[test]
fn silence_downgrades_then_traffic_recovers() {
    // Real timing: 100 ms heartbeats, 300 ms timeout.
    let (engine, radio) = engine_with_mock(LinkConfig::default());
    engine.connect();

    radio.inject(Message::heartbeat(PEER_MAC));
    assert!(radio.wait_until(Duration::from_secs(1), |_| {
        engine.state() == ConnectionState::Connected
    }));

    // Say nothing and let the liveness check evict us. The peer is
    // forgotten along with the connection.
    assert!(radio.wait_until(Duration::from_secs(2), |_| {
        engine.state() == ConnectionState::Disconnected
    }));
    assert_eq!(engine.peer_addr(), None);
    assert!(radio.wait_until(Duration::from_secs(1), |r| {
        r.peer_unsets.load(Ordering::Relaxed) >= 1
    }));

    // Any received frame re-establishes, re-adopting its sender.
    radio.inject(Message::heartbeat(PEER_MAC));
    assert!(radio.wait_until(Duration::from_secs(1), |_| {
        engine.state() == ConnectionState::Connected
    }));
    assert_eq!(engine.peer_addr(), Address::from_bytes(&PEER_MAC));
}

#[test]
fn fatal_radio_fault_is_terminal() {
    let (engine, radio) = engine_with_mock(LinkConfig::default());
    engine.connect();

    radio.inject_fatal("antenna fell off");
    assert!(radio.wait_until(Duration::from_secs(1), |_| {
        engine.state() == ConnectionState::Error
    }));

    // connect() does not resurrect a dead link.
    engine.connect();
    assert_eq!(engine.state(), ConnectionState::Error);
    assert!(matches!(
        engine.send_msg(Message::data(PEER_MAC, &payload(0.0))),
        Err(Error::SendRefused(_))
    ));

    // Heartbeating stops once the tick loop observes the state.
    std::thread::sleep(Duration::from_millis(400));
    let settled = radio.sent_count();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(radio.sent_count(), settled, "worker kept transmitting in Error state");
}

// ── Heartbeats ────────────────────────────────────────────────

#[test]
fn heartbeats_broadcast_and_stay_invisible() {
    let (engine, radio) = engine_with_mock(LinkConfig::default());
    engine.connect();

    assert!(radio.wait_until(Duration::from_secs(2), |r| r.heartbeat_count() >= 2));
    for frame in radio.sent.lock().unwrap().iter() {
        assert!(frame.dest.is_broadcast(), "pre-adoption traffic must broadcast");
    }

    // Nothing to read: heartbeats never reach the application.
    assert!(engine.recv_msg().is_none());
    assert!(engine.recv_data().is_none());
}

// ── Queuing policies ──────────────────────────────────────────

#[test]
fn fast_mode_keeps_only_the_latest_frame() {
    let (engine, radio) = engine_with_mock(quiet_config(LinkMode::Fast));
    engine.connect();

    let seen = Arc::new(AtomicU32::new(0));
    let seen_in_handler = Arc::clone(&seen);
    engine.set_on_receive(move |_| {
        seen_in_handler.fetch_add(1, Ordering::Relaxed);
    });

    for i in 1..=5 {
        radio.inject(Message::data(PEER_MAC, &payload(i as f32)));
    }

    // The handler observed every frame; the queue kept only the newest.
    assert_eq!(seen.load(Ordering::Relaxed), 5);
    let got = drain_all(&engine);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].value1, 5.0);
}

#[test]
fn reliable_inbound_evicts_oldest_beyond_capacity() {
    let (engine, radio) = engine_with_mock(quiet_config(LinkMode::Reliable));
    engine.connect();

    for i in 1..=12 {
        radio.inject(Message::data(PEER_MAC, &payload(i as f32)));
    }

    let got = drain_all(&engine);
    let values: Vec<f32> = got.iter().map(|p| p.value1).collect();
    let expected: Vec<f32> = (3..=12).map(|i| i as f32).collect();
    assert_eq!(values, expected, "oldest two should be evicted, order kept");
}

#[test]
fn reliable_outbound_fills_then_refuses() {
    let (engine, radio) = engine_with_mock(quiet_config(LinkMode::Reliable));
    engine.connect();
    // Stall the radio so the queue actually fills.
    radio.send_delay_ms.store(50, Ordering::Relaxed);

    let mut accepted = 0u32;
    let mut refused = 0u32;
    for i in 0..12 {
        match engine.send_msg(Message::data(PEER_MAC, &payload(i as f32))) {
            Ok(()) => accepted += 1,
            Err(Error::SendRefused(_)) => refused += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(accepted >= 10, "queue capacity plus in-flight, got {accepted}");
    assert!(refused >= 1, "a 12-deep burst must overflow the queue");
    assert_eq!(accepted + refused, 12);

    // Everything accepted eventually reaches the radio, in order.
    assert!(radio.wait_until(Duration::from_secs(3), |r| {
        r.sent_count() == accepted as usize
    }));
}

#[test]
fn send_never_waits_on_the_radio() {
    let (engine, radio) = engine_with_mock(quiet_config(LinkMode::Reliable));
    engine.connect();
    radio.send_delay_ms.store(50, Ordering::Relaxed);

    let start = Instant::now();
    for i in 0..20 {
        // Overflow errors are fine; blocking is not.
        let _ = engine.send_msg(Message::data(PEER_MAC, &payload(i as f32)));
    }
    assert!(
        start.elapsed() < Duration::from_millis(250),
        "send_msg must enqueue and return, not ride the radio"
    );
}

// ── Metrics ───────────────────────────────────────────────────

#[test]
fn send_outcomes_reach_the_metrics() {
    let (engine, radio) = engine_with_mock(quiet_config(LinkMode::Reliable));
    engine.connect();

    radio.fail_sends.store(true, Ordering::Relaxed);
    engine.send_msg(Message::data(PEER_MAC, &payload(0.0))).unwrap();
    // Wait on the metric, not the attempt counter, so the failing send
    // is fully accounted before the radio recovers.
    assert!(radio.wait_until(Duration::from_secs(1), |_| {
        engine.send_metrics().failure == 1
    }));

    radio.fail_sends.store(false, Ordering::Relaxed);
    for i in 1..=3 {
        engine.send_msg(Message::data(PEER_MAC, &payload(i as f32))).unwrap();
    }
    assert!(radio.wait_until(Duration::from_secs(1), |_| {
        engine.send_metrics().success == 3
    }));

    let snap = engine.send_metrics();
    assert_eq!(snap.success, 3);
    assert_eq!(snap.failure, 1);
    assert!((snap.success_rate - 75.0).abs() < 0.01, "got {}", snap.success_rate);
    assert!(snap.per_second > 0.0);
}

#[test]
fn reset_metrics_starts_a_fresh_ledger() {
    let (engine, radio) = engine_with_mock(quiet_config(LinkMode::Reliable));
    engine.connect();

    radio.inject(Message::data(PEER_MAC, &payload(1.0)));
    engine.send_data(&payload(2.0)).unwrap();
    assert!(radio.wait_until(Duration::from_secs(1), |_| {
        engine.send_metrics().success == 1 && engine.recv_metrics().success == 1
    }));

    engine.reset_metrics();
    let send = engine.send_metrics();
    let recv = engine.recv_metrics();
    assert_eq!((send.success, send.failure), (0, 0));
    assert_eq!((recv.success, recv.failure), (0, 0));
    assert_eq!(send.success_rate, 0.0);
    assert_eq!(send.per_second, 0.0);
}

// ── Discovery ─────────────────────────────────────────────────

#[test]
fn discovery_adopts_and_notifies_the_application() {
    let (engine, radio) = engine_with_mock(quiet_config(LinkMode::Reliable));
    engine.connect();

    let found: Arc<std::sync::Mutex<Option<DiscoveryResult>>> =
        Arc::new(std::sync::Mutex::new(None));
    let found_in_handler = Arc::clone(&found);
    engine.set_on_discovery(move |result| {
        *found_in_handler.lock().unwrap() = Some(result.clone());
    });

    let peer = Address::from_bytes(&PEER_MAC).unwrap();
    radio.inject_discovery(peer.clone(), "mock peer at slot 3");

    let result = found.lock().unwrap().clone().expect("handler fired");
    assert!(result.discovered);
    assert_eq!(result.peer, peer);
    assert_eq!(result.info.as_str(), "mock peer at slot 3");

    assert_eq!(engine.peer_addr(), Some(peer.clone()));
    assert_eq!(engine.state(), ConnectionState::Connected);
    // The engine keeps the record for later polling.
    assert_eq!(engine.last_discovery().map(|r| r.peer), Some(peer));
}

#[test]
fn a_new_sender_wins_the_slot_after_the_link_drops() {
    // Real timing so the liveness check can drop the first pairing.
    let (engine, radio) = engine_with_mock(LinkConfig::default());
    engine.connect();

    const OTHER_MAC: [u8; 6] = [0xC0, 0xC1, 0xC2, 0xC3, 0xC4, 0xC5];
    let first = Address::from_bytes(&PEER_MAC).unwrap();
    let other = Address::from_bytes(&OTHER_MAC).unwrap();

    radio.inject(Message::data(PEER_MAC, &payload(1.0)));
    assert!(radio.wait_until(Duration::from_secs(1), |_| {
        engine.peer_addr() == Some(first.clone())
    }));

    // While connected, a third party does not steal the slot.
    radio.inject(Message::data(OTHER_MAC, &payload(2.0)));
    assert_eq!(engine.peer_addr(), Some(first));

    // Once the link drops, the slot opens and the next sender takes it.
    assert!(radio.wait_until(Duration::from_secs(2), |_| {
        engine.state() == ConnectionState::Disconnected
    }));
    assert_eq!(engine.peer_addr(), None);

    radio.inject(Message::data(OTHER_MAC, &payload(3.0)));
    assert!(radio.wait_until(Duration::from_secs(1), |_| {
        engine.peer_addr() == Some(other.clone())
    }));
    // The driver sees both the deregistration and the new registration.
    assert!(radio.wait_until(Duration::from_secs(1), |r| {
        r.peer_unsets.load(Ordering::Relaxed) >= 1
            && r.peer_sets.lock().unwrap().last() == Some(&other)
    }));
}

// ── Two engines, relayed frames ───────────────────────────────

/// Forward frames captured on one mock radio into the other, like the
/// air would. Returns how many frames moved.
fn pump(from: &MockShared, seen: &mut usize, into: &MockShared) -> usize {
    let frames: Vec<_> = from.sent.lock().unwrap()[*seen..].to_vec();
    *seen += frames.len();
    let mut moved = 0;
    for f in &frames {
        if let Some(msg) = Message::parse(&f.frame) {
            into.inject(msg);
            moved += 1;
        }
    }
    moved
}

#[test]
fn two_engines_pair_and_exchange_data() {
    const MAC_A: [u8; 6] = [0x0A, 0x0A, 0x0A, 0x0A, 0x0A, 0x0A];
    const MAC_B: [u8; 6] = [0x0B, 0x0B, 0x0B, 0x0B, 0x0B, 0x0B];

    let shared_a = MockShared::new();
    let shared_b = MockShared::new();
    let engine_a = LinkEngine::new(
        Box::new(MockRadio::with_mac(Arc::clone(&shared_a), MAC_A)),
        LinkConfig::default(),
    )
    .unwrap();
    let engine_b = LinkEngine::new(
        Box::new(MockRadio::with_mac(Arc::clone(&shared_b), MAC_B)),
        LinkConfig::default(),
    )
    .unwrap();
    engine_a.connect();
    engine_b.connect();

    let (mut seen_a, mut seen_b) = (0usize, 0usize);
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        pump(&shared_a, &mut seen_a, &shared_b);
        pump(&shared_b, &mut seen_b, &shared_a);
        if engine_a.state() == ConnectionState::Connected
            && engine_b.state() == ConnectionState::Connected
        {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(engine_a.state(), ConnectionState::Connected);
    assert_eq!(engine_b.state(), ConnectionState::Connected);
    assert_eq!(engine_a.peer_addr(), Address::from_bytes(&MAC_B));
    assert_eq!(engine_b.peer_addr(), Address::from_bytes(&MAC_A));

    // A real payload crosses, byte for byte.
    let sample = Payload {
        id1: 1,
        id2: 2,
        value1: -0.75,
        value4: 123.456,
        flags: 0xF0,
        ..Payload::default()
    };
    engine_a.send_data(&sample).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut received = None;
    while Instant::now() < deadline && received.is_none() {
        pump(&shared_a, &mut seen_a, &shared_b);
        received = engine_b.recv_data();
    }
    assert_eq!(received, Some(sample));
}

// ── Teardown ──────────────────────────────────────────────────

#[test]
fn dropping_the_engine_closes_the_radio() {
    let (engine, radio) = engine_with_mock(LinkConfig::default());
    engine.connect();
    drop(engine);
    assert!(radio.closed.load(Ordering::Relaxed));

    // No further transmissions after the join.
    let settled = radio.sent_count();
    std::thread::sleep(Duration::from_millis(250));
    assert_eq!(radio.sent_count(), settled);
}
