//! UDP backend for links over an existing WiFi network.
//!
//! Addresses are 6 bytes: IPv4 octets plus a big-endian port. Frames
//! travel as single datagrams; "broadcast" goes to a configurable
//! endpoint (subnet broadcast by default, a concrete peer endpoint on
//! networks that filter broadcast).
//!
//! Peers find each other with ADDR_INFO probes: until a peer is
//! registered, an announcer sends one probe per interval to the
//! broadcast endpoint, advertising its own endpoint in the payload;
//! whoever hears a probe replies with a unicast probe of its own and
//! reports the discovery upward. From then on the engine heartbeats
//! keep the pairing alive.
//!
//! Network bring-up is out of scope here — on devices, join the WiFi
//! network first (see the demo binary); this backend only owns sockets,
//! so it behaves identically on host and device.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};

use crate::addr::Address;
use crate::error::TransportError;
use crate::link::LinkHook;
use crate::transport::{Protocol, Transport};
use crate::wire::{MESSAGE_WIRE_SIZE, Message, MessageKind, Payload, WIRE_ADDR_LEN};

/// Default link port, shared by both ends.
const DEFAULT_PORT: u16 = 12345;
/// Receive poll granularity; bounds how long close() can lag.
const RX_POLL_MS: u64 = 50;
/// Send attempts per datagram before giving up.
const SEND_RETRY_MAX: u32 = 3;
const SEND_RETRY_DELAY_MS: u64 = 10;

const ALL_KINDS: [MessageKind; 3] = [
    MessageKind::Data,
    MessageKind::AddrInfo,
    MessageKind::Heartbeat,
];

/// Socket and discovery tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WifiConfig {
    /// Local interface to bind; `0.0.0.0` binds all.
    pub bind_addr: Ipv4Addr,
    /// Local port; 0 picks an ephemeral one (handy for tests).
    pub port: u16,
    /// Where "broadcast" frames and discovery probes go.
    pub broadcast_to: SocketAddrV4,
    /// Probe cadence while no peer is registered.
    pub announce_interval_ms: u32,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            bind_addr: Ipv4Addr::UNSPECIFIED,
            port: DEFAULT_PORT,
            broadcast_to: SocketAddrV4::new(Ipv4Addr::BROADCAST, DEFAULT_PORT),
            announce_interval_ms: 500,
        }
    }
}

/// Pack an endpoint into the 6-byte generic address form.
fn endpoint_to_addr(ep: &SocketAddrV4) -> Address {
    let ip = ep.ip().octets();
    let port = ep.port().to_be_bytes();
    Address::from_bytes(&[ip[0], ip[1], ip[2], ip[3], port[0], port[1]]).unwrap_or_default()
}

/// The inverse of [`endpoint_to_addr`]; `None` for foreign widths.
fn addr_to_endpoint(addr: &Address) -> Option<SocketAddrV4> {
    let b = addr.as_bytes();
    if b.len() != WIRE_ADDR_LEN {
        return None;
    }
    Some(SocketAddrV4::new(
        Ipv4Addr::new(b[0], b[1], b[2], b[3]),
        u16::from_be_bytes([b[4], b[5]]),
    ))
}

/// Probe payload advertising `addr`: IP octets in the id bytes, port in
/// `value1` (u16 values are exact in f32). Advisory — receivers trust
/// the datagram source endpoint over the advertisement.
fn advert_payload(addr: &Address) -> Payload {
    match addr_to_endpoint(addr) {
        Some(ep) => {
            let ip = ep.ip().octets();
            Payload {
                id1: ip[0],
                id2: ip[1],
                id3: ip[2],
                id4: ip[3],
                value1: f32::from(ep.port()),
                ..Payload::default()
            }
        }
        None => Payload::default(),
    }
}

/// Best-effort guess of the outbound interface address when bound to
/// `0.0.0.0`. `connect` on a UDP socket only selects a route, nothing
/// is transmitted.
fn discover_local_ip() -> Option<Ipv4Addr> {
    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    probe.connect((Ipv4Addr::new(198, 51, 100, 1), 9)).ok()?;
    match probe.local_addr().ok()? {
        SocketAddr::V4(ep) if !ep.ip().is_unspecified() => Some(*ep.ip()),
        _ => None,
    }
}

/// UDP transport. Construction binds the socket (so the real port is
/// known immediately); `open` starts the receive and announce threads.
pub struct WifiLink {
    config: WifiConfig,
    socket: Arc<UdpSocket>,
    local_endpoint: SocketAddrV4,
    local: Address,
    current_peer: Option<Address>,
    running: Arc<AtomicBool>,
    peer_known: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
    announce_thread: Option<JoinHandle<()>>,
}

impl WifiLink {
    pub fn new(config: WifiConfig) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(SocketAddrV4::new(config.bind_addr, config.port))
            .map_err(|_| TransportError::InitFailed("udp bind"))?;
        socket
            .set_broadcast(true)
            .map_err(|_| TransportError::InitFailed("udp broadcast flag"))?;
        socket
            .set_read_timeout(Some(Duration::from_millis(RX_POLL_MS)))
            .map_err(|_| TransportError::InitFailed("udp read timeout"))?;

        let bound = match socket.local_addr() {
            Ok(SocketAddr::V4(ep)) => ep,
            _ => return Err(TransportError::InitFailed("udp local endpoint")),
        };
        // Frames carry our endpoint in the sender field, so a wildcard
        // bind needs the concrete interface address where possible.
        let ip = if config.bind_addr.is_unspecified() {
            discover_local_ip().unwrap_or(config.bind_addr)
        } else {
            config.bind_addr
        };
        let local_endpoint = SocketAddrV4::new(ip, bound.port());

        Ok(Self {
            config,
            socket: Arc::new(socket),
            local_endpoint,
            local: endpoint_to_addr(&local_endpoint),
            current_peer: None,
            running: Arc::new(AtomicBool::new(false)),
            peer_known: Arc::new(AtomicBool::new(false)),
            rx_thread: None,
            announce_thread: None,
        })
    }

    /// The concrete bound endpoint (resolves an ephemeral port).
    pub fn local_endpoint(&self) -> SocketAddrV4 {
        self.local_endpoint
    }

    /// Redirect "broadcast" traffic and probes to a specific endpoint.
    /// Takes effect at `open`; meant for point-to-point setups and
    /// networks that drop subnet broadcast.
    pub fn set_broadcast_to(&mut self, target: SocketAddrV4) {
        self.config.broadcast_to = target;
    }
}

impl Transport for WifiLink {
    fn protocol(&self) -> Protocol {
        Protocol::Wifi
    }

    fn open(&mut self, hook: LinkHook) -> Result<(), TransportError> {
        self.running.store(true, Ordering::Relaxed);

        let rx = {
            let socket = Arc::clone(&self.socket);
            let running = Arc::clone(&self.running);
            let local = self.local.clone();
            std::thread::Builder::new()
                .name("rc-wifi-rx".into())
                .spawn(move || rx_loop(&socket, &hook, &local, &running))
                .map_err(|_| TransportError::InitFailed("wifi rx thread"))?
        };

        let announce = {
            let socket = Arc::clone(&self.socket);
            let running = Arc::clone(&self.running);
            let peer_known = Arc::clone(&self.peer_known);
            let probe =
                Message::addr_info(self.local.to_wire(), &advert_payload(&self.local)).to_wire();
            let target = self.config.broadcast_to;
            let interval = Duration::from_millis(u64::from(self.config.announce_interval_ms.max(1)));
            std::thread::Builder::new()
                .name("rc-wifi-announce".into())
                .spawn(move || announce_loop(&socket, &probe, target, interval, &running, &peer_known))
                .map_err(|_| TransportError::InitFailed("wifi announce thread"))?
        };

        self.rx_thread = Some(rx);
        self.announce_thread = Some(announce);
        info!(
            "wifi link up: {} (broadcast to {})",
            self.local_endpoint, self.config.broadcast_to
        );
        Ok(())
    }

    fn local_addr(&self) -> Address {
        self.local.clone()
    }

    fn addr_size(&self) -> usize {
        WIRE_ADDR_LEN
    }

    fn set_peer(&mut self, peer: &Address) -> Result<(), TransportError> {
        if addr_to_endpoint(peer).is_none() {
            return Err(TransportError::DriverFault("wifi peer must be ip:port"));
        }
        self.current_peer = Some(peer.clone());
        // Pairing established: the announcer can stop probing.
        self.peer_known.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn unset_peer(&mut self) -> Result<(), TransportError> {
        self.current_peer = None;
        self.peer_known.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn send(
        &mut self,
        dest: &Address,
        frame: &[u8; MESSAGE_WIRE_SIZE],
    ) -> Result<(), TransportError> {
        let target = if dest.is_broadcast() {
            self.config.broadcast_to
        } else {
            addr_to_endpoint(dest).ok_or(TransportError::DriverFault("wifi dest must be ip:port"))?
        };
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.socket.send_to(frame, target) {
                Ok(_) => return Ok(()),
                Err(_) if attempt < SEND_RETRY_MAX => {
                    std::thread::sleep(Duration::from_millis(SEND_RETRY_DELAY_MS));
                }
                Err(e) => {
                    debug!("udp send_to {target} failed: {e}");
                    return Err(TransportError::DriverFault("udp send failed"));
                }
            }
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.rx_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.announce_thread.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for WifiLink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// ── Backend threads ─────────────────────────────────────────────────────

fn rx_loop(socket: &UdpSocket, hook: &LinkHook, local: &Address, running: &AtomicBool) {
    let mut buf = [0u8; 64];
    let reply = Message::addr_info(local.to_wire(), &advert_payload(local)).to_wire();
    // One unicast probe reply per distinct source; stops two announcers
    // from ping-ponging probes forever.
    let mut replied_to: Option<SocketAddrV4> = None;

    while running.load(Ordering::Relaxed) {
        let (n, src) = match socket.recv_from(&mut buf) {
            Ok(got) => got,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                if running.load(Ordering::Relaxed) {
                    warn!("udp receive failed: {e}");
                    hook.report_fatal("udp receive failed");
                }
                break;
            }
        };
        let SocketAddr::V4(src) = src else { continue };
        let src_addr = endpoint_to_addr(&src);
        if src_addr == *local {
            // Our own broadcast came back around.
            continue;
        }
        let Some(mut msg) = Message::parse_allowing(&buf[..n], &ALL_KINDS) else {
            continue;
        };
        // The datagram source is authoritative, not the embedded field.
        msg.set_sender(src_addr.to_wire());

        if msg.kind() == Some(MessageKind::AddrInfo) {
            if replied_to != Some(src) {
                replied_to = Some(src);
                let _ = socket.send_to(&reply, src);
            }
            hook.on_peer_discovered(src_addr, &format!("{src}"));
        } else {
            hook.on_message(msg);
        }
    }
    debug!("wifi rx loop stopped");
}

fn announce_loop(
    socket: &UdpSocket,
    probe: &[u8; MESSAGE_WIRE_SIZE],
    target: SocketAddrV4,
    interval: Duration,
    running: &AtomicBool,
    peer_known: &AtomicBool,
) {
    while running.load(Ordering::Relaxed) {
        if !peer_known.load(Ordering::Relaxed) {
            let _ = socket.send_to(probe, target);
        }
        std::thread::sleep(interval);
    }
    debug!("wifi announce loop stopped");
}
