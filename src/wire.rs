//! Fixed 32-byte wire format shared by every radio backend.
//!
//! Wire layout:
//! ```text
//! ┌──────────┬────────────────┬─────────────────────────────┐
//! │ Type (1B)│ Sender addr(6B)│ Payload (25B)               │
//! └──────────┴────────────────┴─────────────────────────────┘
//!
//! Payload:
//! ┌────────────────┬──────────────────────────┬───────────┐
//! │ id1..id4 (4×1B)│ value1..value5 (5×f32 LE)│ flags (1B)│
//! └────────────────┴──────────────────────────┴───────────┘
//! ```
//!
//! The layout is packed (no padding) and identical across backends, so any
//! two nodes interoperate regardless of which radio carries the frame.
//! Floats travel as little-endian IEEE-754 bit patterns; encoding and
//! decoding preserve them bit-for-bit, NaNs included.

/// Payload size on the wire: 4 ids + 5 floats + flags.
pub const PAYLOAD_WIRE_SIZE: usize = 25;

/// Message size on the wire: type + sender + payload.
pub const MESSAGE_WIRE_SIZE: usize = 32;

/// Width of the fixed sender-address field.
pub const WIRE_ADDR_LEN: usize = 6;

/// Message type discriminants. Values 1–2 are reserved for backend-specific
/// system traffic; `AddrInfo` (2) is the network-address-discovery type used
/// only by the local-network backend and is never queued as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Application payload.
    Data = 0,
    /// Endpoint advertisement for discovery (local-network backend only).
    AddrInfo = 2,
    /// Zero-payload liveness signal; never surfaced to the application.
    Heartbeat = 3,
}

impl MessageKind {
    /// Decode a raw type byte; `None` for anything outside the enumeration.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Data),
            2 => Some(Self::AddrInfo),
            3 => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// The fixed data record applications exchange.
///
/// Field meaning is application-defined; the engine only moves it. The
/// identifiers typically address channels/servos, the floats carry axis or
/// telemetry values, and `flags` packs booleans.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Payload {
    pub id1: u8,
    pub id2: u8,
    pub id3: u8,
    pub id4: u8,
    pub value1: f32,
    pub value2: f32,
    pub value3: f32,
    pub value4: f32,
    pub value5: f32,
    pub flags: u8,
}

impl Payload {
    /// Serialize to the packed 25-byte wire form.
    pub fn to_wire(&self) -> [u8; PAYLOAD_WIRE_SIZE] {
        let mut out = [0u8; PAYLOAD_WIRE_SIZE];
        out[0] = self.id1;
        out[1] = self.id2;
        out[2] = self.id3;
        out[3] = self.id4;
        out[4..8].copy_from_slice(&self.value1.to_le_bytes());
        out[8..12].copy_from_slice(&self.value2.to_le_bytes());
        out[12..16].copy_from_slice(&self.value3.to_le_bytes());
        out[16..20].copy_from_slice(&self.value4.to_le_bytes());
        out[20..24].copy_from_slice(&self.value5.to_le_bytes());
        out[24] = self.flags;
        out
    }

    /// Deserialize from the packed 25-byte wire form.
    pub fn from_wire(bytes: &[u8; PAYLOAD_WIRE_SIZE]) -> Self {
        let f = |i: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&bytes[i..i + 4]);
            f32::from_le_bytes(b)
        };
        Self {
            id1: bytes[0],
            id2: bytes[1],
            id3: bytes[2],
            id4: bytes[3],
            value1: f(4),
            value2: f(8),
            value3: f(12),
            value4: f(16),
            value5: f(20),
            flags: bytes[24],
        }
    }
}

/// The on-wire envelope: one fixed-size frame per radio transmission.
///
/// The payload is kept as raw wire bytes so a frame relayed through the
/// queues reaches the application bit-identical to what was sent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Message {
    kind: u8,
    from: [u8; WIRE_ADDR_LEN],
    payload: [u8; PAYLOAD_WIRE_SIZE],
}

impl Message {
    /// Build a DATA message.
    pub fn data(from: [u8; WIRE_ADDR_LEN], payload: &Payload) -> Self {
        Self {
            kind: MessageKind::Data as u8,
            from,
            payload: payload.to_wire(),
        }
    }

    /// Build a zero-payload HEARTBEAT message.
    pub fn heartbeat(from: [u8; WIRE_ADDR_LEN]) -> Self {
        Self {
            kind: MessageKind::Heartbeat as u8,
            from,
            payload: [0u8; PAYLOAD_WIRE_SIZE],
        }
    }

    /// Build an ADDR_INFO discovery message (local-network backend).
    pub fn addr_info(from: [u8; WIRE_ADDR_LEN], payload: &Payload) -> Self {
        Self {
            kind: MessageKind::AddrInfo as u8,
            from,
            payload: payload.to_wire(),
        }
    }

    /// Decoded message type; `None` if the raw byte is outside the
    /// enumeration (such a message is discarded by the engine).
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_u8(self.kind)
    }

    /// Sender field as it appeared on the wire.
    pub fn sender(&self) -> [u8; WIRE_ADDR_LEN] {
        self.from
    }

    /// Overwrite the sender field with the driver-reported source address.
    /// Receive glue calls this so the engine adopts the *actual* peer even
    /// if the frame's embedded sender is stale.
    pub fn set_sender(&mut self, from: [u8; WIRE_ADDR_LEN]) {
        self.from = from;
    }

    /// Decode the payload record.
    pub fn payload(&self) -> Payload {
        Payload::from_wire(&self.payload)
    }

    /// Raw payload bytes (bit-identical to the wire).
    pub fn payload_bytes(&self) -> &[u8; PAYLOAD_WIRE_SIZE] {
        &self.payload
    }

    /// Serialize to the packed 32-byte wire frame.
    pub fn to_wire(&self) -> [u8; MESSAGE_WIRE_SIZE] {
        let mut out = [0u8; MESSAGE_WIRE_SIZE];
        out[0] = self.kind;
        out[1..1 + WIRE_ADDR_LEN].copy_from_slice(&self.from);
        out[1 + WIRE_ADDR_LEN..].copy_from_slice(&self.payload);
        out
    }

    /// Parse a received frame, accepting the base type set {Data,
    /// Heartbeat}. Anything malformed — wrong length or unknown type —
    /// yields `None` and never reaches the queues.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Self::parse_allowing(bytes, &[MessageKind::Data, MessageKind::Heartbeat])
    }

    /// Parse a received frame, accepting only the listed types. Backends
    /// with private system traffic (ADDR_INFO) extend the set.
    pub fn parse_allowing(bytes: &[u8], allowed: &[MessageKind]) -> Option<Self> {
        if bytes.len() != MESSAGE_WIRE_SIZE {
            return None;
        }
        let kind = MessageKind::from_u8(bytes[0])?;
        if !allowed.contains(&kind) {
            return None;
        }
        let mut from = [0u8; WIRE_ADDR_LEN];
        from.copy_from_slice(&bytes[1..1 + WIRE_ADDR_LEN]);
        let mut payload = [0u8; PAYLOAD_WIRE_SIZE];
        payload.copy_from_slice(&bytes[1 + WIRE_ADDR_LEN..]);
        Some(Self {
            kind: kind as u8,
            from,
            payload,
        })
    }
}
