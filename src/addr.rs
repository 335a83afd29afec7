//! Generic cross-radio addressing.
//!
//! Radios disagree on what an address is: a 6-byte MAC, a 5-byte pipe id, an
//! IPv4 endpoint. [`Address`] stores up to 16 raw bytes with an explicit used
//! length and is the single source of truth for peer/local identity; the
//! fixed 6-byte field inside a wire [`crate::wire::Message`] is only a
//! read-only presentation view of it.

use core::fmt;

use crate::wire::WIRE_ADDR_LEN;

/// Maximum raw address width across all supported radios.
pub const MAX_ADDR_LEN: usize = 16;

/// A backend-agnostic radio address.
///
/// Equality is a byte compare over the used length, so `[0xAA, 0xBB]` and
/// `[0xAA, 0xBB, 0x00]` are distinct addresses. The default value is the
/// empty (invalid) address, used as "unset".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    bytes: heapless::Vec<u8, MAX_ADDR_LEN>,
}

impl Address {
    /// Build from raw bytes; `None` unless `0 < len <= 16`.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        let mut bytes = heapless::Vec::new();
        bytes.extend_from_slice(raw).ok()?;
        Some(Self { bytes })
    }

    /// The all-0xFF broadcast address at a backend's address size.
    pub fn broadcast(len: usize) -> Self {
        debug_assert!(len >= 1 && len <= MAX_ADDR_LEN);
        let len = len.clamp(1, MAX_ADDR_LEN);
        let mut bytes = heapless::Vec::new();
        for _ in 0..len {
            // Cannot overflow: len is clamped to capacity.
            let _ = bytes.push(0xFF);
        }
        Self { bytes }
    }

    /// Rebuild an address from the fixed wire field, keeping only the
    /// backend's declared address size.
    pub fn from_wire(field: &[u8; WIRE_ADDR_LEN], used: usize) -> Self {
        let used = used.clamp(1, WIRE_ADDR_LEN);
        // Field width is bounded by MAX_ADDR_LEN, so this cannot fail.
        Self::from_bytes(&field[..used]).unwrap_or_default()
    }

    /// Raw bytes over the used length.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Used length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for the unset address.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Validity predicate: a non-empty address within the length bound.
    pub fn is_valid(&self) -> bool {
        !self.bytes.is_empty()
    }

    /// Broadcast predicate: every used byte is 0xFF.
    pub fn is_broadcast(&self) -> bool {
        !self.bytes.is_empty() && self.bytes.iter().all(|b| *b == 0xFF)
    }

    /// Read-only fixed-width view for the wire sender field. Addresses
    /// shorter than 6 bytes are zero-padded; longer ones are truncated.
    pub fn to_wire(&self) -> [u8; WIRE_ADDR_LEN] {
        let mut out = [0u8; WIRE_ADDR_LEN];
        let n = self.bytes.len().min(WIRE_ADDR_LEN);
        out[..n].copy_from_slice(&self.bytes[..n]);
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bytes.is_empty() {
            return write!(f, "(unset)");
        }
        for (i, b) in self.bytes.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

/// Capacity of the human-readable discovery info string.
pub const DISCOVERY_INFO_LEN: usize = 48;

/// Outcome of a backend discovery exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryResult {
    /// True once a peer has been discovered.
    pub discovered: bool,
    /// The discovered peer's address.
    pub peer: Address,
    /// Short backend-supplied description (endpoint, RSSI, ...).
    pub info: heapless::String<DISCOVERY_INFO_LEN>,
}

impl DiscoveryResult {
    /// Record a discovery; `info` is truncated to capacity if needed.
    pub fn new(peer: Address, info: &str) -> Self {
        let mut s = heapless::String::new();
        for c in info.chars() {
            if s.push(c).is_err() {
                break;
            }
        }
        Self {
            discovered: true,
            peer,
            info: s,
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn from_bytes_round_trips(raw in proptest::collection::vec(any::<u8>(), 1..=16)) {
            let a = Address::from_bytes(&raw).unwrap();
            prop_assert_eq!(a.as_bytes(), raw.as_slice());
            prop_assert!(a.is_valid());
        }

        #[test]
        fn broadcast_is_self_consistent(len in 1usize..=16) {
            prop_assert!(Address::broadcast(len).is_broadcast());
        }

        #[test]
        fn equality_is_reflexive(raw in proptest::collection::vec(any::<u8>(), 1..=16)) {
            let a = Address::from_bytes(&raw).unwrap();
            let b = Address::from_bytes(&raw).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn wire_view_never_panics(raw in proptest::collection::vec(any::<u8>(), 1..=16)) {
            let a = Address::from_bytes(&raw).unwrap();
            let _ = a.to_wire();
        }
    }
}
