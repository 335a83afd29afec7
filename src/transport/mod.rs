//! Radio backend abstraction.
//!
//! Concrete implementations:
//! - ESP-NOW connectionless 2.4 GHz frames ([`espnow`])
//! - UDP over the local network, with endpoint discovery ([`wifi`])
//!
//! The engine drives backends exclusively through [`Transport`] trait
//! objects, so adding a radio requires zero changes to the link logic.
//! A backend owns its driver handles; the engine owns the policy
//! (queues, liveness, retries above the driver's own bounded retry).
//!
//! # Contract
//!
//! - `open` brings the radio up and wires receive delivery into the
//!   provided [`LinkHook`]; from then on the backend parses every raw
//!   frame, stamps the driver-reported source over the sender field, and
//!   forwards only well-formed messages. Malformed frames die in the
//!   backend, silently.
//! - `send` transmits one fixed-size wire frame, retrying transient
//!   driver errors a bounded number of times before reporting failure.
//!   It, and the peer bookkeeping calls, run only on the engine worker.
//! - Hook methods may be called from driver receive context, so
//!   backends must never invoke them while holding a driver lock.

use crate::addr::Address;
use crate::error::TransportError;
use crate::link::LinkHook;
use crate::wire::MESSAGE_WIRE_SIZE;

pub mod espnow;
pub mod wifi;

use core::fmt;

/// Which radio carries the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    /// ESP-NOW connectionless WiFi frames.
    EspNow = 0,
    /// UDP datagrams over an infrastructure WiFi network.
    Wifi = 1,
    /// Bluetooth Low Energy (reserved, no backend yet).
    Ble = 2,
    /// nRF24L01+ 2.4 GHz radio (reserved, no backend yet).
    Nrf24 = 3,
}

impl Protocol {
    /// Fixed-width tag used in logs and the metrics table.
    pub fn name(self) -> &'static str {
        match self {
            Self::EspNow => "ESPNOW",
            Self::Wifi => "WIFI",
            Self::Ble => "BLE",
            Self::Nrf24 => "NRF24",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One radio backend.
///
/// Implementations are `Send` because the engine moves the backend onto
/// its worker thread after `open`; all post-`open` driver calls happen
/// there.
pub trait Transport: Send {
    /// The radio this backend drives.
    fn protocol(&self) -> Protocol;

    /// Bring the radio up and start delivering received frames into
    /// `hook`. Called once, before the backend moves to the worker.
    fn open(&mut self, hook: LinkHook) -> Result<(), TransportError>;

    /// This node's own address. Valid after `open`.
    fn local_addr(&self) -> Address;

    /// Native address width in bytes (6 for a MAC, 6 for IPv4+port, ...).
    fn addr_size(&self) -> usize;

    /// The all-stations address at this backend's width.
    fn broadcast_addr(&self) -> Address {
        Address::broadcast(self.addr_size())
    }

    /// Register `peer` as the unicast destination, replacing any
    /// previous registration (driver-side bookkeeping included).
    fn set_peer(&mut self, peer: &Address) -> Result<(), TransportError>;

    /// Drop the unicast peer registration, if any.
    fn unset_peer(&mut self) -> Result<(), TransportError>;

    /// Transmit one wire frame to `dest`, applying the backend's own
    /// bounded retry for transient driver errors.
    fn send(
        &mut self,
        dest: &Address,
        frame: &[u8; MESSAGE_WIRE_SIZE],
    ) -> Result<(), TransportError>;

    /// Tear the radio down and stop frame delivery. Idempotent.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Instantiate the default backend for `protocol`.
///
/// Backends with tunables (endpoints, channels) can instead be
/// constructed directly with their config type and handed to the engine.
pub fn create(protocol: Protocol) -> Result<Box<dyn Transport>, TransportError> {
    match protocol {
        Protocol::EspNow => Ok(Box::new(espnow::EspNowLink::new(
            espnow::EspNowConfig::default(),
        ))),
        Protocol::Wifi => Ok(Box::new(wifi::WifiLink::new(wifi::WifiConfig::default())?)),
        Protocol::Ble => Err(TransportError::Unavailable("BLE backend not implemented")),
        Protocol::Nrf24 => Err(TransportError::Unavailable(
            "nRF24 backend not implemented",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_names_are_fixed() {
        assert_eq!(Protocol::EspNow.name(), "ESPNOW");
        assert_eq!(Protocol::Wifi.name(), "WIFI");
        assert_eq!(format!("{}", Protocol::Nrf24), "NRF24");
    }

    #[test]
    fn reserved_protocols_refuse_creation() {
        assert!(matches!(
            create(Protocol::Ble),
            Err(TransportError::Unavailable(_))
        ));
        assert!(matches!(
            create(Protocol::Nrf24),
            Err(TransportError::Unavailable(_))
        ));
    }
}
