//! ESP-NOW backend: connectionless peer-to-peer WiFi frames.
//!
//! Addresses are 6-byte station MACs. The driver is brought up
//! self-contained inside `open`: WiFi STA started (no AP join), channel
//! pinned, power save off, the broadcast peer registered, and the
//! receive callback wired straight into the engine hook. Each engine
//! instance owns its own callback closure, so two links in one process
//! never share routing state.
//!
//! On non-ESP targets the backend degrades to a transmit simulation
//! that logs frames and delivers nothing, which keeps host builds and
//! the demo binary's call sites compiling unchanged.

use log::info;
#[cfg(not(target_os = "espidf"))]
use log::debug;

use crate::addr::Address;
use crate::error::TransportError;
use crate::link::LinkHook;
use crate::transport::{Protocol, Transport};
use crate::wire::{MESSAGE_WIRE_SIZE, WIRE_ADDR_LEN};

/// Send attempts per frame before giving up.
const SEND_RETRY_MAX: u32 = 3;
/// Pause between driver retries.
const SEND_RETRY_DELAY_MS: u64 = 10;

/// Radio tunables for the ESP-NOW backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EspNowConfig {
    /// WiFi channel both peers must share.
    pub channel: u8,
    /// Transmit power cap in quarter-dBm (8..=84, i.e. 2–21 dBm).
    /// `None` keeps the driver default.
    pub max_tx_power: Option<i8>,
}

impl Default for EspNowConfig {
    fn default() -> Self {
        Self {
            channel: 2,
            max_tx_power: Some(82),
        }
    }
}

/// ESP-NOW transport. See the module docs for the bring-up contract.
pub struct EspNowLink {
    config: EspNowConfig,
    local: Address,
    current_peer: Option<Address>,
    #[cfg(target_os = "espidf")]
    driver: Option<driver::EspNowDriver>,
}

impl EspNowLink {
    pub fn new(config: EspNowConfig) -> Self {
        Self {
            config,
            local: Address::default(),
            current_peer: None,
            #[cfg(target_os = "espidf")]
            driver: None,
        }
    }

    /// Interpret `addr` as a station MAC.
    fn mac_of(addr: &Address) -> Result<[u8; WIRE_ADDR_LEN], TransportError> {
        if addr.len() != WIRE_ADDR_LEN {
            return Err(TransportError::DriverFault("espnow peer must be a 6-byte MAC"));
        }
        let mut mac = [0u8; WIRE_ADDR_LEN];
        mac.copy_from_slice(addr.as_bytes());
        Ok(mac)
    }
}

impl Transport for EspNowLink {
    fn protocol(&self) -> Protocol {
        Protocol::EspNow
    }

    fn open(&mut self, hook: LinkHook) -> Result<(), TransportError> {
        self.open_impl(hook)?;
        info!(
            "espnow up: local {}, channel {}",
            self.local, self.config.channel
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
        let mac = Self::mac_of(peer)?;
        if self.current_peer.as_ref() == Some(peer) {
            return Ok(());
        }
        self.register_peer_impl(mac)?;
        self.current_peer = Some(peer.clone());
        Ok(())
    }

    fn unset_peer(&mut self) -> Result<(), TransportError> {
        if let Some(old) = self.current_peer.take() {
            let mac = Self::mac_of(&old)?;
            self.deregister_peer_impl(mac)?;
        }
        Ok(())
    }

    fn send(
        &mut self,
        dest: &Address,
        frame: &[u8; MESSAGE_WIRE_SIZE],
    ) -> Result<(), TransportError> {
        let mac = if dest.is_broadcast() {
            [0xFF; WIRE_ADDR_LEN]
        } else {
            Self::mac_of(dest)?
        };
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_impl(mac, frame) {
                Ok(()) => return Ok(()),
                Err(_) if attempt < SEND_RETRY_MAX => {
                    std::thread::sleep(core::time::Duration::from_millis(SEND_RETRY_DELAY_MS));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.close_impl()
    }
}

// ── Device driver ───────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod driver {
    use esp_idf_svc::espnow::EspNow;
    use esp_idf_svc::wifi::EspWifi;

    /// Driver handles kept alive for the life of the link. Field order
    /// matters: ESP-NOW must deinit before the WiFi driver stops.
    pub(super) struct EspNowDriver {
        pub(super) espnow: EspNow<'static>,
        pub(super) _wifi: EspWifi<'static>,
    }
}

#[cfg(target_os = "espidf")]
impl EspNowLink {
    fn open_impl(&mut self, hook: LinkHook) -> Result<(), TransportError> {
        use esp_idf_svc::espnow::{BROADCAST, EspNow, PeerInfo};
        use esp_idf_svc::eventloop::EspSystemEventLoop;
        use esp_idf_svc::hal::peripherals::Peripherals;
        use esp_idf_svc::nvs::EspDefaultNvsPartition;
        use esp_idf_svc::sys;
        use esp_idf_svc::wifi::{ClientConfiguration, Configuration, EspWifi, WifiDeviceId};

        let peripherals = Peripherals::take()
            .map_err(|_| TransportError::InitFailed("peripherals already taken"))?;
        let sysloop = EspSystemEventLoop::take()
            .map_err(|_| TransportError::InitFailed("system event loop"))?;
        let nvs = EspDefaultNvsPartition::take()
            .map_err(|_| TransportError::InitFailed("nvs partition"))?;

        let mut wifi = EspWifi::new(peripherals.modem, sysloop, Some(nvs))
            .map_err(|_| TransportError::InitFailed("wifi driver"))?;
        wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))
            .map_err(|_| TransportError::InitFailed("wifi sta config"))?;
        wifi.start()
            .map_err(|_| TransportError::InitFailed("wifi start"))?;

        // Same channel on both ends, and no modem sleep: power save
        // adds tens of milliseconds of receive latency.
        sys::esp!(unsafe {
            sys::esp_wifi_set_channel(self.config.channel, sys::wifi_second_chan_t_WIFI_SECOND_CHAN_NONE)
        })
        .map_err(|_| TransportError::InitFailed("wifi channel"))?;
        sys::esp!(unsafe { sys::esp_wifi_set_ps(sys::wifi_ps_type_t_WIFI_PS_NONE) })
            .map_err(|_| TransportError::InitFailed("wifi power save off"))?;
        if let Some(power) = self.config.max_tx_power {
            sys::esp!(unsafe { sys::esp_wifi_set_max_tx_power(power) })
                .map_err(|_| TransportError::InitFailed("wifi tx power"))?;
        }

        let mac = wifi
            .driver()
            .get_mac(WifiDeviceId::Sta)
            .map_err(|_| TransportError::InitFailed("sta mac"))?;
        self.local =
            Address::from_bytes(&mac).ok_or(TransportError::InitFailed("invalid sta mac"))?;

        let espnow = EspNow::take().map_err(|_| TransportError::InitFailed("espnow take"))?;
        espnow
            .add_peer(PeerInfo {
                peer_addr: BROADCAST,
                channel: 0,
                encrypt: false,
                ..Default::default()
            })
            .map_err(|_| TransportError::InitFailed("broadcast peer"))?;

        espnow
            .register_recv_cb(move |src: &[u8], data: &[u8]| {
                // Runs in the WiFi task. Parse, stamp the true source
                // MAC over the sender field, and hand off; malformed
                // frames die here.
                if let Some(mut msg) = crate::wire::Message::parse(data) {
                    if src.len() == WIRE_ADDR_LEN {
                        let mut from = [0u8; WIRE_ADDR_LEN];
                        from.copy_from_slice(src);
                        msg.set_sender(from);
                    }
                    hook.on_message(msg);
                }
            })
            .map_err(|_| TransportError::InitFailed("recv callback"))?;

        self.driver = Some(driver::EspNowDriver {
            espnow,
            _wifi: wifi,
        });
        Ok(())
    }

    fn driver(&self) -> Result<&driver::EspNowDriver, TransportError> {
        self.driver
            .as_ref()
            .ok_or(TransportError::Unavailable("espnow not opened"))
    }

    fn register_peer_impl(&mut self, mac: [u8; WIRE_ADDR_LEN]) -> Result<(), TransportError> {
        use esp_idf_svc::espnow::PeerInfo;

        // Single-peer bookkeeping: drop the previous unicast entry
        // before adding the new one. The broadcast entry stays.
        if let Some(old) = &self.current_peer {
            let old_mac = Self::mac_of(old)?;
            let _ = self.driver()?.espnow.del_peer(old_mac);
        }
        self.driver()?
            .espnow
            .add_peer(PeerInfo {
                peer_addr: mac,
                channel: 0,
                encrypt: false,
                ..Default::default()
            })
            .map_err(|_| TransportError::DriverFault("espnow add_peer"))?;
        Ok(())
    }

    fn deregister_peer_impl(&mut self, mac: [u8; WIRE_ADDR_LEN]) -> Result<(), TransportError> {
        self.driver()?
            .espnow
            .del_peer(mac)
            .map_err(|_| TransportError::DriverFault("espnow del_peer"))?;
        Ok(())
    }

    fn send_impl(
        &mut self,
        mac: [u8; WIRE_ADDR_LEN],
        frame: &[u8; MESSAGE_WIRE_SIZE],
    ) -> Result<(), TransportError> {
        self.driver()?
            .espnow
            .send(mac, frame)
            .map_err(|_| TransportError::DriverFault("espnow send"))
    }

    fn close_impl(&mut self) -> Result<(), TransportError> {
        // Dropping the handles deinitializes ESP-NOW, then the radio.
        self.driver = None;
        Ok(())
    }
}

// ── Host simulation ─────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl EspNowLink {
    fn open_impl(&mut self, _hook: LinkHook) -> Result<(), TransportError> {
        use core::sync::atomic::{AtomicU8, Ordering};

        // Locally administered MACs, unique per simulated link.
        static NEXT_MAC: AtomicU8 = AtomicU8::new(1);
        let tail = NEXT_MAC.fetch_add(1, Ordering::Relaxed);
        self.local = Address::from_bytes(&[0x02, 0x00, 0x00, 0x00, 0x00, tail])
            .ok_or(TransportError::InitFailed("simulated mac"))?;
        debug!("espnow simulation: no frames will be delivered");
        Ok(())
    }

    fn register_peer_impl(&mut self, mac: [u8; WIRE_ADDR_LEN]) -> Result<(), TransportError> {
        debug!("espnow sim add_peer {mac:02X?}");
        Ok(())
    }

    fn deregister_peer_impl(&mut self, mac: [u8; WIRE_ADDR_LEN]) -> Result<(), TransportError> {
        debug!("espnow sim del_peer {mac:02X?}");
        Ok(())
    }

    fn send_impl(
        &mut self,
        mac: [u8; WIRE_ADDR_LEN],
        frame: &[u8; MESSAGE_WIRE_SIZE],
    ) -> Result<(), TransportError> {
        debug!("espnow sim send to {mac:02X?}: type {}", frame[0]);
        Ok(())
    }

    fn close_impl(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::link::LinkEngine;

    #[test]
    fn sim_provides_a_valid_local_mac() {
        let mut link = EspNowLink::new(EspNowConfig::default());
        let core = std::sync::Arc::new(crate::link::LinkCore::new(LinkConfig::default()));
        link.open(LinkHook::new(core)).unwrap();
        let local = link.local_addr();
        assert!(local.is_valid());
        assert_eq!(local.len(), WIRE_ADDR_LEN);
        assert!(!local.is_broadcast());
    }

    #[test]
    fn rejects_non_mac_peers() {
        let mut link = EspNowLink::new(EspNowConfig::default());
        let short = Address::from_bytes(&[1, 2, 3]).unwrap();
        assert!(matches!(
            link.set_peer(&short),
            Err(TransportError::DriverFault(_))
        ));
    }

    #[test]
    fn broadcast_send_succeeds_in_simulation() {
        let mut link = EspNowLink::new(EspNowConfig::default());
        let frame = [0u8; MESSAGE_WIRE_SIZE];
        link.send(&link.broadcast_addr(), &frame).unwrap();
    }

    #[test]
    fn engine_runs_over_the_simulation() {
        let engine = LinkEngine::new(
            Box::new(EspNowLink::new(EspNowConfig::default())),
            LinkConfig::default(),
        )
        .unwrap();
        assert_eq!(engine.protocol(), Protocol::EspNow);
        engine.connect();
        std::thread::sleep(core::time::Duration::from_millis(150));
        // Nothing is ever received in simulation, so the link keeps
        // waiting for a first frame; the worker must still run and
        // shut down cleanly.
        assert_eq!(engine.state(), crate::link::ConnectionState::Connecting);
        drop(engine);
    }
}
