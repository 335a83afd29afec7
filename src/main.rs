//! RC Link demo firmware — Main Entry Point
//!
//! Flash the same image to two boards and they pair up over the chosen
//! radio, exchange control frames, and print link metrics.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  main (this file)                                            │
//! │    sends a synthetic control payload at 20 Hz                │
//! │    logs received payloads + discovery events                 │
//! │                                                              │
//! │  LinkEngine                                                  │
//! │    queues · heartbeats · liveness · metrics display          │
//! │                                                              │
//! │  Transport backend (ESP-NOW by default, UDP optional)        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

// ── Module declarations ───────────────────────────────────────
pub mod addr;
pub mod config;
pub mod drivers;
pub mod error;
pub mod link;
pub mod metrics;
pub mod transport;
pub mod wire;

// ── Imports ───────────────────────────────────────────────────
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Result;
use log::{info, warn};

use config::{LinkConfig, LinkMode};
use link::LinkEngine;
use transport::Protocol;
use wire::Payload;

// ── Demo knobs ────────────────────────────────────────────────

/// Which radio carries the demo link.
const PROTOCOL: Protocol = Protocol::EspNow;

/// Station credentials for [`Protocol::Wifi`]; ignored by ESP-NOW.
const WIFI_SSID: &str = match option_env!("RC_WIFI_SSID") {
    Some(ssid) => ssid,
    None => "",
};
const WIFI_PASS: &str = match option_env!("RC_WIFI_PASS") {
    Some(pass) => pass,
    None => "",
};

/// Control frame cadence.
const TICK_MS: u64 = 50;

static FRAMES_SEEN: AtomicU32 = AtomicU32::new(0);

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  RC Link v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Network bring-up (UDP links only) ──────────────────
    // ESP-NOW owns its own radio bring-up inside the backend; the UDP
    // backend expects an already-joined station network.
    let _station = match PROTOCOL {
        Protocol::Wifi => Some(join_station()?),
        _ => None,
    };

    // ── 3. Link engine ────────────────────────────────────────
    // A control link wants the latest stick sample, not a backlog.
    let link_config = LinkConfig {
        mode: LinkMode::Fast,
        ..LinkConfig::default()
    };
    let engine = LinkEngine::with_protocol(PROTOCOL, link_config)?;

    engine.set_on_receive(|msg| {
        let n = FRAMES_SEEN.fetch_add(1, Ordering::Relaxed);
        if n % 20 == 0 {
            let p = msg.payload();
            info!(
                "rx #{}: ax={:+.2} ay={:+.2} flags={:#04X}",
                n, p.value1, p.value2, p.flags
            );
        }
    });
    engine.set_on_discovery(|found| {
        info!("peer discovered: {} ({})", found.peer, found.info.as_str());
    });

    engine.connect();
    engine.enable_metrics_display(true, 1_000);
    info!("link up on {}, local address {}", PROTOCOL, engine.local_addr());

    // ── 4. Control loop ───────────────────────────────────────
    // Synthetic sticks: a triangle sweep on two axes plus a button
    // word, the shape a real controller task would produce.
    let mut tick: u32 = 0;
    loop {
        tick = tick.wrapping_add(1);
        let phase = (tick % 200) as f32 / 200.0;
        let sweep = if phase < 0.5 {
            phase * 4.0 - 1.0
        } else {
            3.0 - phase * 4.0
        };

        let sample = Payload {
            id1: 1,
            value1: sweep,
            value2: -sweep,
            value3: 0.5,
            flags: (tick / 100 % 2) as u8,
            ..Payload::default()
        };
        if let Err(e) = engine.send_data(&sample) {
            warn!("send refused: {e}");
        }

        std::thread::sleep(std::time::Duration::from_millis(TICK_MS));
    }
}

// ── WiFi station join ─────────────────────────────────────────

/// Join the configured station network and block until the netif is
/// up. The returned handle must stay alive for the link's lifetime.
fn join_station() -> Result<esp_idf_svc::wifi::BlockingWifi<esp_idf_svc::wifi::EspWifi<'static>>> {
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::peripherals::Peripherals;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::wifi::{
        AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi,
    };

    anyhow::ensure!(
        !WIFI_SSID.is_empty(),
        "set RC_WIFI_SSID / RC_WIFI_PASS at build time for UDP links"
    );

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sysloop.clone(), Some(nvs))?,
        sysloop,
    )?;
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: WIFI_SSID
            .try_into()
            .map_err(|()| anyhow::anyhow!("SSID too long"))?,
        password: WIFI_PASS
            .try_into()
            .map_err(|()| anyhow::anyhow!("password too long"))?,
        auth_method: if WIFI_PASS.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        },
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.connect()?;
    wifi.wait_netif_up()?;

    let ip = wifi.wifi().sta_netif().get_ip_info()?.ip;
    info!("WiFi: joined '{WIFI_SSID}' with address {ip}");
    Ok(wifi)
}
