//! The link worker thread.
//!
//! One dedicated thread per engine owns the radio backend outright and
//! runs two cooperative async tasks on a local executor:
//!
//! - **drain loop** — truly async: wakes the instant a message lands in
//!   the outbound queue, then drains it exhaustively through the
//!   transport. No polling.
//! - **heartbeat loop** — fires every heartbeat interval: queues one
//!   heartbeat on the same outbound path data takes, runs the liveness
//!   check, and paces the metrics table.
//!
//! Because both tasks live on the same thread, the transport needs no
//! lock at all — an `Rc<RefCell<..>>` between the two loops is enough,
//! and borrows never span an await. Deferred peer-table changes from
//! receive context are applied here, always before the next transmit.

use core::cell::RefCell;
use core::time::Duration;
use std::rc::Rc;
use std::sync::Arc;

use futures_lite::future;
use log::{debug, info, warn};

use crate::drivers::{task_pin, time};
use crate::link::core::{ConnectionState, LinkCore, PeerUpdate};
use crate::metrics::{self, MetricsSnapshot};
use crate::transport::Transport;
use crate::wire::Message;

type SharedTransport = Rc<RefCell<Box<dyn Transport>>>;

/// Rows between repeats of the table header.
const HEADER_EVERY: u32 = 20;
/// Pace of the "metrics disabled" reminder while the display is on.
const DISABLED_WARN_MS: u32 = 5000;

/// Spawn the worker on its own core-pinned thread. Takes ownership of
/// the opened transport; hands back the join handle for shutdown.
pub(crate) fn spawn(
    core: Arc<LinkCore>,
    transport: Box<dyn Transport>,
) -> crate::error::Result<std::thread::JoinHandle<()>> {
    task_pin::spawn_pinned(task_pin::Core::App, 12, 16, "rc-link\0", move || {
        run_worker(core, transport)
    })
}

fn run_worker(core: Arc<LinkCore>, transport: Box<dyn Transport>) {
    let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();
    let transport: SharedTransport = Rc::new(RefCell::new(transport));

    let drain = executor.spawn(drain_loop(Arc::clone(&core), transport.clone()));
    let beat = executor.spawn(heartbeat_loop(Arc::clone(&core), transport.clone()));

    info!("link worker started ({})", transport.borrow().protocol());

    // The reactor drives timers and queue wakeups; run() returns once
    // both loops have observed the stop signal.
    future::block_on(executor.run(async {
        drain.await;
        beat.await;
    }));

    if let Err(e) = transport.borrow_mut().close() {
        warn!("transport close failed: {e}");
    }
    info!("link worker stopped");
}

// ── Drain loop ──────────────────────────────────────────────────────────

async fn drain_loop(core: Arc<LinkCore>, transport: SharedTransport) {
    loop {
        let next = future::or(async { Some(core.wait_outbound().await) }, async {
            core.wait_stop_drain().await;
            None
        })
        .await;
        let Some(first) = next else { break };

        let mut t = transport.borrow_mut();
        apply_peer_update(&core, t.as_mut());
        send_one(&core, t.as_mut(), &first);
        // Exhaustive drain: everything queued since the wakeup goes out
        // in the same pass.
        while let Some(msg) = core.try_outbound() {
            send_one(&core, t.as_mut(), &msg);
        }
    }
    debug!("drain loop stopped");
}

/// Complete a deferred peer-table change before anything else is sent,
/// so the next frame already matches the driver's registration.
fn apply_peer_update(core: &LinkCore, transport: &mut dyn Transport) {
    match core.take_peer_update() {
        Some(PeerUpdate::Set(peer)) => {
            if let Err(e) = transport.set_peer(&peer) {
                warn!("peer registration failed: {e}");
            }
        }
        Some(PeerUpdate::Clear) => {
            if let Err(e) = transport.unset_peer() {
                warn!("peer deregistration failed: {e}");
            }
        }
        None => {}
    }
}

fn send_one(core: &LinkCore, transport: &mut dyn Transport, msg: &Message) {
    let dest = core
        .peer_addr()
        .unwrap_or_else(|| transport.broadcast_addr());
    let ok = match transport.send(&dest, &msg.to_wire()) {
        Ok(()) => true,
        Err(e) => {
            warn!("send to {dest} failed: {e}");
            false
        }
    };
    core.note_send_outcome(ok, time::now_ms());
}

// ── Heartbeat loop ──────────────────────────────────────────────────────

async fn heartbeat_loop(core: Arc<LinkCore>, transport: SharedTransport) {
    let interval = Duration::from_millis(u64::from(core.config().heartbeat_interval_ms));
    let proto = transport.borrow().protocol().name();
    let mut pacer = DisplayPacer::new(time::now_ms());
    loop {
        let tick = future::or(
            async {
                async_io_mini::Timer::after(interval).await;
                true
            },
            async {
                core.wait_stop_beat().await;
                false
            },
        )
        .await;
        if !tick {
            break;
        }

        // Heartbeats take the normal outbound path; the drain loop wakes
        // and transmits like any other queued message.
        let now = time::now_ms();
        if core.heartbeats_on()
            && core.state() != ConnectionState::Error
            && !core.enqueue_outbound(Message::heartbeat(core.local_wire()))
        {
            debug!("outbound queue full; heartbeat skipped this tick");
        }
        core.check_heartbeat(now);

        pacer.maybe_print(&core, proto, now);
    }
    debug!("heartbeat loop stopped");
}

// ── Metrics table ───────────────────────────────────────────────────────

/// Paces the periodic metrics table: one row per display interval, the
/// header re-printed every [`HEADER_EVERY`] rows, and a rate-limited
/// reminder when collection is globally off.
struct DisplayPacer {
    last_row_ms: u32,
    last_warn_ms: u32,
    rows_since_header: u32,
}

impl DisplayPacer {
    fn new(now_ms: u32) -> Self {
        Self {
            last_row_ms: now_ms,
            last_warn_ms: 0,
            // First row is preceded by a header.
            rows_since_header: HEADER_EVERY,
        }
    }

    fn maybe_print(&mut self, core: &LinkCore, proto: &'static str, now_ms: u32) {
        if !core.display_enabled() {
            return;
        }
        if !metrics::enabled() {
            if time::elapsed_ms(now_ms, self.last_warn_ms) >= DISABLED_WARN_MS {
                warn!("metrics collection is globally disabled; no data to display");
                self.last_warn_ms = now_ms;
            }
            return;
        }
        if time::elapsed_ms(now_ms, self.last_row_ms) < core.display_interval_ms() {
            return;
        }
        self.last_row_ms = now_ms;

        if self.rows_since_header >= HEADER_EVERY {
            for line in table_header() {
                info!("{line}");
            }
            self.rows_since_header = 0;
        }
        info!(
            "{}",
            table_row(
                time::uptime_secs(),
                proto,
                core.state(),
                &core.send_snapshot(),
                &core.recv_snapshot(),
            )
        );
        self.rows_since_header += 1;
    }
}

fn table_header() -> [&'static str; 2] {
    [
        "Time(s) | Proto  | Conn  |   Send OK/Fail/Rate/TPS   |   Recv OK/Fail/Rate/TPS   | Total S/R",
        "--------+--------+-------+---------------------------+---------------------------+----------",
    ]
}

fn table_row(
    uptime_s: u32,
    proto: &str,
    state: ConnectionState,
    send: &MetricsSnapshot,
    recv: &MetricsSnapshot,
) -> String {
    format!(
        "{:>7} | {:<6} | {:<5} | {:>6}/{:<4}/{:>5.1}%/{:>6.1} | {:>6}/{:<4}/{:>5.1}%/{:>6.1} | {}/{}",
        uptime_s,
        proto,
        state.abbrev(),
        send.success,
        send.failure,
        send.success_rate,
        send.per_second,
        recv.success,
        recv.failure,
        recv.success_rate,
        recv.per_second,
        send.success.saturating_add(send.failure),
        recv.success.saturating_add(recv.failure),
    )
}
