//! UDP sender worker
//!
//! Owns one outbound UDP socket per destination address and drains a send
//! queue. Packets are dropped while the socket is down; a short bootstrap
//! window after start keeps the first burst from being lost while the socket
//! is still initializing.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use patchbay_core::addr::Addr;
use patchbay_core::log::LogBuffer;
use patchbay_core::packet::Packet;
use patchbay_core::status::{LinkState, StatusId};

use crate::workers::{packet_summary, reconnect_sleep};

/// Queue grace period after start; see [`UdpSender::send`].
const BOOTSTRAP_WINDOW: Duration = Duration::from_secs(2);

struct Shared {
    run: AtomicBool,
    state: Mutex<LinkState>,
    log: Mutex<LogBuffer>,
    queue: Mutex<Vec<Packet>>,
    started: Instant,
}

impl Shared {
    fn set_state(&self, state: LinkState) {
        *self.state.lock() = state;
    }
}

/// Handle to a running UDP sender task.
pub struct UdpSender {
    addr: Addr,
    state_id: Option<StatusId>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl UdpSender {
    pub fn start(addr: Addr, state_id: Option<StatusId>, reconnect_delay_ms: u32) -> Self {
        let shared = Arc::new(Shared {
            run: AtomicBool::new(true),
            state: Mutex::new(LinkState::Uninitialized),
            log: Mutex::new(LogBuffer::new()),
            queue: Mutex::new(Vec::new()),
            started: Instant::now(),
        });
        let handle = tokio::spawn(run_loop(shared.clone(), addr.clone(), reconnect_delay_ms));
        Self {
            addr,
            state_id,
            shared,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> &Addr {
        &self.addr
    }

    pub fn state_id(&self) -> Option<StatusId> {
        self.state_id
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Queue a packet. Returns false when the queue is disabled.
    ///
    /// The queue accepts packets while CONNECTED and during a short window
    /// right after start, so traffic arriving before the socket finishes
    /// opening is buffered rather than dropped.
    pub fn send(&self, packet: Packet) -> bool {
        let enabled = *self.shared.state.lock() == LinkState::Connected
            || self.shared.started.elapsed() < BOOTSTRAP_WINDOW;
        if !enabled {
            return false;
        }
        self.shared.queue.lock().push(packet);
        true
    }

    pub fn drain(&self, log: &mut LogBuffer) {
        log.append(&mut self.shared.log.lock());
    }

    pub fn begin_stop(&self) {
        self.shared.run.store(false, Ordering::Relaxed);
    }

    pub async fn stop(&mut self) {
        self.begin_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn run_loop(shared: Arc<Shared>, addr: Addr, reconnect_delay_ms: u32) {
    shared.log.lock().info(format!("udp output {addr} started"));

    let target: Option<SocketAddrV4> = addr
        .ip
        .parse::<Ipv4Addr>()
        .ok()
        .map(|ip| SocketAddrV4::new(ip, addr.port));

    while shared.run.load(Ordering::Relaxed) {
        shared.set_state(LinkState::Connecting);

        let opened = match target {
            Some(target) => match open_socket(&addr).await {
                Ok(socket) => {
                    shared.set_state(LinkState::Connected);
                    send_until_error(&shared, &socket, &addr, target).await;
                    shared.set_state(LinkState::NotConnected);
                    true
                }
                Err(e) => {
                    shared
                        .log
                        .lock()
                        .error(format!("udp output {addr} open failed: {e}"));
                    false
                }
            },
            None => {
                shared
                    .log
                    .lock()
                    .error(format!("udp output {addr} has no valid destination ip"));
                false
            }
        };

        if !opened {
            shared.set_state(LinkState::NotConnected);
        }
        if reconnect_delay_ms == 0 {
            break;
        }
        shared.log.lock().info(format!(
            "udp output {addr} reconnecting in {}s...",
            reconnect_delay_ms / 1000
        ));
        reconnect_sleep(&shared.run, reconnect_delay_ms).await;
    }

    shared.set_state(LinkState::NotConnected);
    shared.log.lock().info(format!("udp output {addr} stopped"));
}

async fn send_until_error(
    shared: &Shared,
    socket: &UdpSocket,
    addr: &Addr,
    target: SocketAddrV4,
) {
    while shared.run.load(Ordering::Relaxed) {
        let batch: Vec<Packet> = std::mem::take(&mut *shared.queue.lock());

        for packet in batch {
            match socket.send_to(&packet, target).await {
                Ok(_) => {
                    shared
                        .log
                        .lock()
                        .send(format!("UDP OUT [{addr}] {}", packet_summary(&packet)));
                }
                Err(e) => {
                    shared
                        .log
                        .lock()
                        .error(format!("udp output {addr} send error: {e}"));
                    shared.queue.lock().clear();
                    return;
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

async fn open_socket(addr: &Addr) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    if addr.is_multicast() {
        socket.set_multicast_ttl_v4(1)?;
        socket.set_multicast_loop_v4(true)?;
    }
    Ok(socket)
}
