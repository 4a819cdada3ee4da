//! UDP listener worker
//!
//! Binds one UDP socket (optionally joining a multicast group), receives
//! datagrams, and queues them for the dispatcher. When the route speaks PSN,
//! inbound datagrams are decoded and unfolded into synthesized OSC messages
//! before they reach the queue; duplicate PSN frame ids are dropped.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use patchbay_core::addr::{u32_to_ip, Addr};
use patchbay_core::log::LogBuffer;
use patchbay_core::packet::RecvPacket;
use patchbay_core::psn::PsnDecoder;
use patchbay_core::status::{LinkState, StatusId};
use patchbay_core::types::Protocol;

use crate::psn_bridge;
use crate::workers::{packet_summary, reconnect_sleep, RECV_BUF_SIZE, RECV_TIMEOUT};

struct Shared {
    run: AtomicBool,
    state: Mutex<LinkState>,
    log: Mutex<LogBuffer>,
    queue: Mutex<Vec<RecvPacket>>,
}

impl Shared {
    fn set_state(&self, state: LinkState) {
        *self.state.lock() = state;
    }
}

/// Handle to a running UDP listener task.
pub struct UdpListener {
    addr: Addr,
    protocol: Protocol,
    state_id: Option<StatusId>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl UdpListener {
    pub fn start(
        addr: Addr,
        multicast_ip: String,
        protocol: Protocol,
        state_id: Option<StatusId>,
        reconnect_delay_ms: u32,
    ) -> Self {
        let shared = Arc::new(Shared {
            run: AtomicBool::new(true),
            state: Mutex::new(LinkState::Uninitialized),
            log: Mutex::new(LogBuffer::new()),
            queue: Mutex::new(Vec::new()),
        });
        let handle = tokio::spawn(run_loop(
            shared.clone(),
            addr.clone(),
            multicast_ip,
            protocol,
            reconnect_delay_ms,
        ));
        Self {
            addr,
            protocol,
            state_id,
            shared,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> &Addr {
        &self.addr
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
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

    /// Swap out buffered logs and received packets.
    pub fn drain(&self, log: &mut LogBuffer, out: &mut Vec<RecvPacket>) {
        out.clear();
        log.append(&mut self.shared.log.lock());
        std::mem::swap(out, &mut *self.shared.queue.lock());
    }

    /// Signal the task to exit without waiting for it.
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

async fn run_loop(
    shared: Arc<Shared>,
    addr: Addr,
    multicast_ip: String,
    protocol: Protocol,
    reconnect_delay_ms: u32,
) {
    shared.log.lock().info(format!("udp input {addr} started"));

    let mut psn_decoder = PsnDecoder::new();
    let mut last_psn_frame: Option<u8> = None;

    while shared.run.load(Ordering::Relaxed) {
        shared.set_state(LinkState::Connecting);

        match open_socket(&addr, &multicast_ip) {
            Ok(socket) => {
                shared.set_state(LinkState::Connected);
                recv_until_error(
                    &shared,
                    &socket,
                    &addr,
                    protocol,
                    &mut psn_decoder,
                    &mut last_psn_frame,
                )
                .await;
                shared.set_state(LinkState::NotConnected);
            }
            Err(e) => {
                // stays CONNECTING until the retry fires
                shared
                    .log
                    .lock()
                    .error(format!("udp input {addr} bind failed: {e}"));
            }
        }

        if reconnect_delay_ms == 0 {
            break;
        }
        shared.log.lock().info(format!(
            "udp input {addr} reconnecting in {}s...",
            reconnect_delay_ms / 1000
        ));
        reconnect_sleep(&shared.run, reconnect_delay_ms).await;
    }

    shared.set_state(LinkState::NotConnected);
    shared.log.lock().info(format!("udp input {addr} stopped"));
}

async fn recv_until_error(
    shared: &Shared,
    socket: &UdpSocket,
    addr: &Addr,
    protocol: Protocol,
    psn_decoder: &mut PsnDecoder,
    last_psn_frame: &mut Option<u8>,
) {
    let mut buf = vec![0u8; RECV_BUF_SIZE];

    while shared.run.load(Ordering::Relaxed) {
        let (len, from) = match timeout(RECV_TIMEOUT, socket.recv_from(&mut buf)).await {
            Err(_) => continue,
            Ok(Err(e)) => {
                shared
                    .log
                    .lock()
                    .error(format!("udp input {addr} recv error: {e}"));
                return;
            }
            Ok(Ok(received)) => received,
        };
        if len == 0 {
            continue;
        }

        let src_ip = match from {
            SocketAddr::V4(v4) => u32::from(*v4.ip()),
            _ => 0,
        };
        let data = Bytes::copy_from_slice(&buf[..len]);

        match protocol {
            Protocol::Osc => {
                shared.log.lock().recv(format!(
                    "UDP IN  [{}:{}] {}",
                    u32_to_ip(src_ip),
                    from.port(),
                    packet_summary(&data)
                ));
                shared.queue.lock().push(RecvPacket::new(data, src_ip));
            }
            Protocol::Psn => {
                // malformed PSN is dropped without a log line
                let Some(frame) = psn_decoder.decode(&data) else {
                    continue;
                };
                if *last_psn_frame == Some(frame.header.frame_id) {
                    continue;
                }
                *last_psn_frame = Some(frame.header.frame_id);

                let messages = psn_bridge::unfold_frame(&frame);
                if messages.is_empty() {
                    continue;
                }
                shared.log.lock().recv(format!(
                    "UDP IN  [{}:{}] psn frame {} ({} messages)",
                    u32_to_ip(src_ip),
                    from.port(),
                    frame.header.frame_id,
                    messages.len()
                ));
                let mut queue = shared.queue.lock();
                for message in messages {
                    queue.push(RecvPacket::new(message, src_ip));
                }
            }
        }
    }
}

fn open_socket(addr: &Addr, multicast_ip: &str) -> std::io::Result<UdpSocket> {
    use socket2::{Domain, Protocol as SockProtocol, Socket, Type};

    let group: Option<Ipv4Addr> = if multicast_ip.is_empty() {
        None
    } else {
        Some(multicast_ip.parse().map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid multicast group {multicast_ip}"),
            )
        })?)
    };

    let bind_ip: Ipv4Addr = if group.is_some() || addr.ip.is_empty() {
        Ipv4Addr::UNSPECIFIED
    } else {
        addr.ip.parse().map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid bind address {}", addr.ip),
            )
        })?
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SockProtocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV4::new(bind_ip, addr.port).into())?;

    let socket = UdpSocket::from_std(socket.into())?;
    if let Some(group) = group {
        let interface: Ipv4Addr = addr.ip.parse().unwrap_or(Ipv4Addr::UNSPECIFIED);
        socket.join_multicast_v4(group, interface)?;
    }
    Ok(socket)
}
