//! TCP client worker
//!
//! Runs one TCP connection, either dialed outbound or adopted from a server
//! accept. While connected it unframes the receive stream into packets
//! (tagged with the peer's IPv4) and drains a send queue of pre-framed
//! bytes. Connection loss feeds the usual reconnect loop; adopted sockets
//! reconnect by dialing out like any other client.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use patchbay_core::framing::{encode_frame, FrameDecoder};
use patchbay_core::log::LogBuffer;
use patchbay_core::packet::{Packet, RecvPacket};
use patchbay_core::status::{LinkState, StatusId};
use patchbay_core::types::FrameMode;
use patchbay_core::Addr;

use crate::workers::{packet_summary, reconnect_sleep, POLL_SLICE, RECV_TIMEOUT};

struct Shared {
    run: AtomicBool,
    state: Mutex<LinkState>,
    log: Mutex<LogBuffer>,
    recv_q: Mutex<Vec<RecvPacket>>,
    send_q: Mutex<Vec<Packet>>,
}

impl Shared {
    fn set_state(&self, state: LinkState) {
        *self.state.lock() = state;
    }
}

/// Handle to a running TCP client task.
pub struct TcpClient {
    addr: Addr,
    state_id: Option<StatusId>,
    frame_mode: FrameMode,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl TcpClient {
    /// Dial an outbound connection.
    pub fn start(
        addr: Addr,
        state_id: Option<StatusId>,
        frame_mode: FrameMode,
        reconnect_delay_ms: u32,
    ) -> Self {
        Self::spawn(None, addr, state_id, frame_mode, reconnect_delay_ms)
    }

    /// Adopt a socket accepted by a TCP server worker.
    pub fn start_accepted(
        stream: TcpStream,
        addr: Addr,
        state_id: Option<StatusId>,
        frame_mode: FrameMode,
        reconnect_delay_ms: u32,
    ) -> Self {
        Self::spawn(Some(stream), addr, state_id, frame_mode, reconnect_delay_ms)
    }

    fn spawn(
        accepted: Option<TcpStream>,
        addr: Addr,
        state_id: Option<StatusId>,
        frame_mode: FrameMode,
        reconnect_delay_ms: u32,
    ) -> Self {
        let shared = Arc::new(Shared {
            run: AtomicBool::new(true),
            state: Mutex::new(LinkState::Uninitialized),
            log: Mutex::new(LogBuffer::new()),
            recv_q: Mutex::new(Vec::new()),
            send_q: Mutex::new(Vec::new()),
        });
        let handle = tokio::spawn(run_loop(
            shared.clone(),
            accepted,
            addr.clone(),
            frame_mode,
            reconnect_delay_ms,
        ));
        Self {
            addr,
            state_id,
            frame_mode,
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

    pub fn frame_mode(&self) -> FrameMode {
        self.frame_mode
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Queue an already-framed packet. Returns false unless connected.
    pub fn send(&self, framed: Packet) -> bool {
        if *self.shared.state.lock() != LinkState::Connected {
            return false;
        }
        self.shared.send_q.lock().push(framed);
        true
    }

    /// Frame a payload for this connection's mode and queue it.
    pub fn send_framed(&self, payload: &[u8]) -> bool {
        self.send(Packet::from(encode_frame(self.frame_mode, payload)))
    }

    /// Swap out buffered logs and unframed inbound packets.
    pub fn drain(&self, log: &mut LogBuffer, out: &mut Vec<RecvPacket>) {
        out.clear();
        log.append(&mut self.shared.log.lock());
        std::mem::swap(out, &mut *self.shared.recv_q.lock());
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

async fn run_loop(
    shared: Arc<Shared>,
    mut accepted: Option<TcpStream>,
    addr: Addr,
    frame_mode: FrameMode,
    reconnect_delay_ms: u32,
) {
    shared.log.lock().info(format!("tcp client {addr} started"));

    while shared.run.load(Ordering::Relaxed) {
        shared.set_state(LinkState::Connecting);

        let stream = match accepted.take() {
            Some(stream) => Some(stream),
            None => dial(&shared, &addr).await,
        };

        if let Some(stream) = stream {
            shared.set_state(LinkState::Connected);
            shared.log.lock().info(format!("tcp client {addr} connected"));
            exchange_until_error(&shared, stream, &addr, frame_mode).await;
            shared.send_q.lock().clear();
        }

        shared.set_state(LinkState::NotConnected);

        if reconnect_delay_ms == 0 {
            break;
        }
        shared.log.lock().info(format!(
            "tcp client {addr} reconnecting in {}s...",
            reconnect_delay_ms / 1000
        ));
        reconnect_sleep(&shared.run, reconnect_delay_ms).await;
    }

    shared.set_state(LinkState::NotConnected);
    shared.log.lock().info(format!("tcp client {addr} stopped"));
}

/// Dial the remote, polling in short slices so stop is observed quickly.
async fn dial(shared: &Shared, addr: &Addr) -> Option<TcpStream> {
    let target: SocketAddr = match format!("{}:{}", addr.ip, addr.port).parse() {
        Ok(target) => target,
        Err(_) => {
            shared
                .log
                .lock()
                .error(format!("tcp client {addr} has no valid address"));
            return None;
        }
    };

    let connect = TcpStream::connect(target);
    tokio::pin!(connect);

    loop {
        if !shared.run.load(Ordering::Relaxed) {
            return None;
        }
        match timeout(POLL_SLICE, connect.as_mut()).await {
            Ok(Ok(stream)) => return Some(stream),
            Ok(Err(e)) => {
                shared
                    .log
                    .lock()
                    .debug(format!("tcp client {addr} connect failed: {e}"));
                return None;
            }
            Err(_) => continue,
        }
    }
}

async fn exchange_until_error(
    shared: &Shared,
    stream: TcpStream,
    addr: &Addr,
    frame_mode: FrameMode,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut decoder = FrameDecoder::new(frame_mode);
    let peer_ip = addr.ip_u32();
    let mut buf = vec![0u8; 8192];

    while shared.run.load(Ordering::Relaxed) {
        match timeout(RECV_TIMEOUT, reader.read(&mut buf)).await {
            Err(_) => {}
            Ok(Ok(0)) => {
                shared
                    .log
                    .lock()
                    .info(format!("tcp client {addr} connection closed by peer"));
                return;
            }
            Ok(Ok(n)) => {
                decoder.push(&buf[..n]);
                loop {
                    match decoder.next_frame() {
                        Ok(Some(frame)) => {
                            shared
                                .log
                                .lock()
                                .recv(format!("TCP IN  [{addr}] {}", packet_summary(&frame)));
                            shared
                                .recv_q
                                .lock()
                                .push(RecvPacket::new(frame, peer_ip));
                        }
                        Ok(None) => break,
                        Err(e) => {
                            shared
                                .log
                                .lock()
                                .error(format!("tcp client {addr} dropping connection: {e}"));
                            return;
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                shared
                    .log
                    .lock()
                    .error(format!("tcp client {addr} recv error: {e}"));
                return;
            }
        }

        let batch: Vec<Packet> = std::mem::take(&mut *shared.send_q.lock());
        for framed in batch {
            if let Err(e) = writer.write_all(&framed).await {
                shared
                    .log
                    .lock()
                    .error(format!("tcp client {addr} send error: {e}"));
                return;
            }
            shared
                .log
                .lock()
                .send(format!("TCP OUT [{addr}] {} bytes", framed.len()));
        }
    }
}
