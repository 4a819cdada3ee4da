//! TCP server worker
//!
//! Listens on one address and queues accepted sockets. The supervisor
//! promotes each accepted socket to a TCP client worker keyed by
//! (peer ip, server port), replacing any prior worker at that key.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use patchbay_core::log::LogBuffer;
use patchbay_core::status::{LinkState, StatusId};
use patchbay_core::types::FrameMode;
use patchbay_core::Addr;

use crate::workers::{reconnect_sleep, RECV_TIMEOUT};

/// An accepted connection waiting for promotion.
pub struct AcceptedConn {
    pub stream: TcpStream,
    pub addr: Addr,
}

struct Shared {
    run: AtomicBool,
    state: Mutex<LinkState>,
    log: Mutex<LogBuffer>,
    queue: Mutex<Vec<AcceptedConn>>,
}

impl Shared {
    fn set_state(&self, state: LinkState) {
        *self.state.lock() = state;
    }
}

/// Handle to a running TCP server task.
pub struct TcpServer {
    addr: Addr,
    state_id: Option<StatusId>,
    frame_mode: FrameMode,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl TcpServer {
    pub fn start(
        addr: Addr,
        state_id: Option<StatusId>,
        frame_mode: FrameMode,
        reconnect_delay_ms: u32,
    ) -> Self {
        let shared = Arc::new(Shared {
            run: AtomicBool::new(true),
            state: Mutex::new(LinkState::Uninitialized),
            log: Mutex::new(LogBuffer::new()),
            queue: Mutex::new(Vec::new()),
        });
        let handle = tokio::spawn(run_loop(shared.clone(), addr.clone(), reconnect_delay_ms));
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

    /// Swap out buffered logs and accepted connections.
    pub fn drain(&self, log: &mut LogBuffer, out: &mut Vec<AcceptedConn>) {
        out.clear();
        log.append(&mut self.shared.log.lock());
        std::mem::swap(out, &mut *self.shared.queue.lock());
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
    shared.log.lock().info(format!("tcp server {addr} started"));

    while shared.run.load(Ordering::Relaxed) {
        shared.set_state(LinkState::Connecting);

        match bind(&addr).await {
            Ok(listener) => {
                shared.set_state(LinkState::Connected);
                shared
                    .log
                    .lock()
                    .info(format!("tcp server {addr} listening"));
                accept_until_error(&shared, &listener, &addr).await;
                shared.set_state(LinkState::NotConnected);
            }
            Err(e) => {
                shared
                    .log
                    .lock()
                    .error(format!("tcp server {addr} bind failed: {e}"));
            }
        }

        if reconnect_delay_ms == 0 {
            break;
        }
        shared.log.lock().info(format!(
            "tcp server {addr} reconnecting in {}s...",
            reconnect_delay_ms / 1000
        ));
        reconnect_sleep(&shared.run, reconnect_delay_ms).await;
    }

    shared.set_state(LinkState::NotConnected);
    shared.log.lock().info(format!("tcp server {addr} stopped"));
}

async fn bind(addr: &Addr) -> std::io::Result<TcpListener> {
    let ip: Ipv4Addr = if addr.ip.is_empty() {
        Ipv4Addr::UNSPECIFIED
    } else {
        addr.ip.parse().map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid bind address {}", addr.ip),
            )
        })?
    };
    TcpListener::bind((ip, addr.port)).await
}

async fn accept_until_error(shared: &Shared, listener: &TcpListener, addr: &Addr) {
    while shared.run.load(Ordering::Relaxed) {
        match timeout(RECV_TIMEOUT, listener.accept()).await {
            Err(_) => continue,
            Ok(Ok((stream, peer))) => {
                let peer_ip = match peer {
                    SocketAddr::V4(v4) => v4.ip().to_string(),
                    _ => String::new(),
                };
                // accepted clients are keyed by the server's port
                let conn_addr = Addr::new(&peer_ip, addr.port);
                shared
                    .log
                    .lock()
                    .info(format!("tcp server {addr} accepted {peer}"));
                shared.queue.lock().push(AcceptedConn {
                    stream,
                    addr: conn_addr,
                });
            }
            Ok(Err(e)) => {
                shared
                    .log
                    .lock()
                    .error(format!("tcp server {addr} accept error: {e}"));
                return;
            }
        }
    }
}
