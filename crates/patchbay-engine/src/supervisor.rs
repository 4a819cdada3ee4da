//! Supervisor and engine facade
//!
//! [`Engine`] is the public surface: `start` builds the routing index and
//! spawns the supervisor task, `flush` hands drained logs and status updates
//! to the observer, `stop` tears everything down. The supervisor owns every
//! worker handle and ticks ~1 ms: drain listeners and clients into the
//! dispatcher, promote accepted TCP sockets, refresh the status table, and
//! publish logs. Shutdown destroys workers in dependency order (servers,
//! clients, senders, listeners) so inbound queues drain while outbound
//! workers still exist.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use patchbay_core::log::{LogBuffer, LogEntry};
use patchbay_core::packet::RecvPacket;
use patchbay_core::psn::PsnEncoder;
use patchbay_core::status::StatusTable;
use patchbay_core::time::Clock;
use patchbay_core::types::{Route, TcpEndpoint};
use patchbay_core::Addr;

use crate::dispatch::{self, DispatchCtx};
use crate::error::{EngineError, Result};
use crate::index::{self, RoutingIndex};
use crate::nic;
use crate::script::ScriptEngine;
use crate::workers::tcp_server::AcceptedConn;
use crate::workers::{TcpClient, TcpServer, UdpListener, UdpSender};

const TICK: Duration = Duration::from_millis(1);

struct EngineShared {
    run: AtomicBool,
    log: Mutex<Vec<LogEntry>>,
    status: Mutex<StatusTable>,
}

/// The router engine. One instance runs one route set at a time.
#[derive(Default)]
pub struct Engine {
    shared: Option<Arc<EngineShared>>,
    handle: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the routing index and spawn the supervisor.
    ///
    /// `status_table` must already hold a registered row for every state id
    /// the routes and endpoints reference. Fails synchronously when the
    /// engine is running or local interfaces cannot be enumerated. Must be
    /// called from within a tokio runtime.
    pub fn start(
        &mut self,
        routes: Vec<Route>,
        tcp_endpoints: Vec<TcpEndpoint>,
        status_table: StatusTable,
        reconnect_delay_ms: u32,
    ) -> Result<()> {
        if self.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(EngineError::AlreadyRunning);
        }

        let nics = nic::local_ipv4_nics()?;
        let shared = Arc::new(EngineShared {
            run: AtomicBool::new(true),
            log: Mutex::new(Vec::new()),
            status: Mutex::new(status_table.clone()),
        });

        let supervisor = Supervisor::new(
            routes,
            tcp_endpoints,
            status_table,
            nics,
            reconnect_delay_ms,
            shared.clone(),
        );
        self.handle = Some(tokio::spawn(supervisor.run()));
        self.shared = Some(shared);
        Ok(())
    }

    /// Cooperatively stop the supervisor and every worker, and wait.
    pub async fn stop(&mut self) {
        if let Some(shared) = &self.shared {
            shared.run.store(false, Ordering::Relaxed);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Drain accumulated log entries and copy dirty status rows into the
    /// observer's table.
    pub fn flush(&self, log_out: &mut Vec<LogEntry>, status_out: &mut StatusTable) {
        if let Some(shared) = &self.shared {
            log_out.append(&mut shared.log.lock());
            shared.status.lock().flush_into(status_out);
        }
    }
}

struct Supervisor {
    routes: Vec<Route>,
    endpoints: Vec<TcpEndpoint>,
    nics: Vec<nic::Nic>,
    reconnect_delay_ms: u32,
    shared: Arc<EngineShared>,

    listeners: BTreeMap<Addr, UdpListener>,
    senders: BTreeMap<Addr, UdpSender>,
    tcp_clients: BTreeMap<Addr, TcpClient>,
    tcp_servers: BTreeMap<Addr, TcpServer>,
    /// Replaced accepted-connection workers waiting for their task to end.
    retired_clients: Vec<TcpClient>,

    index: RoutingIndex,
    status: StatusTable,
    log: LogBuffer,
    scripts: ScriptEngine,
    psn_encoder: PsnEncoder,
    clock: Clock,
}

impl Supervisor {
    fn new(
        routes: Vec<Route>,
        endpoints: Vec<TcpEndpoint>,
        status: StatusTable,
        nics: Vec<nic::Nic>,
        reconnect_delay_ms: u32,
        shared: Arc<EngineShared>,
    ) -> Self {
        Self {
            routes,
            endpoints,
            nics,
            reconnect_delay_ms,
            shared,
            listeners: BTreeMap::new(),
            senders: BTreeMap::new(),
            tcp_clients: BTreeMap::new(),
            tcp_servers: BTreeMap::new(),
            retired_clients: Vec::new(),
            index: RoutingIndex::default(),
            status,
            log: LogBuffer::new(),
            scripts: ScriptEngine::new(),
            psn_encoder: PsnEncoder::new(),
            clock: Clock::new(),
        }
    }

    async fn run(mut self) {
        self.log.info("router started");
        self.build();
        self.publish();

        while self.shared.run.load(Ordering::Relaxed) {
            self.tick();
            self.publish();
            tokio::time::sleep(TICK).await;
        }

        self.shutdown().await;
        self.publish();
    }

    /// Spawn the initial worker set: configured TCP endpoints first, then
    /// the listeners and senders the routing index calls for.
    fn build(&mut self) {
        if self.nics.is_empty() {
            self.log
                .warning("no local IPv4 interfaces found; nothing to route");
            return;
        }

        for endpoint in &self.endpoints {
            // an unspecified endpoint ip means one worker per interface
            let addrs: Vec<Addr> = if endpoint.addr.ip.is_empty() {
                self.nics
                    .iter()
                    .map(|nic| Addr::new(&nic.ip.to_string(), endpoint.addr.port))
                    .collect()
            } else {
                vec![endpoint.addr.clone()]
            };

            for addr in addrs {
                if self.tcp_clients.contains_key(&addr) || self.tcp_servers.contains_key(&addr) {
                    continue;
                }
                if endpoint.server {
                    self.tcp_servers.insert(
                        addr.clone(),
                        TcpServer::start(
                            addr,
                            endpoint.state_id,
                            endpoint.frame_mode,
                            self.reconnect_delay_ms,
                        ),
                    );
                } else {
                    self.tcp_clients.insert(
                        addr.clone(),
                        TcpClient::start(
                            addr,
                            endpoint.state_id,
                            endpoint.frame_mode,
                            self.reconnect_delay_ms,
                        ),
                    );
                }
            }
        }

        let client_addrs: BTreeSet<Addr> = self.tcp_clients.keys().cloned().collect();
        let build = index::build(&self.routes, &client_addrs, &self.nics);
        self.index = build.index;

        for spec in build.listeners {
            self.listeners.insert(
                spec.addr.clone(),
                UdpListener::start(
                    spec.addr,
                    spec.multicast_ip,
                    spec.protocol,
                    spec.state_id,
                    self.reconnect_delay_ms,
                ),
            );
        }
        for spec in build.senders {
            self.senders.insert(
                spec.addr.clone(),
                UdpSender::start(spec.addr, spec.state_id, self.reconnect_delay_ms),
            );
        }

        self.log.info(format!(
            "routing {} rules across {} listeners, {} senders, {} tcp workers",
            self.routes.len(),
            self.listeners.len(),
            self.senders.len(),
            self.tcp_clients.len() + self.tcp_servers.len(),
        ));
    }

    fn tick(&mut self) {
        let mut recv_q: Vec<RecvPacket> = Vec::new();
        let mut accept_q: Vec<AcceptedConn> = Vec::new();

        // UDP listeners: drain, update status, dispatch
        for listener in self.listeners.values() {
            listener.drain(&mut self.log, &mut recv_q);
            if let Some(id) = listener.state_id() {
                self.status.set_state(id, listener.state());
                if !recv_q.is_empty() {
                    self.status.set_activity(id);
                }
            }

            let port = listener.addr().port;
            let mut ctx = DispatchCtx {
                index: &self.index,
                senders: &mut self.senders,
                tcp_clients: &self.tcp_clients,
                status: &mut self.status,
                log: &mut self.log,
                scripts: &mut self.scripts,
                psn_encoder: &mut self.psn_encoder,
                clock: &self.clock,
                reconnect_delay_ms: self.reconnect_delay_ms,
            };
            dispatch::process_queue(&mut ctx, port, &mut recv_q);
        }

        // TCP servers: drain accepted sockets and promote them
        for server in self.tcp_servers.values() {
            server.drain(&mut self.log, &mut accept_q);
            if let Some(id) = server.state_id() {
                self.status.set_state(id, server.state());
                if !accept_q.is_empty() {
                    self.status.set_activity(id);
                }
            }

            for conn in accept_q.drain(..) {
                // a reconnecting peer replaces its previous worker
                if let Some(old) = self.tcp_clients.remove(&conn.addr) {
                    old.begin_stop();
                    self.retired_clients.push(old);
                }
                let client = TcpClient::start_accepted(
                    conn.stream,
                    conn.addr.clone(),
                    server.state_id(),
                    server.frame_mode(),
                    self.reconnect_delay_ms,
                );
                self.tcp_clients.insert(conn.addr, client);
            }
        }

        // TCP clients: drain, update status, dispatch
        for client in self.tcp_clients.values() {
            client.drain(&mut self.log, &mut recv_q);
            if let Some(id) = client.state_id() {
                self.status.set_state(id, client.state());
                if !recv_q.is_empty() {
                    self.status.set_activity(id);
                }
            }

            let port = client.addr().port;
            let mut ctx = DispatchCtx {
                index: &self.index,
                senders: &mut self.senders,
                tcp_clients: &self.tcp_clients,
                status: &mut self.status,
                log: &mut self.log,
                scripts: &mut self.scripts,
                psn_encoder: &mut self.psn_encoder,
                clock: &self.clock,
                reconnect_delay_ms: self.reconnect_delay_ms,
            };
            dispatch::process_queue(&mut ctx, port, &mut recv_q);
        }

        // UDP senders: drain logs, update status
        for sender in self.senders.values() {
            sender.drain(&mut self.log);
            if let Some(id) = sender.state_id() {
                self.status.set_state(id, sender.state());
            }
        }

        self.retired_clients.retain(|c| c.is_running());
    }

    /// Merge the private log into the shared queue, stamping entries, and
    /// flush status updates to the observer.
    fn publish(&mut self) {
        if !self.log.is_empty() {
            let mut shared_log = self.shared.log.lock();
            self.log.drain_into(&mut shared_log);
        }

        if self.status.dirty() {
            self.status.flush_into(&mut self.shared.status.lock());
        }
    }

    /// Stop workers in dependency order, draining final logs.
    async fn shutdown(&mut self) {
        let mut recv_q: Vec<RecvPacket> = Vec::new();
        let mut accept_q: Vec<AcceptedConn> = Vec::new();

        for (_, mut server) in std::mem::take(&mut self.tcp_servers) {
            server.stop().await;
            server.drain(&mut self.log, &mut accept_q);
            // pending accepted sockets are closed by dropping them
            accept_q.clear();
        }

        for (_, mut client) in std::mem::take(&mut self.tcp_clients) {
            client.stop().await;
            client.drain(&mut self.log, &mut recv_q);
        }
        for mut client in std::mem::take(&mut self.retired_clients) {
            client.stop().await;
            client.drain(&mut self.log, &mut recv_q);
        }

        for (_, mut sender) in std::mem::take(&mut self.senders) {
            sender.stop().await;
            sender.drain(&mut self.log);
        }

        for (_, mut listener) in std::mem::take(&mut self.listeners) {
            listener.stop().await;
            listener.drain(&mut self.log, &mut recv_q);
        }

        self.status.deactivate();
        self.log.info("router stopped");
    }
}
