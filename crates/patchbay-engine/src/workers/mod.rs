//! I/O workers
//!
//! One tokio task per socket. Every worker follows the same shape: an outer
//! reconnect loop gated on an atomic run flag, a status snapshot, and
//! mutex-protected queues the supervisor drains by swap. Socket waits are
//! bounded (~100 ms receive timeout, 10 ms connect/stop slices) so the run
//! flag is observed promptly; no lock is held across an await.

pub mod tcp_client;
pub mod tcp_server;
pub mod udp_in;
pub mod udp_out;

pub use tcp_client::TcpClient;
pub use tcp_server::TcpServer;
pub use udp_in::UdpListener;
pub use udp_out::UdpSender;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use patchbay_core::osc;

pub(crate) const RECV_TIMEOUT: Duration = Duration::from_millis(100);
pub(crate) const POLL_SLICE: Duration = Duration::from_millis(10);
pub(crate) const RECV_BUF_SIZE: usize = 65_536;

/// Sleep `delay_ms`, waking every 10 ms to observe the run flag.
pub(crate) async fn reconnect_sleep(run: &AtomicBool, delay_ms: u32) {
    let mut remaining = u64::from(delay_ms);
    while remaining > 0 && run.load(Ordering::Relaxed) {
        let slice = remaining.min(POLL_SLICE.as_millis() as u64);
        tokio::time::sleep(Duration::from_millis(slice)).await;
        remaining -= slice;
    }
}

/// One-line description of a packet for the traffic log.
pub(crate) fn packet_summary(data: &[u8]) -> String {
    match osc::address_of(data) {
        Some(path) => format!("{} ({} bytes)", path, data.len()),
        None if data.starts_with(osc::BUNDLE_TAG) => format!("#bundle ({} bytes)", data.len()),
        None => format!("{} bytes", data.len()),
    }
}
