//! Patchbay Core
//!
//! Protocol-level primitives for the patchbay router. No I/O lives here:
//! this crate provides
//! - the address, packet, and route model ([`Addr`], [`Packet`], [`Route`])
//! - OSC packet helpers over `rosc` ([`osc`])
//! - TCP stream framing, length-prefix and SLIP ([`framing`])
//! - path rewriting and the numeric clip/scale transform ([`rewrite`], [`transform`])
//! - the PosiStageNet data-packet codec ([`psn`])
//! - the log buffer and status table shared with the observer ([`log`], [`status`])

pub mod addr;
pub mod error;
pub mod framing;
pub mod log;
pub mod osc;
pub mod packet;
pub mod psn;
pub mod rewrite;
pub mod status;
pub mod time;
pub mod transform;
pub mod types;

pub use addr::Addr;
pub use error::{Error, Result};
pub use framing::FrameDecoder;
pub use log::{LogBuffer, LogEntry, Severity};
pub use packet::{Packet, RecvPacket};
pub use status::{LinkState, StatusEntry, StatusId, StatusTable};
pub use time::Clock;
pub use types::{
    FrameMode, Protocol, Route, RouteDestination, RouteSource, TcpEndpoint, Transform,
};

/// Default PosiStageNet UDP port.
pub const DEFAULT_PSN_PORT: u16 = 56565;

/// Default PosiStageNet multicast group.
pub const DEFAULT_PSN_MULTICAST_IP: &str = "236.10.10.10";
