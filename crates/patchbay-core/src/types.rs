//! The route and endpoint model shared by the engine and its callers.

use crate::addr::Addr;
use crate::status::StatusId;

/// Payload protocol spoken at a route endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protocol {
    #[default]
    Osc,
    Psn,
}

/// OSC-over-TCP framing flavor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameMode {
    /// OSC 1.0: each packet preceded by a big-endian u32 length header.
    #[default]
    LengthPrefix,
    /// OSC 1.1: SLIP framing (RFC 1055).
    Slip,
}

/// One optional clip/scale bound.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Transform {
    pub enabled: bool,
    pub value: f32,
}

impl Transform {
    pub fn enabled(value: f32) -> Self {
        Self {
            enabled: true,
            value,
        }
    }
}

/// The matching half of a route.
///
/// An empty `addr.ip` listens on every local IPv4 interface on that port;
/// otherwise only packets from that address (or its subnet, for listener
/// placement) are accepted. An empty `path` matches any packet; a path
/// containing `*` matches as a glob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteSource {
    pub addr: Addr,
    pub multicast_ip: String,
    pub protocol: Protocol,
    pub path: String,
}

/// The forwarding half of a route.
///
/// An empty `addr.ip` copies the packet's source ip at dispatch time; a zero
/// `addr.port` inherits the source port when the index is built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteDestination {
    pub addr: Addr,
    pub protocol: Protocol,
    pub path: String,
    pub in_min: Transform,
    pub in_max: Transform,
    pub out_min: Transform,
    pub out_max: Transform,
    pub script: bool,
    pub script_text: String,
}

impl RouteDestination {
    pub fn has_any_transform(&self) -> bool {
        self.in_min.enabled || self.in_max.enabled || self.out_min.enabled || self.out_max.enabled
    }
}

/// One routing rule.
///
/// `src_state_id` is shared by all routes with the same source address, and
/// `dst_state_id` by all routes with the same destination address.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Route {
    pub label: String,
    pub src: RouteSource,
    pub dst: RouteDestination,
    pub src_state_id: Option<StatusId>,
    pub dst_state_id: Option<StatusId>,
}

/// A configured TCP connection, outbound client or listening server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TcpEndpoint {
    pub label: String,
    pub server: bool,
    pub frame_mode: FrameMode,
    pub addr: Addr,
    pub state_id: Option<StatusId>,
}
