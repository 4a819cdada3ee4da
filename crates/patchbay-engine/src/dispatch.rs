//! Packet dispatch
//!
//! Turns each drained inbound packet into zero or more outbound packets:
//! bundles are exploded first, candidates are collected from the routing
//! index, and every candidate destination gets a rewritten/transformed
//! packet over the right transport. A configured TCP client always takes
//! precedence over UDP for its address; UDP senders are created on demand.

use std::collections::BTreeMap;

use bytes::Bytes;
use rosc::OscType;

use patchbay_core::addr::Addr;
use patchbay_core::log::LogBuffer;
use patchbay_core::osc;
use patchbay_core::packet::{Packet, RecvPacket};
use patchbay_core::psn::PsnEncoder;
use patchbay_core::rewrite::{self, InvalidIndex};
use patchbay_core::status::{StatusId, StatusTable};
use patchbay_core::time::Clock;
use patchbay_core::transform;
use patchbay_core::types::{Protocol, RouteDestination};

use crate::index::{RouteDst, RoutingIndex};
use crate::psn_bridge;
use crate::script::ScriptEngine;
use crate::workers::{TcpClient, UdpSender};

/// Everything dispatch needs from the supervisor, borrowed per tick.
pub(crate) struct DispatchCtx<'a> {
    pub index: &'a RoutingIndex,
    pub senders: &'a mut BTreeMap<Addr, UdpSender>,
    pub tcp_clients: &'a BTreeMap<Addr, TcpClient>,
    pub status: &'a mut StatusTable,
    pub log: &'a mut LogBuffer,
    pub scripts: &'a mut ScriptEngine,
    pub psn_encoder: &'a mut PsnEncoder,
    pub clock: &'a Clock,
    pub reconnect_delay_ms: u32,
}

impl DispatchCtx<'_> {
    fn set_activity(&mut self, id: Option<StatusId>) {
        if let Some(id) = id {
            self.status.set_activity(id);
        }
    }
}

/// Route every packet drained from one inbound worker.
pub(crate) fn process_queue(
    ctx: &mut DispatchCtx<'_>,
    listener_port: u16,
    packets: &mut Vec<RecvPacket>,
) {
    for packet in packets.drain(..) {
        process_packet(ctx, listener_port, packet);
    }
}

fn process_packet(ctx: &mut DispatchCtx<'_>, port: u16, packet: RecvPacket) {
    // bundles re-enter as individual messages with the same source ip
    if let Some(parts) = osc::split_bundle(&packet.data) {
        for part in parts {
            process_packet(ctx, port, RecvPacket::new(part, packet.src_ip));
        }
        return;
    }

    let is_osc = osc::is_osc_packet(&packet.data);
    let path = if is_osc {
        osc::address_of(&packet.data).unwrap_or_default()
    } else {
        String::new()
    };

    let index = ctx.index;
    let mut candidates: Vec<&RouteDst> = Vec::new();
    index.collect(port, packet.src_ip, is_osc, &path, &mut candidates);
    if candidates.is_empty() {
        return;
    }

    // decode failures leave an address-only message with no arguments
    let args: Vec<OscType> = if is_osc {
        osc::parse_message(&packet.data)
            .map(|(_, args)| args)
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    for route_dst in candidates {
        deliver(ctx, &packet, is_osc, &path, &args, route_dst);
    }
}

fn deliver(
    ctx: &mut DispatchCtx<'_>,
    packet: &RecvPacket,
    is_osc: bool,
    path: &str,
    args: &[OscType],
    route_dst: &RouteDst,
) {
    // an unspecified destination ip copies the packet's source
    let mut dst_addr = route_dst.dst.addr.clone();
    if dst_addr.ip.is_empty() {
        dst_addr.set_ip_u32(packet.src_ip);
    }

    let outbound: Packet = if is_osc {
        let Some(osc_bytes) = make_osc_packet(ctx, path, args, &route_dst.dst) else {
            return;
        };
        if route_dst.dst.protocol == Protocol::Psn {
            match psn_bridge::fold_to_psn(&osc_bytes, ctx.psn_encoder, ctx.clock) {
                Some(psn_bytes) => psn_bytes.into(),
                None => return,
            }
        } else {
            osc_bytes.into()
        }
    } else {
        packet.data.clone()
    };

    // TCP takes precedence over UDP for a configured client address. Every
    // packet built from an OSC input goes out framed, the PSN-transcoded
    // ones included; only opaque passthrough bytes are written unframed.
    if let Some(client) = ctx.tcp_clients.get(&dst_addr) {
        let sent = if is_osc {
            client.send_framed(&outbound)
        } else {
            client.send(outbound)
        };
        if sent {
            let client_id = client.state_id();
            ctx.set_activity(route_dst.src_state_id);
            ctx.set_activity(client_id);
        }
        return;
    }

    if dst_addr.ip.is_empty() || dst_addr.port == 0 {
        return;
    }
    let reconnect_delay_ms = ctx.reconnect_delay_ms;
    let sender = ctx.senders.entry(dst_addr.clone()).or_insert_with(|| {
        UdpSender::start(dst_addr, route_dst.dst_state_id, reconnect_delay_ms)
    });
    if sender.send(outbound) {
        let sender_id = sender.state_id();
        ctx.set_activity(route_dst.src_state_id);
        ctx.set_activity(sender_id);
    }
}

/// Build the outbound OSC packet for one destination: script, rewrite,
/// literal-argument split, then the numeric transform. Returns `None` when
/// the packet is dropped.
fn make_osc_packet(
    ctx: &mut DispatchCtx<'_>,
    src_path: &str,
    args: &[OscType],
    dst: &RouteDestination,
) -> Option<Bytes> {
    if dst.script {
        return match ctx.scripts.evaluate(&dst.script_text, src_path, args) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                ctx.log.warning(format!("script error: {e}"));
                None
            }
        };
    }

    let send_path = match rewrite::rewrite(src_path, &dst.path, args) {
        Ok(path) if !path.is_empty() => path,
        Ok(_) => return None,
        Err(InvalidIndex(n)) => {
            ctx.log.warning(format!(
                "Unable to remap {} => {}, invalid replacement index {}",
                src_path, dst.path, n
            ));
            return None;
        }
    };

    let (address, literal) = rewrite::split_literal_arg(&send_path);
    if address.is_empty() {
        return None;
    }

    let mut out_args: Vec<OscType> = match literal {
        Some(lit) => vec![OscType::String(lit)],
        None => args.to_vec(),
    };

    if dst.has_any_transform() {
        // only the transformed first argument survives; the rest are dropped
        match out_args.first().and_then(osc::arg_to_f32) {
            Some(v) => out_args = vec![OscType::Float(transform::apply(dst, v))],
            None => {
                ctx.log.warning(format!(
                    "transform needs a numeric first argument, dropping {address}"
                ));
                return None;
            }
        }
    }

    osc::build_message(&address, out_args).ok()
}
