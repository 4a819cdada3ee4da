//! OSC packet helpers over `rosc`
//!
//! The router mostly moves opaque bytes; these helpers cover the few places
//! it has to look inside a packet: detecting OSC, pulling the address string,
//! exploding bundles, and rebuilding messages after a rewrite.

use bytes::Bytes;
use rosc::{OscMessage, OscPacket, OscType};
use tracing::debug;

use crate::error::Result;

/// Marker introducing an OSC bundle.
pub const BUNDLE_TAG: &[u8] = b"#bundle";

/// True when the buffer starts like an OSC packet: a NUL-terminated address
/// beginning with `/`, or the `#bundle` marker.
pub fn is_osc_packet(data: &[u8]) -> bool {
    if data.starts_with(BUNDLE_TAG) {
        return true;
    }
    data.first() == Some(&b'/') && data.contains(&0)
}

/// The address string of an OSC message: the bytes up to the first NUL.
///
/// Returns `None` for bundles, non-OSC data, or a non-UTF-8 address.
pub fn address_of(data: &[u8]) -> Option<String> {
    if data.first() != Some(&b'/') {
        return None;
    }
    let end = data.iter().position(|&b| b == 0)?;
    std::str::from_utf8(&data[..end]).ok().map(str::to_owned)
}

/// Fully decode a single OSC message, returning its address and arguments.
///
/// A packet that looks like OSC but fails to decode yields `None`; the caller
/// treats it as an address-only message with no arguments.
pub fn parse_message(data: &[u8]) -> Option<(String, Vec<OscType>)> {
    match rosc::decoder::decode_udp(data) {
        Ok((_, OscPacket::Message(msg))) => Some((msg.addr, msg.args)),
        Ok(_) => None,
        Err(e) => {
            debug!("OSC decode failed: {:?}", e);
            None
        }
    }
}

/// Explode an OSC bundle into standalone message packets, recursively.
///
/// Returns `None` when the buffer is not a decodable bundle, so plain
/// messages and opaque packets pass through the dispatcher untouched.
pub fn split_bundle(data: &[u8]) -> Option<Vec<Bytes>> {
    if !data.starts_with(BUNDLE_TAG) {
        return None;
    }

    let packet = match rosc::decoder::decode_udp(data) {
        Ok((_, packet @ OscPacket::Bundle(_))) => packet,
        _ => return None,
    };

    let mut out = Vec::new();
    flatten(&packet, &mut out);
    Some(out)
}

fn flatten(packet: &OscPacket, out: &mut Vec<Bytes>) {
    match packet {
        OscPacket::Message(msg) => {
            if let Ok(bytes) = rosc::encoder::encode(&OscPacket::Message(msg.clone())) {
                out.push(Bytes::from(bytes));
            }
        }
        OscPacket::Bundle(bundle) => {
            for inner in &bundle.content {
                flatten(inner, out);
            }
        }
    }
}

/// Build an OSC message packet.
pub fn build_message(addr: &str, args: Vec<OscType>) -> Result<Bytes> {
    let bytes = rosc::encoder::encode(&OscPacket::Message(OscMessage {
        addr: addr.to_owned(),
        args,
    }))?;
    Ok(Bytes::from(bytes))
}

/// Render an argument as a string, for `%N` path substitution.
pub fn arg_to_string(arg: &OscType) -> Option<String> {
    match arg {
        OscType::Int(i) => Some(i.to_string()),
        OscType::Long(i) => Some(i.to_string()),
        OscType::Float(f) => Some(f.to_string()),
        OscType::Double(f) => Some(f.to_string()),
        OscType::String(s) => Some(s.clone()),
        OscType::Char(c) => Some(c.to_string()),
        OscType::Bool(b) => Some(if *b { "true" } else { "false" }.to_owned()),
        _ => None,
    }
}

/// Coerce an argument to f32, for the numeric transform.
pub fn arg_to_f32(arg: &OscType) -> Option<f32> {
    match arg {
        OscType::Int(i) => Some(*i as f32),
        OscType::Long(i) => Some(*i as f32),
        OscType::Float(f) => Some(*f),
        OscType::Double(f) => Some(*f as f32),
        OscType::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        OscType::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Coerce an argument to u64, for PSN timestamps.
pub fn arg_to_u64(arg: &OscType) -> Option<u64> {
    match arg {
        OscType::Int(i) if *i >= 0 => Some(*i as u64),
        OscType::Long(i) if *i >= 0 => Some(*i as u64),
        OscType::Float(f) if *f >= 0.0 => Some(*f as u64),
        OscType::Double(f) if *f >= 0.0 => Some(*f as u64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosc::OscBundle;

    fn msg(addr: &str, args: Vec<OscType>) -> OscPacket {
        OscPacket::Message(OscMessage {
            addr: addr.to_owned(),
            args,
        })
    }

    #[test]
    fn detects_osc_and_bundles() {
        let m = rosc::encoder::encode(&msg("/a/b", vec![OscType::Int(1)])).unwrap();
        assert!(is_osc_packet(&m));

        let b = rosc::encoder::encode(&OscPacket::Bundle(OscBundle {
            timetag: rosc::OscTime {
                seconds: 0,
                fractional: 1,
            },
            content: vec![msg("/x", vec![])],
        }))
        .unwrap();
        assert!(is_osc_packet(&b));

        assert!(!is_osc_packet(b"PSN\x00binary"));
        assert!(!is_osc_packet(b""));
    }

    #[test]
    fn address_scan_stops_at_nul() {
        let m = rosc::encoder::encode(&msg("/eos/out", vec![OscType::Float(1.0)])).unwrap();
        assert_eq!(address_of(&m).as_deref(), Some("/eos/out"));
        assert_eq!(address_of(b"no-slash\x00"), None);
    }

    #[test]
    fn bundle_splits_recursively() {
        let inner = OscPacket::Bundle(OscBundle {
            timetag: rosc::OscTime {
                seconds: 0,
                fractional: 1,
            },
            content: vec![msg("/m2", vec![])],
        });
        let b = rosc::encoder::encode(&OscPacket::Bundle(OscBundle {
            timetag: rosc::OscTime {
                seconds: 0,
                fractional: 1,
            },
            content: vec![msg("/m1", vec![OscType::Int(42)]), inner],
        }))
        .unwrap();

        let parts = split_bundle(&b).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(address_of(&parts[0]).as_deref(), Some("/m1"));
        assert_eq!(address_of(&parts[1]).as_deref(), Some("/m2"));

        let m = rosc::encoder::encode(&msg("/not/a/bundle", vec![])).unwrap();
        assert!(split_bundle(&m).is_none());
    }

    #[test]
    fn arg_coercions() {
        assert_eq!(arg_to_string(&OscType::Int(25)).as_deref(), Some("25"));
        assert_eq!(arg_to_string(&OscType::Float(2.5)).as_deref(), Some("2.5"));
        assert_eq!(
            arg_to_string(&OscType::String("go".into())).as_deref(),
            Some("go")
        );
        assert_eq!(arg_to_string(&OscType::Nil), None);

        assert_eq!(arg_to_f32(&OscType::Int(3)), Some(3.0));
        assert_eq!(arg_to_f32(&OscType::String(" 0.5 ".into())), Some(0.5));
        assert_eq!(arg_to_f32(&OscType::String("x".into())), None);
    }
}
