//! OSC ↔ PSN transcoding
//!
//! Inbound PSN frames unfold into OSC messages under `/psn/<id>/<field>`:
//! one message per set field plus one unified message whose path concatenates
//! every set field and whose arguments carry all the values in field order.
//! Outbound, an OSC message at `/psn/<id>/<fields…>` folds back into a
//! tracker and is encoded as a PSN datagram.

use std::collections::BTreeMap;

use bytes::Bytes;
use rosc::OscType;

use patchbay_core::osc;
use patchbay_core::psn::{PsnEncoder, PsnFrame, Tracker};
use patchbay_core::time::Clock;

const FIELD_POS: &str = "pos";
const FIELD_SPEED: &str = "speed";
const FIELD_ORI: &str = "orientation";
const FIELD_ACCEL: &str = "acceleration";
const FIELD_TARGET: &str = "target";
const FIELD_STATUS: &str = "status";
const FIELD_TIMESTAMP: &str = "timestamp";

/// Synthesize OSC messages from a decoded PSN frame.
pub(crate) fn unfold_frame(frame: &PsnFrame) -> Vec<Bytes> {
    let mut out = Vec::new();

    for tracker in frame.trackers.values() {
        let base = format!("/psn/{}", tracker.id);
        let mut unified_path = base.clone();
        let mut unified_args: Vec<OscType> = Vec::new();

        let mut field = |name: &str, args: Vec<OscType>| {
            if let Ok(bytes) = osc::build_message(&format!("{base}/{name}"), args.clone()) {
                out.push(bytes);
            }
            unified_path.push('/');
            unified_path.push_str(name);
            unified_args.extend(args);
        };

        if let Some(v) = tracker.pos {
            field(FIELD_POS, vec3_args(v));
        }
        if let Some(v) = tracker.speed {
            field(FIELD_SPEED, vec3_args(v));
        }
        if let Some(v) = tracker.ori {
            field(FIELD_ORI, vec3_args(v));
        }
        if let Some(v) = tracker.accel {
            field(FIELD_ACCEL, vec3_args(v));
        }
        if let Some(v) = tracker.target_pos {
            field(FIELD_TARGET, vec3_args(v));
        }
        if let Some(v) = tracker.status {
            field(FIELD_STATUS, vec![OscType::Float(v)]);
        }
        if let Some(v) = tracker.timestamp {
            field(FIELD_TIMESTAMP, vec![OscType::Long(v as i64)]);
        }

        if !unified_args.is_empty() {
            if let Ok(bytes) = osc::build_message(&unified_path, unified_args) {
                out.push(bytes);
            }
        }
    }

    out
}

/// Rebuild a PSN datagram from an OSC message at `/psn/<id>/<fields…>`.
///
/// Vec3 fields consume three consecutive f32 arguments, `status` one f32,
/// `timestamp` one u64. Unrecognized fields are skipped without consuming
/// arguments. Returns the first datagram the encoder produces, or `None`
/// when the message does not describe a tracker.
pub(crate) fn fold_to_psn(
    osc_bytes: &[u8],
    encoder: &mut PsnEncoder,
    clock: &Clock,
) -> Option<Bytes> {
    let (path, args) = osc::parse_message(osc_bytes)?;
    let mut parts = path.split('/').filter(|s| !s.is_empty());
    if parts.next()? != "psn" {
        return None;
    }
    let id: u16 = parts.next()?.parse().ok()?;

    let mut tracker = Tracker::new(id);
    let mut next_arg = 0usize;

    for field in parts {
        let parsed = match field {
            FIELD_POS => take_vec3(&args, &mut next_arg).map(|v| tracker.pos = Some(v)),
            FIELD_SPEED => take_vec3(&args, &mut next_arg).map(|v| tracker.speed = Some(v)),
            FIELD_ORI => take_vec3(&args, &mut next_arg).map(|v| tracker.ori = Some(v)),
            FIELD_ACCEL => take_vec3(&args, &mut next_arg).map(|v| tracker.accel = Some(v)),
            FIELD_TARGET => take_vec3(&args, &mut next_arg).map(|v| tracker.target_pos = Some(v)),
            FIELD_STATUS => take_f32(&args, &mut next_arg).map(|v| tracker.status = Some(v)),
            FIELD_TIMESTAMP => take_u64(&args, &mut next_arg).map(|v| tracker.timestamp = Some(v)),
            _ => Some(()),
        };
        if parsed.is_none() {
            break;
        }
    }

    let timestamp = tracker.timestamp.unwrap_or_else(|| clock.now_ms());
    let mut trackers = BTreeMap::new();
    trackers.insert(id, tracker);
    encoder.encode(&trackers, timestamp).into_iter().next()
}

fn vec3_args(v: [f32; 3]) -> Vec<OscType> {
    vec![
        OscType::Float(v[0]),
        OscType::Float(v[1]),
        OscType::Float(v[2]),
    ]
}

fn take_f32(args: &[OscType], next: &mut usize) -> Option<f32> {
    let v = osc::arg_to_f32(args.get(*next)?)?;
    *next += 1;
    Some(v)
}

fn take_u64(args: &[OscType], next: &mut usize) -> Option<u64> {
    let v = osc::arg_to_u64(args.get(*next)?)?;
    *next += 1;
    Some(v)
}

fn take_vec3(args: &[OscType], next: &mut usize) -> Option<[f32; 3]> {
    if args.len() < *next + 3 {
        return None;
    }
    let x = take_f32(args, next)?;
    let y = take_f32(args, next)?;
    let z = take_f32(args, next)?;
    Some([x, y, z])
}
