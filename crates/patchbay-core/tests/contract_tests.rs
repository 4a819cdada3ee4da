//! Cross-module contract tests
//!
//! Exercises the public core API the way the engine consumes it: rewriting,
//! transforms, framing, the PSN codec, and the status table's double-buffer
//! protocol.

use rosc::OscType;

use patchbay_core::framing::{encode_frame, FrameDecoder};
use patchbay_core::psn::{PsnDecoder, PsnEncoder, Tracker};
use patchbay_core::rewrite::{rewrite, InvalidIndex};
use patchbay_core::status::{LinkState, StatusTable};
use patchbay_core::transform;
use patchbay_core::types::{FrameMode, RouteDestination, Transform};
use patchbay_core::{osc, Addr};

#[test]
fn rewrite_contract() {
    // the four published rewrite laws
    assert_eq!(
        rewrite("/eos/out/event/cue/1/25/fire", "/cue/%6/start", &[]).unwrap(),
        "/cue/25/start"
    );
    assert_eq!(rewrite("/x", "/%%1", &[]).unwrap(), "/%1");
    assert_eq!(rewrite("/x/y", "/%9", &[]), Err(InvalidIndex(9)));

    let (addr, lit) = patchbay_core::rewrite::split_literal_arg(
        &rewrite("/cue/25/start", "/eos/cue/fire=%2", &[]).unwrap(),
    );
    assert_eq!(addr, "/eos/cue/fire");
    assert_eq!(lit.as_deref(), Some("25"));
}

#[test]
fn transform_identity_and_scale() {
    let mut dst = RouteDestination {
        in_min: Transform::enabled(0.0),
        in_max: Transform::enabled(1.0),
        out_min: Transform::enabled(0.0),
        out_max: Transform::enabled(1.0),
        ..Default::default()
    };
    for v in [0.0, 0.1, 0.5, 0.99, 1.0] {
        assert!((transform::apply(&dst, v) - v).abs() < 1e-5);
    }

    dst.in_max = Transform::enabled(100.0);
    dst.out_max = Transform::enabled(255.0);
    assert!((transform::apply(&dst, 50.0) - 127.5).abs() < 1e-3);
}

#[test]
fn framed_stream_survives_fragmentation() {
    let payload = osc::build_message("/a/b", vec![OscType::Float(0.5)]).unwrap();

    for mode in [FrameMode::LengthPrefix, FrameMode::Slip] {
        let framed = encode_frame(mode, &payload);
        let mut decoder = FrameDecoder::new(mode);

        // deliver one byte at a time, as a worst-case TCP stream
        let mut got = None;
        for &b in framed.iter() {
            decoder.push(&[b]);
            if let Some(frame) = decoder.next_frame().unwrap() {
                got = Some(frame);
            }
        }
        assert_eq!(got.expect("frame").as_ref(), payload.as_ref());
    }
}

#[test]
fn psn_codec_round_trip() {
    let mut tracker = Tracker::new(42);
    tracker.pos = Some([1.5, -2.0, 3.25]);
    tracker.speed = Some([0.0, 0.1, 0.2]);
    tracker.status = Some(1.0);

    let mut trackers = std::collections::BTreeMap::new();
    trackers.insert(42, tracker.clone());

    let packets = PsnEncoder::new().encode(&trackers, 5_000);
    assert_eq!(packets.len(), 1);

    let frame = PsnDecoder::new().decode(&packets[0]).unwrap();
    assert_eq!(frame.header.timestamp, 5_000);
    assert_eq!(frame.trackers.get(&42), Some(&tracker));
}

#[test]
fn status_table_double_buffer() {
    let mut producer = StatusTable::new();
    let mut observer = StatusTable::new();
    let a = producer.register();
    let b = producer.register();
    observer.register();
    observer.register();

    producer.set_state(a, LinkState::Connecting);
    producer.set_state(a, LinkState::Connected);
    producer.set_activity(a);
    producer.flush_into(&mut observer);

    assert_eq!(observer.get(a).unwrap().state, LinkState::Connected);
    assert!(observer.get(a).unwrap().activity);
    assert_eq!(observer.get(b).unwrap().state, LinkState::Uninitialized);

    // a second flush with no changes moves nothing
    observer.reset();
    producer.flush_into(&mut observer);
    assert!(!observer.get(a).unwrap().dirty);
}

#[test]
fn addr_defaults_compose_with_osc_helpers() {
    let addr = Addr::new("127.0.0.1", 8000);
    assert_eq!(addr.to_string(), "127.0.0.1:8000");

    let msg = osc::build_message("/ping", vec![]).unwrap();
    assert!(osc::is_osc_packet(&msg));
    assert_eq!(osc::address_of(&msg).as_deref(), Some("/ping"));
}
