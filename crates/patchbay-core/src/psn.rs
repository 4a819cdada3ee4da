//! PosiStageNet data-packet codec
//!
//! PSN v2 data packets are little-endian chunk trees. Every chunk starts with
//! a u32 header: bits 0-15 chunk id, bits 16-30 data length, bit 31 set when
//! the data is a list of subchunks. A data packet holds a packet header chunk
//! and a tracker-list chunk; each tracker subchunk is keyed by tracker id and
//! carries per-field subchunks.
//!
//! The decoder handles one datagram per frame; the encoder splits oversized
//! tracker maps across datagrams. Duplicate-frame suppression is the
//! receiver's job (frames repeat the 8-bit `frame_id`).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

/// Chunk ids for PSN_DATA packets.
mod chunk {
    pub const DATA_PACKET: u16 = 0x6755;

    pub const DATA_HEADER: u16 = 0x0000;
    pub const DATA_TRACKER_LIST: u16 = 0x0001;

    pub const TRACKER_POS: u16 = 0x0000;
    pub const TRACKER_SPEED: u16 = 0x0001;
    pub const TRACKER_ORI: u16 = 0x0002;
    pub const TRACKER_STATUS: u16 = 0x0003;
    pub const TRACKER_ACCEL: u16 = 0x0004;
    pub const TRACKER_TRGTPOS: u16 = 0x0005;
    pub const TRACKER_TIMESTAMP: u16 = 0x0006;
}

const VERSION_HIGH: u8 = 2;
const VERSION_LOW: u8 = 3;

/// Payload budget per datagram before the tracker list is split.
const MAX_DATAGRAM: usize = 1400;

/// One PSN tracker. Unset fields were absent from the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tracker {
    pub id: u16,
    pub pos: Option<[f32; 3]>,
    pub speed: Option<[f32; 3]>,
    pub ori: Option<[f32; 3]>,
    pub accel: Option<[f32; 3]>,
    pub target_pos: Option<[f32; 3]>,
    pub status: Option<f32>,
    pub timestamp: Option<u64>,
}

impl Tracker {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

/// Frame-level metadata from the packet header chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameHeader {
    pub timestamp: u64,
    pub version_high: u8,
    pub version_low: u8,
    /// Wrapping 8-bit frame counter; retransmissions repeat it.
    pub frame_id: u8,
    pub packet_count: u8,
}

/// A decoded PSN data frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PsnFrame {
    pub header: FrameHeader,
    pub trackers: BTreeMap<u16, Tracker>,
}

/// Decoder for PSN data packets. Malformed input yields `None`.
#[derive(Debug, Default)]
pub struct PsnDecoder;

impl PsnDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&mut self, data: &[u8]) -> Option<PsnFrame> {
        let mut buf = data;
        let (id, len, _) = read_chunk_header(&mut buf)?;
        if id != chunk::DATA_PACKET || buf.len() < len {
            return None;
        }

        let mut body = &buf[..len];
        let mut header = None;
        let mut trackers = BTreeMap::new();

        while !body.is_empty() {
            let (id, len, _) = read_chunk_header(&mut body)?;
            if body.len() < len {
                return None;
            }
            let (data, rest) = body.split_at(len);
            body = rest;

            match id {
                chunk::DATA_HEADER => header = Some(decode_header(data)?),
                chunk::DATA_TRACKER_LIST => decode_tracker_list(data, &mut trackers)?,
                _ => {}
            }
        }

        Some(PsnFrame {
            header: header?,
            trackers,
        })
    }
}

/// Encoder for PSN data packets, owning the wrapping frame counter.
#[derive(Debug, Default)]
pub struct PsnEncoder {
    frame_id: u8,
}

impl PsnEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a tracker map into one or more datagrams.
    pub fn encode(&mut self, trackers: &BTreeMap<u16, Tracker>, timestamp: u64) -> Vec<Bytes> {
        let frame_id = self.frame_id;
        self.frame_id = self.frame_id.wrapping_add(1);

        // Serialize tracker chunks, then pack greedily under the MTU budget.
        let mut groups: Vec<Vec<Vec<u8>>> = vec![Vec::new()];
        let mut group_size = 0usize;
        for tracker in trackers.values() {
            let encoded = encode_tracker(tracker);
            if group_size + encoded.len() > MAX_DATAGRAM && !groups.last().unwrap().is_empty() {
                groups.push(Vec::new());
                group_size = 0;
            }
            group_size += encoded.len();
            groups.last_mut().unwrap().push(encoded);
        }

        let packet_count = groups.len() as u8;
        groups
            .into_iter()
            .map(|group| {
                let list_len: usize = group.iter().map(Vec::len).sum();

                let mut out = BytesMut::with_capacity(4 + 16 + 4 + list_len);
                // root chunk: header chunk (4 + 12) + tracker list chunk (4 + data)
                put_chunk_header(&mut out, chunk::DATA_PACKET, 16 + 4 + list_len, true);

                put_chunk_header(&mut out, chunk::DATA_HEADER, 12, false);
                out.put_u64_le(timestamp);
                out.put_u8(VERSION_HIGH);
                out.put_u8(VERSION_LOW);
                out.put_u8(frame_id);
                out.put_u8(packet_count);

                put_chunk_header(&mut out, chunk::DATA_TRACKER_LIST, list_len, true);
                for encoded in group {
                    out.extend_from_slice(&encoded);
                }
                out.freeze()
            })
            .collect()
    }
}

fn read_chunk_header(buf: &mut &[u8]) -> Option<(u16, usize, bool)> {
    if buf.len() < 4 {
        return None;
    }
    let raw = buf.get_u32_le();
    let id = (raw & 0xffff) as u16;
    let len = ((raw >> 16) & 0x7fff) as usize;
    let has_subchunks = (raw & 0x8000_0000) != 0;
    Some((id, len, has_subchunks))
}

fn put_chunk_header(buf: &mut BytesMut, id: u16, len: usize, has_subchunks: bool) {
    let mut raw = (id as u32) | (((len as u32) & 0x7fff) << 16);
    if has_subchunks {
        raw |= 0x8000_0000;
    }
    buf.put_u32_le(raw);
}

fn decode_header(mut data: &[u8]) -> Option<FrameHeader> {
    if data.len() < 12 {
        return None;
    }
    Some(FrameHeader {
        timestamp: data.get_u64_le(),
        version_high: data.get_u8(),
        version_low: data.get_u8(),
        frame_id: data.get_u8(),
        packet_count: data.get_u8(),
    })
}

fn decode_tracker_list(mut data: &[u8], trackers: &mut BTreeMap<u16, Tracker>) -> Option<()> {
    while !data.is_empty() {
        let (id, len, _) = read_chunk_header(&mut data)?;
        if data.len() < len {
            return None;
        }
        let (fields, rest) = data.split_at(len);
        data = rest;

        let mut tracker = Tracker::new(id);
        decode_tracker_fields(fields, &mut tracker)?;
        trackers.insert(id, tracker);
    }
    Some(())
}

fn decode_tracker_fields(mut data: &[u8], tracker: &mut Tracker) -> Option<()> {
    while !data.is_empty() {
        let (id, len, _) = read_chunk_header(&mut data)?;
        if data.len() < len {
            return None;
        }
        let (field, rest) = data.split_at(len);
        data = rest;

        match id {
            chunk::TRACKER_POS => tracker.pos = Some(read_vec3(field)?),
            chunk::TRACKER_SPEED => tracker.speed = Some(read_vec3(field)?),
            chunk::TRACKER_ORI => tracker.ori = Some(read_vec3(field)?),
            chunk::TRACKER_ACCEL => tracker.accel = Some(read_vec3(field)?),
            chunk::TRACKER_TRGTPOS => tracker.target_pos = Some(read_vec3(field)?),
            chunk::TRACKER_STATUS => {
                let mut f = field;
                if f.len() < 4 {
                    return None;
                }
                tracker.status = Some(f.get_f32_le());
            }
            chunk::TRACKER_TIMESTAMP => {
                let mut f = field;
                if f.len() < 8 {
                    return None;
                }
                tracker.timestamp = Some(f.get_u64_le());
            }
            _ => {}
        }
    }
    Some(())
}

fn read_vec3(mut data: &[u8]) -> Option<[f32; 3]> {
    if data.len() < 12 {
        return None;
    }
    Some([data.get_f32_le(), data.get_f32_le(), data.get_f32_le()])
}

fn put_vec3_chunk(buf: &mut BytesMut, id: u16, v: [f32; 3]) {
    put_chunk_header(buf, id, 12, false);
    buf.put_f32_le(v[0]);
    buf.put_f32_le(v[1]);
    buf.put_f32_le(v[2]);
}

fn encode_tracker(tracker: &Tracker) -> Vec<u8> {
    let mut fields = BytesMut::new();
    if let Some(v) = tracker.pos {
        put_vec3_chunk(&mut fields, chunk::TRACKER_POS, v);
    }
    if let Some(v) = tracker.speed {
        put_vec3_chunk(&mut fields, chunk::TRACKER_SPEED, v);
    }
    if let Some(v) = tracker.ori {
        put_vec3_chunk(&mut fields, chunk::TRACKER_ORI, v);
    }
    if let Some(v) = tracker.accel {
        put_vec3_chunk(&mut fields, chunk::TRACKER_ACCEL, v);
    }
    if let Some(v) = tracker.target_pos {
        put_vec3_chunk(&mut fields, chunk::TRACKER_TRGTPOS, v);
    }
    if let Some(v) = tracker.status {
        put_chunk_header(&mut fields, chunk::TRACKER_STATUS, 4, false);
        fields.put_f32_le(v);
    }
    if let Some(v) = tracker.timestamp {
        put_chunk_header(&mut fields, chunk::TRACKER_TIMESTAMP, 8, false);
        fields.put_u64_le(v);
    }

    let mut out = BytesMut::with_capacity(4 + fields.len());
    put_chunk_header(&mut out, tracker.id, fields.len(), true);
    out.extend_from_slice(&fields);
    out.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_one_tracker() {
        let mut tracker = Tracker::new(7);
        tracker.pos = Some([1.0, 2.0, 3.0]);
        tracker.status = Some(0.5);
        tracker.timestamp = Some(123_456);

        let mut trackers = BTreeMap::new();
        trackers.insert(7, tracker.clone());

        let mut enc = PsnEncoder::new();
        let packets = enc.encode(&trackers, 999);
        assert_eq!(packets.len(), 1);

        let mut dec = PsnDecoder::new();
        let frame = dec.decode(&packets[0]).unwrap();
        assert_eq!(frame.header.timestamp, 999);
        assert_eq!(frame.header.frame_id, 0);
        assert_eq!(frame.header.packet_count, 1);
        assert_eq!(frame.trackers.get(&7), Some(&tracker));
    }

    #[test]
    fn frame_id_wraps() {
        let mut enc = PsnEncoder::new();
        let trackers = BTreeMap::new();
        for _ in 0..=255 {
            enc.encode(&trackers, 0);
        }
        let packets = enc.encode(&trackers, 0);
        let frame = PsnDecoder::new().decode(&packets[0]).unwrap();
        assert_eq!(frame.header.frame_id, 0);
    }

    #[test]
    fn splits_large_tracker_maps() {
        let mut trackers = BTreeMap::new();
        for id in 0..100u16 {
            let mut t = Tracker::new(id);
            t.pos = Some([id as f32, 0.0, 0.0]);
            t.speed = Some([0.0, 0.0, 0.0]);
            t.ori = Some([0.0, 0.0, 0.0]);
            t.accel = Some([0.0, 0.0, 0.0]);
            t.target_pos = Some([0.0, 0.0, 0.0]);
            trackers.insert(id, t);
        }

        let mut enc = PsnEncoder::new();
        let packets = enc.encode(&trackers, 0);
        assert!(packets.len() > 1);

        let mut dec = PsnDecoder::new();
        let mut seen = 0;
        for p in &packets {
            let frame = dec.decode(p).unwrap();
            assert_eq!(frame.header.packet_count as usize, packets.len());
            seen += frame.trackers.len();
        }
        assert_eq!(seen, 100);
    }

    #[test]
    fn rejects_malformed() {
        let mut dec = PsnDecoder::new();
        assert!(dec.decode(b"").is_none());
        assert!(dec.decode(b"OSC").is_none());
        assert!(dec.decode(&[0x55, 0x67, 0xff, 0x00]).is_none());

        // truncate a valid packet mid-tracker
        let mut trackers = BTreeMap::new();
        let mut t = Tracker::new(1);
        t.pos = Some([1.0, 2.0, 3.0]);
        trackers.insert(1, t);
        let packets = PsnEncoder::new().encode(&trackers, 0);
        assert!(dec.decode(&packets[0][..packets[0].len() - 4]).is_none());
    }

    #[test]
    fn skips_unknown_chunks() {
        let mut trackers = BTreeMap::new();
        let mut t = Tracker::new(3);
        t.pos = Some([9.0, 8.0, 7.0]);
        trackers.insert(3, t.clone());
        let packet = PsnEncoder::new().encode(&trackers, 5).remove(0);

        // append an unknown chunk inside the root by rebuilding the root header
        let mut raw = packet.to_vec();
        let inner_len = raw.len() - 4;
        let mut extended = BytesMut::new();
        put_chunk_header(&mut extended, chunk::DATA_PACKET, inner_len + 8, true);
        extended.extend_from_slice(&raw.split_off(4));
        put_chunk_header(&mut extended, 0x7777, 4, false);
        extended.put_u32_le(0xdead_beef);

        let frame = PsnDecoder::new().decode(&extended).unwrap();
        assert_eq!(frame.trackers.get(&3), Some(&t));
    }
}
