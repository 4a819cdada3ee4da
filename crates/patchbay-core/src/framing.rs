//! OSC-over-TCP stream framing
//!
//! Two framings exist on the wire: OSC 1.0 prefixes every packet with a
//! big-endian u32 length, OSC 1.1 delimits packets with SLIP (RFC 1055).
//! [`FrameDecoder`] accumulates stream bytes and emits complete frames;
//! [`encode_frame`] wraps an outbound payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::types::FrameMode;

pub const SLIP_END: u8 = 0xC0;
pub const SLIP_ESC: u8 = 0xDB;
pub const SLIP_ESC_END: u8 = 0xDC;
pub const SLIP_ESC_ESC: u8 = 0xDD;

/// Maximum accepted frame size (64KB); larger frames drop the connection.
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024;

/// Frame an outbound payload for the given mode.
pub fn encode_frame(mode: FrameMode, payload: &[u8]) -> Bytes {
    match mode {
        FrameMode::LengthPrefix => {
            let mut out = BytesMut::with_capacity(4 + payload.len());
            out.put_u32(payload.len() as u32);
            out.extend_from_slice(payload);
            out.freeze()
        }
        FrameMode::Slip => {
            let mut out = BytesMut::with_capacity(payload.len() + 2);
            out.put_u8(SLIP_END);
            for &b in payload {
                match b {
                    SLIP_END => {
                        out.put_u8(SLIP_ESC);
                        out.put_u8(SLIP_ESC_END);
                    }
                    SLIP_ESC => {
                        out.put_u8(SLIP_ESC);
                        out.put_u8(SLIP_ESC_ESC);
                    }
                    b => out.put_u8(b),
                }
            }
            out.put_u8(SLIP_END);
            out.freeze()
        }
    }
}

/// Incremental frame extractor over a TCP byte stream.
#[derive(Debug)]
pub struct FrameDecoder {
    mode: FrameMode,
    buf: BytesMut,
    max_frame: usize,
}

impl FrameDecoder {
    pub fn new(mode: FrameMode) -> Self {
        Self::with_max_frame(mode, DEFAULT_MAX_FRAME)
    }

    pub fn with_max_frame(mode: FrameMode, max_frame: usize) -> Self {
        Self {
            mode,
            buf: BytesMut::with_capacity(8192),
            max_frame,
        }
    }

    /// Append received stream bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete frame, if one is buffered.
    ///
    /// `Err` means the stream is unrecoverable (oversized frame) and the
    /// connection should be dropped. Empty SLIP frames are discarded.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        match self.mode {
            FrameMode::LengthPrefix => {
                if self.buf.len() < 4 {
                    return Ok(None);
                }
                let len = (&self.buf[..4]).get_u32() as usize;
                if len > self.max_frame {
                    return Err(Error::FrameTooLarge {
                        size: len,
                        max: self.max_frame,
                    });
                }
                if self.buf.len() < 4 + len {
                    return Ok(None);
                }
                self.buf.advance(4);
                Ok(Some(self.buf.split_to(len).freeze()))
            }
            FrameMode::Slip => loop {
                match self.buf.iter().position(|&b| b == SLIP_END) {
                    Some(pos) => {
                        let raw = self.buf.split_to(pos);
                        self.buf.advance(1);
                        if raw.is_empty() {
                            continue;
                        }
                        return Ok(Some(slip_unescape(&raw)));
                    }
                    None => {
                        if self.buf.len() > self.max_frame {
                            return Err(Error::FrameTooLarge {
                                size: self.buf.len(),
                                max: self.max_frame,
                            });
                        }
                        return Ok(None);
                    }
                }
            },
        }
    }
}

fn slip_unescape(raw: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(raw.len());
    let mut escaped = false;
    for &b in raw {
        if escaped {
            out.put_u8(match b {
                SLIP_ESC_END => SLIP_END,
                SLIP_ESC_ESC => SLIP_ESC,
                other => other,
            });
            escaped = false;
        } else if b == SLIP_ESC {
            escaped = true;
        } else {
            out.put_u8(b);
        }
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_round_trip() {
        let framed = encode_frame(FrameMode::LengthPrefix, b"/x\x00\x00,i\x00\x00\x00\x00\x00\x01");
        assert_eq!(&framed[..4], &[0, 0, 0, 12]);

        let mut dec = FrameDecoder::new(FrameMode::LengthPrefix);
        dec.push(&framed);
        let frame = dec.next_frame().unwrap().unwrap();
        assert_eq!(&frame[..], b"/x\x00\x00,i\x00\x00\x00\x00\x00\x01");
        assert!(dec.next_frame().unwrap().is_none());
    }

    #[test]
    fn length_prefix_partial_delivery() {
        let framed = encode_frame(FrameMode::LengthPrefix, b"abcdefgh");
        let mut dec = FrameDecoder::new(FrameMode::LengthPrefix);

        dec.push(&framed[..3]);
        assert!(dec.next_frame().unwrap().is_none());
        dec.push(&framed[3..7]);
        assert!(dec.next_frame().unwrap().is_none());
        dec.push(&framed[7..]);
        assert_eq!(&dec.next_frame().unwrap().unwrap()[..], b"abcdefgh");
    }

    #[test]
    fn length_prefix_rejects_oversize() {
        let mut dec = FrameDecoder::with_max_frame(FrameMode::LengthPrefix, 16);
        dec.push(&[0x00, 0x01, 0x00, 0x00]);
        assert!(dec.next_frame().is_err());
    }

    #[test]
    fn slip_round_trip_with_escapes() {
        let payload = [0x01, SLIP_END, 0x02, SLIP_ESC, 0x03];
        let framed = encode_frame(FrameMode::Slip, &payload);

        let mut dec = FrameDecoder::new(FrameMode::Slip);
        dec.push(&framed);
        let frame = dec.next_frame().unwrap().unwrap();
        assert_eq!(&frame[..], &payload);
    }

    #[test]
    fn slip_discards_empty_frames() {
        let mut dec = FrameDecoder::new(FrameMode::Slip);
        dec.push(&[SLIP_END, SLIP_END, b'a', b'b', SLIP_END]);
        let frame = dec.next_frame().unwrap().unwrap();
        assert_eq!(&frame[..], b"ab");
        assert!(dec.next_frame().unwrap().is_none());
    }

    #[test]
    fn slip_two_frames_one_push() {
        let mut dec = FrameDecoder::new(FrameMode::Slip);
        let mut stream = Vec::new();
        stream.extend_from_slice(&encode_frame(FrameMode::Slip, b"one"));
        stream.extend_from_slice(&encode_frame(FrameMode::Slip, b"two"));
        dec.push(&stream);
        assert_eq!(&dec.next_frame().unwrap().unwrap()[..], b"one");
        assert_eq!(&dec.next_frame().unwrap().unwrap()[..], b"two");
        assert!(dec.next_frame().unwrap().is_none());
    }
}
