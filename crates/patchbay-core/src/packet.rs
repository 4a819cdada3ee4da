//! Packet buffers
//!
//! A [`Packet`] owns the bytes of one datagram or one unframed TCP frame and
//! moves through worker queues by value. Cloning is cheap (the underlying
//! buffer is shared, never deep-copied) but queues should move packets where
//! they can.

use std::ops::Deref;

use bytes::Bytes;

/// An owning byte buffer moved through send/receive queues.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet(Bytes);

impl Packet {
    pub fn new(data: Bytes) -> Self {
        Self(data)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl Deref for Packet {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for Packet {
    fn from(data: Bytes) -> Self {
        Self(data)
    }
}

impl From<Vec<u8>> for Packet {
    fn from(data: Vec<u8>) -> Self {
        Self(Bytes::from(data))
    }
}

/// A received packet tagged with its source IPv4.
#[derive(Debug, Clone)]
pub struct RecvPacket {
    pub data: Packet,
    pub src_ip: u32,
}

impl RecvPacket {
    pub fn new(data: impl Into<Packet>, src_ip: u32) -> Self {
        Self {
            data: data.into(),
            src_ip,
        }
    }
}
