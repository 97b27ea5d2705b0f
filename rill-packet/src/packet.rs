use crate::units::{Blknum, Seqnum, SourceId, StreamTimestamp};
use bytes::BytesMut;
use shared::time::Nanos;
use std::net::SocketAddr;
use std::ops::Range;

/// Forward-erasure-correction scheme identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FecScheme {
    #[default]
    None,
    /// Reed-Solomon over GF(2^m), m=8.
    Rs8m,
    /// LDPC-Staircase (RFC 5170).
    LdpcStaircase,
}

impl std::fmt::Display for FecScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FecScheme::None => write!(f, "none"),
            FecScheme::Rs8m => write!(f, "rs8m"),
            FecScheme::LdpcStaircase => write!(f, "ldpc"),
        }
    }
}

/// UDP-level packet attributes filled by the transport glue.
#[derive(Debug, Clone)]
pub struct Udp {
    pub src_addr: SocketAddr,
    pub dst_addr: SocketAddr,
    /// When the packet was received from the socket, ns since Unix epoch.
    pub receive_timestamp: Nanos,
}

/// RTP sub-record.
#[derive(Debug, Clone, Default)]
pub struct Rtp {
    pub source_id: SourceId,
    pub seqnum: Seqnum,
    pub stream_timestamp: StreamTimestamp,
    /// Packet duration in stream-timestamp ticks (samples).
    pub duration: StreamTimestamp,
    /// When the media was captured, ns since Unix epoch; 0 means unset.
    pub capture_timestamp: Nanos,
    pub marker: bool,
    pub payload_type: u8,
    /// Payload byte range inside the packet buffer.
    pub payload: Range<usize>,
}

/// FECFRAME sub-record.
#[derive(Debug, Clone, Default)]
pub struct Fec {
    pub fec_scheme: FecScheme,
    /// Index of the packet in its block: [0; k) for source, [k; k+r) for repair.
    pub encoding_symbol_id: usize,
    pub source_block_number: Blknum,
    /// Number of source packets in the block (k).
    pub source_block_length: usize,
    /// Number of source plus repair packets in the block (k+r).
    pub block_length: usize,
    /// FECFRAME header or footer byte range inside the packet buffer.
    pub payload_id: Range<usize>,
    /// Protected payload byte range inside the packet buffer.
    pub payload: Range<usize>,
}

/// RTCP sub-record.
#[derive(Debug, Clone, Default)]
pub struct Rtcp {
    pub payload: Range<usize>,
}

/// Polymorphic network packet.
///
/// A packet carries any subset of the protocol sub-records plus a single
/// byte buffer that all of their ranges point into. Lifecycle is tracked
/// with flags: `FLAG_PREPARED` means the buffer is allocated and header
/// room is reserved (the current owner may mutate it), `FLAG_COMPOSED`
/// means headers are written and the bytes are final, `FLAG_RESTORED`
/// marks packets reconstructed by the FEC decoder rather than received.
#[derive(Debug, Default)]
pub struct Packet {
    flags: u32,

    pub udp: Option<Udp>,
    pub rtp: Option<Rtp>,
    pub fec: Option<Fec>,
    pub rtcp: Option<Rtcp>,

    buffer: Option<BytesMut>,
}

impl Packet {
    /// Buffer is allocated and header room reserved.
    pub const FLAG_PREPARED: u32 = 1 << 0;
    /// Headers are written into the buffer.
    pub const FLAG_COMPOSED: u32 = 1 << 1;
    /// Reconstructed by FEC decoder, not received from network.
    pub const FLAG_RESTORED: u32 = 1 << 2;
    /// Packet contains audio media.
    pub const FLAG_AUDIO: u32 = 1 << 3;
    /// Packet contains FEC repair data.
    pub const FLAG_REPAIR: u32 = 1 << 4;
    /// Packet contains control protocol data.
    pub const FLAG_CONTROL: u32 = 1 << 5;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_flags(&mut self, flags: u32) {
        if self.flags & flags != 0 {
            panic!("packet: can't add flag more than once");
        }
        self.flags |= flags;
    }

    pub fn has_flags(&self, flags: u32) -> bool {
        (self.flags & flags) == flags
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn buffer(&self) -> &[u8] {
        match &self.buffer {
            Some(b) => b,
            None => panic!("packet: buffer is not set"),
        }
    }

    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        match &mut self.buffer {
            Some(b) => b,
            None => panic!("packet: buffer is not set"),
        }
    }

    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn set_buffer(&mut self, buffer: BytesMut) {
        if self.buffer.is_some() {
            panic!("packet: can't set buffer more than once");
        }
        self.buffer = Some(buffer);
    }

    pub fn take_buffer(&mut self) -> BytesMut {
        match self.buffer.take() {
            Some(b) => b,
            None => panic!("packet: buffer is not set"),
        }
    }

    /// Innermost protocol payload bytes: RTP, then RTCP, then FEC,
    /// then the raw buffer.
    pub fn payload(&self) -> &[u8] {
        let buf = self.buffer();

        if let Some(rtp) = &self.rtp {
            return &buf[rtp.payload.clone()];
        }
        if let Some(rtcp) = &self.rtcp {
            return &buf[rtcp.payload.clone()];
        }
        if let Some(fec) = &self.fec {
            return &buf[fec.payload.clone()];
        }

        buf
    }

    pub fn has_source_id(&self) -> bool {
        self.rtp.is_some()
    }

    pub fn source_id(&self) -> SourceId {
        self.rtp.as_ref().map(|r| r.source_id).unwrap_or(0)
    }

    pub fn stream_timestamp(&self) -> StreamTimestamp {
        self.rtp.as_ref().map(|r| r.stream_timestamp).unwrap_or(0)
    }

    pub fn duration(&self) -> StreamTimestamp {
        self.rtp.as_ref().map(|r| r.duration).unwrap_or(0)
    }

    pub fn capture_timestamp(&self) -> Nanos {
        self.rtp.as_ref().map(|r| r.capture_timestamp).unwrap_or(0)
    }

    pub fn receive_timestamp(&self) -> Nanos {
        self.udp.as_ref().map(|u| u.receive_timestamp).unwrap_or(0)
    }

    /// FEC payload bytes (the erasure-coded region).
    pub fn fec_payload(&self) -> &[u8] {
        let fec = self.fec.as_ref().expect("packet: no fec sub-record");
        &self.buffer()[fec.payload.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut packet = Packet::new();
        assert!(!packet.has_flags(Packet::FLAG_PREPARED));

        packet.add_flags(Packet::FLAG_PREPARED | Packet::FLAG_AUDIO);
        assert!(packet.has_flags(Packet::FLAG_PREPARED));
        assert!(packet.has_flags(Packet::FLAG_AUDIO));
        assert!(!packet.has_flags(Packet::FLAG_COMPOSED));
    }

    #[test]
    #[should_panic(expected = "more than once")]
    fn test_duplicate_flag_panics() {
        let mut packet = Packet::new();
        packet.add_flags(Packet::FLAG_PREPARED);
        packet.add_flags(Packet::FLAG_PREPARED);
    }

    #[test]
    fn test_payload_priority() {
        let mut packet = Packet::new();
        packet.set_buffer(BytesMut::from(&b"0123456789"[..]));
        packet.fec = Some(Fec {
            payload: 0..8,
            ..Default::default()
        });
        packet.rtp = Some(Rtp {
            payload: 2..6,
            ..Default::default()
        });

        // RTP payload wins over FEC payload
        assert_eq!(packet.payload(), b"2345");
        assert_eq!(packet.fec_payload(), b"01234567");
    }
}
