//! FECFRAME payload-ID framing.
//!
//! Source packets carry an explicit payload ID *footer* after the
//! protected payload, so that the protected region is the whole original
//! packet and a reconstructed buffer can be re-parsed as RTP. Repair
//! packets carry the payload ID as a *header* followed by the repair
//! symbol.
//!
//! Reed-Solomon payload ID (6 bytes):
//! `source_block_number (16) | encoding_symbol_id (16) | source_block_length (16)`
//!
//! LDPC-Staircase payload ID (8 bytes) adds `block_length (16)`.

use byteorder::{ByteOrder, NetworkEndian};
use bytes::BytesMut;
use packet::io::{Composer, Parser};
use packet::{Fec, FecScheme, Packet};
use shared::error::{Error, Result};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Source,
    Repair,
}

/// Payload ID size on the wire for the given scheme.
pub fn payload_id_len(scheme: FecScheme) -> usize {
    match scheme {
        FecScheme::None => 0,
        FecScheme::Rs8m => 6,
        FecScheme::LdpcStaircase => 8,
    }
}

fn write_payload_id(scheme: FecScheme, fec: &Fec, out: &mut [u8]) {
    NetworkEndian::write_u16(&mut out[0..2], fec.source_block_number);
    NetworkEndian::write_u16(&mut out[2..4], fec.encoding_symbol_id as u16);
    NetworkEndian::write_u16(&mut out[4..6], fec.source_block_length as u16);
    if scheme == FecScheme::LdpcStaircase {
        NetworkEndian::write_u16(&mut out[6..8], fec.block_length as u16);
    }
}

fn read_payload_id(scheme: FecScheme, data: &[u8], fec: &mut Fec) {
    fec.source_block_number = NetworkEndian::read_u16(&data[0..2]);
    fec.encoding_symbol_id = NetworkEndian::read_u16(&data[2..4]) as usize;
    fec.source_block_length = NetworkEndian::read_u16(&data[4..6]) as usize;
    if scheme == FecScheme::LdpcStaircase {
        fec.block_length = NetworkEndian::read_u16(&data[6..8]) as usize;
    }
}

/// Composer for FEC packets of one scheme and kind.
///
/// For source packets it wraps the media composer (RTP) and appends the
/// payload ID footer; for repair packets it is the whole stack.
pub struct FecComposer {
    scheme: FecScheme,
    kind: PacketKind,
    inner: Option<Box<dyn Composer>>,
}

impl FecComposer {
    pub fn source(scheme: FecScheme, inner: Box<dyn Composer>) -> Self {
        Self {
            scheme,
            kind: PacketKind::Source,
            inner: Some(inner),
        }
    }

    pub fn repair(scheme: FecScheme) -> Self {
        Self {
            scheme,
            kind: PacketKind::Repair,
            inner: None,
        }
    }
}

impl Composer for FecComposer {
    fn prepare(&self, packet: &mut Packet, buffer: BytesMut, payload_size: usize) -> Result<()> {
        let id_len = payload_id_len(self.scheme);

        match self.kind {
            PacketKind::Source => {
                let inner = self
                    .inner
                    .as_ref()
                    .expect("fec composer: source packets need a media composer");
                // Reserve footer room after the media payload.
                inner.prepare(packet, buffer, payload_size + id_len)?;

                let rtp = packet
                    .rtp
                    .as_mut()
                    .expect("fec composer: media composer must set rtp");
                rtp.payload = rtp.payload.start..rtp.payload.end - id_len;

                let total = packet.buffer().len();
                packet.fec = Some(Fec {
                    fec_scheme: self.scheme,
                    payload: 0..total - id_len,
                    payload_id: total - id_len..total,
                    ..Default::default()
                });
            }
            PacketKind::Repair => {
                let total = id_len + payload_size;
                if buffer.capacity() < total {
                    return Err(Error::BadBuffer);
                }
                let mut buffer = buffer;
                buffer.resize(total, 0);
                packet.set_buffer(buffer);
                packet.fec = Some(Fec {
                    fec_scheme: self.scheme,
                    payload_id: 0..id_len,
                    payload: id_len..total,
                    ..Default::default()
                });
            }
        }

        Ok(())
    }

    fn compose(&self, packet: &mut Packet) -> Result<()> {
        let fec = packet.fec.clone().expect("fec composer: no fec sub-record");
        let id_range = fec.payload_id.clone();

        {
            let buf = packet.buffer_mut();
            if buf.len() < id_range.end {
                return Err(Error::BadBuffer);
            }
            write_payload_id(self.scheme, &fec, &mut buf[id_range]);
        }

        if let Some(inner) = &self.inner {
            inner.compose(packet)?;
        }
        Ok(())
    }
}

/// Parser for FEC packets of one scheme and kind; mirror of `FecComposer`.
pub struct FecParser {
    scheme: FecScheme,
    kind: PacketKind,
    inner: Option<Box<dyn Parser>>,
}

impl FecParser {
    pub fn source(scheme: FecScheme, inner: Box<dyn Parser>) -> Self {
        Self {
            scheme,
            kind: PacketKind::Source,
            inner: Some(inner),
        }
    }

    pub fn repair(scheme: FecScheme) -> Self {
        Self {
            scheme,
            kind: PacketKind::Repair,
            inner: None,
        }
    }
}

impl Parser for FecParser {
    fn parse(&self, packet: &mut Packet, region: Range<usize>) -> Result<()> {
        let id_len = payload_id_len(self.scheme);
        if region.len() < id_len + 1 {
            return Err(Error::FecPacketTooShort);
        }

        let mut fec = Fec {
            fec_scheme: self.scheme,
            ..Default::default()
        };

        match self.kind {
            PacketKind::Source => {
                fec.payload = region.start..region.end - id_len;
                fec.payload_id = region.end - id_len..region.end;
                let id = packet.buffer()[fec.payload_id.clone()].to_vec();
                read_payload_id(self.scheme, &id, &mut fec);

                let inner_region = fec.payload.clone();
                packet.fec = Some(fec);

                let inner = self
                    .inner
                    .as_ref()
                    .expect("fec parser: source packets need a media parser");
                inner.parse(packet, inner_region)?;
            }
            PacketKind::Repair => {
                fec.payload_id = region.start..region.start + id_len;
                fec.payload = region.start + id_len..region.end;
                let id = packet.buffer()[fec.payload_id.clone()].to_vec();
                read_payload_id(self.scheme, &id, &mut fec);
                packet.fec = Some(fec);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtp::{EncodingMap, RtpComposer, RtpParser, PAYLOAD_TYPE_L16_STEREO};

    #[test]
    fn test_source_roundtrip() {
        let composer = FecComposer::source(FecScheme::Rs8m, Box::new(RtpComposer::new()));

        let mut pkt = Packet::new();
        pkt.rtp = Some(packet::Rtp {
            source_id: 11,
            seqnum: 22,
            stream_timestamp: 33,
            payload_type: PAYLOAD_TYPE_L16_STEREO,
            ..Default::default()
        });
        composer
            .prepare(&mut pkt, BytesMut::with_capacity(128), 8)
            .unwrap();

        {
            let fec = pkt.fec.as_mut().unwrap();
            fec.source_block_number = 400;
            fec.encoding_symbol_id = 3;
            fec.source_block_length = 10;
            fec.block_length = 15;
        }
        composer.compose(&mut pkt).unwrap();

        // rtp payload excludes the footer, fec payload covers the
        // whole packet except the footer
        assert_eq!(pkt.rtp.as_ref().unwrap().payload, 12..20);
        assert_eq!(pkt.fec.as_ref().unwrap().payload, 0..20);
        assert_eq!(pkt.fec.as_ref().unwrap().payload_id, 20..26);
        assert_eq!(pkt.buffer().len(), 26);

        let parser = FecParser::source(
            FecScheme::Rs8m,
            Box::new(RtpParser::new(EncodingMap::new())),
        );
        let mut parsed = Packet::new();
        parsed.set_buffer(BytesMut::from(pkt.buffer()));
        let len = parsed.buffer().len();
        parser.parse(&mut parsed, 0..len).unwrap();

        let fec = parsed.fec.as_ref().unwrap();
        assert_eq!(fec.source_block_number, 400);
        assert_eq!(fec.encoding_symbol_id, 3);
        assert_eq!(fec.source_block_length, 10);
        let rtp = parsed.rtp.as_ref().unwrap();
        assert_eq!(rtp.source_id, 11);
        assert_eq!(rtp.seqnum, 22);
        assert_eq!(rtp.payload, 12..20);
    }

    #[test]
    fn test_repair_roundtrip() {
        let composer = FecComposer::repair(FecScheme::LdpcStaircase);

        let mut pkt = Packet::new();
        composer
            .prepare(&mut pkt, BytesMut::with_capacity(64), 16)
            .unwrap();
        {
            let fec = pkt.fec.as_mut().unwrap();
            fec.source_block_number = 7;
            fec.encoding_symbol_id = 12;
            fec.source_block_length = 10;
            fec.block_length = 15;
        }
        pkt.buffer_mut()[8..24].copy_from_slice(&[9u8; 16]);
        composer.compose(&mut pkt).unwrap();

        let parser = FecParser::repair(FecScheme::LdpcStaircase);
        let mut parsed = Packet::new();
        parsed.set_buffer(BytesMut::from(pkt.buffer()));
        let len = parsed.buffer().len();
        parser.parse(&mut parsed, 0..len).unwrap();

        let fec = parsed.fec.as_ref().unwrap();
        assert_eq!(fec.source_block_number, 7);
        assert_eq!(fec.encoding_symbol_id, 12);
        assert_eq!(fec.source_block_length, 10);
        assert_eq!(fec.block_length, 15);
        assert_eq!(parsed.fec_payload(), &[9u8; 16]);
    }

    #[test]
    fn test_parse_too_short() {
        let parser = FecParser::repair(FecScheme::Rs8m);
        let mut pkt = Packet::new();
        pkt.set_buffer(BytesMut::from(&[0u8; 4][..]));
        assert_eq!(
            parser.parse(&mut pkt, 0..4).unwrap_err(),
            Error::FecPacketTooShort
        );
    }
}
