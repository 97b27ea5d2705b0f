use crate::encoding::EncodingMap;
use crate::header;
use byteorder::{ByteOrder, NetworkEndian};
use packet::io::Parser;
use packet::{Packet, Rtp};
use shared::error::{Error, Result};
use std::ops::Range;

/// Parses RTP packets. CSRC entries and header extensions are skipped,
/// padding is stripped from the payload.
pub struct RtpParser {
    encodings: EncodingMap,
}

impl RtpParser {
    pub fn new(encodings: EncodingMap) -> Self {
        Self { encodings }
    }
}

impl Parser for RtpParser {
    fn parse(&self, packet: &mut Packet, region: Range<usize>) -> Result<()> {
        let buf = &packet.buffer()[region.clone()];
        if buf.len() < header::HEADER_SIZE {
            return Err(Error::RtpPacketTooShort);
        }

        if header::version(buf[0]) != header::VERSION {
            return Err(Error::RtpBadVersion);
        }

        let payload_type = header::payload_type(buf[1]);
        let seqnum = NetworkEndian::read_u16(&buf[2..4]);
        let stream_timestamp = NetworkEndian::read_u32(&buf[4..8]);
        let source_id = NetworkEndian::read_u32(&buf[8..12]);

        let mut payload_begin = header::HEADER_SIZE + header::csrc_count(buf[0]) * 4;
        if payload_begin > buf.len() {
            return Err(Error::RtpPacketTooShort);
        }

        if header::has_extension(buf[0]) {
            if payload_begin + 4 > buf.len() {
                return Err(Error::RtpPacketTooShort);
            }
            let ext_words = NetworkEndian::read_u16(&buf[payload_begin + 2..payload_begin + 4]);
            payload_begin += 4 + ext_words as usize * 4;
            if payload_begin > buf.len() {
                return Err(Error::RtpPacketTooShort);
            }
        }

        let mut payload_end = buf.len();
        if header::has_padding(buf[0]) {
            let padding = buf[buf.len() - 1] as usize;
            if padding == 0 || payload_begin + padding > payload_end {
                return Err(Error::RtpPacketTooShort);
            }
            payload_end -= padding;
        }

        let encoding = self.encodings.find_by_pt(payload_type)?;
        let duration = encoding.payload_samples(payload_end - payload_begin) as u32;

        packet.rtp = Some(Rtp {
            source_id,
            seqnum,
            stream_timestamp,
            duration,
            capture_timestamp: 0,
            marker: header::marker(buf[1]),
            payload_type,
            payload: region.start + payload_begin..region.start + payload_end,
        });

        Ok(())
    }
}
