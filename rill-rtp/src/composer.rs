use crate::header::{HEADER_SIZE, VERSION};
use byteorder::{ByteOrder, NetworkEndian};
use bytes::BytesMut;
use packet::io::Composer;
use packet::{Packet, Rtp};
use shared::error::{Error, Result};

/// Composes RTP packets: reserves header room in `prepare`, writes the
/// header fields in `compose`. Innermost link of a composer chain.
pub struct RtpComposer;

impl RtpComposer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RtpComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl Composer for RtpComposer {
    fn prepare(&self, packet: &mut Packet, mut buffer: BytesMut, payload_size: usize) -> Result<()> {
        let total = HEADER_SIZE + payload_size;
        if buffer.capacity() < total {
            return Err(Error::BadBuffer);
        }

        buffer.resize(total, 0);

        let mut rtp = packet.rtp.take().unwrap_or_default();
        rtp.payload = HEADER_SIZE..total;
        packet.rtp = Some(rtp);
        packet.set_buffer(buffer);

        Ok(())
    }

    fn compose(&self, packet: &mut Packet) -> Result<()> {
        let rtp = packet.rtp.clone().expect("rtp composer: no rtp sub-record");

        let buf = packet.buffer_mut();
        if buf.len() < HEADER_SIZE {
            return Err(Error::BadBuffer);
        }

        buf[0] = VERSION << 6;
        buf[1] = (rtp.payload_type & 0x7F) | if rtp.marker { 0x80 } else { 0 };
        NetworkEndian::write_u16(&mut buf[2..4], rtp.seqnum);
        NetworkEndian::write_u32(&mut buf[4..8], rtp.stream_timestamp);
        NetworkEndian::write_u32(&mut buf[8..12], rtp.source_id);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_and_compose() {
        let composer = RtpComposer::new();
        let mut packet = Packet::new();
        packet.rtp = Some(Rtp {
            source_id: 0xAABBCCDD,
            seqnum: 0x0102,
            stream_timestamp: 0x11223344,
            payload_type: 11,
            marker: true,
            ..Default::default()
        });

        composer
            .prepare(&mut packet, BytesMut::with_capacity(64), 4)
            .unwrap();
        assert_eq!(packet.rtp.as_ref().unwrap().payload, 12..16);

        packet.buffer_mut()[12..16].copy_from_slice(&[1, 2, 3, 4]);
        composer.compose(&mut packet).unwrap();

        let buf = packet.buffer();
        assert_eq!(buf[0], 0x80);
        assert_eq!(buf[1], 0x80 | 11);
        assert_eq!(&buf[2..4], &[0x01, 0x02]);
        assert_eq!(&buf[4..8], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(&buf[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(packet.payload(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_prepare_rejects_small_buffer() {
        let composer = RtpComposer::new();
        let mut packet = Packet::new();
        let err = composer
            .prepare(&mut packet, BytesMut::with_capacity(8), 40)
            .unwrap_err();
        assert_eq!(err, Error::BadBuffer);
    }
}
