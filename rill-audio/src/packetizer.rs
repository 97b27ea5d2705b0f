use crate::frame::{Frame, FrameWriter};
use crate::sample::SampleSpec;
use packet::io::{Composer, PacketWriter};
use packet::units::{Seqnum, StreamTimestamp};
use packet::{Packet, PacketFactory, Rtp};
use rtp::Encoding;
use shared::error::{Error, Result};
use shared::time::Nanos;

/// Slices a continuous stream of audio frames into equally sized RTP
/// packets.
///
/// Packets are prepared through the composer chain (which reserves all
/// header and footer room) but not composed: a downstream stage (FEC
/// block writer, or a plain composing stage) fills the headers once the
/// block bookkeeping is done.
pub struct Packetizer {
    writer: Box<dyn PacketWriter>,
    composer: Box<dyn Composer>,
    factory: PacketFactory,
    encoding: Encoding,
    spec: SampleSpec,

    samples_per_packet: usize,

    source_id: u32,
    seqnum: Seqnum,
    stream_timestamp: StreamTimestamp,

    pending: Vec<f32>,
    pending_capture_ts: Nanos,

    packet_count: u32,
    byte_count: u32,
}

impl Packetizer {
    pub fn new(
        writer: Box<dyn PacketWriter>,
        composer: Box<dyn Composer>,
        factory: PacketFactory,
        encoding: Encoding,
        packet_length: Nanos,
    ) -> Result<Self> {
        if packet_length <= 0 {
            return Err(Error::BadConfig("packetizer: packet length must be positive"));
        }
        let spec = SampleSpec::new(encoding.sample_rate, encoding.num_channels);
        let samples_per_packet = spec.ns_to_samples(packet_length);
        if samples_per_packet == 0 {
            return Err(Error::BadConfig("packetizer: packet length too small"));
        }

        Ok(Self {
            writer,
            composer,
            factory,
            encoding,
            spec,
            samples_per_packet,
            source_id: rand::random::<u32>(),
            seqnum: rand::random::<Seqnum>(),
            stream_timestamp: rand::random::<StreamTimestamp>(),
            pending: Vec::new(),
            pending_capture_ts: 0,
            packet_count: 0,
            byte_count: 0,
        })
    }

    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    /// Switch to a new SSRC (after a collision).
    pub fn set_source_id(&mut self, source_id: u32) {
        self.source_id = source_id;
    }

    pub fn packet_count(&self) -> u32 {
        self.packet_count
    }

    pub fn byte_count(&self) -> u32 {
        self.byte_count
    }

    /// Stream timestamp the packetizer would assign to a sample captured
    /// at the given time.
    pub fn stream_timestamp_at(&self, now: Nanos) -> StreamTimestamp {
        if self.pending_capture_ts == 0 {
            return self.stream_timestamp;
        }
        let delta = self.spec.ns_to_samples((now - self.pending_capture_ts).max(0));
        self.stream_timestamp.wrapping_add(delta as u32)
    }

    pub fn sample_spec(&self) -> SampleSpec {
        self.spec
    }

    /// Per-channel samples per packet.
    pub fn samples_per_packet(&self) -> usize {
        self.samples_per_packet
    }

    fn flush_packet(&mut self) -> Result<()> {
        let payload_size = self.encoding.payload_size(self.samples_per_packet);

        let Some(buffer) = self.factory.new_packet_buffer(payload_size + 64) else {
            return Err(Error::NoMem);
        };

        let mut packet = self.factory.new_packet();
        packet.rtp = Some(Rtp {
            source_id: self.source_id,
            seqnum: self.seqnum,
            stream_timestamp: self.stream_timestamp,
            duration: self.samples_per_packet as u32,
            capture_timestamp: self.pending_capture_ts,
            marker: false,
            payload_type: self.encoding.payload_type,
            payload: 0..0,
        });
        self.composer.prepare(&mut packet, buffer, payload_size)?;
        packet.add_flags(Packet::FLAG_PREPARED | Packet::FLAG_AUDIO);

        let samples = self.samples_per_packet * self.encoding.num_channels;
        let payload_range = packet.rtp.as_ref().unwrap().payload.clone();
        self.encoding
            .encode(&self.pending[..samples], &mut packet.buffer_mut()[payload_range]);
        self.pending.drain(..samples);

        self.seqnum = self.seqnum.wrapping_add(1);
        self.stream_timestamp = self
            .stream_timestamp
            .wrapping_add(self.samples_per_packet as u32);
        if self.pending_capture_ts != 0 {
            self.pending_capture_ts += self.spec.samples_to_ns(self.samples_per_packet);
        }
        self.packet_count += 1;
        self.byte_count += payload_size as u32;

        self.writer.write(packet)
    }
}

impl FrameWriter for Packetizer {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        if self.pending.is_empty() && frame.capture_timestamp != 0 {
            self.pending_capture_ts = frame.capture_timestamp;
        }
        self.pending.extend_from_slice(&frame.samples);

        while self.pending.len() >= self.samples_per_packet * self.encoding.num_channels {
            self.flush_packet()?;
        }
        Ok(())
    }
}
