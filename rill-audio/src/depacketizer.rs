use crate::frame::{Frame, FrameReader};
use crate::sample::SampleSpec;
use log::trace;
use packet::io::PacketReader;
use packet::units::{self, StreamTimestamp};
use packet::Packet;
use rtp::Encoding;
use shared::error::Result;
use shared::time::Nanos;

/// Depacketizer counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepacketizerMetrics {
    /// Samples zero-filled in place of missing packets.
    pub missing_samples: u64,
    /// Samples decoded from packets.
    pub decoded_samples: u64,
    /// Packets dropped because they were too late.
    pub late_packets: u64,
}

/// Turns an ordered packet stream back into a gap-free stream of audio
/// frames, inserting silence where packets are missing.
pub struct Depacketizer {
    reader: Box<dyn PacketReader>,
    encoding: Encoding,
    spec: SampleSpec,

    // Decoded samples of the packet currently being consumed.
    decoded: Vec<f32>,
    decoded_pos: usize,
    decoded_capture_ts: Nanos,

    // A fetched packet whose leading gap did not fit the current frame.
    pending: Option<Packet>,

    // Stream timestamp of the next sample to hand out.
    next_timestamp: Option<StreamTimestamp>,

    metrics: DepacketizerMetrics,
}

impl Depacketizer {
    pub fn new(reader: Box<dyn PacketReader>, encoding: Encoding) -> Self {
        Self {
            reader,
            encoding,
            spec: SampleSpec::new(encoding.sample_rate, encoding.num_channels),
            decoded: Vec::new(),
            decoded_pos: 0,
            decoded_capture_ts: 0,
            pending: None,
            next_timestamp: None,
            metrics: DepacketizerMetrics::default(),
        }
    }

    pub fn metrics(&self) -> DepacketizerMetrics {
        self.metrics
    }

    /// Stream timestamp of the next sample to be played.
    pub fn next_timestamp(&self) -> Option<StreamTimestamp> {
        self.next_timestamp
    }

    fn fetch_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            let Some(packet) = self.reader.read()? else {
                return Ok(None);
            };
            let Some(rtp) = &packet.rtp else {
                trace!("depacketizer: dropping non-rtp packet");
                continue;
            };

            if let Some(next) = self.next_timestamp {
                let end = rtp.stream_timestamp.wrapping_add(rtp.duration);
                if units::stream_timestamp_le(end, next) {
                    self.metrics.late_packets += 1;
                    trace!(
                        "depacketizer: dropping late packet: ts={} next={}",
                        rtp.stream_timestamp, next
                    );
                    continue;
                }
            }

            return Ok(Some(packet));
        }
    }

    fn decode_packet(&mut self, packet: &Packet) {
        let rtp = packet.rtp.as_ref().unwrap();

        self.decoded.clear();
        self.encoding.decode(packet.payload(), &mut self.decoded);
        self.decoded_pos = 0;
        self.decoded_capture_ts = rtp.capture_timestamp;

        // If the stream position is already inside this packet, skip the
        // overlapping part.
        if let Some(next) = self.next_timestamp {
            let skip = units::stream_timestamp_diff(next, rtp.stream_timestamp);
            if skip > 0 {
                let skip = (skip as usize).min(self.decoded.len() / self.encoding.num_channels);
                self.decoded_pos = skip * self.encoding.num_channels;
                if self.decoded_capture_ts != 0 {
                    self.decoded_capture_ts += self.spec.samples_to_ns(skip);
                }
            }
        } else {
            self.next_timestamp = Some(rtp.stream_timestamp);
        }
    }

    fn advance_timestamp(&mut self, samples_per_chan: usize) {
        if let Some(ts) = self.next_timestamp {
            self.next_timestamp = Some(ts.wrapping_add(samples_per_chan as u32));
        }
    }
}

impl FrameReader for Depacketizer {
    fn read(&mut self, num_samples: usize) -> Result<Frame> {
        let channels = self.encoding.num_channels;
        assert!(
            num_samples % channels == 0,
            "depacketizer: frame size must be a multiple of channel count"
        );

        let mut frame = Frame::new(num_samples, channels);
        let mut filled = 0;

        while filled < num_samples {
            // Continue with the current packet if it has samples left.
            if self.decoded_pos < self.decoded.len() {
                let available = self.decoded.len() - self.decoded_pos;
                let take = available.min(num_samples - filled);

                if frame.capture_timestamp == 0 && self.decoded_capture_ts != 0 {
                    frame.capture_timestamp =
                        self.decoded_capture_ts - self.spec.samples_to_ns(filled / channels);
                }

                frame.samples[filled..filled + take]
                    .copy_from_slice(&self.decoded[self.decoded_pos..self.decoded_pos + take]);
                self.decoded_pos += take;
                filled += take;
                frame.flags |= Frame::HAS_SIGNAL;
                self.metrics.decoded_samples += (take / channels) as u64;
                self.advance_timestamp(take / channels);
                continue;
            }

            let packet = match self.pending.take() {
                Some(packet) => packet,
                None => match self.fetch_packet()? {
                    Some(packet) => packet,
                    None => {
                        // Nothing buffered: emit silence for the rest.
                        let missing = (num_samples - filled) / channels;
                        self.metrics.missing_samples += missing as u64;
                        self.advance_timestamp(missing);
                        if filled > 0 || self.next_timestamp.is_some() {
                            frame.flags |= Frame::HAS_GAPS;
                        }
                        break;
                    }
                },
            };

            let rtp = packet.rtp.as_ref().unwrap();
            let next = self.next_timestamp.unwrap_or(rtp.stream_timestamp);
            let gap = units::stream_timestamp_diff(rtp.stream_timestamp, next);

            if gap > 0 {
                // The packet starts later than the stream position:
                // zero-fill the hole first, up to the frame end.
                let fill = (gap as usize).min((num_samples - filled) / channels);
                self.metrics.missing_samples += fill as u64;
                self.advance_timestamp(fill);
                filled += fill * channels;
                frame.flags |= Frame::HAS_GAPS | Frame::HAS_DROPS;

                if (fill as i64) < gap {
                    // The hole continues into the next frame; keep the
                    // packet for later.
                    self.pending = Some(packet);
                    continue;
                }
            }

            self.decode_packet(&packet);
        }

        frame.duration = (num_samples / channels) as u32;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use packet::io::Composer;
    use packet::Rtp;
    use rtp::{EncodingMap, RtpComposer, PAYLOAD_TYPE_L16_MONO};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    struct QueueReader(Rc<RefCell<VecDeque<Packet>>>);

    impl PacketReader for QueueReader {
        fn read(&mut self) -> Result<Option<Packet>> {
            Ok(self.0.borrow_mut().pop_front())
        }
    }

    fn encoding() -> Encoding {
        EncodingMap::new().find_by_pt(PAYLOAD_TYPE_L16_MONO).unwrap()
    }

    fn make_packet(seqnum: u16, timestamp: u32, samples: &[f32]) -> Packet {
        let composer = RtpComposer::new();
        let mut packet = Packet::new();
        packet.rtp = Some(Rtp {
            source_id: 1,
            seqnum,
            stream_timestamp: timestamp,
            duration: samples.len() as u32,
            payload_type: PAYLOAD_TYPE_L16_MONO,
            ..Default::default()
        });
        composer
            .prepare(&mut packet, BytesMut::with_capacity(256), samples.len() * 2)
            .unwrap();
        let range = packet.rtp.as_ref().unwrap().payload.clone();
        encoding().encode(samples, &mut packet.buffer_mut()[range]);
        packet
    }

    #[test]
    fn test_continuous_stream() {
        let queue: Rc<RefCell<VecDeque<Packet>>> = Rc::default();
        let mut depacketizer = Depacketizer::new(Box::new(QueueReader(queue.clone())), encoding());

        queue
            .borrow_mut()
            .push_back(make_packet(1, 100, &[0.1, 0.2, 0.3, 0.4]));
        queue
            .borrow_mut()
            .push_back(make_packet(2, 104, &[0.5, 0.6, 0.7, 0.8]));

        let frame = depacketizer.read(8).unwrap();
        assert!(frame.flags & Frame::HAS_SIGNAL != 0);
        assert!(frame.flags & Frame::HAS_GAPS == 0);
        for (i, expected) in [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8].iter().enumerate() {
            assert!((frame.samples[i] - expected).abs() < 1e-3);
        }
        assert_eq!(depacketizer.next_timestamp(), Some(108));
    }

    #[test]
    fn test_gap_zero_filled() {
        let queue: Rc<RefCell<VecDeque<Packet>>> = Rc::default();
        let mut depacketizer = Depacketizer::new(Box::new(QueueReader(queue.clone())), encoding());

        queue.borrow_mut().push_back(make_packet(1, 100, &[0.5, 0.5]));
        // seqnum 2 (ts 102..104) is missing
        queue.borrow_mut().push_back(make_packet(3, 104, &[0.7, 0.7]));

        let frame = depacketizer.read(6).unwrap();
        assert!(frame.flags & Frame::HAS_DROPS != 0);
        assert!((frame.samples[0] - 0.5).abs() < 1e-3);
        assert_eq!(frame.samples[2], 0.0);
        assert_eq!(frame.samples[3], 0.0);
        assert!((frame.samples[4] - 0.7).abs() < 1e-3);
        assert_eq!(depacketizer.metrics().missing_samples, 2);
    }

    #[test]
    fn test_underrun_emits_silence() {
        let queue: Rc<RefCell<VecDeque<Packet>>> = Rc::default();
        let mut depacketizer = Depacketizer::new(Box::new(QueueReader(queue.clone())), encoding());

        queue.borrow_mut().push_back(make_packet(1, 100, &[0.9, 0.9]));

        let frame = depacketizer.read(4).unwrap();
        assert!(frame.flags & Frame::HAS_SIGNAL != 0);
        assert!(frame.flags & Frame::HAS_GAPS != 0);
        assert_eq!(frame.samples[2], 0.0);

        // Stream position advanced through the silence: a late packet
        // for that range is dropped.
        queue.borrow_mut().push_back(make_packet(2, 102, &[0.1, 0.1]));
        let _ = depacketizer.read(2).unwrap();
        assert_eq!(depacketizer.metrics().late_packets, 1);
    }

    #[test]
    fn test_capture_timestamp_propagated() {
        let queue: Rc<RefCell<VecDeque<Packet>>> = Rc::default();
        let mut depacketizer = Depacketizer::new(Box::new(QueueReader(queue.clone())), encoding());

        let mut packet = make_packet(1, 100, &[0.1, 0.2]);
        packet.rtp.as_mut().unwrap().capture_timestamp = 5_000_000_000;
        queue.borrow_mut().push_back(packet);

        let frame = depacketizer.read(2).unwrap();
        assert_eq!(frame.capture_timestamp, 5_000_000_000);
    }
}
