//! Writer -> wire -> reader tests for the FEC block codec layer.

use bytes::BytesMut;
use fec::codec::{CodecConfig, CodecMap};
use fec::{
    BlockReader, BlockReaderConfig, BlockWriter, BlockWriterConfig, FecComposer, FecParser,
    FecScheme,
};
use packet::io::{Composer, PacketReader, PacketWriter, Parser};
use packet::{Packet, PacketFactory};
use rtp::{EncodingMap, RtpComposer, RtpParser, PAYLOAD_TYPE_L16_STEREO};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

const PAYLOAD_SAMPLES: usize = 10;
const BUFFER_SIZE: usize = 512;

fn capture_ts_for(stream_timestamp: u32) -> i64 {
    1_000_000_000 + stream_timestamp as i64 * 10_000
}

struct CaptureWriter(Rc<RefCell<Vec<Packet>>>);

impl PacketWriter for CaptureWriter {
    fn write(&mut self, packet: Packet) -> shared::error::Result<()> {
        self.0.borrow_mut().push(packet);
        Ok(())
    }
}

struct VecReader(Rc<RefCell<VecDeque<Packet>>>);

impl PacketReader for VecReader {
    fn read(&mut self) -> shared::error::Result<Option<Packet>> {
        Ok(self.0.borrow_mut().pop_front())
    }
}

struct Harness {
    scheme: FecScheme,
    writer: BlockWriter,
    captured: Rc<RefCell<Vec<Packet>>>,
    reader: BlockReader,
    source_queue: Rc<RefCell<VecDeque<Packet>>>,
    repair_queue: Rc<RefCell<VecDeque<Packet>>>,
    seqnum: u16,
    timestamp: u32,
}

impl Harness {
    fn new(scheme: FecScheme, k: usize, r: usize) -> Self {
        Self::with_window(scheme, k, r, BlockReaderConfig::default())
    }

    fn with_window(scheme: FecScheme, k: usize, r: usize, reader_config: BlockReaderConfig) -> Self {
        let codec_config = CodecConfig {
            scheme,
            ..Default::default()
        };
        let codec_map = CodecMap::new();

        let captured: Rc<RefCell<Vec<Packet>>> = Rc::default();
        let writer = BlockWriter::new(
            BlockWriterConfig {
                n_source_packets: k,
                n_repair_packets: r,
            },
            scheme,
            codec_map.new_encoder(&codec_config).unwrap(),
            Box::new(CaptureWriter(captured.clone())),
            Box::new(FecComposer::source(scheme, Box::new(RtpComposer::new()))),
            Box::new(FecComposer::repair(scheme)),
            PacketFactory::new(BUFFER_SIZE),
        )
        .unwrap();

        let source_queue: Rc<RefCell<VecDeque<Packet>>> = Rc::default();
        let repair_queue: Rc<RefCell<VecDeque<Packet>>> = Rc::default();
        let reader = BlockReader::new(
            reader_config,
            scheme,
            codec_map.new_decoder(&codec_config).unwrap(),
            Box::new(VecReader(source_queue.clone())),
            Box::new(VecReader(repair_queue.clone())),
            Box::new(RtpParser::new(EncodingMap::new())),
        );

        Self {
            scheme,
            writer,
            captured,
            reader,
            source_queue,
            repair_queue,
            seqnum: 100,
            timestamp: 1000,
        }
    }

    /// Write one source packet carrying a recognizable payload.
    fn write_packet(&mut self) {
        let composer = FecComposer::source(self.scheme, Box::new(RtpComposer::new()));
        let factory = PacketFactory::new(BUFFER_SIZE);

        let mut packet = factory.new_packet();
        packet.rtp = Some(packet::Rtp {
            source_id: 0xDEAD_BEEF,
            seqnum: self.seqnum,
            stream_timestamp: self.timestamp,
            capture_timestamp: 1_000_000_000 + self.timestamp as i64 * 10_000,
            payload_type: PAYLOAD_TYPE_L16_STEREO,
            ..Default::default()
        });
        composer
            .prepare(
                &mut packet,
                BytesMut::with_capacity(BUFFER_SIZE),
                PAYLOAD_SAMPLES * 4,
            )
            .unwrap();
        packet.add_flags(Packet::FLAG_PREPARED | Packet::FLAG_AUDIO);

        let payload_range = packet.rtp.as_ref().unwrap().payload.clone();
        let seqnum = self.seqnum;
        for (i, byte) in packet.buffer_mut()[payload_range].iter_mut().enumerate() {
            *byte = (seqnum as usize + i) as u8;
        }

        self.writer.write(packet).unwrap();

        self.seqnum = self.seqnum.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(PAYLOAD_SAMPLES as u32);
    }

    /// Re-parse captured wire bytes and deliver them to the reader
    /// queues, skipping packets for which `drop_fn` returns true.
    fn deliver(&mut self, mut drop_fn: impl FnMut(&Packet) -> bool) {
        let packets: Vec<Packet> = self.captured.borrow_mut().drain(..).collect();
        for packet in packets {
            if drop_fn(&packet) {
                continue;
            }
            let repair = packet.has_flags(Packet::FLAG_REPAIR);

            let mut received = Packet::new();
            received.set_buffer(BytesMut::from(packet.buffer()));
            let len = received.buffer().len();
            if repair {
                FecParser::repair(self.scheme)
                    .parse(&mut received, 0..len)
                    .unwrap();
                self.repair_queue.borrow_mut().push_back(received);
            } else {
                FecParser::source(self.scheme, Box::new(RtpParser::new(EncodingMap::new())))
                    .parse(&mut received, 0..len)
                    .unwrap();
                // The wire carries no capture timestamp; upstream stages
                // stamp it on received packets. Emulate that here so that
                // interpolation for restored packets has anchors.
                let rtp = received.rtp.as_mut().unwrap();
                rtp.capture_timestamp = capture_ts_for(rtp.stream_timestamp);
                self.source_queue.borrow_mut().push_back(received);
            }
        }
    }

    fn read_all(&mut self) -> Vec<Packet> {
        let mut packets = vec![];
        while let Some(packet) = self.reader.read().unwrap() {
            packets.push(packet);
        }
        packets
    }
}

#[test]
fn test_no_loss_identity() {
    let mut harness = Harness::new(FecScheme::Rs8m, 5, 3);

    for _ in 0..20 {
        harness.write_packet();
    }
    harness.deliver(|_| false);

    let emitted = harness.read_all();
    assert_eq!(emitted.len(), 20);
    for (i, packet) in emitted.iter().enumerate() {
        let rtp = packet.rtp.as_ref().unwrap();
        assert_eq!(rtp.seqnum, 100 + i as u16);
        assert!(!packet.has_flags(Packet::FLAG_RESTORED));
    }
    assert_eq!(harness.reader.metrics().recovered_packets, 0);
    assert_eq!(harness.reader.metrics().lost_packets, 0);
}

#[test]
fn test_rs8m_recovers_dropped_source_packets() {
    let mut harness = Harness::new(FecScheme::Rs8m, 5, 3);

    for _ in 0..20 {
        harness.write_packet();
    }

    // Drop every 2nd and 4th source packet of each block (2 <= r).
    let mut source_index = 0;
    harness.deliver(|packet| {
        if packet.has_flags(Packet::FLAG_REPAIR) {
            return false;
        }
        let drop = source_index % 5 == 1 || source_index % 5 == 3;
        source_index += 1;
        drop
    });

    let emitted = harness.read_all();
    assert_eq!(emitted.len(), 20);
    let mut restored = 0;
    for (i, packet) in emitted.iter().enumerate() {
        let rtp = packet.rtp.as_ref().unwrap();
        assert_eq!(rtp.seqnum, 100 + i as u16, "gap at {i}");
        if packet.has_flags(Packet::FLAG_RESTORED) {
            restored += 1;
            // capture timestamp linearly interpolated from neighbors
            assert_eq!(rtp.capture_timestamp, capture_ts_for(rtp.stream_timestamp));
        }
    }
    assert_eq!(restored, 8);
    assert_eq!(harness.reader.metrics().recovered_packets, 8);
    assert_eq!(harness.reader.metrics().lost_packets, 0);
}

#[test]
fn test_restored_payload_matches_original() {
    let mut harness = Harness::new(FecScheme::Rs8m, 4, 2);

    for _ in 0..4 {
        harness.write_packet();
    }

    let mut source_index = 0;
    harness.deliver(|packet| {
        if packet.has_flags(Packet::FLAG_REPAIR) {
            return false;
        }
        let drop = source_index == 2;
        source_index += 1;
        drop
    });

    let emitted = harness.read_all();
    assert_eq!(emitted.len(), 4);
    let packet = &emitted[2];
    assert!(packet.has_flags(Packet::FLAG_RESTORED));
    let expected: Vec<u8> = (0..PAYLOAD_SAMPLES * 4).map(|i| (102 + i) as u8).collect();
    assert_eq!(packet.payload(), &expected[..]);
}

#[test]
fn test_ldpc_recovers_dropped_source_packets() {
    let mut harness = Harness::new(FecScheme::LdpcStaircase, 8, 4);

    for _ in 0..32 {
        harness.write_packet();
    }

    // One loss per block, always recoverable by the staircase.
    let mut source_index = 0;
    harness.deliver(|packet| {
        if packet.has_flags(Packet::FLAG_REPAIR) {
            return false;
        }
        let drop = source_index % 8 == 3;
        source_index += 1;
        drop
    });

    let emitted = harness.read_all();
    assert_eq!(emitted.len(), 32);
    assert_eq!(harness.reader.metrics().recovered_packets, 4);
}

#[test]
fn test_unrecoverable_block_expires() {
    let mut harness = Harness::with_window(
        FecScheme::Rs8m,
        4,
        2,
        BlockReaderConfig {
            window: 2,
            max_sbn_jump: 100,
        },
    );

    // Block 0: lose 3 packets and all repair (unrecoverable).
    // Blocks 1..4: complete.
    for _ in 0..16 {
        harness.write_packet();
    }
    let mut index = 0;
    harness.deliver(|packet| {
        let fec = packet.fec.as_ref().unwrap();
        let first_block = index < 6;
        index += 1;
        first_block && fec.encoding_symbol_id != 0
    });

    let emitted = harness.read_all();
    // Block 0 contributes only its first packet (emitted when the block
    // expires), blocks 1..4 contribute everything.
    assert_eq!(emitted.len(), 1 + 12);
    assert_eq!(emitted[0].rtp.as_ref().unwrap().seqnum, 100);
    assert_eq!(emitted[1].rtp.as_ref().unwrap().seqnum, 104);
    assert_eq!(harness.reader.metrics().lost_packets, 3);
}

#[test]
fn test_late_packets_dropped() {
    let mut harness = Harness::with_window(
        FecScheme::Rs8m,
        2,
        1,
        BlockReaderConfig {
            window: 2,
            max_sbn_jump: 100,
        },
    );

    for _ in 0..12 {
        harness.write_packet();
    }

    // Hold back block 0 until the window has moved past it.
    let mut held = vec![];
    let captured: Vec<Packet> = harness.captured.borrow_mut().drain(..).collect();
    for packet in captured {
        if packet.fec.as_ref().unwrap().encoding_symbol_id == 0
            && packet.rtp.is_some()
            && packet.rtp.as_ref().unwrap().seqnum == 100
        {
            held.push(packet);
        } else {
            harness.captured.borrow_mut().push(packet);
        }
    }
    harness.deliver(|_| false);
    let _ = harness.read_all();

    for packet in held {
        harness.captured.borrow_mut().push(packet);
    }
    harness.deliver(|_| false);
    let _ = harness.read_all();

    assert!(harness.reader.metrics().late_packets >= 1);
}

#[test]
fn test_writer_resize_applies_next_block() {
    let mut harness = Harness::new(FecScheme::Rs8m, 3, 1);

    harness.write_packet();
    // Pending block finishes with old dimensions.
    harness.writer.resize(2, 1).unwrap();
    for _ in 0..5 {
        harness.write_packet();
    }
    harness.deliver(|_| false);

    // Source packets are forwarded as they are written, so the first
    // packet of the still-incomplete third block is emitted too.
    let emitted = harness.read_all();
    assert_eq!(emitted.len(), 6);
    let fec0 = emitted[0].fec.as_ref().unwrap();
    assert_eq!(fec0.source_block_length, 3);
    let fec3 = emitted[3].fec.as_ref().unwrap();
    assert_eq!(fec3.source_block_length, 2);
}

#[test]
fn test_writer_rejects_bad_resize() {
    let mut harness = Harness::new(FecScheme::Rs8m, 3, 1);

    assert!(harness.writer.resize(0, 1).is_err());
    assert!(harness.writer.resize(300, 300).is_err());
    // state is untouched
    for _ in 0..3 {
        harness.write_packet();
    }
    harness.deliver(|_| false);
    assert_eq!(harness.read_all().len(), 3);
}

#[test]
fn test_writer_tracks_block_duration() {
    let mut harness = Harness::new(FecScheme::Rs8m, 2, 1);

    assert_eq!(harness.writer.max_block_duration(), 0);
    for _ in 0..6 {
        harness.write_packet();
    }
    // 2 packets per block, 10 samples per packet
    assert_eq!(harness.writer.max_block_duration(), 20);
}
