use crate::codec::BlockDecoder;
use log::{debug, trace};
use packet::io::{PacketReader, Parser};
use packet::units::{self, Blknum, StreamTimestamp};
use packet::{Fec, FecScheme, Packet};
use shared::error::Result;
use shared::rate_limit::RateLimiter;
use shared::time::{Nanos, SECOND};
use std::collections::VecDeque;

/// FEC block reader parameters.
#[derive(Debug, Clone, Copy)]
pub struct BlockReaderConfig {
    /// Maximum allowed SBN jump relative to the leading edge; a larger
    /// jump is treated as a stream restart.
    pub max_sbn_jump: usize,

    /// Size of the reorder window, in blocks. A block slides out of the
    /// window (and its missing packets are declared lost) when the
    /// leading edge gets this far ahead.
    pub window: usize,
}

impl Default for BlockReaderConfig {
    fn default() -> Self {
        Self {
            max_sbn_jump: 100,
            window: 32,
        }
    }
}

/// Loss and recovery counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockReaderMetrics {
    /// Source packets that were never received nor reconstructed.
    pub lost_packets: u64,
    /// Packets that arrived for an already closed or expired block.
    pub late_packets: u64,
    /// Source packets reconstructed by the decoder.
    pub recovered_packets: u64,
}

#[derive(Default)]
struct Block {
    sblen: usize,
    blen: usize,
    payload_size: usize,
    source_slots: Vec<Option<Packet>>,
    repair_slots: Vec<Option<Packet>>,
    next_emit: usize,
    unrecoverable: bool,
    // new packet arrived since the last decode attempt
    dirty: bool,
}

impl Block {
    fn received(&self) -> usize {
        self.source_slots.iter().flatten().count() + self.repair_slots.iter().flatten().count()
    }

    fn has_dimensions(&self) -> bool {
        self.sblen > 0
    }
}

/// Accepts received source and repair packets in any order and emits
/// source packets in strict (SBN, ESI) order, reconstructing lost ones
/// where enough packets of a block are available.
///
/// Blocks are kept in a ring ordered by SBN. The leading edge is the
/// highest SBN ever seen; blocks that fall `window` behind it expire:
/// their remaining received packets are emitted (gaps skipped) and their
/// missing packets are counted as lost.
pub struct BlockReader {
    config: BlockReaderConfig,
    fec_scheme: FecScheme,

    decoder: Box<dyn BlockDecoder>,
    source_reader: Box<dyn PacketReader>,
    repair_reader: Box<dyn PacketReader>,
    // Parses reconstructed buffers back into media packets.
    media_parser: Box<dyn Parser>,

    // blocks[i] holds SBN head_sbn + i
    blocks: VecDeque<Block>,
    head_sbn: Blknum,
    started: bool,

    // Packets from expired blocks, ready for emission.
    backlog: VecDeque<Packet>,

    metrics: BlockReaderMetrics,

    prev_block_timestamp_valid: bool,
    prev_block_timestamp: StreamTimestamp,
    block_max_duration: i64,

    drop_log_limiter: RateLimiter,
}

impl BlockReader {
    pub fn new(
        config: BlockReaderConfig,
        fec_scheme: FecScheme,
        decoder: Box<dyn BlockDecoder>,
        source_reader: Box<dyn PacketReader>,
        repair_reader: Box<dyn PacketReader>,
        media_parser: Box<dyn Parser>,
    ) -> Self {
        assert!(config.window > 0, "fec block reader: zero window");
        Self {
            config,
            fec_scheme,
            decoder,
            source_reader,
            repair_reader,
            media_parser,
            blocks: VecDeque::new(),
            head_sbn: 0,
            started: false,
            backlog: VecDeque::new(),
            metrics: BlockReaderMetrics::default(),
            prev_block_timestamp_valid: false,
            prev_block_timestamp: 0,
            block_max_duration: 0,
            drop_log_limiter: RateLimiter::new(5 * SECOND),
        }
    }

    pub fn metrics(&self) -> BlockReaderMetrics {
        self.metrics
    }

    /// Maximum observed stream-timestamp distance between the first
    /// packets of consecutive emitted blocks.
    pub fn max_block_duration(&self) -> StreamTimestamp {
        self.block_max_duration as StreamTimestamp
    }

    /// Fetch pending packets and emit the next in-order source packet,
    /// if one is available. Never blocks on missing data.
    pub fn read(&mut self) -> Result<Option<Packet>> {
        self.fetch_packets()?;
        self.repair_blocks();

        if let Some(packet) = self.backlog.pop_front() {
            return Ok(Some(packet));
        }
        Ok(self.emit_next())
    }

    fn fetch_packets(&mut self) -> Result<()> {
        while let Some(packet) = self.source_reader.read()? {
            self.route_packet(packet, false);
        }
        while let Some(packet) = self.repair_reader.read()? {
            self.route_packet(packet, true);
        }
        Ok(())
    }

    fn route_packet(&mut self, packet: Packet, repair: bool) {
        let Some(fec) = &packet.fec else {
            trace!("fec block reader: dropping non-fec packet");
            return;
        };
        if fec.fec_scheme != self.fec_scheme {
            trace!("fec block reader: dropping packet with wrong scheme");
            return;
        }
        let sbn = fec.source_block_number;

        if !self.started {
            self.started = true;
            self.head_sbn = sbn;
        }

        let dist = units::blknum_diff(sbn, self.head_sbn);
        if dist < 0 {
            self.metrics.late_packets += 1;
            if self.drop_log_limiter.allow(packet.receive_timestamp()) {
                debug!(
                    "fec block reader: dropping late packet: sbn={} head={} (+{} more)",
                    sbn,
                    self.head_sbn,
                    self.drop_log_limiter.suppressed()
                );
            }
            return;
        }
        let dist = dist as usize;

        if dist >= self.config.window {
            let jump = dist - self.config.window + 1;
            if jump > self.config.max_sbn_jump {
                debug!(
                    "fec block reader: too big sbn jump, restarting: sbn={} head={}",
                    sbn, self.head_sbn
                );
                self.restart(sbn);
            } else {
                for _ in 0..jump {
                    self.expire_front();
                }
            }
        }

        let dist = units::blknum_diff(sbn, self.head_sbn) as usize;
        while self.blocks.len() <= dist {
            self.blocks.push_back(Block::default());
        }

        self.insert_packet(dist, packet, repair);
    }

    fn insert_packet(&mut self, index: usize, packet: Packet, repair: bool) {
        let fec = packet.fec.as_ref().unwrap().clone();
        let block = &mut self.blocks[index];

        if block.payload_size == 0 {
            block.payload_size = fec.payload.len();
        } else if fec.payload.len() != block.payload_size {
            if !repair {
                block.unrecoverable = true;
            }
            debug!(
                "fec block reader: dropping packet with mismatched payload size:\
                 sbn={} esi={} expected={} got={}",
                fec.source_block_number,
                fec.encoding_symbol_id,
                block.payload_size,
                fec.payload.len()
            );
            return;
        }

        if block.sblen == 0 {
            block.sblen = fec.source_block_length;
            block.source_slots.resize_with(block.sblen, || None);
        }
        if fec.block_length > block.blen {
            block.blen = fec.block_length;
        }

        let esi = fec.encoding_symbol_id;
        if repair {
            if esi < block.sblen {
                trace!("fec block reader: dropping repair packet with source esi");
                return;
            }
            let repair_index = esi - block.sblen;
            if block.blen < esi + 1 {
                block.blen = esi + 1;
            }
            if block.repair_slots.len() <= repair_index {
                block.repair_slots.resize_with(repair_index + 1, || None);
            }
            if block.repair_slots[repair_index].is_none() {
                block.repair_slots[repair_index] = Some(packet);
                block.dirty = true;
            }
        } else {
            if esi >= block.sblen {
                trace!("fec block reader: dropping source packet with repair esi");
                return;
            }
            if block.source_slots[esi].is_none() {
                block.source_slots[esi] = Some(packet);
                block.dirty = true;
            }
        }
    }

    fn repair_blocks(&mut self) {
        for index in 0..self.blocks.len() {
            let block = &self.blocks[index];
            if !block.dirty
                || block.unrecoverable
                || !block.has_dimensions()
                || block.received() < block.sblen
            {
                continue;
            }
            if block.source_slots.iter().all(|s| s.is_some()) {
                continue;
            }
            self.try_repair(index);
        }
        for block in &mut self.blocks {
            block.dirty = false;
        }
    }

    fn try_repair(&mut self, index: usize) {
        let block = &self.blocks[index];
        let k = block.sblen;
        let blen = block.blen.max(k + block.repair_slots.len());
        let payload_size = block.payload_size;

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; blen];
        for (i, slot) in block.source_slots.iter().enumerate() {
            if let Some(packet) = slot {
                shards[i] = Some(packet.fec_payload().to_vec());
            }
        }
        for (i, slot) in block.repair_slots.iter().enumerate() {
            if let Some(packet) = slot
                && k + i < blen
            {
                shards[k + i] = Some(packet.fec_payload().to_vec());
            }
        }

        match self.decoder.decode(&mut shards, k, payload_size) {
            Ok(_) => {
                // Emit whatever source packets are now available, even on
                // partial success.
                for esi in 0..k {
                    if self.blocks[index].source_slots[esi].is_none()
                        && let Some(payload) = shards[esi].take()
                        && let Some(packet) = self.restore_packet(index, esi, payload)
                    {
                        self.metrics.recovered_packets += 1;
                        self.blocks[index].source_slots[esi] = Some(packet);
                    }
                }
            }
            Err(err) => {
                debug!("fec block reader: decoder failed: {err}");
                self.blocks[index].unrecoverable = true;
            }
        }
    }

    fn restore_packet(&mut self, index: usize, esi: usize, payload: Vec<u8>) -> Option<Packet> {
        let block = &self.blocks[index];

        let mut packet = Packet::new();
        packet.set_buffer(bytes::BytesMut::from(&payload[..]));
        packet.fec = Some(Fec {
            fec_scheme: self.fec_scheme,
            encoding_symbol_id: esi,
            source_block_number: self.head_sbn.wrapping_add(index as Blknum),
            source_block_length: block.sblen,
            block_length: block.blen,
            payload_id: 0..0,
            payload: 0..payload.len(),
        });

        if let Err(err) = self.media_parser.parse(&mut packet, 0..payload.len()) {
            debug!("fec block reader: can't parse restored packet: {err}");
            return None;
        }
        packet.add_flags(Packet::FLAG_RESTORED | Packet::FLAG_AUDIO);

        if let Some(rtp) = &mut packet.rtp {
            rtp.capture_timestamp = 0;
        }
        let cts = self.interpolate_capture_timestamp(index, packet.stream_timestamp());
        if let Some(rtp) = &mut packet.rtp {
            rtp.capture_timestamp = cts;
        }

        Some(packet)
    }

    /// Linear interpolation of the capture timestamp in stream-timestamp
    /// space, from two received packets of the same block.
    fn interpolate_capture_timestamp(&self, index: usize, ts: StreamTimestamp) -> Nanos {
        let block = &self.blocks[index];

        let mut points: Vec<(StreamTimestamp, Nanos)> = Vec::with_capacity(2);
        for slot in block.source_slots.iter().flatten() {
            if !slot.has_flags(Packet::FLAG_RESTORED) && slot.capture_timestamp() != 0 {
                points.push((slot.stream_timestamp(), slot.capture_timestamp()));
                if points.len() == 2 {
                    break;
                }
            }
        }

        match points.len() {
            2 => {
                let (ts_a, cts_a) = points[0];
                let (ts_b, cts_b) = points[1];
                let span = units::stream_timestamp_diff(ts_b, ts_a);
                if span == 0 {
                    return cts_a;
                }
                let offset = units::stream_timestamp_diff(ts, ts_a);
                cts_a + (cts_b - cts_a) * offset / span
            }
            _ => 0,
        }
    }

    fn emit_next(&mut self) -> Option<Packet> {
        loop {
            let block = self.blocks.front_mut()?;
            if !block.has_dimensions() {
                return None;
            }

            if block.next_emit == block.sblen {
                self.close_front();
                continue;
            }

            let esi = block.next_emit;
            if let Some(packet) = block.source_slots[esi].take() {
                block.next_emit += 1;
                if esi == 0 {
                    self.update_block_duration(packet.stream_timestamp());
                }
                return Some(packet);
            }
            return None;
        }
    }

    fn close_front(&mut self) {
        // All source packets of the block were emitted.
        self.blocks.pop_front();
        self.head_sbn = self.head_sbn.wrapping_add(1);
    }

    fn expire_front(&mut self) {
        let Some(block) = self.blocks.front() else {
            self.head_sbn = self.head_sbn.wrapping_add(1);
            return;
        };

        // Remaining received packets of the expired block are still
        // emitted, in order; the gaps are declared lost.
        let missing = block
            .source_slots
            .iter()
            .skip(block.next_emit)
            .filter(|s| s.is_none())
            .count();
        self.metrics.lost_packets += missing as u64;

        let mut block = self.blocks.pop_front().unwrap();
        for slot in block.source_slots.iter_mut().skip(block.next_emit) {
            if let Some(packet) = slot.take() {
                self.backlog.push_back(packet);
            }
        }
        self.head_sbn = self.head_sbn.wrapping_add(1);
    }

    fn restart(&mut self, sbn: Blknum) {
        while !self.blocks.is_empty() {
            self.expire_front();
        }
        self.blocks.clear();
        self.head_sbn = sbn;
        self.prev_block_timestamp_valid = false;
    }

    fn update_block_duration(&mut self, curr_ts: StreamTimestamp) {
        let mut block_dur = 0;
        if self.prev_block_timestamp_valid {
            block_dur = units::stream_timestamp_diff(curr_ts, self.prev_block_timestamp);
        }

        if block_dur < 0 {
            self.prev_block_timestamp_valid = false;
        } else {
            self.block_max_duration = self.block_max_duration.max(block_dur);
            self.prev_block_timestamp = curr_ts;
            self.prev_block_timestamp_valid = true;
        }
    }
}

impl PacketReader for BlockReader {
    fn read(&mut self) -> Result<Option<Packet>> {
        BlockReader::read(self)
    }
}
