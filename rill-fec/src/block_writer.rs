use crate::codec::BlockEncoder;
use crate::composer::payload_id_len;
use log::{debug, error, trace};
use packet::io::{Composer, PacketWriter};
use packet::units::{self, Blknum, StreamTimestamp};
use packet::{FecScheme, Packet, PacketFactory};
use shared::error::{Error, Result};

/// FEC block writer parameters.
#[derive(Debug, Clone, Copy)]
pub struct BlockWriterConfig {
    /// Number of source packets per block (k).
    pub n_source_packets: usize,
    /// Number of repair packets per block (r).
    pub n_repair_packets: usize,
}

impl Default for BlockWriterConfig {
    fn default() -> Self {
        Self {
            n_source_packets: 18,
            n_repair_packets: 10,
        }
    }
}

/// Groups source packets into blocks of k, generates r repair packets per
/// block with the block encoder, and forwards all k+r packets downstream,
/// source first, repair after.
pub struct BlockWriter {
    cur_sblen: usize,
    next_sblen: usize,
    cur_rblen: usize,
    next_rblen: usize,
    cur_payload_size: usize,

    encoder: Box<dyn BlockEncoder>,
    writer: Box<dyn PacketWriter>,
    source_composer: Box<dyn Composer>,
    repair_composer: Box<dyn Composer>,
    factory: PacketFactory,

    // Source payloads of the current block, snapshotted as packets pass
    // through, so the encoder can read them after the packets are gone.
    source_payloads: Vec<Vec<u8>>,

    first_packet: bool,
    cur_packet: usize,
    cur_sbn: Blknum,

    fec_scheme: FecScheme,

    prev_block_timestamp_valid: bool,
    prev_block_timestamp: StreamTimestamp,
    block_max_duration: i64,
}

impl BlockWriter {
    pub fn new(
        config: BlockWriterConfig,
        fec_scheme: FecScheme,
        encoder: Box<dyn BlockEncoder>,
        writer: Box<dyn PacketWriter>,
        source_composer: Box<dyn Composer>,
        repair_composer: Box<dyn Composer>,
        factory: PacketFactory,
    ) -> Result<Self> {
        let mut block_writer = Self {
            cur_sblen: 0,
            next_sblen: 0,
            cur_rblen: 0,
            next_rblen: 0,
            cur_payload_size: 0,
            encoder,
            writer,
            source_composer,
            repair_composer,
            factory,
            source_payloads: Vec::new(),
            first_packet: true,
            cur_packet: 0,
            // Seed from an unpredictable source to reduce cross-stream
            // collision probability.
            cur_sbn: rand::random::<Blknum>(),
            fec_scheme,
            prev_block_timestamp_valid: false,
            prev_block_timestamp: 0,
            block_max_duration: 0,
        };

        block_writer.resize(config.n_source_packets, config.n_repair_packets)?;

        Ok(block_writer)
    }

    /// Maximum observed stream-timestamp distance between the first
    /// packets of consecutive blocks, since the last resize.
    pub fn max_block_duration(&self) -> StreamTimestamp {
        self.block_max_duration as StreamTimestamp
    }

    /// Request new block dimensions for subsequent blocks. A pending
    /// block is finished with the old dimensions.
    pub fn resize(&mut self, sblen: usize, rblen: usize) -> Result<()> {
        if self.next_sblen == sblen && self.next_rblen == rblen {
            return Ok(());
        }

        if sblen == 0 {
            error!("fec block writer: resize: sblen can't be zero");
            return Err(Error::BadConfig("fec block writer: zero sblen"));
        }

        if sblen + rblen > self.encoder.max_block_length() {
            debug!(
                "fec block writer: can't update block length, maximum value exceeded:\
                 cur_sbl={} cur_rbl={} new_sbl={} new_rbl={} max_blen={}",
                self.cur_sblen,
                self.cur_rblen,
                sblen,
                rblen,
                self.encoder.max_block_length()
            );
            return Err(Error::BadConfig("fec block writer: block too large"));
        }

        debug!(
            "fec block writer: update block size: cur_sbl={} cur_rbl={} new_sbl={} new_rbl={}",
            self.cur_sblen, self.cur_rblen, sblen, rblen
        );

        self.next_sblen = sblen;
        self.next_rblen = rblen;

        // max_block_duration() reports the maximum since last resize.
        self.prev_block_timestamp_valid = false;
        self.block_max_duration = 0;

        Ok(())
    }

    /// Accept the next source packet; on the k-th packet, generate and
    /// forward the repair packets of the completed block.
    pub fn write(&mut self, packet: Packet) -> Result<()> {
        self.validate_packet(&packet);

        if self.first_packet {
            self.first_packet = false;
        }

        if self.cur_packet == 0 {
            self.begin_block(&packet);
        }

        self.write_source_packet(packet)?;

        self.cur_packet += 1;

        if self.cur_packet == self.cur_sblen {
            let result = self.end_block();
            // Encoder or allocation failure aborts the repair packets of
            // this block only; source packets are already written.
            self.next_block();
            result?;
        }

        Ok(())
    }

    fn begin_block(&mut self, packet: &Packet) {
        self.update_block_duration(packet);

        self.cur_sblen = self.next_sblen;
        self.cur_rblen = self.next_rblen;
        self.cur_payload_size = packet.fec.as_ref().unwrap().payload.len();

        self.source_payloads.clear();

        trace!(
            "fec block writer: begin block: sbn={} sblen={} rblen={} payload_size={}",
            self.cur_sbn, self.cur_sblen, self.cur_rblen, self.cur_payload_size
        );
    }

    fn end_block(&mut self) -> Result<()> {
        let mut repair_packets = self.make_repair_packets()?;
        self.encode_repair_packets(&mut repair_packets)?;
        self.compose_repair_packets(&mut repair_packets)?;
        self.write_repair_packets(repair_packets)?;
        Ok(())
    }

    fn next_block(&mut self) {
        self.cur_sbn = self.cur_sbn.wrapping_add(1);
        self.cur_packet = 0;
    }

    fn write_source_packet(&mut self, mut packet: Packet) -> Result<()> {
        self.source_payloads.push(packet.fec_payload().to_vec());

        self.fill_packet_fec_fields(&mut packet, self.cur_packet);

        self.source_composer.compose(&mut packet)?;
        packet.add_flags(Packet::FLAG_COMPOSED);

        self.writer.write(packet)
    }

    fn make_repair_packets(&mut self) -> Result<Vec<Packet>> {
        let mut repair_packets = Vec::with_capacity(self.cur_rblen);
        for i in 0..self.cur_rblen {
            repair_packets.push(self.make_repair_packet(i)?);
        }
        Ok(repair_packets)
    }

    fn make_repair_packet(&mut self, pack_n: usize) -> Result<Packet> {
        let id_len = payload_id_len(self.fec_scheme);
        let Some(buffer) = self
            .factory
            .new_packet_buffer(id_len + self.cur_payload_size)
        else {
            error!("fec block writer: can't allocate buffer");
            return Err(Error::NoMem);
        };

        let mut packet = self.factory.new_packet();
        self.repair_composer
            .prepare(&mut packet, buffer, self.cur_payload_size)?;
        packet.add_flags(Packet::FLAG_PREPARED | Packet::FLAG_REPAIR);

        self.validate_packet(&packet);
        self.fill_packet_fec_fields(&mut packet, self.cur_sblen + pack_n);

        Ok(packet)
    }

    fn encode_repair_packets(&mut self, repair_packets: &mut [Packet]) -> Result<()> {
        let mut repair_payloads = vec![vec![0u8; self.cur_payload_size]; self.cur_rblen];

        self.encoder
            .encode(&self.source_payloads, &mut repair_payloads)?;

        for (packet, payload) in repair_packets.iter_mut().zip(repair_payloads) {
            let range = packet.fec.as_ref().unwrap().payload.clone();
            packet.buffer_mut()[range].copy_from_slice(&payload);
        }
        Ok(())
    }

    fn compose_repair_packets(&mut self, repair_packets: &mut [Packet]) -> Result<()> {
        for packet in repair_packets.iter_mut() {
            self.repair_composer.compose(packet)?;
            packet.add_flags(Packet::FLAG_COMPOSED);
        }
        Ok(())
    }

    fn write_repair_packets(&mut self, repair_packets: Vec<Packet>) -> Result<()> {
        for packet in repair_packets {
            self.writer.write(packet)?;
        }
        Ok(())
    }

    fn fill_packet_fec_fields(&self, packet: &mut Packet, pack_n: usize) {
        let fec = packet.fec.as_mut().unwrap();
        fec.encoding_symbol_id = pack_n;
        fec.source_block_number = self.cur_sbn;
        fec.source_block_length = self.cur_sblen;
        fec.block_length = self.cur_sblen + self.cur_rblen;
    }

    fn validate_packet(&self, packet: &Packet) {
        if !packet.has_flags(Packet::FLAG_PREPARED) {
            panic!("fec block writer: unexpected packet: must be prepared");
        }

        if packet.has_flags(Packet::FLAG_COMPOSED) {
            panic!("fec block writer: unexpected packet: must not be composed");
        }

        let Some(fec) = &packet.fec else {
            panic!("fec block writer: unexpected non-fec packet");
        };

        if fec.fec_scheme != self.fec_scheme {
            panic!(
                "fec block writer: unexpected packet fec scheme: packet_scheme={} session_scheme={}",
                fec.fec_scheme, self.fec_scheme
            );
        }

        let payload_size = fec.payload.len();

        if payload_size == 0 {
            panic!("fec block writer: unexpected packet with zero payload size");
        }

        if self.cur_packet != 0 && payload_size != self.cur_payload_size {
            panic!(
                "fec block writer: unexpected payload size change in the middle of a block:\
                 sbn={} esi={} old_size={} new_size={}",
                self.cur_sbn, self.cur_packet, self.cur_payload_size, payload_size
            );
        }
    }

    fn update_block_duration(&mut self, first_block_packet: &Packet) {
        let mut block_dur = 0;
        if self.prev_block_timestamp_valid {
            block_dur = units::stream_timestamp_diff(
                first_block_packet.stream_timestamp(),
                self.prev_block_timestamp,
            );
        }

        if block_dur < 0 {
            trace!(
                "fec block writer: negative block duration: prev_ts={} curr_ts={}",
                self.prev_block_timestamp,
                first_block_packet.stream_timestamp()
            );
            self.prev_block_timestamp_valid = false;
        } else {
            self.block_max_duration = self.block_max_duration.max(block_dur);
            self.prev_block_timestamp = first_block_packet.stream_timestamp();
            self.prev_block_timestamp_valid = true;
        }
    }
}

impl PacketWriter for BlockWriter {
    fn write(&mut self, packet: Packet) -> Result<()> {
        BlockWriter::write(self, packet)
    }
}
