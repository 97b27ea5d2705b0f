use crate::config::ReceiverConfig;
use crate::endpoint::{
    validate_endpoint, validate_endpoint_and_pipeline_consistency,
    validate_endpoint_pair_consistency, Interface, Protocol,
};
use audio::{
    Depacketizer, Frame, FrameReader, JitterMeter, LatencyMetrics, LatencyTuner, Mixer, Resampler,
    SampleSpec, map_channels,
};
use fec::codec::CodecMap;
use fec::{BlockReader, BlockReaderMetrics, FecParser};
use log::{debug, trace, warn};
use packet::io::{PacketReader, Parser};
use packet::units;
use packet::{
    ConcurrentQueue, FecScheme, Packet, PacketFactory, QueueConsumer, QueueProducer, Rtcp,
    SortedQueue,
};
use rtcp::{Communicator, ParticipantController, RecvReport, SendReport};
use rtp::{Encoding, EncodingMap, RtpParser};
use shared::error::{Error, Result};
use shared::time::{Nanos, SECOND};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

const PACKET_BUFFER_SIZE: usize = 2048;

/// Bound of the inbound queues between network threads and the slot.
const QUEUE_BOUND: usize = 4096;

struct SharedQueueReader(Rc<RefCell<SortedQueue>>);

impl PacketReader for SharedQueueReader {
    fn read(&mut self) -> Result<Option<Packet>> {
        Ok(self.0.borrow_mut().pop())
    }
}

struct SharedBlockReader(Rc<RefCell<BlockReader>>);

impl PacketReader for SharedBlockReader {
    fn read(&mut self) -> Result<Option<Packet>> {
        self.0.borrow_mut().read()
    }
}

struct SharedDepacketizer(Rc<RefCell<Depacketizer>>);

impl FrameReader for SharedDepacketizer {
    fn read(&mut self, num_samples: usize) -> Result<Frame> {
        self.0.borrow_mut().read(num_samples)
    }
}

/// Mapping between the sender's stream timestamps and wall clock,
/// learned from its SR reports.
struct SenderMapping {
    report_timestamp: Nanos,
    stream_timestamp: u32,
    clock_offset: Nanos,
}

/// Per-source receiver session: reorder and repair, depacketize,
/// resample, feed the mixer.
struct ReceiverSession {
    source_id: u32,
    encoding: Encoding,
    spec: SampleSpec,

    source_queue: Rc<RefCell<SortedQueue>>,
    repair_queue: Rc<RefCell<SortedQueue>>,
    block_reader: Option<Rc<RefCell<BlockReader>>>,
    depacketizer: Rc<RefCell<Depacketizer>>,
    resampler: Resampler,

    jitter_meter: JitterMeter,
    tuner: LatencyTuner,
    latency_metrics: LatencyMetrics,

    last_packet_time: Nanos,
    prev_arrival: Option<(Nanos, u32)>,
    latest_end_ts: Option<u32>,

    started_seq: bool,
    seq_cycles: u16,
    last_seqnum: u16,
    ext_first_seqnum: u32,
    received_packets: u32,
    prev_report_span: u32,
    prev_report_received: u32,

    mapping: Option<SenderMapping>,
    last_frame_cts: Nanos,

    map_scratch: Vec<f32>,
}

impl ReceiverSession {
    fn new(
        source_id: u32,
        config: &ReceiverConfig,
        encoding: Encoding,
        codec_map: &CodecMap,
    ) -> Result<Self> {
        let spec = SampleSpec::new(encoding.sample_rate, encoding.num_channels);

        let source_queue: Rc<RefCell<SortedQueue>> = Rc::default();
        let repair_queue: Rc<RefCell<SortedQueue>> = Rc::default();

        let mut block_reader = None;
        let packet_reader: Box<dyn PacketReader> = match config.fec_decoder.scheme {
            FecScheme::None => Box::new(SharedQueueReader(source_queue.clone())),
            scheme => {
                let decoder = codec_map.new_decoder(&config.fec_decoder)?;
                let reader = BlockReader::new(
                    config.fec_reader,
                    scheme,
                    decoder,
                    Box::new(SharedQueueReader(source_queue.clone())),
                    Box::new(SharedQueueReader(repair_queue.clone())),
                    Box::new(RtpParser::new(EncodingMap::new())),
                );
                let reader = Rc::new(RefCell::new(reader));
                block_reader = Some(reader.clone());
                Box::new(SharedBlockReader(reader))
            }
        };

        let depacketizer = Rc::new(RefCell::new(Depacketizer::new(packet_reader, encoding)));
        let resampler = Resampler::new(
            Box::new(SharedDepacketizer(depacketizer.clone())),
            spec,
        );

        Ok(Self {
            source_id,
            encoding,
            spec,
            source_queue,
            repair_queue,
            block_reader,
            depacketizer,
            resampler,
            jitter_meter: JitterMeter::new(config.jitter_meter),
            tuner: LatencyTuner::new(config.latency, spec),
            latency_metrics: LatencyMetrics::default(),
            last_packet_time: 0,
            prev_arrival: None,
            latest_end_ts: None,
            started_seq: false,
            seq_cycles: 0,
            last_seqnum: 0,
            ext_first_seqnum: 0,
            received_packets: 0,
            prev_report_span: 0,
            prev_report_received: 0,
            mapping: None,
            last_frame_cts: 0,
            map_scratch: Vec::new(),
        })
    }

    fn route_packet(&mut self, mut packet: Packet, now: Nanos, repair: bool) {
        self.last_packet_time = now;

        if repair {
            let _ = packet::io::PacketWriter::write(&mut *self.repair_queue.borrow_mut(), packet);
            return;
        }

        let Some(rtp) = packet.rtp.clone() else {
            trace!("receiver session: dropping source packet without rtp");
            return;
        };

        let arrival = if packet.receive_timestamp() != 0 {
            packet.receive_timestamp()
        } else {
            now
        };

        // Inter-arrival jitter: |actual spacing - nominal spacing|.
        if let Some((prev_arrival, prev_ts)) = self.prev_arrival {
            let expected = self
                .spec
                .stream_timestamp_to_ns(units::stream_timestamp_diff(
                    rtp.stream_timestamp,
                    prev_ts,
                ));
            if expected >= 0 {
                let actual = arrival - prev_arrival;
                self.jitter_meter.update_jitter((actual - expected).abs());
            }
        }
        self.prev_arrival = Some((arrival, rtp.stream_timestamp));

        // Extended seqnum bookkeeping.
        if !self.started_seq {
            self.started_seq = true;
            self.last_seqnum = rtp.seqnum;
            self.ext_first_seqnum = rtp.seqnum as u32;
        } else {
            let diff = rtp.seqnum.wrapping_sub(self.last_seqnum);
            if diff > 0 && diff < 0x8000 {
                if rtp.seqnum < self.last_seqnum {
                    self.seq_cycles = self.seq_cycles.wrapping_add(1);
                }
                self.last_seqnum = rtp.seqnum;
            }
        }
        self.received_packets += 1;

        // Reconstruct the sender-side capture timestamp from the
        // SR-provided clock mapping.
        if rtp.capture_timestamp == 0
            && let Some(mapping) = &self.mapping
        {
            let delta =
                units::stream_timestamp_diff(rtp.stream_timestamp, mapping.stream_timestamp);
            let sender_cts = mapping.report_timestamp + self.spec.stream_timestamp_to_ns(delta);
            packet.rtp.as_mut().unwrap().capture_timestamp = sender_cts - mapping.clock_offset;
        }

        let end_ts = rtp.stream_timestamp.wrapping_add(rtp.duration);
        match self.latest_end_ts {
            Some(latest) if !units::stream_timestamp_lt(latest, end_ts) => {}
            _ => self.latest_end_ts = Some(end_ts),
        }

        let _ = packet::io::PacketWriter::write(&mut *self.source_queue.borrow_mut(), packet);
    }

    /// Update latency metrics and drive the tuner; returns false when
    /// the session left the tolerated latency range.
    fn refresh(&mut self, now: Nanos) -> bool {
        let niq_latency = match (self.latest_end_ts, self.depacketizer.borrow().next_timestamp())
        {
            (Some(end), Some(next)) => self
                .spec
                .stream_timestamp_to_ns(units::stream_timestamp_diff(end, next))
                .max(0),
            _ => 0,
        };
        let niq_stalling = if self.last_packet_time != 0 {
            now - self.last_packet_time
        } else {
            0
        };
        let e2e_latency = if self.last_frame_cts > 0 {
            (now - self.last_frame_cts).max(0)
        } else {
            0
        };
        let fec_block_duration = self
            .block_reader
            .as_ref()
            .map(|reader| {
                self.spec
                    .stream_timestamp_to_ns(reader.borrow().max_block_duration() as i64)
            })
            .unwrap_or(0);

        self.latency_metrics = LatencyMetrics {
            niq_latency,
            niq_stalling,
            e2e_latency,
            fec_block_duration,
        };

        let update = self
            .tuner
            .update(now, &self.latency_metrics, &self.jitter_meter.metrics());
        if let Some(scaling) = update.scaling {
            self.resampler.set_scaling(scaling as f64);
        }
        update.alive
    }

    fn read(&mut self, num_samples: usize, out_channels: usize) -> Result<Frame> {
        let enc_channels = self.encoding.num_channels;
        let inner_samples = num_samples / out_channels * enc_channels;

        let frame = self.resampler.read(inner_samples)?;
        if frame.capture_timestamp != 0 {
            self.last_frame_cts = frame.capture_timestamp;
        }

        if enc_channels == out_channels {
            return Ok(frame);
        }

        map_channels(
            &frame.samples,
            enc_channels,
            out_channels,
            &mut self.map_scratch,
        );
        Ok(Frame {
            samples: std::mem::take(&mut self.map_scratch),
            flags: frame.flags,
            duration: frame.duration,
            capture_timestamp: frame.capture_timestamp,
        })
    }

    fn ext_last_seqnum(&self) -> u32 {
        ((self.seq_cycles as u32) << 16) | self.last_seqnum as u32
    }

    fn build_recv_report(&mut self, receiver_ssrc: u32, cname: &str, now: Nanos) -> RecvReport {
        let span = self
            .ext_last_seqnum()
            .wrapping_sub(self.ext_first_seqnum)
            .wrapping_add(1);
        let cum_loss = span.saturating_sub(self.received_packets) as i32;

        let d_span = span.wrapping_sub(self.prev_report_span);
        let d_received = self.received_packets.wrapping_sub(self.prev_report_received);
        let fraction_loss = if d_span > 0 {
            (d_span.saturating_sub(d_received)) as f32 / d_span as f32
        } else {
            0.0
        };
        self.prev_report_span = span;
        self.prev_report_received = self.received_packets;

        RecvReport {
            receiver_ssrc,
            sender_ssrc: self.source_id,
            cname: cname.to_string(),
            report_timestamp: now,
            sample_rate: self.encoding.sample_rate,
            ext_first_seqnum: self.ext_first_seqnum,
            ext_last_seqnum: self.ext_last_seqnum(),
            cum_loss,
            fraction_loss,
            jitter: self.jitter_meter.metrics().mean_jitter,
            niq_latency: self.latency_metrics.niq_latency,
            niq_stalling: self.latency_metrics.niq_stalling,
            e2e_latency: self.latency_metrics.e2e_latency,
            ..Default::default()
        }
    }

    fn set_sender_mapping(&mut self, report: &SendReport) {
        self.mapping = Some(SenderMapping {
            report_timestamp: report.report_timestamp,
            stream_timestamp: report.stream_timestamp,
            clock_offset: report.clock_offset,
        });
    }

    fn fec_metrics(&self) -> Option<BlockReaderMetrics> {
        self.block_reader.as_ref().map(|r| r.borrow().metrics())
    }
}

enum ParticipantEvent {
    Halt(u32),
    SenderReport(u32, SendReport),
}

struct ReceiverParticipant {
    cname: String,
    source_id: u32,
    reports: Vec<RecvReport>,
    events: Vec<ParticipantEvent>,
}

impl ParticipantController for ReceiverParticipant {
    fn cname(&self) -> String {
        self.cname.clone()
    }

    fn source_id(&self) -> u32 {
        self.source_id
    }

    fn change_source_id(&mut self) -> u32 {
        self.source_id = rand::random::<u32>();
        self.source_id
    }

    fn query_recv_reports(&self, _now: Nanos) -> Vec<RecvReport> {
        self.reports.clone()
    }

    fn notify_recv_stream(&mut self, send_ssrc: u32, report: &SendReport) {
        self.events
            .push(ParticipantEvent::SenderReport(send_ssrc, report.clone()));
    }

    fn halt_recv_stream(&mut self, send_ssrc: u32) {
        self.events.push(ParticipantEvent::Halt(send_ssrc));
    }
}

/// Receiver-side metrics snapshot.
#[derive(Debug, Clone, Default)]
pub struct ReceiverSlotMetrics {
    pub num_sessions: usize,
    pub recovered_packets: u64,
    pub lost_packets: u64,
    pub late_packets: u64,
    /// Sessions terminated by BYE, timeout, or collision, in order.
    pub halted_sources: Vec<u32>,
}

/// Receiver slot: per-endpooint inbound queues, a demultiplexer that
/// spawns per-source sessions on demand, and a mixer that sums session
/// outputs into the frames handed to the caller.
pub struct ReceiverSlot {
    config: ReceiverConfig,
    encoding: Encoding,
    factory: PacketFactory,
    codec_map: CodecMap,

    source_proto: Option<Protocol>,
    repair_proto: Option<Protocol>,
    source_rx: Option<QueueConsumer>,
    repair_rx: Option<QueueConsumer>,
    control_rx: Option<QueueConsumer>,
    source_parser: Option<Box<dyn Parser>>,
    repair_parser: Option<Box<dyn Parser>>,

    sessions: HashMap<u32, ReceiverSession>,
    communicator: Option<Communicator>,
    participant: ReceiverParticipant,

    halted_sources: Vec<u32>,
}

impl ReceiverSlot {
    pub fn new(
        mut config: ReceiverConfig,
        codec_map: &CodecMap,
        encoding_map: &EncodingMap,
    ) -> Result<Self> {
        config.deduce_defaults();

        let encoding = encoding_map.find_by_pt(config.payload_type)?;

        let participant = ReceiverParticipant {
            cname: config.cname.clone(),
            source_id: rand::random::<u32>(),
            reports: Vec::new(),
            events: Vec::new(),
        };

        Ok(Self {
            config,
            encoding,
            factory: PacketFactory::new(PACKET_BUFFER_SIZE),
            codec_map: *codec_map,
            source_proto: None,
            repair_proto: None,
            source_rx: None,
            repair_rx: None,
            control_rx: None,
            source_parser: None,
            repair_parser: None,
            sessions: HashMap::new(),
            communicator: None,
            participant,
            halted_sources: Vec::new(),
        })
    }

    pub fn source_id(&self) -> u32 {
        self.participant.source_id
    }

    /// Attach an inbound endpoint; the caller pushes received packets
    /// into the returned producer from its network threads.
    pub fn add_endpoint(&mut self, iface: Interface, proto: Protocol) -> Result<QueueProducer> {
        validate_endpoint(iface, proto, &self.codec_map)?;
        validate_endpoint_and_pipeline_consistency(self.config.fec_decoder.scheme, iface, proto)?;

        debug!("receiver slot: adding {iface} endpoint, protocol {proto}");

        let scheme = self.config.fec_decoder.scheme;
        let (producer, consumer) = ConcurrentQueue::new(QUEUE_BOUND);

        match iface {
            Interface::AudioSource => {
                if self.source_rx.is_some() {
                    return Err(Error::EndpointExists);
                }
                if self.repair_proto.is_some() {
                    validate_endpoint_pair_consistency(Some(proto), self.repair_proto)?;
                }
                self.source_proto = Some(proto);
                self.source_rx = Some(consumer);
                self.source_parser = Some(match scheme {
                    FecScheme::None => Box::new(RtpParser::new(EncodingMap::new())),
                    scheme => Box::new(FecParser::source(
                        scheme,
                        Box::new(RtpParser::new(EncodingMap::new())),
                    )),
                });
            }
            Interface::AudioRepair => {
                if self.repair_rx.is_some() {
                    return Err(Error::EndpointExists);
                }
                if self.source_proto.is_some() {
                    validate_endpoint_pair_consistency(self.source_proto, Some(proto))?;
                }
                self.repair_proto = Some(proto);
                self.repair_rx = Some(consumer);
                self.repair_parser = Some(Box::new(FecParser::repair(scheme)));
            }
            Interface::AudioControl => {
                if self.control_rx.is_some() {
                    return Err(Error::EndpointExists);
                }
                self.control_rx = Some(consumer);
                self.communicator = Some(Communicator::new(
                    self.config.rtcp,
                    Box::new(NullControlWriter),
                    self.factory.clone(),
                ));
            }
        }

        Ok(producer)
    }

    /// Attach the control endpoint with an outbound writer for the
    /// reports this receiver generates.
    pub fn add_control_endpoint(
        &mut self,
        outbound_writer: Box<dyn packet::io::PacketWriter>,
    ) -> Result<QueueProducer> {
        if self.control_rx.is_some() {
            return Err(Error::EndpointExists);
        }
        let (producer, consumer) = ConcurrentQueue::new(QUEUE_BOUND);
        self.control_rx = Some(consumer);
        self.communicator = Some(Communicator::new(
            self.config.rtcp,
            outbound_writer,
            self.factory.clone(),
        ));
        Ok(producer)
    }

    /// Drain inbound queues, refresh sessions, and generate due control
    /// packets. Returns the next deadline.
    pub fn refresh(&mut self, now: Nanos) -> Result<Nanos> {
        self.drain_control(now)?;
        self.drain_media(now)?;
        self.refresh_sessions(now);
        self.generate_control(now)
    }

    fn drain_control(&mut self, now: Nanos) -> Result<()> {
        let Some(rx) = &mut self.control_rx else {
            return Ok(());
        };
        while let Some(mut pkt) = rx.read()? {
            if pkt.rtcp.is_none() {
                let len = pkt.buffer().len();
                pkt.rtcp = Some(Rtcp { payload: 0..len });
            }
            if let Some(communicator) = &mut self.communicator
                && let Err(err) = communicator.process_packet(&mut self.participant, &pkt, now)
            {
                trace!("receiver slot: dropping control packet: {err}");
            }
        }
        self.apply_events();
        Ok(())
    }

    fn drain_media(&mut self, now: Nanos) -> Result<()> {
        if let Some(rx) = &mut self.source_rx {
            while let Some(mut pkt) = rx.read()? {
                if pkt.rtp.is_none() {
                    let len = pkt.buffer().len();
                    let parser = self.source_parser.as_ref().unwrap();
                    if let Err(err) = parser.parse(&mut pkt, 0..len) {
                        trace!("receiver slot: dropping source packet: {err}");
                        continue;
                    }
                }
                let ssrc = pkt.source_id();
                if !self.sessions.contains_key(&ssrc) {
                    debug!("receiver slot: creating session: ssrc={ssrc}");
                    let session =
                        ReceiverSession::new(ssrc, &self.config, self.encoding, &self.codec_map)?;
                    self.sessions.insert(ssrc, session);
                }
                self.sessions
                    .get_mut(&ssrc)
                    .unwrap()
                    .route_packet(pkt, now, false);
            }
        }

        if let Some(rx) = &mut self.repair_rx {
            while let Some(mut pkt) = rx.read()? {
                if pkt.fec.is_none() {
                    let len = pkt.buffer().len();
                    let parser = self.repair_parser.as_ref().unwrap();
                    if let Err(err) = parser.parse(&mut pkt, 0..len) {
                        trace!("receiver slot: dropping repair packet: {err}");
                        continue;
                    }
                }
                // Repair packets carry no SSRC; they can only be routed
                // when the slot serves a single session.
                if self.sessions.len() == 1 {
                    let session = self.sessions.values_mut().next().unwrap();
                    session.route_packet(pkt, now, true);
                } else {
                    trace!("receiver slot: dropping repair packet: ambiguous session");
                }
            }
        }

        Ok(())
    }

    fn refresh_sessions(&mut self, now: Nanos) {
        let timeout = self.config.session_timeout;
        let mut dead = Vec::new();
        for (&ssrc, session) in self.sessions.iter_mut() {
            let alive = session.refresh(now);
            let idle =
                session.last_packet_time != 0 && now - session.last_packet_time > timeout;
            if !alive {
                warn!("receiver slot: terminating session, latency out of bounds: ssrc={ssrc}");
                dead.push(ssrc);
            } else if idle {
                debug!("receiver slot: terminating idle session: ssrc={ssrc}");
                dead.push(ssrc);
            }
        }
        for ssrc in dead {
            self.sessions.remove(&ssrc);
        }
    }

    fn generate_control(&mut self, now: Nanos) -> Result<Nanos> {
        if self.communicator.is_none() {
            return Ok(now + SECOND);
        }

        if self
            .communicator
            .as_mut()
            .unwrap()
            .generation_deadline(now)
            <= now
        {
            let receiver_ssrc = self.participant.source_id;
            let cname = self.participant.cname.clone();
            self.participant.reports = self
                .sessions
                .iter_mut()
                .map(|(_, s)| s.build_recv_report(receiver_ssrc, &cname, now))
                .collect();

            self.communicator
                .as_mut()
                .unwrap()
                .generate_reports(&mut self.participant, now)?;
            self.apply_events();
        }

        Ok(self
            .communicator
            .as_mut()
            .unwrap()
            .generation_deadline(now))
    }

    fn apply_events(&mut self) {
        for event in self.participant.events.drain(..) {
            match event {
                ParticipantEvent::Halt(ssrc) => {
                    debug!("receiver slot: halting session: ssrc={ssrc}");
                    self.sessions.remove(&ssrc);
                    self.halted_sources.push(ssrc);
                }
                ParticipantEvent::SenderReport(ssrc, report) => {
                    if let Some(session) = self.sessions.get_mut(&ssrc) {
                        session.set_sender_mapping(&report);
                    }
                }
            }
        }
    }

    /// Read one frame of mixed audio in the output sample spec.
    pub fn read_frame(&mut self, num_samples: usize) -> Result<Frame> {
        let out_channels = self.config.output_sample_spec.num_channels;
        let mut out = Frame::new(num_samples, out_channels);

        for session in self.sessions.values_mut() {
            let frame = session.read(num_samples, out_channels)?;
            Mixer::mix_into(&mut out, &frame);
        }
        Ok(out)
    }

    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn metrics(&self) -> ReceiverSlotMetrics {
        let mut metrics = ReceiverSlotMetrics {
            num_sessions: self.sessions.len(),
            halted_sources: self.halted_sources.clone(),
            ..Default::default()
        };
        for session in self.sessions.values() {
            if let Some(fec) = session.fec_metrics() {
                metrics.recovered_packets += fec.recovered_packets;
                metrics.lost_packets += fec.lost_packets;
                metrics.late_packets += fec.late_packets;
            }
        }
        metrics
    }
}

/// Placeholder sink for receivers whose control endpoint was attached
/// without an outbound writer.
struct NullControlWriter;

impl packet::io::PacketWriter for NullControlWriter {
    fn write(&mut self, _packet: Packet) -> Result<()> {
        Ok(())
    }
}
