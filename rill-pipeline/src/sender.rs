use crate::config::SenderConfig;
use crate::endpoint::{
    validate_endpoint, validate_endpoint_and_pipeline_consistency,
    validate_endpoint_pair_consistency, Interface, Protocol,
};
use audio::{map_channels, Frame, FrameWriter, Packetizer};
use fec::codec::CodecMap;
use fec::{BlockWriter, FecComposer};
use log::debug;
use packet::io::{Composer, ComposingWriter, PacketWriter};
use packet::{FecScheme, Interleaver, Packet, PacketFactory, Router};
use rtcp::{Communicator, ParticipantController, RecvReport, SendReport};
use rtp::{Encoding, EncodingMap, RtpComposer};
use shared::error::{Error, Result};
use shared::time::{Nanos, SECOND};

const PACKET_BUFFER_SIZE: usize = 2048;

/// Interleaver delay line, in packets.
const INTERLEAVER_BLOCK: usize = 10;

/// Sender-side metrics snapshot.
#[derive(Debug, Clone, Default)]
pub struct SenderSlotMetrics {
    pub source_id: u32,
    pub packet_count: u32,
    pub byte_count: u32,
    /// Most recent report from each remote receiver.
    pub remote_reports: Vec<RecvReport>,
}

struct SenderParticipant {
    cname: String,
    source_id: u32,
    sample_rate: u32,

    // Snapshot of the packetizer state, refreshed before generation.
    stream_timestamp: u32,
    packet_count: u32,
    byte_count: u32,

    ssrc_change: Option<u32>,
    remote_reports: Vec<RecvReport>,
}

impl ParticipantController for SenderParticipant {
    fn cname(&self) -> String {
        self.cname.clone()
    }

    fn source_id(&self) -> u32 {
        self.source_id
    }

    fn change_source_id(&mut self) -> u32 {
        let new = rand::random::<u32>();
        self.source_id = new;
        self.ssrc_change = Some(new);
        new
    }

    fn has_send_stream(&self) -> bool {
        true
    }

    fn query_send_report(&self, now: Nanos) -> SendReport {
        SendReport {
            ssrc: self.source_id,
            cname: self.cname.clone(),
            report_timestamp: now,
            stream_timestamp: self.stream_timestamp,
            sample_rate: self.sample_rate,
            packet_count: self.packet_count,
            byte_count: self.byte_count,
            ..Default::default()
        }
    }

    fn notify_send_stream(&mut self, recv_ssrc: u32, report: &RecvReport) {
        self.remote_reports
            .retain(|r| r.receiver_ssrc != recv_ssrc);
        self.remote_reports.push(report.clone());
    }
}

/// One logical sender stream: audio frames in, source/repair/control
/// packets out through per-endpoint writers.
///
/// The transport pipeline (packetizer, optional FEC writer, optional
/// interleaver, router) is assembled once the endpoint set is complete:
/// a source endpoint, plus a repair endpoint when FEC is enabled.
pub struct SenderSlot {
    config: SenderConfig,
    encoding: Encoding,
    factory: PacketFactory,
    codec_map: CodecMap,

    source_proto: Option<Protocol>,
    repair_proto: Option<Protocol>,
    source_writer: Option<Box<dyn PacketWriter>>,
    repair_writer: Option<Box<dyn PacketWriter>>,

    packetizer: Option<Packetizer>,
    communicator: Option<Communicator>,
    participant: SenderParticipant,

    map_scratch: Vec<f32>,
}

impl SenderSlot {
    pub fn new(
        mut config: SenderConfig,
        codec_map: &CodecMap,
        encoding_map: &EncodingMap,
    ) -> Result<Self> {
        config.deduce_defaults();

        let encoding = encoding_map.find_by_pt(config.payload_type)?;

        let participant = SenderParticipant {
            cname: config.cname.clone(),
            source_id: rand::random::<u32>(),
            sample_rate: encoding.sample_rate,
            stream_timestamp: 0,
            packet_count: 0,
            byte_count: 0,
            ssrc_change: None,
            remote_reports: Vec::new(),
        };

        Ok(Self {
            config,
            encoding,
            factory: PacketFactory::new(PACKET_BUFFER_SIZE),
            codec_map: *codec_map,
            source_proto: None,
            repair_proto: None,
            source_writer: None,
            repair_writer: None,
            packetizer: None,
            communicator: None,
            participant,
            map_scratch: Vec::new(),
        })
    }

    pub fn source_id(&self) -> u32 {
        self.participant.source_id
    }

    /// Override the SSRC instead of using the generated one. Useful for
    /// session migration and for exercising collision handling.
    pub fn force_source_id(&mut self, source_id: u32) {
        self.participant.source_id = source_id;
        if let Some(packetizer) = &mut self.packetizer {
            packetizer.set_source_id(source_id);
        }
    }

    /// True once the media pipeline is assembled and frames can flow.
    pub fn is_ready(&self) -> bool {
        self.packetizer.is_some()
    }

    /// Attach an endpoint; packets for it are pushed into
    /// `outbound_writer`.
    pub fn add_endpoint(
        &mut self,
        iface: Interface,
        proto: Protocol,
        outbound_writer: Box<dyn PacketWriter>,
    ) -> Result<()> {
        validate_endpoint(iface, proto, &self.codec_map)?;
        validate_endpoint_and_pipeline_consistency(self.config.fec_encoder.scheme, iface, proto)?;

        debug!("sender slot: adding {iface} endpoint, protocol {proto}");

        match iface {
            Interface::AudioSource => {
                if self.source_writer.is_some() || self.packetizer.is_some() {
                    return Err(Error::EndpointExists);
                }
                if self.repair_proto.is_some() {
                    validate_endpoint_pair_consistency(Some(proto), self.repair_proto)?;
                }
                self.source_proto = Some(proto);
                self.source_writer = Some(outbound_writer);
            }
            Interface::AudioRepair => {
                if self.repair_writer.is_some() {
                    return Err(Error::EndpointExists);
                }
                if self.source_proto.is_some() {
                    validate_endpoint_pair_consistency(self.source_proto, Some(proto))?;
                }
                self.repair_proto = Some(proto);
                self.repair_writer = Some(outbound_writer);
            }
            Interface::AudioControl => {
                if self.communicator.is_some() {
                    return Err(Error::EndpointExists);
                }
                self.communicator = Some(Communicator::new(
                    self.config.rtcp,
                    outbound_writer,
                    self.factory.clone(),
                ));
            }
        }

        let media_complete = self.source_writer.is_some()
            && (self.config.fec_encoder.scheme == FecScheme::None || self.repair_writer.is_some());
        if media_complete && self.packetizer.is_none() {
            self.build_pipeline()?;
        }

        Ok(())
    }

    fn build_pipeline(&mut self) -> Result<()> {
        let scheme = self.config.fec_encoder.scheme;

        let mut router = Router::new();
        router.add_route(Packet::FLAG_AUDIO, self.source_writer.take().unwrap());
        if scheme != FecScheme::None {
            router.add_route(Packet::FLAG_REPAIR, self.repair_writer.take().unwrap());
        }

        let downstream: Box<dyn PacketWriter> = if self.config.enable_interleaving {
            Box::new(Interleaver::new(Box::new(router), INTERLEAVER_BLOCK))
        } else {
            Box::new(router)
        };

        let (writer, composer): (Box<dyn PacketWriter>, Box<dyn Composer>) = match scheme {
            FecScheme::None => (
                Box::new(ComposingWriter::new(
                    Box::new(RtpComposer::new()),
                    downstream,
                )),
                Box::new(RtpComposer::new()),
            ),
            scheme => {
                let encoder = self.codec_map.new_encoder(&self.config.fec_encoder)?;
                let block_writer = BlockWriter::new(
                    self.config.fec_writer,
                    scheme,
                    encoder,
                    downstream,
                    Box::new(FecComposer::source(scheme, Box::new(RtpComposer::new()))),
                    Box::new(FecComposer::repair(scheme)),
                    self.factory.clone(),
                )?;
                (
                    Box::new(block_writer),
                    Box::new(FecComposer::source(scheme, Box::new(RtpComposer::new()))),
                )
            }
        };

        let mut packetizer = Packetizer::new(
            writer,
            composer,
            self.factory.clone(),
            self.encoding,
            self.config.packet_length,
        )?;
        packetizer.set_source_id(self.participant.source_id);
        self.packetizer = Some(packetizer);

        debug!(
            "sender slot: pipeline ready: ssrc={} scheme={scheme}",
            self.participant.source_id
        );
        Ok(())
    }

    /// Write one frame of audio in the input sample spec.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let Some(packetizer) = &mut self.packetizer else {
            return Err(Error::NoData);
        };

        let in_channels = self.config.input_sample_spec.num_channels;
        let out_channels = self.encoding.num_channels;
        if in_channels == out_channels {
            return packetizer.write(frame);
        }

        map_channels(&frame.samples, in_channels, out_channels, &mut self.map_scratch);
        let mapped = Frame {
            samples: std::mem::take(&mut self.map_scratch),
            flags: frame.flags,
            duration: frame.duration,
            capture_timestamp: frame.capture_timestamp,
        };
        let result = packetizer.write(&mapped);
        self.map_scratch = mapped.samples;
        result
    }

    /// Pull due control packets and return the next deadline.
    pub fn refresh(&mut self, now: Nanos) -> Result<Nanos> {
        let Some(communicator) = &mut self.communicator else {
            return Ok(now + SECOND);
        };

        if let Some(packetizer) = &self.packetizer {
            self.participant.stream_timestamp = packetizer.stream_timestamp_at(now);
            self.participant.packet_count = packetizer.packet_count();
            self.participant.byte_count = packetizer.byte_count();
        }

        if communicator.generation_deadline(now) <= now {
            communicator.generate_reports(&mut self.participant, now)?;

            if let Some(new_ssrc) = self.participant.ssrc_change.take()
                && let Some(packetizer) = &mut self.packetizer
            {
                packetizer.set_source_id(new_ssrc);
            }
        }

        Ok(communicator.generation_deadline(now))
    }

    /// Send a goodbye report; call before tearing the slot down.
    pub fn shutdown(&mut self, now: Nanos) -> Result<()> {
        if let Some(communicator) = &mut self.communicator {
            communicator.generate_goodbye(&mut self.participant, now)?;
        }
        Ok(())
    }

    pub fn metrics(&self) -> SenderSlotMetrics {
        SenderSlotMetrics {
            source_id: self.participant.source_id,
            packet_count: self
                .packetizer
                .as_ref()
                .map(|p| p.packet_count())
                .unwrap_or(0),
            byte_count: self
                .packetizer
                .as_ref()
                .map(|p| p.byte_count())
                .unwrap_or(0),
            remote_reports: self.participant.remote_reports.clone(),
        }
    }

    /// Feed an inbound control packet (from the control endpoint).
    pub fn write_control_packet(&mut self, packet: Packet, now: Nanos) -> Result<()> {
        let Some(communicator) = &mut self.communicator else {
            return Ok(());
        };
        communicator.process_packet(&mut self.participant, &packet, now)?;

        if let Some(new_ssrc) = self.participant.ssrc_change.take()
            && let Some(packetizer) = &mut self.packetizer
        {
            packetizer.set_source_id(new_ssrc);
        }
        Ok(())
    }
}
