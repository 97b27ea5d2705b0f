use crate::builder::Builder;
use crate::config::RtcpConfig;
use crate::header::*;
use crate::participant::{ParticipantController, RecvReport};
use crate::reporter::Reporter;
use crate::traverser::{ByeEvent, PacketEvent, SdesEvent, Traverser, XrBlockEvent};
use log::{debug, warn};
use packet::io::PacketWriter;
use packet::{Packet, PacketFactory, Rtcp};
use rand::Rng;
use shared::error::{Error, Result};
use shared::rate_limit::RateLimiter;
use shared::time::{self, Nanos, SECOND};

/// Estimated bytes of fixed compound overhead (SR, RRTR, SDES, BYE).
const PACKET_OVERHEAD: usize = 256;

/// Estimated bytes each reported stream adds to a compound packet
/// (reception block plus per-stream XR blocks).
const STREAM_OVERHEAD: usize = 112;

/// Drives the bidirectional RTCP exchange for one participant.
///
/// Inbound: `process_packet` parses a compound packet and feeds the
/// reporter, which notifies the participant. Outbound: `generate_reports`
/// assembles compound packets from participant-supplied reports on the
/// randomized schedule given by `generation_deadline`, paginating when
/// per-stream blocks do not fit the MTU.
pub struct Communicator {
    config: RtcpConfig,
    reporter: Reporter,

    writer: Box<dyn PacketWriter>,
    factory: PacketFactory,

    next_deadline: Nanos,

    processed_packets: u64,
    generated_packets: u64,
    error_count: u64,
    log_limiter: RateLimiter,
}

impl Communicator {
    pub fn new(config: RtcpConfig, writer: Box<dyn PacketWriter>, factory: PacketFactory) -> Self {
        Self {
            config,
            reporter: Reporter::new(config),
            writer,
            factory,
            next_deadline: 0,
            processed_packets: 0,
            generated_packets: 0,
            error_count: 0,
            log_limiter: RateLimiter::new(5 * SECOND),
        }
    }

    /// Number of tracked streams, for testing.
    pub fn total_streams(&self) -> usize {
        self.reporter.num_streams()
    }

    pub fn processed_packets(&self) -> u64 {
        self.processed_packets
    }

    pub fn generated_packets(&self) -> u64 {
        self.generated_packets
    }

    /// Parse and process an incoming RTCP packet. All notifications
    /// derived from it are delivered to the participant before this
    /// returns.
    pub fn process_packet(
        &mut self,
        participant: &mut dyn ParticipantController,
        packet: &Packet,
        now: Nanos,
    ) -> Result<()> {
        let data = packet.payload();

        let mut traverser = Traverser::new(data);
        if !traverser.parse() {
            self.error_count += 1;
            if self.log_limiter.allow(now) {
                warn!("rtcp communicator: dropping malformed compound packet");
            }
            return Err(Error::RtcpBadCompound);
        }

        self.reporter.start_processing(now);

        // Descriptions bind SSRCs to CNAMEs and must be seen before the
        // reports that reference them.
        for event in traverser.iter() {
            if let PacketEvent::Sdes(sdes) = event {
                self.process_description(participant, &sdes);
            }
        }

        // RRTR timestamps pair with reception reports from the same
        // compound, so collect them before the reports.
        for event in traverser.iter() {
            if let PacketEvent::Xr(xr) = event {
                let origin = xr.ssrc();
                for block in xr.iter() {
                    if let XrBlockEvent::Rrtr(rrtr) = block {
                        self.reporter.process_rrtr(origin, &rrtr);
                    }
                }
            }
        }

        for event in traverser.iter() {
            match event {
                PacketEvent::Sr(sr, reports) => {
                    self.reporter.process_sr(&sr);
                    for report in &reports {
                        self.reporter
                            .process_reception_report(participant, sr.ssrc, report);
                    }
                }
                PacketEvent::Rr(rr, reports) => {
                    for report in &reports {
                        self.reporter
                            .process_reception_report(participant, rr.ssrc, report);
                    }
                }
                PacketEvent::Xr(xr) => {
                    let origin = xr.ssrc();
                    for block in xr.iter() {
                        match block {
                            XrBlockEvent::Dlrr(reports) => {
                                self.reporter.process_dlrr(participant, origin, &reports)
                            }
                            XrBlockEvent::MeasurementInfo(info) => self
                                .reporter
                                .process_measurement_info(participant, origin, &info),
                            XrBlockEvent::DelayMetrics(metrics) => self
                                .reporter
                                .process_delay_metrics(participant, origin, &metrics),
                            XrBlockEvent::QueueMetrics(metrics) => self
                                .reporter
                                .process_queue_metrics(participant, origin, &metrics),
                            XrBlockEvent::Rrtr(_) => {}
                        }
                    }
                }
                _ => {}
            }
        }

        for event in traverser.iter() {
            if let PacketEvent::Bye(bye) = event {
                for item in bye.iter() {
                    if let ByeEvent::Ssrc(ssrc) = item {
                        self.reporter.process_bye(ssrc);
                    }
                }
            }
        }

        self.reporter.end_processing(participant);
        self.processed_packets += 1;

        Ok(())
    }

    fn process_description(
        &mut self,
        participant: &mut dyn ParticipantController,
        sdes: &crate::traverser::SdesTraverser<'_>,
    ) {
        let mut chunk_ssrc = 0;
        for event in sdes.iter() {
            match event {
                SdesEvent::Chunk(chunk) => chunk_ssrc = chunk.ssrc,
                SdesEvent::Item(item) => {
                    if item.item_type == SDES_CNAME {
                        self.reporter
                            .process_cname(participant, chunk_ssrc, &item.text);
                    }
                }
            }
        }
    }

    /// When packets should be generated next. Absolute time.
    pub fn generation_deadline(&mut self, now: Nanos) -> Nanos {
        if self.next_deadline == 0 {
            self.next_deadline = now + self.config.initial_interval;
        }
        self.next_deadline
    }

    /// Generate and write report packet(s). Should be called according
    /// to `generation_deadline`.
    pub fn generate_reports(
        &mut self,
        participant: &mut dyn ParticipantController,
        now: Nanos,
    ) -> Result<()> {
        self.reporter.evict_inactive(participant, now);

        let recv_reports = participant.query_recv_reports(now);
        for report in &recv_reports {
            self.reporter.touch_stream(report.sender_ssrc, now);
        }

        let pending_bye = self.reporter.take_pending_bye();

        let max_streams = ((self.config.mtu - PACKET_OVERHEAD) / STREAM_OVERHEAD).max(1);
        let mut first = true;
        let mut index = 0;
        while first || index < recv_reports.len() {
            let chunk = &recv_reports[index..recv_reports.len().min(index + max_streams)];
            index += chunk.len().max(1);

            let buf = self.build_compound(participant, now, chunk, first, pending_bye)?;
            self.write_control_packet(buf)?;
            first = false;
        }

        // RFC 3550 timer reconsideration: randomize around the period.
        let factor: f64 = rand::rng().random_range(0.5..1.5);
        self.next_deadline = now + (self.config.report_interval as f64 * factor) as Nanos;

        Ok(())
    }

    /// Generate and write a goodbye packet. Should be called before
    /// terminating a sender session.
    pub fn generate_goodbye(
        &mut self,
        participant: &mut dyn ParticipantController,
        now: Nanos,
    ) -> Result<()> {
        let mut builder = Builder::new(self.config.mtu);

        builder.begin_rr(&ReceiverReport {
            ssrc: participant.source_id(),
        });
        builder.end_rr();

        if self.config.enable_sdes {
            self.build_sdes(participant, &mut builder);
        }

        builder.begin_bye();
        builder.add_bye_ssrc(participant.source_id());
        builder.add_bye_reason("terminated");
        builder.end_bye();

        if !builder.is_ok() {
            return Err(Error::NoSpace);
        }
        self.write_control_packet(builder.finish())
    }

    fn build_compound(
        &mut self,
        participant: &mut dyn ParticipantController,
        now: Nanos,
        chunk: &[RecvReport],
        first: bool,
        pending_bye: Option<u32>,
    ) -> Result<Vec<u8>> {
        let mut builder = Builder::new(self.config.mtu);

        let reception_reports: Vec<ReceptionReport> = chunk
            .iter()
            .map(|r| self.build_reception_report(r, now))
            .collect();

        if self.config.enable_sr_rr && participant.has_send_stream() {
            let send = participant.query_send_report(now);
            builder.begin_sr(&SenderReport {
                ssrc: send.ssrc,
                ntp_timestamp: time::ntp_from_nanos(send.report_timestamp),
                rtp_timestamp: send.stream_timestamp,
                packet_count: send.packet_count,
                byte_count: send.byte_count,
            });
            for report in &reception_reports {
                builder.add_sr_report(report);
            }
            builder.end_sr();
        } else {
            builder.begin_rr(&ReceiverReport {
                ssrc: participant.source_id(),
            });
            for report in &reception_reports {
                builder.add_rr_report(report);
            }
            builder.end_rr();
        }

        if self.config.enable_xr {
            self.build_xr(participant, &mut builder, now, chunk, first);
        }

        if self.config.enable_sdes {
            self.build_sdes(participant, &mut builder);
        }

        if first && let Some(old_ssrc) = pending_bye {
            builder.begin_bye();
            builder.add_bye_ssrc(old_ssrc);
            builder.add_bye_reason("ssrc collision");
            builder.end_bye();
        }

        if !builder.is_ok() {
            self.error_count += 1;
            debug!("rtcp communicator: compound packet truncated to mtu");
        }
        Ok(builder.finish())
    }

    fn build_reception_report(&self, r: &RecvReport, now: Nanos) -> ReceptionReport {
        let jitter_ticks = if r.sample_rate > 0 {
            (r.jitter * r.sample_rate as Nanos / SECOND) as u32
        } else {
            0
        };

        let (last_sr, delay_last_sr) = match self.reporter.stream_last_sr(r.sender_ssrc) {
            Some((ntp, arrival)) => (
                time::ntp_short(ntp),
                time::ntp_short_from_duration(now - arrival),
            ),
            None => (0, 0),
        };

        ReceptionReport {
            ssrc: r.sender_ssrc,
            fraction_lost: (r.fraction_loss * 256.0).clamp(0.0, 255.0) as u8,
            cum_loss: r.cum_loss,
            last_seqnum: r.ext_last_seqnum,
            jitter: jitter_ticks,
            last_sr,
            delay_last_sr,
        }
    }

    fn build_xr(
        &mut self,
        participant: &mut dyn ParticipantController,
        builder: &mut Builder,
        now: Nanos,
        chunk: &[RecvReport],
        first: bool,
    ) {
        let dlrr_streams = self.reporter.dlrr_streams();

        let has_recv = !chunk.is_empty();
        let has_dlrr = first && !dlrr_streams.is_empty();
        if !has_recv && !has_dlrr {
            return;
        }

        builder.begin_xr(&XrHeader {
            ssrc: participant.source_id(),
        });

        // Receiver side: announce our reference time so senders can
        // compute receiver-originated RTT.
        if has_recv {
            builder.add_xr_rrtr(&XrRrtr {
                ntp_timestamp: time::ntp_from_nanos(now),
            });
        }

        // Sender side: echo the receivers' reference times.
        if has_dlrr {
            builder.begin_xr_dlrr();
            for (ssrc, rrtr_ntp, arrival) in dlrr_streams {
                builder.add_xr_dlrr_report(&XrDlrrReport {
                    ssrc,
                    last_rr: time::ntp_short(rrtr_ntp),
                    delay_last_rr: time::ntp_short_from_duration(now - arrival),
                });
            }
            builder.end_xr_dlrr();
        }

        for r in chunk {
            builder.add_xr_measurement_info(&XrMeasurementInfo {
                ssrc: r.sender_ssrc,
                first_seq: (r.ext_first_seqnum & 0xFFFF) as u16,
                interval_first_seq: r.ext_first_seqnum,
                interval_last_seq: r.ext_last_seqnum,
                interval_duration: 0,
                cum_duration: 0,
            });

            let rtt = self.reporter.stream_rtt(r.sender_ssrc).unwrap_or_default();
            builder.add_xr_delay_metrics(&XrDelayMetrics {
                ssrc: r.sender_ssrc,
                mean_rtt: time::ntp_short_from_duration(rtt.rtt),
                min_rtt: time::ntp_short_from_duration(rtt.rtt_min),
                max_rtt: time::ntp_short_from_duration(rtt.rtt_max),
                e2e_latency: r.e2e_latency.max(0) as u64,
            });

            builder.add_xr_queue_metrics(&XrQueueMetrics {
                ssrc: r.sender_ssrc,
                niq_latency: time::ntp_short_from_duration(r.niq_latency),
                niq_stalling: time::ntp_short_from_duration(r.niq_stalling),
            });
        }

        builder.end_xr();
    }

    fn build_sdes(&self, participant: &mut dyn ParticipantController, builder: &mut Builder) {
        builder.begin_sdes();
        builder.begin_sdes_chunk(&SdesChunk {
            ssrc: participant.source_id(),
        });
        builder.add_sdes_item(&SdesItem::cname(&participant.cname()));
        builder.end_sdes_chunk();
        builder.end_sdes();
    }

    fn write_control_packet(&mut self, buf: Vec<u8>) -> Result<()> {
        let Some(mut buffer) = self.factory.new_packet_buffer(buf.len()) else {
            return Err(Error::NoMem);
        };
        buffer.extend_from_slice(&buf);

        let mut packet = self.factory.new_packet();
        packet.rtcp = Some(Rtcp {
            payload: 0..buf.len(),
        });
        packet.set_buffer(buffer);
        packet.add_flags(Packet::FLAG_CONTROL | Packet::FLAG_COMPOSED);

        self.generated_packets += 1;
        self.writer.write(packet)
    }
}
