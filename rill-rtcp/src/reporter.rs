use crate::config::RtcpConfig;
use crate::header::*;
use crate::participant::{ParticipantController, RecvReport, SendReport};
use crate::rtt::{RttConfig, RttEstimator, RttMetrics};
use log::debug;
use shared::time::{self, Nanos, SECOND};
use std::collections::HashMap;

struct Stream {
    source_id: u32,
    cname: Option<String>,

    /// NTP timestamp and local arrival time of the last SR received
    /// from this stream (the "LSR" echo source when we're receiver).
    last_sr_ntp: u64,
    last_sr_arrival: Nanos,

    /// NTP timestamp and local arrival time of the last RRTR received
    /// from this stream (the "LRR" echo source when we're sender).
    last_rrtr_ntp: u64,
    last_rrtr_arrival: Nanos,

    last_heard: Nanos,

    rtt: RttEstimator,

    // Reports accumulated from the compound packet being processed.
    pending_send_report: Option<SendReport>,
    pending_recv_report: Option<RecvReport>,
    // Jitter arrives in stream-timestamp ticks; converted on delivery.
    pending_jitter_ticks: Option<u32>,
}

impl Stream {
    fn new(source_id: u32, rtt_config: RttConfig, now: Nanos) -> Self {
        Self {
            source_id,
            cname: None,
            last_sr_ntp: 0,
            last_sr_arrival: 0,
            last_rrtr_ntp: 0,
            last_rrtr_arrival: 0,
            last_heard: now,
            rtt: RttEstimator::new(rtt_config),
            pending_send_report: None,
            pending_recv_report: None,
            pending_jitter_ticks: None,
        }
    }
}

enum Notification {
    RecvStream(u32, SendReport),
    SendStream(u32, RecvReport),
    Halt(u32),
}

/// Per-stream RTCP state table.
///
/// Merges inbound report blocks into per-stream state keyed by remote
/// SSRC, computes RTT from timestamp echoes, binds streams by CNAME with
/// collision and loop detection, and turns all of it into participant
/// notifications. Also supplies the communicator with the per-stream
/// echo timestamps needed to generate outbound reports.
pub struct Reporter {
    config: RtcpConfig,
    streams: HashMap<u32, Stream>,

    proc_now: Nanos,
    proc_rrtr: Option<u64>,
    notifications: Vec<Notification>,

    /// Our old SSRC after a collision, to be announced with BYE.
    pending_bye: Option<u32>,
}

impl Reporter {
    pub fn new(config: RtcpConfig) -> Self {
        Self {
            config,
            streams: HashMap::new(),
            proc_now: 0,
            proc_rrtr: None,
            notifications: Vec::new(),
            pending_bye: None,
        }
    }

    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn has_stream(&self, ssrc: u32) -> bool {
        self.streams.contains_key(&ssrc)
    }

    pub(crate) fn take_pending_bye(&mut self) -> Option<u32> {
        self.pending_bye.take()
    }

    fn stream_mut(&mut self, ssrc: u32) -> &mut Stream {
        let rtt_config = self.config.rtt;
        let now = self.proc_now;
        self.streams
            .entry(ssrc)
            .or_insert_with(|| Stream::new(ssrc, rtt_config, now))
    }

    //
    // Processing of one inbound compound packet. The communicator calls
    // `start_processing`, then the per-block methods in traversal
    // order (descriptions first, reports second, goodbyes last), then
    // `end_processing`, which delivers all notifications derived from
    // the packet before process_packet returns.
    //

    pub(crate) fn start_processing(&mut self, now: Nanos) {
        self.proc_now = now;
        self.proc_rrtr = None;
        self.notifications.clear();
    }

    pub(crate) fn process_cname(
        &mut self,
        participant: &mut dyn ParticipantController,
        ssrc: u32,
        cname: &str,
    ) {
        if ssrc == participant.source_id() {
            if cname == participant.cname() {
                // Our own packet came back through a network loop.
                debug!("rtcp reporter: network loop detected: ssrc={ssrc}");
                return;
            }
            // A remote peer advertises our SSRC with a different CNAME:
            // move ourselves to a new SSRC and say goodbye to the old one.
            let old = participant.source_id();
            let new = participant.change_source_id();
            debug!(
                "rtcp reporter: ssrc collision, changing local ssrc: old={old} new={new} \
                 remote_cname={cname}"
            );
            self.pending_bye = Some(old);
            return;
        }

        let now = self.proc_now;
        let rtt_config = self.config.rtt;
        let collision_cname = {
            let stream = self.stream_mut(ssrc);
            match &stream.cname {
                None => {
                    stream.cname = Some(cname.to_string());
                    None
                }
                Some(existing) if existing != cname => Some(existing.clone()),
                _ => None,
            }
        };
        if let Some(existing) = collision_cname {
            // Two remote peers use the same SSRC: terminate the old
            // stream, keep the new one.
            debug!(
                "rtcp reporter: remote ssrc collision: ssrc={ssrc} old_cname={existing} \
                 new_cname={cname}"
            );
            self.notifications.push(Notification::Halt(ssrc));
            let mut fresh = Stream::new(ssrc, rtt_config, now);
            fresh.cname = Some(cname.to_string());
            *self.stream_mut(ssrc) = fresh;
        }
        self.stream_mut(ssrc).last_heard = now;
    }

    pub(crate) fn process_rrtr(&mut self, origin_ssrc: u32, rrtr: &XrRrtr) {
        self.proc_rrtr = Some(rrtr.ntp_timestamp);

        let now = self.proc_now;
        let stream = self.stream_mut(origin_ssrc);
        stream.last_rrtr_ntp = rrtr.ntp_timestamp;
        stream.last_rrtr_arrival = now;
        stream.last_heard = now;
    }

    pub(crate) fn process_sr(&mut self, sr: &SenderReport) {
        let now = self.proc_now;
        let stream = self.stream_mut(sr.ssrc);
        stream.last_sr_ntp = sr.ntp_timestamp;
        stream.last_sr_arrival = now;
        stream.last_heard = now;

        stream.pending_send_report = Some(SendReport {
            ssrc: sr.ssrc,
            cname: stream.cname.clone().unwrap_or_default(),
            report_timestamp: time::nanos_from_ntp(sr.ntp_timestamp),
            stream_timestamp: sr.rtp_timestamp,
            sample_rate: 0,
            packet_count: sr.packet_count,
            byte_count: sr.byte_count,
            clock_offset: 0,
            rtt: 0,
        });
    }

    pub(crate) fn process_reception_report(
        &mut self,
        participant: &mut dyn ParticipantController,
        reporting_ssrc: u32,
        report: &ReceptionReport,
    ) {
        if report.ssrc != participant.source_id() {
            // Report about somebody else's stream.
            return;
        }

        let now = self.proc_now;
        let proc_rrtr = self.proc_rrtr;
        let local_ssrc = participant.source_id();
        let stream = self.stream_mut(reporting_ssrc);
        stream.last_heard = now;

        // Sender-side RTT: we sent an SR (echoed in LSR/DLSR), the
        // remote receiver replied with this report plus an RRTR in the
        // same compound.
        if report.last_sr != 0
            && let Some(rrtr_ntp) = proc_rrtr
        {
            let t1 = time::nanos_from_ntp(time::ntp_restore(
                report.last_sr,
                time::ntp_from_nanos(now),
            ));
            let t3 = time::nanos_from_ntp(rrtr_ntp);
            let t2 = t3 - time::duration_from_ntp_short(report.delay_last_sr);
            stream.rtt.update(t1, t2, t3, now);
        }

        let recv_report = stream.pending_recv_report.get_or_insert_default();
        recv_report.receiver_ssrc = reporting_ssrc;
        recv_report.sender_ssrc = local_ssrc;
        recv_report.report_timestamp = now;
        recv_report.ext_last_seqnum = report.last_seqnum;
        recv_report.cum_loss = report.cum_loss;
        recv_report.fraction_loss = report.fraction_lost as f32 / 256.0;
        stream.pending_jitter_ticks = Some(report.jitter);
    }

    pub(crate) fn process_dlrr(
        &mut self,
        participant: &mut dyn ParticipantController,
        origin_ssrc: u32,
        reports: &[XrDlrrReport],
    ) {
        let local_ssrc = participant.source_id();
        let now = self.proc_now;

        for report in reports {
            if report.ssrc != local_ssrc || report.last_rr == 0 {
                continue;
            }
            let stream = self.stream_mut(origin_ssrc);
            if stream.last_sr_ntp == 0 {
                continue;
            }
            // Receiver-side RTT: we sent an RRTR (echoed in LRR/DLRR),
            // the remote sender replied with an SR in the same compound.
            let t1 = time::nanos_from_ntp(time::ntp_restore(
                report.last_rr,
                time::ntp_from_nanos(now),
            ));
            let t3 = time::nanos_from_ntp(stream.last_sr_ntp);
            let t2 = t3 - time::duration_from_ntp_short(report.delay_last_rr);
            stream.rtt.update(t1, t2, t3, now);
            stream.last_heard = now;
        }
    }

    pub(crate) fn process_measurement_info(
        &mut self,
        participant: &mut dyn ParticipantController,
        origin_ssrc: u32,
        info: &XrMeasurementInfo,
    ) {
        if info.ssrc != participant.source_id() {
            return;
        }
        let stream = self.stream_mut(origin_ssrc);
        let recv_report = stream.pending_recv_report.get_or_insert_default();
        recv_report.ext_first_seqnum = info.interval_first_seq;
    }

    pub(crate) fn process_delay_metrics(
        &mut self,
        participant: &mut dyn ParticipantController,
        origin_ssrc: u32,
        metrics: &XrDelayMetrics,
    ) {
        if metrics.ssrc != participant.source_id() {
            return;
        }
        let stream = self.stream_mut(origin_ssrc);
        let recv_report = stream.pending_recv_report.get_or_insert_default();
        recv_report.e2e_latency = metrics.e2e_latency as Nanos;
    }

    pub(crate) fn process_queue_metrics(
        &mut self,
        participant: &mut dyn ParticipantController,
        origin_ssrc: u32,
        metrics: &XrQueueMetrics,
    ) {
        if metrics.ssrc != participant.source_id() {
            return;
        }
        let stream = self.stream_mut(origin_ssrc);
        let recv_report = stream.pending_recv_report.get_or_insert_default();
        recv_report.niq_latency = time::duration_from_ntp_short(metrics.niq_latency);
        recv_report.niq_stalling = time::duration_from_ntp_short(metrics.niq_stalling);
    }

    pub(crate) fn process_bye(&mut self, ssrc: u32) {
        if self.streams.remove(&ssrc).is_some() {
            debug!("rtcp reporter: stream said goodbye: ssrc={ssrc}");
            self.notifications.push(Notification::Halt(ssrc));
        }
    }

    pub(crate) fn end_processing(&mut self, participant: &mut dyn ParticipantController) {
        let send_sample_rate = if participant.has_send_stream() {
            participant.query_send_report(self.proc_now).sample_rate
        } else {
            0
        };

        for stream in self.streams.values_mut() {
            let rtt_metrics: RttMetrics = stream.rtt.metrics();

            if let Some(mut report) = stream.pending_send_report.take() {
                report.clock_offset = rtt_metrics.clock_offset;
                report.rtt = rtt_metrics.rtt;
                self.notifications
                    .push(Notification::RecvStream(stream.source_id, report));
            }
            if let Some(mut report) = stream.pending_recv_report.take() {
                report.cname = stream.cname.clone().unwrap_or_default();
                report.clock_offset = rtt_metrics.clock_offset;
                report.rtt = rtt_metrics.rtt;
                if let Some(ticks) = stream.pending_jitter_ticks.take()
                    && send_sample_rate > 0
                {
                    report.jitter = ticks as Nanos * SECOND / send_sample_rate as Nanos;
                }
                self.notifications
                    .push(Notification::SendStream(stream.source_id, report));
            }
        }

        self.deliver_notifications(participant);
    }

    fn deliver_notifications(&mut self, participant: &mut dyn ParticipantController) {
        for notification in self.notifications.drain(..) {
            match notification {
                Notification::RecvStream(ssrc, report) => {
                    participant.notify_recv_stream(ssrc, &report)
                }
                Notification::SendStream(ssrc, report) => {
                    participant.notify_send_stream(ssrc, &report)
                }
                Notification::Halt(ssrc) => participant.halt_recv_stream(ssrc),
            }
        }
    }

    /// Evict streams not heard from within the inactivity timeout.
    pub(crate) fn evict_inactive(
        &mut self,
        participant: &mut dyn ParticipantController,
        now: Nanos,
    ) {
        let timeout = self.config.inactivity_timeout;
        let dead: Vec<u32> = self
            .streams
            .iter()
            .filter(|(_, s)| now - s.last_heard > timeout)
            .map(|(&ssrc, _)| ssrc)
            .collect();

        for ssrc in dead {
            debug!("rtcp reporter: stream timed out: ssrc={ssrc}");
            self.streams.remove(&ssrc);
            self.notifications.push(Notification::Halt(ssrc));
        }
        self.deliver_notifications(participant);
    }

    /// Make sure a stream entry exists for a peer we are about to
    /// address in an outbound report.
    pub(crate) fn touch_stream(&mut self, ssrc: u32, now: Nanos) {
        self.proc_now = now;
        self.stream_mut(ssrc);
    }

    /// (LSR, arrival time) echo data for an outbound reception report.
    pub(crate) fn stream_last_sr(&self, ssrc: u32) -> Option<(u64, Nanos)> {
        let stream = self.streams.get(&ssrc)?;
        if stream.last_sr_ntp == 0 {
            return None;
        }
        Some((stream.last_sr_ntp, stream.last_sr_arrival))
    }

    /// Streams that sent us an RRTR and expect a DLRR echo.
    pub(crate) fn dlrr_streams(&self) -> Vec<(u32, u64, Nanos)> {
        self.streams
            .iter()
            .filter(|(_, s)| s.last_rrtr_ntp != 0)
            .map(|(&ssrc, s)| (ssrc, s.last_rrtr_ntp, s.last_rrtr_arrival))
            .collect()
    }

    pub(crate) fn stream_rtt(&self, ssrc: u32) -> Option<RttMetrics> {
        let stream = self.streams.get(&ssrc)?;
        if !stream.rtt.has_metrics() {
            return None;
        }
        Some(stream.rtt.metrics())
    }
}
