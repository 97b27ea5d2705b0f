use shared::time::Nanos;

/// Identity of the local participant.
#[derive(Debug, Clone)]
pub struct ParticipantInfo {
    /// Canonical name binding related streams of one endpoint together.
    pub cname: String,
    /// Local SSRC.
    pub source_id: u32,
}

/// State of one sending stream, as queried from the local pipeline or
/// received from a remote sender.
#[derive(Debug, Clone, Default)]
pub struct SendReport {
    pub ssrc: u32,
    pub cname: String,

    /// When the report was generated, ns since Unix epoch (in the clock
    /// domain of the reporting side).
    pub report_timestamp: Nanos,

    /// Stream timestamp corresponding to `report_timestamp`.
    pub stream_timestamp: u32,

    /// Sample rate of the stream, for jitter unit conversions.
    pub sample_rate: u32,

    pub packet_count: u32,
    pub byte_count: u32,

    /// Filled by the reporter from the stream RTT estimator.
    pub clock_offset: Nanos,
    pub rtt: Nanos,
}

/// State of one receiving stream, as queried from the local pipeline or
/// received from a remote receiver.
#[derive(Debug, Clone, Default)]
pub struct RecvReport {
    /// SSRC of the receiver producing the report.
    pub receiver_ssrc: u32,
    /// SSRC of the sender the report is about.
    pub sender_ssrc: u32,
    pub cname: String,

    /// When the report was generated.
    pub report_timestamp: Nanos,

    /// Sample rate of the stream, for jitter unit conversions.
    pub sample_rate: u32,

    /// Extended seqnum of the first and last received packets.
    pub ext_first_seqnum: u32,
    pub ext_last_seqnum: u32,

    /// Cumulative count of lost packets.
    pub cum_loss: i32,
    /// Fraction of packets lost since the last report, in [0; 1].
    pub fraction_loss: f32,

    /// Interarrival jitter.
    pub jitter: Nanos,

    /// Receiver queue metrics.
    pub niq_latency: Nanos,
    pub niq_stalling: Nanos,
    pub e2e_latency: Nanos,

    /// Filled by the reporter from the stream RTT estimator.
    pub clock_offset: Nanos,
    pub rtt: Nanos,
}

/// Interface between the RTCP machinery and a sender or receiver
/// pipeline.
///
/// The communicator queries the participant for up-to-date local
/// reports when generating packets, and notifies it with reports and
/// stream lifecycle events extracted from inbound packets. All
/// notifications derived from one inbound packet are delivered before
/// `process_packet` returns.
pub trait ParticipantController {
    fn cname(&self) -> String;
    fn source_id(&self) -> u32;

    /// Allocate a new SSRC after a collision. The participant must
    /// start using the returned value for outgoing media.
    fn change_source_id(&mut self) -> u32;

    /// Whether this participant sends media.
    fn has_send_stream(&self) -> bool {
        false
    }

    /// Current state of the local sending stream.
    fn query_send_report(&self, _now: Nanos) -> SendReport {
        SendReport::default()
    }

    /// A remote receiver reported on our sending stream.
    fn notify_send_stream(&mut self, _recv_ssrc: u32, _report: &RecvReport) {}

    /// Current states of the local receiving streams, one per remote
    /// sender.
    fn query_recv_reports(&self, _now: Nanos) -> Vec<RecvReport> {
        Vec::new()
    }

    /// A remote sender reported on a stream we receive.
    fn notify_recv_stream(&mut self, _send_ssrc: u32, _report: &SendReport) {}

    /// A stream was terminated: BYE received, inactivity timeout, or
    /// SSRC collision.
    fn halt_recv_stream(&mut self, _send_ssrc: u32) {}
}
