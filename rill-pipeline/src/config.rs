use audio::{JitterMeterConfig, LatencyConfig, SampleSpec};
use fec::codec::CodecConfig;
use fec::{BlockReaderConfig, BlockWriterConfig};
use rtcp::RtcpConfig;
use rtp::PAYLOAD_TYPE_L16_STEREO;
use shared::time::{Nanos, MILLISECOND};

/// Default sample rate, samples per second.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default packet length. 5ms works well on the majority of Wi-Fi
/// networks and allows rather low latencies; lower values may be needed
/// depending on the network MTU.
pub const DEFAULT_PACKET_LENGTH: Nanos = 5 * MILLISECOND;

/// Default latency. 200ms works well on the majority of Wi-Fi networks
/// and is not too annoying; many networks allow less, some need more.
pub const DEFAULT_LATENCY: Nanos = 200 * MILLISECOND;

/// Sender pipeline parameters. Zero-valued fields mean "use default".
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// FEC codec parameters (scheme None disables FEC).
    pub fec_encoder: CodecConfig,

    /// FEC block dimensions.
    pub fec_writer: BlockWriterConfig,

    /// RTP payload type for audio packets.
    pub payload_type: u8,

    /// Packet length.
    pub packet_length: Nanos,

    /// Shuffle adjacent packets before sending, trading latency for
    /// burst-loss resilience.
    pub enable_interleaving: bool,

    /// Format of frames written into the slot.
    pub input_sample_spec: SampleSpec,

    /// RTCP parameters.
    pub rtcp: RtcpConfig,

    /// Canonical name; empty means generate one.
    pub cname: String,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            fec_encoder: CodecConfig::default(),
            fec_writer: BlockWriterConfig::default(),
            payload_type: 0,
            packet_length: 0,
            enable_interleaving: false,
            input_sample_spec: SampleSpec::new(DEFAULT_SAMPLE_RATE, 2),
            rtcp: RtcpConfig::default(),
            cname: String::new(),
        }
    }
}

impl SenderConfig {
    /// Fill zero-valued fields with defaults.
    pub fn deduce_defaults(&mut self) {
        if self.payload_type == 0 {
            self.payload_type = PAYLOAD_TYPE_L16_STEREO;
        }
        if self.packet_length == 0 {
            self.packet_length = DEFAULT_PACKET_LENGTH;
        }
        if self.cname.is_empty() {
            self.cname = format!("rill-{:08x}", rand::random::<u32>());
        }
    }
}

/// Receiver pipeline parameters. Zero-valued fields mean "use default".
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// FEC codec parameters (scheme None disables FEC).
    pub fec_decoder: CodecConfig,

    /// FEC reorder window parameters.
    pub fec_reader: BlockReaderConfig,

    /// Expected RTP payload type.
    pub payload_type: u8,

    /// Latency tuning parameters.
    pub latency: LatencyConfig,

    /// Jitter measurement parameters.
    pub jitter_meter: JitterMeterConfig,

    /// RTCP parameters.
    pub rtcp: RtcpConfig,

    /// Terminate a session when no packets arrived for this long.
    /// Zero means use the RTCP inactivity timeout.
    pub session_timeout: Nanos,

    /// Format of frames read from the slot.
    pub output_sample_spec: SampleSpec,

    /// Canonical name; empty means generate one.
    pub cname: String,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            fec_decoder: CodecConfig::default(),
            fec_reader: BlockReaderConfig::default(),
            payload_type: 0,
            latency: LatencyConfig::default(),
            jitter_meter: JitterMeterConfig::default(),
            rtcp: RtcpConfig::default(),
            session_timeout: 0,
            output_sample_spec: SampleSpec::new(DEFAULT_SAMPLE_RATE, 2),
            cname: String::new(),
        }
    }
}

impl ReceiverConfig {
    /// Fill zero-valued fields with defaults, resolving dependent
    /// settings in order: latency profile first, jitter meter second.
    pub fn deduce_defaults(&mut self) {
        if self.payload_type == 0 {
            self.payload_type = PAYLOAD_TYPE_L16_STEREO;
        }
        self.latency.deduce_defaults(DEFAULT_LATENCY, true);
        self.jitter_meter.deduce_defaults(self.latency.tuner_profile);
        if self.session_timeout == 0 {
            self.session_timeout = self.rtcp.inactivity_timeout;
        }
        if self.cname.is_empty() {
            self.cname = format!("rill-{:08x}", rand::random::<u32>());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio::LatencyTunerProfile;

    #[test]
    fn test_sender_defaults() {
        let mut config = SenderConfig::default();
        config.deduce_defaults();
        assert_eq!(config.payload_type, PAYLOAD_TYPE_L16_STEREO);
        assert_eq!(config.packet_length, DEFAULT_PACKET_LENGTH);
        assert!(!config.cname.is_empty());
    }

    #[test]
    fn test_receiver_defaults_chain() {
        let mut config = ReceiverConfig::default();
        config.deduce_defaults();
        // profile deduced from the default 200ms latency...
        assert_eq!(config.latency.tuner_profile, LatencyTunerProfile::Gradual);
        // ...and the jitter meter coefficient from the profile
        assert_eq!(config.jitter_meter.envelope_resistance_coeff, 0.10);
        assert_eq!(config.session_timeout, config.rtcp.inactivity_timeout);
    }
}
