use crate::rtt::RttConfig;
use shared::time::{Nanos, MILLISECOND, SECOND};

/// RTCP exchange parameters.
#[derive(Debug, Clone, Copy)]
pub struct RtcpConfig {
    /// Nominal interval between generated reports. The actual interval
    /// is randomized within [0.5; 1.5] of this value per RFC 3550 timer
    /// reconsideration.
    pub report_interval: Nanos,

    /// Deadline for the very first report after startup, so that peers
    /// bind quickly.
    pub initial_interval: Nanos,

    /// Streams not heard from for this long are evicted with a halt
    /// notification.
    pub inactivity_timeout: Nanos,

    /// RTT estimation config.
    pub rtt: RttConfig,

    /// Maximum size of one generated compound packet.
    pub mtu: usize,

    /// Enable generation of SR/RR packets.
    pub enable_sr_rr: bool,

    /// Enable generation of XR packets.
    pub enable_xr: bool,

    /// Enable generation of SDES packets.
    pub enable_sdes: bool,
}

impl Default for RtcpConfig {
    fn default() -> Self {
        Self {
            report_interval: 200 * MILLISECOND,
            initial_interval: 10 * MILLISECOND,
            inactivity_timeout: 5 * SECOND,
            rtt: RttConfig::default(),
            mtu: 1460,
            enable_sr_rr: true,
            enable_xr: true,
            enable_sdes: true,
        }
    }
}
