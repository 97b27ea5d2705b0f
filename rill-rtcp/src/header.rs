//! RTCP wire constants and value types (RFC 3550, RFC 3611).
//!
//! All multi-byte integers are big-endian. Every sub-packet starts at a
//! 4-byte boundary and carries its length in 32-bit words minus one.

/// RTCP protocol version.
pub const VERSION: u8 = 2;

/// Fixed packet header size.
pub const HEADER_SIZE: usize = 4;

/// Maximum value of the 5-bit counter field.
pub const PACKET_MAX_BLOCKS: usize = 31;

/// Maximum SDES/BYE text length.
pub const MAX_TEXT_LEN: usize = 255;

// Packet types.
pub const RTCP_SR: u8 = 200;
pub const RTCP_RR: u8 = 201;
pub const RTCP_SDES: u8 = 202;
pub const RTCP_BYE: u8 = 203;
pub const RTCP_APP: u8 = 204;
pub const RTCP_XR: u8 = 207;

// SDES item types.
pub const SDES_END: u8 = 0;
pub const SDES_CNAME: u8 = 1;

// XR block types.
/// Receiver reference time (RFC 3611).
pub const XR_RRTR: u8 = 4;
/// Delay since last receiver report (RFC 3611).
pub const XR_DLRR: u8 = 5;
/// Measurement information (RFC 6776).
pub const XR_MEASUREMENT_INFO: u8 = 14;
/// Delay metrics (RFC 6843).
pub const XR_DELAY_METRICS: u8 = 16;
/// Network incoming queue metrics (experimental).
pub const XR_QUEUE_METRICS: u8 = 220;

/// Sender report fields (without reception report blocks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderReport {
    pub ssrc: u32,
    /// Absolute send time, NTP 64-bit.
    pub ntp_timestamp: u64,
    /// The same instant in RTP stream-timestamp units.
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub byte_count: u32,
}

/// Receiver report fields (without reception report blocks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceiverReport {
    pub ssrc: u32,
}

/// Reception report block, attached to SR or RR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceptionReport {
    /// SSRC of the stream this report is about.
    pub ssrc: u32,
    /// Fraction of packets lost since the previous report, Q8.
    pub fraction_lost: u8,
    /// Cumulative packets lost, clamped to 24 bits.
    pub cum_loss: i32,
    /// Extended highest sequence number received.
    pub last_seqnum: u32,
    /// Interarrival jitter in stream-timestamp units.
    pub jitter: u32,
    /// Middle 32 bits of the NTP timestamp of the last received SR.
    pub last_sr: u32,
    /// Delay since that SR, NTP 16.16 fixed-point seconds.
    pub delay_last_sr: u32,
}

/// XR packet header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XrHeader {
    pub ssrc: u32,
}

/// XR receiver-reference-time block (RFC 3611 4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XrRrtr {
    /// Absolute receiver report time, NTP 64-bit.
    pub ntp_timestamp: u64,
}

/// One report of an XR DLRR block (RFC 3611 4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XrDlrrReport {
    /// SSRC of the receiver this report is about.
    pub ssrc: u32,
    /// Middle 32 bits of the NTP timestamp of that receiver's last RRTR.
    pub last_rr: u32,
    /// Delay since that RRTR, NTP 16.16 fixed-point seconds.
    pub delay_last_rr: u32,
}

/// XR measurement information block (RFC 6776).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XrMeasurementInfo {
    pub ssrc: u32,
    /// Seqnum of the first packet of the stream.
    pub first_seq: u16,
    /// Extended seqnum of the first packet of the current interval.
    pub interval_first_seq: u32,
    /// Extended seqnum of the last packet of the current interval.
    pub interval_last_seq: u32,
    /// Interval duration, NTP 16.16 fixed-point seconds.
    pub interval_duration: u32,
    /// Cumulative measurement duration, nanoseconds.
    pub cum_duration: u64,
}

/// XR delay metrics block (RFC 6843).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XrDelayMetrics {
    pub ssrc: u32,
    /// Round-trip times, NTP 16.16 fixed-point seconds.
    pub mean_rtt: u32,
    pub min_rtt: u32,
    pub max_rtt: u32,
    /// End-to-end latency, nanoseconds.
    pub e2e_latency: u64,
}

/// XR network-incoming-queue metrics block (experimental).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XrQueueMetrics {
    pub ssrc: u32,
    /// Queue length, NTP 16.16 fixed-point seconds.
    pub niq_latency: u32,
    /// Time since the queue last received a packet, NTP 16.16.
    pub niq_stalling: u32,
}

/// SDES chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SdesChunk {
    pub ssrc: u32,
}

/// SDES item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesItem {
    pub item_type: u8,
    pub text: String,
}

impl SdesItem {
    pub fn cname(text: &str) -> Self {
        Self {
            item_type: SDES_CNAME,
            text: text.to_string(),
        }
    }
}

/// Number of padding bytes needed to align `len` to a 4-byte boundary,
/// with at least `min` bytes added.
pub fn padding_len(len: usize, min: usize) -> usize {
    let mut pad = min;
    while (len + pad) % 4 != 0 {
        pad += 1;
    }
    pad
}
