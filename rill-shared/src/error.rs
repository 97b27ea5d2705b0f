use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    //Configuration errors
    /// Invalid configuration value; the instance is inert.
    #[error("bad configuration: {0}")]
    BadConfig(&'static str),

    //Resource errors
    /// Pool or buffer capacity exhausted; caller may retry later.
    #[error("no memory: pool or buffer exhausted")]
    NoMem,
    /// Byte slice too small to hold the output; caller paginates.
    #[error("no space left in output slice")]
    NoSpace,
    /// Output buffer rejected by a composer (size or layout).
    #[error("bad output buffer")]
    BadBuffer,
    /// Expected inbound data is not present yet (non-blocking read).
    #[error("no data available")]
    NoData,

    //RTP errors
    #[error("RTP packet too short to be parsed")]
    RtpPacketTooShort,
    #[error("RTP version must be 2")]
    RtpBadVersion,
    #[error("unknown RTP payload type {0}")]
    RtpUnknownPayloadType(u8),

    //FEC errors
    #[error("FEC packet too short to hold payload id")]
    FecPacketTooShort,
    #[error("FEC payload size differs from block payload size")]
    FecPayloadSizeMismatch,
    #[error("FEC block encoding failed")]
    FecEncodeFailed,
    #[error("FEC block decoding failed")]
    FecDecodeFailed,

    //RTCP errors
    #[error("RTCP compound packet failed validation")]
    RtcpBadCompound,
    #[error("RTCP packet too short to be parsed")]
    RtcpPacketTooShort,
    #[error("RTCP first packet in compound must be SR or RR")]
    RtcpBadFirstPacket,
    #[error("RTCP SDES text must be < 255 octets long")]
    RtcpSdesTextTooLong,

    //Pipeline errors
    #[error("endpoint protocol is not suitable for interface")]
    ProtoInterfaceMismatch,
    #[error("source and repair endpoint protocols are inconsistent")]
    ProtoPairMismatch,
    #[error("endpoint protocol FEC scheme differs from pipeline FEC scheme")]
    ProtoSchemeMismatch,
    #[error("endpoint already exists on this interface")]
    EndpointExists,
}
