use fec::codec::CodecMap;
use log::error;
use packet::FecScheme;
use shared::error::{Error, Result};

/// Endpoint interface: which leg of a slot a network endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    /// Audio source packets.
    AudioSource,
    /// FEC repair packets.
    AudioRepair,
    /// Control protocol packets.
    AudioControl,
}

impl std::fmt::Display for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interface::AudioSource => write!(f, "audio source"),
            Interface::AudioRepair => write!(f, "audio repair"),
            Interface::AudioControl => write!(f, "audio control"),
        }
    }
}

/// Endpoint protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Bare RTP.
    Rtp,
    /// RTP with Reed-Solomon FECFRAME footers.
    RtpRs8mSource,
    /// Reed-Solomon repair packets.
    Rs8mRepair,
    /// RTP with LDPC-Staircase FECFRAME footers.
    RtpLdpcSource,
    /// LDPC-Staircase repair packets.
    LdpcRepair,
    /// RTCP.
    Rtcp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Rtp => write!(f, "rtp"),
            Protocol::RtpRs8mSource => write!(f, "rtp+rs8m"),
            Protocol::Rs8mRepair => write!(f, "rs8m"),
            Protocol::RtpLdpcSource => write!(f, "rtp+ldpc"),
            Protocol::LdpcRepair => write!(f, "ldpc"),
            Protocol::Rtcp => write!(f, "rtcp"),
        }
    }
}

/// Static attributes of a protocol.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolAttrs {
    pub iface: Interface,
    pub fec_scheme: FecScheme,
}

pub fn proto_attrs(proto: Protocol) -> ProtocolAttrs {
    match proto {
        Protocol::Rtp => ProtocolAttrs {
            iface: Interface::AudioSource,
            fec_scheme: FecScheme::None,
        },
        Protocol::RtpRs8mSource => ProtocolAttrs {
            iface: Interface::AudioSource,
            fec_scheme: FecScheme::Rs8m,
        },
        Protocol::Rs8mRepair => ProtocolAttrs {
            iface: Interface::AudioRepair,
            fec_scheme: FecScheme::Rs8m,
        },
        Protocol::RtpLdpcSource => ProtocolAttrs {
            iface: Interface::AudioSource,
            fec_scheme: FecScheme::LdpcStaircase,
        },
        Protocol::LdpcRepair => ProtocolAttrs {
            iface: Interface::AudioRepair,
            fec_scheme: FecScheme::LdpcStaircase,
        },
        Protocol::Rtcp => ProtocolAttrs {
            iface: Interface::AudioControl,
            fec_scheme: FecScheme::None,
        },
    }
}

/// Check that a protocol is suitable for an interface and that its FEC
/// scheme is supported by the codec registry.
pub fn validate_endpoint(iface: Interface, proto: Protocol, codec_map: &CodecMap) -> Result<()> {
    let attrs = proto_attrs(proto);

    if attrs.iface != iface {
        error!("bad endpoints configuration: {proto} protocol is not suitable for {iface} endpoint");
        return Err(Error::ProtoInterfaceMismatch);
    }

    if attrs.fec_scheme != FecScheme::None && !codec_map.has_scheme(attrs.fec_scheme) {
        error!(
            "bad endpoints configuration: {iface} endpoint protocol '{proto}' implies fec scheme \
             '{}', which is not supported",
            attrs.fec_scheme
        );
        return Err(Error::ProtoSchemeMismatch);
    }

    Ok(())
}

/// Check that an endpoint protocol agrees with the pipeline FEC scheme.
pub fn validate_endpoint_and_pipeline_consistency(
    pipeline_fec_scheme: FecScheme,
    iface: Interface,
    proto: Protocol,
) -> Result<()> {
    let attrs = proto_attrs(proto);

    if iface == Interface::AudioRepair && pipeline_fec_scheme == FecScheme::None {
        error!(
            "bad endpoints configuration: repair endpoint is provided, but pipeline is not \
             configured to use any fec scheme"
        );
        return Err(Error::ProtoSchemeMismatch);
    }

    if attrs.fec_scheme != pipeline_fec_scheme {
        error!(
            "bad endpoints configuration: {iface} endpoint protocol '{proto}' implies fec scheme \
             '{}', but pipeline is configured to use fec scheme '{pipeline_fec_scheme}'",
            attrs.fec_scheme
        );
        return Err(Error::ProtoSchemeMismatch);
    }

    Ok(())
}

/// Check that source and repair endpoint protocols agree on one FEC
/// scheme (or that both use none).
pub fn validate_endpoint_pair_consistency(
    source_proto: Option<Protocol>,
    repair_proto: Option<Protocol>,
) -> Result<()> {
    let Some(source_proto) = source_proto else {
        error!("bad endpoints configuration: no source endpoint provided");
        return Err(Error::ProtoPairMismatch);
    };
    let source_attrs = proto_attrs(source_proto);

    match repair_proto {
        None => {
            if source_attrs.fec_scheme != FecScheme::None {
                error!(
                    "bad endpoints configuration: source endpoint protocol '{source_proto}' \
                     implies fec scheme '{}' and two endpoints, but repair endpoint is not \
                     provided",
                    source_attrs.fec_scheme
                );
                return Err(Error::ProtoPairMismatch);
            }
        }
        Some(repair_proto) => {
            let repair_attrs = proto_attrs(repair_proto);
            if source_attrs.fec_scheme == FecScheme::None {
                error!(
                    "bad endpoints configuration: source endpoint protocol '{source_proto}' \
                     implies no fec scheme and one endpoint, but repair endpoint is provided"
                );
                return Err(Error::ProtoPairMismatch);
            }
            if source_attrs.fec_scheme != repair_attrs.fec_scheme {
                error!(
                    "bad endpoints configuration: source endpoint protocol '{source_proto}' \
                     implies fec scheme '{}', but repair endpoint protocol '{repair_proto}' \
                     implies fec scheme '{}'",
                    source_attrs.fec_scheme, repair_attrs.fec_scheme
                );
                return Err(Error::ProtoPairMismatch);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iface_mismatch() {
        let codec_map = CodecMap::new();
        assert!(validate_endpoint(Interface::AudioSource, Protocol::Rtp, &codec_map).is_ok());
        assert!(
            validate_endpoint(Interface::AudioRepair, Protocol::Rtp, &codec_map).is_err()
        );
        assert!(
            validate_endpoint(Interface::AudioControl, Protocol::Rtcp, &codec_map).is_ok()
        );
    }

    #[test]
    fn test_pair_consistency() {
        assert!(validate_endpoint_pair_consistency(Some(Protocol::Rtp), None).is_ok());
        assert!(validate_endpoint_pair_consistency(
            Some(Protocol::RtpRs8mSource),
            Some(Protocol::Rs8mRepair)
        )
        .is_ok());
        // fec source without repair endpoint
        assert!(validate_endpoint_pair_consistency(Some(Protocol::RtpRs8mSource), None).is_err());
        // plain source with repair endpoint
        assert!(validate_endpoint_pair_consistency(
            Some(Protocol::Rtp),
            Some(Protocol::Rs8mRepair)
        )
        .is_err());
        // mixed schemes
        assert!(validate_endpoint_pair_consistency(
            Some(Protocol::RtpRs8mSource),
            Some(Protocol::LdpcRepair)
        )
        .is_err());
    }

    #[test]
    fn test_pipeline_consistency() {
        assert!(validate_endpoint_and_pipeline_consistency(
            FecScheme::Rs8m,
            Interface::AudioSource,
            Protocol::RtpRs8mSource
        )
        .is_ok());
        assert!(validate_endpoint_and_pipeline_consistency(
            FecScheme::None,
            Interface::AudioRepair,
            Protocol::Rs8mRepair
        )
        .is_err());
        assert!(validate_endpoint_and_pipeline_consistency(
            FecScheme::LdpcStaircase,
            Interface::AudioSource,
            Protocol::RtpRs8mSource
        )
        .is_err());
    }
}
