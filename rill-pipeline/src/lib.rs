#![warn(rust_2018_idioms)]
#![allow(dead_code)]

mod config;
mod endpoint;
mod receiver;
mod sender;

pub use config::{
    ReceiverConfig, SenderConfig, DEFAULT_LATENCY, DEFAULT_PACKET_LENGTH, DEFAULT_SAMPLE_RATE,
};
pub use endpoint::{
    proto_attrs, validate_endpoint, validate_endpoint_and_pipeline_consistency,
    validate_endpoint_pair_consistency, Interface, Protocol, ProtocolAttrs,
};
pub use receiver::{ReceiverSlot, ReceiverSlotMetrics};
pub use sender::{SenderSlot, SenderSlotMetrics};
