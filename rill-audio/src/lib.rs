#![warn(rust_2018_idioms)]
#![allow(dead_code)]

mod channel_mapper;
mod depacketizer;
mod frame;
mod freq_estimator;
mod jitter_meter;
mod latency_config;
mod latency_tuner;
mod mixer;
mod packetizer;
mod resampler;
mod sample;

pub use channel_mapper::map_channels;
pub use depacketizer::{Depacketizer, DepacketizerMetrics};
pub use frame::{Frame, FrameReader, FrameWriter};
pub use freq_estimator::{FreqEstimator, FreqEstimatorProfile};
pub use jitter_meter::{JitterMeter, JitterMeterConfig, JitterMetrics};
pub use latency_config::{
    LatencyConfig, LatencyMetrics, LatencyTunerBackend, LatencyTunerProfile,
};
pub use latency_tuner::{LatencyTuner, TunerUpdate};
pub use mixer::Mixer;
pub use packetizer::Packetizer;
pub use resampler::Resampler;
pub use sample::SampleSpec;
