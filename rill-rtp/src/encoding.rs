use shared::error::{Error, Result};

/// L16 stereo at 44100 Hz (RFC 3551).
pub const PAYLOAD_TYPE_L16_STEREO: u8 = 10;
/// L16 mono at 44100 Hz (RFC 3551).
pub const PAYLOAD_TYPE_L16_MONO: u8 = 11;

/// One payload format: how samples map to packet payload bytes.
///
/// Both supported formats are linear 16-bit PCM, big-endian, interleaved
/// by channel. In-memory samples are 32-bit floats in [-1; 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    pub payload_type: u8,
    pub sample_rate: u32,
    pub num_channels: usize,
}

impl Encoding {
    /// Bytes per multi-channel sample on the wire.
    pub fn sample_size(&self) -> usize {
        2 * self.num_channels
    }

    /// Number of multi-channel samples a payload of `payload_size` bytes holds.
    pub fn payload_samples(&self, payload_size: usize) -> usize {
        payload_size / self.sample_size()
    }

    /// Payload size for the given number of multi-channel samples.
    pub fn payload_size(&self, num_samples: usize) -> usize {
        num_samples * self.sample_size()
    }

    /// Encode interleaved float samples into big-endian 16-bit PCM.
    /// `samples` length must be a multiple of the channel count and
    /// `out` must be exactly `samples.len() * 2` bytes.
    pub fn encode(&self, samples: &[f32], out: &mut [u8]) {
        assert_eq!(samples.len() % self.num_channels, 0);
        assert_eq!(out.len(), samples.len() * 2);

        for (sample, bytes) in samples.iter().zip(out.chunks_exact_mut(2)) {
            let clamped = sample.clamp(-1.0, 1.0);
            let value = (clamped * 32767.0) as i16;
            bytes.copy_from_slice(&value.to_be_bytes());
        }
    }

    /// Decode big-endian 16-bit PCM into interleaved float samples.
    pub fn decode(&self, payload: &[u8], out: &mut Vec<f32>) {
        for bytes in payload.chunks_exact(2) {
            let value = i16::from_be_bytes([bytes[0], bytes[1]]);
            out.push(value as f32 / 32767.0);
        }
    }
}

/// Registry of known payload formats, constructed once at process start
/// and passed by reference into factories.
#[derive(Debug, Clone)]
pub struct EncodingMap {
    encodings: Vec<Encoding>,
}

impl EncodingMap {
    pub fn new() -> Self {
        Self {
            encodings: vec![
                Encoding {
                    payload_type: PAYLOAD_TYPE_L16_STEREO,
                    sample_rate: 44100,
                    num_channels: 2,
                },
                Encoding {
                    payload_type: PAYLOAD_TYPE_L16_MONO,
                    sample_rate: 44100,
                    num_channels: 1,
                },
            ],
        }
    }

    pub fn find_by_pt(&self, payload_type: u8) -> Result<Encoding> {
        self.encodings
            .iter()
            .find(|e| e.payload_type == payload_type)
            .copied()
            .ok_or(Error::RtpUnknownPayloadType(payload_type))
    }
}

impl Default for EncodingMap {
    fn default() -> Self {
        Self::new()
    }
}
