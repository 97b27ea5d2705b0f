use shared::error::Result;
use shared::time::Nanos;

/// A chunk of interleaved float samples with provenance flags.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub samples: Vec<f32>,

    pub flags: u8,

    /// Per-channel sample count.
    pub duration: u32,

    /// Capture time of the first sample, ns since Unix epoch; 0 = unset.
    pub capture_timestamp: Nanos,
}

impl Frame {
    /// Frame contains samples decoded from actual media.
    pub const HAS_SIGNAL: u8 = 1 << 0;
    /// Some samples were zero-filled because packets are missing so far.
    pub const HAS_GAPS: u8 = 1 << 1;
    /// Some samples were dropped and replaced by zeros permanently.
    pub const HAS_DROPS: u8 = 1 << 2;

    pub fn new(num_samples: usize, num_channels: usize) -> Self {
        Self {
            samples: vec![0.0; num_samples],
            flags: 0,
            duration: (num_samples / num_channels) as u32,
            capture_timestamp: 0,
        }
    }
}

/// Sink for audio frames (sender input side).
pub trait FrameWriter {
    fn write(&mut self, frame: &Frame) -> Result<()>;
}

/// Source of audio frames (receiver output side). Always returns the
/// requested number of samples, zero-filling what is not available.
pub trait FrameReader {
    fn read(&mut self, num_samples: usize) -> Result<Frame>;
}

impl<W: FrameWriter + ?Sized> FrameWriter for Box<W> {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        (**self).write(frame)
    }
}

impl<R: FrameReader + ?Sized> FrameReader for Box<R> {
    fn read(&mut self, num_samples: usize) -> Result<Frame> {
        (**self).read(num_samples)
    }
}
