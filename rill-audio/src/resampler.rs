use crate::frame::{Frame, FrameReader};
use crate::sample::SampleSpec;
use shared::error::Result;
use shared::time::Nanos;

/// How many per-channel samples to pull from the inner reader at once.
const CHUNK_FRAMES: usize = 256;

/// Linear-interpolation resampler with a tunable scaling factor.
///
/// Scaling is the ratio of input rate to output rate: with scaling above
/// one the resampler consumes input faster than it produces output, which
/// drains the receiver queue; below one it stretches the input. The
/// latency tuner keeps the factor within fractions of a percent of one,
/// where linear interpolation is transparent enough for speech and music.
pub struct Resampler {
    inner: Box<dyn FrameReader>,
    spec: SampleSpec,
    scaling: f64,

    // Interleaved input window and fractional read position within it,
    // in per-channel frames.
    window: Vec<f32>,
    pos: f64,
    window_capture_ts: Nanos,
    flags: u8,
}

impl Resampler {
    pub fn new(inner: Box<dyn FrameReader>, spec: SampleSpec) -> Self {
        Self {
            inner,
            spec,
            scaling: 1.0,
            window: Vec::new(),
            pos: 0.0,
            window_capture_ts: 0,
            flags: 0,
        }
    }

    pub fn scaling(&self) -> f64 {
        self.scaling
    }

    pub fn set_scaling(&mut self, scaling: f64) {
        assert!(scaling > 0.0, "resampler: scaling must be positive");
        self.scaling = scaling;
    }

    fn window_frames(&self) -> usize {
        self.window.len() / self.spec.num_channels
    }

    fn pull_input(&mut self) -> Result<()> {
        let frame = self
            .inner
            .read(CHUNK_FRAMES * self.spec.num_channels)?;
        if self.window.is_empty() && frame.capture_timestamp != 0 {
            self.window_capture_ts = frame.capture_timestamp;
        }
        self.flags |= frame.flags;
        self.window.extend_from_slice(&frame.samples);
        Ok(())
    }

    fn drop_consumed(&mut self) {
        let consumed = self.pos.floor() as usize;
        if consumed == 0 {
            return;
        }
        let keep_from = consumed.min(self.window_frames());
        self.window.drain(..keep_from * self.spec.num_channels);
        self.pos -= keep_from as f64;
        if self.window_capture_ts != 0 {
            self.window_capture_ts += self.spec.samples_to_ns(keep_from);
        }
    }
}

impl FrameReader for Resampler {
    fn read(&mut self, num_samples: usize) -> Result<Frame> {
        let channels = self.spec.num_channels;
        assert!(num_samples % channels == 0);
        let out_frames = num_samples / channels;

        let mut frame = Frame::new(num_samples, channels);
        if self.window_capture_ts != 0 {
            // First output sample is at fractional input position `pos`.
            frame.capture_timestamp = self.window_capture_ts
                + (self.pos * self.spec.samples_to_ns(1) as f64) as Nanos;
        }

        for out_index in 0..out_frames {
            // Interpolation needs the sample at floor(pos) and the next one.
            while self.window_frames() < self.pos.floor() as usize + 2 {
                self.pull_input()?;
            }

            let base = self.pos.floor() as usize;
            let frac = (self.pos - base as f64) as f32;
            for ch in 0..channels {
                let a = self.window[base * channels + ch];
                let b = self.window[(base + 1) * channels + ch];
                frame.samples[out_index * channels + ch] = a * (1.0 - frac) + b * frac;
            }

            self.pos += self.scaling;
        }

        self.drop_consumed();

        frame.flags = self.flags;
        self.flags = 0;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ramp {
        next: f32,
        step: f32,
    }

    impl FrameReader for Ramp {
        fn read(&mut self, num_samples: usize) -> Result<Frame> {
            let mut frame = Frame::new(num_samples, 1);
            for sample in frame.samples.iter_mut() {
                *sample = self.next;
                self.next += self.step;
            }
            frame.flags = Frame::HAS_SIGNAL;
            Ok(frame)
        }
    }

    #[test]
    fn test_unity_scaling_passthrough() {
        let mut resampler = Resampler::new(
            Box::new(Ramp {
                next: 0.0,
                step: 0.001,
            }),
            SampleSpec::new(44100, 1),
        );

        let frame = resampler.read(100).unwrap();
        for (i, sample) in frame.samples.iter().enumerate() {
            assert!((sample - i as f32 * 0.001).abs() < 1e-5, "at {i}");
        }
    }

    #[test]
    fn test_scaling_above_one_consumes_faster() {
        let mut resampler = Resampler::new(
            Box::new(Ramp {
                next: 0.0,
                step: 0.001,
            }),
            SampleSpec::new(44100, 1),
        );
        resampler.set_scaling(1.5);

        let frame = resampler.read(100).unwrap();
        // Output advances 1.5 input samples per output sample.
        assert!((frame.samples[99] - 99.0 * 1.5 * 0.001).abs() < 1e-4);
    }

    #[test]
    fn test_interpolates_between_samples() {
        let mut resampler = Resampler::new(
            Box::new(Ramp {
                next: 0.0,
                step: 0.1,
            }),
            SampleSpec::new(44100, 1),
        );
        resampler.set_scaling(0.5);

        let frame = resampler.read(4).unwrap();
        assert!((frame.samples[1] - 0.05).abs() < 1e-5);
        assert!((frame.samples[3] - 0.15).abs() < 1e-5);
    }
}
