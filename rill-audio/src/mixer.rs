use crate::frame::Frame;

/// Mixes session outputs into one frame with saturation.
pub struct Mixer;

impl Mixer {
    /// Add `src` into `dst` sample by sample, clamping to [-1; 1].
    pub fn mix_into(dst: &mut Frame, src: &Frame) {
        debug_assert_eq!(dst.samples.len(), src.samples.len());

        for (d, s) in dst.samples.iter_mut().zip(src.samples.iter()) {
            *d = (*d + *s).clamp(-1.0, 1.0);
        }

        dst.flags |= src.flags;
        if dst.capture_timestamp == 0 {
            dst.capture_timestamp = src.capture_timestamp;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_and_clamp() {
        let mut dst = Frame {
            samples: vec![0.5, -0.5, 0.9],
            ..Default::default()
        };
        let src = Frame {
            samples: vec![0.25, -0.75, 0.9],
            flags: Frame::HAS_SIGNAL,
            capture_timestamp: 123,
            ..Default::default()
        };

        Mixer::mix_into(&mut dst, &src);
        assert!((dst.samples[0] - 0.75).abs() < 1e-6);
        assert!((dst.samples[1] + 1.0).abs() < 1e-6);
        assert!((dst.samples[2] - 1.0).abs() < 1e-6);
        assert_eq!(dst.flags, Frame::HAS_SIGNAL);
        assert_eq!(dst.capture_timestamp, 123);
    }
}
