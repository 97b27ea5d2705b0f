/// Remap interleaved samples between channel layouts without gain change:
/// mono to stereo duplicates, stereo to mono averages.
pub fn map_channels(input: &[f32], in_channels: usize, out_channels: usize, out: &mut Vec<f32>) {
    out.clear();

    if in_channels == out_channels {
        out.extend_from_slice(input);
        return;
    }

    for chunk in input.chunks_exact(in_channels) {
        if out_channels > in_channels {
            // upmix: repeat the last available channel
            for ch in 0..out_channels {
                out.push(chunk[ch.min(in_channels - 1)]);
            }
        } else {
            // downmix: average the dropped channels into the last one
            for ch in 0..out_channels {
                if ch == out_channels - 1 {
                    let rest = &chunk[ch..];
                    out.push(rest.iter().sum::<f32>() / rest.len() as f32);
                } else {
                    out.push(chunk[ch]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let mut out = vec![];
        map_channels(&[0.1, 0.2, 0.3], 1, 2, &mut out);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let mut out = vec![];
        map_channels(&[0.2, 0.4, -0.2, -0.4], 2, 1, &mut out);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!((out[1] + 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_identity() {
        let mut out = vec![];
        map_channels(&[0.5, -0.5], 2, 2, &mut out);
        assert_eq!(out, vec![0.5, -0.5]);
    }
}
