use shared::time::{Nanos, MILLISECOND, SECOND};

/// Which latency the tuner monitors and tunes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatencyTunerBackend {
    /// Deduce best default for given settings.
    #[default]
    Auto,

    /// Network incoming queue length, computed on the receiver without
    /// any signaling protocol and reported back via RTCP XR.
    Niq,

    /// End-to-end delay; requires RTCP XR support on both sides.
    E2e,
}

/// Whether and how the tuner adjusts latency on the fly to compensate
/// for clock drift and jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatencyTunerProfile {
    /// Deduce best default for given settings.
    #[default]
    Auto,

    /// Do not adjust latency.
    Intact,

    /// Fast and responsive adjustment, good for low-latency links.
    Responsive,

    /// Slow and smooth adjustment, good for higher latency and jitter.
    Gradual,
}

/// Latency settings. Zero-valued fields mean "use default" and are
/// filled by `deduce_defaults`.
#[derive(Debug, Clone, Copy)]
pub struct LatencyConfig {
    pub tuner_backend: LatencyTunerBackend,
    pub tuner_profile: LatencyTunerProfile,

    /// If non-zero, fixed latency mode: keep latency as close as
    /// possible to this target. If zero, adaptive mode: the tuner
    /// determines the best target on the fly.
    pub target_latency: Nanos,

    /// Maximum deviation of the current latency before the stream is
    /// considered broken.
    pub latency_tolerance: Nanos,

    /// Start value for the target latency in adaptive mode.
    pub start_target_latency: Nanos,

    /// Minimum target latency in adaptive mode.
    pub min_target_latency: Nanos,

    /// Maximum target latency in adaptive mode.
    pub max_target_latency: Nanos,

    /// If no packets were received for longer than this, latency
    /// tolerance checks are suspended to avoid cascading resets.
    pub stale_tolerance: Nanos,

    /// How often to run the frequency estimator and update resampler
    /// scaling.
    pub scaling_interval: Nanos,

    /// Maximum deviation of the scaling coefficient from 1.0.
    pub scaling_tolerance: f32,

    /// Target latency is decreased when the current target exceeds the
    /// estimated optimum by this factor.
    pub latency_decrease_relative_threshold: f32,

    /// No target adjustments for this long after stream start.
    pub starting_timeout: Nanos,

    /// No target adjustments for this long after a decrease.
    pub cooldown_dec_timeout: Nanos,

    /// No target adjustments for this long after an increase.
    pub cooldown_inc_timeout: Nanos,

    /// Estimated optimal latency is
    /// `max(peak_jitter * max_jitter_overhead, mean_jitter * mean_jitter_overhead)`.
    pub max_jitter_overhead: f32,
    pub mean_jitter_overhead: f32,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            tuner_backend: LatencyTunerBackend::Auto,
            tuner_profile: LatencyTunerProfile::Auto,
            target_latency: 0,
            latency_tolerance: 0,
            start_target_latency: 0,
            min_target_latency: 0,
            max_target_latency: 0,
            stale_tolerance: 0,
            scaling_interval: 5 * MILLISECOND,
            scaling_tolerance: 0.005,
            latency_decrease_relative_threshold: 1.7,
            starting_timeout: 5 * SECOND,
            cooldown_dec_timeout: 5 * SECOND,
            cooldown_inc_timeout: 15 * SECOND,
            max_jitter_overhead: 1.2,
            mean_jitter_overhead: 3.0,
        }
    }
}

impl LatencyConfig {
    /// Fill zero-valued settings, given the pipeline default latency.
    pub fn deduce_defaults(&mut self, default_latency: Nanos, is_receiver: bool) {
        if self.tuner_backend == LatencyTunerBackend::Auto {
            self.tuner_backend = LatencyTunerBackend::Niq;
        }

        let effective_target = if self.target_latency != 0 {
            self.target_latency
        } else if self.start_target_latency != 0 {
            self.start_target_latency
        } else {
            default_latency
        };

        if self.tuner_profile == LatencyTunerProfile::Auto {
            self.tuner_profile = if !is_receiver {
                // Sender does not adjust the clock; the receiver does.
                LatencyTunerProfile::Intact
            } else if effective_target < 30 * MILLISECOND {
                // Gradual profile is too slow for low latencies.
                LatencyTunerProfile::Responsive
            } else {
                LatencyTunerProfile::Gradual
            };
        }

        if self.target_latency == 0 && self.start_target_latency == 0 {
            self.start_target_latency = default_latency;
        }
        if self.target_latency == 0 {
            if self.min_target_latency == 0 && self.max_target_latency == 0 {
                self.min_target_latency = MILLISECOND.max(self.start_target_latency / 5);
                self.max_target_latency = self.start_target_latency * 5;
            }
        }

        if self.latency_tolerance == 0 {
            // target_latency * N, where N shrinks towards 1 and below as
            // the target grows, so short targets get proportionally more
            // slack than long ones.
            let capped = effective_target.max(MILLISECOND);
            let factor =
                ((200.0 * MILLISECOND as f64) * 2.0).ln() / ((capped as f64) * 2.0).ln();
            self.latency_tolerance = (capped as f64 * factor) as Nanos;
        }

        if self.stale_tolerance == 0 {
            self.stale_tolerance = self.latency_tolerance.max(100 * MILLISECOND);
        }
    }
}

/// Latency-related metrics, updated by the receiver session and
/// reported to the sender via RTCP XR.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyMetrics {
    /// Network incoming queue length: how much media is buffered in the
    /// receiver packet queue awaiting playback.
    pub niq_latency: Nanos,

    /// Delay since the last received packet.
    pub niq_stalling: Nanos,

    /// Estimated end-to-end latency, from sender capture to receiver
    /// playback.
    pub e2e_latency: Nanos,

    /// Total duration of packets within one FEC block.
    pub fec_block_duration: Nanos,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deduce_profile_from_target() {
        let mut low = LatencyConfig {
            target_latency: 10 * MILLISECOND,
            ..Default::default()
        };
        low.deduce_defaults(200 * MILLISECOND, true);
        assert_eq!(low.tuner_profile, LatencyTunerProfile::Responsive);

        let mut high = LatencyConfig {
            target_latency: 200 * MILLISECOND,
            ..Default::default()
        };
        high.deduce_defaults(200 * MILLISECOND, true);
        assert_eq!(high.tuner_profile, LatencyTunerProfile::Gradual);

        let mut sender = LatencyConfig::default();
        sender.deduce_defaults(200 * MILLISECOND, false);
        assert_eq!(sender.tuner_profile, LatencyTunerProfile::Intact);
    }

    #[test]
    fn test_deduce_adaptive_bounds() {
        let mut config = LatencyConfig::default();
        config.deduce_defaults(200 * MILLISECOND, true);

        assert_eq!(config.start_target_latency, 200 * MILLISECOND);
        assert_eq!(config.min_target_latency, 40 * MILLISECOND);
        assert_eq!(config.max_target_latency, SECOND);
        assert!(config.latency_tolerance > 0);
        assert!(config.stale_tolerance >= config.latency_tolerance);
    }

    #[test]
    fn test_tolerance_scales_with_target() {
        let mut small = LatencyConfig {
            target_latency: MILLISECOND,
            ..Default::default()
        };
        small.deduce_defaults(200 * MILLISECOND, true);

        let mut large = LatencyConfig {
            target_latency: 2 * SECOND,
            ..Default::default()
        };
        large.deduce_defaults(200 * MILLISECOND, true);

        // relative tolerance shrinks as target grows
        assert!(small.latency_tolerance > small.target_latency);
        assert!(large.latency_tolerance < large.target_latency);
    }
}
