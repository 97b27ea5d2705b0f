use crate::freq_estimator::{FreqEstimator, FreqEstimatorProfile};
use crate::jitter_meter::JitterMetrics;
use crate::latency_config::{LatencyConfig, LatencyMetrics, LatencyTunerBackend, LatencyTunerProfile};
use crate::sample::SampleSpec;
use log::{debug, warn};
use shared::time::Nanos;

/// Outcome of one tuner update.
#[derive(Debug, Clone, Copy, Default)]
pub struct TunerUpdate {
    /// New resampler scaling to apply, if due.
    pub scaling: Option<f32>,
    /// False when the latency left the tolerated range and the session
    /// should be terminated.
    pub alive: bool,
}

/// Combines jitter metrics and queue depth into a resampler scaling
/// factor and, in adaptive mode, a target latency adjustment.
pub struct LatencyTuner {
    config: LatencyConfig,
    spec: SampleSpec,

    cur_target: Nanos,
    freq_est: Option<FreqEstimator>,

    stream_start: Option<Nanos>,
    last_decrease: Option<Nanos>,
    last_increase: Option<Nanos>,
    next_scaling: Option<Nanos>,
}

impl LatencyTuner {
    /// Takes a config already filled by `deduce_defaults`.
    pub fn new(config: LatencyConfig, spec: SampleSpec) -> Self {
        let adaptive = config.target_latency == 0;
        let cur_target = if adaptive {
            config.start_target_latency
        } else {
            config.target_latency
        };

        let freq_est = if config.tuner_profile == LatencyTunerProfile::Intact {
            None
        } else {
            Some(FreqEstimator::new(
                FreqEstimatorProfile::from_latency_profile(config.tuner_profile),
                spec.ns_to_samples(cur_target),
            ))
        };

        Self {
            config,
            spec,
            cur_target,
            freq_est,
            stream_start: None,
            last_decrease: None,
            last_increase: None,
            next_scaling: None,
        }
    }

    pub fn target_latency(&self) -> Nanos {
        self.cur_target
    }

    pub fn is_adaptive(&self) -> bool {
        self.config.target_latency == 0
    }

    /// Feed fresh metrics and get the pending actions.
    pub fn update(
        &mut self,
        now: Nanos,
        latency: &LatencyMetrics,
        jitter: &JitterMetrics,
    ) -> TunerUpdate {
        if self.stream_start.is_none() {
            self.stream_start = Some(now);
            self.next_scaling = Some(now + self.config.scaling_interval);
        }

        if self.is_adaptive() {
            self.update_target(now, latency, jitter);
        }

        let alive = self.check_tolerance(latency);
        let scaling = self.update_scaling(now, latency);

        TunerUpdate { scaling, alive }
    }

    fn update_target(&mut self, now: Nanos, latency: &LatencyMetrics, jitter: &JitterMetrics) {
        if self.in_cooldown(now) {
            return;
        }

        let estimate = self.estimate_optimal(jitter);
        if estimate == 0 {
            return;
        }

        if self.cur_target as f64
            >= estimate as f64 * self.config.latency_decrease_relative_threshold as f64
            && latency.niq_latency >= estimate
        {
            debug!(
                "latency tuner: decreasing target: cur={} new={}",
                self.cur_target, estimate
            );
            self.set_target(estimate);
            self.last_decrease = Some(now);
        } else if estimate > self.cur_target {
            debug!(
                "latency tuner: increasing target: cur={} new={}",
                self.cur_target, estimate
            );
            self.set_target(estimate);
            self.last_increase = Some(now);
        }
    }

    fn estimate_optimal(&self, jitter: &JitterMetrics) -> Nanos {
        let estimate = (jitter.peak_jitter as f64 * self.config.max_jitter_overhead as f64)
            .max(jitter.mean_jitter as f64 * self.config.mean_jitter_overhead as f64)
            as Nanos;

        estimate.clamp(
            self.config.min_target_latency,
            self.config.max_target_latency,
        )
    }

    fn set_target(&mut self, target: Nanos) {
        self.cur_target = target;
        if let Some(fe) = &mut self.freq_est {
            fe.update_target_latency(self.spec.ns_to_samples(target));
        }
    }

    fn in_cooldown(&self, now: Nanos) -> bool {
        if let Some(start) = self.stream_start
            && now - start < self.config.starting_timeout
        {
            return true;
        }
        if let Some(dec) = self.last_decrease
            && now - dec < self.config.cooldown_dec_timeout
        {
            return true;
        }
        if let Some(inc) = self.last_increase
            && now - inc < self.config.cooldown_inc_timeout
        {
            return true;
        }
        false
    }

    /// The latency the configured backend monitors. E2E needs RTCP and
    /// falls back to the queue length until it is measured.
    fn monitored_latency(&self, latency: &LatencyMetrics) -> Nanos {
        match self.config.tuner_backend {
            LatencyTunerBackend::E2e if latency.e2e_latency != 0 => latency.e2e_latency,
            _ => latency.niq_latency,
        }
    }

    fn check_tolerance(&self, latency: &LatencyMetrics) -> bool {
        // During an outage there is nothing meaningful to check; resets
        // would only cascade.
        if latency.niq_stalling > self.config.stale_tolerance {
            return true;
        }
        let monitored = self.monitored_latency(latency);
        if monitored == 0 {
            // Not started yet.
            return true;
        }

        let deviation = (monitored - self.cur_target).abs();
        if deviation > self.config.latency_tolerance {
            warn!(
                "latency tuner: latency out of bounds: latency={} target={} tolerance={}",
                monitored, self.cur_target, self.config.latency_tolerance
            );
            return false;
        }
        true
    }

    fn update_scaling(&mut self, now: Nanos, latency: &LatencyMetrics) -> Option<f32> {
        let current = self.monitored_latency(latency);
        let fe = self.freq_est.as_mut()?;

        fe.update_current_latency(self.spec.ns_to_samples(current));

        let due = self.next_scaling?;
        if now < due {
            return None;
        }
        self.next_scaling = Some(now + self.config.scaling_interval);

        let tolerance = self.config.scaling_tolerance;
        let scaling = (fe.freq_coeff() as f32).clamp(1.0 - tolerance, 1.0 + tolerance);
        Some(scaling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jitter_meter::JitterMetrics;
    use shared::time::{MILLISECOND, SECOND};

    fn config(target: Nanos) -> LatencyConfig {
        let mut config = LatencyConfig {
            target_latency: target,
            ..Default::default()
        };
        config.deduce_defaults(200 * MILLISECOND, true);
        config
    }

    fn spec() -> SampleSpec {
        SampleSpec::new(44100, 2)
    }

    fn metrics(niq: Nanos) -> LatencyMetrics {
        LatencyMetrics {
            niq_latency: niq,
            ..Default::default()
        }
    }

    #[test]
    fn test_fixed_mode_keeps_target() {
        let mut tuner = LatencyTuner::new(config(100 * MILLISECOND), spec());

        let jitter = JitterMetrics {
            mean_jitter: 50 * MILLISECOND,
            peak_jitter: 300 * MILLISECOND,
            ..Default::default()
        };
        let update = tuner.update(0, &metrics(100 * MILLISECOND), &jitter);
        assert!(update.alive);
        assert_eq!(tuner.target_latency(), 100 * MILLISECOND);
    }

    #[test]
    fn test_fixed_mode_tolerance_breach() {
        let mut tuner = LatencyTuner::new(config(100 * MILLISECOND), spec());

        let update = tuner.update(
            0,
            &metrics(100 * MILLISECOND + tuner.config.latency_tolerance + MILLISECOND),
            &JitterMetrics::default(),
        );
        assert!(!update.alive);
    }

    #[test]
    fn test_stalling_suspends_tolerance() {
        let mut tuner = LatencyTuner::new(config(100 * MILLISECOND), spec());

        let latency = LatencyMetrics {
            niq_latency: SECOND,
            niq_stalling: tuner.config.stale_tolerance + SECOND,
            ..Default::default()
        };
        let update = tuner.update(0, &latency, &JitterMetrics::default());
        assert!(update.alive);
    }

    #[test]
    fn test_adaptive_increases_target() {
        let mut tuner = LatencyTuner::new(config(0), spec());
        let start_target = tuner.target_latency();

        let jitter = JitterMetrics {
            mean_jitter: 100 * MILLISECOND,
            peak_jitter: 400 * MILLISECOND,
            ..Default::default()
        };
        // First update inside the starting timeout: no change.
        tuner.update(0, &metrics(start_target), &jitter);
        assert_eq!(tuner.target_latency(), start_target);

        // After the starting timeout the target follows the estimate.
        tuner.update(6 * SECOND, &metrics(start_target), &jitter);
        assert!(tuner.target_latency() > start_target);
    }

    #[test]
    fn test_adaptive_decrease_has_cooldown() {
        let mut tuner = LatencyTuner::new(config(0), spec());
        let start_target = tuner.target_latency();

        let low_jitter = JitterMetrics {
            mean_jitter: MILLISECOND,
            peak_jitter: 2 * MILLISECOND,
            ..Default::default()
        };

        tuner.update(6 * SECOND, &metrics(start_target), &low_jitter);
        let decreased = tuner.target_latency();
        assert!(decreased < start_target);

        // Further decrease blocked by cooldown.
        tuner.update(6 * SECOND + MILLISECOND, &metrics(decreased), &low_jitter);
        assert_eq!(tuner.target_latency(), decreased);
    }

    #[test]
    fn test_scaling_clipped_and_periodic() {
        let mut tuner = LatencyTuner::new(config(100 * MILLISECOND), spec());

        // Grossly overfull queue: estimator pushes up, tuner clips.
        let mut scaling = None;
        for i in 0..100 {
            let update = tuner.update(
                i * 5 * MILLISECOND,
                &metrics(120 * MILLISECOND),
                &JitterMetrics::default(),
            );
            if let Some(s) = update.scaling {
                scaling = Some(s);
            }
        }
        let scaling = scaling.expect("scaling never produced");
        assert!(scaling <= 1.0 + tuner.config.scaling_tolerance);
        assert!(scaling >= 1.0);
    }

    #[test]
    fn test_intact_profile_no_scaling() {
        let mut config = config(100 * MILLISECOND);
        config.tuner_profile = LatencyTunerProfile::Intact;
        let mut tuner = LatencyTuner::new(config, spec());

        for i in 0..10 {
            let update = tuner.update(
                i * 10 * MILLISECOND,
                &metrics(100 * MILLISECOND),
                &JitterMetrics::default(),
            );
            assert!(update.scaling.is_none());
        }
    }
}
