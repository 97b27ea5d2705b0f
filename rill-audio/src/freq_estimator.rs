use crate::latency_config::LatencyTunerProfile;

/// Frequency estimator presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreqEstimatorProfile {
    /// Fast tracking, for low latency targets.
    Responsive,
    /// Smooth tracking, for higher latencies and jitter.
    Gradual,
}

impl FreqEstimatorProfile {
    pub fn from_latency_profile(profile: LatencyTunerProfile) -> Self {
        match profile {
            LatencyTunerProfile::Responsive => FreqEstimatorProfile::Responsive,
            _ => FreqEstimatorProfile::Gradual,
        }
    }

    // Controller constants per profile, tuned so that the coefficient
    // converges within seconds without oscillating at typical 44.1 kHz
    // packet rates.
    fn proportional(&self) -> f64 {
        match self {
            FreqEstimatorProfile::Responsive => 1e-6,
            FreqEstimatorProfile::Gradual => 1e-7,
        }
    }

    fn integral(&self) -> f64 {
        match self {
            FreqEstimatorProfile::Responsive => 5e-9,
            FreqEstimatorProfile::Gradual => 5e-10,
        }
    }

    fn decimation(&self) -> usize {
        match self {
            FreqEstimatorProfile::Responsive => 10,
            FreqEstimatorProfile::Gradual => 20,
        }
    }
}

/// PI controller deriving the resampler scaling coefficient from the
/// deviation of the current queue length from the target.
///
/// The coefficient is the ratio of local to remote clock: above one the
/// receiver consumes faster and the queue drains, below one it stretches
/// playback and the queue grows.
pub struct FreqEstimator {
    profile: FreqEstimatorProfile,

    target: f64,

    // decimation: only every n-th sample updates the controller
    decim_counter: usize,
    decim_sum: f64,

    integral_acc: f64,
    coeff: f64,
}

impl FreqEstimator {
    pub fn new(profile: FreqEstimatorProfile, target_latency_samples: usize) -> Self {
        Self {
            profile,
            target: target_latency_samples as f64,
            decim_counter: 0,
            decim_sum: 0.0,
            integral_acc: 0.0,
            coeff: 1.0,
        }
    }

    /// Current scaling coefficient.
    pub fn freq_coeff(&self) -> f64 {
        self.coeff
    }

    /// Change the target queue length (after a target latency update).
    pub fn update_target_latency(&mut self, target_latency_samples: usize) {
        self.target = target_latency_samples as f64;
    }

    /// Feed the current queue length, in samples.
    pub fn update_current_latency(&mut self, current_latency_samples: usize) {
        self.decim_sum += current_latency_samples as f64;
        self.decim_counter += 1;
        if self.decim_counter < self.profile.decimation() {
            return;
        }

        let current = self.decim_sum / self.decim_counter as f64;
        self.decim_counter = 0;
        self.decim_sum = 0.0;

        let error = current - self.target;
        self.integral_acc += error;

        self.coeff = 1.0
            + self.profile.proportional() * error
            + self.profile.integral() * self.integral_acc;

        // A queue can not be consumed at a negative rate; the tuner
        // clips much tighter anyway.
        self.coeff = self.coeff.clamp(0.5, 2.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_queue_keeps_unity() {
        let mut fe = FreqEstimator::new(FreqEstimatorProfile::Responsive, 1000);

        for _ in 0..100 {
            fe.update_current_latency(1000);
        }
        assert!((fe.freq_coeff() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_long_queue_speeds_up() {
        let mut fe = FreqEstimator::new(FreqEstimatorProfile::Responsive, 1000);

        for _ in 0..100 {
            fe.update_current_latency(3000);
        }
        assert!(fe.freq_coeff() > 1.0);
    }

    #[test]
    fn test_short_queue_slows_down() {
        let mut fe = FreqEstimator::new(FreqEstimatorProfile::Gradual, 1000);

        for _ in 0..100 {
            fe.update_current_latency(100);
        }
        assert!(fe.freq_coeff() < 1.0);
    }
}
