use crate::latency_config::LatencyTunerProfile;
use shared::stat::{MovAggregate, MovQuantile};
use shared::time::Nanos;

/// Jitter meter parameters.
///
/// Mean jitter is a moving average over the last `jitter_window` packets.
///
/// Peak jitter is derived in several steps:
///
///  1. A jitter envelope is computed from a short smoothing window
///     (`envelope_smoothing_window_len`) and a leaky peak detector
///     (`envelope_resistance_exponent`, `envelope_resistance_coeff`).
///  2. A moving quantile of the envelope cuts recurring spikes above the
///     quantile line (`peak_quantile_window`, `peak_quantile_coeff`).
///  3. A moving maximum of the quantile over `jitter_window` samples is
///     the resulting peak jitter.
#[derive(Debug, Clone, Copy)]
pub struct JitterMeterConfig {
    /// Number of packets for long-term sliding statistics.
    pub jitter_window: usize,

    /// Number of packets in the small smoothing window feeding the
    /// peak detector.
    pub envelope_smoothing_window_len: usize,

    /// Exponent of the capacitor discharge resistance. Discharge
    /// resistance is `(peak / avg) ^ exponent * coeff`.
    pub envelope_resistance_exponent: f64,

    /// Linear coefficient of the capacitor discharge resistance.
    /// Zero means deduce from the latency profile.
    pub envelope_resistance_coeff: f64,

    /// Number of packets for the envelope quantile window.
    pub peak_quantile_window: usize,

    /// Envelope quantile coefficient in [0; 1], e.g. 0.92 draws the line
    /// above 92% of envelope values.
    pub peak_quantile_coeff: f64,
}

impl Default for JitterMeterConfig {
    fn default() -> Self {
        Self {
            jitter_window: 50_000,
            envelope_smoothing_window_len: 10,
            envelope_resistance_exponent: 6.0,
            envelope_resistance_coeff: 0.0,
            peak_quantile_window: 10_000,
            peak_quantile_coeff: 0.92,
        }
    }
}

impl JitterMeterConfig {
    /// Fill zero-valued settings from the latency tuner profile.
    pub fn deduce_defaults(&mut self, latency_profile: LatencyTunerProfile) {
        if self.envelope_resistance_coeff == 0.0 {
            self.envelope_resistance_coeff =
                if latency_profile == LatencyTunerProfile::Responsive {
                    0.07
                } else {
                    0.10
                };
        }
    }
}

/// Jitter metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct JitterMetrics {
    /// Moving average of the jitter.
    pub mean_jitter: Nanos,

    /// Moving peak value of the jitter. Similar to a moving maximum,
    /// but excludes short rare spikes that are considered harmless.
    pub peak_jitter: Nanos,

    /// Last jitter value.
    pub curr_jitter: Nanos,

    /// Last jitter envelope value.
    pub curr_envelope: Nanos,
}

/// Jitter metrics calculator.
pub struct JitterMeter {
    config: JitterMeterConfig,
    metrics: JitterMetrics,

    jitter_window: MovAggregate,
    smooth_jitter_window: MovAggregate,
    envelope_window: MovQuantile,
    peak_window: MovAggregate,

    capacitor_charge: Nanos,
    capacitor_discharge_resistance: f64,
    capacitor_discharge_iteration: f64,
}

impl JitterMeter {
    pub fn new(config: JitterMeterConfig) -> Self {
        Self {
            config,
            metrics: JitterMetrics::default(),
            jitter_window: MovAggregate::new(config.jitter_window),
            smooth_jitter_window: MovAggregate::new(config.envelope_smoothing_window_len),
            envelope_window: MovQuantile::new(
                config.peak_quantile_window,
                config.peak_quantile_coeff,
            ),
            peak_window: MovAggregate::new(config.jitter_window),
            capacitor_charge: 0,
            capacitor_discharge_resistance: 0.0,
            capacitor_discharge_iteration: 0.0,
        }
    }

    pub fn metrics(&self) -> JitterMetrics {
        self.metrics
    }

    /// Update metrics with the jitter value of a newly received packet.
    pub fn update_jitter(&mut self, jitter: Nanos) {
        // Moving average of jitter.
        self.jitter_window.add(jitter);

        // Envelope is computed from smoothed jitter and a leaky peak
        // detector.
        self.smooth_jitter_window.add(jitter);
        let envelope = self.update_envelope(
            self.smooth_jitter_window.mov_max(),
            self.jitter_window.mov_avg(),
        );

        // Quantile of the envelope, then moving maximum of the quantile.
        self.envelope_window.add(envelope);
        self.peak_window.add(self.envelope_window.mov_quantile());

        self.metrics.mean_jitter = self.jitter_window.mov_avg();
        self.metrics.peak_jitter = self.peak_window.mov_max();
        self.metrics.curr_jitter = jitter;
        self.metrics.curr_envelope = envelope;
    }

    // Leaky peak detector ("capacitor"). The envelope must stay above
    // regular repeating spikes typical for wireless networks, while
    // ignoring occasional small outliers; without the capacitor, spikes
    // would be too thin for the quantile to see them.
    //
    // A peak re-charges the capacitor instantly; the discharge resistance
    // is proportional to how high the peak is relative to the average, so
    // abnormally high or frequent peaks keep the envelope (and hence its
    // quantile) up, while low rare peaks decay quickly.
    fn update_envelope(&mut self, cur_jitter: Nanos, avg_jitter: Nanos) -> Nanos {
        if self.capacitor_charge < cur_jitter {
            self.capacitor_charge = cur_jitter;
            self.capacitor_discharge_resistance = (cur_jitter as f64
                / avg_jitter.max(1) as f64)
                .powf(self.config.envelope_resistance_exponent)
                * self.config.envelope_resistance_coeff;
            self.capacitor_discharge_iteration = 0.0;
        } else if self.capacitor_charge > 0 {
            self.capacitor_charge = (self.capacitor_charge as f64
                * (-self.capacitor_discharge_iteration / self.capacitor_discharge_resistance)
                    .exp()) as Nanos;
            self.capacitor_discharge_iteration += 1.0;
        }

        if self.capacitor_charge < 0 {
            self.capacitor_charge = 0;
        }

        self.capacitor_charge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::time::MILLISECOND;

    fn meter() -> JitterMeter {
        let mut config = JitterMeterConfig {
            jitter_window: 1000,
            peak_quantile_window: 200,
            ..Default::default()
        };
        config.deduce_defaults(LatencyTunerProfile::Gradual);
        JitterMeter::new(config)
    }

    #[test]
    fn test_peak_not_below_mean() {
        let mut meter = meter();

        for i in 0..2000i64 {
            let jitter = MILLISECOND + (i % 7) * MILLISECOND / 10;
            meter.update_jitter(jitter);
            let metrics = meter.metrics();
            assert!(metrics.peak_jitter >= metrics.mean_jitter);
        }
    }

    #[test]
    fn test_tracks_constant_jitter() {
        let mut meter = meter();

        for _ in 0..500 {
            meter.update_jitter(2 * MILLISECOND);
        }
        let metrics = meter.metrics();
        assert_eq!(metrics.mean_jitter, 2 * MILLISECOND);
        assert_eq!(metrics.curr_jitter, 2 * MILLISECOND);
        assert_eq!(metrics.peak_jitter, 2 * MILLISECOND);
    }

    #[test]
    fn test_recurring_spikes_raise_peak() {
        let mut meter = meter();

        for i in 0..2000i64 {
            // spike every 20 packets
            let jitter = if i % 20 == 0 {
                10 * MILLISECOND
            } else {
                MILLISECOND
            };
            meter.update_jitter(jitter);
        }

        let metrics = meter.metrics();
        // peak should sit near the recurring spike level, well above mean
        assert!(metrics.peak_jitter > 5 * MILLISECOND);
        assert!(metrics.mean_jitter < 2 * MILLISECOND);
    }

    #[test]
    fn test_envelope_decays() {
        let mut meter = meter();

        meter.update_jitter(10 * MILLISECOND);
        let high = meter.metrics().curr_envelope;
        for _ in 0..100 {
            meter.update_jitter(MILLISECOND / 10);
        }
        assert!(meter.metrics().curr_envelope < high);
    }
}
