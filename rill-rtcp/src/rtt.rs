use shared::stat::{MovAggregate, MovQuantile};
use shared::time::Nanos;

/// Round-trip time estimation config.
#[derive(Debug, Clone, Copy)]
pub struct RttConfig {
    /// Sliding window length, in report exchanges.
    pub winlen: usize,
}

impl Default for RttConfig {
    fn default() -> Self {
        Self { winlen: 100 }
    }
}

/// Round-trip time metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct RttMetrics {
    /// Estimated offset of the remote clock relative to the local clock.
    pub clock_offset: Nanos,

    /// Estimated round-trip time (sliding median).
    pub rtt: Nanos,

    /// Latest measured round-trip time.
    pub rtt_last: Nanos,

    /// Minimum round-trip time in the window.
    pub rtt_min: Nanos,

    /// Maximum round-trip time in the window.
    pub rtt_max: Nanos,
}

/// Round-trip time estimator, created per RTP stream.
///
/// Works on the four timestamps of a report/reply exchange:
///
/// ```text
///   T1 (local_report_ts)  = local time upon report departure
///   T2 (remote_report_ts) = remote time upon report arrival
///   T3 (remote_reply_ts)  = remote time upon reply departure
///   T4 (local_reply_ts)   = local time upon reply arrival
/// ```
///
/// When we're sender: T1=LSR, T2=RRTR-DLSR, T3=RRTR, T4=RR arrival.
/// When we're receiver: T1=LRR, T2=SR-DLRR, T3=SR, T4=SR arrival.
/// That mapping is done by the reporter; the estimator itself does not
/// care which side it runs on. See RFC 3550 and RFC 5905.
pub struct RttEstimator {
    has_metrics: bool,
    metrics: RttMetrics,

    last_report_ts: Nanos,

    rtt_stats: MovQuantile,
    rtt_window: MovAggregate,
    clock_offset_stats: MovQuantile,
}

impl RttEstimator {
    pub fn new(config: RttConfig) -> Self {
        Self {
            has_metrics: false,
            metrics: RttMetrics::default(),
            last_report_ts: 0,
            rtt_stats: MovQuantile::new(config.winlen, 0.5),
            rtt_window: MovAggregate::new(config.winlen),
            clock_offset_stats: MovQuantile::new(config.winlen, 0.5),
        }
    }

    pub fn has_metrics(&self) -> bool {
        self.has_metrics
    }

    pub fn metrics(&self) -> RttMetrics {
        self.metrics
    }

    pub fn update(
        &mut self,
        local_report_ts: Nanos,
        remote_report_ts: Nanos,
        remote_reply_ts: Nanos,
        local_reply_ts: Nanos,
    ) {
        if local_report_ts > local_reply_ts || remote_report_ts > remote_reply_ts {
            // Filter out obviously incorrect reports.
            return;
        }

        if local_report_ts <= self.last_report_ts {
            // Filter out outdated reports.
            return;
        }

        // From RFC: offset = ((T2 - T1) + (T3 - T4)) / 2
        let clock_offset =
            ((remote_report_ts - local_report_ts) + (remote_reply_ts - local_reply_ts)) / 2;

        // From RFC: delay = (T4 - T1) - (T3 - T2)
        let rtt = (local_reply_ts - local_report_ts) - (remote_reply_ts - remote_report_ts);

        if rtt < 0 {
            // Filter out obviously incorrect results.
            return;
        }

        self.last_report_ts = local_report_ts;

        self.rtt_stats.add(rtt);
        self.rtt_window.add(rtt);
        self.clock_offset_stats.add(clock_offset);

        self.metrics.rtt = self.rtt_stats.mov_quantile();
        self.metrics.rtt_last = rtt;
        self.metrics.rtt_min = self.rtt_window.mov_min();
        self.metrics.rtt_max = self.rtt_window.mov_max();
        self.metrics.clock_offset = self.clock_offset_stats.mov_quantile();

        self.has_metrics = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::time::{MILLISECOND, SECOND};

    #[test]
    fn test_symmetric_path() {
        let mut est = RttEstimator::new(RttConfig::default());

        // 10ms each way, remote clock offset +1s
        let t1 = 100 * MILLISECOND;
        let t2 = t1 + 10 * MILLISECOND + SECOND;
        let t3 = t2 + 5 * MILLISECOND;
        let t4 = t1 + 25 * MILLISECOND;
        est.update(t1, t2, t3, t4);

        assert!(est.has_metrics());
        assert_eq!(est.metrics().rtt, 20 * MILLISECOND);
        assert_eq!(est.metrics().clock_offset, SECOND);
    }

    #[test]
    fn test_rejects_negative_rtt() {
        let mut est = RttEstimator::new(RttConfig::default());

        est.update(100, 200, 150, 90);
        assert!(!est.has_metrics());
    }

    #[test]
    fn test_rejects_outdated() {
        let mut est = RttEstimator::new(RttConfig::default());

        est.update(1000, 2000, 2000, 1100);
        assert!(est.has_metrics());
        let before = est.metrics().rtt;

        // same T1 again: ignored
        est.update(1000, 2000, 2000, 5000);
        assert_eq!(est.metrics().rtt, before);
    }

    #[test]
    fn test_median_rejects_outliers() {
        let mut est = RttEstimator::new(RttConfig::default());

        for i in 0..20i64 {
            let t1 = (i + 1) * 100 * MILLISECOND;
            // one wild outlier in the middle
            let delay = if i == 10 { 900 * MILLISECOND } else { 10 * MILLISECOND };
            est.update(t1, t1 + delay / 2, t1 + delay / 2, t1 + delay);
        }

        assert_eq!(est.metrics().rtt, 10 * MILLISECOND);
        assert_eq!(est.metrics().rtt_max, 900 * MILLISECOND);
    }
}
