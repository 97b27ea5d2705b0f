use std::collections::VecDeque;

/// Rolling average, minimum and maximum over a fixed-length window.
///
/// Average is maintained with a running sum; min and max with monotonic
/// deques, so every operation is O(1) amortized regardless of window length.
pub struct MovAggregate {
    window: usize,
    seq: u64,
    ring: VecDeque<i64>,
    sum: i64,
    // (value, seq), values decreasing from front to back
    max_deque: VecDeque<(i64, u64)>,
    // (value, seq), values increasing from front to back
    min_deque: VecDeque<(i64, u64)>,
}

impl MovAggregate {
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "mov aggregate: window must be positive");
        Self {
            window,
            seq: 0,
            ring: VecDeque::with_capacity(window.min(4096)),
            sum: 0,
            max_deque: VecDeque::new(),
            min_deque: VecDeque::new(),
        }
    }

    pub fn add(&mut self, value: i64) {
        self.seq += 1;

        self.ring.push_back(value);
        self.sum += value;
        if self.ring.len() > self.window {
            let old = self.ring.pop_front().unwrap();
            self.sum -= old;
        }

        while matches!(self.max_deque.back(), Some(&(v, _)) if v <= value) {
            self.max_deque.pop_back();
        }
        self.max_deque.push_back((value, self.seq));
        if matches!(self.max_deque.front(), Some(&(_, s)) if s + (self.window as u64) <= self.seq)
        {
            self.max_deque.pop_front();
        }

        while matches!(self.min_deque.back(), Some(&(v, _)) if v >= value) {
            self.min_deque.pop_back();
        }
        self.min_deque.push_back((value, self.seq));
        if matches!(self.min_deque.front(), Some(&(_, s)) if s + (self.window as u64) <= self.seq)
        {
            self.min_deque.pop_front();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn mov_avg(&self) -> i64 {
        if self.ring.is_empty() {
            return 0;
        }
        self.sum / self.ring.len() as i64
    }

    pub fn mov_max(&self) -> i64 {
        self.max_deque.front().map(|&(v, _)| v).unwrap_or(0)
    }

    pub fn mov_min(&self) -> i64 {
        self.min_deque.front().map(|&(v, _)| v).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avg_min_max() {
        let mut agg = MovAggregate::new(3);

        agg.add(10);
        agg.add(20);
        agg.add(30);
        assert_eq!(agg.mov_avg(), 20);
        assert_eq!(agg.mov_min(), 10);
        assert_eq!(agg.mov_max(), 30);

        // 10 slides out
        agg.add(40);
        assert_eq!(agg.mov_avg(), 30);
        assert_eq!(agg.mov_min(), 20);
        assert_eq!(agg.mov_max(), 40);
    }

    #[test]
    fn test_max_expires() {
        let mut agg = MovAggregate::new(2);

        agg.add(100);
        agg.add(1);
        assert_eq!(agg.mov_max(), 100);
        agg.add(2);
        assert_eq!(agg.mov_max(), 2);
        assert_eq!(agg.mov_min(), 1);
    }

    #[test]
    fn test_empty() {
        let agg = MovAggregate::new(4);
        assert!(agg.is_empty());
        assert_eq!(agg.mov_avg(), 0);
    }

    #[test]
    fn test_against_naive() {
        let mut agg = MovAggregate::new(5);
        let values: Vec<i64> = (0..100).map(|i| (i * 7919) % 251).collect();

        for (i, &v) in values.iter().enumerate() {
            agg.add(v);
            let lo = i.saturating_sub(4);
            let win = &values[lo..=i];
            assert_eq!(agg.mov_max(), *win.iter().max().unwrap());
            assert_eq!(agg.mov_min(), *win.iter().min().unwrap());
            assert_eq!(agg.mov_avg(), win.iter().sum::<i64>() / win.len() as i64);
        }
    }
}
