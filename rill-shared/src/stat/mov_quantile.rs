use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Heap {
    Low,
    High,
}

/// Rolling quantile over a fixed-length window.
///
/// Implemented with the classic two-heap partition: `low` is a max-heap
/// holding the smallest `rank+1` live values, `high` a min-heap with the
/// rest, so the quantile is always the top of `low`. Values evicted from
/// the window are deleted lazily when they surface at a heap top.
pub struct MovQuantile {
    window: usize,
    quantile: f64,
    seq: u64,
    ring: VecDeque<(i64, u64)>,
    low: BinaryHeap<(i64, u64)>,
    high: BinaryHeap<Reverse<(i64, u64)>>,
    low_live: usize,
    high_live: usize,
    heap_of: HashMap<u64, Heap>,
    dead: HashSet<u64>,
    cached: i64,
}

impl MovQuantile {
    pub fn new(window: usize, quantile: f64) -> Self {
        assert!(window > 0, "mov quantile: window must be positive");
        assert!(
            (0.0..=1.0).contains(&quantile),
            "mov quantile: quantile must be in [0; 1]"
        );
        Self {
            window,
            quantile,
            seq: 0,
            ring: VecDeque::with_capacity(window.min(4096)),
            low: BinaryHeap::new(),
            high: BinaryHeap::new(),
            low_live: 0,
            high_live: 0,
            heap_of: HashMap::new(),
            dead: HashSet::new(),
            cached: 0,
        }
    }

    pub fn add(&mut self, value: i64) {
        self.seq += 1;
        let tag = self.seq;

        self.prune_low();
        let to_low = match self.low.peek() {
            Some(&(top, _)) => value <= top,
            None => true,
        };
        if to_low {
            self.low.push((value, tag));
            self.low_live += 1;
            self.heap_of.insert(tag, Heap::Low);
        } else {
            self.high.push(Reverse((value, tag)));
            self.high_live += 1;
            self.heap_of.insert(tag, Heap::High);
        }
        self.ring.push_back((value, tag));

        if self.ring.len() > self.window {
            let (_, old) = self.ring.pop_front().unwrap();
            match self.heap_of.remove(&old) {
                Some(Heap::Low) => self.low_live -= 1,
                Some(Heap::High) => self.high_live -= 1,
                None => unreachable!("mov quantile: evicted element not tracked"),
            }
            self.dead.insert(old);
        }

        self.rebalance();

        self.prune_low();
        self.cached = self.low.peek().map(|&(v, _)| v).unwrap_or(0);
    }

    /// Current quantile value, or 0 if no samples were added yet.
    pub fn mov_quantile(&self) -> i64 {
        self.cached
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    fn target_low(&self) -> usize {
        let n = self.low_live + self.high_live;
        if n == 0 {
            return 0;
        }
        (self.quantile * (n - 1) as f64).floor() as usize + 1
    }

    fn rebalance(&mut self) {
        let target = self.target_low();
        while self.low_live > target {
            self.prune_low();
            let (v, tag) = self.low.pop().unwrap();
            self.low_live -= 1;
            self.high.push(Reverse((v, tag)));
            self.high_live += 1;
            self.heap_of.insert(tag, Heap::High);
        }
        while self.low_live < target {
            self.prune_high();
            let Reverse((v, tag)) = self.high.pop().unwrap();
            self.high_live -= 1;
            self.low.push((v, tag));
            self.low_live += 1;
            self.heap_of.insert(tag, Heap::Low);
        }
    }

    fn prune_low(&mut self) {
        while matches!(self.low.peek(), Some(&(_, tag)) if self.dead.contains(&tag)) {
            let (_, tag) = self.low.pop().unwrap();
            self.dead.remove(&tag);
        }
    }

    fn prune_high(&mut self) {
        while matches!(self.high.peek(), Some(&Reverse((_, tag))) if self.dead.contains(&tag)) {
            let Reverse((_, tag)) = self.high.pop().unwrap();
            self.dead.remove(&tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_quantile(values: &[i64], q: f64) -> i64 {
        let mut sorted = values.to_vec();
        sorted.sort_unstable();
        sorted[(q * (sorted.len() - 1) as f64).floor() as usize]
    }

    #[test]
    fn test_median_small() {
        let mut mq = MovQuantile::new(5, 0.5);
        for v in [10, 30, 20] {
            mq.add(v);
        }
        assert_eq!(mq.mov_quantile(), 20);
    }

    #[test]
    fn test_window_slides() {
        let mut mq = MovQuantile::new(3, 0.5);
        for v in [1, 2, 3, 100, 100] {
            mq.add(v);
        }
        // window is [3, 100, 100]
        assert_eq!(mq.mov_quantile(), 100);
    }

    #[test]
    fn test_against_naive() {
        for &q in &[0.0, 0.5, 0.92, 1.0] {
            let mut mq = MovQuantile::new(7, q);
            let values: Vec<i64> = (0..200).map(|i| (i * 6113) % 97).collect();
            for (i, &v) in values.iter().enumerate() {
                mq.add(v);
                let lo = i.saturating_sub(6);
                assert_eq!(
                    mq.mov_quantile(),
                    naive_quantile(&values[lo..=i], q),
                    "q={q} i={i}"
                );
            }
        }
    }
}
