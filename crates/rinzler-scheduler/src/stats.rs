//! Rolling duration samples and their median.

use std::collections::VecDeque;
use std::time::Duration;

/// Bounded FIFO of recent durations. Once full, the oldest sample is
/// dropped for every new one.
#[derive(Debug, Clone)]
pub struct RollingSamples {
    capacity: usize,
    samples: VecDeque<Duration>,
}

impl RollingSamples {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn push(&mut self, sample: Duration) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn median(&self) -> Duration {
        let values: Vec<Duration> = self.samples.iter().copied().collect();
        median(&values)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn to_vec(&self) -> Vec<Duration> {
        self.samples.iter().copied().collect()
    }
}

/// Median as the autoscaler expects it.
///
/// Even-sized samples average the two middle values. Odd-sized samples
/// take the element at `ceil(n / 2)`, one past the middle, clamped to the
/// last element so a single sample is its own median. Heat-up thresholds
/// are tuned against this upper-biased value.
pub fn median(values: &[Duration]) -> Duration {
    if values.is_empty() {
        return Duration::ZERO;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let n = sorted.len();
    let mid = n.div_ceil(2);
    if n % 2 != 0 {
        sorted[mid.min(n - 1)]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|&v| Duration::from_millis(v)).collect()
    }

    #[test]
    fn median_of_empty_is_zero() {
        assert_eq!(median(&[]), Duration::ZERO);
    }

    #[test]
    fn median_of_single_sample() {
        assert_eq!(median(&ms(&[5])), Duration::from_millis(5));
    }

    #[test]
    fn median_of_even_sample_averages_middle() {
        assert_eq!(median(&ms(&[1, 3])), Duration::from_millis(2));
        assert_eq!(median(&ms(&[4, 1, 3, 10])), Duration::from_millis(3) + Duration::from_micros(500));
    }

    #[test]
    fn median_of_odd_sample_takes_upper_middle() {
        // sorted [1, 2, 3], index ceil(3/2) = 2
        assert_eq!(median(&ms(&[3, 1, 2])), Duration::from_millis(3));
        // sorted [10, 20, 30, 40, 50], index 3
        assert_eq!(median(&ms(&[50, 10, 40, 20, 30])), Duration::from_millis(40));
    }

    #[test]
    fn rolling_samples_drop_oldest() {
        let mut samples = RollingSamples::new(3);
        for v in [1, 2, 3, 4, 5] {
            samples.push(Duration::from_millis(v));
        }
        assert_eq!(samples.len(), 3);
        assert_eq!(samples.to_vec(), ms(&[3, 4, 5]));
        assert_eq!(samples.median(), Duration::from_millis(5));
    }

    #[test]
    fn rolling_samples_zero_capacity_keeps_one() {
        let mut samples = RollingSamples::new(0);
        samples.push(Duration::from_millis(1));
        samples.push(Duration::from_millis(2));
        assert_eq!(samples.capacity(), 1);
        assert_eq!(samples.to_vec(), ms(&[2]));
    }

    #[test]
    fn empty_rolling_samples_median_is_zero() {
        let samples = RollingSamples::new(20);
        assert!(samples.is_empty());
        assert_eq!(samples.median(), Duration::ZERO);
    }
}
