//! SNR-indexed accumulators and their sorted merge.

use serde::{Deserialize, Serialize};

/// A record keyed by SNR.
pub trait SnrKeyed {
    fn snr_db(&self) -> f64;
}

/// Detection counters for one SNR value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SnrPoint {
    pub snr_db: f64,

    /// Occasions simulated
    pub occasions: usize,

    /// Detections (or false detections for a false-alarm test)
    pub successes: usize,

    /// Detections within the timing error tolerance
    pub perfect_successes: usize,

    /// Sum of timing errors in microseconds
    pub sum_error: f64,

    /// Sum of squared timing errors
    pub sum_sq_error: f64,
}

impl SnrPoint {
    pub fn new(snr_db: f64) -> Self {
        Self {
            snr_db,
            ..Default::default()
        }
    }

    pub fn record_failure(&mut self) {
        self.occasions += 1;
    }

    /// Records a success with the given timing error.
    pub fn record_success(&mut self, timing_error_us: f64, perfect: bool) {
        self.occasions += 1;
        self.successes += 1;
        if perfect {
            self.perfect_successes += 1;
        }
        self.sum_error += timing_error_us;
        self.sum_sq_error += timing_error_us * timing_error_us;
    }

    pub fn probability(&self) -> f64 {
        ratio(self.successes, self.occasions)
    }

    pub fn perfect_probability(&self) -> f64 {
        ratio(self.perfect_successes, self.occasions)
    }

    pub fn mean_error(&self) -> f64 {
        if self.occasions == 0 {
            0.0
        } else {
            self.sum_error / self.occasions as f64
        }
    }

    pub fn std_error(&self) -> f64 {
        let n = self.occasions as f64;
        let mean = self.mean_error();
        let variance = (self.sum_sq_error - n * mean * mean) / (n - 1.0).max(1.0);
        variance.max(0.0).sqrt()
    }
}

impl SnrKeyed for SnrPoint {
    fn snr_db(&self) -> f64 {
        self.snr_db
    }
}

/// Decoding counters for one SNR value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlerPoint {
    pub snr_db: f64,

    /// Slots simulated, retransmissions included
    pub transmissions: usize,

    /// Transmissions carrying a new transport block
    pub new_blocks: usize,

    /// Transmissions whose block passed the CRC
    pub successes: usize,

    /// Information bits delivered
    pub decoded_bits: usize,

    /// Transport block size
    pub tbs: usize,

    /// Decoder iterations summed over all transmissions
    pub decoder_iterations: u64,
}

impl BlerPoint {
    pub fn new(snr_db: f64, tbs: usize) -> Self {
        Self {
            snr_db,
            tbs,
            ..Default::default()
        }
    }

    pub fn failures(&self) -> usize {
        self.transmissions - self.successes
    }

    /// Block error rate per transmission.
    pub fn bler(&self) -> f64 {
        ratio(self.failures(), self.transmissions)
    }

    /// Delivered bits over the bits an error-free link would deliver.
    pub fn throughput(&self) -> f64 {
        ratio(self.decoded_bits, self.transmissions * self.tbs)
    }

    pub fn mean_iterations(&self) -> f64 {
        if self.transmissions == 0 {
            0.0
        } else {
            self.decoder_iterations as f64 / self.transmissions as f64
        }
    }
}

impl SnrKeyed for BlerPoint {
    fn snr_db(&self) -> f64 {
        self.snr_db
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Points sorted by ascending SNR, at most one per SNR value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnrResults<P> {
    points: Vec<P>,
}

impl<P> Default for SnrResults<P> {
    fn default() -> Self {
        Self { points: Vec::new() }
    }
}

impl<P: SnrKeyed> SnrResults<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `points`, replacing any stored point with the same SNR.
    pub fn merge(&mut self, points: Vec<P>) {
        for point in points {
            let snr = point.snr_db();
            match self
                .points
                .binary_search_by(|p| p.snr_db().total_cmp(&snr))
            {
                Ok(i) => self.points[i] = point,
                Err(i) => self.points.insert(i, point),
            }
        }
    }

    pub fn get(&self, snr_db: f64) -> Option<&P> {
        self.points
            .binary_search_by(|p| p.snr_db().total_cmp(&snr_db))
            .ok()
            .map(|i| &self.points[i])
    }

    pub fn points(&self) -> &[P] {
        &self.points
    }

    pub fn snr_values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.snr_db()).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

/// Sorts SNR values and drops duplicates.
pub fn dedup_snr(snr_values: &[f64]) -> Vec<f64> {
    let mut values = snr_values.to_vec();
    values.sort_by(|a, b| a.total_cmp(b));
    values.dedup_by(|a, b| a.total_cmp(b).is_eq());
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn point(snr_db: f64, occasions: usize) -> SnrPoint {
        SnrPoint {
            occasions,
            ..SnrPoint::new(snr_db)
        }
    }

    #[test]
    fn test_merge_overwrites_same_snr() {
        let mut results = SnrResults::new();
        results.merge(vec![point(5.0, 100)]);
        results.merge(vec![point(5.0, 30)]);

        assert_eq!(results.len(), 1);
        assert_eq!(results.get(5.0).unwrap().occasions, 30);
    }

    #[test]
    fn test_merge_keeps_sorted() {
        let mut results = SnrResults::new();
        results.merge(vec![point(7.0, 1)]);
        results.merge(vec![point(-3.0, 1), point(5.0, 1)]);
        assert_eq!(results.snr_values(), vec![-3.0, 5.0, 7.0]);
        assert!(results.get(6.0).is_none());
    }

    #[test]
    fn test_derived_metrics() {
        let mut p = SnrPoint::new(0.0);
        p.record_success(1.0, true);
        p.record_success(3.0, false);
        p.record_failure();
        p.record_failure();

        assert_relative_eq!(p.probability(), 0.5);
        assert_relative_eq!(p.perfect_probability(), 0.25);
        assert_relative_eq!(p.mean_error(), 1.0);
        // (10 - 4 * 1) / 3
        assert_relative_eq!(p.std_error(), 2f64.sqrt());
    }

    #[test]
    fn test_empty_point_metrics_are_zero() {
        let p = SnrPoint::new(1.0);
        assert_eq!(p.probability(), 0.0);
        assert_eq!(p.mean_error(), 0.0);
        assert_eq!(p.std_error(), 0.0);
        assert_eq!(BlerPoint::new(1.0, 100).bler(), 0.0);
    }

    #[test]
    fn test_bler_and_throughput() {
        let p = BlerPoint {
            transmissions: 10,
            new_blocks: 6,
            successes: 5,
            decoded_bits: 5 * 512,
            ..BlerPoint::new(2.0, 512)
        };
        assert_relative_eq!(p.bler(), 0.5);
        assert_relative_eq!(p.throughput(), 0.5);
    }

    #[test]
    fn test_dedup_snr() {
        assert_eq!(dedup_snr(&[3.0, -1.0, 3.0, 0.0]), vec![-1.0, 0.0, 3.0]);
    }

    proptest! {
        #[test]
        fn prop_merge_order_independent(
            snrs in prop::collection::vec(-20i32..20, 1..30),
        ) {
            let points: Vec<SnrPoint> = snrs.iter().map(|&s| point(s as f64, 1)).collect();

            let mut forward = SnrResults::new();
            for p in points.iter().cloned() {
                forward.merge(vec![p]);
            }
            let mut backward = SnrResults::new();
            for p in points.iter().rev().cloned() {
                backward.merge(vec![p]);
            }

            prop_assert_eq!(forward.snr_values(), backward.snr_values());
            let values = forward.snr_values();
            prop_assert!(values.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(values, dedup_snr(&snrs.iter().map(|&s| s as f64).collect::<Vec<_>>()));
        }
    }
}
