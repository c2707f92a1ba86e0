//! Detection threshold search.
//!
//! Finds the threshold whose measured false-alarm probability falls in
//! `[acceptance * target, target]`. The false-alarm probability does not
//! increase with the threshold, so the search keeps a bracket
//! `[lower, upper]` with `F(lower) > 0 >= F(upper)`, where
//! `F(t) = pfa(t) - target`.
//!
//! Two phases:
//! 1. **Bootstrap**: bisection with a reduced trial budget until a threshold
//!    with a false-alarm probability above target is found.
//! 2. **Refinement**: Anderson-Bjorck regula falsi on the full budget.
//!
//! Thresholds are rounded to `digits` decimals. The bracket shrinks on every
//! evaluation and the iteration count is capped, so the search terminates.

use crate::error::SimError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Threshold search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub target_pfa: f64,

    /// Trials per refinement evaluation
    pub trials: usize,

    /// Bootstrap evaluations use `trials / bootstrap_divisor` trials
    pub bootstrap_divisor: usize,

    pub lower_bound: f64,

    pub upper_bound: f64,

    /// Decimal digits kept in every threshold
    pub digits: u32,

    pub max_iterations: usize,

    /// Lower edge of the acceptance band as a fraction of the target
    pub acceptance: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            target_pfa: 1e-3,
            trials: 10_000,
            bootstrap_divisor: 10,
            lower_bound: 0.0,
            upper_bound: 40.0,
            digits: 3,
            max_iterations: 60,
            acceptance: 0.9,
        }
    }
}

impl SearchConfig {
    pub fn with_target(mut self, target_pfa: f64) -> Self {
        self.target_pfa = target_pfa;
        self
    }

    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower_bound = lower;
        self.upper_bound = upper;
        self
    }

    fn resolution(&self) -> f64 {
        10f64.powi(-(self.digits as i32))
    }

    fn round(&self, value: f64) -> f64 {
        let scale = 10f64.powi(self.digits as i32);
        (value * scale).round() / scale
    }
}

/// Measures the false-alarm probability at a threshold.
pub trait FalseAlarmProbe {
    fn false_alarm_probability(&mut self, threshold: f64, trials: usize)
        -> Result<f64, SimError>;
}

impl<F> FalseAlarmProbe for F
where
    F: FnMut(f64, usize) -> Result<f64, SimError>,
{
    fn false_alarm_probability(
        &mut self,
        threshold: f64,
        trials: usize,
    ) -> Result<f64, SimError> {
        self(threshold, trials)
    }
}

/// Search outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEstimate {
    pub threshold: f64,

    /// Measured false-alarm probability at `threshold`
    pub false_alarm_probability: f64,

    /// True if the measurement lies in the acceptance band
    pub converged: bool,

    /// Refinement evaluations
    pub iterations: usize,

    /// All probe evaluations, bootstrap included
    pub evaluations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Lower,
    Upper,
}

/// Anderson-Bjorck threshold search.
#[derive(Debug, Clone)]
pub struct ThresholdSearch {
    config: SearchConfig,
}

impl ThresholdSearch {
    pub fn new(config: SearchConfig) -> Result<Self, SimError> {
        if config.trials == 0 {
            return Err(SimError::invalid("trials", 0, "must be positive"));
        }
        if config.bootstrap_divisor == 0 {
            return Err(SimError::invalid("bootstrap_divisor", 0, "must be positive"));
        }
        if !(config.target_pfa > 0.0 && config.target_pfa < 1.0) {
            return Err(SimError::invalid(
                "target_pfa",
                config.target_pfa,
                "must be in (0, 1)",
            ));
        }
        if !(config.acceptance > 0.0 && config.acceptance < 1.0) {
            return Err(SimError::invalid(
                "acceptance",
                config.acceptance,
                "must be in (0, 1)",
            ));
        }
        if !(config.lower_bound.is_finite()
            && config.upper_bound.is_finite()
            && config.upper_bound - config.lower_bound > config.resolution())
        {
            return Err(SimError::invalid(
                "upper_bound",
                config.upper_bound,
                format!("must exceed lower bound {}", config.lower_bound),
            ));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Runs the search against `probe`.
    pub fn run<P: FalseAlarmProbe + ?Sized>(
        &self,
        probe: &mut P,
    ) -> Result<ThresholdEstimate, SimError> {
        let cfg = &self.config;
        let target = cfg.target_pfa;
        let band = (1.0 - cfg.acceptance) * target;
        let resolution = cfg.resolution();
        let quick_trials = (cfg.trials / cfg.bootstrap_divisor).max(1);
        let mut evaluations = 0;

        let mut evaluate = |t: f64,
                            trials: usize,
                            evaluations: &mut usize|
         -> Result<f64, SimError> {
            let pfa = probe.false_alarm_probability(t, trials)?;
            *evaluations += 1;
            if !pfa.is_finite() {
                return Err(SimError::NonFinite(format!(
                    "false-alarm probability at threshold {}",
                    t
                )));
            }
            debug!("PFA({:.3}) = {:.6} over {} trials", t, pfa, trials);
            Ok(pfa - target)
        };

        let mut lo = cfg.round(cfg.lower_bound);
        let mut hi = cfg.round(cfg.upper_bound);

        // Bootstrap
        let mut f_hi = evaluate(hi, quick_trials, &mut evaluations)?;
        // Undamped measurement at the upper bound
        let mut pfa_hi = f_hi + target;
        if f_hi > 0.0 {
            return Err(SimError::invalid(
                "upper_bound",
                hi,
                format!("false-alarm probability {} already above target", f_hi + target),
            ));
        }
        let mut f_lo = loop {
            let mid = cfg.round(0.5 * (lo + hi));
            if mid <= lo || mid >= hi {
                return Ok(self.terminate(hi, pfa_hi, 0, evaluations));
            }
            let f = evaluate(mid, quick_trials, &mut evaluations)?;
            if f > 0.0 {
                lo = mid;
                break f;
            }
            hi = mid;
            f_hi = f;
            pfa_hi = f + target;
        };
        debug!("Bootstrap bracket [{:.3}, {:.3}]", lo, hi);

        // Refinement
        let mut last_side: Option<Side> = None;
        let mut previous = f64::NAN;
        let mut iterations = 0;

        while iterations < cfg.max_iterations {
            if hi - lo <= resolution + f64::EPSILON {
                return Ok(self.terminate(hi, pfa_hi, iterations, evaluations));
            }
            let mid = 0.5 * (lo + hi);

            let mut t = cfg.round((lo * f_hi - hi * f_lo) / (f_hi - f_lo));
            if t == previous {
                let step = (mid - t) / 4.0;
                if step.abs() < resolution {
                    return Ok(self.terminate(hi, pfa_hi, iterations, evaluations));
                }
                t = cfg.round(t + step);
            }
            if !(t > lo && t < hi) {
                t = cfg.round(mid);
            }
            if !(t > lo && t < hi) {
                return Ok(self.terminate(hi, pfa_hi, iterations, evaluations));
            }

            let f = evaluate(t, cfg.trials, &mut evaluations)?;
            iterations += 1;
            previous = t;

            if (-band..=0.0).contains(&f) {
                info!(
                    "Threshold {:.3} converged: PFA {:.6} after {} iterations",
                    t,
                    f + target,
                    iterations
                );
                return Ok(ThresholdEstimate {
                    threshold: t,
                    false_alarm_probability: f + target,
                    converged: true,
                    iterations,
                    evaluations,
                });
            }

            if f > 0.0 {
                if last_side == Some(Side::Lower) {
                    f_hi *= (1.0 - f / f_lo).max(0.5);
                }
                lo = t;
                f_lo = f;
                last_side = Some(Side::Lower);
            } else {
                if last_side == Some(Side::Upper) {
                    f_lo *= (1.0 - f / f_hi).max(0.5);
                }
                hi = t;
                f_hi = f;
                pfa_hi = f + target;
                last_side = Some(Side::Upper);
            }
        }

        Ok(self.terminate(hi, pfa_hi, iterations, evaluations))
    }

    fn terminate(
        &self,
        threshold: f64,
        false_alarm_probability: f64,
        iterations: usize,
        evaluations: usize,
    ) -> ThresholdEstimate {
        debug!(
            "Threshold search stopped at {:.3} without reaching the acceptance band",
            threshold
        );
        ThresholdEstimate {
            threshold,
            false_alarm_probability,
            converged: false,
            iterations,
            evaluations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn search(target: f64) -> ThresholdSearch {
        ThresholdSearch::new(
            SearchConfig::default()
                .with_target(target)
                .with_bounds(0.0, 20.0),
        )
        .unwrap()
    }

    #[test]
    fn test_converges_on_exponential_tail() {
        let mut probe = |t: f64, _trials: usize| -> Result<f64, SimError> { Ok((-t).exp()) };
        let estimate = search(1e-3).run(&mut probe).unwrap();

        assert!(estimate.converged);
        assert!(estimate.iterations <= 30);
        assert!(estimate.false_alarm_probability <= 1e-3);
        assert!(estimate.false_alarm_probability >= 0.9e-3);
        assert_relative_eq!(estimate.threshold, 6.95, epsilon = 0.07);
    }

    #[test]
    fn test_threshold_is_rounded() {
        let mut probe =
            |t: f64, _trials: usize| -> Result<f64, SimError> { Ok(1.0 / (1.0 + t * t)) };
        let estimate = search(0.01).run(&mut probe).unwrap();
        assert!(estimate.converged);
        let scaled = estimate.threshold * 1000.0;
        assert_relative_eq!(scaled, scaled.round(), epsilon = 1e-6);
    }

    #[test]
    fn test_bootstrap_uses_reduced_trials() {
        let mut calls = Vec::new();
        let mut probe = |t: f64, trials: usize| -> Result<f64, SimError> {
            calls.push(trials);
            Ok((-t).exp())
        };
        search(1e-3).run(&mut probe).unwrap();

        // Upper bound, 10.0, then 5.0 crosses the target
        assert_eq!(&calls[..3], &[1000, 1000, 1000]);
        assert!(calls[3..].iter().all(|&trials| trials == 10_000));
    }

    #[test]
    fn test_unreachable_band_terminates() {
        // Step response: PFA jumps from 0.5 to 0 at 3.2
        let mut probe = |t: f64, _trials: usize| -> Result<f64, SimError> {
            Ok(if t < 3.2 { 0.5 } else { 0.0 })
        };
        let estimate = search(0.01).run(&mut probe).unwrap();

        assert!(!estimate.converged);
        assert!(estimate.iterations <= 60);
        assert!(estimate.threshold >= 3.2);
        assert_eq!(estimate.false_alarm_probability, 0.0);
    }

    #[test]
    fn test_noisy_probe_terminates() {
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let mut probe = |t: f64, trials: usize| -> Result<f64, SimError> {
            let p = (-t).exp();
            let hits = (0..trials).filter(|_| rng.gen::<f64>() < p).count();
            Ok(hits as f64 / trials as f64)
        };
        let estimate = search(0.01).run(&mut probe).unwrap();

        assert!(estimate.iterations <= 60);
        assert!(estimate.threshold > 0.0 && estimate.threshold <= 20.0);
        if estimate.converged {
            assert!(estimate.false_alarm_probability <= 0.01);
            assert!(estimate.false_alarm_probability >= 0.009);
        }
    }

    #[test]
    fn test_upper_bound_too_low_rejected() {
        let mut probe = |_t: f64, _trials: usize| -> Result<f64, SimError> { Ok(0.5) };
        let err = search(1e-3).run(&mut probe).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_invalid_search_config() {
        assert!(ThresholdSearch::new(SearchConfig::default().with_trials(0)).is_err());
        assert!(ThresholdSearch::new(SearchConfig::default().with_target(1.5)).is_err());
        assert!(ThresholdSearch::new(SearchConfig::default().with_bounds(5.0, 5.0)).is_err());
    }

    #[test]
    fn test_probe_errors_propagate() {
        let mut probe = |_t: f64, _trials: usize| -> Result<f64, SimError> {
            Err(SimError::Unconfigured)
        };
        assert_eq!(search(1e-3).run(&mut probe).unwrap_err(), SimError::Unconfigured);
    }
}
