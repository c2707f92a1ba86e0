//! Tapped-delay-line fading channel.
//!
//! Every path is a windowed-sinc fractional delay filter followed by a
//! Rayleigh-distributed, time-varying gain. Gains are generated with a
//! Gaussian-weighted sum of sinusoids and updated every
//! [`GAIN_UPDATE_PERIOD`] samples. Receive antennas are correlated through
//! the Cholesky factor of an exponential correlation matrix.

use crate::channel::{ChannelInfo, ChannelModel};
use crate::config::{DelayProfile, MimoCorrelation};
use crate::error::SimError;
use linkcal_env::{Complex64, Waveform};
use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// Half length of the fractional delay interpolation filter.
pub const FILTER_HALF_LENGTH: usize = 4;

/// Sinusoids per Doppler process.
const NUM_SINUSOIDS: usize = 16;

/// Samples between gain updates.
pub const GAIN_UPDATE_PERIOD: usize = 64;

/// One Doppler process (single path, single antenna).
#[derive(Debug, Clone)]
struct DopplerProcess {
    amplitudes: [Complex64; NUM_SINUSOIDS],
    frequencies: [f64; NUM_SINUSOIDS],
    phases: [f64; NUM_SINUSOIDS],
}

impl DopplerProcess {
    fn draw(rng: &mut ChaCha8Rng, max_doppler_hz: f64) -> Self {
        let mut amplitudes = [Complex64::new(0.0, 0.0); NUM_SINUSOIDS];
        let mut frequencies = [0.0; NUM_SINUSOIDS];
        let mut phases = [0.0; NUM_SINUSOIDS];

        for n in 0..NUM_SINUSOIDS {
            let re: f64 = rng.sample(StandardNormal);
            let im: f64 = rng.sample(StandardNormal);
            amplitudes[n] = Complex64::new(re, im) * FRAC_1_SQRT_2;

            // Angle of arrival uniform over the circle
            let alpha = rng.gen::<f64>() * 2.0 * PI - PI;
            frequencies[n] = max_doppler_hz * alpha.cos();
            phases[n] = rng.gen::<f64>() * 2.0 * PI;
        }

        Self {
            amplitudes,
            frequencies,
            phases,
        }
    }

    /// Unit-power complex gain at time `t`.
    fn gain(&self, t: f64) -> Complex64 {
        let sum: Complex64 = (0..NUM_SINUSOIDS)
            .map(|n| {
                let psi = 2.0 * PI * self.frequencies[n] * t + self.phases[n];
                self.amplitudes[n] * Complex64::new(psi.cos(), psi.sin())
            })
            .sum();
        sum / (NUM_SINUSOIDS as f64).sqrt()
    }
}

/// A delay path after discretization.
#[derive(Debug, Clone)]
struct Path {
    /// Interpolation filter, `max_delay + 1` coefficients
    filter: Vec<f64>,
    /// Linear amplitude after power normalization
    amplitude: f64,
}

/// Multi-tap fading channel.
#[derive(Debug, Clone)]
pub struct FadingChannel {
    profile: DelayProfile,
    sample_rate_hz: f64,
    num_rx: usize,
    paths: Vec<Path>,
    /// Lower Cholesky factor of the receive correlation matrix
    correlation: DMatrix<f64>,
    max_delay: usize,
    seed: u64,
    rng: ChaCha8Rng,
}

impl FadingChannel {
    pub fn new(
        profile: DelayProfile,
        correlation: MimoCorrelation,
        num_rx: usize,
        sample_rate_hz: f64,
        seed: u64,
    ) -> Result<Self, SimError> {
        if num_rx == 0 {
            return Err(SimError::invalid("num_rx_antennas", 0, "must be positive"));
        }
        if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
            return Err(SimError::invalid(
                "sample_rate_hz",
                sample_rate_hz,
                "must be positive",
            ));
        }

        let max_delay =
            (profile.max_delay_s() * sample_rate_hz).ceil() as usize + 2 * FILTER_HALF_LENGTH;

        let total_power: f64 = profile
            .taps()
            .iter()
            .map(|(_, power_db)| 10f64.powf(power_db / 10.0))
            .sum();

        let paths = profile
            .taps()
            .iter()
            .map(|&(delay_ns, power_db)| Path {
                filter: interpolation_filter(delay_ns * 1e-9 * sample_rate_hz, max_delay),
                amplitude: (10f64.powf(power_db / 10.0) / total_power).sqrt(),
            })
            .collect();

        let correlation = correlation_factor(correlation.coefficient(), num_rx)?;

        Ok(Self {
            profile,
            sample_rate_hz,
            num_rx,
            paths,
            correlation,
            max_delay,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn profile(&self) -> DelayProfile {
        self.profile
    }
}

/// Windowed-sinc filter delaying by `FILTER_HALF_LENGTH + delay` samples.
fn interpolation_filter(delay: f64, max_delay: usize) -> Vec<f64> {
    let half = FILTER_HALF_LENGTH as f64;
    let mut filter: Vec<f64> = (0..=max_delay)
        .map(|k| {
            let t = k as f64 - half - delay;
            if t.abs() > half {
                return 0.0;
            }
            let sinc = if t.abs() < 1e-12 {
                1.0
            } else {
                (PI * t).sin() / (PI * t)
            };
            let window = 0.5 + 0.5 * (PI * t / (half + 1.0)).cos();
            sinc * window
        })
        .collect();

    let energy: f64 = filter.iter().map(|c| c * c).sum::<f64>().sqrt();
    if energy > 0.0 {
        filter.iter_mut().for_each(|c| *c /= energy);
    }
    filter
}

/// Lower Cholesky factor of `R[i][j] = alpha^((i - j)^2 / (n - 1)^2)`.
fn correlation_factor(alpha: f64, num_rx: usize) -> Result<DMatrix<f64>, SimError> {
    if num_rx == 1 || alpha == 0.0 {
        return Ok(DMatrix::identity(num_rx, num_rx));
    }
    let span = ((num_rx - 1) * (num_rx - 1)) as f64;
    let matrix = DMatrix::from_fn(num_rx, num_rx, |i, j| {
        let d = i as f64 - j as f64;
        alpha.powf(d * d / span)
    });
    matrix
        .cholesky()
        .map(|c| c.l())
        .ok_or_else(|| {
            SimError::invalid(
                "mimo_correlation",
                alpha,
                "correlation matrix is not positive definite",
            )
        })
}

impl ChannelModel for FadingChannel {
    fn apply(&mut self, input: &DVector<Complex64>) -> Waveform {
        let len = input.len();
        let num_paths = self.paths.len();
        let max_doppler = self.profile.max_doppler_hz();

        // Fresh realization per call
        let mut processes: Vec<Vec<DopplerProcess>> = Vec::with_capacity(num_paths);
        for _ in 0..num_paths {
            let mut per_antenna = Vec::with_capacity(self.num_rx);
            for _ in 0..self.num_rx {
                per_antenna.push(DopplerProcess::draw(&mut self.rng, max_doppler));
            }
            processes.push(per_antenna);
        }

        let filtered: Vec<Vec<Complex64>> = self
            .paths
            .iter()
            .map(|path| {
                (0..len)
                    .map(|n| {
                        path.filter
                            .iter()
                            .enumerate()
                            .take(n + 1)
                            .map(|(k, &c)| input[n - k] * c)
                            .sum()
                    })
                    .collect()
            })
            .collect();

        let rx_norm = (self.num_rx as f64).sqrt();
        let mut output = Waveform::zeros(len, self.num_rx);

        for block_start in (0..len).step_by(GAIN_UPDATE_PERIOD) {
            let t = block_start as f64 / self.sample_rate_hz;
            let block_end = (block_start + GAIN_UPDATE_PERIOD).min(len);

            for (p, path) in self.paths.iter().enumerate() {
                let white = DVector::from_iterator(
                    self.num_rx,
                    processes[p].iter().map(|process| process.gain(t)),
                );
                let gains = self.correlation.map(|v| Complex64::new(v, 0.0)) * white;

                for rx in 0..self.num_rx {
                    let gain = gains[rx] * path.amplitude / rx_norm;
                    for n in block_start..block_end {
                        output[(n, rx)] += filtered[p][n] * gain;
                    }
                }
            }
        }

        output
    }

    fn info(&self) -> ChannelInfo {
        ChannelInfo {
            filter_delay: FILTER_HALF_LENGTH,
            max_delay: self.max_delay,
            normalization: self.num_rx as f64,
        }
    }

    fn num_receive_antennas(&self) -> usize {
        self.num_rx
    }

    fn reset(&mut self) {
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
    }

    fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn noise_like(len: usize, seed: u64) -> DVector<Complex64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        DVector::from_fn(len, |_, _| {
            let re: f64 = rng.sample(StandardNormal);
            let im: f64 = rng.sample(StandardNormal);
            Complex64::new(re, im) * FRAC_1_SQRT_2
        })
    }

    #[test]
    fn test_integer_delay_filter_is_impulse() {
        let filter = interpolation_filter(2.0, 16);
        assert_abs_diff_eq!(filter[FILTER_HALF_LENGTH + 2], 1.0, epsilon = 1e-12);
        let others: f64 = filter
            .iter()
            .enumerate()
            .filter(|(k, _)| *k != FILTER_HALF_LENGTH + 2)
            .map(|(_, c)| c.abs())
            .sum();
        assert_abs_diff_eq!(others, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_correlation_factor_reproduces_matrix() {
        let l = correlation_factor(0.9, 4).unwrap();
        let r = &l * l.transpose();
        for i in 0..4 {
            assert_abs_diff_eq!(r[(i, i)], 1.0, epsilon = 1e-9);
        }
        assert_abs_diff_eq!(r[(0, 3)], 0.9, epsilon = 1e-9);
    }

    #[test]
    fn test_info_reports_delays() {
        let channel =
            FadingChannel::new(DelayProfile::Tdlc300, MimoCorrelation::Low, 2, 30.72e6, 1)
                .unwrap();
        let info = channel.info();
        assert_eq!(info.filter_delay, FILTER_HALF_LENGTH);
        // 2595 ns at 30.72 MHz is 79.7 samples
        assert_eq!(info.max_delay, 80 + 2 * FILTER_HALF_LENGTH);
        assert_eq!(info.normalization, 2.0);
    }

    #[test]
    fn test_reset_reproduces_realization() {
        let input = noise_like(256, 3);
        let mut channel =
            FadingChannel::new(DelayProfile::Tdla30, MimoCorrelation::Medium, 2, 1.92e6, 42)
                .unwrap();

        let first = channel.apply(&input);
        let second = channel.apply(&input);
        assert_ne!(first, second);

        channel.reset();
        assert_eq!(channel.apply(&input), first);
    }

    #[test]
    fn test_average_power_per_antenna() {
        let input = noise_like(1024, 7);
        let num_rx = 2;
        let mut channel = FadingChannel::new(
            DelayProfile::Tdlb100,
            MimoCorrelation::Low,
            num_rx,
            7.68e6,
            11,
        )
        .unwrap();
        let skip = channel.info().max_delay;

        let input_power: f64 =
            input.iter().skip(skip).map(|s| s.norm_sqr()).sum::<f64>() / (1024 - skip) as f64;

        let realizations = 300;
        let mut total = 0.0;
        for _ in 0..realizations {
            let output = channel.apply(&input);
            for rx in 0..num_rx {
                total += output
                    .column(rx)
                    .iter()
                    .skip(skip)
                    .map(|s| s.norm_sqr())
                    .sum::<f64>()
                    / (1024 - skip) as f64;
            }
        }
        // Each antenna carries 1/num_rx of the input power on average
        let per_antenna = total / (realizations * num_rx) as f64;
        assert_abs_diff_eq!(per_antenna * num_rx as f64, input_power, epsilon = 0.15);
    }
}
