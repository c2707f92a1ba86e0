//! Transmission impairments applied around the channel: timing offset and
//! tail padding, additive white Gaussian noise, carrier frequency offset.

use crate::error::SimError;
use linkcal_env::{Complex64, Waveform};
use nalgebra::DVector;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

/// Prepends `offset` zeros and appends `padding` zeros.
pub fn delay_and_pad(
    samples: &DVector<Complex64>,
    offset: usize,
    padding: usize,
) -> DVector<Complex64> {
    let zero = Complex64::new(0.0, 0.0);
    let len = offset + samples.len() + padding;
    DVector::from_fn(len, |n, _| {
        if n < offset || n >= offset + samples.len() {
            zero
        } else {
            samples[n - offset]
        }
    })
}

/// Per-resource-element noise variance for a linear SNR.
pub fn noise_variance_per_re(snr_db: f64, normalization: f64) -> Result<f64, SimError> {
    let snr = 10f64.powf(snr_db / 10.0);
    let variance = 1.0 / (snr * normalization);
    if variance.is_finite() && variance > 0.0 {
        Ok(variance)
    } else {
        Err(SimError::NonFinite(format!(
            "noise variance {} at {} dB (normalization {})",
            variance, snr_db, normalization
        )))
    }
}

/// Adds complex Gaussian noise to every antenna.
///
/// The time-domain variance is the per-resource-element variance divided by
/// `transform_size`, which holds the per-antenna, per-RE SNR at `snr_db`.
/// Returns the per-RE noise variance.
pub fn add_awgn<R: Rng + ?Sized>(
    waveform: &mut Waveform,
    snr_db: f64,
    transform_size: usize,
    normalization: f64,
    rng: &mut R,
) -> Result<f64, SimError> {
    let variance_re = noise_variance_per_re(snr_db, normalization)?;
    let variance = variance_re / transform_size.max(1) as f64;

    let normal = Normal::new(0.0, (variance / 2.0).sqrt())
        .map_err(|e| SimError::NonFinite(format!("noise deviation: {}", e)))?;

    for sample in waveform.iter_mut() {
        *sample += Complex64::new(normal.sample(rng), normal.sample(rng));
    }
    Ok(variance_re)
}

/// Rotates every sample by `exp(j 2 pi f n / fs)`.
pub fn apply_frequency_offset(waveform: &mut Waveform, offset_hz: f64, sample_rate_hz: f64) {
    if offset_hz == 0.0 {
        return;
    }
    let step = 2.0 * PI * offset_hz / sample_rate_hz;
    for (n, mut row) in waveform.row_iter_mut().enumerate() {
        let phase = step * n as f64;
        let rotation = Complex64::new(phase.cos(), phase.sin());
        for sample in row.iter_mut() {
            *sample *= rotation;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_delay_and_pad() {
        let samples = DVector::from_element(3, Complex64::new(1.0, 0.0));
        let out = delay_and_pad(&samples, 2, 4);
        assert_eq!(out.len(), 9);
        assert_eq!(out[1], Complex64::new(0.0, 0.0));
        assert_eq!(out[2], Complex64::new(1.0, 0.0));
        assert_eq!(out[4], Complex64::new(1.0, 0.0));
        assert_eq!(out[5], Complex64::new(0.0, 0.0));
    }

    #[test]
    fn test_noise_power_matches_snr() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut waveform = Waveform::zeros(50_000, 2);
        let variance_re = add_awgn(&mut waveform, 10.0, 64, 2.0, &mut rng).unwrap();

        assert_relative_eq!(variance_re, 0.05, max_relative = 1e-12);
        let measured = waveform.iter().map(|s| s.norm_sqr()).sum::<f64>() / 100_000.0;
        assert_relative_eq!(measured, 0.05 / 64.0, max_relative = 0.03);
    }

    #[test]
    fn test_non_finite_snr_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut waveform = Waveform::zeros(4, 1);
        let err = add_awgn(&mut waveform, f64::INFINITY, 16, 1.0, &mut rng).unwrap_err();
        assert!(matches!(err, SimError::NonFinite(_)));
    }

    #[test]
    fn test_frequency_offset_preserves_power() {
        let mut waveform = Waveform::from_element(16, 2, Complex64::new(1.0, 0.0));
        apply_frequency_offset(&mut waveform, 1000.0, 16_000.0);
        // Quarter turn after four samples
        assert_relative_eq!(waveform[(4, 1)].im, 1.0, epsilon = 1e-12);
        assert!(waveform.iter().all(|s| (s.norm() - 1.0).abs() < 1e-12));
    }
}
