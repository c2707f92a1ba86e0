//! Zadoff-Chu PRACH generator and correlation detector.
//!
//! Waveforms are critically sampled: one sample per sequence element, so the
//! sampling rate is `L * scs` and the transform size is `L`.

use linkcal_env::types::{LONG_SEQUENCE_LENGTH, SHORT_SEQUENCE_LENGTH};
use linkcal_env::{
    Complex64, PhyError, PrachConfig, PrachDetectionResult, PrachDetector, PrachDetectorConfig,
    PrachGenerator, PreambleIndication, TxWaveform, Waveform,
};
use nalgebra::DVector;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

/// Root Zadoff-Chu sequence `x_u(n) = exp(-j pi u n (n + 1) / L)`.
pub fn zadoff_chu(root: usize, length: usize) -> Vec<Complex64> {
    let modulus = 2 * length as u64;
    (0..length as u64)
        .map(|n| {
            let k = (root as u64 * n % modulus) * (n + 1) % modulus;
            let phase = -PI * k as f64 / length as f64;
            Complex64::new(phase.cos(), phase.sin())
        })
        .collect()
}

fn check_config(config: &PrachConfig) -> Result<(), PhyError> {
    let length = config.sequence_length();
    if config.root_sequence_index == 0 || config.root_sequence_index >= length {
        return Err(PhyError::invalid(
            "root_sequence_index",
            config.root_sequence_index,
        ));
    }
    if config.cyclic_shift == 0 || config.preamble_index >= config.nof_preambles() {
        return Err(PhyError::invalid("preamble_index", config.preamble_index));
    }
    Ok(())
}

/// Generates cyclically shifted Zadoff-Chu preambles with a cyclic prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZadoffChuGenerator;

impl PrachGenerator for ZadoffChuGenerator {
    fn generate(&self, config: &PrachConfig) -> Result<TxWaveform, PhyError> {
        check_config(config)?;

        let length = config.sequence_length();
        let root = zadoff_chu(config.root_sequence_index, length);
        let shift = config.preamble_index * config.cyclic_shift;
        let cp = config.cyclic_prefix_len();
        let scale = 1.0 / (length as f64).sqrt();

        // Cyclic prefix repeats the tail of the shifted sequence
        let samples = DVector::from_fn(cp + length, |i, _| {
            let n = (i + length - cp % length) % length;
            root[(n + shift) % length] * scale
        });

        Ok(TxWaveform {
            samples,
            sample_rate_hz: config.sample_rate_hz(),
            transform_size: length,
            cyclic_prefix_len: cp,
        })
    }
}

/// Noncoherent correlation detector.
///
/// For every antenna the received sequence is correlated against the root
/// over all cyclic shifts. The detection metric of a shift is the combined
/// correlation power over the combined received energy, so noise-only
/// metrics have unit mean. Each preamble owns a window of `cyclic_shift`
/// consecutive delays; the largest metric in a window above the threshold is
/// a detection whose delay gives the time advance.
#[derive(Clone)]
pub struct CorrelationDetector {
    delay: usize,
    long_fft: Arc<dyn Fft<f64>>,
    short_fft: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for CorrelationDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationDetector")
            .field("delay", &self.delay)
            .finish()
    }
}

impl Default for CorrelationDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationDetector {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            delay: 0,
            long_fft: planner.plan_fft_forward(LONG_SEQUENCE_LENGTH),
            short_fft: planner.plan_fft_forward(SHORT_SEQUENCE_LENGTH),
        }
    }

    pub fn delay(&self) -> usize {
        self.delay
    }

    fn fft(&self, length: usize) -> &Arc<dyn Fft<f64>> {
        if length == LONG_SEQUENCE_LENGTH {
            &self.long_fft
        } else {
            &self.short_fft
        }
    }
}

impl PrachDetector for CorrelationDetector {
    fn set_delay(&mut self, delay_samples: usize) {
        self.delay = delay_samples;
    }

    fn detect(
        &self,
        received: &Waveform,
        config: &PrachDetectorConfig,
    ) -> Result<PrachDetectionResult, PhyError> {
        let prach = &config.prach;
        check_config(prach)?;

        let length = prach.sequence_length();
        let ncs = prach.cyclic_shift;
        let start = prach.cyclic_prefix_len() + self.delay;
        let num_rx = received.ncols();

        if num_rx == 0 || num_rx != config.num_rx_antennas {
            return Err(PhyError::detection(format!(
                "expected {} antennas, received {}",
                config.num_rx_antennas, num_rx
            )));
        }
        if received.nrows() < start + length {
            return Err(PhyError::detection(format!(
                "received {} samples, need {}",
                received.nrows(),
                start + length
            )));
        }

        let fft = self.fft(length);
        let mut root_freq = zadoff_chu(prach.root_sequence_index, length);
        fft.process(&mut root_freq);

        // Combined correlation power per cyclic shift
        let mut correlation = vec![0.0; length];
        let mut energy = 0.0;
        let mut buffer = vec![Complex64::new(0.0, 0.0); length];

        for rx in 0..num_rx {
            for (n, sample) in buffer.iter_mut().enumerate() {
                *sample = received[(start + n, rx)];
            }
            energy += buffer.iter().map(|s| s.norm_sqr()).sum::<f64>();

            fft.process(&mut buffer);
            for (sample, x) in buffer.iter_mut().zip(&root_freq) {
                *sample *= x.conj();
            }
            fft.process(&mut buffer);

            // g[s] = (1/L) * DFT(Y conj(X))[s]
            let norm = 1.0 / (length * length) as f64;
            for (acc, g) in correlation.iter_mut().zip(&buffer) {
                *acc += g.norm_sqr() * norm;
            }
        }

        let fs = prach.sample_rate_hz();
        let mut result = PrachDetectionResult {
            preambles: Vec::new(),
            rssi_db: 10.0 * (energy / (num_rx * length) as f64).max(1e-30).log10(),
            time_resolution_s: 1.0 / fs,
            time_advance_max_s: (ncs - 1) as f64 / fs,
        };
        if energy <= 0.0 {
            return Ok(result);
        }

        for preamble in 0..prach.nof_preambles() {
            let shift = preamble * ncs;
            let (delay, peak) = (0..ncs)
                .map(|d| (d, correlation[(shift + length - d) % length]))
                .fold((0, f64::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

            let metric = peak / energy;
            if metric <= config.threshold {
                continue;
            }

            // Per-sample signal power and residual noise
            let signal = peak / (num_rx * length * length) as f64;
            let noise = (energy / (num_rx * length) as f64 - signal).max(1e-30);
            result.preambles.push(PreambleIndication {
                preamble_index: preamble,
                time_advance_s: delay as f64 / fs,
                power_db: 10.0 * signal.max(1e-30).log10(),
                snr_db: 10.0 * (signal / noise).log10(),
            });
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use linkcal_env::{PreambleFormat, SubcarrierSpacing};

    fn config(format: PreambleFormat, ncs: usize, preamble: usize) -> PrachConfig {
        PrachConfig {
            format,
            scs: format.default_scs(),
            root_sequence_index: 1,
            cyclic_shift: ncs,
            preamble_index: preamble,
        }
    }

    fn to_waveform(tx: &TxWaveform, delay: usize) -> Waveform {
        let len = tx.len() + delay;
        Waveform::from_fn(len, 1, |n, _| {
            if n < delay {
                Complex64::new(0.0, 0.0)
            } else {
                tx.samples[n - delay]
            }
        })
    }

    #[test]
    fn test_zadoff_chu_has_unit_modulus() {
        let sequence = zadoff_chu(25, SHORT_SEQUENCE_LENGTH);
        assert!(sequence.iter().all(|x| (x.norm() - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_generated_waveform_layout() {
        let cfg = config(PreambleFormat::B4, 8, 3);
        let tx = ZadoffChuGenerator.generate(&cfg).unwrap();

        assert_eq!(tx.len(), cfg.waveform_len());
        assert_eq!(tx.transform_size, SHORT_SEQUENCE_LENGTH);
        let energy: f64 = tx
            .samples
            .iter()
            .skip(tx.cyclic_prefix_len)
            .map(|s| s.norm_sqr())
            .sum();
        assert_relative_eq!(energy, 1.0, epsilon = 1e-9);
        // Prefix is a copy of the tail
        assert_eq!(tx.samples[0], tx.samples[SHORT_SEQUENCE_LENGTH]);
    }

    #[test]
    fn test_invalid_preamble_rejected() {
        let cfg = config(PreambleFormat::F0, 419, 2);
        assert!(ZadoffChuGenerator.generate(&cfg).is_err());
    }

    #[test]
    fn test_detects_clean_preamble_with_delay() {
        let cfg = config(PreambleFormat::B4, 12, 5);
        let tx = ZadoffChuGenerator.generate(&cfg).unwrap();
        let rx = to_waveform(&tx, 3);

        let detector = CorrelationDetector::new();
        let result = detector
            .detect(
                &rx,
                &PrachDetectorConfig {
                    prach: cfg.clone(),
                    threshold: 10.0,
                    num_rx_antennas: 1,
                },
            )
            .unwrap();

        assert_eq!(result.preambles.len(), 1);
        let indication = result.find(5).unwrap();
        let fs = cfg.sample_rate_hz();
        assert_relative_eq!(indication.time_advance_s, 3.0 / fs, epsilon = 1e-12);
        assert_relative_eq!(result.time_resolution_s, 1.0 / fs);
        assert!(indication.snr_db > 30.0);
    }

    #[test]
    fn test_set_delay_compensates_offset() {
        let cfg = PrachConfig {
            scs: SubcarrierSpacing::Khz30,
            ..config(PreambleFormat::A1, 10, 0)
        };
        let tx = ZadoffChuGenerator.generate(&cfg).unwrap();
        let rx = to_waveform(&tx, 4);

        let mut detector = CorrelationDetector::new();
        detector.set_delay(4);
        assert_eq!(detector.delay(), 4);
        let result = detector
            .detect(
                &rx,
                &PrachDetectorConfig {
                    prach: cfg,
                    threshold: 10.0,
                    num_rx_antennas: 1,
                },
            )
            .unwrap();
        assert_eq!(result.find(0).unwrap().time_advance_s, 0.0);
    }

    #[test]
    fn test_short_waveform_is_detection_error() {
        let cfg = config(PreambleFormat::B4, 12, 0);
        let rx = Waveform::zeros(10, 1);
        let detector = CorrelationDetector::new();
        let err = detector
            .detect(
                &rx,
                &PrachDetectorConfig {
                    prach: cfg,
                    threshold: 10.0,
                    num_rx_antennas: 1,
                },
            )
            .unwrap_err();
        assert!(matches!(err, PhyError::Detection(_)));
    }
}
