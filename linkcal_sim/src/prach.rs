//! PRACH detection engine.
//!
//! Runs Monte-Carlo detection or false-alarm trials over a list of SNR
//! values. Every trial builds the preamble, shifts it by a cyclically
//! advancing timing offset, passes it through the channel, adds noise and
//! carrier offset and hands the result to the detector collaborator.

use crate::context::SeedSequence;
use crate::reference::{CorrelationDetector, ZadoffChuGenerator};
use linkcal_core::impairments::{add_awgn, apply_frequency_offset, delay_and_pad};
use linkcal_core::results::dedup_snr;
use linkcal_core::{
    Channel, ChannelKind, ChannelModel, Lifecycle, LifecycleState, MimoCorrelation,
    PrachSimConfig, PrachTestType, SimError, SnrPoint, SnrResults,
};
use linkcal_env::{PrachDetector, PrachDetectorConfig, PrachGenerator, TxWaveform, Waveform};
use tracing::{debug, info, warn};

/// Consecutive misses (or false detections) that end a point early.
pub const QUICK_SIMULATION_LIMIT: usize = 100;

/// Resources allocated when the simulator locks.
#[derive(Debug, Clone)]
struct Prepared {
    tx: TxWaveform,
    channel: Channel,
}

/// Monte-Carlo PRACH detection simulator.
///
/// Follows the configure / lock / release lifecycle of [`Lifecycle`]: the
/// first [`PrachSimulator::step`] locks the configuration, after which only
/// the tunables (quick simulation, display flags, detection threshold) may
/// change until [`PrachSimulator::release`].
#[derive(Debug, Clone)]
pub struct PrachSimulator<G: PrachGenerator, D: PrachDetector> {
    generator: G,
    detector: D,
    lifecycle: Lifecycle<PrachSimConfig>,
    seeds: SeedSequence,
    prepared: Option<Prepared>,
    results: SnrResults<SnrPoint>,
    trials_executed: usize,
}

/// Simulator wired to the reference Zadoff-Chu chain.
pub type ReferencePrachSimulator = PrachSimulator<ZadoffChuGenerator, CorrelationDetector>;

impl ReferencePrachSimulator {
    pub fn reference(seeds: SeedSequence) -> Self {
        Self::new(ZadoffChuGenerator, CorrelationDetector::new(), seeds)
    }
}

impl<G: PrachGenerator, D: PrachDetector> PrachSimulator<G, D> {
    pub fn new(generator: G, detector: D, seeds: SeedSequence) -> Self {
        Self {
            generator,
            detector,
            lifecycle: Lifecycle::new(),
            seeds,
            prepared: None,
            results: SnrResults::new(),
            trials_executed: 0,
        }
    }

    /// Replaces the configuration and discards accumulated results.
    pub fn configure(&mut self, config: PrachSimConfig) -> Result<(), SimError> {
        self.lifecycle.configure(config)?;
        self.results.clear();
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn config(&self) -> Option<&PrachSimConfig> {
        self.lifecycle.config()
    }

    pub fn results(&self) -> &SnrResults<SnrPoint> {
        &self.results
    }

    /// Trials run since construction or the last reset, early stops included.
    pub fn trials_executed(&self) -> usize {
        self.trials_executed
    }

    /// Success ratio stored for `snr_db`, zero if never simulated.
    pub fn probability(&self, snr_db: f64) -> f64 {
        self.results.get(snr_db).map_or(0.0, SnrPoint::probability)
    }

    // -------------------------------------------------------------------------
    // Non-tunable parameters
    // -------------------------------------------------------------------------

    pub fn set_num_rx_antennas(&mut self, num_rx_antennas: usize) -> Result<(), SimError> {
        self.lifecycle
            .update("num_rx_antennas", |c| c.num_rx_antennas = num_rx_antennas)
    }

    pub fn set_channel(&mut self, channel: ChannelKind) -> Result<(), SimError> {
        self.lifecycle.update("channel", |c| c.channel = channel)
    }

    pub fn set_mimo_correlation(&mut self, correlation: MimoCorrelation) -> Result<(), SimError> {
        self.lifecycle
            .update("mimo_correlation", |c| c.mimo_correlation = correlation)
    }

    pub fn set_frequency_offset(&mut self, hz: f64) -> Result<(), SimError> {
        self.lifecycle
            .update("frequency_offset_hz", |c| c.frequency_offset_hz = hz)
    }

    pub fn set_time_error_tolerance(&mut self, us: f64) -> Result<(), SimError> {
        self.lifecycle
            .update("time_error_tolerance_us", |c| c.time_error_tolerance_us = us)
    }

    pub fn set_test_type(&mut self, test_type: PrachTestType) -> Result<(), SimError> {
        self.lifecycle.update("test_type", |c| c.test_type = test_type)
    }

    pub fn set_cyclic_shift(&mut self, cyclic_shift: usize) -> Result<(), SimError> {
        self.lifecycle
            .update("cyclic_shift", |c| c.prach.cyclic_shift = cyclic_shift)
    }

    pub fn set_preamble_index(&mut self, preamble_index: usize) -> Result<(), SimError> {
        self.lifecycle
            .update("preamble_index", |c| c.prach.preamble_index = preamble_index)
    }

    // -------------------------------------------------------------------------
    // Tunables
    // -------------------------------------------------------------------------

    pub fn set_quick_simulation(&mut self, quick: bool) -> Result<(), SimError> {
        self.lifecycle.tune(|t| t.quick_simulation = quick)
    }

    pub fn set_display_simulation_info(&mut self, display: bool) -> Result<(), SimError> {
        self.lifecycle.tune(|t| t.display_simulation_info = display)
    }

    pub fn set_display_diagnostics(&mut self, display: bool) -> Result<(), SimError> {
        self.lifecycle.tune(|t| t.display_diagnostics = display)
    }

    pub fn set_detection_threshold(&mut self, threshold: f64) -> Result<(), SimError> {
        if !threshold.is_finite() {
            return Err(SimError::invalid("detection_threshold", threshold, "must be finite"));
        }
        self.lifecycle.tune(|t| t.detection_threshold = threshold)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Validates the configuration, builds the preamble and the channel.
    ///
    /// Called implicitly by the first [`PrachSimulator::step`]. Idempotent.
    pub fn lock(&mut self) -> Result<(), SimError> {
        if self.lifecycle.is_locked() && self.prepared.is_some() {
            return Ok(());
        }
        let config = self.lifecycle.lock()?.clone();

        match self.prepare(&config) {
            Ok(prepared) => {
                self.detector.set_delay(prepared.channel.info().filter_delay);
                debug!(
                    "Locked PRACH simulator: format {}, {} channel, {} Rx",
                    config.prach.format, config.channel, config.num_rx_antennas
                );
                self.prepared = Some(prepared);
                Ok(())
            }
            Err(e) => {
                self.lifecycle.release();
                Err(e)
            }
        }
    }

    fn prepare(&self, config: &PrachSimConfig) -> Result<Prepared, SimError> {
        let tx = self.generator.generate(&config.prach)?;
        let channel = Channel::new(
            config.channel,
            config.mimo_correlation,
            config.num_rx_antennas,
            tx.sample_rate_hz,
            self.seeds.channel_seed(0),
        )?;
        Ok(Prepared { tx, channel })
    }

    /// Clears accumulated results. Configuration and lock are kept.
    pub fn reset(&mut self) {
        self.results.clear();
        self.trials_executed = 0;
        if let Some(prepared) = self.prepared.as_mut() {
            prepared.channel.reset();
        }
    }

    /// Unlocks the configuration and drops results and resources.
    pub fn release(&mut self) {
        if self.lifecycle.release() {
            debug!("Released PRACH simulator");
        }
        self.prepared = None;
        self.reset();
    }

    // -------------------------------------------------------------------------
    // Simulation
    // -------------------------------------------------------------------------

    /// Simulates `trials` occasions at each SNR value and merges the points.
    ///
    /// SNR values are sorted and deduplicated; the random streams of a point
    /// depend only on its position in that list, so repeating a call after
    /// [`PrachSimulator::reset`] reproduces the same counters.
    pub fn step(&mut self, snr_values: &[f64], trials: usize) -> Result<(), SimError> {
        if trials == 0 {
            return Err(SimError::invalid("trials", trials, "must be positive"));
        }
        if let Some(snr) = snr_values.iter().find(|snr| !snr.is_finite()) {
            return Err(SimError::invalid("snr_db", snr, "must be finite"));
        }
        self.lock()?;
        let config = self.lifecycle.require()?.clone();

        let mut points = Vec::with_capacity(snr_values.len());
        for (index, snr_db) in dedup_snr(snr_values).into_iter().enumerate() {
            let point = self.simulate_point(&config, index, snr_db, trials)?;
            self.trials_executed += point.occasions;

            if config.tunables.display_simulation_info {
                info!(
                    "PRACH {} {} SNR {:+.1} dB: {} occasions, P = {:.4}, perfect {:.4}, \
                     timing error {:.3} +/- {:.3} us",
                    config.prach.format,
                    config.channel,
                    snr_db,
                    point.occasions,
                    point.probability(),
                    point.perfect_probability(),
                    point.mean_error(),
                    point.std_error()
                );
            }
            points.push(point);
        }
        self.results.merge(points);
        Ok(())
    }

    fn simulate_point(
        &mut self,
        config: &PrachSimConfig,
        index: usize,
        snr_db: f64,
        trials: usize,
    ) -> Result<SnrPoint, SimError> {
        let prepared = self.prepared.as_mut().ok_or(SimError::Unconfigured)?;
        let mut rng = self.seeds.point_rng(index);
        prepared.channel.reseed(self.seeds.channel_seed(index));

        let info = prepared.channel.info();
        let tx = &prepared.tx;
        let fs = tx.sample_rate_hz;
        let detector_config = PrachDetectorConfig {
            prach: config.prach.clone(),
            threshold: config.tunables.detection_threshold,
            num_rx_antennas: config.num_rx_antennas,
        };
        let quick = config.tunables.quick_simulation;
        let mut point = SnrPoint::new(snr_db);

        for trial in 0..trials {
            if quick {
                let stop = match config.test_type {
                    PrachTestType::Detection => trial - point.successes > QUICK_SIMULATION_LIMIT,
                    PrachTestType::FalseAlarm => point.successes > QUICK_SIMULATION_LIMIT,
                };
                if stop {
                    debug!("Quick simulation stop at SNR {:+.1} dB after {} trials", snr_db, trial);
                    break;
                }
            }

            let offset = config.timing_offset_samples(trial);
            let mut received = match config.test_type {
                PrachTestType::Detection => {
                    let padded = delay_and_pad(&tx.samples, offset, info.max_delay);
                    prepared.channel.apply(&padded)
                }
                // Silence through any channel is silence
                PrachTestType::FalseAlarm => Waveform::zeros(
                    offset + tx.len() + info.max_delay,
                    config.num_rx_antennas,
                ),
            };
            add_awgn(
                &mut received,
                snr_db,
                tx.transform_size,
                info.normalization,
                &mut rng,
            )?;
            apply_frequency_offset(&mut received, config.frequency_offset_hz, fs);

            let detection = match self.detector.detect(&received, &detector_config) {
                Ok(detection) => detection,
                Err(e) => {
                    warn!("Trial {} at SNR {:+.1} dB: {}", trial, snr_db, e);
                    point.record_failure();
                    continue;
                }
            };

            match config.test_type {
                PrachTestType::Detection => {
                    match detection.find(config.prach.preamble_index) {
                        Some(indication) => {
                            let true_ta = offset as f64 / fs;
                            let error_us = (indication.time_advance_s - true_ta).abs() * 1e6;
                            let perfect = error_us <= config.time_error_tolerance_us;
                            point.record_success(error_us, perfect);
                        }
                        None => point.record_failure(),
                    }
                }
                PrachTestType::FalseAlarm => {
                    if detection.preambles.is_empty() {
                        point.record_failure();
                    } else {
                        point.record_success(0.0, false);
                    }
                }
            }

            if config.tunables.display_diagnostics {
                debug!(
                    "Trial {}: offset {} samples, {} preambles, RSSI {:.1} dB",
                    trial,
                    offset,
                    detection.preambles.len(),
                    detection.rssi_db
                );
            }
        }

        Ok(point)
    }

    /// Measures the false-alarm probability at `threshold`.
    ///
    /// Replaces any stored result for `snr_db`. Requires a false-alarm test.
    pub fn false_alarm_probability(
        &mut self,
        threshold: f64,
        snr_db: f64,
        trials: usize,
    ) -> Result<f64, SimError> {
        let test_type = self.lifecycle.require()?.test_type;
        if test_type != PrachTestType::FalseAlarm {
            return Err(SimError::invalid(
                "test_type",
                format!("{:?}", test_type),
                "false-alarm probability needs a false-alarm test",
            ));
        }
        self.set_detection_threshold(threshold)?;
        self.step(&[snr_db], trials)?;
        Ok(self.probability(snr_db))
    }
}
