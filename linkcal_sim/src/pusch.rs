//! PUSCH decoding engine with HARQ retransmissions.
//!
//! Each simulated slot serves the current HARQ process: a new random
//! transport block or a retransmission of the stored one at the next
//! redundancy version. The decoder collaborator combines soft bits in its
//! buffer pool; the outcome drives the HARQ entity.

use crate::context::SeedSequence;
use crate::prach::QUICK_SIMULATION_LIMIT;
use crate::reference::{build_decoder, OfdmPuschDemodulator, OfdmPuschTransmitter};
use linkcal_core::impairments::{add_awgn, apply_frequency_offset, delay_and_pad};
use linkcal_core::results::dedup_snr;
use linkcal_core::{
    BlerPoint, Channel, ChannelKind, ChannelModel, DecoderKind, HarqEntity, HarqTransition,
    Lifecycle, LifecycleState, PuschSimConfig, SimError, SnrResults,
};
use linkcal_env::{
    PuschDecoder, PuschDemodulator, PuschTransmitter, SegmentConfig, SoftBufferId,
};
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Monte-Carlo PUSCH block-error-rate simulator.
///
/// The decoder variant is selected from [`PuschSimConfig::decoder`] when the
/// simulator locks.
pub struct PuschSimulator<T: PuschTransmitter, D: PuschDemodulator> {
    transmitter: T,
    demodulator: D,
    decoder: Box<dyn PuschDecoder + Send>,
    lifecycle: Lifecycle<PuschSimConfig>,
    seeds: SeedSequence,
    channel: Option<Channel>,
    results: SnrResults<BlerPoint>,
    trials_executed: usize,
}

impl<T: PuschTransmitter, D: PuschDemodulator> fmt::Debug for PuschSimulator<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PuschSimulator")
            .field("lifecycle", &self.lifecycle)
            .field("seeds", &self.seeds)
            .field("locked_channel", &self.channel.is_some())
            .field("results", &self.results)
            .field("trials_executed", &self.trials_executed)
            .finish_non_exhaustive()
    }
}

pub type ReferencePuschSimulator = PuschSimulator<OfdmPuschTransmitter, OfdmPuschDemodulator>;

impl ReferencePuschSimulator {
    pub fn reference(seeds: SeedSequence) -> Self {
        Self::new(OfdmPuschTransmitter, OfdmPuschDemodulator::new(), seeds)
    }
}

impl<T: PuschTransmitter, D: PuschDemodulator> PuschSimulator<T, D> {
    pub fn new(transmitter: T, demodulator: D, seeds: SeedSequence) -> Self {
        Self {
            transmitter,
            demodulator,
            decoder: build_decoder(DecoderKind::default()),
            lifecycle: Lifecycle::new(),
            seeds,
            channel: None,
            results: SnrResults::new(),
            trials_executed: 0,
        }
    }

    pub fn configure(&mut self, config: PuschSimConfig) -> Result<(), SimError> {
        self.lifecycle.configure(config)?;
        self.results.clear();
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn config(&self) -> Option<&PuschSimConfig> {
        self.lifecycle.config()
    }

    pub fn results(&self) -> &SnrResults<BlerPoint> {
        &self.results
    }

    pub fn trials_executed(&self) -> usize {
        self.trials_executed
    }

    pub fn set_num_rx_antennas(&mut self, num_rx_antennas: usize) -> Result<(), SimError> {
        self.lifecycle
            .update("num_rx_antennas", |c| c.num_rx_antennas = num_rx_antennas)
    }

    pub fn set_channel(&mut self, channel: ChannelKind) -> Result<(), SimError> {
        self.lifecycle.update("channel", |c| c.channel = channel)
    }

    pub fn set_rv_sequence(&mut self, rv_sequence: Vec<u8>) -> Result<(), SimError> {
        self.lifecycle.update("rv_sequence", |c| c.rv_sequence = rv_sequence)
    }

    pub fn set_decoder(&mut self, decoder: DecoderKind) -> Result<(), SimError> {
        self.lifecycle.update("decoder", |c| c.decoder = decoder)
    }

    pub fn set_quick_simulation(&mut self, quick: bool) -> Result<(), SimError> {
        self.lifecycle.tune(|t| t.quick_simulation = quick)
    }

    pub fn set_display_simulation_info(&mut self, display: bool) -> Result<(), SimError> {
        self.lifecycle.tune(|t| t.display_simulation_info = display)
    }

    pub fn set_display_diagnostics(&mut self, display: bool) -> Result<(), SimError> {
        self.lifecycle.tune(|t| t.display_diagnostics = display)
    }

    /// Validates the configuration against the transmitter capabilities and
    /// allocates the channel and decoder. Idempotent.
    pub fn lock(&mut self) -> Result<(), SimError> {
        if self.lifecycle.is_locked() && self.channel.is_some() {
            return Ok(());
        }
        let config = self.lifecycle.lock()?.clone();

        match self.prepare(&config) {
            Ok(channel) => {
                self.demodulator.set_delay(channel.info().filter_delay);
                self.decoder = build_decoder(config.decoder);
                self.channel = Some(channel);
                debug!(
                    "Locked PUSCH simulator: {} {} PRB, {} decoder, {} channel",
                    config.pusch.modulation,
                    config.pusch.num_prbs,
                    config.decoder.name(),
                    config.channel
                );
                Ok(())
            }
            Err(e) => {
                self.lifecycle.release();
                Err(e)
            }
        }
    }

    fn prepare(&self, config: &PuschSimConfig) -> Result<Channel, SimError> {
        let capabilities = self.transmitter.capabilities();
        let pusch = &config.pusch;
        if !capabilities.supports(pusch.modulation) {
            return Err(SimError::invalid(
                "modulation",
                pusch.modulation,
                "not supported by the transmitter",
            ));
        }
        if pusch.num_layers > capabilities.max_layers {
            return Err(SimError::invalid(
                "num_layers",
                pusch.num_layers,
                format!("transmitter supports up to {}", capabilities.max_layers),
            ));
        }
        Channel::new(
            config.channel,
            config.mimo_correlation,
            config.num_rx_antennas,
            pusch.sample_rate_hz(),
            self.seeds.channel_seed(0),
        )
    }

    pub fn reset(&mut self) {
        self.results.clear();
        self.trials_executed = 0;
        self.decoder.release();
        if let Some(channel) = self.channel.as_mut() {
            channel.reset();
        }
    }

    pub fn release(&mut self) {
        if self.lifecycle.release() {
            debug!("Released PUSCH simulator");
        }
        self.channel = None;
        self.reset();
    }

    /// Simulates `trials` slots at each SNR value and merges the points.
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
            self.trials_executed += point.transmissions;

            if config.tunables.display_simulation_info {
                info!(
                    "PUSCH {} {} SNR {:+.1} dB: {} slots, BLER {:.4}, throughput {:.1}%",
                    config.pusch.modulation,
                    config.channel,
                    snr_db,
                    point.transmissions,
                    point.bler(),
                    100.0 * point.throughput()
                );
            }
            points.push(point);
        }
        self.results.merge(points);
        Ok(())
    }

    fn simulate_point(
        &mut self,
        config: &PuschSimConfig,
        index: usize,
        snr_db: f64,
        trials: usize,
    ) -> Result<BlerPoint, SimError> {
        let channel = self.channel.as_mut().ok_or(SimError::Unconfigured)?;
        let mut rng = self.seeds.point_rng(index);
        channel.reseed(self.seeds.channel_seed(index));
        self.decoder.release();

        let pusch = &config.pusch;
        let info = channel.info();
        let tbs = pusch.tbs();
        let base_segment = SegmentConfig::for_pusch(pusch, 0);
        let nof_codeblocks = base_segment.nof_codeblocks();
        let mut harq = HarqEntity::new(&config.harq_process_ids, &config.rv_sequence)?;
        let mut blocks: HashMap<u8, Vec<u8>> = HashMap::new();
        let mut point = BlerPoint::new(snr_db, tbs);

        for slot in 0..trials {
            if config.tunables.quick_simulation && point.failures() > QUICK_SIMULATION_LIMIT {
                debug!("Quick simulation stop at SNR {:+.1} dB after {} slots", snr_db, slot);
                break;
            }

            let harq_id = harq.current_process_id();
            let rv = harq.redundancy_version();
            let block = blocks.entry(harq_id).or_default();
            let new_data = harq.is_new_data() || block.is_empty();
            if new_data {
                *block = (0..tbs).map(|_| u8::from(rng.gen::<bool>())).collect();
                point.new_blocks += 1;
            }

            let tx = self.transmitter.transmit(pusch, block, rv)?;
            let padded = delay_and_pad(&tx.samples, 0, info.max_delay);
            let mut received = channel.apply(&padded);
            let noise_var = add_awgn(
                &mut received,
                snr_db,
                tx.transform_size,
                info.normalization,
                &mut rng,
            )?;
            apply_frequency_offset(&mut received, config.frequency_offset_hz, tx.sample_rate_hz);

            let segment = SegmentConfig {
                rv,
                ..base_segment.clone()
            };
            let buffer = SoftBufferId {
                rnti: pusch.rnti,
                harq_ack_id: harq_id,
                nof_codeblocks,
            };
            let outcome = self
                .demodulator
                .demodulate(&received, pusch, noise_var)
                .and_then(|llrs| self.decoder.decode(&llrs, &segment, &buffer, new_data));

            point.transmissions += 1;
            let decoded = match outcome {
                Ok(result) => {
                    point.decoder_iterations += u64::from(result.iterations);
                    result.crc_ok && result.transport_block == *block
                }
                Err(e) => {
                    warn!("Slot {} at SNR {:+.1} dB: {}", slot, snr_db, e);
                    false
                }
            };
            if decoded {
                point.successes += 1;
                point.decoded_bits += tbs;
            }

            let transition = harq.advance(!decoded);
            if config.tunables.display_diagnostics {
                debug!(
                    "Slot {}: HARQ {} rv {} new_data {} -> {:?}",
                    slot, harq_id, rv, new_data, transition
                );
            }
            if transition == HarqTransition::SequenceTimeout {
                blocks.remove(&harq_id);
            }
        }

        Ok(point)
    }
}
