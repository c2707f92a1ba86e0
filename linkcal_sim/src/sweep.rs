//! Detection threshold calibration sweep.
//!
//! For every entry of a [`ConfigTable`], in table order:
//! 1. search the threshold meeting the target false-alarm probability in AWGN,
//! 2. measure the detection probability in AWGN at that threshold,
//! 3. measure false-alarm and detection probabilities in a fading channel.
//!
//! The row is saved before the next entry starts. A rerun loads the stored
//! table and continues after its last filled row.

use crate::context::SeedSequence;
use crate::error::SweepError;
use crate::prach::ReferencePrachSimulator;
use crate::scenarios::{CalibrationEntry, ConfigTable};
use crate::table::{CalibrationRow, ResultTable, TableStore};
use linkcal_core::{
    ChannelKind, DelayProfile, PrachSimConfig, PrachTestType, SearchConfig, ThresholdSearch,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Sweep parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    pub target_pfa: f64,

    /// Trials per false-alarm evaluation of the search
    pub false_alarm_trials: usize,

    /// Trials per detection measurement
    pub detection_trials: usize,

    /// SNR of the AWGN passes (dB)
    pub snr_awgn_db: f64,

    /// SNR of the fading passes (dB)
    pub snr_fading_db: f64,

    pub fading_profile: DelayProfile,

    pub threshold_lower: f64,

    pub threshold_upper: f64,

    pub quick_simulation: bool,

    /// Master seed; row `i` uses the `i`-th fork
    pub seed: u64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            target_pfa: 1e-3,
            false_alarm_trials: 10_000,
            detection_trials: 1_000,
            snr_awgn_db: -14.2,
            snr_fading_db: -6.0,
            fading_profile: DelayProfile::Tdlc300,
            threshold_lower: 0.0,
            threshold_upper: 40.0,
            quick_simulation: true,
            seed: 42,
        }
    }
}

impl SweepSettings {
    pub fn search_config(&self) -> SearchConfig {
        SearchConfig::default()
            .with_target(self.target_pfa)
            .with_trials(self.false_alarm_trials)
            .with_bounds(self.threshold_lower, self.threshold_upper)
    }
}

/// What a sweep run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepSummary {
    /// Rows found complete in the stored table
    pub rows_resumed: usize,
    /// Rows computed by this run
    pub rows_computed: usize,
    /// Trials executed by this run
    pub trials_executed: usize,
}

/// Populates a persisted calibration table.
#[derive(Debug, Clone)]
pub struct CalibrationSweep {
    settings: SweepSettings,
    search: ThresholdSearch,
}

impl CalibrationSweep {
    pub fn new(settings: SweepSettings) -> Result<Self, SweepError> {
        if settings.detection_trials == 0 {
            return Err(SweepError::Sim(linkcal_core::SimError::invalid(
                "detection_trials",
                0,
                "must be positive",
            )));
        }
        let search = ThresholdSearch::new(settings.search_config())?;
        Ok(Self { settings, search })
    }

    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    /// Runs the sweep, resuming from whatever `store` already holds.
    pub fn run<S: TableStore + ?Sized>(
        &self,
        table: &ConfigTable,
        store: &mut S,
    ) -> Result<SweepSummary, SweepError> {
        let mut results = match store.load()? {
            Some(stored) => {
                check_stored(&stored, table)?;
                stored
            }
            None => ResultTable::new(table.len()),
        };

        let start = results.resume_index();
        let mut summary = SweepSummary {
            rows_resumed: results.completed(),
            ..Default::default()
        };
        if start > 0 {
            info!("Resuming calibration at row {} of {}", start, table.len());
        }

        for (index, entry) in table.entries().iter().enumerate().skip(start) {
            let (row, trials) = self.calibrate(index, entry)?;
            info!(
                "Row {}/{}: format {} {} Rx {} Ncs {} -> threshold {:.3} \
                 (PFA {:.5}, PD {:.3} | fading PFA {:.5}, PD {:.3})",
                index + 1,
                table.len(),
                entry.format,
                entry.num_rx_antennas,
                entry.scs,
                entry.cyclic_shift,
                row.threshold,
                row.pfa_awgn,
                row.pd_awgn,
                row.pfa_fading,
                row.pd_fading
            );

            results.set_row(row)?;
            store.save(&results)?;
            summary.rows_computed += 1;
            summary.trials_executed += trials;
        }

        Ok(summary)
    }

    /// Computes the row of one entry. Returns the row and the trials spent.
    fn calibrate(
        &self,
        index: usize,
        entry: &CalibrationEntry,
    ) -> Result<(CalibrationRow, usize), SweepError> {
        entry.check(index)?;
        let seeds = SeedSequence::new(self.settings.seed).fork(index as u64);
        let base = entry
            .prach_config()
            .with_quick_simulation(self.settings.quick_simulation);
        let fading = ChannelKind::Fading(self.settings.fading_profile);
        let mut trials = 0;

        // Threshold for the target false-alarm probability in AWGN
        let mut false_alarm = ReferencePrachSimulator::reference(seeds);
        false_alarm.configure(base.clone().with_test_type(PrachTestType::FalseAlarm))?;
        let snr_awgn = self.settings.snr_awgn_db;
        let estimate = self.search.run(&mut |threshold: f64, n: usize| {
            false_alarm.false_alarm_probability(threshold, snr_awgn, n)
        })?;
        trials += false_alarm.trials_executed();
        if !estimate.converged {
            warn!(
                "Row {}: search stopped at threshold {:.3} with PFA {:.5} outside the target band",
                index, estimate.threshold, estimate.false_alarm_probability
            );
        }
        let threshold = estimate.threshold;

        let detection = base.with_threshold(threshold);
        let (pd_awgn, n) = self.measure(seeds, detection.clone(), snr_awgn)?;
        trials += n;

        let snr_fading = self.settings.snr_fading_db;
        let (pfa_fading, n) = self.measure(
            seeds,
            detection
                .clone()
                .with_channel(fading)
                .with_test_type(PrachTestType::FalseAlarm),
            snr_fading,
        )?;
        trials += n;
        let (pd_fading, n) = self.measure(seeds, detection.with_channel(fading), snr_fading)?;
        trials += n;

        let row = CalibrationRow {
            config_index: index,
            format: entry.format,
            num_rx_antennas: entry.num_rx_antennas,
            scs_khz: entry.scs.khz(),
            cyclic_shift: entry.cyclic_shift,
            threshold,
            pfa_awgn: estimate.false_alarm_probability,
            pd_awgn,
            pfa_fading,
            pd_fading,
        };
        Ok((row, trials))
    }

    /// Runs one measurement pass on a fresh simulator.
    fn measure(
        &self,
        seeds: SeedSequence,
        config: PrachSimConfig,
        snr_db: f64,
    ) -> Result<(f64, usize), SweepError> {
        let trials = match config.test_type {
            PrachTestType::Detection => self.settings.detection_trials,
            PrachTestType::FalseAlarm => self.settings.false_alarm_trials,
        };
        let mut sim = ReferencePrachSimulator::reference(seeds);
        sim.configure(config)?;
        sim.step(&[snr_db], trials)?;
        Ok((sim.probability(snr_db), sim.trials_executed()))
    }
}

/// Checks a stored table belongs to `table`.
fn check_stored(stored: &ResultTable, table: &ConfigTable) -> Result<(), SweepError> {
    if stored.len() != table.len() {
        return Err(SweepError::SchemaMismatch(format!(
            "stored table has {} rows, configuration table has {}",
            stored.len(),
            table.len()
        )));
    }
    for (index, entry) in table.entries().iter().enumerate() {
        let Some(row) = stored.row(index) else {
            continue;
        };
        let matches = row.config_index == index
            && row.format == entry.format
            && row.num_rx_antennas == entry.num_rx_antennas
            && row.cyclic_shift == entry.cyclic_shift
            && row.scs_khz == entry.scs.khz();
        if !matches {
            return Err(SweepError::SchemaMismatch(format!(
                "stored row {} describes a different configuration",
                index
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::MemoryTableStore;
    use linkcal_env::{PreambleFormat, SubcarrierSpacing};
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::OnceLock;

    fn small_table() -> ConfigTable {
        ConfigTable::new(
            [12, 23]
                .into_iter()
                .map(|cyclic_shift| CalibrationEntry {
                    format: PreambleFormat::B4,
                    scs: SubcarrierSpacing::Khz30,
                    num_rx_antennas: 1,
                    cyclic_shift,
                })
                .collect(),
        )
    }

    fn fast_settings() -> SweepSettings {
        SweepSettings {
            target_pfa: 0.05,
            false_alarm_trials: 1_000,
            detection_trials: 20,
            snr_awgn_db: 0.0,
            snr_fading_db: 10.0,
            fading_profile: DelayProfile::Tdla30,
            threshold_upper: 20.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_sweep_fills_and_saves_every_row() {
        let sweep = CalibrationSweep::new(fast_settings()).unwrap();
        let mut store = MemoryTableStore::new();
        let summary = sweep.run(&small_table(), &mut store).unwrap();

        assert_eq!(summary.rows_computed, 2);
        assert_eq!(summary.rows_resumed, 0);
        assert!(summary.trials_executed > 0);
        assert_eq!(store.saves(), 2);

        let table = store.load().unwrap().unwrap();
        assert_eq!(table.completed(), 2);
        let row = table.row(1).unwrap();
        assert_eq!(row.cyclic_shift, 23);
        assert!(row.threshold > 0.0 && row.threshold < 20.0);
        assert!(row.pd_awgn > 0.9);
        for row in (0..2).filter_map(|i| table.row(i)) {
            assert!(
                row.pfa_awgn >= 0.9 * 0.05 && row.pfa_awgn <= 0.05,
                "row {} PFA {} outside the acceptance band",
                row.config_index,
                row.pfa_awgn
            );
        }
    }

    #[test]
    fn test_rerun_of_complete_table_is_idempotent() {
        let sweep = CalibrationSweep::new(fast_settings()).unwrap();
        let mut store = MemoryTableStore::new();
        sweep.run(&small_table(), &mut store).unwrap();
        let before = store.load().unwrap();

        let summary = sweep.run(&small_table(), &mut store).unwrap();
        assert_eq!(summary.rows_computed, 0);
        assert_eq!(summary.rows_resumed, 2);
        assert_eq!(summary.trials_executed, 0);
        assert_eq!(store.saves(), 2);
        assert_eq!(store.load().unwrap(), before);
    }

    #[test]
    fn test_resume_continues_after_last_row() {
        let sweep = CalibrationSweep::new(fast_settings()).unwrap();
        let mut full = MemoryTableStore::new();
        sweep.run(&small_table(), &mut full).unwrap();
        let complete = full.load().unwrap().unwrap();

        // Simulate a crash after the first row
        let mut partial = ResultTable::new(2);
        partial.set_row(complete.row(0).unwrap().clone()).unwrap();
        let mut store = MemoryTableStore::new();
        store.save(&partial).unwrap();

        let summary = sweep.run(&small_table(), &mut store).unwrap();
        assert_eq!(summary.rows_resumed, 1);
        assert_eq!(summary.rows_computed, 1);
        assert_eq!(store.load().unwrap().unwrap(), complete);
    }

    fn complete_table() -> &'static ResultTable {
        static COMPLETE: OnceLock<ResultTable> = OnceLock::new();
        COMPLETE.get_or_init(|| {
            let sweep = CalibrationSweep::new(fast_settings()).unwrap();
            let mut store = MemoryTableStore::new();
            sweep.run(&small_table(), &mut store).unwrap();
            store.load().unwrap().unwrap()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(6))]

        #[test]
        fn prop_resume_from_any_prefix_completes_table(prefix in 0usize..=2) {
            let complete = complete_table();
            let mut partial = ResultTable::new(complete.len());
            for index in 0..prefix {
                partial.set_row(complete.row(index).unwrap().clone()).unwrap();
            }
            let mut store = MemoryTableStore::new();
            store.save(&partial).unwrap();

            let sweep = CalibrationSweep::new(fast_settings()).unwrap();
            let summary = sweep.run(&small_table(), &mut store).unwrap();
            prop_assert_eq!(summary.rows_resumed, prefix);
            prop_assert_eq!(summary.rows_computed, complete.len() - prefix);
            let stored = store.load().unwrap().unwrap();
            prop_assert_eq!(&stored, complete);
        }
    }

    #[test]
    fn test_malformed_table_aborts() {
        let sweep = CalibrationSweep::new(fast_settings()).unwrap();
        let mut store = MemoryTableStore::with_value(json!({
            "columns": [{ "name": "threshold", "kind": "Real" }],
            "rows": [null, null],
        }));
        let err = sweep.run(&small_table(), &mut store).unwrap_err();
        assert!(matches!(err, SweepError::SchemaMismatch(_)));
        assert_eq!(store.saves(), 0);
    }

    #[test]
    fn test_table_of_other_configuration_rejected() {
        let sweep = CalibrationSweep::new(fast_settings()).unwrap();
        let mut store = MemoryTableStore::new();
        store.save(&ResultTable::new(5)).unwrap();
        assert!(matches!(
            sweep.run(&small_table(), &mut store),
            Err(SweepError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_inconsistent_entry_is_fatal() {
        let sweep = CalibrationSweep::new(fast_settings()).unwrap();
        let table = ConfigTable::new(vec![CalibrationEntry {
            format: PreambleFormat::B4,
            scs: SubcarrierSpacing::Khz30,
            num_rx_antennas: 3,
            cyclic_shift: 12,
        }]);
        let mut store = MemoryTableStore::new();
        assert!(matches!(
            sweep.run(&table, &mut store),
            Err(SweepError::Assertion(_))
        ));
        assert_eq!(store.saves(), 0);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = SweepSettings {
            target_pfa: 0.0,
            ..fast_settings()
        };
        assert!(CalibrationSweep::new(settings).is_err());
    }
}
