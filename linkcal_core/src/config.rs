//! Typed simulation configuration records.
//!
//! Each record splits its fields in two groups:
//! - **Non-tunable** fields define the waveform, channel and receiver. They
//!   are frozen while a simulator is locked.
//! - **Tunable** fields (quick simulation, display flags, detection
//!   threshold) live in a nested struct and may change at any time.

use crate::error::SimError;
use linkcal_env::{PrachConfig, PreambleFormat, PuschConfig, SubcarrierSpacing};
use serde::{Deserialize, Serialize};

/// Antenna counts accepted at the receiver.
pub const SUPPORTED_RX_ANTENNAS: [usize; 4] = [1, 2, 4, 8];

/// Behaviour shared by every simulator configuration.
pub trait SimulationConfig: Clone {
    /// Fields that may change while the simulator is locked.
    type Tunables: Clone;

    /// Checks every non-tunable invariant.
    fn validate(&self) -> Result<(), SimError>;

    fn tunables(&self) -> &Self::Tunables;

    fn tunables_mut(&mut self) -> &mut Self::Tunables;
}

// =============================================================================
// CHANNEL
// =============================================================================

/// Tapped-delay-line power delay profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DelayProfile {
    /// TDL-A, 30 ns delay spread, 10 Hz maximum Doppler
    Tdla30,
    /// TDL-B, 100 ns delay spread, 400 Hz maximum Doppler
    Tdlb100,
    /// TDL-C, 300 ns delay spread, 100 Hz maximum Doppler
    Tdlc300,
}

impl DelayProfile {
    pub fn all() -> Vec<DelayProfile> {
        vec![DelayProfile::Tdla30, DelayProfile::Tdlb100, DelayProfile::Tdlc300]
    }

    /// Returns `(delay_ns, power_db)` per tap.
    pub fn taps(&self) -> &'static [(f64, f64)] {
        match self {
            DelayProfile::Tdla30 => &[
                (0.0, -15.5),
                (10.0, 0.0),
                (15.0, -5.1),
                (20.0, -5.1),
                (25.0, -9.6),
                (50.0, -8.2),
                (65.0, -13.1),
                (75.0, -11.5),
                (105.0, -11.0),
                (135.0, -16.2),
                (150.0, -16.6),
                (290.0, -26.2),
            ],
            DelayProfile::Tdlb100 => &[
                (0.0, 0.0),
                (10.0, -2.2),
                (20.0, -0.6),
                (30.0, -0.6),
                (35.0, -0.3),
                (45.0, -1.2),
                (55.0, -5.9),
                (120.0, -2.2),
                (170.0, -0.8),
                (245.0, -6.3),
                (330.0, -7.5),
                (480.0, -7.1),
            ],
            DelayProfile::Tdlc300 => &[
                (0.0, -6.9),
                (65.0, 0.0),
                (70.0, -7.7),
                (190.0, -2.5),
                (195.0, -2.4),
                (200.0, -9.9),
                (240.0, -8.0),
                (325.0, -6.6),
                (520.0, -7.1),
                (1045.0, -13.0),
                (1510.0, -14.2),
                (2595.0, -16.0),
            ],
        }
    }

    pub fn max_doppler_hz(&self) -> f64 {
        match self {
            DelayProfile::Tdla30 => 10.0,
            DelayProfile::Tdlb100 => 400.0,
            DelayProfile::Tdlc300 => 100.0,
        }
    }

    /// Largest tap delay in seconds.
    pub fn max_delay_s(&self) -> f64 {
        self.taps()
            .iter()
            .map(|(delay_ns, _)| *delay_ns)
            .fold(0.0, f64::max)
            * 1e-9
    }

    pub fn name(&self) -> &'static str {
        match self {
            DelayProfile::Tdla30 => "TDLA30-10",
            DelayProfile::Tdlb100 => "TDLB100-400",
            DelayProfile::Tdlc300 => "TDLC300-100",
        }
    }
}

/// Propagation channel selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Identity channel, noise only
    Awgn,
    /// Multi-tap fading channel
    Fading(DelayProfile),
}

impl ChannelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::Awgn => "AWGN",
            ChannelKind::Fading(profile) => profile.name(),
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AWGN" => Ok(ChannelKind::Awgn),
            "TDLA30-10" | "TDLA30" => Ok(ChannelKind::Fading(DelayProfile::Tdla30)),
            "TDLB100-400" | "TDLB100" => Ok(ChannelKind::Fading(DelayProfile::Tdlb100)),
            "TDLC300-100" | "TDLC300" => Ok(ChannelKind::Fading(DelayProfile::Tdlc300)),
            _ => Err(format!("Unknown channel: {}", s)),
        }
    }
}

/// Receive-side antenna correlation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MimoCorrelation {
    #[default]
    Low,
    Medium,
    High,
}

impl MimoCorrelation {
    /// Correlation coefficient between the outermost receive antennas.
    pub fn coefficient(&self) -> f64 {
        match self {
            MimoCorrelation::Low => 0.0,
            MimoCorrelation::Medium => 0.3,
            MimoCorrelation::High => 0.9,
        }
    }
}

// =============================================================================
// PRACH
// =============================================================================

/// What a PRACH simulation measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrachTestType {
    /// A preamble is transmitted; success means it was detected
    Detection,
    /// Nothing is transmitted; success means a (false) detection
    FalseAlarm,
}

/// PRACH tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrachTunables {
    /// Stop an SNR point early once its outcome is statistically settled
    pub quick_simulation: bool,

    /// Log a summary line per SNR point
    pub display_simulation_info: bool,

    /// Log per-trial diagnostics
    pub display_diagnostics: bool,

    /// Detector threshold
    pub detection_threshold: f64,
}

impl Default for PrachTunables {
    fn default() -> Self {
        Self {
            quick_simulation: true,
            display_simulation_info: false,
            display_diagnostics: false,
            detection_threshold: 15.0,
        }
    }
}

/// PRACH detection simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrachSimConfig {
    /// Occasion parameters
    pub prach: PrachConfig,

    pub num_rx_antennas: usize,

    pub channel: ChannelKind,

    pub mimo_correlation: MimoCorrelation,

    /// Carrier frequency offset
    pub frequency_offset_hz: f64,

    /// Maximum timing error of a perfect detection
    pub time_error_tolerance_us: f64,

    pub test_type: PrachTestType,

    /// Number of trials after which the timing offset sweep wraps
    pub timing_offset_cycle: usize,

    pub tunables: PrachTunables,
}

impl Default for PrachSimConfig {
    fn default() -> Self {
        Self::new(PreambleFormat::F0)
    }
}

impl PrachSimConfig {
    /// Creates a configuration for `format` with its default numerology.
    pub fn new(format: PreambleFormat) -> Self {
        let cyclic_shift = if format.is_long() { 13 } else { 2 };
        Self {
            prach: PrachConfig {
                format,
                scs: format.default_scs(),
                root_sequence_index: 1,
                cyclic_shift,
                preamble_index: 0,
            },
            num_rx_antennas: 1,
            channel: ChannelKind::Awgn,
            mimo_correlation: MimoCorrelation::Low,
            frequency_offset_hz: 0.0,
            time_error_tolerance_us: default_time_error_tolerance_us(
                format,
                format.default_scs(),
            ),
            test_type: PrachTestType::Detection,
            timing_offset_cycle: 10,
            tunables: PrachTunables::default(),
        }
    }

    /// Sets the subcarrier spacing and the matching time error tolerance.
    pub fn with_scs(mut self, scs: SubcarrierSpacing) -> Self {
        self.prach.scs = scs;
        self.time_error_tolerance_us = default_time_error_tolerance_us(self.prach.format, scs);
        self
    }

    pub fn with_rx_antennas(mut self, num_rx_antennas: usize) -> Self {
        self.num_rx_antennas = num_rx_antennas;
        self
    }

    pub fn with_cyclic_shift(mut self, cyclic_shift: usize) -> Self {
        self.prach.cyclic_shift = cyclic_shift;
        self
    }

    pub fn with_preamble_index(mut self, preamble_index: usize) -> Self {
        self.prach.preamble_index = preamble_index;
        self
    }

    pub fn with_channel(mut self, channel: ChannelKind) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_mimo_correlation(mut self, correlation: MimoCorrelation) -> Self {
        self.mimo_correlation = correlation;
        self
    }

    pub fn with_frequency_offset(mut self, hz: f64) -> Self {
        self.frequency_offset_hz = hz;
        self
    }

    pub fn with_test_type(mut self, test_type: PrachTestType) -> Self {
        self.test_type = test_type;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.tunables.detection_threshold = threshold;
        self
    }

    pub fn with_quick_simulation(mut self, quick: bool) -> Self {
        self.tunables.quick_simulation = quick;
        self
    }

    /// Timing offset applied to the `trial`-th transmission, in samples.
    ///
    /// Offsets sweep half of the cyclic shift window in `timing_offset_cycle`
    /// equal steps, then wrap.
    pub fn timing_offset_samples(&self, trial: usize) -> usize {
        let cycle = self.timing_offset_cycle.max(1);
        let span = self.prach.cyclic_shift / 2;
        (trial % cycle) * span / cycle
    }
}

/// Timing error tolerance of a correct detection, per format family.
pub fn default_time_error_tolerance_us(format: PreambleFormat, scs: SubcarrierSpacing) -> f64 {
    if format.is_long() {
        1.04
    } else {
        0.52 * 15.0 / scs.khz()
    }
}

fn validate_rx_antennas(num_rx_antennas: usize) -> Result<(), SimError> {
    if SUPPORTED_RX_ANTENNAS.contains(&num_rx_antennas) {
        Ok(())
    } else {
        Err(SimError::invalid(
            "num_rx_antennas",
            num_rx_antennas,
            format!("supported values are {:?}", SUPPORTED_RX_ANTENNAS),
        ))
    }
}

fn validate_finite(name: &'static str, value: f64) -> Result<(), SimError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SimError::invalid(name, value, "must be finite"))
    }
}

impl SimulationConfig for PrachSimConfig {
    type Tunables = PrachTunables;

    fn validate(&self) -> Result<(), SimError> {
        let prach = &self.prach;
        let length = prach.sequence_length();

        if !prach.format.supports(prach.scs) {
            return Err(SimError::invalid(
                "subcarrier_spacing",
                prach.scs,
                format!("not allowed with preamble format {}", prach.format),
            ));
        }
        if prach.root_sequence_index == 0 || prach.root_sequence_index >= length {
            return Err(SimError::invalid(
                "root_sequence_index",
                prach.root_sequence_index,
                format!("must be in 1..{}", length),
            ));
        }
        if prach.cyclic_shift == 0 || prach.cyclic_shift > length {
            return Err(SimError::invalid(
                "cyclic_shift",
                prach.cyclic_shift,
                format!("must be in 1..={}", length),
            ));
        }
        if prach.preamble_index >= prach.nof_preambles() {
            return Err(SimError::invalid(
                "preamble_index",
                prach.preamble_index,
                format!("only {} preambles available", prach.nof_preambles()),
            ));
        }
        validate_rx_antennas(self.num_rx_antennas)?;
        if self.timing_offset_cycle == 0 {
            return Err(SimError::invalid("timing_offset_cycle", 0, "must be positive"));
        }
        validate_finite("frequency_offset_hz", self.frequency_offset_hz)?;
        validate_finite("time_error_tolerance_us", self.time_error_tolerance_us)?;
        if self.time_error_tolerance_us < 0.0 {
            return Err(SimError::invalid(
                "time_error_tolerance_us",
                self.time_error_tolerance_us,
                "must not be negative",
            ));
        }
        validate_finite("detection_threshold", self.tunables.detection_threshold)?;
        Ok(())
    }

    fn tunables(&self) -> &PrachTunables {
        &self.tunables
    }

    fn tunables_mut(&mut self) -> &mut PrachTunables {
        &mut self.tunables
    }
}

// =============================================================================
// PUSCH
// =============================================================================

/// Decoder implementations selectable at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DecoderKind {
    /// Combines soft bits across HARQ retransmissions
    #[default]
    SoftCombining,
    /// Decodes every transmission on its own soft bits
    HardDecision,
}

impl DecoderKind {
    pub fn name(&self) -> &'static str {
        match self {
            DecoderKind::SoftCombining => "soft_combining",
            DecoderKind::HardDecision => "hard_decision",
        }
    }
}

impl std::str::FromStr for DecoderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "soft_combining" | "soft" => Ok(DecoderKind::SoftCombining),
            "hard_decision" | "hard" => Ok(DecoderKind::HardDecision),
            _ => Err(format!("Unknown decoder: {}", s)),
        }
    }
}

/// PUSCH tunables.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PuschTunables {
    pub quick_simulation: bool,
    pub display_simulation_info: bool,
    pub display_diagnostics: bool,
}

/// PUSCH decoding simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PuschSimConfig {
    pub pusch: PuschConfig,

    pub num_rx_antennas: usize,

    pub channel: ChannelKind,

    pub mimo_correlation: MimoCorrelation,

    pub frequency_offset_hz: f64,

    /// Redundancy version sequence; `[0]` disables retransmissions
    pub rv_sequence: Vec<u8>,

    /// HARQ process identifiers in round-robin order
    pub harq_process_ids: Vec<u8>,

    pub decoder: DecoderKind,

    pub tunables: PuschTunables,
}

impl Default for PuschSimConfig {
    fn default() -> Self {
        Self {
            pusch: PuschConfig::default(),
            num_rx_antennas: 1,
            channel: ChannelKind::Awgn,
            mimo_correlation: MimoCorrelation::Low,
            frequency_offset_hz: 0.0,
            rv_sequence: vec![0, 2, 3, 1],
            harq_process_ids: (0..16).collect(),
            decoder: DecoderKind::SoftCombining,
            tunables: PuschTunables::default(),
        }
    }
}

impl PuschSimConfig {
    pub fn with_rx_antennas(mut self, num_rx_antennas: usize) -> Self {
        self.num_rx_antennas = num_rx_antennas;
        self
    }

    pub fn with_channel(mut self, channel: ChannelKind) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_rv_sequence(mut self, rv_sequence: Vec<u8>) -> Self {
        self.rv_sequence = rv_sequence;
        self
    }

    pub fn with_decoder(mut self, decoder: DecoderKind) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_quick_simulation(mut self, quick: bool) -> Self {
        self.tunables.quick_simulation = quick;
        self
    }
}

impl SimulationConfig for PuschSimConfig {
    type Tunables = PuschTunables;

    fn validate(&self) -> Result<(), SimError> {
        let pusch = &self.pusch;

        if pusch.num_prbs == 0 {
            return Err(SimError::invalid("num_prbs", 0, "must be positive"));
        }
        if pusch.num_symbols == 0 || pusch.num_symbols > 14 {
            return Err(SimError::invalid(
                "num_symbols",
                pusch.num_symbols,
                "must be in 1..=14",
            ));
        }
        if pusch.dmrs_symbols.is_empty() {
            return Err(SimError::invalid("dmrs_symbols", "[]", "at least one DM-RS symbol"));
        }
        let mut dmrs = pusch.dmrs_symbols.clone();
        dmrs.sort_unstable();
        dmrs.dedup();
        if dmrs.len() != pusch.dmrs_symbols.len() || dmrs.iter().any(|&s| s >= pusch.num_symbols)
        {
            return Err(SimError::invalid(
                "dmrs_symbols",
                format!("{:?}", pusch.dmrs_symbols),
                "positions must be distinct and inside the allocation",
            ));
        }
        if pusch.nof_data_re() == 0 {
            return Err(SimError::invalid(
                "dmrs_symbols",
                format!("{:?}", pusch.dmrs_symbols),
                "no symbol left for data",
            ));
        }
        if pusch.num_layers == 0 {
            return Err(SimError::invalid("num_layers", 0, "must be positive"));
        }
        if !(pusch.target_code_rate > 0.0 && pusch.target_code_rate < 1.0) {
            return Err(SimError::invalid(
                "target_code_rate",
                pusch.target_code_rate,
                "must be in (0, 1)",
            ));
        }
        if pusch.tbs() + linkcal_env::types::TB_CRC_LENGTH > pusch.codeword_bits() {
            return Err(SimError::invalid(
                "target_code_rate",
                pusch.target_code_rate,
                "allocation too small for the transport block",
            ));
        }
        validate_rx_antennas(self.num_rx_antennas)?;
        validate_finite("frequency_offset_hz", self.frequency_offset_hz)?;

        if self.rv_sequence.is_empty() {
            return Err(SimError::invalid("rv_sequence", "[]", "must not be empty"));
        }
        if let Some(rv) = self.rv_sequence.iter().find(|&&rv| rv > 3) {
            return Err(SimError::invalid("rv_sequence", rv, "redundancy versions are 0..=3"));
        }
        if self.harq_process_ids.is_empty() {
            return Err(SimError::invalid("harq_process_ids", "[]", "must not be empty"));
        }
        let mut ids = self.harq_process_ids.clone();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.harq_process_ids.len() {
            return Err(SimError::invalid(
                "harq_process_ids",
                format!("{:?}", self.harq_process_ids),
                "identifiers must be distinct",
            ));
        }
        Ok(())
    }

    fn tunables(&self) -> &PuschTunables {
        &self.tunables
    }

    fn tunables_mut(&mut self) -> &mut PuschTunables {
        &mut self.tunables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prach_config_is_valid() {
        assert!(PrachSimConfig::default().validate().is_ok());
        assert!(PrachSimConfig::new(PreambleFormat::B4).validate().is_ok());
    }

    #[test]
    fn test_incompatible_format_scs_rejected() {
        let config = PrachSimConfig::new(PreambleFormat::F0).with_scs(SubcarrierSpacing::Khz30);
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("subcarrier_spacing"));
    }

    #[test]
    fn test_preamble_index_beyond_root_rejected() {
        // 839 / 419 = 2 preambles
        let config = PrachSimConfig::new(PreambleFormat::F0)
            .with_cyclic_shift(419)
            .with_preamble_index(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unsupported_antenna_count_rejected() {
        let config = PrachSimConfig::default().with_rx_antennas(3);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timing_offsets_wrap() {
        let config = PrachSimConfig::new(PreambleFormat::F0).with_cyclic_shift(40);
        assert_eq!(config.timing_offset_samples(0), 0);
        assert_eq!(config.timing_offset_samples(5), 10);
        assert_eq!(config.timing_offset_samples(10), 0);
        assert!((0..100).all(|t| config.timing_offset_samples(t) < 20));
    }

    #[test]
    fn test_short_format_tolerance_scales_with_scs() {
        let t15 = default_time_error_tolerance_us(PreambleFormat::A1, SubcarrierSpacing::Khz15);
        let t30 = default_time_error_tolerance_us(PreambleFormat::A1, SubcarrierSpacing::Khz30);
        assert!((t15 - 0.52).abs() < 1e-12);
        assert!((t30 - 0.26).abs() < 1e-12);
    }

    #[test]
    fn test_pusch_validation() {
        assert!(PuschSimConfig::default().validate().is_ok());

        let bad_rv = PuschSimConfig::default().with_rv_sequence(vec![0, 4]);
        assert!(bad_rv.validate().is_err());

        let empty_rv = PuschSimConfig::default().with_rv_sequence(vec![]);
        assert!(empty_rv.validate().is_err());

        let mut dmrs_outside = PuschSimConfig::default();
        dmrs_outside.pusch.dmrs_symbols = vec![2, 14];
        assert!(dmrs_outside.validate().is_err());
    }

    #[test]
    fn test_channel_kind_parse() {
        assert_eq!("awgn".parse::<ChannelKind>().unwrap(), ChannelKind::Awgn);
        assert_eq!(
            "TDLC300-100".parse::<ChannelKind>().unwrap(),
            ChannelKind::Fading(DelayProfile::Tdlc300)
        );
        assert!("rician".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn test_profile_max_delay() {
        assert!((DelayProfile::Tdlc300.max_delay_s() - 2595e-9).abs() < 1e-15);
    }
}
