//! Value types exchanged between the simulation engines and the PHY collaborators.

use nalgebra::{Complex, DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Complex baseband sample.
pub type Complex64 = Complex<f64>;

/// Multi-antenna baseband waveform.
///
/// Rows are time samples, columns are receive antennas.
pub type Waveform = DMatrix<Complex64>;

/// Subcarrier spacing of the simulated numerology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    Khz1_25,
    Khz5,
    Khz15,
    Khz30,
    Khz60,
    Khz120,
}

impl SubcarrierSpacing {
    /// Returns the spacing in hertz.
    pub fn hz(&self) -> f64 {
        match self {
            SubcarrierSpacing::Khz1_25 => 1_250.0,
            SubcarrierSpacing::Khz5 => 5_000.0,
            SubcarrierSpacing::Khz15 => 15_000.0,
            SubcarrierSpacing::Khz30 => 30_000.0,
            SubcarrierSpacing::Khz60 => 60_000.0,
            SubcarrierSpacing::Khz120 => 120_000.0,
        }
    }

    /// Returns the spacing in kilohertz.
    pub fn khz(&self) -> f64 {
        self.hz() / 1_000.0
    }
}

impl std::fmt::Display for SubcarrierSpacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}kHz", self.khz())
    }
}

impl std::str::FromStr for SubcarrierSpacing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().trim_end_matches("khz") {
            "1.25" => Ok(SubcarrierSpacing::Khz1_25),
            "5" => Ok(SubcarrierSpacing::Khz5),
            "15" => Ok(SubcarrierSpacing::Khz15),
            "30" => Ok(SubcarrierSpacing::Khz30),
            "60" => Ok(SubcarrierSpacing::Khz60),
            "120" => Ok(SubcarrierSpacing::Khz120),
            _ => Err(format!("Unknown subcarrier spacing: {}", s)),
        }
    }
}

/// PRACH preamble formats.
///
/// Formats 0-3 use the long (839) sequence, the others the short (139) one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PreambleFormat {
    F0,
    F1,
    F2,
    F3,
    A1,
    A2,
    A3,
    B1,
    B4,
    C0,
    C2,
}

/// Long Zadoff-Chu sequence length.
pub const LONG_SEQUENCE_LENGTH: usize = 839;

/// Short Zadoff-Chu sequence length.
pub const SHORT_SEQUENCE_LENGTH: usize = 139;

/// Maximum number of preambles per PRACH occasion.
pub const MAX_PREAMBLES: usize = 64;

impl PreambleFormat {
    /// Returns every supported format.
    pub fn all() -> Vec<PreambleFormat> {
        vec![
            PreambleFormat::F0,
            PreambleFormat::F1,
            PreambleFormat::F2,
            PreambleFormat::F3,
            PreambleFormat::A1,
            PreambleFormat::A2,
            PreambleFormat::A3,
            PreambleFormat::B1,
            PreambleFormat::B4,
            PreambleFormat::C0,
            PreambleFormat::C2,
        ]
    }

    /// True for the 839-long formats.
    pub fn is_long(&self) -> bool {
        matches!(
            self,
            PreambleFormat::F0 | PreambleFormat::F1 | PreambleFormat::F2 | PreambleFormat::F3
        )
    }

    /// Zadoff-Chu sequence length.
    pub fn sequence_length(&self) -> usize {
        if self.is_long() {
            LONG_SEQUENCE_LENGTH
        } else {
            SHORT_SEQUENCE_LENGTH
        }
    }

    /// Whether the format can be used with the given subcarrier spacing.
    pub fn supports(&self, scs: SubcarrierSpacing) -> bool {
        match self {
            PreambleFormat::F0 | PreambleFormat::F1 | PreambleFormat::F2 => {
                scs == SubcarrierSpacing::Khz1_25
            }
            PreambleFormat::F3 => scs == SubcarrierSpacing::Khz5,
            _ => matches!(
                scs,
                SubcarrierSpacing::Khz15
                    | SubcarrierSpacing::Khz30
                    | SubcarrierSpacing::Khz60
                    | SubcarrierSpacing::Khz120
            ),
        }
    }

    /// Default subcarrier spacing for the format.
    pub fn default_scs(&self) -> SubcarrierSpacing {
        match self {
            PreambleFormat::F0 | PreambleFormat::F1 | PreambleFormat::F2 => {
                SubcarrierSpacing::Khz1_25
            }
            PreambleFormat::F3 => SubcarrierSpacing::Khz5,
            _ => SubcarrierSpacing::Khz30,
        }
    }

    /// Returns the format name.
    pub fn name(&self) -> &'static str {
        match self {
            PreambleFormat::F0 => "0",
            PreambleFormat::F1 => "1",
            PreambleFormat::F2 => "2",
            PreambleFormat::F3 => "3",
            PreambleFormat::A1 => "A1",
            PreambleFormat::A2 => "A2",
            PreambleFormat::A3 => "A3",
            PreambleFormat::B1 => "B1",
            PreambleFormat::B4 => "B4",
            PreambleFormat::C0 => "C0",
            PreambleFormat::C2 => "C2",
        }
    }
}

impl std::fmt::Display for PreambleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for PreambleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PreambleFormat::all()
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown preamble format: {}", s))
    }
}

/// Modulation schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modulation {
    Pi2Bpsk,
    Qpsk,
    Qam16,
    Qam64,
    Qam256,
}

impl Modulation {
    /// Bits carried by one modulation symbol.
    pub fn bits_per_symbol(&self) -> usize {
        match self {
            Modulation::Pi2Bpsk => 1,
            Modulation::Qpsk => 2,
            Modulation::Qam16 => 4,
            Modulation::Qam64 => 6,
            Modulation::Qam256 => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Modulation::Pi2Bpsk => "pi/2-BPSK",
            Modulation::Qpsk => "QPSK",
            Modulation::Qam16 => "16QAM",
            Modulation::Qam64 => "64QAM",
            Modulation::Qam256 => "256QAM",
        }
    }
}

impl std::fmt::Display for Modulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Time-domain transmit waveform produced by a generator collaborator.
#[derive(Debug, Clone)]
pub struct TxWaveform {
    /// Single-port baseband samples
    pub samples: DVector<Complex64>,

    /// Sampling rate in Hz
    pub sample_rate_hz: f64,

    /// Transform size used for the per-resource-element SNR normalization
    pub transform_size: usize,

    /// Cyclic prefix length in samples
    pub cyclic_prefix_len: usize,
}

impl TxWaveform {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// =============================================================================
// PRACH
// =============================================================================

/// PRACH occasion parameters shared by generator and detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrachConfig {
    pub format: PreambleFormat,
    pub scs: SubcarrierSpacing,
    /// Zadoff-Chu root (u in 1..L)
    pub root_sequence_index: usize,
    /// Cyclic shift N_CS in samples
    pub cyclic_shift: usize,
    /// Index of the transmitted preamble
    pub preamble_index: usize,
}

impl PrachConfig {
    pub fn sequence_length(&self) -> usize {
        self.format.sequence_length()
    }

    /// Critically sampled rate: one sample per sequence element.
    pub fn sample_rate_hz(&self) -> f64 {
        self.sequence_length() as f64 * self.scs.hz()
    }

    /// Number of preambles obtainable from the root by cyclic shifts.
    pub fn nof_preambles(&self) -> usize {
        if self.cyclic_shift == 0 {
            return 0;
        }
        (self.sequence_length() / self.cyclic_shift).min(MAX_PREAMBLES)
    }

    /// Cyclic prefix covering one cyclic shift and an eighth of the sequence.
    pub fn cyclic_prefix_len(&self) -> usize {
        self.cyclic_shift.max(self.sequence_length() / 8)
    }

    /// Total waveform length (cyclic prefix plus sequence).
    pub fn waveform_len(&self) -> usize {
        self.cyclic_prefix_len() + self.sequence_length()
    }
}

/// Detector parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PrachDetectorConfig {
    pub prach: PrachConfig,
    /// Normalized-correlation detection threshold
    pub threshold: f64,
    pub num_rx_antennas: usize,
}

/// A detected preamble.
#[derive(Debug, Clone, PartialEq)]
pub struct PreambleIndication {
    pub preamble_index: usize,
    /// Estimated time advance in seconds
    pub time_advance_s: f64,
    pub power_db: f64,
    pub snr_db: f64,
}

/// Detector output for one PRACH occasion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrachDetectionResult {
    pub preambles: Vec<PreambleIndication>,
    pub rssi_db: f64,
    pub time_resolution_s: f64,
    pub time_advance_max_s: f64,
}

impl PrachDetectionResult {
    /// Returns the indication for the given preamble, if detected.
    pub fn find(&self, preamble_index: usize) -> Option<&PreambleIndication> {
        self.preambles
            .iter()
            .find(|p| p.preamble_index == preamble_index)
    }
}

// =============================================================================
// PUSCH
// =============================================================================

/// Largest LDPC information block (base graph 1).
pub const MAX_SEGMENT_SIZE: usize = 8448;

/// Transport block CRC length in bits.
pub const TB_CRC_LENGTH: usize = 24;

/// PUSCH allocation parameters shared by transmitter and receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PuschConfig {
    pub modulation: Modulation,
    pub num_prbs: usize,
    /// OFDM symbols in the allocation
    pub num_symbols: usize,
    /// Positions of the DM-RS symbols within the allocation
    pub dmrs_symbols: Vec<usize>,
    pub num_layers: usize,
    pub scs: SubcarrierSpacing,
    pub rnti: u16,
    pub target_code_rate: f64,
}

impl Default for PuschConfig {
    fn default() -> Self {
        Self {
            modulation: Modulation::Qpsk,
            num_prbs: 4,
            num_symbols: 14,
            dmrs_symbols: vec![2, 11],
            num_layers: 1,
            scs: SubcarrierSpacing::Khz30,
            rnti: 1,
            target_code_rate: 0.5,
        }
    }
}

impl PuschConfig {
    pub fn nof_subcarriers(&self) -> usize {
        12 * self.num_prbs
    }

    /// Transform size leaving a guard band of at least a quarter of the band.
    pub fn transform_size(&self) -> usize {
        (self.nof_subcarriers() * 4 / 3).next_power_of_two().max(16)
    }

    pub fn cyclic_prefix_len(&self) -> usize {
        (self.transform_size() / 4).max(8)
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.transform_size() as f64 * self.scs.hz()
    }

    /// Resource elements available for data.
    pub fn nof_data_re(&self) -> usize {
        let data_symbols = self.num_symbols.saturating_sub(self.dmrs_symbols.len());
        self.nof_subcarriers() * data_symbols
    }

    /// Rate-matched codeword length E.
    pub fn codeword_bits(&self) -> usize {
        self.nof_data_re() * self.modulation.bits_per_symbol() * self.num_layers
    }

    /// Transport block size for the target code rate, byte aligned.
    pub fn tbs(&self) -> usize {
        let raw = (self.codeword_bits() as f64 * self.target_code_rate).floor() as usize;
        (raw.saturating_sub(TB_CRC_LENGTH) / 8 * 8).max(8)
    }
}

/// Codeword segmentation parameters handed to the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentConfig {
    pub tbs: usize,
    pub rv: u8,
    pub modulation: Modulation,
    pub codeword_bits: usize,
    pub nof_layers: usize,
}

impl SegmentConfig {
    /// Builds the segmentation for a PUSCH allocation and redundancy version.
    pub fn for_pusch(config: &PuschConfig, rv: u8) -> Self {
        Self {
            tbs: config.tbs(),
            rv,
            modulation: config.modulation,
            codeword_bits: config.codeword_bits(),
            nof_layers: config.num_layers,
        }
    }

    /// Number of codeblocks after segmentation.
    pub fn nof_codeblocks(&self) -> usize {
        let b = self.tbs + TB_CRC_LENGTH;
        if b <= MAX_SEGMENT_SIZE {
            1
        } else {
            b.div_ceil(MAX_SEGMENT_SIZE - TB_CRC_LENGTH)
        }
    }
}

/// Identifier of a decoder soft buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoftBufferId {
    pub rnti: u16,
    pub harq_ack_id: u8,
    pub nof_codeblocks: usize,
}

/// Decoder output.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeResult {
    /// Decoded transport block bits (one bit per byte)
    pub transport_block: Vec<u8>,
    pub crc_ok: bool,
    /// Decoder iterations spent
    pub iterations: u32,
}

/// What a PUSCH transmit/receive chain implementation can process.
#[derive(Debug, Clone, PartialEq)]
pub struct PuschCapabilities {
    pub max_layers: usize,
    pub modulations: Vec<Modulation>,
}

impl PuschCapabilities {
    pub fn supports(&self, modulation: Modulation) -> bool {
        self.modulations.contains(&modulation)
    }
}
