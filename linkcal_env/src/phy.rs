//! Narrow interfaces to the external PHY primitives.
//!
//! The simulation engines never look inside these collaborators: they hand
//! over structured configuration and receive sample, bit or soft-bit arrays.
//!
//! ```text
//!  Engine                     Collaborators
//!    |-- generate(cfg) --------> PrachGenerator / PuschTransmitter
//!    |<------------- waveform --|
//!    |   [channel, noise, CFO]
//!    |-- detect(rx, cfg) ------> PrachDetector
//!    |-- demodulate(rx) -------> PuschDemodulator -- llrs --> PuschDecoder
//! ```

use crate::error::PhyError;
use crate::types::{
    DecodeResult, PrachConfig, PrachDetectionResult, PrachDetectorConfig, PuschCapabilities,
    PuschConfig, SegmentConfig, SoftBufferId, TxWaveform, Waveform,
};

/// Builds PRACH preamble waveforms.
pub trait PrachGenerator {
    /// Generates the time-domain preamble for `config`.
    ///
    /// Must be deterministic: the same configuration always yields the same samples.
    fn generate(&self, config: &PrachConfig) -> Result<TxWaveform, PhyError>;
}

/// Detects PRACH preambles in received samples.
pub trait PrachDetector {
    /// Sets the known propagation delay (in samples) to compensate before detection.
    fn set_delay(&mut self, delay_samples: usize);

    /// Runs detection over a multi-antenna received waveform.
    fn detect(
        &self,
        received: &Waveform,
        config: &PrachDetectorConfig,
    ) -> Result<PrachDetectionResult, PhyError>;
}

/// Encodes, rate-matches and modulates PUSCH transport blocks.
pub trait PuschTransmitter {
    /// Returns what this implementation can transmit.
    fn capabilities(&self) -> PuschCapabilities;

    /// Builds the transmit waveform of `transport_block` for redundancy version `rv`.
    ///
    /// # Arguments
    /// * `transport_block` - One bit per byte, `config.tbs()` entries
    fn transmit(
        &self,
        config: &PuschConfig,
        transport_block: &[u8],
        rv: u8,
    ) -> Result<TxWaveform, PhyError>;
}

/// Demodulates received PUSCH waveforms into soft bits.
pub trait PuschDemodulator {
    /// Sets the known propagation delay (in samples) to compensate before demodulation.
    fn set_delay(&mut self, delay_samples: usize);

    /// Returns one quantized LLR per codeword bit (positive favours bit 0).
    ///
    /// # Arguments
    /// * `noise_var` - Noise variance per resource element
    fn demodulate(
        &self,
        received: &Waveform,
        config: &PuschConfig,
        noise_var: f64,
    ) -> Result<Vec<i8>, PhyError>;
}

/// Decodes soft bits, combining them across HARQ retransmissions.
pub trait PuschDecoder {
    /// Decodes one transmission.
    ///
    /// When `new_data` is true the soft buffer identified by `buffer` is
    /// invalidated before combining.
    fn decode(
        &mut self,
        llrs: &[i8],
        segment: &SegmentConfig,
        buffer: &SoftBufferId,
        new_data: bool,
    ) -> Result<DecodeResult, PhyError>;

    /// Drops every soft buffer.
    fn release(&mut self);
}
