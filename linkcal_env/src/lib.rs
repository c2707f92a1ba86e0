//! linkcal Environment Abstraction Layer
//!
//! This crate defines the collaborator contracts of the link-level simulator:
//! the PHY primitives (preamble generation and detection, PUSCH
//! transmission, demodulation and decoding) are black boxes reached through
//! the traits in [`phy`], exchanging the value types in [`types`].
//!
//! Any implementation of these traits (a bit-exact product library or the
//! reference chain shipped with `linkcal_sim`) can be plugged into the
//! Monte-Carlo engines without touching them.

mod error;
pub mod phy;
pub mod types;

pub use error::PhyError;
pub use phy::{PrachDetector, PrachGenerator, PuschDecoder, PuschDemodulator, PuschTransmitter};
pub use types::{
    Complex64, DecodeResult, Modulation, PrachConfig, PrachDetectionResult, PrachDetectorConfig,
    PreambleFormat, PreambleIndication, PuschCapabilities, PuschConfig, SegmentConfig,
    SoftBufferId, SubcarrierSpacing, TxWaveform, Waveform,
};
