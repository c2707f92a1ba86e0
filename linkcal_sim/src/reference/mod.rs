//! Reference PHY collaborators.
//!
//! Self-contained implementations of the `linkcal_env` traits. They are not
//! bit-exact to any product but exhibit the behaviour the engines rely on:
//! thresholded detection with timing estimates, RV-dependent rate matching,
//! soft combining and CRC-checked decoding.

mod prach;
mod pusch;
mod softbuffer;

pub use prach::{zadoff_chu, CorrelationDetector, ZadoffChuGenerator};
pub use pusch::{
    attach_crc, check_crc, crc24a, encode, modulate, quantize_llr, rate_match,
    OfdmPuschDemodulator, OfdmPuschTransmitter,
};
pub use softbuffer::{
    build_decoder, HardDecisionDecoder, SoftBufferPool, SoftBufferPoolConfig, SoftCombiningDecoder,
};
