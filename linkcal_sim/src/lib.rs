//! linkcal Monte-Carlo simulation engines
//!
//! This crate runs the link-level simulations on top of `linkcal_core`:
//!
//! - **PRACH**: detection and false-alarm trials over an SNR list
//! - **PUSCH**: block error rate and throughput with HARQ retransmissions
//! - **Calibration**: a resumable sweep searching detection thresholds for
//!   every entry of a configuration table, saved after every row
//!
//! # Determinism
//!
//! All randomness comes from a [`SeedSequence`]. The streams of an SNR point
//! depend only on the master seed and the point's position in the sorted SNR
//! list, so a rerun with the same arguments reproduces every counter.
//!
//! # Architecture
//!
//! ```text
//!  CalibrationSweep ──► ThresholdSearch ──► PrachSimulator::step
//!        │                                       │
//!        ▼                                       ├─► PrachGenerator
//!   TableStore (save per row)                    ├─► Channel + AWGN + CFO
//!                                                └─► PrachDetector
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use linkcal_sim::{ReferencePrachSimulator, SeedSequence};
//! use linkcal_core::PrachSimConfig;
//! use linkcal_env::PreambleFormat;
//!
//! let mut sim = ReferencePrachSimulator::reference(SeedSequence::new(42));
//! sim.configure(PrachSimConfig::new(PreambleFormat::F0))?;
//! sim.step(&[-14.2, -12.0], 1000)?;
//! ```

mod context;
mod error;
pub mod prach;
pub mod pusch;
pub mod reference;
pub mod scenarios;
pub mod sweep;
pub mod table;

pub use context::SeedSequence;
pub use error::SweepError;
pub use prach::{PrachSimulator, ReferencePrachSimulator};
pub use pusch::{PuschSimulator, ReferencePuschSimulator};
pub use scenarios::{CalibrationEntry, ConfigTable};
pub use sweep::{CalibrationSweep, SweepSettings, SweepSummary};
pub use table::{CalibrationRow, JsonTableStore, MemoryTableStore, ResultTable, TableStore};
