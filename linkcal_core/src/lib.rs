//! linkcal Core - building blocks of link-level Monte-Carlo simulation
//!
//! This library holds everything the simulation engines share that does not
//! depend on a particular PHY implementation:
//! 1. **Configuration**: typed, validated records with a lock/release lifecycle
//! 2. **Propagation**: identity and tapped-delay-line fading channels plus
//!    timing, noise and frequency-offset impairments
//! 3. **Retransmission**: the round-robin HARQ entity
//! 4. **Calibration**: the Anderson-Bjorck threshold search
//! 5. **Statistics**: SNR-keyed accumulators with overwrite-on-rerun merge

pub mod channel;
pub mod config;
mod error;
pub mod fading;
pub mod harq;
pub mod impairments;
pub mod lifecycle;
pub mod results;
pub mod threshold;

// Re-export key types for convenience
pub use channel::{AwgnChannel, Channel, ChannelInfo, ChannelModel};
pub use config::{
    ChannelKind, DecoderKind, DelayProfile, MimoCorrelation, PrachSimConfig, PrachTestType,
    PrachTunables, PuschSimConfig, PuschTunables, SimulationConfig,
};
pub use error::SimError;
pub use fading::FadingChannel;
pub use harq::{HarqEntity, HarqProcessState, HarqTransition};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use results::{BlerPoint, SnrKeyed, SnrPoint, SnrResults};
pub use threshold::{FalseAlarmProbe, SearchConfig, ThresholdEstimate, ThresholdSearch};
