//! Channel models.

use crate::config::{ChannelKind, MimoCorrelation};
use crate::error::SimError;
use crate::fading::FadingChannel;
use linkcal_env::{Complex64, Waveform};
use nalgebra::DVector;

/// Channel metadata needed for perfect synchronization and padding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelInfo {
    /// Delay introduced by the channel filters, in samples
    pub filter_delay: usize,

    /// Samples to append so the channel tail is not truncated
    pub max_delay: usize,

    /// Factor applied to the noise variance to keep the per-antenna SNR
    pub normalization: f64,
}

/// A propagation channel.
pub trait ChannelModel {
    /// Returns one output column per receive antenna, same length as `input`.
    fn apply(&mut self, input: &DVector<Complex64>) -> Waveform;

    fn info(&self) -> ChannelInfo;

    fn num_receive_antennas(&self) -> usize;

    /// Restores the random state to its seed without changing configuration.
    fn reset(&mut self);

    /// Replaces the seed and resets.
    fn reseed(&mut self, seed: u64);
}

/// Identity channel replicating the input on every antenna.
#[derive(Debug, Clone)]
pub struct AwgnChannel {
    num_rx: usize,
}

impl AwgnChannel {
    pub fn new(num_rx: usize) -> Self {
        Self { num_rx }
    }
}

impl ChannelModel for AwgnChannel {
    fn apply(&mut self, input: &DVector<Complex64>) -> Waveform {
        Waveform::from_fn(input.len(), self.num_rx, |n, _| input[n])
    }

    fn info(&self) -> ChannelInfo {
        ChannelInfo {
            filter_delay: 0,
            max_delay: 0,
            normalization: 1.0,
        }
    }

    fn num_receive_antennas(&self) -> usize {
        self.num_rx
    }

    fn reset(&mut self) {}

    fn reseed(&mut self, _seed: u64) {}
}

/// Channel selected from a [`ChannelKind`].
#[derive(Debug, Clone)]
pub enum Channel {
    Awgn(AwgnChannel),
    Fading(Box<FadingChannel>),
}

impl Channel {
    pub fn new(
        kind: ChannelKind,
        correlation: MimoCorrelation,
        num_rx: usize,
        sample_rate_hz: f64,
        seed: u64,
    ) -> Result<Self, SimError> {
        match kind {
            ChannelKind::Awgn => Ok(Channel::Awgn(AwgnChannel::new(num_rx))),
            ChannelKind::Fading(profile) => Ok(Channel::Fading(Box::new(FadingChannel::new(
                profile,
                correlation,
                num_rx,
                sample_rate_hz,
                seed,
            )?))),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::Awgn(_) => ChannelKind::Awgn,
            Channel::Fading(fading) => ChannelKind::Fading(fading.profile()),
        }
    }
}

impl ChannelModel for Channel {
    fn apply(&mut self, input: &DVector<Complex64>) -> Waveform {
        match self {
            Channel::Awgn(channel) => channel.apply(input),
            Channel::Fading(channel) => channel.apply(input),
        }
    }

    fn info(&self) -> ChannelInfo {
        match self {
            Channel::Awgn(channel) => channel.info(),
            Channel::Fading(channel) => channel.info(),
        }
    }

    fn num_receive_antennas(&self) -> usize {
        match self {
            Channel::Awgn(channel) => channel.num_receive_antennas(),
            Channel::Fading(channel) => channel.num_receive_antennas(),
        }
    }

    fn reset(&mut self) {
        match self {
            Channel::Awgn(channel) => channel.reset(),
            Channel::Fading(channel) => channel.reset(),
        }
    }

    fn reseed(&mut self, seed: u64) {
        match self {
            Channel::Awgn(channel) => channel.reseed(seed),
            Channel::Fading(channel) => channel.reseed(seed),
        }
    }
}
