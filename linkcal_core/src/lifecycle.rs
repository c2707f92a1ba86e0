//! Configure / lock / release state machine shared by the simulators.

use crate::config::SimulationConfig;
use crate::error::SimError;
use tracing::debug;

/// Where a simulator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unconfigured,
    Configured,
    /// Resources allocated; non-tunable parameters frozen
    Locked,
}

/// Holds the active configuration and guards non-tunable changes.
#[derive(Debug, Clone)]
pub struct Lifecycle<C: SimulationConfig> {
    config: Option<C>,
    locked: bool,
}

impl<C: SimulationConfig> Default for Lifecycle<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: SimulationConfig> Lifecycle<C> {
    pub fn new() -> Self {
        Self {
            config: None,
            locked: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        match (&self.config, self.locked) {
            (None, _) => LifecycleState::Unconfigured,
            (Some(_), false) => LifecycleState::Configured,
            (Some(_), true) => LifecycleState::Locked,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn config(&self) -> Option<&C> {
        self.config.as_ref()
    }

    /// Returns the configuration or [`SimError::Unconfigured`].
    pub fn require(&self) -> Result<&C, SimError> {
        self.config.as_ref().ok_or(SimError::Unconfigured)
    }

    /// Replaces the whole configuration. Fails while locked.
    pub fn configure(&mut self, config: C) -> Result<(), SimError> {
        if self.locked {
            return Err(SimError::LockedParameter("config"));
        }
        config.validate()?;
        self.config = Some(config);
        Ok(())
    }

    /// Mutates a non-tunable parameter.
    ///
    /// Fails with [`SimError::LockedParameter`] while locked. The change is
    /// not validated until the next [`Lifecycle::lock`].
    pub fn update<F>(&mut self, name: &'static str, mutate: F) -> Result<(), SimError>
    where
        F: FnOnce(&mut C),
    {
        if self.locked {
            return Err(SimError::LockedParameter(name));
        }
        let config = self.config.as_mut().ok_or(SimError::Unconfigured)?;
        mutate(config);
        debug!("Updated non-tunable parameter '{}'", name);
        Ok(())
    }

    /// Mutates a tunable parameter. Allowed in any configured state.
    pub fn tune<F>(&mut self, mutate: F) -> Result<(), SimError>
    where
        F: FnOnce(&mut C::Tunables),
    {
        let config = self.config.as_mut().ok_or(SimError::Unconfigured)?;
        mutate(config.tunables_mut());
        Ok(())
    }

    /// Validates the configuration and freezes it. Idempotent.
    pub fn lock(&mut self) -> Result<&C, SimError> {
        let config = self.config.as_ref().ok_or(SimError::Unconfigured)?;
        if !self.locked {
            config.validate()?;
            self.locked = true;
        }
        Ok(config)
    }

    /// Unfreezes the configuration. Returns true if it was locked.
    pub fn release(&mut self) -> bool {
        std::mem::replace(&mut self.locked, false)
    }
}
