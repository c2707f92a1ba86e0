//! Configuration tables iterated by the calibration sweep.

use crate::error::SweepError;
use linkcal_core::{PrachSimConfig, SimulationConfig};
use linkcal_env::{PreambleFormat, SubcarrierSpacing};
use serde::{Deserialize, Serialize};

/// Unrestricted-set cyclic shifts of the long-sequence formats.
pub const LONG_CYCLIC_SHIFTS: [usize; 15] =
    [13, 15, 18, 22, 26, 32, 38, 46, 59, 76, 93, 119, 167, 279, 419];

/// Cyclic shifts of the short-sequence formats.
pub const SHORT_CYCLIC_SHIFTS: [usize; 15] =
    [2, 4, 6, 8, 10, 12, 13, 15, 17, 19, 23, 27, 34, 46, 69];

/// Receive antenna counts covered by the standard table.
pub const CALIBRATION_RX_ANTENNAS: [usize; 3] = [1, 2, 4];

/// One (configuration, cyclic shift) pair to calibrate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub format: PreambleFormat,
    pub scs: SubcarrierSpacing,
    pub num_rx_antennas: usize,
    pub cyclic_shift: usize,
}

impl CalibrationEntry {
    /// Detection-test configuration of this entry.
    pub fn prach_config(&self) -> PrachSimConfig {
        PrachSimConfig::new(self.format)
            .with_scs(self.scs)
            .with_rx_antennas(self.num_rx_antennas)
            .with_cyclic_shift(self.cyclic_shift)
    }

    /// Checks the entry describes a valid configuration.
    pub fn check(&self, index: usize) -> Result<(), SweepError> {
        self.prach_config()
            .validate()
            .map_err(|e| SweepError::Assertion(format!("configuration {}: {}", index, e)))
    }
}

/// Ordered list of entries. Row `i` of the result table belongs to entry `i`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigTable {
    entries: Vec<CalibrationEntry>,
}

impl ConfigTable {
    pub fn new(entries: Vec<CalibrationEntry>) -> Self {
        Self { entries }
    }

    /// Format x subcarrier spacing x antennas x cyclic shift, in that nesting
    /// order.
    pub fn standard() -> Self {
        let families = [
            (PreambleFormat::F0, SubcarrierSpacing::Khz1_25),
            (PreambleFormat::A1, SubcarrierSpacing::Khz30),
            (PreambleFormat::B4, SubcarrierSpacing::Khz30),
            (PreambleFormat::C2, SubcarrierSpacing::Khz30),
        ];

        let mut entries = Vec::new();
        for (format, scs) in families {
            let shifts: &[usize] = if format.is_long() {
                &LONG_CYCLIC_SHIFTS
            } else {
                &SHORT_CYCLIC_SHIFTS
            };
            for num_rx_antennas in CALIBRATION_RX_ANTENNAS {
                for &cyclic_shift in shifts {
                    entries.push(CalibrationEntry {
                        format,
                        scs,
                        num_rx_antennas,
                        cyclic_shift,
                    });
                }
            }
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[CalibrationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
