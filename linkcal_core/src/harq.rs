//! HARQ process tracking.
//!
//! Processes are served round robin. Each one walks the redundancy version
//! sequence until its block decodes or the sequence is exhausted.

use crate::error::SimError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// State of one HARQ process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarqProcessState {
    pub id: u8,

    /// Index into the redundancy version sequence
    pub rv_index: usize,

    /// The next transmission carries a new transport block
    pub new_data: bool,

    /// The last block was dropped after exhausting the sequence
    pub timed_out: bool,
}

impl HarqProcessState {
    fn new(id: u8) -> Self {
        Self {
            id,
            rv_index: 0,
            new_data: true,
            timed_out: false,
        }
    }
}

/// Outcome of [`HarqEntity::advance`] for the process that just transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqTransition {
    /// Block decoded, next transmission is new data
    Acknowledged,
    /// Block in error, next transmission is a retransmission
    Retransmit,
    /// Block in error on the last redundancy version and dropped
    SequenceTimeout,
}

/// Round-robin HARQ entity.
#[derive(Debug, Clone)]
pub struct HarqEntity {
    processes: Vec<HarqProcessState>,
    rv_sequence: Vec<u8>,
    current: usize,
}

impl HarqEntity {
    pub fn new(process_ids: &[u8], rv_sequence: &[u8]) -> Result<Self, SimError> {
        if process_ids.is_empty() {
            return Err(SimError::invalid(
                "harq_process_ids",
                "[]",
                "must not be empty",
            ));
        }
        if rv_sequence.is_empty() {
            return Err(SimError::invalid("rv_sequence", "[]", "must not be empty"));
        }
        Ok(Self {
            processes: process_ids.iter().map(|&id| HarqProcessState::new(id)).collect(),
            rv_sequence: rv_sequence.to_vec(),
            current: 0,
        })
    }

    pub fn current_process_id(&self) -> u8 {
        self.processes[self.current].id
    }

    pub fn is_new_data(&self) -> bool {
        self.processes[self.current].new_data
    }

    pub fn redundancy_version(&self) -> u8 {
        self.rv_sequence[self.processes[self.current].rv_index]
    }

    pub fn current(&self) -> &HarqProcessState {
        &self.processes[self.current]
    }

    pub fn processes(&self) -> &[HarqProcessState] {
        &self.processes
    }

    /// Applies the transmission outcome to the current process, then moves to
    /// the next process.
    pub fn advance(&mut self, block_in_error: bool) -> HarqTransition {
        let max_rv_index = self.rv_sequence.len() - 1;
        let process = &mut self.processes[self.current];

        let transition = if !block_in_error {
            process.rv_index = 0;
            process.new_data = true;
            process.timed_out = false;
            HarqTransition::Acknowledged
        } else if process.rv_index < max_rv_index {
            process.rv_index += 1;
            process.new_data = false;
            process.timed_out = false;
            HarqTransition::Retransmit
        } else {
            debug!("HARQ process {} timed out", process.id);
            process.rv_index = 0;
            process.new_data = true;
            process.timed_out = true;
            HarqTransition::SequenceTimeout
        };

        self.current = (self.current + 1) % self.processes.len();
        transition
    }

    /// Returns every process to new data at the first redundancy version.
    pub fn reset(&mut self) {
        for process in &mut self.processes {
            *process = HarqProcessState::new(process.id);
        }
        self.current = 0;
    }
}
