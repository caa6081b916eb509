use std::fmt;

use crate::{Result, WorkerErr};

/// Where a worker stands inside its current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Ready,
    Training,
    Published,
    Awaiting,
    Aggregated,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Ready => "ready",
            Phase::Training => "training",
            Phase::Published => "published",
            Phase::Awaiting => "awaiting",
            Phase::Aggregated => "aggregated",
            Phase::Stopped => "stopped",
        };

        f.write_str(name)
    }
}

/// The round counter and phase of a worker.
///
/// Only the transitions of the round lifecycle are accepted, and the counter only moves
/// forward: it starts at `1` and grows by one each time an aggregated round goes back to
/// training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundState {
    round: u64,
    phase: Phase,
}

impl Default for RoundState {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundState {
    pub fn new() -> Self {
        Self {
            round: 1,
            phase: Phase::Init,
        }
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Moves to `next`.
    ///
    /// # Errors
    /// Returns `WorkerErr::Protocol` if `next` does not follow the current phase, the state is
    /// left untouched.
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        use Phase::*;

        match (self.phase, next) {
            (Init, Ready)
            | (Ready, Training)
            | (Training, Published)
            | (Published, Awaiting)
            | (Awaiting, Aggregated)
            | (Awaiting, Stopped) => {}
            (Aggregated, Training) => self.round += 1,
            (from, to) => {
                return Err(WorkerErr::Protocol {
                    round: self.round,
                    detail: format!("illegal transition from {from} to {to}"),
                });
            }
        }

        self.phase = next;
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == Phase::Stopped
    }
}
