//! Where workers publish their parameters and read the cohort's.
//!
//! A worker only writes its own slot and only reads after the coordinator's barrier, so the
//! stores never arbitrate between writers. `publish` must be durable before it returns, and
//! `read_all` must only run once `sync` answered `Continue` for the same round.

mod file;
mod memory;

use machine_learning::ParameterVector;

use crate::Result;

pub use file::{FileStore, Layout};
pub use memory::{MemoryStore, StoreEvent};

/// Identifies a participant of the cohort, `0..cohort`.
pub type WorkerId = usize;

/// The vectors published by the whole cohort for one round, in collection order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeRecord {
    entries: Vec<(WorkerId, ParameterVector)>,
}

impl ExchangeRecord {
    pub fn new(entries: Vec<(WorkerId, ParameterVector)>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, worker: WorkerId) -> Option<&ParameterVector> {
        self.entries
            .iter()
            .find_map(|(id, params)| (*id == worker).then_some(params))
    }

    pub fn workers(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    /// Drops the worker identities, the aggregator treats every participant alike.
    pub fn into_vectors(self) -> Vec<ParameterVector> {
        self.entries.into_iter().map(|(_, params)| params).collect()
    }
}

/// Shared storage for the parameter vectors exchanged each round.
#[allow(unused)]
#[trait_variant::make(ExchangeStore: Send)]
pub trait ExchangeStoreTemplate {
    /// Writes this worker's vector for `round`, overwriting any previous one.
    ///
    /// # Returns
    /// Only once the write is durable, a peer reading after the barrier must never observe a
    /// partial vector.
    async fn publish(&mut self, round: u64, params: &ParameterVector) -> Result<()>;

    /// Reads every participant's vector for `round`.
    ///
    /// # Returns
    /// The full cohort, or `WorkerErr::Exchange` if any expected entry is missing or corrupt.
    /// A partial cohort is never returned.
    async fn read_all(&self, round: u64) -> Result<ExchangeRecord>;

    /// Drops this worker's own entry for `round`, once no peer can still need it.
    ///
    /// Retiring an entry that is already gone is not an error.
    async fn retire(&mut self, round: u64) -> Result<()>;
}
