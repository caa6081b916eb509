use std::{collections::HashMap, num::NonZeroUsize, sync::Arc};

use log::debug;
use machine_learning::ParameterVector;
use parking_lot::Mutex;

use super::{ExchangeRecord, ExchangeStore, WorkerId};
use crate::{Result, WorkerErr};

/// Something that happened to a `MemoryStore`, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Published { worker: WorkerId, round: u64 },
    Read { worker: WorkerId, round: u64 },
}

#[derive(Debug, Default)]
struct Slots {
    vectors: HashMap<(u64, WorkerId), ParameterVector>,
    journal: Vec<StoreEvent>,
}

/// An in-process exchange shared by handles of the same cohort.
///
/// Every handle writes to its own worker's slot. All accesses are appended to a journal so
/// the write-before-read ordering the barrier guarantees can be checked afterwards.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    worker: WorkerId,
    cohort: NonZeroUsize,
    slots: Arc<Mutex<Slots>>,
}

impl MemoryStore {
    /// Creates a new, empty store and returns the handle of worker `0`.
    pub fn new(cohort: NonZeroUsize) -> Self {
        Self {
            worker: 0,
            cohort,
            slots: Arc::default(),
        }
    }

    /// Returns a handle over the same slots acting as `worker`.
    pub fn handle(&self, worker: WorkerId) -> Self {
        Self {
            worker,
            cohort: self.cohort,
            slots: Arc::clone(&self.slots),
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Returns a copy of every event recorded so far.
    pub fn journal(&self) -> Vec<StoreEvent> {
        self.slots.lock().journal.clone()
    }
}

impl ExchangeStore for MemoryStore {
    async fn publish(&mut self, round: u64, params: &ParameterVector) -> Result<()> {
        let mut slots = self.slots.lock();
        slots.vectors.insert((round, self.worker), params.clone());
        slots.journal.push(StoreEvent::Published {
            worker: self.worker,
            round,
        });

        debug!(worker_id = self.worker, round = round; "published in memory");
        Ok(())
    }

    async fn read_all(&self, round: u64) -> Result<ExchangeRecord> {
        let mut slots = self.slots.lock();

        let entries = (0..self.cohort.get())
            .map(|worker| match slots.vectors.get(&(round, worker)) {
                Some(params) => Ok((worker, params.clone())),
                None => Err(WorkerErr::Exchange {
                    round,
                    detail: format!("worker {worker} has not published"),
                }),
            })
            .collect::<Result<Vec<_>>>()?;

        slots.journal.push(StoreEvent::Read {
            worker: self.worker,
            round,
        });

        Ok(ExchangeRecord::new(entries))
    }

    async fn retire(&mut self, round: u64) -> Result<()> {
        self.slots.lock().vectors.remove(&(round, self.worker));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cohort(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test]
    async fn reads_every_slot_of_the_round() -> Result<()> {
        let mut a = MemoryStore::new(cohort(2));
        let mut b = a.handle(1);

        a.publish(1, &ParameterVector::from_flat(vec![1.0])).await?;
        b.publish(1, &ParameterVector::from_flat(vec![2.0])).await?;

        let record = a.read_all(1).await?;
        assert_eq!(record.workers().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(record.get(1), Some(&ParameterVector::from_flat(vec![2.0])));

        Ok(())
    }

    #[tokio::test]
    async fn missing_participant_is_fatal() -> Result<()> {
        let mut a = MemoryStore::new(cohort(2));
        a.publish(1, &ParameterVector::from_flat(vec![1.0])).await?;

        let err = a.read_all(1).await.unwrap_err();
        assert!(matches!(err, WorkerErr::Exchange { round: 1, .. }));
        assert_eq!(a.journal().len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn rounds_do_not_leak_into_each_other() -> Result<()> {
        let mut a = MemoryStore::new(cohort(1));
        a.publish(1, &ParameterVector::from_flat(vec![1.0])).await?;

        assert!(a.read_all(2).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn retire_drops_only_the_own_slot() -> Result<()> {
        let mut a = MemoryStore::new(cohort(2));
        let mut b = a.handle(1);

        a.publish(1, &ParameterVector::from_flat(vec![1.0])).await?;
        b.publish(1, &ParameterVector::from_flat(vec![2.0])).await?;
        a.retire(1).await?;

        let err = b.read_all(1).await.unwrap_err();
        assert!(err.to_string().contains("worker 0 has not published"), "{err}");

        b.retire(1).await?;
        b.retire(1).await?;
        assert!(a.slots.lock().vectors.is_empty());
        Ok(())
    }
}
