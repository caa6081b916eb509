use std::{io, num::NonZeroU64};

use comms::msg::Reply;
use log::{debug, info, warn};
use machine_learning::{
    Aggregator,
    training::{LocalTrainer, TrainStats},
};
use tokio::{task, time::Instant};

use crate::{
    Result, WorkerErr,
    exchange::{ExchangeStore, WorkerId},
    metrics::{Metrics, RunReport},
    net::RoundCoordinator,
    state::{Phase, RoundState},
};

/// Drives one worker through the federated rounds.
///
/// Every round trains locally, publishes the result, then blocks on the coordinator's
/// barrier. A `Continue` means every peer published, so the cohort is read back, averaged
/// and loaded before the next round; a `Stop` ends the run with the local parameters as they
/// are, without reading or aggregating.
///
/// Passing the barrier of round `r` also retires this worker's entry of round `r - 1`. The
/// entries of the last round are left in place.
///
/// Training is CPU-bound and runs on Tokio's blocking pool. The trainer is moved in and back
/// out, so it must be `Send + 'static`.
pub struct WorkerLoop<T, S> {
    worker_id: WorkerId,
    trainer: T,
    store: S,
    aggregator: Aggregator,
    state: RoundState,
    metrics: Metrics,
    max_rounds: Option<NonZeroU64>,
}

impl<T, S> WorkerLoop<T, S>
where
    T: LocalTrainer + Send + 'static,
    S: ExchangeStore + Send,
{
    /// Creates a new `WorkerLoop`.
    ///
    /// # Args
    /// * `worker_id` - This worker's identity inside the cohort.
    /// * `trainer` - The local model, already loaded with its shard.
    /// * `store` - Where vectors are exchanged with the rest of the cohort.
    pub fn new(worker_id: WorkerId, trainer: T, store: S) -> Self {
        Self {
            worker_id,
            trainer,
            store,
            aggregator: Aggregator::new(),
            state: RoundState::new(),
            metrics: Metrics::default(),
            max_rounds: None,
        }
    }

    /// Fails the run if the coordinator has not stopped it after `max_rounds` rounds.
    pub fn with_max_rounds(mut self, max_rounds: Option<NonZeroU64>) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn state(&self) -> &RoundState {
        &self.state
    }

    /// Runs rounds until the coordinator answers `Stop`.
    ///
    /// # Returns
    /// The accuracy history, the wall-clock time since the cohort was ready, and the local
    /// parameters held when the stop arrived.
    ///
    /// # Errors
    /// Every failure is fatal: coordinator protocol or channel errors, a missing or corrupt
    /// peer vector, a cohort that cannot be averaged, or a trainer error.
    pub async fn run<C>(mut self, coordinator: &mut C) -> Result<RunReport>
    where
        C: RoundCoordinator,
    {
        let worker_id = self.worker_id;

        self.state.advance(Phase::Ready)?;
        let started = Instant::now();
        coordinator.ready().await?;
        info!(worker_id = worker_id; "cohort ready, starting round 1");

        loop {
            self.state.advance(Phase::Training)?;
            let round = self.state.round();
            self.check_cap(round)?;

            let (trainer, stats) = train_blocking(self.trainer).await?;
            self.trainer = trainer;
            let stats = stats.map_err(|source| WorkerErr::Training { round, source })?;
            let local = self
                .trainer
                .evaluate()
                .map_err(|source| WorkerErr::Training { round, source })?;
            self.metrics.push_local(local);
            debug!(
                worker_id = worker_id, round = round, steps = stats.steps, loss = stats.loss;
                "local accuracy {local:.4}"
            );

            let params = self.trainer.parameters();
            self.store.publish(round, &params).await?;
            self.state.advance(Phase::Published)?;

            self.state.advance(Phase::Awaiting)?;
            let reply = coordinator.sync(round).await?;

            // Every peer published `round`, so every peer is done reading the one before.
            if round > 1 {
                if let Err(e) = self.store.retire(round - 1).await {
                    warn!(worker_id = worker_id, round = round; "cannot retire round {}: {e}", round - 1);
                }
            }

            match reply {
                Reply::Stop => {
                    self.state.advance(Phase::Stopped)?;
                    info!(worker_id = worker_id, round = round; "coordinator stopped the cohort");
                    break;
                }
                Reply::Continue => {}
            }

            let record = self.store.read_all(round).await?;
            let global = self
                .aggregator
                .mean(&record.into_vectors())
                .map_err(|source| WorkerErr::Aggregation { round, source })?;

            self.trainer
                .set_parameters(global)
                .map_err(|source| WorkerErr::Aggregation { round, source })?;
            let global = self
                .trainer
                .evaluate()
                .map_err(|source| WorkerErr::Training { round, source })?;
            self.metrics.push_global(global);
            self.state.advance(Phase::Aggregated)?;

            info!(
                worker_id = worker_id, round = round;
                "round done, local {local:.4} global {global:.4}"
            );
        }

        self.metrics.elapsed = started.elapsed();

        Ok(RunReport {
            params: self.trainer.parameters(),
            rounds: self.state.round(),
            metrics: self.metrics,
        })
    }

    fn check_cap(&self, round: u64) -> Result<()> {
        match self.max_rounds {
            Some(max) if round > max.get() => {
                warn!(worker_id = self.worker_id, round = round; "round cap exceeded");
                Err(WorkerErr::Protocol {
                    round,
                    detail: format!("no stop received after {max} rounds"),
                })
            }
            _ => Ok(()),
        }
    }
}

async fn train_blocking<T>(mut trainer: T) -> io::Result<(T, machine_learning::Result<TrainStats>)>
where
    T: LocalTrainer + Send + 'static,
{
    task::spawn_blocking(move || {
        let stats = trainer.train();
        (trainer, stats)
    })
    .await
    .map_err(|e| io::Error::other(format!("training task failed: {e}")))
}
