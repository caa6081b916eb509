use std::path::PathBuf;

use log::info;
use machine_learning::{dataset::Dataset, training::DenseTrainer};
use tokio_util::sync::CancellationToken;

use crate::{
    Result, WorkerErr,
    config::{TransportKind, WorkerConfig},
    exchange::FileStore,
    net::{AnyTransport, CoordinatorClient, Framed, ZmqTransport},
};

/// Assembles the parts of a worker process from its `WorkerConfig`.
pub struct WorkerBuilder<'a> {
    cfg: &'a WorkerConfig,
}

impl<'a> WorkerBuilder<'a> {
    pub fn new(cfg: &'a WorkerConfig) -> Self {
        Self { cfg }
    }

    /// Loads the shard and held-out set, normalises them and builds the local model.
    ///
    /// # Errors
    /// Returns `WorkerErr::Setup` if either dataset cannot be read or does not fit the model.
    pub fn trainer(&self) -> Result<DenseTrainer> {
        let load = |path: PathBuf| -> machine_learning::Result<Dataset> {
            let mut data = Dataset::from_json_file(path)?;
            data.normalize(self.cfg.feature_scale);
            Ok(data)
        };

        let train = load(self.cfg.shard_path()).map_err(WorkerErr::Setup)?;
        let test = load(self.cfg.test_path()).map_err(WorkerErr::Setup)?;
        info!(
            worker_id = self.cfg.worker_id, samples = train.len(), held_out = test.len();
            "datasets loaded"
        );

        DenseTrainer::new(self.cfg.trainer.clone(), train, test).map_err(WorkerErr::Setup)
    }

    pub fn store(&self) -> FileStore {
        FileStore::new(
            self.cfg.worker_id,
            self.cfg.cohort,
            self.cfg.exchange_layout(),
        )
    }

    /// Connects to the coordinator over the configured transport, every wait of the client
    /// honouring `cancel`.
    pub async fn connect(
        &self,
        cancel: CancellationToken,
    ) -> Result<CoordinatorClient<AnyTransport>> {
        let transport = match self.cfg.transport {
            TransportKind::Zmq => {
                AnyTransport::Zmq(ZmqTransport::connect(&self.cfg.endpoint()).await?)
            }
            TransportKind::Framed => {
                AnyTransport::Framed(Framed::connect(&self.cfg.addr()).await?)
            }
        };

        Ok(CoordinatorClient::with_transport(transport)
            .with_timeout(self.cfg.sync_timeout)
            .with_cancellation(cancel))
    }
}
