use std::{
    env,
    fmt::Display,
    num::{NonZeroU64, NonZeroUsize},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use machine_learning::training::DenseConfig;

use crate::{
    Result, WorkerErr,
    exchange::{Layout, WorkerId},
};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_RUN_ID: &str = "simple";
const DEFAULT_FEATURE_SCALE: f32 = 255.0;

/// How the exchange directory is organised, see `Layout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Shared,
    Snapshot,
}

impl FromStr for LayoutKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "shared" => Ok(Self::Shared),
            "snapshot" => Ok(Self::Snapshot),
            other => Err(format!("unknown layout {other:?}, expected shared or snapshot")),
        }
    }
}

/// How the worker reaches the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// ZeroMQ `REQ` socket against the coordinator's `REP` socket.
    Zmq,
    /// Length-prefixed frames over plain TCP.
    Framed,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "zmq" => Ok(Self::Zmq),
            "framed" => Ok(Self::Framed),
            other => Err(format!("unknown transport {other:?}, expected zmq or framed")),
        }
    }
}

/// Everything a worker process needs to know before it starts.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
    pub cohort: NonZeroUsize,
    pub worker_id: WorkerId,
    /// Names this worker's private file in the snapshot layout.
    pub run_id: String,
    pub data_dir: PathBuf,
    pub exchange_dir: PathBuf,
    pub out_dir: PathBuf,
    pub layout: LayoutKind,
    /// Raw features are divided by this before training.
    pub feature_scale: f32,
    pub trainer: DenseConfig,
    pub sync_timeout: Option<Duration>,
    pub max_rounds: Option<NonZeroU64>,
}

impl WorkerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, `None` meaning the key is not set.
    ///
    /// `PORT` and `CLIENTS` are required, every other key has a default.
    ///
    /// # Errors
    /// Returns `WorkerErr::Config` on a missing required key, an unparsable value, or an
    /// inconsistent combination of values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = DenseConfig::default();
        let dir = |key: &str, default: &str| PathBuf::from(lookup(key).unwrap_or(default.into()));

        let cfg = Self {
            host: lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.into()),
            port: required(&lookup, "PORT")?,
            transport: optional(&lookup, "TRANSPORT")?.unwrap_or(TransportKind::Zmq),
            cohort: required(&lookup, "CLIENTS")?,
            worker_id: optional(&lookup, "WORKER_ID")?.unwrap_or(0),
            run_id: lookup("RUN_ID").unwrap_or_else(|| DEFAULT_RUN_ID.into()),
            data_dir: dir("DATA_DIR", "data"),
            exchange_dir: dir("EXCHANGE_DIR", "exchange"),
            out_dir: dir("OUT_DIR", "out"),
            layout: optional(&lookup, "EXCHANGE_LAYOUT")?.unwrap_or(LayoutKind::Shared),
            feature_scale: optional(&lookup, "FEATURE_SCALE")?.unwrap_or(DEFAULT_FEATURE_SCALE),
            trainer: DenseConfig {
                hidden: optional(&lookup, "HIDDEN")?.unwrap_or(defaults.hidden),
                classes: defaults.classes,
                epochs: optional(&lookup, "LOCAL_EPOCHS")?.unwrap_or(defaults.epochs),
                steps_per_epoch: optional(&lookup, "STEPS_PER_EPOCH")?
                    .unwrap_or(defaults.steps_per_epoch),
                batch_size: optional(&lookup, "BATCH_SIZE")?.unwrap_or(defaults.batch_size),
                learning_rate: optional(&lookup, "LEARNING_RATE")?
                    .unwrap_or(defaults.learning_rate),
                seed: optional(&lookup, "SEED")?.unwrap_or(defaults.seed),
            },
            sync_timeout: optional(&lookup, "SYNC_TIMEOUT_MS")?.map(Duration::from_millis),
            max_rounds: optional(&lookup, "MAX_ROUNDS")?,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.worker_id >= self.cohort.get() {
            return Err(WorkerErr::Config(format!(
                "WORKER_ID {} is outside a cohort of {}",
                self.worker_id, self.cohort
            )));
        }

        if self.port == 0 {
            return Err(WorkerErr::Config("PORT must not be 0".into()));
        }

        let lr = self.trainer.learning_rate;
        if !lr.is_finite() || lr <= 0.0 {
            return Err(WorkerErr::Config(format!(
                "LEARNING_RATE must be positive, got {lr}"
            )));
        }

        if !self.feature_scale.is_finite() || self.feature_scale <= 0.0 {
            return Err(WorkerErr::Config(format!(
                "FEATURE_SCALE must be positive, got {}",
                self.feature_scale
            )));
        }

        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The coordinator's ZeroMQ endpoint.
    pub fn endpoint(&self) -> String {
        format!("tcp://{}", self.addr())
    }

    /// This worker's training shard, named after the cohort size.
    pub fn shard_path(&self) -> PathBuf {
        self.data_dir.join(format!("shard_{}.json", self.cohort))
    }

    /// The held-out evaluation set, shared by the whole cohort.
    pub fn test_path(&self) -> PathBuf {
        self.data_dir.join("test.json")
    }

    pub fn exchange_layout(&self) -> Layout {
        layout_under(&self.exchange_dir, self.layout, &self.run_id)
    }
}

fn layout_under(dir: &Path, kind: LayoutKind, run_id: &str) -> Layout {
    match kind {
        LayoutKind::Shared => Layout::Shared {
            dir: dir.to_path_buf(),
        },
        LayoutKind::Snapshot => Layout::Snapshot {
            own: dir.join(format!("{run_id}.json")),
            cohort: dir.join("models.json"),
        },
    }
}

fn optional<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| WorkerErr::Config(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}

fn required<F, T>(lookup: &F, key: &str) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    optional(lookup, key)?.ok_or_else(|| WorkerErr::Config(format!("{key} is not set")))
}
