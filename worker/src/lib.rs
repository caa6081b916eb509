pub mod builder;
pub mod config;
pub mod error;
pub mod exchange;
pub mod loop_;
pub mod metrics;
pub mod net;
pub mod state;

pub use builder::WorkerBuilder;
pub use config::WorkerConfig;
pub use error::{Result, WorkerErr};
pub use loop_::WorkerLoop;
pub use metrics::{Metrics, RunReport};
pub use state::{Phase, RoundState};
