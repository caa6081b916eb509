use std::{error::Error, fmt, io, time::Duration};

use machine_learning::MlErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures, every one of them ends the process.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Config(String),
    Setup(MlErr),
    /// The coordinator broke the protocol or the worker's own state machine was misused.
    Protocol {
        round: u64,
        detail: String,
    },
    ChannelClosed {
        round: u64,
    },
    Timeout {
        round: u64,
        after: Duration,
    },
    Cancelled {
        round: u64,
    },
    /// A participant's published vector is missing or unreadable.
    Exchange {
        round: u64,
        detail: String,
    },
    Training {
        round: u64,
        source: MlErr,
    },
    Aggregation {
        round: u64,
        source: MlErr,
    },
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Config(detail) => write!(f, "invalid configuration: {detail}"),
            WorkerErr::Setup(e) => write!(f, "failed to set up the local trainer: {e}"),
            WorkerErr::Protocol { round, detail } => {
                write!(f, "protocol violation at round {round}: {detail}")
            }
            WorkerErr::ChannelClosed { round } => {
                write!(f, "coordinator channel closed at round {round}")
            }
            WorkerErr::Timeout { round, after } => {
                write!(f, "no coordinator reply at round {round} after {after:?}")
            }
            WorkerErr::Cancelled { round } => write!(f, "cancelled while waiting at round {round}"),
            WorkerErr::Exchange { round, detail } => {
                write!(f, "exchange failure at round {round}: {detail}")
            }
            WorkerErr::Training { round, source } => {
                write!(f, "local training failed at round {round}: {source}")
            }
            WorkerErr::Aggregation { round, source } => {
                write!(f, "aggregation failed at round {round}: {source}")
            }
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Setup(e) => Some(e),
            WorkerErr::Training { source, .. } | WorkerErr::Aggregation { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            e @ WorkerErr::Timeout { .. } => io::Error::new(io::ErrorKind::TimedOut, e),
            e @ WorkerErr::ChannelClosed { .. } => io::Error::new(io::ErrorKind::BrokenPipe, e),
            e @ WorkerErr::Cancelled { .. } => io::Error::new(io::ErrorKind::Interrupted, e),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
