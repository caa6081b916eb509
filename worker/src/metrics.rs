use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use log::info;
use machine_learning::ParameterVector;
use tokio::{fs, io::AsyncWriteExt};

use crate::Result;

/// Accuracy history of a worker, one entry appended per round.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Metrics {
    pub local_accuracy: Vec<f32>,
    pub global_accuracy: Vec<f32>,
    pub elapsed: Duration,
}

impl Metrics {
    #[inline]
    pub fn push_local(&mut self, accuracy: f32) {
        self.local_accuracy.push(accuracy);
    }

    #[inline]
    pub fn push_global(&mut self, accuracy: f32) {
        self.global_accuracy.push(accuracy);
    }
}

/// What a finished worker leaves behind.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub metrics: Metrics,
    /// The parameters held when the worker stopped.
    pub params: ParameterVector,
    /// The round the stop arrived at.
    pub rounds: u64,
}

impl RunReport {
    /// Writes the report under `dir`.
    ///
    /// The latency and accuracy files are appended to, so repeated runs of the same cohort
    /// size accumulate in them. The final parameters are overwritten.
    ///
    /// # Args
    /// * `dir` - Output directory, created if missing.
    /// * `cohort` - The cohort size, used to name the files.
    /// * `worker_id` - This worker's identity, used to name the parameter file.
    pub async fn persist(&self, dir: &Path, cohort: usize, worker_id: usize) -> Result<()> {
        fs::create_dir_all(dir).await?;

        let latency = format!("{}\n", self.metrics.elapsed.as_secs_f64());
        append(&dir.join(format!("latency_{cohort}.txt")), &latency).await?;

        let local = serde_json::to_string(&self.metrics.local_accuracy).map_err(io::Error::from)?;
        append(&dir.join(format!("acc_local_{cohort}.txt")), &local).await?;

        let global =
            serde_json::to_string(&self.metrics.global_accuracy).map_err(io::Error::from)?;
        append(&dir.join(format!("acc_global_{cohort}.txt")), &global).await?;

        let params = self
            .params
            .to_json()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(params_path(dir, cohort, worker_id), params).await?;

        info!(
            worker_id = worker_id, rounds = self.rounds;
            "results written to {}", dir.display()
        );
        Ok(())
    }
}

fn params_path(dir: &Path, cohort: usize, worker_id: usize) -> PathBuf {
    dir.join(format!("params_{cohort}_{worker_id}.json"))
}

async fn append(path: &Path, text: &str) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    file.write_all(text.as_bytes()).await?;
    file.flush().await
}
