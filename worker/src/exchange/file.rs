use std::{
    io,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use log::debug;
use machine_learning::{ParameterVector, params::decode_cohort};
use sha2::{Digest, Sha256};
use tokio::{fs, io::AsyncWriteExt};

use super::{ExchangeRecord, ExchangeStore, WorkerId};
use crate::{Result, WorkerErr};

/// How the vectors of a run are laid out on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// One slot per worker and round: `dir/round-{r}/worker-{id}.json`, each next to a
    /// `worker-{id}.json.sha256` digest that readers check before decoding.
    Shared { dir: PathBuf },
    /// A single private file for this worker's latest vector, and one cohort file collected by
    /// the coordinator side holding every participant's vector in collection order.
    ///
    /// The private file gets a digest sidecar too, the collected cohort file carries none and is
    /// trusted as written.
    Snapshot { own: PathBuf, cohort: PathBuf },
}

/// Exchange store backed by the filesystem.
#[derive(Debug, Clone)]
pub struct FileStore {
    worker: WorkerId,
    cohort: NonZeroUsize,
    layout: Layout,
}

impl FileStore {
    /// Creates a new `FileStore`.
    ///
    /// # Arguments
    /// * `worker` - This worker's identity, the only slot it ever writes.
    /// * `cohort` - The number of participants every read must find.
    /// * `layout` - Where slots live.
    pub fn new(worker: WorkerId, cohort: NonZeroUsize, layout: Layout) -> Self {
        Self {
            worker,
            cohort,
            layout,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    fn round_dir(dir: &Path, round: u64) -> PathBuf {
        dir.join(format!("round-{round}"))
    }

    fn slot_path(dir: &Path, round: u64, worker: WorkerId) -> PathBuf {
        Self::round_dir(dir, round).join(format!("worker-{worker}.json"))
    }

    async fn read_shared(&self, dir: &Path, round: u64) -> Result<ExchangeRecord> {
        let mut entries = Vec::with_capacity(self.cohort.get());

        for worker in 0..self.cohort.get() {
            let path = Self::slot_path(dir, round, worker);
            let text = read_entry(&path, round).await?;
            let expected = read_entry(&digest_path(&path), round).await?;
            if expected.trim() != digest(text.as_bytes()) {
                return Err(WorkerErr::Exchange {
                    round,
                    detail: format!("{} does not match its digest", path.display()),
                });
            }

            let params = ParameterVector::from_json(&text).map_err(|e| WorkerErr::Exchange {
                round,
                detail: format!("{} is corrupt: {e}", path.display()),
            })?;

            entries.push((worker, params));
        }

        Ok(ExchangeRecord::new(entries))
    }

    async fn read_snapshot(&self, cohort_path: &Path, round: u64) -> Result<ExchangeRecord> {
        let text = read_entry(cohort_path, round).await?;
        let vectors = decode_cohort(&text).map_err(|e| WorkerErr::Exchange {
            round,
            detail: format!("{} is corrupt: {e}", cohort_path.display()),
        })?;

        if vectors.len() != self.cohort.get() {
            return Err(WorkerErr::Exchange {
                round,
                detail: format!(
                    "{} holds {} vectors, the cohort has {}",
                    cohort_path.display(),
                    vectors.len(),
                    self.cohort
                ),
            });
        }

        Ok(ExchangeRecord::new(
            vectors.into_iter().enumerate().collect(),
        ))
    }
}

impl ExchangeStore for FileStore {
    async fn publish(&mut self, round: u64, params: &ParameterVector) -> Result<()> {
        let path = match &self.layout {
            Layout::Shared { dir } => Self::slot_path(dir, round, self.worker),
            Layout::Snapshot { own, .. } => own.clone(),
        };

        let text = params.to_json().map_err(|e| WorkerErr::Exchange {
            round,
            detail: format!("cannot encode own parameters: {e}"),
        })?;

        write_durable(&path, text.as_bytes()).await?;
        write_durable(&digest_path(&path), digest(text.as_bytes()).as_bytes()).await?;
        debug!(worker_id = self.worker, round = round; "published to {}", path.display());
        Ok(())
    }

    async fn read_all(&self, round: u64) -> Result<ExchangeRecord> {
        match &self.layout {
            Layout::Shared { dir } => self.read_shared(dir, round).await,
            Layout::Snapshot { cohort, .. } => self.read_snapshot(cohort, round).await,
        }
    }

    async fn retire(&mut self, round: u64) -> Result<()> {
        let Layout::Shared { dir } = &self.layout else {
            return Ok(());
        };

        let slot = Self::slot_path(dir, round, self.worker);
        remove_if_present(&digest_path(&slot)).await?;
        remove_if_present(&slot).await?;

        // Only the last worker to retire finds the round directory empty.
        let round_dir = Self::round_dir(dir, round);
        if let Err(e) = fs::remove_dir(&round_dir).await {
            debug!(round = round; "keeping {}: {e}", round_dir.display());
        }

        debug!(worker_id = self.worker, round = round; "retired own slot");
        Ok(())
    }
}

/// Lowercase hex SHA-256 of `data`.
fn digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn digest_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn read_entry(path: &Path, round: u64) -> Result<String> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(WorkerErr::Exchange {
            round,
            detail: format!("{} is missing", path.display()),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Writes `data` to a sibling temp file, syncs it and renames it over `path`, then syncs the
/// parent directory so the rename itself survives a crash.
///
/// Readers see either the previous contents or the complete new ones.
async fn write_durable(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    sync_dir(parent.unwrap_or(Path::new("."))).await
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(dir: &Path) -> io::Result<()> {
    // Directories cannot be opened for syncing here, the rename is as durable as it gets.
    debug!("not syncing {}", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        env, process,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

    fn scratch_dir() -> PathBuf {
        let n = NEXT_DIR.fetch_add(1, Ordering::Relaxed);
        env::temp_dir().join(format!("worker-exchange-{}-{n}", process::id()))
    }

    fn cohort(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test]
    async fn shared_layout_reads_back_every_slot() -> Result<()> {
        let dir = scratch_dir();
        let layout = Layout::Shared { dir: dir.clone() };
        let mut a = FileStore::new(0, cohort(2), layout.clone());
        let mut b = FileStore::new(1, cohort(2), layout);

        a.publish(3, &ParameterVector::from_flat(vec![1.0, 2.0])).await?;
        b.publish(3, &ParameterVector::from_flat(vec![3.0, 4.0])).await?;

        assert!(dir.join("round-3").join("worker-1.json").exists());
        assert!(dir.join("round-3").join("worker-1.json.sha256").exists());
        assert!(!dir.join("round-3").join("worker-1.json.tmp").exists());

        let record = b.read_all(3).await?;
        assert_eq!(record.len(), 2);
        assert_eq!(record.get(0), Some(&ParameterVector::from_flat(vec![1.0, 2.0])));

        fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    #[tokio::test]
    async fn shared_layout_refuses_a_partial_cohort() -> Result<()> {
        let dir = scratch_dir();
        let mut a = FileStore::new(0, cohort(2), Layout::Shared { dir: dir.clone() });
        a.publish(1, &ParameterVector::from_flat(vec![1.0])).await?;

        let err = a.read_all(1).await.unwrap_err();
        assert!(err.to_string().contains("worker-1.json is missing"), "{err}");

        fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_slot_is_an_exchange_error() -> Result<()> {
        let dir = scratch_dir();
        let store = FileStore::new(0, cohort(1), Layout::Shared { dir: dir.clone() });

        let slot = FileStore::slot_path(&dir, 1, 0);
        fs::create_dir_all(slot.parent().unwrap()).await?;
        fs::write(&slot, "[[1, 2").await?;
        fs::write(digest_path(&slot), digest(b"[[1, 2")).await?;

        let err = store.read_all(1).await.unwrap_err();
        assert!(matches!(err, WorkerErr::Exchange { round: 1, .. }));

        fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_layout_reads_the_collected_cohort() -> Result<()> {
        let dir = scratch_dir();
        let layout = Layout::Snapshot {
            own: dir.join("simple.json"),
            cohort: dir.join("models.json"),
        };
        let mut store = FileStore::new(0, cohort(2), layout);

        store
            .publish(1, &ParameterVector::from_flat(vec![0.5, 1.5]))
            .await?;
        let own = fs::read_to_string(dir.join("simple.json")).await?;
        assert_eq!(own, "[[0.5,1.5]]");

        fs::write(dir.join("models.json"), format!(r#"[{own:?}, [[2.5, 3.5]]]"#)).await?;
        let record = store.read_all(1).await?;
        assert_eq!(
            record.into_vectors(),
            vec![
                ParameterVector::from_flat(vec![0.5, 1.5]),
                ParameterVector::from_flat(vec![2.5, 3.5]),
            ]
        );

        fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_layout_requires_the_whole_cohort() -> Result<()> {
        let dir = scratch_dir();
        let layout = Layout::Snapshot {
            own: dir.join("simple.json"),
            cohort: dir.join("models.json"),
        };
        let mut store = FileStore::new(0, cohort(3), layout);
        store.publish(1, &ParameterVector::from_flat(vec![1.0])).await?;

        fs::write(dir.join("models.json"), "[[[1.0]], [[2.0]]]").await?;
        let err = store.read_all(1).await.unwrap_err();
        assert!(err.to_string().contains("holds 2 vectors"), "{err}");

        fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    #[tokio::test]
    async fn tampered_slot_fails_its_digest() -> Result<()> {
        let dir = scratch_dir();
        let layout = Layout::Shared { dir: dir.clone() };
        let mut a = FileStore::new(0, cohort(2), layout.clone());
        let mut b = FileStore::new(1, cohort(2), layout);

        a.publish(1, &ParameterVector::from_flat(vec![1.0, 2.0])).await?;
        b.publish(1, &ParameterVector::from_flat(vec![3.0, 4.0])).await?;

        // Still valid JSON of the same shape, only the value changed.
        let slot = FileStore::slot_path(&dir, 1, 1);
        let text = fs::read_to_string(&slot).await?;
        fs::write(&slot, text.replace("4.0", "9.0")).await?;

        let err = a.read_all(1).await.unwrap_err();
        assert!(matches!(err, WorkerErr::Exchange { round: 1, .. }), "{err}");
        assert!(err.to_string().contains("does not match its digest"), "{err}");

        fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    #[tokio::test]
    async fn slot_without_digest_is_refused() -> Result<()> {
        let dir = scratch_dir();
        let mut store = FileStore::new(0, cohort(1), Layout::Shared { dir: dir.clone() });
        store.publish(2, &ParameterVector::from_flat(vec![1.0])).await?;

        let slot = FileStore::slot_path(&dir, 2, 0);
        fs::remove_file(digest_path(&slot)).await?;

        let err = store.read_all(2).await.unwrap_err();
        assert!(err.to_string().contains("worker-0.json.sha256 is missing"), "{err}");

        fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    #[tokio::test]
    async fn durable_write_creates_parents_and_leaves_no_temp_file() -> Result<()> {
        let dir = scratch_dir();
        let path = dir.join("a").join("b").join("slot.json");

        write_durable(&path, b"first").await?;
        write_durable(&path, b"second").await?;

        assert_eq!(fs::read_to_string(&path).await?, "second");
        assert!(!dir.join("a").join("b").join("slot.json.tmp").exists());

        fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    #[tokio::test]
    async fn retired_rounds_are_removed_once_every_slot_is_gone() -> Result<()> {
        let dir = scratch_dir();
        let layout = Layout::Shared { dir: dir.clone() };
        let mut a = FileStore::new(0, cohort(2), layout.clone());
        let mut b = FileStore::new(1, cohort(2), layout);

        for store in [&mut a, &mut b] {
            store.publish(1, &ParameterVector::from_flat(vec![1.0])).await?;
            store.publish(2, &ParameterVector::from_flat(vec![2.0])).await?;
        }

        a.retire(1).await?;
        assert!(!FileStore::slot_path(&dir, 1, 0).exists());
        assert!(FileStore::slot_path(&dir, 1, 1).exists());

        b.retire(1).await?;
        assert!(!dir.join("round-1").exists());
        assert_eq!(a.read_all(2).await?.len(), 2);

        // Retiring twice, or a round never published, is harmless.
        b.retire(1).await?;
        b.retire(7).await?;

        fs::remove_dir_all(&dir).await?;
        Ok(())
    }
}
