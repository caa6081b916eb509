use std::{env, num::NonZeroUsize, process, sync::Arc};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Reply, Signal},
};
use machine_learning::{
    ParameterVector,
    training::{LocalTrainer, TrainStats},
};
use parking_lot::Mutex;
use tokio::{
    io::{self, AsyncRead, AsyncWrite},
    net::TcpListener,
    task::JoinSet,
};
use worker::{
    RunReport, WorkerLoop,
    exchange::{ExchangeStore, FileStore, Layout, MemoryStore, StoreEvent},
    net::{CoordinatorClient, TcpCoordinatorClient},
};

const COHORT: [[f32; 4]; 3] = [[1.0, 2.0, 3.0, 4.0], [3.0, 4.0, 5.0, 6.0], [5.0, 6.0, 7.0, 8.0]];

/// Keeps its parameters as they are, only what the cohort hands back changes them.
struct FrozenTrainer {
    params: ParameterVector,
    loaded: Arc<Mutex<Vec<ParameterVector>>>,
}

impl LocalTrainer for FrozenTrainer {
    fn train(&mut self) -> machine_learning::Result<TrainStats> {
        Ok(TrainStats {
            steps: 0,
            loss: 0.0,
        })
    }

    fn evaluate(&self) -> machine_learning::Result<f32> {
        Ok(1.0)
    }

    fn parameters(&self) -> ParameterVector {
        self.params.clone()
    }

    fn set_parameters(&mut self, params: ParameterVector) -> machine_learning::Result<()> {
        self.loaded.lock().push(params.clone());
        self.params = params;
        Ok(())
    }
}

/// Releases the cohort once every peer signalled, answering `Stop` after the last round.
async fn barrier_coordinator<R, W>(
    mut peers: Vec<(OnoReceiver<R>, OnoSender<W>)>,
    rounds: u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    for barrier in 0..=rounds {
        for (rx, _) in peers.iter_mut() {
            let _: Signal = rx.recv().await?;
        }

        let reply = if barrier == rounds {
            Reply::Stop
        } else {
            Reply::Continue
        };

        for (_, tx) in peers.iter_mut() {
            tx.send(&reply).await?;
        }
    }

    Ok(())
}

fn trainers() -> Vec<(FrozenTrainer, Arc<Mutex<Vec<ParameterVector>>>)> {
    COHORT
        .iter()
        .map(|values| {
            let loaded = Arc::<Mutex<Vec<ParameterVector>>>::default();
            let trainer = FrozenTrainer {
                params: ParameterVector::from_flat(values.to_vec()),
                loaded: Arc::clone(&loaded),
            };
            (trainer, loaded)
        })
        .collect()
}

fn assert_averaged(reports: &[RunReport], loaded: &[Arc<Mutex<Vec<ParameterVector>>>]) {
    let expected = ParameterVector::from_flat(vec![3.0, 4.0, 5.0, 6.0]);

    for (report, loaded) in reports.iter().zip(loaded) {
        assert_eq!(*loaded.lock(), vec![expected.clone(), expected.clone()]);
        assert_eq!(report.params, expected);
        assert_eq!(report.rounds, 3);
        assert_eq!(report.metrics.local_accuracy.len(), 3);
        assert_eq!(report.metrics.global_accuracy.len(), 2);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn three_workers_average_over_duplex_channels() -> worker::Result<()> {
    const ROUNDS: u64 = 3;

    let store = MemoryStore::new(NonZeroUsize::new(COHORT.len()).unwrap());
    let mut peers = Vec::new();
    let mut loaded = Vec::new();
    let mut workers = JoinSet::new();

    for (id, (trainer, seen)) in trainers().into_iter().enumerate() {
        let (co_stream, wk_stream) = io::duplex(4096);
        let (co_rx, co_tx) = io::split(co_stream);
        peers.push(comms::channel(co_rx, co_tx));
        loaded.push(seen);

        let (wk_rx, wk_tx) = io::split(wk_stream);
        let (wk_rx, wk_tx) = comms::channel(wk_rx, wk_tx);
        let store = store.handle(id);

        workers.spawn(async move {
            let mut client = CoordinatorClient::new(wk_rx, wk_tx);
            let report = WorkerLoop::new(id, trainer, store).run(&mut client).await?;
            Ok::<_, worker::WorkerErr>((id, report))
        });
    }

    barrier_coordinator(peers, ROUNDS).await?;

    let mut reports = Vec::new();
    while let Some(joined) = workers.join_next().await {
        reports.push(joined.expect("worker task panicked")?);
    }
    reports.sort_by_key(|(id, _)| *id);
    let reports: Vec<_> = reports.into_iter().map(|(_, report)| report).collect();

    assert_averaged(&reports, &loaded);
    assert_reads_follow_every_publish(&store.journal());
    Ok(())
}

/// No round is read before the whole cohort published it.
fn assert_reads_follow_every_publish(journal: &[StoreEvent]) {
    for (at, event) in journal.iter().enumerate() {
        let StoreEvent::Read { round, .. } = *event else {
            continue;
        };

        let published = journal[..at]
            .iter()
            .filter(|e| matches!(e, StoreEvent::Published { round: r, .. } if *r == round))
            .count();

        assert_eq!(published, COHORT.len(), "round {round} read early: {journal:?}");
    }

    let reads = journal
        .iter()
        .filter(|e| matches!(e, StoreEvent::Read { .. }))
        .count();
    assert_eq!(reads, 2 * COHORT.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn three_workers_average_through_files_over_tcp() -> worker::Result<()> {
    const ROUNDS: u64 = 3;

    let dir = env::temp_dir().join(format!("worker-e2e-{}", process::id()));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    let cohort = NonZeroUsize::new(COHORT.len()).unwrap();

    let mut loaded = Vec::new();
    let mut workers = JoinSet::new();

    for (id, (trainer, seen)) in trainers().into_iter().enumerate() {
        loaded.push(seen);

        let store = FileStore::new(id, cohort, Layout::Shared { dir: dir.clone() });
        let addr = addr.clone();

        workers.spawn(async move {
            let mut client = TcpCoordinatorClient::connect(&addr).await?;
            let report = WorkerLoop::new(id, trainer, store).run(&mut client).await?;
            Ok::<_, worker::WorkerErr>((id, report))
        });
    }

    let mut peers = Vec::new();
    for _ in 0..COHORT.len() {
        let (stream, _) = listener.accept().await?;
        let (rx, tx) = stream.into_split();
        peers.push(comms::channel(rx, tx));
    }
    barrier_coordinator(peers, ROUNDS).await?;

    let mut reports = Vec::new();
    while let Some(joined) = workers.join_next().await {
        reports.push(joined.expect("worker task panicked")?);
    }
    reports.sort_by_key(|(id, _)| *id);
    let reports: Vec<_> = reports.into_iter().map(|(_, report)| report).collect();

    assert_averaged(&reports, &loaded);

    let last = FileStore::new(0, cohort, Layout::Shared { dir: dir.clone() });
    assert_eq!(last.read_all(ROUNDS).await?.len(), COHORT.len());

    // Earlier rounds were retired by every worker, only the last one is kept.
    for round in 1..ROUNDS {
        assert!(!dir.join(format!("round-{round}")).exists(), "round {round} was kept");
    }

    tokio::fs::remove_dir_all(&dir).await?;
    Ok(())
}
