use std::io;

use log::{error, info, warn};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use worker::{WorkerBuilder, WorkerConfig, WorkerLoop};

#[tokio::main(flavor = "current_thread")]
async fn main() -> io::Result<()> {
    env_logger::init();

    let cfg = WorkerConfig::from_env()?;
    info!(
        worker_id = cfg.worker_id, cohort = cfg.cohort.get();
        "starting worker, coordinator at {} over {:?}", cfg.addr(), cfg.transport
    );

    let builder = WorkerBuilder::new(&cfg);
    let trainer = builder.trainer()?;
    let store = builder.store();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("received SIGINT, cancelling");
                cancel.cancel();
            }
        }
    });

    let mut coordinator = builder.connect(cancel).await?;
    let worker_loop = WorkerLoop::new(cfg.worker_id, trainer, store).with_max_rounds(cfg.max_rounds);

    let report = match worker_loop.run(&mut coordinator).await {
        Ok(report) => report,
        Err(e) => {
            error!(worker_id = cfg.worker_id; "worker failed: {e}");
            return Err(e.into());
        }
    };

    report.persist(&cfg.out_dir, cfg.cohort.get(), cfg.worker_id).await?;
    info!(worker_id = cfg.worker_id, rounds = report.rounds; "wrapping up");
    Ok(())
}
