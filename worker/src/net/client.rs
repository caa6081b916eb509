use std::{io, time::Duration};

use comms::{OnoReceiver, OnoSender, msg::Reply};
use log::debug;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    time,
};
use tokio_util::sync::CancellationToken;

use super::transport::{Framed, Transport, ZmqTransport};
use crate::{Result, WorkerErr};

/// The blocking request/reply handshake that gates every round.
#[allow(unused)]
#[trait_variant::make(RoundCoordinator: Send)]
pub trait RoundCoordinatorTemplate {
    /// Announces this worker and waits until the whole cohort is ready. Called once, before round 1.
    async fn ready(&mut self) -> Result<()>;

    /// Announces this worker published `round` and waits for the coordinator's verdict.
    ///
    /// The coordinator only answers once every participant has published, so a `Continue`
    /// means all of the round's vectors can be read.
    async fn sync(&mut self, round: u64) -> Result<Reply>;
}

/// Coordinator client over framed TCP.
pub type TcpCoordinatorClient = CoordinatorClient<Framed<OwnedReadHalf, OwnedWriteHalf>>;

/// Coordinator client over a ZeroMQ `REQ` socket.
pub type ZmqCoordinatorClient = CoordinatorClient<ZmqTransport>;

/// Coordinator client wrapper.
///
/// Contract (current protocol):
/// - send the literal `"1"` signal, once as "ready" and then once per round as "published"
/// - receive one reply per signal, an acknowledgement or `"stop"`
///
/// The baseline protocol never times out: a crashed coordinator or peer stalls the worker
/// forever. `with_timeout` and the cancellation token are the only ways out of a wait, and
/// neither is retried, the round's barrier state cannot be recovered.
pub struct CoordinatorClient<T> {
    transport: T,
    cancel: CancellationToken,
    timeout: Option<Duration>,
    is_ready: bool,
}

impl<T> CoordinatorClient<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            cancel: CancellationToken::new(),
            timeout: None,
            is_ready: false,
        }
    }

    /// Bounds every wait for a reply, `None` keeps the unbounded baseline behaviour.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Makes every wait abort once `cancel` is cancelled.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl<R, W> CoordinatorClient<Framed<R, W>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(rx: OnoReceiver<R>, tx: OnoSender<W>) -> Self {
        Self::with_transport(Framed::new(rx, tx))
    }
}

impl TcpCoordinatorClient {
    /// Connects to the coordinator listening at `addr`.
    ///
    /// # Errors
    /// A refused or failed connection is returned as is, it is fatal for the worker.
    pub async fn connect(addr: &str) -> Result<Self> {
        Ok(Self::with_transport(Framed::connect(addr).await?))
    }
}

impl ZmqCoordinatorClient {
    /// Connects to the `REP` coordinator at `endpoint`.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        Ok(Self::with_transport(ZmqTransport::connect(endpoint).await?))
    }
}

impl<T: Transport> CoordinatorClient<T> {
    async fn roundtrip(&mut self, round: u64) -> Result<Reply> {
        let Self {
            transport,
            cancel,
            timeout,
            ..
        } = self;
        let timeout = *timeout;

        let exchange = transport.request();

        let bounded = async {
            match timeout {
                Some(after) => time::timeout(after, exchange)
                    .await
                    .map_err(|_| WorkerErr::Timeout { round, after })?
                    .map_err(|e| classify(round, e)),
                None => exchange.await.map_err(|e| classify(round, e)),
            }
        };

        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(WorkerErr::Cancelled { round }),
            reply = bounded => reply,
        }
    }
}

impl<T: Transport> RoundCoordinator for CoordinatorClient<T> {
    async fn ready(&mut self) -> Result<()> {
        if self.is_ready {
            return Err(WorkerErr::Protocol {
                round: 0,
                detail: "ready was already signalled".into(),
            });
        }

        debug!("signalling ready");
        match self.roundtrip(0).await? {
            Reply::Continue => {
                self.is_ready = true;
                Ok(())
            }
            Reply::Stop => Err(WorkerErr::Protocol {
                round: 0,
                detail: "coordinator stopped the cohort before round 1".into(),
            }),
        }
    }

    async fn sync(&mut self, round: u64) -> Result<Reply> {
        if !self.is_ready {
            return Err(WorkerErr::Protocol {
                round,
                detail: "published before the cohort was ready".into(),
            });
        }

        debug!(round = round; "signalling published");
        let reply = self.roundtrip(round).await?;
        debug!(round = round; "coordinator replied {reply}");
        Ok(reply)
    }
}

fn classify(round: u64, e: io::Error) -> WorkerErr {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => WorkerErr::ChannelClosed { round },
        io::ErrorKind::InvalidData => WorkerErr::Protocol {
            round,
            detail: e.to_string(),
        },
        _ => WorkerErr::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use comms::msg::Signal;
    use tokio::io as tokio_io;

    use super::{CoordinatorClient, Reply, Result, RoundCoordinator};

    /// Roundtrip test with an in-memory duplex stream:
    /// worker signals -> coordinator receives "1" -> coordinator replies -> worker decodes.
    #[tokio::test]
    async fn test_coordinator_client_roundtrip_duplex() -> Result<()> {
        const BUF_SIZE: usize = 4096;

        let (co_stream, wk_stream) = tokio_io::duplex(BUF_SIZE);

        let (co_rx, co_tx) = tokio_io::split(co_stream);
        let (mut co_rx, mut co_tx) = comms::channel(co_rx, co_tx);

        let (wk_rx, wk_tx) = tokio_io::split(wk_stream);
        let (wk_rx, wk_tx) = comms::channel(wk_rx, wk_tx);
        let mut client = CoordinatorClient::new(wk_rx, wk_tx);

        let coordinator = async {
            let _: Signal = co_rx.recv().await?;
            co_tx.send(&Reply::Continue).await?;

            let _: Signal = co_rx.recv().await?;
            co_tx.send(&Reply::Stop).await
        };

        let worker = async {
            client.ready().await?;
            client.sync(1).await
        };

        let (co_res, reply) = tokio::join!(coordinator, worker);
        co_res?;
        assert_eq!(reply?, Reply::Stop);

        Ok(())
    }
}
