use std::io;

use comms::{
    Deserialize, OnoReceiver, OnoSender,
    msg::{Reply, Signal},
};
use log::info;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

/// One request/reply exchange with the coordinator, whatever carries it.
#[allow(unused)]
#[trait_variant::make(Transport: Send)]
pub trait TransportTemplate {
    /// Sends the `Signal` and waits for the decoded reply.
    ///
    /// # Errors
    /// `InvalidData` for a reply that is neither an acknowledgement nor a stop, a
    /// connection-loss kind if the coordinator went away.
    async fn request(&mut self) -> io::Result<Reply>;
}

/// Length-prefixed frames over a byte stream, see `comms::channel`.
pub struct Framed<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
}

impl<R, W> Framed<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(rx: OnoReceiver<R>, tx: OnoSender<W>) -> Self {
        Self { rx, tx }
    }
}

impl Framed<OwnedReadHalf, OwnedWriteHalf> {
    /// Connects to a framed coordinator listening at `addr`.
    pub async fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("connected to framed coordinator at {addr}");

        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);
        Ok(Self::new(rx, tx))
    }
}

impl<R, W> Transport for Framed<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn request(&mut self) -> io::Result<Reply> {
        self.tx.send(&Signal).await?;
        self.rx.recv().await
    }
}

/// A ZeroMQ `REQ` socket, the coordinator being the matching `REP` socket.
///
/// Payloads are the bare texts, one frame per message, so an existing `REP` coordinator
/// answering `go`, `0` and `stop` is understood as is.
pub struct ZmqTransport {
    socket: ReqSocket,
}

impl ZmqTransport {
    /// Connects to the coordinator at `endpoint`, e.g. `tcp://127.0.0.1:5555`.
    pub async fn connect(endpoint: &str) -> io::Result<Self> {
        let mut socket = ReqSocket::new();
        socket
            .connect(endpoint)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e.to_string()))?;
        info!("connected to zmq coordinator at {endpoint}");

        Ok(Self { socket })
    }
}

impl Transport for ZmqTransport {
    async fn request(&mut self) -> io::Result<Reply> {
        self.socket
            .send(ZmqMessage::from(Signal.as_str()))
            .await
            .map_err(link_lost)?;

        let reply = self.socket.recv().await.map_err(link_lost)?;
        match (reply.len(), reply.get(0)) {
            (1, Some(frame)) => Reply::deserialize(frame),
            (frames, _) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected a single frame reply, got {frames}"),
            )),
        }
    }
}

/// Any socket error once the `REQ` socket is connected means the coordinator is gone.
fn link_lost(e: zeromq::ZmqError) -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, e.to_string())
}

/// The transports a worker process can be configured with.
pub enum AnyTransport {
    Framed(Framed<OwnedReadHalf, OwnedWriteHalf>),
    Zmq(ZmqTransport),
}

impl Transport for AnyTransport {
    async fn request(&mut self) -> io::Result<Reply> {
        match self {
            AnyTransport::Framed(framed) => Transport::request(framed).await,
            AnyTransport::Zmq(zmq) => Transport::request(zmq).await,
        }
    }
}
