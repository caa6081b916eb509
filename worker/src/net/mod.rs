mod client;
mod transport;

pub use client::{
    CoordinatorClient, RoundCoordinator, RoundCoordinatorTemplate, TcpCoordinatorClient,
    ZmqCoordinatorClient,
};
pub use transport::{AnyTransport, Framed, Transport, TransportTemplate, ZmqTransport};
