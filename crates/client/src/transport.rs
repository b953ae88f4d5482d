//! Transport seam for peer connections.
//!
//! Production implementation of the [`PeerConnector`] trait dials plain TCP
//! in binary-framed mode. Tests replace the connector with in-memory duplex
//! streams; the engine and socket layer never know the difference.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use arus_common::constants::DEFAULT_PEER_PORT;

/// Any ordered, bidirectional byte stream works as a peer channel.
pub trait PeerStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PeerStream for T {}

/// Dials one peer. Implementations are stateless besides configuration.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, address: &str) -> io::Result<Box<dyn PeerStream>>;
}

/// Production TCP connector. An address without a port gets the protocol
/// default appended.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub port: u16,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            port: DEFAULT_PEER_PORT,
        }
    }
}

#[async_trait]
impl PeerConnector for TcpConnector {
    async fn connect(&self, address: &str) -> io::Result<Box<dyn PeerStream>> {
        let target = if address.contains(':') {
            address.to_string()
        } else {
            format!("{}:{}", address, self.port)
        };
        let stream = TcpStream::connect(&target).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
