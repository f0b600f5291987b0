use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::config::ConnectConfig;
use crate::error::{Result, TransportError};

/// Listening TCP socket.
///
/// Every accepted stream has the low-delay option applied so that small
/// protocol frames are not held back by Nagle's algorithm.
pub struct TcpServerSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpServerSocket {
    /// Bind and listen on `addr`. Port 0 picks a free port.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        info!(%local_addr, "listening on tcp socket");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await.map_err(TransportError::Accept)?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted connection");
        Ok((stream, peer))
    }

    /// The address this socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Connect to `addr`, bounded by `config.connect_timeout`.
pub async fn connect(addr: SocketAddr, config: &ConnectConfig) -> Result<TcpStream> {
    let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr)).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(TransportError::Connect { addr, source }),
        Err(_) => {
            return Err(TransportError::ConnectTimeout {
                addr,
                timeout: config.connect_timeout,
            })
        }
    };
    stream.set_nodelay(true)?;
    debug!(%addr, "connected to tcp socket");
    Ok(stream)
}

/// Write and flush `data`, giving up after `timeout`.
///
/// A timeout is reported as [`TransportError::WriteTimeout`], which callers
/// treat as non-fatal: the connection stays up and the frame may still go out.
pub async fn write_bounded<W>(writer: &mut W, data: &[u8], timeout: Duration) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        writer.write_all(data).await?;
        writer.flush().await
    };
    match tokio::time::timeout(timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(TransportError::Io(err)),
        Err(_) => Err(TransportError::WriteTimeout(timeout)),
    }
}
