//! Tokio transport adapter
//!
//! Pumps bytes between an async stream and a [`Connection`]'s buffer
//! windows. All protocol work still happens synchronously inside
//! [`Connection::service`]; this layer only decides when to read, write and
//! service.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::protocol::Connection;

/// A connection bound to an async byte stream
#[derive(Debug)]
pub struct Transport<S> {
    stream: S,
    conn: Connection,
}

impl Transport<TcpStream> {
    /// Connect over TCP and complete the client handshake
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        config: ConnectionConfig,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let conn = Connection::client(config)?;
        let socket = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(Error::Io)?;
        socket.set_nodelay(true)?;

        let mut transport = Self::new(socket, conn);
        timeout(connect_timeout, transport.handshake())
            .await
            .map_err(|_| Error::Timeout)??;
        Ok(transport)
    }
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, conn: Connection) -> Self {
        Self { stream, conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn into_parts(self) -> (S, Connection) {
        (self.stream, self.conn)
    }

    /// Drive the handshake to completion
    pub async fn handshake(&mut self) -> Result<()> {
        loop {
            self.conn.service()?;
            self.flush().await?;
            if self.conn.is_connected() {
                tracing::debug!(role = ?self.conn.role(), lag = self.conn.lag(), "Handshake complete");
                return Ok(());
            }
            if !self.fill().await? {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Service the connection until the peer disconnects or a fatal error occurs
    pub async fn run(&mut self) -> Result<()> {
        loop {
            self.conn.service()?;
            self.flush().await?;
            if !self.fill().await? {
                tracing::debug!(stats = ?self.conn.stats(), "Peer disconnected");
                return Ok(());
            }
        }
    }

    /// Send one message, writing output as needed to make room, then flush
    pub async fn send_message(
        &mut self,
        message_type: u8,
        chunk_stream_id: u32,
        message_stream_id: u32,
        timestamp: u32,
        data: &[u8],
    ) -> Result<()> {
        // queued control messages go out first
        self.conn.service()?;
        loop {
            match self.conn.send_message(
                message_type,
                chunk_stream_id,
                message_stream_id,
                timestamp,
                data,
            ) {
                Ok(()) => break,
                Err(Error::Incomplete) if self.conn.pending_output() > 0 => self.flush().await?,
                Err(e) => return Err(e),
            }
        }
        self.flush().await
    }

    /// Write every pending output byte
    pub async fn flush(&mut self) -> Result<()> {
        loop {
            let out = self.conn.get_out_buffer();
            if out.is_empty() {
                break;
            }
            let n = self.stream.write(out).await?;
            if n == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "peer stopped accepting data",
                )));
            }
            self.conn.commit_out(n);
        }
        self.stream.flush().await?;
        Ok(())
    }

    /// Read once into the input window. Returns false at end of stream.
    async fn fill(&mut self) -> Result<bool> {
        let window = self.conn.get_in_buffer();
        if window.is_empty() {
            return Ok(true);
        }
        let n = self.stream.read(window).await?;
        if n == 0 {
            self.conn.interrupted();
            return Ok(false);
        }
        self.conn.commit_in(n);
        tracing::trace!(bytes = n, "Read");
        Ok(true)
    }

    /// Close the connection and shut the stream down
    pub async fn close(&mut self) -> Result<()> {
        self.flush().await?;
        self.conn.close();
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandshakeError;
    use crate::protocol::constants::*;

    #[tokio::test]
    async fn test_old_version_fails_handshake() {
        let (local, mut remote) = tokio::io::duplex(8 * 1024);
        let mut transport = Transport::new(local, Connection::client(ConnectionConfig::default()).unwrap());

        let mut reply = vec![0u8; 1 + HANDSHAKE_SIZE];
        reply[0] = 2;
        remote.write_all(&reply).await.unwrap();

        assert!(matches!(
            transport.handshake().await,
            Err(Error::Handshake(HandshakeError::InvalidVersion(2)))
        ));
        assert!(transport.connection().is_closed());
    }

    #[tokio::test]
    async fn test_eof_during_handshake() {
        let (local, remote) = tokio::io::duplex(8 * 1024);
        let mut transport = Transport::new(local, Connection::server(ConnectionConfig::default()).unwrap());
        drop(remote);

        assert!(matches!(transport.handshake().await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // nothing answers on a non-routable address within the deadline
        let result = Transport::connect(
            "10.255.255.1:1935",
            ConnectionConfig::default(),
            Duration::from_millis(50),
        )
        .await;
        assert!(result.is_err());
    }
}
