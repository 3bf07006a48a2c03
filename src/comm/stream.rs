//! Communicator over any tokio byte stream.
//!
//! TCP sockets and serial ports share the same framing: a receive buffer is
//! filled from the stream, with a timeout on every read, until it holds a
//! terminator or the requested number of bytes.

use super::{find_terminator, Communicator, Link, DEFAULT_TIMEOUT};
use crate::error::{InstrumentError, Result};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::info;

/// A duplex byte stream an instrument can be reached through.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {
    /// Drops bytes buffered below the stream, if the transport has any.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn link(&self) -> Link {
        Link::Network
    }
}

impl Transport for TcpStream {}

/// Line-oriented communicator over a [`Transport`].
pub struct StreamCommunicator<T> {
    stream: T,
    address: String,
    rx: BytesMut,
    terminator: String,
    timeout: Duration,
}

/// Communicator for instruments reachable over TCP.
pub type SocketCommunicator = StreamCommunicator<TcpStream>;

impl<T: Transport> StreamCommunicator<T> {
    pub fn new(stream: T, address: impl Into<String>) -> Self {
        Self {
            stream,
            address: address.into(),
            rx: BytesMut::with_capacity(1024),
            terminator: "\n".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    async fn fill(&mut self) -> Result<()> {
        match tokio::time::timeout(self.timeout, self.stream.read_buf(&mut self.rx)).await {
            Err(_) => Err(InstrumentError::Timeout(self.timeout)),
            Ok(Ok(0)) => Err(InstrumentError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("connection to {} closed", self.address),
            ))),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
        }
    }
}

impl SocketCommunicator {
    /// Opens a TCP connection to `host:port`.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let address = format!("{host}:{port}");
        let stream = tokio::time::timeout(DEFAULT_TIMEOUT, TcpStream::connect(&address))
            .await
            .map_err(|_| InstrumentError::Timeout(DEFAULT_TIMEOUT))??;
        stream.set_nodelay(true)?;
        info!("Connected to instrument at {}", address);
        Ok(Self::new(stream, address))
    }
}

#[async_trait]
impl<T: Transport> Communicator for StreamCommunicator<T> {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn link(&self) -> Link {
        self.stream.link()
    }

    fn terminator(&self) -> &str {
        &self.terminator
    }

    async fn set_terminator(&mut self, terminator: &str) -> Result<()> {
        self.terminator = terminator.to_string();
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    async fn read_raw(&mut self, size: Option<usize>) -> Result<Vec<u8>> {
        match size {
            Some(n) => {
                while self.rx.len() < n {
                    self.fill().await?;
                }
                Ok(self.rx.split_to(n).to_vec())
            }
            None => loop {
                let term = self.terminator.as_bytes();
                if let Some(pos) = find_terminator(&self.rx, term) {
                    let len = term.len();
                    let line = self.rx.split_to(pos).to_vec();
                    self.rx.advance(len);
                    return Ok(line);
                }
                self.fill().await?;
            },
        }
    }

    async fn write_raw(&mut self, msg: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        let stream = &mut self.stream;
        let write = async move {
            stream.write_all(msg).await?;
            stream.flush().await
        };
        tokio::time::timeout(timeout, write)
            .await
            .map_err(|_| InstrumentError::Timeout(timeout))??;
        Ok(())
    }

    async fn flush_input(&mut self) -> Result<()> {
        self.rx.clear();
        self.stream.discard_input()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::{Builder, Mock};

    impl Transport for Mock {}

    #[tokio::test]
    async fn test_query_over_stream() {
        let mock = Builder::new()
            .write(b"*IDN?\n")
            .read(b"ACME,Model 1,123,1.0\n")
            .build();
        let mut comm = StreamCommunicator::new(mock, "mock");
        let reply = comm.query("*IDN?", None).await.unwrap();
        assert_eq!(reply, "ACME,Model 1,123,1.0");
    }

    #[tokio::test]
    async fn test_reply_split_across_reads() {
        let mock = Builder::new().read(b"12.").read(b"5\r").read(b"#15abcde").build();
        let mut comm = StreamCommunicator::new(mock, "mock").with_terminator("\r");
        assert_eq!(comm.read(None).await.unwrap(), "12.5");
        assert_eq!(comm.read_raw(Some(2)).await.unwrap(), b"#1");
        assert_eq!(comm.read_raw(Some(6)).await.unwrap(), b"5abcde");
    }

    #[tokio::test]
    async fn test_closed_stream_is_io_error() {
        let mock = Builder::new().read(b"partial").build();
        let mut comm = StreamCommunicator::new(mock, "mock");
        let err = comm.read(None).await.unwrap_err();
        assert!(err.is_io());
    }
}
