//! Communicators: the byte-level links drivers talk through.
//!
//! A [`Communicator`] knows how to write a line, read until a terminator,
//! and read a fixed number of bytes. Everything above it (acknowledgements,
//! prompts, reply parsing) lives in [`crate::Instrument`].
//!
//! | communicator | transport |
//! |---|---|
//! | [`LoopbackCommunicator`] | in-memory buffers, used by tests and `test://` |
//! | [`SocketCommunicator`] | TCP socket |
//! | `SerialCommunicator` | serial port (feature `instrument_serial`) |
//! | [`GpibCommunicator`] | Galvant or Prologix GPIB adapter over another communicator |
//! | [`FileCommunicator`] | character device or file, e.g. `/dev/usbtmc0` |
//! | `VisaCommunicator` | VISA resource (feature `instrument_visa`) |

pub mod file;
pub mod gpib;
pub mod loopback;
#[cfg(feature = "instrument_serial")]
pub mod serial;
pub mod stream;
#[cfg(feature = "instrument_visa")]
pub mod visa;

pub use file::FileCommunicator;
pub use gpib::{GpibCommunicator, GpibModel};
pub use loopback::LoopbackCommunicator;
#[cfg(feature = "instrument_serial")]
pub use serial::SerialCommunicator;
pub use stream::{SocketCommunicator, StreamCommunicator, Transport};
#[cfg(feature = "instrument_visa")]
pub use visa::VisaCommunicator;

use crate::error::{InstrumentError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Default read timeout for communicators that do not specify one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Physical link a communicator talks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Loopback,
    Network,
    Serial,
    Gpib,
    File,
    Visa,
}

/// Byte-level link to a single instrument.
///
/// Implementors provide raw reads and writes; the line-oriented
/// [`sendcmd`](Communicator::sendcmd) and [`query`](Communicator::query)
/// come for free and log traffic at debug level.
#[async_trait]
pub trait Communicator: Send {
    /// Human-readable address of the endpoint.
    fn address(&self) -> String;

    fn link(&self) -> Link;

    /// End-of-line sequence appended to commands and expected on replies.
    fn terminator(&self) -> &str;

    async fn set_terminator(&mut self, terminator: &str) -> Result<()>;

    fn timeout(&self) -> Duration;

    async fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Reads exactly `size` bytes, or up to the terminator when `size` is
    /// `None`. The terminator is consumed and not returned.
    async fn read_raw(&mut self, size: Option<usize>) -> Result<Vec<u8>>;

    async fn write_raw(&mut self, msg: &[u8]) -> Result<()>;

    /// Discards any input that has arrived but not been read.
    async fn flush_input(&mut self) -> Result<()>;

    /// [`read_raw`](Communicator::read_raw) decoded as UTF-8.
    async fn read(&mut self, size: Option<usize>) -> Result<String> {
        let raw = self.read_raw(size).await?;
        decode(raw)
    }

    async fn write(&mut self, msg: &str) -> Result<()> {
        self.write_raw(msg.as_bytes()).await
    }

    /// Writes `msg` followed by the terminator.
    async fn send_line(&mut self, msg: &str) -> Result<()> {
        let line = format!("{msg}{}", self.terminator());
        self.write_raw(line.as_bytes()).await
    }

    async fn sendcmd(&mut self, msg: &str) -> Result<()> {
        debug!(address = %self.address(), " <- {:?}", msg);
        self.send_line(msg).await
    }

    async fn query(&mut self, msg: &str, size: Option<usize>) -> Result<String> {
        debug!(address = %self.address(), " <- {:?}", msg);
        self.send_line(msg).await?;
        let reply = self.read(size).await?;
        debug!(address = %self.address(), " -> {:?}", reply);
        Ok(reply)
    }
}

pub(crate) fn decode(raw: Vec<u8>) -> Result<String> {
    String::from_utf8(raw).map_err(|err| {
        InstrumentError::parse(
            String::from_utf8_lossy(err.as_bytes()),
            "reply is not valid UTF-8",
        )
    })
}

/// Position of `needle` in `haystack`, if present.
pub(crate) fn find_terminator(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_terminator() {
        assert_eq!(find_terminator(b"abc\r\n", b"\r\n"), Some(3));
        assert_eq!(find_terminator(b"abc\r", b"\r\n"), None);
        assert_eq!(find_terminator(b"\n", b"\n"), Some(0));
        assert_eq!(find_terminator(b"abc", b""), None);
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        assert_eq!(decode(b"1.25".to_vec()).unwrap(), "1.25");
        assert!(decode(vec![0xff, 0xfe]).is_err());
    }
}
