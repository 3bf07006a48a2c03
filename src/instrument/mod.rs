//! Instrument base: the command/response layer every driver sits on.
//!
//! [`Instrument`] wraps a [`Communicator`] and adds the two bits of protocol
//! many simple devices use:
//!
//! - an **acknowledgement**: a line the device sends back after each
//!   command (often an echo of the command), checked before the reply;
//! - a **prompt**: a fixed string such as `"> "` the device prints when it is
//!   ready for the next command, consumed after every exchange.
//!
//! It also reads IEEE 488.2 definite-length binary blocks
//! ([`Instrument::binblockread`]) and retries a query once when its reply
//! cannot be parsed ([`Instrument::query_parse`]).

pub mod capabilities;
mod open;

pub use open::{InstrumentUri, DEFAULT_BAUD, GPIBUSB_BAUD};

use crate::comm::{Communicator, Link};
use crate::error::{InstrumentError, Result};
use bytes::Buf;
use std::time::Duration;
use tracing::warn;

/// Returns the acknowledgement expected after sending a command, if any.
pub type AckFn = fn(&str) -> Option<String>;

/// Acknowledgement policy for devices that echo every command.
pub fn echo_ack(cmd: &str) -> Option<String> {
    Some(cmd.to_string())
}

const BINBLOCK_TRIES: usize = 3;

/// Element encoding of a binary block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFormat {
    I8,
    U8,
    I16Be,
    I16Le,
    U16Be,
    I32Be,
    I32Le,
    F32Be,
    F32Le,
    F64Be,
    F64Le,
}

impl BlockFormat {
    /// Signed big-endian integers for widths 1, 2 and 4; f64 for width 8.
    pub fn for_width(data_width: usize) -> Self {
        match data_width {
            2 => BlockFormat::I16Be,
            4 => BlockFormat::I32Be,
            8 => BlockFormat::F64Be,
            _ => BlockFormat::I8,
        }
    }

    /// Size of one element in bytes.
    pub fn width(&self) -> usize {
        match self {
            BlockFormat::I8 | BlockFormat::U8 => 1,
            BlockFormat::I16Be | BlockFormat::I16Le | BlockFormat::U16Be => 2,
            BlockFormat::I32Be | BlockFormat::I32Le | BlockFormat::F32Be | BlockFormat::F32Le => 4,
            BlockFormat::F64Be | BlockFormat::F64Le => 8,
        }
    }

    /// Decodes `data` into values. A trailing partial element is ignored.
    pub fn decode(&self, mut data: &[u8]) -> Vec<f64> {
        let width = self.width();
        let mut values = Vec::with_capacity(data.len() / width);
        while data.remaining() >= width {
            let v = match self {
                BlockFormat::I8 => f64::from(data.get_i8()),
                BlockFormat::U8 => f64::from(data.get_u8()),
                BlockFormat::I16Be => f64::from(data.get_i16()),
                BlockFormat::I16Le => f64::from(data.get_i16_le()),
                BlockFormat::U16Be => f64::from(data.get_u16()),
                BlockFormat::I32Be => f64::from(data.get_i32()),
                BlockFormat::I32Le => f64::from(data.get_i32_le()),
                BlockFormat::F32Be => f64::from(data.get_f32()),
                BlockFormat::F32Le => f64::from(data.get_f32_le()),
                BlockFormat::F64Be => data.get_f64(),
                BlockFormat::F64Le => data.get_f64_le(),
            };
            values.push(v);
        }
        values
    }
}

/// A connected instrument.
pub struct Instrument {
    comm: Box<dyn Communicator>,
    prompt: Option<String>,
    ack: Option<AckFn>,
}

impl Instrument {
    pub fn new(comm: Box<dyn Communicator>) -> Self {
        Self {
            comm,
            prompt: None,
            ack: None,
        }
    }

    /// The underlying communicator.
    pub fn communicator(&mut self) -> &mut dyn Communicator {
        self.comm.as_mut()
    }

    pub fn address(&self) -> String {
        self.comm.address()
    }

    pub fn link(&self) -> Link {
        self.comm.link()
    }

    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn set_prompt(&mut self, prompt: Option<&str>) {
        self.prompt = prompt.map(str::to_string);
    }

    /// Sets (or clears) the acknowledgement policy.
    pub fn set_ack(&mut self, ack: Option<AckFn>) {
        self.ack = ack;
    }

    pub fn terminator(&self) -> &str {
        self.comm.terminator()
    }

    pub async fn set_terminator(&mut self, terminator: &str) -> Result<()> {
        self.comm.set_terminator(terminator).await
    }

    pub fn timeout(&self) -> Duration {
        self.comm.timeout()
    }

    pub async fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.comm.set_timeout(timeout).await
    }

    fn ack_expected(&self, cmd: &str) -> Option<String> {
        self.ack.and_then(|ack| ack(cmd))
    }

    async fn check_prompt(&mut self) -> Result<()> {
        if let Some(expected) = self.prompt.clone() {
            let got = self.comm.read(Some(expected.len())).await?;
            if got != expected {
                return Err(InstrumentError::Prompt { expected, got });
            }
        }
        Ok(())
    }

    /// Sends a command that has no reply.
    pub async fn sendcmd(&mut self, cmd: &str) -> Result<()> {
        self.comm.sendcmd(cmd).await?;
        if let Some(expected) = self.ack_expected(cmd) {
            let got = self.comm.read(None).await?;
            if got != expected {
                return Err(InstrumentError::Acknowledgement { expected, got });
            }
        }
        self.check_prompt().await
    }

    /// Sends a query and returns the reply line.
    pub async fn query(&mut self, cmd: &str) -> Result<String> {
        self.query_sized(cmd, None).await
    }

    /// Sends a query and returns `size` bytes of reply, or one line when
    /// `size` is `None`.
    pub async fn query_sized(&mut self, cmd: &str, size: Option<usize>) -> Result<String> {
        let value = match self.ack_expected(cmd) {
            Some(expected) => {
                let got = self.comm.query(cmd, None).await?;
                if got != expected {
                    return Err(InstrumentError::Acknowledgement { expected, got });
                }
                self.comm.read(size).await?
            }
            None => self.comm.query(cmd, size).await?,
        };
        self.check_prompt().await?;
        Ok(value)
    }

    /// Queries `cmd` and parses the reply with `parse`.
    ///
    /// A reply that fails to parse is logged, pending input is discarded
    /// and the query is sent a second time. Other errors are returned
    /// immediately.
    pub async fn query_parse<T, F>(&mut self, cmd: &str, parse: F) -> Result<T>
    where
        F: Fn(&str) -> Result<T> + Send + Sync,
        T: Send,
    {
        let reply = self.query(cmd).await?;
        match parse(&reply) {
            Err(InstrumentError::Parse { input, reason }) => {
                warn!(
                    "Malformed reply {:?} to {:?} ({}); retrying once",
                    input, cmd, reason
                );
                self.comm.flush_input().await?;
                let reply = self.query(cmd).await?;
                parse(&reply)
            }
            other => other,
        }
    }

    pub async fn read(&mut self, size: Option<usize>) -> Result<String> {
        self.comm.read(size).await
    }

    pub async fn read_raw(&mut self, size: Option<usize>) -> Result<Vec<u8>> {
        self.comm.read_raw(size).await
    }

    pub async fn write_raw(&mut self, msg: &[u8]) -> Result<()> {
        self.comm.write_raw(msg).await
    }

    pub async fn flush_input(&mut self) -> Result<()> {
        self.comm.flush_input().await
    }

    /// Reads a definite-length binary block, `#<n><n digits of length><data>`.
    ///
    /// `format` defaults to [`BlockFormat::for_width`]`(data_width)`.
    pub async fn binblockread(
        &mut self,
        data_width: usize,
        format: Option<BlockFormat>,
    ) -> Result<Vec<f64>> {
        let symbol = self.comm.read_raw(Some(1)).await?;
        if symbol != b"#" {
            return Err(InstrumentError::BinaryBlock(format!(
                "Not a valid binary block start. Binary blocks require the first \
                 character to be #, instead got {:?}",
                String::from_utf8_lossy(&symbol)
            )));
        }
        let digits = self.read_block_number(1).await?;
        let num_bytes = self.read_block_number(digits).await?;

        let mut data: Vec<u8> = Vec::with_capacity(num_bytes);
        let mut tries = BINBLOCK_TRIES;
        while data.len() < num_bytes {
            let before = data.len();
            match self.comm.read_raw(Some(num_bytes - before)).await {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(InstrumentError::Timeout(_)) => {}
                Err(e) => return Err(e),
            }
            if data.len() == before {
                tries -= 1;
                if tries == 0 {
                    return Err(InstrumentError::BinaryBlock(format!(
                        "Did not read in the required number of bytes during binblock \
                         read. Got {}, expected {}",
                        data.len(),
                        num_bytes
                    )));
                }
            }
        }
        let format = format.unwrap_or_else(|| BlockFormat::for_width(data_width));
        Ok(format.decode(&data))
    }

    async fn read_block_number(&mut self, len: usize) -> Result<usize> {
        let raw = self.comm.read(Some(len)).await?;
        raw.trim()
            .parse()
            .map_err(|e| InstrumentError::BinaryBlock(format!("Bad block header {raw:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::expected_protocol;

    #[tokio::test]
    async fn test_sendcmd_checks_ack_and_prompt() {
        let (mut inst, check) = expected_protocol(&["freq=10"], &["freq=10", "> "], "\r");
        inst.set_ack(Some(echo_ack));
        inst.set_prompt(Some("> "));
        inst.sendcmd("freq=10").await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_query_with_ack() {
        let (mut inst, check) = expected_protocol(&["volt1?"], &["volt1?", "5.0"], "\r");
        inst.set_ack(Some(echo_ack));
        assert_eq!(inst.query("volt1?").await.unwrap(), "5.0");
        check.assert_done();
    }

    #[tokio::test]
    async fn test_wrong_ack_is_error() {
        let (mut inst, _check) = expected_protocol(&["id?"], &["CMD_NOT_DEFINED"], "\r");
        inst.set_ack(Some(echo_ack));
        let err = inst.sendcmd("id?").await.unwrap_err();
        assert!(matches!(err, InstrumentError::Acknowledgement { .. }));
    }

    #[tokio::test]
    async fn test_wrong_prompt_is_error() {
        let (mut inst, _check) = expected_protocol(&["ens=1"], &["ok"], "\r");
        inst.set_prompt(Some("> "));
        let err = inst.sendcmd("ens=1").await.unwrap_err();
        assert!(matches!(err, InstrumentError::Prompt { .. }));
    }

    #[tokio::test]
    async fn test_query_parse_retries_once() {
        let (mut inst, check) =
            expected_protocol(&["VOLT?", "VOLT?"], &["garbage", "1.5"], "\n");
        let v = inst
            .query_parse("VOLT?", |s| {
                s.trim().parse::<f64>().map_err(|e| InstrumentError::parse(s, e))
            })
            .await
            .unwrap();
        assert_eq!(v, 1.5);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_query_parse_gives_up_after_second_failure() {
        let (mut inst, _check) = expected_protocol(&["VOLT?", "VOLT?"], &["x", "y"], "\n");
        let err = inst
            .query_parse("VOLT?", |s| {
                s.parse::<f64>().map_err(|e| InstrumentError::parse(s, e))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, InstrumentError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_binblockread_i16() {
        let mut input = b"#14".to_vec();
        input.extend_from_slice(&[0x00, 0x01, 0xff, 0xfe]);
        let mut inst = Instrument::open_test(input);
        let values = inst.binblockread(2, None).await.unwrap();
        assert_eq!(values, vec![1.0, -2.0]);
    }

    #[tokio::test]
    async fn test_binblockread_f64_multi_digit_length() {
        let mut input = b"#216".to_vec();
        input.extend_from_slice(&1.5f64.to_be_bytes());
        input.extend_from_slice(&(-0.25f64).to_be_bytes());
        let mut inst = Instrument::open_test(input);
        let values = inst.binblockread(8, None).await.unwrap();
        assert_eq!(values, vec![1.5, -0.25]);
    }

    #[tokio::test]
    async fn test_binblockread_bad_start() {
        let mut inst = Instrument::open_test("12345");
        let err = inst.binblockread(1, None).await.unwrap_err();
        assert!(matches!(err, InstrumentError::BinaryBlock(_)));
    }

    #[tokio::test]
    async fn test_binblockread_short_data() {
        let mut inst = Instrument::open_test(b"#16\x00\x01".to_vec());
        let err = inst.binblockread(2, None).await.unwrap_err();
        assert!(err.to_string().contains("Got 2, expected 6"));
    }

    #[test]
    fn test_block_format_decoding() {
        assert_eq!(BlockFormat::U8.decode(&[0xff, 0x01]), vec![255.0, 1.0]);
        assert_eq!(BlockFormat::I16Le.decode(&[0x01, 0x00]), vec![1.0]);
        assert_eq!(BlockFormat::for_width(3), BlockFormat::I8);
        assert_eq!(
            BlockFormat::F32Be.decode(&2.5f32.to_be_bytes()),
            vec![2.5]
        );
    }
}
