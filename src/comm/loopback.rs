//! In-memory communicator.
//!
//! Replies are served from a preloaded buffer and everything the host writes
//! is captured, which lets tests assert the exact bytes a driver sends.

use super::{find_terminator, Communicator, Link, DEFAULT_TIMEOUT};
use crate::error::{InstrumentError, Result};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Communicator backed by memory instead of hardware.
pub struct LoopbackCommunicator {
    input: BytesMut,
    output: Arc<Mutex<Vec<u8>>>,
    terminator: String,
    timeout: Duration,
}

impl LoopbackCommunicator {
    /// Creates a loopback that will answer reads from `input`.
    pub fn new(input: impl AsRef<[u8]>) -> Self {
        Self {
            input: BytesMut::from(input.as_ref()),
            output: Arc::new(Mutex::new(Vec::new())),
            terminator: "\n".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    /// Shared handle to everything written so far.
    pub fn output(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.output)
    }

    /// Bytes still waiting to be read.
    pub fn remaining_input(&self) -> &[u8] {
        &self.input
    }
}

#[async_trait]
impl Communicator for LoopbackCommunicator {
    fn address(&self) -> String {
        "loopback".to_string()
    }

    fn link(&self) -> Link {
        Link::Loopback
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
        if self.input.is_empty() {
            return Err(InstrumentError::Timeout(self.timeout));
        }
        match size {
            Some(n) => {
                let n = n.min(self.input.len());
                Ok(self.input.split_to(n).to_vec())
            }
            None => {
                let term = self.terminator.as_bytes();
                match find_terminator(&self.input, term) {
                    Some(pos) => {
                        let line = self.input.split_to(pos).to_vec();
                        self.input.advance(term.len());
                        Ok(line)
                    }
                    // Unterminated tail: hand back what there is.
                    None => Ok(self.input.split().to_vec()),
                }
            }
        }
    }

    async fn write_raw(&mut self, msg: &[u8]) -> Result<()> {
        let mut out = self.output.lock().unwrap_or_else(|e| e.into_inner());
        out.extend_from_slice(msg);
        Ok(())
    }

    async fn flush_input(&mut self) -> Result<()> {
        Ok(())
    }

    async fn send_line(&mut self, msg: &str) -> Result<()> {
        if msg.is_empty() {
            return Ok(());
        }
        let line = format!("{msg}{}", self.terminator);
        self.write_raw(line.as_bytes()).await
    }
}
