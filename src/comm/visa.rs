//! VISA resources through `visa-rs`.
//!
//! VISA calls block, so every read and write runs on tokio's blocking pool
//! with the session behind an `Arc<Mutex<_>>`.

use super::{find_terminator, Communicator, Link, DEFAULT_TIMEOUT};
use crate::error::{InstrumentError, Result};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::ffi::CString;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;
use visa_rs::flags::AccessMode;
use visa_rs::{DefaultRM, Instrument, TIMEOUT_IMMEDIATE};

const CHUNK: usize = 1024;

/// Communicator for a VISA resource such as `GPIB0::1::INSTR`.
pub struct VisaCommunicator {
    resource: String,
    instrument: Arc<Mutex<Instrument>>,
    // Sessions are closed when the resource manager is dropped.
    _rm: DefaultRM,
    rx: BytesMut,
    terminator: String,
    timeout: Duration,
}

fn visa_err(context: &str) -> impl Fn(visa_rs::Error) -> InstrumentError + '_ {
    move |e| InstrumentError::Visa(format!("{context}: {e}"))
}

impl VisaCommunicator {
    /// Opens `resource` through the default VISA resource manager.
    pub fn open(resource: &str) -> Result<Self> {
        let rm = DefaultRM::new().map_err(visa_err("Failed to open VISA resource manager"))?;
        let expr = CString::new(resource)
            .map_err(|_| InstrumentError::InvalidUri(format!("{resource:?} contains a NUL byte")))?;
        let rsc = rm
            .find_res(&expr.into())
            .map_err(visa_err("VISA resource not found"))?;
        let instrument = rm
            .open(&rsc, AccessMode::NO_LOCK, TIMEOUT_IMMEDIATE)
            .map_err(visa_err("Failed to open VISA resource"))?;
        info!("VISA resource '{}' opened", resource);
        Ok(Self {
            resource: resource.to_string(),
            instrument: Arc::new(Mutex::new(instrument)),
            _rm: rm,
            rx: BytesMut::with_capacity(CHUNK),
            terminator: "\n".to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    async fn fill(&mut self) -> Result<()> {
        let instrument = Arc::clone(&self.instrument);
        let read = tokio::task::spawn_blocking(move || {
            let mut guard = instrument.blocking_lock();
            let mut buf = vec![0u8; CHUNK];
            let n = guard.read(&mut buf)?;
            buf.truncate(n);
            Ok::<_, std::io::Error>(buf)
        });
        let chunk = tokio::time::timeout(self.timeout, read)
            .await
            .map_err(|_| InstrumentError::Timeout(self.timeout))?
            .map_err(|e| InstrumentError::Visa(format!("VISA read task failed: {e}")))??;
        if chunk.is_empty() {
            return Err(InstrumentError::Timeout(self.timeout));
        }
        self.rx.extend_from_slice(&chunk);
        Ok(())
    }
}

#[async_trait]
impl Communicator for VisaCommunicator {
    fn address(&self) -> String {
        self.resource.clone()
    }

    fn link(&self) -> Link {
        Link::Visa
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
        let instrument = Arc::clone(&self.instrument);
        let data = msg.to_vec();
        let write = tokio::task::spawn_blocking(move || {
            let mut guard = instrument.blocking_lock();
            guard.write_all(&data)?;
            guard.flush()
        });
        tokio::time::timeout(self.timeout, write)
            .await
            .map_err(|_| InstrumentError::Timeout(self.timeout))?
            .map_err(|e| InstrumentError::Visa(format!("VISA write task failed: {e}")))??;
        Ok(())
    }

    async fn flush_input(&mut self) -> Result<()> {
        self.rx.clear();
        Ok(())
    }
}
