//! Communicator over a file or character device.
//!
//! Used for the Linux `usbtmc` kernel driver, where `/dev/usbtmc0` accepts
//! commands on write and returns the reply on the next read.

use super::{Communicator, Link, DEFAULT_TIMEOUT};
use crate::error::{InstrumentError, Result};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

/// Delay between writing a query and reading the reply.
const QUERY_SETTLE: Duration = Duration::from_millis(20);

/// Communicator reading and writing a filesystem path.
pub struct FileCommunicator {
    file: File,
    path: PathBuf,
    terminator: String,
    timeout: Duration,
}

impl FileCommunicator {
    /// Opens `path` for reading and writing.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .await?;
        info!("Opened instrument file {}", path.display());
        Ok(Self {
            file,
            path,
            terminator: "\n".to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    async fn read_until_terminator(&mut self) -> Result<Vec<u8>> {
        let term = self.terminator.as_bytes().to_vec();
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if !term.is_empty() && line.ends_with(&term) {
                line.truncate(line.len() - term.len());
                return Ok(line);
            }
            if self.file.read(&mut byte).await? == 0 {
                if line.is_empty() {
                    return Err(InstrumentError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("end of file reading {}", self.path.display()),
                    )));
                }
                return Ok(line);
            }
            line.push(byte[0]);
        }
    }
}

#[async_trait]
impl Communicator for FileCommunicator {
    fn address(&self) -> String {
        self.path.display().to_string()
    }

    fn link(&self) -> Link {
        Link::File
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
        let timeout = self.timeout;
        let read = async {
            match size {
                Some(n) => {
                    let mut buf = vec![0u8; n];
                    self.file.read_exact(&mut buf).await?;
                    Ok(buf)
                }
                None => self.read_until_terminator().await,
            }
        };
        tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| InstrumentError::Timeout(timeout))?
    }

    async fn write_raw(&mut self, msg: &[u8]) -> Result<()> {
        self.file.write_all(msg).await?;
        self.file.flush().await?;
        Ok(())
    }

    async fn flush_input(&mut self) -> Result<()> {
        Ok(())
    }

    async fn query(&mut self, msg: &str, size: Option<usize>) -> Result<String> {
        debug!(address = %self.address(), " <- {:?}", msg);
        self.send_line(msg).await?;
        tokio::time::sleep(QUERY_SETTLE).await;
        let reply = self.read(size).await?;
        debug!(address = %self.address(), " -> {:?}", reply);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    #[tokio::test]
    async fn test_reads_lines_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"1.5\n2.5").unwrap();
        tmp.as_file_mut().seek(SeekFrom::Start(0)).unwrap();

        let mut comm = FileCommunicator::open(tmp.path()).await.unwrap();
        assert_eq!(comm.read(None).await.unwrap(), "1.5");
        assert_eq!(comm.read(None).await.unwrap(), "2.5");
        assert!(comm.read(None).await.unwrap_err().is_io());
    }

    #[tokio::test]
    async fn test_sized_read_and_write() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut comm = FileCommunicator::open(tmp.path()).await.unwrap();
        comm.sendcmd("*RST").await.unwrap();
        drop(comm);
        assert_eq!(std::fs::read_to_string(tmp.path()).unwrap(), "*RST\n");

        let mut comm = FileCommunicator::open(tmp.path()).await.unwrap();
        assert_eq!(comm.read_raw(Some(4)).await.unwrap(), b"*RST");
    }
}
