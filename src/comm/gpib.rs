//! GPIB through a serial or Ethernet GPIB adapter.
//!
//! The adapter is itself a line-oriented device: it takes configuration
//! commands (`+a:5`, `++addr 5`, ...) on the same link that carries
//! instrument traffic. Before every instrument command the communicator
//! re-sends the bus address, EOI, timeout and EOS settings, so several
//! [`GpibCommunicator`]s sharing one adapter never see each other's state.
//!
//! Two adapter dialects are supported:
//!
//! | | Galvant (`gi`) | Prologix (`pl`) |
//! |---|---|---|
//! | address | `+a:N` | `++addr N` |
//! | EOI | `+eoi:1` | `++eoi 1` |
//! | timeout | `+t:SECONDS` | `++read_tmo_ms MS` |
//! | EOS | `+eos:CODE` | `++eos 0..3` |
//! | read back | `+read` when the command has no `?` | `++read` always |
//!
//! Galvant firmware newer than version 4 understands the Prologix forms of
//! the EOI, timeout and EOS commands.

use super::{Communicator, Link};
use crate::error::{InstrumentError, Result};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const ADAPTER_TERMINATOR: &str = "\r";
const DEFAULT_GPIB_TIMEOUT: Duration = Duration::from_secs(1);
const SETTLE_TIME: Duration = Duration::from_millis(10);

/// Make of the GPIB adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpibModel {
    /// Galvant Industries GPIBUSB.
    Galvant,
    /// Prologix GPIB-USB / GPIB-Ethernet.
    Prologix,
}

impl FromStr for GpibModel {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gi" | "galvant" => Ok(GpibModel::Galvant),
            "pl" | "prologix" => Ok(GpibModel::Prologix),
            other => Err(InstrumentError::InvalidValue(format!(
                "Unknown GPIB adapter model '{other}'; expected 'gi' or 'pl'"
            ))),
        }
    }
}

impl fmt::Display for GpibModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpibModel::Galvant => f.write_str("gi"),
            GpibModel::Prologix => f.write_str("pl"),
        }
    }
}

/// Communicator addressing one instrument on a GPIB bus.
pub struct GpibCommunicator {
    inner: Box<dyn Communicator>,
    gpib_address: u8,
    model: GpibModel,
    version: u32,
    eoi: bool,
    eos: Option<String>,
    terminator: String,
    timeout: Duration,
    settle_time: Duration,
}

fn validate_address(address: u8) -> Result<u8> {
    if !(1..=30).contains(&address) {
        return Err(InstrumentError::OutOfRange(
            "GPIB address must be between 1 and 30.".to_string(),
        ));
    }
    Ok(address)
}

impl GpibCommunicator {
    /// Wraps the adapter link `inner` and addresses instrument `gpib_address`.
    ///
    /// A Galvant adapter is asked for its firmware version; a Prologix
    /// adapter is switched out of auto-read mode.
    pub async fn new(
        mut inner: Box<dyn Communicator>,
        gpib_address: u8,
        model: GpibModel,
    ) -> Result<Self> {
        let gpib_address = validate_address(gpib_address)?;
        inner.set_terminator(ADAPTER_TERMINATOR).await?;
        let version = match model {
            GpibModel::Galvant => {
                let reply = inner.query("+ver", None).await?;
                reply
                    .trim()
                    .parse()
                    .map_err(|e| InstrumentError::parse(reply.trim(), e))?
            }
            GpibModel::Prologix => {
                inner.sendcmd("++auto 0").await?;
                0
            }
        };
        debug!("GPIB adapter {} firmware version {}", model, version);
        let mut comm = Self {
            inner,
            gpib_address,
            model,
            version,
            eoi: false,
            eos: Some("\n".to_string()),
            terminator: "\n".to_string(),
            timeout: DEFAULT_GPIB_TIMEOUT,
            settle_time: SETTLE_TIME,
        };
        comm.init_termination().await?;
        Ok(comm)
    }

    /// Puts the adapter in `\n` termination without EOI. The EOI flag is
    /// then turned on locally and goes out with the first command.
    async fn init_termination(&mut self) -> Result<()> {
        let setup = if self.legacy_galvant() {
            [self.eoi_command(), self.eos_command()?]
        } else {
            [self.eos_command()?, self.eoi_command()]
        };
        for cmd in &setup {
            self.inner.sendcmd(cmd).await?;
        }
        self.eoi = true;
        Ok(())
    }

    /// Pause between adapter commands.
    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    pub fn gpib_address(&self) -> u8 {
        self.gpib_address
    }

    pub fn set_gpib_address(&mut self, address: u8) -> Result<()> {
        self.gpib_address = validate_address(address)?;
        Ok(())
    }

    pub fn model(&self) -> GpibModel {
        self.model
    }

    pub fn eoi(&self) -> bool {
        self.eoi
    }

    pub fn eos(&self) -> Option<&str> {
        self.eos.as_deref()
    }

    fn legacy_galvant(&self) -> bool {
        self.model == GpibModel::Galvant && self.version <= 4
    }

    fn eoi_command(&self) -> String {
        let flag = if self.eoi { "1" } else { "0" };
        if self.legacy_galvant() {
            format!("+eoi:{flag}")
        } else {
            format!("++eoi {flag}")
        }
    }

    fn timeout_command(&self) -> String {
        if self.legacy_galvant() {
            format!("+t:{}", self.timeout.as_secs())
        } else {
            format!("++read_tmo_ms {}", self.timeout.as_millis())
        }
    }

    fn eos_command(&self) -> Result<String> {
        if self.legacy_galvant() {
            let code = self
                .eos
                .as_deref()
                .and_then(|s| s.bytes().next())
                .map_or(0, u32::from);
            return Ok(format!("+eos:{code}"));
        }
        let code = match self.eos.as_deref() {
            Some("\r\n") => 0,
            Some("\r") => 1,
            Some("\n") => 2,
            None => 3,
            Some(_) => {
                return Err(InstrumentError::InvalidValue(
                    "EOS must be CRLF, CR, LF, or None".to_string(),
                ))
            }
        };
        Ok(format!("++eos {code}"))
    }

    pub async fn set_eoi(&mut self, eoi: bool) -> Result<()> {
        self.eoi = eoi;
        let cmd = self.eoi_command();
        self.inner.sendcmd(&cmd).await
    }

    pub async fn set_eos(&mut self, eos: Option<&str>) -> Result<()> {
        let previous = std::mem::replace(&mut self.eos, eos.map(str::to_string));
        match self.eos_command() {
            Ok(cmd) => self.inner.sendcmd(&cmd).await,
            Err(e) => {
                self.eos = previous;
                Err(e)
            }
        }
    }

}

async fn settle(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl Communicator for GpibCommunicator {
    fn address(&self) -> String {
        format!("{}@{}", self.gpib_address, self.inner.address())
    }

    fn link(&self) -> Link {
        Link::Gpib
    }

    /// `"eoi"` while EOI termination is active.
    fn terminator(&self) -> &str {
        if self.eoi {
            "eoi"
        } else {
            &self.terminator
        }
    }

    async fn set_terminator(&mut self, terminator: &str) -> Result<()> {
        let terminator = terminator.to_ascii_lowercase();
        if terminator == "eoi" {
            if !self.legacy_galvant() {
                self.set_eos(None).await?;
            }
            self.set_eoi(true).await?;
            self.terminator = terminator;
            return Ok(());
        }
        if self.legacy_galvant() && terminator.len() != 1 {
            return Err(InstrumentError::InvalidValue(
                "GPIB termination must be a single ASCII character or \"eoi\"".to_string(),
            ));
        }
        self.set_eos(Some(&terminator)).await?;
        self.set_eoi(false).await?;
        self.terminator = terminator;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        let cmd = self.timeout_command();
        self.inner.sendcmd(&cmd).await?;
        self.inner.set_timeout(timeout).await
    }

    async fn read_raw(&mut self, size: Option<usize>) -> Result<Vec<u8>> {
        self.inner.read_raw(size).await
    }

    async fn write_raw(&mut self, msg: &[u8]) -> Result<()> {
        self.inner.write_raw(msg).await
    }

    async fn flush_input(&mut self) -> Result<()> {
        self.inner.flush_input().await
    }

    async fn send_line(&mut self, msg: &str) -> Result<()> {
        if msg.is_empty() {
            return Ok(());
        }
        let address = match self.model {
            GpibModel::Galvant => format!("+a:{}", self.gpib_address),
            GpibModel::Prologix => format!("++addr {}", self.gpib_address),
        };
        let setup = [
            address,
            self.eoi_command(),
            self.timeout_command(),
            self.eos_command()?,
        ];
        for cmd in &setup {
            self.inner.sendcmd(cmd).await?;
            settle(self.settle_time).await;
        }
        self.inner.sendcmd(msg).await?;
        settle(self.settle_time).await;
        Ok(())
    }

    async fn query(&mut self, msg: &str, size: Option<usize>) -> Result<String> {
        debug!(address = %self.address(), " <- {:?}", msg);
        self.send_line(msg).await?;
        match self.model {
            GpibModel::Galvant if !msg.contains('?') => self.inner.sendcmd("+read").await?,
            GpibModel::Prologix => self.inner.sendcmd("++read").await?,
            GpibModel::Galvant => {}
        }
        let reply = self.inner.read(size).await?.trim().to_string();
        debug!(address = %self.address(), " -> {:?}", reply);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LoopbackCommunicator;
    use std::sync::{Arc, Mutex};

    async fn gpib(
        input: &str,
        address: u8,
        model: GpibModel,
    ) -> (GpibCommunicator, Arc<Mutex<Vec<u8>>>) {
        let inner = LoopbackCommunicator::new(input);
        let output = inner.output();
        let comm = GpibCommunicator::new(Box::new(inner), address, model)
            .await
            .unwrap()
            .with_settle_time(Duration::ZERO);
        (comm, output)
    }

    fn written(output: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8(output.lock().unwrap().clone()).unwrap()
    }

    #[tokio::test]
    async fn test_galvant_legacy_query() {
        let (mut comm, output) = gpib("4\r1.234\r", 1, GpibModel::Galvant).await;
        let reply = comm.query("FOO?", None).await.unwrap();
        assert_eq!(reply, "1.234");
        assert_eq!(
            written(&output),
            "+ver\r+eoi:0\r+eos:10\r+a:1\r+eoi:1\r+t:1\r+eos:10\rFOO?\r"
        );
    }

    #[tokio::test]
    async fn test_connect_sets_lf_termination() {
        let (comm, output) = gpib("5\r", 7, GpibModel::Galvant).await;
        assert_eq!(written(&output), "+ver\r++eos 2\r++eoi 0\r");
        assert_eq!(comm.terminator(), "eoi");
        assert_eq!(comm.eos(), Some("\n"));
    }

    #[tokio::test]
    async fn test_query_runs_on_spawned_task() {
        let (mut comm, _output) = gpib("0.5\r", 10, GpibModel::Prologix).await;
        let reply = tokio::spawn(async move { comm.query("MEAS?", None).await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, "0.5");
    }

    #[tokio::test]
    async fn test_galvant_reads_back_non_query_commands() {
        let (mut comm, output) = gpib("4\rabc \r", 5, GpibModel::Galvant).await;
        let reply = comm.query("DATA", None).await.unwrap();
        assert_eq!(reply, "abc");
        assert!(written(&output).ends_with("DATA\r+read\r"));
    }

    #[tokio::test]
    async fn test_prologix_query() {
        let (mut comm, output) = gpib("0.5\r", 10, GpibModel::Prologix).await;
        let reply = comm.query("MEAS?", None).await.unwrap();
        assert_eq!(reply, "0.5");
        assert_eq!(
            written(&output),
            "++auto 0\r++eos 2\r++eoi 0\r++addr 10\r++eoi 1\r++read_tmo_ms 1000\r++eos 2\rMEAS?\r++read\r"
        );
    }

    #[tokio::test]
    async fn test_prologix_terminator_changes() {
        let (mut comm, output) = gpib("", 3, GpibModel::Prologix).await;
        comm.set_terminator("\r").await.unwrap();
        assert_eq!(comm.terminator(), "\r");
        assert!(!comm.eoi());
        comm.set_terminator("eoi").await.unwrap();
        assert_eq!(comm.terminator(), "eoi");
        assert_eq!(comm.eos(), None);
        assert_eq!(
            written(&output),
            "++auto 0\r++eos 2\r++eoi 0\r++eos 1\r++eoi 0\r++eos 3\r++eoi 1\r"
        );
        assert!(comm.set_eos(Some("x")).await.is_err());
        assert_eq!(comm.eos(), None);
    }

    #[tokio::test]
    async fn test_address_bounds() {
        let inner = LoopbackCommunicator::new("");
        let err = GpibCommunicator::new(Box::new(inner), 31, GpibModel::Prologix)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, InstrumentError::OutOfRange(_)));

        let (mut comm, _) = gpib("", 3, GpibModel::Prologix).await;
        assert!(comm.set_gpib_address(0).is_err());
        comm.set_gpib_address(30).unwrap();
        assert_eq!(comm.address(), "30@loopback");
    }

    #[tokio::test]
    async fn test_timeout_command() {
        let (mut comm, output) = gpib("3\r", 2, GpibModel::Galvant).await;
        comm.set_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(written(&output), "+ver\r+eoi:0\r+eos:10\r+t:5\r");
        assert_eq!(comm.timeout(), Duration::from_secs(5));
    }
}
