//! Constructors connecting an [`Instrument`] to a transport, and the
//! `scheme://location?query` URIs that name them.
//!
//! ```text
//! serial:///dev/ttyUSB0?baud=9600
//! serial://?vid=0x0403&pid=0x6001&serial_number=FT1234
//! tcpip://192.168.0.10:5025
//! gpib+usb:///dev/ttyUSB0/15?model=pl
//! gpib+tcpip://192.168.0.20:1234/5
//! visa://GPIB0::1::INSTR
//! usbtmc:///dev/usbtmc0
//! file:///tmp/device
//! test://
//! ```

use super::Instrument;
use crate::comm::{
    FileCommunicator, GpibCommunicator, GpibModel, LoopbackCommunicator, SocketCommunicator,
};
use crate::error::{InstrumentError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Baud rate used when a serial URI does not give one.
pub const DEFAULT_BAUD: u32 = 115_200;
/// Baud rate of Galvant and Prologix GPIB-USB adapters.
pub const GPIBUSB_BAUD: u32 = 460_800;
#[cfg_attr(not(feature = "instrument_serial"), allow(dead_code))]
const SERIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// A parsed instrument URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentUri {
    pub scheme: String,
    /// Host and path joined; a serial port, socket address or resource name.
    pub location: String,
    pub query: HashMap<String, String>,
}

impl InstrumentUri {
    /// Splits `scheme://location?query`.
    ///
    /// VISA resource names contain `::`, so the location is taken verbatim
    /// rather than parsed as an authority.
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| InstrumentError::InvalidUri(format!("{uri:?} has no scheme")))?;
        if scheme.is_empty() {
            return Err(InstrumentError::InvalidUri(format!("{uri:?} has no scheme")));
        }
        let (location, query) = match rest.split_once('?') {
            Some((loc, q)) => (loc, q),
            None => (rest, ""),
        };
        let query = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            location: location.to_string(),
            query,
        })
    }

    fn param<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        self.query
            .get(key)
            .map(|v| {
                v.parse().map_err(|e| {
                    InstrumentError::InvalidUri(format!("bad value {v:?} for '{key}': {e}"))
                })
            })
            .transpose()
    }

    fn hex_param(&self, key: &str) -> Result<Option<u16>> {
        self.query
            .get(key)
            .map(|v| {
                let digits = v.trim_start_matches("0x").trim_start_matches("0X");
                u16::from_str_radix(digits, 16).map_err(|e| {
                    InstrumentError::InvalidUri(format!("bad value {v:?} for '{key}': {e}"))
                })
            })
            .transpose()
    }

    fn gpib_model(&self) -> Result<GpibModel> {
        self.query
            .get("model")
            .map_or(Ok(GpibModel::Galvant), |m| m.parse())
    }

    /// Splits a trailing `/ADDR` off the location.
    fn gpib_target(&self) -> Result<(&str, u8)> {
        let (device, addr) = self.location.rsplit_once('/').ok_or_else(|| {
            InstrumentError::InvalidUri(format!(
                "{:?} does not end in a GPIB address",
                self.location
            ))
        })?;
        let addr = addr.parse().map_err(|e| {
            InstrumentError::InvalidUri(format!("bad GPIB address {addr:?}: {e}"))
        })?;
        Ok((device, addr))
    }
}

fn split_host_port(location: &str) -> Result<(&str, u16)> {
    let (host, port) = location
        .rsplit_once(':')
        .ok_or_else(|| InstrumentError::InvalidUri(format!("{location:?} is not HOST:PORT")))?;
    let port = port
        .parse()
        .map_err(|e| InstrumentError::InvalidUri(format!("bad port {port:?}: {e}")))?;
    Ok((host, port))
}

impl Instrument {
    /// An instrument over a loopback preloaded with `input`.
    pub fn open_test(input: impl AsRef<[u8]>) -> Self {
        Instrument::new(Box::new(LoopbackCommunicator::new(input)))
    }

    pub async fn open_tcpip(host: &str, port: u16) -> Result<Self> {
        let comm = SocketCommunicator::connect(host, port).await?;
        Ok(Instrument::new(Box::new(comm)))
    }

    /// Opens a serial port at `baud` with a 3 s timeout.
    #[cfg(feature = "instrument_serial")]
    pub fn open_serial(port: &str, baud: u32) -> Result<Self> {
        let comm = crate::comm::serial::open(port, baud, SERIAL_TIMEOUT)?;
        Ok(Instrument::new(Box::new(comm)))
    }

    #[cfg(not(feature = "instrument_serial"))]
    pub fn open_serial(port: &str, _baud: u32) -> Result<Self> {
        Err(InstrumentError::NotSupported(format!(
            "cannot open serial port {port}: built without the instrument_serial feature"
        )))
    }

    /// Opens the USB-serial device with the given vendor and product IDs.
    #[cfg(feature = "instrument_serial")]
    pub fn open_serial_by_id(
        vid: u16,
        pid: u16,
        serial_number: Option<&str>,
        baud: u32,
    ) -> Result<Self> {
        let port = crate::comm::serial::find_port(vid, pid, serial_number)?;
        Self::open_serial(&port, baud)
    }

    #[cfg(not(feature = "instrument_serial"))]
    pub fn open_serial_by_id(
        vid: u16,
        pid: u16,
        _serial_number: Option<&str>,
        _baud: u32,
    ) -> Result<Self> {
        Err(InstrumentError::NotSupported(format!(
            "cannot look up {vid:04x}:{pid:04x}: built without the instrument_serial feature"
        )))
    }

    /// Opens instrument `address` behind a GPIB-USB adapter on `port`.
    #[cfg(feature = "instrument_serial")]
    pub async fn open_gpibusb(port: &str, address: u8, model: GpibModel) -> Result<Self> {
        let link = crate::comm::serial::open(port, GPIBUSB_BAUD, SERIAL_TIMEOUT)?;
        let comm = GpibCommunicator::new(Box::new(link), address, model).await?;
        Ok(Instrument::new(Box::new(comm)))
    }

    #[cfg(not(feature = "instrument_serial"))]
    pub async fn open_gpibusb(port: &str, _address: u8, _model: GpibModel) -> Result<Self> {
        Err(InstrumentError::NotSupported(format!(
            "cannot open GPIB adapter on {port}: built without the instrument_serial feature"
        )))
    }

    /// Opens instrument `address` behind a GPIB-Ethernet adapter.
    pub async fn open_gpibethernet(
        host: &str,
        port: u16,
        address: u8,
        model: GpibModel,
    ) -> Result<Self> {
        let link = SocketCommunicator::connect(host, port).await?;
        let comm = GpibCommunicator::new(Box::new(link), address, model).await?;
        Ok(Instrument::new(Box::new(comm)))
    }

    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self> {
        let comm = FileCommunicator::open(path).await?;
        Ok(Instrument::new(Box::new(comm)))
    }

    /// Opens a Linux `usbtmc` character device such as `/dev/usbtmc0`.
    pub async fn open_usbtmc(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_file(path).await
    }

    #[cfg(feature = "instrument_visa")]
    pub fn open_visa(resource: &str) -> Result<Self> {
        let comm = crate::comm::VisaCommunicator::open(resource)?;
        Ok(Instrument::new(Box::new(comm)))
    }

    #[cfg(not(feature = "instrument_visa"))]
    pub fn open_visa(resource: &str) -> Result<Self> {
        Err(InstrumentError::NotSupported(format!(
            "cannot open {resource}: built without the instrument_visa feature"
        )))
    }

    /// Opens the instrument named by `uri`.
    pub async fn open_from_uri(uri: &str) -> Result<Self> {
        let parsed = InstrumentUri::parse(uri)?;
        info!("Opening instrument at {}", uri);
        match parsed.scheme.as_str() {
            "serial" => {
                let baud = parsed.param("baud")?.unwrap_or(DEFAULT_BAUD);
                match (parsed.hex_param("vid")?, parsed.hex_param("pid")?) {
                    (Some(vid), Some(pid)) => Self::open_serial_by_id(
                        vid,
                        pid,
                        parsed.query.get("serial_number").map(String::as_str),
                        baud,
                    ),
                    (None, None) => Self::open_serial(&parsed.location, baud),
                    _ => Err(InstrumentError::InvalidUri(
                        "serial URIs need both vid and pid, or neither".to_string(),
                    )),
                }
            }
            "tcpip" => {
                let (host, port) = split_host_port(&parsed.location)?;
                Self::open_tcpip(host, port).await
            }
            "gpib+usb" | "gpib+serial" => {
                let (device, address) = parsed.gpib_target()?;
                Self::open_gpibusb(device, address, parsed.gpib_model()?).await
            }
            "gpib+tcpip" => {
                let (socket, address) = parsed.gpib_target()?;
                let (host, port) = split_host_port(socket)?;
                Self::open_gpibethernet(host, port, address, parsed.gpib_model()?).await
            }
            "visa" => Self::open_visa(&parsed.location),
            "usbtmc" => Self::open_usbtmc(&parsed.location).await,
            "file" => Self::open_file(&parsed.location).await,
            "test" => Ok(Self::open_test(parsed.location.as_bytes())),
            other => Err(InstrumentError::NotSupported(format!(
                "URI scheme '{other}' is not supported"
            ))),
        }
    }
}
