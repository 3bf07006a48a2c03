//! Serial ports via `tokio-serial`.

use super::stream::{StreamCommunicator, Transport};
use super::Link;
use crate::error::{InstrumentError, Result};
use std::io;
use std::time::Duration;
use serialport::SerialPortType;
use tokio_serial::{
    ClearBuffer, DataBits, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits,
};
use tracing::{debug, info};

/// Communicator for instruments on an RS-232 or USB-serial port.
pub type SerialCommunicator = StreamCommunicator<SerialStream>;

impl Transport for SerialStream {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }

    fn link(&self) -> Link {
        Link::Serial
    }
}

/// Opens `port` at `baud`, 8N1.
pub fn open(port: &str, baud: u32, timeout: Duration) -> Result<SerialCommunicator> {
    let stream = tokio_serial::new(port, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(timeout)
        .open_native_async()
        .map_err(|e| {
            InstrumentError::Serial(format!(
                "Failed to open serial port '{port}' at {baud} baud: {e}"
            ))
        })?;
    info!("Serial port '{}' opened at {} baud", port, baud);
    Ok(StreamCommunicator::new(stream, port).with_timeout(timeout))
}

/// Finds the port name of the USB-serial device with the given IDs.
///
/// `serial_number` disambiguates when several identical adapters are
/// attached; without it, more than one match is an error.
pub fn find_port(vid: u16, pid: u16, serial_number: Option<&str>) -> Result<String> {
    let ports = serialport::available_ports()?;
    let mut matches: Vec<String> = ports
        .into_iter()
        .filter_map(|p| match p.port_type {
            SerialPortType::UsbPort(info)
                if info.vid == vid
                    && info.pid == pid
                    && serial_number.map_or(true, |sn| info.serial_number.as_deref() == Some(sn)) =>
            {
                Some(p.port_name)
            }
            _ => None,
        })
        .collect();
    debug!("Ports matching {:04x}:{:04x}: {:?}", vid, pid, matches);

    match matches.len() {
        0 => Err(InstrumentError::Serial(format!(
            "No serial device found with VID {vid:#06x} and PID {pid:#06x}"
        ))),
        1 => Ok(matches.remove(0)),
        n => Err(InstrumentError::Serial(format!(
            "Found {n} serial devices with VID {vid:#06x} and PID {pid:#06x}; \
             specify a serial number to select one"
        ))),
    }
}
