//! Qubitekk CC1 coincidence counter.
//!
//! The command set changed with firmware 2.2: newer units use `ON`/`OFF`
//! booleans, `:{CMD}:{value}` setters and named trigger modes, and can echo
//! commands. The firmware version is read when the driver opens.

use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::instrument::echo_ack;
use crate::property::{format_general, parse_int, validate_index, ScpiEnum};
use crate::units::{assume_units, Magnitude, Quantity, NANOSECOND, SECOND};
use crate::Instrument;
use async_trait::async_trait;
use tracing::{debug, warn};

crate::scpi_enum! {
    /// Counting modes. Mnemonics are those of current firmware.
    pub enum Cc1TriggerMode {
        Continuous => "MODE CONT",
        StartStop => "MODE STOP",
    }
}

impl Cc1TriggerMode {
    fn legacy_code(&self) -> &'static str {
        match self {
            Cc1TriggerMode::Continuous => "0",
            Cc1TriggerMode::StartStop => "1",
        }
    }
}

/// Firmware version as `(major, minor, patch)`.
pub type Firmware = (u32, u32, u32);

const CHANNEL_NAMES: [&str; 3] = ["C1", "C2", "CO"];

/// Attempts at `FIRM?` while the unit answers `Unknown ...`.
const FIRMWARE_TRIES: usize = 5;

fn parse_firmware(reply: &str) -> Result<Firmware> {
    let version = reply.trim().trim_start_matches("Firmware v");
    let mut parts = [0u32; 3];
    for (slot, part) in parts.iter_mut().zip(version.split('.')) {
        *slot = part
            .trim()
            .parse()
            .map_err(|e| InstrumentError::parse(reply, e))?;
    }
    Ok((parts[0], parts[1], parts[2]))
}

/// One counter of a [`Cc1`]: the two detector inputs and the coincidences.
pub struct Cc1Channel<'a> {
    inst: &'a mut Instrument,
    name: &'static str,
}

impl<'a> Cc1Channel<'a> {
    pub async fn count(&mut self) -> Result<i64> {
        let cmd = format!("COUN:{}?", self.name);
        self.inst.query_parse(&cmd, parse_int).await
    }
}

/// Qubitekk CC1.
pub struct Cc1 {
    inst: Instrument,
    firmware: Firmware,
    ack_on: bool,
}

impl Cc1 {
    pub const MODEL: &'static str = "CC1";

    pub fn firmware(&self) -> Firmware {
        self.firmware
    }

    fn modern(&self) -> bool {
        self.firmware.0 >= 2 && self.firmware.1 > 1
    }

    fn bool_str(&self, value: bool) -> &'static str {
        match (self.modern(), value) {
            (true, true) => "ON",
            (true, false) => "OFF",
            (false, true) => "1",
            (false, false) => "0",
        }
    }

    fn setter(&self, cmd: &str, value: &str) -> String {
        if self.modern() {
            format!(":{cmd}:{value}")
        } else {
            format!(":{cmd} {value}")
        }
    }

    /// Counter `idx`: 0 and 1 are the inputs, 2 the coincidences.
    pub fn channel(&mut self, idx: usize) -> Result<Cc1Channel<'_>> {
        let idx = validate_index(idx, CHANNEL_NAMES.len())?;
        Ok(Cc1Channel {
            inst: &mut self.inst,
            name: CHANNEL_NAMES[idx],
        })
    }

    /// Whether the unit echoes each command before its reply.
    pub fn acknowledge(&self) -> bool {
        self.ack_on
    }

    pub async fn set_acknowledge(&mut self, on: bool) -> Result<()> {
        if !self.modern() {
            return Err(InstrumentError::NotSupported(
                "Acknowledge message not implemented in this version.".to_string(),
            ));
        }
        if on == self.ack_on {
            return Ok(());
        }
        self.inst
            .sendcmd(if on { ":ACKN ON" } else { ":ACKN OF" })
            .await?;
        self.ack_on = on;
        self.inst.set_ack(if on { Some(echo_ack) } else { None });
        Ok(())
    }

    async fn get_bool(&mut self, cmd: &str) -> Result<bool> {
        let on = self.bool_str(true);
        Ok(self.inst.query(&format!("{cmd}?")).await?.trim() == on)
    }

    async fn set_bool(&mut self, cmd: &str, value: bool) -> Result<()> {
        let cmd = self.setter(cmd, self.bool_str(value));
        self.inst.sendcmd(&cmd).await
    }

    /// Gate input enabled.
    pub async fn gate(&mut self) -> Result<bool> {
        self.get_bool("GATE").await
    }

    pub async fn set_gate(&mut self, on: bool) -> Result<()> {
        self.set_bool("GATE", on).await
    }

    /// Accidental-coincidence subtraction enabled.
    pub async fn subtract(&mut self) -> Result<bool> {
        self.get_bool("SUBT").await
    }

    pub async fn set_subtract(&mut self, on: bool) -> Result<()> {
        self.set_bool("SUBT", on).await
    }

    pub async fn trigger_mode(&mut self) -> Result<Cc1TriggerMode> {
        let reply = self.inst.query("TRIG?").await?;
        let reply = reply.trim();
        if self.modern() {
            return Cc1TriggerMode::parse_mnemonic(reply);
        }
        Cc1TriggerMode::variants()
            .iter()
            .copied()
            .find(|m| m.legacy_code() == reply)
            .ok_or_else(|| InstrumentError::parse(reply, "unknown trigger mode"))
    }

    pub async fn set_trigger_mode(&mut self, mode: Cc1TriggerMode) -> Result<()> {
        let value = if self.modern() {
            mode.mnemonic()
        } else {
            mode.legacy_code()
        };
        let cmd = self.setter("TRIG", value);
        self.inst.sendcmd(&cmd).await
    }

    /// Coincidence window.
    pub async fn window(&mut self) -> Result<Quantity> {
        self.inst
            .query_parse("WIND?", |r| Quantity::parse(r, NANOSECOND))
            .await
    }

    /// Sets the coincidence window, 0 to 7 ns. Bare numbers are nanoseconds.
    pub async fn set_window(&mut self, window: impl Into<Magnitude>) -> Result<()> {
        let ns = assume_units(window, NANOSECOND)?.trunc() as i64;
        if !(0..=7).contains(&ns) {
            return Err(InstrumentError::OutOfRange("Window is out of range.".to_string()));
        }
        self.inst.sendcmd(&format!(":WIND {ns}")).await
    }

    /// Delay applied to channel 1.
    pub async fn delay(&mut self) -> Result<Quantity> {
        self.inst
            .query_parse("DELA?", |r| Quantity::parse(r, NANOSECOND))
            .await
    }

    /// Sets the channel 1 delay: an even number of nanoseconds up to 14.
    pub async fn set_delay(&mut self, delay: impl Into<Magnitude>) -> Result<()> {
        let ns = assume_units(delay, NANOSECOND)?;
        if !(0.0..=14.0).contains(&ns) {
            return Err(InstrumentError::OutOfRange(
                "New delay value is out of bounds.".to_string(),
            ));
        }
        if ns % 2.0 != 0.0 {
            return Err(InstrumentError::InvalidValue(
                "New magnitude must be an even number".to_string(),
            ));
        }
        self.inst.sendcmd(&format!(":DELA {}", ns as i64)).await
    }

    /// Time between counter clears. Firmware up to 2.1 reports milliseconds.
    pub async fn dwell_time(&mut self) -> Result<Quantity> {
        let dwell = self
            .inst
            .query_parse("DWEL?", |r| Quantity::parse(r, SECOND))
            .await?;
        if self.firmware.0 <= 2 && self.firmware.1 <= 1 {
            return Ok(Quantity::new(dwell.value() / 1000.0, dwell.unit()));
        }
        Ok(dwell)
    }

    pub async fn set_dwell_time(&mut self, dwell: impl Into<Magnitude>) -> Result<()> {
        let secs = assume_units(dwell, SECOND)?;
        if secs < 0.0 {
            return Err(InstrumentError::OutOfRange(
                "Dwell time cannot be negative.".to_string(),
            ));
        }
        self.inst
            .sendcmd(&format!(":DWEL {}", format_general(secs)))
            .await
    }

    pub async fn clear_counts(&mut self) -> Result<()> {
        self.inst.sendcmd("CLEA").await
    }
}

async fn read_firmware(inst: &mut Instrument) -> Result<Firmware> {
    for _ in 0..FIRMWARE_TRIES {
        let reply = inst.query("FIRM?").await?;
        if reply.contains("Unknown") {
            debug!(reply = %reply, "CC1 did not recognise FIRM?, asking again");
            continue;
        }
        return parse_firmware(&reply);
    }
    Err(InstrumentError::parse("Unknown", "CC1 never reported its firmware"))
}

#[async_trait]
impl OpenInstrument for Cc1 {
    async fn open(mut inst: Instrument) -> Result<Self> {
        inst.set_terminator("\n").await?;
        inst.sendcmd(":ACKN OF").await?;
        // Older firmware answers with an error line, newer ones with nothing.
        if let Err(err) = inst.read(None).await {
            if !err.is_io() {
                return Err(err);
            }
            warn!(error = %err, "CC1 sent no reply to :ACKN OF");
        }
        let firmware = read_firmware(&mut inst).await?;
        Ok(Self {
            inst,
            firmware,
            ack_on: false,
        })
    }
}

#[async_trait]
impl Driver for Cc1 {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        match path.simple() {
            Some("acknowledge") => self.set_acknowledge(value.as_bool()?).await,
            Some("gate") => self.set_gate(value.as_bool()?).await,
            Some("subtract") => self.set_subtract(value.as_bool()?).await,
            Some("trigger_mode") => self.set_trigger_mode(value.as_enum()?).await,
            Some("window") => self.set_window(value.as_magnitude()?).await,
            Some("delay") => self.set_delay(value.as_magnitude()?).await,
            Some("dwell_time") => self.set_dwell_time(value.as_magnitude()?).await,
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}
