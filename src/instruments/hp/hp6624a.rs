//! HP 6624A multi-output power supply (and the 662xA family).

use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::instrument::capabilities::{PowerSupply, PowerSupplyChannel};
use crate::property::{format_fixed, parse_float, validate_index};
use crate::units::{assume_units, Magnitude, Quantity, Unit, AMPERE, VOLT};
use crate::Instrument;
use async_trait::async_trait;

const DEFAULT_CHANNELS: usize = 4;

/// Appends the 1-based channel number to a command: `VSET?` becomes
/// `VSET? 1`, `VSET 5.0` becomes `VSET 1,5.0`.
fn channel_cmd(cmd: &str, channel: usize) -> String {
    match cmd.split_once(' ') {
        Some((head, value)) => format!("{head} {channel},{value}"),
        None => format!("{cmd} {channel}"),
    }
}

/// One output of an [`Hp6624a`].
pub struct Hp6624aChannel<'a> {
    inst: &'a mut Instrument,
    channel: usize,
}

impl Hp6624aChannel<'_> {
    async fn sendcmd(&mut self, cmd: &str) -> Result<()> {
        self.inst.sendcmd(&channel_cmd(cmd, self.channel)).await
    }

    async fn query_unitful(&mut self, cmd: &str, unit: Unit) -> Result<Quantity> {
        let cmd = channel_cmd(cmd, self.channel);
        let value = self.inst.query_parse(&cmd, parse_float).await?;
        Ok(Quantity::new(value, unit))
    }

    async fn set_unitful(&mut self, cmd: &str, value: Magnitude, unit: Unit) -> Result<()> {
        let value = assume_units(value, unit)?;
        self.sendcmd(&format!("{cmd} {}", format_fixed(value, 1))).await
    }

    async fn query_bool(&mut self, cmd: &str) -> Result<bool> {
        let cmd = channel_cmd(cmd, self.channel);
        self.inst
            .query_parse(&cmd, |r| match r.trim() {
                "1" => Ok(true),
                "0" => Ok(false),
                other => Err(InstrumentError::parse(other, "expected 1 or 0")),
            })
            .await
    }

    /// Output voltage measured by the sense wires.
    pub async fn voltage_sense(&mut self) -> Result<Quantity> {
        self.query_unitful("VOUT?", VOLT).await
    }

    pub async fn current_sense(&mut self) -> Result<Quantity> {
        self.query_unitful("IOUT?", AMPERE).await
    }

    /// Overvoltage protection set point. Not bounds checked.
    pub async fn overvoltage(&mut self) -> Result<Quantity> {
        self.query_unitful("OVSET?", VOLT).await
    }

    pub async fn set_overvoltage(&mut self, voltage: Magnitude) -> Result<()> {
        self.set_unitful("OVSET", voltage, VOLT).await
    }

    pub async fn overcurrent(&mut self) -> Result<bool> {
        self.query_bool("OVP?").await
    }

    pub async fn set_overcurrent(&mut self, on: bool) -> Result<()> {
        self.sendcmd(if on { "OVP 1" } else { "OVP 0" }).await
    }

    /// Clears overvoltage and overcurrent trips.
    pub async fn reset(&mut self) -> Result<()> {
        self.sendcmd("OVRST").await?;
        self.sendcmd("OCRST").await
    }
}

#[async_trait]
impl<'a> PowerSupplyChannel for Hp6624aChannel<'a> {
    async fn voltage(&mut self) -> Result<Quantity> {
        self.query_unitful("VSET?", VOLT).await
    }

    async fn set_voltage(&mut self, voltage: Magnitude) -> Result<()> {
        self.set_unitful("VSET", voltage, VOLT).await
    }

    async fn current(&mut self) -> Result<Quantity> {
        self.query_unitful("ISET?", AMPERE).await
    }

    async fn set_current(&mut self, current: Magnitude) -> Result<()> {
        self.set_unitful("ISET", current, AMPERE).await
    }

    async fn output(&mut self) -> Result<bool> {
        self.query_bool("OUT?").await
    }

    async fn set_output(&mut self, on: bool) -> Result<()> {
        self.sendcmd(if on { "OUT 1" } else { "OUT 0" }).await
    }
}

/// HP 6624A. Works for the 6621A, 6622A, 6623A and 6627A after adjusting
/// [`set_channel_count`](Hp6624a::set_channel_count).
pub struct Hp6624a {
    inst: Instrument,
    channel_count: usize,
}

impl Hp6624a {
    pub const MODEL: &'static str = "HP6624a";

    /// Handle for output `idx` (0-based).
    pub fn channel(&mut self, idx: usize) -> Result<Hp6624aChannel<'_>> {
        let idx = validate_index(idx, self.channel_count)?;
        Ok(Hp6624aChannel {
            inst: &mut self.inst,
            channel: idx + 1,
        })
    }

    pub fn set_channel_count(&mut self, count: usize) -> Result<()> {
        if count < 1 {
            return Err(InstrumentError::OutOfRange(
                "Channel count must be >=1".to_string(),
            ));
        }
        self.channel_count = count;
        Ok(())
    }

    pub async fn voltage_sense(&mut self) -> Result<Vec<Quantity>> {
        let mut values = Vec::with_capacity(self.channel_count);
        for idx in 0..self.channel_count {
            values.push(self.channel(idx)?.voltage_sense().await?);
        }
        Ok(values)
    }

    pub async fn current_sense(&mut self) -> Result<Vec<Quantity>> {
        let mut values = Vec::with_capacity(self.channel_count);
        for idx in 0..self.channel_count {
            values.push(self.channel(idx)?.current_sense().await?);
        }
        Ok(values)
    }

    /// Returns the supply to its power-on state.
    pub async fn clear(&mut self) -> Result<()> {
        self.inst.sendcmd("CLR").await
    }

    /// One value for every channel, or exactly one per channel.
    fn spread(&self, values: &[Magnitude], what: &str) -> Result<Vec<Magnitude>> {
        match values {
            [single] => Ok(vec![*single; self.channel_count]),
            many if many.len() == self.channel_count => Ok(many.to_vec()),
            _ => Err(InstrumentError::InvalidValue(format!(
                "When specifying the {what} for all channels as a list, it must be of length {}.",
                self.channel_count
            ))),
        }
    }
}

fn magnitudes(value: &AttrValue) -> Result<Vec<Magnitude>> {
    match value {
        AttrValue::List(items) => items.iter().map(AttrValue::as_magnitude).collect(),
        single => Ok(vec![single.as_magnitude()?]),
    }
}

#[async_trait]
impl OpenInstrument for Hp6624a {
    async fn open(inst: Instrument) -> Result<Self> {
        Ok(Self {
            inst,
            channel_count: DEFAULT_CHANNELS,
        })
    }
}

#[async_trait]
impl Driver for Hp6624a {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        if let Some(("channel", idx, attr)) = path.indexed() {
            let mut channel = self.channel(idx)?;
            return match attr {
                "voltage" => channel.set_voltage(value.as_magnitude()?).await,
                "current" => channel.set_current(value.as_magnitude()?).await,
                "overvoltage" => channel.set_overvoltage(value.as_magnitude()?).await,
                "overcurrent" => channel.set_overcurrent(value.as_bool()?).await,
                "output" => channel.set_output(value.as_bool()?).await,
                _ => Err(crate::driver::unknown_attr(path)),
            };
        }
        match path.simple() {
            Some("channel_count") => self.set_channel_count(value.as_usize()?),
            Some("voltage") => PowerSupply::set_voltage(self, &magnitudes(value)?).await,
            Some("current") => PowerSupply::set_current(self, &magnitudes(value)?).await,
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

#[async_trait]
impl PowerSupply for Hp6624a {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    async fn voltage(&mut self) -> Result<Vec<Quantity>> {
        let mut values = Vec::with_capacity(self.channel_count);
        for idx in 0..self.channel_count {
            values.push(self.channel(idx)?.voltage().await?);
        }
        Ok(values)
    }

    async fn set_voltage(&mut self, values: &[Magnitude]) -> Result<()> {
        let values = self.spread(values, "voltage")?;
        for (idx, value) in values.into_iter().enumerate() {
            self.channel(idx)?.set_voltage(value).await?;
        }
        Ok(())
    }

    async fn current(&mut self) -> Result<Vec<Quantity>> {
        let mut values = Vec::with_capacity(self.channel_count);
        for idx in 0..self.channel_count {
            values.push(self.channel(idx)?.current().await?);
        }
        Ok(values)
    }

    async fn set_current(&mut self, values: &[Magnitude]) -> Result<()> {
        let values = self.spread(values, "current")?;
        for (idx, value) in values.into_iter().enumerate() {
            self.channel(idx)?.set_current(value).await?;
        }
        Ok(())
    }
}
