//! Yokogawa 7651 programmable DC source.
//!
//! The 7651 is write-only: every setting is latched by a trigger (`E;`)
//! and none of them can be read back.

use crate::driver::{apply_base_attr, unknown_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::instrument::capabilities::PowerSupplyChannel;
use crate::property::{format_float, validate_index};
use crate::units::{assume_units, Magnitude, Quantity, AMPERE, VOLT};
use crate::Instrument;
use async_trait::async_trait;

crate::scpi_enum! {
    pub enum Yokogawa7651Mode {
        Voltage => "1",
        Current => "5",
    }
}

fn write_only(what: &str) -> InstrumentError {
    InstrumentError::NotSupported(format!(
        "This instrument does not support querying the {what}."
    ))
}

async fn trigger(inst: &mut Instrument) -> Result<()> {
    inst.sendcmd("E;").await
}

async fn set_mode(inst: &mut Instrument, mode: Yokogawa7651Mode) -> Result<()> {
    inst.sendcmd(&format!("F{mode};")).await?;
    trigger(inst).await
}

async fn set_level(inst: &mut Instrument, mode: Yokogawa7651Mode, value: f64) -> Result<()> {
    set_mode(inst, mode).await?;
    inst.sendcmd(&format!("SA{};", format_float(value))).await?;
    trigger(inst).await
}

/// The single output of a [`Yokogawa7651`].
pub struct Yokogawa7651Channel<'a> {
    inst: &'a mut Instrument,
}

impl Yokogawa7651Channel<'_> {
    /// Constant voltage or constant current operation.
    pub async fn set_mode(&mut self, mode: Yokogawa7651Mode) -> Result<()> {
        set_mode(self.inst, mode).await
    }
}

#[async_trait]
impl PowerSupplyChannel for Yokogawa7651Channel<'_> {
    async fn voltage(&mut self) -> Result<Quantity> {
        Err(write_only("output voltage setting"))
    }

    /// Switches to voltage mode and sets the level, 0 V to 30 V.
    async fn set_voltage(&mut self, voltage: Magnitude) -> Result<()> {
        let volts = assume_units(voltage, VOLT)?;
        set_level(self.inst, Yokogawa7651Mode::Voltage, volts).await
    }

    async fn current(&mut self) -> Result<Quantity> {
        Err(write_only("output current setting"))
    }

    /// Switches to current mode and sets the level, up to 100 mA.
    async fn set_current(&mut self, current: Magnitude) -> Result<()> {
        let amps = assume_units(current, AMPERE)?;
        set_level(self.inst, Yokogawa7651Mode::Current, amps).await
    }

    async fn output(&mut self) -> Result<bool> {
        Err(write_only("output status"))
    }

    async fn set_output(&mut self, on: bool) -> Result<()> {
        self.inst.sendcmd(if on { "O1;" } else { "O0;" }).await?;
        trigger(self.inst).await
    }

    async fn mode(&mut self) -> Result<String> {
        Err(write_only("operation mode"))
    }
}

/// Yokogawa 7651.
pub struct Yokogawa7651 {
    inst: Instrument,
}

impl Yokogawa7651 {
    pub const MODEL: &'static str = "Yokogawa7651";

    /// The only valid index is 0.
    pub fn channel(&mut self, idx: usize) -> Result<Yokogawa7651Channel<'_>> {
        validate_index(idx, 1)?;
        Ok(Yokogawa7651Channel {
            inst: &mut self.inst,
        })
    }

    fn output_channel(&mut self) -> Yokogawa7651Channel<'_> {
        Yokogawa7651Channel {
            inst: &mut self.inst,
        }
    }

    pub async fn set_voltage(&mut self, voltage: impl Into<Magnitude> + Send) -> Result<()> {
        self.output_channel().set_voltage(voltage.into()).await
    }

    pub async fn set_current(&mut self, current: impl Into<Magnitude> + Send) -> Result<()> {
        self.output_channel().set_current(current.into()).await
    }

    /// Latches pending settings.
    pub async fn trigger(&mut self) -> Result<()> {
        trigger(&mut self.inst).await
    }
}

#[async_trait]
impl OpenInstrument for Yokogawa7651 {
    async fn open(inst: Instrument) -> Result<Self> {
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for Yokogawa7651 {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        if let Some(("channel", idx, attr)) = path.indexed() {
            let mut ch = self.channel(idx)?;
            return match attr {
                "mode" => ch.set_mode(value.as_enum()?).await,
                "voltage" => ch.set_voltage(value.as_magnitude()?).await,
                "current" => ch.set_current(value.as_magnitude()?).await,
                "output" => ch.set_output(value.as_bool()?).await,
                _ => Err(unknown_attr(path)),
            };
        }
        match path.simple() {
            Some("voltage") => self.set_voltage(value.as_magnitude()?).await,
            Some("current") => self.set_current(value.as_magnitude()?).await,
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{expected_protocol, ProtocolCheck};
    use crate::units::{MILLIAMPERE, MILLIVOLT};

    async fn yoko(host: &[&str]) -> (Yokogawa7651, ProtocolCheck) {
        let (inst, check) = expected_protocol(host, &[], "\n");
        (Yokogawa7651::open(inst).await.unwrap(), check)
    }

    #[tokio::test]
    async fn test_channel_index() {
        let (mut yok, check) = yoko(&[]).await;
        assert!(yok.channel(0).is_ok());
        assert!(matches!(
            yok.channel(1).err(),
            Some(InstrumentError::IndexOutOfRange { .. })
        ));
        check.assert_done();
    }

    #[tokio::test]
    async fn test_channel_mode() {
        let (mut yok, check) = yoko(&["F5;", "E;", "F1;", "E;"]).await;
        let mut ch = yok.channel(0).unwrap();
        let err = ch.mode().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Operation not supported: This instrument does not support querying the operation mode."
        );
        ch.set_mode(Yokogawa7651Mode::Current).await.unwrap();
        ch.set_mode(Yokogawa7651Mode::Voltage).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_channel_voltage() {
        let (mut yok, check) = yoko(&["F1;", "E;", "SA5.0;", "E;", "F1;", "E;", "SA0.5;", "E;"]).await;
        let mut ch = yok.channel(0).unwrap();
        assert!(ch.voltage().await.is_err());
        ch.set_voltage(5.0.into()).await.unwrap();
        ch.set_voltage((500.0 * MILLIVOLT).into()).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_current() {
        let (mut yok, check) = yoko(&["F5;", "E;", "SA0.8;", "E;", "F5;", "E;", "SA0.05;", "E;"]).await;
        yok.set_current(0.8).await.unwrap();
        yok.set_current(50.0 * MILLIAMPERE).await.unwrap();
        let err = yok.channel(0).unwrap().current().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Operation not supported: This instrument does not support querying the output \
             current setting."
        );
        check.assert_done();
    }

    #[tokio::test]
    async fn test_output() {
        let (mut yok, check) = yoko(&["O1;", "E;", "O0;", "E;"]).await;
        let mut ch = yok.channel(0).unwrap();
        assert!(ch.output().await.is_err());
        ch.set_output(true).await.unwrap();
        ch.set_output(false).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_rejects_wrong_units() {
        let (mut yok, check) = yoko(&[]).await;
        assert!(yok.set_voltage(1.0 * AMPERE).await.is_err());
        check.assert_done();
    }
}
