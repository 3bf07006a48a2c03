//! Keithley 2182 nanovoltmeter.

use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::generic_scpi::ScpiInstrument;
use crate::instrument::capabilities::{not_supported, Multimeter};
use crate::property::{parse_float, validate_index, EnumProperty, ScpiEnum};
use crate::units::{Quantity, Unit, CELSIUS, FAHRENHEIT, KELVIN, VOLT};
use crate::Instrument;
use async_trait::async_trait;

crate::scpi_enum! {
    /// Measurement functions of the 2182.
    pub enum Keithley2182Mode {
        VoltageDc => "VOLT",
        Temperature => "TEMP",
    }
}

crate::scpi_enum! {
    pub enum Keithley2182TriggerMode {
        Immediate => "IMM",
        External => "EXT",
        Bus => "BUS",
        Timer => "TIM",
        Manual => "MAN",
    }
}

const CHANNELS: usize = 2;

const TRIGGER_MODE: EnumProperty<Keithley2182TriggerMode> = EnumProperty::new("TRIG:SOUR");

async fn sense_mode(inst: &mut Instrument) -> Result<Keithley2182Mode> {
    inst.query_parse("SENS:FUNC?", |r| Keithley2182Mode::parse_mnemonic(r.trim()))
        .await
}

/// Unit of readings: volts, or the configured temperature unit.
async fn reading_unit(inst: &mut Instrument) -> Result<Unit> {
    if sense_mode(inst).await? == Keithley2182Mode::VoltageDc {
        return Ok(VOLT);
    }
    match inst.query("UNIT:TEMP?").await?.trim() {
        "C" => Ok(CELSIUS),
        "K" => Ok(KELVIN),
        "F" => Ok(FAHRENHEIT),
        _ => Err(InstrumentError::InvalidValue(
            "Unknown temperature units.".to_string(),
        )),
    }
}

/// One input channel of a [`Keithley2182`].
pub struct Keithley2182Channel<'a> {
    inst: &'a mut Instrument,
    channel: usize,
}

#[async_trait]
impl<'a> Multimeter for Keithley2182Channel<'a> {
    type Mode = Keithley2182Mode;
    type TriggerMode = Keithley2182TriggerMode;

    async fn mode(&mut self) -> Result<Keithley2182Mode> {
        sense_mode(self.inst).await
    }

    async fn set_mode(&mut self, _mode: Keithley2182Mode) -> Result<()> {
        not_supported("setting the mode of a single channel")
    }

    /// Reads the latest fresh value of this channel. Only the current mode
    /// is supported.
    async fn measure(&mut self, mode: Option<Keithley2182Mode>) -> Result<Quantity> {
        if mode.is_some() {
            return not_supported("measuring a channel in another mode");
        }
        self.inst
            .sendcmd(&format!("SENS:CHAN {}", self.channel))
            .await?;
        let value = self.inst.query_parse("SENS:DATA:FRES?", parse_float).await?;
        let unit = reading_unit(self.inst).await?;
        Ok(Quantity::new(value, unit))
    }
}

/// Keithley 2182 / 2182A.
pub struct Keithley2182 {
    inst: Instrument,
}

impl Keithley2182 {
    pub const MODEL: &'static str = "Keithley2182";

    /// Handle for input `idx` (0-based; the 2182 has two).
    pub fn channel(&mut self, idx: usize) -> Result<Keithley2182Channel<'_>> {
        let idx = validate_index(idx, CHANNELS)?;
        Ok(Keithley2182Channel {
            inst: &mut self.inst,
            channel: idx + 1,
        })
    }

    /// Unit of readings in the current mode.
    pub async fn units(&mut self) -> Result<Unit> {
        reading_unit(&mut self.inst).await
    }

    /// Readings in the output buffer, which are not erased.
    pub async fn fetch(&mut self) -> Result<Vec<Quantity>> {
        let reply = self.inst.query("FETC?").await?;
        let values = reply
            .split(',')
            .map(parse_float)
            .collect::<Result<Vec<_>>>()?;
        let unit = self.units().await?;
        Ok(values.into_iter().map(|v| Quantity::new(v, unit)).collect())
    }
}

#[async_trait]
impl OpenInstrument for Keithley2182 {
    async fn open(inst: Instrument) -> Result<Self> {
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for Keithley2182 {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        match path.simple() {
            Some("mode") => self.set_mode(value.as_enum()?).await,
            Some("relative") => self.set_relative(value.as_bool()?).await,
            Some("trigger_mode") => self.set_trigger_mode(value.as_enum()?).await,
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

impl ScpiInstrument for Keithley2182 {}

#[async_trait]
impl Multimeter for Keithley2182 {
    type Mode = Keithley2182Mode;
    type TriggerMode = Keithley2182TriggerMode;

    async fn mode(&mut self) -> Result<Keithley2182Mode> {
        sense_mode(&mut self.inst).await
    }

    async fn set_mode(&mut self, mode: Keithley2182Mode) -> Result<()> {
        self.inst.sendcmd(&format!("CONF:{}", mode.mnemonic())).await
    }

    async fn trigger_mode(&mut self) -> Result<Keithley2182TriggerMode> {
        TRIGGER_MODE.get(&mut self.inst).await
    }

    async fn set_trigger_mode(&mut self, mode: Keithley2182TriggerMode) -> Result<()> {
        TRIGGER_MODE.set(&mut self.inst, mode).await
    }

    /// Relative (offset-subtracted) readings on channel 1.
    async fn relative(&mut self) -> Result<bool> {
        let mode = sense_mode(&mut self.inst).await?;
        let cmd = format!("SENS:{}:CHAN1:REF:STAT?", mode.mnemonic());
        Ok(self.inst.query(&cmd).await?.trim() == "ON")
    }

    /// Enabling while already enabled re-acquires the reference reading.
    async fn set_relative(&mut self, relative: bool) -> Result<()> {
        let mode = sense_mode(&mut self.inst).await?;
        let enabled = self.relative().await?;
        let cmd = if relative && enabled {
            format!("SENS:{}:CHAN1:REF:ACQ", mode.mnemonic())
        } else {
            let state = if relative { "ON" } else { "OFF" };
            format!("SENS:{}:CHAN1:REF:STAT {state}", mode.mnemonic())
        };
        self.inst.sendcmd(&cmd).await
    }

    async fn measure(&mut self, mode: Option<Keithley2182Mode>) -> Result<Quantity> {
        let mode = match mode {
            Some(mode) => mode,
            None => sense_mode(&mut self.inst).await?,
        };
        let cmd = format!("MEAS:{}?", mode.mnemonic());
        let value = self.inst.query_parse(&cmd, parse_float).await?;
        let unit = self.units().await?;
        Ok(Quantity::new(value, unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{expected_protocol, ProtocolCheck};

    async fn meter(host: &[&str], ins: &[&str]) -> (Keithley2182, ProtocolCheck) {
        let (inst, check) = expected_protocol(host, ins, "\n");
        (Keithley2182::open(inst).await.unwrap(), check)
    }

    #[tokio::test]
    async fn test_channel_mode() {
        let (mut k, check) = meter(&["SENS:FUNC?"], &["VOLT"]).await;
        let mut ch = k.channel(0).unwrap();
        assert_eq!(ch.mode().await.unwrap(), Keithley2182Mode::VoltageDc);
        check.assert_done();
        assert!(k.channel(2).is_err());
    }

    #[tokio::test]
    async fn test_channel_measure_voltage() {
        let (mut k, check) = meter(
            &["SENS:CHAN 1", "SENS:DATA:FRES?", "SENS:FUNC?"],
            &["1.234", "VOLT"],
        )
        .await;
        assert_eq!(k.channel(0).unwrap().measure(None).await.unwrap(), 1.234 * VOLT);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_channel_measure_temperature() {
        let (mut k, check) = meter(
            &["SENS:CHAN 2", "SENS:DATA:FRES?", "SENS:FUNC?", "UNIT:TEMP?"],
            &["1.234", "TEMP", "C"],
        )
        .await;
        let t = k.channel(1).unwrap().measure(None).await.unwrap();
        assert_eq!(t, Quantity::new(1.234, CELSIUS));
        check.assert_done();
    }

    #[tokio::test]
    async fn test_unknown_temperature_unit() {
        let (mut k, _check) = meter(&["SENS:FUNC?", "UNIT:TEMP?"], &["TEMP", "Z"]).await;
        let err = k.units().await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown temperature units.");
    }

    #[tokio::test]
    async fn test_units() {
        let (mut k, check) = meter(
            &["SENS:FUNC?", "UNIT:TEMP?", "SENS:FUNC?", "UNIT:TEMP?", "SENS:FUNC?"],
            &["TEMP", "F", "TEMP", "K", "VOLT"],
        )
        .await;
        assert_eq!(k.units().await.unwrap(), FAHRENHEIT);
        assert_eq!(k.units().await.unwrap(), KELVIN);
        assert_eq!(k.units().await.unwrap(), VOLT);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_fetch_and_measure() {
        let (mut k, check) = meter(
            &["FETC?", "SENS:FUNC?", "SENS:FUNC?", "MEAS:VOLT?", "SENS:FUNC?"],
            &["1.234,1,5.678", "VOLT", "VOLT", "1.234", "VOLT"],
        )
        .await;
        assert_eq!(
            k.fetch().await.unwrap(),
            vec![1.234 * VOLT, 1.0 * VOLT, 5.678 * VOLT]
        );
        assert_eq!(k.measure(None).await.unwrap(), 1.234 * VOLT);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_relative() {
        let (mut k, check) = meter(
            &[
                "SENS:FUNC?",
                "SENS:VOLT:CHAN1:REF:STAT?",
                "SENS:FUNC?",
                "SENS:FUNC?",
                "SENS:VOLT:CHAN1:REF:STAT?",
                "SENS:VOLT:CHAN1:REF:ACQ",
                "SENS:FUNC?",
                "SENS:FUNC?",
                "SENS:VOLT:CHAN1:REF:STAT?",
                "SENS:VOLT:CHAN1:REF:STAT ON",
            ],
            &["VOLT", "ON", "VOLT", "VOLT", "ON", "VOLT", "VOLT", "OFF"],
        )
        .await;
        assert!(k.relative().await.unwrap());
        k.set_relative(true).await.unwrap();
        k.set_relative(true).await.unwrap();
        check.assert_done();
    }

    async fn cycle_trigger<M: Multimeter>(m: &mut M, next: M::TriggerMode) -> Result<M::TriggerMode> {
        let current = m.trigger_mode().await?;
        m.set_trigger_mode(next).await?;
        Ok(current)
    }

    #[tokio::test]
    async fn test_trigger_mode_through_multimeter() {
        let (mut k, check) = meter(&["TRIG:SOUR?", "TRIG:SOUR TIM"], &["EXT"]).await;
        let previous = cycle_trigger(&mut k, Keithley2182TriggerMode::Timer).await.unwrap();
        assert_eq!(previous, Keithley2182TriggerMode::External);
        check.assert_done();

        let err = k.channel(0).unwrap().trigger_mode().await.unwrap_err();
        assert!(matches!(err, InstrumentError::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_attrs() {
        let (mut k, check) = meter(&["CONF:TEMP", "TRIG:SOUR BUS"], &[]).await;
        k.apply_attr(&AttrPath::parse("mode").unwrap(), &AttrValue::Str("TEMP".into()))
            .await
            .unwrap();
        k.apply_attr(&AttrPath::parse("trigger_mode").unwrap(), &AttrValue::Str("bus".into()))
            .await
            .unwrap();
        check.assert_done();
    }
}
