//! MingHe MHS5200 two-channel function generator.
//!
//! The device has no SCPI layer. Reads are `:r<ch><key>` and the reply
//! echoes the query followed by the value; writes are `:s<ch><key><value>`
//! and are acknowledged with `ok`. Values are scaled integers.

use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::instrument::capabilities::{
    apply_function_generator_attr, not_supported, FunctionGenerator, VoltageMode,
};
use crate::property::{parse_float, parse_int, validate_index, ScpiEnum};
use crate::units::{assume_units, Magnitude, Quantity, DEGREE, DIMENSIONLESS, HERTZ, VOLT};
use crate::Instrument;
use async_trait::async_trait;

crate::scpi_enum! {
    /// Waveform shapes, by the index the device uses.
    pub enum Mhs5200Function {
        Sine => "0",
        Square => "1",
        Triangular => "2",
        SawtoothUp => "3",
        SawtoothDown => "4",
    }
}

const CHANNELS: usize = 2;

fn mhs_ack(cmd: &str) -> Option<String> {
    if cmd.starts_with(":r") {
        None
    } else {
        Some("ok".to_string())
    }
}

/// Reads `:r<target><key>` and returns the value with the echo removed.
async fn read_key(inst: &mut Instrument, target: usize, key: char) -> Result<String> {
    let query = format!(":r{target}{key}");
    let reply = inst.query(&query).await?;
    let reply = reply.trim();
    Ok(reply.strip_prefix(query.as_str()).unwrap_or(reply).to_string())
}

/// Scales to the integer the device expects.
fn scaled(value: f64, factor: f64) -> i64 {
    (value * factor).round() as i64
}

/// One output of an [`Mhs5200`].
pub struct Mhs5200Channel<'a> {
    inst: &'a mut Instrument,
    channel: usize,
}

impl<'a> Mhs5200Channel<'a> {
    async fn read(&mut self, key: char) -> Result<String> {
        read_key(self.inst, self.channel, key).await
    }

    async fn write(&mut self, key: char, value: i64) -> Result<()> {
        let cmd = format!(":s{}{key}{value}", self.channel);
        self.inst.sendcmd(&cmd).await
    }

    /// Duty cycle, as read back by the device (tenths of a percent).
    pub async fn duty_cycle(&mut self) -> Result<f64> {
        Ok(parse_float(&self.read('d').await?)? / 10.0)
    }

    /// Sets the duty cycle from a fraction.
    pub async fn set_duty_cycle(&mut self, fraction: f64) -> Result<()> {
        self.write('d', scaled(fraction, 100.0)).await
    }

    pub async fn enable(&mut self) -> Result<bool> {
        Ok(parse_int(&self.read('b').await?)? != 0)
    }

    pub async fn set_enable(&mut self, on: bool) -> Result<()> {
        self.write('b', i64::from(on)).await
    }
}

#[async_trait]
impl<'a> FunctionGenerator for Mhs5200Channel<'a> {
    type Function = Mhs5200Function;

    /// The device reports RMS volts.
    async fn raw_amplitude(&mut self) -> Result<(f64, VoltageMode)> {
        let value = parse_float(&self.read('a').await?)?;
        Ok((value / 100.0, VoltageMode::Rms))
    }

    async fn set_raw_amplitude(&mut self, magnitude: f64, mode: VoltageMode) -> Result<()> {
        if mode == VoltageMode::Dbm {
            return Err(InstrumentError::NotSupported(
                "Decibel units are not supported.".to_string(),
            ));
        }
        self.write('a', scaled(magnitude, 100.0)).await
    }

    async fn frequency(&mut self) -> Result<Quantity> {
        let value = parse_float(&self.read('f').await?)?;
        Ok(Quantity::new(value / 100.0, HERTZ))
    }

    async fn set_frequency(&mut self, frequency: Magnitude) -> Result<()> {
        let hz = assume_units(frequency, HERTZ)?;
        self.write('f', scaled(hz, 100.0)).await
    }

    async fn function(&mut self) -> Result<Mhs5200Function> {
        let reply = self.read('w').await?;
        Mhs5200Function::parse_mnemonic(&reply)
    }

    async fn set_function(&mut self, function: Mhs5200Function) -> Result<()> {
        let code = parse_int(function.mnemonic())?;
        self.write('w', code).await
    }

    /// Offset as a fraction of the amplitude, in `-1.2..=1.2`.
    async fn offset(&mut self) -> Result<Quantity> {
        let raw = parse_int(&self.read('o').await?)?;
        Ok(Quantity::new(raw as f64 / 100.0 - 1.2, DIMENSIONLESS))
    }

    async fn set_offset(&mut self, offset: Magnitude) -> Result<()> {
        let fraction = assume_units(offset, DIMENSIONLESS)?;
        self.write('o', scaled(fraction, 100.0) + 120).await
    }

    async fn phase(&mut self) -> Result<Quantity> {
        let raw = parse_int(&self.read('p').await?)?;
        Ok(Quantity::new(raw as f64, DEGREE))
    }

    async fn set_phase(&mut self, phase: Magnitude) -> Result<()> {
        let degrees = assume_units(phase, DEGREE)?;
        self.write('p', degrees.trunc() as i64).await
    }
}

/// MingHe MHS5200A.
pub struct Mhs5200 {
    inst: Instrument,
}

impl Mhs5200 {
    pub const MODEL: &'static str = "MHS5200";

    /// Handle for output `idx` (0-based).
    pub fn channel(&mut self, idx: usize) -> Result<Mhs5200Channel<'_>> {
        let idx = validate_index(idx, CHANNELS)?;
        Ok(Mhs5200Channel {
            inst: &mut self.inst,
            channel: idx + 1,
        })
    }

    pub async fn serial_number(&mut self) -> Result<String> {
        read_key(&mut self.inst, 0, 'c').await
    }
}

#[async_trait]
impl OpenInstrument for Mhs5200 {
    async fn open(mut inst: Instrument) -> Result<Self> {
        inst.set_terminator("\r\n").await?;
        inst.set_ack(Some(mhs_ack));
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for Mhs5200 {
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
                "duty_cycle" => channel.set_duty_cycle(value.as_f64()?).await,
                "enable" => channel.set_enable(value.as_bool()?).await,
                _ => {
                    let sub = AttrPath::parse(attr)?;
                    if apply_function_generator_attr(&mut channel, &sub, value).await? {
                        Ok(())
                    } else {
                        Err(crate::driver::unknown_attr(path))
                    }
                }
            };
        }
        match path.simple() {
            Some("amplitude") | Some("frequency") | Some("offset") | Some("phase")
            | Some("function") => not_supported("settings without a channel index"),
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::capabilities::Amplitude;
    use crate::testing::{expected_protocol, ProtocolCheck};
    use crate::units::{DBM, KILOHERTZ};

    async fn mhs(host: &[&str], ins: &[&str]) -> (Mhs5200, ProtocolCheck) {
        let (inst, check) = expected_protocol(host, ins, "\r\n");
        (Mhs5200::open(inst).await.unwrap(), check)
    }

    #[tokio::test]
    async fn test_amplitude() {
        let (mut mhs, check) = mhs(
            &[":r1a", ":r2a", ":s1a660", ":s2a800"],
            &[":r1a330", ":r2a500", "ok", "ok"],
        )
        .await;
        assert_eq!(
            mhs.channel(0).unwrap().amplitude().await.unwrap(),
            Amplitude::Voltage(3.3 * VOLT, VoltageMode::Rms)
        );
        assert_eq!(
            mhs.channel(1).unwrap().amplitude().await.unwrap(),
            Amplitude::Voltage(5.0 * VOLT, VoltageMode::Rms)
        );
        mhs.channel(0).unwrap().set_amplitude((6.6 * VOLT).into()).await.unwrap();
        mhs.channel(1).unwrap().set_amplitude((8.0 * VOLT).into()).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_amplitude_dbm_not_supported() {
        let (mut mhs, check) = mhs(&[], &[]).await;
        let err = mhs
            .channel(0)
            .unwrap()
            .set_amplitude(Amplitude::Dbm(6.6 * DBM))
            .await
            .unwrap_err();
        assert!(matches!(err, InstrumentError::NotSupported(_)));
        check.assert_done();
    }

    #[tokio::test]
    async fn test_duty_cycle() {
        let (mut mhs, check) = mhs(
            &[":r1d", ":r2d", ":s1d6", ":s2d80"],
            &[":r1d010", ":r2d100", "ok", "ok"],
        )
        .await;
        assert_eq!(mhs.channel(0).unwrap().duty_cycle().await.unwrap(), 1.0);
        assert_eq!(mhs.channel(1).unwrap().duty_cycle().await.unwrap(), 10.0);
        mhs.channel(0).unwrap().set_duty_cycle(0.06).await.unwrap();
        mhs.channel(1).unwrap().set_duty_cycle(0.8).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_enable() {
        let (mut mhs, check) = mhs(
            &[":r1b", ":r2b", ":s1b0", ":s2b1"],
            &[":r1b1", ":r2b0", "ok", "ok"],
        )
        .await;
        assert!(mhs.channel(0).unwrap().enable().await.unwrap());
        assert!(!mhs.channel(1).unwrap().enable().await.unwrap());
        mhs.channel(0).unwrap().set_enable(false).await.unwrap();
        mhs.channel(1).unwrap().set_enable(true).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_frequency() {
        let (mut mhs, check) = mhs(
            &[":r1f", ":r2f", ":s1f600000", ":s2f800000"],
            &[":r1f3300000", ":r2f50000000", "ok", "ok"],
        )
        .await;
        assert_eq!(mhs.channel(0).unwrap().frequency().await.unwrap(), 33000.0 * HERTZ);
        assert_eq!(mhs.channel(1).unwrap().frequency().await.unwrap(), 500000.0 * HERTZ);
        mhs.channel(0)
            .unwrap()
            .set_frequency((6.0 * KILOHERTZ).into())
            .await
            .unwrap();
        mhs.channel(1).unwrap().set_frequency(8000.0.into()).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_offset() {
        let (mut mhs, check) = mhs(
            &[":r1o", ":r2o", ":s1o60", ":s2o180"],
            &[":r1o120", ":r2o0", "ok", "ok"],
        )
        .await;
        let first = mhs.channel(0).unwrap().offset().await.unwrap();
        assert!(first.value().abs() < 1e-12);
        let second = mhs.channel(1).unwrap().offset().await.unwrap();
        assert!((second.value() + 1.2).abs() < 1e-12);
        mhs.channel(0).unwrap().set_offset((-0.6).into()).await.unwrap();
        mhs.channel(1).unwrap().set_offset(0.6.into()).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_phase() {
        let (mut mhs, check) = mhs(
            &[":r1p", ":r2p", ":s1p60", ":s2p180"],
            &[":r1p120", ":r2p0", "ok", "ok"],
        )
        .await;
        assert_eq!(mhs.channel(0).unwrap().phase().await.unwrap(), 120.0 * DEGREE);
        assert_eq!(mhs.channel(1).unwrap().phase().await.unwrap(), 0.0 * DEGREE);
        mhs.channel(0).unwrap().set_phase(60.into()).await.unwrap();
        mhs.channel(1).unwrap().set_phase(180.into()).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_function() {
        let (mut mhs, check) = mhs(
            &[":r1w", ":r2w", ":s1w2", ":s2w3"],
            &[":r1w0", ":r2w1", "ok", "ok"],
        )
        .await;
        assert_eq!(mhs.channel(0).unwrap().function().await.unwrap(), Mhs5200Function::Sine);
        assert_eq!(mhs.channel(1).unwrap().function().await.unwrap(), Mhs5200Function::Square);
        mhs.channel(0)
            .unwrap()
            .set_function(Mhs5200Function::Triangular)
            .await
            .unwrap();
        mhs.channel(1)
            .unwrap()
            .set_function(Mhs5200Function::SawtoothUp)
            .await
            .unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_serial_number() {
        let (mut mhs, check) = mhs(&[":r0c"], &[":r0c5225A1"]).await;
        assert_eq!(mhs.serial_number().await.unwrap(), "5225A1");
        check.assert_done();
    }

    #[tokio::test]
    async fn test_channel_attrs() {
        let (mut mhs, check) = mhs(&[":s2f100000", ":s1b1"], &["ok", "ok"]).await;
        mhs.apply_attr(&AttrPath::parse("channel[1].frequency").unwrap(), &AttrValue::Float(1000.0))
            .await
            .unwrap();
        mhs.apply_attr(&AttrPath::parse("channel[0].enable").unwrap(), &AttrValue::Bool(true))
            .await
            .unwrap();
        assert!(mhs
            .apply_attr(&AttrPath::parse("channel[2].enable").unwrap(), &AttrValue::Bool(true))
            .await
            .is_err());
        check.assert_done();
    }
}
