//! Keithley 6485 picoammeter.
//!
//! The meter only measures current; readings come back as
//! `value{unit},timestamp,trigger_count`.

use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::generic_scpi::ScpiInstrument;
use crate::instrument::capabilities::Reading;
use crate::property::{format_sci, parse_float, parse_int, BoolProperty};
use crate::units::{assume_units, split_unit_str, Magnitude, Quantity, AMPERE};
use crate::Instrument;
use async_trait::async_trait;

/// Upper limits of the current ranges, in amperes.
pub const VALID_RANGES: [f64; 8] = [2e-9, 20e-9, 200e-9, 2e-6, 20e-6, 200e-6, 2e-3, 20e-3];

const ZERO_CHECK: BoolProperty = BoolProperty::new("SYST:ZCH");
const ZERO_CORRECT: BoolProperty = BoolProperty::new("SYST:ZCOR");

/// Parses `1.234E-3A,567,89`.
fn parse_reading(reply: &str) -> Result<Reading> {
    let fields: Vec<&str> = reply.trim().split(',').collect();
    let [current, timestamp, count] = fields.as_slice() else {
        return Err(InstrumentError::parse(
            reply,
            "expected reading,timestamp,trigger_count",
        ));
    };
    let (value, unit) = split_unit_str(current, AMPERE)?;
    Ok(Reading {
        value: Quantity::new(value, unit).to(AMPERE)?,
        timestamp: parse_float(timestamp)?,
        trigger_count: Some(parse_int(count)?),
    })
}

/// Keithley 6485.
pub struct Keithley6485 {
    inst: Instrument,
}

impl Keithley6485 {
    pub const MODEL: &'static str = "Keithley6485";

    pub async fn zero_check(&mut self) -> Result<bool> {
        ZERO_CHECK.get(&mut self.inst).await
    }

    pub async fn set_zero_check(&mut self, on: bool) -> Result<()> {
        ZERO_CHECK.set(&mut self.inst, on).await
    }

    pub async fn zero_correct(&mut self) -> Result<bool> {
        ZERO_CORRECT.get(&mut self.inst).await
    }

    pub async fn set_zero_correct(&mut self, on: bool) -> Result<()> {
        ZERO_CORRECT.set(&mut self.inst, on).await
    }

    pub async fn auto_range(&mut self) -> Result<bool> {
        Ok(self.inst.query("RANG:AUTO?").await?.trim() == "1")
    }

    pub async fn set_auto_range(&mut self, on: bool) -> Result<()> {
        let cmd = format!("RANG:AUTO {}", if on { "1" } else { "0" });
        self.inst.sendcmd(&cmd).await
    }

    /// Upper limit of the current range.
    pub async fn input_range(&mut self) -> Result<Quantity> {
        let value = self.inst.query_parse("RANG?", parse_float).await?;
        Ok(Quantity::new(value, AMPERE))
    }

    /// Only the limits in [`VALID_RANGES`] are accepted.
    pub async fn set_input_range(&mut self, range: impl Into<Magnitude> + Send) -> Result<()> {
        let value = assume_units(range, AMPERE)?;
        if !VALID_RANGES
            .iter()
            .any(|r| (r - value).abs() <= r * 1e-9)
        {
            return Err(InstrumentError::InvalidValue(
                "Unexpected range limit for currently selected mode.".to_string(),
            ));
        }
        self.inst.sendcmd(&format!("RANG {}", format_sci(value))).await
    }

    /// Latest post-processed reading, without triggering.
    pub async fn fetch(&mut self) -> Result<Reading> {
        self.inst.query_parse("FETC?", parse_reading).await
    }

    /// Triggers and returns a reading.
    pub async fn read_measurements(&mut self) -> Result<Reading> {
        self.inst.query_parse("READ?", parse_reading).await
    }

    pub async fn measure(&mut self) -> Result<Quantity> {
        Ok(self.read_measurements().await?.value)
    }
}

#[async_trait]
impl OpenInstrument for Keithley6485 {
    /// Resets the meter and turns zero check off so it is ready to read.
    async fn open(inst: Instrument) -> Result<Self> {
        let mut meter = Self { inst };
        meter.reset().await?;
        meter.set_zero_check(false).await?;
        Ok(meter)
    }
}

#[async_trait]
impl Driver for Keithley6485 {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        match path.simple() {
            Some("zero_check") => self.set_zero_check(value.as_bool()?).await,
            Some("zero_correct") => self.set_zero_correct(value.as_bool()?).await,
            Some("auto_range") => self.set_auto_range(value.as_bool()?).await,
            Some("input_range") => self.set_input_range(value.as_magnitude()?).await,
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

impl ScpiInstrument for Keithley6485 {}
