//! SRS DS345 30 MHz synthesized function generator.

use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::generic_scpi::ScpiInstrument;
use crate::instrument::capabilities::{apply_function_generator_attr, FunctionGenerator, VoltageMode};
use crate::property::{format_float, parse_float, EnumProperty, UnitfulProperty};
use crate::units::{Magnitude, Quantity, DEGREE, HERTZ, VOLT};
use crate::Instrument;
use async_trait::async_trait;

crate::scpi_enum! {
    pub enum Srs345Function {
        Sinusoid => "0",
        Square => "1",
        Triangle => "2",
        Ramp => "3",
        Noise => "4",
        Arbitrary => "5",
    }
}

const FREQUENCY: UnitfulProperty = UnitfulProperty::new("FREQ", HERTZ);
const OFFSET: UnitfulProperty = UnitfulProperty::new("OFFS", VOLT);
const PHASE: UnitfulProperty = UnitfulProperty::new("PHSE", DEGREE);
const FUNCTION: EnumProperty<Srs345Function> = EnumProperty::new("FUNC");

fn mode_suffix(mode: VoltageMode) -> &'static str {
    match mode {
        VoltageMode::PeakToPeak => "VP",
        VoltageMode::Rms => "VR",
        VoltageMode::Dbm => "DB",
    }
}

/// Splits an `AMPL?` reply such as `1.25VP` into magnitude and mode.
fn parse_amplitude(reply: &str) -> Result<(f64, VoltageMode)> {
    let reply = reply.trim();
    let split = reply
        .len()
        .checked_sub(2)
        .filter(|i| reply.is_char_boundary(*i))
        .ok_or_else(|| InstrumentError::parse(reply, "amplitude reply too short"))?;
    let (magnitude, suffix) = reply.split_at(split);
    let mode = match suffix {
        "VP" => VoltageMode::PeakToPeak,
        "VR" => VoltageMode::Rms,
        "DB" => VoltageMode::Dbm,
        _ => return Err(InstrumentError::parse(reply, "unknown amplitude units")),
    };
    Ok((parse_float(magnitude)?, mode))
}

/// SRS DS345.
pub struct Srs345 {
    inst: Instrument,
}

impl Srs345 {
    pub const MODEL: &'static str = "Srs345";
}

#[async_trait]
impl OpenInstrument for Srs345 {
    async fn open(inst: Instrument) -> Result<Self> {
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for Srs345 {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        if apply_function_generator_attr(self, path, value).await? {
            return Ok(());
        }
        apply_base_attr(&mut self.inst, path, value).await
    }
}

impl ScpiInstrument for Srs345 {}

#[async_trait]
impl FunctionGenerator for Srs345 {
    type Function = Srs345Function;

    async fn raw_amplitude(&mut self) -> Result<(f64, VoltageMode)> {
        self.inst.query_parse("AMPL?", parse_amplitude).await
    }

    async fn set_raw_amplitude(&mut self, magnitude: f64, mode: VoltageMode) -> Result<()> {
        let cmd = format!("AMPL {}{}", format_float(magnitude), mode_suffix(mode));
        self.inst.sendcmd(&cmd).await
    }

    async fn frequency(&mut self) -> Result<Quantity> {
        FREQUENCY.get(&mut self.inst).await
    }

    async fn set_frequency(&mut self, frequency: Magnitude) -> Result<()> {
        FREQUENCY.set(&mut self.inst, frequency).await
    }

    async fn function(&mut self) -> Result<Srs345Function> {
        FUNCTION.get(&mut self.inst).await
    }

    async fn set_function(&mut self, function: Srs345Function) -> Result<()> {
        FUNCTION.set(&mut self.inst, function).await
    }

    async fn offset(&mut self) -> Result<Quantity> {
        OFFSET.get(&mut self.inst).await
    }

    async fn set_offset(&mut self, offset: Magnitude) -> Result<()> {
        OFFSET.set(&mut self.inst, offset).await
    }

    async fn phase(&mut self) -> Result<Quantity> {
        PHASE.get(&mut self.inst).await
    }

    async fn set_phase(&mut self, phase: Magnitude) -> Result<()> {
        PHASE.set(&mut self.inst, phase).await
    }
}
