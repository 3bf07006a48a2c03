//! SCPI `SOURce` function generator subsystem.

use super::ScpiInstrument;
use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::Result;
use crate::instrument::capabilities::{apply_function_generator_attr, FunctionGenerator, VoltageMode};
use crate::property::{format_float, parse_float, EnumProperty, ScpiEnum, UnitfulProperty};
use crate::units::{Magnitude, Quantity, HERTZ, VOLT};
use crate::Instrument;
use async_trait::async_trait;

crate::scpi_enum! {
    /// Waveform shapes of SCPI function generators.
    pub enum ScpiFunction {
        Sinusoid => "SIN",
        Square => "SQU",
        Triangle => "TRI",
        Ramp => "RAMP",
        Noise => "NOIS",
        Arbitrary => "ARB",
    }
}

pub(crate) const FREQUENCY: UnitfulProperty = UnitfulProperty::new("FREQ", HERTZ);
pub(crate) const OFFSET: UnitfulProperty = UnitfulProperty::new("VOLT:OFFS", VOLT);
const FUNCTION: EnumProperty<ScpiFunction> = EnumProperty::new("FUNC");

/// Reads `VOLT:UNIT?` then `VOLT?`.
pub(crate) async fn scpi_raw_amplitude(inst: &mut Instrument) -> Result<(f64, VoltageMode)> {
    let mode = inst
        .query_parse("VOLT:UNIT?", |r| VoltageMode::parse_mnemonic(r.trim()))
        .await?;
    let magnitude = inst.query_parse("VOLT?", parse_float).await?;
    Ok((magnitude, mode))
}

pub(crate) async fn scpi_set_raw_amplitude(
    inst: &mut Instrument,
    magnitude: f64,
    mode: VoltageMode,
) -> Result<()> {
    inst.sendcmd(&format!("VOLT:UNIT {}", mode.mnemonic())).await?;
    inst.sendcmd(&format!("VOLT {}", format_float(magnitude))).await
}

/// A generic SCPI function generator.
pub struct ScpiFunctionGenerator {
    inst: Instrument,
}

impl ScpiFunctionGenerator {
    pub const MODEL: &'static str = "ScpiFunctionGenerator";
}

#[async_trait]
impl OpenInstrument for ScpiFunctionGenerator {
    async fn open(inst: Instrument) -> Result<Self> {
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for ScpiFunctionGenerator {
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

impl ScpiInstrument for ScpiFunctionGenerator {}

#[async_trait]
impl FunctionGenerator for ScpiFunctionGenerator {
    type Function = ScpiFunction;

    async fn raw_amplitude(&mut self) -> Result<(f64, VoltageMode)> {
        scpi_raw_amplitude(&mut self.inst).await
    }

    async fn set_raw_amplitude(&mut self, magnitude: f64, mode: VoltageMode) -> Result<()> {
        scpi_set_raw_amplitude(&mut self.inst, magnitude, mode).await
    }

    async fn frequency(&mut self) -> Result<Quantity> {
        FREQUENCY.get(&mut self.inst).await
    }

    async fn set_frequency(&mut self, frequency: Magnitude) -> Result<()> {
        FREQUENCY.set(&mut self.inst, frequency).await
    }

    async fn function(&mut self) -> Result<ScpiFunction> {
        FUNCTION.get(&mut self.inst).await
    }

    async fn set_function(&mut self, function: ScpiFunction) -> Result<()> {
        FUNCTION.set(&mut self.inst, function).await
    }

    async fn offset(&mut self) -> Result<Quantity> {
        OFFSET.get(&mut self.inst).await
    }

    async fn set_offset(&mut self, offset: Magnitude) -> Result<()> {
        OFFSET.set(&mut self.inst, offset).await
    }
}
