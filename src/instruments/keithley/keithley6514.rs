//! Keithley 6514 electrometer.

use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::generic_scpi::ScpiInstrument;
use crate::instrument::capabilities::{Electrometer, Reading};
use crate::property::{format_sci, parse_float, BoolProperty, EnumProperty, ScpiEnum, SetFmt};
use crate::units::{Quantity, Unit, AMPERE, COULOMB, OHM, VOLT};
use crate::Instrument;
use async_trait::async_trait;

crate::scpi_enum! {
    /// Measurement functions of the 6514.
    pub enum Keithley6514Mode {
        Voltage => "VOLT:DC",
        Current => "CURR:DC",
        Resistance => "RES",
        Charge => "CHAR",
    }
}

crate::scpi_enum! {
    pub enum Keithley6514TriggerMode {
        Immediate => "IMM",
        Tlink => "TLINK",
    }
}

crate::scpi_enum! {
    /// Trigger arming sources.
    pub enum ArmSource {
        Immediate => "IMM",
        Timer => "TIM",
        Bus => "BUS",
        Tlink => "TLIN",
        Stest => "STES",
        Pstest => "PST",
        Nstest => "NST",
        Manual => "MAN",
    }
}

impl Keithley6514Mode {
    pub fn unit(&self) -> Unit {
        match self {
            Keithley6514Mode::Voltage => VOLT,
            Keithley6514Mode::Current => AMPERE,
            Keithley6514Mode::Resistance => OHM,
            Keithley6514Mode::Charge => COULOMB,
        }
    }

    /// Upper range limits the meter accepts in this mode, in [`unit`](Self::unit).
    pub fn valid_ranges(&self) -> &'static [f64] {
        match self {
            Keithley6514Mode::Voltage => &[2.0, 20.0, 200.0],
            Keithley6514Mode::Current => &[
                20e-12, 200e-12, 2e-9, 20e-9, 200e-9, 2e-6, 20e-6, 200e-6, 2e-3, 20e-3,
            ],
            Keithley6514Mode::Resistance => &[2e3, 20e3, 200e3, 2e6, 20e6, 200e6, 2e9, 20e9, 200e9],
            Keithley6514Mode::Charge => &[20e-9, 200e-9, 2e-6, 20e-6],
        }
    }
}

fn unquote(reply: &str) -> String {
    reply.trim_matches('"').to_string()
}

fn quoted(command: &str, value: &str) -> String {
    format!("{command} \"{value}\"")
}

const MODE: EnumProperty<Keithley6514Mode> = EnumProperty::new("FUNCTION")
    .input_decoration(unquote)
    .set_fmt(SetFmt::Custom(quoted));
const TRIGGER_MODE: EnumProperty<Keithley6514TriggerMode> = EnumProperty::new("TRIGGER:SOURCE");
const ARM_SOURCE: EnumProperty<ArmSource> = EnumProperty::new("ARM:SOURCE");
const ZERO_CHECK: BoolProperty = BoolProperty::new("SYST:ZCH");
const ZERO_CORRECT: BoolProperty = BoolProperty::new("SYST:ZCOR");

/// Splits `reading,timestamp,status`.
fn parse_reading(reply: &str, unit: Unit) -> Result<Reading> {
    let fields = reply
        .split(',')
        .map(parse_float)
        .collect::<Result<Vec<_>>>()?;
    match fields.as_slice() {
        [value, timestamp, _status, ..] => Ok(Reading {
            value: Quantity::new(*value, unit),
            timestamp: *timestamp,
            trigger_count: None,
        }),
        _ => Err(InstrumentError::parse(reply, "expected reading,timestamp,status")),
    }
}

/// Keithley 6514.
pub struct Keithley6514 {
    inst: Instrument,
}

impl Keithley6514 {
    pub const MODEL: &'static str = "Keithley6514";

    pub async fn arm_source(&mut self) -> Result<ArmSource> {
        ARM_SOURCE.get(&mut self.inst).await
    }

    pub async fn set_arm_source(&mut self, source: ArmSource) -> Result<()> {
        ARM_SOURCE.set(&mut self.inst, source).await
    }

    pub async fn auto_range(&mut self) -> Result<bool> {
        let mode = self.mode().await?;
        let reply = self
            .inst
            .query(&format!("{}:RANGE:AUTO?", mode.mnemonic()))
            .await?;
        Ok(reply.trim() == "1")
    }

    pub async fn set_auto_range(&mut self, on: bool) -> Result<()> {
        let mode = self.mode().await?;
        let cmd = format!("{}:RANGE:AUTO {}", mode.mnemonic(), if on { "1" } else { "0" });
        self.inst.sendcmd(&cmd).await
    }

    /// Switches to `mode` and resets its controls to their defaults,
    /// leaving the meter idle with immediate trigger and arm.
    pub async fn auto_config(&mut self, mode: Keithley6514Mode) -> Result<()> {
        self.inst.sendcmd(&format!("CONF:{}", mode.mnemonic())).await
    }
}

#[async_trait]
impl OpenInstrument for Keithley6514 {
    async fn open(inst: Instrument) -> Result<Self> {
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for Keithley6514 {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        match path.simple() {
            Some("mode") => self.set_mode(value.as_enum()?).await,
            Some("trigger_mode") => self.set_trigger_mode(value.as_enum()?).await,
            Some("arm_source") => self.set_arm_source(value.as_enum()?).await,
            Some("zero_check") => self.set_zero_check(value.as_bool()?).await,
            Some("zero_correct") => self.set_zero_correct(value.as_bool()?).await,
            Some("auto_range") => self.set_auto_range(value.as_bool()?).await,
            Some("input_range") => {
                let unit = self.unit().await?;
                let range = value.as_magnitude()?.with_default_unit(unit);
                self.set_input_range(range).await
            }
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

impl ScpiInstrument for Keithley6514 {}

#[async_trait]
impl Electrometer for Keithley6514 {
    type Mode = Keithley6514Mode;
    type TriggerMode = Keithley6514TriggerMode;

    async fn mode(&mut self) -> Result<Keithley6514Mode> {
        MODE.get(&mut self.inst).await
    }

    async fn set_mode(&mut self, mode: Keithley6514Mode) -> Result<()> {
        MODE.set(&mut self.inst, mode).await
    }

    async fn unit(&mut self) -> Result<Unit> {
        Ok(self.mode().await?.unit())
    }

    async fn trigger_mode(&mut self) -> Result<Keithley6514TriggerMode> {
        TRIGGER_MODE.get(&mut self.inst).await
    }

    async fn set_trigger_mode(&mut self, mode: Keithley6514TriggerMode) -> Result<()> {
        TRIGGER_MODE.set(&mut self.inst, mode).await
    }

    /// Upper limit of the range in use.
    async fn input_range(&mut self) -> Result<Quantity> {
        let mode = self.mode().await?;
        let cmd = format!("{}:RANGE:UPPER?", mode.mnemonic());
        let value = self.inst.query_parse(&cmd, parse_float).await?;
        Ok(Quantity::new(value, mode.unit()))
    }

    /// Only the limits in [`Keithley6514Mode::valid_ranges`] are accepted.
    async fn set_input_range(&mut self, range: Quantity) -> Result<()> {
        let mode = self.mode().await?;
        let value = range.magnitude_in(mode.unit())?;
        let known = mode
            .valid_ranges()
            .iter()
            .any(|r| (r - value).abs() <= r.abs() * 1e-9);
        if !known {
            return Err(InstrumentError::InvalidValue(
                "Unexpected range limit for currently selected mode.".to_string(),
            ));
        }
        let cmd = format!("{}:RANGE:UPPER {}", mode.mnemonic(), format_sci(value));
        self.inst.sendcmd(&cmd).await
    }

    async fn zero_check(&mut self) -> Result<bool> {
        ZERO_CHECK.get(&mut self.inst).await
    }

    async fn set_zero_check(&mut self, on: bool) -> Result<()> {
        ZERO_CHECK.set(&mut self.inst, on).await
    }

    async fn zero_correct(&mut self) -> Result<bool> {
        ZERO_CORRECT.get(&mut self.inst).await
    }

    async fn set_zero_correct(&mut self, on: bool) -> Result<()> {
        ZERO_CORRECT.set(&mut self.inst, on).await
    }

    async fn fetch(&mut self) -> Result<Reading> {
        let unit = self.unit().await?;
        self.inst
            .query_parse("FETC?", |r| parse_reading(r, unit))
            .await
    }

    async fn read_measurements(&mut self) -> Result<Reading> {
        let unit = self.unit().await?;
        self.inst
            .query_parse("READ?", |r| parse_reading(r, unit))
            .await
    }
}
