//! SCPI `CONFigure`/`MEASure` multimeter subsystem.

use super::ScpiInstrument;
use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::instrument::capabilities::{InputRange, Multimeter};
use crate::property::{
    format_general, parse_float, parse_int, EnumProperty, ScpiEnum, SetFmt, UnitfulProperty,
};
use crate::units::{
    Quantity, Unit, AMPERE, DIMENSIONLESS, FARAD, HERTZ, KELVIN, OHM, SECOND, VOLT,
};
use crate::Instrument;
use async_trait::async_trait;

crate::scpi_enum! {
    /// Measurement functions common to SCPI multimeters.
    pub enum MultimeterMode {
        Capacitance => "CAP",
        Continuity => "CONT",
        CurrentAc => "CURR:AC",
        CurrentDc => "CURR:DC",
        Diode => "DIOD",
        Frequency => "FREQ",
        FourptResistance => "FRES",
        Period => "PER",
        Resistance => "RES",
        Temperature => "TEMP",
        VoltageAc => "VOLT:AC",
        VoltageDc => "VOLT:DC",
    }
}

impl MultimeterMode {
    /// Unit of readings taken in this mode.
    pub fn unit(&self) -> Unit {
        match self {
            MultimeterMode::Capacitance => FARAD,
            MultimeterMode::VoltageAc | MultimeterMode::VoltageDc | MultimeterMode::Diode => VOLT,
            MultimeterMode::CurrentAc | MultimeterMode::CurrentDc => AMPERE,
            MultimeterMode::Resistance | MultimeterMode::FourptResistance => OHM,
            MultimeterMode::Frequency => HERTZ,
            MultimeterMode::Period => SECOND,
            MultimeterMode::Temperature => KELVIN,
            MultimeterMode::Continuity => DIMENSIONLESS,
        }
    }
}

crate::scpi_enum! {
    /// Trigger sources.
    pub enum TriggerMode {
        Immediate => "IMM",
        External => "EXT",
        Bus => "BUS",
    }
}

crate::scpi_enum! {
    /// Timing of successive samples within one trigger.
    pub enum SampleSource {
        Immediate => "IMM",
        Timer => "TIM",
    }
}

/// Measurement resolution: a value in the mode's unit or a preset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    Min,
    Max,
    Default,
    Value(f64),
}

impl Resolution {
    fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "MIN" => Ok(Resolution::Min),
            "MAX" => Ok(Resolution::Max),
            "DEF" => Ok(Resolution::Default),
            other => parse_float(other).map(Resolution::Value),
        }
    }

    fn to_arg(self) -> String {
        match self {
            Resolution::Min => "MIN".to_string(),
            Resolution::Max => "MAX".to_string(),
            Resolution::Default => "DEF".to_string(),
            Resolution::Value(v) => format_general(v),
        }
    }
}

/// Number of triggers accepted before returning to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCount {
    Min,
    Max,
    Default,
    Infinity,
    Count(i64),
}

impl TriggerCount {
    fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "MIN" => Ok(TriggerCount::Min),
            "MAX" => Ok(TriggerCount::Max),
            "DEF" => Ok(TriggerCount::Default),
            "INF" => Ok(TriggerCount::Infinity),
            other => parse_int(other).map(TriggerCount::Count),
        }
    }

    fn to_arg(self) -> String {
        match self {
            TriggerCount::Min => "MIN".to_string(),
            TriggerCount::Max => "MAX".to_string(),
            TriggerCount::Default => "DEF".to_string(),
            TriggerCount::Infinity => "INF".to_string(),
            TriggerCount::Count(n) => n.to_string(),
        }
    }
}

/// Number of samples taken per trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleCount {
    Min,
    Max,
    Default,
    Count(i64),
}

impl SampleCount {
    fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "MIN" => Ok(SampleCount::Min),
            "MAX" => Ok(SampleCount::Max),
            "DEF" => Ok(SampleCount::Default),
            other => parse_int(other).map(SampleCount::Count),
        }
    }

    fn to_arg(self) -> String {
        match self {
            SampleCount::Min => "MIN".to_string(),
            SampleCount::Max => "MAX".to_string(),
            SampleCount::Default => "DEF".to_string(),
            SampleCount::Count(n) => n.to_string(),
        }
    }
}

/// `"VOLT +1.0E+01,+3.0E-06"` -> `"VOLT:DC"`.
fn mode_token(reply: &str) -> String {
    let token = reply.split(' ').next().unwrap_or_default();
    if token == "VOLT" {
        "VOLT:DC".to_string()
    } else {
        token.to_string()
    }
}

fn colon_join(command: &str, value: &str) -> String {
    format!("{command}:{value}")
}

const MODE: EnumProperty<MultimeterMode> = EnumProperty::new("CONF")
    .input_decoration(mode_token)
    .set_fmt(SetFmt::Custom(colon_join));
const TRIGGER_MODE: EnumProperty<TriggerMode> = EnumProperty::new("TRIG:SOUR");
const SAMPLE_SOURCE: EnumProperty<SampleSource> = EnumProperty::new("SAMP:SOUR");
const TRIGGER_DELAY: UnitfulProperty = UnitfulProperty::new("TRIG:DEL", SECOND);
const SAMPLE_TIMER: UnitfulProperty = UnitfulProperty::new("SAMP:TIM", SECOND);

/// A parsed `CONF?` reply: mode, range field and resolution field.
struct Conf {
    mode: MultimeterMode,
    range: String,
    resolution: String,
}

impl Conf {
    fn parse(reply: &str) -> Result<Self> {
        let mode = MultimeterMode::parse_mnemonic(&mode_token(reply.trim()))?;
        let settings = reply
            .trim()
            .split_once(' ')
            .map(|(_, rest)| rest)
            .ok_or_else(|| InstrumentError::parse(reply, "missing range and resolution"))?;
        let mut fields = settings.split(',');
        let range = fields.next().unwrap_or_default().trim().to_string();
        let resolution = fields
            .next()
            .ok_or_else(|| InstrumentError::parse(reply, "missing resolution"))?
            .trim()
            .to_string();
        Ok(Self {
            mode,
            range,
            resolution,
        })
    }
}

async fn query_conf(inst: &mut Instrument) -> Result<Conf> {
    inst.query_parse("CONF?", Conf::parse).await
}

/// Current measurement mode, from `CONF?`.
pub async fn conf_mode(inst: &mut Instrument) -> Result<MultimeterMode> {
    MODE.get(inst).await
}

pub async fn set_conf_mode(inst: &mut Instrument, mode: MultimeterMode) -> Result<()> {
    MODE.set(inst, mode).await
}

/// Input range of the current mode.
pub async fn conf_input_range(inst: &mut Instrument) -> Result<InputRange> {
    inst.query_parse("CONF?", |reply| {
        let conf = Conf::parse(reply)?;
        InputRange::parse(&conf.range, conf.mode.unit())
    })
    .await
}

pub async fn set_conf_input_range(inst: &mut Instrument, range: InputRange) -> Result<()> {
    let mode = conf_mode(inst).await?;
    let value = match range {
        InputRange::Auto => "AUTO".to_string(),
        InputRange::Min => "MIN".to_string(),
        InputRange::Max => "MAX".to_string(),
        InputRange::Default => "DEF".to_string(),
        InputRange::Value(q) => format_general(q.magnitude_in(mode.unit())?),
    };
    inst.sendcmd(&format!("CONF:{} {}", mode.mnemonic(), value))
        .await
}

/// Trigger source, from `TRIG:SOUR?`.
pub async fn trigger_source(inst: &mut Instrument) -> Result<TriggerMode> {
    TRIGGER_MODE.get(inst).await
}

pub async fn set_trigger_source(inst: &mut Instrument, mode: TriggerMode) -> Result<()> {
    TRIGGER_MODE.set(inst, mode).await
}

/// One-shot measurement with default parameters in `mode`.
pub async fn measure_mode(inst: &mut Instrument, mode: MultimeterMode) -> Result<Quantity> {
    let cmd = format!("MEAS:{}?", mode.mnemonic());
    let value = inst.query_parse(&cmd, parse_float).await?;
    Ok(Quantity::new(value, mode.unit()))
}

/// Trigger, sample and resolution settings of SCPI multimeters.
///
/// Implementors also implement [`Multimeter`] through the `conf_*`
/// helpers of this module.
#[async_trait]
pub trait ScpiMultimeterExt: ScpiInstrument {
    async fn resolution(&mut self) -> Result<Resolution> {
        let conf = query_conf(self.instrument()).await?;
        Resolution::parse(&conf.resolution)
    }

    /// Keeps the current range and writes `CONF:<mode> <range>,<resolution>`.
    async fn set_resolution(&mut self, resolution: Resolution) -> Result<()> {
        let conf = query_conf(self.instrument()).await?;
        let cmd = format!(
            "CONF:{} {},{}",
            conf.mode.mnemonic(),
            conf.range,
            resolution.to_arg()
        );
        self.instrument().sendcmd(&cmd).await
    }

    async fn trigger_count(&mut self) -> Result<TriggerCount> {
        self.instrument()
            .query_parse("TRIG:COUN?", TriggerCount::parse)
            .await
    }

    async fn set_trigger_count(&mut self, count: TriggerCount) -> Result<()> {
        let cmd = format!("TRIG:COUN {}", count.to_arg());
        self.instrument().sendcmd(&cmd).await
    }

    async fn sample_count(&mut self) -> Result<SampleCount> {
        self.instrument()
            .query_parse("SAMP:COUN?", SampleCount::parse)
            .await
    }

    async fn set_sample_count(&mut self, count: SampleCount) -> Result<()> {
        let cmd = format!("SAMP:COUN {}", count.to_arg());
        self.instrument().sendcmd(&cmd).await
    }

    async fn trigger_delay(&mut self) -> Result<Quantity> {
        TRIGGER_DELAY.get(self.instrument()).await
    }

    async fn set_trigger_delay(&mut self, delay: crate::units::Magnitude) -> Result<()> {
        TRIGGER_DELAY.set(self.instrument(), delay).await
    }

    async fn sample_source(&mut self) -> Result<SampleSource> {
        SAMPLE_SOURCE.get(self.instrument()).await
    }

    async fn set_sample_source(&mut self, source: SampleSource) -> Result<()> {
        SAMPLE_SOURCE.set(self.instrument(), source).await
    }

    async fn sample_timer(&mut self) -> Result<Quantity> {
        SAMPLE_TIMER.get(self.instrument()).await
    }

    async fn set_sample_timer(&mut self, interval: crate::units::Magnitude) -> Result<()> {
        SAMPLE_TIMER.set(self.instrument(), interval).await
    }
}

fn input_range_attr(value: &AttrValue, unit: Unit) -> Result<InputRange> {
    match value {
        AttrValue::Str(s) => InputRange::parse(s, unit),
        other => Ok(InputRange::Value(
            other.as_magnitude()?.with_default_unit(unit),
        )),
    }
}

/// Attributes shared by SCPI multimeter drivers.
pub(crate) async fn apply_multimeter_attr<D>(
    dev: &mut D,
    path: &AttrPath,
    value: &AttrValue,
) -> Result<()>
where
    D: ScpiMultimeterExt + Multimeter<Mode = MultimeterMode, TriggerMode = TriggerMode>,
{
    match path.simple() {
        Some("mode") => dev.set_mode(value.as_enum()?).await,
        Some("trigger_mode") => dev.set_trigger_mode(value.as_enum()?).await,
        Some("sample_source") => dev.set_sample_source(value.as_enum()?).await,
        Some("trigger_delay") => dev.set_trigger_delay(value.as_magnitude()?).await,
        Some("sample_timer") => dev.set_sample_timer(value.as_magnitude()?).await,
        Some("trigger_count") => {
            let count = match value {
                AttrValue::Str(s) => TriggerCount::parse(&s.to_ascii_uppercase())?,
                other => TriggerCount::Count(other.as_i64()?),
            };
            dev.set_trigger_count(count).await
        }
        Some("sample_count") => {
            let count = match value {
                AttrValue::Str(s) => SampleCount::parse(&s.to_ascii_uppercase())?,
                other => SampleCount::Count(other.as_i64()?),
            };
            dev.set_sample_count(count).await
        }
        Some("input_range") => {
            let mode = dev.mode().await?;
            let range = input_range_attr(value, mode.unit())?;
            dev.set_input_range(range).await
        }
        _ => apply_base_attr(dev.instrument(), path, value).await,
    }
}

/// A generic SCPI multimeter.
pub struct ScpiMultimeter {
    inst: Instrument,
}

impl ScpiMultimeter {
    pub const MODEL: &'static str = "ScpiMultimeter";
}

#[async_trait]
impl OpenInstrument for ScpiMultimeter {
    async fn open(inst: Instrument) -> Result<Self> {
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for ScpiMultimeter {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        apply_multimeter_attr(self, path, value).await
    }
}

impl ScpiInstrument for ScpiMultimeter {}

impl ScpiMultimeterExt for ScpiMultimeter {}

#[async_trait]
impl Multimeter for ScpiMultimeter {
    type Mode = MultimeterMode;
    type TriggerMode = TriggerMode;

    async fn mode(&mut self) -> Result<MultimeterMode> {
        conf_mode(&mut self.inst).await
    }

    async fn set_mode(&mut self, mode: MultimeterMode) -> Result<()> {
        set_conf_mode(&mut self.inst, mode).await
    }

    async fn trigger_mode(&mut self) -> Result<TriggerMode> {
        trigger_source(&mut self.inst).await
    }

    async fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<()> {
        set_trigger_source(&mut self.inst, mode).await
    }

    async fn input_range(&mut self) -> Result<InputRange> {
        conf_input_range(&mut self.inst).await
    }

    async fn set_input_range(&mut self, range: InputRange) -> Result<()> {
        set_conf_input_range(&mut self.inst, range).await
    }

    async fn measure(&mut self, mode: Option<MultimeterMode>) -> Result<Quantity> {
        let mode = match mode {
            Some(mode) => mode,
            None => conf_mode(&mut self.inst).await?,
        };
        measure_mode(&mut self.inst, mode).await
    }
}
