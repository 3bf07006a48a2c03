//! Instrument families.
//!
//! Drivers of the same kind of device implement a shared trait so that
//! generic code can set a frequency or read a voltage without knowing the
//! model. Channel-based devices implement the trait on their channel
//! handles. Operations a model cannot perform return
//! [`InstrumentError::NotSupported`].

use crate::driver::{AttrPath, AttrValue};
use crate::error::{InstrumentError, Result};
use crate::property::ScpiEnum;
use crate::units::{Dimension, Magnitude, Quantity, Unit, DBM, VOLT};
use async_trait::async_trait;

crate::scpi_enum! {
    /// How a function generator amplitude is expressed.
    pub enum VoltageMode {
        PeakToPeak => "VPP",
        Rms => "VRMS",
        Dbm => "DBM",
    }
}

/// An output amplitude: a voltage with its mode, or a power in dBm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Amplitude {
    Voltage(Quantity, VoltageMode),
    Dbm(Quantity),
}

impl From<Quantity> for Amplitude {
    /// Log-power quantities become [`Amplitude::Dbm`]; anything else is
    /// taken as a peak-to-peak voltage.
    fn from(q: Quantity) -> Self {
        if q.unit().dimension() == Dimension::LogPower {
            Amplitude::Dbm(q)
        } else {
            Amplitude::Voltage(q, VoltageMode::PeakToPeak)
        }
    }
}

impl From<f64> for Amplitude {
    fn from(v: f64) -> Self {
        Amplitude::Voltage(Quantity::new(v, VOLT), VoltageMode::PeakToPeak)
    }
}

impl From<(Quantity, VoltageMode)> for Amplitude {
    fn from((q, mode): (Quantity, VoltageMode)) -> Self {
        Amplitude::Voltage(q, mode)
    }
}

pub(crate) fn not_supported<T>(what: &str) -> Result<T> {
    Err(InstrumentError::NotSupported(what.to_string()))
}

/// Signal and function generators.
#[async_trait]
pub trait FunctionGenerator: Send {
    /// Model-specific waveform shape.
    type Function: ScpiEnum;

    /// Amplitude magnitude and the mode it is expressed in.
    async fn raw_amplitude(&mut self) -> Result<(f64, VoltageMode)>;

    /// Writes a magnitude already converted to volts (or dBm).
    async fn set_raw_amplitude(&mut self, magnitude: f64, mode: VoltageMode) -> Result<()>;

    async fn amplitude(&mut self) -> Result<Amplitude> {
        let (mag, mode) = self.raw_amplitude().await?;
        Ok(match mode {
            VoltageMode::Dbm => Amplitude::Dbm(Quantity::new(mag, DBM)),
            mode => Amplitude::Voltage(Quantity::new(mag, VOLT), mode),
        })
    }

    async fn set_amplitude(&mut self, amplitude: Amplitude) -> Result<()> {
        match amplitude {
            Amplitude::Dbm(q) => {
                let mag = q.magnitude_in(DBM)?;
                self.set_raw_amplitude(mag, VoltageMode::Dbm).await
            }
            Amplitude::Voltage(q, mode) => {
                let mag = q.magnitude_in(VOLT)?;
                self.set_raw_amplitude(mag, mode).await
            }
        }
    }

    async fn frequency(&mut self) -> Result<Quantity>;

    async fn set_frequency(&mut self, frequency: Magnitude) -> Result<()>;

    async fn function(&mut self) -> Result<Self::Function>;

    async fn set_function(&mut self, function: Self::Function) -> Result<()>;

    async fn offset(&mut self) -> Result<Quantity>;

    async fn set_offset(&mut self, offset: Magnitude) -> Result<()>;

    async fn phase(&mut self) -> Result<Quantity> {
        not_supported("phase")
    }

    async fn set_phase(&mut self, _phase: Magnitude) -> Result<()> {
        not_supported("phase")
    }
}

fn amplitude_attr(value: &AttrValue) -> Result<Amplitude> {
    match value {
        AttrValue::Quantity(q) => Ok(Amplitude::from(*q)),
        AttrValue::List(items) => match items.as_slice() {
            [magnitude, mode] => {
                let q = magnitude.as_magnitude()?.with_default_unit(VOLT);
                Ok(Amplitude::Voltage(q, mode.as_enum()?))
            }
            _ => Err(InstrumentError::InvalidValue(
                "amplitude list must be [value, mode]".to_string(),
            )),
        },
        other => other.as_f64().map(Amplitude::from),
    }
}

/// Applies the `frequency`, `amplitude`, `offset`, `phase` and `function`
/// attributes. Returns `false` for any other path.
pub async fn apply_function_generator_attr<G: FunctionGenerator>(
    generator: &mut G,
    path: &AttrPath,
    value: &AttrValue,
) -> Result<bool> {
    match path.simple() {
        Some("frequency") => generator.set_frequency(value.as_magnitude()?).await?,
        Some("offset") => generator.set_offset(value.as_magnitude()?).await?,
        Some("phase") => generator.set_phase(value.as_magnitude()?).await?,
        Some("amplitude") => generator.set_amplitude(amplitude_attr(value)?).await?,
        Some("function") => generator.set_function(value.as_enum()?).await?,
        _ => return Ok(false),
    }
    Ok(true)
}

/// Measurement range of a meter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputRange {
    Auto,
    Min,
    Max,
    Default,
    Value(Quantity),
}

impl InputRange {
    /// Parses `AUTO`/`MIN`/`MAX`/`DEF` or a number in `unit`.
    pub fn parse(s: &str, unit: Unit) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(InputRange::Auto),
            "MIN" | "MINIMUM" => Ok(InputRange::Min),
            "MAX" | "MAXIMUM" => Ok(InputRange::Max),
            "DEF" | "DEFAULT" => Ok(InputRange::Default),
            _ => Quantity::parse(s, unit).map(InputRange::Value),
        }
    }
}

/// Multimeters and other single-reading meters.
#[async_trait]
pub trait Multimeter: Send {
    type Mode: ScpiEnum;
    type TriggerMode: ScpiEnum;

    async fn mode(&mut self) -> Result<Self::Mode>;

    async fn set_mode(&mut self, mode: Self::Mode) -> Result<()>;

    async fn trigger_mode(&mut self) -> Result<Self::TriggerMode> {
        not_supported("trigger mode")
    }

    async fn set_trigger_mode(&mut self, _mode: Self::TriggerMode) -> Result<()> {
        not_supported("trigger mode")
    }

    async fn relative(&mut self) -> Result<bool> {
        not_supported("relative")
    }

    async fn set_relative(&mut self, _relative: bool) -> Result<()> {
        not_supported("relative")
    }

    async fn input_range(&mut self) -> Result<InputRange> {
        not_supported("input range")
    }

    async fn set_input_range(&mut self, _range: InputRange) -> Result<()> {
        not_supported("input range")
    }

    /// Takes a reading in `mode`, or in the current mode when `None`.
    async fn measure(&mut self, mode: Option<Self::Mode>) -> Result<Quantity>;
}

/// One output of a power supply.
#[async_trait]
pub trait PowerSupplyChannel: Send {
    /// Voltage set point.
    async fn voltage(&mut self) -> Result<Quantity>;

    async fn set_voltage(&mut self, voltage: Magnitude) -> Result<()>;

    /// Current limit.
    async fn current(&mut self) -> Result<Quantity>;

    async fn set_current(&mut self, current: Magnitude) -> Result<()>;

    async fn output(&mut self) -> Result<bool>;

    async fn set_output(&mut self, on: bool) -> Result<()>;

    async fn mode(&mut self) -> Result<String> {
        not_supported("power supply mode")
    }
}

/// Multi-output supplies addressed as a whole.
#[async_trait]
pub trait PowerSupply: Send {
    fn channel_count(&self) -> usize;

    /// Voltage set points of all channels.
    async fn voltage(&mut self) -> Result<Vec<Quantity>>;

    /// One value sets every channel; otherwise one value per channel.
    async fn set_voltage(&mut self, values: &[Magnitude]) -> Result<()>;

    async fn current(&mut self) -> Result<Vec<Quantity>>;

    async fn set_current(&mut self, values: &[Magnitude]) -> Result<()>;
}

/// Samples from an oscilloscope source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Waveform {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// A channel, reference or math trace that can be read out.
#[async_trait]
pub trait DataSource: Send {
    fn name(&self) -> String;

    /// Reads the trace, as binary when `bin` is set, otherwise as ASCII.
    async fn read_waveform(&mut self, bin: bool) -> Result<Waveform>;
}

#[async_trait]
pub trait Oscilloscope: Send {
    async fn force_trigger(&mut self) -> Result<()> {
        not_supported("force trigger")
    }
}

/// A timestamped reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: Quantity,
    /// Seconds since the meter's timestamp was last reset.
    pub timestamp: f64,
    /// Readings taken since the trigger model last armed, on meters that
    /// report it.
    pub trigger_count: Option<i64>,
}

/// Electrometers and picoammeters.
#[async_trait]
pub trait Electrometer: Send {
    type Mode: ScpiEnum;
    type TriggerMode: ScpiEnum;

    async fn mode(&mut self) -> Result<Self::Mode>;

    async fn set_mode(&mut self, mode: Self::Mode) -> Result<()>;

    /// Unit of readings in the current mode.
    async fn unit(&mut self) -> Result<Unit>;

    async fn trigger_mode(&mut self) -> Result<Self::TriggerMode>;

    async fn set_trigger_mode(&mut self, mode: Self::TriggerMode) -> Result<()>;

    async fn input_range(&mut self) -> Result<Quantity>;

    async fn set_input_range(&mut self, range: Quantity) -> Result<()>;

    async fn zero_check(&mut self) -> Result<bool>;

    async fn set_zero_check(&mut self, on: bool) -> Result<()>;

    async fn zero_correct(&mut self) -> Result<bool>;

    async fn set_zero_correct(&mut self, on: bool) -> Result<()>;

    /// Latest reading, without triggering.
    async fn fetch(&mut self) -> Result<Reading>;

    /// Triggers and returns a reading.
    async fn read_measurements(&mut self) -> Result<Reading>;
}
