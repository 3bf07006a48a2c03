//! Agilent 33220A 20 MHz function / arbitrary waveform generator.

use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::generic_scpi::{
    scpi_raw_amplitude, scpi_set_raw_amplitude, ScpiInstrument, FREQUENCY, OFFSET,
};
use crate::instrument::capabilities::{apply_function_generator_attr, FunctionGenerator, VoltageMode};
use crate::property::{
    format_float, parse_int, BoolProperty, EnumProperty, IntProperty, SetFmt, ValidSet,
};
use crate::units::{assume_units, Magnitude, Quantity, OHM};
use crate::Instrument;
use async_trait::async_trait;

crate::scpi_enum! {
    /// Output functions of the 33220A.
    pub enum Agilent33220aFunction {
        Sinusoid => "SIN",
        Square => "SQU",
        Ramp => "RAMP",
        Pulse => "PULS",
        Noise => "NOIS",
        Dc => "DC",
        User => "USER",
    }
}

crate::scpi_enum! {
    /// Polarity of the waveform relative to the offset voltage.
    pub enum OutputPolarity {
        Normal => "NORM",
        Inverted => "INV",
    }
}

/// Output termination the generator compensates for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadResistance {
    Value(Quantity),
    Minimum,
    Maximum,
    HighImpedance,
}

impl LoadResistance {
    fn parse(reply: &str) -> Result<Self> {
        let reply = reply.trim();
        match reply {
            "MIN" => Ok(LoadResistance::Minimum),
            "MAX" => Ok(LoadResistance::Maximum),
            "INF" => Ok(LoadResistance::HighImpedance),
            other => parse_int(other).map(|v| LoadResistance::Value(Quantity::new(v as f64, OHM))),
        }
    }
}

fn colon_join(command: &str, value: &str) -> String {
    format!("{command}:{value}")
}

const FUNCTION: EnumProperty<Agilent33220aFunction> =
    EnumProperty::new("FUNC").set_fmt(SetFmt::Custom(colon_join));
const DUTY_CYCLE: IntProperty = IntProperty::new("FUNC:SQU:DCYC").valid(ValidSet::Range(0, 100));
const RAMP_SYMMETRY: IntProperty =
    IntProperty::new("FUNC:RAMP:SYMM").valid(ValidSet::Range(0, 100));
const OUTPUT: BoolProperty = BoolProperty::new("OUTP");
const OUTPUT_SYNC: BoolProperty = BoolProperty::new("OUTP:SYNC");
const OUTPUT_POLARITY: EnumProperty<OutputPolarity> = EnumProperty::new("OUTP:POL");

/// Agilent/Keysight 33220A. Also covers the older 33120A command set.
pub struct Agilent33220a {
    inst: Instrument,
}

impl Agilent33220a {
    pub const MODEL: &'static str = "Agilent33220a";

    /// Square wave duty cycle in percent.
    pub async fn duty_cycle(&mut self) -> Result<i64> {
        DUTY_CYCLE.get(&mut self.inst).await
    }

    pub async fn set_duty_cycle(&mut self, percent: i64) -> Result<()> {
        DUTY_CYCLE.set(&mut self.inst, percent).await
    }

    /// Percentage of each ramp period spent rising.
    pub async fn ramp_symmetry(&mut self) -> Result<i64> {
        RAMP_SYMMETRY.get(&mut self.inst).await
    }

    pub async fn set_ramp_symmetry(&mut self, percent: i64) -> Result<()> {
        RAMP_SYMMETRY.set(&mut self.inst, percent).await
    }

    pub async fn output(&mut self) -> Result<bool> {
        OUTPUT.get(&mut self.inst).await
    }

    pub async fn set_output(&mut self, on: bool) -> Result<()> {
        OUTPUT.set(&mut self.inst, on).await
    }

    /// Front panel sync connector.
    pub async fn output_sync(&mut self) -> Result<bool> {
        OUTPUT_SYNC.get(&mut self.inst).await
    }

    pub async fn set_output_sync(&mut self, on: bool) -> Result<()> {
        OUTPUT_SYNC.set(&mut self.inst, on).await
    }

    pub async fn output_polarity(&mut self) -> Result<OutputPolarity> {
        OUTPUT_POLARITY.get(&mut self.inst).await
    }

    pub async fn set_output_polarity(&mut self, polarity: OutputPolarity) -> Result<()> {
        OUTPUT_POLARITY.set(&mut self.inst, polarity).await
    }

    /// Load the output is terminated into. The generator has a fixed 50 Ω
    /// series impedance and scales its reported voltages by this value.
    pub async fn load_resistance(&mut self) -> Result<LoadResistance> {
        self.inst
            .query_parse("OUTP:LOAD?", LoadResistance::parse)
            .await
    }

    /// Accepts 0 to 10 kΩ, or one of the presets.
    pub async fn set_load_resistance(&mut self, load: LoadResistance) -> Result<()> {
        let arg = match load {
            LoadResistance::Minimum => "MIN".to_string(),
            LoadResistance::Maximum => "MAX".to_string(),
            LoadResistance::HighImpedance => "INF".to_string(),
            LoadResistance::Value(q) => {
                let ohms = q.magnitude_in(OHM)?;
                if !(0.0..=10_000.0).contains(&ohms) {
                    return Err(InstrumentError::OutOfRange(
                        "Load resistance must be between 0 and 10,000".to_string(),
                    ));
                }
                format_float(ohms)
            }
        };
        self.inst.sendcmd(&format!("OUTP:LOAD {arg}")).await
    }
}

fn load_resistance_attr(value: &AttrValue) -> Result<LoadResistance> {
    match value {
        AttrValue::Str(s) => match s.to_ascii_uppercase().as_str() {
            "MIN" | "MINIMUM" => Ok(LoadResistance::Minimum),
            "MAX" | "MAXIMUM" => Ok(LoadResistance::Maximum),
            "INF" | "HIGH_IMPEDANCE" => Ok(LoadResistance::HighImpedance),
            _ => Err(InstrumentError::InvalidValue(format!("unknown load resistance '{s}'"))),
        },
        other => {
            let ohms = assume_units(other.as_magnitude()?, OHM)?;
            Ok(LoadResistance::Value(Quantity::new(ohms, OHM)))
        }
    }
}

#[async_trait]
impl OpenInstrument for Agilent33220a {
    async fn open(inst: Instrument) -> Result<Self> {
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for Agilent33220a {
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
        match path.simple() {
            Some("duty_cycle") => self.set_duty_cycle(value.as_i64()?).await,
            Some("ramp_symmetry") => self.set_ramp_symmetry(value.as_i64()?).await,
            Some("output") => self.set_output(value.as_bool()?).await,
            Some("output_sync") => self.set_output_sync(value.as_bool()?).await,
            Some("output_polarity") => self.set_output_polarity(value.as_enum()?).await,
            Some("load_resistance") => {
                self.set_load_resistance(load_resistance_attr(value)?).await
            }
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

impl ScpiInstrument for Agilent33220a {}

#[async_trait]
impl FunctionGenerator for Agilent33220a {
    type Function = Agilent33220aFunction;

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

    async fn function(&mut self) -> Result<Agilent33220aFunction> {
        FUNCTION.get(&mut self.inst).await
    }

    async fn set_function(&mut self, function: Agilent33220aFunction) -> Result<()> {
        FUNCTION.set(&mut self.inst, function).await
    }

    async fn offset(&mut self) -> Result<Quantity> {
        OFFSET.get(&mut self.inst).await
    }

    async fn set_offset(&mut self, offset: Magnitude) -> Result<()> {
        OFFSET.set(&mut self.inst, offset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::capabilities::Amplitude;
    use crate::testing::{expected_protocol, ProtocolCheck};
    use crate::units::{HERTZ, VOLT};

    async fn fg(host: &[&str], ins: &[&str]) -> (Agilent33220a, ProtocolCheck) {
        let (inst, check) = expected_protocol(host, ins, "\n");
        (Agilent33220a::open(inst).await.unwrap(), check)
    }

    #[tokio::test]
    async fn test_amplitude() {
        let (mut fg, check) = fg(
            &["VOLT:UNIT?", "VOLT?", "VOLT:UNIT VPP", "VOLT 2.0", "VOLT:UNIT DBM", "VOLT 1.5"],
            &["VPP", "+1.000000E+00"],
        )
        .await;
        assert_eq!(
            fg.amplitude().await.unwrap(),
            Amplitude::Voltage(1.0 * VOLT, VoltageMode::PeakToPeak)
        );
        fg.set_amplitude(Amplitude::from(2.0 * VOLT)).await.unwrap();
        fg.set_amplitude(Amplitude::from((1.5 * VOLT, VoltageMode::Dbm)))
            .await
            .unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_function_uses_colon_setter() {
        let (mut fg, check) = fg(&["FUNC?", "FUNC:SQU"], &["SIN"]).await;
        assert_eq!(fg.function().await.unwrap(), Agilent33220aFunction::Sinusoid);
        fg.set_function(Agilent33220aFunction::Square).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_frequency_and_offset() {
        let (mut fg, check) = fg(
            &["FREQ?", "FREQ 1.005000e+02", "VOLT:OFFS?", "VOLT:OFFS 4.321000e-01"],
            &["+1.234000E+03", "+1.234000E+01"],
        )
        .await;
        assert_eq!(fg.frequency().await.unwrap(), 1234.0 * HERTZ);
        fg.set_frequency(Magnitude::from(100.5 * HERTZ)).await.unwrap();
        assert_eq!(fg.offset().await.unwrap(), 12.34 * VOLT);
        fg.set_offset(Magnitude::from(0.4321 * VOLT)).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_duty_cycle_and_ramp_symmetry() {
        let (mut fg, check) = fg(
            &["FUNC:SQU:DCYC?", "FUNC:SQU:DCYC 75", "FUNC:RAMP:SYMM?", "FUNC:RAMP:SYMM 75"],
            &["53", "53"],
        )
        .await;
        assert_eq!(fg.duty_cycle().await.unwrap(), 53);
        fg.set_duty_cycle(75).await.unwrap();
        assert_eq!(fg.ramp_symmetry().await.unwrap(), 53);
        fg.set_ramp_symmetry(75).await.unwrap();
        assert!(fg.set_duty_cycle(101).await.is_err());
        check.assert_done();
    }

    #[tokio::test]
    async fn test_outputs() {
        let (mut fg, check) = fg(
            &["OUTP?", "OUTP OFF", "OUTP:SYNC?", "OUTP:SYNC OFF", "OUTP:POL?", "OUTP:POL NORM"],
            &["ON", "ON", "INV"],
        )
        .await;
        assert!(fg.output().await.unwrap());
        fg.set_output(false).await.unwrap();
        assert!(fg.output_sync().await.unwrap());
        fg.set_output_sync(false).await.unwrap();
        assert_eq!(fg.output_polarity().await.unwrap(), OutputPolarity::Inverted);
        fg.set_output_polarity(OutputPolarity::Normal).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_load_resistance() {
        let (mut fg, check) = fg(
            &["OUTP:LOAD?", "OUTP:LOAD?", "OUTP:LOAD 100.0", "OUTP:LOAD MAX"],
            &["50", "INF"],
        )
        .await;
        assert_eq!(
            fg.load_resistance().await.unwrap(),
            LoadResistance::Value(50.0 * OHM)
        );
        assert_eq!(fg.load_resistance().await.unwrap(), LoadResistance::HighImpedance);
        fg.set_load_resistance(LoadResistance::Value(100.0 * OHM))
            .await
            .unwrap();
        fg.set_load_resistance(LoadResistance::Maximum).await.unwrap();
        let err = fg
            .set_load_resistance(LoadResistance::Value(20_000.0 * OHM))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Load resistance must be between 0 and 10,000");
        check.assert_done();
    }

    #[tokio::test]
    async fn test_phase_not_supported() {
        let (mut fg, check) = fg(&[], &[]).await;
        assert!(matches!(fg.phase().await, Err(InstrumentError::NotSupported(_))));
        check.assert_done();
    }

    #[tokio::test]
    async fn test_attrs() {
        let (mut fg, check) = fg(&["FUNC:RAMP", "OUTP ON", "OUTP:LOAD INF"], &[]).await;
        fg.apply_attr(&AttrPath::parse("function").unwrap(), &AttrValue::Str("ramp".into()))
            .await
            .unwrap();
        fg.apply_attr(&AttrPath::parse("output").unwrap(), &AttrValue::Bool(true))
            .await
            .unwrap();
        fg.apply_attr(
            &AttrPath::parse("load_resistance").unwrap(),
            &AttrValue::Str("inf".into()),
        )
        .await
        .unwrap();
        check.assert_done();
    }
}
