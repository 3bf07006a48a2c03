//! Keithley 6517B electrometer.
//!
//! Readings are tagged with their units and status:
//! `1.0N,1234s,5678R00000` is a value, a timestamp in seconds and a
//! reading number followed by five status characters.

use super::keithley6514::ArmSource;
use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::generic_scpi::ScpiInstrument;
use crate::instrument::capabilities::{Electrometer, Reading};
use crate::property::{format_sci, parse_float, parse_int, BoolProperty, EnumProperty, ScpiEnum, SetFmt};
use crate::units::{Quantity, Unit, AMPERE, COULOMB, OHM, VOLT};
use crate::Instrument;
use async_trait::async_trait;

crate::scpi_enum! {
    pub enum Keithley6517bMode {
        VoltageDc => "VOLT:DC",
        CurrentDc => "CURR:DC",
        Resistance => "RES",
        Charge => "CHAR",
    }
}

crate::scpi_enum! {
    pub enum Keithley6517bTriggerMode {
        Immediate => "IMM",
        Tlink => "TLINK",
    }
}

impl Keithley6517bMode {
    pub fn unit(&self) -> Unit {
        match self {
            Keithley6517bMode::VoltageDc => VOLT,
            Keithley6517bMode::CurrentDc => AMPERE,
            Keithley6517bMode::Resistance => OHM,
            Keithley6517bMode::Charge => COULOMB,
        }
    }

    pub fn valid_ranges(&self) -> &'static [f64] {
        match self {
            Keithley6517bMode::VoltageDc => &[2.0, 20.0, 200.0],
            Keithley6517bMode::CurrentDc => &[
                20e-12, 200e-12, 2e-9, 20e-9, 200e-9, 2e-6, 20e-6, 200e-6, 2e-3, 20e-3,
            ],
            Keithley6517bMode::Resistance => {
                &[2e6, 20e6, 200e6, 2e9, 20e9, 200e9, 2e12, 20e12, 200e12]
            }
            Keithley6517bMode::Charge => &[2e-9, 20e-9, 200e-9, 2e-6],
        }
    }
}

fn unquote(reply: &str) -> String {
    reply.trim_matches('"').to_string()
}

fn quoted(command: &str, value: &str) -> String {
    format!("{command} \"{value}\"")
}

const MODE: EnumProperty<Keithley6517bMode> = EnumProperty::new("FUNCTION")
    .input_decoration(unquote)
    .set_fmt(SetFmt::Custom(quoted));
const TRIGGER_MODE: EnumProperty<Keithley6517bTriggerMode> = EnumProperty::new("TRIGGER:SOURCE");
const ARM_SOURCE: EnumProperty<ArmSource> = EnumProperty::new("ARM:SOURCE");
const ZERO_CHECK: BoolProperty = BoolProperty::new("SYST:ZCH");
const ZERO_CORRECT: BoolProperty = BoolProperty::new("SYST:ZCOR");

fn before(field: &str, tag: char) -> &str {
    field.split(tag).next().unwrap_or(field)
}

fn parse_reading(reply: &str, unit: Unit) -> Result<Reading> {
    let fields: Vec<&str> = reply.trim().split(',').collect();
    let [value, timestamp, count, ..] = fields.as_slice() else {
        return Err(InstrumentError::parse(reply, "expected reading,timestamp,reading number"));
    };
    let count = count
        .len()
        .checked_sub(5)
        .and_then(|end| count.get(..end))
        .ok_or_else(|| InstrumentError::parse(reply, "reading number lacks status flags"))?;
    Ok(Reading {
        value: Quantity::new(parse_float(before(value, 'N'))?, unit),
        timestamp: parse_float(before(timestamp, 's'))?,
        trigger_count: Some(parse_int(before(count, 'R'))?),
    })
}

/// Keithley 6517B.
pub struct Keithley6517b {
    inst: Instrument,
}

impl Keithley6517b {
    pub const MODEL: &'static str = "Keithley6517b";

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

    /// Switches to `mode` with its controls at defaults and trigger and
    /// arm set to immediate.
    pub async fn auto_config(&mut self, mode: Keithley6517bMode) -> Result<()> {
        self.inst.sendcmd(&format!("CONF:{}", mode.mnemonic())).await
    }

    /// Reads in `mode`, reconfiguring first only when the meter is in
    /// another mode.
    pub async fn measure(&mut self, mode: Option<Keithley6517bMode>) -> Result<Quantity> {
        if let Some(mode) = mode {
            if self.mode().await? != mode {
                self.auto_config(mode).await?;
            }
        }
        Ok(self.read_measurements().await?.value)
    }

    async fn query_reading(&mut self, cmd: &str) -> Result<Reading> {
        let reply = self.inst.query(cmd).await?;
        let unit = self.unit().await?;
        parse_reading(&reply, unit)
    }
}

#[async_trait]
impl OpenInstrument for Keithley6517b {
    /// Auto-configures the meter in whatever mode it is already in.
    async fn open(inst: Instrument) -> Result<Self> {
        let mut meter = Self { inst };
        let mode = meter.mode().await?;
        meter.auto_config(mode).await?;
        Ok(meter)
    }
}

#[async_trait]
impl Driver for Keithley6517b {
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

impl ScpiInstrument for Keithley6517b {}

#[async_trait]
impl Electrometer for Keithley6517b {
    type Mode = Keithley6517bMode;
    type TriggerMode = Keithley6517bTriggerMode;

    async fn mode(&mut self) -> Result<Keithley6517bMode> {
        MODE.get(&mut self.inst).await
    }

    async fn set_mode(&mut self, mode: Keithley6517bMode) -> Result<()> {
        MODE.set(&mut self.inst, mode).await
    }

    async fn unit(&mut self) -> Result<Unit> {
        Ok(self.mode().await?.unit())
    }

    async fn trigger_mode(&mut self) -> Result<Keithley6517bTriggerMode> {
        TRIGGER_MODE.get(&mut self.inst).await
    }

    async fn set_trigger_mode(&mut self, mode: Keithley6517bTriggerMode) -> Result<()> {
        TRIGGER_MODE.set(&mut self.inst, mode).await
    }

    async fn input_range(&mut self) -> Result<Quantity> {
        let mode = self.mode().await?;
        let cmd = format!("{}:RANGE:UPPER?", mode.mnemonic());
        let value = self.inst.query_parse(&cmd, parse_float).await?;
        Ok(Quantity::new(value, mode.unit()))
    }

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
        self.query_reading("FETC?").await
    }

    async fn read_measurements(&mut self) -> Result<Reading> {
        self.query_reading("READ?").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{expected_protocol, ProtocolCheck};
    use crate::units::NANOAMPERE;

    const OPEN_HOST: [&str; 2] = ["FUNCTION?", "CONF:VOLT:DC"];

    async fn em(host: &[&str], ins: &[&str]) -> (Keithley6517b, ProtocolCheck) {
        let host: Vec<&str> = OPEN_HOST.iter().chain(host).copied().collect();
        let ins: Vec<&str> = ["\"VOLT:DC\""].iter().chain(ins).copied().collect();
        let (inst, check) = expected_protocol(&host, &ins, "\n");
        (Keithley6517b::open(inst).await.unwrap(), check)
    }

    #[test]
    fn test_parse_reading() {
        let r = parse_reading("1.0N,1234s,5678R00000", VOLT).unwrap();
        assert_eq!(r.value, 1.0 * VOLT);
        assert_eq!(r.timestamp, 1234.0);
        assert_eq!(r.trigger_count, Some(5678));
        assert!(parse_reading("1.0N,1234s", VOLT).is_err());
        assert!(parse_reading("1.0N,1234s,R0", VOLT).is_err());
    }

    #[tokio::test]
    async fn test_open_auto_configs_current_mode() {
        let (_em, check) = em(&[], &[]).await;
        check.assert_done();
    }

    #[tokio::test]
    async fn test_mode_trigger_and_arm() {
        let (mut em, check) = em(
            &[
                "FUNCTION \"RES\"",
                "TRIGGER:SOURCE?",
                "TRIGGER:SOURCE TLINK",
                "ARM:SOURCE?",
                "ARM:SOURCE MAN",
            ],
            &["IMM", "BUS"],
        )
        .await;
        em.set_mode(Keithley6517bMode::Resistance).await.unwrap();
        assert_eq!(em.trigger_mode().await.unwrap(), Keithley6517bTriggerMode::Immediate);
        em.set_trigger_mode(Keithley6517bTriggerMode::Tlink).await.unwrap();
        assert_eq!(em.arm_source().await.unwrap(), ArmSource::Bus);
        em.set_arm_source(ArmSource::Manual).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_input_range_uses_mode_limits() {
        let (mut em, check) = em(
            &[
                "FUNCTION?",
                "CURR:DC:RANGE:UPPER?",
                "FUNCTION?",
                "CURR:DC:RANGE:UPPER 2.000000e-09",
                "FUNCTION?",
                "FUNCTION?",
                "RES:RANGE:UPPER 2.000000e+12",
            ],
            &["\"CURR:DC\"", "2e-11", "\"CURR:DC\"", "\"CURR:DC\"", "\"RES\""],
        )
        .await;
        assert_eq!(em.input_range().await.unwrap(), 2e-11 * AMPERE);
        em.set_input_range(2.0 * NANOAMPERE).await.unwrap();
        let err = em.set_input_range(3.0 * NANOAMPERE).await.unwrap_err();
        assert!(matches!(err, InstrumentError::InvalidValue(_)));
        em.set_input_range(2e12 * OHM).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_auto_range() {
        let (mut em, check) = em(
            &["FUNCTION?", "CHAR:RANGE:AUTO?", "FUNCTION?", "CHAR:RANGE:AUTO 1"],
            &["\"CHAR\"", "0", "\"CHAR\""],
        )
        .await;
        assert!(!em.auto_range().await.unwrap());
        em.set_auto_range(true).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_fetch_queries_reading_before_mode() {
        let (mut em, check) = em(
            &["FETC?", "FUNCTION?", "READ?", "FUNCTION?"],
            &["1.0N,1234s,5678R00000", "\"CURR:DC\"", "2.5N,1.5s,7R00000", "\"CHAR\""],
        )
        .await;
        let r = em.fetch().await.unwrap();
        assert_eq!(r.value, 1.0 * AMPERE);
        assert_eq!(r.trigger_count, Some(5678));
        let r = em.read_measurements().await.unwrap();
        assert_eq!(r.value, 2.5 * COULOMB);
        assert_eq!(r.timestamp, 1.5);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_measure_reconfigures_only_on_mode_change() {
        let (mut em, check) = em(
            &[
                "FUNCTION?",
                "READ?",
                "FUNCTION?",
                "FUNCTION?",
                "CONF:CURR:DC",
                "READ?",
                "FUNCTION?",
            ],
            &[
                "\"VOLT:DC\"",
                "3.0N,1s,1R00000",
                "\"VOLT:DC\"",
                "\"VOLT:DC\"",
                "4.0N,2s,2R00000",
                "\"CURR:DC\"",
            ],
        )
        .await;
        let v = em.measure(Some(Keithley6517bMode::VoltageDc)).await.unwrap();
        assert_eq!(v, 3.0 * VOLT);
        let i = em.measure(Some(Keithley6517bMode::CurrentDc)).await.unwrap();
        assert_eq!(i, 4.0 * AMPERE);
        check.assert_done();
    }
}
