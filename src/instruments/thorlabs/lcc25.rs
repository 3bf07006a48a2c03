//! Thorlabs LCC25 liquid crystal controller.
//!
//! The controller alternates its output between two voltages at a set
//! repetition rate, or sweeps between a minimum and maximum in test mode.

use super::{check_cmd, configure_serial_controller};
use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::property::{BoolProperty, EnumProperty, Limit, NumFmt, SetFmt, UnitfulProperty};
use crate::units::{Magnitude, Quantity, HERTZ, MILLISECOND, VOLT};
use crate::Instrument;
use async_trait::async_trait;

crate::scpi_enum! {
    pub enum Lcc25Mode {
        Normal => "0",
        Voltage1 => "1",
        Voltage2 => "2",
    }
}

const fn voltage(command: &'static str) -> UnitfulProperty {
    UnitfulProperty::new(command, VOLT)
        .format(NumFmt::Fixed(1))
        .set_fmt(SetFmt::Equals)
        .fixed_range(0.0, 25.0)
}

const fn flag(command: &'static str) -> BoolProperty {
    BoolProperty::new(command)
        .values("1", "0")
        .set_fmt(SetFmt::Equals)
}

const FREQUENCY: UnitfulProperty = UnitfulProperty::new("freq", HERTZ)
    .format(NumFmt::Fixed(1))
    .set_fmt(SetFmt::Equals)
    .fixed_range(5.0, 150.0);
const MODE: EnumProperty<Lcc25Mode> = EnumProperty::new("mode").set_fmt(SetFmt::Equals);
const ENABLE: BoolProperty = flag("enable");
const EXTERN: BoolProperty = flag("extern");
const REMOTE: BoolProperty = flag("remote");
const VOLTAGE1: UnitfulProperty = voltage("volt1");
const VOLTAGE2: UnitfulProperty = voltage("volt2");
const MIN_VOLTAGE: UnitfulProperty = voltage("min");
const MAX_VOLTAGE: UnitfulProperty = voltage("max");
const DWELL: UnitfulProperty = UnitfulProperty::new("dwell", MILLISECOND)
    .format(NumFmt::General)
    .set_fmt(SetFmt::Equals)
    .min(Limit::Fixed(0.0));
const INCREMENT: UnitfulProperty = UnitfulProperty::new("increment", VOLT)
    .format(NumFmt::Fixed(1))
    .set_fmt(SetFmt::Equals)
    .min(Limit::Fixed(0.0));

fn validate_slot(slot: u8) -> Result<u8> {
    if !(1..=4).contains(&slot) {
        return Err(InstrumentError::OutOfRange(
            "Cannot set memory out of `[1,4]` range".to_string(),
        ));
    }
    Ok(slot)
}

/// Thorlabs LCC25.
pub struct Lcc25 {
    inst: Instrument,
}

impl Lcc25 {
    pub const MODEL: &'static str = "LCC25";

    /// Name and firmware version.
    pub async fn name(&mut self) -> Result<String> {
        self.inst.query("*idn?").await
    }

    /// Rate at which the output alternates between the two voltages.
    pub async fn frequency(&mut self) -> Result<Quantity> {
        FREQUENCY.get(&mut self.inst).await
    }

    pub async fn set_frequency(&mut self, frequency: impl Into<Magnitude> + Send) -> Result<()> {
        FREQUENCY.set(&mut self.inst, frequency).await
    }

    pub async fn mode(&mut self) -> Result<Lcc25Mode> {
        MODE.get(&mut self.inst).await
    }

    pub async fn set_mode(&mut self, mode: Lcc25Mode) -> Result<()> {
        MODE.set(&mut self.inst, mode).await
    }

    pub async fn enable(&mut self) -> Result<bool> {
        ENABLE.get(&mut self.inst).await
    }

    pub async fn set_enable(&mut self, on: bool) -> Result<()> {
        ENABLE.set(&mut self.inst, on).await
    }

    /// External TTL modulation instead of the internal clock.
    pub async fn extern_modulation(&mut self) -> Result<bool> {
        EXTERN.get(&mut self.inst).await
    }

    pub async fn set_extern_modulation(&mut self, on: bool) -> Result<()> {
        EXTERN.set(&mut self.inst, on).await
    }

    /// Front panel lockout.
    pub async fn remote(&mut self) -> Result<bool> {
        REMOTE.get(&mut self.inst).await
    }

    pub async fn set_remote(&mut self, on: bool) -> Result<()> {
        REMOTE.set(&mut self.inst, on).await
    }

    pub async fn voltage1(&mut self) -> Result<Quantity> {
        VOLTAGE1.get(&mut self.inst).await
    }

    pub async fn set_voltage1(&mut self, v: impl Into<Magnitude> + Send) -> Result<()> {
        VOLTAGE1.set(&mut self.inst, v).await
    }

    pub async fn voltage2(&mut self) -> Result<Quantity> {
        VOLTAGE2.get(&mut self.inst).await
    }

    pub async fn set_voltage2(&mut self, v: impl Into<Magnitude> + Send) -> Result<()> {
        VOLTAGE2.set(&mut self.inst, v).await
    }

    /// Start of the test-mode sweep.
    pub async fn min_voltage(&mut self) -> Result<Quantity> {
        MIN_VOLTAGE.get(&mut self.inst).await
    }

    pub async fn set_min_voltage(&mut self, v: impl Into<Magnitude> + Send) -> Result<()> {
        MIN_VOLTAGE.set(&mut self.inst, v).await
    }

    /// End of the test-mode sweep. Ignored by the device when below the
    /// minimum.
    pub async fn max_voltage(&mut self) -> Result<Quantity> {
        MAX_VOLTAGE.get(&mut self.inst).await
    }

    pub async fn set_max_voltage(&mut self, v: impl Into<Magnitude> + Send) -> Result<()> {
        MAX_VOLTAGE.set(&mut self.inst, v).await
    }

    /// Time spent at each test-mode step.
    pub async fn dwell(&mut self) -> Result<Quantity> {
        DWELL.get(&mut self.inst).await
    }

    pub async fn set_dwell(&mut self, dwell: impl Into<Magnitude> + Send) -> Result<()> {
        DWELL.set(&mut self.inst, dwell).await
    }

    /// Voltage step of the test-mode sweep.
    pub async fn increment(&mut self) -> Result<Quantity> {
        INCREMENT.get(&mut self.inst).await
    }

    pub async fn set_increment(&mut self, step: impl Into<Magnitude> + Send) -> Result<()> {
        INCREMENT.set(&mut self.inst, step).await
    }

    async fn command(&mut self, cmd: &str) -> Result<bool> {
        let reply = self.inst.query(cmd).await?;
        Ok(check_cmd(&reply))
    }

    /// Restores factory settings.
    pub async fn default(&mut self) -> Result<bool> {
        self.command("default").await
    }

    /// Stores the parameters in static memory.
    pub async fn save(&mut self) -> Result<bool> {
        self.command("save").await
    }

    /// Saves the current settings to memory slot 1 to 4.
    pub async fn set_settings(&mut self, slot: u8) -> Result<bool> {
        let slot = validate_slot(slot)?;
        self.command(&format!("set={slot}")).await
    }

    /// Loads the settings from memory slot 1 to 4.
    pub async fn get_settings(&mut self, slot: u8) -> Result<bool> {
        let slot = validate_slot(slot)?;
        self.command(&format!("get={slot}")).await
    }

    /// Starts sweeping from the minimum to the maximum voltage.
    pub async fn test_mode(&mut self) -> Result<bool> {
        self.command("test").await
    }
}

#[async_trait]
impl OpenInstrument for Lcc25 {
    async fn open(mut inst: Instrument) -> Result<Self> {
        configure_serial_controller(&mut inst).await?;
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for Lcc25 {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        match path.simple() {
            Some("frequency") => self.set_frequency(value.as_magnitude()?).await,
            Some("mode") => self.set_mode(value.as_enum()?).await,
            Some("enable") => self.set_enable(value.as_bool()?).await,
            Some("extern") => self.set_extern_modulation(value.as_bool()?).await,
            Some("remote") => self.set_remote(value.as_bool()?).await,
            Some("voltage1") => self.set_voltage1(value.as_magnitude()?).await,
            Some("voltage2") => self.set_voltage2(value.as_magnitude()?).await,
            Some("min_voltage") => self.set_min_voltage(value.as_magnitude()?).await,
            Some("max_voltage") => self.set_max_voltage(value.as_magnitude()?).await,
            Some("dwell") => self.set_dwell(value.as_magnitude()?).await,
            Some("increment") => self.set_increment(value.as_magnitude()?).await,
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{expected_protocol, ProtocolCheck};

    async fn lcc(host: &[&str], ins: &[&str]) -> (Lcc25, ProtocolCheck) {
        let (inst, check) = expected_protocol(host, ins, "\r");
        (Lcc25::open(inst).await.unwrap(), check)
    }

    #[tokio::test]
    async fn test_name() {
        let (mut lcc, check) = lcc(&["*idn?"], &["*idn?", "bloopbloop", "> "]).await;
        assert_eq!(lcc.name().await.unwrap(), "bloopbloop");
        check.assert_done();
    }

    #[tokio::test]
    async fn test_frequency() {
        let (mut lcc, check) =
            lcc(&["freq?", "freq=10.0"], &["freq?", "20", "> freq=10.0", "> "]).await;
        assert_eq!(lcc.frequency().await.unwrap(), 20.0 * HERTZ);
        lcc.set_frequency(10.0).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_frequency_limits() {
        let (mut lcc, check) = lcc(&[], &[]).await;
        assert!(matches!(
            lcc.set_frequency(0.0).await,
            Err(InstrumentError::OutOfRange(_))
        ));
        assert!(lcc.set_frequency(160.0).await.is_err());
        check.assert_done();
    }

    #[tokio::test]
    async fn test_mode() {
        let (mut lcc, check) = lcc(&["mode?", "mode=1"], &["mode?", "2", "> mode=1", "> "]).await;
        assert_eq!(lcc.mode().await.unwrap(), Lcc25Mode::Voltage2);
        lcc.set_mode(Lcc25Mode::Voltage1).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_flags() {
        let (mut lcc, check) = lcc(
            &["enable?", "enable=1", "extern?", "extern=1", "remote?", "remote=1"],
            &[
                "enable?", "0", "> enable=1", "> extern?", "0", "> extern=1", "> remote?", "0",
                "> remote=1", "> ",
            ],
        )
        .await;
        assert!(!lcc.enable().await.unwrap());
        lcc.set_enable(true).await.unwrap();
        assert!(!lcc.extern_modulation().await.unwrap());
        lcc.set_extern_modulation(true).await.unwrap();
        assert!(!lcc.remote().await.unwrap());
        lcc.set_remote(true).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_voltages() {
        let (mut lcc, check) = lcc(
            &["volt1?", "volt1=10.0", "volt2?", "volt2=10.0", "min?", "min=10.0", "max?", "max=10.0"],
            &[
                "volt1?", "20", "> volt1=10.0", "> volt2?", "20", "> volt2=10.0", "> min?", "20",
                "> min=10.0", "> max?", "20", "> max=10.0", "> ",
            ],
        )
        .await;
        assert_eq!(lcc.voltage1().await.unwrap(), 20.0 * VOLT);
        lcc.set_voltage1(10.0).await.unwrap();
        assert_eq!(lcc.voltage2().await.unwrap(), 20.0 * VOLT);
        lcc.set_voltage2(10.0).await.unwrap();
        assert_eq!(lcc.min_voltage().await.unwrap(), 20.0 * VOLT);
        lcc.set_min_voltage(10.0).await.unwrap();
        assert_eq!(lcc.max_voltage().await.unwrap(), 20.0 * VOLT);
        lcc.set_max_voltage(10.0).await.unwrap();
        assert!(lcc.set_voltage1(30.0).await.is_err());
        check.assert_done();
    }

    #[tokio::test]
    async fn test_dwell_and_increment() {
        let (mut lcc, check) = lcc(
            &["dwell?", "dwell=10", "increment?", "increment=10.0"],
            &["dwell?", "20", "> dwell=10", "> increment?", "20", "> increment=10.0", "> "],
        )
        .await;
        assert_eq!(lcc.dwell().await.unwrap(), 20.0 * MILLISECOND);
        lcc.set_dwell(10).await.unwrap();
        assert_eq!(lcc.increment().await.unwrap(), 20.0 * VOLT);
        lcc.set_increment(10.0).await.unwrap();
        assert!(lcc.set_dwell(-10).await.is_err());
        assert!(lcc.set_increment(-10.0).await.is_err());
        check.assert_done();
    }

    #[tokio::test]
    async fn test_memory_commands() {
        let (mut lcc, check) = lcc(
            &["default", "save", "set=2", "get=2", "test"],
            &[
                "default", "1", "> save", "1", "> set=2", "1", "> get=2", "CMD_ARG_INVALID",
                "> test", "1", "> ",
            ],
        )
        .await;
        assert!(lcc.default().await.unwrap());
        assert!(lcc.save().await.unwrap());
        assert!(lcc.set_settings(2).await.unwrap());
        assert!(!lcc.get_settings(2).await.unwrap());
        assert!(lcc.test_mode().await.unwrap());
        assert!(lcc.set_settings(5).await.is_err());
        assert!(lcc.get_settings(0).await.is_err());
        check.assert_done();
    }

    #[tokio::test]
    async fn test_attrs() {
        let (mut lcc, check) = lcc(&["volt1=5.0"], &["volt1=5.0", "> "]).await;
        lcc.apply_attr(&AttrPath::parse("voltage1").unwrap(), &AttrValue::Float(5.0))
            .await
            .unwrap();
        check.assert_done();
    }
}
