//! HP E3631A triple-output supply (also sold as Agilent/Keysight E3631A).
//!
//! Outputs: 1 is +6 V/5 A, 2 is +25 V/1 A, 3 is -25 V/1 A. The device works
//! on one selected output at a time; [`Hpe3631a::select_channel`] switches
//! only when needed because each switch costs half a second.

use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::generic_scpi::ScpiInstrument;
use crate::instrument::capabilities::PowerSupplyChannel;
use crate::property::{format_sci, BoolProperty, IntProperty, UnitfulProperty, ValidSet};
use crate::units::{assume_units, split_unit_str, Magnitude, Quantity, AMPERE, VOLT};
use crate::Instrument;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const CHANNEL_ID: IntProperty = IntProperty::new("INST:NSEL").valid(ValidSet::List(&[1, 2, 3]));
const CURRENT: UnitfulProperty =
    UnitfulProperty::new("SOUR:CURR", AMPERE).bounds_fmt("{}? MIN", "{}? MAX");
const VOLTAGE_SENSE: UnitfulProperty = UnitfulProperty::new("MEAS:VOLT", VOLT);
const CURRENT_SENSE: UnitfulProperty = UnitfulProperty::new("MEAS:CURR", AMPERE);
const OUTPUT: BoolProperty = BoolProperty::new("OUTP").values("1", "0");

/// Dead time the supply needs after each setting command.
const COMMAND_SETTLE: Duration = Duration::from_millis(100);
const CHANNEL_SWITCH_SETTLE: Duration = Duration::from_millis(500);

async fn settle(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// HP E3631A.
pub struct Hpe3631a {
    inst: Instrument,
    command_settle: Duration,
    switch_settle: Duration,
}

impl Hpe3631a {
    pub const MODEL: &'static str = "HPe3631a";

    /// Overrides the dead times after set commands and channel switches.
    pub fn with_settle_times(mut self, command: Duration, channel_switch: Duration) -> Self {
        self.command_settle = command;
        self.switch_settle = channel_switch;
        self
    }

    /// Active output, 1 to 3.
    pub async fn channel_id(&mut self) -> Result<i64> {
        CHANNEL_ID.get(&mut self.inst).await
    }

    pub async fn set_channel_id(&mut self, id: i64) -> Result<()> {
        CHANNEL_ID.set(&mut self.inst, id).await?;
        settle(self.command_settle).await;
        Ok(())
    }

    /// Makes output `id` active, unless it already is.
    pub async fn select_channel(&mut self, id: i64) -> Result<&mut Self> {
        if self.channel_id().await? != id {
            debug!("Switching E3631A to output {}", id);
            CHANNEL_ID.set(&mut self.inst, id).await?;
            settle(self.switch_settle).await;
        }
        Ok(self)
    }

    /// `(min, max)` voltage of the active output. `SOUR:VOLT? MAX` returns
    /// the largest magnitude, which is negative on the -25 V output.
    pub async fn voltage_range(&mut self) -> Result<(Quantity, Quantity)> {
        let max = self
            .inst
            .query_parse("SOUR:VOLT? MAX", |r| {
                split_unit_str(r, VOLT).and_then(|(v, unit)| Quantity::new(v, unit).to(VOLT))
            })
            .await?;
        let zero = Quantity::new(0.0, VOLT);
        if max.value() < 0.0 {
            Ok((max, zero))
        } else {
            Ok((zero, max))
        }
    }

    pub async fn voltage_min(&mut self) -> Result<Quantity> {
        Ok(self.voltage_range().await?.0)
    }

    pub async fn voltage_max(&mut self) -> Result<Quantity> {
        Ok(self.voltage_range().await?.1)
    }

    pub async fn current_min(&mut self) -> Result<Option<Quantity>> {
        CURRENT.min_value(&mut self.inst).await
    }

    pub async fn current_max(&mut self) -> Result<Option<Quantity>> {
        CURRENT.max_value(&mut self.inst).await
    }

    pub async fn voltage_sense(&mut self) -> Result<Quantity> {
        VOLTAGE_SENSE.get(&mut self.inst).await
    }

    pub async fn current_sense(&mut self) -> Result<Quantity> {
        CURRENT_SENSE.get(&mut self.inst).await
    }
}

#[async_trait]
impl OpenInstrument for Hpe3631a {
    /// Puts the supply in remote mode.
    async fn open(inst: Instrument) -> Result<Self> {
        let mut psu = Self {
            inst,
            command_settle: COMMAND_SETTLE,
            switch_settle: CHANNEL_SWITCH_SETTLE,
        };
        psu.inst.sendcmd("SYST:REM").await?;
        settle(psu.command_settle).await;
        Ok(psu)
    }
}

#[async_trait]
impl Driver for Hpe3631a {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        if let Some(("channel", idx, attr)) = path.indexed() {
            let psu = self.select_channel(idx as i64 + 1).await?;
            let single = AttrPath::parse(attr)?;
            return psu.apply_attr(&single, value).await;
        }
        match path.simple() {
            Some("channel_id") | Some("channelid") => self.set_channel_id(value.as_i64()?).await,
            Some("voltage") => self.set_voltage(value.as_magnitude()?).await,
            Some("current") => self.set_current(value.as_magnitude()?).await,
            Some("output") => self.set_output(value.as_bool()?).await,
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

impl ScpiInstrument for Hpe3631a {}

/// The active output.
#[async_trait]
impl PowerSupplyChannel for Hpe3631a {
    async fn voltage(&mut self) -> Result<Quantity> {
        self.inst
            .query_parse("SOUR:VOLT?", |r| {
                split_unit_str(r, VOLT).and_then(|(v, unit)| Quantity::new(v, unit).to(VOLT))
            })
            .await
    }

    async fn set_voltage(&mut self, voltage: Magnitude) -> Result<()> {
        let volts = assume_units(voltage, VOLT)?;
        let (min, max) = self.voltage_range().await?;
        if volts < min.value() {
            return Err(InstrumentError::OutOfRange(format!(
                "Voltage quantity is too low. Got {}, minimum value is {}",
                Quantity::new(volts, VOLT),
                min
            )));
        }
        if volts > max.value() {
            return Err(InstrumentError::OutOfRange(format!(
                "Voltage quantity is too high. Got {}, maximum value is {}",
                Quantity::new(volts, VOLT),
                max
            )));
        }
        self.inst
            .sendcmd(&format!("SOUR:VOLT {}", format_sci(volts)))
            .await?;
        settle(self.command_settle).await;
        Ok(())
    }

    async fn current(&mut self) -> Result<Quantity> {
        CURRENT.get(&mut self.inst).await
    }

    async fn set_current(&mut self, current: Magnitude) -> Result<()> {
        CURRENT.set(&mut self.inst, current).await?;
        settle(self.command_settle).await;
        Ok(())
    }

    async fn output(&mut self) -> Result<bool> {
        OUTPUT.get(&mut self.inst).await
    }

    async fn set_output(&mut self, on: bool) -> Result<()> {
        OUTPUT.set(&mut self.inst, on).await?;
        settle(self.command_settle).await;
        Ok(())
    }

    async fn mode(&mut self) -> Result<String> {
        Err(InstrumentError::NotSupported(
            "The HPe3631a sets its mode automatically".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{expected_protocol, ProtocolCheck};

    async fn psu(host: &[&str], ins: &[&str]) -> (Hpe3631a, ProtocolCheck) {
        let (inst, check) = expected_protocol(host, ins, "\n");
        let psu = Hpe3631a::open(inst)
            .await
            .unwrap()
            .with_settle_times(Duration::ZERO, Duration::ZERO);
        (psu, check)
    }

    #[tokio::test]
    async fn test_channel_select() {
        let (mut psu, check) = psu(
            &["SYST:REM", "INST:NSEL?", "INST:NSEL?", "INST:NSEL 2", "INST:NSEL?", "INST:NSEL?"],
            &["1", "1", "2", "2"],
        )
        .await;
        assert_eq!(psu.channel_id().await.unwrap(), 1);
        psu.select_channel(2).await.unwrap();
        assert_eq!(psu.channel_id().await.unwrap(), 2);
        psu.select_channel(2).await.unwrap();
        assert!(psu.set_channel_id(4).await.is_err());
        check.assert_done();
    }

    #[tokio::test]
    async fn test_settings_run_on_spawned_task() {
        let (mut psu, check) = psu(
            &["SYST:REM", "SOUR:VOLT? MAX", "SOUR:VOLT 2.000000e+00"],
            &["6.0"],
        )
        .await;
        let task = tokio::spawn(async move {
            psu.set_voltage(Magnitude::from(2.0)).await.unwrap();
            psu
        });
        task.await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_voltage() {
        let (mut psu, check) = psu(
            &[
                "SYST:REM",
                "SOUR:VOLT? MAX",
                "SOUR:VOLT? MAX",
                "SOUR:VOLT? MAX",
                "SOUR:VOLT 3.000000e+00",
                "SOUR:VOLT?",
                "SOUR:VOLT? MAX",
                "SOUR:VOLT? MAX",
            ],
            &["6.0", "6.0", "6.0", "3.0", "6.0", "6.0"],
        )
        .await;
        assert_eq!(psu.voltage_min().await.unwrap(), 0.0 * VOLT);
        assert_eq!(psu.voltage_max().await.unwrap(), 6.0 * VOLT);
        psu.set_voltage(Magnitude::from(3.0 * VOLT)).await.unwrap();
        assert_eq!(psu.voltage().await.unwrap(), 3.0 * VOLT);
        let err = psu.set_voltage(Magnitude::from(-1.0)).await.unwrap_err();
        assert!(err.to_string().contains("too low"));
        let err = psu.set_voltage(Magnitude::from(7.0)).await.unwrap_err();
        assert!(err.to_string().contains("too high"));
        check.assert_done();
    }

    #[tokio::test]
    async fn test_negative_output_range() {
        let (mut psu, check) = psu(&["SYST:REM", "SOUR:VOLT? MAX"], &["-25.0"]).await;
        assert_eq!(
            psu.voltage_range().await.unwrap(),
            (-25.0 * VOLT, 0.0 * VOLT)
        );
        check.assert_done();
    }

    #[tokio::test]
    async fn test_current() {
        let (mut psu, check) = psu(
            &[
                "SYST:REM",
                "SOUR:CURR? MIN",
                "SOUR:CURR? MAX",
                "SOUR:CURR? MIN",
                "SOUR:CURR? MAX",
                "SOUR:CURR 2.000000e+00",
                "SOUR:CURR?",
                "SOUR:CURR? MIN",
            ],
            &["0.0", "5.0", "0.0", "5.0", "2.0", "0.0"],
        )
        .await;
        assert_eq!(psu.current_min().await.unwrap(), Some(0.0 * AMPERE));
        assert_eq!(psu.current_max().await.unwrap(), Some(5.0 * AMPERE));
        psu.set_current(Magnitude::from(2.0 * AMPERE)).await.unwrap();
        assert_eq!(psu.current().await.unwrap(), 2.0 * AMPERE);
        assert!(psu.set_current(Magnitude::from(-1.0)).await.is_err());
        check.assert_done();
    }

    #[tokio::test]
    async fn test_sense_and_output() {
        let (mut psu, check) = psu(
            &["SYST:REM", "MEAS:VOLT?", "MEAS:CURR?", "OUTP?", "OUTP 1"],
            &["1.234", "1.234", "0"],
        )
        .await;
        assert_eq!(psu.voltage_sense().await.unwrap(), 1.234 * VOLT);
        assert_eq!(psu.current_sense().await.unwrap(), 1.234 * AMPERE);
        assert!(!psu.output().await.unwrap());
        psu.set_output(true).await.unwrap();
        assert!(matches!(psu.mode().await, Err(InstrumentError::NotSupported(_))));
        check.assert_done();
    }

    #[tokio::test]
    async fn test_channel_attr_switches_output() {
        let (mut psu, check) = psu(
            &["SYST:REM", "INST:NSEL?", "INST:NSEL 3", "OUTP 1"],
            &["1"],
        )
        .await;
        psu.apply_attr(&AttrPath::parse("channel[2].output").unwrap(), &AttrValue::Bool(true))
            .await
            .unwrap();
        check.assert_done();
    }
}
