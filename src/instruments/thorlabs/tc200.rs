//! Thorlabs TC200 heater and temperature controller.

use super::{configure_serial_controller, PROMPT};
use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::property::{
    format_general, parse_float, parse_int, EnumProperty, IntProperty, NumFmt, SetFmt,
    UnitfulProperty, ValidSet,
};
use crate::units::{convert_temperature, Magnitude, Quantity, Unit, CELSIUS, FAHRENHEIT, KELVIN, WATT};
use crate::Instrument;
use async_trait::async_trait;
use tracing::debug;

crate::scpi_enum! {
    pub enum Tc200Mode {
        Normal => "normal",
        Cycle => "cycle",
    }
}

crate::scpi_enum! {
    /// Temperature sensor types.
    pub enum Tc200Sensor {
        Ptc100 => "ptc100",
        Ptc1000 => "ptc1000",
        Th10k => "th10k",
        Ntc10k => "ntc10k",
    }
}

/// The controller rejects `mode=normal` with this line even though the
/// mode is applied.
const SPURIOUS_MODE_ERROR: &str = "Command error CMD_ARG_RANGE_ERR\n\r";

const MIN_SET_TEMPERATURE: f64 = 20.0;

fn strip_temperature_units(reply: &str) -> String {
    reply
        .replace(" Celsius", "")
        .replace(" C", "")
        .replace(" F", "")
        .replace(" K", "")
}

/// `Sensor = NTC10K, Beta = 5600` → `ntc10k`.
fn sensor_name(reply: &str) -> String {
    let first = reply.split(',').next().unwrap_or(reply);
    let name = first.split_once('=').map_or(first, |(_, v)| v);
    name.trim().to_ascii_lowercase()
}

const TEMPERATURE: UnitfulProperty =
    UnitfulProperty::new("tact", CELSIUS).input_decoration(strip_temperature_units);
const MAX_TEMPERATURE: UnitfulProperty = UnitfulProperty::new("tmax", CELSIUS)
    .format(NumFmt::Fixed(1))
    .set_fmt(SetFmt::Equals)
    .input_decoration(strip_temperature_units)
    .fixed_range(20.0, 205.0);
const MAX_POWER: UnitfulProperty = UnitfulProperty::new("pmax", WATT)
    .format(NumFmt::Fixed(1))
    .set_fmt(SetFmt::Equals)
    .fixed_range(0.1, 18.0);
const SENSOR: EnumProperty<Tc200Sensor> = EnumProperty::new("sns")
    .set_fmt(SetFmt::Equals)
    .input_decoration(sensor_name);
const BETA: IntProperty = IntProperty::new("beta")
    .set_fmt(SetFmt::Equals)
    .valid(ValidSet::Range(2000, 6000));

fn check_gain(name: &str, value: i64, min: i64) -> Result<i64> {
    if !(min..=250).contains(&value) {
        return Err(InstrumentError::OutOfRange(format!(
            "{name}-value not in [{min}, 250]"
        )));
    }
    Ok(value)
}

/// Thorlabs TC200.
pub struct Tc200 {
    inst: Instrument,
}

impl Tc200 {
    pub const MODEL: &'static str = "TC200";

    /// Name and firmware version.
    pub async fn name(&mut self) -> Result<String> {
        self.inst.query("*idn?").await
    }

    /// Status register. Bit 0 is the heater enable, bit 1 the cycle mode,
    /// bits 4 and 5 the display unit.
    pub async fn status(&mut self) -> Result<i64> {
        self.inst
            .query_parse("stat?", |reply| {
                let code = reply.split_whitespace().next().unwrap_or(reply);
                parse_int(code)
            })
            .await
    }

    pub async fn mode(&mut self) -> Result<Tc200Mode> {
        let status = self.status().await?;
        Ok(if (status >> 1) & 1 == 1 {
            Tc200Mode::Cycle
        } else {
            Tc200Mode::Normal
        })
    }

    pub async fn set_mode(&mut self, mode: Tc200Mode) -> Result<()> {
        let cmd = format!("mode={mode}");
        if mode != Tc200Mode::Normal {
            return self.inst.sendcmd(&cmd).await;
        }
        let expected = format!("{SPURIOUS_MODE_ERROR}{PROMPT}");
        self.inst.set_prompt(Some(&expected));
        let result = self.inst.sendcmd(&cmd).await;
        self.inst.set_prompt(Some(PROMPT));
        result
    }

    /// Whether the heater output is on.
    pub async fn enable(&mut self) -> Result<bool> {
        Ok(self.status().await? & 1 == 1)
    }

    /// `ens` toggles the heater, so it is only sent when the state differs.
    pub async fn set_enable(&mut self, on: bool) -> Result<()> {
        if self.enable().await? == on {
            debug!(on, "heater already in requested state");
            return Ok(());
        }
        self.inst.sendcmd("ens").await
    }

    /// Sensor temperature.
    pub async fn temperature(&mut self) -> Result<Quantity> {
        TEMPERATURE.get(&mut self.inst).await
    }

    pub async fn max_temperature(&mut self) -> Result<Quantity> {
        MAX_TEMPERATURE.get(&mut self.inst).await
    }

    /// 20 °C to 205 °C; bare numbers are degrees Celsius.
    pub async fn set_max_temperature(&mut self, t: impl Into<Magnitude> + Send) -> Result<()> {
        MAX_TEMPERATURE.set(&mut self.inst, t).await
    }

    /// Temperature setpoint, always reported in Celsius.
    pub async fn temperature_set(&mut self) -> Result<Quantity> {
        let v = self
            .inst
            .query_parse("tset?", |r| parse_float(&strip_temperature_units(r)))
            .await?;
        Ok(Quantity::new(v, CELSIUS))
    }

    /// Must lie between 20 °C and the current maximum temperature.
    pub async fn set_temperature_set(&mut self, t: impl Into<Magnitude> + Send) -> Result<()> {
        let t = convert_temperature(t, CELSIUS)?.value();
        let max = self.max_temperature().await?.magnitude_in(CELSIUS)?;
        if t < MIN_SET_TEMPERATURE || t > max {
            return Err(InstrumentError::OutOfRange(
                "Temperature set is out of range.".to_string(),
            ));
        }
        self.inst.sendcmd(&format!("tset={}", format_general(t))).await
    }

    /// Proportional, integral and derivative gains.
    pub async fn pid(&mut self) -> Result<[i64; 3]> {
        self.inst
            .query_parse("pid?", |reply| {
                let gains = reply
                    .split_whitespace()
                    .map(parse_int)
                    .collect::<Result<Vec<_>>>()?;
                <[i64; 3]>::try_from(gains)
                    .map_err(|_| InstrumentError::parse(reply, "expected three gains"))
            })
            .await
    }

    /// Sets the gains given as `Some`, leaving the others unchanged.
    pub async fn set_pid(&mut self, p: Option<i64>, i: Option<i64>, d: Option<i64>) -> Result<()> {
        if let Some(p) = p {
            self.set_p(p).await?;
        }
        if let Some(i) = i {
            self.set_i(i).await?;
        }
        if let Some(d) = d {
            self.set_d(d).await?;
        }
        Ok(())
    }

    pub async fn p(&mut self) -> Result<i64> {
        Ok(self.pid().await?[0])
    }

    /// 1 to 250.
    pub async fn set_p(&mut self, p: i64) -> Result<()> {
        let p = check_gain("P", p, 1)?;
        self.inst.sendcmd(&format!("pgain={p}")).await
    }

    pub async fn i(&mut self) -> Result<i64> {
        Ok(self.pid().await?[1])
    }

    /// 0 to 250.
    pub async fn set_i(&mut self, i: i64) -> Result<()> {
        let i = check_gain("I", i, 0)?;
        self.inst.sendcmd(&format!("igain={i}")).await
    }

    pub async fn d(&mut self) -> Result<i64> {
        Ok(self.pid().await?[2])
    }

    /// 0 to 250.
    pub async fn set_d(&mut self, d: i64) -> Result<()> {
        let d = check_gain("D", d, 0)?;
        self.inst.sendcmd(&format!("dgain={d}")).await
    }

    /// Unit the controller displays temperatures in.
    pub async fn degrees(&mut self) -> Result<Unit> {
        let status = self.status().await?;
        let bit4 = (status >> 4) & 1 == 1;
        let bit5 = (status >> 5) & 1 == 1;
        Ok(match (bit4, bit5) {
            (true, true) => CELSIUS,
            (false, true) => KELVIN,
            _ => FAHRENHEIT,
        })
    }

    pub async fn set_degrees(&mut self, unit: Unit) -> Result<()> {
        let code = if unit == CELSIUS {
            "c"
        } else if unit == FAHRENHEIT {
            "f"
        } else if unit == KELVIN {
            "k"
        } else {
            return Err(InstrumentError::InvalidValue(
                "Invalid temperature type".to_string(),
            ));
        };
        self.inst.sendcmd(&format!("unit={code}")).await
    }

    pub async fn sensor(&mut self) -> Result<Tc200Sensor> {
        SENSOR.get(&mut self.inst).await
    }

    pub async fn set_sensor(&mut self, sensor: Tc200Sensor) -> Result<()> {
        SENSOR.set(&mut self.inst, sensor).await
    }

    /// Thermistor curve beta, 2000 to 6000.
    pub async fn beta(&mut self) -> Result<i64> {
        BETA.get(&mut self.inst).await
    }

    pub async fn set_beta(&mut self, beta: i64) -> Result<()> {
        BETA.set(&mut self.inst, beta).await
    }

    pub async fn max_power(&mut self) -> Result<Quantity> {
        MAX_POWER.get(&mut self.inst).await
    }

    /// 0.1 W to 18 W.
    pub async fn set_max_power(&mut self, p: impl Into<Magnitude> + Send) -> Result<()> {
        MAX_POWER.set(&mut self.inst, p).await
    }
}

#[async_trait]
impl OpenInstrument for Tc200 {
    async fn open(mut inst: Instrument) -> Result<Self> {
        configure_serial_controller(&mut inst).await?;
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for Tc200 {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        match path.simple() {
            Some("mode") => self.set_mode(value.as_enum()?).await,
            Some("enable") => self.set_enable(value.as_bool()?).await,
            Some("max_temperature") => self.set_max_temperature(value.as_magnitude()?).await,
            Some("temperature_set") => self.set_temperature_set(value.as_magnitude()?).await,
            Some("p") => self.set_p(value.as_i64()?).await,
            Some("i") => self.set_i(value.as_i64()?).await,
            Some("d") => self.set_d(value.as_i64()?).await,
            Some("pid") => match value.as_list()? {
                [p, i, d] => self.set_pid(Some(p.as_i64()?), Some(i.as_i64()?), Some(d.as_i64()?)).await,
                _ => Err(InstrumentError::InvalidValue("pid must be [p, i, d]".to_string())),
            },
            Some("degrees") => {
                let unit = Unit::from_symbol(value.as_str()?)?;
                self.set_degrees(unit).await
            }
            Some("sensor") => self.set_sensor(value.as_enum()?).await,
            Some("beta") => self.set_beta(value.as_i64()?).await,
            Some("max_power") => self.set_max_power(value.as_magnitude()?).await,
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{expected_protocol, ProtocolCheck};

    async fn tc(host: &[&str], ins: &[&str]) -> (Tc200, ProtocolCheck) {
        let (inst, check) = expected_protocol(host, ins, "\r");
        (Tc200::open(inst).await.unwrap(), check)
    }

    #[tokio::test]
    async fn test_name() {
        let (mut tc, check) = tc(&["*idn?"], &["*idn?", "bloopbloop", "> "]).await;
        assert_eq!(tc.name().await.unwrap(), "bloopbloop");
        check.assert_done();
    }

    #[tokio::test]
    async fn test_mode() {
        let (mut tc, check) = tc(
            &["stat?", "stat?", "mode=cycle"],
            &["stat?", "0", "> stat?", "2", "> mode=cycle", "> "],
        )
        .await;
        assert_eq!(tc.mode().await.unwrap(), Tc200Mode::Normal);
        assert_eq!(tc.mode().await.unwrap(), Tc200Mode::Cycle);
        tc.set_mode(Tc200Mode::Cycle).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_mode_normal_swallows_command_error() {
        let (mut tc, check) = tc(
            &["mode=normal"],
            &["mode=normal", "Command error CMD_ARG_RANGE_ERR\n", "> "],
        )
        .await;
        tc.set_mode(Tc200Mode::Normal).await.unwrap();
        assert_eq!(tc.instrument().prompt(), Some(PROMPT));
        check.assert_done();
    }

    #[tokio::test]
    async fn test_enable_toggles_only_on_change() {
        let (mut tc, check) = tc(
            &["stat?", "stat?", "ens", "stat?", "ens", "stat?"],
            &[
                "stat?", "54", "> stat?", "54", "> ens", "> stat?", "55", "> ens", "> stat?",
                "54", "> ",
            ],
        )
        .await;
        assert!(!tc.enable().await.unwrap());
        tc.set_enable(true).await.unwrap();
        tc.set_enable(false).await.unwrap();
        tc.set_enable(false).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_temperature() {
        let (mut tc, check) = tc(&["tact?"], &["tact?", "30 C", "> "]).await;
        assert_eq!(tc.temperature().await.unwrap(), 30.0 * CELSIUS);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_temperature_set() {
        let (mut tc, check) = tc(
            &["tset?", "tset?", "tmax?", "tset=40"],
            &["tset?", "30 C", "> tset?", "30 Celsius", "> tmax?", "250", "> tset=40", "> "],
        )
        .await;
        assert_eq!(tc.temperature_set().await.unwrap(), 30.0 * CELSIUS);
        assert_eq!(tc.temperature_set().await.unwrap(), 30.0 * CELSIUS);
        tc.set_temperature_set(40.0 * CELSIUS).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_temperature_set_out_of_range() {
        let (mut tc, check) = tc(&["tmax?"], &["tmax?", "40", "> "]).await;
        let err = tc.set_temperature_set(50.0).await.unwrap_err();
        assert_eq!(err.to_string(), "Temperature set is out of range.");
        check.assert_done();
    }

    #[tokio::test]
    async fn test_pid() {
        let (mut tc, check) = tc(
            &["pid?", "pid?", "pgain=2", "igain=0", "dgain=220"],
            &["pid?", "2 0 220", "> pid?", "2 0 220", "> pgain=2", "> igain=0", "> dgain=220", "> "],
        )
        .await;
        assert_eq!(tc.pid().await.unwrap(), [2, 0, 220]);
        assert_eq!(tc.d().await.unwrap(), 220);
        tc.set_pid(Some(2), Some(0), Some(220)).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_gain_limits() {
        let (mut tc, check) = tc(&[], &[]).await;
        assert!(tc.set_p(0).await.is_err());
        assert!(tc.set_p(260).await.is_err());
        assert!(tc.set_i(-1).await.is_err());
        assert!(tc.set_i(260).await.is_err());
        assert!(tc.set_d(-1).await.is_err());
        let err = tc.set_d(260).await.unwrap_err();
        assert_eq!(err.to_string(), "D-value not in [0, 250]");
        check.assert_done();
    }

    #[tokio::test]
    async fn test_degrees() {
        let (mut tc, check) = tc(
            &["stat?", "stat?", "stat?", "unit=c", "unit=f", "unit=k"],
            &[
                "stat?", "44", "> stat?", "54", "> stat?", "0", "> unit=c", "> unit=f",
                "> unit=k", "> ",
            ],
        )
        .await;
        assert_eq!(tc.degrees().await.unwrap(), KELVIN);
        assert_eq!(tc.degrees().await.unwrap(), CELSIUS);
        assert_eq!(tc.degrees().await.unwrap(), FAHRENHEIT);
        tc.set_degrees(CELSIUS).await.unwrap();
        tc.set_degrees(FAHRENHEIT).await.unwrap();
        tc.set_degrees(KELVIN).await.unwrap();
        assert!(tc.set_degrees(WATT).await.is_err());
        check.assert_done();
    }

    #[tokio::test]
    async fn test_sensor() {
        let (mut tc, check) = tc(
            &["sns?", "sns=ptc100"],
            &["sns?", "Sensor = NTC10K, Beta = 5600", "> sns=ptc100", "> "],
        )
        .await;
        assert_eq!(tc.sensor().await.unwrap(), Tc200Sensor::Ntc10k);
        tc.set_sensor(Tc200Sensor::Ptc100).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_beta() {
        let (mut tc, check) = tc(&["beta?", "beta=2000"], &["beta?", "5600", "> beta=2000", "> "]).await;
        assert_eq!(tc.beta().await.unwrap(), 5600);
        tc.set_beta(2000).await.unwrap();
        assert!(tc.set_beta(200).await.is_err());
        assert!(tc.set_beta(20000).await.is_err());
        check.assert_done();
    }

    #[tokio::test]
    async fn test_max_power_and_temperature() {
        let (mut tc, check) = tc(
            &["pmax?", "pmax=12.0", "tmax?", "tmax=180.0"],
            &["pmax?", "15.0", "> pmax=12.0", "> tmax?", "200.0", "> tmax=180.0", "> "],
        )
        .await;
        assert_eq!(tc.max_power().await.unwrap(), 15.0 * WATT);
        tc.set_max_power(12.0 * WATT).await.unwrap();
        assert!(tc.set_max_power(-1.0).await.is_err());
        assert!(tc.set_max_power(20000.0).await.is_err());
        assert_eq!(tc.max_temperature().await.unwrap(), 200.0 * CELSIUS);
        tc.set_max_temperature(180.0 * CELSIUS).await.unwrap();
        assert!(tc.set_max_temperature(-1.0).await.is_err());
        assert!(tc.set_max_temperature(20000.0).await.is_err());
        check.assert_done();
    }
}
