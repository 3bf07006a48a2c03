//! Lakeshore 475 DSP gaussmeter.
//!
//! Field readings and the control setpoint are reported in whatever field
//! units the meter is currently set to, so most getters ask for `UNIT?`
//! after the value itself.

use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::generic_scpi::ScpiInstrument;
use crate::property::{format_float, parse_float, parse_int, BoolProperty};
use crate::units::{
    Magnitude, Quantity, Unit, AMPERE_PER_METER, CELSIUS, GAUSS, KELVIN, OERSTED, TESLA, VOLT,
};
use crate::Instrument;
use async_trait::async_trait;

const FIELD_UNITS: [(i64, Unit); 4] = [(1, GAUSS), (2, TESLA), (3, OERSTED), (4, AMPERE_PER_METER)];
const TEMP_UNITS: [(i64, Unit); 2] = [(1, CELSIUS), (2, KELVIN)];

const CONTROL_MODE: BoolProperty = BoolProperty::new("CMODE").values("1", "0");

crate::scpi_enum! {
    pub enum Lakeshore475Mode {
        Dc => "1",
        Rms => "2",
        Peak => "3",
    }
}

crate::scpi_enum! {
    pub enum Lakeshore475Filter {
        Wide => "1",
        Narrow => "2",
        Lowpass => "3",
    }
}

crate::scpi_enum! {
    pub enum Lakeshore475PeakMode {
        Periodic => "1",
        Pulse => "2",
    }
}

crate::scpi_enum! {
    pub enum Lakeshore475PeakDisplay {
        Positive => "1",
        Negative => "2",
        Both => "3",
    }
}

/// Parameters of the field control ramp.
///
/// `ramp_rate` is a field change per minute, in the field units active
/// when the parameters were read. `control_slope_limit` is a voltage
/// change per minute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldControlParams {
    pub p: f64,
    pub i: f64,
    pub ramp_rate: Quantity,
    pub control_slope_limit: Quantity,
}

fn unit_for_code(table: &[(i64, Unit)], code: i64, reply: &str) -> Result<Unit> {
    table
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, u)| *u)
        .ok_or_else(|| InstrumentError::parse(reply, "unknown unit code"))
}

fn code_for_unit(table: &[(i64, Unit)], unit: Unit) -> Option<i64> {
    table.iter().find(|(_, u)| *u == unit).map(|(c, _)| *c)
}

/// Lakeshore 475.
pub struct Lakeshore475 {
    inst: Instrument,
}

impl Lakeshore475 {
    pub const MODEL: &'static str = "Lakeshore475";

    /// Field reading in the current field units.
    pub async fn field(&mut self) -> Result<Quantity> {
        let value = self.inst.query_parse("RDGFIELD?", parse_float).await?;
        Ok(Quantity::new(value, self.field_units().await?))
    }

    /// One of gauss, tesla, oersted or ampere per meter.
    pub async fn field_units(&mut self) -> Result<Unit> {
        let reply = self.inst.query("UNIT?").await?;
        unit_for_code(&FIELD_UNITS, parse_int(&reply)?, &reply)
    }

    pub async fn set_field_units(&mut self, unit: Unit) -> Result<()> {
        let code = code_for_unit(&FIELD_UNITS, unit).ok_or_else(|| {
            InstrumentError::InvalidValue(format!("{unit} is not an acceptable field unit."))
        })?;
        self.inst.sendcmd(&format!("UNIT {code}")).await
    }

    /// Either degrees Celsius or kelvin.
    pub async fn temp_units(&mut self) -> Result<Unit> {
        let reply = self.inst.query("TUNIT?").await?;
        unit_for_code(&TEMP_UNITS, parse_int(&reply)?, &reply)
    }

    pub async fn set_temp_units(&mut self, unit: Unit) -> Result<()> {
        let code = code_for_unit(&TEMP_UNITS, unit).ok_or_else(|| {
            InstrumentError::InvalidValue(format!("{unit} is not an acceptable temperature unit."))
        })?;
        self.inst.sendcmd(&format!("TUNIT {code}")).await
    }

    /// Final setpoint of the field control ramp.
    pub async fn field_setpoint(&mut self) -> Result<Quantity> {
        let value = self.inst.query_parse("CSETP?", parse_float).await?;
        Ok(Quantity::new(value, self.field_units().await?))
    }

    /// Bare numbers are gauss. The setpoint must be given in the current
    /// field units; it is not converted.
    pub async fn set_field_setpoint(&mut self, setpoint: impl Into<Magnitude> + Send) -> Result<()> {
        let expected = self.field_units().await?;
        let setpoint = setpoint.into().with_default_unit(GAUSS);
        if setpoint.unit() != expected {
            return Err(InstrumentError::InvalidValue(format!(
                "Field setpoint must be specified in the same units that the field \
                 units are currently set to. Attempts units of {}, currently expecting {expected}.",
                setpoint.unit()
            )));
        }
        self.inst
            .sendcmd(&format!("CSETP {}", format_float(setpoint.value())))
            .await
    }

    pub async fn field_control_params(&mut self) -> Result<FieldControlParams> {
        let reply = self.inst.query("CPARAM?").await?;
        let values = reply
            .trim()
            .split(',')
            .map(parse_float)
            .collect::<Result<Vec<_>>>()?;
        let [p, i, ramp_rate, slope] = values.as_slice() else {
            return Err(InstrumentError::parse(&reply, "expected four control parameters"));
        };
        Ok(FieldControlParams {
            p: *p,
            i: *i,
            ramp_rate: Quantity::new(*ramp_rate, self.field_units().await?),
            control_slope_limit: Quantity::new(*slope, VOLT),
        })
    }

    /// The ramp rate must be in the current field units; the slope limit is
    /// converted to volts.
    pub async fn set_field_control_params(&mut self, params: FieldControlParams) -> Result<()> {
        let expected = self.field_units().await?;
        if params.ramp_rate.unit() != expected {
            return Err(InstrumentError::InvalidValue(format!(
                "Field control params ramp rate must be specified in the same units that \
                 the field units are currently set to, per minute. Attempts units of {}, \
                 currently expecting {expected}.",
                params.ramp_rate.unit()
            )));
        }
        let slope = params.control_slope_limit.magnitude_in(VOLT)?;
        let cmd = format!(
            "CPARAM {},{},{},{}",
            format_float(params.p),
            format_float(params.i),
            format_float(params.ramp_rate.value()),
            format_float(slope)
        );
        self.inst.sendcmd(&cmd).await
    }

    pub async fn p_value(&mut self) -> Result<f64> {
        Ok(self.field_control_params().await?.p)
    }

    pub async fn set_p_value(&mut self, p: f64) -> Result<()> {
        let params = self.field_control_params().await?;
        self.set_field_control_params(FieldControlParams { p, ..params })
            .await
    }

    pub async fn i_value(&mut self) -> Result<f64> {
        Ok(self.field_control_params().await?.i)
    }

    pub async fn set_i_value(&mut self, i: f64) -> Result<()> {
        let params = self.field_control_params().await?;
        self.set_field_control_params(FieldControlParams { i, ..params })
            .await
    }

    /// Field change per minute.
    pub async fn ramp_rate(&mut self) -> Result<Quantity> {
        Ok(self.field_control_params().await?.ramp_rate)
    }

    /// Bare numbers are in the current field units per minute; quantities
    /// are converted to them.
    pub async fn set_ramp_rate(&mut self, rate: impl Into<Magnitude> + Send) -> Result<()> {
        let params = self.field_control_params().await?;
        let unit = params.ramp_rate.unit();
        let ramp_rate = rate.into().with_default_unit(unit).to(unit)?;
        self.set_field_control_params(FieldControlParams { ramp_rate, ..params })
            .await
    }

    /// Voltage change per minute.
    pub async fn control_slope_limit(&mut self) -> Result<Quantity> {
        Ok(self.field_control_params().await?.control_slope_limit)
    }

    pub async fn set_control_slope_limit(&mut self, limit: impl Into<Magnitude> + Send) -> Result<()> {
        let params = self.field_control_params().await?;
        let control_slope_limit = limit.into().with_default_unit(VOLT).to(VOLT)?;
        self.set_field_control_params(FieldControlParams {
            control_slope_limit,
            ..params
        })
        .await
    }

    /// True while closed-loop field control is on.
    pub async fn control_mode(&mut self) -> Result<bool> {
        CONTROL_MODE.get(&mut self.inst).await
    }

    pub async fn set_control_mode(&mut self, on: bool) -> Result<()> {
        CONTROL_MODE.set(&mut self.inst, on).await
    }

    /// `resolution` is the number of displayed digits, 3 to 5.
    pub async fn change_measurement_mode(
        &mut self,
        mode: Lakeshore475Mode,
        resolution: u8,
        filter: Lakeshore475Filter,
        peak_mode: Lakeshore475PeakMode,
        peak_display: Lakeshore475PeakDisplay,
    ) -> Result<()> {
        if !(3..=5).contains(&resolution) {
            return Err(InstrumentError::InvalidValue(
                "Only 3,4,5 are valid resolutions.".to_string(),
            ));
        }
        let cmd = format!(
            "RDGMODE {mode},{},{filter},{peak_mode},{peak_display}",
            resolution - 2
        );
        self.inst.sendcmd(&cmd).await
    }
}

#[async_trait]
impl OpenInstrument for Lakeshore475 {
    async fn open(inst: Instrument) -> Result<Self> {
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for Lakeshore475 {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        match path.simple() {
            Some("field_units") => self.set_field_units(Unit::from_symbol(value.as_str()?)?).await,
            Some("temp_units") => self.set_temp_units(Unit::from_symbol(value.as_str()?)?).await,
            Some("field_setpoint") => self.set_field_setpoint(value.as_magnitude()?).await,
            Some("p_value") => self.set_p_value(value.as_f64()?).await,
            Some("i_value") => self.set_i_value(value.as_f64()?).await,
            Some("ramp_rate") => self.set_ramp_rate(value.as_magnitude()?).await,
            Some("control_slope_limit") => self.set_control_slope_limit(value.as_magnitude()?).await,
            Some("control_mode") => self.set_control_mode(value.as_bool()?).await,
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

impl ScpiInstrument for Lakeshore475 {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{expected_protocol, ProtocolCheck};
    use crate::units::{MILLITESLA, MILLIVOLT};

    const PARAMS: &str = "+1.0E+0,+1.0E+1,+4.2E+1,+1.0E+2";

    async fn gaussmeter(host: &[&str], ins: &[&str]) -> (Lakeshore475, ProtocolCheck) {
        let (inst, check) = expected_protocol(host, ins, "\n");
        (Lakeshore475::open(inst).await.unwrap(), check)
    }

    #[tokio::test]
    async fn test_field_is_in_current_units() {
        let (mut ls, check) = gaussmeter(&["RDGFIELD?", "UNIT?"], &["200.", "2"]).await;
        assert_eq!(ls.field().await.unwrap(), 200.0 * TESLA);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_field_and_temp_units() {
        let (mut ls, check) = gaussmeter(
            &["UNIT?", "UNIT 2", "TUNIT?", "TUNIT 2"],
            &["3", "1"],
        )
        .await;
        assert_eq!(ls.field_units().await.unwrap(), OERSTED);
        ls.set_field_units(TESLA).await.unwrap();
        assert_eq!(ls.temp_units().await.unwrap(), CELSIUS);
        ls.set_temp_units(KELVIN).await.unwrap();
        assert!(matches!(
            ls.set_field_units(MILLITESLA).await.unwrap_err(),
            InstrumentError::InvalidValue(_)
        ));
        assert!(ls.set_temp_units(VOLT).await.is_err());
        check.assert_done();
    }

    #[tokio::test]
    async fn test_field_setpoint() {
        let (mut ls, check) = gaussmeter(
            &["CSETP?", "UNIT?", "UNIT?", "CSETP 1.0", "UNIT?", "CSETP 23.0"],
            &["10.", "1", "2", "1"],
        )
        .await;
        assert_eq!(ls.field_setpoint().await.unwrap(), 10.0 * GAUSS);
        ls.set_field_setpoint(1.0 * TESLA).await.unwrap();
        ls.set_field_setpoint(23.0).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_field_setpoint_rejects_other_units() {
        let (mut ls, check) = gaussmeter(&["UNIT?"], &["1"]).await;
        let err = ls.set_field_setpoint(1.0 * TESLA).await.unwrap_err();
        assert!(err.to_string().contains("Field setpoint must be specified in the same units"));
        check.assert_done();
    }

    #[tokio::test]
    async fn test_field_control_params() {
        let (mut ls, check) = gaussmeter(
            &["CPARAM?", "UNIT?", "UNIT?", "CPARAM 5.0,50.0,120.0,60.0"],
            &[PARAMS, "2", "2"],
        )
        .await;
        let params = ls.field_control_params().await.unwrap();
        assert_eq!(
            params,
            FieldControlParams {
                p: 1.0,
                i: 10.0,
                ramp_rate: 42.0 * TESLA,
                control_slope_limit: 100.0 * VOLT,
            }
        );
        ls.set_field_control_params(FieldControlParams {
            p: 5.0,
            i: 50.0,
            ramp_rate: 120.0 * TESLA,
            control_slope_limit: 60.0 * VOLT,
        })
        .await
        .unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_control_params_ramp_rate_must_match_field_units() {
        let (mut ls, check) = gaussmeter(&["UNIT?"], &["1"]).await;
        let err = ls
            .set_field_control_params(FieldControlParams {
                p: 5.0,
                i: 50.0,
                ramp_rate: 120.0 * TESLA,
                control_slope_limit: 60.0 * VOLT,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ramp rate must be specified"));
        check.assert_done();
    }

    #[tokio::test]
    async fn test_p_and_i_values() {
        let (mut ls, check) = gaussmeter(
            &[
                "CPARAM?",
                "UNIT?",
                "CPARAM?",
                "UNIT?",
                "UNIT?",
                "CPARAM 5.0,10.0,42.0,100.0",
                "CPARAM?",
                "UNIT?",
                "CPARAM?",
                "UNIT?",
                "UNIT?",
                "CPARAM 1.0,5.0,42.0,100.0",
            ],
            &[PARAMS, "2", PARAMS, "2", "2", PARAMS, "2", PARAMS, "2", "2"],
        )
        .await;
        assert_eq!(ls.p_value().await.unwrap(), 1.0);
        ls.set_p_value(5.0).await.unwrap();
        assert_eq!(ls.i_value().await.unwrap(), 10.0);
        ls.set_i_value(5.0).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_ramp_rate_converts_to_field_units() {
        let (mut ls, check) = gaussmeter(
            &[
                "CPARAM?",
                "UNIT?",
                "CPARAM?",
                "UNIT?",
                "UNIT?",
                "CPARAM 1.0,10.0,0.5,100.0",
                "CPARAM?",
                "UNIT?",
                "UNIT?",
                "CPARAM 1.0,10.0,420.0,100.0",
            ],
            &[PARAMS, "2", PARAMS, "2", "2", PARAMS, "2", "2"],
        )
        .await;
        assert_eq!(ls.ramp_rate().await.unwrap(), 42.0 * TESLA);
        ls.set_ramp_rate(500.0 * MILLITESLA).await.unwrap();
        ls.set_ramp_rate(420.0).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_control_slope_limit_is_sent() {
        let (mut ls, check) = gaussmeter(
            &[
                "CPARAM?",
                "UNIT?",
                "CPARAM?",
                "UNIT?",
                "UNIT?",
                "CPARAM 1.0,10.0,42.0,42.0",
                "CPARAM?",
                "UNIT?",
                "UNIT?",
                "CPARAM 1.0,10.0,42.0,42.0",
            ],
            &[PARAMS, "2", PARAMS, "2", "2", PARAMS, "2", "2"],
        )
        .await;
        assert_eq!(ls.control_slope_limit().await.unwrap(), 100.0 * VOLT);
        ls.set_control_slope_limit(42000.0 * MILLIVOLT).await.unwrap();
        ls.set_control_slope_limit(42.0).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_control_mode() {
        let (mut ls, check) = gaussmeter(&["CMODE?", "CMODE 1"], &["0"]).await;
        assert!(!ls.control_mode().await.unwrap());
        ls.set_control_mode(true).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_change_measurement_mode() {
        let (mut ls, check) = gaussmeter(&["RDGMODE 1,2,3,2,1"], &[]).await;
        ls.change_measurement_mode(
            Lakeshore475Mode::Dc,
            4,
            Lakeshore475Filter::Lowpass,
            Lakeshore475PeakMode::Pulse,
            Lakeshore475PeakDisplay::Positive,
        )
        .await
        .unwrap();
        let err = ls
            .change_measurement_mode(
                Lakeshore475Mode::Rms,
                6,
                Lakeshore475Filter::Wide,
                Lakeshore475PeakMode::Periodic,
                Lakeshore475PeakDisplay::Both,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InstrumentError::InvalidValue(_)));
        check.assert_done();
    }
}
