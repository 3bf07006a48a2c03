//! Thorlabs PM100USB optical power meter.

use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::generic_scpi::ScpiInstrument;
use crate::property::{parse_float, parse_int, EnumProperty};
use crate::units::{Quantity, Unit, AMPERE, DIMENSIONLESS, HERTZ, VOLT, WATT};
use crate::Instrument;
use async_trait::async_trait;
use tracing::debug;

crate::scpi_enum! {
    pub enum MeasurementConfiguration {
        Current => "CURR",
        Power => "POW",
        Voltage => "VOLT",
        Energy => "ENER",
        Frequency => "FREQ",
        PowerDensity => "PDEN",
        EnergyDensity => "EDEN",
        Resistance => "RES",
        Temperature => "TEMP",
    }
}

impl MeasurementConfiguration {
    /// Unit attached to `READ?` results in this configuration.
    pub fn read_unit(self) -> Unit {
        match self {
            Self::Power => WATT,
            Self::Current => AMPERE,
            Self::Frequency => HERTZ,
            Self::Voltage => VOLT,
            _ => DIMENSIONLESS,
        }
    }
}

/// Capability bits reported by the connected sensor head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorFlags {
    pub is_power_sensor: bool,
    pub is_energy_sensor: bool,
    pub response_settable: bool,
    pub wavelength_settable: bool,
    pub tau_settable: bool,
    pub has_temperature_sensor: bool,
}

impl SensorFlags {
    pub fn from_bits(bits: i64) -> Self {
        Self {
            is_power_sensor: bits & 1 != 0,
            is_energy_sensor: bits & 2 != 0,
            response_settable: bits & 16 != 0,
            wavelength_settable: bits & 32 != 0,
            tau_settable: bits & 64 != 0,
            has_temperature_sensor: bits & 256 != 0,
        }
    }
}

/// Identification of the connected sensor, from `SYST:SENSOR:IDN?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorInfo {
    pub name: String,
    pub serial_number: String,
    pub calibration_message: String,
    pub sensor_type: String,
    pub sensor_subtype: String,
    pub flags: SensorFlags,
}

impl SensorInfo {
    fn parse(reply: &str) -> Result<Self> {
        let fields: Vec<&str> = reply.split(',').map(str::trim).collect();
        let [name, serial, cal, ty, subtype, flags] = fields.as_slice() else {
            return Err(InstrumentError::parse(reply, "expected six sensor fields"));
        };
        Ok(Self {
            name: name.to_string(),
            serial_number: serial.to_string(),
            calibration_message: cal.to_string(),
            sensor_type: ty.to_string(),
            sensor_subtype: subtype.to_string(),
            flags: SensorFlags::from_bits(parse_int(flags)?),
        })
    }
}

const CONFIGURATION: EnumProperty<MeasurementConfiguration> = EnumProperty::new("CONF");

/// Thorlabs PM100USB.
///
/// Each [`read`](Pm100usb::read) normally asks the meter for its measurement
/// configuration to pick the unit. With [`set_cache_units`](Pm100usb::set_cache_units)
/// the unit is fetched once and reused, halving the round trips. Cached
/// units go stale if the configuration is changed from the front panel.
pub struct Pm100usb {
    inst: Instrument,
    cached_unit: Option<Unit>,
}

impl Pm100usb {
    pub const MODEL: &'static str = "PM100USB";

    pub fn cache_units(&self) -> bool {
        self.cached_unit.is_some()
    }

    pub async fn set_cache_units(&mut self, enabled: bool) -> Result<()> {
        self.cached_unit = if enabled {
            Some(self.measurement_configuration().await?.read_unit())
        } else {
            None
        };
        Ok(())
    }

    /// Information about the connected sensor head.
    pub async fn sensor(&mut self) -> Result<SensorInfo> {
        self.inst
            .query_parse("SYST:SENSOR:IDN?", SensorInfo::parse)
            .await
    }

    pub async fn measurement_configuration(&mut self) -> Result<MeasurementConfiguration> {
        CONFIGURATION.get(&mut self.inst).await
    }

    /// Also refreshes the cached unit when caching is on.
    pub async fn set_measurement_configuration(
        &mut self,
        conf: MeasurementConfiguration,
    ) -> Result<()> {
        CONFIGURATION.set(&mut self.inst, conf).await?;
        if self.cached_unit.is_some() {
            self.cached_unit = Some(conf.read_unit());
        }
        Ok(())
    }

    /// Samples averaged per measurement, about 3 ms each.
    pub async fn averaging_count(&mut self) -> Result<i64> {
        self.inst.query_parse("SENS:AVER:COUN?", parse_int).await
    }

    pub async fn set_averaging_count(&mut self, count: i64) -> Result<()> {
        if count < 1 {
            return Err(InstrumentError::OutOfRange(
                "Must count at least one time.".to_string(),
            ));
        }
        self.inst.sendcmd(&format!("SENS:AVER:COUN {count}")).await
    }

    /// Takes one measurement in the current configuration's unit.
    pub async fn read(&mut self) -> Result<Quantity> {
        let unit = match self.cached_unit {
            Some(unit) => unit,
            None => self.measurement_configuration().await?.read_unit(),
        };
        let value = self.inst.query_parse("READ?", parse_float).await?;
        debug!(value, unit = %unit, "PM100USB reading");
        Ok(Quantity::new(value, unit))
    }
}

#[async_trait]
impl OpenInstrument for Pm100usb {
    async fn open(inst: Instrument) -> Result<Self> {
        Ok(Self {
            inst,
            cached_unit: None,
        })
    }
}

#[async_trait]
impl Driver for Pm100usb {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        match path.simple() {
            Some("measurement_configuration") => {
                self.set_measurement_configuration(value.as_enum()?).await
            }
            Some("averaging_count") => self.set_averaging_count(value.as_i64()?).await,
            Some("cache_units") => self.set_cache_units(value.as_bool()?).await,
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

impl ScpiInstrument for Pm100usb {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{expected_protocol, ProtocolCheck};

    async fn pm(host: &[&str], ins: &[&str]) -> (Pm100usb, ProtocolCheck) {
        let (inst, check) = expected_protocol(host, ins, "\n");
        (Pm100usb::open(inst).await.unwrap(), check)
    }

    #[tokio::test]
    async fn test_sensor() {
        let (mut pm, check) = pm(
            &["SYST:SENSOR:IDN?"],
            &["S120C,12345,01-JAN-2020,1,18,273"],
        )
        .await;
        let sensor = pm.sensor().await.unwrap();
        assert_eq!(sensor.name, "S120C");
        assert_eq!(sensor.serial_number, "12345");
        assert_eq!(sensor.calibration_message, "01-JAN-2020");
        assert_eq!(sensor.sensor_type, "1");
        assert_eq!(sensor.sensor_subtype, "18");
        assert_eq!(
            sensor.flags,
            SensorFlags {
                is_power_sensor: true,
                is_energy_sensor: false,
                response_settable: true,
                wavelength_settable: false,
                tau_settable: false,
                has_temperature_sensor: true,
            }
        );
        check.assert_done();
    }

    #[tokio::test]
    async fn test_measurement_configuration() {
        let (mut pm, check) = pm(&["CONF?", "CONF FREQ"], &["POW"]).await;
        assert_eq!(
            pm.measurement_configuration().await.unwrap(),
            MeasurementConfiguration::Power
        );
        pm.set_measurement_configuration(MeasurementConfiguration::Frequency)
            .await
            .unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_averaging_count() {
        let (mut pm, check) = pm(&["SENS:AVER:COUN?", "SENS:AVER:COUN 10"], &["5"]).await;
        assert_eq!(pm.averaging_count().await.unwrap(), 5);
        pm.set_averaging_count(10).await.unwrap();
        let err = pm.set_averaging_count(0).await.unwrap_err();
        assert_eq!(err.to_string(), "Must count at least one time.");
        check.assert_done();
    }

    #[tokio::test]
    async fn test_read_queries_units() {
        let (mut pm, check) = pm(
            &["CONF?", "READ?", "CONF?", "READ?"],
            &["POW", "1.5e-3", "TEMP", "21.5"],
        )
        .await;
        assert_eq!(pm.read().await.unwrap(), 1.5e-3 * WATT);
        assert_eq!(pm.read().await.unwrap(), Quantity::dimensionless(21.5));
        check.assert_done();
    }

    #[tokio::test]
    async fn test_read_with_cached_units() {
        let (mut pm, check) = pm(
            &["CONF?", "READ?", "READ?", "CONF CURR", "READ?"],
            &["VOLT", "1", "2", "3"],
        )
        .await;
        pm.set_cache_units(true).await.unwrap();
        assert!(pm.cache_units());
        assert_eq!(pm.read().await.unwrap(), 1.0 * VOLT);
        assert_eq!(pm.read().await.unwrap(), 2.0 * VOLT);
        pm.set_measurement_configuration(MeasurementConfiguration::Current)
            .await
            .unwrap();
        assert_eq!(pm.read().await.unwrap(), 3.0 * AMPERE);
        pm.set_cache_units(false).await.unwrap();
        assert!(!pm.cache_units());
        check.assert_done();
    }
}
