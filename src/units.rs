//! Physical units and unit-bearing values.
//!
//! Instruments report numbers in whatever unit the vendor chose. Drivers
//! convert those into [`Quantity`] values so callers never have to remember
//! whether a source reports millivolts or volts.
//!
//! A [`Unit`] is a symbol plus a linear map into the base unit of its
//! [`Dimension`] (`base = value * scale + offset`). The offset only matters
//! for temperature scales.
//!
//! ```
//! use instrumentkit::units::{self, Quantity};
//!
//! let q = Quantity::new(1500.0, units::MILLIVOLT);
//! assert_eq!(q.to(units::VOLT).unwrap().value(), 1.5);
//! ```

use crate::error::{InstrumentError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Mul;

/// Physical dimension of a unit. Only units of equal dimension convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Dimensionless,
    Length,
    Time,
    Frequency,
    Voltage,
    Current,
    Resistance,
    Capacitance,
    Charge,
    Power,
    /// Logarithmic power (dBm); not convertible to watts.
    LogPower,
    Temperature,
    Angle,
    /// B field; tesla and gauss.
    MagneticFluxDensity,
    /// H field; ampere per meter and oersted.
    MagneticFieldStrength,
}

/// A named unit with its conversion into the base unit of its dimension.
#[derive(Debug, Clone, Copy)]
pub struct Unit {
    symbol: &'static str,
    dimension: Dimension,
    scale: f64,
    offset: f64,
}

impl Unit {
    /// Defines a unit `scale` times the base unit of `dimension`.
    pub const fn new(symbol: &'static str, dimension: Dimension, scale: f64) -> Self {
        Self {
            symbol,
            dimension,
            scale,
            offset: 0.0,
        }
    }

    const fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    pub fn symbol(&self) -> &'static str {
        self.symbol
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    fn to_base(self, value: f64) -> f64 {
        value * self.scale + self.offset
    }

    fn from_base(self, value: f64) -> f64 {
        (value - self.offset) / self.scale
    }

    /// Looks a unit up by symbol.
    ///
    /// Exact matches (including aliases such as `ohm` or `Ω`) win; otherwise
    /// the first case-insensitive match is used, since many instruments
    /// answer in upper case (`HZ`, `MV`).
    pub fn from_symbol(symbol: &str) -> Result<Unit> {
        let symbol = symbol.trim();
        if let Some(unit) = lookup_exact(symbol) {
            return Ok(unit);
        }
        REGISTRY
            .iter()
            .chain(ALIASES.iter().map(|(_, u)| u))
            .find(|u| u.symbol.eq_ignore_ascii_case(symbol))
            .or_else(|| {
                ALIASES
                    .iter()
                    .find(|(alias, _)| alias.eq_ignore_ascii_case(symbol))
                    .map(|(_, u)| u)
            })
            .copied()
            .ok_or_else(|| InstrumentError::parse(symbol, "unknown unit"))
    }
}

fn lookup_exact(symbol: &str) -> Option<Unit> {
    REGISTRY
        .iter()
        .find(|u| u.symbol == symbol)
        .or_else(|| ALIASES.iter().find(|(a, _)| *a == symbol).map(|(_, u)| u))
        .copied()
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.dimension == other.dimension
            && self.scale == other.scale
            && self.offset == other.offset
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol)
    }
}

pub const DIMENSIONLESS: Unit = Unit::new("", Dimension::Dimensionless, 1.0);
pub const PERCENT: Unit = Unit::new("percent", Dimension::Dimensionless, 0.01);

pub const VOLT: Unit = Unit::new("V", Dimension::Voltage, 1.0);
pub const KILOVOLT: Unit = Unit::new("kV", Dimension::Voltage, 1e3);
pub const MILLIVOLT: Unit = Unit::new("mV", Dimension::Voltage, 1e-3);
pub const MICROVOLT: Unit = Unit::new("uV", Dimension::Voltage, 1e-6);

pub const AMPERE: Unit = Unit::new("A", Dimension::Current, 1.0);
pub const MILLIAMPERE: Unit = Unit::new("mA", Dimension::Current, 1e-3);
pub const MICROAMPERE: Unit = Unit::new("uA", Dimension::Current, 1e-6);
pub const NANOAMPERE: Unit = Unit::new("nA", Dimension::Current, 1e-9);
pub const PICOAMPERE: Unit = Unit::new("pA", Dimension::Current, 1e-12);

pub const OHM: Unit = Unit::new("ohm", Dimension::Resistance, 1.0);
pub const KILOOHM: Unit = Unit::new("kohm", Dimension::Resistance, 1e3);
pub const MEGAOHM: Unit = Unit::new("Mohm", Dimension::Resistance, 1e6);
pub const GIGAOHM: Unit = Unit::new("Gohm", Dimension::Resistance, 1e9);

pub const FARAD: Unit = Unit::new("F", Dimension::Capacitance, 1.0);
pub const MICROFARAD: Unit = Unit::new("uF", Dimension::Capacitance, 1e-6);
pub const NANOFARAD: Unit = Unit::new("nF", Dimension::Capacitance, 1e-9);
pub const PICOFARAD: Unit = Unit::new("pF", Dimension::Capacitance, 1e-12);

pub const COULOMB: Unit = Unit::new("C", Dimension::Charge, 1.0);
pub const NANOCOULOMB: Unit = Unit::new("nC", Dimension::Charge, 1e-9);
pub const PICOCOULOMB: Unit = Unit::new("pC", Dimension::Charge, 1e-12);

pub const HERTZ: Unit = Unit::new("Hz", Dimension::Frequency, 1.0);
pub const KILOHERTZ: Unit = Unit::new("kHz", Dimension::Frequency, 1e3);
pub const MEGAHERTZ: Unit = Unit::new("MHz", Dimension::Frequency, 1e6);
pub const GIGAHERTZ: Unit = Unit::new("GHz", Dimension::Frequency, 1e9);

pub const SECOND: Unit = Unit::new("s", Dimension::Time, 1.0);
pub const MILLISECOND: Unit = Unit::new("ms", Dimension::Time, 1e-3);
pub const MICROSECOND: Unit = Unit::new("us", Dimension::Time, 1e-6);
pub const NANOSECOND: Unit = Unit::new("ns", Dimension::Time, 1e-9);
pub const PICOSECOND: Unit = Unit::new("ps", Dimension::Time, 1e-12);

pub const WATT: Unit = Unit::new("W", Dimension::Power, 1.0);
pub const MILLIWATT: Unit = Unit::new("mW", Dimension::Power, 1e-3);
pub const MICROWATT: Unit = Unit::new("uW", Dimension::Power, 1e-6);
pub const NANOWATT: Unit = Unit::new("nW", Dimension::Power, 1e-9);
pub const DBM: Unit = Unit::new("dBm", Dimension::LogPower, 1.0);

pub const KELVIN: Unit = Unit::new("K", Dimension::Temperature, 1.0);
pub const CELSIUS: Unit = Unit::new("degC", Dimension::Temperature, 1.0).with_offset(273.15);
pub const FAHRENHEIT: Unit =
    Unit::new("degF", Dimension::Temperature, 5.0 / 9.0).with_offset(459.67 * 5.0 / 9.0);

pub const METER: Unit = Unit::new("m", Dimension::Length, 1.0);
pub const MILLIMETER: Unit = Unit::new("mm", Dimension::Length, 1e-3);
pub const MICROMETER: Unit = Unit::new("um", Dimension::Length, 1e-6);
pub const NANOMETER: Unit = Unit::new("nm", Dimension::Length, 1e-9);
pub const INCH: Unit = Unit::new("in", Dimension::Length, 0.0254);
pub const MILLIINCH: Unit = Unit::new("mil", Dimension::Length, 2.54e-5);
pub const MICROINCH: Unit = Unit::new("uin", Dimension::Length, 2.54e-8);

pub const RADIAN: Unit = Unit::new("rad", Dimension::Angle, 1.0);
pub const MILLIRADIAN: Unit = Unit::new("mrad", Dimension::Angle, 1e-3);
pub const MICRORADIAN: Unit = Unit::new("urad", Dimension::Angle, 1e-6);
pub const DEGREE: Unit = Unit::new("deg", Dimension::Angle, std::f64::consts::PI / 180.0);
pub const GRADIAN: Unit = Unit::new("grad", Dimension::Angle, std::f64::consts::PI / 200.0);

pub const TESLA: Unit = Unit::new("T", Dimension::MagneticFluxDensity, 1.0);
pub const MILLITESLA: Unit = Unit::new("mT", Dimension::MagneticFluxDensity, 1e-3);
pub const GAUSS: Unit = Unit::new("G", Dimension::MagneticFluxDensity, 1e-4);
pub const KILOGAUSS: Unit = Unit::new("kG", Dimension::MagneticFluxDensity, 0.1);
pub const AMPERE_PER_METER: Unit = Unit::new("A/m", Dimension::MagneticFieldStrength, 1.0);
pub const OERSTED: Unit = Unit::new(
    "Oe",
    Dimension::MagneticFieldStrength,
    1000.0 / (4.0 * std::f64::consts::PI),
);

static REGISTRY: &[Unit] = &[
    VOLT, KILOVOLT, MILLIVOLT, MICROVOLT, AMPERE, MILLIAMPERE, MICROAMPERE, NANOAMPERE,
    PICOAMPERE, OHM, KILOOHM, MEGAOHM, GIGAOHM, FARAD, MICROFARAD, NANOFARAD, PICOFARAD,
    COULOMB, NANOCOULOMB, PICOCOULOMB, HERTZ, KILOHERTZ, MEGAHERTZ, GIGAHERTZ, SECOND,
    MILLISECOND, MICROSECOND, NANOSECOND, PICOSECOND, WATT, MILLIWATT, MICROWATT, NANOWATT,
    DBM, KELVIN, CELSIUS, FAHRENHEIT, METER, MILLIMETER, MICROMETER, NANOMETER, INCH,
    MILLIINCH, MICROINCH, RADIAN, MILLIRADIAN, MICRORADIAN, DEGREE, GRADIAN, PERCENT, TESLA,
    MILLITESLA, GAUSS, KILOGAUSS, AMPERE_PER_METER, OERSTED,
];

static ALIASES: &[(&str, Unit)] = &[
    ("Ω", OHM),
    ("kΩ", KILOOHM),
    ("MΩ", MEGAOHM),
    ("µV", MICROVOLT),
    ("µA", MICROAMPERE),
    ("µF", MICROFARAD),
    ("µs", MICROSECOND),
    ("µW", MICROWATT),
    ("µm", MICROMETER),
    ("sec", SECOND),
    ("degK", KELVIN),
    ("celsius", CELSIUS),
    ("fahrenheit", FAHRENHEIT),
    ("degree", DEGREE),
    ("degrees", DEGREE),
    ("gauss", GAUSS),
    ("tesla", TESLA),
    ("oersted", OERSTED),
    ("dimensionless", DIMENSIONLESS),
];

/// A magnitude paired with a unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    value: f64,
    unit: Unit,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    pub fn dimensionless(value: f64) -> Self {
        Self::new(value, DIMENSIONLESS)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// Converts into `unit`, failing if the dimensions differ.
    pub fn to(&self, unit: Unit) -> Result<Quantity> {
        if self.unit.dimension != unit.dimension {
            return Err(InstrumentError::Dimensionality {
                from: self.unit.symbol.to_string(),
                to: unit.symbol.to_string(),
            });
        }
        if self.unit == unit {
            return Ok(Quantity::new(self.value, unit));
        }
        Ok(Quantity::new(unit.from_base(self.unit.to_base(self.value)), unit))
    }

    /// The numeric value expressed in `unit`.
    pub fn magnitude_in(&self, unit: Unit) -> Result<f64> {
        self.to(unit).map(|q| q.value)
    }

    /// Parses strings such as `"10 mV"` or `"+1.5E-3"`.
    pub fn parse(s: &str, default_unit: Unit) -> Result<Quantity> {
        let (value, unit) = split_unit_str(s, default_unit)?;
        Ok(Quantity::new(value, unit))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.symbol.is_empty() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {}", self.value, self.unit.symbol)
        }
    }
}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let other = other.magnitude_in(self.unit).ok()?;
        self.value.partial_cmp(&other)
    }
}

impl Mul<Unit> for f64 {
    type Output = Quantity;

    fn mul(self, unit: Unit) -> Quantity {
        Quantity::new(self, unit)
    }
}

/// A setter argument: either a bare number in the property's default unit,
/// or a quantity that is converted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Magnitude {
    Bare(f64),
    Quantity(Quantity),
}

impl From<f64> for Magnitude {
    fn from(v: f64) -> Self {
        Magnitude::Bare(v)
    }
}

impl From<i32> for Magnitude {
    fn from(v: i32) -> Self {
        Magnitude::Bare(f64::from(v))
    }
}

impl From<Quantity> for Magnitude {
    fn from(q: Quantity) -> Self {
        Magnitude::Quantity(q)
    }
}

impl Magnitude {
    /// Attaches `unit` to a bare number; quantities are left untouched.
    pub fn with_default_unit(self, unit: Unit) -> Quantity {
        match self {
            Magnitude::Bare(v) => Quantity::new(v, unit),
            Magnitude::Quantity(q) => q,
        }
    }
}

/// Returns the value of `value` in `unit`, treating bare numbers as already
/// being in `unit`.
pub fn assume_units(value: impl Into<Magnitude>, unit: Unit) -> Result<f64> {
    value.into().with_default_unit(unit).magnitude_in(unit)
}

/// Converts a temperature (bare numbers are degrees Celsius) into `base`.
pub fn convert_temperature(value: impl Into<Magnitude>, base: Unit) -> Result<Quantity> {
    let q = value.into().with_default_unit(CELSIUS);
    if base.dimension != Dimension::Temperature {
        return Err(InstrumentError::Dimensionality {
            from: q.unit.symbol.to_string(),
            to: base.symbol.to_string(),
        });
    }
    q.to(base)
}

#[allow(clippy::unwrap_used)]
static UNIT_STR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([-+]?[0-9]*\.?[0-9]+)([eE][-+]?[0-9]+)?\s*([a-zµΩ]+)?").unwrap()
});

/// Splits a reply like `"4.2 mA"` into a value and a unit.
///
/// A reply with no unit suffix gets `default_unit`. Trailing text after the
/// unit is ignored.
pub fn split_unit_str(s: &str, default_unit: Unit) -> Result<(f64, Unit)> {
    let trimmed = s.trim();
    if let Some(caps) = UNIT_STR.captures(trimmed) {
        let mantissa = caps.get(1).map_or("", |m| m.as_str());
        let exponent = caps.get(2).map_or("", |m| m.as_str());
        let number = format!("{mantissa}{exponent}");
        let value: f64 = number
            .parse()
            .map_err(|e| InstrumentError::parse(trimmed, e))?;
        let unit = match caps.get(3) {
            Some(m) => Unit::from_symbol(m.as_str())?,
            None => default_unit,
        };
        return Ok((value, unit));
    }
    trimmed.parse::<f64>().map(|v| (v, default_unit)).map_err(|_| {
        InstrumentError::parse(
            trimmed,
            format!("Could not split '{trimmed}' into value and units."),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9 * a.abs().max(1.0)
    }

    #[test]
    fn test_split_unit_str_plain_number() {
        let (v, u) = split_unit_str("42", VOLT).unwrap();
        assert_eq!(v, 42.0);
        assert_eq!(u, VOLT);
    }

    #[test]
    fn test_split_unit_str_with_exponent_and_unit() {
        let (v, u) = split_unit_str("+1.0E+01 mV", VOLT).unwrap();
        assert!(close(v, 10.0));
        assert_eq!(u, MILLIVOLT);

        let (v, u) = split_unit_str("  -3.5e-2HZ ", VOLT).unwrap();
        assert!(close(v, -0.035));
        assert_eq!(u, HERTZ);
    }

    #[test]
    fn test_split_unit_str_ignores_trailing_text() {
        let (v, u) = split_unit_str("1.5 ns,3", SECOND).unwrap();
        assert_eq!(v, 1.5);
        assert_eq!(u, NANOSECOND);
    }

    #[test]
    fn test_split_unit_str_rejects_garbage() {
        let err = split_unit_str("foobar", VOLT).unwrap_err();
        assert!(matches!(err, InstrumentError::Parse { .. }));
    }

    #[test]
    fn test_conversion() {
        let q = 2.5 * KILOHERTZ;
        assert!(close(q.magnitude_in(HERTZ).unwrap(), 2500.0));
        assert!(q.to(VOLT).is_err());
    }

    #[test]
    fn test_temperature_offsets() {
        let q = convert_temperature(100.0, KELVIN).unwrap();
        assert!(close(q.value(), 373.15));
        let f = convert_temperature(Quantity::new(212.0, FAHRENHEIT), CELSIUS).unwrap();
        assert!(close(f.value(), 100.0));
        let k = Quantity::new(0.0, KELVIN).to(FAHRENHEIT).unwrap();
        assert!(close(k.value(), -459.67));
    }

    #[test]
    fn test_assume_units() {
        assert_eq!(assume_units(5.0, VOLT).unwrap(), 5.0);
        assert!(close(assume_units(5.0 * MILLIVOLT, VOLT).unwrap(), 0.005));
        assert!(assume_units(5.0 * AMPERE, VOLT).is_err());
    }

    #[test]
    fn test_ordering_across_units() {
        assert!(1.0 * VOLT > 999.0 * MILLIVOLT);
        assert!((1.0 * VOLT).partial_cmp(&(1.0 * AMPERE)).is_none());
    }

    #[test]
    fn test_symbol_lookup() {
        assert_eq!(Unit::from_symbol("Ω").unwrap(), OHM);
        assert_eq!(Unit::from_symbol("mv").unwrap(), MILLIVOLT);
        assert_eq!(Unit::from_symbol("MHz").unwrap(), MEGAHERTZ);
        assert!(Unit::from_symbol("parsec").is_err());
    }
}
