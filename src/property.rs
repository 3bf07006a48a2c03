//! Declarative property descriptors.
//!
//! Most instrument settings follow one of a handful of shapes: query
//! `CMD?` and parse the reply, write `CMD value`. Drivers declare those as
//! `const` descriptors and forward to them:
//!
//! ```
//! use instrumentkit::property::{BoolProperty, UnitfulProperty};
//! use instrumentkit::units::HERTZ;
//!
//! const OUTPUT: BoolProperty = BoolProperty::new("OUTP");
//! const FREQUENCY: UnitfulProperty = UnitfulProperty::new("FREQ", HERTZ).fixed_range(0.0, 30e6);
//! ```
//!
//! Every getter goes through [`Instrument::query_parse`], so a garbled
//! reply is retried once before an error surfaces. Setters validate
//! before anything is written.

use crate::error::{InstrumentError, Result};
use crate::units::{assume_units, split_unit_str, Magnitude, Quantity, Unit, DIMENSIONLESS};
use crate::Instrument;
use std::fmt;
use std::marker::PhantomData;

/// An enum whose variants map to fixed wire mnemonics.
///
/// Usually implemented through [`scpi_enum!`](crate::scpi_enum).
pub trait ScpiEnum: Sized + Copy + Send + Sync + 'static {
    fn mnemonic(&self) -> &'static str;

    /// Variant name as written in Rust, e.g. `Voltage1`.
    fn name(&self) -> &'static str;

    fn variants() -> &'static [Self];

    fn from_mnemonic(s: &str) -> Option<Self> {
        Self::variants().iter().copied().find(|v| v.mnemonic() == s)
    }

    /// Looks a variant up by name, ignoring case and underscores, so that
    /// `voltage1`, `Voltage1` and `VOLTAGE_1` all match `Voltage1`.
    fn from_name(s: &str) -> Option<Self> {
        let wanted = normalize_name(s);
        Self::variants()
            .iter()
            .copied()
            .find(|v| normalize_name(v.name()) == wanted)
    }

    /// Like [`from_mnemonic`](ScpiEnum::from_mnemonic), with a parse error
    /// naming the reply.
    fn parse_mnemonic(s: &str) -> Result<Self> {
        Self::from_mnemonic(s).ok_or_else(|| {
            let allowed: Vec<_> = Self::variants().iter().map(|v| v.mnemonic()).collect();
            InstrumentError::parse(s, format!("expected one of {allowed:?}"))
        })
    }
}

fn normalize_name(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Declares an enum of wire mnemonics and implements [`ScpiEnum`] and
/// `Display` for it.
///
/// ```
/// instrumentkit::scpi_enum! {
///     /// Output coupling.
///     pub enum Coupling {
///         Ac => "AC",
///         Dc => "DC",
///     }
/// }
/// ```
#[macro_export]
macro_rules! scpi_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $mnemonic:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $crate::property::ScpiEnum for $name {
            fn mnemonic(&self) -> &'static str {
                match self {
                    $(Self::$variant => $mnemonic),+
                }
            }

            fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant)),+
                }
            }

            fn variants() -> &'static [Self] {
                &[$(Self::$variant),+]
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::property::ScpiEnum::mnemonic(self))
            }
        }
    };
}

/// How a setter joins the command and the value.
#[derive(Clone, Copy)]
pub enum SetFmt {
    /// `CMD value`
    Space,
    /// `cmd=value`
    Equals,
    Custom(fn(&str, &str) -> String),
}

impl SetFmt {
    pub fn apply(&self, command: &str, value: &str) -> String {
        match self {
            SetFmt::Space => format!("{command} {value}"),
            SetFmt::Equals => format!("{command}={value}"),
            SetFmt::Custom(f) => f(command, value),
        }
    }
}

/// Number formatting for setters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumFmt {
    /// `1.000000e+03`
    Sci,
    /// Fixed number of decimals.
    Fixed(usize),
    /// Shortest round-trip form, always with a decimal point: `1000.0`.
    Float,
    /// Six significant digits, trailing zeros dropped: `1000`.
    General,
}

impl NumFmt {
    pub fn format(&self, v: f64) -> String {
        match self {
            NumFmt::Sci => format_sci(v),
            NumFmt::Fixed(n) => format_fixed(v, *n),
            NumFmt::Float => format_float(v),
            NumFmt::General => format_general(v),
        }
    }
}

fn exponent_form(mantissa: &str, exp: &str) -> String {
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exp.abs())
}

fn nonfinite(v: f64) -> Option<String> {
    if v.is_nan() {
        Some("nan".to_string())
    } else if v.is_infinite() {
        Some(if v > 0.0 { "inf" } else { "-inf" }.to_string())
    } else {
        None
    }
}

/// Scientific notation with six decimals and a signed two-digit exponent.
pub fn format_sci(v: f64) -> String {
    if let Some(s) = nonfinite(v) {
        return s;
    }
    let s = format!("{v:.6e}");
    match s.split_once('e') {
        Some((m, e)) => exponent_form(m, e),
        None => s,
    }
}

pub fn format_fixed(v: f64, decimals: usize) -> String {
    format!("{v:.decimals$}")
}

/// Shortest representation that round-trips, switching to exponent form
/// outside `1e-4..1e16`.
pub fn format_float(v: f64) -> String {
    if let Some(s) = nonfinite(v) {
        return s;
    }
    let abs = v.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let s = format!("{v:e}");
        return match s.split_once('e') {
            Some((m, e)) => exponent_form(m, e),
            None => s,
        };
    }
    if v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Six significant digits with trailing zeros removed.
pub fn format_general(v: f64) -> String {
    if let Some(s) = nonfinite(v) {
        return s;
    }
    if v == 0.0 {
        return "0".to_string();
    }
    let sci = format!("{v:.5e}");
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    if !(-4..6).contains(&exp) {
        exponent_form(trim_zeros(mantissa), &exp.to_string())
    } else {
        let decimals = usize::try_from(5 - exp).unwrap_or(0);
        trim_zeros(&format!("{v:.decimals$}")).to_string()
    }
}

fn strip_reply(reply: &str, decoration: Option<fn(&str) -> String>) -> String {
    let trimmed = reply.trim();
    match decoration {
        Some(f) => f(trimmed),
        None => trimmed.to_string(),
    }
}

fn prefixed(prefix: &str, command: &str) -> String {
    format!("{prefix}{command}")
}

/// Checks that `idx` addresses one of `count` channels.
pub fn validate_index(idx: usize, count: usize) -> Result<usize> {
    if idx >= count {
        return Err(InstrumentError::IndexOutOfRange {
            index: idx.to_string(),
            valid: format!("range(0, {count})"),
        });
    }
    Ok(idx)
}

/// Parses an integer reply, accepting integral floats such as `"2.0"`.
pub fn parse_int(s: &str) -> Result<i64> {
    let s = s.trim();
    if let Ok(v) = s.parse::<i64>() {
        return Ok(v);
    }
    match s.parse::<f64>() {
        Ok(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => Ok(v as i64),
        _ => Err(InstrumentError::parse(s, "expected an integer")),
    }
}

pub fn parse_float(s: &str) -> Result<f64> {
    s.trim()
        .parse()
        .map_err(|e| InstrumentError::parse(s.trim(), e))
}

/// On/off setting.
pub struct BoolProperty {
    command: &'static str,
    inst_true: &'static str,
    inst_false: &'static str,
    set_fmt: SetFmt,
}

impl BoolProperty {
    /// `ON`/`OFF`, written as `CMD ON`.
    pub const fn new(command: &'static str) -> Self {
        Self {
            command,
            inst_true: "ON",
            inst_false: "OFF",
            set_fmt: SetFmt::Space,
        }
    }

    pub const fn values(mut self, inst_true: &'static str, inst_false: &'static str) -> Self {
        self.inst_true = inst_true;
        self.inst_false = inst_false;
        self
    }

    pub const fn set_fmt(mut self, set_fmt: SetFmt) -> Self {
        self.set_fmt = set_fmt;
        self
    }

    pub fn command(&self) -> &'static str {
        self.command
    }

    /// True only for an exact match of the true value; any other reply,
    /// including the false value in another case, reads as false.
    fn parse(&self, reply: &str) -> bool {
        reply.trim() == self.inst_true
    }

    pub async fn get(&self, inst: &mut Instrument) -> Result<bool> {
        self.get_prefixed(inst, "").await
    }

    pub async fn set(&self, inst: &mut Instrument, value: bool) -> Result<()> {
        self.set_prefixed(inst, "", value).await
    }

    /// Getter for a command under `prefix`, e.g. `:CHAN1`.
    pub async fn get_prefixed(&self, inst: &mut Instrument, prefix: &str) -> Result<bool> {
        let cmd = format!("{}?", prefixed(prefix, self.command));
        Ok(self.parse(&inst.query(&cmd).await?))
    }

    pub async fn set_prefixed(&self, inst: &mut Instrument, prefix: &str, value: bool) -> Result<()> {
        let v = if value { self.inst_true } else { self.inst_false };
        let cmd = self.set_fmt.apply(&prefixed(prefix, self.command), v);
        inst.sendcmd(&cmd).await
    }
}

/// Setting with a fixed set of mnemonic values.
pub struct EnumProperty<E> {
    command: &'static str,
    set_fmt: SetFmt,
    input_decoration: Option<fn(&str) -> String>,
    _kind: PhantomData<fn() -> E>,
}

impl<E: ScpiEnum> EnumProperty<E> {
    pub const fn new(command: &'static str) -> Self {
        Self {
            command,
            set_fmt: SetFmt::Space,
            input_decoration: None,
            _kind: PhantomData,
        }
    }

    pub const fn set_fmt(mut self, set_fmt: SetFmt) -> Self {
        self.set_fmt = set_fmt;
        self
    }

    /// Applied to the stripped reply before mnemonic lookup.
    pub const fn input_decoration(mut self, f: fn(&str) -> String) -> Self {
        self.input_decoration = Some(f);
        self
    }

    pub async fn get(&self, inst: &mut Instrument) -> Result<E> {
        self.get_prefixed(inst, "").await
    }

    pub async fn set(&self, inst: &mut Instrument, value: E) -> Result<()> {
        self.set_prefixed(inst, "", value).await
    }

    pub async fn get_prefixed(&self, inst: &mut Instrument, prefix: &str) -> Result<E> {
        let cmd = format!("{}?", prefixed(prefix, self.command));
        let decoration = self.input_decoration;
        inst.query_parse(&cmd, |r| E::parse_mnemonic(&strip_reply(r, decoration)))
            .await
    }

    pub async fn set_prefixed(&self, inst: &mut Instrument, prefix: &str, value: E) -> Result<()> {
        let cmd = self
            .set_fmt
            .apply(&prefixed(prefix, self.command), value.mnemonic());
        inst.sendcmd(&cmd).await
    }
}

/// Values an [`IntProperty`] accepts.
#[derive(Debug, Clone, Copy)]
pub enum ValidSet {
    Any,
    /// Inclusive range.
    Range(i64, i64),
    List(&'static [i64]),
}

impl ValidSet {
    pub fn contains(&self, v: i64) -> bool {
        match self {
            ValidSet::Any => true,
            ValidSet::Range(lo, hi) => (*lo..=*hi).contains(&v),
            ValidSet::List(values) => values.contains(&v),
        }
    }
}

impl fmt::Display for ValidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidSet::Any => f.write_str("any integer"),
            ValidSet::Range(lo, hi) => write!(f, "range({}, {})", lo, hi + 1),
            ValidSet::List(values) => write!(f, "{values:?}"),
        }
    }
}

/// Integer setting.
pub struct IntProperty {
    command: &'static str,
    set_fmt: SetFmt,
    valid: ValidSet,
}

impl IntProperty {
    pub const fn new(command: &'static str) -> Self {
        Self {
            command,
            set_fmt: SetFmt::Space,
            valid: ValidSet::Any,
        }
    }

    pub const fn set_fmt(mut self, set_fmt: SetFmt) -> Self {
        self.set_fmt = set_fmt;
        self
    }

    pub const fn valid(mut self, valid: ValidSet) -> Self {
        self.valid = valid;
        self
    }

    pub fn validate(&self, value: i64) -> Result<i64> {
        if !self.valid.contains(value) {
            return Err(InstrumentError::OutOfRange(format!(
                "{value} is not an allowed value for this property; must be one of {}.",
                self.valid
            )));
        }
        Ok(value)
    }

    pub async fn get(&self, inst: &mut Instrument) -> Result<i64> {
        let cmd = format!("{}?", self.command);
        inst.query_parse(&cmd, parse_int).await
    }

    pub async fn set(&self, inst: &mut Instrument, value: i64) -> Result<()> {
        let value = self.validate(value)?;
        let cmd = self.set_fmt.apply(self.command, &value.to_string());
        inst.sendcmd(&cmd).await
    }
}

/// Plain floating-point setting.
pub struct UnitlessProperty {
    command: &'static str,
    format: NumFmt,
    set_fmt: SetFmt,
}

impl UnitlessProperty {
    pub const fn new(command: &'static str) -> Self {
        Self {
            command,
            format: NumFmt::Sci,
            set_fmt: SetFmt::Space,
        }
    }

    pub const fn format(mut self, format: NumFmt) -> Self {
        self.format = format;
        self
    }

    pub async fn get(&self, inst: &mut Instrument) -> Result<f64> {
        let cmd = format!("{}?", self.command);
        inst.query_parse(&cmd, parse_float).await
    }

    pub async fn set(&self, inst: &mut Instrument, value: f64) -> Result<()> {
        let cmd = self.set_fmt.apply(self.command, &self.format.format(value));
        inst.sendcmd(&cmd).await
    }
}

/// A bound of a [`UnitfulProperty`].
#[derive(Debug, Clone, Copy)]
pub enum Limit {
    None,
    /// In the property's unit.
    Fixed(f64),
    /// Queried from the device; `{}` is replaced by the command.
    Query(&'static str),
}

/// Floating-point setting with a physical unit.
pub struct UnitfulProperty {
    command: &'static str,
    unit: Unit,
    format: NumFmt,
    set_fmt: SetFmt,
    input_decoration: Option<fn(&str) -> String>,
    min: Limit,
    max: Limit,
}

impl UnitfulProperty {
    pub const fn new(command: &'static str, unit: Unit) -> Self {
        Self {
            command,
            unit,
            format: NumFmt::Sci,
            set_fmt: SetFmt::Space,
            input_decoration: None,
            min: Limit::None,
            max: Limit::None,
        }
    }

    pub const fn format(mut self, format: NumFmt) -> Self {
        self.format = format;
        self
    }

    pub const fn set_fmt(mut self, set_fmt: SetFmt) -> Self {
        self.set_fmt = set_fmt;
        self
    }

    pub const fn input_decoration(mut self, f: fn(&str) -> String) -> Self {
        self.input_decoration = Some(f);
        self
    }

    /// Inclusive bounds in the property's unit.
    pub const fn fixed_range(mut self, min: f64, max: f64) -> Self {
        self.min = Limit::Fixed(min);
        self.max = Limit::Fixed(max);
        self
    }

    pub const fn min(mut self, min: Limit) -> Self {
        self.min = min;
        self
    }

    pub const fn max(mut self, max: Limit) -> Self {
        self.max = max;
        self
    }

    /// Bounds queried with `CMD:MIN?` and `CMD:MAX?`.
    pub const fn bounded(self) -> Self {
        self.bounds_fmt("{}:MIN?", "{}:MAX?")
    }

    /// Bounds queried with custom templates, e.g. `"{}? MIN"`.
    pub const fn bounds_fmt(mut self, min: &'static str, max: &'static str) -> Self {
        self.min = Limit::Query(min);
        self.max = Limit::Query(max);
        self
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    fn parse(&self, reply: &str) -> Result<Quantity> {
        let reply = strip_reply(reply, self.input_decoration);
        let (value, unit) = split_unit_str(&reply, self.unit)?;
        Quantity::new(value, unit).to(self.unit)
    }

    async fn limit(&self, inst: &mut Instrument, limit: Limit) -> Result<Option<Quantity>> {
        match limit {
            Limit::None => Ok(None),
            Limit::Fixed(v) => Ok(Some(Quantity::new(v, self.unit))),
            Limit::Query(template) => {
                let cmd = template.replace("{}", self.command);
                inst.query_parse(&cmd, |r| self.parse(r)).await.map(Some)
            }
        }
    }

    /// Lower bound, querying the device when the bound is dynamic.
    pub async fn min_value(&self, inst: &mut Instrument) -> Result<Option<Quantity>> {
        self.limit(inst, self.min).await
    }

    pub async fn max_value(&self, inst: &mut Instrument) -> Result<Option<Quantity>> {
        self.limit(inst, self.max).await
    }

    pub async fn get(&self, inst: &mut Instrument) -> Result<Quantity> {
        self.get_prefixed(inst, "").await
    }

    pub async fn set(&self, inst: &mut Instrument, value: impl Into<Magnitude> + Send) -> Result<()> {
        self.set_prefixed(inst, "", value.into()).await
    }

    pub async fn get_prefixed(&self, inst: &mut Instrument, prefix: &str) -> Result<Quantity> {
        let cmd = format!("{}?", prefixed(prefix, self.command));
        inst.query_parse(&cmd, |r| self.parse(r)).await
    }

    pub async fn set_prefixed(
        &self,
        inst: &mut Instrument,
        prefix: &str,
        value: Magnitude,
    ) -> Result<()> {
        let v = assume_units(value, self.unit)?;
        if let Some(min) = self.min_value(inst).await? {
            if v < min.value() {
                return Err(InstrumentError::OutOfRange(format!(
                    "Unitful quantity is too low. Got {}, minimum value is {}",
                    Quantity::new(v, self.unit),
                    min
                )));
            }
        }
        if let Some(max) = self.max_value(inst).await? {
            if v > max.value() {
                return Err(InstrumentError::OutOfRange(format!(
                    "Unitful quantity is too high. Got {}, maximum value is {}",
                    Quantity::new(v, self.unit),
                    max
                )));
            }
        }
        let cmd = self
            .set_fmt
            .apply(&prefixed(prefix, self.command), &self.format.format(v));
        inst.sendcmd(&cmd).await
    }
}

/// Free-text setting, quoted with a bookmark symbol.
pub struct StringProperty {
    command: &'static str,
    bookmark: &'static str,
    set_fmt: SetFmt,
}

impl StringProperty {
    pub const fn new(command: &'static str) -> Self {
        Self {
            command,
            bookmark: "\"",
            set_fmt: SetFmt::Space,
        }
    }

    pub const fn bookmark(mut self, bookmark: &'static str) -> Self {
        self.bookmark = bookmark;
        self
    }

    pub const fn set_fmt(mut self, set_fmt: SetFmt) -> Self {
        self.set_fmt = set_fmt;
        self
    }

    fn unquote<'a>(&self, s: &'a str) -> &'a str {
        let s = s.trim();
        if self.bookmark.is_empty() {
            return s;
        }
        let s = s.strip_prefix(self.bookmark).unwrap_or(s);
        s.strip_suffix(self.bookmark).unwrap_or(s)
    }

    pub async fn get(&self, inst: &mut Instrument) -> Result<String> {
        let cmd = format!("{}?", self.command);
        let reply = inst.query(&cmd).await?;
        Ok(self.unquote(&reply).to_string())
    }

    pub async fn set(&self, inst: &mut Instrument, value: &str) -> Result<()> {
        let quoted = format!("{b}{value}{b}", b = self.bookmark);
        let cmd = self.set_fmt.apply(self.command, &quoted);
        inst.sendcmd(&cmd).await
    }
}

/// Parses a reply into a dimensionless quantity.
pub fn parse_dimensionless(s: &str) -> Result<Quantity> {
    let (v, unit) = split_unit_str(s, DIMENSIONLESS)?;
    Quantity::new(v, unit).to(DIMENSIONLESS)
}
