//! The interface every model driver implements.
//!
//! A driver owns an [`Instrument`] and turns typed property accesses into
//! the model's command strings. [`Driver`] is object safe so the catalog and
//! the YAML loader can hold any model as `Box<dyn Driver>`;
//! [`OpenInstrument`] is the typed constructor side.

use crate::error::{InstrumentError, Result};
use crate::property::ScpiEnum;
use crate::units::{split_unit_str, Magnitude, Quantity, DIMENSIONLESS};
use crate::Instrument;
use async_trait::async_trait;
use serde_yaml::Value;
use std::fmt;
use std::time::Duration;

/// A model driver.
#[async_trait]
pub trait Driver: Send {
    /// Catalog name of the model, e.g. `"SrsDg645"`.
    fn model(&self) -> &'static str;

    fn instrument(&mut self) -> &mut Instrument;

    /// Sets a named attribute, as done by the YAML loader for `attrs`.
    ///
    /// Drivers match the paths they understand and pass everything else to
    /// [`apply_base_attr`].
    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        apply_base_attr(self.instrument(), path, value).await
    }
}

/// Drivers that can be constructed from a connected [`Instrument`].
#[async_trait]
pub trait OpenInstrument: Sized + Send {
    /// Performs model initialisation (terminator, prompt, start-up
    /// commands) and returns the driver.
    async fn open(inst: Instrument) -> Result<Self>;

    async fn open_uri(uri: &str) -> Result<Self> {
        let inst = Instrument::open_from_uri(uri).await?;
        Self::open(inst).await
    }
}

/// Attributes every driver accepts: `terminator`, `timeout` and `prompt`.
pub async fn apply_base_attr(
    inst: &mut Instrument,
    path: &AttrPath,
    value: &AttrValue,
) -> Result<()> {
    match path.simple() {
        Some("terminator") => inst.set_terminator(value.as_str()?).await,
        Some("timeout") => {
            let secs = value.as_magnitude()?;
            let secs = crate::units::assume_units(secs, crate::units::SECOND)?;
            inst.set_timeout(Duration::from_secs_f64(secs.max(0.0))).await
        }
        Some("prompt") => {
            inst.set_prompt(Some(value.as_str()?));
            Ok(())
        }
        _ => Err(unknown_attr(path)),
    }
}

/// Error for an attribute path a driver does not know.
pub fn unknown_attr(path: &AttrPath) -> InstrumentError {
    InstrumentError::NotSupported(format!("attribute '{path}'"))
}

/// One step of an attribute path: a name with an optional index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrSegment {
    pub name: String,
    pub index: Option<usize>,
}

/// A dotted attribute path such as `channel[0].coupling`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrPath {
    pub segments: Vec<AttrSegment>,
}

impl AttrPath {
    pub fn parse(path: &str) -> Result<Self> {
        let bad = || InstrumentError::Config(format!("invalid attribute path '{path}'"));
        let mut segments = Vec::new();
        for part in path.split('.') {
            let (name, index) = match part.split_once('[') {
                Some((name, rest)) => {
                    let idx = rest.strip_suffix(']').ok_or_else(bad)?;
                    (name, Some(idx.trim().parse().map_err(|_| bad())?))
                }
                None => (part, None),
            };
            let name = name.trim();
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(bad());
            }
            segments.push(AttrSegment {
                name: name.to_string(),
                index,
            });
        }
        Ok(Self { segments })
    }

    /// The name of a single-segment, unindexed path.
    pub fn simple(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [AttrSegment { name, index: None }] => Some(name),
            _ => None,
        }
    }

    /// `(collection, index, attribute)` for paths like `channel[1].voltage`.
    pub fn indexed(&self) -> Option<(&str, usize, &str)> {
        match self.segments.as_slice() {
            [AttrSegment {
                name: coll,
                index: Some(idx),
            }, AttrSegment { name, index: None }] => Some((coll, *idx, name)),
            _ => None,
        }
    }
}

impl fmt::Display for AttrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(&seg.name)?;
            if let Some(idx) = seg.index {
                write!(f, "[{idx}]")?;
            }
        }
        Ok(())
    }
}

/// A value from an `attrs` block.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Quantity(Quantity),
    List(Vec<AttrValue>),
}

impl AttrValue {
    /// Converts a YAML node. `!Q` scalars such as `!Q 10 kHz` become
    /// quantities.
    pub fn from_yaml(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(AttrValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(AttrValue::Int(i)),
                None => n
                    .as_f64()
                    .map(AttrValue::Float)
                    .ok_or_else(|| InstrumentError::Config(format!("unsupported number {n}"))),
            },
            Value::String(s) => Ok(AttrValue::Str(s.clone())),
            Value::Sequence(items) => items
                .iter()
                .map(AttrValue::from_yaml)
                .collect::<Result<Vec<_>>>()
                .map(AttrValue::List),
            Value::Tagged(tagged) if tagged.tag == "Q" => {
                let text = match &tagged.value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    other => {
                        return Err(InstrumentError::Config(format!(
                            "!Q expects a scalar, got {other:?}"
                        )))
                    }
                };
                let (v, unit) = split_unit_str(&text, DIMENSIONLESS)?;
                Ok(AttrValue::Quantity(Quantity::new(v, unit)))
            }
            other => Err(InstrumentError::Config(format!(
                "unsupported attribute value {other:?}"
            ))),
        }
    }

    fn type_error(&self, wanted: &str) -> InstrumentError {
        InstrumentError::InvalidValue(format!("expected {wanted}, got {self:?}"))
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            AttrValue::Bool(b) => Ok(*b),
            AttrValue::Int(0) => Ok(false),
            AttrValue::Int(1) => Ok(true),
            AttrValue::Str(s) if s.eq_ignore_ascii_case("on") => Ok(true),
            AttrValue::Str(s) if s.eq_ignore_ascii_case("off") => Ok(false),
            _ => Err(self.type_error("a boolean")),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            AttrValue::Int(i) => Ok(*i),
            _ => Err(self.type_error("an integer")),
        }
    }

    pub fn as_usize(&self) -> Result<usize> {
        usize::try_from(self.as_i64()?).map_err(|_| self.type_error("a non-negative integer"))
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            AttrValue::Int(i) => Ok(*i as f64),
            AttrValue::Float(f) => Ok(*f),
            _ => Err(self.type_error("a number")),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            AttrValue::Str(s) => Ok(s),
            _ => Err(self.type_error("a string")),
        }
    }

    /// A number (in the property's default unit) or a `!Q` quantity.
    pub fn as_magnitude(&self) -> Result<Magnitude> {
        match self {
            AttrValue::Quantity(q) => Ok(Magnitude::Quantity(*q)),
            other => other.as_f64().map(Magnitude::Bare),
        }
    }

    /// An enum given by mnemonic (`"SQU"`) or variant name (`"square"`).
    pub fn as_enum<E: ScpiEnum>(&self) -> Result<E> {
        let s = match self {
            AttrValue::Str(s) => s.clone(),
            AttrValue::Int(i) => i.to_string(),
            _ => return Err(self.type_error("an enum value")),
        };
        E::from_mnemonic(&s)
            .or_else(|| E::from_mnemonic(&s.to_ascii_uppercase()))
            .or_else(|| E::from_name(&s))
            .ok_or_else(|| InstrumentError::InvalidValue(format!("unknown value '{s}'")))
    }

    pub fn as_list(&self) -> Result<&[AttrValue]> {
        match self {
            AttrValue::List(items) => Ok(items),
            _ => Err(self.type_error("a list")),
        }
    }
}
