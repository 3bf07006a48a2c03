//! Loading instrument topologies from YAML.
//!
//! A configuration section maps names to instrument entries:
//!
//! ```yaml
//! instruments:
//!   ddg:
//!     class: !!python/name:instruments.srs.SRSDG645
//!     uri: gpib+usb:///dev/ttyUSB0/15
//!   fg:
//!     class: Srs345
//!     uri: serial:///dev/ttyUSB1?baud=9600
//!     attrs:
//!       frequency: !Q 10 kHz
//!   scope:
//!     class: RigolDS1000
//!     uri: tcpip://192.168.0.10:5555
//!     attrs:
//!       acquire_type: AVER
//!       channel[0].coupling: AC
//! ```
//!
//! `class` is looked up in an [`InstrumentCatalog`]; `uri` is passed to
//! [`Instrument::open_from_uri`]; each `attrs` entry is applied with
//! [`Driver::apply_attr`]. Scalars tagged `!Q` are read as quantities.
//!
//! A device that cannot be reached is logged and loaded as `None` so the
//! rest of the topology still comes up. Any other failure (unknown class,
//! bad attribute, malformed file) aborts the load.

use crate::driver::{AttrPath, AttrValue, Driver};
use crate::error::{InstrumentError, Result};
use crate::instruments::InstrumentCatalog;
use crate::Instrument;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Loaded drivers by name. `None` marks a device that could not be reached.
pub type LoadedInstruments = HashMap<String, Option<Box<dyn Driver>>>;

/// Loads the instruments listed under `conf_path` in the YAML file at `path`.
///
/// `conf_path` is `/`-separated; empty segments are ignored, so `"/"` and
/// `""` both select the whole document.
pub async fn load_instruments(
    path: impl AsRef<Path>,
    conf_path: &str,
    catalog: &InstrumentCatalog,
) -> Result<LoadedInstruments> {
    let path = path.as_ref();
    info!("Loading instruments from {}", path.display());
    let text = tokio::fs::read_to_string(path).await?;
    load_instruments_str(&text, conf_path, catalog).await
}

#[allow(clippy::unwrap_used)]
static PYTHON_NAME_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!!?python/name:([A-Za-z0-9_.]+)").unwrap());

/// Like [`load_instruments`], reading the configuration from a string.
pub async fn load_instruments_str(
    yaml: &str,
    conf_path: &str,
    catalog: &InstrumentCatalog,
) -> Result<LoadedInstruments> {
    // `!!python/name:pkg.Class` tags name classes; the YAML parser would
    // drop them, so they are rewritten to plain `pkg.Class` strings.
    let yaml = PYTHON_NAME_TAG.replace_all(yaml, "$1");
    let doc: Value = serde_yaml::from_str(&yaml)?;
    let section = walk(&doc, conf_path)?;
    let entries = match section {
        Value::Mapping(m) => m,
        Value::Null => return Ok(HashMap::new()),
        other => {
            return Err(InstrumentError::Config(format!(
                "section '{conf_path}' is not a mapping of instruments: {other:?}"
            )))
        }
    };

    let mut loaded = HashMap::with_capacity(entries.len());
    for (key, entry) in entries {
        let name = key
            .as_str()
            .ok_or_else(|| InstrumentError::Config(format!("instrument name {key:?} is not a string")))?;
        let entry = InstrumentEntry::parse(name, entry)?;
        if !catalog.contains(&entry.class) {
            return Err(InstrumentError::Config(format!(
                "Unknown instrument class '{}' for '{name}'",
                entry.class
            )));
        }

        let driver = match entry.open(catalog).await {
            Ok(driver) => Some(driver),
            Err(err) if err.is_io() => {
                warn!(
                    "Exception occurred loading device '{}' with URI {}: {}",
                    name, entry.uri, err
                );
                None
            }
            Err(err) => return Err(err),
        };
        loaded.insert(name.to_string(), driver);
    }
    Ok(loaded)
}

/// Follows a `/`-separated path of mapping keys.
fn walk<'a>(doc: &'a Value, conf_path: &str) -> Result<&'a Value> {
    conf_path
        .split('/')
        .filter(|s| !s.is_empty())
        .try_fold(doc, |node, segment| {
            node.get(segment).ok_or_else(|| {
                InstrumentError::Config(format!("no section '{segment}' in '{conf_path}'"))
            })
        })
}

struct InstrumentEntry<'a> {
    class: String,
    uri: &'a str,
    attrs: Option<&'a Mapping>,
}

impl<'a> InstrumentEntry<'a> {
    fn parse(name: &str, entry: &'a Value) -> Result<Self> {
        let class = entry
            .get("class")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| InstrumentError::Config(format!("'{name}' has no class")))?;
        let uri = entry
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| InstrumentError::Config(format!("'{name}' has no uri")))?;
        let attrs = match entry.get("attrs") {
            None | Some(Value::Null) => None,
            Some(Value::Mapping(m)) => Some(m),
            Some(other) => {
                return Err(InstrumentError::Config(format!(
                    "attrs of '{name}' must be a mapping, got {other:?}"
                )))
            }
        };
        Ok(Self { class, uri, attrs })
    }

    async fn open(&self, catalog: &InstrumentCatalog) -> Result<Box<dyn Driver>> {
        let inst = Instrument::open_from_uri(self.uri).await?;
        let mut driver = catalog.build(&self.class, inst).await?;
        for (key, value) in self.attrs.into_iter().flatten() {
            let key = key
                .as_str()
                .ok_or_else(|| InstrumentError::Config(format!("attribute name {key:?} is not a string")))?;
            let path = AttrPath::parse(key)?;
            let value = AttrValue::from_yaml(value)?;
            debug!("Setting {}.{} = {:?}", driver.model(), path, value);
            driver.apply_attr(&path, &value).await?;
        }
        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tracing_test::traced_test;

    #[test]
    fn test_walk() {
        let doc: Value = serde_yaml::from_str("a:\n  b: 42\n  c:\n    d: [foo]\n").unwrap();
        assert_eq!(walk(&doc, "/").unwrap(), &doc);
        assert_eq!(walk(&doc, "").unwrap(), &doc);
        assert_eq!(walk(&doc, "/a/b").unwrap(), &Value::from(42));
        assert_eq!(walk(&doc, "a//c/d/").unwrap()[0], Value::from("foo"));
        assert!(matches!(walk(&doc, "/a/x"), Err(InstrumentError::Config(_))));
    }

    #[test]
    fn test_python_name_tags_become_strings() {
        let yaml = "a:\n  class: !!python/name:instruments.srs.SRSDG645\n";
        assert_eq!(
            PYTHON_NAME_TAG.replace_all(yaml, "$1"),
            "a:\n  class: instruments.srs.SRSDG645\n"
        );
    }

    #[tokio::test]
    async fn test_load_with_attrs() {
        let yaml = r#"
instruments:
  scpi:
    class: instruments.generic_scpi.SCPIInstrument
    uri: "test://"
    attrs:
      timeout: !Q 2 s
      terminator: "\r"
  lcc:
    class: !!python/name:instruments.thorlabs.LCC25
    uri: "test://freq=20.0\r> "
    attrs:
      frequency: !Q 20 Hz
"#;
        let catalog = InstrumentCatalog::with_builtin();
        let mut loaded = load_instruments_str(yaml, "/instruments", &catalog)
            .await
            .unwrap();
        assert_eq!(loaded.len(), 2);

        let scpi = loaded.get_mut("scpi").unwrap().as_mut().unwrap();
        assert_eq!(scpi.model(), "ScpiInstrument");
        assert_eq!(scpi.instrument().timeout(), Duration::from_secs(2));
        assert_eq!(scpi.instrument().terminator(), "\r");

        let lcc = loaded.get_mut("lcc").unwrap().as_mut().unwrap();
        assert_eq!(lcc.model(), "LCC25");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unreachable_device_is_none() {
        let yaml = r#"
dev:
  class: SRS345
  uri: "file:///nonexistent/instrumentkit-device"
"#;
        let catalog = InstrumentCatalog::with_builtin();
        let loaded = load_instruments_str(yaml, "/", &catalog).await.unwrap();
        assert!(loaded["dev"].is_none());
        assert!(logs_contain("nonexistent/instrumentkit-device"));
    }

    #[tokio::test]
    async fn test_unknown_class_aborts() {
        let yaml = "dev:\n  class: FooBar9000\n  uri: \"test://\"\n";
        let catalog = InstrumentCatalog::with_builtin();
        let err = load_instruments_str(yaml, "/", &catalog).await.err().unwrap();
        assert!(matches!(err, InstrumentError::Config(_)));
    }

    #[tokio::test]
    async fn test_bad_attribute_aborts() {
        let yaml = "dev:\n  class: ScpiInstrument\n  uri: \"test://\"\n  attrs:\n    no_such_thing: 1\n";
        let catalog = InstrumentCatalog::with_builtin();
        let err = load_instruments_str(yaml, "/", &catalog).await.err().unwrap();
        assert!(matches!(err, InstrumentError::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_missing_uri() {
        let yaml = "dev:\n  class: ScpiInstrument\n";
        let catalog = InstrumentCatalog::with_builtin();
        let err = load_instruments_str(yaml, "/", &catalog).await.err().unwrap();
        assert_eq!(err.to_string(), "Configuration error: 'dev' has no uri");
    }
}
