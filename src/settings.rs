//! Application settings for the command-line tool.
//!
//! Settings come from an optional TOML file, overridden by environment
//! variables prefixed with `INSTRUMENTKIT_`. Nested keys are separated by a
//! double underscore:
//!
//! ```text
//! INSTRUMENTKIT_LOG_LEVEL=debug
//! INSTRUMENTKIT_TIMEOUT_MS=5000
//! INSTRUMENTKIT_SERIAL__BAUD=9600
//! INSTRUMENTKIT_GPIB__MODEL=pl
//! ```
//!
//! Instrument topologies are not part of these settings; they are loaded
//! from YAML by [`crate::config`].

use crate::comm::GpibModel;
use crate::error::{InstrumentError, Result};
use crate::instrument::InstrumentUri;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "INSTRUMENTKIT_";

/// File read by [`Settings::load`].
pub const DEFAULT_SETTINGS_FILE: &str = "instrumentkit.toml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Fallback log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Read timeout applied to opened instruments.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub gpib: GpibSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Baud rate for `serial://` URIs that do not give one.
    #[serde(default = "default_baud")]
    pub baud: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpibSettings {
    /// Adapter model (`gi` or `pl`) for `gpib+` URIs that do not give one.
    #[serde(default = "default_gpib_model")]
    pub model: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_baud() -> u32 {
    crate::instrument::DEFAULT_BAUD
}

fn default_gpib_model() -> String {
    "gi".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            timeout_ms: default_timeout_ms(),
            serial: SerialSettings::default(),
            gpib: GpibSettings::default(),
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud: default_baud(),
        }
    }
}

impl Default for GpibSettings {
    fn default() -> Self {
        Self {
            model: default_gpib_model(),
        }
    }
}

impl Settings {
    /// Loads `instrumentkit.toml` from the working directory, if present,
    /// and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_SETTINGS_FILE)
    }

    /// Loads and validates settings from `path` and the environment.
    ///
    /// A missing file is not an error; every key has a default.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let settings: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(InstrumentError::Config(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        if self.timeout_ms == 0 {
            return Err(InstrumentError::Config(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.serial.baud == 0 {
            return Err(InstrumentError::Config(
                "serial.baud must be greater than zero".to_string(),
            ));
        }
        self.gpib_model()?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn gpib_model(&self) -> Result<GpibModel> {
        self.gpib.model.parse()
    }

    /// Adds the default `baud` to serial URIs and the default adapter
    /// `model` to GPIB URIs when the URI does not set them.
    pub fn apply_uri_defaults(&self, uri: &str) -> Result<String> {
        let parsed = InstrumentUri::parse(uri)?;
        let (key, value) = match parsed.scheme.as_str() {
            "serial" => ("baud", self.serial.baud.to_string()),
            "gpib+usb" | "gpib+serial" | "gpib+tcpip" => ("model", self.gpib.model.clone()),
            _ => return Ok(uri.to_string()),
        };
        if parsed.query.contains_key(key) {
            return Ok(uri.to_string());
        }
        let sep = if uri.contains('?') { '&' } else { '?' };
        Ok(format!("{uri}{sep}{key}={value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_defaults_without_file() {
        let settings = Settings::load_from("/nonexistent/instrumentkit.toml").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.timeout(), Duration::from_secs(3));
        assert_eq!(settings.gpib_model().unwrap(), GpibModel::Galvant);
    }

    #[test]
    #[serial]
    fn test_file_and_env_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_level = \"debug\"\ntimeout_ms = 500\n[serial]\nbaud = 9600").unwrap();

        std::env::set_var("INSTRUMENTKIT_GPIB__MODEL", "pl");
        std::env::set_var("INSTRUMENTKIT_TIMEOUT_MS", "750");
        let settings = Settings::load_from(file.path());
        std::env::remove_var("INSTRUMENTKIT_GPIB__MODEL");
        std::env::remove_var("INSTRUMENTKIT_TIMEOUT_MS");

        let settings = settings.unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.timeout_ms, 750);
        assert_eq!(settings.serial.baud, 9600);
        assert_eq!(settings.gpib_model().unwrap(), GpibModel::Prologix);
    }

    #[test]
    fn test_validate() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.log_level = "loud".to_string();
        assert!(settings.validate().is_err());

        settings = Settings::default();
        settings.timeout_ms = 0;
        assert!(settings.validate().is_err());

        settings = Settings::default();
        settings.gpib.model = "ni".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_apply_uri_defaults() {
        let mut settings = Settings::default();
        settings.serial.baud = 9600;
        settings.gpib.model = "pl".to_string();

        assert_eq!(
            settings.apply_uri_defaults("serial:///dev/ttyUSB0").unwrap(),
            "serial:///dev/ttyUSB0?baud=9600"
        );
        assert_eq!(
            settings
                .apply_uri_defaults("serial:///dev/ttyUSB0?baud=19200")
                .unwrap(),
            "serial:///dev/ttyUSB0?baud=19200"
        );
        assert_eq!(
            settings
                .apply_uri_defaults("serial://?vid=0x0403&pid=0x6001")
                .unwrap(),
            "serial://?vid=0x0403&pid=0x6001&baud=9600"
        );
        assert_eq!(
            settings.apply_uri_defaults("gpib+usb:///dev/ttyUSB0/15").unwrap(),
            "gpib+usb:///dev/ttyUSB0/15?model=pl"
        );
        assert_eq!(
            settings.apply_uri_defaults("tcpip://10.0.0.2:5025").unwrap(),
            "tcpip://10.0.0.2:5025"
        );
    }
}
