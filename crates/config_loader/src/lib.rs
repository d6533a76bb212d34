//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate configuration legality
//! - Resolve file references relative to the configuration file
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("mqlux.toml")).unwrap();
//! println!("subscriptions: {}", config.subscriptions.len());
//! ```

mod parser;
mod validator;

pub use contracts::BridgeConfig;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    /// Relative `script_file` and `csv_log` paths are resolved against the
    /// directory holding the configuration file.
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<BridgeConfig, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        let mut config = parser::parse(&content, format)?;
        if let Some(base) = path.parent() {
            Self::resolve_paths(&mut config, base);
        }
        validator::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from string
    ///
    /// Relative paths are left untouched.
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<BridgeConfig, ContractError> {
        Self::parse_and_validate(content, format)
    }

    /// Serialize BridgeConfig to TOML string
    pub fn to_toml(config: &BridgeConfig) -> Result<String, ContractError> {
        toml::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize BridgeConfig to JSON string
    pub fn to_json(config: &BridgeConfig) -> Result<String, ContractError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }

    fn resolve_paths(config: &mut BridgeConfig, base: &Path) {
        for sub in &mut config.subscriptions {
            sub.resolve_paths(base);
        }
        if let Some(csv_log) = config.mqtt.csv_log.as_mut() {
            if csv_log.is_relative() && csv_log.as_os_str() != "-" {
                *csv_log = base.join(&*csv_log);
            }
        }
    }

    /// Parse and validate configuration content
    fn parse_and_validate(
        content: &str,
        format: ConfigFormat,
    ) -> Result<BridgeConfig, ContractError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    const MINIMAL_TOML: &str = r#"
[mqtt]
url = "tcp://localhost:1883"
keepalive_secs = 30

[influxdb]
url = "http://localhost:8086"
database = "mqlux"

[[subscription]]
topic = "/sensors/temp"
measurement = "temperature"
tags = { room = "kitchen" }
"#;

    #[test]
    fn test_load_from_str_toml() {
        let result = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let cfg = result.unwrap();
        assert_eq!(cfg.subscriptions[0].measurement, "temperature");
        assert_eq!(cfg.mqtt.keepalive_secs, Some(30));
    }

    #[test]
    fn test_round_trip_toml() {
        let cfg = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&cfg).unwrap();
        let cfg2 = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(cfg.subscriptions.len(), cfg2.subscriptions.len());
        assert_eq!(cfg.subscriptions[0].tags, cfg2.subscriptions[0].tags);
    }

    #[test]
    fn test_round_trip_json() {
        let cfg = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&cfg).unwrap();
        let cfg2 = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(cfg.subscriptions[0].topic, cfg2.subscriptions[0].topic);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = r#"
[mqtt]
url = "tcp://localhost:1883"
"#;
        let result = ConfigLoader::load_from_str(content, ConfigFormat::Toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("subscription"));
    }

    #[test]
    fn test_load_from_path_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mqlux.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
[mqtt]
csv_log = "log/messages.csv"

[[subscription]]
topic = "/door"
measurement = "door"
script_file = "scripts/door.rhai"
"#
        )
        .unwrap();

        let cfg = ConfigLoader::load_from_path(&path).unwrap();
        assert_eq!(
            cfg.subscriptions[0].script_file,
            Some(dir.path().join("scripts/door.rhai"))
        );
        assert_eq!(cfg.mqtt.csv_log, Some(dir.path().join("log/messages.csv")));
    }

    #[test]
    fn test_stdout_csv_log_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mqlux.toml");
        std::fs::write(
            &path,
            "[mqtt]\ncsv_log = \"-\"\n[[subscription]]\ntopic = \"/a\"\n",
        )
        .unwrap();

        let cfg = ConfigLoader::load_from_path(&path).unwrap();
        assert_eq!(cfg.mqtt.csv_log, Some(PathBuf::from("-")));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = ConfigLoader::load_from_path(Path::new("mqlux.yaml")).unwrap_err();
        assert!(err.to_string().contains("unsupported"), "got: {err}");
    }
}
