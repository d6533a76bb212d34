//! `validate` command implementation.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::BridgeConfig;
use dispatcher::{create_dispatcher, LogWriter};

use crate::cli::ValidateArgs;
use crate::error::ensure_config_exists;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    subscription_count: usize,
    scripted_count: usize,
    broker_topics: Vec<String>,
    influxdb: bool,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();
    let invalid = |error: String| ValidationResult {
        valid: false,
        config_path: config_path.clone(),
        error: Some(error),
        warnings: None,
        summary: None,
    };

    if let Err(e) = ensure_config_exists(&args.config) {
        return invalid(e.to_string());
    }

    let config = match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => config,
        Err(e) => return invalid(e.to_string()),
    };

    // patterns and scripts only fail when compiled
    let dispatcher = match create_dispatcher(&config.subscriptions, Arc::new(LogWriter::new("validate"))) {
        Ok(dispatcher) => dispatcher,
        Err(e) => return invalid(e.to_string()),
    };

    let warnings = collect_warnings(&config);
    ValidationResult {
        valid: true,
        config_path: config_path.clone(),
        error: None,
        warnings: if warnings.is_empty() {
            None
        } else {
            Some(warnings)
        },
        summary: Some(ConfigSummary {
            version: format!("{:?}", config.version),
            subscription_count: config.subscriptions.len(),
            scripted_count: config.subscriptions.iter().filter(|s| s.is_scripted()).count(),
            broker_topics: dispatcher.subscribe_topics().to_vec(),
            influxdb: config.influxdb.is_some(),
        }),
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &BridgeConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.influxdb.is_none() {
        warnings.push("No [influxdb] section - records will only be logged".to_string());
    }

    if config.mqtt.tls_server_insecure {
        warnings.push("mqtt.tls_server_insecure is set - broker certificate is not verified".to_string());
    }

    for sub in &config.subscriptions {
        if sub.measurement.is_empty() && !sub.is_scripted() {
            warnings.push(format!(
                "Subscription '{}' has no measurement and no script",
                sub.topic
            ));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Subscriptions: {}", summary.subscription_count);
            println!("  Scripted: {}", summary.scripted_count);
            println!("  Broker topics: {}", summary.broker_topics.join(", "));
            println!(
                "  InfluxDB: {}",
                if summary.influxdb { "configured" } else { "none" }
            );
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn args(path: &Path) -> ValidateArgs {
        ValidateArgs {
            config: path.to_path_buf(),
            json: true,
        }
    }

    #[test]
    fn test_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mqlux.toml");
        std::fs::write(
            &path,
            r#"
[mqtt]
url = "tcp://localhost:1883"

[[subscription]]
topic = "/room/(?P<room>\\w+)/temp"
measurement = "temperature"

[[subscription]]
topic = "/door"
measurement = "door"
script = "fn parse(t, p) { p == \"open\" }"
"#,
        )
        .unwrap();

        let result = validate_config(&args(&path));
        assert!(result.valid, "{:?}", result.error);
        let summary = result.summary.unwrap();
        assert_eq!(summary.subscription_count, 2);
        assert_eq!(summary.scripted_count, 1);
        assert_eq!(summary.broker_topics, vec!["/room/#", "/door"]);
        assert!(result.warnings.unwrap()[0].contains("influxdb"));
    }

    #[test]
    fn test_bad_script_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mqlux.toml");
        std::fs::write(
            &path,
            r#"
[mqtt]

[[subscription]]
topic = "/x"
measurement = "x"
script = "fn other() { 1 }"
"#,
        )
        .unwrap();

        let result = validate_config(&args(&path));
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("/x"));
    }

    #[test]
    fn test_missing_file() {
        let result = validate_config(&args(Path::new("/nonexistent/mqlux.toml")));
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("not found"));
    }
}
