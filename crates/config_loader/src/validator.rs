//! Configuration validation
//!
//! Rules:
//! - field-level rules declared on the schema (`validator` derive)
//! - at least one subscription
//! - `script` and `script_file` are mutually exclusive
//! - InfluxDB url is http(s)
//! - trust material path exists

use validator::Validate;

use contracts::{BridgeConfig, ContractError, TrustMaterial};

/// Validate a BridgeConfig
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(config: &BridgeConfig) -> Result<(), ContractError> {
    validate_schema(config)?;
    validate_subscriptions(config)?;
    validate_influxdb(config)?;
    validate_trust_material(config)?;
    Ok(())
}

/// Field-level rules from the schema derive
fn validate_schema(config: &BridgeConfig) -> Result<(), ContractError> {
    config.validate().map_err(|errors| {
        let field = errors
            .errors()
            .keys()
            .next()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "config".to_string());
        ContractError::config_validation(field, errors.to_string())
    })
}

fn validate_subscriptions(config: &BridgeConfig) -> Result<(), ContractError> {
    if config.subscriptions.is_empty() {
        return Err(ContractError::config_validation(
            "subscription",
            "at least one subscription is required",
        ));
    }

    for (idx, sub) in config.subscriptions.iter().enumerate() {
        if sub.script.is_some() && sub.script_file.is_some() {
            return Err(ContractError::config_validation(
                format!("subscription[{idx}]"),
                format!(
                    "topic '{}': script and script_file are mutually exclusive",
                    sub.topic
                ),
            ));
        }
    }
    Ok(())
}

fn validate_influxdb(config: &BridgeConfig) -> Result<(), ContractError> {
    let Some(influx) = &config.influxdb else {
        return Ok(());
    };
    if !(influx.url.starts_with("http://") || influx.url.starts_with("https://")) {
        return Err(ContractError::config_validation(
            "influxdb.url",
            format!("expected http:// or https:// url, got '{}'", influx.url),
        ));
    }
    Ok(())
}

fn validate_trust_material(config: &BridgeConfig) -> Result<(), ContractError> {
    if let Some(TrustMaterial::Path(path)) = config.mqtt.trust_material() {
        if !path.exists() {
            return Err(ContractError::config_validation(
                "mqtt.tls_server_cert",
                format!("certificate file not found: {}", path.display()),
            ));
        }
    }
    Ok(())
}
