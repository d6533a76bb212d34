//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::{BridgeConfig, Tags, TrustMaterial};
use dispatcher::TopicPattern;

use crate::cli::InfoArgs;
use crate::error::ensure_config_exists;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    mqtt: MqttInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    influxdb: Option<InfluxInfo>,
    subscriptions: Vec<SubscriptionInfo>,
}

#[derive(Serialize)]
struct MqttInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    csv_log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keepalive_secs: Option<u64>,
    trust: String,
}

#[derive(Serialize)]
struct InfluxInfo {
    url: String,
    database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retention_policy: Option<String>,
    queue_capacity: usize,
}

#[derive(Serialize)]
struct SubscriptionInfo {
    topic: String,
    broker_topic: String,
    regex: bool,
    scripted: bool,
    measurement: String,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    tags: Tags,
    include_retained: bool,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");
    ensure_config_exists(&args.config)?;

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    let info = build_config_info(&config)?;

    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&info);
    }

    Ok(())
}

fn describe_trust(config: &BridgeConfig) -> String {
    let trust = match config.mqtt.trust_material() {
        None => "system roots".to_string(),
        Some(TrustMaterial::Pem(_)) => "inline PEM".to_string(),
        Some(TrustMaterial::Path(path)) => path.display().to_string(),
    };
    if config.mqtt.tls_server_insecure {
        format!("{trust} (verification disabled)")
    } else {
        trust
    }
}

fn build_config_info(config: &BridgeConfig) -> Result<ConfigInfo> {
    let subscriptions = config
        .subscriptions
        .iter()
        .map(|sub| {
            let pattern = TopicPattern::new(&sub.topic)?;
            Ok(SubscriptionInfo {
                topic: sub.topic.clone(),
                broker_topic: pattern.subscribe_topic().to_string(),
                regex: pattern.is_regex(),
                scripted: sub.is_scripted(),
                measurement: sub.measurement.clone(),
                tags: sub.tags.clone(),
                include_retained: sub.include_retained,
            })
        })
        .collect::<Result<Vec<_>, dispatcher::DispatcherError>>()
        .context("Invalid subscription topic")?;

    Ok(ConfigInfo {
        version: format!("{:?}", config.version),
        mqtt: MqttInfo {
            url: config.mqtt.url.clone(),
            client_id: config.mqtt.client_id.clone(),
            csv_log: config.mqtt.csv_log.as_ref().map(|p| p.display().to_string()),
            keepalive_secs: config.mqtt.keepalive_secs,
            trust: describe_trust(config),
        },
        influxdb: config.influxdb.as_ref().map(|influx| InfluxInfo {
            url: influx.url.clone(),
            database: influx.database.clone(),
            retention_policy: influx.retention_policy.clone(),
            queue_capacity: influx.queue_capacity,
        }),
        subscriptions,
    })
}

fn print_config_info(info: &ConfigInfo) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                    mqlux Configuration                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("📡 Broker");
    println!("   ├─ Version: {}", info.version);
    println!("   ├─ URL: {}", info.mqtt.url.as_deref().unwrap_or("(external)"));
    if let Some(ref client_id) = info.mqtt.client_id {
        println!("   ├─ Client ID: {}", client_id);
    }
    println!("   ├─ Message log: {}", info.mqtt.csv_log.as_deref().unwrap_or("off"));
    match info.mqtt.keepalive_secs {
        Some(secs) => println!("   ├─ Watchdog: {}s", secs),
        None => println!("   ├─ Watchdog: off"),
    }
    println!("   └─ Trust: {}", info.mqtt.trust);

    println!("\n📤 Sink");
    match &info.influxdb {
        Some(influx) => {
            println!("   ├─ InfluxDB: {} / {}", influx.url, influx.database);
            if let Some(ref rp) = influx.retention_policy {
                println!("   ├─ Retention policy: {}", rp);
            }
            println!("   └─ Queue capacity: {}", influx.queue_capacity);
        }
        None => println!("   └─ Log only"),
    }

    println!("\n🔀 Subscriptions ({})", info.subscriptions.len());
    for (i, sub) in info.subscriptions.iter().enumerate() {
        let is_last = i == info.subscriptions.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!("   {} {}", prefix, sub.topic);
        println!("   {}  ├─ Broker topic: {}", child_prefix, sub.broker_topic);
        println!(
            "   {}  ├─ Parser: {}{}",
            child_prefix,
            if sub.scripted { "script" } else { "float" },
            if sub.regex { ", regex tags" } else { "" }
        );
        if !sub.tags.is_empty() {
            let tags: Vec<_> = sub.tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
            println!("   {}  ├─ Tags: {}", child_prefix, tags.join(" "));
        }
        println!(
            "   {}  └─ Measurement: {}{}",
            child_prefix,
            sub.measurement,
            if sub.include_retained { " (retained included)" } else { "" }
        );
    }

    println!();
}
