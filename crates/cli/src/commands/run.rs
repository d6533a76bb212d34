//! `run` command implementation.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use contracts::{BridgeConfig, ContractError, MessageSource, Receiver, Writer};
use dispatcher::{
    create_dispatcher, CsvLogger, Dispatcher, InfluxSink, LogWriter, Watchdog, WatchdogExpired,
    WriterHandle, WATCHDOG_EXIT_CODE, WILDCARD,
};
use ingestion::{CsvReplaySource, MqttSource};

use crate::cli::RunArgs;
use crate::error::{ensure_config_exists, CliError};

/// How the message stream ended
enum Outcome {
    Finished(u64),
    Interrupted,
    Expired(Duration),
    Failed(CliError),
}

impl Outcome {
    /// Process exit code that must bypass normal shutdown
    fn forced_exit_code(&self) -> Option<i32> {
        match self {
            Outcome::Expired(_) => Some(WATCHDOG_EXIT_CODE),
            _ => None,
        }
    }
}

/// Where messages come from
#[derive(Debug, PartialEq, Eq)]
enum SourceKind {
    Replay(PathBuf),
    Stdin,
    Broker,
}

impl SourceKind {
    fn select(args: &RunArgs, config: &BridgeConfig) -> Self {
        match &args.replay {
            Some(path) => SourceKind::Replay(path.clone()),
            None if args.stdin || config.mqtt.url.is_none() => SourceKind::Stdin,
            None => SourceKind::Broker,
        }
    }
}

/// The selected message source
enum BridgeSource {
    Csv(CsvReplaySource),
    Broker(MqttSource),
}

impl BridgeSource {
    async fn open(
        kind: &SourceKind,
        args: &RunArgs,
        config: &BridgeConfig,
        topics: &[String],
    ) -> Result<Self> {
        Ok(match kind {
            SourceKind::Replay(path) => {
                BridgeSource::Csv(open_replay(path, args.concurrency).await?)
            }
            SourceKind::Stdin => {
                BridgeSource::Csv(CsvReplaySource::from_reader("stdin", tokio::io::stdin(), 1))
            }
            SourceKind::Broker => BridgeSource::Broker(
                MqttSource::new(&config.mqtt, topics.to_vec())
                    .context("Failed to configure broker connection")?,
            ),
        })
    }

    fn name(&self) -> &str {
        match self {
            BridgeSource::Csv(source) => source.name(),
            BridgeSource::Broker(source) => source.name(),
        }
    }

    async fn run(&mut self, receiver: Arc<dyn Receiver>) -> Result<u64, ContractError> {
        match self {
            BridgeSource::Csv(source) => source.run(receiver).await,
            BridgeSource::Broker(source) => source.run(receiver).await,
        }
    }
}

async fn open_replay(path: &Path, concurrency: usize) -> Result<CsvReplaySource> {
    CsvReplaySource::open(path, concurrency)
        .await
        .with_context(|| format!("Failed to open replay {}", path.display()))
}

/// Execute the `run` command
pub async fn run_bridge(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");
    ensure_config_exists(&args.config)?;

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let source_kind = SourceKind::select(args, &config);
    let replaying = matches!(source_kind, SourceKind::Replay(_));
    info!(
        subscriptions = config.subscriptions.len(),
        influxdb = config.influxdb.is_some(),
        source = ?source_kind,
        dry_run = args.dry_run,
        "Configuration loaded"
    );

    // 1. Writer
    let mut queue: Option<Arc<WriterHandle>> = None;
    let writer: Arc<dyn Writer> = match &config.influxdb {
        Some(influx) if !replaying && !args.dry_run => {
            let sink = InfluxSink::new("influxdb", influx).context("Failed to create InfluxDB sink")?;
            let handle = Arc::new(WriterHandle::spawn(sink, influx.queue_capacity));
            info!(url = %influx.url, database = %influx.database, "Writing to InfluxDB");
            queue = Some(Arc::clone(&handle));
            handle
        }
        _ => {
            info!("Records are logged, not stored");
            Arc::new(LogWriter::new("log"))
        }
    };

    // 2. Dispatcher with auxiliary receivers
    let mut dispatcher = create_dispatcher(&config.subscriptions, writer)
        .context("Failed to build subscriptions")?;

    let logger = match (&config.mqtt.csv_log, replaying) {
        (Some(path), false) => {
            let logger = Arc::new(
                CsvLogger::open(path)
                    .await
                    .with_context(|| format!("Failed to open message log {}", path.display()))?,
            );
            info!(path = %path.display(), "Logging messages");
            dispatcher.add_receiver(WILDCARD, Arc::clone(&logger) as Arc<dyn Receiver>);
            Some(logger)
        }
        _ => None,
    };

    let (watchdog, expired) = match config.mqtt.keepalive_secs {
        Some(secs) if !replaying => {
            let (watchdog, expired) = Watchdog::spawn(Duration::from_secs(secs));
            let watchdog = Arc::new(watchdog);
            dispatcher.add_receiver(WILDCARD, Arc::clone(&watchdog) as Arc<dyn Receiver>);
            info!(keepalive_secs = secs, "Watchdog armed");
            (Some(watchdog), Some(expired))
        }
        _ => (None, None),
    };

    info!(topics = ?dispatcher.subscribe_topics(), "Broker subscriptions");

    // 3. Source
    let mut source =
        BridgeSource::open(&source_kind, args, &config, dispatcher.subscribe_topics()).await?;
    let dispatcher = Arc::new(dispatcher);

    let source_name = source.name().to_string();
    info!(source = %source_name, "Starting bridge...");
    let receiver: Arc<dyn Receiver> = Arc::clone(&dispatcher) as Arc<dyn Receiver>;
    let outcome = tokio::select! {
        result = source.run(receiver) => match result {
            Ok(delivered) => Outcome::Finished(delivered),
            Err(e) => Outcome::Failed(CliError::source(&source_name, e.to_string())),
        },
        _ = shutdown_signal() => Outcome::Interrupted,
        silence = watchdog_expiry(expired) => Outcome::Expired(silence),
    };

    if let Some(code) = outcome.forced_exit_code() {
        if let Outcome::Expired(silence) = &outcome {
            error!(
                silence_secs = silence.as_secs_f64(),
                exit_code = code,
                "No messages received within keepalive, exiting"
            );
        }
        if let Some(logger) = &logger {
            logger.stop().await;
        }
        std::process::exit(code);
    }

    match outcome {
        Outcome::Finished(delivered) => info!(delivered, "Message stream finished"),
        Outcome::Interrupted => warn!("Received shutdown signal, stopping bridge..."),
        Outcome::Failed(e) => {
            shutdown(watchdog.as_deref(), logger.as_deref(), dispatcher, queue).await;
            return Err(e.into());
        }
        Outcome::Expired(_) => {}
    }

    let target = match (&config.influxdb, &queue) {
        (Some(influx), Some(_)) => format!("{} ({})", influx.database, influx.url),
        _ => "log".to_string(),
    };
    print_summary(&dispatcher, &target, logger.as_deref());
    shutdown(watchdog.as_deref(), logger.as_deref(), dispatcher, queue).await;

    info!("mqlux finished");
    Ok(())
}

/// Resolves when the watchdog fires, never without one.
fn watchdog_expiry(expired: Option<WatchdogExpired>) -> impl Future<Output = Duration> {
    async move {
        match expired {
            Some(expired) => match expired.await {
                Some(silence) => silence,
                None => std::future::pending().await,
            },
            None => std::future::pending().await,
        }
    }
}

/// Stop auxiliary receivers, then drain the writer queue
async fn shutdown(
    watchdog: Option<&Watchdog>,
    logger: Option<&CsvLogger>,
    dispatcher: Arc<Dispatcher>,
    queue: Option<Arc<WriterHandle>>,
) {
    if let Some(watchdog) = watchdog {
        watchdog.stop().await;
    }
    if let Some(logger) = logger {
        let written = logger.stop().await;
        info!(written, dropped = logger.dropped(), "Message log closed");
    }

    // subscriptions hold the remaining writer references
    drop(dispatcher);
    if let Some(queue) = queue {
        match Arc::try_unwrap(queue) {
            Ok(handle) => {
                let metrics = Arc::clone(handle.metrics());
                handle.shutdown().await;
                let snapshot = metrics.snapshot();
                info!(
                    batches = snapshot.write_count,
                    failures = snapshot.failure_count,
                    dropped = snapshot.dropped_count,
                    "Writer queue drained"
                );
            }
            Err(_) => warn!("Writer queue still in use, pending batches are lost"),
        }
    }
}

/// Setup Ctrl+C and SIGTERM signal handlers
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print per-subscription counters
fn print_summary(dispatcher: &Dispatcher, target: &str, logger: Option<&CsvLogger>) {
    eprintln!("\n=== Summary ===\n");
    eprintln!("Target: {target}");
    for (pattern, snapshot) in dispatcher.metrics() {
        eprintln!("  {pattern}: {snapshot}");
    }
    eprintln!("Total: {}", dispatcher.totals());
    if let Some(logger) = logger {
        eprintln!("Message log drops: {}", logger.dropped());
    }
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::cli::{Cli, Commands};

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::parse_from(["mqlux", "run"].iter().chain(argv));
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        args
    }

    fn config_with_url(url: Option<&str>) -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.mqtt.url = url.map(str::to_string);
        config
    }

    #[test]
    fn test_broker_is_default_live_source() {
        let config = config_with_url(Some("tcp://localhost:1883"));
        assert_eq!(SourceKind::select(&run_args(&[]), &config), SourceKind::Broker);
        assert_eq!(SourceKind::select(&run_args(&["--stdin"]), &config), SourceKind::Stdin);
        assert_eq!(
            SourceKind::select(&run_args(&["--replay", "log.csv"]), &config),
            SourceKind::Replay(PathBuf::from("log.csv"))
        );
    }

    #[test]
    fn test_stdin_without_broker_url() {
        assert_eq!(
            SourceKind::select(&run_args(&[]), &config_with_url(None)),
            SourceKind::Stdin
        );
    }

    #[test]
    fn test_only_expiry_forces_exit() {
        assert_eq!(
            Outcome::Expired(Duration::from_secs(5)).forced_exit_code(),
            Some(42)
        );
        assert_eq!(Outcome::Finished(3).forced_exit_code(), None);
        assert_eq!(Outcome::Interrupted.forced_exit_code(), None);
        assert_eq!(
            Outcome::Failed(CliError::source("stdin", "boom")).forced_exit_code(),
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_stream_exits_with_watchdog_code() {
        let (watchdog, expired) = Watchdog::spawn(Duration::from_secs(2));

        let outcome = tokio::select! {
            _ = std::future::pending::<()>() => Outcome::Interrupted,
            silence = watchdog_expiry(Some(expired)) => Outcome::Expired(silence),
        };

        assert_eq!(outcome.forced_exit_code(), Some(WATCHDOG_EXIT_CODE));
        let Outcome::Expired(silence) = outcome else {
            panic!("expected expiry");
        };
        assert!(silence >= Duration::from_secs(2));
        watchdog.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_watchdog_never_expires() {
        let expired = tokio::time::timeout(Duration::from_secs(3600), watchdog_expiry(None)).await;
        assert!(expired.is_err());
    }
}
