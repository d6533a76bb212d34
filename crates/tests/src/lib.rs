//! # Integration Tests
//!
//! Cross-crate end-to-end tests.
//!
//! Covers:
//! - Configuration file to running dispatcher
//! - Live channel source through subscriptions, message log and writer
//! - Replay of a recorded message log
//! - Watchdog driven by dispatched traffic

#[cfg(test)]
mod contract_tests {
    use contracts::{BridgeConfig, ConfigVersion};

    #[test]
    fn test_default_config_is_v1_and_empty() {
        let config = BridgeConfig::default();
        assert_eq!(config.version, ConfigVersion::V1);
        assert!(config.subscriptions.is_empty());
        assert!(config.influxdb.is_none());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use contracts::{
        ContractError, FieldValue, Message, MessageSource, Receiver, Record, RecordBatch,
        RecordSink, SubscriptionConfig, Tags, Writer,
    };
    use dispatcher::{create_dispatcher, CsvLogger, Dispatcher, Watchdog, WriterHandle, WILDCARD};
    use ingestion::{ChannelSource, CsvReplaySource};

    /// Writer collecting every record in arrival order
    #[derive(Default)]
    struct Collect(Mutex<Vec<Record>>);

    impl Collect {
        fn records(&self) -> Vec<Record> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Writer for Collect {
        fn write(&self, records: Vec<Record>) -> Result<(), ContractError> {
            self.0.lock().unwrap().extend(records);
            Ok(())
        }
    }

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const ENERGY_SCRIPT: &str = r#"
let total = 0.0;

fn parse(topic, payload) {
    let v = parse_float(payload);
    this.total += v;
    [
        #{ value: v },
        #{ measurement: "energy_total", value: this.total, tags: #{ meter: "main" } }
    ]
}
"#;

    fn subscriptions() -> Vec<SubscriptionConfig> {
        let mut wlan = SubscriptionConfig::new(r"/net/wlan/ap-(?P<ap>\d+)/clients", "wlan_clients");
        wlan.tags.insert("site".into(), "hq".into());

        let mut energy = SubscriptionConfig::new("/energy", "energy");
        energy.script = Some(ENERGY_SCRIPT.into());

        vec![wlan, energy, SubscriptionConfig::new("/door", "door")]
    }

    fn traffic() -> Vec<Message> {
        vec![
            Message::new("/net/wlan/ap-3/clients", "17"),
            Message::new("/net/wlan/ap-x/clients", "5"),
            Message::new("/energy", "1.5"),
            Message::new("/door", "1").retained(),
            Message::new("/energy", "2.5"),
            Message::new("/door", "0"),
            Message::new("/other", "9"),
        ]
    }

    fn expected_records() -> Vec<Record> {
        vec![
            Record::new("wlan_clients", tags(&[("ap", "3"), ("site", "hq")]), 17.0),
            Record::new("energy", Tags::new(), 1.5),
            Record::new("energy_total", tags(&[("meter", "main")]), 1.5),
            Record::new("energy", Tags::new(), 2.5),
            Record::new("energy_total", tags(&[("meter", "main")]), 4.0),
            Record::new("door", Tags::new(), 0.0),
        ]
    }

    /// Live path: channel source -> dispatcher -> writer, with the message log on `#`
    #[tokio::test]
    async fn test_e2e_live_channel() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("messages.csv");

        let writer = Arc::new(Collect::default());
        let mut dispatcher = create_dispatcher(&subscriptions(), writer.clone()).unwrap();
        let logger = Arc::new(CsvLogger::open(&log_path).await.unwrap());
        dispatcher.add_receiver(WILDCARD, logger.clone());
        assert_eq!(dispatcher.subscribe_topics(), &["/net/wlan/#", "/energy", "/door", "#"]);
        let dispatcher = Arc::new(dispatcher);

        let (tx, mut source) = ChannelSource::channel("live", 4);
        let producer = tokio::spawn(async move {
            for message in traffic() {
                tx.send(message).await.unwrap();
            }
        });

        let delivered = source.run(dispatcher.clone()).await.unwrap();
        producer.await.unwrap();
        assert_eq!(delivered, 7);

        assert_eq!(writer.records(), expected_records());

        let totals = dispatcher.totals();
        assert_eq!(totals.received, 6);
        assert_eq!(totals.dropped_unmatched, 1);
        assert_eq!(totals.dropped_retained, 1);
        assert_eq!(totals.parse_failures, 0);
        assert_eq!(totals.records_written, 6);

        assert_eq!(logger.stop().await, 7);
        let log = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(log.lines().count(), 7);
        assert!(log.lines().any(|l| l.ends_with(",/other,9")));
    }

    /// Replay path: recorded log -> bounded-concurrency replay -> dispatcher
    #[tokio::test]
    async fn test_e2e_replay_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("messages.csv");

        // record a log the way the live bridge does
        let logger = CsvLogger::open(&log_path).await.unwrap();
        for i in 0..50 {
            logger.receive(&Message::new(format!("/net/wlan/ap-{}/clients", i % 5), i.to_string()));
            logger.receive(&Message::new("/unknown", "x"));
        }
        assert_eq!(logger.stop().await, 100);

        let writer = Arc::new(Collect::default());
        let dispatcher: Arc<Dispatcher> =
            Arc::new(create_dispatcher(&subscriptions(), writer.clone()).unwrap());

        let mut source = CsvReplaySource::open(&log_path, 8).await.unwrap();
        assert_eq!(source.run(dispatcher.clone()).await.unwrap(), 100);

        let records = writer.records();
        assert_eq!(records.len(), 50);

        let mut per_ap: HashMap<String, f64> = HashMap::new();
        for record in &records {
            assert_eq!(record.measurement, "wlan_clients");
            let FieldValue::Float(v) = record.value else {
                panic!("unexpected value {:?}", record.value);
            };
            *per_ap.entry(record.tags["ap"].clone()).or_default() += v;
        }
        // ap-0 got 0, 5, 10, ... 45
        assert_eq!(per_ap["0"], 225.0);
        assert_eq!(per_ap.len(), 5);
    }

    /// Configuration file with a relative script file -> dispatcher
    #[tokio::test]
    async fn test_e2e_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("scripts")).unwrap();
        std::fs::write(
            dir.path().join("scripts/door.rhai"),
            "fn parse(topic, payload) { #{ value: payload == \"open\", tags: #{ door: \"front\" } } }",
        )
        .unwrap();
        let config_path = dir.path().join("mqlux.toml");
        std::fs::write(
            &config_path,
            r#"
[mqtt]
url = "tcp://localhost:1883"
keepalive_secs = 600

[[subscription]]
topic = "/house/door"
measurement = "door"
script_file = "scripts/door.rhai"
include_retained = true
tags = { house = "main" }
"#,
        )
        .unwrap();

        let config = config_loader::ConfigLoader::load_from_path(&config_path).unwrap();
        assert_eq!(config.mqtt.keepalive_secs, Some(600));

        let writer = Arc::new(Collect::default());
        let dispatcher = create_dispatcher(&config.subscriptions, writer.clone()).unwrap();
        dispatcher.receive(&Message::new("/house/door", "open").retained());

        assert_eq!(
            writer.records(),
            vec![Record::new(
                "door",
                tags(&[("door", "front"), ("house", "main")]),
                true
            )]
        );
    }

    /// Sink collecting batches behind a writer queue
    struct BatchSink {
        batches: Arc<Mutex<Vec<RecordBatch>>>,
    }

    impl RecordSink for BatchSink {
        fn name(&self) -> &str {
            "batches"
        }

        async fn write(&mut self, batch: &RecordBatch) -> Result<(), ContractError> {
            self.batches.lock().unwrap().push(batch.clone());
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    /// Dispatcher writing through a queued sink; shutdown drains the queue
    #[tokio::test]
    async fn test_e2e_writer_queue() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let handle = Arc::new(WriterHandle::spawn(
            BatchSink {
                batches: batches.clone(),
            },
            16,
        ));

        let dispatcher = create_dispatcher(&subscriptions(), handle.clone()).unwrap();
        for message in traffic() {
            dispatcher.receive(&message);
        }
        drop(dispatcher);

        let Ok(handle) = Arc::try_unwrap(handle) else {
            panic!("writer queue still shared");
        };
        handle.shutdown().await;

        let batches = batches.lock().unwrap();
        // one batch per parsed message
        assert_eq!(batches.len(), 4);
        let records: Vec<Record> = batches.iter().flat_map(|b| b.records.clone()).collect();
        assert_eq!(records, expected_records());
    }

    /// Watchdog registered on `#` stays quiet while traffic flows
    #[tokio::test(start_paused = true)]
    async fn test_e2e_watchdog_silence() {
        let mut dispatcher = create_dispatcher(&subscriptions(), Arc::new(Collect::default())).unwrap();
        let (watchdog, expired) = Watchdog::spawn(Duration::from_secs(10));
        let watchdog = Arc::new(watchdog);
        dispatcher.add_receiver(WILDCARD, watchdog.clone());

        let start = tokio::time::Instant::now();
        for _ in 0..6 {
            dispatcher.receive(&Message::new("/other", "ping"));
            tokio::time::sleep(Duration::from_secs(5)).await;
        }

        let silence = expired.await.unwrap();
        assert!(silence > Duration::from_secs(10));
        assert!(start.elapsed() >= Duration::from_secs(35));
        watchdog.stop().await;
    }
}
