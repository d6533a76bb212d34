//! MqttSource - live broker subscription
//!
//! Connects with `rumqttc`, subscribes to the dispatcher's broker topics on
//! every (re)connect and pushes each publish through a [`ChannelSource`], so
//! messages are delivered one by one in arrival order.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, MqttOptions,
    Publish, QoS, TlsConfiguration, Transport,
};
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, RootCertStore, ServerName};
use tracing::{debug, info, instrument, warn};

use contracts::{ContractError, Message, MessageSource, MqttConfig, Receiver, TrustMaterial};

use crate::error::{IngestionError, Result};
use crate::ChannelSource;

/// Publishes buffered between the event loop and the receiver
pub const MQTT_CHANNEL_CAPACITY: usize = 64;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(300);

/// Host, port and transport parsed from `mqtt.url`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerAddress {
    /// Parse `scheme://host[:port]`.
    ///
    /// `tcp`/`mqtt` connect in plain text (default port 1883), `ssl`/`tls`/`mqtts`
    /// over TLS (default port 8883). A missing scheme means `tcp`.
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url.split_once("://").unwrap_or(("tcp", url));
        let tls = match scheme.to_ascii_lowercase().as_str() {
            "tcp" | "mqtt" => false,
            "ssl" | "tls" | "mqtts" => true,
            other => {
                return Err(IngestionError::broker_config(format!(
                    "unsupported scheme '{other}' in {url}"
                )))
            }
        };

        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    IngestionError::broker_config(format!("invalid port '{port}' in {url}"))
                })?;
                (host, port)
            }
            None => (authority, if tls { 8883 } else { 1883 }),
        };
        if host.is_empty() {
            return Err(IngestionError::broker_config(format!("missing host in {url}")));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }
}

/// Map a broker publish to a routed message, stamped with the receive time
pub fn message_from_publish(publish: Publish) -> Message {
    let message = Message::new(publish.topic, publish.payload);
    if publish.retain {
        message.retained()
    } else {
        message
    }
}

/// Client config trusting `trust` (or nothing when absent).
///
/// With `insecure` the server certificate is not verified at all.
pub fn tls_config(trust: Option<&TrustMaterial>, insecure: bool) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    if let Some(trust) = trust {
        let pem = trust
            .load()
            .map_err(|e| IngestionError::tls(format!("failed to load tls_server_cert: {e}")))?;
        let ders = rustls_pemfile::certs(&mut pem.as_bytes())
            .map_err(|e| IngestionError::tls(format!("failed to parse tls_server_cert: {e}")))?;
        let (added, _) = roots.add_parsable_certificates(&ders[..]);
        if added == 0 {
            return Err(IngestionError::tls("no certificates found in tls_server_cert"));
        }
    }

    let mut config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    if insecure {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyServerCert));
    }
    Ok(config)
}

struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

fn transport(address: &BrokerAddress, config: &MqttConfig) -> Result<Transport> {
    if !address.tls {
        return Ok(Transport::Tcp);
    }
    let trust = config.trust_material();
    if trust.is_none() && !config.tls_server_insecure {
        return Ok(Transport::tls_with_default_config());
    }
    let tls = tls_config(trust.as_ref(), config.tls_server_insecure)?;
    Ok(Transport::tls_with_config(TlsConfiguration::Rustls(Arc::new(tls))))
}

/// Exponential reconnect delay
struct Backoff {
    current: Duration,
}

impl Backoff {
    const INITIAL: Duration = Duration::from_millis(100);

    fn new() -> Self {
        Self {
            current: Self::INITIAL,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_RECONNECT_DELAY);
        delay
    }

    fn reset(&mut self) {
        self.current = Self::INITIAL;
    }
}

/// Message source subscribed to a live broker
pub struct MqttSource {
    name: String,
    client_id: String,
    options: MqttOptions,
    topics: Vec<String>,
}

impl MqttSource {
    /// Build the connection options from `config`; nothing connects until `run`.
    pub fn new(config: &MqttConfig, topics: Vec<String>) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| IngestionError::broker_config("mqtt.url is not set"))?;
        let address = BrokerAddress::parse(url)?;

        let client_id = match config.client_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("mqlux-{:06}", chrono::Utc::now().timestamp_subsec_micros()),
        };

        let mut options = MqttOptions::new(client_id.clone(), address.host.clone(), address.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }
        options.set_transport(transport(&address, config)?);

        Ok(Self {
            name: format!("mqtt://{}:{}", address.host, address.port),
            client_id,
            options,
            topics,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Drive the event loop, forwarding publishes into `tx`.
    ///
    /// Returns once the receiving side is gone or the broker can not be
    /// reached at all. After the first successful connect, failures are
    /// retried with backoff.
    async fn pump(
        &self,
        client: AsyncClient,
        mut eventloop: EventLoop,
        tx: async_channel::Sender<Message>,
    ) -> Result<()> {
        let mut backoff = Backoff::new();
        let mut connected = false;

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(IngestionError::connection(format!(
                            "connection rejected: {:?}",
                            ack.code
                        )));
                    }
                    info!(source_name = %self.name, reconnect = connected, "connected to broker");
                    connected = true;
                    backoff.reset();
                    // clean sessions drop subscriptions on reconnect
                    for topic in &self.topics {
                        if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                            warn!(source_name = %self.name, topic = %topic, error = %e, "subscribe failed");
                        }
                    }
                }
                Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                    debug!(source_name = %self.name, pkid = ack.pkid, "subscription confirmed");
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    metrics::counter!("mqlux_mqtt_messages_total").increment(1);
                    if tx.send(message_from_publish(publish)).await.is_err() {
                        let _ = client.try_disconnect();
                        return Ok(());
                    }
                }
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(IngestionError::connection(format!(
                        "connection refused: {code:?}"
                    )));
                }
                Err(e) if !connected => {
                    return Err(IngestionError::connection(e.to_string()));
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    metrics::counter!("mqlux_mqtt_reconnects_total").increment(1);
                    warn!(
                        source_name = %self.name,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "broker connection lost, reconnecting"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl MessageSource for MqttSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "mqtt_source_run", skip(self, receiver), fields(source_name = %self.name))]
    async fn run(&mut self, receiver: Arc<dyn Receiver>) -> std::result::Result<u64, ContractError> {
        info!(
            source_name = %self.name,
            client_id = %self.client_id,
            topics = ?self.topics,
            "subscribing to broker"
        );
        let (client, eventloop) = AsyncClient::new(self.options.clone(), MQTT_CHANNEL_CAPACITY);
        let (tx, mut channel) = ChannelSource::channel(self.name.clone(), MQTT_CHANNEL_CAPACITY);

        let (pumped, delivered) =
            tokio::join!(self.pump(client, eventloop, tx), channel.run(receiver));

        let delivered = delivered?;
        pumped.map_err(|e| ContractError::source(&self.name, e.to_string()))?;
        Ok(delivered)
    }
}
