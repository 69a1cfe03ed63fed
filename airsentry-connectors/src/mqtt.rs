//! MQTT over mutually authenticated TLS, on `rumqttc`
//!
//! ## Attempt
//!
//! One [`Connector::attempt`] builds a fresh client and drives its event
//! loop until CONNACK:
//!
//! ```text
//! TCP connect ─→ TLS handshake ─→ CONNECT ─→ CONNACK
//!   Io             Tls                        ConnectionRefused
//!   └── transport (retried) ┘                 └ protocol (terminal)
//!
//! ├──────────── one rumqttc timeout: NetworkTimeout ────────────┤
//! ```
//!
//! `rumqttc` runs all four steps under a single whole-second timeout and
//! cannot say which one stalled. That timeout is therefore the attempt
//! budget (transport + handshake + session) rounded up, and a stall is a
//! transport timeout. A `tokio` timeout at the exact budget caps the rest.
//!
//! The client id is the device identity, the session is clean and the
//! keep-alive comes from [`ConnectionConfig`].
//!
//! ## Session
//!
//! `rumqttc` only moves packets while its event loop is polled, so the
//! session counts acknowledged publishes still in flight. A poll with
//! nothing in flight reports idle without touching the network.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, NetworkOptions, Outgoing, Packet,
    TlsConfiguration, Transport,
};

use airsentry_core::config::{ConnectionConfig, Credentials};
use airsentry_core::errors::{AttemptError, ProtocolError, PublishError, TransportError};
use airsentry_core::session::{Connector, QoS, Session, SessionEvent};

/// Request channel capacity of each client
pub const DEFAULT_CAPACITY: usize = 10;

/// Bound on the teardown exchange after DISCONNECT
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Connector producing [`RumqttSession`]s
#[derive(Debug, Clone)]
pub struct RumqttConnector {
    capacity: usize,
}

impl Default for RumqttConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl RumqttConnector {
    /// Connector with the default request capacity
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Set the client request channel capacity
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

/// Client options for one attempt
///
/// Fails with the terminal [`AttemptError::Credentials`] when PEM material
/// is missing; nothing can be retried into existence there.
pub fn mqtt_options(credentials: &Credentials, config: &ConnectionConfig) -> Result<MqttOptions, AttemptError> {
    if credentials.root_ca.is_empty() {
        return Err(AttemptError::Credentials("root CA is empty".into()));
    }
    if credentials.client_cert.is_empty() || credentials.private_key.is_empty() {
        return Err(AttemptError::Credentials("client certificate or key is empty".into()));
    }

    let mut options = MqttOptions::new(
        credentials.device_id.clone(),
        credentials.broker_host.clone(),
        credentials.broker_port,
    );
    options
        .set_keep_alive(config.keep_alive)
        .set_clean_session(config.clean_session)
        .set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
            ca: credentials.root_ca.clone(),
            alpn: None,
            client_auth: Some((credentials.client_cert.clone(), credentials.private_key.clone())),
        }));
    Ok(options)
}

/// Seconds handed to `rumqttc` as its connection timeout
pub fn connection_timeout_secs(config: &ConnectionConfig) -> u64 {
    let millis = config.attempt_budget().as_millis();
    u64::try_from(millis.div_ceil(1000)).unwrap_or(u64::MAX).max(1)
}

/// Sort a `rumqttc` failure into retryable transport or terminal protocol
pub fn classify(error: rumqttc::ConnectionError, config: &ConnectionConfig) -> AttemptError {
    use rumqttc::ConnectionError as E;

    match error {
        E::Io(e) => TransportError::Io(e.to_string()).into(),
        E::Tls(e) => TransportError::Tls(e.to_string()).into(),
        E::NetworkTimeout | E::FlushTimeout => TransportError::Timeout(config.attempt_budget()).into(),
        E::ConnectionRefused(code) => ProtocolError::Refused(format!("{code:?}")).into(),
        E::NotConnAck(packet) => ProtocolError::Unexpected(format!("expected CONNACK, got {packet:?}")).into(),
        other => ProtocolError::Unexpected(other.to_string()).into(),
    }
}

async fn await_connack(eventloop: &mut EventLoop, config: &ConnectionConfig) -> Result<(), AttemptError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(ProtocolError::Refused(format!("{code:?}")).into()),
                };
            }
            Ok(event) => debug!("before CONNACK: {:?}", event),
            Err(e) => return Err(classify(e, config)),
        }
    }
}

#[async_trait]
impl Connector for RumqttConnector {
    type Session = RumqttSession;

    async fn attempt(
        &mut self,
        credentials: &Credentials,
        config: &ConnectionConfig,
    ) -> Result<RumqttSession, AttemptError> {
        let options = mqtt_options(credentials, config)?;
        let (client, mut eventloop) = AsyncClient::new(options, self.capacity);

        let mut network = NetworkOptions::new();
        network.set_connection_timeout(connection_timeout_secs(config));
        eventloop.set_network_options(network);

        let budget = config.attempt_budget();
        match tokio::time::timeout(budget, await_connack(&mut eventloop, config)).await {
            Ok(Ok(())) => {
                info!(
                    "CONNACK from {}:{} for {}",
                    credentials.broker_host, credentials.broker_port, credentials.device_id
                );
                Ok(RumqttSession {
                    client,
                    eventloop,
                    in_flight: 0,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout(budget).into()),
        }
    }
}

/// An established `rumqttc` session
pub struct RumqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
    in_flight: u32,
}

impl RumqttSession {
    /// Acknowledged publishes not yet acknowledged
    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }
}

fn to_rumqttc(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
    }
}

#[async_trait]
impl Session for RumqttSession {
    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), PublishError> {
        self.client
            .publish(topic, to_rumqttc(qos), retain, payload.to_vec())
            .await
            .map_err(|e| PublishError::Send(e.to_string()))?;
        if qos == QoS::AtLeastOnce {
            self.in_flight += 1;
        }
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<SessionEvent, PublishError> {
        if self.in_flight == 0 {
            return Ok(SessionEvent::Idle);
        }

        match tokio::time::timeout(timeout, self.eventloop.poll()).await {
            Ok(Ok(Event::Incoming(Packet::PubAck(ack)))) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                Ok(SessionEvent::Acknowledged { packet_id: ack.pkid })
            }
            Ok(Ok(Event::Outgoing(Outgoing::Publish(pkid)))) => {
                debug!("publish {} written", pkid);
                Ok(SessionEvent::Progress)
            }
            Ok(Ok(event)) => {
                debug!("event loop: {:?}", event);
                Ok(SessionEvent::Progress)
            }
            Ok(Err(e)) => Err(PublishError::Drain(e.to_string())),
            Err(_) => Ok(SessionEvent::Progress),
        }
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("could not queue DISCONNECT: {}", e);
            return;
        }

        let teardown = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("event loop closed: {}", e);
                        break;
                    }
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_GRACE, teardown).await.is_err() {
            warn!("DISCONNECT not flushed within {:?}", DISCONNECT_GRACE);
        } else {
            info!("session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    const DEVICE_PEM: &[u8] = include_bytes!("../tests/fixtures/device.pem");
    const DEVICE_KEY: &[u8] = include_bytes!("../tests/fixtures/device.key");

    fn credentials() -> Credentials {
        Credentials::new("aq-001", "127.0.0.1", 8883).with_pem(
            b"ca".to_vec(),
            b"cert".to_vec(),
            b"key".to_vec(),
        )
    }

    #[test]
    fn options_carry_identity_and_session_flags() {
        let config = ConnectionConfig::default();
        let options = mqtt_options(&credentials(), &config).unwrap();

        assert_eq!(options.client_id(), "aq-001");
        assert_eq!(options.broker_address(), ("127.0.0.1".to_string(), 8883));
        assert_eq!(options.keep_alive(), Duration::from_secs(20));
        assert!(options.clean_session());
    }

    #[test]
    fn missing_pem_is_a_terminal_credentials_error() {
        let bare = Credentials::new("aq-001", "127.0.0.1", 8883);
        let err = mqtt_options(&bare, &ConnectionConfig::default()).unwrap_err();
        assert!(matches!(err, AttemptError::Credentials(_)));
    }

    #[test]
    fn connection_timeout_covers_the_whole_attempt() {
        assert_eq!(connection_timeout_secs(&ConnectionConfig::default()), 20);

        let uneven = ConnectionConfig {
            transport_timeout: Duration::from_millis(1500),
            handshake_timeout: Duration::from_secs(1),
            session_timeout: Duration::from_secs(1),
            ..ConnectionConfig::default()
        };
        assert_eq!(connection_timeout_secs(&uneven), 4);

        let tiny = ConnectionConfig {
            transport_timeout: Duration::ZERO,
            handshake_timeout: Duration::ZERO,
            session_timeout: Duration::from_millis(10),
            ..ConnectionConfig::default()
        };
        assert_eq!(connection_timeout_secs(&tiny), 1);
    }

    #[tokio::test]
    async fn silent_broker_is_given_the_full_attempt_budget() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept and hold the socket without ever answering the handshake
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(socket);
        });

        let config = ConnectionConfig {
            transport_timeout: Duration::from_millis(500),
            handshake_timeout: Duration::from_millis(500),
            session_timeout: Duration::from_secs(1),
            ..ConnectionConfig::default()
        };
        let credentials = Credentials::new("aq-001", "127.0.0.1", port).with_pem(
            DEVICE_PEM.to_vec(),
            DEVICE_PEM.to_vec(),
            DEVICE_KEY.to_vec(),
        );

        let started = std::time::Instant::now();
        let err = RumqttConnector::new()
            .attempt(&credentials, &config)
            .await
            .err()
            .unwrap();
        let waited = started.elapsed();
        server.abort();

        assert_eq!(err, AttemptError::Transport(TransportError::Timeout(Duration::from_secs(2))));
        assert!(waited >= Duration::from_millis(1900), "gave up after {waited:?}");
        assert!(waited < Duration::from_secs(5), "overran the budget: {waited:?}");
    }

    #[test]
    fn failures_are_classified() {
        let config = ConnectionConfig::default();

        let io = rumqttc::ConnectionError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(matches!(classify(io, &config), AttemptError::Transport(TransportError::Io(_))));

        assert_eq!(
            classify(rumqttc::ConnectionError::NetworkTimeout, &config),
            AttemptError::Transport(TransportError::Timeout(Duration::from_secs(20)))
        );

        let refused = rumqttc::ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized);
        assert!(matches!(classify(refused, &config), AttemptError::Protocol(ProtocolError::Refused(_))));
    }

    #[tokio::test]
    async fn closed_port_is_a_transport_failure() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let credentials = Credentials::new("aq-001", "127.0.0.1", port).with_pem(
            b"ca".to_vec(),
            b"cert".to_vec(),
            b"key".to_vec(),
        );

        let err = RumqttConnector::new()
            .attempt(&credentials, &ConnectionConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AttemptError::Transport(_)));
    }

    #[tokio::test]
    async fn idle_session_does_not_touch_the_network() {
        let options = mqtt_options(&credentials(), &ConnectionConfig::default()).unwrap();
        let (client, eventloop) = AsyncClient::new(options, 1);
        let mut session = RumqttSession {
            client,
            eventloop,
            in_flight: 0,
        };

        let event = session.poll(Duration::from_secs(2)).await.unwrap();
        assert_eq!(event, SessionEvent::Idle);
    }
}
