//! Scripted broker: a connector that fails on cue and sessions that record

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use airsentry_core::config::{ConnectionConfig, Credentials};
use airsentry_core::{AttemptError, Connector, PublishError, QoS, Session, SessionEvent, TransportError};

/// One publish as the session saw it
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Everything the broker side observed during a cycle
#[derive(Debug, Default)]
pub struct BrokerLog {
    pub attempts: u32,
    pub client_ids: Vec<String>,
    pub published: Vec<Published>,
    pub polls: u32,
    pub disconnects: u32,
}

/// Connector that plays back a script of attempt results
pub struct ScriptedConnector {
    script: VecDeque<Result<(), AttemptError>>,
    events: Vec<Result<SessionEvent, PublishError>>,
    publish_error: Option<PublishError>,
    log: Arc<Mutex<BrokerLog>>,
}

impl ScriptedConnector {
    /// Succeeds after `failures` transport errors
    pub fn failing_first(failures: u32) -> Self {
        let script: VecDeque<Result<(), AttemptError>> = (0..failures)
            .map(|_| Err(AttemptError::from(TransportError::Io("connection reset by peer".into()))))
            .collect();
        Self {
            script,
            events: vec![Ok(SessionEvent::Idle)],
            publish_error: None,
            log: Arc::default(),
        }
    }

    /// Session poll results, played back in order, `Idle` once exhausted
    pub fn with_events(mut self, events: Vec<Result<SessionEvent, PublishError>>) -> Self {
        self.events = events;
        self
    }

    /// Make the first publish fail
    pub fn with_publish_error(mut self, error: PublishError) -> Self {
        self.publish_error = Some(error);
        self
    }

    /// Shared handle on what the broker saw
    pub fn log(&self) -> Arc<Mutex<BrokerLog>> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Session = RecordingSession;

    async fn attempt(
        &mut self,
        credentials: &Credentials,
        _config: &ConnectionConfig,
    ) -> Result<RecordingSession, AttemptError> {
        {
            let mut log = self.log.lock().unwrap();
            log.attempts += 1;
            log.client_ids.push(credentials.device_id.clone());
        }

        if let Some(Err(e)) = self.script.pop_front() {
            return Err(e);
        }
        Ok(RecordingSession {
            events: self.events.drain(..).collect(),
            publish_error: self.publish_error.take(),
            log: Arc::clone(&self.log),
        })
    }
}

/// Session that records publishes and plays back poll events
pub struct RecordingSession {
    events: VecDeque<Result<SessionEvent, PublishError>>,
    publish_error: Option<PublishError>,
    log: Arc<Mutex<BrokerLog>>,
}

#[async_trait]
impl Session for RecordingSession {
    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), PublishError> {
        if let Some(e) = self.publish_error.take() {
            return Err(e);
        }
        self.log.lock().unwrap().published.push(Published {
            topic: topic.to_owned(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        Ok(())
    }

    async fn poll(&mut self, _timeout: Duration) -> Result<SessionEvent, PublishError> {
        self.log.lock().unwrap().polls += 1;
        self.events.pop_front().unwrap_or(Ok(SessionEvent::Idle))
    }

    async fn disconnect(&mut self) {
        self.log.lock().unwrap().disconnects += 1;
    }
}
