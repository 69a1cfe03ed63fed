//! Broker transport seam
//!
//! The cycle drives a session; it does not implement one. A [`Connector`]
//! performs a single attempt (transport handshake, then protocol session)
//! and classifies any failure, so the connection manager can decide between
//! backing off and giving up. A [`Session`] publishes and exposes its event
//! loop one poll at a time.
//!
//! ```text
//! ConnectionManager ──attempt()──→ Connector ──→ TLS + CONNECT
//!        │                                   ←── Session | AttemptError
//!        ▼
//! TelemetryPublisher ──publish()/poll()──→ Session ──→ broker
//! ```

use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ConnectionConfig, Credentials};
use crate::errors::{AttemptError, PublishError};

/// Delivery guarantee of a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    /// Fire and forget
    AtMostOnce,
    /// Acknowledged, possibly duplicated
    AtLeastOnce,
}

/// What one poll of the session event loop observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The broker acknowledged a publish
    Acknowledged {
        /// Packet identifier of the acknowledged publish
        packet_id: u16,
    },
    /// Traffic moved but acknowledgments are still outstanding
    Progress,
    /// Nothing left in flight
    Idle,
}

/// An established broker session, owned by exactly one publisher
#[async_trait]
pub trait Session: Send {
    /// Queue one message for delivery
    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), PublishError>;

    /// Drive the event loop for at most `timeout`
    async fn poll(&mut self, timeout: Duration) -> Result<SessionEvent, PublishError>;

    /// Close the session; errors are logged by the implementation
    async fn disconnect(&mut self);
}

/// Factory for sessions, one attempt at a time
#[async_trait]
pub trait Connector: Send {
    /// Session type produced on success
    type Session: Session + 'static;

    /// Handshake and establish a session once
    ///
    /// Transport failures are retryable; protocol failures are not.
    async fn attempt(
        &mut self,
        credentials: &Credentials,
        config: &ConnectionConfig,
    ) -> Result<Self::Session, AttemptError>;
}
