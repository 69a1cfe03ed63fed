//! Connection establishment with jittered exponential backoff
//!
//! ## State Machine
//!
//! ```text
//!            ┌──────────── Retry(delay): sleep ────────────┐
//!            ▼                                             │
//!   ──→ [Attempt k] ──Transport error──→ next_backoff() ───┤
//!            │                                             │
//!            │ Protocol error                   Exhausted  │
//!            ▼                                             ▼
//!   ProtocolRejected (terminal)               RetriesExhausted (terminal)
//!            │
//!            └── Ok(session) ──→ handed to the publisher
//! ```
//!
//! Only transport failures are retried. A broker that completes the TLS
//! handshake and then refuses the session will refuse it again, so that
//! ends the cycle immediately. So does missing credential material.
//!
//! Every attempt is also bounded by the sum of the transport, handshake
//! and session timeouts, whatever the connector does internally.

use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backoff::{BackoffConfig, BackoffState, BackoffStatus};
use crate::config::{ConnectionConfig, Credentials};
use crate::errors::{AttemptError, ConnectionError, TransportError};
use crate::session::Connector;

/// Drives a [`Connector`] until it yields a session or the budget runs out
pub struct ConnectionManager<C, R = StdRng> {
    connector: C,
    backoff: BackoffConfig,
    rng: R,
    attempts: u32,
}

impl<C: Connector> ConnectionManager<C, StdRng> {
    /// Manager with an entropy-seeded jitter source
    pub fn new(connector: C, backoff: BackoffConfig) -> Self {
        Self::with_rng(connector, backoff, StdRng::from_entropy())
    }
}

impl<C: Connector, R: Rng + Send> ConnectionManager<C, R> {
    /// Manager with an explicit jitter source
    pub fn with_rng(connector: C, backoff: BackoffConfig, rng: R) -> Self {
        Self {
            connector,
            backoff,
            rng,
            attempts: 0,
        }
    }

    /// Attempts made by the last `connect` call
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Establish a session
    pub async fn connect(
        &mut self,
        credentials: &Credentials,
        config: &ConnectionConfig,
    ) -> Result<C::Session, ConnectionError> {
        let mut state = BackoffState::new(self.backoff);
        let attempt_budget = config.attempt_budget();
        self.attempts = 0;

        info!(
            "connecting to {}:{} as {}",
            credentials.broker_host, credentials.broker_port, credentials.device_id
        );

        loop {
            self.attempts += 1;
            let attempt = tokio::time::timeout(attempt_budget, self.connector.attempt(credentials, config))
                .await
                .unwrap_or(Err(AttemptError::Transport(TransportError::Timeout(attempt_budget))));

            let transport_error = match attempt {
                Ok(session) => {
                    info!("session established on attempt {}", self.attempts);
                    return Ok(session);
                }
                Err(AttemptError::Protocol(e)) => {
                    error!("broker rejected session: {}", e);
                    return Err(ConnectionError::ProtocolRejected(e));
                }
                Err(AttemptError::Credentials(reason)) => {
                    error!("cannot connect with these credentials: {}", reason);
                    return Err(ConnectionError::InvalidCredentials(reason));
                }
                Err(AttemptError::Transport(e)) => e,
            };

            match state.next_backoff(&mut self.rng) {
                BackoffStatus::Retry(delay) => {
                    warn!(
                        "connection attempt {} failed: {}; retrying in {:?}",
                        self.attempts, transport_error, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                BackoffStatus::Exhausted => {
                    error!("giving up after {} attempts: {}", self.attempts, transport_error);
                    return Err(ConnectionError::RetriesExhausted {
                        attempts: self.attempts,
                        last: transport_error,
                    });
                }
            }
        }
    }
}
