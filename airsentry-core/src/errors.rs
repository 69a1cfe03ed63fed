//! Error Types for the Duty Cycle
//!
//! ## Design Philosophy
//!
//! A duty cycle has no one to report to except the log. Every component
//! therefore turns its failures into a definite outcome at its own boundary
//! and hands that outcome to its caller; nothing escapes as a panic.
//!
//! ## Error Categories
//!
//! ### Recoverable
//! - `TransportError`: TCP connect or TLS handshake failed. Retried with
//!   jittered backoff by the connection manager.
//! - `AcquisitionError`: a single sensor read failed. Retried by the worker
//!   until its retry cap.
//!
//! ### Fatal to the cycle
//! - `ConnectionError::RetriesExhausted`: every transport attempt failed.
//! - `ConnectionError::ProtocolRejected`: the broker refused the session
//!   after a successful handshake. Never retried.
//! - `ConnectionError::InvalidCredentials`: PEM material is missing. Never
//!   retried.
//!
//! ### Logged, non-fatal
//! - `PublishError`: send or drain failure. The device still sleeps.
//!
//! ## Handling Strategy
//!
//! ```rust
//! use airsentry_core::{ConnectionError, CycleOutcome};
//!
//! fn summarize(outcome: &CycleOutcome) -> &'static str {
//!     match outcome {
//!         CycleOutcome::Published { .. } => "delivered",
//!         CycleOutcome::PublishFailed(_) => "connected, publish failed",
//!         CycleOutcome::ConnectionFailed(ConnectionError::RetriesExhausted { .. }) => "broker unreachable",
//!         CycleOutcome::ConnectionFailed(ConnectionError::ProtocolRejected(_)) => "broker refused session",
//!         CycleOutcome::ConnectionFailed(ConnectionError::InvalidCredentials(_)) => "device not provisioned",
//!         CycleOutcome::Aborted(_) => "publish task died",
//!     }
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::reading::Modality;

/// A sensor could not produce a valid sample
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    /// The probe did not answer in time
    #[error("sensor timed out")]
    Timeout,

    /// The probe answered with a frame that failed its integrity check
    #[error("invalid response from sensor: {0}")]
    InvalidResponse(&'static str),

    /// The probe is not wired or not powered
    #[error("sensor not present")]
    NotPresent,

    /// A retrying worker hit its attempt cap
    #[error("{modality} gave no valid reading after {attempts} attempts")]
    RetriesExhausted {
        /// Worker that gave up
        modality: Modality,
        /// Attempts made, including the last failure
        attempts: u32,
    },
}

/// The transport layer (TCP connect + TLS handshake) failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// TCP connect or TLS handshake did not finish within its timeout
    #[error("transport timed out after {0:?}")]
    Timeout(Duration),

    /// TLS negotiation failed (bad certificate, unknown CA, ...)
    #[error("TLS handshake failed: {0}")]
    Tls(String),

    /// Socket-level failure
    #[error("I/O error: {0}")]
    Io(String),
}

/// The broker refused the protocol session after the transport was up
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// CONNACK carried a non-success return code
    #[error("connection refused by broker: {0}")]
    Refused(String),

    /// The broker answered with something other than CONNACK
    #[error("unexpected packet during session setup: {0}")]
    Unexpected(String),
}

/// Result of a single connection attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// Retryable transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Terminal protocol failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Credentials cannot form a TLS configuration; terminal
    #[error("invalid credentials: {0}")]
    Credentials(String),
}

/// Terminal outcome of the connection manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Every transport attempt failed
    #[error("connection retries exhausted after {attempts} attempts (last error: {last})")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Error reported by the final attempt
        last: TransportError,
    },

    /// The handshake succeeded but the broker refused the session
    #[error("session rejected: {0}")]
    ProtocolRejected(ProtocolError),

    /// PEM material is missing or unusable, so no attempt can succeed
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Message or topic could not be built
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Device identity is empty
    #[error("device id is empty")]
    EmptyDeviceId,

    /// Device identity contains a character that is not allowed in a topic level
    #[error("device id contains reserved topic character {0:?}")]
    InvalidDeviceId(char),

    /// Topic does not fit the topic buffer
    #[error("topic needs {required} bytes, capacity is {capacity}")]
    TopicTooLong {
        /// Bytes the topic would need
        required: usize,
        /// Buffer capacity
        capacity: usize,
    },

    /// Payload exceeds the configured maximum
    #[error("payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge {
        /// Serialized size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
}

/// Publishing or draining the acknowledgment cycle failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Message could not be built
    #[error(transparent)]
    Message(#[from] MessageError),

    /// The publish request itself failed
    #[error("publish failed: {0}")]
    Send(String),

    /// The event loop failed before the publish was acknowledged
    #[error("event loop failed while draining: {0}")]
    Drain(String),

    /// The drain loop ran out of polls with work still pending
    #[error("publish still pending after {polls} polls")]
    Unsettled {
        /// Polls performed
        polls: u32,
    },

    /// Sensor workers did not all complete within the configured wait
    #[error("sensor readings incomplete, missing {missing:?}")]
    SensorsIncomplete {
        /// Modalities whose workers had not signalled
        missing: Vec<Modality>,
    },
}

/// Configuration could not be loaded or is inconsistent
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// Offending path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid JSON for the expected structure
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// Values are individually valid but unusable together
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
