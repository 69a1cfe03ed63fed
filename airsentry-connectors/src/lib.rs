//! Broker connectors for AirSentry
//!
//! ## Overview
//!
//! `airsentry-core` drives a [`Connector`](airsentry_core::session::Connector)
//! and the [`Session`](airsentry_core::session::Session) it yields; it never
//! speaks a wire protocol itself. This crate supplies the implementation the
//! devices actually use.
//!
//! ### MQTT over TLS
//!
//! **Connection:**
//! - Mutual TLS: root CA, client certificate and private key in PEM
//! - Client id is the device identity
//! - Clean session, keep-alive from the device configuration
//!
//! **Delivery:**
//! - One QoS 1 publish per cycle, not retained
//! - PUBACK observed while draining, logged with its packet id
//! - DISCONNECT sent at the end of the cycle, whatever the outcome
//!
//! ### Host runner
//!
//! With the `host` feature: bench probes, a sleeping power controller and
//! an optional UDP copy of the log for headless nodes.
//!
//! ## Failure Classification
//!
//! | rumqttc error                    | Attempt error | Retried |
//! |----------------------------------|---------------|---------|
//! | `Io`, `Tls`                      | transport     | yes     |
//! | `NetworkTimeout`, `FlushTimeout` | transport     | yes     |
//! | `ConnectionRefused`              | protocol      | no      |
//! | `NotConnAck`, anything else      | protocol      | no      |
//! | missing PEM material             | credentials   | no      |
//!
//! ## Example Usage
//!
//! ```no_run
//! use airsentry_connectors::mqtt::RumqttConnector;
//! use airsentry_core::{Credentials, DeviceConfig, DutyCycleScheduler, SensorSuite};
//!
//! # async fn example(sensors: SensorSuite) -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::from_pem_files(
//!     "aq-001", "broker.example.net", 8883,
//!     "ca.pem", "aq-001.pem", "aq-001.key",
//! )?;
//! let scheduler = DutyCycleScheduler::new(DeviceConfig::default(), credentials, RumqttConnector::new())?;
//! let report = scheduler.run(sensors).await;
//! println!("{:?}", report.outcome);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "host")]
pub mod host;

#[cfg(feature = "host")]
pub mod udp_log;

// Re-export common types
#[cfg(feature = "mqtt")]
pub use mqtt::{RumqttConnector, RumqttSession};

#[cfg(feature = "host")]
pub use host::{BenchReadings, CredentialPaths, HostConfig, SleepController};

#[cfg(feature = "host")]
pub use udp_log::{LoggingError, UdpLogConfig, UdpLogSink};
