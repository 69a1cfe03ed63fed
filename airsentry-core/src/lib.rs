//! Duty-cycle engine for AirSentry
//!
//! Samples five sensor modalities in parallel, connects to the broker with
//! jittered backoff at the same time, publishes one acknowledged telemetry
//! message and asks to be suspended until the next cycle.
//!
//! Key constraints:
//! - One cycle per boot, no state carried between cycles
//! - Sensor results reach the publisher only through a completion barrier
//! - Every failure ends in a definite outcome and a suspension request
//!
//! ```no_run
//! use airsentry_core::{Credentials, DeviceConfig, DutyCycleScheduler, SensorSuite};
//! # use airsentry_core::session::Connector;
//! # async fn cycle<C: Connector + 'static>(connector: C, sensors: SensorSuite) -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeviceConfig::from_json_file("device.json")?;
//! let credentials = Credentials::from_pem_files(
//!     "aq-001", "broker.example.net", 8883,
//!     "ca.pem", "device.pem", "device.key",
//! )?;
//!
//! let report = DutyCycleScheduler::new(config, credentials, connector)?
//!     .run(sensors)
//!     .await;
//! println!("{:?}, sleeping {:?}", report.outcome, report.suspend.interval);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregate;
pub mod backoff;
pub mod barrier;
pub mod config;
pub mod connection;
pub mod errors;
pub mod message;
pub mod publisher;
pub mod reading;
pub mod scheduler;
pub mod sensors;
pub mod session;
pub mod time;

// Public API
pub use aggregate::{ReleasedReadings, ResultAggregate, SlotWriter};
pub use backoff::{BackoffConfig, BackoffState, BackoffStatus};
pub use barrier::{CompletionBarrier, CycleSignal, Signal, SignalSet, WaitMode};
pub use config::{ConnectionConfig, Credentials, DeviceConfig, PublishConfig, SamplingConfig};
pub use connection::ConnectionManager;
pub use errors::{
    AcquisitionError, AttemptError, ConfigError, ConnectionError, MessageError, ProtocolError, PublishError,
    TransportError,
};
pub use message::{telemetry_topic, TelemetryMessage};
pub use publisher::{PublishOutcome, TelemetryPublisher};
pub use reading::{Modality, Reading};
pub use scheduler::{
    CycleContext, CycleOutcome, CyclePhase, CycleReport, DutyCycleScheduler, PowerController, SuspendRequest,
};
pub use sensors::SensorSuite;
pub use session::{Connector, QoS, Session, SessionEvent};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
