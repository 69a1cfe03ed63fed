//! Device configuration and credentials
//!
//! Every field defaults to the reference firmware values, so an empty JSON
//! object is a valid configuration. Durations are integer milliseconds on
//! the wire.
//!
//! ```rust
//! use std::time::Duration;
//! use airsentry_core::DeviceConfig;
//!
//! let config = DeviceConfig::default()
//!     .sleep_interval(Duration::from_secs(900))
//!     .max_attempts(8);
//! assert!(config.validate().is_ok());
//! ```

use core::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffConfig;
use crate::errors::ConfigError;

/// Serde adapter for `Duration` as integer milliseconds
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as milliseconds
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    /// Deserialize from milliseconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    /// Same, for optional durations
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize as milliseconds or null
        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize from milliseconds or null
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
        }
    }
}

/// Transport and session parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// TCP connect timeout per attempt
    #[serde(with = "duration_ms")]
    pub transport_timeout: Duration,
    /// TLS handshake timeout per attempt
    #[serde(with = "duration_ms")]
    pub handshake_timeout: Duration,
    /// Wait for the broker's session acknowledgment
    #[serde(with = "duration_ms")]
    pub session_timeout: Duration,
    /// Keep-alive interval announced to the broker
    #[serde(with = "duration_ms")]
    pub keep_alive: Duration,
    /// Start without resuming any prior session state
    pub clean_session: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            transport_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            session_timeout: Duration::from_secs(10),
            keep_alive: Duration::from_secs(20),
            clean_session: true,
        }
    }
}

impl ConnectionConfig {
    /// Upper bound on one attempt: transport, handshake and session back to back
    pub fn attempt_budget(&self) -> Duration {
        self.transport_timeout + self.handshake_timeout + self.session_timeout
    }
}

/// Publish and drain parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Longest single wait on the session event loop
    #[serde(with = "duration_ms")]
    pub poll_timeout: Duration,
    /// Pause between two polls
    #[serde(with = "duration_ms")]
    pub poll_delay: Duration,
    /// Polls allowed before the publish is declared unsettled
    pub max_polls: u32,
    /// Largest payload accepted, in bytes
    pub max_payload: usize,
    /// Bound on the wait for sensor workers; `None` waits forever
    #[serde(with = "duration_ms::option")]
    pub sensor_timeout: Option<Duration>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(2),
            poll_delay: Duration::from_secs(3),
            max_polls: 10,
            max_payload: 1024,
            sensor_timeout: None,
        }
    }
}

/// Sampling parameters for the five workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Successful humidity reads averaged per cycle
    pub humidity_samples: u32,
    /// Pause after each humidity read
    #[serde(with = "duration_ms")]
    pub humidity_retry_delay: Duration,
    /// Humidity reads allowed before giving up
    pub humidity_max_attempts: u32,
    /// Pause after a failed CO2 read
    #[serde(with = "duration_ms")]
    pub co2_retry_delay: Duration,
    /// CO2 reads allowed before giving up
    pub co2_max_attempts: u32,
    /// Raw gas samples averaged
    pub gas_samples: u32,
    /// Raw light samples averaged
    pub light_samples: u32,
    /// Raw power samples averaged
    pub power_samples: u32,
    /// Resistive divider ratio on the power rail
    pub power_divider_ratio: f64,
    /// ADC reference voltage, millivolts
    pub adc_reference_mv: u32,
    /// Largest raw ADC code
    pub adc_full_scale: u16,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            humidity_samples: 10,
            humidity_retry_delay: Duration::from_millis(50),
            humidity_max_attempts: 100,
            co2_retry_delay: Duration::from_millis(200),
            co2_max_attempts: 100,
            gas_samples: 10,
            light_samples: 10,
            power_samples: 500,
            power_divider_ratio: 0.047,
            adc_reference_mv: 1100,
            adc_full_scale: 4095,
        }
    }
}

/// Complete device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Transport and session
    pub connection: ConnectionConfig,
    /// Connection retry
    pub backoff: BackoffConfig,
    /// Publish and drain
    pub publish: PublishConfig,
    /// Sensor workers
    pub sampling: SamplingConfig,
    /// Suspension requested at the end of every cycle
    #[serde(with = "duration_ms")]
    pub sleep_interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            backoff: BackoffConfig::default(),
            publish: PublishConfig::default(),
            sampling: SamplingConfig::default(),
            sleep_interval: Duration::from_secs(15),
        }
    }
}

impl DeviceConfig {
    /// Parse from JSON text
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Reject combinations that cannot run a cycle
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff.max_attempts == 0 {
            return Err(ConfigError::Invalid("backoff.max_attempts must be at least 1"));
        }
        if self.backoff.max_delay < self.backoff.base_delay {
            return Err(ConfigError::Invalid("backoff.max_delay is below backoff.base_delay"));
        }
        let s = &self.sampling;
        if s.humidity_samples == 0 || s.gas_samples == 0 || s.light_samples == 0 || s.power_samples == 0 {
            return Err(ConfigError::Invalid("sample counts must be at least 1"));
        }
        if s.humidity_max_attempts < s.humidity_samples || s.co2_max_attempts == 0 {
            return Err(ConfigError::Invalid("retry caps cannot be below the samples they must collect"));
        }
        if !(s.power_divider_ratio > 0.0) || s.adc_full_scale == 0 {
            return Err(ConfigError::Invalid("power calibration needs a positive ratio and full scale"));
        }
        if self.publish.max_payload == 0 {
            return Err(ConfigError::Invalid("publish.max_payload must be positive"));
        }
        if self.publish.max_polls == 0 {
            return Err(ConfigError::Invalid("publish.max_polls must be at least 1"));
        }
        Ok(())
    }

    /// Set the suspension interval
    pub fn sleep_interval(mut self, interval: Duration) -> Self {
        self.sleep_interval = interval;
        self
    }

    /// Set the connection attempt budget
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.backoff.max_attempts = attempts;
        self
    }

    /// Set base and cap of the connection backoff
    pub fn backoff_delays(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff.base_delay = base;
        self.backoff.max_delay = cap;
        self
    }

    /// Bound the publisher's wait for sensor workers
    pub fn sensor_timeout(mut self, timeout: Duration) -> Self {
        self.publish.sensor_timeout = Some(timeout);
        self
    }
}

/// Broker credentials and identity for one cycle
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// PEM root CA used to verify the broker
    pub root_ca: Vec<u8>,
    /// PEM client certificate
    pub client_cert: Vec<u8>,
    /// PEM private key matching `client_cert`
    pub private_key: Vec<u8>,
    /// Device identity, used as client id and topic level
    pub device_id: String,
    /// Broker host name
    pub broker_host: String,
    /// Broker port
    pub broker_port: u16,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("device_id", &self.device_id)
            .field("broker_host", &self.broker_host)
            .field("broker_port", &self.broker_port)
            .field("root_ca", &format_args!("<{} bytes>", self.root_ca.len()))
            .field("client_cert", &format_args!("<{} bytes>", self.client_cert.len()))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Credentials from in-memory PEM material
    pub fn new(
        device_id: impl Into<String>,
        broker_host: impl Into<String>,
        broker_port: u16,
    ) -> Self {
        Self {
            root_ca: Vec::new(),
            client_cert: Vec::new(),
            private_key: Vec::new(),
            device_id: device_id.into(),
            broker_host: broker_host.into(),
            broker_port,
        }
    }

    /// Attach PEM material
    pub fn with_pem(mut self, root_ca: Vec<u8>, client_cert: Vec<u8>, private_key: Vec<u8>) -> Self {
        self.root_ca = root_ca;
        self.client_cert = client_cert;
        self.private_key = private_key;
        self
    }

    /// Read PEM material from three files
    pub fn from_pem_files(
        device_id: impl Into<String>,
        broker_host: impl Into<String>,
        broker_port: u16,
        root_ca: impl AsRef<Path>,
        client_cert: impl AsRef<Path>,
        private_key: impl AsRef<Path>,
    ) -> Result<Self, ConfigError> {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })
        };
        Ok(Self::new(device_id, broker_host, broker_port).with_pem(
            read(root_ca.as_ref())?,
            read(client_cert.as_ref())?,
            read(private_key.as_ref())?,
        ))
    }
}
