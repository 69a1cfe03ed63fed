//! Host runner support
//!
//! Runs duty cycles on a development machine: bench probes stand in for
//! the sensors and suspension is a sleep. The configuration file wraps a
//! [`DeviceConfig`] with credential paths and bench values:
//!
//! ```json
//! {
//!   "device": { "sleep_interval": 60000 },
//!   "credentials": {
//!     "device_id": "aq-001",
//!     "broker_host": "broker.example.net",
//!     "root_ca": "certs/ca.pem",
//!     "client_cert": "certs/aq-001.pem",
//!     "private_key": "certs/aq-001.key"
//!   },
//!   "bench": { "gas_raw": 140 },
//!   "udp_log": { "address": "255.255.255.255", "port": 1337 }
//! }
//! ```
//!
//! `udp_log` is optional; without it records only reach the console.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};

use airsentry_core::errors::{AcquisitionError, ConfigError};
use airsentry_core::scheduler::{PowerController, SuspendRequest};
use airsentry_core::sensors::{AnalogChannel, Co2Probe, Co2Sample, HumidityProbe, HumiditySample, SensorSuite};
use airsentry_core::{Credentials, DeviceConfig};

use crate::udp_log::UdpLogConfig;

/// Default broker port for MQTT over TLS
pub const DEFAULT_BROKER_PORT: u16 = 8883;

fn default_broker_port() -> u16 {
    DEFAULT_BROKER_PORT
}

/// Where the device identity and PEM files live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPaths {
    /// Device identity
    pub device_id: String,
    /// Broker host name
    pub broker_host: String,
    /// Broker port
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,
    /// PEM root CA
    pub root_ca: PathBuf,
    /// PEM client certificate
    pub client_cert: PathBuf,
    /// PEM private key
    pub private_key: PathBuf,
}

impl CredentialPaths {
    /// Read the PEM files, resolving relative paths against `base`
    pub fn load(&self, base: &Path) -> Result<Credentials, ConfigError> {
        Credentials::from_pem_files(
            self.device_id.clone(),
            self.broker_host.clone(),
            self.broker_port,
            base.join(&self.root_ca),
            base.join(&self.client_cert),
            base.join(&self.private_key),
        )
    }
}

/// Values the bench probes report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchReadings {
    /// Humidity probe temperature
    pub temperature_c: i32,
    /// Humidity probe relative humidity
    pub humidity_pct: i32,
    /// CO2 concentration
    pub co2_ppm: i32,
    /// CO2 sensor temperature
    pub co2_temperature_c: i32,
    /// Raw gas code
    pub gas_raw: u16,
    /// Raw light code
    pub light_raw: u16,
    /// Raw power rail code
    pub power_raw: u16,
}

impl Default for BenchReadings {
    fn default() -> Self {
        Self {
            temperature_c: 22,
            humidity_pct: 55,
            co2_ppm: 410,
            co2_temperature_c: 25,
            gas_raw: 120,
            light_raw: 300,
            power_raw: 2048,
        }
    }
}

struct BenchHumidity(HumiditySample);

impl HumidityProbe for BenchHumidity {
    fn read(&mut self) -> Result<HumiditySample, AcquisitionError> {
        Ok(self.0)
    }
}

struct BenchCo2(Co2Sample);

impl Co2Probe for BenchCo2 {
    fn read(&mut self) -> Result<Co2Sample, AcquisitionError> {
        Ok(self.0)
    }
}

struct BenchChannel(u16);

impl AnalogChannel for BenchChannel {
    fn read_raw(&mut self) -> Result<u16, AcquisitionError> {
        Ok(self.0)
    }
}

impl BenchReadings {
    /// Fresh probes for one cycle
    pub fn sensor_suite(&self) -> SensorSuite {
        SensorSuite {
            humidity: Box::new(BenchHumidity(HumiditySample {
                temperature_c: self.temperature_c,
                humidity_pct: self.humidity_pct,
            })),
            co2: Box::new(BenchCo2(Co2Sample {
                ppm: self.co2_ppm,
                temperature_c: self.co2_temperature_c,
            })),
            gas: Box::new(BenchChannel(self.gas_raw)),
            light: Box::new(BenchChannel(self.light_raw)),
            power: Box::new(BenchChannel(self.power_raw)),
            calibration: None,
        }
    }
}

/// Host configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Device configuration
    #[serde(default)]
    pub device: DeviceConfig,
    /// Credential locations
    pub credentials: CredentialPaths,
    /// Bench probe values
    #[serde(default)]
    pub bench: BenchReadings,
    /// Copy diagnostic records to a UDP listener
    #[serde(default)]
    pub udp_log: Option<UdpLogConfig>,
}

impl HostConfig {
    /// Load and validate from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.device.validate()?;
        Ok(config)
    }
}

/// Honors suspension by sleeping
#[derive(Debug, Default)]
pub struct SleepController {
    suspensions: u32,
}

impl SleepController {
    /// Suspensions honored so far
    pub fn suspensions(&self) -> u32 {
        self.suspensions
    }
}

#[async_trait]
impl PowerController for SleepController {
    async fn suspend(&mut self, request: SuspendRequest) {
        self.suspensions += 1;
        info!("suspending for {:?}", request.interval);
        tokio::time::sleep(request.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn host_config_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"credentials":{{"device_id":"aq-001","broker_host":"b","root_ca":"ca.pem","client_cert":"c.pem","private_key":"k.pem"}},"bench":{{"gas_raw":140}}}}"#
        )
        .unwrap();

        let config = HostConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.credentials.broker_port, 8883);
        assert_eq!(config.bench.gas_raw, 140);
        assert_eq!(config.bench.light_raw, 300);
        assert_eq!(config.device, DeviceConfig::default());
        assert_eq!(config.udp_log, None);
    }

    #[test]
    fn udp_log_section_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"credentials":{{"device_id":"aq-001","broker_host":"b","root_ca":"ca.pem","client_cert":"c.pem","private_key":"k.pem"}},"udp_log":{{"port":5140}}}}"#
        )
        .unwrap();

        let config = HostConfig::from_json_file(file.path()).unwrap();
        let udp = config.udp_log.unwrap();
        assert_eq!(udp.target(), "255.255.255.255:5140".parse().unwrap());
    }

    #[test]
    fn credentials_resolve_against_base() {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in [("ca.pem", "CA"), ("c.pem", "CERT"), ("k.pem", "KEY")] {
            std::fs::write(dir.path().join(name), body).unwrap();
        }
        let paths = CredentialPaths {
            device_id: "aq-001".into(),
            broker_host: "b".into(),
            broker_port: 8883,
            root_ca: "ca.pem".into(),
            client_cert: "c.pem".into(),
            private_key: "k.pem".into(),
        };

        let credentials = paths.load(dir.path()).unwrap();
        assert_eq!(credentials.private_key, b"KEY");
        assert!(paths.load(Path::new("/nonexistent")).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_controller_sleeps_for_interval() {
        let mut power = SleepController::default();
        let started = tokio::time::Instant::now();
        power
            .suspend(SuspendRequest {
                interval: Duration::from_secs(15),
            })
            .await;
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert_eq!(power.suspensions(), 1);
    }
}
