//! Loopback Duty Cycle Example
//!
//! Runs one complete duty cycle against an in-memory broker that drops the
//! first two connection attempts, then prints what was published.
//!
//! ## What You'll Learn
//!
//! - Wiring probes into a `SensorSuite`
//! - Implementing `Connector` and `Session` for a custom transport
//! - Reading the `CycleReport`
//!
//! ## Running the Example
//!
//! ```bash
//! cargo run --example 01_loopback_cycle
//! ```

use std::time::Duration;

use async_trait::async_trait;

use airsentry_core::sensors::{AnalogChannel, Co2Probe, Co2Sample, HumidityProbe, HumiditySample};
use airsentry_core::{
    AcquisitionError, AttemptError, ConnectionConfig, Connector, Credentials, CycleOutcome, DeviceConfig,
    DutyCycleScheduler, PublishError, QoS, SensorSuite, Session, SessionEvent, TransportError,
};

struct Room;

impl HumidityProbe for Room {
    fn read(&mut self) -> Result<HumiditySample, AcquisitionError> {
        Ok(HumiditySample {
            temperature_c: 21,
            humidity_pct: 48,
        })
    }
}

impl Co2Probe for Room {
    fn read(&mut self) -> Result<Co2Sample, AcquisitionError> {
        Ok(Co2Sample {
            ppm: 620,
            temperature_c: 23,
        })
    }
}

struct Adc(u16);

impl AnalogChannel for Adc {
    fn read_raw(&mut self) -> Result<u16, AcquisitionError> {
        Ok(self.0)
    }
}

/// Broker that acknowledges everything it receives
struct Loopback {
    drops_left: u32,
}

struct LoopbackSession {
    unacked: Vec<u16>,
    next_id: u16,
}

#[async_trait]
impl Connector for Loopback {
    type Session = LoopbackSession;

    async fn attempt(&mut self, credentials: &Credentials, _: &ConnectionConfig) -> Result<LoopbackSession, AttemptError> {
        if self.drops_left > 0 {
            self.drops_left -= 1;
            return Err(TransportError::Io(format!("{} unreachable", credentials.broker_host)).into());
        }
        Ok(LoopbackSession {
            unacked: Vec::new(),
            next_id: 1,
        })
    }
}

#[async_trait]
impl Session for LoopbackSession {
    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, _retain: bool) -> Result<(), PublishError> {
        println!("  -> {topic}: {}", String::from_utf8_lossy(payload));
        if qos == QoS::AtLeastOnce {
            self.unacked.push(self.next_id);
            self.next_id += 1;
        }
        Ok(())
    }

    async fn poll(&mut self, _timeout: Duration) -> Result<SessionEvent, PublishError> {
        Ok(match self.unacked.pop() {
            Some(packet_id) => SessionEvent::Acknowledged { packet_id },
            None => SessionEvent::Idle,
        })
    }

    async fn disconnect(&mut self) {
        println!("  -> DISCONNECT");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== AirSentry Loopback Cycle ===\n");

    // Short delays so the example finishes quickly
    let config = DeviceConfig::default()
        .backoff_delays(Duration::from_millis(50), Duration::from_millis(200))
        .sleep_interval(Duration::from_secs(60));
    let credentials = Credentials::new("aq-demo", "loopback", 8883);

    let sensors = SensorSuite {
        humidity: Box::new(Room),
        co2: Box::new(Room),
        gas: Box::new(Adc(180)),
        light: Box::new(Adc(2200)),
        power: Box::new(Adc(1950)),
        calibration: None,
    };

    let scheduler = DutyCycleScheduler::new(config, credentials, Loopback { drops_left: 2 })?;
    let report = scheduler.run(sensors).await;

    println!("\nPhases: {:?}", report.phases);
    match &report.outcome {
        CycleOutcome::Published {
            connect_attempts,
            polls,
            ..
        } => println!("Delivered after {connect_attempts} connection attempts and {polls} drain polls"),
        other => println!("Not delivered: {other:?}"),
    }
    println!("Cycle took {:?}; requesting {:?} of sleep", report.elapsed, report.suspend.interval);

    Ok(())
}
