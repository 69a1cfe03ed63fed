//! Telemetry message and topic formatting
//!
//! One JSON object per cycle, published on `device/<deviceId>/data`:
//!
//! ```text
//! {"dht":{"temperature":22,"humidity":55},"gas":{"level":120},
//!  "ldr":{"intensity":300},"co2":{"ppm":410,"temperature":25},
//!  "power":{"volts":224}}
//! ```
//!
//! A modality whose worker failed is left out of the object instead of
//! being reported with made-up values.
//!
//! The topic lives in a fixed-capacity buffer; an identity too long for it
//! is an error, never a truncation.

use heapless::String as FixedString;
use serde::{Deserialize, Serialize};

use crate::aggregate::ReleasedReadings;
use crate::errors::MessageError;
use crate::reading::{Modality, Reading};

/// Topic buffer capacity in bytes
pub const TOPIC_CAPACITY: usize = 128;

const TOPIC_PREFIX: &str = "device/";
const TOPIC_SUFFIX: &str = "/data";

/// Telemetry topic, bounded
pub type Topic = FixedString<TOPIC_CAPACITY>;

/// Humidity/temperature block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhtBlock {
    /// Degrees Celsius
    pub temperature: i32,
    /// Relative humidity, percent
    pub humidity: i32,
}

/// Gas block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasBlock {
    /// Mean raw level
    pub level: i32,
}

/// Light block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdrBlock {
    /// Mean raw intensity
    pub intensity: i32,
}

/// Carbon-dioxide block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Co2Block {
    /// Parts per million
    pub ppm: i32,
    /// Degrees Celsius
    pub temperature: i32,
}

/// Power block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerBlock {
    /// Compensated supply voltage
    pub volts: i32,
}

/// The per-cycle telemetry message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    /// Humidity/temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dht: Option<DhtBlock>,
    /// Gas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<GasBlock>,
    /// Light
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ldr: Option<LdrBlock>,
    /// Carbon dioxide
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub co2: Option<Co2Block>,
    /// Supply voltage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<PowerBlock>,
}

impl TelemetryMessage {
    /// Message carrying every successful reading in `readings`
    pub fn from_readings(readings: &ReleasedReadings) -> Self {
        let mut message = Self::default();
        for reading in Modality::ALL.into_iter().filter_map(|m| readings.reading(m)) {
            match reading {
                Reading::Humidity {
                    temperature_c,
                    humidity_pct,
                } => {
                    message.dht = Some(DhtBlock {
                        temperature: temperature_c,
                        humidity: humidity_pct,
                    })
                }
                Reading::Gas { level } => message.gas = Some(GasBlock { level }),
                Reading::Light { intensity } => message.ldr = Some(LdrBlock { intensity }),
                Reading::Power { volts } => message.power = Some(PowerBlock { volts }),
                Reading::CarbonDioxide { ppm, temperature_c } => {
                    message.co2 = Some(Co2Block {
                        ppm,
                        temperature: temperature_c,
                    })
                }
            }
        }
        message
    }

    /// Compact JSON, rejected when longer than `limit` bytes
    pub fn to_payload(&self, limit: usize) -> Result<Vec<u8>, MessageError> {
        let payload = serde_json::to_vec(self).map_err(|e| MessageError::Serialize(e.to_string()))?;
        if payload.len() > limit {
            return Err(MessageError::PayloadTooLarge {
                size: payload.len(),
                limit,
            });
        }
        Ok(payload)
    }
}

/// `device/<device_id>/data`
pub fn telemetry_topic(device_id: &str) -> Result<Topic, MessageError> {
    if device_id.is_empty() {
        return Err(MessageError::EmptyDeviceId);
    }
    if let Some(c) = device_id.chars().find(|c| matches!(c, '/' | '+' | '#' | '\0')) {
        return Err(MessageError::InvalidDeviceId(c));
    }

    let required = TOPIC_PREFIX.len() + device_id.len() + TOPIC_SUFFIX.len();
    let too_long = MessageError::TopicTooLong {
        required,
        capacity: TOPIC_CAPACITY,
    };
    if required > TOPIC_CAPACITY {
        return Err(too_long);
    }

    let mut topic = Topic::new();
    for part in [TOPIC_PREFIX, device_id, TOPIC_SUFFIX] {
        topic.push_str(part).map_err(|_| too_long.clone())?;
    }
    Ok(topic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::ResultAggregate;
    use crate::barrier::CompletionBarrier;
    use crate::errors::AcquisitionError;
    use std::sync::Arc;

    fn scenario() -> ReleasedReadings {
        ReleasedReadings::from_readings([
            Reading::Humidity {
                temperature_c: 22,
                humidity_pct: 55,
            },
            Reading::Gas { level: 120 },
            Reading::Light { intensity: 300 },
            Reading::CarbonDioxide {
                ppm: 410,
                temperature_c: 25,
            },
            Reading::Power { volts: 224 },
        ])
    }

    #[test]
    fn payload_matches_schema_exactly() {
        let payload = TelemetryMessage::from_readings(&scenario()).to_payload(1024).unwrap();
        assert_eq!(
            std::str::from_utf8(&payload).unwrap(),
            r#"{"dht":{"temperature":22,"humidity":55},"gas":{"level":120},"ldr":{"intensity":300},"co2":{"ppm":410,"temperature":25},"power":{"volts":224}}"#
        );
    }

    #[test]
    fn failed_modality_is_omitted() {
        let aggregate = Arc::new(ResultAggregate::new());
        let barrier = Arc::new(CompletionBarrier::new());
        let [humidity, gas, light, power, co2] = ResultAggregate::writers(&aggregate, &barrier);
        humidity.complete(Ok(Reading::Humidity {
            temperature_c: 22,
            humidity_pct: 55,
        }));
        gas.complete(Ok(Reading::Gas { level: 120 }));
        light.complete(Ok(Reading::Light { intensity: 300 }));
        power.complete(Ok(Reading::Power { volts: 224 }));
        co2.complete(Err(AcquisitionError::RetriesExhausted {
            modality: Modality::CarbonDioxide,
            attempts: 100,
        }));

        let readings = aggregate.released(barrier.raised());
        let payload = TelemetryMessage::from_readings(&readings).to_payload(1024).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert!(value.get("co2").is_none());
        assert_eq!(value["dht"]["humidity"], 55);
        assert_eq!(value["power"]["volts"], 224);
    }

    #[test]
    fn payload_limit_is_enforced() {
        let err = TelemetryMessage::from_readings(&scenario()).to_payload(16).unwrap_err();
        assert!(matches!(err, MessageError::PayloadTooLarge { limit: 16, .. }));
    }

    #[test]
    fn topic_embeds_device_id() {
        assert_eq!(telemetry_topic("aq-001").unwrap().as_str(), "device/aq-001/data");
    }

    #[test]
    fn topic_rejects_bad_identities() {
        assert_eq!(telemetry_topic(""), Err(MessageError::EmptyDeviceId));
        assert_eq!(telemetry_topic("a/b"), Err(MessageError::InvalidDeviceId('/')));
        assert_eq!(telemetry_topic("a#"), Err(MessageError::InvalidDeviceId('#')));
    }

    #[test]
    fn topic_capacity_is_checked() {
        let longest = "x".repeat(TOPIC_CAPACITY - TOPIC_PREFIX.len() - TOPIC_SUFFIX.len());
        assert_eq!(telemetry_topic(&longest).unwrap().len(), TOPIC_CAPACITY);

        let overflow = format!("{longest}x");
        assert_eq!(
            telemetry_topic(&overflow),
            Err(MessageError::TopicTooLong {
                required: TOPIC_CAPACITY + 1,
                capacity: TOPIC_CAPACITY
            })
        );
    }
}
