//! Sensor workers
//!
//! Two acquisition styles:
//!
//! - **Retrying** (humidity, CO2): read, pause, repeat until enough valid
//!   frames or the attempt cap. The pause is async so the worker yields.
//! - **Averaging** (gas, light, power): a fixed number of raw reads taken
//!   back to back and averaged. These block on the ADC, so they run on the
//!   blocking pool.
//!
//! Each worker ends by handing its outcome to its [`SlotWriter`], exactly
//! once, and never retries afterwards.

use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::aggregate::{SlotResult, SlotWriter};
use crate::config::SamplingConfig;
use crate::errors::AcquisitionError;
use crate::reading::{Modality, Reading};
use crate::sensors::probe::{AnalogChannel, Calibration, Co2Probe, HumidityProbe, LinearCalibration};

/// Attempt cap and pause for retrying workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Reads allowed, successful or not
    pub max_attempts: u32,
    /// Pause after each read
    pub delay: Duration,
}

/// Average `samples` valid humidity frames
///
/// The published `humidity` field is the mean of the humidity values and
/// `temperature` the mean of the temperatures.
pub async fn sample_humidity(
    probe: &mut dyn HumidityProbe,
    samples: u32,
    policy: RetryPolicy,
) -> SlotResult {
    let mut temperature_sum: i64 = 0;
    let mut humidity_sum: i64 = 0;
    let mut collected: u32 = 0;

    for attempt in 1..=policy.max_attempts {
        match probe.read() {
            Ok(frame) => {
                temperature_sum += i64::from(frame.temperature_c);
                humidity_sum += i64::from(frame.humidity_pct);
                collected += 1;

                if collected >= samples {
                    let n = i64::from(samples);
                    return Ok(Reading::Humidity {
                        temperature_c: (temperature_sum / n) as i32,
                        humidity_pct: (humidity_sum / n) as i32,
                    });
                }
            }
            Err(e) => debug!("humidity read {} failed: {}", attempt, e),
        }
        tokio::time::sleep(policy.delay).await;
    }

    Err(AcquisitionError::RetriesExhausted {
        modality: Modality::Humidity,
        attempts: policy.max_attempts,
    })
}

/// First valid CO2 frame
pub async fn sample_co2(probe: &mut dyn Co2Probe, policy: RetryPolicy) -> SlotResult {
    for attempt in 1..=policy.max_attempts {
        match probe.read() {
            Ok(frame) => {
                return Ok(Reading::CarbonDioxide {
                    ppm: frame.ppm,
                    temperature_c: frame.temperature_c,
                })
            }
            Err(e) => warn!("co2 read {} failed: {}", attempt, e),
        }
        tokio::time::sleep(policy.delay).await;
    }

    Err(AcquisitionError::RetriesExhausted {
        modality: Modality::CarbonDioxide,
        attempts: policy.max_attempts,
    })
}

/// Integer mean of `samples` raw reads
pub fn average_raw(channel: &mut dyn AnalogChannel, samples: u32) -> Result<u32, AcquisitionError> {
    let mut sum: u64 = 0;
    for _ in 0..samples {
        sum += u64::from(channel.read_raw()?);
    }
    Ok((sum / u64::from(samples.max(1))) as u32)
}

/// Mean raw code to compensated supply voltage
///
/// Millivolts through `calibration`, divided by the divider ratio, rounded
/// to two decimals, then truncated to the integer the message carries.
pub fn compensate_power(mean_raw: u32, calibration: &dyn Calibration, divider_ratio: f64) -> i32 {
    let millivolts = f64::from(calibration.raw_to_millivolts(mean_raw));
    let compensated = millivolts / divider_ratio;
    let rounded = libm::round(compensated * 100.0) / 100.0;
    rounded as i32
}

/// Averaging worker for the gas input
pub fn sample_gas(channel: &mut dyn AnalogChannel, samples: u32) -> SlotResult {
    let level = average_raw(channel, samples)?;
    Ok(Reading::Gas { level: level as i32 })
}

/// Averaging worker for the light input
pub fn sample_light(channel: &mut dyn AnalogChannel, samples: u32) -> SlotResult {
    let intensity = average_raw(channel, samples)?;
    Ok(Reading::Light {
        intensity: intensity as i32,
    })
}

/// Averaging worker for the power rail
pub fn sample_power(
    channel: &mut dyn AnalogChannel,
    samples: u32,
    calibration: &dyn Calibration,
    divider_ratio: f64,
) -> SlotResult {
    let mean = average_raw(channel, samples)?;
    Ok(Reading::Power {
        volts: compensate_power(mean, calibration, divider_ratio),
    })
}

/// The board's five acquisition primitives
pub struct SensorSuite {
    /// Humidity/temperature probe
    pub humidity: Box<dyn HumidityProbe>,
    /// Carbon-dioxide sensor
    pub co2: Box<dyn Co2Probe>,
    /// Gas sensor input
    pub gas: Box<dyn AnalogChannel>,
    /// Light sensor input
    pub light: Box<dyn AnalogChannel>,
    /// Power rail input
    pub power: Box<dyn AnalogChannel>,
    /// Calibration of the power input; `None` uses the configured linear model
    pub calibration: Option<Box<dyn Calibration>>,
}

impl SensorSuite {
    /// Start one worker per modality
    ///
    /// Workers run independently; completion is observed only through the
    /// signals their writers raise.
    pub fn spawn(self, writers: [SlotWriter; 5], config: &SamplingConfig) -> Vec<JoinHandle<()>> {
        let [humidity_w, gas_w, light_w, power_w, co2_w] = writers;
        let SensorSuite {
            mut humidity,
            mut co2,
            mut gas,
            mut light,
            mut power,
            calibration,
        } = self;

        let calibration: Box<dyn Calibration> = calibration.unwrap_or_else(|| {
            Box::new(LinearCalibration {
                reference_mv: config.adc_reference_mv,
                full_scale: config.adc_full_scale,
            })
        });

        let humidity_samples = config.humidity_samples;
        let humidity_policy = RetryPolicy {
            max_attempts: config.humidity_max_attempts,
            delay: config.humidity_retry_delay,
        };
        let co2_policy = RetryPolicy {
            max_attempts: config.co2_max_attempts,
            delay: config.co2_retry_delay,
        };
        let gas_samples = config.gas_samples;
        let light_samples = config.light_samples;
        let power_samples = config.power_samples;
        let divider_ratio = config.power_divider_ratio;

        vec![
            tokio::spawn(async move {
                let outcome = sample_humidity(humidity.as_mut(), humidity_samples, humidity_policy).await;
                finish(humidity_w, outcome);
            }),
            tokio::task::spawn_blocking(move || {
                finish(gas_w, sample_gas(gas.as_mut(), gas_samples));
            }),
            tokio::task::spawn_blocking(move || {
                finish(light_w, sample_light(light.as_mut(), light_samples));
            }),
            tokio::task::spawn_blocking(move || {
                let outcome = sample_power(power.as_mut(), power_samples, calibration.as_ref(), divider_ratio);
                finish(power_w, outcome);
            }),
            tokio::spawn(async move {
                let outcome = sample_co2(co2.as_mut(), co2_policy).await;
                finish(co2_w, outcome);
            }),
        ]
    }
}

fn finish(writer: SlotWriter, outcome: SlotResult) {
    match &outcome {
        Ok(reading) => info!("{} done: {:?}", writer.modality(), reading),
        Err(e) => warn!("{} failed: {}", writer.modality(), e),
    }
    writer.complete(outcome);
}
