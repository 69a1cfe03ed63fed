//! Acquisition primitives supplied by the board
//!
//! The cycle never talks to pins or UARTs directly. A board support layer
//! implements these traits; tests implement them with fixed values.

use crate::errors::AcquisitionError;

/// One humidity/temperature frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumiditySample {
    /// Degrees Celsius
    pub temperature_c: i32,
    /// Relative humidity, percent
    pub humidity_pct: i32,
}

/// One carbon-dioxide frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Co2Sample {
    /// Parts per million
    pub ppm: i32,
    /// Sensor die temperature, degrees Celsius
    pub temperature_c: i32,
}

/// Single-wire humidity/temperature probe
///
/// Reads fail routinely (checksum, timing); callers retry.
pub trait HumidityProbe: Send {
    /// Take one frame
    fn read(&mut self) -> Result<HumiditySample, AcquisitionError>;
}

/// Serial carbon-dioxide sensor
pub trait Co2Probe: Send {
    /// Request and decode one frame
    fn read(&mut self) -> Result<Co2Sample, AcquisitionError>;
}

/// One analog input
pub trait AnalogChannel: Send {
    /// Raw ADC code
    fn read_raw(&mut self) -> Result<u16, AcquisitionError>;
}

/// Raw ADC code to millivolts
pub trait Calibration: Send + Sync {
    /// Convert a raw (or averaged raw) code
    fn raw_to_millivolts(&self, raw: u32) -> u32;
}

/// Straight-line calibration over the ADC reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearCalibration {
    /// Millivolts at full scale
    pub reference_mv: u32,
    /// Largest raw code
    pub full_scale: u16,
}

impl Default for LinearCalibration {
    fn default() -> Self {
        Self {
            reference_mv: 1100,
            full_scale: 4095,
        }
    }
}

impl Calibration for LinearCalibration {
    fn raw_to_millivolts(&self, raw: u32) -> u32 {
        let raw = u64::from(raw.min(u32::from(self.full_scale)));
        (raw * u64::from(self.reference_mv) / u64::from(self.full_scale.max(1))) as u32
    }
}
