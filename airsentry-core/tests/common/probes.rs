//! Probes that always answer the same way

use airsentry_core::sensors::{AnalogChannel, Co2Probe, Co2Sample, HumidityProbe, HumiditySample};
use airsentry_core::AcquisitionError;

/// Humidity probe with a constant frame
pub struct FixedHumidity {
    pub temperature_c: i32,
    pub humidity_pct: i32,
}

impl HumidityProbe for FixedHumidity {
    fn read(&mut self) -> Result<HumiditySample, AcquisitionError> {
        Ok(HumiditySample {
            temperature_c: self.temperature_c,
            humidity_pct: self.humidity_pct,
        })
    }
}

/// CO2 sensor with a constant frame
pub struct FixedCo2 {
    pub ppm: i32,
    pub temperature_c: i32,
}

impl Co2Probe for FixedCo2 {
    fn read(&mut self) -> Result<Co2Sample, AcquisitionError> {
        Ok(Co2Sample {
            ppm: self.ppm,
            temperature_c: self.temperature_c,
        })
    }
}

/// CO2 sensor that is not wired
pub struct FailingCo2;

impl Co2Probe for FailingCo2 {
    fn read(&mut self) -> Result<Co2Sample, AcquisitionError> {
        Err(AcquisitionError::InvalidResponse("bad checksum"))
    }
}

/// Analog input stuck at one code
pub struct Constant(pub u16);

impl AnalogChannel for Constant {
    fn read_raw(&mut self) -> Result<u16, AcquisitionError> {
        Ok(self.0)
    }
}
