//! Sensor readings produced once per duty cycle
//!
//! Each modality has exactly one worker and exactly one reading type. A
//! reading is immutable once its worker hands it over.

use core::fmt;

use serde::{Deserialize, Serialize};

/// The five sensing modalities carried by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Humidity/temperature probe (single-wire)
    Humidity,
    /// Analog gas sensor
    Gas,
    /// Light-dependent resistor
    Light,
    /// Supply voltage through a resistive divider
    Power,
    /// NDIR carbon-dioxide sensor (serial)
    CarbonDioxide,
}

impl Modality {
    /// All modalities in slot order
    pub const ALL: [Modality; 5] = [
        Modality::Humidity,
        Modality::Gas,
        Modality::Light,
        Modality::Power,
        Modality::CarbonDioxide,
    ];

    /// Slot index inside the result aggregate
    pub const fn index(self) -> usize {
        match self {
            Modality::Humidity => 0,
            Modality::Gas => 1,
            Modality::Light => 2,
            Modality::Power => 3,
            Modality::CarbonDioxide => 4,
        }
    }

    /// Short name used in logs
    pub const fn name(self) -> &'static str {
        match self {
            Modality::Humidity => "humidity",
            Modality::Gas => "gas",
            Modality::Light => "light",
            Modality::Power => "power",
            Modality::CarbonDioxide => "co2",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One completed sample of a modality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    /// Averaged humidity/temperature
    Humidity {
        /// Degrees Celsius
        temperature_c: i32,
        /// Relative humidity, percent
        humidity_pct: i32,
    },
    /// Mean raw gas level
    Gas {
        /// Mean ADC code
        level: i32,
    },
    /// Mean raw light intensity
    Light {
        /// Mean ADC code
        intensity: i32,
    },
    /// Calibrated supply voltage
    Power {
        /// Compensated voltage, integer part
        volts: i32,
    },
    /// Carbon dioxide concentration with sensor temperature
    CarbonDioxide {
        /// Parts per million
        ppm: i32,
        /// Degrees Celsius
        temperature_c: i32,
    },
}

impl Reading {
    /// Modality this reading belongs to
    pub const fn modality(&self) -> Modality {
        match self {
            Reading::Humidity { .. } => Modality::Humidity,
            Reading::Gas { .. } => Modality::Gas,
            Reading::Light { .. } => Modality::Light,
            Reading::Power { .. } => Modality::Power,
            Reading::CarbonDioxide { .. } => Modality::CarbonDioxide,
        }
    }
}
