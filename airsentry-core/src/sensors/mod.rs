//! Sensor acquisition
//!
//! Five independent workers, one per modality, each reporting into its own
//! write-once slot and raising its own completion signal.
//!
//! | Modality | Style     | Samples | Pause  | Output              |
//! |----------|-----------|---------|--------|---------------------|
//! | humidity | retrying  | 10      | 50ms   | mean temp, mean RH  |
//! | co2      | retrying  | 1       | 200ms  | ppm, temperature    |
//! | gas      | averaging | 10      | none   | mean raw code       |
//! | light    | averaging | 10      | none   | mean raw code       |
//! | power    | averaging | 500     | none   | compensated voltage |
//!
//! Retrying workers are capped; on the cap they store
//! [`AcquisitionError::RetriesExhausted`](crate::AcquisitionError) and still
//! raise their signal so the publisher is never left waiting on a dead probe.

pub mod probe;
pub mod worker;

pub use probe::{
    AnalogChannel, Calibration, Co2Probe, Co2Sample, HumidityProbe, HumiditySample, LinearCalibration,
};
pub use worker::{RetryPolicy, SensorSuite};
