#![no_std]

//! Orientation fusion for marine and embedded instruments
//!
//! Estimates heading, pitch and roll from an FXOS8700 accelerometer and
//! magnetometer and an FXAS21002 gyroscope. The library drives the sensors
//! over a register bus, conditions their samples, calibrates the
//! magnetometer online and runs a multiplicative Kalman filter.
//!
//! # Features
//!
//! - Drivers for the FXOS8700 and FXAS21002 over `embedded-hal` I2C
//! - Sample conditioning with board axis alignment
//! - Online hard and soft iron magnetometer calibration (4, 7 and 10 element fits)
//! - 6 and 9 degree-of-freedom Kalman filters with gyroscope bias estimation
//! - Calibration persistence in a small non-volatile region
//! - Four character remote commands and a binary telemetry stream
//! - `#![no_std]`, no allocation
//!
//! # Quick Start
//!
//! The filter can be driven directly with readings in physical units:
//!
//! ```rust
//! use nalgebra::Vector3;
//! use orientation_fusion::{FilterSettings, OrientationFilter};
//!
//! let mut filter = OrientationFilter::new(FilterSettings::default());
//!
//! let gyroscope = Vector3::new(0.0, 0.0, 0.0); // deg/s
//! let accelerometer = Vector3::new(0.0, 0.0, 1.0); // g, gravity positive down
//!
//! filter.update(Some(gyroscope), Some(accelerometer), None, 0.025);
//!
//! assert!(filter.is_initialized());
//! assert!(filter.pitch().abs() < 1.0);
//! assert!(filter.roll().abs() < 1.0);
//! ```
//!
//! On a board, [`SensorFusion`] owns the bus, the calibration storage and
//! the host port. Install the sensors, call `begin`, then call
//! `read_sensors` and `run_fusion` once per loop.

pub mod axes;
pub mod bus;
pub mod calibration;
pub mod compass;
pub mod conditioning;
pub mod control;
pub mod drivers;
pub mod ellipsoid;
mod error;
pub mod filter;
mod fusion;
pub mod magcal;
mod math;
mod status;
pub mod storage;
mod types;

// Re-export all public types and functions
pub use axes::{AxesAlignment, axes_swap};
pub use bus::{I2cBus, RegisterBus};
pub use calibration::{
    AccelCalibration, GyroCalibration, MagCalibration, SolverOrder, calibrate_inertial,
    calibrate_magnetic,
};
pub use conditioning::{ConditionedSample, SensorFifo, SensorFrame};
pub use control::{Command, ControlPort, NullPort, PacketFlags};
pub use error::{BusError, ConfigError, DriverError, StorageError};
pub use filter::{MagneticObservation, OrientationFilter};
pub use fusion::{MAX_SENSORS, STATUS_PUBLISH_INTERVAL, SensorFusion};
pub use magcal::MagCalEngine;
pub use math::{
    CELSIUS_TO_KELVIN, DEG_TO_RAD, GEES_TO_MPS2, QuaternionExt, RAD_TO_DEG, Vector3Ext,
    heading_difference, wrap_degrees,
};
pub use status::StatusMonitor;
pub use storage::{CalibrationStore, MemoryStorage, NvmStorage};
pub use types::*;
