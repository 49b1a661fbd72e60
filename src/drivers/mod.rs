//! Sensor drivers
//!
//! A driver owns no bus. The orchestrator lends it the bus and the sample
//! buffers on every call, so several drivers can share one transport.

pub mod fxas21002;
pub mod fxos8700;

pub use fxas21002::Fxas21002;
pub use fxos8700::{Fxos8700, Fxos8700Mode};

use crate::bus::RegisterBus;
use crate::conditioning::SensorFrame;
use crate::error::DriverError;
use crate::types::SensorKind;

/// Lifecycle of one physical sensor.
pub trait SensorDriver<B: RegisterBus> {
    /// Verify the device identity and configure it for streaming.
    fn init(&mut self, bus: &mut B) -> Result<(), DriverError>;

    /// Move any new samples into `frame`.
    fn read(&mut self, bus: &mut B, frame: &mut SensorFrame) -> Result<(), DriverError>;

    /// Put the device in a low power state.
    fn idle(&mut self, _bus: &mut B) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Built-in drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Fxos8700(Fxos8700),
    Fxas21002(Fxas21002),
}

impl Driver {
    /// Driver serving `kind` on the device at `address`.
    ///
    /// # Example
    /// ```
    /// use orientation_fusion::SensorKind;
    /// use orientation_fusion::drivers::Driver;
    ///
    /// assert!(Driver::for_kind(0x21, SensorKind::Gyroscope).is_ok());
    /// assert!(Driver::for_kind(0x60, SensorKind::Barometer).is_err());
    /// ```
    pub fn for_kind(address: u8, kind: SensorKind) -> Result<Self, DriverError> {
        let mode = match kind {
            SensorKind::Accelerometer => Fxos8700Mode::Accelerometer,
            SensorKind::Magnetometer => Fxos8700Mode::Magnetometer,
            SensorKind::MagnetometerAccelerometer => Fxos8700Mode::Combined,
            SensorKind::Thermometer => Fxos8700Mode::Thermometer,
            SensorKind::Gyroscope => return Ok(Self::Fxas21002(Fxas21002::new(address))),
            SensorKind::Barometer => return Err(DriverError::UnsupportedKind(kind)),
        };
        Ok(Self::Fxos8700(Fxos8700::new(address, mode)))
    }
}

impl<B: RegisterBus> SensorDriver<B> for Driver {
    fn init(&mut self, bus: &mut B) -> Result<(), DriverError> {
        match self {
            Self::Fxos8700(driver) => driver.init(bus),
            Self::Fxas21002(driver) => driver.init(bus),
        }
    }

    fn read(&mut self, bus: &mut B, frame: &mut SensorFrame) -> Result<(), DriverError> {
        match self {
            Self::Fxos8700(driver) => driver.read(bus, frame),
            Self::Fxas21002(driver) => driver.read(bus, frame),
        }
    }

    fn idle(&mut self, bus: &mut B) -> Result<(), DriverError> {
        match self {
            Self::Fxos8700(driver) => driver.idle(bus),
            Self::Fxas21002(driver) => driver.idle(bus),
        }
    }
}

/// Decode big-endian `(x, y, z)` 16-bit counts.
pub(crate) fn decode_be_xyz(bytes: &[u8]) -> crate::conditioning::RawSample {
    nalgebra::Vector3::new(
        i16::from_be_bytes([bytes[0], bytes[1]]),
        i16::from_be_bytes([bytes[2], bytes[3]]),
        i16::from_be_bytes([bytes[4], bytes[5]]),
    )
}
