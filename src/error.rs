//! Error types
//!
//! Bus and driver errors travel through `Result` inside the crate. At the
//! orchestrator surface they are folded into [`SystemStatus`](crate::SystemStatus)
//! values and boolean returns.

use core::fmt;

use crate::types::SensorKind;

/// Register bus transfer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// The device did not acknowledge its address or a data byte
    Nack,
    /// Any other transfer failure reported by the bus implementation
    Transfer,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nack => f.write_str("device did not acknowledge"),
            Self::Transfer => f.write_str("bus transfer failed"),
        }
    }
}

impl core::error::Error for BusError {}

/// Sensor driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError {
    /// Underlying bus error
    Bus(BusError),
    /// WHO_AM_I register did not identify a supported device
    InvalidDevice {
        /// Device address that was queried
        address: u8,
        /// Value read back from WHO_AM_I
        found: u8,
    },
    /// The driver cannot serve the requested sensor kind
    UnsupportedKind(SensorKind),
}

impl From<BusError> for DriverError {
    fn from(error: BusError) -> Self {
        Self::Bus(error)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(error) => write!(f, "bus error: {error}"),
            Self::InvalidDevice { address, found } => {
                write!(f, "unexpected WHO_AM_I 0x{found:02X} at address 0x{address:02X}")
            }
            Self::UnsupportedKind(kind) => write!(f, "driver does not support {kind:?}"),
        }
    }
}

impl core::error::Error for DriverError {}

/// Fatal configuration error detected by `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// No sensor was installed
    NoSensors,
    /// The selected algorithm needs a sensor of this kind
    MissingSensor(SensorKind),
    /// A sensor failed to initialise
    InitFailed(SensorKind, DriverError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSensors => f.write_str("no sensors installed"),
            Self::MissingSensor(kind) => write!(f, "required sensor missing: {kind:?}"),
            Self::InitFailed(kind, error) => write!(f, "{kind:?} failed to initialise: {error}"),
        }
    }
}

impl core::error::Error for ConfigError {}

/// Non-volatile storage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// Access beyond the end of the device
    OutOfRange,
    /// The device reported a read, write or commit failure
    Io,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange => f.write_str("access outside storage bounds"),
            Self::Io => f.write_str("storage device error"),
        }
    }
}

impl core::error::Error for StorageError {}
