//! FXOS8700 accelerometer, magnetometer and die thermometer
//!
//! The part runs in hybrid mode, sampling both sensors at one output data
//! rate. With hybrid auto-increment enabled a 12 byte burst from the
//! accelerometer output registers continues straight into the magnetometer
//! output registers.

use crate::bus::RegisterBus;
use crate::conditioning::SensorFrame;
use crate::error::DriverError;

use super::{SensorDriver, decode_be_xyz};

/// Default address with SA0 and SA1 high
pub const DEFAULT_ADDRESS: u8 = 0x1F;

pub const WHO_AM_I_VALUE: u8 = 0xC7;

pub const OUT_X_MSB: u8 = 0x01;
pub const WHO_AM_I: u8 = 0x0D;
pub const XYZ_DATA_CFG: u8 = 0x0E;
pub const CTRL_REG1: u8 = 0x2A;
pub const M_OUT_X_MSB: u8 = 0x33;
pub const TEMP: u8 = 0x51;
pub const M_CTRL_REG1: u8 = 0x5B;
pub const M_CTRL_REG2: u8 = 0x5C;

/// Standby, required before any configuration write
const CTRL_REG1_STANDBY: u8 = 0x00;
/// 200 Hz hybrid output rate, low noise, active
const CTRL_REG1_ACTIVE: u8 = 0x0D;
/// Hybrid mode, maximum magnetometer oversampling
const M_CTRL_REG1_HYBRID: u8 = 0x1F;
/// Burst reads jump from the accelerometer to the magnetometer registers
const M_CTRL_REG2_AUTOINC: u8 = 0x20;
/// ±4 g full scale
const XYZ_DATA_CFG_4G: u8 = 0x01;

/// Die temperature sensitivity in °C per count
const DEGREES_PER_COUNT: f32 = 0.96;

/// Which outputs a slot takes from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fxos8700Mode {
    Accelerometer,
    Magnetometer,
    /// Accelerometer and magnetometer in one burst
    Combined,
    Thermometer,
}

/// FXOS8700 driver for one installed slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fxos8700 {
    address: u8,
    mode: Fxos8700Mode,
}

impl Fxos8700 {
    pub const fn new(address: u8, mode: Fxos8700Mode) -> Self {
        Self { address, mode }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn mode(&self) -> Fxos8700Mode {
        self.mode
    }
}

impl<B: RegisterBus> SensorDriver<B> for Fxos8700 {
    fn init(&mut self, bus: &mut B) -> Result<(), DriverError> {
        let found = bus.read_byte(self.address, WHO_AM_I)?;
        if found != WHO_AM_I_VALUE {
            return Err(DriverError::InvalidDevice {
                address: self.address,
                found,
            });
        }

        bus.write_byte(self.address, CTRL_REG1, CTRL_REG1_STANDBY)?;
        bus.write_byte(self.address, M_CTRL_REG1, M_CTRL_REG1_HYBRID)?;
        bus.write_byte(self.address, M_CTRL_REG2, M_CTRL_REG2_AUTOINC)?;
        bus.write_byte(self.address, XYZ_DATA_CFG, XYZ_DATA_CFG_4G)?;
        bus.write_byte(self.address, CTRL_REG1, CTRL_REG1_ACTIVE)?;

        log::debug!("FXOS8700 at 0x{:02X} ready ({:?})", self.address, self.mode);
        Ok(())
    }

    fn read(&mut self, bus: &mut B, frame: &mut SensorFrame) -> Result<(), DriverError> {
        match self.mode {
            Fxos8700Mode::Accelerometer => {
                let mut buffer = [0u8; 6];
                bus.read_bytes(self.address, OUT_X_MSB, &mut buffer)?;
                frame.accelerometer.push(decode_be_xyz(&buffer));
            }
            Fxos8700Mode::Magnetometer => {
                let mut buffer = [0u8; 6];
                bus.read_bytes(self.address, M_OUT_X_MSB, &mut buffer)?;
                frame.magnetometer.push(decode_be_xyz(&buffer));
            }
            Fxos8700Mode::Combined => {
                let mut buffer = [0u8; 12];
                bus.read_bytes(self.address, OUT_X_MSB, &mut buffer)?;
                frame.accelerometer.push(decode_be_xyz(&buffer[..6]));
                frame.magnetometer.push(decode_be_xyz(&buffer[6..]));
            }
            Fxos8700Mode::Thermometer => {
                let raw = bus.read_byte(self.address, TEMP)? as i8;
                frame.temperature_c = Some(f32::from(raw) * DEGREES_PER_COUNT);
            }
        }
        Ok(())
    }

    fn idle(&mut self, bus: &mut B) -> Result<(), DriverError> {
        bus.write_byte(self.address, CTRL_REG1, CTRL_REG1_STANDBY)?;
        Ok(())
    }
}
