//! FXAS21002 gyroscope
//!
//! Runs at 400 Hz with the FIFO in circular mode. Each read drains the FIFO
//! in bursts, relying on the address wrap-around so consecutive packets come
//! back from one transfer.

use crate::bus::RegisterBus;
use crate::conditioning::SensorFrame;
use crate::error::DriverError;

use super::{SensorDriver, decode_be_xyz};

/// Default address with SA0 high
pub const DEFAULT_ADDRESS: u8 = 0x21;

/// Production, pre-production and early silicon identities
pub const WHO_AM_I_VALUES: [u8; 3] = [0xD7, 0xD6, 0xD4];

/// Mirrors F_STATUS while the FIFO is enabled
pub const STATUS: u8 = 0x00;
pub const OUT_X_MSB: u8 = 0x01;
pub const F_SETUP: u8 = 0x09;
pub const WHO_AM_I: u8 = 0x0C;
pub const CTRL_REG0: u8 = 0x0D;
pub const CTRL_REG1: u8 = 0x13;
pub const CTRL_REG3: u8 = 0x15;

const CTRL_REG1_STANDBY: u8 = 0x00;
/// 400 Hz, active
const CTRL_REG1_ACTIVE: u8 = 0x06;
/// Circular FIFO, no watermark
const F_SETUP_CIRCULAR: u8 = 0x40;
/// ±2000 deg/s, filters off
const CTRL_REG0_2000DPS: u8 = 0x00;
/// Burst reads wrap from OUT_Z_LSB back to OUT_X_MSB
const CTRL_REG3_WRAPTOONE: u8 = 0x08;

const FIFO_COUNT_MASK: u8 = 0x3F;
const PACKET_LEN: usize = 6;

/// Bursts longer than this fail on some controllers
pub const MAX_PACKETS_PER_READ: usize = 11;

/// FXAS21002 driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fxas21002 {
    address: u8,
}

impl Fxas21002 {
    pub const fn new(address: u8) -> Self {
        Self { address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }
}

impl<B: RegisterBus> SensorDriver<B> for Fxas21002 {
    fn init(&mut self, bus: &mut B) -> Result<(), DriverError> {
        let found = bus.read_byte(self.address, WHO_AM_I)?;
        if !WHO_AM_I_VALUES.contains(&found) {
            return Err(DriverError::InvalidDevice {
                address: self.address,
                found,
            });
        }

        bus.write_byte(self.address, CTRL_REG1, CTRL_REG1_STANDBY)?;
        bus.write_byte(self.address, F_SETUP, F_SETUP_CIRCULAR)?;
        bus.write_byte(self.address, CTRL_REG0, CTRL_REG0_2000DPS)?;
        bus.write_byte(self.address, CTRL_REG3, CTRL_REG3_WRAPTOONE)?;
        bus.write_byte(self.address, CTRL_REG1, CTRL_REG1_ACTIVE)?;

        log::debug!("FXAS21002 at 0x{:02X} ready (WHO_AM_I 0x{:02X})", self.address, found);
        Ok(())
    }

    fn read(&mut self, bus: &mut B, frame: &mut SensorFrame) -> Result<(), DriverError> {
        let mut remaining = usize::from(bus.read_byte(self.address, STATUS)? & FIFO_COUNT_MASK);

        let mut buffer = [0u8; PACKET_LEN * MAX_PACKETS_PER_READ];
        while remaining > 0 {
            let packets = remaining.min(MAX_PACKETS_PER_READ);
            let burst = &mut buffer[..packets * PACKET_LEN];
            bus.read_bytes(self.address, OUT_X_MSB, burst)?;

            for packet in burst.chunks_exact(PACKET_LEN) {
                frame.gyroscope.push(decode_be_xyz(packet));
            }
            remaining -= packets;
        }
        Ok(())
    }

    fn idle(&mut self, bus: &mut B) -> Result<(), DriverError> {
        bus.write_byte(self.address, CTRL_REG1, CTRL_REG1_STANDBY)?;
        Ok(())
    }
}
