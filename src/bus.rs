//! Register bus abstraction
//!
//! Drivers talk to devices through [`RegisterBus`], a register-addressed
//! view of the transport. [`I2cBus`] implements it on top of any
//! `embedded-hal` I2C controller.

use embedded_hal::i2c::{Error as _, ErrorKind, I2c};

use crate::error::BusError;

/// Largest single register write, excluding the register address
pub const MAX_WRITE_LEN: usize = 32;

/// Register-addressed device access.
///
/// Implementations perform no retries. A failed transfer is reported once
/// and the caller decides what to do.
pub trait RegisterBus {
    /// Read `buffer.len()` bytes starting at `register`.
    fn read_bytes(
        &mut self,
        address: u8,
        register: u8,
        buffer: &mut [u8],
    ) -> Result<(), BusError>;

    /// Write `data` starting at `register`.
    fn write_bytes(&mut self, address: u8, register: u8, data: &[u8]) -> Result<(), BusError>;

    /// Read one register.
    fn read_byte(&mut self, address: u8, register: u8) -> Result<u8, BusError> {
        let mut value = [0u8];
        self.read_bytes(address, register, &mut value)?;
        Ok(value[0])
    }

    /// Write one register.
    fn write_byte(&mut self, address: u8, register: u8, value: u8) -> Result<(), BusError> {
        self.write_bytes(address, register, &[value])
    }
}

/// [`RegisterBus`] over an `embedded-hal` I2C controller
pub struct I2cBus<I2C> {
    i2c: I2C,
}

impl<I2C: I2c> I2cBus<I2C> {
    /// Wrap an I2C controller
    pub const fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    /// Consume the adapter and return the I2C controller
    pub fn release(self) -> I2C {
        self.i2c
    }
}

impl<I2C: I2c> RegisterBus for I2cBus<I2C> {
    fn read_bytes(
        &mut self,
        address: u8,
        register: u8,
        buffer: &mut [u8],
    ) -> Result<(), BusError> {
        self.i2c
            .write_read(address, &[register], buffer)
            .map_err(|error| map_error(error.kind()))
    }

    fn write_bytes(&mut self, address: u8, register: u8, data: &[u8]) -> Result<(), BusError> {
        if data.len() > MAX_WRITE_LEN {
            return Err(BusError::Transfer);
        }

        // Register address followed by the payload in one transfer
        let mut buffer = [0u8; MAX_WRITE_LEN + 1];
        buffer[0] = register;
        buffer[1..=data.len()].copy_from_slice(data);

        self.i2c
            .write(address, &buffer[..=data.len()])
            .map_err(|error| map_error(error.kind()))
    }
}

fn map_error(kind: ErrorKind) -> BusError {
    match kind {
        ErrorKind::NoAcknowledge(_) => BusError::Nack,
        _ => BusError::Transfer,
    }
}
