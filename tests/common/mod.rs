//! Simulated FXOS8700 + FXAS21002 board shared by the integration tests

#![allow(dead_code)]

use nalgebra::{UnitQuaternion, Vector3};
use orientation_fusion::drivers::{fxas21002, fxos8700};
use orientation_fusion::{
    BusError, ControlPort, FusionConfig, MemoryStorage, RegisterBus, SensorFusion, SensorKind,
};

pub const ACCEL_COUNTS_PER_G: f32 = 8192.0;
pub const MAG_COUNTS_PER_UT: f32 = 10.0;
pub const GYRO_COUNTS_PER_DPS: f32 = 16.0;

/// Earth field in NED: 50 µT, 60 degrees inclination
pub fn earth_field() -> Vector3<f32> {
    let inclination = 60f32.to_radians();
    Vector3::new(inclination.cos(), 0.0, inclination.sin()) * 50.0
}

fn counts(value: Vector3<f32>, scale: f32) -> [i16; 3] {
    let scaled = value * scale;
    [scaled.x, scaled.y, scaled.z].map(|v| v.round().clamp(-32767.0, 32767.0) as i16)
}

/// Register-level model of both parts on one bus
pub struct SimulatedBoard {
    pub accelerometer: [i16; 3],
    pub magnetometer: [i16; 3],
    pub gyroscope: [i16; 3],
    pub temperature: i8,
    /// Body-to-NED orientation last commanded
    pub attitude: UnitQuaternion<f32>,
    /// Gyroscope packets waiting in the FIFO at every status read
    pub gyro_fifo_depth: u8,
    pub fxos_present: bool,
    pub fxas_present: bool,
    /// The next read transfer fails
    pub fail_next_read: bool,
    pub fxos_registers: [u8; 128],
    pub fxas_registers: [u8; 32],
    pub reads: usize,
}

impl SimulatedBoard {
    pub fn new() -> Self {
        let mut board = Self {
            accelerometer: [0; 3],
            magnetometer: [0; 3],
            gyroscope: [0; 3],
            temperature: 21,
            attitude: UnitQuaternion::identity(),
            gyro_fifo_depth: 10,
            fxos_present: true,
            fxas_present: true,
            fail_next_read: false,
            fxos_registers: [0; 128],
            fxas_registers: [0; 32],
            reads: 0,
        };
        board.set_orientation(UnitQuaternion::identity(), Vector3::zeros());
        board
    }

    pub fn set_accelerometer(&mut self, gees: Vector3<f32>) {
        self.accelerometer = counts(gees, ACCEL_COUNTS_PER_G);
    }

    pub fn set_magnetometer(&mut self, microtesla: Vector3<f32>) {
        self.magnetometer = counts(microtesla, MAG_COUNTS_PER_UT);
    }

    pub fn set_gyroscope(&mut self, degrees_per_second: Vector3<f32>) {
        self.gyroscope = counts(degrees_per_second, GYRO_COUNTS_PER_DPS);
    }

    /// Hold the board still at a body-to-NED orientation, with a
    /// hard-iron offset added to the magnetometer.
    pub fn set_orientation(&mut self, orientation: UnitQuaternion<f32>, hard_iron: Vector3<f32>) {
        self.place(orientation, hard_iron);
        self.set_gyroscope(Vector3::zeros());
    }

    /// Rotate the board to `orientation` over `delta_time` seconds. The
    /// gyroscope reports the constant body rate that takes the previous
    /// attitude there.
    pub fn rotate_to(
        &mut self,
        orientation: UnitQuaternion<f32>,
        hard_iron: Vector3<f32>,
        delta_time: f32,
    ) {
        let body_rate = (self.attitude.inverse() * orientation).scaled_axis() / delta_time;
        self.place(orientation, hard_iron);
        self.set_gyroscope(body_rate.map(f32::to_degrees));
    }

    fn place(&mut self, orientation: UnitQuaternion<f32>, hard_iron: Vector3<f32>) {
        let to_body = orientation.inverse();
        self.attitude = orientation;
        self.set_accelerometer(to_body * Vector3::new(0.0, 0.0, 1.0));
        self.set_magnetometer(to_body * earth_field() + hard_iron);
    }

    fn fxos_register(&self, register: usize) -> u8 {
        let from = |sample: &[i16; 3], base: usize| {
            let offset = register - base;
            sample[offset / 2].to_be_bytes()[offset % 2]
        };
        match register {
            0x01..=0x06 => from(&self.accelerometer, 0x01),
            0x33..=0x38 => from(&self.magnetometer, 0x33),
            r if r == fxos8700::WHO_AM_I as usize => fxos8700::WHO_AM_I_VALUE,
            r if r == fxos8700::TEMP as usize => self.temperature as u8,
            r => self.fxos_registers[r],
        }
    }

    fn read_fxos(&self, register: u8, buffer: &mut [u8]) {
        let hybrid = self.fxos_registers[fxos8700::M_CTRL_REG2 as usize] & 0x20 != 0;
        let mut pointer = register as usize;
        for byte in buffer.iter_mut() {
            *byte = self.fxos_register(pointer);
            pointer = if hybrid && pointer == 0x06 { 0x33 } else { pointer + 1 };
        }
    }

    fn read_fxas(&self, register: u8, buffer: &mut [u8]) {
        match register {
            fxas21002::WHO_AM_I => buffer[0] = fxas21002::WHO_AM_I_VALUES[0],
            fxas21002::STATUS => buffer[0] = self.gyro_fifo_depth,
            fxas21002::OUT_X_MSB => {
                for packet in buffer.chunks_exact_mut(6) {
                    for (axis, value) in self.gyroscope.iter().enumerate() {
                        packet[2 * axis..2 * axis + 2].copy_from_slice(&value.to_be_bytes());
                    }
                }
            }
            r => buffer[0] = self.fxas_registers[r as usize],
        }
    }
}

impl RegisterBus for SimulatedBoard {
    fn read_bytes(
        &mut self,
        address: u8,
        register: u8,
        buffer: &mut [u8],
    ) -> Result<(), BusError> {
        if self.fail_next_read {
            self.fail_next_read = false;
            return Err(BusError::Transfer);
        }
        self.reads += 1;
        match address {
            fxos8700::DEFAULT_ADDRESS if self.fxos_present => self.read_fxos(register, buffer),
            fxas21002::DEFAULT_ADDRESS if self.fxas_present => self.read_fxas(register, buffer),
            _ => return Err(BusError::Nack),
        }
        Ok(())
    }

    fn write_bytes(&mut self, address: u8, register: u8, data: &[u8]) -> Result<(), BusError> {
        let registers: &mut [u8] = match address {
            fxos8700::DEFAULT_ADDRESS if self.fxos_present => &mut self.fxos_registers,
            fxas21002::DEFAULT_ADDRESS if self.fxas_present => &mut self.fxas_registers,
            _ => return Err(BusError::Nack),
        };
        let start = register as usize;
        registers[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// Port that records output and replays queued commands
#[derive(Default)]
pub struct RecordingPort {
    pub packets: Vec<Vec<u8>>,
    pub commands: Vec<[u8; 4]>,
}

impl ControlPort for RecordingPort {
    fn write(&mut self, data: &[u8]) -> bool {
        self.packets.push(data.to_vec());
        true
    }

    fn poll_command(&mut self) -> Option<[u8; 4]> {
        if self.commands.is_empty() {
            None
        } else {
            Some(self.commands.remove(0))
        }
    }
}

pub type Board = SensorFusion<SimulatedBoard, MemoryStorage, RecordingPort>;

/// Board with a combined accelerometer/magnetometer slot and a gyroscope
pub fn board(config: FusionConfig) -> Board {
    board_with_storage(config, MemoryStorage::new())
}

pub fn board_with_storage(config: FusionConfig, storage: MemoryStorage) -> Board {
    let mut fusion =
        SensorFusion::new(SimulatedBoard::new(), storage, RecordingPort::default(), config);
    assert!(fusion.install_sensor(
        fxos8700::DEFAULT_ADDRESS,
        SensorKind::MagnetometerAccelerometer
    ));
    assert!(fusion.install_sensor(fxas21002::DEFAULT_ADDRESS, SensorKind::Gyroscope));
    fusion
}

/// One application loop: read, fuse, answer commands
pub fn step(fusion: &mut Board) -> bool {
    fusion.read_sensors();
    let fused = fusion.run_fusion();
    fusion.produce_toolbox_output();
    fusion.process_commands();
    fused
}

pub fn run(fusion: &mut Board, loops: usize) {
    for _ in 0..loops {
        step(fusion);
    }
}
