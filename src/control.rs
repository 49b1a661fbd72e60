//! Command decoding and telemetry output
//!
//! Commands arrive as four ASCII bytes. Telemetry leaves as a flat
//! little-endian body; any framing around it belongs to the [`ControlPort`]
//! implementation.

use nalgebra::{UnitQuaternion, Vector3};

use crate::types::SystemStatus;

/// Longest payload accepted by `send_arbitrary_data`
pub const MAX_OUTPUT_LEN: usize = 256;

/// Encoded size of a [`TelemetryFrame`]
pub const TELEMETRY_FRAME_LEN: usize = 52;

/// Remote command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// `VG+ ` / `VG- `
    AngularVelocityPackets(bool),
    /// `DB+ ` / `DB- `
    DebugPackets(bool),
    /// `RPC+` / `RPC-`
    RollPitchCompassPackets(bool),
    /// `ALT+` / `ALT-`
    AltitudePackets(bool),
    /// `RST `
    ResetFilter,
    /// `RMC `
    ResetMagCalibration,
    /// `SVMC`
    SaveMagCalibration,
    /// `SVYC`
    SaveGyroCalibration,
    /// `SVAC`
    SaveAccelCalibration,
    /// `ERMC`
    EraseMagCalibration,
    /// `ERYC`
    EraseGyroCalibration,
    /// `ERAC`
    EraseAccelCalibration,
    /// `ERST`
    EraseAllCalibrations,
}

impl Command {
    /// Decode a four byte code. Trailing NULs are read as spaces.
    ///
    /// # Example
    /// ```
    /// use orientation_fusion::control::Command;
    ///
    /// assert_eq!(Command::decode(*b"SVMC"), Some(Command::SaveMagCalibration));
    /// assert_eq!(Command::decode(*b"RST\0"), Some(Command::ResetFilter));
    /// assert_eq!(Command::decode(*b"XXXX"), None);
    /// ```
    pub fn decode(code: [u8; 4]) -> Option<Self> {
        let code = code.map(|byte| if byte == 0 { b' ' } else { byte });
        let command = match &code {
            b"VG+ " => Self::AngularVelocityPackets(true),
            b"VG- " => Self::AngularVelocityPackets(false),
            b"DB+ " => Self::DebugPackets(true),
            b"DB- " => Self::DebugPackets(false),
            b"RPC+" => Self::RollPitchCompassPackets(true),
            b"RPC-" => Self::RollPitchCompassPackets(false),
            b"ALT+" => Self::AltitudePackets(true),
            b"ALT-" => Self::AltitudePackets(false),
            b"RST " => Self::ResetFilter,
            b"RMC " => Self::ResetMagCalibration,
            b"SVMC" => Self::SaveMagCalibration,
            b"SVYC" => Self::SaveGyroCalibration,
            b"SVAC" => Self::SaveAccelCalibration,
            b"ERMC" => Self::EraseMagCalibration,
            b"ERYC" => Self::EraseGyroCalibration,
            b"ERAC" => Self::EraseAccelCalibration,
            b"ERST" => Self::EraseAllCalibrations,
            _ => return None,
        };
        Some(command)
    }
}

/// Which optional packets the telemetry stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFlags {
    pub angular_velocity: bool,
    pub debug: bool,
    pub roll_pitch_compass: bool,
    pub altitude: bool,
}

impl PacketFlags {
    /// Apply a packet toggle. Returns false for commands that are not
    /// packet toggles.
    pub fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::AngularVelocityPackets(on) => self.angular_velocity = on,
            Command::DebugPackets(on) => self.debug = on,
            Command::RollPitchCompassPackets(on) => self.roll_pitch_compass = on,
            Command::AltitudePackets(on) => self.altitude = on,
            _ => return false,
        }
        true
    }

    fn bits(&self) -> u8 {
        u8::from(self.angular_velocity)
            | u8::from(self.debug) << 1
            | u8::from(self.roll_pitch_compass) << 2
            | u8::from(self.altitude) << 3
    }
}

impl Default for PacketFlags {
    fn default() -> Self {
        Self {
            angular_velocity: false,
            debug: false,
            roll_pitch_compass: true,
            altitude: false,
        }
    }
}

/// Transport to the host
pub trait ControlPort {
    /// Send bytes. False when the transport could not take them.
    fn write(&mut self, data: &[u8]) -> bool;

    /// Next received command code, if any.
    fn poll_command(&mut self) -> Option<[u8; 4]>;
}

/// Port that accepts and discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPort;

impl ControlPort for NullPort {
    fn write(&mut self, _data: &[u8]) -> bool {
        true
    }

    fn poll_command(&mut self) -> Option<[u8; 4]> {
        None
    }
}

/// Wire value of a [`SystemStatus`]
pub fn status_code(status: SystemStatus) -> u8 {
    match status {
        SystemStatus::Initializing => 1,
        SystemStatus::LowPower => 2,
        SystemStatus::Normal => 3,
        SystemStatus::SoftFault => 4,
        SystemStatus::HardFault => 5,
    }
}

/// Numeric fields of one telemetry packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryFrame {
    /// Wrapping packet counter
    pub packet_number: u16,
    pub status: SystemStatus,
    pub flags: PacketFlags,
    pub quaternion: UnitQuaternion<f32>,
    /// Body rates in deg/s, zero unless angular velocity packets are on
    pub angular_velocity: Vector3<f32>,
    /// Degrees
    pub heading: f32,
    /// Degrees
    pub pitch: f32,
    /// Degrees
    pub roll: f32,
    /// Accepted fit error in percent
    pub fit_error: f32,
    /// Accepted field strength in µT
    pub field_strength: f32,
}

impl TelemetryFrame {
    /// Little-endian body: counter, status, flags, quaternion (w, i, j, k),
    /// rates, heading, pitch, roll, fit error, field strength.
    pub fn encode(&self) -> [u8; TELEMETRY_FRAME_LEN] {
        let mut bytes = [0u8; TELEMETRY_FRAME_LEN];
        bytes[..2].copy_from_slice(&self.packet_number.to_le_bytes());
        bytes[2] = status_code(self.status);
        bytes[3] = self.flags.bits();

        let q = self.quaternion.as_ref();
        let angular_velocity = if self.flags.angular_velocity {
            self.angular_velocity
        } else {
            Vector3::zeros()
        };
        let values = [
            q.w,
            q.i,
            q.j,
            q.k,
            angular_velocity.x,
            angular_velocity.y,
            angular_velocity.z,
            self.heading,
            self.pitch,
            self.roll,
            self.fit_error,
            self.field_strength,
        ];
        for (chunk, value) in bytes[4..].chunks_exact_mut(4).zip(values) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        bytes
    }
}
