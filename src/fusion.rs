//! Fusion orchestrator
//!
//! [`SensorFusion`] owns the sensor slots, the sample buffers, the magnetic
//! calibration engine and the orientation filter. The application calls
//! [`SensorFusion::read_sensors`] and [`SensorFusion::run_fusion`] once per
//! loop at `loop_rate_hz`; each slot is read at its own cadence and the
//! filter runs every `loops_per_fusion` loops.

use heapless::Vec;
use nalgebra::{UnitQuaternion, Vector3};

use crate::bus::RegisterBus;
use crate::calibration::{AccelCalibration, GyroCalibration, MagCalibration, SolverOrder};
use crate::conditioning::{ConditionedSample, SensorFrame};
use crate::control::{Command, ControlPort, MAX_OUTPUT_LEN, PacketFlags, TelemetryFrame};
use crate::drivers::{Driver, SensorDriver};
use crate::error::{ConfigError, DriverError, StorageError};
use crate::filter::{MagneticObservation, OrientationFilter};
use crate::magcal::MagCalEngine;
use crate::math::{CELSIUS_TO_KELVIN, DEG_TO_RAD, GEES_TO_MPS2};
use crate::status::StatusMonitor;
use crate::storage::{CalibrationStore, NvmStorage};
use crate::types::{FusionConfig, SensorKind, SystemStatus};

/// Most sensor slots that can be installed
pub const MAX_SENSORS: usize = 4;

/// Fusion cycles between refreshes of the displayed status
pub const STATUS_PUBLISH_INTERVAL: u32 = 4;

/// One installed sensor
#[derive(Debug, Clone, Copy)]
struct SensorSlot {
    kind: SensorKind,
    driver: Driver,
    loops_per_read: u8,
    initialized: bool,
}

/// Sensor fusion system for one board
///
/// # Example
/// ```
/// use orientation_fusion::control::NullPort;
/// use orientation_fusion::storage::MemoryStorage;
/// use orientation_fusion::{BusError, FusionConfig, RegisterBus, SensorFusion, SensorKind};
///
/// // A bus with nothing attached
/// struct EmptyBus;
///
/// impl RegisterBus for EmptyBus {
///     fn read_bytes(&mut self, _: u8, _: u8, _: &mut [u8]) -> Result<(), BusError> {
///         Err(BusError::Nack)
///     }
///     fn write_bytes(&mut self, _: u8, _: u8, _: &[u8]) -> Result<(), BusError> {
///         Err(BusError::Nack)
///     }
/// }
///
/// let mut fusion = SensorFusion::new(
///     EmptyBus,
///     MemoryStorage::<256>::new(),
///     NullPort,
///     FusionConfig::default(),
/// );
/// assert!(fusion.install_sensor(0x1F, SensorKind::MagnetometerAccelerometer));
/// assert!(fusion.install_sensor(0x21, SensorKind::Gyroscope));
///
/// // Both sensors are installed but neither answers
/// assert!(fusion.begin().is_err());
/// assert!(!fusion.is_data_valid());
/// ```
pub struct SensorFusion<B, S, P> {
    bus: B,
    store: CalibrationStore<S>,
    port: P,
    config: FusionConfig,
    slots: Vec<SensorSlot, MAX_SENSORS>,
    frame: SensorFrame,
    conditioned: ConditionedSample,
    accelerometer: Option<Vector3<f32>>,
    accel_calibration: AccelCalibration,
    magcal: MagCalEngine,
    filter: OrientationFilter,
    status: StatusMonitor,
    packet_flags: PacketFlags,
    begun: bool,
    loop_counter: u32,
    fuse_counter: u8,
    fusion_cycles: u32,
    packet_number: u16,
    read_failed: bool,
    just_fused: bool,
}

impl<B, S, P> SensorFusion<B, S, P>
where
    B: RegisterBus,
    S: NvmStorage,
    P: ControlPort,
{
    pub fn new(bus: B, storage: S, port: P, config: FusionConfig) -> Self {
        Self {
            bus,
            store: CalibrationStore::new(storage),
            port,
            frame: SensorFrame::new(
                config.accelerometer_alignment,
                config.magnetometer_alignment,
                config.gyroscope_alignment,
            ),
            conditioned: ConditionedSample::default(),
            accelerometer: None,
            accel_calibration: AccelCalibration::default(),
            magcal: MagCalEngine::new(config.magcal),
            filter: OrientationFilter::new(config.filter),
            config,
            slots: Vec::new(),
            status: StatusMonitor::new(),
            packet_flags: PacketFlags::default(),
            begun: false,
            loop_counter: 0,
            fuse_counter: 0,
            fusion_cycles: 0,
            packet_number: 0,
            read_failed: false,
            just_fused: false,
        }
    }

    /// Register a sensor at `address`.
    ///
    /// Returns false when every slot is taken or no driver serves `kind`.
    pub fn install_sensor(&mut self, address: u8, kind: SensorKind) -> bool {
        let driver = match Driver::for_kind(address, kind) {
            Ok(driver) => driver,
            Err(error) => {
                log::debug!("not installing {:?} at 0x{:02X}: {}", kind, address, error);
                return false;
            }
        };

        let slot = SensorSlot {
            kind,
            driver,
            loops_per_read: self.loops_per_read(kind),
            initialized: false,
        };
        if self.slots.push(slot).is_err() {
            log::warn!("no free sensor slot for {:?} at 0x{:02X}", kind, address);
            return false;
        }
        true
    }

    /// Validate the installed sensors, initialise them and load stored
    /// calibrations.
    ///
    /// A missing sensor is fatal and leaves the system in `HardFault`. A
    /// sensor that fails to initialise leaves it in `SoftFault`; later calls
    /// to [`SensorFusion::read_sensors`] retry the initialisation.
    pub fn begin(&mut self) -> Result<(), ConfigError> {
        if let Err(error) = self.check_required_sensors() {
            log::error!("sensor configuration rejected: {}", error);
            self.status.latch_hard_fault();
            return Err(error);
        }

        let mut first_failure: Option<(SensorKind, DriverError)> = None;
        for slot in self.slots.iter_mut() {
            match slot.driver.init(&mut self.bus) {
                Ok(()) => slot.initialized = true,
                Err(error) => {
                    log::warn!("{:?} failed to initialise: {}", slot.kind, error);
                    slot.initialized = false;
                    if first_failure.is_none() {
                        first_failure = Some((slot.kind, error));
                    }
                }
            }
        }

        self.load_mag_calibration();
        self.load_gyro_calibration();
        self.load_accel_calibration();

        self.fuse_counter = self.config.loops_per_fusion;
        self.begun = true;

        match first_failure {
            Some((kind, error)) => {
                self.status.set(SystemStatus::SoftFault);
                Err(ConfigError::InitFailed(kind, error))
            }
            None => {
                self.status.set(SystemStatus::Initializing);
                log::info!("sensor fusion started with {} sensors", self.slots.len());
                Ok(())
            }
        }
    }

    /// Read every slot that is due this loop.
    ///
    /// A failing slot does not stop the others. Any failure puts the system
    /// in `SoftFault` at once.
    pub fn read_sensors(&mut self) {
        if !self.begun {
            return;
        }

        let mut failed = false;
        for slot in self.slots.iter_mut() {
            if !slot.initialized {
                match slot.driver.init(&mut self.bus) {
                    Ok(()) => {
                        log::info!("{:?} initialised on retry", slot.kind);
                        slot.initialized = true;
                    }
                    Err(error) => {
                        log::debug!("{:?} still not responding: {}", slot.kind, error);
                        failed = true;
                        continue;
                    }
                }
            }

            let due = self.loop_counter % u32::from(slot.loops_per_read.max(1)) == 0;
            if !due {
                continue;
            }
            if let Err(error) = slot.driver.read(&mut self.bus, &mut self.frame) {
                log::warn!("{:?} read failed: {}", slot.kind, error);
                failed = true;
            }
        }

        if failed {
            self.read_failed = true;
            self.status.set(SystemStatus::SoftFault);
        }
        self.loop_counter = self.loop_counter.wrapping_add(1);
    }

    /// Run a fusion cycle if one is due. Returns true when it ran.
    pub fn run_fusion(&mut self) -> bool {
        self.just_fused = false;
        if !self.begun || self.status.status() == SystemStatus::HardFault {
            return false;
        }

        if self.fuse_counter < self.config.loops_per_fusion {
            self.fuse_counter += 1;
            return false;
        }
        self.fuse_counter = 1;

        let delta_time = self.config.fusion_period();
        self.conditioned.update(&mut self.frame, &self.config.scale);
        self.accelerometer = self
            .conditioned
            .accelerometer
            .map(|raw| self.accel_calibration.apply(raw));

        let uses_magnetometer = self.config.algorithm.uses_magnetometer();
        if uses_magnetometer && self.conditioned.fresh_magnetometer {
            if let Some(sample) = self.conditioned.magnetometer {
                self.magcal.insert(sample);
            }
        }

        let was_calibrated = self.magcal.accepted().is_valid();
        if self.magcal.step(delta_time).is_some() && !was_calibrated && uses_magnetometer {
            self.filter.request_heading_realign();
        }

        let magnetometer = match self.conditioned.magnetometer {
            Some(sample) if uses_magnetometer && self.magcal.accepted().is_valid() => {
                let calibration = self.magcal.accepted();
                Some(MagneticObservation {
                    field: calibration.apply(sample),
                    field_strength: calibration.field_strength,
                })
            }
            _ => None,
        };

        self.filter.update(
            self.conditioned.gyroscope,
            self.accelerometer,
            magnetometer,
            delta_time,
        );

        let verdict = if self.read_failed {
            SystemStatus::SoftFault
        } else if self.filter.is_initialized() {
            SystemStatus::Normal
        } else {
            SystemStatus::Initializing
        };
        self.status.queue(verdict);
        self.status.commit();

        self.fusion_cycles = self.fusion_cycles.wrapping_add(1);
        if self.fusion_cycles % STATUS_PUBLISH_INTERVAL == 0 {
            self.status.publish();
        }

        self.read_failed = false;
        self.just_fused = true;
        true
    }

    /// Stream a telemetry packet. Sends at most once per fusion cycle.
    pub fn produce_toolbox_output(&mut self) -> bool {
        if !self.just_fused {
            return false;
        }

        let frame = TelemetryFrame {
            packet_number: self.packet_number,
            status: self.status.status(),
            flags: self.packet_flags,
            quaternion: self.quaternion(),
            angular_velocity: self.filter.rates(),
            heading: self.heading_degrees(),
            pitch: self.pitch_degrees(),
            roll: self.roll_degrees(),
            fit_error: self.magnetic_fit_error(),
            field_strength: self.magnetic_field_strength(),
        };
        self.packet_number = self.packet_number.wrapping_add(1);
        self.just_fused = false;
        self.port.write(&frame.encode())
    }

    /// Send application bytes through the port.
    pub fn send_arbitrary_data(&mut self, data: &[u8]) -> bool {
        if data.len() > MAX_OUTPUT_LEN {
            return false;
        }
        self.port.write(data)
    }

    /// Apply every command waiting at the port.
    pub fn process_commands(&mut self) {
        while let Some(code) = self.port.poll_command() {
            self.inject_command(code);
        }
    }

    /// Apply one command code as if it had arrived at the port.
    ///
    /// Returns false for unknown codes and for commands that failed.
    pub fn inject_command(&mut self, code: [u8; 4]) -> bool {
        let Some(command) = Command::decode(code) else {
            log::debug!("ignoring unknown command {:?}", code);
            return false;
        };

        if self.packet_flags.apply(command) {
            return true;
        }

        let result = match command {
            Command::ResetFilter => {
                self.filter.reset();
                // Keep the stored gyroscope calibration across the reset
                self.load_gyro_calibration();
                Ok(())
            }
            Command::ResetMagCalibration => {
                self.magcal.reset();
                Ok(())
            }
            Command::SaveMagCalibration => self.save_mag_calibration(),
            Command::SaveGyroCalibration => self.save_gyro_calibration(),
            Command::SaveAccelCalibration => self.save_accel_calibration(),
            Command::EraseMagCalibration => self.erase_mag_calibration(),
            Command::EraseGyroCalibration => self.erase_gyro_calibration(),
            Command::EraseAccelCalibration => self.erase_accel_calibration(),
            Command::EraseAllCalibrations => self.store.erase_all(),
            // Packet toggles were handled above
            _ => Ok(()),
        };

        match result {
            Ok(()) => true,
            Err(error) => {
                log::warn!("command {:?} failed: {}", command, error);
                false
            }
        }
    }

    /// Put every sensor in standby. The next `read_sensors` wakes them.
    pub fn enter_low_power(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Err(error) = slot.driver.idle(&mut self.bus) {
                log::debug!("{:?} idle failed: {}", slot.kind, error);
            }
            slot.initialized = false;
        }
        self.status.set(SystemStatus::LowPower);
    }

    /// Leave `HardFault` after the application has fixed the cause.
    pub fn clear_hard_fault(&mut self) {
        self.status.clear_hard_fault();
    }

    pub fn save_mag_calibration(&mut self) -> Result<(), StorageError> {
        let calibration = *self.magcal.accepted();
        self.store.save_mag(&calibration)
    }

    /// Install the stored magnetic calibration. False when none is stored.
    pub fn load_mag_calibration(&mut self) -> bool {
        match self.store.load_mag() {
            Some(calibration) => {
                self.magcal.set_accepted(calibration);
                if self.filter.is_initialized() && calibration.is_valid() {
                    self.filter.request_heading_realign();
                }
                true
            }
            None => false,
        }
    }

    pub fn erase_mag_calibration(&mut self) -> Result<(), StorageError> {
        self.store.erase_mag()
    }

    pub fn save_gyro_calibration(&mut self) -> Result<(), StorageError> {
        let calibration = GyroCalibration {
            bias: self.filter.bias(),
        };
        self.store.save_gyro(&calibration)
    }

    /// Seed the filter with the stored gyroscope bias. False when none is
    /// stored.
    pub fn load_gyro_calibration(&mut self) -> bool {
        match self.store.load_gyro() {
            Some(calibration) => {
                self.filter.set_bias(calibration.bias);
                true
            }
            None => false,
        }
    }

    pub fn erase_gyro_calibration(&mut self) -> Result<(), StorageError> {
        self.store.erase_gyro()
    }

    pub fn save_accel_calibration(&mut self) -> Result<(), StorageError> {
        let calibration = self.accel_calibration;
        self.store.save_accel(&calibration)
    }

    /// Install the stored accelerometer calibration. False when none is
    /// stored.
    pub fn load_accel_calibration(&mut self) -> bool {
        match self.store.load_accel() {
            Some(calibration) => {
                self.accel_calibration = calibration;
                true
            }
            None => false,
        }
    }

    pub fn erase_accel_calibration(&mut self) -> Result<(), StorageError> {
        self.store.erase_accel()
    }

    /// Replace the accelerometer calibration, e.g. from a factory procedure.
    pub fn set_accel_calibration(&mut self, calibration: AccelCalibration) {
        self.accel_calibration = calibration;
    }

    pub fn accel_calibration(&self) -> AccelCalibration {
        self.accel_calibration
    }

    /// True once the filter has produced an orientation
    pub fn is_data_valid(&self) -> bool {
        self.filter.is_initialized()
    }

    /// Status concluded by the last fusion cycle
    pub fn system_status(&self) -> SystemStatus {
        self.status.status()
    }

    /// Rate-limited status for indicators
    pub fn displayed_status(&self) -> SystemStatus {
        self.status.displayed()
    }

    pub fn heading_degrees(&self) -> f32 {
        self.filter.heading()
    }

    pub fn heading_radians(&self) -> f32 {
        self.heading_degrees() * DEG_TO_RAD
    }

    pub fn pitch_degrees(&self) -> f32 {
        self.filter.pitch()
    }

    pub fn pitch_radians(&self) -> f32 {
        self.pitch_degrees() * DEG_TO_RAD
    }

    pub fn roll_degrees(&self) -> f32 {
        self.filter.roll()
    }

    pub fn roll_radians(&self) -> f32 {
        self.roll_degrees() * DEG_TO_RAD
    }

    /// Rate about the body z (down) axis, positive turning to starboard
    pub fn turn_rate_deg_per_s(&self) -> f32 {
        self.filter.rates().z
    }

    pub fn turn_rate_rad_per_s(&self) -> f32 {
        self.turn_rate_deg_per_s() * DEG_TO_RAD
    }

    pub fn pitch_rate_deg_per_s(&self) -> f32 {
        self.filter.rates().y
    }

    pub fn pitch_rate_rad_per_s(&self) -> f32 {
        self.pitch_rate_deg_per_s() * DEG_TO_RAD
    }

    pub fn roll_rate_deg_per_s(&self) -> f32 {
        self.filter.rates().x
    }

    pub fn roll_rate_rad_per_s(&self) -> f32 {
        self.roll_rate_deg_per_s() * DEG_TO_RAD
    }

    /// Die temperature, `None` without a thermometer reading
    pub fn temperature_c(&self) -> Option<f32> {
        self.frame.temperature_c
    }

    pub fn temperature_k(&self) -> Option<f32> {
        self.temperature_c().map(|celsius| celsius + CELSIUS_TO_KELVIN)
    }

    /// Calibrated specific force in g, zero before the first reading
    pub fn acceleration_gees(&self) -> Vector3<f32> {
        self.accelerometer.unwrap_or_else(Vector3::zeros)
    }

    pub fn acceleration_mps2(&self) -> Vector3<f32> {
        self.acceleration_gees() * GEES_TO_MPS2
    }

    /// Body to NED orientation
    pub fn quaternion(&self) -> UnitQuaternion<f32> {
        self.filter.quaternion()
    }

    /// Gyroscope bias estimate in deg/s
    pub fn gyroscope_bias(&self) -> Vector3<f32> {
        self.filter.bias()
    }

    pub fn magnetic_calibration(&self) -> &MagCalibration {
        self.magcal.accepted()
    }

    pub fn magnetic_fit_error(&self) -> f32 {
        self.magcal.accepted().fit_error
    }

    pub fn magnetic_fit_error_trial(&self) -> f32 {
        self.magcal.trial().fit_error
    }

    /// Field strength of the accepted calibration in µT
    pub fn magnetic_field_strength(&self) -> f32 {
        self.magcal.accepted().field_strength
    }

    pub fn magnetic_field_strength_trial(&self) -> f32 {
        self.magcal.trial().field_strength
    }

    pub fn magnetic_calibration_order(&self) -> SolverOrder {
        self.magcal.accepted().order
    }

    pub fn magnetic_calibration_order_trial(&self) -> SolverOrder {
        self.magcal.trial().order
    }

    pub fn magnetic_tilt_error(&self) -> Vector3<f32> {
        self.filter.magnetic_tilt_error()
    }

    pub fn magnetic_inclination_degrees(&self) -> f32 {
        self.filter.inclination()
    }

    pub fn magnetic_noise_covariance(&self) -> f32 {
        self.filter.magnetic_noise_covariance()
    }

    pub fn packet_flags(&self) -> PacketFlags {
        self.packet_flags
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn filter(&self) -> &OrientationFilter {
        &self.filter
    }

    pub fn magcal(&self) -> &MagCalEngine {
        &self.magcal
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn storage(&self) -> &S {
        self.store.storage()
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn loops_per_read(&self, kind: SensorKind) -> u8 {
        match kind {
            SensorKind::Accelerometer | SensorKind::MagnetometerAccelerometer => {
                self.config.loops_per_accelerometer_read
            }
            SensorKind::Magnetometer => self.config.loops_per_magnetometer_read,
            SensorKind::Gyroscope => self.config.loops_per_gyroscope_read,
            SensorKind::Thermometer | SensorKind::Barometer => {
                self.config.loops_per_thermometer_read
            }
        }
    }

    fn check_required_sensors(&self) -> Result<(), ConfigError> {
        if self.slots.is_empty() {
            return Err(ConfigError::NoSensors);
        }

        let installed = |test: fn(SensorKind) -> bool| self.slots.iter().any(|s| test(s.kind));
        if !installed(SensorKind::provides_gyroscope) {
            return Err(ConfigError::MissingSensor(SensorKind::Gyroscope));
        }
        if !installed(SensorKind::provides_accelerometer) {
            return Err(ConfigError::MissingSensor(SensorKind::Accelerometer));
        }
        let needs_magnetometer = self.config.algorithm.uses_magnetometer();
        if needs_magnetometer && !installed(SensorKind::provides_magnetometer) {
            return Err(ConfigError::MissingSensor(SensorKind::Magnetometer));
        }
        Ok(())
    }
}
