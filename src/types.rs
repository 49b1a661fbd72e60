//! Core types and configuration for the orientation fusion library

use crate::axes::AxesAlignment;

/// Kind of physical sensor that can be installed in a slot.
///
/// The FXOS8700 provides the accelerometer, magnetometer and thermometer,
/// either as separate slots or as one combined slot. The FXAS21002 provides
/// the gyroscope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorKind {
    /// Accelerometer only
    Accelerometer,
    /// Magnetometer only
    Magnetometer,
    /// Accelerometer and magnetometer read in one transaction
    MagnetometerAccelerometer,
    /// Gyroscope
    Gyroscope,
    /// Die thermometer
    Thermometer,
    /// Pressure sensor. No driver exists; installing one is rejected.
    Barometer,
}

impl SensorKind {
    /// True when a slot of this kind delivers accelerometer samples.
    pub fn provides_accelerometer(self) -> bool {
        matches!(self, Self::Accelerometer | Self::MagnetometerAccelerometer)
    }

    /// True when a slot of this kind delivers magnetometer samples.
    pub fn provides_magnetometer(self) -> bool {
        matches!(self, Self::Magnetometer | Self::MagnetometerAccelerometer)
    }

    /// True when a slot of this kind delivers gyroscope samples.
    pub fn provides_gyroscope(self) -> bool {
        matches!(self, Self::Gyroscope)
    }
}

/// Fusion algorithm variant
///
/// Selects which sensors the orientation filter requires and whether the
/// magnetometer contributes heading corrections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FusionAlgorithm {
    /// Gyroscope and accelerometer. Heading drifts freely.
    SixDofGyroKalman,
    /// Gyroscope, accelerometer and magnetometer.
    #[default]
    NineDofGyroKalman,
}

impl FusionAlgorithm {
    /// True when the magnetometer is a required input.
    pub fn uses_magnetometer(self) -> bool {
        matches!(self, Self::NineDofGyroKalman)
    }
}

/// Health of the fusion system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SystemStatus {
    /// Sensors installed but no fusion cycle has completed yet
    #[default]
    Initializing,
    /// Last fusion cycle completed with every sensor read successfully
    Normal,
    /// Reserved for an application-driven low power state
    LowPower,
    /// Transient failure, cleared by the next clean cycle
    SoftFault,
    /// Fatal configuration error. Requires external intervention.
    HardFault,
}

/// Sensor scale factors
///
/// Counts per physical unit of the raw 16-bit samples. Defaults match the
/// FXOS8700 at ±4 g and the FXAS21002 at ±2000 deg/s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorScale {
    /// Accelerometer counts per g
    pub accelerometer_counts_per_g: f32,
    /// Magnetometer counts per µT
    pub magnetometer_counts_per_ut: f32,
    /// Gyroscope counts per deg/s
    pub gyroscope_counts_per_dps: f32,
}

impl Default for SensorScale {
    fn default() -> Self {
        Self {
            accelerometer_counts_per_g: 8192.0,
            magnetometer_counts_per_ut: 10.0,
            gyroscope_counts_per_dps: 16.0,
        }
    }
}

/// Orientation filter tuning
///
/// Noise terms are standard deviations. Angular quantities are in degrees,
/// vector observations are in units of the normalised vector.
///
/// # Example
/// ```
/// use orientation_fusion::FilterSettings;
///
/// let settings = FilterSettings {
///     accelerometer_noise: 0.05, // trust gravity less on a moving vessel
///     ..Default::default()
/// };
/// assert!(settings.gyroscope_noise > 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    /// Gyroscope rate noise in deg/s
    pub gyroscope_noise: f32,
    /// Gyroscope bias random walk in deg/s per √s
    pub gyroscope_bias_walk: f32,
    /// Noise of the normalised gravity observation
    pub accelerometer_noise: f32,
    /// Additional variance per g² of deviation of |a| from 1 g
    pub acceleration_deviation_gain: f32,
    /// Gravity observations are skipped when ||a| - 1 g| exceeds this, in g
    pub acceleration_rejection: f32,
    /// Noise of the normalised geomagnetic observation
    pub magnetometer_noise: f32,
    /// Fractional deviation of |m| from the fitted field strength beyond
    /// which magnetometer corrections are skipped
    pub magnetic_rejection: f32,
    /// Initial orientation uncertainty in degrees
    pub initial_orientation_uncertainty: f32,
    /// Initial gyroscope bias uncertainty in deg/s
    pub initial_bias_uncertainty: f32,
    /// Largest gyroscope bias the filter will estimate, in deg/s
    pub bias_limit: f32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            gyroscope_noise: 0.3,
            gyroscope_bias_walk: 0.01,
            accelerometer_noise: 0.02,
            acceleration_deviation_gain: 1.0,
            acceleration_rejection: 0.5,
            magnetometer_noise: 0.05,
            magnetic_rejection: 0.25,
            initial_orientation_uncertainty: 10.0,
            initial_bias_uncertainty: 2.0,
            bias_limit: 7.0,
        }
    }
}

/// Magnetic calibration tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagCalSettings {
    /// Occupied bins needed before a 4-element (offset + field) fit
    pub min_bins_4: usize,
    /// Occupied bins needed before a 7-element (axis-aligned ellipsoid) fit
    pub min_bins_7: usize,
    /// Occupied bins needed before a 10-element (general ellipsoid) fit
    pub min_bins_10: usize,
    /// New samples that must arrive between fit attempts
    pub samples_between_fits: u32,
    /// Bins touched per cooperative step
    pub bins_per_step: usize,
    /// Trial fits at or above this error percentage are rejected
    pub max_fit_error: f32,
    /// Smallest plausible geomagnetic field strength in µT
    pub min_field: f32,
    /// Largest plausible geomagnetic field strength in µT
    pub max_field: f32,
    /// Seconds for the accepted fit error to grow by a factor of e
    pub fit_error_aging_secs: f32,
}

impl Default for MagCalSettings {
    fn default() -> Self {
        Self {
            min_bins_4: 24,
            min_bins_7: 80,
            min_bins_10: 150,
            samples_between_fits: 40,
            bins_per_step: 56,
            max_fit_error: 3.5,
            min_field: 22.0,
            max_field: 67.0,
            fit_error_aging_secs: 86_400.0,
        }
    }
}

/// Top-level configuration of a [`SensorFusion`](crate::SensorFusion) instance.
///
/// Cadences are counted in calls to `read_sensors`/`run_fusion`, which the
/// embedding application makes at `loop_rate_hz`.
///
/// # Example
/// ```
/// use orientation_fusion::{FusionAlgorithm, FusionConfig};
///
/// let config = FusionConfig {
///     loop_rate_hz: 200.0,
///     loops_per_fusion: 5,
///     loops_per_accelerometer_read: 5,
///     algorithm: FusionAlgorithm::SixDofGyroKalman,
///     ..Default::default()
/// };
/// assert_eq!(config.fusion_period(), 0.025);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionConfig {
    /// Rate at which the application calls the orchestrator
    pub loop_rate_hz: f32,
    /// Loops between accelerometer reads
    pub loops_per_accelerometer_read: u8,
    /// Loops between magnetometer reads
    pub loops_per_magnetometer_read: u8,
    /// Loops between gyroscope reads
    pub loops_per_gyroscope_read: u8,
    /// Loops between thermometer reads
    pub loops_per_thermometer_read: u8,
    /// Loops between fusion cycles
    pub loops_per_fusion: u8,
    /// Filter variant
    pub algorithm: FusionAlgorithm,
    /// Board alignment of the accelerometer
    pub accelerometer_alignment: AxesAlignment,
    /// Board alignment of the magnetometer
    pub magnetometer_alignment: AxesAlignment,
    /// Board alignment of the gyroscope
    pub gyroscope_alignment: AxesAlignment,
    /// Raw count scale factors
    pub scale: SensorScale,
    /// Orientation filter tuning
    pub filter: FilterSettings,
    /// Magnetic calibration tuning
    pub magcal: MagCalSettings,
}

impl FusionConfig {
    /// Seconds between fusion cycles.
    pub fn fusion_period(&self) -> f32 {
        f32::from(self.loops_per_fusion.max(1)) / self.loop_rate_hz
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            loop_rate_hz: 40.0,
            loops_per_accelerometer_read: 1,
            loops_per_magnetometer_read: 1,
            loops_per_gyroscope_read: 1,
            loops_per_thermometer_read: 1,
            loops_per_fusion: 1,
            algorithm: FusionAlgorithm::default(),
            accelerometer_alignment: AxesAlignment::default(),
            magnetometer_alignment: AxesAlignment::default(),
            gyroscope_alignment: AxesAlignment::default(),
            scale: SensorScale::default(),
            filter: FilterSettings::default(),
            magcal: MagCalSettings::default(),
        }
    }
}
