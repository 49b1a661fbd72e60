//! Calibration parameter sets and their application to sensor readings

use nalgebra::{Matrix3, Vector3};

/// Complexity of the model behind a magnetic calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SolverOrder {
    /// No calibration available
    #[default]
    None,
    /// Hard-iron offset and field strength
    Four,
    /// Offset, field strength and per-axis soft-iron gain
    Seven,
    /// Offset, field strength and full symmetric soft-iron matrix
    Ten,
}

impl SolverOrder {
    /// Number of model parameters, 0 for [`SolverOrder::None`].
    pub fn elements(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Four => 4,
            Self::Seven => 7,
            Self::Ten => 10,
        }
    }

    /// Inverse of [`SolverOrder::elements`].
    pub fn from_elements(elements: i32) -> Option<Self> {
        match elements {
            0 => Some(Self::None),
            4 => Some(Self::Four),
            7 => Some(Self::Seven),
            10 => Some(Self::Ten),
            _ => None,
        }
    }
}

/// Hard and soft iron magnetometer calibration.
///
/// A fit error of exactly 0 means no fit has been computed yet. It never
/// means a perfect fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagCalibration {
    /// Hard-iron offset in µT
    pub offset: Vector3<f32>,
    /// Inverse soft-iron matrix, unit determinant
    pub inverse_soft_iron: Matrix3<f32>,
    /// Fitted geomagnetic field strength in µT
    pub field_strength: f32,
    /// Fit error as a percentage of `field_strength`
    pub fit_error: f32,
    /// Model used for the fit
    pub order: SolverOrder,
}

impl MagCalibration {
    /// Field strength assumed before any fit, in µT
    pub const DEFAULT_FIELD_STRENGTH: f32 = 50.0;

    /// True once a fit has been accepted.
    pub fn is_valid(&self) -> bool {
        self.order != SolverOrder::None
    }

    /// Apply this calibration to an uncalibrated reading in µT.
    pub fn apply(&self, uncalibrated: Vector3<f32>) -> Vector3<f32> {
        calibrate_magnetic(uncalibrated, self.inverse_soft_iron, self.offset)
    }
}

impl Default for MagCalibration {
    fn default() -> Self {
        Self {
            offset: Vector3::zeros(),
            inverse_soft_iron: Matrix3::identity(),
            field_strength: Self::DEFAULT_FIELD_STRENGTH,
            fit_error: 0.0,
            order: SolverOrder::None,
        }
    }
}

/// Stored gyroscope bias.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GyroCalibration {
    /// Bias in deg/s
    pub bias: Vector3<f32>,
}

/// Accelerometer offset and gain/misalignment correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelCalibration {
    /// Offset in g
    pub offset: Vector3<f32>,
    /// Inverse gain and misalignment matrix
    pub inverse_gain: Matrix3<f32>,
}

impl AccelCalibration {
    /// Apply this calibration to a reading in g.
    pub fn apply(&self, uncalibrated: Vector3<f32>) -> Vector3<f32> {
        calibrate_inertial(uncalibrated, self.inverse_gain, self.offset)
    }
}

impl Default for AccelCalibration {
    fn default() -> Self {
        Self {
            offset: Vector3::zeros(),
            inverse_gain: Matrix3::identity(),
        }
    }
}

/// Applies an inertial sensor calibration: `inverse_gain * (uncalibrated - offset)`
///
/// # Example
/// ```
/// use nalgebra::{Matrix3, Vector3};
/// use orientation_fusion::calibration::calibrate_inertial;
///
/// let raw = Vector3::new(0.1, 0.2, 1.3);
/// let offset = Vector3::new(0.1, 0.2, 0.3);
///
/// let calibrated = calibrate_inertial(raw, Matrix3::identity(), offset);
/// assert!((calibrated - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-6);
/// ```
pub fn calibrate_inertial(
    uncalibrated: Vector3<f32>,
    inverse_gain: Matrix3<f32>,
    offset: Vector3<f32>,
) -> Vector3<f32> {
    inverse_gain * (uncalibrated - offset)
}

/// Applies magnetometer calibration (hard and soft iron correction)
///
/// # Example
/// ```
/// use nalgebra::{Matrix3, Vector3};
/// use orientation_fusion::calibration::calibrate_magnetic;
///
/// let raw = Vector3::new(100.0, 200.0, 300.0);
/// let soft_iron = Matrix3::identity();
/// let hard_iron = Vector3::new(10.0, 20.0, 30.0);
///
/// let calibrated = calibrate_magnetic(raw, soft_iron, hard_iron);
/// assert_eq!(calibrated, Vector3::new(90.0, 180.0, 270.0));
/// ```
pub fn calibrate_magnetic(
    uncalibrated: Vector3<f32>,
    inverse_soft_iron: Matrix3<f32>,
    hard_iron_offset: Vector3<f32>,
) -> Vector3<f32> {
    inverse_soft_iron * (uncalibrated - hard_iron_offset)
}
