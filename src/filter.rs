//! Gyro-driven orientation Kalman filter
//!
//! A multiplicative error-state Kalman filter. The nominal state is the
//! body-to-NED quaternion and the gyroscope bias. The error state is a small
//! body-frame rotation and a bias correction. The gyroscope drives the
//! prediction. Gravity and geomagnetic vector observations correct it.

use nalgebra::{ComplexField, Matrix3, SMatrix, SVector, UnitQuaternion, Vector3};

use crate::compass::{ecompass, tilt};
use crate::math::{DEG_TO_RAD, QuaternionExt, RAD_TO_DEG, Vector3Ext, wrap_degrees};
use crate::types::FilterSettings;

type Matrix6 = SMatrix<f32, 6, 6>;
type Matrix3x6 = SMatrix<f32, 3, 6>;
type Matrix6x3 = SMatrix<f32, 6, 3>;
type Vector6 = SVector<f32, 6>;

/// Gravity reference in NED, gravity-positive-down accelerometer convention
const GRAVITY_REFERENCE: Vector3<f32> = Vector3::new(0.0, 0.0, 1.0);

/// Magnetic noise variance grows by this factor at the rejection threshold
const MAGNETIC_DEVIATION_PENALTY: f32 = 9.0;

/// Calibrated magnetometer reading handed to the filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagneticObservation {
    /// Calibrated field in µT, body frame
    pub field: Vector3<f32>,
    /// Expected field strength in µT from the accepted calibration
    pub field_strength: f32,
}

/// Orientation filter state.
#[derive(Debug, Clone)]
pub struct OrientationFilter {
    /// Tuning
    settings: FilterSettings,
    /// Body to NED rotation
    quaternion: UnitQuaternion<f32>,
    /// Gyroscope bias in deg/s
    bias: Vector3<f32>,
    /// Error-state covariance, radians and rad/s
    covariance: Matrix6,
    /// Bias-corrected angular rate of the last prediction in deg/s
    rates: Vector3<f32>,
    /// First observation has been used to seed the orientation
    initialized: bool,
    /// Replace heading with the eCompass heading at the next chance
    realign_heading: bool,
    /// Vector part of the last magnetometer correction quaternion
    magnetic_tilt_error: Vector3<f32>,
    /// Variance used for the last magnetometer correction
    magnetic_noise_covariance: f32,
    /// Dip of the estimated field below the horizon in degrees
    inclination: f32,
    /// Last gravity observation was skipped
    accelerometer_rejected: bool,
    /// Last geomagnetic observation was skipped
    magnetometer_rejected: bool,
}

impl OrientationFilter {
    /// Create a filter awaiting its first observation.
    pub fn new(settings: FilterSettings) -> Self {
        let mut filter = Self {
            settings,
            quaternion: UnitQuaternion::identity(),
            bias: Vector3::zeros(),
            covariance: Matrix6::zeros(),
            rates: Vector3::zeros(),
            initialized: false,
            realign_heading: false,
            magnetic_tilt_error: Vector3::zeros(),
            magnetic_noise_covariance: 0.0,
            inclination: 0.0,
            accelerometer_rejected: false,
            magnetometer_rejected: false,
        };
        filter.reset();
        filter
    }

    /// Forget the orientation and bias estimates.
    pub fn reset(&mut self) {
        self.quaternion = UnitQuaternion::identity();
        self.bias = Vector3::zeros();
        self.covariance = self.initial_covariance();
        self.rates = Vector3::zeros();
        self.initialized = false;
        self.realign_heading = false;
        self.magnetic_tilt_error = Vector3::zeros();
        self.magnetic_noise_covariance = self.settings.magnetometer_noise.powi(2);
        self.inclination = 0.0;
        self.accelerometer_rejected = false;
        self.magnetometer_rejected = false;
    }

    /// Current tuning.
    pub fn settings(&self) -> FilterSettings {
        self.settings
    }

    /// Run one fusion cycle.
    ///
    /// # Arguments
    /// * `gyroscope` - Angular rate in deg/s, body frame
    /// * `accelerometer` - Specific force in g, gravity positive down
    /// * `magnetometer` - Calibrated field, `None` when no valid calibration
    ///   exists or the algorithm ignores the magnetometer
    /// * `delta_time` - Seconds since the previous cycle
    ///
    /// The first call with an accelerometer reading seeds the orientation
    /// and skips prediction.
    pub fn update(
        &mut self,
        gyroscope: Option<Vector3<f32>>,
        accelerometer: Option<Vector3<f32>>,
        magnetometer: Option<MagneticObservation>,
        delta_time: f32,
    ) {
        if !self.initialized {
            self.initialise(accelerometer, magnetometer);
            return;
        }

        if self.realign_heading {
            self.align_heading(accelerometer, magnetometer);
        }

        if let Some(gyroscope) = gyroscope {
            self.predict(gyroscope, delta_time);
        }

        self.accelerometer_rejected = false;
        if let Some(accelerometer) = accelerometer {
            self.correct_gravity(accelerometer);
        }

        self.magnetometer_rejected = false;
        if let Some(observation) = magnetometer {
            self.correct_magnetic(observation);
        }
    }

    /// Re-derive heading from the eCompass on the next cycle with both
    /// accelerometer and magnetometer available.
    pub fn request_heading_realign(&mut self) {
        self.realign_heading = true;
    }

    /// Orientation as a body-to-NED quaternion
    pub fn quaternion(&self) -> UnitQuaternion<f32> {
        self.quaternion
    }

    /// Heading in degrees, `[0, 360)`, 0 at north, clockwise positive
    pub fn heading(&self) -> f32 {
        wrap_degrees(self.quaternion.to_euler_degrees().z)
    }

    /// Pitch in degrees, bow up positive
    pub fn pitch(&self) -> f32 {
        self.quaternion.to_euler_degrees().y
    }

    /// Roll in degrees, starboard down positive
    pub fn roll(&self) -> f32 {
        self.quaternion.to_euler_degrees().x
    }

    /// Bias-corrected body rates in deg/s (roll, pitch, turn)
    pub fn rates(&self) -> Vector3<f32> {
        self.rates
    }

    /// Estimated gyroscope bias in deg/s
    pub fn bias(&self) -> Vector3<f32> {
        self.bias
    }

    /// Seed the gyroscope bias, for example from a stored calibration.
    pub fn set_bias(&mut self, bias: Vector3<f32>) {
        self.bias = self.clamp_bias(bias);
    }

    /// Vector part of the last magnetometer correction quaternion
    pub fn magnetic_tilt_error(&self) -> Vector3<f32> {
        self.magnetic_tilt_error
    }

    /// Variance of the normalised field used in the last magnetometer
    /// correction
    pub fn magnetic_noise_covariance(&self) -> f32 {
        self.magnetic_noise_covariance
    }

    /// Magnetic inclination in degrees, positive below the horizon
    pub fn inclination(&self) -> f32 {
        self.inclination
    }

    /// True once the orientation has been seeded
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// True when the last gravity observation was skipped
    pub fn accelerometer_rejected(&self) -> bool {
        self.accelerometer_rejected
    }

    /// True when the last geomagnetic observation was skipped
    pub fn magnetometer_rejected(&self) -> bool {
        self.magnetometer_rejected
    }

    fn initial_covariance(&self) -> Matrix6 {
        let angle = (self.settings.initial_orientation_uncertainty * DEG_TO_RAD).powi(2);
        let bias = (self.settings.initial_bias_uncertainty * DEG_TO_RAD).powi(2);
        Matrix6::from_diagonal(&Vector6::new(angle, angle, angle, bias, bias, bias))
    }

    fn initialise(
        &mut self,
        accelerometer: Option<Vector3<f32>>,
        magnetometer: Option<MagneticObservation>,
    ) {
        let Some(accelerometer) = accelerometer else {
            return;
        };

        let seeded = match magnetometer {
            Some(observation) => ecompass(accelerometer, observation.field),
            None => None,
        };
        let (quaternion, aligned) = match seeded {
            Some(q) => (q, true),
            None => match tilt(accelerometer) {
                Some(q) => (q, false),
                None => return,
            },
        };

        self.quaternion = quaternion;
        self.covariance = self.initial_covariance();
        self.realign_heading = false;
        self.initialized = true;
        log::debug!(
            "orientation seeded from {}",
            if aligned { "ecompass" } else { "accelerometer tilt" }
        );
    }

    fn align_heading(
        &mut self,
        accelerometer: Option<Vector3<f32>>,
        magnetometer: Option<MagneticObservation>,
    ) {
        let (Some(accelerometer), Some(observation)) = (accelerometer, magnetometer) else {
            return;
        };
        let Some(quaternion) = ecompass(accelerometer, observation.field) else {
            return;
        };

        self.quaternion = quaternion;
        let initial = self.initial_covariance();
        self.covariance
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&initial.fixed_view::<3, 3>(0, 0));
        self.realign_heading = false;
        log::info!("heading re-aligned to magnetometer: {:.1} deg", self.heading());
    }

    fn predict(&mut self, gyroscope: Vector3<f32>, delta_time: f32) {
        self.rates = gyroscope - self.bias;
        let omega = self.rates.deg_to_rad();
        let rotation = omega * delta_time;

        self.quaternion = self.quaternion * UnitQuaternion::from_scaled_axis(rotation);

        let mut transition = Matrix6::identity();
        transition
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(Matrix3::identity() - rotation.skew()));
        transition
            .fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(Matrix3::identity() * -delta_time));

        let angle_noise = (self.settings.gyroscope_noise * DEG_TO_RAD).powi(2) * delta_time;
        let bias_noise = (self.settings.gyroscope_bias_walk * DEG_TO_RAD).powi(2) * delta_time;
        let process_noise = Matrix6::from_diagonal(&Vector6::new(
            angle_noise,
            angle_noise,
            angle_noise,
            bias_noise,
            bias_noise,
            bias_noise,
        ));

        self.covariance = transition * self.covariance * transition.transpose() + process_noise;
    }

    fn correct_gravity(&mut self, accelerometer: Vector3<f32>) {
        let magnitude = accelerometer.norm();
        let deviation = (magnitude - 1.0).abs();
        if !(magnitude > 0.0) || deviation > self.settings.acceleration_rejection {
            self.accelerometer_rejected = true;
            return;
        }

        let variance = self.settings.accelerometer_noise.powi(2)
            + self.settings.acceleration_deviation_gain * deviation * deviation;
        let measured = accelerometer / magnitude;

        if self.correct(measured, GRAVITY_REFERENCE, variance).is_none() {
            self.accelerometer_rejected = true;
        }
    }

    fn correct_magnetic(&mut self, observation: MagneticObservation) {
        let magnitude = observation.field.norm();
        let field_strength = observation.field_strength;
        if !(magnitude > 0.0) || !(field_strength > 0.0) {
            self.magnetometer_rejected = true;
            return;
        }

        let deviation = (magnitude - field_strength).abs() / field_strength;
        let threshold = self.settings.magnetic_rejection;
        if deviation > threshold {
            self.magnetometer_rejected = true;
            return;
        }

        let measured = observation.field / magnitude;
        let field_ned = self.quaternion * measured;
        self.inclination = field_ned.z.clamp(-1.0, 1.0).asin() * RAD_TO_DEG;

        // Reference rotates the estimated field back onto magnetic north
        let horizontal = (field_ned.x * field_ned.x + field_ned.y * field_ned.y).sqrt();
        let reference = Vector3::new(horizontal, 0.0, field_ned.z);

        let scale = if threshold > 0.0 {
            1.0 + MAGNETIC_DEVIATION_PENALTY * (deviation / threshold).powi(2)
        } else {
            1.0
        };
        let variance = self.settings.magnetometer_noise.powi(2) * scale;
        self.magnetic_noise_covariance = variance;

        match self.correct(measured, reference, variance) {
            Some(correction) => {
                self.magnetic_tilt_error = UnitQuaternion::from_scaled_axis(correction).imag();
            }
            None => self.magnetometer_rejected = true,
        }
    }

    /// Kalman correction from a unit vector observed in the body frame whose
    /// NED value is `reference`. Returns the applied rotation in radians.
    fn correct(
        &mut self,
        measured: Vector3<f32>,
        reference: Vector3<f32>,
        variance: f32,
    ) -> Option<Vector3<f32>> {
        let predicted = self.quaternion.inverse() * reference;
        let innovation = measured - predicted;

        let mut observation = Matrix3x6::zeros();
        observation
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&predicted.skew());

        let noise = Matrix3::identity() * variance;
        let innovation_covariance =
            observation * self.covariance * observation.transpose() + noise;
        let inverse = innovation_covariance.try_inverse()?;

        let gain: Matrix6x3 = self.covariance * observation.transpose() * inverse;
        let error = gain * innovation;
        if !error.iter().all(|e| e.is_finite()) {
            return None;
        }

        // Joseph form keeps the covariance positive semi-definite
        let residual = Matrix6::identity() - gain * observation;
        let updated = residual * self.covariance * residual.transpose()
            + gain * noise * gain.transpose();
        self.covariance = (updated + updated.transpose()) * 0.5;

        let rotation = Vector3::new(error[0], error[1], error[2]);
        let bias_correction = Vector3::new(error[3], error[4], error[5]);

        self.quaternion = UnitQuaternion::new_normalize(
            (self.quaternion * UnitQuaternion::from_scaled_axis(rotation)).into_inner(),
        );
        self.bias = self.clamp_bias(self.bias + bias_correction * RAD_TO_DEG);

        Some(rotation)
    }

    fn clamp_bias(&self, bias: Vector3<f32>) -> Vector3<f32> {
        let limit = self.settings.bias_limit;
        bias.map(|axis| axis.clamp(-limit, limit))
    }
}

impl Default for OrientationFilter {
    fn default() -> Self {
        Self::new(FilterSettings::default())
    }
}
