//! Tilt-compensated compass
//!
//! Closed-form orientation from a single accelerometer and magnetometer
//! reading. The orientation filter uses it to initialise, and to re-align
//! heading when the first magnetic calibration becomes available.
//!
//! Axes are North-East-Down. The accelerometer is taken in the gravity
//! positive-down convention, so a level, stationary sensor reads `(0, 0, 1)`.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

use crate::math::Vector3Ext;

/// Orientation from accelerometer and calibrated magnetometer.
///
/// Builds the North, East and Down axes in body coordinates and converts
/// that rotation into a quaternion. Returns `None` when either vector is
/// zero or the two are parallel.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use orientation_fusion::compass::ecompass;
///
/// // Level, facing magnetic north, field dipping 60° downward
/// let accel = Vector3::new(0.0, 0.0, 1.0);
/// let mag = Vector3::new(25.0, 0.0, 43.3);
/// let q = ecompass(accel, mag).unwrap();
/// assert!(q.angle() < 1e-3);
/// ```
pub fn ecompass(
    accelerometer: Vector3<f32>,
    magnetometer: Vector3<f32>,
) -> Option<UnitQuaternion<f32>> {
    let down = accelerometer.safe_normalize()?;
    let east = down.cross(&magnetometer).safe_normalize()?;
    let north = east.cross(&down);

    // Rows are the NED axes expressed in body coordinates
    let body_to_ned = Matrix3::from_rows(&[north.transpose(), east.transpose(), down.transpose()]);
    let rotation = Rotation3::from_matrix_unchecked(body_to_ned);
    Some(UnitQuaternion::from_rotation_matrix(&rotation))
}

/// Orientation from the accelerometer alone, heading fixed at north.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use orientation_fusion::compass::tilt;
///
/// let q = tilt(Vector3::new(0.0, 0.0, 1.0)).unwrap();
/// assert!(q.angle() < 1e-6);
/// ```
pub fn tilt(accelerometer: Vector3<f32>) -> Option<UnitQuaternion<f32>> {
    let down = accelerometer.safe_normalize()?;
    let roll = down.y.atan2(down.z);
    let pitch = (-down.x).atan2((down.y * down.y + down.z * down.z).sqrt());
    Some(UnitQuaternion::from_euler_angles(roll, pitch, 0.0))
}
