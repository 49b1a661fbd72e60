//! Mathematical utilities and nalgebra extensions

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

/// Mathematical constants
pub const DEG_TO_RAD: f32 = core::f32::consts::PI / 180.0;
pub const RAD_TO_DEG: f32 = 180.0 / core::f32::consts::PI;

/// Standard gravity in m/s² per g
pub const GEES_TO_MPS2: f32 = 9.80665;

/// Offset between degrees Celsius and kelvin
pub const CELSIUS_TO_KELVIN: f32 = 273.15;

/// Extension trait for Vector3 operations
pub trait Vector3Ext {
    /// Unit vector in the same direction, `None` when the magnitude is
    /// zero, vanishingly small or not finite
    fn safe_normalize(&self) -> Option<Vector3<f32>>;

    /// Convert degrees to radians
    fn deg_to_rad(&self) -> Vector3<f32>;

    /// Convert radians to degrees
    fn rad_to_deg(&self) -> Vector3<f32>;

    /// Cross-product matrix, `skew(a) * b == a.cross(&b)`
    fn skew(&self) -> Matrix3<f32>;
}

impl Vector3Ext for Vector3<f32> {
    fn safe_normalize(&self) -> Option<Vector3<f32>> {
        let magnitude_squared = self.norm_squared();
        if !(magnitude_squared > 1.0e-12) || !magnitude_squared.is_finite() {
            return None;
        }
        Some(*self / magnitude_squared.sqrt())
    }

    fn deg_to_rad(&self) -> Vector3<f32> {
        *self * DEG_TO_RAD
    }

    fn rad_to_deg(&self) -> Vector3<f32> {
        *self * RAD_TO_DEG
    }

    fn skew(&self) -> Matrix3<f32> {
        Matrix3::new(
            0.0, -self.z, self.y, //
            self.z, 0.0, -self.x, //
            -self.y, self.x, 0.0,
        )
    }
}

/// Extension trait for UnitQuaternion operations
///
/// Quaternions rotate body-frame vectors into the North-East-Down frame.
pub trait QuaternionExt {
    /// Euler angles (roll, pitch, yaw) in degrees, aerospace ZYX sequence
    fn to_euler_degrees(&self) -> Vector3<f32>;

    /// Create quaternion from roll, pitch and yaw in degrees
    fn from_euler_degrees(roll: f32, pitch: f32, yaw: f32) -> UnitQuaternion<f32>;
}

impl QuaternionExt for UnitQuaternion<f32> {
    fn to_euler_degrees(&self) -> Vector3<f32> {
        let (roll, pitch, yaw) = self.euler_angles();
        Vector3::new(roll, pitch, yaw).rad_to_deg()
    }

    fn from_euler_degrees(roll: f32, pitch: f32, yaw: f32) -> UnitQuaternion<f32> {
        let euler_rad = Vector3::new(roll, pitch, yaw).deg_to_rad();
        UnitQuaternion::from_euler_angles(euler_rad.x, euler_rad.y, euler_rad.z)
    }
}

/// Wrap an angle in degrees into `[0, 360)`.
///
/// Rounding can turn a tiny negative input into exactly 360.0, so the
/// upper bound is checked after the modulo.
pub fn wrap_degrees(angle: f32) -> f32 {
    let mut wrapped = angle - 360.0 * (angle / 360.0).floor();
    if wrapped >= 360.0 {
        wrapped -= 360.0;
    }
    if wrapped < 0.0 {
        wrapped = 0.0;
    }
    wrapped
}

/// Signed shortest rotation from heading `from` to heading `to`, in
/// degrees within `(-180, 180]`.
pub fn heading_difference(from: f32, to: f32) -> f32 {
    let delta = wrap_degrees(to - from);
    if delta > 180.0 { delta - 360.0 } else { delta }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_extensions() {
        let v = Vector3::new(3.0f32, 4.0, 0.0);
        let normalized = v.safe_normalize().unwrap();
        assert!((normalized.norm() - 1.0).abs() < 1e-6);
        assert_eq!(Vector3::<f32>::zeros().safe_normalize(), None);
        assert_eq!(Vector3::new(1e-7f32, 0.0, 0.0).safe_normalize(), None);
        assert_eq!(Vector3::new(f32::NAN, 1.0, 0.0).safe_normalize(), None);
    }

    #[test]
    fn test_skew_matches_cross_product() {
        let a = Vector3::new(1.0f32, -2.0, 0.5);
        let b = Vector3::new(0.3f32, 4.0, -1.0);
        assert!((a.skew() * b - a.cross(&b)).norm() < 1e-6);
    }

    #[test]
    fn test_quaternion_euler_conversion() {
        let quat = UnitQuaternion::from_euler_degrees(30.0, 45.0, 60.0);
        let recovered = quat.to_euler_degrees();
        assert!((Vector3::new(30.0, 45.0, 60.0) - recovered).norm() < 1e-4);
    }

    #[test]
    fn test_wrap_degrees() {
        assert_eq!(wrap_degrees(0.0), 0.0);
        assert_eq!(wrap_degrees(360.0), 0.0);
        assert!((wrap_degrees(-90.0) - 270.0).abs() < 1e-4);
        assert!((wrap_degrees(725.0) - 5.0).abs() < 1e-3);
        let tiny = wrap_degrees(-1e-9);
        assert!((0.0..360.0).contains(&tiny));
    }

    #[test]
    fn test_heading_difference_across_north() {
        assert!((heading_difference(359.0, 1.0) - 2.0).abs() < 1e-4);
        assert!((heading_difference(1.0, 359.0) + 2.0).abs() < 1e-4);
        assert!((heading_difference(90.0, 270.0) - 180.0).abs() < 1e-4);
    }
}
