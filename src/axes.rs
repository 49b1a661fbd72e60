//! Sensor axes alignment for different mounting orientations
//!
//! Remaps raw sensor axes onto the North-East-Down body frame (x toward the
//! bow, y to starboard, z down). Only the 24 proper rotations are offered, so
//! a remap never mirrors the frame and never scales a value.
//!
//! # Example
//! ```
//! use nalgebra::Vector3;
//! use orientation_fusion::{AxesAlignment, axes_swap};
//!
//! // Raw counts in the sensor frame
//! let sensor = Vector3::new(1i16, 2, 3);
//!
//! // Sensor mounted with Y pointing forward, X pointing to port
//! let body = axes_swap(sensor, AxesAlignment::PyNxPz);
//! assert_eq!(body, Vector3::new(2, -1, 3));
//!
//! // The inverse alignment takes it back
//! assert_eq!(axes_swap(body, AxesAlignment::PyNxPz.inverse()), sensor);
//! ```

use core::ops::Neg;

use nalgebra::{Scalar, Vector3};

/// Axes alignment describing the sensor axes relative to the body axes.
///
/// Each variant name describes where each body axis comes from in sensor
/// coordinates. The three letter-pairs specify the source for body X, Y, Z
/// respectively.
///
/// For example, `PyNxPz` means:
/// - Body X = +Sensor Y (first pair: Py)
/// - Body Y = -Sensor X (second pair: Nx)
/// - Body Z = +Sensor Z (third pair: Pz)
///
/// The naming convention uses:
/// - `P` = Positive (same direction)
/// - `N` = Negative (inverted direction)
/// - `x`, `y`, `z` = which sensor axis to use
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use orientation_fusion::{AxesAlignment, axes_swap};
///
/// let sensor = Vector3::new(1.0, 0.0, 0.0);
///
/// // Identity alignment - no change
/// let result = axes_swap(sensor, AxesAlignment::PxPyPz);
/// assert_eq!(result, sensor);
///
/// // Swap X and Y, negate X
/// let result = axes_swap(sensor, AxesAlignment::PyNxPz);
/// assert_eq!(result, Vector3::new(0.0, -1.0, 0.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AxesAlignment {
    /// +X+Y+Z (identity - no remapping)
    #[default]
    PxPyPz,
    /// +X-Z+Y
    PxNzPy,
    /// +X-Y-Z
    PxNyNz,
    /// +X+Z-Y
    PxPzNy,
    /// -X+Y-Z
    NxPyNz,
    /// -X+Z+Y
    NxPzPy,
    /// -X-Y+Z
    NxNyPz,
    /// -X-Z-Y
    NxNzNy,
    /// +Y-X+Z
    PyNxPz,
    /// +Y-Z-X
    PyNzNx,
    /// +Y+X-Z
    PyPxNz,
    /// +Y+Z+X
    PyPzPx,
    /// -Y+X+Z
    NyPxPz,
    /// -Y-Z+X
    NyNzPx,
    /// -Y-X-Z
    NyNxNz,
    /// -Y+Z-X
    NyPzNx,
    /// +Z+Y-X
    PzPyNx,
    /// +Z+X+Y
    PzPxPy,
    /// +Z-Y+X
    PzNyPx,
    /// +Z-X-Y
    PzNxNy,
    /// -Z+Y+X
    NzPyPx,
    /// -Z-X+Y
    NzNxPy,
    /// -Z-Y-X
    NzNyNx,
    /// -Z+X-Y
    NzPxNy,
}

impl AxesAlignment {
    /// Every supported alignment
    pub const ALL: [AxesAlignment; 24] = [
        Self::PxPyPz,
        Self::PxNzPy,
        Self::PxNyNz,
        Self::PxPzNy,
        Self::NxPyNz,
        Self::NxPzPy,
        Self::NxNyPz,
        Self::NxNzNy,
        Self::PyNxPz,
        Self::PyNzNx,
        Self::PyPxNz,
        Self::PyPzPx,
        Self::NyPxPz,
        Self::NyNzPx,
        Self::NyNxNz,
        Self::NyPzNx,
        Self::PzPyNx,
        Self::PzPxPy,
        Self::PzNyPx,
        Self::PzNxNy,
        Self::NzPyPx,
        Self::NzNxPy,
        Self::NzNyNx,
        Self::NzPxNy,
    ];

    /// Alignment that undoes this one.
    ///
    /// The alignments form a group, so the inverse is always one of
    /// [`AxesAlignment::ALL`]. It is found by pushing a marker with distinct
    /// axis magnitudes through both remaps.
    pub fn inverse(self) -> AxesAlignment {
        let marker = Vector3::new(1i16, 2, 3);
        let forward = axes_swap(marker, self);
        Self::ALL
            .into_iter()
            .find(|candidate| axes_swap(forward, *candidate) == marker)
            .unwrap_or(self)
    }
}

/// Swaps sensor axes for alignment with the body axes.
///
/// Works on raw `i16` counts as well as on floating point vectors. Raw
/// counts must have had the `i16::MIN` sentinel repaired first, otherwise a
/// negated axis would overflow.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use orientation_fusion::{AxesAlignment, axes_swap};
///
/// // Gyroscope reading from a sensor mounted with Z forward and X up
/// let gyro_sensor = Vector3::new(10.0f32, 20.0, 30.0);
/// let gyro_body = axes_swap(gyro_sensor, AxesAlignment::PzPyNx);
/// assert_eq!(gyro_body, Vector3::new(30.0, 20.0, -10.0));
/// ```
#[inline]
pub fn axes_swap<T>(sensor: Vector3<T>, alignment: AxesAlignment) -> Vector3<T>
where
    T: Scalar + Copy + Neg<Output = T>,
{
    match alignment {
        AxesAlignment::PxPyPz => sensor,
        AxesAlignment::PxNzPy => Vector3::new(sensor.x, -sensor.z, sensor.y),
        AxesAlignment::PxNyNz => Vector3::new(sensor.x, -sensor.y, -sensor.z),
        AxesAlignment::PxPzNy => Vector3::new(sensor.x, sensor.z, -sensor.y),
        AxesAlignment::NxPyNz => Vector3::new(-sensor.x, sensor.y, -sensor.z),
        AxesAlignment::NxPzPy => Vector3::new(-sensor.x, sensor.z, sensor.y),
        AxesAlignment::NxNyPz => Vector3::new(-sensor.x, -sensor.y, sensor.z),
        AxesAlignment::NxNzNy => Vector3::new(-sensor.x, -sensor.z, -sensor.y),
        AxesAlignment::PyNxPz => Vector3::new(sensor.y, -sensor.x, sensor.z),
        AxesAlignment::PyNzNx => Vector3::new(sensor.y, -sensor.z, -sensor.x),
        AxesAlignment::PyPxNz => Vector3::new(sensor.y, sensor.x, -sensor.z),
        AxesAlignment::PyPzPx => Vector3::new(sensor.y, sensor.z, sensor.x),
        AxesAlignment::NyPxPz => Vector3::new(-sensor.y, sensor.x, sensor.z),
        AxesAlignment::NyNzPx => Vector3::new(-sensor.y, -sensor.z, sensor.x),
        AxesAlignment::NyNxNz => Vector3::new(-sensor.y, -sensor.x, -sensor.z),
        AxesAlignment::NyPzNx => Vector3::new(-sensor.y, sensor.z, -sensor.x),
        AxesAlignment::PzPyNx => Vector3::new(sensor.z, sensor.y, -sensor.x),
        AxesAlignment::PzPxPy => Vector3::new(sensor.z, sensor.x, sensor.y),
        AxesAlignment::PzNyPx => Vector3::new(sensor.z, -sensor.y, sensor.x),
        AxesAlignment::PzNxNy => Vector3::new(sensor.z, -sensor.x, -sensor.y),
        AxesAlignment::NzPyPx => Vector3::new(-sensor.z, sensor.y, sensor.x),
        AxesAlignment::NzNxPy => Vector3::new(-sensor.z, -sensor.x, sensor.y),
        AxesAlignment::NzNyNx => Vector3::new(-sensor.z, -sensor.y, -sensor.x),
        AxesAlignment::NzPxNy => Vector3::new(-sensor.z, sensor.x, -sensor.y),
    }
}
