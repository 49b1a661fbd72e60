//! Sample conditioning
//!
//! Raw FIFO bursts from each sensor are repaired, remapped onto the body
//! frame and reduced to one representative sample per fusion cycle.
//!
//! # Example
//! ```
//! use nalgebra::Vector3;
//! use orientation_fusion::{AxesAlignment, SensorFifo};
//!
//! let mut fifo: SensorFifo<4> = SensorFifo::new(AxesAlignment::PxPyPz);
//! fifo.push(Vector3::new(10, -32768, 4));
//! fifo.push(Vector3::new(20, 0, 6));
//!
//! let mean = fifo.drain_mean().unwrap();
//! assert_eq!(mean, Vector3::new(15.0, -16383.5, 5.0));
//! assert!(fifo.is_empty());
//! ```

use heapless::Vec;
use nalgebra::Vector3;

use crate::axes::{AxesAlignment, axes_swap};
use crate::types::SensorScale;

/// Raw 16-bit sensor counts in the sensor frame
pub type RawSample = Vector3<i16>;

/// Capacity of the accelerometer FIFO
pub const ACCELEROMETER_FIFO_CAPACITY: usize = 32;
/// Capacity of the magnetometer FIFO
pub const MAGNETOMETER_FIFO_CAPACITY: usize = 8;
/// Capacity of the gyroscope FIFO
pub const GYROSCOPE_FIFO_CAPACITY: usize = 32;

/// Replace the `i16::MIN` sentinel on any axis with `-i16::MAX`.
///
/// Some parts occasionally report the two's-complement minimum during a bus
/// glitch. The axis is clamped rather than dropped so all three axes keep the
/// same sample count.
#[inline]
pub fn repair_sentinel(sample: RawSample) -> RawSample {
    sample.map(|axis| if axis == i16::MIN { -i16::MAX } else { axis })
}

/// Fixed-capacity buffer of conditioned raw samples for one sensor.
///
/// Every pushed sample is repaired and remapped on entry, so the buffer
/// only ever holds body-frame counts. When the buffer is full the oldest
/// sample is discarded.
#[derive(Debug, Clone)]
pub struct SensorFifo<const N: usize> {
    samples: Vec<RawSample, N>,
    alignment: AxesAlignment,
}

impl<const N: usize> SensorFifo<N> {
    /// Create an empty FIFO applying `alignment` to every sample.
    pub fn new(alignment: AxesAlignment) -> Self {
        Self {
            samples: Vec::new(),
            alignment,
        }
    }

    /// Repair, remap and store one raw sample.
    pub fn push(&mut self, raw: RawSample) {
        let sample = axes_swap(repair_sentinel(raw), self.alignment);
        if self.samples.is_full() {
            self.samples.remove(0);
        }
        // Cannot fail: a slot was freed above when the buffer was full.
        let _ = self.samples.push(sample);
    }

    /// Number of samples waiting.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no sample is waiting.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of samples held.
    pub fn capacity(&self) -> usize {
        N
    }

    /// Samples currently held, oldest first.
    pub fn samples(&self) -> &[RawSample] {
        &self.samples
    }

    /// Per-axis arithmetic mean of the waiting samples, or `None` if empty.
    ///
    /// Sums are taken in `i32`, which cannot overflow for any capacity up to
    /// 65536 samples.
    pub fn mean(&self) -> Option<Vector3<f32>> {
        if self.samples.is_empty() {
            return None;
        }
        if self.samples.len() == 1 {
            return Some(self.samples[0].map(f32::from));
        }

        let sum = self
            .samples
            .iter()
            .fold(Vector3::<i32>::zeros(), |acc, s| acc + s.map(i32::from));
        let count = self.samples.len() as f32;
        Some(sum.map(|axis| axis as f32 / count))
    }

    /// Average the waiting samples and empty the buffer.
    pub fn drain_mean(&mut self) -> Option<Vector3<f32>> {
        let mean = self.mean();
        self.samples.clear();
        mean
    }

    /// Discard waiting samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Per-kind sample buffers filled by sensor drivers.
#[derive(Debug, Clone)]
pub struct SensorFrame {
    /// Accelerometer counts
    pub accelerometer: SensorFifo<ACCELEROMETER_FIFO_CAPACITY>,
    /// Magnetometer counts
    pub magnetometer: SensorFifo<MAGNETOMETER_FIFO_CAPACITY>,
    /// Gyroscope counts
    pub gyroscope: SensorFifo<GYROSCOPE_FIFO_CAPACITY>,
    /// Latest die temperature in °C
    pub temperature_c: Option<f32>,
}

impl SensorFrame {
    /// Create empty buffers with the given board alignments.
    pub fn new(
        accelerometer: AxesAlignment,
        magnetometer: AxesAlignment,
        gyroscope: AxesAlignment,
    ) -> Self {
        Self {
            accelerometer: SensorFifo::new(accelerometer),
            magnetometer: SensorFifo::new(magnetometer),
            gyroscope: SensorFifo::new(gyroscope),
            temperature_c: None,
        }
    }
}

/// Latest conditioned readings in physical units.
///
/// A field keeps its previous value when its sensor produced no samples
/// during the last cycle; the matching `fresh_*` flag is then false.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConditionedSample {
    /// Accelerometer in g (gravity positive down)
    pub accelerometer: Option<Vector3<f32>>,
    /// Uncalibrated magnetometer in µT
    pub magnetometer: Option<Vector3<f32>>,
    /// Gyroscope in deg/s
    pub gyroscope: Option<Vector3<f32>>,
    /// True when the magnetometer produced a sample this cycle
    pub fresh_magnetometer: bool,
}

impl ConditionedSample {
    /// Drain every FIFO of `frame` and convert the means to physical units.
    pub fn update(&mut self, frame: &mut SensorFrame, scale: &SensorScale) {
        if let Some(mean) = frame.accelerometer.drain_mean() {
            self.accelerometer = Some(mean / scale.accelerometer_counts_per_g);
        }
        if let Some(mean) = frame.gyroscope.drain_mean() {
            self.gyroscope = Some(mean / scale.gyroscope_counts_per_dps);
        }
        self.fresh_magnetometer = match frame.magnetometer.drain_mean() {
            Some(mean) => {
                self.magnetometer = Some(mean / scale.magnetometer_counts_per_ut);
                true
            }
            None => false,
        };
    }
}
