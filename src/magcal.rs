//! Online magnetic calibration
//!
//! Conditioned magnetometer samples are binned by direction into a
//! [`MagBuffer`]. Periodically a fit runs over the occupied bins as a
//! cooperative state machine. Each call to [`MagCalEngine::step`] touches at
//! most a configured number of bins, so the cost of a fit is spread across
//! many fusion cycles.
//!
//! ```text
//! Idle -> Snapshot -> Accumulate -> Solve -> Evaluate -> Idle
//! ```
//!
//! The finished trial calibration replaces the accepted one only when its
//! field strength is plausible, its fit error is below the threshold and it
//! improves on what is already in use.

use heapless::Vec;
use nalgebra::Vector3;

use crate::calibration::{MagCalibration, SolverOrder};
use crate::ellipsoid::{self, EllipsoidFit, ScatterAccumulator};
use crate::math::RAD_TO_DEG;
use crate::types::MagCalSettings;

/// Elevation rows of the sample buffer
pub const ELEVATION_BINS: usize = 14;
/// Azimuth columns of the sample buffer
pub const AZIMUTH_BINS: usize = 28;
/// Total bins of the sample buffer
pub const MAG_BUFFER_BINS: usize = ELEVATION_BINS * AZIMUTH_BINS;

/// Fit errors are never reported below this, keeping 0 for "no fit yet"
pub const MIN_FIT_ERROR: f32 = 0.01;

/// Magnetometer samples binned by direction from the current offset.
///
/// Each bin holds the most recent uncalibrated sample (µT) whose direction
/// fell into it.
#[derive(Debug, Clone)]
pub struct MagBuffer {
    bins: [Option<Vector3<f32>>; MAG_BUFFER_BINS],
    count: usize,
}

impl MagBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            bins: [None; MAG_BUFFER_BINS],
            count: 0,
        }
    }

    /// Bin index for a direction, `None` for a zero vector.
    pub fn bin_index(direction: Vector3<f32>) -> Option<usize> {
        let norm = direction.norm();
        if norm.is_nan() || norm <= 1.0e-3 {
            return None;
        }
        let elevation = (direction.z / norm).clamp(-1.0, 1.0).asin() * RAD_TO_DEG;
        let azimuth = direction.y.atan2(direction.x) * RAD_TO_DEG;

        let row = ((elevation + 90.0) * ELEVATION_BINS as f32 / 180.0) as usize;
        let column = ((azimuth + 180.0) * AZIMUTH_BINS as f32 / 360.0) as usize;
        Some(row.min(ELEVATION_BINS - 1) * AZIMUTH_BINS + column.min(AZIMUTH_BINS - 1))
    }

    /// Store `sample` in the bin of its direction from `offset`.
    ///
    /// Returns false when the sample coincides with the offset.
    pub fn insert(&mut self, sample: Vector3<f32>, offset: Vector3<f32>) -> bool {
        let Some(index) = Self::bin_index(sample - offset) else {
            return false;
        };
        if self.bins[index].is_none() {
            self.count += 1;
        }
        self.bins[index] = Some(sample);
        true
    }

    /// Sample held in bin `index`.
    pub fn get(&self, index: usize) -> Option<Vector3<f32>> {
        self.bins.get(index).copied().flatten()
    }

    /// Number of occupied bins.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Empty every bin.
    pub fn clear(&mut self) {
        self.bins = [None; MAG_BUFFER_BINS];
        self.count = 0;
    }
}

impl Default for MagBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress of the cooperative fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FitPhase {
    /// Waiting for enough new samples
    Idle,
    /// Copying occupied bins, next bin to visit
    Snapshot(usize),
    /// Building the scatter matrix, next snapshot entry
    Accumulate(usize),
    /// Running the solver
    Solve,
    /// Computing the residual, next snapshot entry
    Evaluate(usize),
}

/// Magnetic calibration engine.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use orientation_fusion::{MagCalEngine, MagCalSettings, SolverOrder};
///
/// let mut engine = MagCalEngine::new(MagCalSettings::default());
///
/// // One slow horizontal turn around a 45 µT field with a hard-iron offset
/// for k in 0..720 {
///     let a = (k as f32 * 0.5).to_radians();
///     let offset = Vector3::new(8.0, -3.0, 0.0);
///     engine.insert(offset + Vector3::new(a.cos(), a.sin(), 0.0) * 45.0);
///     engine.step(0.025);
/// }
///
/// assert_eq!(engine.accepted().order, SolverOrder::Four);
/// assert!((engine.accepted().field_strength - 45.0).abs() < 0.5);
/// ```
#[derive(Debug, Clone)]
pub struct MagCalEngine {
    settings: MagCalSettings,
    buffer: MagBuffer,
    phase: FitPhase,
    new_samples: u32,
    target_order: SolverOrder,
    snapshot: Vec<Vector3<f32>, MAG_BUFFER_BINS>,
    snapshot_sum: Vector3<f32>,
    accumulator: ScatterAccumulator,
    fit: Option<(SolverOrder, EllipsoidFit)>,
    residual_sum: f32,
    trial: MagCalibration,
    accepted: MagCalibration,
}

impl MagCalEngine {
    /// Create an engine with no calibration.
    pub fn new(settings: MagCalSettings) -> Self {
        Self {
            settings,
            buffer: MagBuffer::new(),
            phase: FitPhase::Idle,
            new_samples: 0,
            target_order: SolverOrder::None,
            snapshot: Vec::new(),
            snapshot_sum: Vector3::zeros(),
            accumulator: ScatterAccumulator::new(Vector3::zeros()),
            fit: None,
            residual_sum: 0.0,
            trial: MagCalibration::default(),
            accepted: MagCalibration::default(),
        }
    }

    /// Discard every sample, the trial and the accepted calibration.
    pub fn reset(&mut self) {
        *self = Self::new(self.settings);
    }

    /// Install a previously stored calibration as the accepted one.
    pub fn set_accepted(&mut self, calibration: MagCalibration) {
        self.accepted = calibration;
    }

    /// Add one uncalibrated sample in µT.
    pub fn insert(&mut self, sample: Vector3<f32>) {
        self.buffer.insert(sample, self.accepted.offset);
        self.new_samples = self.new_samples.saturating_add(1);
    }

    /// Calibration in use.
    pub fn accepted(&self) -> &MagCalibration {
        &self.accepted
    }

    /// Most recent trial calibration.
    pub fn trial(&self) -> &MagCalibration {
        &self.trial
    }

    /// Sample buffer.
    pub fn buffer(&self) -> &MagBuffer {
        &self.buffer
    }

    /// Current position of the cooperative fit.
    pub fn phase(&self) -> FitPhase {
        self.phase
    }

    /// Model the buffer can support with its current bin count.
    pub fn solver_order_for(&self, bins: usize) -> SolverOrder {
        if bins >= self.settings.min_bins_10 {
            SolverOrder::Ten
        } else if bins >= self.settings.min_bins_7 {
            SolverOrder::Seven
        } else if bins >= self.settings.min_bins_4 {
            SolverOrder::Four
        } else {
            SolverOrder::None
        }
    }

    /// Advance the fit by one bounded slice of work.
    ///
    /// `dt` is the time since the previous call in seconds and ages the
    /// accepted fit error. Returns the new accepted calibration when a trial
    /// was promoted during this call.
    pub fn step(&mut self, dt: f32) -> Option<MagCalibration> {
        self.age(dt);
        let slice = self.settings.bins_per_step.max(1);

        match self.phase {
            FitPhase::Idle => {
                let order = self.solver_order_for(self.buffer.count());
                let due = self.new_samples >= self.settings.samples_between_fits;
                if order != SolverOrder::None && due {
                    self.new_samples = 0;
                    self.target_order = order;
                    self.snapshot.clear();
                    self.snapshot_sum = Vector3::zeros();
                    self.phase = FitPhase::Snapshot(0);
                }
                None
            }
            FitPhase::Snapshot(next) => {
                let end = (next + slice).min(MAG_BUFFER_BINS);
                for index in next..end {
                    if let Some(sample) = self.buffer.get(index) {
                        // Capacity equals the bin count, so this cannot fail.
                        let _ = self.snapshot.push(sample);
                        self.snapshot_sum += sample;
                    }
                }
                self.phase = if end < MAG_BUFFER_BINS {
                    FitPhase::Snapshot(end)
                } else if self.solver_order_for(self.snapshot.len()) == SolverOrder::None {
                    FitPhase::Idle
                } else {
                    let mean = self.snapshot_sum / self.snapshot.len() as f32;
                    self.accumulator = ScatterAccumulator::new(mean);
                    FitPhase::Accumulate(0)
                };
                None
            }
            FitPhase::Accumulate(next) => {
                let end = (next + slice).min(self.snapshot.len());
                for sample in &self.snapshot[next..end] {
                    self.accumulator.add(*sample);
                }
                self.phase = if end < self.snapshot.len() {
                    FitPhase::Accumulate(end)
                } else {
                    FitPhase::Solve
                };
                None
            }
            FitPhase::Solve => {
                self.fit = ellipsoid::solve(self.target_order, &self.accumulator);
                self.residual_sum = 0.0;
                self.phase = if self.fit.is_some() {
                    FitPhase::Evaluate(0)
                } else {
                    log::debug!("magnetic fit with {} bins failed", self.snapshot.len());
                    FitPhase::Idle
                };
                None
            }
            FitPhase::Evaluate(next) => {
                let Some((order, fit)) = self.fit else {
                    self.phase = FitPhase::Idle;
                    return None;
                };
                let end = (next + slice).min(self.snapshot.len());
                for sample in &self.snapshot[next..end] {
                    let residual = fit.residual(*sample);
                    self.residual_sum += residual * residual;
                }
                if end < self.snapshot.len() {
                    self.phase = FitPhase::Evaluate(end);
                    return None;
                }
                self.phase = FitPhase::Idle;
                self.finish_trial(order, fit)
            }
        }
    }

    fn finish_trial(&mut self, order: SolverOrder, fit: EllipsoidFit) -> Option<MagCalibration> {
        let rms = (self.residual_sum / self.snapshot.len().max(1) as f32).sqrt();
        let fit_error = (100.0 * rms / fit.field_strength).max(MIN_FIT_ERROR);

        self.trial = MagCalibration {
            offset: fit.offset,
            inverse_soft_iron: fit.inverse_soft_iron,
            field_strength: fit.field_strength,
            fit_error,
            order,
        };

        if !self.is_acceptable(&self.trial) {
            return None;
        }

        if self.accepted.order != self.trial.order || !self.accepted.is_valid() {
            log::info!(
                "accepted {}-element magnetic calibration, B = {} uT, fit error {}%",
                order.elements(),
                fit.field_strength,
                fit_error
            );
        }
        self.accepted = self.trial;
        Some(self.accepted)
    }

    fn is_acceptable(&self, trial: &MagCalibration) -> bool {
        let plausible_field = trial.field_strength >= self.settings.min_field
            && trial.field_strength <= self.settings.max_field;
        let good_fit = trial.fit_error < self.settings.max_fit_error;
        let improves = !self.accepted.is_valid()
            || trial.order > self.accepted.order
            || trial.fit_error <= self.accepted.fit_error;
        plausible_field && good_fit && improves
    }

    fn age(&mut self, dt: f32) {
        if self.accepted.is_valid() && self.settings.fit_error_aging_secs > 0.0 && dt > 0.0 {
            self.accepted.fit_error *= 1.0 + dt / self.settings.fit_error_aging_secs;
        }
    }
}
