use criterion::{Criterion, black_box, criterion_group, criterion_main};
use nalgebra::{UnitQuaternion, Vector3};
use orientation_fusion::compass::{ecompass, tilt};
use orientation_fusion::{
    AxesAlignment, FilterSettings, MagCalEngine, MagCalSettings, MagneticObservation,
    OrientationFilter, SensorFifo, axes_swap,
};
use rand::prelude::*;
use rand_pcg::Pcg64;
use std::f32::consts::PI;

const FIELD_STRENGTH: f32 = 50.0;

// Pre-generated sensor data to keep RNG cost out of the measurements
struct PreGeneratedData {
    samples: Vec<(Vector3<f32>, Vector3<f32>, Vector3<f32>)>,
    index: usize,
}

impl PreGeneratedData {
    fn new(count: usize, seed: u64) -> Self {
        let mut rng = Pcg64::seed_from_u64(seed);
        let field = Vector3::new(0.5, 0.0, 0.866) * FIELD_STRENGTH;
        let mut samples = Vec::with_capacity(count);

        for i in 0..count {
            // Gentle roll and pitch of a vessel at 40 Hz
            let phase = i as f32 * 0.025 * 0.2 * 2.0 * PI;
            let attitude = UnitQuaternion::from_euler_angles(
                0.2 * phase.sin(),
                0.1 * (phase * 1.3).cos(),
                0.5 * phase,
            );
            let to_body = attitude.inverse();

            let gyroscope = Vector3::new(
                5.0 * phase.cos() + rng.random_range(-0.3..0.3),
                -3.0 * phase.sin() + rng.random_range(-0.3..0.3),
                1.0 + rng.random_range(-0.3..0.3),
            );
            let accelerometer = to_body * Vector3::new(0.0, 0.0, 1.0)
                + Vector3::new(
                    rng.random_range(-0.01..0.01),
                    rng.random_range(-0.01..0.01),
                    rng.random_range(-0.01..0.01),
                );
            let magnetometer = to_body * field
                + Vector3::new(
                    rng.random_range(-0.5..0.5),
                    rng.random_range(-0.5..0.5),
                    rng.random_range(-0.5..0.5),
                );

            samples.push((gyroscope, accelerometer, magnetometer));
        }

        Self { samples, index: 0 }
    }

    fn next(&mut self) -> (Vector3<f32>, Vector3<f32>, Vector3<f32>) {
        let sample = self.samples[self.index];
        self.index = (self.index + 1) % self.samples.len();
        sample
    }
}

fn observation(field: Vector3<f32>) -> MagneticObservation {
    MagneticObservation {
        field,
        field_strength: FIELD_STRENGTH,
    }
}

/// Kalman update with every sensor
fn bench_filter_update(c: &mut Criterion) {
    let mut data = PreGeneratedData::new(4096, 7);
    let mut filter = OrientationFilter::new(FilterSettings::default());
    let (_, accelerometer, magnetometer) = data.next();
    filter.update(None, Some(accelerometer), Some(observation(magnetometer)), 0.025);

    c.bench_function("filter_update_nine_dof", |b| {
        b.iter(|| {
            let (gyroscope, accelerometer, magnetometer) = data.next();
            filter.update(
                black_box(Some(gyroscope)),
                black_box(Some(accelerometer)),
                black_box(Some(observation(magnetometer))),
                black_box(0.025),
            )
        })
    });
}

/// Kalman update without the magnetometer
fn bench_filter_update_six_dof(c: &mut Criterion) {
    let mut data = PreGeneratedData::new(4096, 11);
    let mut filter = OrientationFilter::new(FilterSettings::default());

    c.bench_function("filter_update_six_dof", |b| {
        b.iter(|| {
            let (gyroscope, accelerometer, _) = data.next();
            filter.update(
                black_box(Some(gyroscope)),
                black_box(Some(accelerometer)),
                None,
                black_box(0.025),
            )
        })
    });
}

/// One full magnetic fit, spread over as many steps as it takes
fn bench_magcal_fit(c: &mut Criterion) {
    let mut rng = Pcg64::seed_from_u64(3);
    let offset = Vector3::new(10.0, -4.0, 6.0);
    let samples: Vec<Vector3<f32>> = (0..600)
        .map(|_| {
            let azimuth = rng.random_range(0.0..2.0 * PI);
            let elevation = rng.random_range(-1.2..1.2f32);
            let direction = Vector3::new(
                elevation.cos() * azimuth.cos(),
                elevation.cos() * azimuth.sin(),
                elevation.sin(),
            );
            offset + direction * FIELD_STRENGTH
        })
        .collect();

    c.bench_function("magcal_fit_600_samples", |b| {
        b.iter(|| {
            let mut engine = MagCalEngine::new(MagCalSettings::default());
            for sample in &samples {
                engine.insert(black_box(*sample));
                engine.step(0.025);
            }
            black_box(*engine.accepted())
        })
    });
}

/// eCompass and accelerometer-only tilt
fn bench_compass(c: &mut Criterion) {
    let mut data = PreGeneratedData::new(1024, 5);

    c.bench_function("ecompass", |b| {
        b.iter(|| {
            let (_, accelerometer, magnetometer) = data.next();
            black_box(ecompass(black_box(accelerometer), black_box(magnetometer)))
        })
    });

    c.bench_function("tilt", |b| {
        b.iter(|| {
            let (_, accelerometer, _) = data.next();
            black_box(tilt(black_box(accelerometer)))
        })
    });
}

/// Sample conditioning of a full gyroscope FIFO
fn bench_conditioning(c: &mut Criterion) {
    let mut rng = Pcg64::seed_from_u64(9);
    let raw: Vec<Vector3<i16>> = (0..32)
        .map(|_| {
            Vector3::new(
                rng.random_range(-200..200),
                rng.random_range(-200..200),
                rng.random_range(-200..200),
            )
        })
        .collect();

    c.bench_function("fifo_push_and_mean_32", |b| {
        b.iter(|| {
            let mut fifo: SensorFifo<32> = SensorFifo::new(AxesAlignment::NyPxPz);
            for sample in &raw {
                fifo.push(black_box(*sample));
            }
            black_box(fifo.drain_mean())
        })
    });

    c.bench_function("axes_swap", |b| {
        b.iter(|| black_box(axes_swap(black_box(raw[0]), black_box(AxesAlignment::PzNxNy))))
    });
}

criterion_group!(
    benches,
    bench_filter_update,
    bench_filter_update_six_dof,
    bench_magcal_fit,
    bench_compass,
    bench_conditioning,
);
criterion_main!(benches);
