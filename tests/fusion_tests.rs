mod common;

use common::{RecordingPort, SimulatedBoard, board, board_with_storage, run, step};
use nalgebra::{UnitQuaternion, Vector3};
use orientation_fusion::drivers::{fxas21002, fxos8700};
use orientation_fusion::{
    AccelCalibration, CELSIUS_TO_KELVIN, ConfigError, FusionAlgorithm, FusionConfig,
    MemoryStorage, SensorFusion, SensorKind, SystemStatus, heading_difference,
};

fn orientation(roll: f32, pitch: f32, yaw: f32) -> UnitQuaternion<f32> {
    UnitQuaternion::from_euler_angles(roll.to_radians(), pitch.to_radians(), yaw.to_radians())
}

#[test]
fn test_level_and_stationary() {
    let mut fusion = board(FusionConfig::default());
    assert_eq!(fusion.begin(), Ok(()));
    assert_eq!(fusion.system_status(), SystemStatus::Initializing);
    assert!(!fusion.is_data_valid());

    run(&mut fusion, 200);

    assert!(fusion.is_data_valid());
    assert_eq!(fusion.system_status(), SystemStatus::Normal);
    assert!(fusion.pitch_degrees().abs() < 0.5);
    assert!(fusion.roll_degrees().abs() < 0.5);
    assert!(fusion.turn_rate_deg_per_s().abs() < 0.1);
    assert!((fusion.acceleration_gees() - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-3);
    assert!((fusion.acceleration_mps2().z - 9.80665).abs() < 1e-2);
}

#[test]
fn test_tilt_is_tracked() {
    let mut fusion = board(FusionConfig::default());
    fusion.begin().unwrap();
    fusion.bus_mut().set_orientation(orientation(20.0, -10.0, 0.0), Vector3::zeros());

    run(&mut fusion, 300);

    assert!((fusion.roll_degrees() - 20.0).abs() < 1.0, "roll {}", fusion.roll_degrees());
    assert!((fusion.pitch_degrees() + 10.0).abs() < 1.0, "pitch {}", fusion.pitch_degrees());
    assert!((fusion.roll_radians() - 20f32.to_radians()).abs() < 0.02);
}

#[test]
fn test_fusion_cadence() {
    let config = FusionConfig {
        loop_rate_hz: 200.0,
        loops_per_fusion: 4,
        ..Default::default()
    };
    let mut fusion = board(config);
    fusion.begin().unwrap();

    fusion.bus_mut().set_gyroscope(Vector3::new(0.0, 0.0, 10.0));

    // The first cycle seeds the orientation
    assert!(step(&mut fusion));
    for cycle in 0..3 {
        let quaternion = fusion.quaternion();
        let bias = fusion.gyroscope_bias();
        let rates = fusion.filter().rates();

        // Loops between fusion cycles leave the estimate untouched
        for idle in 1..4 {
            assert!(!step(&mut fusion), "cycle {cycle} loop {idle}");
            assert_eq!(fusion.quaternion(), quaternion);
            assert_eq!(fusion.gyroscope_bias(), bias);
            assert_eq!(fusion.filter().rates(), rates);
        }

        assert!(step(&mut fusion), "cycle {cycle}");
        assert_ne!(fusion.quaternion(), quaternion);
    }
    assert!((fusion.turn_rate_deg_per_s() - 10.0).abs() < 0.5);
}

#[test]
fn test_slow_sensor_cadence() {
    let config = FusionConfig {
        loops_per_thermometer_read: 8,
        ..Default::default()
    };
    let mut fusion = board(config);
    fusion.install_sensor(fxos8700::DEFAULT_ADDRESS, SensorKind::Thermometer);
    fusion.begin().unwrap();

    step(&mut fusion);
    let celsius = fusion.temperature_c().unwrap();
    assert!((celsius - 21.0 * 0.96).abs() < 1e-4);

    fusion.bus_mut().temperature = 30;
    run(&mut fusion, 7);
    // Not read again until the eighth loop
    assert!((fusion.temperature_c().unwrap() - celsius).abs() < 1e-4);
    step(&mut fusion);
    assert!((fusion.temperature_c().unwrap() - 30.0 * 0.96).abs() < 1e-4);
    assert!((fusion.temperature_k().unwrap() - (28.8 + CELSIUS_TO_KELVIN)).abs() < 1e-3);
}

#[test]
fn test_turn_rate_integrates_into_heading() {
    let mut fusion = board(FusionConfig::default());
    fusion.begin().unwrap();
    step(&mut fusion);

    fusion.bus_mut().set_gyroscope(Vector3::new(0.0, 0.0, 10.0));
    run(&mut fusion, 40);

    // 40 loops at 40 Hz
    assert!((fusion.heading_degrees() - 10.0).abs() < 1.0, "heading {}", fusion.heading_degrees());
    assert!((fusion.turn_rate_deg_per_s() - 10.0).abs() < 0.2);
    assert!((fusion.turn_rate_rad_per_s() - 10f32.to_radians()).abs() < 0.005);
    assert!(fusion.roll_rate_deg_per_s().abs() < 0.2);
    assert!(fusion.pitch_rate_deg_per_s().abs() < 0.2);
}

#[test]
fn test_read_failure_is_soft_fault() {
    let mut fusion = board(FusionConfig::default());
    fusion.begin().unwrap();
    run(&mut fusion, 5);
    assert_eq!(fusion.system_status(), SystemStatus::Normal);

    fusion.bus_mut().fail_next_read = true;
    fusion.read_sensors();
    assert_eq!(fusion.system_status(), SystemStatus::SoftFault);
    assert!(fusion.run_fusion());
    assert_eq!(fusion.system_status(), SystemStatus::SoftFault);

    step(&mut fusion);
    assert_eq!(fusion.system_status(), SystemStatus::Normal);
}

#[test]
fn test_displayed_status_is_rate_limited() {
    let mut fusion = board(FusionConfig::default());
    fusion.begin().unwrap();

    run(&mut fusion, 3);
    assert_eq!(fusion.system_status(), SystemStatus::Normal);
    assert_eq!(fusion.displayed_status(), SystemStatus::Initializing);

    step(&mut fusion);
    assert_eq!(fusion.displayed_status(), SystemStatus::Normal);
}

#[test]
fn test_missing_sensor_recovers_after_retry() {
    let mut fusion = board(FusionConfig::default());
    fusion.bus_mut().fxas_present = false;

    assert!(matches!(
        fusion.begin(),
        Err(ConfigError::InitFailed(SensorKind::Gyroscope, _))
    ));
    assert_eq!(fusion.system_status(), SystemStatus::SoftFault);

    step(&mut fusion);
    assert_eq!(fusion.system_status(), SystemStatus::SoftFault);

    fusion.bus_mut().fxas_present = true;
    step(&mut fusion);
    assert_eq!(fusion.system_status(), SystemStatus::Normal);
    assert_eq!(fusion.bus_mut().fxas_registers[fxas21002::CTRL_REG1 as usize], 0x06);
}

fn bare_board(config: FusionConfig) -> common::Board {
    SensorFusion::new(
        SimulatedBoard::new(),
        MemoryStorage::new(),
        RecordingPort::default(),
        config,
    )
}

#[test]
fn test_configuration_without_gyroscope_is_hard_fault() {
    let mut fusion = bare_board(FusionConfig::default());
    fusion.install_sensor(fxos8700::DEFAULT_ADDRESS, SensorKind::MagnetometerAccelerometer);

    assert_eq!(fusion.begin(), Err(ConfigError::MissingSensor(SensorKind::Gyroscope)));
    assert_eq!(fusion.system_status(), SystemStatus::HardFault);

    fusion.read_sensors();
    assert!(!fusion.run_fusion());
    assert_eq!(fusion.system_status(), SystemStatus::HardFault);

    fusion.clear_hard_fault();
    assert_eq!(fusion.system_status(), SystemStatus::Initializing);
}

#[test]
fn test_six_dof_with_separate_slots() {
    let config = FusionConfig {
        algorithm: FusionAlgorithm::SixDofGyroKalman,
        ..Default::default()
    };
    let mut fusion = bare_board(config);
    fusion.install_sensor(fxos8700::DEFAULT_ADDRESS, SensorKind::Accelerometer);
    fusion.install_sensor(fxas21002::DEFAULT_ADDRESS, SensorKind::Gyroscope);
    fusion.begin().unwrap();

    fusion.bus_mut().set_orientation(orientation(-15.0, 5.0, 0.0), Vector3::zeros());
    for _ in 0..300 {
        fusion.read_sensors();
        fusion.run_fusion();
    }

    assert_eq!(fusion.system_status(), SystemStatus::Normal);
    assert!((fusion.roll_degrees() + 15.0).abs() < 1.0);
    assert!((fusion.pitch_degrees() - 5.0).abs() < 1.0);
    assert!(!fusion.magnetic_calibration().is_valid());
}

#[test]
fn test_magnetic_calibration_and_heading() {
    let hard_iron = Vector3::new(12.0, -7.5, 4.0);
    let mut fusion = board(FusionConfig::default());
    fusion.begin().unwrap();

    // Tumble the board through many attitudes, gyroscope following along
    let delta_time = fusion.config().fusion_period();
    for k in 0..2400 {
        let t = k as f32;
        let attitude = orientation(
            40.0 * (t * 0.007).sin(),
            30.0 * (t * 0.013).sin(),
            (t * 3.0) % 360.0,
        );
        fusion.bus_mut().rotate_to(attitude, hard_iron, delta_time);
        step(&mut fusion);
    }

    let calibration = *fusion.magnetic_calibration();
    assert!(calibration.is_valid());
    assert!((calibration.offset - hard_iron).norm() < 1.0, "offset {}", calibration.offset);
    assert!((fusion.magnetic_field_strength() - 50.0).abs() < 1.0);
    assert!(fusion.magnetic_fit_error() < 3.5);
    assert!(fusion.magnetic_fit_error_trial() > 0.0);
    assert!(fusion.magnetic_calibration_order_trial().elements() >= 4);

    // Come to rest pointing east, then hold still
    let start = fusion.bus_mut().attitude;
    let east = orientation(0.0, 0.0, 90.0);
    for k in 1..=80 {
        let attitude = start.try_slerp(&east, k as f32 / 80.0, 1e-6).unwrap_or(east);
        fusion.bus_mut().rotate_to(attitude, hard_iron, delta_time);
        step(&mut fusion);
    }
    fusion.bus_mut().set_orientation(east, hard_iron);
    run(&mut fusion, 600);

    assert!(fusion.gyroscope_bias().norm() < 0.5, "bias {}", fusion.gyroscope_bias());

    let error = heading_difference(90.0, fusion.heading_degrees());
    assert!(error.abs() < 3.0, "heading {}", fusion.heading_degrees());
    assert!((fusion.magnetic_inclination_degrees() - 60.0).abs() < 3.0);
    assert!(fusion.magnetic_noise_covariance() > 0.0);
}

#[test]
fn test_commands_from_port() {
    let mut fusion = board(FusionConfig::default());
    fusion.begin().unwrap();
    run(&mut fusion, 5);

    fusion.port_mut().commands.push(*b"VG+ ");
    fusion.port_mut().commands.push(*b"ALT+");
    fusion.port_mut().commands.push(*b"????");
    step(&mut fusion);

    let flags = fusion.packet_flags();
    assert!(flags.angular_velocity);
    assert!(flags.altitude);
    assert!(flags.roll_pitch_compass);

    fusion.port_mut().commands.push(*b"RST ");
    step(&mut fusion);
    assert!(!fusion.is_data_valid());
    step(&mut fusion);
    assert!(fusion.is_data_valid());
}

#[test]
fn test_telemetry_stream() {
    let mut fusion = board(FusionConfig::default());
    fusion.begin().unwrap();

    // Nothing is sent before the first fusion cycle
    assert!(!fusion.produce_toolbox_output());

    run(&mut fusion, 3);
    let packets = &fusion.port_mut().packets;
    assert_eq!(packets.len(), 3);
    assert!(packets.iter().all(|packet| packet.len() == 52));
    assert_eq!(&packets[2][..3], &[2, 0, 3]);

    assert!(fusion.send_arbitrary_data(b"$HELLO"));
    assert!(!fusion.send_arbitrary_data(&[0; 257]));
    assert_eq!(fusion.port_mut().packets.last().unwrap(), b"$HELLO");
}

#[test]
fn test_calibrations_survive_restart() {
    let mut fusion = board(FusionConfig::default());
    fusion.begin().unwrap();
    fusion.set_accel_calibration(AccelCalibration {
        offset: Vector3::new(0.01, -0.02, 0.0),
        ..Default::default()
    });

    fusion.port_mut().commands.extend([*b"SVAC", *b"SVYC"]);
    step(&mut fusion);
    assert!(fusion.storage().commits() >= 2);

    let storage = fusion.storage().clone();
    let mut restarted = board_with_storage(FusionConfig::default(), storage);
    restarted.begin().unwrap();
    assert_eq!(restarted.accel_calibration(), fusion.accel_calibration());
    assert_eq!(restarted.gyroscope_bias(), fusion.gyroscope_bias());

    restarted.port_mut().commands.push(*b"ERST");
    step(&mut restarted);
    assert!(!restarted.load_accel_calibration());
    assert!(!restarted.load_gyro_calibration());
    assert!(!restarted.load_mag_calibration());
}

#[test]
fn test_low_power_and_wake() {
    let mut fusion = board(FusionConfig::default());
    fusion.begin().unwrap();
    run(&mut fusion, 5);

    fusion.enter_low_power();
    assert_eq!(fusion.system_status(), SystemStatus::LowPower);
    assert_eq!(fusion.bus_mut().fxos_registers[fxos8700::CTRL_REG1 as usize], 0x00);
    assert_eq!(fusion.bus_mut().fxas_registers[fxas21002::CTRL_REG1 as usize], 0x00);

    step(&mut fusion);
    assert_eq!(fusion.system_status(), SystemStatus::Normal);
    assert_eq!(fusion.bus_mut().fxos_registers[fxos8700::CTRL_REG1 as usize], 0x0D);
}
