use criterion::{criterion_group, criterion_main, Criterion};
use std::{hint::black_box, time::Duration};

use microwind_driver::{
    config::{ActuatorLimitsConfig, RotorParams},
    model::telemetry::{PhysicalState, TelemetryModel},
    rig::{
        actuator::{ActuatorLimits, ActuatorState},
        calibration::CalibrationTable,
        frame::RawFrame,
    },
};

fn telemetry_update_bench(c: &mut Criterion) {
    let calibration = CalibrationTable::default();
    let limits = ActuatorLimits::new(&ActuatorLimitsConfig::default(), &calibration);
    let mut actuators = ActuatorState::new(limits, &calibration, 10.0);
    actuators.set_torque_level(6.0);
    let model = TelemetryModel::new(calibration, RotorParams::default());

    let raw = RawFrame {
        fan_rotation: 1800,
        turbine_rotation: 620,
        current: 140,
        voltage: 3100,
        thrust: 9_000,
        anemometer: 230,
        potentiometer: 400,
    };
    let mut state = PhysicalState::default();

    c.bench_function("telemetry_update", |b| {
        b.iter(|| {
            state = model.update(black_box(&state), black_box(&raw), &actuators, Duration::from_millis(50));
        })
    });

    c.bench_function("anemometer_spline_eval", |b| {
        b.iter(|| model.calibration().anemometer_wind_speed(black_box(231)))
    });
}

criterion_group!(benches, telemetry_update_bench);
criterion_main!(benches);
