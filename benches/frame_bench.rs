use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use microwind_driver::{
    config::RigConfig,
    driver::Driver,
    rig::{
        calibration::CalibrationTable,
        frame::{ActuatorFrame, RawFrame},
        simulated::SimulatedRig,
    },
};

fn codec_bench(c: &mut Criterion) {
    let bytes = RawFrame { fan_rotation: 1500, turbine_rotation: 600, thrust: -42_000, ..RawFrame::default() }.encode();
    c.bench_function("raw_frame_decode", |b| b.iter(|| RawFrame::decode(black_box(&bytes))));

    let cmd = ActuatorFrame { fan_pwm: 140, servo_pulse: 1420, torque_level: 8, led: true };
    c.bench_function("actuator_frame_encode", |b| b.iter(|| black_box(&cmd).encode()));
}

/// Full receive/transmit exchange over the emulated link.
fn exchange_bench(c: &mut Criterion) {
    let calibration = CalibrationTable::default();
    let rig = SimulatedRig::new(calibration.clone(), 1, 0.05).without_noise();
    let mut driver = Driver::new(RigConfig::default(), calibration);
    driver.attach_link(Box::new(rig));

    c.bench_function("driver_cycle_simulated", |b| {
        b.iter(|| {
            let _ = driver.receive();
            let _ = driver.transmit();
        })
    });
}

criterion_group!(benches, codec_bench, exchange_bench);
criterion_main!(benches);
