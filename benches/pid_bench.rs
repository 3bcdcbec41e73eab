use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use microwind_driver::control::{
    controller::{ControlInput, Controller},
    pitch_pid::PitchPid,
};

fn pid_step_bench(c: &mut Criterion) {
    let mut controller = PitchPid::default();
    // Settle the wind filter into the regulation band.
    let warmup = ControlInput { wind_estimate: 2.5, rotation_speed: 550.0, dt: 0.05, ..Default::default() };
    for _ in 0..100 {
        controller.step(&warmup);
    }

    let mut rpm = 550.0;
    c.bench_function("pitch_pid_step", |b| {
        b.iter(|| {
            rpm = if rpm > 600.0 { 560.0 } else { 640.0 };
            let input = ControlInput { rotation_speed: rpm, ..warmup };
            controller.step(black_box(&input))
        })
    });
}

criterion_group!(benches, pid_step_bench);
criterion_main!(benches);
