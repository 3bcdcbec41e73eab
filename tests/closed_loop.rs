//! Driver + control loop against the emulated rig, end to end.

use crossbeam::channel::{bounded, Receiver, Sender};

use microwind_driver::{
    config::{LinkSettings, RigConfig},
    control::{controller::ControllerRegistry, pitch_pid::PitchPid, wind::RandomWind},
    driver::{
        control_loop::{ControlLoop, OperatorCommand, Snapshot},
        Driver, LinkStatus,
    },
    rig::{calibration::CalibrationTable, simulated::SimulatedRig, transport::LinkHandle},
};

struct Bench {
    control: ControlLoop,
    rig: SimulatedRig,
    commands: Sender<OperatorCommand>,
    snapshots: Receiver<Snapshot>,
}

fn bench(seed: u64) -> Bench {
    let config = RigConfig::default();
    let calibration = CalibrationTable::default();
    let rig = SimulatedRig::new(calibration.clone(), seed, config.cycle_period().as_secs_f64());
    let source = rig.clone();
    let mut driver = Driver::with_connector(
        config,
        calibration,
        Box::new(move |_: &LinkSettings| Ok(LinkHandle::new(Box::new(source.clone())))),
    );
    driver.attach().unwrap();

    let (commands, rx_cmd) = bounded(16);
    let (tx_snap, snapshots) = bounded(10_000);
    let control = ControlLoop::new(driver, ControllerRegistry::with_builtin(), rx_cmd, tx_snap)
        .with_random_wind(RandomWind::new(seed));
    Bench { control, rig, commands, snapshots }
}

#[test]
fn controlled_run_keeps_state_finite_and_in_envelope() {
    let mut b = bench(17);
    b.rig.set_fan_rpm(1500.0);
    b.commands.send(OperatorCommand::SetWindSpeed(3.0)).unwrap();
    b.commands.send(OperatorCommand::UseController(PitchPid::NAME.into())).unwrap();
    b.commands.send(OperatorCommand::Start).unwrap();

    for _ in 0..600 {
        b.control.run_cycle();
    }

    let snaps: Vec<Snapshot> = b.snapshots.try_iter().collect();
    assert_eq!(snaps.len(), 600);
    for s in &snaps {
        let p = &s.physical;
        for v in [p.tip_speed, p.v1, p.v2, p.aero_power, p.power_coefficient, p.tip_speed_ratio, p.inflow_angle] {
            assert!(v.is_finite(), "cycle {}: {:?}", s.cycle, p);
        }
        assert!(p.v2 >= 0.5 * p.v1 - 1e-12);
        let a = &s.actuators;
        assert!((1000..=2000).contains(&a.servo_pulse()));
        assert!((-1..=12).contains(&a.torque_level()));
        assert!(s.link.is_connected());
    }
    assert_eq!(b.rig.commands_applied(), 600);
    assert!(snaps.last().unwrap().pid.is_some());
}

#[test]
fn truncated_frame_disconnects_then_reconnect_resumes() {
    let mut b = bench(3);
    b.control.run_cycle();
    b.control.run_cycle();

    b.rig.truncate_next_frame(7);
    b.control.run_cycle();
    assert_eq!(b.control.driver().status(), LinkStatus::Disconnected);
    let frozen = *b.control.driver().physical();
    let applied = b.rig.commands_applied();

    b.control.run_cycle();
    assert_eq!(*b.control.driver().physical(), frozen);
    assert_eq!(b.rig.commands_applied(), applied);

    b.rig.heal();
    b.commands.send(OperatorCommand::Reconnect).unwrap();
    b.control.run_cycle();
    assert!(b.control.driver().is_connected());
    assert_eq!(b.rig.commands_applied(), applied + 1);

    let m = b.control.metrics();
    assert_eq!(m.link_drops, 1);
    assert_eq!(m.reconnects, 1);
}

#[test]
fn stop_sends_neutral_before_release() {
    let mut b = bench(5);
    b.commands.send(OperatorCommand::SetWindSpeed(4.0)).unwrap();
    b.commands.send(OperatorCommand::SetTorqueLevel(6)).unwrap();
    b.control.run_cycle();
    assert!(b.rig.last_command().unwrap().fan_pwm > 0);

    b.commands.send(OperatorCommand::Stop).unwrap();
    b.control.run_cycle();
    let running = std::sync::atomic::AtomicBool::new(true);
    b.control.run(&running);

    let neutral = b.rig.last_command().unwrap();
    assert_eq!(neutral.fan_pwm, 0);
    assert_eq!(neutral.torque_level, 0);
    assert_eq!(neutral.servo_pulse, b.control.driver().actuators().servo_pulse());
    assert!(!b.control.driver().is_connected());
}
