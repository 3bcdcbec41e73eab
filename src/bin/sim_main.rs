//! Hardware-less run: the control loop against the in-process rig emulation.
//!
//! Random wind up to 4 m/s, the Pitch_PID controller engaged after a start
//! request. Runs for the given number of seconds (default 30) and prints the
//! variable table every `status_every` cycles.
//!
//! Usage: `sim_main [seconds] [seed]`

use crossbeam::channel::bounded;
use log::{error, info};
use std::{
    env,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use microwind_driver::{
    config::{LinkSettings, RigConfig},
    control::{controller::ControllerRegistry, pitch_pid::PitchPid, wind::RandomWind},
    driver::{
        control_loop::{ControlLoop, OperatorCommand, Snapshot},
        Driver,
    },
    rig::{calibration::CalibrationTable, simulated::SimulatedRig, transport::LinkHandle},
};

const DEFAULT_DURATION_SECS: u64 = 30;
const DEFAULT_SEED: u64 = 2024;
const MAX_RANDOM_WIND: f64 = 4.0;

fn main() {
    env_logger::init();
    println!("=== MICROWIND SIMULATION START ===");

    let args: Vec<String> = env::args().collect();
    let duration_secs = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_DURATION_SECS);
    let seed = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_SEED);

    let config = RigConfig::default();
    let calibration = CalibrationTable::default();
    let status_every = config.status_every.max(1);

    let rig = SimulatedRig::new(calibration.clone(), seed, config.cycle_period().as_secs_f64());
    let source = rig.clone();
    let mut driver = Driver::with_connector(
        config,
        calibration,
        Box::new(move |_: &LinkSettings| Ok(LinkHandle::new(Box::new(source.clone())))),
    );
    if let Err(e) = driver.attach() {
        error!("simulated rig refused to attach: {}", e);
        return;
    }

    let (tx_cmd, rx_cmd) = bounded::<OperatorCommand>(16);
    let (tx_snap, rx_snap) = bounded::<Snapshot>(256);
    let control = ControlLoop::new(driver, ControllerRegistry::with_builtin(), rx_cmd, tx_snap)
        .with_random_wind(RandomWind::new(seed));

    for command in [
        OperatorCommand::RandomWind { max: MAX_RANDOM_WIND },
        OperatorCommand::UseController(PitchPid::NAME.to_string()),
        OperatorCommand::Start,
    ] {
        let _ = tx_cmd.send(command);
    }

    let running = Arc::new(AtomicBool::new(true));
    let loop_handle = match control.spawn(running.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            error!("failed to start control loop: {}", e);
            return;
        }
    };

    let printer = thread::spawn(move || {
        while let Ok(snapshot) = rx_snap.recv() {
            if snapshot.cycle % status_every == 0 {
                println!("{}", snapshot);
            }
        }
    });

    info!("[Sim] running for {} s (seed {})", duration_secs, seed);
    thread::sleep(Duration::from_secs(duration_secs));
    running.store(false, Ordering::Release);

    match loop_handle.join() {
        Ok(control) => println!("\n{}", control.metrics().summary()),
        Err(_) => error!("[Sim] control loop panicked"),
    }
    let _ = printer.join();
    println!(
        "Rig served {} frames, applied {} commands",
        rig.frames_served(),
        rig.commands_applied()
    );
    println!("=== MICROWIND SIMULATION FINISHED ===");
}
