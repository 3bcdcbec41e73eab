//! # MicroWind rig driver
//! Terminal front end for the host-side driver of the miniature wind-turbine rig.
//!
//! Looks for the board (USB description filter, "Arduino" by default),
//! starts the control loop on a max-priority thread and offers a small menu
//! to steer wind and turbine. Without a board the loop runs disconnected and
//! a reconnect can be requested from the menu.
//!
//! Usage: `microwind [config.json] [calibration.json]`
//!
//! The variable table is printed every `status_every` cycles. Set
//! `RUST_LOG=info` (or `debug`) for driver logs.

use crossbeam::channel::bounded;
use log::{error, info, warn};
use std::{
    env,
    io::{stdin, stdout, BufRead, Write},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use microwind_driver::{
    config::RigConfig,
    control::{controller::ControllerRegistry, wind::WindProfile},
    driver::{
        control_loop::{ControlLoop, OperatorCommand, Snapshot},
        Driver,
    },
    rig::calibration::CalibrationTable,
};

const COMMAND_QUEUE: usize = 64;
const SNAPSHOT_QUEUE: usize = 256;

fn main() {
    env_logger::init();
    info!("=== MICROWIND DRIVER START ===");

    let args: Vec<String> = env::args().collect();
    let config = match args.get(1) {
        Some(path) => match RigConfig::load(Path::new(path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("config {}: {}", path, e);
                return;
            }
        },
        None => RigConfig::default(),
    };
    let calibration = match args.get(2) {
        Some(path) => match CalibrationTable::load(Path::new(path)) {
            Ok(cal) => cal,
            Err(e) => {
                error!("calibration {}: {}", path, e);
                return;
            }
        },
        None => CalibrationTable::default(),
    };

    let status_every = config.status_every.max(1);
    let mut driver = Driver::new(config, calibration);
    match driver.attach() {
        Ok(status) => println!("Rig {}", status),
        Err(e) => println!("No rig found ({}). Running disconnected; use 'r' to retry.", e),
    }

    let registry = ControllerRegistry::with_builtin();
    let controller_names: Vec<&'static str> = registry.names().collect();

    let (tx_cmd, rx_cmd) = bounded::<OperatorCommand>(COMMAND_QUEUE);
    let (tx_snap, rx_snap) = bounded::<Snapshot>(SNAPSHOT_QUEUE);

    let running = Arc::new(AtomicBool::new(true));
    let control = ControlLoop::new(driver, registry, rx_cmd, tx_snap);
    let loop_handle = match control.spawn(running.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            error!("failed to start control loop: {}", e);
            return;
        }
    };

    // Printer: the variable table every `status_every` cycles.
    let printer = thread::spawn(move || {
        while let Ok(snapshot) = rx_snap.recv() {
            if snapshot.cycle % status_every == 0 {
                println!("{}", snapshot);
            }
        }
    });

    let mut led = true;
    // EOF on stdin counts as 'q' so the rig still gets its neutral command.
    while let Some(choice) = prompt_menu() {
        let command = match choice.as_str() {
            "1" => prompt_f64("Wind speed (m/s)").map(OperatorCommand::SetWindSpeed),
            "2" => prompt_f64("Maximum random wind speed (m/s)").map(|max| OperatorCommand::RandomWind { max }),
            "3" => prompt_line("Wind profile file").and_then(|path| match WindProfile::load(Path::new(&path)) {
                Ok(profile) => Some(OperatorCommand::PlayProfile(profile)),
                Err(e) => {
                    println!("Cannot use {}: {}", path, e);
                    None
                }
            }),
            "4" => {
                println!("Controllers: {}", controller_names.join(", "));
                prompt_line("Controller name").map(OperatorCommand::UseController)
            }
            "5" => Some(OperatorCommand::Manual),
            "6" => prompt_f64("Pitch (deg)").map(OperatorCommand::SetPitch),
            "7" => prompt_f64("Torque (mNm)").map(OperatorCommand::SetTorque),
            "8" => prompt_f64("Torque level").map(|level| OperatorCommand::SetTorqueLevel(level.round() as i32)),
            "s" => Some(OperatorCommand::Start),
            "l" => {
                led = !led;
                Some(OperatorCommand::SetLed(led))
            }
            "r" => Some(OperatorCommand::Reconnect),
            "q" => break,
            "" => None,
            other => {
                println!("Unrecognized option '{}', please try again.", other);
                None
            }
        };
        if let Some(command) = command {
            if tx_cmd.send(command).is_err() {
                warn!("control loop is gone");
                break;
            }
        }
    }

    let _ = tx_cmd.send(OperatorCommand::Stop);
    running.store(false, Ordering::Release);
    match loop_handle.join() {
        Ok(control) => info!("[Main] {}", control.metrics().summary()),
        Err(_) => error!("[Main] control loop panicked"),
    }
    // The loop owned the snapshot sender; the printer ends with it.
    let _ = printer.join();
    println!("Exiting. Goodbye!");
    info!("=== MICROWIND DRIVER FINISHED ===");
}

/// `None` once stdin is closed or unreadable.
fn prompt_menu() -> Option<String> {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│  MICROWIND                                  │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Wind: manual speed                      │");
    println!("│  2) Wind: random                            │");
    println!("│  3) Wind: profile file                      │");
    println!("│  4) Turbine: controller                     │");
    println!("│  5) Turbine: manual                         │");
    println!("│  6) Manual pitch                            │");
    println!("│  7) Manual torque (mNm)                     │");
    println!("│  8) Manual torque level                     │");
    println!("│  s) Start turbine    l) Toggle LED          │");
    println!("│  r) Reconnect        q) Exit                │");
    println!("└─────────────────────────────────────────────┘");
    print!("Select: ");
    let _ = stdout().flush();
    read_input()
}

fn read_input() -> Option<String> {
    read_trimmed_line(&mut stdin().lock())
}

fn read_trimmed_line(reader: &mut impl BufRead) -> Option<String> {
    let mut input = String::new();
    match reader.read_line(&mut input) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(input.trim().to_string()),
    }
}

fn prompt_line(label: &str) -> Option<String> {
    print!("{}: ", label);
    let _ = stdout().flush();
    read_input().filter(|input| !input.is_empty())
}

fn prompt_f64(label: &str) -> Option<f64> {
    let line = prompt_line(label)?;
    match line.parse::<f64>() {
        Ok(v) => Some(v),
        Err(_) => {
            println!("'{}' is not a number", line);
            None
        }
    }
}
