//! control_loop.rs
//! Fixed-cadence cycle around the driver.
//!
//! One thread owns the loop and therefore the link. Per cycle:
//! 1. apply queued operator commands
//! 2. receive a frame (model step)
//! 3. wind setpoint from the active wind mode
//! 4. pitch/torque from the controller or the manual targets, unless the
//!    rotor is over speed, in which case idle pitch + full braking win
//! 5. start request (freewheel while the rotor stands still)
//! 6. transmit, then publish a snapshot
//!
//! Snapshots go out through a bounded channel with `try_send` (dropped when
//! the consumer lags) and into a shared "latest" slot for pollers.

use crossbeam::channel::{Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::{
    fmt, io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::control::{
    controller::{ControlInput, Controller, ControllerRegistry, PidTerms},
    wind::{RandomWind, WindProfile},
};
use crate::driver::{Driver, LinkStatus};
use crate::model::telemetry::PhysicalState;
use crate::rig::{actuator::ActuatorState, frame::RawFrame};
use crate::utils::metrics::{CycleMetrics, MetricsSummary};

/// Requests from the operator side (terminal, GUI...), applied at the start of a cycle.
#[derive(Debug)]
pub enum OperatorCommand {
    /// Fixed wind speed, m/s.
    SetWindSpeed(f64),
    /// Random ramps up to `max` m/s.
    RandomWind { max: f64 },
    PlayProfile(WindProfile),
    /// Hand pitch and torque to a registered controller.
    UseController(String),
    Manual,
    /// Manual pitch target, deg.
    SetPitch(f64),
    /// Manual torque target, mNm.
    SetTorque(f64),
    /// Manual torque level.
    SetTorqueLevel(i32),
    SetLed(bool),
    /// Freewheel until the rotor turns.
    Start,
    Reconnect,
    Stop,
}

#[derive(Debug)]
pub enum WindMode {
    Manual(f64),
    Random { max: f64 },
    Profile { profile: WindProfile, started: Instant },
}

impl WindMode {
    pub fn label(&self) -> String {
        match self {
            WindMode::Manual(v) => format!("manual {:.2} m/s", v),
            WindMode::Random { max } => format!("random <= {:.2} m/s", max),
            WindMode::Profile { profile, .. } => format!("profile ({} left)", profile.remaining()),
        }
    }
}

pub enum TurbineMode {
    Controller(Box<dyn Controller>),
    Manual,
}

impl TurbineMode {
    pub fn label(&self) -> String {
        match self {
            TurbineMode::Controller(c) => format!("controller {}", c.name()),
            TurbineMode::Manual => "manual".to_string(),
        }
    }
}

impl fmt::Debug for TurbineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ManualTorque {
    /// mNm, resolved to a level at the current speed.
    Target(f64),
    Level(i32),
}

/// Copy of everything a consumer may display for one cycle.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub cycle: u64,
    pub elapsed: Duration,
    pub link: LinkStatus,
    pub raw: RawFrame,
    pub physical: PhysicalState,
    pub actuators: ActuatorState,
    pub turbine_mode: String,
    pub wind_mode: String,
    pub pid: Option<PidTerms>,
    /// Speed limit tripped this cycle.
    pub overspeed: bool,
    pub start_requested: bool,
    pub metrics: MetricsSummary,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.physical;
        let a = &self.actuators;
        let rows: [(&str, f64, &str, f64); 12] = [
            ("Set wind speed (m/s)", a.wind_setpoint(), "Fan PWM (0-255)", f64::from(a.fan_pwm())),
            ("Fan speed (rpm)", p.fan_rotation_rpm, "Wind speed v1 (m/s)", p.v1),
            ("Wind speed v2 (m/s)", p.v2, "Anemometer wind (m/s)", p.anemometer_wind),
            ("Tip speed (m/s)", p.tip_speed, "Tip speed ratio", p.tip_speed_ratio),
            ("Inflow angle (deg)", p.inflow_angle.to_degrees(), "Power coefficient", p.power_coefficient),
            ("Power wind (mW)", p.wind_power, "Power turbine (mW)", p.turbine_power),
            ("Current (mA)", p.current_ma, "Voltage (mV)", p.voltage_mv),
            ("Thrust force (mN)", p.thrust_force, "Torque (mNm)", p.torque),
            ("Turbine speed (rpm)", p.rotation_rpm, "Torque level", f64::from(a.torque_level())),
            ("Pitch set (deg)", a.pitch(), "Servo pulse (us)", f64::from(a.servo_pulse())),
            ("Thrust readout", f64::from(self.raw.thrust), "Anemometer readout", f64::from(self.raw.anemometer)),
            ("dt cycle (ms)", p.dt * 1e3, "Pitch readback (deg)", p.pitch_readback),
        ];

        writeln!(f, "\nCycle {} | {} | turbine: {} | wind: {}", self.cycle, self.link, self.turbine_mode, self.wind_mode)?;
        for (l_name, l_val, r_name, r_val) in rows {
            writeln!(f, " {:<26}{:>10.2}   |   {:<26}{:>10.2}", l_name, l_val, r_name, r_val)?;
        }
        if let Some(pid) = self.pid {
            writeln!(f, " PID terms: P {:.2} | I {:.2} | D {:.2}", pid.p, pid.i, pid.d)?;
        }
        if self.overspeed {
            writeln!(f, " !! speed limit: idle pitch, full braking")?;
        }
        write!(f, " {}", self.metrics)
    }
}

pub type SharedSnapshot = Arc<Mutex<Option<Snapshot>>>;

pub struct ControlLoop {
    driver: Driver,
    registry: ControllerRegistry,
    turbine: TurbineMode,
    wind: WindMode,
    random_wind: RandomWind,
    manual_pitch: f64,
    manual_torque: ManualTorque,
    start_requested: bool,
    overspeed: bool,
    stop_requested: bool,
    commands: Receiver<OperatorCommand>,
    snapshots: Sender<Snapshot>,
    latest: SharedSnapshot,
    metrics: CycleMetrics,
    run_start: Instant,
    last_cycle: Option<Instant>,
    cycle: u64,
}

impl ControlLoop {
    /// Starts in manual turbine mode at idle pitch with the lowest wind setpoint.
    pub fn new(
        driver: Driver,
        registry: ControllerRegistry,
        commands: Receiver<OperatorCommand>,
        snapshots: Sender<Snapshot>,
    ) -> Self {
        let pitch_idle = driver.config().operating.pitch_idle;
        let wind_min = driver.config().limits.wind_min;
        Self {
            driver,
            registry,
            turbine: TurbineMode::Manual,
            wind: WindMode::Manual(wind_min),
            random_wind: RandomWind::from_entropy(),
            manual_pitch: pitch_idle,
            manual_torque: ManualTorque::Level(0),
            start_requested: false,
            overspeed: false,
            stop_requested: false,
            commands,
            snapshots,
            latest: Arc::new(Mutex::new(None)),
            metrics: CycleMetrics::default(),
            run_start: Instant::now(),
            last_cycle: None,
            cycle: 0,
        }
    }

    pub fn with_random_wind(mut self, random_wind: RandomWind) -> Self {
        self.random_wind = random_wind;
        self
    }

    pub fn latest(&self) -> SharedSnapshot {
        self.latest.clone()
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    pub fn turbine_mode(&self) -> &TurbineMode {
        &self.turbine
    }

    pub fn wind_mode(&self) -> &WindMode {
        &self.wind
    }

    pub fn metrics(&self) -> &CycleMetrics {
        &self.metrics
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Cycles at the configured period until `running` clears or a Stop
    /// command arrives, then sends the neutral command and releases the link.
    pub fn run(&mut self, running: &AtomicBool) {
        let period = self.driver.config().cycle_period();
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        info!("[Loop] running every {:?}", period);

        let mut next_release = Instant::now();
        while running.load(Ordering::Acquire) && !self.stop_requested {
            let now = Instant::now();
            if now < next_release {
                sleeper.sleep(next_release - now);
            } else if self.cycle > 0 && now - next_release > period / 10 {
                self.metrics.record_overrun();
                debug!("[Loop] cycle {} released {:?} late", self.cycle, now - next_release);
            }

            let cycle_start = Instant::now();
            self.run_cycle();
            // Re-armed after the cycle completes.
            next_release = cycle_start + period;
        }

        info!("[Loop] stopping after {} cycles", self.cycle);
        self.driver.shutdown();
    }

    /// Run the loop on its own max-priority thread, optionally pinned to
    /// `loop_core`. The thread hands the loop back when it ends.
    pub fn spawn(mut self, running: Arc<AtomicBool>) -> io::Result<JoinHandle<ControlLoop>> {
        let core = self.driver.config().loop_core;
        thread::Builder::new()
            .name("control-loop".to_string())
            .spawn_with_priority(ThreadPriority::Max, move |priority| {
                if let Err(e) = priority {
                    warn!("[Loop] running without raised priority: {:?}", e);
                }
                if let Some(core) = core {
                    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
                    match core_ids.get(core) {
                        Some(id) if core_affinity::set_for_current(*id) => info!("[Loop] pinned to core {}", core),
                        Some(_) => error!("[Loop] failed to pin to core {}", core),
                        None => error!("[Loop] core {} not available", core),
                    }
                }
                self.run(&running);
                self
            })
    }

    /// One full cycle without waiting.
    pub fn run_cycle(&mut self) {
        let cycle_start = Instant::now();
        let dt_cycle = self.last_cycle.map(|t| cycle_start - t).unwrap_or_default();
        self.last_cycle = Some(cycle_start);
        self.cycle += 1;

        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }

        let was_connected = self.driver.is_connected();
        let status = match self.driver.receive() {
            Ok(status) => status,
            Err(e) => {
                error!("[Loop] cycle {}: {}", self.cycle, e);
                self.driver.status()
            }
        };

        // Outputs stay frozen while there is no rig to act on.
        if status.is_connected() {
            self.update_wind(Instant::now());
            self.update_turbine(dt_cycle);

            if let Err(e) = self.driver.transmit() {
                error!("[Loop] cycle {}: {}", self.cycle, e);
            }
        }
        if was_connected && !self.driver.is_connected() {
            self.metrics.record_link_drop();
        }

        self.metrics.record_cycle(dt_cycle, cycle_start.elapsed());
        self.publish(cycle_start);
    }

    fn apply(&mut self, command: OperatorCommand) {
        debug!("[Loop] operator: {:?}", command);
        match command {
            OperatorCommand::SetWindSpeed(v) => self.wind = WindMode::Manual(v),
            OperatorCommand::RandomWind { max } => self.wind = WindMode::Random { max },
            OperatorCommand::PlayProfile(profile) => {
                self.wind = WindMode::Profile { profile, started: Instant::now() };
            }
            OperatorCommand::UseController(name) => match self.registry.create(&name) {
                Some(controller) => {
                    info!("[Loop] controller {} engaged", controller.name());
                    self.turbine = TurbineMode::Controller(controller);
                }
                None => warn!("[Loop] unknown controller '{}'", name),
            },
            OperatorCommand::Manual => self.turbine = TurbineMode::Manual,
            OperatorCommand::SetPitch(pitch) => self.manual_pitch = pitch,
            OperatorCommand::SetTorque(torque) => self.manual_torque = ManualTorque::Target(torque),
            OperatorCommand::SetTorqueLevel(level) => self.manual_torque = ManualTorque::Level(level),
            OperatorCommand::SetLed(on) => self.driver.set_led(on),
            OperatorCommand::Start => self.start_requested = true,
            OperatorCommand::Reconnect => {
                if let Ok(status) = self.driver.attach() {
                    if status.is_connected() {
                        self.metrics.record_reconnect();
                    }
                }
            }
            OperatorCommand::Stop => self.stop_requested = true,
        }
    }

    fn update_wind(&mut self, now: Instant) {
        let setpoint = match &mut self.wind {
            WindMode::Manual(v) => *v,
            WindMode::Random { max } => self.random_wind.next(self.driver.physical().v1, *max),
            WindMode::Profile { profile, started } => profile.speed_at(now.duration_since(*started)),
        };
        let clamped = self.driver.set_wind_speed(setpoint);
        self.note_saturation("wind", clamped.saturated);
    }

    fn update_turbine(&mut self, dt_cycle: Duration) {
        let physical = *self.driver.physical();
        let rpm = physical.rotation_rpm;
        let rot_max = self.driver.config().operating.rot_max;
        let pitch_idle = self.driver.config().operating.pitch_idle;
        let level_max = self.driver.actuators().limits().level_max;

        let (pitch, torque) = if rpm > rot_max {
            if !self.overspeed {
                warn!("[Loop] speed limit: {:.0} rpm > {:.0} rpm, switching to manual", rpm, rot_max);
                self.metrics.record_overspeed();
            }
            self.overspeed = true;
            self.turbine = TurbineMode::Manual;
            self.manual_pitch = pitch_idle;
            self.manual_torque = ManualTorque::Level(level_max);
            (pitch_idle, ManualTorque::Level(level_max))
        } else {
            self.overspeed = false;
            match &mut self.turbine {
                TurbineMode::Controller(controller) => {
                    let command = controller.step(&ControlInput {
                        wind_estimate: physical.v1,
                        rotation_speed: rpm,
                        power: physical.turbine_power,
                        torque: physical.torque,
                        thrust: physical.thrust_force,
                        tip_speed_ratio: physical.tip_speed_ratio,
                        dt: dt_cycle.as_secs_f64(),
                    });
                    (command.pitch, ManualTorque::Level(command.torque_level))
                }
                TurbineMode::Manual => (self.manual_pitch, self.manual_torque),
            }
        };

        let clamped = self.driver.set_pitch(pitch);
        self.note_saturation("pitch", clamped.saturated);
        match torque {
            ManualTorque::Level(level) => {
                let clamped = self.driver.set_torque_level(f64::from(level));
                self.note_saturation("torque level", clamped.saturated);
            }
            // No inverse lookup at standstill; the level is kept.
            ManualTorque::Target(target) => {
                if let Some(clamped) = self.driver.set_torque(target) {
                    self.note_saturation("torque", clamped.saturated);
                }
            }
        }

        if rpm == 0.0 {
            if self.start_requested {
                let freewheel = self.driver.actuators().limits().freewheel_level;
                self.driver.set_torque_level(f64::from(freewheel));
            }
        } else if self.start_requested {
            debug!("[Loop] rotor turning, start request cleared");
            self.start_requested = false;
        }
    }

    fn note_saturation(&mut self, what: &str, saturated: bool) {
        if saturated {
            self.metrics.record_saturation();
            debug!("[Loop] {} request clamped", what);
        }
    }

    fn publish(&mut self, cycle_start: Instant) {
        let pid = match &self.turbine {
            TurbineMode::Controller(c) => c.pid_terms(),
            TurbineMode::Manual => None,
        };
        let snapshot = Snapshot {
            cycle: self.cycle,
            elapsed: cycle_start.duration_since(self.run_start),
            link: self.driver.status(),
            raw: *self.driver.raw_frame(),
            physical: *self.driver.physical(),
            actuators: *self.driver.actuators(),
            turbine_mode: self.turbine.label(),
            wind_mode: self.wind.label(),
            pid,
            overspeed: self.overspeed,
            start_requested: self.start_requested,
            metrics: self.metrics.summary(),
        };

        match self.snapshots.try_send(snapshot.clone()) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => debug!("[Loop] snapshot {} dropped, consumer behind", self.cycle),
        }
        *self.latest.lock() = Some(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LinkSettings, RigConfig};
    use crate::errors::ConnectError;
    use crate::rig::{calibration::CalibrationTable, simulated::SimulatedRig};
    use crossbeam::channel::bounded;

    struct Harness {
        control: ControlLoop,
        rig: SimulatedRig,
        commands: Sender<OperatorCommand>,
        snapshots: Receiver<Snapshot>,
    }

    fn harness() -> Harness {
        let cal = CalibrationTable::default();
        let rig = SimulatedRig::new(cal.clone(), 5, 0.05).without_noise();
        let mut driver = Driver::with_connector(
            RigConfig::default(),
            cal,
            Box::new(|_: &LinkSettings| Err(ConnectError::NoMatchingDevice { filter: "test".into() })),
        );
        driver.attach_link(Box::new(rig.clone()));
        let (cmd_tx, cmd_rx) = bounded(16);
        let (snap_tx, snap_rx) = bounded(4);
        let control = ControlLoop::new(driver, ControllerRegistry::with_builtin(), cmd_rx, snap_tx)
            .with_random_wind(RandomWind::new(9));
        Harness { control, rig, commands: cmd_tx, snapshots: snap_rx }
    }

    #[test]
    fn manual_commands_reach_the_rig() {
        let mut h = harness();
        h.commands.send(OperatorCommand::SetPitch(12.0)).unwrap();
        h.commands.send(OperatorCommand::SetTorqueLevel(3)).unwrap();
        h.commands.send(OperatorCommand::SetWindSpeed(2.0)).unwrap();
        h.control.run_cycle();

        let a = h.control.driver().actuators();
        assert_eq!(a.pitch(), 12.0);
        assert_eq!(a.torque_level(), 3);
        assert_eq!(a.wind_setpoint(), 2.0);
        assert_eq!(h.rig.last_command(), Some(a.to_frame()));
    }

    #[test]
    fn overspeed_forces_idle_pitch_and_full_braking() {
        let mut h = harness();
        h.commands.send(OperatorCommand::UseController("Pitch_PID".into())).unwrap();
        h.rig.hold_turbine_rpm(Some(1300.0));
        h.control.run_cycle();

        let a = *h.control.driver().actuators();
        assert_eq!(a.pitch(), 45.0);
        assert_eq!(a.torque_level(), a.limits().level_max);
        assert!(matches!(h.control.turbine_mode(), TurbineMode::Manual));
        let snap = h.snapshots.try_recv().unwrap();
        assert!(snap.overspeed);
        assert_eq!(snap.metrics.overspeed_trips, 1);

        // Once back under the limit the manual hold stays in place.
        h.rig.hold_turbine_rpm(Some(800.0));
        h.control.run_cycle();
        assert_eq!(h.control.driver().actuators().pitch(), 45.0);
        assert!(!h.snapshots.try_recv().unwrap().overspeed);
    }

    #[test]
    fn start_request_freewheels_until_rotation() {
        let mut h = harness();
        h.commands.send(OperatorCommand::Start).unwrap();
        h.control.run_cycle();
        assert_eq!(h.control.driver().actuators().torque_level(), -1);

        h.rig.hold_turbine_rpm(Some(100.0));
        h.control.run_cycle();
        h.control.run_cycle();
        assert_eq!(h.control.driver().actuators().torque_level(), 0);
        assert!(!h.control.latest().lock().as_ref().unwrap().start_requested);
    }

    #[test]
    fn controller_mode_drives_outputs() {
        let mut h = harness();
        h.commands.send(OperatorCommand::UseController("Template".into())).unwrap();
        h.commands.send(OperatorCommand::UseController("missing".into())).unwrap();
        h.rig.hold_turbine_rpm(Some(400.0));
        h.control.run_cycle();
        assert_eq!(h.control.turbine_mode().label(), "controller Template");
        assert_eq!(h.control.driver().actuators().pitch(), 0.0);
        assert_eq!(h.control.driver().actuators().torque_level(), 0);
    }

    #[test]
    fn profile_wind_mode_plays_back() {
        let mut h = harness();
        let profile = WindProfile::from_points([(0.0, 3.0), (3600.0, 1.0)]);
        h.commands.send(OperatorCommand::PlayProfile(profile)).unwrap();
        h.control.run_cycle();
        assert_eq!(h.control.driver().actuators().wind_setpoint(), 3.0);
        assert!(h.control.wind_mode().label().starts_with("profile"));
    }

    #[test]
    fn random_wind_stays_in_envelope() {
        let mut h = harness();
        h.commands.send(OperatorCommand::RandomWind { max: 3.0 }).unwrap();
        for _ in 0..50 {
            h.control.run_cycle();
            let v = h.control.driver().actuators().wind_setpoint();
            assert!((0.4..=3.0).contains(&v));
        }
    }

    #[test]
    fn link_loss_freezes_and_counts() {
        let mut h = harness();
        h.control.run_cycle();
        let sent = h.rig.commands_applied();
        h.rig.fail_after(0);
        h.commands.send(OperatorCommand::SetPitch(30.0)).unwrap();
        h.control.run_cycle();
        h.control.run_cycle();

        assert_eq!(h.rig.commands_applied(), sent);
        assert_eq!(h.control.metrics().link_drops, 1);
        assert_eq!(h.control.driver().actuators().pitch(), 45.0);
        let latest = h.control.latest();
        assert_eq!(latest.lock().as_ref().unwrap().link, LinkStatus::Disconnected);
    }

    #[test]
    fn stop_command_ends_run() {
        let mut h = harness();
        h.commands.send(OperatorCommand::Stop).unwrap();
        h.control.run_cycle();
        assert!(h.control.stop_requested());
        let running = AtomicBool::new(true);
        h.control.run(&running);
        assert!(!h.control.driver().is_connected());
        assert_eq!(h.rig.last_command().unwrap().fan_pwm, 0);
    }

    #[test]
    fn snapshot_table_lists_variables() {
        let mut h = harness();
        h.control.run_cycle();
        let text = h.snapshots.try_recv().unwrap().to_string();
        assert!(text.contains("Turbine speed (rpm)"));
        assert!(text.contains("connected (simulated)"));
    }
}
