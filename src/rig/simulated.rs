//! simulated.rs
//! In-process stand-in for the rig firmware.
//!
//! Speaks the same byte protocol as the board (request byte → 16-byte frame,
//! 5-byte actuator reply) on top of a crude first-order plant: fan lag,
//! pitch/brake dependent rotor speed, quadratic thrust. Sensor noise comes
//! from a seeded RNG so runs are reproducible. Faults can be injected to
//! exercise link loss.

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::Arc,
};

use crate::rig::calibration::CalibrationTable;
use crate::rig::frame::{ActuatorFrame, RawFrame, ACTUATOR_FRAME_LEN, REQUEST_BYTE};
use crate::rig::transport::RigLink;

const FAN_TAU_S: f64 = 1.0;
const ROTOR_TAU_S: f64 = 0.5;
/// Rotor rpm per m/s of wind at best pitch, unloaded.
const RPM_PER_WIND: f64 = 260.0;
/// rpm shed per braking level.
const RPM_PER_LEVEL: f64 = 35.0;
/// Below this the rotor stalls to a standstill.
const STALL_RPM: f64 = 30.0;
/// mN per (m/s)² at zero pitch.
const THRUST_PER_WIND_SQ: f64 = 12.0;
/// mA per mNm, inverse generator torque constant.
const MA_PER_MNM: f64 = 1.0 / 0.008714;

#[derive(Debug)]
struct Plant {
    fan_rpm: f64,
    turbine_rpm: f64,
    held_rpm: Option<f64>,
    command: ActuatorFrame,
}

#[derive(Debug)]
struct SimState {
    calibration: CalibrationTable,
    rng: StdRng,
    noise: bool,
    step_s: f64,
    plant: Plant,
    out: VecDeque<u8>,
    pending_command: Option<Vec<u8>>,
    last_command: Option<ActuatorFrame>,
    frames_served: u64,
    commands_applied: u64,
    fail_after: Option<u64>,
    io_ops: u64,
    truncate_next: Option<usize>,
    end_of_stream: bool,
}

/// Cloneable handle: one clone goes into the driver as its link, others stay
/// with the test or binary for inspection and fault injection.
#[derive(Debug, Clone)]
pub struct SimulatedRig {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedRig {
    /// `step_s` is the plant time advanced per request.
    pub fn new(calibration: CalibrationTable, seed: u64, step_s: f64) -> Self {
        let state = SimState {
            calibration,
            rng: StdRng::seed_from_u64(seed),
            noise: true,
            step_s,
            plant: Plant {
                fan_rpm: 0.0,
                turbine_rpm: 0.0,
                held_rpm: None,
                command: ActuatorFrame::default(),
            },
            out: VecDeque::new(),
            pending_command: None,
            last_command: None,
            frames_served: 0,
            commands_applied: 0,
            fail_after: None,
            io_ops: 0,
            truncate_next: None,
            end_of_stream: false,
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    pub fn without_noise(self) -> Self {
        self.state.lock().noise = false;
        self
    }

    /// Every read/write after `ops` more operations fails with a broken pipe.
    pub fn fail_after(&self, ops: u64) {
        let mut s = self.state.lock();
        s.fail_after = Some(s.io_ops + ops);
    }

    /// Clear injected faults and resynchronise, like a board reset on port open.
    pub fn heal(&self) {
        let mut s = self.state.lock();
        s.fail_after = None;
        s.truncate_next = None;
        s.end_of_stream = false;
        s.pending_command = None;
        s.out.clear();
    }

    /// The next frame is cut after `keep` bytes and followed by end of stream.
    pub fn truncate_next_frame(&self, keep: usize) {
        self.state.lock().truncate_next = Some(keep);
    }

    /// Pin the turbine speed (rpm) regardless of the plant, or release it with `None`.
    pub fn hold_turbine_rpm(&self, rpm: Option<f64>) {
        let mut s = self.state.lock();
        s.plant.held_rpm = rpm;
        if let Some(rpm) = rpm {
            s.plant.turbine_rpm = rpm;
        }
    }

    /// Start the fan already spun up to `rpm`.
    pub fn set_fan_rpm(&self, rpm: f64) {
        self.state.lock().plant.fan_rpm = rpm;
    }

    pub fn last_command(&self) -> Option<ActuatorFrame> {
        self.state.lock().last_command
    }

    pub fn frames_served(&self) -> u64 {
        self.state.lock().frames_served
    }

    pub fn commands_applied(&self) -> u64 {
        self.state.lock().commands_applied
    }
}

impl SimState {
    fn check_fault(&mut self) -> io::Result<()> {
        self.io_ops += 1;
        match self.fail_after {
            Some(limit) if self.io_ops > limit => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated link failure"))
            }
            _ => Ok(()),
        }
    }

    fn on_byte(&mut self, byte: u8) {
        if let Some(buf) = self.pending_command.as_mut() {
            buf.push(byte);
            if buf.len() == ACTUATOR_FRAME_LEN {
                let mut bytes = [0u8; ACTUATOR_FRAME_LEN];
                bytes.copy_from_slice(buf);
                let cmd = ActuatorFrame::decode(&bytes);
                self.plant.command = cmd;
                self.last_command = Some(cmd);
                self.commands_applied += 1;
                self.pending_command = None;
            }
        } else if byte == REQUEST_BYTE {
            self.advance();
            let bytes = self.sample().encode();
            match self.truncate_next.take() {
                Some(keep) => {
                    self.out.extend(&bytes[..keep.min(bytes.len())]);
                    self.end_of_stream = true;
                }
                None => self.out.extend(bytes),
            }
            self.frames_served += 1;
            self.pending_command = Some(Vec::with_capacity(ACTUATOR_FRAME_LEN));
        }
    }

    fn advance(&mut self) {
        let cal = self.calibration.data();
        let cmd = self.plant.command;
        let dt = self.step_s;

        // Fan: PWM → wind setpoint → fan speed, first-order lag.
        let wind_set = ((f64::from(cmd.fan_pwm) - cal.fan_pwm_bias) / cal.fan_pwm_factor).max(0.0);
        let fan_target = ((wind_set - cal.wind_speed_bias) / cal.wind_speed_factor).max(0.0);
        self.plant.fan_rpm += (fan_target - self.plant.fan_rpm) * (dt / FAN_TAU_S).min(1.0);

        if let Some(rpm) = self.plant.held_rpm {
            self.plant.turbine_rpm = rpm;
            return;
        }

        let wind = self.calibration.far_field_wind(self.plant.fan_rpm).max(0.0);
        let pitch = self.pitch_deg();
        let pitch_gain = ((pitch - 15.0).to_radians()).cos().max(0.0);
        let level = i32::from(cmd.torque_level);
        let brake = if level < 0 { 0.0 } else { RPM_PER_LEVEL * f64::from(level + 1) };
        let target = (RPM_PER_WIND * wind * pitch_gain - brake).max(0.0);

        // A braked rotor at standstill does not start on its own.
        if self.plant.turbine_rpm <= 0.0 && level >= 0 {
            return;
        }
        self.plant.turbine_rpm += (target - self.plant.turbine_rpm) * (dt / ROTOR_TAU_S).min(1.0);
        if self.plant.turbine_rpm < STALL_RPM && target < STALL_RPM {
            self.plant.turbine_rpm = 0.0;
        }
    }

    fn pitch_deg(&self) -> f64 {
        let cal = self.calibration.data();
        (f64::from(self.plant.command.servo_pulse) - cal.servo_time_bias) / cal.servo_time_factor
    }

    fn sample(&mut self) -> RawFrame {
        let cal = self.calibration.data().clone();
        let rpm = self.plant.turbine_rpm;
        let wind = self.calibration.far_field_wind(self.plant.fan_rpm).max(0.0);
        let pitch = self.pitch_deg();
        let torque = self
            .calibration
            .drivetrain_torque(i32::from(self.plant.command.torque_level), rpm);
        let thrust_mn = THRUST_PER_WIND_SQ * wind * wind * (0.3 + 0.7 * pitch.to_radians().cos().abs());

        let noise = self.noise;
        let rng = &mut self.rng;
        let mut jitter = |span: f64| if noise { rng.random_range(-span..=span) } else { 0.0 };
        let fan = self.plant.fan_rpm + jitter(20.0);
        let turbine = if rpm > 0.0 { rpm + jitter(3.0) } else { 0.0 };
        let thrust = (thrust_mn / cal.thrust_factor + jitter(500.0)) as i32;

        RawFrame {
            fan_rotation: fan.clamp(0.0, f64::from(u16::MAX)) as u16,
            turbine_rotation: turbine.clamp(0.0, f64::from(u16::MAX)) as u16,
            current: (torque * MA_PER_MNM).clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16,
            voltage: (rpm * 5.0).clamp(0.0, f64::from(i16::MAX)) as i16,
            thrust,
            anemometer: anemometer_count(&cal.anemometer_read, &cal.anemometer_wind, wind) as u16,
            potentiometer: ((pitch - cal.potentiometer_bias) / cal.potentiometer_factor)
                .clamp(0.0, f64::from(u16::MAX)) as u16,
        }
    }
}

/// Piecewise-linear inverse of the anemometer curve, extended linearly at both ends.
fn anemometer_count(reads: &[f64], winds: &[f64], wind: f64) -> f64 {
    let mut pts: Vec<(f64, f64)> = winds.iter().copied().zip(reads.iter().copied()).collect();
    pts.sort_by(|a, b| a.0.total_cmp(&b.0));
    if pts.len() < 2 {
        return pts.first().map(|p| p.1).unwrap_or(0.0);
    }
    let i = pts
        .windows(2)
        .position(|w| wind <= w[1].0)
        .unwrap_or(pts.len() - 2);
    let (w0, r0) = pts[i];
    let (w1, r1) = pts[i + 1];
    let count = if w1 > w0 { r0 + (wind - w0) * (r1 - r0) / (w1 - w0) } else { r0 };
    count.clamp(0.0, f64::from(u16::MAX))
}

impl Read for SimulatedRig {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut s = self.state.lock();
        s.check_fault()?;
        if s.out.is_empty() && s.end_of_stream {
            s.end_of_stream = false;
            return Ok(0);
        }
        if s.out.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data from simulated rig"));
        }
        let n = buf.len().min(s.out.len());
        for (slot, byte) in buf.iter_mut().zip(s.out.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedRig {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut s = self.state.lock();
        s.check_fault()?;
        for &byte in buf {
            s.on_byte(byte);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl RigLink for SimulatedRig {
    fn name(&self) -> &str {
        "simulated"
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.state.lock().out.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_frame_then_accepts_command() {
        let mut rig = SimulatedRig::new(CalibrationTable::default(), 1, 0.05).without_noise();
        rig.write_all(&[REQUEST_BYTE]).unwrap();
        let mut buf = [0u8; 16];
        rig.read_exact(&mut buf).unwrap();
        assert_eq!(rig.frames_served(), 1);

        let cmd = ActuatorFrame { fan_pwm: 120, servo_pulse: 1400, torque_level: 3, led: true };
        rig.write_all(&cmd.encode()).unwrap();
        assert_eq!(rig.last_command(), Some(cmd));
        assert_eq!(rig.commands_applied(), 1);
    }

    #[test]
    fn anemometer_inverse_matches_samples() {
        let cal = CalibrationTable::default();
        let d = cal.data();
        assert!((anemometer_count(&d.anemometer_read, &d.anemometer_wind, 2.0) - 227.83344).abs() < 1e-9);
        assert!(anemometer_count(&d.anemometer_read, &d.anemometer_wind, 7.0) > 246.0);
    }

    #[test]
    fn truncated_frame_ends_early() {
        let mut rig = SimulatedRig::new(CalibrationTable::default(), 1, 0.05);
        rig.truncate_next_frame(5);
        rig.write_all(&[REQUEST_BYTE]).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(rig.read(&mut buf).unwrap(), 5);
        assert_eq!(rig.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn injected_fault_breaks_io() {
        let mut rig = SimulatedRig::new(CalibrationTable::default(), 1, 0.05);
        rig.fail_after(0);
        assert!(rig.write_all(&[REQUEST_BYTE]).is_err());
        rig.heal();
        assert!(rig.write_all(&[REQUEST_BYTE]).is_ok());
    }
}
