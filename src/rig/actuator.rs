//! actuator.rs
//! Commandable rig outputs with hardware-safe clamping on every write.
//!
//! Out-of-range requests never error: they saturate to the nearest legal
//! value and the setter reports that it did so via [`Clamped`].
//! Discretised fields round to the nearest integer.

use crate::config::ActuatorLimitsConfig;
use crate::rig::calibration::CalibrationTable;
use crate::rig::frame::ActuatorFrame;

/// Result of a clamping write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clamped<T> {
    pub value: T,
    /// The request was outside the envelope (or not a number).
    pub saturated: bool,
}

impl<T> Clamped<T> {
    fn new(value: T, saturated: bool) -> Self {
        Self { value, saturated }
    }
}

/// Envelope for all outputs. The torque-level range runs from the freewheel
/// sentinel up to the highest calibrated level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorLimits {
    pub servo_min_us: u16,
    pub servo_max_us: u16,
    pub fan_pwm_min: u8,
    pub fan_pwm_max: u8,
    pub pitch_min_deg: f64,
    pub pitch_max_deg: f64,
    pub wind_min: f64,
    pub wind_max: f64,
    pub freewheel_level: i32,
    pub level_max: i32,
}

impl ActuatorLimits {
    pub fn new(cfg: &ActuatorLimitsConfig, calibration: &CalibrationTable) -> Self {
        Self {
            servo_min_us: cfg.servo_min_us,
            servo_max_us: cfg.servo_max_us,
            fan_pwm_min: cfg.fan_pwm_min,
            fan_pwm_max: cfg.fan_pwm_max,
            pitch_min_deg: cfg.pitch_min_deg,
            pitch_max_deg: cfg.pitch_max_deg,
            wind_min: cfg.wind_min,
            wind_max: cfg.wind_max,
            freewheel_level: i32::from(cfg.freewheel_level),
            level_max: calibration.level_max().min(i32::from(i8::MAX)),
        }
    }
}

/// Clamp to `[lo, hi]`; NaN saturates to `lo`.
fn clamp(v: f64, lo: f64, hi: f64) -> (f64, bool) {
    if v.is_nan() {
        (lo, true)
    } else if v < lo {
        (lo, true)
    } else if v > hi {
        (hi, true)
    } else {
        (v, false)
    }
}

/// An inverted envelope resolves to `lo` instead of panicking.
fn clamp_round(v: f64, lo: f64, hi: f64) -> (f64, bool) {
    let (v, saturated) = clamp(v, lo, hi);
    let (v, _) = clamp(v.round(), lo, hi);
    (v, saturated)
}

/// The four commandable outputs plus the physical setpoints they were derived from.
///
/// Servo pulse has no setter of its own: it always follows the pitch setpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorState {
    limits: ActuatorLimits,
    fan_pwm: u8,
    wind_setpoint: f64,
    servo_pulse: u16,
    pitch: f64,
    torque_level: i32,
    torque_target: f64,
    led: bool,
}

impl ActuatorState {
    /// Lowest wind setpoint, `pitch_deg` pitch, level 0, LED on.
    pub fn new(limits: ActuatorLimits, calibration: &CalibrationTable, pitch_deg: f64) -> Self {
        let mut state = Self {
            limits,
            fan_pwm: limits.fan_pwm_min,
            wind_setpoint: limits.wind_min,
            servo_pulse: limits.servo_min_us,
            pitch: pitch_deg,
            torque_level: 0,
            torque_target: 0.0,
            led: true,
        };
        state.set_wind_speed(calibration, limits.wind_min);
        state.set_pitch(calibration, pitch_deg);
        state
    }

    pub fn limits(&self) -> &ActuatorLimits {
        &self.limits
    }

    pub fn fan_pwm(&self) -> u8 {
        self.fan_pwm
    }

    /// 0 after [`Self::stop_fan`], otherwise the last requested wind speed.
    pub fn wind_setpoint(&self) -> f64 {
        self.wind_setpoint
    }

    pub fn servo_pulse(&self) -> u16 {
        self.servo_pulse
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    pub fn torque_level(&self) -> i32 {
        self.torque_level
    }

    /// Last torque request in mNm, as given to [`Self::set_torque`].
    pub fn torque_target(&self) -> f64 {
        self.torque_target
    }

    pub fn led(&self) -> bool {
        self.led
    }

    pub fn set_fan_pwm(&mut self, pwm: f64) -> Clamped<u8> {
        let (v, saturated) = clamp_round(
            pwm,
            f64::from(self.limits.fan_pwm_min),
            f64::from(self.limits.fan_pwm_max),
        );
        self.fan_pwm = v as u8;
        Clamped::new(self.fan_pwm, saturated)
    }

    /// Fan off. The wind setpoint drops to 0, below the commandable range.
    pub fn stop_fan(&mut self) {
        self.set_fan_pwm(f64::from(self.limits.fan_pwm_min));
        self.wind_setpoint = 0.0;
    }

    /// Wind speed setpoint (m/s); recomputes fan PWM through the calibration.
    pub fn set_wind_speed(&mut self, calibration: &CalibrationTable, wind: f64) -> Clamped<f64> {
        let (v, wind_saturated) = clamp(wind, self.limits.wind_min, self.limits.wind_max);
        self.wind_setpoint = v;
        let pwm = self.set_fan_pwm(calibration.fan_pwm_for_wind(v));
        Clamped::new(v, wind_saturated || pwm.saturated)
    }

    /// Pitch setpoint (deg); recomputes the servo pulse through the calibration.
    pub fn set_pitch(&mut self, calibration: &CalibrationTable, pitch_deg: f64) -> Clamped<f64> {
        let (p, pitch_saturated) = clamp(pitch_deg, self.limits.pitch_min_deg, self.limits.pitch_max_deg);
        self.pitch = p;
        let (pulse, pulse_saturated) = clamp_round(
            calibration.servo_pulse_for_pitch(p),
            f64::from(self.limits.servo_min_us),
            f64::from(self.limits.servo_max_us),
        );
        self.servo_pulse = pulse as u16;
        Clamped::new(p, pitch_saturated || pulse_saturated)
    }

    pub fn set_torque_level(&mut self, level: f64) -> Clamped<i32> {
        let (v, saturated) = clamp_round(
            level,
            f64::from(self.limits.freewheel_level),
            f64::from(self.limits.level_max),
        );
        self.torque_level = v as i32;
        Clamped::new(self.torque_level, saturated)
    }

    /// Torque request (mNm) resolved to the nearest level at the current
    /// turbine speed. Negative requests count as 0. Returns `None` and leaves
    /// the level untouched when `rpm` is 0; use [`Self::set_torque_level`] then.
    pub fn set_torque(
        &mut self,
        calibration: &CalibrationTable,
        torque: f64,
        rpm: f64,
    ) -> Option<Clamped<i32>> {
        self.torque_target = if torque < 0.0 { 0.0 } else { torque };
        let level = calibration.level_for_torque(self.torque_target, rpm)?;
        Some(self.set_torque_level(level))
    }

    pub fn set_led(&mut self, on: bool) {
        self.led = on;
    }

    pub fn to_frame(&self) -> ActuatorFrame {
        ActuatorFrame {
            fan_pwm: self.fan_pwm,
            servo_pulse: self.servo_pulse,
            torque_level: self.torque_level as i8,
            led: self.led,
        }
    }
}
