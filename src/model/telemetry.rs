//! telemetry.rs
//! Raw frame + actuator state → physical/aerodynamic state of the rotor.
//!
//! Units follow the rig: rotation rpm, speed m/s, power mW, torque mNm,
//! forces mN, angles rad (inflow) / deg (pitch read-back).
//!
//! The step is a pure function of the previous state and the new sample.
//! Several fields are filtered and carry their own history, so every
//! division is guarded: a NaN that gets into `aero_power` would never leave.

use std::{f64::consts::PI, time::Duration};

use crate::config::RotorParams;
use crate::rig::{actuator::ActuatorState, calibration::CalibrationTable, frame::RawFrame};

/// Weight of the new sample in the anemometer filter.
const ANEMOMETER_WEIGHT: f64 = 0.1;
/// Weight of the new sample in the aerodynamic power filter.
const AERO_POWER_WEIGHT: f64 = 0.5;

/// 2-D force vector at the blade tip: x in the rotor plane, y along the axis.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Row vector times the rotation matrix `[[cos a, -sin a], [sin a, cos a]]`.
    fn times_rotation(self, angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self { x: self.x * c + self.y * s, y: -self.x * s + self.y * c }
    }

    pub fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhysicalState {
    /// Raw turbine speed of this sample, rpm.
    pub rotation_rpm: f64,
    /// Raw turbine speed of the previous sample, rpm.
    pub last_rotation_rpm: f64,
    pub fan_rotation_rpm: f64,
    pub current_ma: f64,
    pub voltage_mv: f64,
    pub tip_speed: f64,
    /// Far-field wind speed from the fan speed.
    pub v1: f64,
    /// Thermal anemometer wind speed, doubly filtered.
    pub anemometer_wind: f64,
    pub torque: f64,
    pub turbine_power: f64,
    pub wind_power: f64,
    /// Filtered rotor power with inertial correction.
    pub aero_power: f64,
    pub power_coefficient: f64,
    pub power_coefficient_aero: f64,
    pub tip_speed_ratio: f64,
    pub thrust_force: f64,
    /// Rotor-plane wind speed from momentum theory.
    pub v2: f64,
    pub relative_speed: f64,
    /// Inflow angle, rad.
    pub inflow_angle: f64,
    pub torque_force: f64,
    pub resultant_force: Vec2,
    pub lift_force: Vec2,
    pub drag_force: Vec2,
    /// Pitch read back from the potentiometer, deg.
    pub pitch_readback: f64,
    /// Seconds since the previous sample.
    pub dt: f64,
}

#[derive(Debug, Clone)]
pub struct TelemetryModel {
    calibration: CalibrationTable,
    rotor: RotorParams,
}

impl TelemetryModel {
    pub fn new(calibration: CalibrationTable, rotor: RotorParams) -> Self {
        Self { calibration, rotor }
    }

    pub fn calibration(&self) -> &CalibrationTable {
        &self.calibration
    }

    pub fn rotor(&self) -> &RotorParams {
        &self.rotor
    }

    fn rotor_area(&self) -> f64 {
        PI * self.rotor.radius * self.rotor.radius
    }

    pub fn update(
        &self,
        previous: &PhysicalState,
        raw: &RawFrame,
        actuators: &ActuatorState,
        dt: Duration,
    ) -> PhysicalState {
        let cal = &self.calibration;
        let rho = self.rotor.air_density;
        let radius = self.rotor.radius;
        let dt = dt.as_secs_f64();

        let rpm = f64::from(raw.turbine_rotation);
        let rps = rpm / 60.0;

        let tip_speed = rps * 2.0 * PI * radius;

        // Current is too noisy; torque comes from the drivetrain curve instead.
        let torque = cal.drivetrain_torque(actuators.torque_level(), rpm);
        let turbine_power = 2.0 * PI * rps * torque;

        let v1 = cal.far_field_wind(f64::from(raw.fan_rotation)).max(0.0);

        // Average with the previous estimate, then filter again.
        let averaged = (cal.anemometer_wind_speed(raw.anemometer) + previous.anemometer_wind) / 2.0;
        let anemometer_wind =
            ANEMOMETER_WEIGHT * averaged + (1.0 - ANEMOMETER_WEIGHT) * previous.anemometer_wind;

        // ×1000: W → mW
        let wind_power = 0.5 * rho * v1.powi(3) * self.rotor_area() * 1000.0;

        let inertial = if dt > 0.0 {
            self.rotor.inertia * (rpm - previous.rotation_rpm) / dt
        } else {
            0.0
        };
        let aero_power = (1.0 - AERO_POWER_WEIGHT) * previous.aero_power
            + AERO_POWER_WEIGHT * turbine_power
            + inertial;

        let (power_coefficient, power_coefficient_aero) = if wind_power > 0.0 {
            (turbine_power / wind_power, aero_power / wind_power)
        } else {
            (0.0, 0.0)
        };

        let tip_speed_ratio = if v1 > 0.0 { tip_speed / v1 } else { 0.0 };

        let thrust_force = cal.thrust_force(raw.thrust);

        // /1000: mN → N
        let radicand = v1 * v1 - 2.0 * thrust_force / 1000.0 / (rho * self.rotor_area());
        let v2 = if radicand > 0.0 { (v1 + radicand.sqrt()) / 2.0 } else { 0.0 };
        let v2 = v2.max(0.5 * v1);

        let relative_speed = v2.hypot(tip_speed);
        let inflow_angle = if tip_speed > 0.0 { v2.atan2(tip_speed) } else { 0.0 };

        let torque_force = if rpm > 0.0 {
            60.0 * aero_power / (rpm * 2.0 * PI * radius)
        } else {
            0.0
        };

        let resultant_force = Vec2::new(torque_force, thrust_force);
        let rotated = resultant_force.times_rotation(-inflow_angle);
        let lift_force = Vec2::new(0.0, rotated.y).times_rotation(inflow_angle);
        let drag_force = Vec2::new(rotated.x, 0.0).times_rotation(inflow_angle);

        PhysicalState {
            rotation_rpm: rpm,
            last_rotation_rpm: previous.rotation_rpm,
            fan_rotation_rpm: f64::from(raw.fan_rotation),
            current_ma: f64::from(raw.current),
            voltage_mv: f64::from(raw.voltage),
            tip_speed,
            v1,
            anemometer_wind,
            torque,
            turbine_power,
            wind_power,
            aero_power,
            power_coefficient,
            power_coefficient_aero,
            tip_speed_ratio,
            thrust_force,
            v2,
            relative_speed,
            inflow_angle,
            torque_force,
            resultant_force,
            lift_force,
            drag_force,
            pitch_readback: cal.pitch_from_potentiometer(raw.potentiometer),
            dt,
        }
    }
}
