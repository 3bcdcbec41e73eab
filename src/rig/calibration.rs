//! calibration.rs
//! Calibration table and raw-count ↔ physical-unit conversions.
//!
//! The table is produced by the calibration scripts, loaded once at startup
//! and read-only afterwards. Units: torque mNm, thrust mN, wind m/s, pitch deg,
//! servo pulse µs, rotation rpm.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::CalibrationError;
use crate::rig::interpolation::QuadraticSpline;

/// First calibrated torque level. Levels below it are the freewheel sentinel.
pub const LEVEL_MIN: i32 = 0;

/// On-disk form of the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationData {
    pub anemometer_read: Vec<f64>,
    pub anemometer_wind: Vec<f64>,
    pub servo_time_factor: f64,
    pub servo_time_bias: f64,
    pub fan_pwm_factor: f64,
    pub fan_pwm_bias: f64,
    pub wind_speed_factor: f64,
    pub wind_speed_bias: f64,
    pub drivetrain_factor: Vec<f64>,
    pub drivetrain_bias: Vec<f64>,
    pub thrust_factor: f64,
    pub potentiometer_factor: f64,
    pub potentiometer_bias: f64,
}

impl Default for CalibrationData {
    fn default() -> Self {
        Self {
            anemometer_read: vec![184.44912, 217.0184, 227.83344, 235.58, 241.72624, 246.38144],
            anemometer_wind: vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            servo_time_factor: -5.055555555555555,
            servo_time_bias: 1494.7222222222222,
            fan_pwm_factor: 36.07816743861474,
            fan_pwm_bias: 17.056928034371623,
            wind_speed_factor: 0.00452081092183158,
            wind_speed_bias: -0.1711886876887747,
            drivetrain_factor: vec![
                3.0124157206953196e-05,
                0.00012201100670135896,
                0.00022737386953530547,
                0.0002851602509879177,
                0.0003663118665567324,
                0.0004266999873273349,
                0.0005398013330411129,
                0.0006205043514405217,
                0.0007661145092176049,
                0.0008657988635002594,
                0.0010811495696738435,
                0.0011895270982284851,
                0.0014536392748368382,
            ],
            drivetrain_bias: vec![
                0.0,
                -0.03224180000000004,
                -0.014378100000000005,
                -0.006012660000000003,
                0.011328199999999955,
                0.02893047999999998,
                0.06265365999999994,
                0.08104019999999995,
                0.12304167999999999,
                0.15005507999999998,
                0.20181623999999998,
                0.23719507999999995,
                0.30559998,
            ],
            thrust_factor: 1.0 / 655.0,
            potentiometer_factor: -0.2174,
            potentiometer_bias: 192.0,
        }
    }
}

impl CalibrationData {
    fn validate(&self) -> Result<(), CalibrationError> {
        let scalars = [
            ("servo_time_factor", self.servo_time_factor),
            ("servo_time_bias", self.servo_time_bias),
            ("fan_pwm_factor", self.fan_pwm_factor),
            ("fan_pwm_bias", self.fan_pwm_bias),
            ("wind_speed_factor", self.wind_speed_factor),
            ("wind_speed_bias", self.wind_speed_bias),
            ("thrust_factor", self.thrust_factor),
            ("potentiometer_factor", self.potentiometer_factor),
            ("potentiometer_bias", self.potentiometer_bias),
        ];
        for (field, value) in scalars {
            if !value.is_finite() {
                return Err(CalibrationError::NonFinite { field: field.into() });
            }
        }

        let curves = [
            ("anemometer_read", &self.anemometer_read),
            ("anemometer_wind", &self.anemometer_wind),
            ("drivetrain_factor", &self.drivetrain_factor),
            ("drivetrain_bias", &self.drivetrain_bias),
        ];
        for (field, values) in curves {
            if let Some(i) = values.iter().position(|v| !v.is_finite()) {
                return Err(CalibrationError::NonFinite { field: format!("{field}[{i}]") });
            }
        }

        if self.drivetrain_factor.len() != self.drivetrain_bias.len() {
            return Err(CalibrationError::LevelTableMismatch {
                factors: self.drivetrain_factor.len(),
                biases: self.drivetrain_bias.len(),
            });
        }
        if self.drivetrain_factor.is_empty() {
            return Err(CalibrationError::EmptyLevelTable);
        }
        Ok(())
    }
}

/// Validated, immutable calibration table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CalibrationData", into = "CalibrationData")]
pub struct CalibrationTable {
    data: CalibrationData,
    anemometer: QuadraticSpline,
}

impl TryFrom<CalibrationData> for CalibrationTable {
    type Error = CalibrationError;

    fn try_from(data: CalibrationData) -> Result<Self, Self::Error> {
        data.validate()?;
        let anemometer = QuadraticSpline::fit(&data.anemometer_read, &data.anemometer_wind)?;
        Ok(Self { data, anemometer })
    }
}

impl From<CalibrationTable> for CalibrationData {
    fn from(table: CalibrationTable) -> Self {
        table.data
    }
}

impl Default for CalibrationTable {
    fn default() -> Self {
        // The shipped data set is known-good.
        match Self::try_from(CalibrationData::default()) {
            Ok(table) => table,
            Err(e) => unreachable!("shipped calibration is invalid: {e}"),
        }
    }
}

impl CalibrationTable {
    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let contents = std::fs::read_to_string(path)?;
        let data: CalibrationData = serde_json::from_str(&contents)?;
        Self::try_from(data)
    }

    pub fn save(&self, path: &Path) -> Result<(), CalibrationError> {
        let json = serde_json::to_string_pretty(&self.data)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn data(&self) -> &CalibrationData {
        &self.data
    }

    /// Highest calibrated torque level.
    pub fn level_max(&self) -> i32 {
        LEVEL_MIN + self.data.drivetrain_factor.len() as i32 - 1
    }

    /// Thermal anemometer count → wind speed (m/s). Extrapolates beyond the samples.
    pub fn anemometer_wind_speed(&self, raw: u16) -> f64 {
        self.anemometer.eval(f64::from(raw))
    }

    /// Pitch (deg) → servo pulse (µs), unclamped.
    pub fn servo_pulse_for_pitch(&self, pitch_deg: f64) -> f64 {
        self.data.servo_time_factor * pitch_deg + self.data.servo_time_bias
    }

    /// Wind speed setpoint (m/s) → fan PWM duty, unclamped.
    pub fn fan_pwm_for_wind(&self, wind: f64) -> f64 {
        self.data.fan_pwm_factor * wind + self.data.fan_pwm_bias
    }

    /// Fan rotation (rpm) → far-field wind speed (m/s), unclamped.
    pub fn far_field_wind(&self, fan_rpm: f64) -> f64 {
        self.data.wind_speed_factor * fan_rpm + self.data.wind_speed_bias
    }

    /// Generator torque (mNm) at `level` and turbine speed `rpm`.
    /// The freewheel sentinel (any level below `LEVEL_MIN`) is always 0.
    pub fn drivetrain_torque(&self, level: i32, rpm: f64) -> f64 {
        if level < LEVEL_MIN {
            return 0.0;
        }
        let idx = ((level - LEVEL_MIN) as usize).min(self.data.drivetrain_factor.len() - 1);
        self.data.drivetrain_factor[idx] * rpm + self.data.drivetrain_bias[idx]
    }

    /// Raw 24-bit load cell count → thrust (mN).
    pub fn thrust_force(&self, raw: i32) -> f64 {
        f64::from(raw) * self.data.thrust_factor
    }

    /// Potentiometer count → pitch read-back (deg).
    pub fn pitch_from_potentiometer(&self, raw: u16) -> f64 {
        self.data.potentiometer_factor * f64::from(raw) + self.data.potentiometer_bias
    }

    /// Fractional level producing `torque` (mNm) at `rpm`, interpolated
    /// linearly between the level curves and saturated at both ends.
    /// `None` when `rpm` is 0: every curve collapses onto its bias there.
    pub fn level_for_torque(&self, torque: f64, rpm: f64) -> Option<f64> {
        if rpm <= 0.0 {
            return None;
        }
        let curve: Vec<f64> = (0..self.data.drivetrain_factor.len())
            .map(|i| self.drivetrain_torque(LEVEL_MIN + i as i32, rpm))
            .collect();
        let last = curve.len() - 1;
        if torque <= curve[0] {
            return Some(f64::from(LEVEL_MIN));
        }
        if torque >= curve[last] {
            return Some(f64::from(LEVEL_MIN) + last as f64);
        }
        let fractional = curve
            .windows(2)
            .position(|w| w[0] <= torque && torque <= w[1])
            .map(|i| {
                let span = curve[i + 1] - curve[i];
                let frac = if span > 0.0 { (torque - curve[i]) / span } else { 0.0 };
                i as f64 + frac
            })
            .unwrap_or(last as f64);
        Some(f64::from(LEVEL_MIN) + fractional)
    }
}
