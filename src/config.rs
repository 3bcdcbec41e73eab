//! config.rs
//! Rig constants and runtime settings.
//!
//! Every section carries `#[serde(default)]`, so a JSON file only needs the
//! keys it wants to override. `RigConfig::default()` is the stock rig.

use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use crate::errors::ConfigError;

/// Rotor geometry and air properties used by the telemetry model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotorParams {
    /// kg/m³
    pub air_density: f64,
    /// m
    pub radius: f64,
    /// Rough estimate, good enough for the inertial power correction.
    pub inertia: f64,
}

impl Default for RotorParams {
    fn default() -> Self {
        Self {
            air_density: 1.225,
            radius: 0.16,
            inertia: 0.2,
        }
    }
}

/// Hardware-safe envelope for the commandable outputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorLimitsConfig {
    pub servo_min_us: u16,
    pub servo_max_us: u16,
    pub fan_pwm_min: u8,
    pub fan_pwm_max: u8,
    pub pitch_min_deg: f64,
    pub pitch_max_deg: f64,
    pub wind_min: f64,
    pub wind_max: f64,
    pub freewheel_level: i8,
}

impl Default for ActuatorLimitsConfig {
    fn default() -> Self {
        Self {
            servo_min_us: 1000,
            servo_max_us: 2000,
            fan_pwm_min: 0,
            fan_pwm_max: 255,
            pitch_min_deg: -5.0,
            pitch_max_deg: 85.0,
            wind_min: 0.4,
            wind_max: 6.0,
            freewheel_level: -1,
        }
    }
}

/// Limits enforced by the control loop itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatingLimits {
    /// rpm above which the loop trips into overspeed shutdown
    pub rot_max: f64,
    /// deg
    pub pitch_idle: f64,
}

impl Default for OperatingLimits {
    fn default() -> Self {
        Self {
            rot_max: 1200.0,
            pitch_idle: 45.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Substring matched against the USB product/manufacturer string.
    pub description_filter: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    /// The board resets when the port opens; wait this long before the first request.
    pub settle_ms: u64,
}

impl LinkSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            description_filter: "Arduino".into(),
            baud_rate: 38_400,
            timeout_ms: 500,
            settle_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub rotor: RotorParams,
    pub limits: ActuatorLimitsConfig,
    pub operating: OperatingLimits,
    pub link: LinkSettings,
    pub cycle_period_ms: u64,
    /// Print the variable table every N cycles.
    pub status_every: u64,
    /// Pin the control loop thread to this core.
    pub loop_core: Option<usize>,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            rotor: RotorParams::default(),
            limits: ActuatorLimitsConfig::default(),
            operating: OperatingLimits::default(),
            link: LinkSettings::default(),
            cycle_period_ms: 50,
            status_every: 20,
            loop_core: None,
        }
    }
}

impl RigConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Every `[min, max]` pair must be ordered and finite.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let l = &self.limits;
        let pairs = [
            ("servo_min_us..servo_max_us", f64::from(l.servo_min_us), f64::from(l.servo_max_us)),
            ("fan_pwm_min..fan_pwm_max", f64::from(l.fan_pwm_min), f64::from(l.fan_pwm_max)),
            ("pitch_min_deg..pitch_max_deg", l.pitch_min_deg, l.pitch_max_deg),
            ("wind_min..wind_max", l.wind_min, l.wind_max),
            ("freewheel_level..0", f64::from(l.freewheel_level), 0.0),
        ];
        for (field, lo, hi) in pairs {
            if !(lo.is_finite() && hi.is_finite() && lo <= hi) {
                return Err(ConfigError::InvalidLimits { field });
            }
        }
        Ok(())
    }

    pub fn cycle_period(&self) -> Duration {
        Duration::from_millis(self.cycle_period_ms.max(1))
    }
}
