//! controller.rs
//! Pluggable turbine controllers.
//!
//! A controller turns one cycle of telemetry into a pitch + torque-level
//! command. Implementations are registered by name in a
//! [`ControllerRegistry`] and selected at runtime; the control loop only sees
//! `Box<dyn Controller>`.

use std::collections::BTreeMap;

use crate::control::pitch_pid::PitchPid;

/// Number of lines in a controller's display description.
pub const DESCRIPTION_LINES: usize = 12;

pub type Description = [&'static str; DESCRIPTION_LINES];

/// Measured quantities handed to the controller each cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlInput {
    /// m/s
    pub wind_estimate: f64,
    /// rpm
    pub rotation_speed: f64,
    /// mW
    pub power: f64,
    /// mNm
    pub torque: f64,
    /// mN
    pub thrust: f64,
    pub tip_speed_ratio: f64,
    /// s
    pub dt: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlCommand {
    /// deg
    pub pitch: f64,
    pub torque_level: i32,
}

/// PID contributions of the last step, for display and logging.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidTerms {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

pub trait Controller: Send {
    fn name(&self) -> &'static str;

    fn description(&self) -> Description;

    fn step(&mut self, input: &ControlInput) -> ControlCommand;

    /// Internal PID terms, if the controller has any.
    fn pid_terms(&self) -> Option<PidTerms> {
        None
    }
}

/// Does nothing: pitch 0, level 0. Starting point for new controllers.
#[derive(Debug, Default, Clone)]
pub struct TemplateController;

impl Controller for TemplateController {
    fn name(&self) -> &'static str {
        "Template"
    }

    fn description(&self) -> Description {
        [" "; DESCRIPTION_LINES]
    }

    fn step(&mut self, _input: &ControlInput) -> ControlCommand {
        ControlCommand { pitch: 0.0, torque_level: 0 }
    }
}

pub type ControllerFactory = fn() -> Box<dyn Controller>;

#[derive(Debug, Clone)]
pub struct ControllerRegistry {
    factories: BTreeMap<&'static str, ControllerFactory>,
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl ControllerRegistry {
    pub fn empty() -> Self {
        Self { factories: BTreeMap::new() }
    }

    /// The controllers that ship with the rig.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(PitchPid::NAME, || Box::new(PitchPid::default()));
        registry.register("Template", || Box::new(TemplateController));
        registry
    }

    /// Replaces any controller already registered under `name`.
    pub fn register(&mut self, name: &'static str, factory: ControllerFactory) {
        self.factories.insert(name, factory);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn Controller>> {
        self.factories.get(name).map(|factory| factory())
    }
}
