//! link_driver.rs
//! Owns the link, the physical state and the actuator state.
//!
//! - receive(): one frame in, one model step. The only place PhysicalState advances.
//! - transmit(): current ActuatorState out, every cycle whether it changed or not.
//! - Link failures demote to Disconnected instead of propagating; physical
//!   state and actuators freeze until attach() succeeds again.
//! - Sequencing mistakes by the caller are returned as errors and leave the link up.

use log::{debug, info, warn};
use std::{fmt, time::Instant};

use crate::config::{LinkSettings, RigConfig};
use crate::errors::{ConnectError, ProtocolSequenceError, TransportError};
use crate::model::telemetry::{PhysicalState, TelemetryModel};
use crate::rig::{
    actuator::{ActuatorLimits, ActuatorState, Clamped},
    calibration::CalibrationTable,
    frame::RawFrame,
    transport::{self, LinkHandle, RigLink},
};

/// Opens a link with the given settings. The serial discovery by default.
pub type Connector = Box<dyn FnMut(&LinkSettings) -> Result<LinkHandle, ConnectError> + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Connected { port: String },
    Disconnected,
}

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkStatus::Connected { .. })
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Connected { port } => write!(f, "connected ({})", port),
            LinkStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

pub struct Driver {
    config: RigConfig,
    model: TelemetryModel,
    connector: Connector,
    link: Option<LinkHandle>,
    physical: PhysicalState,
    actuators: ActuatorState,
    raw: RawFrame,
    last_sample: Option<Instant>,
}

impl Driver {
    /// Starts disconnected; call [`Driver::attach`] to look for the board.
    pub fn new(config: RigConfig, calibration: CalibrationTable) -> Self {
        Self::with_connector(config, calibration, Box::new(transport::connect))
    }

    pub fn with_connector(config: RigConfig, calibration: CalibrationTable, connector: Connector) -> Self {
        let limits = ActuatorLimits::new(&config.limits, &calibration);
        let actuators = ActuatorState::new(limits, &calibration, config.operating.pitch_idle);
        let model = TelemetryModel::new(calibration, config.rotor);
        Self {
            config,
            model,
            connector,
            link: None,
            physical: PhysicalState::default(),
            actuators,
            raw: RawFrame::default(),
            last_sample: None,
        }
    }

    /// Try to (re)open the link. Failure leaves the driver disconnected.
    pub fn attach(&mut self) -> Result<LinkStatus, ConnectError> {
        if self.link.is_some() {
            return Ok(self.status());
        }
        match (self.connector)(&self.config.link) {
            Ok(handle) => {
                self.install(handle);
                Ok(self.status())
            }
            Err(e) => {
                warn!("[Driver] no rig: {}", e);
                Err(e)
            }
        }
    }

    /// Use an already open byte stream, replacing any current link.
    pub fn attach_link(&mut self, link: Box<dyn RigLink>) -> LinkStatus {
        self.install(LinkHandle::new(link));
        self.status()
    }

    fn install(&mut self, handle: LinkHandle) {
        info!("[Driver] attached to {}", handle.name());
        self.link = Some(handle);
        // Time spent disconnected is not a model step.
        self.last_sample = None;
    }

    pub fn status(&self) -> LinkStatus {
        match &self.link {
            Some(handle) if handle.is_open() => LinkStatus::Connected { port: handle.name().to_string() },
            _ => LinkStatus::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Request and process one frame.
    pub fn receive(&mut self) -> Result<LinkStatus, ProtocolSequenceError> {
        let Some(handle) = self.link.as_mut() else {
            return Ok(LinkStatus::Disconnected);
        };
        match handle.request_frame() {
            Ok(frame) => {
                let now = Instant::now();
                let dt = self.last_sample.map(|t| now.duration_since(t)).unwrap_or_default();
                self.physical = self.model.update(&self.physical, &frame, &self.actuators, dt);
                self.raw = frame;
                self.last_sample = Some(now);
                Ok(self.status())
            }
            Err(TransportError::Sequence(e)) => Err(e),
            Err(TransportError::Link(e)) => {
                self.drop_link(&e.to_string());
                Ok(LinkStatus::Disconnected)
            }
        }
    }

    /// Send the current actuator state in reply to the last frame.
    pub fn transmit(&mut self) -> Result<LinkStatus, ProtocolSequenceError> {
        let Some(handle) = self.link.as_mut() else {
            return Ok(LinkStatus::Disconnected);
        };
        match handle.send_actuators(&self.actuators) {
            Ok(()) => Ok(self.status()),
            Err(TransportError::Sequence(e)) => Err(e),
            Err(TransportError::Link(e)) => {
                self.drop_link(&e.to_string());
                Ok(LinkStatus::Disconnected)
            }
        }
    }

    fn drop_link(&mut self, reason: &str) {
        if let Some(handle) = self.link.take() {
            warn!("[Driver] lost {}: {}; outputs frozen", handle.name(), reason);
        }
    }

    /// Final neutral command, then release the link whatever happens.
    pub fn shutdown(&mut self) {
        if self.link.is_none() {
            return;
        }
        // A frame may already be pending; the reply below answers it either way.
        if let Err(e) = self.receive() {
            debug!("[Driver] shutdown receive: {}", e);
        }
        self.set_neutral();
        match self.transmit() {
            Ok(LinkStatus::Connected { .. }) => info!("[Driver] neutral command sent"),
            Ok(LinkStatus::Disconnected) => warn!("[Driver] link gone before neutral command"),
            Err(e) => warn!("[Driver] neutral command not sent: {}", e),
        }
        if let Some(mut handle) = self.link.take() {
            handle.close();
        }
    }

    /// Fan off with a 0 wind setpoint, no braking, idle pitch. The LED keeps its state.
    pub fn set_neutral(&mut self) {
        let pitch_idle = self.config.operating.pitch_idle;
        self.actuators.stop_fan();
        self.actuators.set_torque_level(0.0);
        self.actuators.set_pitch(self.model.calibration(), pitch_idle);
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn calibration(&self) -> &CalibrationTable {
        self.model.calibration()
    }

    pub fn physical(&self) -> &PhysicalState {
        &self.physical
    }

    pub fn actuators(&self) -> &ActuatorState {
        &self.actuators
    }

    pub fn raw_frame(&self) -> &RawFrame {
        &self.raw
    }

    pub fn set_wind_speed(&mut self, wind: f64) -> Clamped<f64> {
        self.actuators.set_wind_speed(self.model.calibration(), wind)
    }

    pub fn set_fan_pwm(&mut self, pwm: f64) -> Clamped<u8> {
        self.actuators.set_fan_pwm(pwm)
    }

    pub fn set_pitch(&mut self, pitch_deg: f64) -> Clamped<f64> {
        self.actuators.set_pitch(self.model.calibration(), pitch_deg)
    }

    pub fn set_torque_level(&mut self, level: f64) -> Clamped<i32> {
        self.actuators.set_torque_level(level)
    }

    /// Torque target in mNm at the current turbine speed; `None` while the rotor stands still.
    pub fn set_torque(&mut self, torque: f64) -> Option<Clamped<i32>> {
        let rpm = self.physical.rotation_rpm;
        self.actuators.set_torque(self.model.calibration(), torque, rpm)
    }

    pub fn set_led(&mut self, on: bool) {
        self.actuators.set_led(on);
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("status", &self.status())
            .field("actuators", &self.actuators)
            .finish_non_exhaustive()
    }
}
