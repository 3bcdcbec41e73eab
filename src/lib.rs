//! Host-side driver for the MicroWind miniature wind-turbine rig.
//!
//! Per cycle: request a frame from the board, turn raw counts into a
//! physical/aerodynamic state, let a controller (or the operator) set the
//! actuators, clamp, send them back.

pub mod config;
pub mod errors;
pub mod rig;
pub mod model;
pub mod control;
pub mod driver;
pub mod utils;
