
// Turbine controllers and fan setpoint generators.
pub mod controller;
pub mod pitch_pid;
pub mod wind;
