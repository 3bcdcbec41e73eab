
// Rig side: everything that knows about the microcontroller's counts,
// bytes and actuator envelope.
pub mod interpolation;
pub mod calibration;
pub mod frame;
pub mod actuator;
pub mod transport;
pub mod simulated;
