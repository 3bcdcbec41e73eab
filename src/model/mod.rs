
// Physical/aerodynamic state estimation from raw samples.
pub mod telemetry;
