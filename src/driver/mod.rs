// Owns the link and runs the fixed-cadence cycle.
pub mod link_driver;
pub mod control_loop;

pub use link_driver::{Connector, Driver, LinkStatus};
