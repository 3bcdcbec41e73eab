//! The shipped data files load and agree with the built-in defaults.

use std::path::PathBuf;

use microwind_driver::{
    config::RigConfig,
    control::wind::WindProfile,
    rig::calibration::CalibrationTable,
};

fn data(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data").join(name)
}

#[test]
fn shipped_config_matches_defaults() {
    assert_eq!(RigConfig::load(&data("config.json")).unwrap(), RigConfig::default());
}

#[test]
fn shipped_calibration_matches_defaults() {
    let table = CalibrationTable::load(&data("calibration.json")).unwrap();
    let builtin = CalibrationTable::default();
    assert_eq!(table.level_max(), builtin.level_max());
    for raw in [150u16, 200, 230, 260] {
        assert!((table.anemometer_wind_speed(raw) - builtin.anemometer_wind_speed(raw)).abs() < 1e-9);
    }
    assert!((table.thrust_force(100) - 0.15267).abs() < 1e-4);
}

#[test]
fn shipped_profile_parses() {
    let profile = WindProfile::load(&data("wind_profile_gusts.txt")).unwrap();
    assert_eq!(profile.remaining(), 8);
}
