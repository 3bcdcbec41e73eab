//! wind.rs
//! Wind speed setpoint generators for the fan.
//!
//! - WindProfile: time-indexed setpoints played back from a text file.
//! - RandomWind: slow ramps between random targets.

use log::debug;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::VecDeque,
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
    time::Duration,
};

use crate::errors::WindProfileError;

/// Free-text lines at the top of a profile file (name, author, notes...).
pub const PROFILE_HEADER_LINES: usize = 8;

/// Recorded setpoints, consumed in order as run time passes.
///
/// Rows are `time_s, wind_speed`. Each row takes effect once the elapsed
/// time passes its timestamp; after the last row the profile yields 0.
#[derive(Debug, Clone, Default)]
pub struct WindProfile {
    pending: VecDeque<(f64, f64)>,
    setpoint: f64,
}

impl WindProfile {
    pub fn load(path: &Path) -> Result<Self, WindProfileError> {
        Self::from_reader(File::open(path)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, WindProfileError> {
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        for _ in 0..PROFILE_HEADER_LINES {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Err(WindProfileError::TruncatedHeader { expected: PROFILE_HEADER_LINES });
            }
        }

        let mut rows = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let pending = rows
            .deserialize::<(f64, f64)>()
            .collect::<Result<VecDeque<_>, _>>()?;
        debug!("[Wind] profile with {} setpoints", pending.len());

        Ok(Self { pending, setpoint: 0.0 })
    }

    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Self {
        Self { pending: points.into_iter().collect(), setpoint: 0.0 }
    }

    /// Setpoint for the given run time. Advances at most one row per call.
    pub fn speed_at(&mut self, elapsed: Duration) -> f64 {
        match self.pending.front() {
            Some(&(time, speed)) => {
                if elapsed.as_secs_f64() > time {
                    self.setpoint = speed;
                    self.pending.pop_front();
                }
            }
            None => self.setpoint = 0.0,
        }
        self.setpoint
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_finished(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop everything not yet played.
    pub fn stop(&mut self) {
        self.pending.clear();
    }
}

#[derive(Debug, Clone)]
pub struct RandomWind {
    rng: StdRng,
    /// Ramp step per call, m/s.
    step: f64,
    /// Lowest random target, m/s.
    v_min: f64,
    setpoint: f64,
    target: f64,
}

impl RandomWind {
    pub const STEP: f64 = 0.01;
    pub const V_MIN: f64 = 0.8;

    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            step: Self::STEP,
            v_min: Self::V_MIN,
            setpoint: 0.0,
            target: 0.0,
        }
    }

    pub fn from_entropy() -> Self {
        Self::new(rand::random())
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    /// Next setpoint. A new target in `[v_min, v_max]` (0.01 m/s grid) is
    /// drawn once the measured wind `v_measured` has reached the current one.
    pub fn next(&mut self, v_measured: f64, v_max: f64) -> f64 {
        let lo = (self.v_min * 100.0).round() as i64;
        let hi = ((v_max * 100.0) as i64).max(lo);
        if (v_measured - self.target).abs() < self.step {
            self.target = self.rng.random_range(lo..=hi) as f64 / 100.0;
            debug!("[Wind] new random target {:.2} m/s", self.target);
        }
        if self.setpoint < self.target {
            self.setpoint += self.step;
        } else if self.setpoint > self.target {
            self.setpoint -= self.step;
        }
        self.setpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const PROFILE: &str = "\
# gusty
# author: lab
#
#
#
#
#
time, speed
1.0, 2.0
2.5, 3.5
4.0, 1.2
";

    #[test]
    fn parses_rows_after_header() {
        let profile = WindProfile::from_reader(PROFILE.as_bytes()).unwrap();
        assert_eq!(profile.remaining(), 3);
    }

    #[test]
    fn plays_back_in_time_order() {
        let mut p = WindProfile::from_reader(PROFILE.as_bytes()).unwrap();
        assert_eq!(p.speed_at(Duration::from_millis(500)), 0.0);
        assert_eq!(p.speed_at(Duration::from_millis(1100)), 2.0);
        assert_eq!(p.speed_at(Duration::from_millis(2000)), 2.0);
        assert_eq!(p.speed_at(Duration::from_millis(3000)), 3.5);
        assert_eq!(p.speed_at(Duration::from_millis(4100)), 1.2);
        assert!(p.is_finished());
        assert_eq!(p.speed_at(Duration::from_millis(4200)), 0.0);
    }

    #[test]
    fn late_start_catches_up_one_row_per_call() {
        let mut p = WindProfile::from_points([(0.0, 1.0), (0.1, 2.0), (0.2, 3.0)]);
        let t = Duration::from_secs(10);
        assert_eq!(p.speed_at(t), 1.0);
        assert_eq!(p.speed_at(t), 2.0);
        assert_eq!(p.speed_at(t), 3.0);
        assert_eq!(p.speed_at(t), 0.0);
    }

    #[test]
    fn short_header_is_rejected() {
        let err = WindProfile::from_reader("a\nb\n".as_bytes()).unwrap_err();
        assert!(matches!(err, WindProfileError::TruncatedHeader { expected: 8 }));
    }

    #[test]
    fn malformed_row_is_rejected() {
        let text = format!("{}1.0, fast\n", "#\n".repeat(PROFILE_HEADER_LINES));
        assert!(matches!(WindProfile::from_reader(text.as_bytes()), Err(WindProfileError::Row(_))));
    }

    #[test]
    fn stop_zeroes_output() {
        let mut p = WindProfile::from_points([(0.0, 2.0), (100.0, 3.0)]);
        assert_eq!(p.speed_at(Duration::from_secs(1)), 2.0);
        p.stop();
        assert_eq!(p.speed_at(Duration::from_secs(2)), 0.0);
    }

    #[test]
    fn random_wind_ramps_toward_target_within_range() {
        let mut wind = RandomWind::new(7);
        let first = wind.next(0.0, 3.0);
        let target = wind.target();
        assert!((0.8..=3.0).contains(&target));
        assert_abs_diff_eq!(first, 0.01, epsilon = 1e-12);

        // Measured wind far from target: target is kept, setpoint keeps ramping.
        for _ in 0..9 {
            wind.next(0.0, 3.0);
        }
        assert_eq!(wind.target(), target);
        assert_abs_diff_eq!(wind.setpoint(), 0.1, epsilon = 1e-9);
    }

    #[test]
    fn random_wind_redraws_when_reached() {
        let mut wind = RandomWind::new(11);
        wind.next(0.0, 0.5);
        // Max below v_min collapses the range onto v_min.
        assert_abs_diff_eq!(wind.target(), 0.8, epsilon = 1e-12);
        wind.next(0.8, 0.5);
        assert_abs_diff_eq!(wind.target(), 0.8, epsilon = 1e-12);
    }

    #[test]
    fn random_wind_is_reproducible() {
        let run = |seed| {
            let mut w = RandomWind::new(seed);
            (0..500).map(|i| w.next(if i % 50 == 0 { w.target() } else { 0.0 }, 4.0)).collect::<Vec<_>>()
        };
        assert_eq!(run(3), run(3));
    }
}
