//! metrics.rs
//! Cycle timing and fault counters for the control loop.
//!
//! Owned by the loop thread; a copy of [`MetricsSummary`] rides along in
//! every published snapshot. Histories are bounded to the last 1000 cycles.

use std::{collections::VecDeque, fmt, time::Duration};

pub const MAX_POINTS: usize = 1_000;

/// Appends value to a history buffer; drops the oldest once full.
#[inline]
pub fn push_capped(buf: &mut VecDeque<f64>, val: f64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

/// Min, max and mean of a buffer; `None` when empty.
pub fn calculate_stats(data: &VecDeque<f64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }

    let count = data.len();
    let min = data.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().sum::<f64>() / count as f64;

    Some(Stats { min, max, mean, count })
}

#[derive(Debug, Default, Clone)]
pub struct CycleMetrics {
    /// Wall time between consecutive cycle starts, ms.
    pub period_ms: VecDeque<f64>,
    /// Time spent inside one cycle, ms.
    pub busy_ms: VecDeque<f64>,
    pub total_cycles: u64,
    /// Cycles that started after their deadline.
    pub overruns: u64,
    pub link_drops: u64,
    pub reconnects: u64,
    pub saturations: u64,
    pub overspeed_trips: u64,
}

impl CycleMetrics {
    pub fn record_cycle(&mut self, period: Duration, busy: Duration) {
        self.total_cycles += 1;
        push_capped(&mut self.period_ms, period.as_secs_f64() * 1e3);
        push_capped(&mut self.busy_ms, busy.as_secs_f64() * 1e3);
    }

    pub fn record_overrun(&mut self) {
        self.overruns += 1;
    }

    pub fn record_link_drop(&mut self) {
        self.link_drops += 1;
    }

    pub fn record_reconnect(&mut self) {
        self.reconnects += 1;
    }

    pub fn record_saturation(&mut self) {
        self.saturations += 1;
    }

    pub fn record_overspeed(&mut self) {
        self.overspeed_trips += 1;
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            period_ms: calculate_stats(&self.period_ms),
            busy_ms: calculate_stats(&self.busy_ms),
            total_cycles: self.total_cycles,
            overruns: self.overruns,
            link_drops: self.link_drops,
            reconnects: self.reconnects,
            saturations: self.saturations,
            overspeed_trips: self.overspeed_trips,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct MetricsSummary {
    pub period_ms: Option<Stats>,
    pub busy_ms: Option<Stats>,
    pub total_cycles: u64,
    pub overruns: u64,
    pub link_drops: u64,
    pub reconnects: u64,
    pub saturations: u64,
    pub overspeed_trips: u64,
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycles {}", self.total_cycles)?;
        if let Some(p) = self.period_ms {
            write!(f, " | period {:.1}/{:.1}/{:.1} ms", p.min, p.mean, p.max)?;
        }
        if let Some(b) = self.busy_ms {
            write!(f, " | busy max {:.2} ms", b.max)?;
        }
        write!(
            f,
            " | overruns {} | link drops {} | reconnects {} | clamps {} | overspeed {}",
            self.overruns, self.link_drops, self.reconnects, self.saturations, self.overspeed_trips
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_capped() {
        let mut buf = VecDeque::new();
        for i in 0..(MAX_POINTS + 10) {
            push_capped(&mut buf, i as f64);
        }
        assert_eq!(buf.len(), MAX_POINTS);
        assert_eq!(buf.front(), Some(&10.0));
    }

    #[test]
    fn stats_of_empty_and_filled() {
        assert!(calculate_stats(&VecDeque::new()).is_none());
        let s = calculate_stats(&VecDeque::from(vec![2.0, 4.0, 9.0])).unwrap();
        assert_eq!((s.min, s.max, s.mean, s.count), (2.0, 9.0, 5.0, 3));
    }

    #[test]
    fn summary_counts_events() {
        let mut m = CycleMetrics::default();
        m.record_cycle(Duration::from_millis(50), Duration::from_millis(2));
        m.record_cycle(Duration::from_millis(52), Duration::from_millis(3));
        m.record_overrun();
        m.record_link_drop();
        let s = m.summary();
        assert_eq!(s.total_cycles, 2);
        assert_eq!(s.overruns, 1);
        assert_eq!(s.link_drops, 1);
        assert!((s.period_ms.unwrap().mean - 51.0).abs() < 1e-9);
        assert!(s.to_string().contains("link drops 1"));
    }
}
