//! Per-phase timing of the simulation task.
//!
//! The manager times each phase of a frame (per-actor kernels, couplings,
//! inter-actor contact, sleep arbitration) when profiling is on. Building
//! with the `profile` feature turns it on for every new manager:
//! ```bash
//! cargo bench --features profile
//! ```

use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// Accumulated timing of one phase.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PhaseStats {
    pub total_time: Duration,
    pub call_count: u64,
    pub min_time: Option<Duration>,
    pub max_time: Option<Duration>,
}

impl PhaseStats {
    pub fn avg_time(&self) -> Duration {
        if self.call_count == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(self.total_time.as_secs_f64() / self.call_count as f64)
        }
    }

    fn add(&mut self, elapsed: Duration) {
        self.total_time += elapsed;
        self.call_count += 1;
        self.min_time = Some(self.min_time.map_or(elapsed, |m| m.min(elapsed)));
        self.max_time = Some(self.max_time.map_or(elapsed, |m| m.max(elapsed)));
    }
}

#[derive(Debug, Default, Clone)]
pub struct Profiler {
    phases: HashMap<&'static str, PhaseStats>,
    frames: u64,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, phase: &'static str, elapsed: Duration) {
        self.phases.entry(phase).or_default().add(elapsed);
    }

    pub fn end_frame(&mut self) {
        self.frames += 1;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseStats> {
        self.phases.get(name)
    }

    /// Phases sorted by total time, slowest first.
    pub fn ranked(&self) -> Vec<(&'static str, &PhaseStats)> {
        let mut phases: Vec<_> = self.phases.iter().map(|(k, v)| (*k, v)).collect();
        phases.sort_by(|a, b| b.1.total_time.cmp(&a.1.total_time));
        phases
    }

    /// Log one line per phase.
    pub fn log_summary(&self) {
        let total: Duration = self.phases.values().map(|s| s.total_time).sum();
        for (name, stats) in self.ranked() {
            let share = if total.is_zero() {
                0.0
            } else {
                stats.total_time.as_secs_f64() / total.as_secs_f64() * 100.0
            };
            info!(
                phase = name,
                calls = stats.call_count,
                avg_us = stats.avg_time().as_micros() as u64,
                max_us = stats.max_time.unwrap_or_default().as_micros() as u64,
                share = format!("{share:.1}%"),
                "simulation phase timing"
            );
        }
        info!(frames = self.frames, total_ms = total.as_millis() as u64, "profiled frames");
    }

    pub fn reset(&mut self) {
        self.phases.clear();
        self.frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_stats_accumulate() {
        let mut profiler = Profiler::new();
        profiler.record("actors", Duration::from_micros(300));
        profiler.record("actors", Duration::from_micros(100));
        profiler.record("contacts", Duration::from_micros(50));
        profiler.end_frame();

        let actors = profiler.phase("actors").unwrap();
        assert_eq!(actors.call_count, 2);
        assert_eq!(actors.avg_time().as_micros(), 200);
        assert_eq!(actors.min_time, Some(Duration::from_micros(100)));
        assert_eq!(actors.max_time, Some(Duration::from_micros(300)));
        assert_eq!(profiler.ranked()[0].0, "actors");
        assert_eq!(profiler.frames(), 1);

        profiler.reset();
        assert!(profiler.phase("actors").is_none());
    }

    #[test]
    fn test_avg_time_past_u32_calls() {
        let stats = PhaseStats {
            total_time: Duration::from_secs(10),
            call_count: u64::from(u32::MAX) + 1,
            ..Default::default()
        };
        assert_eq!(stats.avg_time().as_nanos(), 2);
        assert_eq!(PhaseStats::default().avg_time(), Duration::ZERO);
    }
}
