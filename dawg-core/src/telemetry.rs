//! Control-loop health: what each engine poll did and how long it took
//! compared to the poll interval it has to fit in.

use std::time::Duration;

use crate::transport::PollReport;

/// One reporting window. Everything except `overruns` resets per window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySummary {
    pub polls: u64,
    pub avg_us: u32,
    pub max_us: u32,
    /// Polls that took longer than the poll interval, cumulative.
    pub overruns: u64,
    pub ticks: u64,
    /// Largest number of ticks one poll had to process.
    pub max_ticks: u64,
    pub wraps: u64,
    pub events_fired: u64,
    pub events_failed: u64,
}

#[derive(Debug, Default)]
pub struct PollTelemetry {
    window: TelemetrySummary,
    total_us: u64,
    overruns: u64,
}

impl PollTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, elapsed: Duration, budget: Duration, report: &PollReport) {
        let us = elapsed.as_micros().min(u32::MAX as u128) as u32;
        if elapsed > budget {
            self.overruns += 1;
            log::debug!(target: "engine", "poll took {}us, over the {}us interval", us, budget.as_micros());
        }
        let w = &mut self.window;
        w.polls += 1;
        w.max_us = w.max_us.max(us);
        w.ticks += report.ticks;
        w.max_ticks = w.max_ticks.max(report.ticks);
        w.wraps += report.wraps as u64;
        w.events_fired += report.fired as u64;
        w.events_failed += report.failed as u64;
        self.total_us += us as u64;
    }

    /// Close the current window and start a new one.
    pub fn take_summary(&mut self) -> TelemetrySummary {
        let mut summary = std::mem::take(&mut self.window);
        if summary.polls > 0 {
            summary.avg_us = (self.total_us / summary.polls) as u32;
        }
        summary.overruns = self.overruns;
        self.total_us = 0;
        summary
    }
}
