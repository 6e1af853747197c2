//! Central auto-sleep monitor for all inserts.
//!
//! An insert whose output stays below the sleep threshold for the silence
//! window gets its effect stack detached; it wakes as soon as its input rises
//! above the (higher) wake threshold. One poll covers every insert.

use std::collections::BTreeMap;

use dawg_types::InsertId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SleepSettings {
    pub enabled: bool,
    pub sleep_threshold_db: f32,
    pub wake_threshold_db: f32,
    pub silence_secs: f64,
    pub poll_secs: f64,
}

impl Default for SleepSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sleep_threshold_db: -70.0,
            wake_threshold_db: -60.0,
            silence_secs: 2.0,
            poll_secs: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepAction {
    Sleep(InsertId),
    Wake(InsertId),
}

/// Peak level in dBFS, floored at -120.
pub fn linear_to_db(peak: f32) -> f32 {
    if !peak.is_finite() || peak <= 1e-6 {
        -120.0
    } else {
        20.0 * peak.log10()
    }
}

#[derive(Debug, Clone, Copy)]
struct Track {
    input_db: f32,
    quiet_since: Option<f64>,
    asleep: bool,
}

pub struct AutoSleepMonitor {
    settings: SleepSettings,
    tracks: BTreeMap<InsertId, Track>,
    last_poll: Option<f64>,
}

impl AutoSleepMonitor {
    pub fn new(settings: SleepSettings) -> Self {
        Self { settings, tracks: BTreeMap::new(), last_poll: None }
    }

    pub fn settings(&self) -> SleepSettings {
        self.settings
    }

    /// Feed one meter reading (linear peaks).
    pub fn record(&mut self, insert: InsertId, input_peak: f32, output_peak: f32, now: f64) {
        let quiet = linear_to_db(output_peak) < self.settings.sleep_threshold_db;
        let track = self.tracks.entry(insert).or_insert(Track {
            input_db: -120.0,
            quiet_since: None,
            asleep: false,
        });
        track.input_db = linear_to_db(input_peak);
        if quiet {
            track.quiet_since.get_or_insert(now);
        } else {
            track.quiet_since = None;
        }
    }

    pub fn forget(&mut self, insert: InsertId) {
        self.tracks.remove(&insert);
    }

    pub fn is_asleep(&self, insert: InsertId) -> bool {
        self.tracks.get(&insert).is_some_and(|t| t.asleep)
    }

    /// Evaluate every tracked insert, at most once per poll interval.
    pub fn poll(&mut self, now: f64) -> Vec<SleepAction> {
        if !self.settings.enabled {
            return Vec::new();
        }
        if self.last_poll.is_some_and(|last| now - last < self.settings.poll_secs) {
            return Vec::new();
        }
        self.last_poll = Some(now);

        let settings = self.settings;
        let mut actions = Vec::new();
        for (id, track) in self.tracks.iter_mut() {
            if track.asleep {
                if track.input_db > settings.wake_threshold_db {
                    track.asleep = false;
                    track.quiet_since = None;
                    actions.push(SleepAction::Wake(*id));
                }
            } else if track.quiet_since.is_some_and(|since| now - since >= settings.silence_secs) {
                track.asleep = true;
                actions.push(SleepAction::Sleep(*id));
            }
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> AutoSleepMonitor {
        AutoSleepMonitor::new(SleepSettings::default())
    }

    #[test]
    fn db_conversion() {
        assert!((linear_to_db(1.0)).abs() < 1e-6);
        assert!((linear_to_db(0.1) + 20.0).abs() < 1e-4);
        assert_eq!(linear_to_db(0.0), -120.0);
    }

    #[test]
    fn sleeps_after_sustained_silence() {
        let mut m = monitor();
        let id = InsertId::new(1);
        m.record(id, 0.0, 0.0, 0.0);
        assert!(m.poll(1.0).is_empty());
        m.record(id, 0.0, 0.0, 1.5);
        assert_eq!(m.poll(2.0), vec![SleepAction::Sleep(id)]);
        assert!(m.is_asleep(id));
        // Already asleep: nothing more to do.
        assert!(m.poll(3.0).is_empty());
    }

    #[test]
    fn noise_resets_silence_window() {
        let mut m = monitor();
        let id = InsertId::new(1);
        m.record(id, 0.0, 0.0, 0.0);
        m.record(id, 0.5, 0.5, 1.0);
        m.record(id, 0.0, 0.0, 1.5);
        assert!(m.poll(2.5).is_empty());
        assert_eq!(m.poll(3.5), vec![SleepAction::Sleep(id)]);
    }

    #[test]
    fn wake_uses_higher_threshold() {
        let mut m = monitor();
        let id = InsertId::new(1);
        m.record(id, 0.0, 0.0, 0.0);
        m.poll(2.0);
        assert!(m.is_asleep(id));

        // -65 dB: above the sleep threshold but below the wake threshold.
        let between = 10f32.powf(-65.0 / 20.0);
        m.record(id, between, between, 2.1);
        assert!(m.poll(2.5).is_empty());

        m.record(id, 0.01, 0.01, 2.6);
        assert_eq!(m.poll(3.0), vec![SleepAction::Wake(id)]);
        assert!(!m.is_asleep(id));
    }

    #[test]
    fn polls_are_rate_limited_and_can_be_disabled() {
        let mut m = monitor();
        let id = InsertId::new(1);
        m.record(id, 0.0, 0.0, 0.0);
        assert!(m.poll(0.0).is_empty());
        assert!(m.poll(2.1).len() == 1);

        let mut off = AutoSleepMonitor::new(SleepSettings { enabled: false, ..SleepSettings::default() });
        off.record(id, 0.0, 0.0, 0.0);
        assert!(off.poll(10.0).is_empty());
    }
}
