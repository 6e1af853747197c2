//! Logical clock: conversions between ticks, steps, beats, bars and seconds.
//!
//! Pure arithmetic over the current tempo and time signature. Positions are
//! integer ticks so that position tracking never accumulates float drift;
//! seconds are only derived on demand.

use crate::error::ConfigError;

/// Default resolution in pulses (ticks) per quarter note.
pub const DEFAULT_PPQ: u32 = 96;

/// Tempos outside this range are accepted but logged.
pub const SANE_BPM_RANGE: (f64, f64) = (20.0, 300.0);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    pub bpm: f64,
    pub beats_per_bar: u32,
    /// Steps per beat (4 = sixteenth-note steps).
    pub subdivision: u32,
}

impl Default for Tempo {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            beats_per_bar: 4,
            subdivision: 4,
        }
    }
}

/// Outcome of an accepted tempo change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BpmCheck {
    InRange,
    /// Usable, but outside [`SANE_BPM_RANGE`].
    OutOfRange,
}

/// A tick decomposed into musical units (all 0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicalPosition {
    pub bar: u64,
    pub beat: u32,
    pub step: u32,
    pub tick_in_step: u64,
}

#[derive(Debug, Clone)]
pub struct LogicalClock {
    ppq: u32,
    tempo: Tempo,
    ticks_per_step: u64,
    ticks_per_bar: u64,
    seconds_per_tick: f64,
}

impl LogicalClock {
    pub fn new(ppq: u32, tempo: Tempo) -> Result<Self, ConfigError> {
        validate_bpm(tempo.bpm)?;
        validate_resolution(ppq, tempo.beats_per_bar, tempo.subdivision)?;
        let mut clock = Self {
            ppq,
            tempo,
            ticks_per_step: 0,
            ticks_per_bar: 0,
            seconds_per_tick: 0.0,
        };
        clock.recalculate();
        Ok(clock)
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn bpm(&self) -> f64 {
        self.tempo.bpm
    }

    pub fn ppq(&self) -> u32 {
        self.ppq
    }

    /// Change the tempo. Derived constants are recomputed immediately; callers
    /// holding wall-clock references must re-anchor them.
    pub fn set_bpm(&mut self, bpm: f64) -> Result<BpmCheck, ConfigError> {
        validate_bpm(bpm)?;
        self.tempo.bpm = bpm;
        self.recalculate();
        if bpm < SANE_BPM_RANGE.0 || bpm > SANE_BPM_RANGE.1 {
            log::warn!(target: "transport", "bpm {} is outside the usual {}-{} range", bpm, SANE_BPM_RANGE.0, SANE_BPM_RANGE.1);
            Ok(BpmCheck::OutOfRange)
        } else {
            Ok(BpmCheck::InRange)
        }
    }

    pub fn set_time_signature(&mut self, beats_per_bar: u32, subdivision: u32) -> Result<(), ConfigError> {
        validate_resolution(self.ppq, beats_per_bar, subdivision)?;
        self.tempo.beats_per_bar = beats_per_bar;
        self.tempo.subdivision = subdivision;
        self.recalculate();
        Ok(())
    }

    fn recalculate(&mut self) {
        self.ticks_per_step = (self.ppq / self.tempo.subdivision) as u64;
        self.ticks_per_bar = self.ppq as u64 * self.tempo.beats_per_bar as u64;
        self.seconds_per_tick = (60.0 / self.tempo.bpm) / self.ppq as f64;
    }

    pub fn ticks_per_step(&self) -> u64 {
        self.ticks_per_step
    }

    pub fn ticks_per_beat(&self) -> u64 {
        self.ppq as u64
    }

    pub fn ticks_per_bar(&self) -> u64 {
        self.ticks_per_bar
    }

    pub fn seconds_per_tick(&self) -> f64 {
        self.seconds_per_tick
    }

    pub fn seconds_per_step(&self) -> f64 {
        self.ticks_per_step as f64 * self.seconds_per_tick
    }

    pub fn ticks_to_seconds(&self, ticks: u64) -> f64 {
        ticks as f64 * self.seconds_per_tick
    }

    /// Fractional ticks elapsed in `secs`.
    pub fn seconds_to_ticks(&self, secs: f64) -> f64 {
        secs / self.seconds_per_tick
    }

    pub fn steps_to_seconds(&self, steps: f64) -> f64 {
        steps * self.ticks_per_step as f64 * self.seconds_per_tick
    }

    pub fn ticks_to_steps(&self, ticks: u64) -> f64 {
        ticks as f64 / self.ticks_per_step as f64
    }

    /// Nearest tick for a (possibly fractional) step. Negative or non-finite
    /// input maps to tick 0.
    pub fn steps_to_ticks(&self, steps: f64) -> u64 {
        if !steps.is_finite() || steps <= 0.0 {
            return 0;
        }
        (steps * self.ticks_per_step as f64).round() as u64
    }

    pub fn position_of(&self, tick: u64) -> MusicalPosition {
        let bar = tick / self.ticks_per_bar;
        let in_bar = tick % self.ticks_per_bar;
        let beat = (in_bar / self.ppq as u64) as u32;
        let in_beat = in_bar % self.ppq as u64;
        MusicalPosition {
            bar,
            beat,
            step: (in_beat / self.ticks_per_step) as u32,
            tick_in_step: in_beat % self.ticks_per_step,
        }
    }
}

fn validate_bpm(bpm: f64) -> Result<(), ConfigError> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidBpm(bpm))
    }
}

fn validate_resolution(ppq: u32, beats_per_bar: u32, subdivision: u32) -> Result<(), ConfigError> {
    if ppq == 0 || beats_per_bar == 0 || subdivision == 0 || ppq % subdivision != 0 {
        return Err(ConfigError::InvalidResolution);
    }
    Ok(())
}
