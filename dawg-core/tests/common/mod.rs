#![allow(dead_code)]
//! Test harness utilities for dawg-core integration tests.

use dawg_core::audio_clock::ManualClock;
use dawg_core::content::{Note, Pattern, PatternId};
use dawg_core::engine::{Engine, EngineSettings};
use dawg_core::link::AudioEndpoint;
use dawg_types::{AudioMsg, InstrumentId, InstrumentKind, Waveform};

/// Seconds per step at the default 120 bpm.
pub const STEP_SECS: f64 = 0.125;

/// An engine driven by a manual clock, with the renderer's end of the link.
pub struct Rig {
    pub engine: Engine,
    pub endpoint: AudioEndpoint,
    pub clock: ManualClock,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let clock = ManualClock::new();
        let (engine, endpoint) = Engine::new(settings, Box::new(clock.clone())).unwrap();
        Self { engine, endpoint, clock }
    }

    /// Advance the clock by `secs`, polling at the default 25 ms interval the
    /// way the engine thread would.
    pub fn run_for(&mut self, secs: f64) {
        let interval = self.engine.settings().poll_interval.as_secs_f64();
        let polls = (secs / interval).round() as usize;
        for _ in 0..polls {
            self.clock.advance(interval);
            self.engine.poll();
        }
    }

    /// Note-on messages the renderer has received so far.
    pub fn note_ons(&self) -> Vec<(InstrumentId, u8, f64)> {
        self.endpoint
            .notes
            .try_iter()
            .filter_map(|m| match m {
                AudioMsg::NoteOn { instrument, pitch, time, .. } => Some((instrument, pitch, time)),
                _ => None,
            })
            .collect()
    }
}

pub fn synth() -> InstrumentKind {
    InstrumentKind::Synth { waveform: Waveform::Saw, voices: 8 }
}

/// A pattern with one note every `every` steps.
pub fn pulse_pattern(id: u32, instrument: InstrumentId, length_steps: u32, every: u32) -> Pattern {
    let mut pattern = Pattern::new(PatternId::new(id), "Pulse", length_steps);
    for step in (0..length_steps).step_by(every as usize) {
        pattern.add_note(Note::new(instrument, 36, step as f64, 1.0));
    }
    pattern
}

pub fn approx(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance
}
