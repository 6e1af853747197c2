//! What the transport plays: patterns of step-positioned notes and mixer
//! automation, and an arrangement that places patterns on a song timeline.

use std::collections::BTreeMap;

use dawg_types::{InsertId, InstrumentId, MixerParam};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(u32);

impl PatternId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for PatternId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A note at a (possibly fractional) step offset, lasting `length` steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub instrument: InstrumentId,
    pub pitch: u8,
    pub velocity: f32,
    pub step: f64,
    pub length: f64,
}

impl Note {
    pub fn new(instrument: InstrumentId, pitch: u8, step: f64, length: f64) -> Self {
        Self { instrument, pitch: pitch.min(127), velocity: 0.8, step, length }
    }

    pub fn with_velocity(mut self, velocity: f32) -> Self {
        self.velocity = velocity.clamp(0.0, 1.0);
        self
    }

    /// Playable: finite, non-negative position and a positive length.
    pub fn is_valid(&self) -> bool {
        self.step.is_finite() && self.step >= 0.0 && self.length.is_finite() && self.length > 0.0
    }
}

/// A mixer parameter set to `value` when the transport reaches `step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationPoint {
    pub step: f64,
    pub insert: InsertId,
    pub param: MixerParam,
    pub value: f32,
}

impl AutomationPoint {
    pub fn new(step: f64, insert: InsertId, param: MixerParam, value: f32) -> Self {
        Self { step, insert, param, value }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub name: String,
    pub length_steps: u32,
    pub notes: Vec<Note>,
    #[serde(default)]
    pub automation: Vec<AutomationPoint>,
}

impl Pattern {
    pub fn new(id: PatternId, name: &str, length_steps: u32) -> Self {
        Self {
            id,
            name: name.to_string(),
            length_steps: length_steps.max(1),
            notes: Vec::new(),
            automation: Vec::new(),
        }
    }

    pub fn add_note(&mut self, note: Note) {
        self.notes.push(note);
    }

    pub fn add_automation(&mut self, point: AutomationPoint) {
        self.automation.push(point);
    }

    /// Automation points inside the pattern, ordered by step. Points on the
    /// same step keep insertion order.
    pub fn playable_automation(&self) -> Vec<AutomationPoint> {
        let mut points: Vec<AutomationPoint> = self
            .automation
            .iter()
            .filter(|a| a.step.is_finite() && a.step >= 0.0 && a.step < self.length_steps as f64)
            .cloned()
            .collect();
        points.sort_by(|a, b| a.step.total_cmp(&b.step));
        points
    }

    /// Notes that start inside the pattern, ordered by step.
    pub fn playable_notes(&self) -> Vec<Note> {
        let mut notes: Vec<Note> = self
            .notes
            .iter()
            .filter(|n| n.is_valid() && n.step < self.length_steps as f64)
            .cloned()
            .collect();
        notes.sort_by(|a, b| a.step.total_cmp(&b.step));
        notes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clip {
    pub pattern: PatternId,
    pub start_step: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arrangement {
    pub clips: Vec<Clip>,
}

impl Arrangement {
    pub fn place(&mut self, pattern: PatternId, start_step: u32) {
        self.clips.push(Clip { pattern, start_step });
    }

    /// Song length in steps: the end of the last clip.
    pub fn length_steps(&self, patterns: &BTreeMap<PatternId, Pattern>) -> u32 {
        self.clips
            .iter()
            .filter_map(|c| patterns.get(&c.pattern).map(|p| c.start_step.saturating_add(p.length_steps)))
            .max()
            .unwrap_or(0)
    }

    /// Every clip's notes at absolute song steps, ordered by step.
    /// Clips naming unknown patterns contribute nothing.
    pub fn flatten(&self, patterns: &BTreeMap<PatternId, Pattern>) -> Vec<Note> {
        let mut notes: Vec<Note> = self
            .clips
            .iter()
            .filter_map(|clip| patterns.get(&clip.pattern).map(|p| (clip, p)))
            .flat_map(|(clip, pattern)| {
                pattern.playable_notes().into_iter().map(move |mut note| {
                    note.step += clip.start_step as f64;
                    note
                })
            })
            .collect();
        notes.sort_by(|a, b| a.step.total_cmp(&b.step));
        notes
    }

    /// Every clip's automation at absolute song steps, ordered by step.
    pub fn flatten_automation(&self, patterns: &BTreeMap<PatternId, Pattern>) -> Vec<AutomationPoint> {
        let mut points: Vec<AutomationPoint> = self
            .clips
            .iter()
            .filter_map(|clip| patterns.get(&clip.pattern).map(|p| (clip, p)))
            .flat_map(|(clip, pattern)| {
                pattern.playable_automation().into_iter().map(move |mut point| {
                    point.step += clip.start_step as f64;
                    point
                })
            })
            .collect();
        points.sort_by(|a, b| a.step.total_cmp(&b.step));
        points
    }
}
