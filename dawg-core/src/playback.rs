//! Playback policy above the scheduler: which content plays, when it gets
//! (re)scheduled, and how note steps become audio-clock times.

use std::collections::BTreeMap;

use dawg_types::{InsertId, InstrumentId, MixerParam};

use crate::content::{Arrangement, AutomationPoint, Note, Pattern, PatternId};
use crate::event_queue::{EventCallback, EventPayload, EventQueue};
use crate::instrument::InstrumentRack;
use crate::transport::ScheduleView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayMode {
    #[default]
    Pattern,
    Song,
}

/// Receiver of fired note events.
pub trait NoteSink {
    fn play_note(&mut self, instrument: InstrumentId, pitch: u8, velocity: f32, time: f64, duration: f64)
        -> Result<(), String>;
    fn release_note(&mut self, instrument: InstrumentId, pitch: u8, time: f64) -> Result<(), String>;
}

impl NoteSink for InstrumentRack {
    fn play_note(
        &mut self,
        instrument: InstrumentId,
        pitch: u8,
        velocity: f32,
        time: f64,
        duration: f64,
    ) -> Result<(), String> {
        InstrumentRack::play_note(self, instrument, pitch, velocity, time, duration)
    }

    fn release_note(&mut self, instrument: InstrumentId, pitch: u8, time: f64) -> Result<(), String> {
        let inst = self
            .get_mut(instrument)
            .ok_or_else(|| format!("instrument {} not found", instrument))?;
        inst.release_note(pitch, time)
    }
}

/// Receiver of fired automation events.
pub trait ParamSink {
    fn apply_param(&mut self, insert: InsertId, param: &MixerParam, value: f32, time: f64) -> Result<(), String>;
}

/// Callback that hands a note payload to the context at its exact fire time.
pub fn note_callback<C: NoteSink + 'static>() -> EventCallback<C> {
    Box::new(|scope, payload| match payload {
        EventPayload::NoteOn { instrument, pitch, velocity, duration } => {
            scope.ctx.play_note(*instrument, *pitch, *velocity, scope.fire_time, *duration)
        }
        EventPayload::NoteOff { instrument, pitch } => scope.ctx.release_note(*instrument, *pitch, scope.fire_time),
        other => Err(format!("{} payload on a note callback", other.kind())),
    })
}

/// Callback that applies an automation payload when its time comes up.
pub fn param_callback<C: ParamSink + 'static>() -> EventCallback<C> {
    Box::new(|scope, payload| match payload {
        EventPayload::Param { insert, param, value } => scope.ctx.apply_param(*insert, param, *value, scope.fire_time),
        other => Err(format!("{} payload on a param callback", other.kind())),
    })
}

/// Trailing-edge debounce: each request pushes the deadline out again.
#[derive(Debug, Clone, Copy)]
pub struct Debouncer {
    window: f64,
    deadline: Option<f64>,
}

impl Debouncer {
    pub fn new(window: f64) -> Self {
        Self { window, deadline: None }
    }

    pub fn request(&mut self, now: f64) {
        self.deadline = Some(now + self.window);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// True once, when a pending request's window has elapsed.
    pub fn take_due(&mut self, now: f64) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub scheduled: usize,
    /// Already passed and pushed into the next loop iteration.
    pub deferred: usize,
    /// Already passed with looping off.
    pub dropped: usize,
}

pub struct PlaybackManager {
    mode: PlayMode,
    patterns: BTreeMap<PatternId, Pattern>,
    current_pattern: Option<PatternId>,
    arrangement: Arrangement,
    debounce: Debouncer,
    executions: u64,
}

impl PlaybackManager {
    pub fn new(debounce_secs: f64) -> Self {
        Self {
            mode: PlayMode::Pattern,
            patterns: BTreeMap::new(),
            current_pattern: None,
            arrangement: Arrangement::default(),
            debounce: Debouncer::new(debounce_secs),
            executions: 0,
        }
    }

    pub fn mode(&self) -> PlayMode {
        self.mode
    }

    /// Returns true if the mode changed.
    pub fn set_mode(&mut self, mode: PlayMode) -> bool {
        if self.mode == mode {
            return false;
        }
        log::debug!(target: "playback", "mode {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        true
    }

    // ── Content ──

    pub fn patterns(&self) -> &BTreeMap<PatternId, Pattern> {
        &self.patterns
    }

    pub fn current_pattern(&self) -> Option<PatternId> {
        self.current_pattern
    }

    pub fn arrangement(&self) -> &Arrangement {
        &self.arrangement
    }

    /// Add or replace a pattern. The first pattern added becomes current.
    pub fn add_pattern(&mut self, pattern: Pattern, now: f64) {
        self.current_pattern.get_or_insert(pattern.id);
        self.patterns.insert(pattern.id, pattern);
        self.request_reschedule(now);
    }

    pub fn remove_pattern(&mut self, id: PatternId, now: f64) -> Option<Pattern> {
        let removed = self.patterns.remove(&id)?;
        if self.current_pattern == Some(id) {
            self.current_pattern = self.patterns.keys().next().copied();
        }
        self.request_reschedule(now);
        Some(removed)
    }

    /// Returns false for an unknown pattern.
    pub fn select_pattern(&mut self, id: PatternId, now: f64) -> bool {
        if !self.patterns.contains_key(&id) {
            return false;
        }
        if self.current_pattern != Some(id) {
            self.current_pattern = Some(id);
            self.request_reschedule(now);
        }
        true
    }

    /// Apply an edit to a pattern and request a (debounced) reschedule.
    pub fn edit_pattern<F: FnOnce(&mut Pattern)>(&mut self, id: PatternId, now: f64, edit: F) -> bool {
        let Some(pattern) = self.patterns.get_mut(&id) else {
            return false;
        };
        edit(pattern);
        self.request_reschedule(now);
        true
    }

    pub fn set_arrangement(&mut self, arrangement: Arrangement, now: f64) {
        self.arrangement = arrangement;
        if self.mode == PlayMode::Song {
            self.request_reschedule(now);
        }
    }

    /// Notes for the current mode, at absolute steps.
    pub fn active_notes(&self) -> Vec<Note> {
        match self.mode {
            PlayMode::Pattern => self
                .current_pattern
                .and_then(|id| self.patterns.get(&id))
                .map(Pattern::playable_notes)
                .unwrap_or_default(),
            PlayMode::Song => self.arrangement.flatten(&self.patterns),
        }
    }

    /// Automation for the current mode, at absolute steps.
    pub fn active_automation(&self) -> Vec<AutomationPoint> {
        match self.mode {
            PlayMode::Pattern => self
                .current_pattern
                .and_then(|id| self.patterns.get(&id))
                .map(Pattern::playable_automation)
                .unwrap_or_default(),
            PlayMode::Song => self.arrangement.flatten_automation(&self.patterns),
        }
    }

    /// Loop region (in steps) that covers the current content, if any.
    pub fn content_range_steps(&self) -> Option<(u32, u32)> {
        let end = match self.mode {
            PlayMode::Pattern => self
                .current_pattern
                .and_then(|id| self.patterns.get(&id))
                .map(|p| p.length_steps)?,
            PlayMode::Song => self.arrangement.length_steps(&self.patterns),
        };
        (end > 0).then_some((0, end))
    }

    // ── Rescheduling ──

    pub fn request_reschedule(&mut self, now: f64) {
        self.debounce.request(now);
    }

    pub fn reschedule_pending(&self) -> bool {
        self.debounce.is_pending()
    }

    /// True once the debounce window of the latest request has passed.
    pub fn take_due_reschedule(&mut self, now: f64) -> bool {
        self.debounce.take_due(now)
    }

    /// Number of reschedule passes executed (debounced or forced).
    pub fn executions(&self) -> u64 {
        self.executions
    }

    /// Void the queue and schedule the current iteration now. Any pending
    /// debounced request is satisfied by this pass and cancelled.
    pub fn reschedule<C: NoteSink + ParamSink + 'static>(
        &mut self,
        queue: &mut EventQueue<C>,
        view: &ScheduleView<'_>,
    ) -> ScheduleSummary {
        self.debounce.cancel();
        self.executions += 1;
        queue.clear_all();
        let summary = self.schedule_iteration(queue, view);
        log::debug!(
            target: "playback",
            "reschedule #{}: {} scheduled, {} deferred, {} dropped",
            self.executions,
            summary.scheduled,
            summary.deferred,
            summary.dropped
        );
        summary
    }

    /// Queue every note and automation point of the current iteration,
    /// timed relative to the iteration start. Events before the scheduler's
    /// frontier have passed: with looping they move one loop length later,
    /// otherwise they are dropped. While looping, events outside the loop
    /// region never play.
    pub fn schedule_iteration<C: NoteSink + ParamSink + 'static>(
        &self,
        queue: &mut EventQueue<C>,
        view: &ScheduleView<'_>,
    ) -> ScheduleSummary {
        let mut summary = ScheduleSummary::default();
        let clock = view.clock;

        for note in self.active_notes() {
            let Some(time) = place(view, clock.steps_to_ticks(note.step), &mut summary) else {
                continue;
            };
            let payload = EventPayload::NoteOn {
                instrument: note.instrument,
                pitch: note.pitch,
                velocity: note.velocity,
                duration: clock.steps_to_seconds(note.length),
            };
            match queue.schedule(time, note_callback(), payload) {
                Ok(_) => summary.scheduled += 1,
                Err(e) => log::warn!(target: "playback", "note {} for instrument {} not scheduled: {}", note.pitch, note.instrument, e),
            }
        }

        for point in self.active_automation() {
            let Some(time) = place(view, clock.steps_to_ticks(point.step), &mut summary) else {
                continue;
            };
            let payload = EventPayload::Param { insert: point.insert, param: point.param, value: point.value };
            match queue.schedule(time, param_callback(), payload) {
                Ok(_) => summary.scheduled += 1,
                Err(e) => log::warn!(target: "playback", "automation for insert {} not scheduled: {}", point.insert, e),
            }
        }
        summary
    }
}

/// Fire time for content at `tick` in this iteration, or None if it does
/// not play.
fn place(view: &ScheduleView<'_>, tick: u64, summary: &mut ScheduleSummary) -> Option<f64> {
    let region = view.loop_region;
    let mut time = view.time_of(tick);
    if region.enabled {
        if !region.contains(tick) {
            return None;
        }
        if tick < view.anchor.tick {
            time += view.clock.ticks_to_seconds(region.length_ticks());
            summary.deferred += 1;
        }
    } else if tick < view.anchor.tick {
        summary.dropped += 1;
        return None;
    }
    Some(time)
}
