//! Engine: the explicitly constructed context that owns the scheduler, the
//! mixer graph, the instruments, the playback content and the audio link.
//!
//! Every public method reads the audio clock once and runs to completion on
//! the calling (control) thread. Transport intents never fail loudly: an
//! invalid transition is logged and ignored. Only rejected configuration
//! values come back as errors.

use std::time::{Duration, Instant};

use dawg_types::{
    AudioFeedback, AudioMsg, EffectId, EffectKind, InsertId, InstrumentId, InstrumentKind, MixerParam, NodeId,
    NodeKind, SubscriptionId, TransportEventKind, TransportState,
};

use crate::audio_clock::AudioClock;
use crate::clock::{BpmCheck, LogicalClock, Tempo, DEFAULT_PPQ};
use crate::content::{Arrangement, AutomationPoint, Pattern, PatternId};
use crate::error::{ConfigError, EngineError, MixerError};
use crate::event_queue::EventQueue;
use crate::events::Listener;
use crate::graph::{GraphBackend, VirtualGraph};
use crate::instrument::{InstrumentRack, LinkedInstrument};
use crate::link::{AudioEndpoint, AudioLink, FlushReport, LinkSettings};
use crate::mixer::{MixerGraph, MixerSettings, RouteOutcome, SleepSettings};
use crate::playback::{NoteSink, ParamSink, PlayMode, PlaybackManager};
use crate::telemetry::{PollTelemetry, TelemetrySummary};
use crate::transport::{LoopRegion, PollReport, Reanchor, ScheduleView, Scheduler, TransportHost};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub ppq: u32,
    pub tempo: Tempo,
    pub lookahead_secs: f64,
    pub poll_interval: Duration,
    /// Rate of `PositionUpdate` events; 0 disables them.
    pub ui_update_hz: f64,
    pub debounce_secs: f64,
    pub mixer: MixerSettings,
    pub auto_sleep: SleepSettings,
    pub link: LinkSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            ppq: DEFAULT_PPQ,
            tempo: Tempo::default(),
            lookahead_secs: 0.1,
            poll_interval: Duration::from_millis(25),
            ui_update_hz: 30.0,
            debounce_secs: 0.016,
            mixer: MixerSettings::default(),
            auto_sleep: SleepSettings::default(),
            link: LinkSettings::default(),
        }
    }
}

/// Everything scheduled callbacks may touch while the scheduler is polling.
pub struct Studio {
    rack: InstrumentRack,
    mixer: MixerGraph<VirtualGraph>,
    playback: PlaybackManager,
}

impl Studio {
    pub fn rack(&self) -> &InstrumentRack {
        &self.rack
    }

    pub fn mixer(&self) -> &MixerGraph<VirtualGraph> {
        &self.mixer
    }

    pub fn playback(&self) -> &PlaybackManager {
        &self.playback
    }
}

impl TransportHost for Studio {
    fn on_reanchor(&mut self, queue: &mut EventQueue<Self>, view: &ScheduleView<'_>, reason: Reanchor) {
        let summary = self.playback.schedule_iteration(queue, view);
        log::debug!(
            target: "playback",
            "{:?} at tick {}: {} notes scheduled",
            reason,
            view.anchor.tick,
            summary.scheduled
        );
    }
}

impl NoteSink for Studio {
    fn play_note(
        &mut self,
        instrument: InstrumentId,
        pitch: u8,
        velocity: f32,
        time: f64,
        duration: f64,
    ) -> Result<(), String> {
        NoteSink::play_note(&mut self.rack, instrument, pitch, velocity, time, duration)
    }

    fn release_note(&mut self, instrument: InstrumentId, pitch: u8, time: f64) -> Result<(), String> {
        NoteSink::release_note(&mut self.rack, instrument, pitch, time)
    }
}

impl ParamSink for Studio {
    fn apply_param(&mut self, insert: InsertId, param: &MixerParam, value: f32, time: f64) -> Result<(), String> {
        log::trace!(target: "mixer", "automation {} of insert {} -> {} at {:.4}s", param, insert, value, time);
        self.mixer.apply_param(insert, param, value).map_err(|e| e.to_string())
    }
}

pub struct Engine {
    scheduler: Scheduler<Studio>,
    studio: Studio,
    link: AudioLink,
    clock: Box<dyn AudioClock>,
    settings: EngineSettings,
    telemetry: PollTelemetry,
    last_telemetry_log: f64,
}

impl Engine {
    /// Build an engine and the renderer's end of its audio link.
    pub fn new(settings: EngineSettings, clock: Box<dyn AudioClock>) -> Result<(Self, AudioEndpoint), EngineError> {
        let logical = LogicalClock::new(settings.ppq, settings.tempo)?;
        let scheduler = Scheduler::new(logical, settings.lookahead_secs, settings.ui_update_hz);
        let mixer = MixerGraph::new(VirtualGraph::new(), settings.mixer, settings.auto_sleep)?;
        let (link, endpoint) = AudioLink::pair(settings.link);
        let now = clock.now();
        log::info!(
            target: "engine",
            "engine ready: {} bpm, {} ppq, lookahead {:.0} ms",
            settings.tempo.bpm,
            settings.ppq,
            settings.lookahead_secs * 1000.0
        );
        let engine = Self {
            scheduler,
            studio: Studio { rack: InstrumentRack::new(), mixer, playback: PlaybackManager::new(settings.debounce_secs) },
            link,
            clock,
            settings,
            telemetry: PollTelemetry::new(),
            last_telemetry_log: now,
        };
        Ok((engine, endpoint))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn scheduler(&self) -> &Scheduler<Studio> {
        &self.scheduler
    }

    pub fn studio(&self) -> &Studio {
        &self.studio
    }

    pub fn mixer(&self) -> &MixerGraph<VirtualGraph> {
        &self.studio.mixer
    }

    pub fn playback(&self) -> &PlaybackManager {
        &self.studio.playback
    }

    pub fn link(&self) -> &AudioLink {
        &self.link
    }

    // ── Transport ──

    pub fn state(&self) -> TransportState {
        self.scheduler.state()
    }

    pub fn bpm(&self) -> f64 {
        self.scheduler.clock().bpm()
    }

    pub fn loop_region(&self) -> LoopRegion {
        self.scheduler.loop_region()
    }

    /// Start playback. With a step, jump there first; otherwise continue
    /// from the current position (loop start after a stop, the paused
    /// position after a pause).
    pub fn play(&mut self, start_step: Option<f64>) {
        let now = self.clock.now();
        let from = match start_step.map(|step| self.step_to_tick(step)) {
            Some(Ok(tick)) => Some(tick),
            Some(Err(e)) => {
                log::warn!(target: "transport", "play: {}, starting from the current position", e);
                None
            }
            None => None,
        };

        if self.scheduler.is_playing() {
            match from {
                Some(tick) => self.seek_and_reschedule(now, tick),
                None => log::debug!(target: "transport", "play ignored: already playing"),
            }
            return;
        }
        match self.scheduler.start(now, from) {
            Ok(_) => self.force_reschedule(now),
            Err(e) => log::warn!(target: "transport", "play: {}", e),
        }
    }

    /// Stop and return to loop start. Pending events are voided and sounding
    /// notes are cut.
    pub fn stop(&mut self) {
        let now = self.clock.now();
        match self.scheduler.stop() {
            Ok(_) => {
                self.link.send_note(AudioMsg::AllNotesOff { time: now });
            }
            Err(e) => log::debug!(target: "transport", "stop: {}", e),
        }
    }

    /// Pause, keeping the audible position.
    pub fn pause(&mut self) {
        let now = self.clock.now();
        match self.scheduler.pause(now) {
            Ok(_) => {
                self.link.send_note(AudioMsg::AllNotesOff { time: now });
            }
            Err(e) => log::debug!(target: "transport", "pause: {}", e),
        }
    }

    pub fn resume(&mut self) {
        let now = self.clock.now();
        match self.scheduler.resume(now) {
            Ok(_) => self.force_reschedule(now),
            Err(e) => log::debug!(target: "transport", "resume: {}", e),
        }
    }

    pub fn jump_to_step(&mut self, step: f64) -> Result<(), ConfigError> {
        let tick = self.step_to_tick(step)?;
        let now = self.clock.now();
        self.seek_and_reschedule(now, tick);
        Ok(())
    }

    /// Audible position in steps. While playing this stays inside the loop.
    pub fn current_position(&self) -> f64 {
        self.scheduler.position_steps(self.clock.now())
    }

    pub fn set_bpm(&mut self, bpm: f64) -> Result<BpmCheck, ConfigError> {
        let now = self.clock.now();
        let check = self.scheduler.set_bpm(now, bpm)?;
        if self.scheduler.is_playing() {
            self.force_reschedule(now);
        }
        Ok(check)
    }

    /// Change the meter. Like a tempo change this pins the audible position
    /// and, while playing, reschedules from there.
    pub fn set_time_signature(&mut self, beats_per_bar: u32, subdivision: u32) -> Result<(), ConfigError> {
        let now = self.clock.now();
        self.scheduler.set_time_signature(now, beats_per_bar, subdivision)?;
        if self.scheduler.is_playing() {
            self.force_reschedule(now);
        }
        Ok(())
    }

    pub fn set_loop_points(&mut self, start_step: f64, end_step: f64) -> Result<(), ConfigError> {
        if !start_step.is_finite() || !end_step.is_finite() || start_step < 0.0 || end_step <= start_step {
            return Err(ConfigError::InvalidLoop { start: start_step, end: end_step });
        }
        let clock = self.scheduler.clock();
        let (start, end) = (clock.steps_to_ticks(start_step), clock.steps_to_ticks(end_step));
        self.scheduler.set_loop_points(start, end)?;
        if self.scheduler.is_playing() {
            self.force_reschedule(self.clock.now());
        }
        Ok(())
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) {
        if self.scheduler.loop_region().enabled == enabled {
            return;
        }
        self.scheduler.set_loop_enabled(enabled);
        if self.scheduler.is_playing() {
            self.force_reschedule(self.clock.now());
        }
    }

    pub fn subscribe(&mut self, kind: TransportEventKind, listener: Listener) -> SubscriptionId {
        self.scheduler.bus_mut().subscribe(kind, listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.scheduler.bus_mut().unsubscribe(id)
    }

    fn step_to_tick(&self, step: f64) -> Result<u64, ConfigError> {
        if !step.is_finite() || step < 0.0 {
            return Err(ConfigError::InvalidStep(step));
        }
        Ok(self.scheduler.clock().steps_to_ticks(step))
    }

    fn seek_and_reschedule(&mut self, now: f64, tick: u64) {
        self.scheduler.seek(now, tick);
        if self.scheduler.is_playing() {
            self.force_reschedule(now);
        }
    }

    fn force_reschedule(&mut self, now: f64) {
        let (queue, view) = self.scheduler.split_for_scheduling(now);
        self.studio.playback.reschedule(queue, &view);
    }

    // ── Content ──

    pub fn play_mode(&self) -> PlayMode {
        self.studio.playback.mode()
    }

    /// Switch between pattern and song playback without stopping. The loop
    /// is refitted to the new content and, while playing, the content is
    /// rescheduled in place.
    pub fn set_play_mode(&mut self, mode: PlayMode) {
        if !self.studio.playback.set_mode(mode) {
            return;
        }
        let now = self.clock.now();
        self.fit_loop_to_content(now);
        if self.scheduler.is_playing() {
            self.force_reschedule(now);
        }
    }

    /// Set the loop to span the current content. While playing, a position
    /// outside the new loop jumps to its start.
    pub fn fit_loop_to_content(&mut self, now: f64) {
        let Some((start, end)) = self.studio.playback.content_range_steps() else {
            return;
        };
        let clock = self.scheduler.clock();
        let (start_tick, end_tick) = (clock.steps_to_ticks(start as f64), clock.steps_to_ticks(end as f64));
        if let Err(e) = self.scheduler.set_loop_points(start_tick, end_tick) {
            log::warn!(target: "playback", "cannot fit loop to content: {}", e);
            return;
        }
        let region = self.scheduler.loop_region();
        let audible = self.scheduler.position_ticks(now).floor() as u64;
        if self.scheduler.is_playing() && region.enabled && !region.contains(audible) {
            log::debug!(target: "playback", "position {} outside new loop, jumping to {}", audible, start_tick);
            self.scheduler.seek(now, start_tick);
        }
    }

    pub fn add_pattern(&mut self, pattern: Pattern) {
        let now = self.clock.now();
        self.studio.playback.add_pattern(pattern, now);
    }

    pub fn remove_pattern(&mut self, id: PatternId) -> Option<Pattern> {
        let now = self.clock.now();
        self.studio.playback.remove_pattern(id, now)
    }

    /// Make `id` the pattern played in pattern mode and fit the loop to it.
    pub fn select_pattern(&mut self, id: PatternId) -> bool {
        let now = self.clock.now();
        if !self.studio.playback.select_pattern(id, now) {
            return false;
        }
        if self.studio.playback.mode() == PlayMode::Pattern {
            self.fit_loop_to_content(now);
        }
        true
    }

    /// Edit a pattern in place. The reschedule is debounced, so bursts of
    /// edits cost one pass.
    pub fn edit_pattern<F: FnOnce(&mut Pattern)>(&mut self, id: PatternId, edit: F) -> bool {
        let now = self.clock.now();
        self.studio.playback.edit_pattern(id, now, edit)
    }

    /// Automate a mixer parameter at a step of a pattern. False for an
    /// unknown pattern.
    pub fn add_automation(&mut self, pattern: PatternId, point: AutomationPoint) -> bool {
        self.edit_pattern(pattern, |p| p.add_automation(point))
    }

    pub fn set_arrangement(&mut self, arrangement: Arrangement) {
        let now = self.clock.now();
        self.studio.playback.set_arrangement(arrangement, now);
    }

    pub fn request_reschedule(&mut self) {
        let now = self.clock.now();
        self.studio.playback.request_reschedule(now);
    }

    // ── Instruments ──

    /// Register an instrument rendered on the audio side. Returns the graph
    /// node carrying its output. Re-adding an id replaces the instrument.
    pub fn add_instrument(&mut self, id: InstrumentId, kind: InstrumentKind) -> NodeId {
        if self.studio.rack.get(id).is_some() {
            self.remove_instrument(id);
        }
        let output = self.studio.mixer.graph_mut().create_node(NodeKind::InstrumentOutput(id));
        log::debug!(target: "engine", "instrument {} ({}) on {}", id, kind.name(), output);
        self.studio
            .rack
            .add(Box::new(LinkedInstrument::new(id, kind, Some(output), self.link.note_lane())));
        output
    }

    pub fn remove_instrument(&mut self, id: InstrumentId) -> bool {
        let Some(instrument) = self.studio.rack.remove(id) else {
            return false;
        };
        if let Err(e) = self.studio.mixer.unroute_instrument(id) {
            log::warn!(target: "engine", "unroute instrument {}: {}", id, e);
        }
        if let Some(node) = instrument.output() {
            if let Err(e) = self.studio.mixer.graph_mut().release_node(node) {
                log::debug!(target: "engine", "release instrument node {}: {}", node, e);
            }
        }
        true
    }

    /// Mark a sampler's sample as loaded (or not). Unready instruments skip
    /// their notes.
    pub fn set_instrument_ready(&mut self, id: InstrumentId, ready: bool) -> bool {
        let Some(instrument) = self.studio.rack.get_mut(id) else {
            return false;
        };
        if let InstrumentKind::Sampler { loaded, .. } = instrument.kind_mut() {
            *loaded = ready;
        }
        true
    }

    // ── Mixer ──

    pub fn create_mixer_insert(&mut self, id: InsertId, label: &str) -> Result<(), MixerError> {
        self.studio.mixer.create_insert(id, label).map(|_| ())
    }

    pub fn remove_mixer_insert(&mut self, id: InsertId) -> Result<(), MixerError> {
        self.studio.mixer.remove_insert(id)
    }

    /// Route an instrument into an insert. If either side does not exist
    /// yet the request is kept and retried from `poll`.
    pub fn route_instrument_to_insert(
        &mut self,
        instrument: InstrumentId,
        insert: InsertId,
    ) -> Result<RouteOutcome, MixerError> {
        let now = self.clock.now();
        let output = self.studio.rack.output_of(instrument);
        self.studio.mixer.route_instrument(instrument, output, insert, now)
    }

    pub fn add_effect_to_insert(
        &mut self,
        insert: InsertId,
        kind: EffectKind,
        index: Option<usize>,
    ) -> Result<EffectId, MixerError> {
        self.studio.mixer.add_effect(insert, kind, index)
    }

    pub fn remove_effect(&mut self, insert: InsertId, effect: EffectId) -> Result<(), MixerError> {
        self.studio.mixer.remove_effect(insert, effect)
    }

    pub fn set_effect_bypass(&mut self, insert: InsertId, effect: EffectId, bypassed: bool) -> Result<(), MixerError> {
        self.studio.mixer.set_bypass(insert, effect, bypassed)
    }

    pub fn reorder_effects(&mut self, insert: InsertId, from: usize, to: usize) -> Result<(), MixerError> {
        self.studio.mixer.reorder_effects(insert, from, to)
    }

    pub fn set_effect_param(
        &mut self,
        insert: InsertId,
        effect: EffectId,
        name: &str,
        value: f32,
    ) -> Result<f32, MixerError> {
        self.studio.mixer.set_effect_param(insert, effect, name, value)
    }

    pub fn set_channel_volume(&mut self, insert: InsertId, gain: f32) -> Result<f32, MixerError> {
        self.studio.mixer.set_volume(insert, gain)
    }

    pub fn set_channel_pan(&mut self, insert: InsertId, pan: f32) -> Result<f32, MixerError> {
        self.studio.mixer.set_pan(insert, pan)
    }

    pub fn set_channel_mute(&mut self, insert: InsertId, muted: bool) -> Result<(), MixerError> {
        self.studio.mixer.set_mute(insert, muted)
    }

    pub fn set_channel_solo(&mut self, insert: InsertId, soloed: bool) -> Result<(), MixerError> {
        self.studio.mixer.set_solo(insert, soloed)
    }

    pub fn set_master_gain(&mut self, gain: f32) -> Result<f32, MixerError> {
        self.studio.mixer.set_master_gain(gain)
    }

    pub fn create_send(&mut self, source: InsertId, bus: InsertId, level: f32) -> Result<(), MixerError> {
        self.studio.mixer.create_send(source, bus, level)
    }

    pub fn remove_send(&mut self, source: InsertId, bus: InsertId) -> Result<bool, MixerError> {
        self.studio.mixer.remove_send(source, bus)
    }

    pub fn update_send_level(&mut self, source: InsertId, bus: InsertId, level: f32) -> Result<(), MixerError> {
        self.studio.mixer.update_send_level(source, bus, level)
    }

    pub fn set_metering(&mut self, insert: InsertId, enabled: bool) -> Result<(), MixerError> {
        self.studio.mixer.set_metering(insert, enabled)
    }

    pub fn meter_level(&self, insert: InsertId) -> Option<(f32, f32)> {
        self.studio.mixer.meter_level(insert)
    }

    // ── Periodic work ──

    /// One timer tick: advance the transport through the lookahead window,
    /// run a due debounced reschedule, retry deferred routes, absorb renderer
    /// feedback, apply auto-sleep, then flush graph changes to the renderer.
    pub fn poll(&mut self) -> PollReport {
        let started = Instant::now();
        let now = self.clock.now();

        let report = self.scheduler.poll(now, &mut self.studio);
        if self.studio.playback.take_due_reschedule(now) && self.scheduler.is_playing() {
            self.force_reschedule(now);
        }

        let rack = &self.studio.rack;
        let routed = self.studio.mixer.retry_pending(now, |id| rack.output_of(id));
        if routed > 0 {
            log::debug!(target: "engine", "{} deferred routes connected", routed);
        }

        for feedback in self.link.drain_feedback() {
            match feedback {
                AudioFeedback::Meter { insert, input_peak, output_peak } => {
                    self.studio.mixer.record_meter(insert, input_peak, output_peak, now)
                }
                AudioFeedback::RendererError { message } => {
                    log::warn!(target: "engine", "renderer: {}", message)
                }
            }
        }
        self.studio.mixer.poll_auto_sleep(now);

        self.forward_graph_changes();
        self.link.flush_frame(now, false);

        self.telemetry.record(started.elapsed(), self.settings.poll_interval, &report);
        if now - self.last_telemetry_log >= 1.0 {
            self.last_telemetry_log = now;
            let s = self.telemetry.take_summary();
            log::debug!(
                target: "engine",
                "{} polls: avg {}us max {}us overruns {}, {} ticks (max {}/poll), {} wraps, {} events ({} failed)",
                s.polls,
                s.avg_us,
                s.max_us,
                s.overruns,
                s.ticks,
                s.max_ticks,
                s.wraps,
                s.events_fired,
                s.events_failed
            );
        }
        report
    }

    /// Push pending graph changes to the renderer now, ignoring the frame
    /// rate limit.
    pub fn flush(&mut self) -> FlushReport {
        self.forward_graph_changes();
        let now = self.clock.now();
        self.link.flush_frame(now, true)
    }

    fn forward_graph_changes(&mut self) {
        let graph = self.studio.mixer.graph_mut();
        let ops = graph.take_ops();
        let params = graph.take_param_changes();
        if !ops.is_empty() {
            self.link.queue_topology(ops);
        }
        for change in params {
            self.link.queue_param(change);
        }
    }

    pub fn telemetry_summary(&mut self) -> TelemetrySummary {
        self.telemetry.take_summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_clock::ManualClock;
    use crate::content::Note;
    use dawg_types::{NodeParam, ParamChange, TransportEvent, Waveform};
    use std::sync::{Arc, Mutex};

    fn engine() -> (Engine, AudioEndpoint, ManualClock) {
        let clock = ManualClock::new();
        let (engine, endpoint) = Engine::new(EngineSettings::default(), Box::new(clock.clone())).unwrap();
        (engine, endpoint, clock)
    }

    fn synth() -> InstrumentKind {
        InstrumentKind::Synth { waveform: Waveform::Saw, voices: 8 }
    }

    fn notes_on(endpoint: &AudioEndpoint) -> Vec<(u8, f64)> {
        endpoint
            .notes
            .try_iter()
            .filter_map(|m| match m {
                AudioMsg::NoteOn { pitch, time, .. } => Some((pitch, time)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn play_sends_timed_notes() {
        let (mut engine, endpoint, _clock) = engine();
        let inst = InstrumentId::new(1);
        engine.add_instrument(inst, synth());
        let mut p = Pattern::new(PatternId::new(1), "Beat", 16);
        p.add_note(Note::new(inst, 36, 0.0, 1.0));
        p.add_note(Note::new(inst, 38, 0.5, 1.0));
        p.add_note(Note::new(inst, 42, 4.0, 1.0));
        engine.add_pattern(p);

        engine.play(None);
        engine.poll();
        // 100 ms lookahead at 120 bpm covers steps 0 and 0.5 but not 4.
        let notes = notes_on(&endpoint);
        assert_eq!(notes.iter().map(|n| n.0).collect::<Vec<_>>(), vec![36, 38]);
        assert_eq!(notes[0].1, 0.0);
        assert!((notes[1].1 - 0.0625).abs() < 1e-9);
    }

    #[test]
    fn invalid_transitions_are_ignored() {
        let (mut engine, endpoint, _clock) = engine();
        engine.pause();
        engine.resume();
        engine.stop();
        assert_eq!(engine.state(), TransportState::Stopped);
        assert!(endpoint.drain().is_empty());
    }

    #[test]
    fn stop_cuts_sounding_notes() {
        let (mut engine, endpoint, clock) = engine();
        engine.play(None);
        clock.advance(0.2);
        engine.stop();
        assert_eq!(endpoint.drain(), vec![AudioMsg::AllNotesOff { time: 0.2 }]);
    }

    #[test]
    fn rejected_values_leave_state_alone() {
        let (mut engine, _endpoint, _clock) = engine();
        assert!(engine.set_bpm(0.0).is_err());
        assert_eq!(engine.bpm(), 120.0);
        assert_eq!(engine.set_bpm(400.0), Ok(BpmCheck::OutOfRange));
        assert!(engine.set_loop_points(8.0, 8.0).is_err());
        assert!(engine.set_loop_points(f64::NAN, 8.0).is_err());
        assert!(engine.jump_to_step(-1.0).is_err());
        assert_eq!(engine.loop_region().end_tick, 4 * 384);
    }

    #[test]
    fn mode_switch_refits_loop_without_stopping() {
        let (mut engine, _endpoint, clock) = engine();
        let inst = InstrumentId::new(1);
        engine.add_instrument(inst, synth());
        let mut p = Pattern::new(PatternId::new(1), "A", 16);
        p.add_note(Note::new(inst, 60, 0.0, 1.0));
        engine.add_pattern(p);
        let mut song = Arrangement::default();
        song.place(PatternId::new(1), 0);
        song.place(PatternId::new(1), 16);
        song.place(PatternId::new(1), 32);
        engine.set_arrangement(song);

        engine.play(None);
        engine.poll();
        clock.advance(0.5);
        engine.poll();
        engine.set_play_mode(PlayMode::Song);
        assert_eq!(engine.state(), TransportState::Playing);
        assert_eq!(engine.loop_region().end_tick, 48 * 24);
        assert_eq!(engine.playback().executions(), 2);

        engine.set_play_mode(PlayMode::Pattern);
        assert_eq!(engine.loop_region().end_tick, 16 * 24);
    }

    #[test]
    fn edits_reschedule_once_after_debounce() {
        let (mut engine, _endpoint, clock) = engine();
        let inst = InstrumentId::new(1);
        engine.add_instrument(inst, synth());
        engine.add_pattern(Pattern::new(PatternId::new(1), "A", 16));
        engine.play(None);
        assert_eq!(engine.playback().executions(), 1);

        for i in 0..10 {
            engine.edit_pattern(PatternId::new(1), |p| p.add_note(Note::new(inst, 60 + i, 8.0, 1.0)));
            clock.advance(0.001);
            engine.poll();
        }
        assert_eq!(engine.playback().executions(), 1);
        clock.advance(0.02);
        engine.poll();
        assert_eq!(engine.playback().executions(), 2);
        assert_eq!(engine.scheduler().queue().len(), 10);
    }

    #[test]
    fn routing_before_instrument_exists_is_retried() {
        let (mut engine, _endpoint, clock) = engine();
        let inst = InstrumentId::new(5);
        engine.create_mixer_insert(InsertId::new(1), "Lead").unwrap();
        assert_eq!(
            engine.route_instrument_to_insert(inst, InsertId::new(1)).unwrap(),
            RouteOutcome::Deferred
        );
        engine.add_instrument(inst, synth());
        clock.advance(0.1);
        engine.poll();
        assert_eq!(engine.mixer().route_of(inst).map(|r| r.insert), Some(InsertId::new(1)));
    }

    #[test]
    fn graph_changes_reach_renderer_topology_first() {
        let (mut engine, endpoint, _clock) = engine();
        engine.create_mixer_insert(InsertId::new(1), "Drums").unwrap();
        engine.set_channel_volume(InsertId::new(1), 0.5).unwrap();
        engine.flush();
        let msgs = endpoint.drain();
        assert!(matches!(msgs.first(), Some(AudioMsg::Topology(_))));
        assert_eq!(msgs.iter().filter(|m| matches!(m, AudioMsg::ParamBatch(_))).count(), 1);
    }

    #[test]
    fn meter_feedback_reaches_mixer() {
        let (mut engine, endpoint, _clock) = engine();
        engine.create_mixer_insert(InsertId::new(2), "Pad").unwrap();
        endpoint.report(AudioFeedback::Meter { insert: InsertId::new(2), input_peak: 0.3, output_peak: 0.2 });
        engine.poll();
        assert_eq!(engine.meter_level(InsertId::new(2)), Some((0.3, 0.2)));
    }

    #[test]
    fn subscribers_see_transport_events() {
        let (mut engine, _endpoint, _clock) = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = engine.subscribe(
            TransportEventKind::Start,
            Box::new(move |e| {
                sink.lock().unwrap().push(e.clone());
                Ok(())
            }),
        );
        engine.play(Some(8.0));
        assert_eq!(*seen.lock().unwrap(), vec![TransportEvent::Start { tick: 192, time: 0.0 }]);
        assert!(engine.unsubscribe(id));
    }

    #[test]
    fn unready_sampler_stays_silent() {
        let (mut engine, endpoint, _clock) = engine();
        let inst = InstrumentId::new(2);
        engine.add_instrument(inst, InstrumentKind::Sampler { sample: "kick.wav".into(), loaded: false });
        let mut p = Pattern::new(PatternId::new(1), "Kick", 16);
        p.add_note(Note::new(inst, 36, 0.0, 1.0));
        engine.add_pattern(p);
        engine.play(None);
        engine.poll();
        assert!(notes_on(&endpoint).is_empty());

        engine.set_instrument_ready(inst, true);
        engine.stop();
        engine.play(None);
        engine.poll();
        assert_eq!(notes_on(&endpoint), vec![(36, 0.0)]);
    }

    #[test]
    fn automation_reaches_renderer_as_ramped_param() {
        let (mut engine, endpoint, _clock) = engine();
        let lead = InsertId::new(1);
        engine.create_mixer_insert(lead, "Lead").unwrap();
        engine.add_pattern(Pattern::new(PatternId::new(1), "A", 16));
        assert!(engine.add_automation(PatternId::new(1), AutomationPoint::new(0.5, lead, MixerParam::Volume, 0.25)));
        assert!(!engine.add_automation(PatternId::new(7), AutomationPoint::new(0.0, lead, MixerParam::Pan, 0.0)));
        engine.flush();
        endpoint.drain();

        engine.play(None);
        engine.poll();
        engine.flush();

        let gain_node = engine.mixer().insert(lead).unwrap().gain_node();
        let batches: Vec<Vec<ParamChange>> = endpoint
            .drain()
            .into_iter()
            .filter_map(|m| match m {
                AudioMsg::ParamBatch(batch) => Some(batch),
                _ => None,
            })
            .collect();
        assert_eq!(batches.len(), 1);
        let change = batches[0].iter().find(|c| c.node == gain_node).unwrap();
        assert_eq!(change.param, NodeParam::Gain);
        assert_eq!(change.value, 0.25);
        assert_eq!(change.ramp_secs, engine.mixer().settings().ramp_secs);
        assert_eq!(engine.mixer().insert(lead).unwrap().gain(), 0.25);
    }

    #[test]
    fn time_signature_change_reschedules_while_playing() {
        let (mut engine, _endpoint, clock) = engine();
        engine.add_pattern(Pattern::new(PatternId::new(1), "A", 16));
        engine.play(None);
        engine.poll();
        clock.advance(0.025);
        engine.poll();
        let before = engine.current_position();

        engine.set_time_signature(3, 4).unwrap();
        assert_eq!(engine.scheduler().clock().ticks_per_bar(), 3 * 96);
        assert_eq!(engine.playback().executions(), 2);
        assert!((engine.current_position() - before).abs() < 1.0 / 24.0);
        assert!(engine.set_time_signature(3, 5).is_err());
    }

    #[test]
    fn telemetry_counts_transport_work() {
        let (mut engine, _endpoint, clock) = engine();
        engine.play(None);
        engine.poll();
        clock.advance(0.03);
        engine.poll();
        let s = engine.telemetry_summary();
        assert_eq!(s.polls, 2);
        // 100 ms of ticks, then the 30 ms the window moved.
        assert_eq!(s.ticks, 20 + 5);
        assert_eq!(s.max_ticks, 20);
        assert_eq!(s.wraps, 0);
    }
}
