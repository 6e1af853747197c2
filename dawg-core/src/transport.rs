//! Scheduler / transport state machine.
//!
//! Runs once per periodic timer tick: everything that sounds before
//! `now + lookahead` is computed and queued in that poll, with its exact
//! audio-clock time, so a coarse poll interval still yields precise timing.
//!
//! Position is an integer tick counter. `next_tick_time` is the audio-clock
//! time at which `current_tick` sounds; it advances by one tick interval per
//! processed tick and is re-anchored to "now" at start, seek, tempo change
//! and resync. A loop wrap resets the position but keeps the time line: loop
//! start sounds exactly when loop end would have.

use dawg_types::{TransportEvent, TransportState};

use crate::clock::{BpmCheck, LogicalClock};
use crate::error::{ConfigError, TransportError};
use crate::event_queue::EventQueue;
use crate::events::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopRegion {
    pub start_tick: u64,
    pub end_tick: u64,
    pub enabled: bool,
}

impl LoopRegion {
    pub fn length_ticks(&self) -> u64 {
        self.end_tick - self.start_tick
    }

    pub fn contains(&self, tick: u64) -> bool {
        tick >= self.start_tick && tick < self.end_tick
    }
}

/// `tick` sounds at audio-clock `time`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub tick: u64,
    pub time: f64,
}

/// Snapshot handed to content scheduling.
pub struct ScheduleView<'a> {
    pub clock: &'a LogicalClock,
    pub anchor: Anchor,
    pub loop_region: LoopRegion,
    pub now: f64,
}

impl ScheduleView<'_> {
    /// Audio-clock time of `tick`, extrapolated from the anchor.
    pub fn time_of(&self, tick: u64) -> f64 {
        let delta = tick as f64 - self.anchor.tick as f64;
        self.anchor.time + delta * self.clock.seconds_per_tick()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reanchor {
    LoopWrap,
    /// The poller fell too far behind the audio clock and skipped ahead.
    Resync,
}

/// Owner of the content that the transport plays. Called from inside a poll
/// right after the queue has been cleared for a discontinuity, so the new
/// iteration's events can still be drained in the same pass.
pub trait TransportHost: Sized {
    fn on_reanchor(&mut self, _queue: &mut EventQueue<Self>, _view: &ScheduleView<'_>, _reason: Reanchor) {}
}

impl TransportHost for () {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub ticks: u64,
    pub wraps: u32,
    pub fired: usize,
    pub failed: usize,
}

pub struct Scheduler<C> {
    clock: LogicalClock,
    state: TransportState,
    current_tick: u64,
    next_tick_time: f64,
    /// Last discontinuity. Tick times are derived from it, never summed.
    origin: Anchor,
    loop_region: LoopRegion,
    lookahead: f64,
    queue: EventQueue<C>,
    bus: EventBus,
    timer_armed: bool,
    ui_interval: f64,
    last_ui_update: Option<f64>,
    /// Reported position never goes below the last discontinuity.
    floor_tick: u64,
    /// A seek while stopped: the next start begins here instead of loop start.
    cued: bool,
    wraps: u64,
}

impl<C> Scheduler<C> {
    /// `lookahead` in seconds. A `ui_update_hz` of 0 disables position updates.
    pub fn new(clock: LogicalClock, lookahead: f64, ui_update_hz: f64) -> Self {
        let end_tick = clock.ticks_per_bar() * 4;
        Self {
            clock,
            state: TransportState::Stopped,
            current_tick: 0,
            next_tick_time: 0.0,
            origin: Anchor { tick: 0, time: 0.0 },
            loop_region: LoopRegion { start_tick: 0, end_tick, enabled: true },
            lookahead,
            queue: EventQueue::new(),
            bus: EventBus::new(),
            timer_armed: false,
            ui_interval: if ui_update_hz > 0.0 { 1.0 / ui_update_hz } else { f64::INFINITY },
            last_ui_update: None,
            floor_tick: 0,
            cued: false,
            wraps: 0,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    pub fn timer_running(&self) -> bool {
        self.timer_armed
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    pub fn queue(&self) -> &EventQueue<C> {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut EventQueue<C> {
        &mut self.queue
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn loop_region(&self) -> LoopRegion {
        self.loop_region
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn next_tick_time(&self) -> f64 {
        self.next_tick_time
    }

    pub fn anchor(&self) -> Anchor {
        Anchor { tick: self.current_tick, time: self.next_tick_time }
    }

    /// Number of loop wraps since creation.
    pub fn wraps(&self) -> u64 {
        self.wraps
    }

    pub fn view(&self, now: f64) -> ScheduleView<'_> {
        ScheduleView {
            clock: &self.clock,
            anchor: self.anchor(),
            loop_region: self.loop_region,
            now,
        }
    }

    /// Queue contents plus a view, borrowed together for content scheduling.
    pub fn split_for_scheduling(&mut self, now: f64) -> (&mut EventQueue<C>, ScheduleView<'_>) {
        let view = ScheduleView {
            clock: &self.clock,
            anchor: Anchor { tick: self.current_tick, time: self.next_tick_time },
            loop_region: self.loop_region,
            now,
        };
        (&mut self.queue, view)
    }

    /// Fractional tick sounding at `now`. While playing the scheduler runs
    /// ahead of the audio clock by up to the lookahead; this backs that off.
    pub fn position_ticks(&self, now: f64) -> f64 {
        if self.state != TransportState::Playing {
            return self.current_tick as f64;
        }
        let ahead = ((self.next_tick_time - now) / self.clock.seconds_per_tick()).max(0.0);
        (self.current_tick as f64 - ahead).max(self.floor_tick as f64)
    }

    pub fn position_steps(&self, now: f64) -> f64 {
        self.position_ticks(now) / self.clock.ticks_per_step() as f64
    }

    /// Audio-clock time of `tick` on the current time line.
    fn tick_time(&self, tick: u64) -> f64 {
        self.origin.time + (tick as f64 - self.origin.tick as f64) * self.clock.seconds_per_tick()
    }

    fn audible_tick(&self, now: f64) -> u64 {
        self.position_ticks(now).round() as u64
    }

    /// Valid from Stopped or Paused. `from` overrides the start position.
    pub fn start(&mut self, now: f64, from: Option<u64>) -> Result<TransportState, TransportError> {
        match self.state {
            TransportState::Playing => {
                return Err(TransportError { from: self.state, action: "start" });
            }
            TransportState::Stopped => {
                self.current_tick = match (from, self.cued) {
                    (Some(tick), _) => tick,
                    (None, true) => self.current_tick,
                    (None, false) => self.loop_region.start_tick,
                };
                self.next_tick_time = now;
            }
            TransportState::Paused => {
                if let Some(tick) = from {
                    self.current_tick = tick;
                }
                self.next_tick_time = now + self.clock.seconds_per_tick();
            }
        }
        self.origin = self.anchor();
        log::debug!(target: "transport", "{:?} -> Playing at tick {}", self.state, self.current_tick);
        self.cued = false;
        self.state = TransportState::Playing;
        self.timer_armed = true;
        self.floor_tick = self.current_tick;
        self.last_ui_update = None;
        self.bus.emit(&TransportEvent::Start { tick: self.current_tick, time: self.next_tick_time });
        Ok(self.state)
    }

    pub fn resume(&mut self, now: f64) -> Result<TransportState, TransportError> {
        if self.state != TransportState::Paused {
            return Err(TransportError { from: self.state, action: "resume" });
        }
        self.start(now, None)
    }

    /// Valid from Playing or Paused. Resets to loop start and voids the queue.
    pub fn stop(&mut self) -> Result<TransportState, TransportError> {
        if self.state == TransportState::Stopped {
            return Err(TransportError { from: self.state, action: "stop" });
        }
        log::debug!(target: "transport", "{:?} -> Stopped", self.state);
        self.state = TransportState::Stopped;
        self.timer_armed = false;
        self.current_tick = self.loop_region.start_tick;
        self.floor_tick = self.current_tick;
        self.cued = false;
        self.queue.clear_all();
        self.bus.emit(&TransportEvent::Stop);
        Ok(self.state)
    }

    /// Valid only while playing. Keeps the audible position and the queue.
    pub fn pause(&mut self, now: f64) -> Result<TransportState, TransportError> {
        if self.state != TransportState::Playing {
            return Err(TransportError { from: self.state, action: "pause" });
        }
        self.current_tick = self.audible_tick(now);
        self.floor_tick = self.current_tick;
        self.state = TransportState::Paused;
        self.timer_armed = false;
        log::debug!(target: "transport", "Playing -> Paused at tick {}", self.current_tick);
        self.bus.emit(&TransportEvent::Pause { tick: self.current_tick });
        Ok(self.state)
    }

    /// Move the position. While playing this is a discontinuity: the queue is
    /// voided and the caller reschedules content.
    pub fn seek(&mut self, now: f64, tick: u64) {
        self.current_tick = tick;
        self.floor_tick = tick;
        match self.state {
            TransportState::Playing => {
                self.next_tick_time = now;
                self.origin = self.anchor();
                self.queue.clear_all();
            }
            TransportState::Stopped => self.cued = true,
            TransportState::Paused => {}
        }
        log::debug!(target: "transport", "seek to tick {} ({:?})", tick, self.state);
    }

    /// Change tempo. Elapsed time is kept: while playing the position is
    /// pinned at the audible tick and future ticks run at the new rate from
    /// `now`. The queue is voided; the caller reschedules content.
    pub fn set_bpm(&mut self, now: f64, bpm: f64) -> Result<BpmCheck, ConfigError> {
        let playing = self.state == TransportState::Playing;
        let pinned = if playing { self.audible_tick(now) } else { self.current_tick };
        let check = self.clock.set_bpm(bpm)?;
        if playing {
            self.current_tick = pinned;
            self.floor_tick = pinned;
            self.next_tick_time = now;
            self.origin = self.anchor();
            self.queue.clear_all();
        }
        log::debug!(target: "transport", "bpm -> {} (tick {})", bpm, self.current_tick);
        Ok(check)
    }

    /// Change the meter. Handled like a tempo change: the audible tick is
    /// pinned and, while playing, the queue is voided for rescheduling.
    pub fn set_time_signature(&mut self, now: f64, beats_per_bar: u32, subdivision: u32) -> Result<(), ConfigError> {
        let playing = self.state == TransportState::Playing;
        let pinned = if playing { self.audible_tick(now) } else { self.current_tick };
        self.clock.set_time_signature(beats_per_bar, subdivision)?;
        if playing {
            self.current_tick = pinned;
            self.floor_tick = pinned;
            self.next_tick_time = now;
            self.origin = self.anchor();
            self.queue.clear_all();
        }
        log::debug!(target: "transport", "time signature -> {}/{} (tick {})", beats_per_bar, subdivision, self.current_tick);
        Ok(())
    }

    pub fn set_loop_points(&mut self, start_tick: u64, end_tick: u64) -> Result<(), ConfigError> {
        if end_tick <= start_tick {
            return Err(ConfigError::InvalidLoop {
                start: self.clock.ticks_to_steps(start_tick),
                end: self.clock.ticks_to_steps(end_tick),
            });
        }
        self.loop_region.start_tick = start_tick;
        self.loop_region.end_tick = end_tick;
        if self.state == TransportState::Stopped && !self.cued {
            self.current_tick = start_tick;
            self.floor_tick = start_tick;
        }
        Ok(())
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) {
        self.loop_region.enabled = enabled;
    }
}

impl<C: TransportHost> Scheduler<C> {
    /// One periodic timer tick. No-op unless the timer is armed.
    pub fn poll(&mut self, now: f64, ctx: &mut C) -> PollReport {
        let mut report = PollReport::default();
        if !self.timer_armed || self.state != TransportState::Playing {
            return report;
        }

        if self.next_tick_time < now - self.lookahead {
            log::warn!(
                target: "transport",
                "poll fell {:.1} ms behind the audio clock, re-anchoring",
                (now - self.next_tick_time) * 1000.0
            );
            self.next_tick_time = now;
            self.origin = self.anchor();
            self.floor_tick = self.current_tick;
            self.queue.clear_all();
            let view = ScheduleView {
                clock: &self.clock,
                anchor: Anchor { tick: self.current_tick, time: self.next_tick_time },
                loop_region: self.loop_region,
                now,
            };
            ctx.on_reanchor(&mut self.queue, &view, Reanchor::Resync);
        }

        let horizon = now + self.lookahead;
        while self.next_tick_time < horizon && self.state == TransportState::Playing {
            self.emit_boundaries();
            let drained = self.queue.drain_due(self.next_tick_time, ctx);
            report.fired += drained.fired;
            report.failed += drained.failed;
            report.ticks += 1;
            if self.advance_tick(now, ctx) {
                report.wraps += 1;
            }
        }
        report
    }

    fn emit_boundaries(&mut self) {
        let tick = self.current_tick;
        let time = self.next_tick_time;
        log::trace!(target: "transport", "tick {} at {:.4}s", tick, time);
        self.bus.emit(&TransportEvent::Tick { tick, time });
        if tick % self.clock.ticks_per_beat() == 0 {
            self.bus.emit(&TransportEvent::Beat { beat: tick / self.clock.ticks_per_beat(), time });
        }
        if tick % self.clock.ticks_per_bar() == 0 {
            self.bus.emit(&TransportEvent::Bar { bar: tick / self.clock.ticks_per_bar(), time });
        }
        let due = self.last_ui_update.map_or(true, |last| time - last >= self.ui_interval);
        if due && self.ui_interval.is_finite() {
            self.last_ui_update = Some(time);
            self.bus.emit(&TransportEvent::PositionUpdate { step: self.clock.ticks_to_steps(tick) });
        }
    }

    /// Advance one tick. Crossing the loop end is a hard reset: position goes
    /// to loop start, the queue is voided and the host reschedules. Loop start
    /// is due when the loop end tick would have sounded. Returns true on wrap.
    pub fn advance_tick(&mut self, now: f64, ctx: &mut C) -> bool {
        let next = self.current_tick + 1;
        let next_time = self.tick_time(next);
        if !(self.loop_region.enabled && next >= self.loop_region.end_tick) {
            self.current_tick = next;
            self.next_tick_time = next_time;
            return false;
        }

        let start_tick = self.loop_region.start_tick;
        self.current_tick = start_tick;
        self.floor_tick = start_tick;
        self.next_tick_time = next_time;
        self.origin = self.anchor();
        self.last_ui_update = None;
        self.wraps += 1;
        self.queue.clear_all();
        log::debug!(target: "transport", "loop wrap to tick {} at {:.4}s", start_tick, next_time);
        self.bus.emit(&TransportEvent::Loop { start_tick, time: next_time });

        let view = ScheduleView {
            clock: &self.clock,
            anchor: Anchor { tick: start_tick, time: next_time },
            loop_region: self.loop_region,
            now,
        };
        ctx.on_reanchor(&mut self.queue, &view, Reanchor::LoopWrap);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Tempo, DEFAULT_PPQ};
    use crate::event_queue::EventPayload;
    use dawg_types::TransportEventKind;
    use std::sync::{Arc, Mutex};

    fn scheduler() -> Scheduler<()> {
        let clock = LogicalClock::new(DEFAULT_PPQ, Tempo::default()).unwrap();
        Scheduler::new(clock, 0.1, 30.0)
    }

    #[test]
    fn state_machine_rejects_invalid_transitions() {
        let mut s = scheduler();
        assert!(s.pause(0.0).is_err());
        assert!(s.stop().is_err());
        assert!(s.resume(0.0).is_err());
        assert_eq!(s.start(0.0, None), Ok(TransportState::Playing));
        assert!(s.start(0.0, None).is_err());
        assert!(s.resume(0.0).is_err());
        assert_eq!(s.pause(0.0), Ok(TransportState::Paused));
        assert!(s.pause(0.0).is_err());
        assert_eq!(s.resume(0.0), Ok(TransportState::Playing));
        assert_eq!(s.stop(), Ok(TransportState::Stopped));
    }

    #[test]
    fn poll_fills_lookahead_window() {
        let mut s = scheduler();
        s.start(0.0, None).unwrap();
        let report = s.poll(0.0, &mut ());
        let spt = s.clock().seconds_per_tick();
        // Ticks at 0, spt, 2*spt ... strictly before 100 ms.
        let expected = (0.1 / spt).ceil() as u64;
        assert_eq!(report.ticks, expected);
        assert!(s.next_tick_time() >= 0.1);
        assert!(s.position_ticks(0.0) < 1.0);
    }

    #[test]
    fn poll_is_noop_when_timer_disarmed() {
        let mut s = scheduler();
        assert_eq!(s.poll(1.0, &mut ()).ticks, 0);
        s.start(0.0, None).unwrap();
        s.pause(0.0).unwrap();
        assert!(!s.timer_running());
        assert_eq!(s.poll(1.0, &mut ()).ticks, 0);
    }

    #[test]
    fn resume_recalibrates_next_tick() {
        let mut s = scheduler();
        s.start(0.0, None).unwrap();
        s.poll(0.0, &mut ());
        s.pause(0.05).unwrap();
        s.resume(10.0).unwrap();
        let spt = s.clock().seconds_per_tick();
        assert!((s.next_tick_time() - (10.0 + spt)).abs() < 1e-12);
        // No burst of catch-up ticks: only the lookahead window is filled.
        let report = s.poll(10.0, &mut ());
        assert!(report.ticks <= (0.1 / spt).ceil() as u64);
    }

    #[test]
    fn loop_wrap_is_a_hard_reset() {
        let mut s = scheduler();
        s.set_loop_points(0, 64 * 24).unwrap();
        s.start(0.0, None).unwrap();
        s.seek(3.0, 64 * 24 - 1);
        s.queue_mut()
            .schedule(3.5, Box::new(|_, _| Ok(())), EventPayload::Marker("stale".into()))
            .unwrap();

        assert!(s.advance_tick(3.0, &mut ()));
        assert_eq!(s.current_tick(), 0);
        assert_eq!(s.next_tick_time(), 3.0 + s.clock().seconds_per_tick());
        assert!(s.queue().is_empty());
        assert_eq!(s.wraps(), 1);
    }

    #[test]
    fn loop_shorter_than_window_keeps_time_line() {
        let mut s = scheduler();
        s.set_loop_points(0, 2).unwrap();
        s.start(0.0, None).unwrap();
        let spt = s.clock().seconds_per_tick();
        let report = s.poll(0.0, &mut ());
        // 20 ticks fit in 100 ms at 120 bpm: ten two-tick iterations.
        assert_eq!(report.ticks, 20);
        assert_eq!(report.wraps, 10);
        assert_eq!(s.current_tick(), 0);
        assert!((s.next_tick_time() - 20.0 * spt).abs() < 1e-12);
    }

    #[test]
    fn wrap_time_does_not_depend_on_poll_time() {
        let mut early = scheduler();
        let mut late = scheduler();
        for s in [&mut early, &mut late] {
            s.set_loop_points(0, 96).unwrap();
            s.start(1.0, Some(95)).unwrap();
        }
        early.advance_tick(0.9, &mut ());
        late.advance_tick(1.05, &mut ());
        assert_eq!(early.next_tick_time(), late.next_tick_time());
        assert_eq!(early.anchor(), Anchor { tick: 0, time: 1.0 + early.clock().seconds_per_tick() });
    }

    #[test]
    fn time_signature_change_pins_position() {
        let mut s = scheduler();
        s.start(0.0, None).unwrap();
        s.poll(0.0, &mut ());
        s.poll(0.025, &mut ());
        let before = s.position_ticks(0.025).round() as u64;
        s.set_time_signature(0.025, 3, 4).unwrap();
        assert_eq!(s.current_tick(), before);
        assert_eq!(s.next_tick_time(), 0.025);
        assert!(s.queue().is_empty());
        assert_eq!(s.clock().ticks_per_bar(), 3 * 96);
        assert!(s.set_time_signature(0.025, 0, 4).is_err());
        assert_eq!(s.clock().ticks_per_bar(), 3 * 96);
    }

    #[test]
    fn loop_disabled_runs_past_end() {
        let mut s = scheduler();
        s.set_loop_points(0, 96).unwrap();
        s.set_loop_enabled(false);
        s.start(0.0, None).unwrap();
        s.seek(0.0, 95);
        assert!(!s.advance_tick(0.0, &mut ()));
        assert_eq!(s.current_tick(), 96);
    }

    #[test]
    fn invalid_loop_points_rejected() {
        let mut s = scheduler();
        assert!(s.set_loop_points(96, 96).is_err());
        assert!(s.set_loop_points(200, 100).is_err());
        assert_eq!(s.loop_region().start_tick, 0);
    }

    #[test]
    fn tempo_change_pins_audible_position() {
        let mut s = scheduler();
        s.start(0.0, None).unwrap();
        s.poll(0.0, &mut ());
        s.poll(0.025, &mut ());
        let before = s.position_ticks(0.025).round() as u64;
        s.set_bpm(0.025, 60.0).unwrap();
        assert_eq!(s.current_tick(), before);
        assert_eq!(s.next_tick_time(), 0.025);
        assert!(s.queue().is_empty());
        assert!(s.set_bpm(0.025, -5.0).is_err());
        assert_eq!(s.clock().bpm(), 60.0);
    }

    #[test]
    fn boundaries_are_published() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut s = scheduler();
        for kind in [TransportEventKind::Beat, TransportEventKind::Bar, TransportEventKind::Start] {
            let seen = Arc::clone(&seen);
            s.bus_mut().subscribe(
                kind,
                Box::new(move |e| {
                    seen.lock().unwrap().push(e.kind());
                    Ok(())
                }),
            );
        }
        s.start(0.0, None).unwrap();
        s.poll(0.0, &mut ());
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![TransportEventKind::Start, TransportEventKind::Beat, TransportEventKind::Bar]
        );
    }

    #[test]
    fn seek_while_stopped_cues_start() {
        let mut s = scheduler();
        s.seek(0.0, 480);
        s.start(0.0, None).unwrap();
        assert_eq!(s.current_tick(), 480);
        s.stop().unwrap();
        s.start(0.0, None).unwrap();
        assert_eq!(s.current_tick(), 0);
    }
}
