//! Time-keyed multimap of pending callbacks.
//!
//! Events sharing a fire time keep insertion order (FIFO per time bucket).
//! An event is removed from the queue before its callback runs, so a callback
//! may schedule new events or clear the whole queue through its
//! [`DrainScope`] without disturbing the drain in progress.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};

use dawg_types::{EventId, InsertId, InstrumentId, MixerParam};

use crate::error::ScheduleError;

/// What a scheduled event is about. Carried for the callback and for logging.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    NoteOn {
        instrument: InstrumentId,
        pitch: u8,
        velocity: f32,
        duration: f64,
    },
    NoteOff {
        instrument: InstrumentId,
        pitch: u8,
    },
    Param {
        insert: InsertId,
        param: MixerParam,
        value: f32,
    },
    Marker(String),
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::NoteOn { .. } => "note_on",
            EventPayload::NoteOff { .. } => "note_off",
            EventPayload::Param { .. } => "param",
            EventPayload::Marker(_) => "marker",
        }
    }

    pub fn target(&self) -> String {
        match self {
            EventPayload::NoteOn { instrument, .. } | EventPayload::NoteOff { instrument, .. } => {
                format!("instrument {}", instrument)
            }
            EventPayload::Param { insert, param, .. } => format!("{} of insert {}", param, insert),
            EventPayload::Marker(name) => name.clone(),
        }
    }
}

pub type EventCallback<C> =
    Box<dyn FnOnce(&mut DrainScope<'_, C>, &EventPayload) -> Result<(), String> + Send>;

/// Access handed to a firing callback.
pub struct DrainScope<'a, C> {
    pub queue: &'a mut EventQueue<C>,
    pub ctx: &'a mut C,
    pub event_id: EventId,
    /// Exact time the event was scheduled for.
    pub fire_time: f64,
}

struct ScheduledEvent<C> {
    id: EventId,
    fire_time: f64,
    payload: EventPayload,
    callback: EventCallback<C>,
}

/// Fire time with a total order. Only finite, non-negative values get in.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FireTime(f64);

impl Eq for FireTime {}

impl PartialOrd for FireTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FireTime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub fired: usize,
    pub failed: usize,
}

pub struct EventQueue<C> {
    buckets: BTreeMap<FireTime, VecDeque<ScheduledEvent<C>>>,
    len: usize,
    next_id: u64,
    /// Incremented by every `clear_all`.
    epoch: u64,
}

impl<C> Default for EventQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> EventQueue<C> {
    pub fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
            len: 0,
            next_id: 0,
            epoch: 0,
        }
    }

    pub fn schedule(
        &mut self,
        fire_time: f64,
        callback: EventCallback<C>,
        payload: EventPayload,
    ) -> Result<EventId, ScheduleError> {
        if !fire_time.is_finite() || fire_time < 0.0 {
            return Err(ScheduleError::InvalidFireTime(fire_time));
        }
        let id = EventId::new(self.next_id);
        self.next_id += 1;
        self.buckets
            .entry(FireTime(fire_time))
            .or_default()
            .push_back(ScheduledEvent { id, fire_time, payload, callback });
        self.len += 1;
        Ok(id)
    }

    /// Fire, in ascending time order, every event due at or before `now`.
    ///
    /// Events scheduled by callbacks during this pass wait for the next pass.
    /// A failing or panicking callback is logged and the drain continues.
    pub fn drain_due(&mut self, now: f64, ctx: &mut C) -> DrainReport {
        let cutoff = self.next_id;
        let mut report = DrainReport::default();
        while let Some(event) = self.pop_due(now, cutoff) {
            let ScheduledEvent { id, fire_time, payload, callback } = event;
            let outcome = {
                let mut scope = DrainScope {
                    queue: &mut *self,
                    ctx: &mut *ctx,
                    event_id: id,
                    fire_time,
                };
                panic::catch_unwind(AssertUnwindSafe(|| callback(&mut scope, &payload)))
            };
            match outcome {
                Ok(Ok(())) => report.fired += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    log::warn!(target: "events", "{} event for {} at {:.4}s failed: {}", payload.kind(), payload.target(), fire_time, e);
                }
                Err(_) => {
                    report.failed += 1;
                    log::warn!(target: "events", "{} event for {} at {:.4}s panicked", payload.kind(), payload.target(), fire_time);
                }
            }
        }
        report
    }

    fn pop_due(&mut self, now: f64, cutoff: u64) -> Option<ScheduledEvent<C>> {
        let key = self
            .buckets
            .range(..=FireTime(now))
            .find(|(_, bucket)| bucket.front().is_some_and(|e| e.id.get() < cutoff))
            .map(|(key, _)| *key)?;
        let bucket = self.buckets.get_mut(&key)?;
        let event = bucket.pop_front();
        if bucket.is_empty() {
            self.buckets.remove(&key);
        }
        if event.is_some() {
            self.len -= 1;
        }
        event
    }

    /// Invalidate every pending event.
    pub fn clear_all(&mut self) {
        self.buckets.clear();
        self.len = 0;
        self.epoch += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn next_fire_time(&self) -> Option<f64> {
        self.buckets.keys().next().map(|k| k.0)
    }

    /// Payloads in firing order (diagnostics and tests).
    pub fn pending(&self) -> Vec<(f64, &EventPayload)> {
        self.buckets
            .values()
            .flat_map(|bucket| bucket.iter().map(|e| (e.fire_time, &e.payload)))
            .collect()
    }
}
