//! Instruments as seen from the scheduler.
//!
//! An instrument receives notes with a future audio-clock time and is
//! responsible for sounding them exactly then; the scheduler only decides
//! when to hand them over.

use std::collections::BTreeMap;

use dawg_types::{AudioMsg, InstrumentId, InstrumentKind, NodeId};

use crate::link::NoteLane;

pub trait Instrument: Send {
    fn id(&self) -> InstrumentId;
    fn kind(&self) -> &InstrumentKind;
    fn kind_mut(&mut self) -> &mut InstrumentKind;
    /// Graph node carrying this instrument's audio, once it exists.
    fn output(&self) -> Option<NodeId>;

    fn is_ready(&self) -> bool {
        self.kind().is_ready()
    }

    fn trigger_note(&mut self, pitch: u8, velocity: f32, time: f64, duration: f64) -> Result<(), String>;
    fn release_note(&mut self, pitch: u8, time: f64) -> Result<(), String>;
}

/// Instrument rendered on the audio thread; notes travel over the note lane
/// with their absolute start time.
pub struct LinkedInstrument {
    id: InstrumentId,
    kind: InstrumentKind,
    output: Option<NodeId>,
    lane: NoteLane,
}

impl LinkedInstrument {
    pub fn new(id: InstrumentId, kind: InstrumentKind, output: Option<NodeId>, lane: NoteLane) -> Self {
        Self { id, kind, output, lane }
    }
}

impl Instrument for LinkedInstrument {
    fn id(&self) -> InstrumentId {
        self.id
    }

    fn kind(&self) -> &InstrumentKind {
        &self.kind
    }

    fn kind_mut(&mut self) -> &mut InstrumentKind {
        &mut self.kind
    }

    fn output(&self) -> Option<NodeId> {
        self.output
    }

    fn trigger_note(&mut self, pitch: u8, velocity: f32, time: f64, duration: f64) -> Result<(), String> {
        let msg = AudioMsg::NoteOn { instrument: self.id, pitch, velocity, time, duration };
        if self.lane.send(msg) {
            Ok(())
        } else {
            Err("note lane rejected note on".to_string())
        }
    }

    fn release_note(&mut self, pitch: u8, time: f64) -> Result<(), String> {
        if self.lane.send(AudioMsg::NoteOff { instrument: self.id, pitch, time }) {
            Ok(())
        } else {
            Err("note lane rejected note off".to_string())
        }
    }
}

#[derive(Default)]
pub struct InstrumentRack {
    instruments: BTreeMap<InstrumentId, Box<dyn Instrument>>,
}

impl InstrumentRack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace. Returns the instrument previously under that id.
    pub fn add(&mut self, instrument: Box<dyn Instrument>) -> Option<Box<dyn Instrument>> {
        self.instruments.insert(instrument.id(), instrument)
    }

    pub fn remove(&mut self, id: InstrumentId) -> Option<Box<dyn Instrument>> {
        self.instruments.remove(&id)
    }

    pub fn get(&self, id: InstrumentId) -> Option<&dyn Instrument> {
        self.instruments.get(&id).map(|i| i.as_ref())
    }

    pub fn get_mut(&mut self, id: InstrumentId) -> Option<&mut Box<dyn Instrument>> {
        self.instruments.get_mut(&id)
    }

    pub fn output_of(&self, id: InstrumentId) -> Option<NodeId> {
        self.instruments.get(&id).and_then(|i| i.output())
    }

    pub fn ids(&self) -> Vec<InstrumentId> {
        self.instruments.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Hand a note to an instrument. Instruments that are not ready (e.g. a
    /// sampler still loading) skip the note silently.
    pub fn play_note(
        &mut self,
        id: InstrumentId,
        pitch: u8,
        velocity: f32,
        time: f64,
        duration: f64,
    ) -> Result<(), String> {
        let instrument = self
            .instruments
            .get_mut(&id)
            .ok_or_else(|| format!("instrument {} not found", id))?;
        if !instrument.is_ready() {
            log::debug!(target: "playback", "instrument {} not ready, skipping pitch {}", id, pitch);
            return Ok(());
        }
        instrument.trigger_note(pitch, velocity, time, duration)
    }
}
