//! Messages exchanged between the control thread and the audio renderer.

use serde::{Deserialize, Serialize};

use crate::{EffectId, EffectKind, InsertId, InstrumentId, NodeId};

/// What a graph node does on the renderer side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Summing junction with unity gain (insert input/output boundaries).
    Junction,
    Gain,
    StereoPan,
    Meter { insert: InsertId },
    EffectInput(EffectKind),
    EffectOutput,
    /// Fixed hardware mixing channel.
    Channel(u8),
    Master,
    Destination,
    InstrumentOutput(InstrumentId),
}

/// Automatable parameter on a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeParam {
    Gain,
    LeftGain,
    RightGain,
    /// Named effect setting, addressed on the effect's input node.
    Effect(String),
}

/// Channel-strip setting that can be automated from the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MixerParam {
    Volume,
    Pan,
    /// Level of the send into `bus`.
    SendLevel { bus: InsertId },
    EffectParam { effect: EffectId, name: String },
}

impl std::fmt::Display for MixerParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MixerParam::Volume => write!(f, "volume"),
            MixerParam::Pan => write!(f, "pan"),
            MixerParam::SendLevel { bus } => write!(f, "send to {}", bus),
            MixerParam::EffectParam { effect, name } => write!(f, "{}.{}", effect, name),
        }
    }
}

/// Structural change to the renderer's graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraphOp {
    CreateNode { node: NodeId, kind: NodeKind },
    ReleaseNode { node: NodeId },
    Connect { from: NodeId, to: NodeId },
    Disconnect { from: NodeId, to: NodeId },
    DisconnectAll { from: NodeId },
}

/// A smoothed parameter move: ramp linearly to `value` over `ramp_secs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamChange {
    pub node: NodeId,
    pub param: NodeParam,
    pub value: f32,
    pub ramp_secs: f64,
}

/// Control thread -> audio thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AudioMsg {
    Topology(Vec<GraphOp>),
    /// Coalesced parameter writes for one frame.
    ParamBatch(Vec<ParamChange>),
    NoteOn {
        instrument: InstrumentId,
        pitch: u8,
        velocity: f32,
        time: f64,
        duration: f64,
    },
    NoteOff {
        instrument: InstrumentId,
        pitch: u8,
        time: f64,
    },
    AllNotesOff {
        time: f64,
    },
}

/// Audio thread -> control thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AudioFeedback {
    /// Peak levels (linear) measured at an insert's boundaries since the last report.
    Meter {
        insert: InsertId,
        input_peak: f32,
        output_peak: f32,
    },
    /// The renderer dropped a message or failed to apply it.
    RendererError { message: String },
}
