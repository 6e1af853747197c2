use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Waveform {
    Sine,
    Saw,
    Square,
    Triangle,
}

/// Instrument categories. Each variant carries only what that category needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstrumentKind {
    Synth {
        waveform: Waveform,
        voices: u8,
    },
    /// Sample playback. Notes are skipped until the sample has loaded.
    Sampler {
        sample: String,
        loaded: bool,
    },
    DrumKit {
        pads: u8,
    },
}

impl InstrumentKind {
    pub fn name(&self) -> &'static str {
        match self {
            InstrumentKind::Synth { .. } => "Synth",
            InstrumentKind::Sampler { .. } => "Sampler",
            InstrumentKind::DrumKit { .. } => "Drum Kit",
        }
    }

    /// Whether every resource the instrument needs to sound is available.
    pub fn is_ready(&self) -> bool {
        match self {
            InstrumentKind::Synth { .. } | InstrumentKind::DrumKit { .. } => true,
            InstrumentKind::Sampler { loaded, .. } => *loaded,
        }
    }

    /// Maximum simultaneous voices.
    pub fn polyphony(&self) -> u8 {
        match self {
            InstrumentKind::Synth { voices, .. } => *voices,
            InstrumentKind::Sampler { .. } => 16,
            InstrumentKind::DrumKit { pads } => *pads,
        }
    }
}
