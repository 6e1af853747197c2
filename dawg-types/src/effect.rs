use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMode {
    LowPass,
    HighPass,
    BandPass,
    Notch,
}

/// Effect variants with the settings each one accepts.
///
/// The DSP itself lives in the audio renderer; this side only carries the
/// settings and knows which processor to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EffectKind {
    Reverb {
        decay_secs: f32,
        mix: f32,
    },
    Delay {
        time_secs: f32,
        feedback: f32,
        mix: f32,
    },
    Filter {
        mode: FilterMode,
        cutoff_hz: f32,
        resonance: f32,
    },
    ThreeBandEq {
        low_db: f32,
        mid_db: f32,
        high_db: f32,
    },
    Compressor {
        threshold_db: f32,
        ratio: f32,
        attack_ms: f32,
        release_ms: f32,
    },
    Distortion {
        drive: f32,
        mix: f32,
    },
    Chorus {
        rate_hz: f32,
        depth: f32,
        mix: f32,
    },
}

impl EffectKind {
    pub fn reverb() -> Self {
        EffectKind::Reverb { decay_secs: 2.0, mix: 0.3 }
    }

    pub fn delay() -> Self {
        EffectKind::Delay { time_secs: 0.375, feedback: 0.35, mix: 0.25 }
    }

    pub fn filter(mode: FilterMode) -> Self {
        EffectKind::Filter { mode, cutoff_hz: 1_000.0, resonance: 0.7 }
    }

    pub fn eq() -> Self {
        EffectKind::ThreeBandEq { low_db: 0.0, mid_db: 0.0, high_db: 0.0 }
    }

    pub fn compressor() -> Self {
        EffectKind::Compressor { threshold_db: -18.0, ratio: 4.0, attack_ms: 10.0, release_ms: 120.0 }
    }

    pub fn distortion() -> Self {
        EffectKind::Distortion { drive: 0.5, mix: 1.0 }
    }

    pub fn chorus() -> Self {
        EffectKind::Chorus { rate_hz: 0.8, depth: 0.4, mix: 0.5 }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EffectKind::Reverb { .. } => "Reverb",
            EffectKind::Delay { .. } => "Delay",
            EffectKind::Filter { .. } => "Filter",
            EffectKind::ThreeBandEq { .. } => "3-Band EQ",
            EffectKind::Compressor { .. } => "Compressor",
            EffectKind::Distortion { .. } => "Distortion",
            EffectKind::Chorus { .. } => "Chorus",
        }
    }

    /// Name of the renderer-side processor that implements this effect.
    pub fn processor_name(&self) -> &'static str {
        match self {
            EffectKind::Reverb { .. } => "dawg_reverb",
            EffectKind::Delay { .. } => "dawg_delay",
            EffectKind::Filter { .. } => "dawg_filter",
            EffectKind::ThreeBandEq { .. } => "dawg_eq3",
            EffectKind::Compressor { .. } => "dawg_compressor",
            EffectKind::Distortion { .. } => "dawg_distortion",
            EffectKind::Chorus { .. } => "dawg_chorus",
        }
    }

    /// Current settings as (name, value) pairs, in a stable order.
    pub fn params(&self) -> Vec<(&'static str, f32)> {
        match *self {
            EffectKind::Reverb { decay_secs, mix } => vec![("decay", decay_secs), ("mix", mix)],
            EffectKind::Delay { time_secs, feedback, mix } => {
                vec![("time", time_secs), ("feedback", feedback), ("mix", mix)]
            }
            EffectKind::Filter { mode, cutoff_hz, resonance } => vec![
                ("mode", mode as u8 as f32),
                ("cutoff", cutoff_hz),
                ("resonance", resonance),
            ],
            EffectKind::ThreeBandEq { low_db, mid_db, high_db } => {
                vec![("low", low_db), ("mid", mid_db), ("high", high_db)]
            }
            EffectKind::Compressor { threshold_db, ratio, attack_ms, release_ms } => vec![
                ("threshold", threshold_db),
                ("ratio", ratio),
                ("attack", attack_ms),
                ("release", release_ms),
            ],
            EffectKind::Distortion { drive, mix } => vec![("drive", drive), ("mix", mix)],
            EffectKind::Chorus { rate_hz, depth, mix } => {
                vec![("rate", rate_hz), ("depth", depth), ("mix", mix)]
            }
        }
    }

    /// Update one setting, clamped to its valid range.
    /// Returns the stored value, or None if this variant has no such parameter.
    pub fn set_param(&mut self, name: &str, value: f32) -> Option<f32> {
        if !value.is_finite() {
            return None;
        }
        let slot = match (self, name) {
            (EffectKind::Reverb { decay_secs, .. }, "decay") => store(decay_secs, value, 0.1, 30.0),
            (EffectKind::Reverb { mix, .. }, "mix")
            | (EffectKind::Delay { mix, .. }, "mix")
            | (EffectKind::Distortion { mix, .. }, "mix")
            | (EffectKind::Chorus { mix, .. }, "mix") => store(mix, value, 0.0, 1.0),
            (EffectKind::Delay { time_secs, .. }, "time") => store(time_secs, value, 0.001, 4.0),
            (EffectKind::Delay { feedback, .. }, "feedback") => store(feedback, value, 0.0, 0.95),
            (EffectKind::Filter { cutoff_hz, .. }, "cutoff") => store(cutoff_hz, value, 20.0, 20_000.0),
            (EffectKind::Filter { resonance, .. }, "resonance") => store(resonance, value, 0.1, 20.0),
            (EffectKind::ThreeBandEq { low_db, .. }, "low") => store(low_db, value, -24.0, 24.0),
            (EffectKind::ThreeBandEq { mid_db, .. }, "mid") => store(mid_db, value, -24.0, 24.0),
            (EffectKind::ThreeBandEq { high_db, .. }, "high") => store(high_db, value, -24.0, 24.0),
            (EffectKind::Compressor { threshold_db, .. }, "threshold") => {
                store(threshold_db, value, -60.0, 0.0)
            }
            (EffectKind::Compressor { ratio, .. }, "ratio") => store(ratio, value, 1.0, 20.0),
            (EffectKind::Compressor { attack_ms, .. }, "attack") => store(attack_ms, value, 0.1, 200.0),
            (EffectKind::Compressor { release_ms, .. }, "release") => {
                store(release_ms, value, 5.0, 2_000.0)
            }
            (EffectKind::Distortion { drive, .. }, "drive") => store(drive, value, 0.0, 1.0),
            (EffectKind::Chorus { rate_hz, .. }, "rate") => store(rate_hz, value, 0.05, 10.0),
            (EffectKind::Chorus { depth, .. }, "depth") => store(depth, value, 0.0, 1.0),
            _ => return None,
        };
        Some(slot)
    }
}

fn store(slot: &mut f32, value: f32, min: f32, max: f32) -> f32 {
    *slot = value.clamp(min, max);
    *slot
}
