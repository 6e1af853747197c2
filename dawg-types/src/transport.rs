use serde::{Deserialize, Serialize};

/// Playback state of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Notifications published by the transport.
///
/// `time` fields are audio clock seconds at which the boundary sounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransportEvent {
    Start { tick: u64, time: f64 },
    Stop,
    Pause { tick: u64 },
    Tick { tick: u64, time: f64 },
    Beat { beat: u64, time: f64 },
    Bar { bar: u64, time: f64 },
    /// The position wrapped from loop end back to `start_tick`.
    Loop { start_tick: u64, time: f64 },
    /// Throttled UI position update, in steps.
    PositionUpdate { step: f64 },
}

/// Subscription key for [`TransportEvent`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportEventKind {
    Start,
    Stop,
    Pause,
    Tick,
    Beat,
    Bar,
    Loop,
    PositionUpdate,
}

impl TransportEvent {
    pub fn kind(&self) -> TransportEventKind {
        match self {
            TransportEvent::Start { .. } => TransportEventKind::Start,
            TransportEvent::Stop => TransportEventKind::Stop,
            TransportEvent::Pause { .. } => TransportEventKind::Pause,
            TransportEvent::Tick { .. } => TransportEventKind::Tick,
            TransportEvent::Beat { .. } => TransportEventKind::Beat,
            TransportEvent::Bar { .. } => TransportEventKind::Bar,
            TransportEvent::Loop { .. } => TransportEventKind::Loop,
            TransportEvent::PositionUpdate { .. } => TransportEventKind::PositionUpdate,
        }
    }
}

impl TransportEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportEventKind::Start => "start",
            TransportEventKind::Stop => "stop",
            TransportEventKind::Pause => "pause",
            TransportEventKind::Tick => "tick",
            TransportEventKind::Beat => "beat",
            TransportEventKind::Bar => "bar",
            TransportEventKind::Loop => "loop",
            TransportEventKind::PositionUpdate => "positionUpdate",
        }
    }
}
