use dawg_types::{EffectId, InsertId, NodeId, TransportState};
use thiserror::Error;

/// Rejected configuration values (tempo, loop range, resolution).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("bpm must be a positive finite number, got {0}")]
    InvalidBpm(f64),
    #[error("loop end ({end}) must be greater than loop start ({start})")]
    InvalidLoop { start: f64, end: f64 },
    #[error("clock resolution must be positive and divisible into steps")]
    InvalidResolution,
    #[error("step position must be a non-negative finite number, got {0}")]
    InvalidStep(f64),
}

/// Audio graph connection errors.
///
/// `AlreadyConnected` and `NotConnected` are expected churn and callers treat
/// them as no-ops; only `MissingNode` is a structural fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("{from} is already connected to {to}")]
    AlreadyConnected { from: NodeId, to: NodeId },
    #[error("{from} is not connected to {to}")]
    NotConnected { from: NodeId, to: NodeId },
    #[error("{0} does not exist")]
    MissingNode(NodeId),
}

impl TopologyError {
    pub fn is_structural(&self) -> bool {
        matches!(self, TopologyError::MissingNode(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {action} while {from:?}")]
pub struct TransportError {
    pub from: TransportState,
    pub action: &'static str,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MixerError {
    #[error("insert {0} does not exist")]
    UnknownInsert(InsertId),
    #[error("effect {effect} does not exist on insert {insert}")]
    UnknownEffect { insert: InsertId, effect: EffectId },
    #[error("effect {effect} has no parameter '{name}'")]
    UnknownParam { effect: EffectId, name: String },
    #[error("index {index} out of range for a stack of {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("insert {insert} has no send to {bus}")]
    UnknownSend { insert: InsertId, bus: InsertId },
    #[error("an insert cannot send to itself ({0})")]
    SelfSend(InsertId),
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ScheduleError {
    #[error("fire time must be finite and non-negative, got {0}")]
    InvalidFireTime(f64),
}

/// Failure to construct an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriverError {
    #[error("engine thread has stopped")]
    Disconnected,
    #[error(transparent)]
    Config(#[from] ConfigError),
}
