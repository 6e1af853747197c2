//! Control-thread side of the channel pair to the audio renderer.
//!
//! Two bounded lanes: notes are audio-critical and go out immediately on the
//! note lane; topology ops and parameter writes share the control lane and
//! are flushed at most once per frame, parameters coalesced into a single
//! `ParamBatch`. Nothing here ever blocks.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use dawg_types::{AudioFeedback, AudioMsg, GraphOp, NodeId, NodeParam, ParamChange};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkSettings {
    pub capacity: usize,
    pub frame_secs: f64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self { capacity: 1024, frame_secs: 0.016 }
    }
}

/// Cloneable sender for the note lane. Drops are counted across clones.
#[derive(Clone)]
pub struct NoteLane {
    tx: Sender<AudioMsg>,
    dropped: Arc<AtomicU64>,
    sent: Arc<AtomicU64>,
}

impl NoteLane {
    /// Fire-and-forget. Returns false (and logs) if the note was lost.
    pub fn send(&self, msg: AudioMsg) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(msg)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::error!(target: "link", "note lane full, dropped {:?}", msg);
                false
            }
            Err(TrySendError::Disconnected(msg)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::error!(target: "link", "renderer disconnected, dropped {:?}", msg);
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

/// Coalesces parameter writes per (node, param); the latest value wins.
/// Output keeps the order in which each key was first written.
#[derive(Default)]
pub struct ParamBatcher {
    order: Vec<(NodeId, NodeParam)>,
    pending: HashMap<(NodeId, NodeParam), ParamChange>,
    coalesced: u64,
}

impl ParamBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: ParamChange) {
        let key = (change.node, change.param.clone());
        if self.pending.insert(key.clone(), change).is_some() {
            self.coalesced += 1;
        } else {
            self.order.push(key);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Writes absorbed by a later write to the same parameter.
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    pub fn take(&mut self) -> Vec<ParamChange> {
        let mut pending = std::mem::take(&mut self.pending);
        std::mem::take(&mut self.order)
            .into_iter()
            .filter_map(|key| pending.remove(&key))
            .collect()
    }

    /// Put back a batch that could not be sent. Values written since the
    /// batch was taken are newer and win.
    pub fn restore(&mut self, batch: Vec<ParamChange>) {
        let mut order = Vec::with_capacity(batch.len() + self.order.len());
        for change in batch {
            let key = (change.node, change.param.clone());
            if !self.pending.contains_key(&key) {
                self.pending.insert(key.clone(), change);
                order.push(key);
            }
        }
        order.append(&mut self.order);
        self.order = order;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub topology_ops: usize,
    pub params: usize,
    /// Something stayed behind because the control lane was full.
    pub deferred: bool,
}

pub struct AudioLink {
    notes: NoteLane,
    control_tx: Sender<AudioMsg>,
    feedback_rx: Receiver<AudioFeedback>,
    batcher: ParamBatcher,
    topology_backlog: VecDeque<GraphOp>,
    frame_secs: f64,
    last_flush: Option<f64>,
    batches_sent: u64,
}

/// Renderer side of the link.
pub struct AudioEndpoint {
    pub notes: Receiver<AudioMsg>,
    pub control: Receiver<AudioMsg>,
    pub feedback: Sender<AudioFeedback>,
}

impl AudioEndpoint {
    /// Everything queued so far, note lane first.
    pub fn drain(&self) -> Vec<AudioMsg> {
        let mut out: Vec<AudioMsg> = self.notes.try_iter().collect();
        out.extend(self.control.try_iter());
        out
    }

    /// Send feedback to the control thread. False if the lane is full or
    /// the control side is gone.
    pub fn report(&self, feedback: AudioFeedback) -> bool {
        self.feedback.try_send(feedback).is_ok()
    }
}

impl AudioLink {
    pub fn pair(settings: LinkSettings) -> (AudioLink, AudioEndpoint) {
        let capacity = settings.capacity.max(1);
        let (note_tx, note_rx) = crossbeam_channel::bounded(capacity);
        let (control_tx, control_rx) = crossbeam_channel::bounded(capacity);
        let (feedback_tx, feedback_rx) = crossbeam_channel::bounded(capacity);
        let link = AudioLink {
            notes: NoteLane {
                tx: note_tx,
                dropped: Arc::new(AtomicU64::new(0)),
                sent: Arc::new(AtomicU64::new(0)),
            },
            control_tx,
            feedback_rx,
            batcher: ParamBatcher::new(),
            topology_backlog: VecDeque::new(),
            frame_secs: settings.frame_secs,
            last_flush: None,
            batches_sent: 0,
        };
        let endpoint = AudioEndpoint { notes: note_rx, control: control_rx, feedback: feedback_tx };
        (link, endpoint)
    }

    pub fn note_lane(&self) -> NoteLane {
        self.notes.clone()
    }

    pub fn send_note(&self, msg: AudioMsg) -> bool {
        self.notes.send(msg)
    }

    pub fn notes_dropped(&self) -> u64 {
        self.notes.dropped()
    }

    pub fn queue_topology(&mut self, ops: Vec<GraphOp>) {
        self.topology_backlog.extend(ops);
    }

    pub fn queue_param(&mut self, change: ParamChange) {
        self.batcher.push(change);
    }

    pub fn batcher(&self) -> &ParamBatcher {
        &self.batcher
    }

    pub fn batches_sent(&self) -> u64 {
        self.batches_sent
    }

    pub fn topology_backlog(&self) -> usize {
        self.topology_backlog.len()
    }

    /// Send queued topology, then one coalesced parameter batch. Without
    /// `force`, at most once per frame. Topology always goes first so that
    /// parameters never reference nodes the renderer has not created yet.
    pub fn flush_frame(&mut self, now: f64, force: bool) -> FlushReport {
        let mut report = FlushReport::default();
        if !force && self.last_flush.is_some_and(|last| now - last < self.frame_secs) {
            return report;
        }
        self.last_flush = Some(now);

        if !self.topology_backlog.is_empty() {
            let ops: Vec<GraphOp> = self.topology_backlog.drain(..).collect();
            let count = ops.len();
            match self.control_tx.try_send(AudioMsg::Topology(ops)) {
                Ok(()) => report.topology_ops = count,
                Err(TrySendError::Full(AudioMsg::Topology(ops)))
                | Err(TrySendError::Disconnected(AudioMsg::Topology(ops))) => {
                    log::warn!(target: "link", "control lane unavailable, holding {} topology ops", ops.len());
                    self.topology_backlog = ops.into();
                    report.deferred = true;
                    return report;
                }
                Err(_) => {}
            }
        }

        if !self.batcher.is_empty() {
            let batch = self.batcher.take();
            let count = batch.len();
            match self.control_tx.try_send(AudioMsg::ParamBatch(batch)) {
                Ok(()) => {
                    report.params = count;
                    self.batches_sent += 1;
                }
                Err(TrySendError::Full(AudioMsg::ParamBatch(batch)))
                | Err(TrySendError::Disconnected(AudioMsg::ParamBatch(batch))) => {
                    log::warn!(target: "link", "control lane unavailable, holding {} param changes", batch.len());
                    self.batcher.restore(batch);
                    report.deferred = true;
                }
                Err(_) => {}
            }
        }
        report
    }

    pub fn drain_feedback(&mut self) -> Vec<AudioFeedback> {
        self.feedback_rx.try_iter().collect()
    }
}
