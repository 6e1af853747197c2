//! One mixing channel's signal chain.
//!
//! ```text
//! input -> [active effects, in stack order] -> gain -> pan -> output (-> meter)
//! ```
//!
//! Bypass, insertion and reordering rewire only the boundary they touch.
//! If that fails structurally the whole chain is rebuilt from the stack.

use std::collections::BTreeMap;
use std::f32::consts::FRAC_PI_4;

use dawg_types::{EffectId, EffectKind, InsertId, NodeId, NodeKind, NodeParam, ParamChange};

use crate::error::{MixerError, TopologyError};
use crate::graph::{tolerate, GraphBackend};

/// Equal-power pan law. `pan` in [-1, 1]; returns (left, right) gains.
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let p = if pan.is_finite() { pan.clamp(-1.0, 1.0) } else { 0.0 };
    let angle = (p + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectSlot {
    pub id: EffectId,
    pub kind: EffectKind,
    pub input: NodeId,
    pub output: NodeId,
    pub bypassed: bool,
}

/// Post-fader tap feeding another insert's input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SendTap {
    pub level: f32,
    pub node: NodeId,
}

pub struct MixerInsert {
    id: InsertId,
    label: String,
    input: NodeId,
    gain_node: NodeId,
    pan_node: NodeId,
    output: NodeId,
    meter: Option<NodeId>,
    effects: Vec<EffectSlot>,
    gain: f32,
    pan: f32,
    muted: bool,
    soloed: bool,
    sleeping: bool,
    pub(crate) sends: BTreeMap<InsertId, SendTap>,
    next_effect_id: u32,
    ramp_secs: f64,
}

impl MixerInsert {
    pub fn build<G: GraphBackend + ?Sized>(
        g: &mut G,
        id: InsertId,
        label: &str,
        ramp_secs: f64,
        metering: bool,
    ) -> Result<Self, TopologyError> {
        let input = g.create_node(NodeKind::Junction);
        let gain_node = g.create_node(NodeKind::Gain);
        let pan_node = g.create_node(NodeKind::StereoPan);
        let output = g.create_node(NodeKind::Junction);
        g.connect(input, gain_node)?;
        g.connect(gain_node, pan_node)?;
        g.connect(pan_node, output)?;

        let mut insert = Self {
            id,
            label: label.to_string(),
            input,
            gain_node,
            pan_node,
            output,
            meter: None,
            effects: Vec::new(),
            gain: 1.0,
            pan: 0.0,
            muted: false,
            soloed: false,
            sleeping: false,
            sends: BTreeMap::new(),
            next_effect_id: 0,
            ramp_secs,
        };
        insert.write_param(g, gain_node, NodeParam::Gain, 1.0, 0.0)?;
        insert.write_pan(g, 0.0)?;
        if metering {
            insert.set_metering(g, true)?;
        }
        Ok(insert)
    }

    pub fn id(&self) -> InsertId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn input(&self) -> NodeId {
        self.input
    }

    pub fn output(&self) -> NodeId {
        self.output
    }

    pub fn gain_node(&self) -> NodeId {
        self.gain_node
    }

    pub fn pan_node(&self) -> NodeId {
        self.pan_node
    }

    pub fn meter(&self) -> Option<NodeId> {
        self.meter
    }

    pub fn effects(&self) -> &[EffectSlot] {
        &self.effects
    }

    pub fn effect_ids(&self) -> Vec<EffectId> {
        self.effects.iter().map(|s| s.id).collect()
    }

    pub fn index_of(&self, effect: EffectId) -> Option<usize> {
        self.effects.iter().position(|s| s.id == effect)
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_soloed(&self) -> bool {
        self.soloed
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping
    }

    pub fn sends(&self) -> &BTreeMap<InsertId, SendTap> {
        &self.sends
    }

    pub fn has_active_effects(&self) -> bool {
        self.effects.iter().any(|s| !s.bypassed)
    }

    /// Output of the nearest active effect before `index`, or the insert input.
    pub fn active_node_before(&self, index: usize) -> NodeId {
        self.effects[..index.min(self.effects.len())]
            .iter()
            .rev()
            .find(|s| !s.bypassed)
            .map_or(self.input, |s| s.output)
    }

    /// Input of the nearest active effect after `index`, or the gain stage.
    pub fn active_node_after(&self, index: usize) -> NodeId {
        self.effects
            .iter()
            .skip(index + 1)
            .find(|s| !s.bypassed)
            .map_or(self.gain_node, |s| s.input)
    }

    fn slot_index(&self, effect: EffectId) -> Result<usize, MixerError> {
        self.index_of(effect)
            .ok_or(MixerError::UnknownEffect { insert: self.id, effect })
    }

    // ── Effect stack ──

    pub fn add_effect<G: GraphBackend + ?Sized>(
        &mut self,
        g: &mut G,
        kind: EffectKind,
        index: Option<usize>,
    ) -> Result<EffectId, MixerError> {
        let index = index.unwrap_or(self.effects.len());
        if index > self.effects.len() {
            return Err(MixerError::IndexOutOfRange { index, len: self.effects.len() });
        }
        let id = EffectId::new(self.next_effect_id);
        self.next_effect_id += 1;

        let input = g.create_node(NodeKind::EffectInput(kind));
        let output = g.create_node(NodeKind::EffectOutput);
        g.connect(input, output)?;
        for (name, value) in kind.params() {
            g.set_param(ParamChange {
                node: input,
                param: NodeParam::Effect(name.to_string()),
                value,
                ramp_secs: 0.0,
            })?;
        }
        self.effects.insert(index, EffectSlot { id, kind, input, output, bypassed: false });

        if !self.sleeping {
            let result = self.splice_in(g, index);
            self.or_rebuild(g, result, "insert")?;
        }
        log::debug!(target: "mixer::insert", "insert {}: added {} ({}) at {}", self.id, kind.name(), id, index);
        Ok(id)
    }

    pub fn remove_effect<G: GraphBackend + ?Sized>(
        &mut self,
        g: &mut G,
        effect: EffectId,
    ) -> Result<EffectSlot, MixerError> {
        let index = self.slot_index(effect)?;
        let result = if self.sleeping || self.effects[index].bypassed {
            Ok(())
        } else {
            self.splice_out(g, index)
        };
        let slot = self.effects.remove(index);
        self.or_rebuild(g, result, "remove")?;
        for node in [slot.input, slot.output] {
            if let Err(e) = g.release_node(node) {
                log::debug!(target: "mixer::insert", "insert {}: release {}: {}", self.id, node, e);
            }
        }
        Ok(slot)
    }

    /// Toggle an effect in or out of the signal path. The effect keeps its
    /// settings while bypassed.
    pub fn set_bypass<G: GraphBackend + ?Sized>(
        &mut self,
        g: &mut G,
        effect: EffectId,
        bypassed: bool,
    ) -> Result<(), MixerError> {
        let index = self.slot_index(effect)?;
        if self.effects[index].bypassed == bypassed {
            return Ok(());
        }
        self.effects[index].bypassed = bypassed;
        if self.sleeping {
            return Ok(());
        }
        let result = if bypassed {
            self.splice_out(g, index)
        } else {
            self.splice_in(g, index)
        };
        self.or_rebuild(g, result, "bypass")?;
        Ok(())
    }

    /// Move the effect at `from` to `to`, rewiring only the span between them.
    pub fn reorder<G: GraphBackend + ?Sized>(
        &mut self,
        g: &mut G,
        from: usize,
        to: usize,
    ) -> Result<(), MixerError> {
        let len = self.effects.len();
        for index in [from, to] {
            if index >= len {
                return Err(MixerError::IndexOutOfRange { index, len });
            }
        }
        if from == to {
            return Ok(());
        }
        let (lo, hi) = (from.min(to), from.max(to));
        let prev = self.active_node_before(lo);
        let next = self.active_node_after(hi);
        let span_active = self.effects[lo..=hi].iter().any(|s| !s.bypassed);

        let slot = self.effects.remove(from);
        self.effects.insert(to, slot);

        if span_active && !self.sleeping {
            let result = self.rewire_span(g, lo, hi, prev, next);
            self.or_rebuild(g, result, "reorder")?;
        }
        Ok(())
    }

    pub fn set_effect_param<G: GraphBackend + ?Sized>(
        &mut self,
        g: &mut G,
        effect: EffectId,
        name: &str,
        value: f32,
    ) -> Result<f32, MixerError> {
        let index = self.slot_index(effect)?;
        let slot = &mut self.effects[index];
        let stored = slot
            .kind
            .set_param(name, value)
            .ok_or_else(|| MixerError::UnknownParam { effect, name: name.to_string() })?;
        let node = slot.input;
        self.write_param(g, node, NodeParam::Effect(name.to_string()), stored, self.ramp_secs)?;
        Ok(stored)
    }

    // ── Wiring ──

    fn splice_in<G: GraphBackend + ?Sized>(&self, g: &mut G, index: usize) -> Result<(), TopologyError> {
        let slot = &self.effects[index];
        let prev = self.active_node_before(index);
        let next = self.active_node_after(index);
        tolerate(g.disconnect(prev, next))?;
        tolerate(g.connect(prev, slot.input))?;
        tolerate(g.connect(slot.output, next))
    }

    fn splice_out<G: GraphBackend + ?Sized>(&self, g: &mut G, index: usize) -> Result<(), TopologyError> {
        let slot = &self.effects[index];
        let prev = self.active_node_before(index);
        let next = self.active_node_after(index);
        tolerate(g.disconnect(prev, slot.input))?;
        tolerate(g.disconnect(slot.output, next))?;
        tolerate(g.connect(prev, next))
    }

    fn rewire_span<G: GraphBackend + ?Sized>(
        &self,
        g: &mut G,
        lo: usize,
        hi: usize,
        prev: NodeId,
        next: NodeId,
    ) -> Result<(), TopologyError> {
        tolerate(g.disconnect_all(prev))?;
        for slot in &self.effects[lo..=hi] {
            tolerate(g.disconnect_all(slot.output))?;
        }
        let mut cursor = prev;
        for slot in self.effects[lo..=hi].iter().filter(|s| !s.bypassed) {
            tolerate(g.connect(cursor, slot.input))?;
            cursor = slot.output;
        }
        tolerate(g.connect(cursor, next))
    }

    fn or_rebuild<G: GraphBackend + ?Sized>(
        &mut self,
        g: &mut G,
        result: Result<(), TopologyError>,
        what: &str,
    ) -> Result<(), TopologyError> {
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                log::debug!(target: "mixer::insert", "insert {}: incremental {} failed ({}), full rebuild", self.id, what, e);
                self.rebuild(g)
            }
        }
    }

    /// Tear down and reconnect the whole chain from the effect stack.
    /// Slots whose nodes no longer exist are dropped.
    pub fn rebuild<G: GraphBackend + ?Sized>(&mut self, g: &mut G) -> Result<(), TopologyError> {
        let id = self.id;
        self.effects.retain(|s| {
            let alive = g.contains(s.input) && g.contains(s.output);
            if !alive {
                log::warn!(target: "mixer::insert", "insert {}: dropping effect {} with missing nodes", id, s.id);
            }
            alive
        });

        tolerate(g.disconnect_all(self.input))?;
        for slot in &self.effects {
            tolerate(g.disconnect_all(slot.output))?;
        }
        let mut cursor = self.input;
        if !self.sleeping {
            for slot in self.effects.iter().filter(|s| !s.bypassed) {
                tolerate(g.connect(cursor, slot.input))?;
                cursor = slot.output;
            }
        }
        tolerate(g.connect(cursor, self.gain_node))
    }

    // ── Auto-sleep ──

    /// Detach the effect stack; input passes straight to the gain stage.
    pub fn sleep<G: GraphBackend + ?Sized>(&mut self, g: &mut G) -> Result<(), TopologyError> {
        if self.sleeping {
            return Ok(());
        }
        self.sleeping = true;
        log::debug!(target: "mixer::insert", "insert {} asleep", self.id);
        self.rebuild(g)
    }

    pub fn wake<G: GraphBackend + ?Sized>(&mut self, g: &mut G) -> Result<(), TopologyError> {
        if !self.sleeping {
            return Ok(());
        }
        self.sleeping = false;
        log::debug!(target: "mixer::insert", "insert {} awake", self.id);
        self.rebuild(g)
    }

    // ── Fader ──

    fn write_param<G: GraphBackend + ?Sized>(
        &self,
        g: &mut G,
        node: NodeId,
        param: NodeParam,
        value: f32,
        ramp_secs: f64,
    ) -> Result<(), TopologyError> {
        g.set_param(ParamChange { node, param, value, ramp_secs })
    }

    fn write_pan<G: GraphBackend + ?Sized>(&self, g: &mut G, ramp_secs: f64) -> Result<(), TopologyError> {
        let (left, right) = pan_gains(self.pan);
        self.write_param(g, self.pan_node, NodeParam::LeftGain, left, ramp_secs)?;
        self.write_param(g, self.pan_node, NodeParam::RightGain, right, ramp_secs)
    }

    /// Gain actually applied, after mute and solo.
    pub fn effective_gain(&self, solo_active: bool) -> f32 {
        if self.muted || (solo_active && !self.soloed) {
            0.0
        } else {
            self.gain
        }
    }

    pub fn apply_gain<G: GraphBackend + ?Sized>(&self, g: &mut G, solo_active: bool) -> Result<(), TopologyError> {
        self.write_param(g, self.gain_node, NodeParam::Gain, self.effective_gain(solo_active), self.ramp_secs)
    }

    /// Linear gain, clamped to [0, 2].
    pub fn set_gain<G: GraphBackend + ?Sized>(
        &mut self,
        g: &mut G,
        gain: f32,
        solo_active: bool,
    ) -> Result<f32, TopologyError> {
        self.gain = if gain.is_finite() { gain.clamp(0.0, 2.0) } else { self.gain };
        self.apply_gain(g, solo_active)?;
        Ok(self.gain)
    }

    pub fn set_pan<G: GraphBackend + ?Sized>(&mut self, g: &mut G, pan: f32) -> Result<f32, TopologyError> {
        self.pan = if pan.is_finite() { pan.clamp(-1.0, 1.0) } else { self.pan };
        self.write_pan(g, self.ramp_secs)?;
        Ok(self.pan)
    }

    pub fn set_muted<G: GraphBackend + ?Sized>(
        &mut self,
        g: &mut G,
        muted: bool,
        solo_active: bool,
    ) -> Result<(), TopologyError> {
        self.muted = muted;
        self.apply_gain(g, solo_active)
    }

    /// Flag only; the owner re-applies gains across all inserts.
    pub(crate) fn set_soloed(&mut self, soloed: bool) {
        self.soloed = soloed;
    }

    pub fn set_metering<G: GraphBackend + ?Sized>(&mut self, g: &mut G, enabled: bool) -> Result<(), TopologyError> {
        match (enabled, self.meter) {
            (true, None) => {
                let meter = g.create_node(NodeKind::Meter { insert: self.id });
                tolerate(g.connect(self.output, meter))?;
                self.meter = Some(meter);
            }
            (false, Some(meter)) => {
                tolerate(g.disconnect(self.output, meter))?;
                g.release_node(meter)?;
                self.meter = None;
            }
            _ => {}
        }
        Ok(())
    }

    /// Release every node this insert owns. Routing into and out of the
    /// insert must already be detached.
    pub fn release<G: GraphBackend + ?Sized>(self, g: &mut G) {
        let mut nodes: Vec<NodeId> = self.sends.values().map(|s| s.node).collect();
        nodes.extend(self.effects.iter().flat_map(|s| [s.input, s.output]));
        nodes.extend(self.meter);
        nodes.extend([self.input, self.gain_node, self.pan_node, self.output]);
        for node in nodes {
            if let Err(e) = g.release_node(node) {
                log::debug!(target: "mixer::insert", "insert {}: release {}: {}", self.id, node, e);
            }
        }
    }
}
