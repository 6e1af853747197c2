//! Mixer graph manager: owns every insert, the instrument routing map, sends,
//! channel allocation and the master bus. It is the only mutator of any of
//! these; every method runs to completion on the control thread.

mod allocator;
mod insert;
mod sleep;

pub use allocator::ChannelAllocator;
pub use insert::{pan_gains, EffectSlot, MixerInsert, SendTap};
pub use sleep::{linear_to_db, AutoSleepMonitor, SleepAction, SleepSettings};

use std::collections::{BTreeMap, HashMap};

use dawg_types::{EffectId, EffectKind, InsertId, InstrumentId, MixerParam, NodeId, NodeKind, NodeParam, ParamChange};

use crate::error::{MixerError, TopologyError};
use crate::graph::{tolerate, GraphBackend, VirtualGraph};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixerSettings {
    /// Hardware channel pool size; 0 means the backend mixes without channels.
    pub channel_pool_size: usize,
    pub ramp_secs: f64,
    pub route_retry_attempts: u32,
    pub route_retry_base_secs: f64,
    /// Attach a metering tap to new inserts.
    pub metering: bool,
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            channel_pool_size: 32,
            ramp_secs: 0.015,
            route_retry_attempts: 5,
            route_retry_base_secs: 0.05,
            metering: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Routed,
    /// Already routed to that insert; nothing was touched.
    AlreadyRouted,
    /// The instrument output or the insert does not exist yet; queued for retry.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub insert: InsertId,
    pub output: NodeId,
}

#[derive(Debug, Clone, Copy)]
struct PendingRoute {
    instrument: InstrumentId,
    insert: InsertId,
    attempts: u32,
    next_try: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputPath {
    Channel { index: u8, node: NodeId },
    /// Straight into master (unbounded backend or pool exhausted).
    Direct,
}

pub struct MixerGraph<G: GraphBackend = VirtualGraph> {
    graph: G,
    settings: MixerSettings,
    inserts: BTreeMap<InsertId, MixerInsert>,
    routes: HashMap<InstrumentId, Route>,
    pending: Vec<PendingRoute>,
    allocator: Option<ChannelAllocator>,
    outputs: HashMap<InsertId, OutputPath>,
    master: NodeId,
    master_gain: f32,
    sleep: AutoSleepMonitor,
    meters: HashMap<InsertId, (f32, f32)>,
}

impl<G: GraphBackend> MixerGraph<G> {
    pub fn new(mut graph: G, settings: MixerSettings, sleep: SleepSettings) -> Result<Self, TopologyError> {
        let master = graph.create_node(NodeKind::Master);
        let destination = graph.create_node(NodeKind::Destination);
        graph.connect(master, destination)?;
        graph.set_param(ParamChange { node: master, param: NodeParam::Gain, value: 1.0, ramp_secs: 0.0 })?;
        let allocator = (settings.channel_pool_size > 0).then(|| ChannelAllocator::new(settings.channel_pool_size));
        Ok(Self {
            graph,
            settings,
            inserts: BTreeMap::new(),
            routes: HashMap::new(),
            pending: Vec::new(),
            allocator,
            outputs: HashMap::new(),
            master,
            master_gain: 1.0,
            sleep: AutoSleepMonitor::new(sleep),
            meters: HashMap::new(),
        })
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut G {
        &mut self.graph
    }

    pub fn settings(&self) -> MixerSettings {
        self.settings
    }

    pub fn master(&self) -> NodeId {
        self.master
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn insert(&self, id: InsertId) -> Option<&MixerInsert> {
        self.inserts.get(&id)
    }

    pub fn inserts(&self) -> impl Iterator<Item = &MixerInsert> {
        self.inserts.values()
    }

    pub fn insert_count(&self) -> usize {
        self.inserts.len()
    }

    /// Hardware channel assigned to `id`, if it got one.
    pub fn channel_of(&self, id: InsertId) -> Option<u8> {
        match self.outputs.get(&id) {
            Some(OutputPath::Channel { index, .. }) => Some(*index),
            _ => None,
        }
    }

    pub fn route_of(&self, instrument: InstrumentId) -> Option<Route> {
        self.routes.get(&instrument).copied()
    }

    pub fn routes_to(&self, insert: InsertId) -> Vec<InstrumentId> {
        let mut ids: Vec<InstrumentId> = self
            .routes
            .iter()
            .filter(|(_, r)| r.insert == insert)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub fn pending_routes(&self) -> usize {
        self.pending.len()
    }

    fn solo_active(&self) -> bool {
        self.inserts.values().any(|i| i.is_soloed())
    }

    fn parts(&mut self, id: InsertId) -> Result<(&mut MixerInsert, &mut G), MixerError> {
        let insert = self.inserts.get_mut(&id).ok_or(MixerError::UnknownInsert(id))?;
        Ok((insert, &mut self.graph))
    }

    // ── Inserts ──

    /// Create an insert, or return the existing one with that id.
    pub fn create_insert(&mut self, id: InsertId, label: &str) -> Result<&MixerInsert, MixerError> {
        if !self.inserts.contains_key(&id) {
            let solo_active = self.solo_active();
            let insert = MixerInsert::build(&mut self.graph, id, label, self.settings.ramp_secs, self.settings.metering)?;
            self.connect_output(&insert)?;
            if solo_active {
                insert.apply_gain(&mut self.graph, true)?;
            }
            log::debug!(target: "mixer", "created insert {} '{}'", id, label);
            self.inserts.insert(id, insert);
        }
        self.inserts.get(&id).ok_or(MixerError::UnknownInsert(id))
    }

    fn connect_output(&mut self, insert: &MixerInsert) -> Result<(), TopologyError> {
        let path = match self.allocator.as_mut() {
            None => OutputPath::Direct,
            Some(alloc) => match alloc.allocate(insert.id()) {
                Some(index) => {
                    let node = self.graph.create_node(NodeKind::Channel(index));
                    OutputPath::Channel { index, node }
                }
                None => {
                    log::warn!(
                        target: "mixer",
                        "channel pool exhausted ({} in use), insert {} routed directly to master",
                        alloc.in_use(),
                        insert.id()
                    );
                    OutputPath::Direct
                }
            },
        };
        match path {
            OutputPath::Channel { node, .. } => {
                tolerate(self.graph.connect(insert.output(), node))?;
                tolerate(self.graph.connect(node, self.master))?;
            }
            OutputPath::Direct => tolerate(self.graph.connect(insert.output(), self.master))?,
        }
        self.outputs.insert(insert.id(), path);
        Ok(())
    }

    /// Remove an insert: detach routed instruments, then every send that
    /// references it, then release its nodes and channel.
    pub fn remove_insert(&mut self, id: InsertId) -> Result<(), MixerError> {
        let input = self.inserts.get(&id).ok_or(MixerError::UnknownInsert(id))?.input();

        for instrument in self.routes_to(id) {
            if let Some(route) = self.routes.remove(&instrument) {
                tolerate(self.graph.disconnect(route.output, input))?;
                log::debug!(target: "mixer", "detached instrument {} from removed insert {}", instrument, id);
            }
        }

        let outgoing: Vec<InsertId> = self
            .inserts
            .get(&id)
            .map(|i| i.sends.keys().copied().collect())
            .unwrap_or_default();
        for bus in outgoing {
            self.remove_send(id, bus)?;
        }
        let incoming: Vec<InsertId> = self
            .inserts
            .values()
            .filter(|i| i.sends.contains_key(&id))
            .map(|i| i.id())
            .collect();
        for source in incoming {
            self.remove_send(source, id)?;
        }

        let insert = self.inserts.remove(&id).ok_or(MixerError::UnknownInsert(id))?;
        tolerate(self.graph.disconnect_all(insert.output()))?;
        if let Some(OutputPath::Channel { node, .. }) = self.outputs.remove(&id) {
            if let Err(e) = self.graph.release_node(node) {
                log::debug!(target: "mixer", "release channel node {}: {}", node, e);
            }
        }
        if let Some(alloc) = self.allocator.as_mut() {
            alloc.release(id);
        }
        let was_soloed = insert.is_soloed();
        insert.release(&mut self.graph);
        self.sleep.forget(id);
        self.meters.remove(&id);
        if was_soloed {
            self.apply_all_gains()?;
        }
        log::debug!(target: "mixer", "removed insert {}", id);
        Ok(())
    }

    // ── Instrument routing ──

    /// Route an instrument's output into an insert. `output` is None when
    /// the instrument does not exist (yet); such requests are retried.
    pub fn route_instrument(
        &mut self,
        instrument: InstrumentId,
        output: Option<NodeId>,
        insert: InsertId,
        now: f64,
    ) -> Result<RouteOutcome, MixerError> {
        let output = output.filter(|node| self.graph.contains(*node));
        let target = self.inserts.get(&insert).map(|i| i.input());
        let (Some(output), Some(target)) = (output, target) else {
            log::info!(
                target: "mixer",
                "route {} -> insert {} deferred: {} missing",
                instrument,
                insert,
                if target.is_none() { "insert" } else { "instrument" }
            );
            self.pending.retain(|p| p.instrument != instrument);
            self.pending.push(PendingRoute {
                instrument,
                insert,
                attempts: 0,
                next_try: now + self.settings.route_retry_base_secs,
            });
            return Ok(RouteOutcome::Deferred);
        };

        self.pending.retain(|p| p.instrument != instrument);
        let wanted = Route { insert, output };
        if self.routes.get(&instrument) == Some(&wanted) {
            return Ok(RouteOutcome::AlreadyRouted);
        }

        if let Some(old) = self.routes.remove(&instrument) {
            if let Some(old_insert) = self.inserts.get(&old.insert) {
                tolerate(self.graph.disconnect(old.output, old_insert.input()))?;
            }
        }
        tolerate(self.graph.connect(output, target))?;
        self.routes.insert(instrument, wanted);
        log::debug!(target: "mixer", "routed instrument {} -> insert {}", instrument, insert);
        Ok(RouteOutcome::Routed)
    }

    pub fn unroute_instrument(&mut self, instrument: InstrumentId) -> Result<bool, MixerError> {
        self.pending.retain(|p| p.instrument != instrument);
        let Some(route) = self.routes.remove(&instrument) else {
            return Ok(false);
        };
        if let Some(insert) = self.inserts.get(&route.insert) {
            tolerate(self.graph.disconnect(route.output, insert.input()))?;
        }
        Ok(true)
    }

    /// Retry deferred routes that are due, with exponential backoff.
    /// `lookup` resolves an instrument to its output node. Returns how many
    /// were routed.
    pub fn retry_pending<F>(&mut self, now: f64, lookup: F) -> usize
    where
        F: Fn(InstrumentId) -> Option<NodeId>,
    {
        if self.pending.is_empty() {
            return 0;
        }
        let mut routed = 0;
        let due: Vec<PendingRoute> = self.pending.iter().filter(|p| p.next_try <= now).copied().collect();
        for mut request in due {
            let output = lookup(request.instrument).filter(|n| self.graph.contains(*n));
            if output.is_some() && self.inserts.contains_key(&request.insert) {
                match self.route_instrument(request.instrument, output, request.insert, now) {
                    Ok(RouteOutcome::Routed | RouteOutcome::AlreadyRouted) => routed += 1,
                    Ok(RouteOutcome::Deferred) => {}
                    Err(e) => log::warn!(target: "mixer", "retry route {} failed: {}", request.instrument, e),
                }
                continue;
            }

            self.pending.retain(|p| p.instrument != request.instrument);
            request.attempts += 1;
            if request.attempts >= self.settings.route_retry_attempts {
                log::warn!(
                    target: "mixer",
                    "giving up routing instrument {} -> insert {} after {} attempts",
                    request.instrument,
                    request.insert,
                    request.attempts
                );
                continue;
            }
            request.next_try = now + self.settings.route_retry_base_secs * 2f64.powi(request.attempts as i32);
            self.pending.push(request);
        }
        routed
    }

    // ── Sends ──

    /// Tap `source`'s post-fader output into `bus` at `level`. Creating an
    /// existing send just updates its level.
    pub fn create_send(&mut self, source: InsertId, bus: InsertId, level: f32) -> Result<(), MixerError> {
        if source == bus {
            return Err(MixerError::SelfSend(source));
        }
        let bus_input = self.inserts.get(&bus).ok_or(MixerError::UnknownInsert(bus))?.input();
        let ramp = self.settings.ramp_secs;
        let (insert, graph) = self.parts(source)?;
        let level = clamp_level(level);
        if let Some(tap) = insert.sends.get_mut(&bus) {
            tap.level = level;
            graph.set_param(ParamChange { node: tap.node, param: NodeParam::Gain, value: level, ramp_secs: ramp })?;
            return Ok(());
        }
        let node = graph.create_node(NodeKind::Gain);
        graph.set_param(ParamChange { node, param: NodeParam::Gain, value: level, ramp_secs: 0.0 })?;
        tolerate(graph.connect(insert.output(), node))?;
        tolerate(graph.connect(node, bus_input))?;
        insert.sends.insert(bus, SendTap { level, node });
        log::debug!(target: "mixer", "send {} -> {} at {:.2}", source, bus, level);
        Ok(())
    }

    /// Returns false if there was no such send.
    pub fn remove_send(&mut self, source: InsertId, bus: InsertId) -> Result<bool, MixerError> {
        let bus_input = self.inserts.get(&bus).map(|i| i.input());
        let (insert, graph) = self.parts(source)?;
        let Some(tap) = insert.sends.remove(&bus) else {
            return Ok(false);
        };
        tolerate(graph.disconnect(insert.output(), tap.node))?;
        if let Some(bus_input) = bus_input {
            tolerate(graph.disconnect(tap.node, bus_input))?;
        }
        if let Err(e) = graph.release_node(tap.node) {
            log::debug!(target: "mixer", "release send node {}: {}", tap.node, e);
        }
        Ok(true)
    }

    pub fn update_send_level(&mut self, source: InsertId, bus: InsertId, level: f32) -> Result<(), MixerError> {
        let ramp = self.settings.ramp_secs;
        let (insert, graph) = self.parts(source)?;
        let tap = insert
            .sends
            .get_mut(&bus)
            .ok_or(MixerError::UnknownSend { insert: source, bus })?;
        tap.level = clamp_level(level);
        graph.set_param(ParamChange { node: tap.node, param: NodeParam::Gain, value: tap.level, ramp_secs: ramp })?;
        Ok(())
    }

    // ── Channel strip ──

    pub fn set_volume(&mut self, id: InsertId, gain: f32) -> Result<f32, MixerError> {
        let solo_active = self.solo_active();
        let (insert, graph) = self.parts(id)?;
        Ok(insert.set_gain(graph, gain, solo_active)?)
    }

    pub fn set_pan(&mut self, id: InsertId, pan: f32) -> Result<f32, MixerError> {
        let (insert, graph) = self.parts(id)?;
        Ok(insert.set_pan(graph, pan)?)
    }

    pub fn set_mute(&mut self, id: InsertId, muted: bool) -> Result<(), MixerError> {
        let solo_active = self.solo_active();
        let (insert, graph) = self.parts(id)?;
        Ok(insert.set_muted(graph, muted, solo_active)?)
    }

    /// Soloing any insert silences every insert that is not soloed.
    pub fn set_solo(&mut self, id: InsertId, soloed: bool) -> Result<(), MixerError> {
        let (insert, _) = self.parts(id)?;
        if insert.is_soloed() == soloed {
            return Ok(());
        }
        insert.set_soloed(soloed);
        self.apply_all_gains()?;
        Ok(())
    }

    fn apply_all_gains(&mut self) -> Result<(), TopologyError> {
        let solo_active = self.solo_active();
        for insert in self.inserts.values() {
            insert.apply_gain(&mut self.graph, solo_active)?;
        }
        Ok(())
    }

    pub fn set_master_gain(&mut self, gain: f32) -> Result<f32, MixerError> {
        if gain.is_finite() {
            self.master_gain = gain.clamp(0.0, 2.0);
        }
        self.graph.set_param(ParamChange {
            node: self.master,
            param: NodeParam::Gain,
            value: self.master_gain,
            ramp_secs: self.settings.ramp_secs,
        })?;
        Ok(self.master_gain)
    }

    // ── Effects ──

    pub fn add_effect(&mut self, id: InsertId, kind: EffectKind, index: Option<usize>) -> Result<EffectId, MixerError> {
        let (insert, graph) = self.parts(id)?;
        insert.add_effect(graph, kind, index)
    }

    pub fn remove_effect(&mut self, id: InsertId, effect: EffectId) -> Result<(), MixerError> {
        let (insert, graph) = self.parts(id)?;
        insert.remove_effect(graph, effect).map(|_| ())
    }

    pub fn set_bypass(&mut self, id: InsertId, effect: EffectId, bypassed: bool) -> Result<(), MixerError> {
        let (insert, graph) = self.parts(id)?;
        insert.set_bypass(graph, effect, bypassed)
    }

    pub fn reorder_effects(&mut self, id: InsertId, from: usize, to: usize) -> Result<(), MixerError> {
        let (insert, graph) = self.parts(id)?;
        insert.reorder(graph, from, to)
    }

    pub fn set_effect_param(
        &mut self,
        id: InsertId,
        effect: EffectId,
        name: &str,
        value: f32,
    ) -> Result<f32, MixerError> {
        let (insert, graph) = self.parts(id)?;
        insert.set_effect_param(graph, effect, name, value)
    }

    /// Apply an automation value through the ramped setter for `param`.
    pub fn apply_param(&mut self, id: InsertId, param: &MixerParam, value: f32) -> Result<(), MixerError> {
        match param {
            MixerParam::Volume => self.set_volume(id, value).map(|_| ()),
            MixerParam::Pan => self.set_pan(id, value).map(|_| ()),
            MixerParam::SendLevel { bus } => self.update_send_level(id, *bus, value),
            MixerParam::EffectParam { effect, name } => self.set_effect_param(id, *effect, name, value).map(|_| ()),
        }
    }

    pub fn effect_ids(&self, id: InsertId) -> Result<Vec<EffectId>, MixerError> {
        self.inserts
            .get(&id)
            .map(|i| i.effect_ids())
            .ok_or(MixerError::UnknownInsert(id))
    }

    pub fn set_metering(&mut self, id: InsertId, enabled: bool) -> Result<(), MixerError> {
        let (insert, graph) = self.parts(id)?;
        insert.set_metering(graph, enabled)?;
        if !enabled {
            self.meters.remove(&id);
            self.sleep.forget(id);
        }
        Ok(())
    }

    // ── Metering and auto-sleep ──

    pub fn record_meter(&mut self, id: InsertId, input_peak: f32, output_peak: f32, now: f64) {
        if !self.inserts.contains_key(&id) {
            return;
        }
        self.meters.insert(id, (input_peak, output_peak));
        self.sleep.record(id, input_peak, output_peak, now);
    }

    /// Last (input, output) peaks reported for an insert.
    pub fn meter_level(&self, id: InsertId) -> Option<(f32, f32)> {
        self.meters.get(&id).copied()
    }

    /// Apply due sleep/wake transitions for all inserts. Returns how many
    /// inserts changed state.
    pub fn poll_auto_sleep(&mut self, now: f64) -> usize {
        let mut changed = 0;
        for action in self.sleep.poll(now) {
            let (id, result) = match action {
                SleepAction::Sleep(id) => match self.inserts.get_mut(&id) {
                    Some(insert) => (id, insert.sleep(&mut self.graph)),
                    None => continue,
                },
                SleepAction::Wake(id) => match self.inserts.get_mut(&id) {
                    Some(insert) => (id, insert.wake(&mut self.graph)),
                    None => continue,
                },
            };
            match result {
                Ok(()) => changed += 1,
                Err(e) => log::warn!(target: "mixer", "auto-sleep transition for insert {} failed: {}", id, e),
            }
        }
        changed
    }
}

fn clamp_level(level: f32) -> f32 {
    if level.is_finite() {
        level.clamp(0.0, 2.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer(pool: usize) -> MixerGraph {
        let settings = MixerSettings { channel_pool_size: pool, metering: false, ..MixerSettings::default() };
        MixerGraph::new(VirtualGraph::new(), settings, SleepSettings::default()).unwrap()
    }

    fn id(n: u32) -> InsertId {
        InsertId::new(n)
    }

    #[test]
    fn create_insert_is_idempotent() {
        let mut m = mixer(4);
        let first = m.create_insert(id(1), "Drums").unwrap().input();
        let again = m.create_insert(id(1), "Other").unwrap();
        assert_eq!(again.input(), first);
        assert_eq!(again.label(), "Drums");
        assert_eq!(m.insert_count(), 1);
    }

    #[test]
    fn insert_reaches_master_through_channel() {
        let mut m = mixer(4);
        m.create_insert(id(1), "Drums").unwrap();
        let ins = m.insert(id(1)).unwrap();
        assert_eq!(m.channel_of(id(1)), Some(0));
        assert!(m.graph().has_path(ins.input(), m.master()));
    }

    #[test]
    fn pool_exhaustion_falls_back_to_master() {
        let mut m = mixer(1);
        m.create_insert(id(1), "A").unwrap();
        m.create_insert(id(2), "B").unwrap();
        assert_eq!(m.channel_of(id(2)), None);
        let out = m.insert(id(2)).unwrap().output();
        assert!(m.graph().is_connected(out, m.master()));
    }

    #[test]
    fn unbounded_backend_goes_direct() {
        let mut m = mixer(0);
        m.create_insert(id(1), "A").unwrap();
        assert_eq!(m.channel_of(id(1)), None);
        let out = m.insert(id(1)).unwrap().output();
        assert!(m.graph().is_connected(out, m.master()));
    }

    #[test]
    fn reroute_detaches_old_insert() {
        let mut m = mixer(4);
        m.create_insert(id(1), "A").unwrap();
        m.create_insert(id(2), "B").unwrap();
        let synth = m.graph_mut().create_node(NodeKind::InstrumentOutput(InstrumentId::new(7)));
        let inst = InstrumentId::new(7);

        assert_eq!(m.route_instrument(inst, Some(synth), id(1), 0.0).unwrap(), RouteOutcome::Routed);
        assert_eq!(m.route_instrument(inst, Some(synth), id(2), 0.0).unwrap(), RouteOutcome::Routed);
        let a = m.insert(id(1)).unwrap().input();
        let b = m.insert(id(2)).unwrap().input();
        assert!(!m.graph().is_connected(synth, a));
        assert!(m.graph().is_connected(synth, b));
        assert_eq!(m.route_of(inst).map(|r| r.insert), Some(id(2)));
    }

    #[test]
    fn missing_targets_are_retried_with_backoff() {
        let mut m = mixer(4);
        let inst = InstrumentId::new(3);
        assert_eq!(m.route_instrument(inst, None, id(1), 0.0).unwrap(), RouteOutcome::Deferred);
        assert_eq!(m.pending_routes(), 1);

        // Not due yet.
        assert_eq!(m.retry_pending(0.01, |_| None), 0);
        // Due, still missing: backoff doubles.
        assert_eq!(m.retry_pending(0.05, |_| None), 0);
        assert_eq!(m.pending_routes(), 1);
        assert_eq!(m.retry_pending(0.1, |_| None), 0);

        m.create_insert(id(1), "Late").unwrap();
        let node = m.graph_mut().create_node(NodeKind::InstrumentOutput(inst));
        assert_eq!(m.retry_pending(0.16, move |_| Some(node)), 1);
        assert_eq!(m.pending_routes(), 0);
        assert_eq!(m.route_of(inst).map(|r| r.insert), Some(id(1)));
    }

    #[test]
    fn retry_gives_up_after_limit() {
        let mut m = mixer(4);
        let inst = InstrumentId::new(3);
        m.route_instrument(inst, None, id(1), 0.0).unwrap();
        let mut now = 0.0;
        for _ in 0..10 {
            now += 10.0;
            m.retry_pending(now, |_| None);
        }
        assert_eq!(m.pending_routes(), 0);
    }

    #[test]
    fn sends_tap_post_fader() {
        let mut m = mixer(4);
        m.create_insert(id(1), "Vox").unwrap();
        m.create_insert(id(2), "Reverb").unwrap();
        m.create_send(id(1), id(2), 0.5).unwrap();

        let tap = m.insert(id(1)).unwrap().sends()[&id(2)];
        let out = m.insert(id(1)).unwrap().output();
        let bus_in = m.insert(id(2)).unwrap().input();
        assert!(m.graph().is_connected(out, tap.node));
        assert!(m.graph().is_connected(tap.node, bus_in));
        assert_eq!(m.graph().param(tap.node, &NodeParam::Gain), Some(0.5));

        m.update_send_level(id(1), id(2), 0.8).unwrap();
        assert_eq!(m.insert(id(1)).unwrap().sends()[&id(2)].level, 0.8);
        assert!(matches!(m.create_send(id(1), id(1), 1.0), Err(MixerError::SelfSend(_))));
        assert!(matches!(
            m.update_send_level(id(2), id(1), 1.0),
            Err(MixerError::UnknownSend { .. })
        ));
    }

    #[test]
    fn solo_silences_others() {
        let mut m = mixer(4);
        m.create_insert(id(1), "A").unwrap();
        m.create_insert(id(2), "B").unwrap();
        m.set_solo(id(1), true).unwrap();
        let gain_a = m.insert(id(1)).unwrap().gain_node();
        let gain_b = m.insert(id(2)).unwrap().gain_node();
        assert_eq!(m.graph().param(gain_a, &NodeParam::Gain), Some(1.0));
        assert_eq!(m.graph().param(gain_b, &NodeParam::Gain), Some(0.0));

        m.create_insert(id(3), "C").unwrap();
        let gain_c = m.insert(id(3)).unwrap().gain_node();
        assert_eq!(m.graph().param(gain_c, &NodeParam::Gain), Some(0.0));

        m.set_solo(id(1), false).unwrap();
        assert_eq!(m.graph().param(gain_b, &NodeParam::Gain), Some(1.0));
    }

    #[test]
    fn auto_sleep_detaches_and_restores_effects() {
        let mut m = mixer(4);
        m.create_insert(id(1), "Pad").unwrap();
        m.add_effect(id(1), EffectKind::reverb(), None).unwrap();
        m.record_meter(id(1), 0.0, 0.0, 0.0);
        assert_eq!(m.poll_auto_sleep(0.0), 0);
        assert_eq!(m.poll_auto_sleep(2.5), 1);
        assert!(m.insert(id(1)).unwrap().is_sleeping());

        m.record_meter(id(1), 0.5, 0.0, 2.6);
        assert_eq!(m.poll_auto_sleep(3.0), 1);
        assert!(!m.insert(id(1)).unwrap().is_sleeping());
        assert_eq!(m.meter_level(id(1)), Some((0.5, 0.0)));
    }

    #[test]
    fn remove_effect_and_list() {
        let mut m = mixer(4);
        m.create_insert(id(1), "A").unwrap();
        let a = m.add_effect(id(1), EffectKind::delay(), None).unwrap();
        let b = m.add_effect(id(1), EffectKind::chorus(), None).unwrap();
        m.remove_effect(id(1), a).unwrap();
        assert_eq!(m.effect_ids(id(1)).unwrap(), vec![b]);
        assert!(m.effect_ids(id(9)).is_err());
    }

    #[test]
    fn automation_values_go_through_ramped_setters() {
        let mut m = mixer(4);
        m.create_insert(id(1), "Lead").unwrap();
        m.create_insert(id(2), "Verb").unwrap();
        m.create_send(id(1), id(2), 0.2).unwrap();
        let delay = m.add_effect(id(1), EffectKind::delay(), None).unwrap();
        m.graph_mut().take_param_changes();

        m.apply_param(id(1), &MixerParam::Volume, 0.25).unwrap();
        m.apply_param(id(1), &MixerParam::Pan, -1.0).unwrap();
        m.apply_param(id(1), &MixerParam::SendLevel { bus: id(2) }, 0.7).unwrap();
        m.apply_param(id(1), &MixerParam::EffectParam { effect: delay, name: "feedback".into() }, 0.5)
            .unwrap();

        let ins = m.insert(id(1)).unwrap();
        assert_eq!(ins.gain(), 0.25);
        assert_eq!(ins.pan(), -1.0);
        assert_eq!(ins.sends()[&id(2)].level, 0.7);
        let changes = m.graph_mut().take_param_changes();
        assert!(changes.iter().any(|c| c.param == NodeParam::Effect("feedback".into()) && c.value == 0.5));
        assert!(changes.iter().all(|c| c.ramp_secs > 0.0));

        assert!(m.apply_param(id(9), &MixerParam::Volume, 1.0).is_err());
        assert!(m
            .apply_param(id(1), &MixerParam::EffectParam { effect: delay, name: "nope".into() }, 1.0)
            .is_err());
    }
}
