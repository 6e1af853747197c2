mod common;

use common::{synth, Rig};
use dawg_core::graph::GraphBackend;
use dawg_core::mixer::RouteOutcome;
use dawg_types::{EffectKind, FilterMode, InsertId, InstrumentId, NodeParam};

fn insert(n: u32) -> InsertId {
    InsertId::new(n)
}

#[test]
fn routing_twice_makes_one_connection() {
    let mut rig = Rig::new();
    let inst = InstrumentId::new(1);
    let output = rig.engine.add_instrument(inst, synth());
    rig.engine.create_mixer_insert(insert(1), "Lead").unwrap();

    assert_eq!(rig.engine.route_instrument_to_insert(inst, insert(1)).unwrap(), RouteOutcome::Routed);
    assert_eq!(
        rig.engine.route_instrument_to_insert(inst, insert(1)).unwrap(),
        RouteOutcome::AlreadyRouted
    );

    let mixer = rig.engine.mixer();
    let input = mixer.insert(insert(1)).unwrap().input();
    assert_eq!(mixer.graph().connection_count(output, input), 1);
    assert_eq!(mixer.routes_to(insert(1)), vec![inst]);
}

#[test]
fn bypassing_middle_effect_bridges_neighbours() {
    let mut rig = Rig::new();
    rig.engine.create_mixer_insert(insert(1), "Vox").unwrap();
    let a = rig.engine.add_effect_to_insert(insert(1), EffectKind::eq(), None).unwrap();
    let b = rig.engine.add_effect_to_insert(insert(1), EffectKind::compressor(), None).unwrap();
    let c = rig.engine.add_effect_to_insert(insert(1), EffectKind::reverb(), None).unwrap();

    rig.engine.set_effect_bypass(insert(1), b, true).unwrap();

    let mixer = rig.engine.mixer();
    let strip = mixer.insert(insert(1)).unwrap();
    let slot = |id| strip.effects()[strip.index_of(id).unwrap()].clone();
    let (a, b, c) = (slot(a), slot(b), slot(c));
    assert_eq!(strip.active_node_after(strip.index_of(a.id).unwrap()), c.input);
    assert!(mixer.graph().is_connected(a.output, c.input));
    assert!(!mixer.graph().is_connected(a.output, b.input));
    assert!(mixer.graph().has_path(strip.input(), strip.output()));

    // Re-enabling restores the full chain with its settings intact.
    rig.engine.set_effect_bypass(insert(1), b.id, false).unwrap();
    let mixer = rig.engine.mixer();
    assert!(mixer.graph().is_connected(a.output, b.input));
    assert!(mixer.graph().is_connected(b.output, c.input));
    assert_eq!(mixer.insert(insert(1)).unwrap().effects()[1].kind, EffectKind::compressor());
}

#[test]
fn fully_bypassed_chain_is_a_passthrough() {
    let mut rig = Rig::new();
    rig.engine.create_mixer_insert(insert(1), "Bass").unwrap();
    let f = rig
        .engine
        .add_effect_to_insert(insert(1), EffectKind::filter(FilterMode::LowPass), None)
        .unwrap();
    rig.engine.set_effect_bypass(insert(1), f, true).unwrap();

    let strip = rig.engine.mixer().insert(insert(1)).unwrap();
    assert_eq!(strip.active_node_before(1), strip.input());
    assert_eq!(strip.active_node_after(0), strip.gain_node());
    assert!(rig.engine.mixer().graph().is_connected(strip.input(), strip.gain_node()));
}

#[test]
fn released_channel_is_reused_lowest_first() {
    let mut rig = Rig::new();
    for (n, label) in [(1, "A"), (2, "B"), (3, "C")] {
        rig.engine.create_mixer_insert(insert(n), label).unwrap();
    }
    let mixer = rig.engine.mixer();
    assert_eq!(
        [mixer.channel_of(insert(1)), mixer.channel_of(insert(2)), mixer.channel_of(insert(3))],
        [Some(0), Some(1), Some(2)]
    );

    rig.engine.remove_mixer_insert(insert(2)).unwrap();
    rig.engine.create_mixer_insert(insert(4), "D").unwrap();
    assert_eq!(rig.engine.mixer().channel_of(insert(4)), Some(1));
}

#[test]
fn removing_insert_detaches_everything_first() {
    let mut rig = Rig::new();
    let inst = InstrumentId::new(1);
    rig.engine.add_instrument(inst, synth());
    rig.engine.create_mixer_insert(insert(1), "Drums").unwrap();
    rig.engine.create_mixer_insert(insert(2), "Reverb").unwrap();
    rig.engine.create_mixer_insert(insert(3), "Delay").unwrap();
    rig.engine.route_instrument_to_insert(inst, insert(1)).unwrap();
    rig.engine.create_send(insert(1), insert(2), 0.4).unwrap();
    rig.engine.create_send(insert(3), insert(1), 0.2).unwrap();

    let nodes_before = rig.engine.mixer().graph().node_count();
    rig.engine.remove_mixer_insert(insert(1)).unwrap();

    let mixer = rig.engine.mixer();
    assert!(mixer.insert(insert(1)).is_none());
    assert!(mixer.route_of(inst).is_none());
    assert!(mixer.insert(insert(3)).unwrap().sends().is_empty());
    assert_eq!(mixer.channel_of(insert(1)), None);
    assert!(mixer.graph().node_count() < nodes_before);
    assert!(rig.engine.remove_mixer_insert(insert(1)).is_err());

    // The instrument can be routed again once an insert exists.
    rig.engine.create_mixer_insert(insert(1), "Drums").unwrap();
    assert_eq!(rig.engine.route_instrument_to_insert(inst, insert(1)).unwrap(), RouteOutcome::Routed);
}

#[test]
fn strip_changes_are_ramped_and_batched() {
    let mut rig = Rig::new();
    rig.engine.create_mixer_insert(insert(1), "Keys").unwrap();
    rig.engine.flush();
    rig.endpoint.drain();

    for i in 0..20 {
        rig.engine.set_channel_volume(insert(1), i as f32 / 20.0).unwrap();
    }
    rig.engine.set_channel_pan(insert(1), -1.0).unwrap();
    rig.engine.flush();

    let msgs = rig.endpoint.drain();
    assert_eq!(msgs.len(), 1);
    let dawg_types::AudioMsg::ParamBatch(batch) = &msgs[0] else {
        panic!("expected a param batch, got {:?}", msgs[0]);
    };
    let gain_node = rig.engine.mixer().insert(insert(1)).unwrap().gain_node();
    let gains: Vec<_> = batch.iter().filter(|c| c.node == gain_node).collect();
    assert_eq!(gains.len(), 1);
    assert_eq!(gains[0].value, 19.0 / 20.0);
    assert!(batch.iter().all(|c| c.ramp_secs > 0.0));
    assert!(batch.iter().any(|c| c.param == NodeParam::LeftGain && (c.value - 1.0).abs() < 1e-6));
}
