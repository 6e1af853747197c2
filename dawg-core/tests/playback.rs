mod common;

use common::{pulse_pattern, synth, Rig};
use dawg_core::content::{Arrangement, Note, PatternId};
use dawg_core::playback::PlayMode;
use dawg_types::{InstrumentId, TransportState};

#[test]
fn rapid_requests_collapse_into_one_pass() {
    let mut rig = Rig::new();
    let inst = InstrumentId::new(1);
    rig.engine.add_instrument(inst, synth());
    rig.engine.add_pattern(pulse_pattern(1, inst, 16, 4));
    rig.engine.play(None);
    let baseline = rig.engine.playback().executions();

    for _ in 0..10 {
        rig.engine.request_reschedule();
        rig.clock.advance(0.001);
        rig.engine.poll();
    }
    assert_eq!(rig.engine.playback().executions(), baseline);

    rig.clock.advance(0.016);
    rig.engine.poll();
    assert_eq!(rig.engine.playback().executions(), baseline + 1);

    rig.clock.advance(0.1);
    rig.engine.poll();
    assert_eq!(rig.engine.playback().executions(), baseline + 1);
}

#[test]
fn forced_pass_cancels_pending_debounce() {
    let mut rig = Rig::new();
    let inst = InstrumentId::new(1);
    rig.engine.add_instrument(inst, synth());
    rig.engine.add_pattern(pulse_pattern(1, inst, 16, 4));
    rig.engine.play(None);
    let baseline = rig.engine.playback().executions();

    rig.engine.request_reschedule();
    assert!(rig.engine.playback().reschedule_pending());
    rig.engine.jump_to_step(0.0).unwrap();
    assert_eq!(rig.engine.playback().executions(), baseline + 1);
    assert!(!rig.engine.playback().reschedule_pending());

    rig.clock.advance(0.05);
    rig.engine.poll();
    assert_eq!(rig.engine.playback().executions(), baseline + 1);
}

#[test]
fn edit_lands_in_the_running_loop() {
    let mut rig = Rig::new();
    let inst = InstrumentId::new(1);
    rig.engine.add_instrument(inst, synth());
    rig.engine.add_pattern(pulse_pattern(1, inst, 16, 16));
    rig.engine.select_pattern(PatternId::new(1));
    assert_eq!(rig.engine.loop_region().end_tick, 16 * 24);

    rig.engine.play(None);
    rig.run_for(0.5);
    rig.note_ons();

    // Add a note at step 8, ahead of the position (step 4).
    rig.engine.edit_pattern(PatternId::new(1), |p| p.add_note(Note::new(inst, 64, 8.0, 1.0)));
    rig.run_for(0.6);
    let pitches: Vec<u8> = rig.note_ons().iter().map(|n| n.1).collect();
    assert_eq!(pitches, vec![64]);
}

#[test]
fn song_mode_switch_keeps_playing() {
    let mut rig = Rig::new();
    let inst = InstrumentId::new(1);
    rig.engine.add_instrument(inst, synth());
    rig.engine.add_pattern(pulse_pattern(1, inst, 16, 4));
    rig.engine.add_pattern(pulse_pattern(2, inst, 8, 2));
    rig.engine.select_pattern(PatternId::new(2));
    let mut song = Arrangement::default();
    song.place(PatternId::new(1), 0);
    song.place(PatternId::new(2), 16);
    rig.engine.set_arrangement(song);

    rig.engine.play(None);
    rig.run_for(0.75);
    // Pattern 2 loops over 8 steps; the song spans 24.
    assert_eq!(rig.engine.loop_region().end_tick, 8 * 24);

    rig.engine.set_play_mode(PlayMode::Song);
    assert_eq!(rig.engine.state(), TransportState::Playing);
    assert_eq!(rig.engine.play_mode(), PlayMode::Song);
    assert_eq!(rig.engine.loop_region().end_tick, 24 * 24);
    let position = rig.engine.current_position();
    assert!(position > 5.0 && position < 7.0, "position {}", position);

    rig.run_for(1.0);
    assert!(!rig.note_ons().is_empty());
}
