use std::fs::File;
use std::thread;
use std::time::{Duration, Instant};

use dawg_core::audio_clock::SystemClock;
use dawg_core::content::{Note, Pattern, PatternId};
use dawg_core::driver::EngineHandle;
use dawg_core::engine::Engine;
use dawg_core::error::MixerError;
use dawg_types::{AudioMsg, EffectKind, InsertId, InstrumentId, InstrumentKind, Waveform};

fn init_logging(verbose: bool) {
    use simplelog::*;

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };

    let log_path = dirs::config_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("dawg")
        .join("dawg.log");

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = match File::create(&log_path).or_else(|_| File::create(std::env::temp_dir().join("dawg.log"))) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("dawg: cannot create log file: {}", e);
            return;
        }
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![WriteLogger::new(log_level, Config::default(), log_file)];
    if verbose {
        loggers.push(TermLogger::new(log_level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto));
    }
    if let Err(e) = CombinedLogger::init(loggers) {
        eprintln!("dawg: logger already initialized: {}", e);
        return;
    }

    log::info!("dawg-headless starting (log level: {:?})", log_level);
}

fn arg_value<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

/// Four-on-the-floor kick with an offbeat hat, one bar long.
fn demo_pattern(kick: InstrumentId, hat: InstrumentId) -> Pattern {
    let mut pattern = Pattern::new(PatternId::new(1), "Demo", 16);
    for step in (0..16).step_by(4) {
        pattern.add_note(Note::new(kick, 36, step as f64, 1.0));
        pattern.add_note(Note::new(hat, 42, step as f64 + 2.0, 0.5));
    }
    pattern
}

fn build_mixer(engine: &mut Engine, instruments: &[InstrumentId], insert: InsertId) -> Result<(), MixerError> {
    engine.create_mixer_insert(insert, "Drums")?;
    for &instrument in instruments {
        engine.route_instrument_to_insert(instrument, insert)?;
    }
    engine.add_effect_to_insert(insert, EffectKind::compressor(), None)?;
    Ok(())
}

fn main() -> std::io::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    init_logging(verbose);

    let seconds: f64 = arg_value(&args, "--seconds").unwrap_or(4.0);
    let mut settings = dawg_core::config::Config::load().engine_settings();
    if let Some(bpm) = arg_value::<f64>(&args, "--bpm") {
        settings.tempo.bpm = bpm;
    }

    let (mut engine, endpoint) = match Engine::new(settings, Box::new(SystemClock::new())) {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("engine setup failed: {}", e);
            eprintln!("dawg: {}", e);
            std::process::exit(1);
        }
    };

    let kick = InstrumentId::new(1);
    let hat = InstrumentId::new(2);
    let drums = InsertId::new(1);
    engine.add_instrument(kick, InstrumentKind::Synth { waveform: Waveform::Sine, voices: 1 });
    engine.add_instrument(hat, InstrumentKind::Synth { waveform: Waveform::Square, voices: 4 });
    if let Err(e) = build_mixer(&mut engine, &[kick, hat], drums) {
        log::warn!("mixer setup incomplete: {}", e);
    }
    engine.add_pattern(demo_pattern(kick, hat));

    // Stand-in renderer: count what arrives on the link.
    let renderer = thread::Builder::new().name("dawg-renderer".into()).spawn(move || {
        let mut notes = 0usize;
        let mut control = 0usize;
        loop {
            crossbeam_channel::select! {
                recv(endpoint.notes) -> msg => match msg {
                    Ok(AudioMsg::NoteOn { .. }) => notes += 1,
                    Ok(_) => {}
                    Err(_) => break,
                },
                recv(endpoint.control) -> msg => match msg {
                    Ok(_) => control += 1,
                    Err(_) => break,
                },
            }
        }
        (notes, control)
    })?;

    let handle = EngineHandle::spawn(engine)?;
    handle.play(None);

    let started = Instant::now();
    let report_every = Duration::from_millis(250);
    while started.elapsed().as_secs_f64() < seconds {
        thread::sleep(report_every);
        println!("step {:6.2}", handle.current_position());
    }

    if let Ok(summary) = handle.with(|e| e.telemetry_summary()) {
        println!(
            "last window: {} polls, avg {}us, max {}us, overruns {}; {} ticks, {} wraps, {} events fired",
            summary.polls,
            summary.avg_us,
            summary.max_us,
            summary.overruns,
            summary.ticks,
            summary.wraps,
            summary.events_fired
        );
    }
    handle.shutdown();

    match renderer.join() {
        Ok((notes, control)) => println!("renderer received {} note-ons, {} control messages", notes, control),
        Err(_) => log::error!("renderer thread panicked"),
    }
    Ok(())
}
