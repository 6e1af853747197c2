//! # dawg-core
//!
//! Transport, scheduling and mixer core of the dawg engine: a lookahead
//! scheduler over integer ticks, a time-ordered event queue, a mixer graph of
//! insert chains with sends and channel allocation, and a typed link to the
//! audio renderer. Independent of any UI or audio backend.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dawg_core::config::Config;
//! use dawg_core::audio_clock::SystemClock;
//! use dawg_core::engine::Engine;
//! use dawg_core::driver::EngineHandle;
//!
//! // 1. Resolve settings from the embedded defaults and the user's config file
//! let settings = Config::load().engine_settings();
//!
//! // 2. Build the engine; hand `endpoint` to the audio renderer
//! let (mut engine, endpoint) = Engine::new(settings, Box::new(SystemClock::new()))?;
//!
//! // 3. Add content, instruments and mixer inserts, then move it to its thread
//! let handle = EngineHandle::spawn(engine)?;
//! handle.play(None);
//! let step = handle.current_position();
//! ```
//!
//! ## Module Overview
//!
//! - [`clock`] — tick/step/second conversions (`LogicalClock`)
//! - [`audio_clock`] — the monotonic timebase (`AudioClock`, `SystemClock`, `ManualClock`)
//! - [`event_queue`] — time-ordered callbacks with FIFO collisions
//! - [`events`] — typed publish/subscribe for transport events
//! - [`transport`] — the `Scheduler` state machine and lookahead loop
//! - [`graph`] — audio graph backend trait and the `VirtualGraph` mirror
//! - [`mixer`] — inserts, effect chains, sends, channels, auto-sleep
//! - [`link`] — bounded channels to the renderer with parameter batching
//! - [`instrument`], [`content`], [`playback`] — what plays and when it is scheduled
//! - [`engine`] — the context object tying everything together
//! - [`driver`] — runs an engine on its own thread
//! - [`config`], [`telemetry`], [`error`]

pub mod audio_clock;
pub mod clock;
pub mod config;
pub mod content;
pub mod driver;
pub mod engine;
pub mod error;
pub mod event_queue;
pub mod events;
pub mod graph;
pub mod instrument;
pub mod link;
pub mod mixer;
pub mod playback;
pub mod telemetry;
pub mod transport;

pub use dawg_types::*;
