//! Engine thread driver.
//!
//! Moves an [`Engine`] onto its own control thread. The thread wakes on a
//! periodic `crossbeam_channel::tick` timer to poll the engine and on
//! incoming [`ControlCmd`]s; commands are applied between polls, so nothing
//! ever touches the engine concurrently. The audible position is published
//! lock-free after every wake-up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::clock::BpmCheck;
use crate::engine::Engine;
use crate::error::{ConfigError, DriverError};

type EngineFn = Box<dyn FnOnce(&mut Engine) + Send>;

pub enum ControlCmd {
    Play { start_step: Option<f64> },
    Stop,
    Pause,
    Resume,
    JumpToStep { step: f64, reply: Sender<Result<(), ConfigError>> },
    SetBpm { bpm: f64, reply: Sender<Result<BpmCheck, ConfigError>> },
    SetLoopPoints { start: f64, end: f64, reply: Sender<Result<(), ConfigError>> },
    SetLoopEnabled(bool),
    /// Run arbitrary engine code on the control thread.
    Exec(EngineFn),
    Shutdown,
}

pub struct EngineHandle {
    tx: Sender<ControlCmd>,
    position: Arc<AtomicU64>,
    join_handle: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn spawn(engine: Engine) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let position = Arc::new(AtomicU64::new(0f64.to_bits()));
        let published = position.clone();
        let join_handle = thread::Builder::new()
            .name("dawg-engine".into())
            .spawn(move || run(engine, rx, published))?;
        Ok(Self { tx, position, join_handle: Some(join_handle) })
    }

    /// Fire-and-forget: log if the engine thread is gone.
    fn send(&self, cmd: ControlCmd) {
        if self.tx.send(cmd).is_err() {
            log::warn!(target: "engine", "command dropped: engine thread has stopped");
        }
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> ControlCmd) -> Result<T, DriverError> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.tx.send(build(reply)).map_err(|_| DriverError::Disconnected)?;
        rx.recv().map_err(|_| DriverError::Disconnected)
    }

    pub fn play(&self, start_step: Option<f64>) {
        self.send(ControlCmd::Play { start_step });
    }

    pub fn stop(&self) {
        self.send(ControlCmd::Stop);
    }

    pub fn pause(&self) {
        self.send(ControlCmd::Pause);
    }

    pub fn resume(&self) {
        self.send(ControlCmd::Resume);
    }

    pub fn jump_to_step(&self, step: f64) -> Result<(), DriverError> {
        Ok(self.request(|reply| ControlCmd::JumpToStep { step, reply })??)
    }

    pub fn set_bpm(&self, bpm: f64) -> Result<BpmCheck, DriverError> {
        Ok(self.request(|reply| ControlCmd::SetBpm { bpm, reply })??)
    }

    pub fn set_loop_points(&self, start: f64, end: f64) -> Result<(), DriverError> {
        Ok(self.request(|reply| ControlCmd::SetLoopPoints { start, end, reply })??)
    }

    pub fn set_loop_enabled(&self, enabled: bool) {
        self.send(ControlCmd::SetLoopEnabled(enabled));
    }

    /// Run `f` on the engine thread and wait for its result.
    pub fn with<R, F>(&self, f: F) -> Result<R, DriverError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Engine) -> R + Send + 'static,
    {
        self.request(|reply| {
            ControlCmd::Exec(Box::new(move |engine| {
                let _ = reply.send(f(engine));
            }))
        })
    }

    /// Audible position in steps, as of the engine thread's last wake-up.
    pub fn current_position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Acquire))
    }

    /// Stop the engine thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        let _ = self.tx.send(ControlCmd::Shutdown);
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                log::error!(target: "engine", "engine thread panicked");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.join();
    }
}

fn run(mut engine: Engine, rx: Receiver<ControlCmd>, position: Arc<AtomicU64>) {
    let ticker = crossbeam_channel::tick(engine.settings().poll_interval);
    log::debug!(target: "engine", "engine thread started, polling every {:?}", engine.settings().poll_interval);
    loop {
        crossbeam_channel::select! {
            recv(rx) -> msg => match msg {
                Ok(ControlCmd::Shutdown) | Err(_) => break,
                Ok(cmd) => apply(&mut engine, cmd),
            },
            recv(ticker) -> _ => {
                engine.poll();
            }
        }
        position.store(engine.current_position().to_bits(), Ordering::Release);
    }
    engine.stop();
    engine.flush();
    log::debug!(target: "engine", "engine thread stopped");
}

fn apply(engine: &mut Engine, cmd: ControlCmd) {
    match cmd {
        ControlCmd::Play { start_step } => engine.play(start_step),
        ControlCmd::Stop => engine.stop(),
        ControlCmd::Pause => engine.pause(),
        ControlCmd::Resume => engine.resume(),
        ControlCmd::JumpToStep { step, reply } => {
            let _ = reply.send(engine.jump_to_step(step));
        }
        ControlCmd::SetBpm { bpm, reply } => {
            let _ = reply.send(engine.set_bpm(bpm));
        }
        ControlCmd::SetLoopPoints { start, end, reply } => {
            let _ = reply.send(engine.set_loop_points(start, end));
        }
        ControlCmd::SetLoopEnabled(enabled) => engine.set_loop_enabled(enabled),
        ControlCmd::Exec(f) => f(engine),
        ControlCmd::Shutdown => {}
    }
}
