use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::clock::{Tempo, DEFAULT_PPQ};
use crate::engine::EngineSettings;
use crate::link::LinkSettings;
use crate::mixer::{MixerSettings, SleepSettings};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    transport: TransportConfig,
    #[serde(default)]
    playback: PlaybackConfig,
    #[serde(default)]
    mixer: MixerConfig,
    #[serde(default)]
    auto_sleep: AutoSleepConfig,
    #[serde(default)]
    link: LinkConfig,
}

#[derive(Deserialize, Default)]
struct TransportConfig {
    bpm: Option<f64>,
    ppq: Option<u32>,
    steps_per_beat: Option<u32>,
    beats_per_bar: Option<u32>,
    lookahead_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    ui_update_hz: Option<f64>,
}

#[derive(Deserialize, Default)]
struct PlaybackConfig {
    debounce_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct MixerConfig {
    channel_pool_size: Option<usize>,
    ramp_ms: Option<u64>,
    route_retry_attempts: Option<u32>,
    route_retry_base_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct AutoSleepConfig {
    enabled: Option<bool>,
    sleep_threshold_db: Option<f32>,
    wake_threshold_db: Option<f32>,
    silence_ms: Option<u64>,
    poll_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct LinkConfig {
    capacity: Option<usize>,
    frame_ms: Option<u64>,
}

pub struct Config {
    file: ConfigFile,
}

impl Config {
    /// Embedded defaults, overridden by the user's config file if present.
    pub fn load() -> Self {
        let mut config = Self::embedded();
        if let Some(path) = user_config_path() {
            if path.exists() {
                config.overlay(&path);
            }
        }
        config
    }

    /// Embedded defaults, overridden by `path`.
    pub fn from_path(path: &Path) -> Self {
        let mut config = Self::embedded();
        config.overlay(path);
        config
    }

    fn embedded() -> Self {
        let file = toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|e| {
            log::error!(target: "config", "embedded config.toml is invalid: {}", e);
            ConfigFile::default()
        });
        Self { file }
    }

    fn overlay(&mut self, path: &Path) {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                log::warn!(target: "config", "could not read config {}: {}", path.display(), e);
                return;
            }
        };
        match toml::from_str::<ConfigFile>(&contents) {
            Ok(user) => {
                merge_transport(&mut self.file.transport, user.transport);
                merge_playback(&mut self.file.playback, user.playback);
                merge_mixer(&mut self.file.mixer, user.mixer);
                merge_auto_sleep(&mut self.file.auto_sleep, user.auto_sleep);
                merge_link(&mut self.file.link, user.link);
                log::info!(target: "config", "loaded {}", path.display());
            }
            Err(e) => log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e),
        }
    }

    /// Resolve into engine settings. Out-of-range values are clamped;
    /// an unusable resolution falls back to the defaults.
    pub fn engine_settings(&self) -> EngineSettings {
        let fallback = EngineSettings::default();
        let t = &self.file.transport;

        let bpm = t.bpm.filter(|b| b.is_finite() && *b > 0.0).unwrap_or(fallback.tempo.bpm);
        let mut ppq = t.ppq.unwrap_or(DEFAULT_PPQ).clamp(4, 9600);
        let mut subdivision = t.steps_per_beat.unwrap_or(fallback.tempo.subdivision).max(1);
        if ppq % subdivision != 0 {
            log::warn!(
                target: "config",
                "ppq {} is not divisible by steps_per_beat {}, using {}/{}",
                ppq,
                subdivision,
                DEFAULT_PPQ,
                fallback.tempo.subdivision
            );
            ppq = DEFAULT_PPQ;
            subdivision = fallback.tempo.subdivision;
        }
        let tempo = Tempo {
            bpm,
            beats_per_bar: t.beats_per_bar.unwrap_or(fallback.tempo.beats_per_bar).clamp(1, 64),
            subdivision,
        };

        let poll_interval_ms = t.poll_interval_ms.unwrap_or(25).clamp(1, 1000);
        // The window must outlast at least one poll.
        let lookahead_ms = t.lookahead_ms.unwrap_or(100).clamp(poll_interval_ms, 5000);

        let m = &self.file.mixer;
        let mixer = MixerSettings {
            channel_pool_size: m.channel_pool_size.unwrap_or(fallback.mixer.channel_pool_size).min(256),
            ramp_secs: ms(m.ramp_ms.unwrap_or(15).min(1000)),
            route_retry_attempts: m.route_retry_attempts.unwrap_or(fallback.mixer.route_retry_attempts).min(32),
            route_retry_base_secs: ms(m.route_retry_base_ms.unwrap_or(50).clamp(1, 10_000)),
            metering: fallback.mixer.metering,
        };

        let s = &self.file.auto_sleep;
        let sleep_threshold_db = s.sleep_threshold_db.unwrap_or(fallback.auto_sleep.sleep_threshold_db);
        let auto_sleep = SleepSettings {
            enabled: s.enabled.unwrap_or(true),
            sleep_threshold_db,
            // Hysteresis needs wake above sleep.
            wake_threshold_db: s
                .wake_threshold_db
                .unwrap_or(fallback.auto_sleep.wake_threshold_db)
                .max(sleep_threshold_db),
            silence_secs: ms(s.silence_ms.unwrap_or(2000).clamp(100, 600_000)),
            poll_secs: ms(s.poll_ms.unwrap_or(250).clamp(10, 10_000)),
        };

        let l = &self.file.link;
        let link = LinkSettings {
            capacity: l.capacity.unwrap_or(fallback.link.capacity).clamp(16, 65_536),
            frame_secs: ms(l.frame_ms.unwrap_or(16).min(1000)),
        };

        EngineSettings {
            ppq,
            tempo,
            lookahead_secs: ms(lookahead_ms),
            poll_interval: Duration::from_millis(poll_interval_ms),
            ui_update_hz: t.ui_update_hz.filter(|hz| hz.is_finite()).unwrap_or(30.0).clamp(0.0, 240.0),
            debounce_secs: ms(self.file.playback.debounce_ms.unwrap_or(16).min(1000)),
            mixer,
            auto_sleep,
            link,
        }
    }
}

fn ms(value: u64) -> f64 {
    value as f64 / 1000.0
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dawg").join("config.toml"))
}

fn pick<T>(base: &mut Option<T>, user: Option<T>) {
    if user.is_some() {
        *base = user;
    }
}

fn merge_transport(base: &mut TransportConfig, user: TransportConfig) {
    pick(&mut base.bpm, user.bpm);
    pick(&mut base.ppq, user.ppq);
    pick(&mut base.steps_per_beat, user.steps_per_beat);
    pick(&mut base.beats_per_bar, user.beats_per_bar);
    pick(&mut base.lookahead_ms, user.lookahead_ms);
    pick(&mut base.poll_interval_ms, user.poll_interval_ms);
    pick(&mut base.ui_update_hz, user.ui_update_hz);
}

fn merge_playback(base: &mut PlaybackConfig, user: PlaybackConfig) {
    pick(&mut base.debounce_ms, user.debounce_ms);
}

fn merge_mixer(base: &mut MixerConfig, user: MixerConfig) {
    pick(&mut base.channel_pool_size, user.channel_pool_size);
    pick(&mut base.ramp_ms, user.ramp_ms);
    pick(&mut base.route_retry_attempts, user.route_retry_attempts);
    pick(&mut base.route_retry_base_ms, user.route_retry_base_ms);
}

fn merge_auto_sleep(base: &mut AutoSleepConfig, user: AutoSleepConfig) {
    pick(&mut base.enabled, user.enabled);
    pick(&mut base.sleep_threshold_db, user.sleep_threshold_db);
    pick(&mut base.wake_threshold_db, user.wake_threshold_db);
    pick(&mut base.silence_ms, user.silence_ms);
    pick(&mut base.poll_ms, user.poll_ms);
}

fn merge_link(base: &mut LinkConfig, user: LinkConfig) {
    pick(&mut base.capacity, user.capacity);
    pick(&mut base.frame_ms, user.frame_ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn embedded_defaults_match_engine_defaults() {
        assert_eq!(Config::embedded().engine_settings(), EngineSettings::default());
    }

    #[test]
    fn user_file_overrides_single_keys() {
        let file = write_config("[transport]\nbpm = 140.0\n\n[mixer]\nchannel_pool_size = 0\n");
        let settings = Config::from_path(file.path()).engine_settings();
        assert_eq!(settings.tempo.bpm, 140.0);
        assert_eq!(settings.mixer.channel_pool_size, 0);
        assert_eq!(settings.ppq, 96);
        assert_eq!(settings.lookahead_secs, 0.1);
    }

    #[test]
    fn malformed_file_is_ignored() {
        let file = write_config("[transport\nbpm = ");
        assert_eq!(Config::from_path(file.path()).engine_settings(), EngineSettings::default());
    }

    #[test]
    fn missing_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Config::from_path(&dir.path().join("nope.toml")).engine_settings();
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn values_are_clamped() {
        let file = write_config(
            "[transport]\nbpm = -5.0\nppq = 100\nsteps_per_beat = 3\npoll_interval_ms = 0\nlookahead_ms = 1\n\n\
             [auto_sleep]\nsleep_threshold_db = -40.0\nwake_threshold_db = -80.0\n",
        );
        let settings = Config::from_path(file.path()).engine_settings();
        assert_eq!(settings.tempo.bpm, 120.0);
        assert_eq!((settings.ppq, settings.tempo.subdivision), (96, 4));
        assert_eq!(settings.poll_interval, Duration::from_millis(1));
        assert_eq!(settings.lookahead_secs, 0.001);
        assert_eq!(settings.auto_sleep.wake_threshold_db, -40.0);
    }
}
