//! Aggregate configuration, environment-driven.
//!
//! Front-ends load `.env` (dotenvy) and call `AppConfig::from_env()`.
//! Unset or unparseable variables fall back to the defaults; settings live
//! next to the modules they configure.

use crate::channel::ChannelConfig;
use crate::controller::TurnConfig;
use crate::listen::ListenConfig;
use std::time::Duration;

/// Everything the client needs to come up.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub channel: ChannelConfig,
    pub turn: TurnConfig,
    pub listen: ListenConfig,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.trim().parse().ok())
}

impl AppConfig {
    /// Read `SORI_*` variables over the defaults.
    ///
    /// - `SORI_CHANNEL_URL` — backend WebSocket endpoint
    /// - `SORI_RECONNECT_SECS` — reconnect poll interval
    /// - `SORI_SILENCE_MS` — batching silence window
    /// - `SORI_LANGUAGE` — recognition + synthesis language tag
    /// - `SORI_SPEECH_RATE` — playback rate multiplier
    /// - `SORI_GAP_MS` — endpointing gap
    /// - `SORI_NO_SPEECH_TIMEOUT_SECS` — recognizer self-stop interval
    /// - `SORI_MAX_REARM_ATTEMPTS` — 0 keeps re-arming forever
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(url) = env_var("SORI_CHANNEL_URL") {
            config.channel.url = url;
        }
        if let Some(secs) = env_parse::<u64>("SORI_RECONNECT_SECS") {
            config.channel.reconnect_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(ms) = env_parse::<u64>("SORI_SILENCE_MS") {
            config.turn.silence_window = Duration::from_millis(ms.max(1));
        }
        if let Some(language) = env_var("SORI_LANGUAGE") {
            config.listen.language = language.clone();
            config.turn.style.language = language;
        }
        if let Some(rate) = env_parse::<f32>("SORI_SPEECH_RATE") {
            config.turn.style.rate = rate;
        }
        if let Some(ms) = env_parse::<u64>("SORI_GAP_MS") {
            config.listen.gap_ms = ms;
        }
        if let Some(secs) = env_parse::<u64>("SORI_NO_SPEECH_TIMEOUT_SECS") {
            config.listen.no_speech_timeout_secs = secs.max(1);
        }
        if let Some(attempts) = env_parse::<u32>("SORI_MAX_REARM_ATTEMPTS") {
            config.turn.max_rearm_attempts = attempts;
        }

        config
    }
}
