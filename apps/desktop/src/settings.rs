use std::{path::Path, time::Duration};

use anyhow::Context;
use client_core::PlaybackSettings;
use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "story-viewer.toml";
pub const ENV_PREFIX: &str = "STORY";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub server_url: String,
    pub item_duration_ms: u64,
    pub simulated_video_ms: u64,
    pub start_muted: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            item_duration_ms: 5000,
            simulated_video_ms: 8000,
            start_muted: true,
        }
    }
}

impl Settings {
    pub fn playback(&self) -> PlaybackSettings {
        PlaybackSettings {
            item_duration: Duration::from_millis(self.item_duration_ms),
            start_muted: self.start_muted,
        }
    }

    pub fn simulated_video_length(&self) -> Duration {
        Duration::from_millis(self.simulated_video_ms)
    }
}

/// Defaults, then the config file, then `STORY__*` environment variables.
/// An explicitly named file must exist; the default one is optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let defaults = Settings::default();
    let file = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));

    let config = Config::builder()
        .set_default("server_url", defaults.server_url)?
        .set_default("item_duration_ms", defaults.item_duration_ms as i64)?
        .set_default("simulated_video_ms", defaults.simulated_video_ms as i64)?
        .set_default("start_muted", defaults.start_muted)?
        .add_source(File::from(file).required(path.is_some()))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("failed to load settings from '{}'", file.display()))?;

    let settings: Settings = config
        .try_deserialize()
        .context("invalid story viewer settings")?;
    if settings.item_duration_ms == 0 {
        anyhow::bail!("item_duration_ms must be greater than zero");
    }
    Ok(settings)
}
