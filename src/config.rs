use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "VOTIX";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub player: PlayerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000/".to_string()
}

fn default_user_agent() -> String {
    "votix-dev/0.1 (+https://github.com/votix-app/votix)".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_theme")]
    pub theme: String,
    /// Fraction of a card that must be on screen before it counts as
    /// visible to the playback coordinator.
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f64,
    #[serde(default)]
    pub start_muted: bool,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            visibility_threshold: default_visibility_threshold(),
            start_muted: false,
        }
    }
}

fn default_theme() -> String {
    "default".into()
}

fn default_visibility_threshold() -> f64 {
    crate::playback::DEFAULT_VISIBILITY_THRESHOLD
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default = "default_media_ttl_duration", with = "humantime_serde")]
    pub default_ttl: Duration,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            default_ttl: default_media_ttl_duration(),
            workers: default_workers(),
        }
    }
}

fn default_media_ttl_duration() -> Duration {
    Duration::from_secs(6 * 60 * 60)
}

fn default_workers() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerConfig {
    #[serde(default = "default_mpv_path")]
    pub mpv_path: String,
    #[serde(default = "default_inline_video")]
    pub inline_video: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            mpv_path: default_mpv_path(),
            inline_video: default_inline_video(),
        }
    }
}

fn default_mpv_path() -> String {
    "mpv".into()
}

fn default_inline_video() -> bool {
    true
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix)?);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.api.base_url.is_empty() {
        base.api.base_url = other.api.base_url;
    }
    if !other.api.user_agent.is_empty() {
        base.api.user_agent = other.api.user_agent;
    }

    if !other.ui.theme.is_empty() {
        base.ui.theme = other.ui.theme;
    }
    // Non-string fields only win when they differ from the built-in
    // default, so an untouched env overlay cannot clobber file values.
    if other.ui.visibility_threshold > 0.0
        && (other.ui.visibility_threshold - default_visibility_threshold()).abs() > f64::EPSILON
    {
        base.ui.visibility_threshold = other.ui.visibility_threshold;
    }
    if other.ui.start_muted {
        base.ui.start_muted = true;
    }

    if other.media.default_ttl != default_media_ttl_duration() {
        base.media.default_ttl = other.media.default_ttl;
    }
    if other.media.workers != 0 && other.media.workers != default_workers() {
        base.media.workers = other.media.workers;
    }

    if !other.player.mpv_path.is_empty() && other.player.mpv_path != default_mpv_path() {
        base.player.mpv_path = other.player.mpv_path;
    }
    if other.player.inline_video != default_inline_video() {
        base.player.inline_video = other.player.inline_video;
    }

    base
}

fn load_env(prefix: &str) -> Result<Config> {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    if map.is_empty() {
        return Ok(Config::default());
    }

    let mut cfg = Config::default();

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "ui.theme" => cfg.ui.theme = value,
        "ui.visibility_threshold" => {
            if let Ok(parsed) = value.parse::<f64>() {
                cfg.ui.visibility_threshold = parsed;
            }
        }
        "ui.start_muted" => {
            cfg.ui.start_muted = env_truthy(&value);
        }
        "media.default_ttl" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.media.default_ttl = duration;
            }
        }
        "media.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.media.workers = parsed;
            }
        }
        "player.mpv_path" => cfg.player.mpv_path = value,
        "player.inline_video" => {
            cfg.player.inline_video = env_truthy(&value);
        }
        _ => {}
    }
}

fn env_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True" | "yes" | "on")
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("votix").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(LoadOptions {
            env_prefix: Some("VOTIX_TEST_NONE".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(cfg.ui.theme, "default");
        assert_eq!(cfg.api.base_url, default_base_url());
        assert_eq!(cfg.ui.visibility_threshold, 0.5);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "api:\n  base_url: https://surveys.example.com/\nui:\n  start_muted: true\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("VOTIX_TEST_NONE".into()),
        })
        .unwrap();
        assert_eq!(cfg.api.base_url, "https://surveys.example.com/");
        assert!(cfg.ui.start_muted);
    }

    #[test]
    fn env_overrides() {
        env::set_var("VOTIX_UI__THEME", "dracula");
        let cfg = load(LoadOptions::default()).unwrap();
        assert_eq!(cfg.ui.theme, "dracula");
        env::remove_var("VOTIX_UI__THEME");
    }
}
