use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "PUMP";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scroll: ScrollConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Page the client is "on"; its origin is where root-relative URLs resolve.
    #[serde(default = "default_server_url")]
    pub url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_application_name")]
    pub application_name: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            user_agent: default_user_agent(),
            application_name: default_application_name(),
            timeout: default_timeout(),
        }
    }
}

fn default_server_url() -> String {
    "http://localhost:31337/".into()
}

fn default_user_agent() -> String {
    format!("pump-client/{}", crate::VERSION)
}

fn default_application_name() -> String {
    "pump-client".into()
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrollConfig {
    #[serde(default = "default_scroll_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_scroll_threshold")]
    pub threshold: f64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            interval: default_scroll_interval(),
            threshold: default_scroll_threshold(),
        }
    }
}

fn default_scroll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_scroll_threshold() -> f64 {
    10.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshConfig {
    #[serde(default = "default_refresh_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: default_refresh_interval(),
        }
    }
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(60)
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
    cfg = merge_env(cfg, prefix);

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
    if !other.server.url.is_empty() {
        base.server.url = other.server.url;
    }
    if !other.server.user_agent.is_empty() {
        base.server.user_agent = other.server.user_agent;
    }
    if !other.server.application_name.is_empty() {
        base.server.application_name = other.server.application_name;
    }
    if !other.server.timeout.is_zero() {
        base.server.timeout = other.server.timeout;
    }

    if other.storage.path.is_some() {
        base.storage.path = other.storage.path;
    }

    if !other.scroll.interval.is_zero() {
        base.scroll.interval = other.scroll.interval;
    }
    if other.scroll.threshold >= 0.0 {
        base.scroll.threshold = other.scroll.threshold;
    }

    if !other.refresh.interval.is_zero() {
        base.refresh.interval = other.refresh.interval;
    }

    base
}

// Only keys actually present in the environment are applied, so defaults never
// clobber values read from the file.
fn merge_env(mut cfg: Config, prefix: &str) -> Config {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }
    cfg
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "server.url" => cfg.server.url = value,
        "server.user_agent" => cfg.server.user_agent = value,
        "server.application_name" => cfg.server.application_name = value,
        "server.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.server.timeout = duration;
            }
        }
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        "scroll.interval" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.scroll.interval = duration;
            }
        }
        "scroll.threshold" => {
            if let Ok(parsed) = value.parse::<f64>() {
                cfg.scroll.threshold = parsed;
            }
        }
        "refresh.interval" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.refresh.interval = duration;
            }
        }
        _ => {}
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pump-client").join("config.yaml"))
}
