//! Configuration for fluxsync consumers.
//!
//! TOML profiles in the platform config directory, overridable through
//! `FLUXSYNC_*` environment variables, translated into
//! `fluxsync_core::SyncConfig` plus the endpoints a profile points at.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use fluxsync_core::{ReconnectConfig, SyncConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{name}' (known: {known})")]
    UnknownProfile { name: String, known: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    /// Settings applied to every profile unless it overrides them.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named endpoint profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    /// Batch retrieval debounce window in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Give up reconnecting after this many failures; unset retries forever.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            timeout: default_timeout(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            max_retries: None,
        }
    }
}

fn default_debounce_ms() -> u64 {
    20
}
fn default_timeout() -> u64 {
    30
}
fn default_reconnect_initial_ms() -> u64 {
    1_000
}
fn default_reconnect_max_ms() -> u64 {
    30_000
}

/// A named server profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// WebSocket endpoint for pushed frames (e.g. "wss://cache.local/stream").
    pub stream_url: String,

    /// Base URL of the retrieve API. Derived from `stream_url` when unset.
    pub retrieve_url: Option<String>,

    /// Extra headers sent on the stream upgrade (e.g. a session cookie).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    pub debounce_ms: Option<u64>,
    pub timeout: Option<u64>,
    pub reconnect_initial_ms: Option<u64>,
    pub reconnect_max_ms: Option<u64>,
    pub max_retries: Option<u32>,
}

impl Profile {
    pub fn new(stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
            retrieve_url: None,
            headers: BTreeMap::new(),
            debounce_ms: None,
            timeout: None,
            reconnect_initial_ms: None,
            reconnect_max_ms: None,
            max_retries: None,
        }
    }
}

// ── Resolved profile ────────────────────────────────────────────────

/// A profile with defaults applied and URLs validated.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub name: String,
    pub stream_url: Url,
    pub retrieve_url: Url,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
    pub sync: SyncConfig,
}

impl Config {
    /// Look up `name`, or the default profile when `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");

        self.profiles
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| ConfigError::UnknownProfile {
                name: name.to_owned(),
                known: if self.profiles.is_empty() {
                    "none".into()
                } else {
                    self.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
                },
            })
    }

    /// Resolve a profile into runtime settings.
    pub fn resolve(&self, name: Option<&str>) -> Result<ResolvedProfile, ConfigError> {
        let (name, profile) = self.profile(name)?;

        let stream_url = profile.stream_url()?;
        let retrieve_url = profile.retrieve_url()?;

        Ok(ResolvedProfile {
            name: name.to_owned(),
            stream_url,
            retrieve_url,
            headers: profile.headers.clone(),
            timeout: Duration::from_secs(profile.timeout.unwrap_or(self.defaults.timeout)),
            sync: profile_to_sync_config(profile, &self.defaults),
        })
    }
}

impl Profile {
    pub fn stream_url(&self) -> Result<Url, ConfigError> {
        parse_url("stream_url", &self.stream_url)
    }

    /// The explicit `retrieve_url`, or one derived from `stream_url`.
    pub fn retrieve_url(&self) -> Result<Url, ConfigError> {
        match self.retrieve_url {
            Some(ref raw) => parse_url("retrieve_url", raw),
            None => derive_retrieve_url(&self.stream_url()?),
        }
    }
}

/// Build a `SyncConfig` from a profile, falling back to `defaults`.
pub fn profile_to_sync_config(profile: &Profile, defaults: &Defaults) -> SyncConfig {
    let ms = |value: Option<u64>, fallback: u64| Duration::from_millis(value.unwrap_or(fallback));

    SyncConfig {
        debounce: ms(profile.debounce_ms, defaults.debounce_ms),
        reconnect: ReconnectConfig {
            initial_delay: ms(profile.reconnect_initial_ms, defaults.reconnect_initial_ms),
            max_delay: ms(profile.reconnect_max_ms, defaults.reconnect_max_ms),
            max_retries: profile.max_retries.or(defaults.max_retries),
        },
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}

/// `wss://host:port/anything` -> `https://host:port/`.
fn derive_retrieve_url(stream_url: &Url) -> Result<Url, ConfigError> {
    let scheme = match stream_url.scheme() {
        "wss" | "https" => "https",
        "ws" | "http" => "http",
        other => {
            return Err(ConfigError::Validation {
                field: "stream_url".into(),
                reason: format!("cannot derive retrieve_url from scheme '{other}'"),
            });
        }
    };

    let host = stream_url.host_str().ok_or_else(|| ConfigError::Validation {
        field: "stream_url".into(),
        reason: "URL has no host".into(),
    })?;
    let port = stream_url
        .port()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();

    parse_url("retrieve_url", &format!("{scheme}://{host}{port}/"))
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "fluxsync", "fluxsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("fluxsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` (missing file is fine) merged with `FLUXSYNC_*`
/// variables, e.g. `FLUXSYNC_DEFAULTS__DEBOUNCE_MS=50`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("FLUXSYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist or is invalid.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
