//! Command handlers and the profile plumbing they share.

pub mod config_cmd;
pub mod get;
pub mod watch;

use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;

use fluxsync_config::{Config, Profile};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;

/// Config file named by `--config`, else the platform location.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(fluxsync_config::config_path)
}

pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(fluxsync_config::load_config_from(&config_file(global))?)
}

/// The profile selected by `--profile` with command-line overrides applied.
///
/// A missing profile is only an error when no URL override was given.
pub fn effective_profile(global: &GlobalOpts, cfg: &Config) -> Result<Profile, CliError> {
    let name = global
        .profile
        .as_deref()
        .or(cfg.default_profile.as_deref());

    let mut profile = match cfg.profile(name) {
        Ok((_, profile)) => profile.clone(),
        Err(_) if global.stream_url.is_some() || global.retrieve_url.is_some() => {
            Profile::new(String::new())
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(ref url) = global.stream_url {
        profile.stream_url.clone_from(url);
    }
    if let Some(ref url) = global.retrieve_url {
        profile.retrieve_url = Some(url.clone());
    }
    if global.timeout.is_some() {
        profile.timeout = global.timeout;
    }
    if global.debounce_ms.is_some() {
        profile.debounce_ms = global.debounce_ms;
    }
    Ok(profile)
}

/// Write one JSON document to stdout in the requested format.
pub fn print_json(value: &impl Serialize, format: OutputFormat) -> Result<(), CliError> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::JsonCompact => serde_json::to_string(value)?,
    };
    let mut out = std::io::stdout().lock();
    writeln!(out, "{rendered}")?;
    Ok(())
}
