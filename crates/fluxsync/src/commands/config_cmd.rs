//! Config subcommand handlers.

use std::io::Write;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

const REDACTED: &str = "********";

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut out = std::io::stdout().lock();

    match args.command {
        ConfigCommand::Path => {
            writeln!(out, "{}", super::config_file(global).display())?;
        }

        ConfigCommand::Show => {
            let mut cfg = super::load_config(global)?;
            for profile in cfg.profiles.values_mut() {
                for value in profile.headers.values_mut() {
                    REDACTED.clone_into(value);
                }
            }

            let rendered = toml::to_string_pretty(&cfg).map_err(fluxsync_config::ConfigError::from)?;
            write!(out, "{rendered}")?;
        }
    }
    Ok(())
}
