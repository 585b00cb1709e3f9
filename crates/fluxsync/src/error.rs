//! CLI error types with miette diagnostics.
//!
//! Maps core and config errors into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use fluxsync_config::ConfigError;
use fluxsync_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not open the stream: {reason}")]
    #[diagnostic(
        code(fluxsync::connection_failed),
        help("Check that the server is reachable and the stream_url is correct.")
    )]
    ConnectionFailed { reason: String },

    #[error("Gave up on the stream at {url}")]
    #[diagnostic(
        code(fluxsync::stream_failed),
        help("Raise max_retries in the profile, or unset it to retry forever.")
    )]
    StreamFailed { url: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(code(fluxsync::timeout), help("Increase the timeout with --timeout."))]
    Timeout { seconds: u64 },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource} '{identifier}' not found")]
    #[diagnostic(code(fluxsync::not_found))]
    NotFound {
        resource: String,
        identifier: String,
    },

    #[error("Retrieving {resource} failed: {message}")]
    #[diagnostic(code(fluxsync::retrieve_failed))]
    RetrieveFailed { resource: String, message: String },

    #[error("API error: {message}")]
    #[diagnostic(code(fluxsync::api_error))]
    ApiError { message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(fluxsync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(fluxsync::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Or pass --stream-url / --retrieve-url directly."
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error(transparent)]
    #[diagnostic(code(fluxsync::config))]
    Config(ConfigError),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(fluxsync::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::StreamFailed { .. } => exit_code::CONNECTION,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::UnknownProfile { name, known } => Self::ProfileNotFound {
                name,
                available: known,
            },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { reason } => Self::ConnectionFailed { reason },
            CoreError::Disconnected => Self::ConnectionFailed {
                reason: "stream disconnected".into(),
            },
            CoreError::RetriesExhausted { attempts } => Self::ConnectionFailed {
                reason: format!("gave up after {attempts} attempts"),
            },
            CoreError::Timeout { timeout_secs } => Self::Timeout {
                seconds: timeout_secs,
            },
            CoreError::UnclassifiedParams { reason } => Self::Validation {
                field: "keys".into(),
                reason,
            },
            CoreError::Api { message, .. } => Self::ApiError { message },
            other @ (CoreError::StoreTypeMismatch { .. } | CoreError::Config { .. }) => {
                Self::ApiError {
                    message: other.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn unknown_profile_becomes_profile_not_found() {
        let err = CliError::from(ConfigError::UnknownProfile {
            name: "prod".into(),
            known: "lab".into(),
        });
        assert!(matches!(err, CliError::ProfileNotFound { ref available, .. } if available == "lab"));
        assert_eq!(err.exit_code(), exit_code::GENERAL);
    }

    #[test]
    fn core_errors_map_to_exit_codes() {
        assert_eq!(
            CliError::from(CoreError::Timeout { timeout_secs: 5 }).exit_code(),
            exit_code::TIMEOUT
        );
        assert_eq!(
            CliError::from(CoreError::RetriesExhausted { attempts: 3 }).exit_code(),
            exit_code::CONNECTION
        );
        assert_eq!(
            CliError::from(CoreError::UnclassifiedParams {
                reason: "mixed".into()
            })
            .exit_code(),
            exit_code::USAGE
        );
    }
}
