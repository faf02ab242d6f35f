//! Environment-backed runtime configuration for `worklink-console`.

use std::{env, error::Error, fmt};

const DEFAULT_VIEWER_ID: &str = "seeker-1";
const DEFAULT_PAGE_SIZE: usize = 20;
const DEFAULT_DEBOUNCE_WINDOW_MS: u64 = 500;

/// Runtime configuration used by the console demo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleConfig {
    /// Viewer account the sessions are opened for.
    pub viewer_id: String,
    /// Live-window and load-more page size.
    pub page_size: usize,
    /// Quiet window before search input becomes an effective query.
    pub debounce_window_ms: u64,
}

impl ConsoleConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let viewer_id = optional_trimmed_env("WORKLINK_VIEWER", &mut lookup)
            .unwrap_or_else(|| DEFAULT_VIEWER_ID.to_owned());
        let page_size =
            parse_optional_usize("WORKLINK_PAGE_SIZE", DEFAULT_PAGE_SIZE, &mut lookup)?;
        let debounce_window_ms = parse_optional_u64(
            "WORKLINK_DEBOUNCE_MS",
            DEFAULT_DEBOUNCE_WINDOW_MS,
            &mut lookup,
        )?;

        if page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WORKLINK_PAGE_SIZE",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            viewer_id,
            page_size,
            debounce_window_ms,
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_usize<F>(
    key: &'static str,
    default: usize,
    lookup: &mut F,
) -> Result<usize, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<usize>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u64<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
