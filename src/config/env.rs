//! Environment-derived session settings
//!
//! A `.env` file is loaded if present, then every `required-env` name must
//! resolve to a non-empty value before any page provider session opens.

use crate::config::types::SessionConfig;
use crate::ConfigError;

/// Session settings read from the environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionEnv {
    /// Bearer token from `auth-token-env`, if configured and set
    pub auth_token: Option<String>,

    /// Headless preference from `headless-env` (unset means headed)
    pub headless_default: bool,
}

/// Resolves session settings through `lookup`
///
/// # Arguments
///
/// * `config` - The session configuration
/// * `lookup` - Returns the value of an environment variable, if set
///
/// # Returns
///
/// * `Ok(SessionEnv)` - Every required variable is set
/// * `Err(ConfigError::MissingEnv)` - Lists every missing variable
pub fn resolve_session_env<F>(config: &SessionConfig, lookup: F) -> Result<SessionEnv, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let present = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    let missing: Vec<&str> = config
        .required_env
        .iter()
        .map(String::as_str)
        .filter(|name| present(*name).is_none())
        .collect();

    if !missing.is_empty() {
        return Err(ConfigError::MissingEnv(missing.join(", ")));
    }

    let auth_token = match &config.auth_token_env {
        Some(name) => {
            let token = present(name.as_str());
            if token.is_none() {
                tracing::warn!("{} is not set; requests will be sent without a bearer token", name);
            }
            token
        }
        None => None,
    };

    let headless_default = present(config.headless_env.as_str())
        .map(|v| parse_flag(&v))
        .unwrap_or(false);

    Ok(SessionEnv {
        auth_token,
        headless_default,
    })
}

/// Loads `.env` if present, then resolves session settings from the process environment
pub fn load_session_env(config: &SessionConfig) -> Result<SessionEnv, ConfigError> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Ignoring unreadable .env file: {}", e),
    }

    resolve_session_env(config, |name| std::env::var(name).ok())
}

/// Chooses headless mode: an explicit CLI flag wins over the environment
pub fn resolve_headless(cli: Option<bool>, env: &SessionEnv) -> bool {
    cli.unwrap_or(env.headless_default)
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1")
}
