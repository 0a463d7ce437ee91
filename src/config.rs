//! Configuration and path resolution for the REST identity provider.
//!
//! AUTHGATE_HOME resolution order:
//! 1. AUTHGATE_HOME environment variable (if set)
//! 2. ~/.config/authgate (default)

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Default base URL for the hosted identity service.
pub const DEFAULT_BASE_URL: &str = "https://identitytoolkit.googleapis.com";

/// Persisted session filename under the authgate home directory.
const SESSION_FILE: &str = "session.json";

/// Returns the authgate home directory.
///
/// Checks AUTHGATE_HOME env var first, falls back to ~/.config/authgate
pub fn authgate_home() -> PathBuf {
    if let Ok(home) = std::env::var("AUTHGATE_HOME") {
        return PathBuf::from(home);
    }

    dirs::home_dir()
        .map(|h| h.join(".config").join("authgate"))
        .expect("Could not determine home directory")
}

/// Configuration for the REST identity provider.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project API key sent with every request.
    pub api_key: String,
    pub base_url: String,
    /// Where the active session's tokens are persisted.
    pub store_path: PathBuf,
}

impl RestConfig {
    /// Creates a new config from the environment.
    ///
    /// Environment variables:
    /// - `AUTHGATE_API_KEY`: project API key (required)
    /// - `AUTHGATE_BASE_URL`: optional base URL override
    /// - `AUTHGATE_HOME`: data directory for the persisted session
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("AUTHGATE_API_KEY")
            .context("No API key available. Set the AUTHGATE_API_KEY environment variable.")?;
        Self::new(api_key, None)
    }

    /// Creates a config with an explicit API key.
    ///
    /// Base URL resolution order: `AUTHGATE_BASE_URL` env var (if set and
    /// non-empty), then `base_url` parameter, then [`DEFAULT_BASE_URL`].
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Result<Self> {
        let base_url = Self::resolve_base_url(base_url)?;
        Ok(Self {
            api_key: api_key.into(),
            base_url,
            store_path: authgate_home().join(SESSION_FILE),
        })
    }

    /// Overrides the persisted-session path.
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    /// Resolves the base URL with precedence: env > config > default.
    /// Validates that the URL is well-formed.
    fn resolve_base_url(config_base_url: Option<&str>) -> Result<String> {
        if let Ok(env_url) = std::env::var("AUTHGATE_BASE_URL") {
            let trimmed = env_url.trim();
            if !trimmed.is_empty() {
                Self::validate_url(trimmed)?;
                return Ok(trimmed.to_string());
            }
        }

        if let Some(config_url) = config_base_url {
            let trimmed = config_url.trim();
            if !trimmed.is_empty() {
                Self::validate_url(trimmed)?;
                return Ok(trimmed.to_string());
            }
        }

        Ok(DEFAULT_BASE_URL.to_string())
    }

    /// Validates that a URL is well-formed.
    fn validate_url(url: &str) -> Result<()> {
        url::Url::parse(url).with_context(|| format!("Invalid identity base URL: {}", url))?;
        Ok(())
    }
}
