//! Server Configuration
//!
//! Loads configuration from environment variables.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use chrono::Duration;

use crate::admin::confirmation::DEFAULT_EXPIRATION;
use crate::admin::AdminSettings;
use crate::storage::DEFAULT_MAX_ATTEMPTS;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// `PostgreSQL` connection URL (in-memory store when unset)
    pub database_url: Option<String>,

    /// Redis connection URL (log-only messaging when unset)
    pub redis_url: Option<String>,

    /// Directory for import/export dumps
    pub dump_directory: PathBuf,

    /// Purge confirmation code lifetime (default: 30 seconds)
    pub purge_code_expiration: Duration,

    /// Attempt bound for retrying transactions (default: 5)
    pub transaction_max_attempts: u32,

    /// Group reported for players without memberships
    pub default_group: String,

    /// Bearer token -> admin name
    pub admin_tokens: HashMap<String, String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            dump_directory: env::var("DUMP_DIRECTORY")
                .unwrap_or_else(|_| "dumps".into())
                .into(),
            purge_code_expiration: parse_expiration(
                env::var("PURGE_CODE_EXPIRATION_SECS").ok().as_deref(),
            )?,
            transaction_max_attempts: env::var("TRANSACTION_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_ATTEMPTS)
                .max(1),
            default_group: env::var("DEFAULT_GROUP").unwrap_or_else(|_| "default".into()),
            admin_tokens: parse_admin_tokens(&env::var("ADMIN_TOKENS").unwrap_or_default())?,
        })
    }

    /// Settings handed to the bulk administrator.
    #[must_use]
    pub fn admin_settings(&self) -> AdminSettings {
        AdminSettings {
            dump_directory: self.dump_directory.clone(),
            default_group: self.default_group.clone(),
            purge_code_expiration: self.purge_code_expiration,
        }
    }

    /// Create a default configuration for testing.
    ///
    /// In-memory store, log-only messaging, and two admins:
    /// `alice` (`alice-token`) and `bob` (`bob-token`).
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".into(),
            database_url: None,
            redis_url: None,
            dump_directory: "dumps".into(),
            purge_code_expiration: DEFAULT_EXPIRATION,
            transaction_max_attempts: DEFAULT_MAX_ATTEMPTS,
            default_group: "default".into(),
            admin_tokens: HashMap::from([
                ("alice-token".to_string(), "alice".to_string()),
                ("bob-token".to_string(), "bob".to_string()),
            ]),
        }
    }
}

/// Challenge lifetime from a positive number of seconds.
fn parse_expiration(raw: Option<&str>) -> Result<Duration> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(DEFAULT_EXPIRATION);
    };
    let secs: i64 = raw.parse().map_err(|_| {
        anyhow!("PURGE_CODE_EXPIRATION_SECS must be a whole number of seconds, got `{raw}`")
    })?;
    match Duration::try_seconds(secs) {
        Some(expiration) if expiration > Duration::zero() => Ok(expiration),
        _ => bail!("PURGE_CODE_EXPIRATION_SECS must be positive and in range, got {secs}"),
    }
}

/// Parse `name=token` pairs separated by commas into a token lookup.
fn parse_admin_tokens(raw: &str) -> Result<HashMap<String, String>> {
    let mut tokens = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((name, token)) = pair.split_once('=') else {
            bail!("ADMIN_TOKENS entry `{pair}` must be name=token");
        };
        let (name, token) = (name.trim(), token.trim());
        if name.is_empty() || token.is_empty() {
            bail!("ADMIN_TOKENS entry `{pair}` must be name=token");
        }
        tokens.insert(token.to_string(), name.to_string());
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_admin_tokens() {
        let tokens = parse_admin_tokens(" alice=s3cret , bob=hunter2,").unwrap();
        assert_eq!(tokens.get("s3cret").map(String::as_str), Some("alice"));
        assert_eq!(tokens.get("hunter2").map(String::as_str), Some("bob"));
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_parse_admin_tokens_empty() {
        assert!(parse_admin_tokens("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_admin_tokens_rejects_malformed() {
        assert!(parse_admin_tokens("alice").is_err());
        assert!(parse_admin_tokens("=token").is_err());
    }

    #[test]
    fn test_parse_expiration() {
        assert_eq!(parse_expiration(None).unwrap(), Duration::seconds(30));
        assert_eq!(parse_expiration(Some("")).unwrap(), Duration::seconds(30));
        assert_eq!(parse_expiration(Some(" 45 ")).unwrap(), Duration::seconds(45));
    }

    #[test]
    fn test_parse_expiration_rejects_unusable_values() {
        assert!(parse_expiration(Some("0")).is_err());
        assert!(parse_expiration(Some("-5")).is_err());
        assert!(parse_expiration(Some("soon")).is_err());
        assert!(parse_expiration(Some("9223372036854775807")).is_err());
    }

    #[test]
    fn test_default_for_test_settings() {
        let settings = Config::default_for_test().admin_settings();
        assert_eq!(settings.purge_code_expiration, Duration::seconds(30));
        assert_eq!(settings.default_group, "default");
    }
}
