//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use culinary_core::{GenerationSettings, ResolverSettings};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    /// When set, recipes are read straight from Postgres instead of PostgREST.
    pub database_url: Option<String>,
    pub workflow_url: String,
    pub workflow_timeout: Duration,
    /// Where emailed one-time links send the user back to.
    pub auth_redirect_url: String,
    pub cors_origin: String,
    pub resolver: ResolverSettings,
    pub generation: GenerationSettings,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or =
            |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let required =
            |key: &str| lookup(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()));

        // --- Server Settings ---
        let bind_address =
            parse::<SocketAddr>("BIND_ADDRESS", &var_or("BIND_ADDRESS", "0.0.0.0:3000"))?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;
        let cors_origin = var_or("CORS_ORIGIN", "http://localhost:3000");

        // --- Collaborators ---
        let supabase_url = required("SUPABASE_URL")?.trim_end_matches('/').to_string();
        let supabase_anon_key = required("SUPABASE_ANON_KEY")?;
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        let workflow_url = var_or(
            "WORKFLOW_URL",
            "http://localhost:5678/webhook-test/recipe-generator",
        );
        let workflow_timeout = Duration::from_secs(parse(
            "WORKFLOW_TIMEOUT_SECS",
            &var_or("WORKFLOW_TIMEOUT_SECS", "30"),
        )?);
        let auth_redirect_url = var_or("AUTH_REDIRECT_URL", "http://localhost:3000/login");

        // --- Polling Bounds ---
        let resolver = ResolverSettings {
            check_interval: millis(
                "MAGIC_LINK_CHECK_INTERVAL_MS",
                &var_or("MAGIC_LINK_CHECK_INTERVAL_MS", "1000"),
            )?,
            max_checks: parse("MAGIC_LINK_MAX_CHECKS", &var_or("MAGIC_LINK_MAX_CHECKS", "10"))?,
        };
        let generation = GenerationSettings {
            initial_delay: millis(
                "GENERATION_INITIAL_DELAY_MS",
                &var_or("GENERATION_INITIAL_DELAY_MS", "2000"),
            )?,
            poll_interval: millis(
                "GENERATION_POLL_INTERVAL_MS",
                &var_or("GENERATION_POLL_INTERVAL_MS", "2000"),
            )?,
            max_polls: parse("GENERATION_MAX_POLLS", &var_or("GENERATION_MAX_POLLS", "30"))?,
        };
        if resolver.max_checks == 0 {
            return Err(ConfigError::InvalidValue(
                "MAGIC_LINK_MAX_CHECKS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if generation.max_polls == 0 {
            return Err(ConfigError::InvalidValue(
                "GENERATION_MAX_POLLS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            log_level,
            supabase_url,
            supabase_anon_key,
            database_url,
            workflow_url,
            workflow_timeout,
            auth_redirect_url,
            cors_origin,
            resolver,
            generation,
        })
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

fn millis(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    parse::<u64>(key, raw).map(Duration::from_millis)
}
