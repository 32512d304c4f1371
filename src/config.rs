use anyhow::{Context, Result};
use std::env;

/// Application configuration loaded from environment variables.
///
/// Built once at startup and handed down through `AppState` so nothing in
/// the request path reads process state directly.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub env_mode: String,
    pub allowed_origins: Option<String>,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            jwt_issuer: env::var("JWT_ISSUER").ok(),
            env_mode: env::var("RUST_ENV").unwrap_or_else(|_| "development".to_string()),
            allowed_origins: env::var("ALLOWED_ORIGINS").ok(),
            rate_limit_per_second: env::var("RATE_LIMIT_PER_SECOND")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1200),
            rate_limit_burst: env::var("RATE_LIMIT_BURST")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2400),
        })
    }

    pub fn is_production(&self) -> bool {
        self.env_mode == "production"
    }
}
