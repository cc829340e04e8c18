use crate::error::SwapError;
use serde::{Deserialize, Serialize};
use std::env;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server host (default: 0.0.0.0)
    pub host: String,

    /// HTTP server port (default: 5000)
    pub port: u16,

    /// Database URL (default: sqlite://slot_swap.db)
    pub database_url: String,

    /// Log level (default: info)
    pub log_level: String,

    /// CORS allowed origins (comma-separated)
    pub cors_origins: Vec<String>,

    /// HMAC secret used to sign bearer tokens
    #[serde(skip_serializing)]
    pub jwt_secret: String,

    /// Token lifetime in seconds (default: 3600)
    pub token_ttl_seconds: u64,

    /// bcrypt work factor (default: 10)
    pub bcrypt_cost: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, SwapError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SwapError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let host = var("HOST", "0.0.0.0");
        let port = var("PORT", "5000")
            .parse()
            .map_err(|e| SwapError::Other(anyhow::anyhow!("Invalid PORT: {}", e)))?;

        let database_url = var("DATABASE_URL", "sqlite://slot_swap.db");

        let log_level = var("LOG_LEVEL", "info");

        let cors_origins = var("CORS_ORIGINS", "*")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                SwapError::Other(anyhow::anyhow!("JWT_SECRET environment variable is required"))
            })?;

        let token_ttl_seconds: u64 = var("TOKEN_TTL_SECONDS", "3600")
            .parse()
            .map_err(|e| SwapError::Other(anyhow::anyhow!("Invalid TOKEN_TTL_SECONDS: {}", e)))?;

        if token_ttl_seconds == 0 {
            return Err(SwapError::Other(anyhow::anyhow!(
                "TOKEN_TTL_SECONDS must be greater than zero"
            )));
        }

        let bcrypt_cost: u32 = var("BCRYPT_COST", "10")
            .parse()
            .map_err(|e| SwapError::Other(anyhow::anyhow!("Invalid BCRYPT_COST: {}", e)))?;

        if !(4..=31).contains(&bcrypt_cost) {
            return Err(SwapError::Other(anyhow::anyhow!(
                "BCRYPT_COST must be between 4 and 31, got {}",
                bcrypt_cost
            )));
        }

        Ok(Config {
            host,
            port,
            database_url,
            log_level,
            cors_origins,
            jwt_secret,
            token_ttl_seconds,
            bcrypt_cost,
        })
    }

    /// Get server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
