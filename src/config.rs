use secrecy::Secret;
use serde::Deserialize;

use crate::services::token_generator::DEFAULT_MAX_ATTEMPTS;

pub const DEFAULT_PORT: u16 = 3000;

/// 5 MiB of image, before base64 expansion.
pub const DEFAULT_SCAN_UPLOAD_LIMIT_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Without a database URL the service runs on the in-memory store.
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,

    // Shared with the auth gateway that signs principal headers
    pub gateway_secret: Secret<String>,

    // Limits
    pub scan_upload_limit_bytes: usize,
    pub generation_max_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        Ok(Self {
            database_url: config.get("database_url").ok(),
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port").unwrap_or(DEFAULT_PORT),

            gateway_secret: Secret::new(config.get("gateway_secret")?),

            scan_upload_limit_bytes: config
                .get("scan_upload_limit_bytes")
                .unwrap_or(DEFAULT_SCAN_UPLOAD_LIMIT_BYTES),
            generation_max_attempts: config
                .get("generation_max_attempts")
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
        })
    }

    /// Request body limit for scan uploads: the image limit after base64
    /// expansion plus room for the JSON envelope.
    pub fn scan_body_limit(&self) -> usize {
        self.scan_upload_limit_bytes.div_ceil(3) * 4 + 1024
    }
}
