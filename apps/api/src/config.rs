use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::extraction::pacing::DEFAULT_CALL_INTERVAL;
use crate::extraction::parser::PayloadShape;
use crate::extraction::schema::BASIC_SCHEMA;
use crate::llm_client::DEFAULT_API_URL;

const DEFAULT_EXPORT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub groq_api_key: String,
    pub llm_api_url: String,
    pub port: u16,
    pub rust_log: String,
    /// Minimum spacing between two completion calls.
    pub request_delay: Duration,
    pub max_attempts: u32,
    pub payload_shape: PayloadShape,
    pub default_schema: String,
    pub output_dir: PathBuf,
    /// Exports older than this are deleted after each run. Zero keeps everything.
    pub export_retention: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let max_attempts = optional_env("MAX_ATTEMPTS", "1")
            .parse::<u32>()
            .context("MAX_ATTEMPTS must be a positive integer")?;
        if max_attempts == 0 {
            return Err(anyhow!("MAX_ATTEMPTS must be at least 1"));
        }

        Ok(Config {
            groq_api_key: require_env("GROQ_API_KEY")?,
            llm_api_url: optional_env("LLM_API_URL", DEFAULT_API_URL),
            port: optional_env("PORT", "8080")
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: optional_env("RUST_LOG", "info"),
            request_delay: optional_secs("REQUEST_DELAY_SECS", DEFAULT_CALL_INTERVAL)?,
            max_attempts,
            payload_shape: optional_env("PAYLOAD_SHAPE", "json")
                .parse::<PayloadShape>()
                .map_err(|e| anyhow!("PAYLOAD_SHAPE: {e}"))?,
            default_schema: optional_env("DEFAULT_SCHEMA", BASIC_SCHEMA),
            output_dir: PathBuf::from(optional_env("OUTPUT_DIR", "./exports")),
            export_retention: optional_secs("EXPORT_RETENTION_SECS", DEFAULT_EXPORT_RETENTION)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_secs(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(raw) => parse_secs(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .with_context(|| format!("{key} must be a whole number of seconds"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_delay_falls_back_to_call_interval() {
        let delay = optional_secs("RESUME_API_TEST_NEVER_SET_DELAY", DEFAULT_CALL_INTERVAL).unwrap();
        assert_eq!(delay, Duration::from_secs(10));
    }

    #[test]
    fn test_parse_secs() {
        assert_eq!(parse_secs("X", " 3 ").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_secs("X", "0").unwrap(), Duration::ZERO);
        let err = parse_secs("REQUEST_DELAY_SECS", "ten").unwrap_err();
        assert!(err.to_string().contains("REQUEST_DELAY_SECS"));
    }
}
