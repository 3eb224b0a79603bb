use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";
const DEFAULT_SOCKET_URL: &str = "ws://localhost:5000/ws";
const DEFAULT_TOKEN_DIR: &str = ".jobboard";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Optional product surfaces. Read once at startup; the session core ignores them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    pub video_calls: bool,
    pub chat: bool,
    pub oauth: bool,
}

/// Client configuration loaded from environment variables.
/// Every setting has a default so a bare checkout talks to a local backend.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub socket_url: String,
    pub token_dir: PathBuf,
    pub http_timeout: Duration,
    pub features: FeatureFlags,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let timeout_secs = match std::env::var("HTTP_TIMEOUT_SECS") {
            Ok(raw) => raw
                .parse::<u64>()
                .context("HTTP_TIMEOUT_SECS must be a whole number of seconds")?,
            Err(_) => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        Ok(Config {
            api_base_url: env_or("API_BASE_URL", DEFAULT_API_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            socket_url: env_or("SOCKET_URL", DEFAULT_SOCKET_URL),
            token_dir: PathBuf::from(env_or("TOKEN_DIR", DEFAULT_TOKEN_DIR)),
            http_timeout: Duration::from_secs(timeout_secs),
            features: FeatureFlags {
                video_calls: flag("ENABLE_VIDEO_CALLS")?,
                chat: flag("ENABLE_CHAT")?,
                oauth: flag("ENABLE_OAUTH")?,
            },
            rust_log: env_or("RUST_LOG", "info"),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn flag(key: &str) -> Result<bool> {
    match std::env::var(key) {
        Ok(raw) => parse_flag(&raw).with_context(|| format!("'{key}' must be true or false, got '{raw}'")),
        Err(_) => Ok(false),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" on "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag(""), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
