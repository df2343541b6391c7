use anyhow::{Context, Result, anyhow};
use dotenv::dotenv;
use std::env;
use std::time::Duration;

use crate::contest::POLL_INTERVAL;
use crate::models::DEFAULT_CONTEST_ID;

pub const DEFAULT_CALL_TOKEN: char = '$';

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub backend_url: String,
    pub backend_key: String,
    pub default_contest: String,
    pub poll_interval: Duration,
    pub call_token: char,
}

impl Config {
    /// Reads `.env` (if present) and then the process environment.
    pub fn load() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .with_context(|| format!("Expected '{key}=<value>' in .env in project root."))
        };

        let poll_interval = match lookup("SHODH_POLL_SECS") {
            Some(secs) => {
                let secs = secs
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("SHODH_POLL_SECS must be a whole number of seconds, got {secs}"))?;
                if secs == 0 {
                    return Err(anyhow!("SHODH_POLL_SECS must be at least 1."));
                }
                Duration::from_secs(secs)
            }
            None => POLL_INTERVAL,
        };

        Ok(Self {
            backend_url: required("SHODH_BACKEND_URL")?,
            backend_key: required("SHODH_BACKEND_KEY")?,
            default_contest: lookup("SHODH_DEFAULT_CONTEST")
                .unwrap_or_else(|| String::from(DEFAULT_CONTEST_ID)),
            poll_interval,
            call_token: call_token(lookup("SHODH_CALL_TOKEN")),
        })
    }
}

/// Single-character command prefix. Longer values are truncated.
fn call_token(value: Option<String>) -> char {
    let Some(value) = value else {
        return DEFAULT_CALL_TOKEN;
    };

    let Some(token) = value.trim().chars().next() else {
        log::warn!("$SHODH_CALL_TOKEN is empty, using {DEFAULT_CALL_TOKEN}");
        return DEFAULT_CALL_TOKEN;
    };

    if value.trim().chars().count() > 1 {
        log::warn!("$SHODH_CALL_TOKEN not a single character. Truncating to {token}");
    }

    token
}
