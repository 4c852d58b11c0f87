//! Environment configuration.
//!
//! Everything comes from the process environment; the binary loads a
//! `.env` file first. Per-sport provider credentials use the sport's
//! prefix (`MLB_API_KEY` / `MLB_API_HOST`, and likewise for WNBA and NFL),
//! so one deployment can hold keys for any subset of sports.

use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::client::RetryPolicy;
use crate::coordinator::DEFAULT_BATCH_SIZE;
use crate::models::SportId;

#[derive(Debug, Clone)]
pub struct SportCredentials {
    pub api_key: String,
    pub api_host: String,
}

impl SportCredentials {
    /// Base URL for requests. `*_API_HOST` is normally a bare RapidAPI
    /// hostname; an explicit scheme is honored for local endpoints.
    pub fn base_url(&self) -> String {
        if self.api_host.starts_with("http://") || self.api_host.starts_with("https://") {
            self.api_host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.api_host)
        }
    }

    /// Value for the `x-rapidapi-host` header.
    pub fn host_header(&self) -> &str {
        self.api_host
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let db_path = env::var("DB_PATH").context("DB_PATH is not set")?;
        if db_path.trim().is_empty() {
            bail!("DB_PATH is empty");
        }

        let batch_size = env_parse::<usize>("SYNC_BATCH_SIZE")
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_BATCH_SIZE);

        let mut retry = RetryPolicy::default();
        if let Some(n) = env_parse::<u32>("SYNC_MAX_RATE_LIMIT_RETRIES") {
            retry.max_rate_limit_retries = n;
        }
        if let Some(n) = env_parse::<u32>("SYNC_MAX_TRANSIENT_RETRIES") {
            retry.max_transient_retries = n;
        }
        if let Some(ms) = env_parse::<u64>("SYNC_INITIAL_BACKOFF_MS") {
            retry.initial_backoff = Duration::from_millis(ms);
        }

        Ok(Self {
            db_path,
            batch_size,
            retry,
        })
    }

    /// Credentials for one sport. Missing vars fail here, before any
    /// network or database work.
    pub fn credentials(&self, sport: SportId) -> Result<SportCredentials> {
        let prefix = sport.env_prefix();
        let api_key = env::var(format!("{}_API_KEY", prefix))
            .with_context(|| format!("{}_API_KEY is not set", prefix))?;
        let api_host = env::var(format!("{}_API_HOST", prefix))
            .with_context(|| format!("{}_API_HOST is not set", prefix))?;
        Ok(SportCredentials { api_key, api_host })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test so env mutation never races a parallel test thread.
    #[test]
    fn config_round_trip_through_env() {
        env::remove_var("DB_PATH");
        assert!(Config::from_env().is_err());

        env::set_var("DB_PATH", "/tmp/sync-test.db");
        env::set_var("SYNC_BATCH_SIZE", "50");
        env::set_var("SYNC_MAX_RATE_LIMIT_RETRIES", "2");
        let config = Config::from_env().unwrap();
        assert_eq!(config.db_path, "/tmp/sync-test.db");
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.retry.max_rate_limit_retries, 2);

        env::set_var("SYNC_BATCH_SIZE", "0");
        assert_eq!(Config::from_env().unwrap().batch_size, DEFAULT_BATCH_SIZE);

        assert!(config.credentials(SportId::Wnba).is_err());
        env::set_var("WNBA_API_KEY", "k");
        env::set_var("WNBA_API_HOST", "tank01-fantasy-stats.p.rapidapi.com");
        let creds = config.credentials(SportId::Wnba).unwrap();
        assert_eq!(
            creds.base_url(),
            "https://tank01-fantasy-stats.p.rapidapi.com"
        );
        assert_eq!(creds.host_header(), "tank01-fantasy-stats.p.rapidapi.com");

        let local = SportCredentials {
            api_key: "k".into(),
            api_host: "http://127.0.0.1:9999/".into(),
        };
        assert_eq!(local.base_url(), "http://127.0.0.1:9999");
        assert_eq!(local.host_header(), "127.0.0.1:9999");

        for var in [
            "DB_PATH",
            "SYNC_BATCH_SIZE",
            "SYNC_MAX_RATE_LIMIT_RETRIES",
            "WNBA_API_KEY",
            "WNBA_API_HOST",
        ] {
            env::remove_var(var);
        }
    }
}
