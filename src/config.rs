//! Session configuration, read from a JSON file or the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, Url};
use serde::Deserialize;

use crate::errors::Error;
use crate::token::{
    ACTIVITY_INTERVAL, INACTIVITY_TIMEOUT, MIN_REFRESH_DELAY, PROACTIVE_THRESHOLD, REFRESH_LEAD,
    RefreshPolicy,
};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Base URL of the gate-pass backend, e.g. `https://gate.example.com`.
    pub api_url: String,
    /// Where to persist the session; in-memory when unset.
    #[serde(default)]
    pub token_store_path: Option<PathBuf>,
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
    #[serde(default = "default_refresh_lead_secs")]
    pub refresh_lead_secs: u64,
    #[serde(default = "default_min_refresh_delay_secs")]
    pub min_refresh_delay_secs: u64,
    #[serde(default = "default_proactive_threshold_secs")]
    pub proactive_threshold_secs: u64,
    #[serde(default = "default_activity_interval_secs")]
    pub activity_interval_secs: u64,
    /// Overall timeout for refresh and API requests; the HTTP client default when unset.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_inactivity_timeout_secs() -> u64 {
    INACTIVITY_TIMEOUT.as_secs()
}

fn default_refresh_lead_secs() -> u64 {
    REFRESH_LEAD.as_secs()
}

fn default_min_refresh_delay_secs() -> u64 {
    MIN_REFRESH_DELAY.as_secs()
}

fn default_proactive_threshold_secs() -> u64 {
    PROACTIVE_THRESHOLD.as_secs()
}

fn default_activity_interval_secs() -> u64 {
    ACTIVITY_INTERVAL.as_secs()
}

impl Config {
    pub fn from_values(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            token_store_path: None,
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            refresh_lead_secs: default_refresh_lead_secs(),
            min_refresh_delay_secs: default_min_refresh_delay_secs(),
            proactive_threshold_secs: default_proactive_threshold_secs(),
            activity_interval_secs: default_activity_interval_secs(),
            request_timeout_secs: None,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `GATEPASS_API_URL` (required), `GATEPASS_TOKEN_STORE`,
    /// `GATEPASS_INACTIVITY_TIMEOUT_SECS` and `GATEPASS_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(get: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = get("GATEPASS_API_URL")
            .ok_or_else(|| Error::Config("Missing GATEPASS_API_URL env var".to_string()))?;
        let mut config = Self::from_values(api_url);
        config.token_store_path = get("GATEPASS_TOKEN_STORE").map(PathBuf::from);
        if let Some(raw) = get("GATEPASS_INACTIVITY_TIMEOUT_SECS") {
            config.inactivity_timeout_secs = parse_secs("GATEPASS_INACTIVITY_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = get("GATEPASS_REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = Some(parse_secs("GATEPASS_REQUEST_TIMEOUT_SECS", &raw)?);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        Url::parse(&self.api_url).map_err(|e| {
            Error::Config(format!("Invalid API URL '{}': {}", self.api_url, e))
        })?;
        self.policy()?;
        Ok(())
    }

    pub fn policy(&self) -> Result<RefreshPolicy, Error> {
        RefreshPolicy::new(
            Duration::from_secs(self.inactivity_timeout_secs),
            Duration::from_secs(self.refresh_lead_secs),
            Duration::from_secs(self.min_refresh_delay_secs),
            Duration::from_secs(self.proactive_threshold_secs),
            Duration::from_secs(self.activity_interval_secs),
        )
    }

    pub fn http_client(&self) -> Result<Client, Error> {
        let mut builder = Client::builder();
        if let Some(secs) = self.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(builder.build()?)
    }
}

fn parse_secs(name: &str, raw: &str) -> Result<u64, Error> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name} must be a whole number of seconds, got '{raw}'")))
}
