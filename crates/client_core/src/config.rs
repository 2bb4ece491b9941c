use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::dedup::DedupPolicy;

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub auth_scheme: String,
    pub in_flight_max_age: Duration,
    pub dedup_policy: DedupPolicy,
    pub optimistic_echo: bool,
    pub page_size: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".into(),
            request_timeout: Duration::from_millis(10_000),
            auth_scheme: "Token".into(),
            in_flight_max_age: crate::dedup::DEFAULT_MAX_IN_FLIGHT_AGE,
            dedup_policy: DedupPolicy::Suppress,
            optimistic_echo: false,
            page_size: 10,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_base_url: Option<String>,
    request_timeout_ms: Option<u64>,
    auth_scheme: Option<String>,
    in_flight_max_age_secs: Option<u64>,
    dedup_policy: Option<DedupPolicy>,
    optimistic_echo: Option<bool>,
    page_size: Option<u32>,
}

/// Defaults, then `client.toml` in the working directory if present, then
/// environment overrides.
pub fn load_settings() -> Result<ClientSettings> {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |name| std::env::var(name).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ClientSettings> {
    let mut settings = ClientSettings::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        let file_cfg: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?;
        settings.apply_file(file_cfg);
    }

    settings.apply_env(env)?;
    Ok(settings)
}

impl ClientSettings {
    fn apply_file(&mut self, file_cfg: FileSettings) {
        if let Some(v) = file_cfg.api_base_url {
            self.api_base_url = v;
        }
        if let Some(v) = file_cfg.request_timeout_ms {
            self.request_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file_cfg.auth_scheme {
            self.auth_scheme = v;
        }
        if let Some(v) = file_cfg.in_flight_max_age_secs {
            self.in_flight_max_age = Duration::from_secs(v);
        }
        if let Some(v) = file_cfg.dedup_policy {
            self.dedup_policy = v;
        }
        if let Some(v) = file_cfg.optimistic_echo {
            self.optimistic_echo = v;
        }
        if let Some(v) = file_cfg.page_size {
            self.page_size = v;
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = env("HUB_API_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = env("APP__API_BASE_URL") {
            self.api_base_url = v;
        }

        if let Some(v) = env("APP__REQUEST_TIMEOUT_MS") {
            let ms = v
                .parse::<u64>()
                .with_context(|| format!("APP__REQUEST_TIMEOUT_MS is not a number: '{v}'"))?;
            self.request_timeout = Duration::from_millis(ms);
        }

        if let Some(v) = env("APP__AUTH_SCHEME") {
            self.auth_scheme = v;
        }

        if let Some(v) = env("APP__IN_FLIGHT_MAX_AGE_SECS") {
            let secs = v.parse::<u64>().with_context(|| {
                format!("APP__IN_FLIGHT_MAX_AGE_SECS is not a number: '{v}'")
            })?;
            self.in_flight_max_age = Duration::from_secs(secs);
        }

        if let Some(v) = env("APP__DEDUP_POLICY") {
            self.dedup_policy = match v.trim().to_ascii_lowercase().as_str() {
                "suppress" => DedupPolicy::Suppress,
                "join" => DedupPolicy::Join,
                other => {
                    anyhow::bail!("APP__DEDUP_POLICY must be 'suppress' or 'join', got '{other}'")
                }
            };
        }

        if let Some(v) = env("APP__OPTIMISTIC_ECHO") {
            self.optimistic_echo = matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        if let Some(v) = env("APP__PAGE_SIZE") {
            self.page_size = v
                .parse::<u32>()
                .with_context(|| format!("APP__PAGE_SIZE is not a number: '{v}'"))?;
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
