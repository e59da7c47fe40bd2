use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::Context;
use url::Url;

pub const DEFAULT_IDENTITY_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_CONFIG_FILE: &str = "memochat.toml";
const DEFAULT_SIGNUP_REDIRECT_DELAY_MS: u64 = 2_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub identity_url: String,
    pub assistant_url: String,
    pub signup_redirect_delay_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            identity_url: DEFAULT_IDENTITY_URL.into(),
            assistant_url: DEFAULT_IDENTITY_URL.into(),
            signup_redirect_delay_ms: DEFAULT_SIGNUP_REDIRECT_DELAY_MS,
        }
    }
}

impl ClientSettings {
    pub fn signup_redirect_delay(&self) -> Duration {
        Duration::from_millis(self.signup_redirect_delay_ms)
    }
}

/// Defaults, then the optional TOML file, then `APP__*` environment variables.
/// An assistant address that is never set follows the identity address.
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<ClientSettings> {
    let mut settings = ClientSettings::default();
    let mut assistant_set = false;

    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg = toml::from_str::<HashMap<String, toml::Value>>(&raw)
                .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
            if let Some(v) = file_cfg.get("identity_url").and_then(toml::Value::as_str) {
                settings.identity_url = v.to_string();
            }
            if let Some(v) = file_cfg.get("assistant_url").and_then(toml::Value::as_str) {
                settings.assistant_url = v.to_string();
                assistant_set = true;
            }
            if let Some(v) = file_cfg.get("signup_redirect_delay_ms") {
                settings.signup_redirect_delay_ms = v
                    .as_integer()
                    .and_then(|ms| u64::try_from(ms).ok())
                    .with_context(|| {
                        format!(
                            "signup_redirect_delay_ms in '{}' must be a non-negative integer, got {v}",
                            path.display()
                        )
                    })?;
            }
        }
        Err(err) if config_path.is_some() => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()));
        }
        Err(_) => {}
    }

    if let Ok(v) = std::env::var("APP__IDENTITY_URL") {
        settings.identity_url = v;
    }
    if let Ok(v) = std::env::var("APP__ASSISTANT_URL") {
        settings.assistant_url = v;
        assistant_set = true;
    }

    if !assistant_set {
        settings.assistant_url = settings.identity_url.clone();
    }
    settings.normalize()
}

impl ClientSettings {
    /// Validates both addresses and strips trailing slashes so paths can be
    /// appended with `format!("{base}/path")`.
    pub fn normalize(mut self) -> anyhow::Result<Self> {
        self.identity_url = normalize_base_url(&self.identity_url)
            .with_context(|| format!("invalid identity url '{}'", self.identity_url))?;
        self.assistant_url = normalize_base_url(&self.assistant_url)
            .with_context(|| format!("invalid assistant url '{}'", self.assistant_url))?;
        Ok(self)
    }
}

pub fn normalize_base_url(raw: &str) -> anyhow::Result<String> {
    let parsed = Url::parse(raw.trim())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("unsupported scheme '{}'", parsed.scheme());
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
