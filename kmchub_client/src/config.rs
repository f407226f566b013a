use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;

const DEFAULT_API_URL: &str = "http://127.0.0.1:5000/api";
const DEFAULT_STATIC_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub api_url: String,
    pub assets: StaticAssets,
    pub request_timeout: Duration,
    pub state_dir: PathBuf,
}

impl HubConfig {
    pub fn from_env() -> Result<Self> {
        let api_url = env::var("KMC_HUB_API_URL")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let static_url = env::var("KMC_HUB_STATIC_URL")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_STATIC_URL.to_string());
        let timeout_secs = env::var("KMC_HUB_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let state_dir = match env::var_os("KMC_HUB_STATE_DIR") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => default_state_dir(),
        };
        Self::new(api_url, static_url)
            .context("invalid KMC_HUB_API_URL / KMC_HUB_STATIC_URL")
            .map(|config| config.with_timeout(Duration::from_secs(timeout_secs)))
            .map(|config| config.with_state_dir(state_dir))
    }

    pub fn new(api_url: impl Into<String>, static_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_url: sanitize_base_url(api_url.into())?,
            assets: StaticAssets::new(static_url)?,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            state_dir: default_state_dir(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .map(|base| base.join("kmc_hub"))
        .unwrap_or_else(|| PathBuf::from(".kmc_hub"))
}

/// Resolves avatar and media paths returned by the API against the static
/// asset host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticAssets {
    base_url: String,
}

impl StaticAssets {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: sanitize_base_url(base_url.into())?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

pub(crate) fn sanitize_base_url(mut base: String) -> Result<String> {
    base = base.trim().to_string();
    if !base.starts_with("http://") && !base.starts_with("https://") {
        base = format!("http://{base}");
    }
    while base.ends_with('/') {
        base.pop();
    }
    let _ = Url::parse(&base).with_context(|| format!("invalid base URL: {base}"))?;
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_adds_scheme_and_strips_slashes() {
        assert_eq!(
            sanitize_base_url("localhost:5000/api//".into()).expect("url"),
            "http://localhost:5000/api"
        );
        assert_eq!(
            sanitize_base_url("https://hub.kmc.edu".into()).expect("url"),
            "https://hub.kmc.edu"
        );
    }

    #[test]
    fn sanitize_rejects_garbage() {
        assert!(sanitize_base_url("http://".into()).is_err());
    }

    #[test]
    fn assets_join_with_single_slash() {
        let assets = StaticAssets::new("http://cdn.kmc.edu/").expect("assets");
        assert_eq!(
            assets.resolve("/uploads/avatar.png"),
            "http://cdn.kmc.edu/uploads/avatar.png"
        );
        assert_eq!(
            assets.resolve("uploads/avatar.png"),
            "http://cdn.kmc.edu/uploads/avatar.png"
        );
        assert_eq!(
            assets.resolve("https://other.host/x.png"),
            "https://other.host/x.png"
        );
    }

    #[test]
    fn builder_overrides() {
        let config = HubConfig::new("http://api.test", "http://static.test")
            .expect("config")
            .with_timeout(Duration::from_secs(3))
            .with_state_dir("/tmp/kmc");
        assert_eq!(config.api_url, "http://api.test");
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.state_dir, PathBuf::from("/tmp/kmc"));
    }
}
