// src/config.rs
//! Application configuration: distinguished accounts, policy lists, link
//! gate settings. Loaded once at startup; the rule tables live separately
//! in the topic config (see `rules.rs`).

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "config/curator.toml";
pub const ENV_CONFIG_PATH: &str = "CURATOR_CONFIG_PATH";
pub const ENV_BACKEND_URL: &str = "CURATOR_BACKEND_URL";
pub const ENV_OFFLINE: &str = "CURATOR_OFFLINE";

const BUILTIN_CONFIG_TOML: &str = include_str!("../config/curator.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct CuratorConfig {
    pub app: AppSection,
    pub policy: PolicySection,
    #[serde(default)]
    pub links: LinksSection,
    #[serde(default)]
    pub feeds: FeedsSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub self_handle: String,
    pub authority_handle: String,
    pub organization_handle: String,
    #[serde(default = "default_refresh_secs")]
    pub membership_refresh_secs: u64,
    #[serde(default = "default_link_state_path")]
    pub link_state_path: String,
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicySection {
    #[serde(default)]
    pub important: Vec<String>,
    #[serde(default)]
    pub trusted_media: Vec<String>,
    #[serde(default)]
    pub disqualifying_description: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinksSection {
    #[serde(default)]
    pub always_important: Vec<String>,
    #[serde(default)]
    pub live_channels: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedsSection {
    #[serde(default)]
    pub site_announcement_phrases: Vec<String>,
}

fn default_refresh_secs() -> u64 {
    900
}

fn default_link_state_path() -> String {
    "state/seen_links.json".to_string()
}

fn default_admin_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl CuratorConfig {
    /// Load from `CURATOR_CONFIG_PATH` or the default path.
    pub fn from_path_env() -> anyhow::Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let content = fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!("failed to read curator config at {}: {}", path.display(), e)
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    pub fn builtin() -> Self {
        Self::from_toml_str(BUILTIN_CONFIG_TOML).expect("builtin curator config")
    }

    pub fn membership_refresh(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.app.membership_refresh_secs.max(1))
    }
}

/// Offline mode: in-memory collaborators, no network.
pub fn offline_mode() -> bool {
    std::env::var(ENV_OFFLINE).ok().as_deref() == Some("1")
}

/// Backend base URL for the production client.
pub fn backend_url() -> Option<String> {
    std::env::var(ENV_BACKEND_URL).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn builtin_config_parses() {
        let cfg = CuratorConfig::builtin();
        assert_eq!(cfg.app.self_handle, "starship_curator");
        assert!(!cfg.policy.important.is_empty());
        assert!(!cfg.feeds.site_announcement_phrases.is_empty());
    }

    #[test]
    fn missing_sections_default() {
        let cfg = CuratorConfig::from_toml_str(
            r#"
[app]
self_handle = "bot"
authority_handle = "chief"
organization_handle = "org"

[policy]
"#,
        )
        .unwrap();
        assert!(cfg.links.always_important.is_empty());
        assert_eq!(cfg.app.membership_refresh_secs, 900);
        assert_eq!(cfg.app.admin_addr, "127.0.0.1:8080");
    }

    #[test]
    #[serial]
    fn offline_flag_from_env() {
        std::env::remove_var(ENV_OFFLINE);
        assert!(!offline_mode());
        std::env::set_var(ENV_OFFLINE, "1");
        assert!(offline_mode());
        std::env::remove_var(ENV_OFFLINE);
    }
}
