use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use tracing::warn;

use crate::backoff::BackoffPolicy;

pub const DEFAULT_SETTINGS_PATH: &str = "bridge.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub database_url: String,
    /// Name of the remote service as shown in bridge notices.
    pub remote_network_name: String,
    /// How many of the most recent conversations get a local mirror on first sync.
    pub initial_chat_sync: usize,
    pub disable_bridge_notices: bool,
    pub unimportant_bridge_notices: bool,
    pub backoff: BackoffSettings,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/bridge.db".into(),
            remote_network_name: "Google Chat".into(),
            initial_chat_sync: 10,
            disable_bridge_notices: false,
            unimportant_bridge_notices: true,
            backoff: BackoffSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub initial_secs: u64,
    pub quiet_period_secs: u64,
    pub escalation_secs: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_secs: 4,
            quiet_period_secs: 60,
            escalation_secs: 60,
        }
    }
}

impl BackoffSettings {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_secs(self.initial_secs),
            quiet_period: Duration::from_secs(self.quiet_period_secs),
            escalation_threshold: Duration::from_secs(self.escalation_secs),
        }
    }
}

pub fn load_settings() -> BridgeSettings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_PATH), |key| std::env::var(key).ok())
}

/// Reads `path` when it exists, then applies `BRIDGE__*` overrides from `env`.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> BridgeSettings {
    let mut settings = BridgeSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<BridgeSettings>(&raw) {
            Ok(file_cfg) => settings = file_cfg,
            Err(err) => warn!(
                path = %path.display(),
                error = %err,
                "ignoring unparseable bridge settings file"
            ),
        }
    }

    apply_env_overrides(&mut settings, env);
    settings
}

fn apply_env_overrides(settings: &mut BridgeSettings, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("BRIDGE__DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("BRIDGE__REMOTE_NETWORK_NAME") {
        settings.remote_network_name = v;
    }
    if let Some(v) = env("BRIDGE__INITIAL_CHAT_SYNC") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.initial_chat_sync = parsed;
        }
    }
    if let Some(v) = env("BRIDGE__DISABLE_BRIDGE_NOTICES") {
        if let Some(parsed) = parse_flag(&v) {
            settings.disable_bridge_notices = parsed;
        }
    }
    if let Some(v) = env("BRIDGE__UNIMPORTANT_BRIDGE_NOTICES") {
        if let Some(parsed) = parse_flag(&v) {
            settings.unimportant_bridge_notices = parsed;
        }
    }
    if let Some(v) = env("BRIDGE__BACKOFF_INITIAL_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.backoff.initial_secs = parsed;
        }
    }
    if let Some(v) = env("BRIDGE__BACKOFF_QUIET_PERIOD_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.backoff.quiet_period_secs = parsed;
        }
    }
    if let Some(v) = env("BRIDGE__BACKOFF_ESCALATION_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.backoff.escalation_secs = parsed;
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Turns plain paths into sqlite urls; anything that already names a scheme is kept.
pub fn prepare_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return BridgeSettings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
