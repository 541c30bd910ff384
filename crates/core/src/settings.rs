//! Repository settings: `.entire/settings.json` with a `.local` overlay.
//!
//! The base file is meant to be committed; the local file holds per-machine
//! overrides and wins field by field. Empty strings in the local file do not
//! override, and the option maps merge key-wise rather than wholesale.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const STRATEGY_MANUAL_COMMIT: &str = "manual-commit";
pub const STRATEGY_AUTO_COMMIT: &str = "auto-commit";
pub const DEFAULT_STRATEGY: &str = STRATEGY_MANUAL_COMMIT;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings file {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

/// Fully resolved settings after merging base and local files.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub strategy: String,
    /// Explicit agent registry name; empty means auto-detect/default.
    pub agent: String,
    /// `None` means auto-detection is allowed (the default).
    pub agent_auto_detect: Option<bool>,
    pub enabled: bool,
    pub local_dev: bool,
    pub strategy_options: BTreeMap<String, String>,
    pub agent_options: BTreeMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strategy: DEFAULT_STRATEGY.to_string(),
            agent: String::new(),
            agent_auto_detect: None,
            enabled: true,
            local_dev: false,
            strategy_options: BTreeMap::new(),
            agent_options: BTreeMap::new(),
        }
    }
}

/// Raw shape of one settings file. Everything optional so the overlay can
/// distinguish "absent" from "explicitly set".
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent_auto_detect: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local_dev: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    strategy_options: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent_options: Option<BTreeMap<String, serde_json::Value>>,
}

impl Settings {
    /// Load and merge settings for the repository rooted at `root`. Missing
    /// files are fine; both missing yields the defaults.
    pub fn load(root: &Path) -> Result<Self, SettingsError> {
        let base = read_settings_file(&root.join(crate::paths::SETTINGS_FILE))?;
        let local = read_settings_file(&root.join(crate::paths::SETTINGS_LOCAL_FILE))?;
        Ok(Self::resolve(base, local))
    }

    fn resolve(base: SettingsFile, local: SettingsFile) -> Self {
        let merged = merge_files(base, local);
        let mut settings = Settings::default();
        if let Some(strategy) = non_empty(merged.strategy) {
            settings.strategy = normalize_strategy_name(&strategy);
        }
        if let Some(agent) = non_empty(merged.agent) {
            settings.agent = agent;
        }
        settings.agent_auto_detect = merged.agent_auto_detect;
        if let Some(enabled) = merged.enabled {
            settings.enabled = enabled;
        }
        if let Some(local_dev) = merged.local_dev {
            settings.local_dev = local_dev;
        }
        if let Some(options) = merged.strategy_options {
            settings.strategy_options = options;
        }
        if let Some(options) = merged.agent_options {
            settings.agent_options = options;
        }
        settings
    }

    /// Free-form options configured for one agent, if any.
    pub fn agent_options(&self, registry_name: &str) -> Option<&serde_json::Value> {
        self.agent_options.get(registry_name)
    }
}

fn merge_files(base: SettingsFile, local: SettingsFile) -> SettingsFile {
    SettingsFile {
        strategy: override_string(base.strategy, local.strategy),
        agent: override_string(base.agent, local.agent),
        agent_auto_detect: local.agent_auto_detect.or(base.agent_auto_detect),
        enabled: local.enabled.or(base.enabled),
        local_dev: local.local_dev.or(base.local_dev),
        strategy_options: merge_maps(base.strategy_options, local.strategy_options),
        agent_options: merge_maps(base.agent_options, local.agent_options),
    }
}

/// A local string overrides only when present and non-empty.
fn override_string(base: Option<String>, local: Option<String>) -> Option<String> {
    match local {
        Some(value) if !value.is_empty() => Some(value),
        _ => base,
    }
}

fn merge_maps<V>(
    base: Option<BTreeMap<String, V>>,
    local: Option<BTreeMap<String, V>>,
) -> Option<BTreeMap<String, V>> {
    match (base, local) {
        (None, None) => None,
        (Some(map), None) | (None, Some(map)) => Some(map),
        (Some(mut base), Some(local)) => {
            base.extend(local);
            Some(base)
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Earlier releases shipped under different strategy names; keep old
/// settings files working.
fn normalize_strategy_name(name: &str) -> String {
    match name {
        "shadow" => STRATEGY_MANUAL_COMMIT.to_string(),
        "dual" => STRATEGY_AUTO_COMMIT.to_string(),
        other => other.to_string(),
    }
}

fn read_settings_file(path: &Path) -> Result<SettingsFile, SettingsError> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).map_err(|source| SettingsError::Json {
            path: path.display().to_string(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SettingsFile::default()),
        Err(e) => Err(e.into()),
    }
}
