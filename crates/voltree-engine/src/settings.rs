//! Engine settings
//!
//! Budgets and registry limits, stored as JSON. A missing or unreadable file
//! yields the defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use voltree_core::caching::{CacheBudget, CachingPolicy};
use voltree_core::params::ParameterRegistry;

/// Settings that shape every update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Voxels shared by all cached nodes
    pub max_voxels: u64,
    /// Most voxels a single cached node may receive
    pub per_node_ceiling: u64,
    /// Live parameter slots before transforms fall back to literals
    pub parameter_capacity: usize,
    /// Cache composite subtrees whose total cost exceeds this
    pub auto_cache_cost: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        let budget = CacheBudget::default();
        Self {
            max_voxels: budget.max_voxels,
            per_node_ceiling: budget.per_node_ceiling,
            parameter_capacity: ParameterRegistry::DEFAULT_CAPACITY,
            auto_cache_cost: None,
        }
    }
}

impl Settings {
    pub fn budget(&self) -> CacheBudget {
        CacheBudget {
            max_voxels: self.max_voxels,
            per_node_ceiling: self.per_node_ceiling,
        }
    }

    pub fn policy(&self) -> CachingPolicy {
        CachingPolicy {
            budget: self.budget(),
            auto_cache_cost: self.auto_cache_cost,
        }
    }
}

/// Load settings from `path`, returning defaults if the file doesn't exist or is invalid
pub fn load_settings(path: &Path) -> Settings {
    if !path.exists() {
        return Settings::default();
    }

    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            tracing::warn!("ignoring invalid settings in {}: {}", path.display(), e);
            Settings::default()
        }),
        Err(e) => {
            tracing::warn!("could not read {}: {}", path.display(), e);
            Settings::default()
        }
    }
}

/// Save settings to `path` as pretty JSON
pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    let json = serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;

    fs::write(path, json).context("Failed to write settings file")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("voltree-settings-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn defaults_match_core_limits() {
        let settings = Settings::default();
        assert_eq!(settings.max_voxels, 4 * 128 * 128 * 128);
        assert_eq!(settings.per_node_ceiling, 128 * 128 * 128);
        assert_eq!(settings.parameter_capacity, 1024);
        assert_eq!(settings.policy(), CachingPolicy::default());
    }

    #[test]
    fn save_then_load() {
        let path = scratch("roundtrip/settings.json");
        let settings = Settings {
            max_voxels: 1_000_000,
            auto_cache_cost: Some(40),
            ..Settings::default()
        };
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path), settings);
    }

    #[test]
    fn missing_or_invalid_file_gives_defaults() {
        assert_eq!(load_settings(&scratch("absent.json")), Settings::default());

        let path = scratch("invalid.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings(&path), Settings::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let path = scratch("partial.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{ "max_voxels": 4096 }"#).unwrap();
        let settings = load_settings(&path);
        assert_eq!(settings.max_voxels, 4096);
        assert_eq!(settings.parameter_capacity, 1024);
    }
}
