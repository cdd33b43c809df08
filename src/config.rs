//! Configuration types and validation for the call-sequence guard

use crate::automaton::env::{BoundedEnv, Environment, HostEnv};
use crate::automaton::index::DEFAULT_INDEX_CHUNK;
use crate::automaton::layout::{StateId, DEFAULT_CAPACITY, HEADER_SIZE, STATE_RECORD_SIZE};
use crate::error::{GuardError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Main guard configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GuardConfig {
    /// Region sizing and limits
    #[serde(default)]
    pub arena: ArenaConfig,

    /// Execution environment the automaton is created in
    #[serde(default)]
    pub environment: EnvironmentConfig,
}

/// Region sizing and limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArenaConfig {
    /// Region size in bytes; also the exact size of a stored blob
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Index growth step, in slots
    #[serde(default = "default_index_chunk")]
    pub index_chunk: usize,

    /// Largest admissible state id. The region size lowers it further, see
    /// [`ArenaConfig::state_id_limit`].
    #[serde(default = "default_max_state_id")]
    pub max_state_id: StateId,
}

/// Execution environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EnvironmentConfig {
    /// Ordinary process
    #[default]
    Host,
    /// Allocation-constrained context
    Bounded {
        /// Ceiling on any single allocation, in bytes
        limit: usize,
    },
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_index_chunk() -> usize {
    DEFAULT_INDEX_CHUNK
}

fn default_max_state_id() -> StateId {
    (1 << 24) - 1
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            index_chunk: default_index_chunk(),
            max_state_id: default_max_state_id(),
        }
    }
}

impl ArenaConfig {
    /// Config with a custom region size
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Largest state id admitted in a region of `region_len` bytes.
    ///
    /// Ids cannot exceed the number of state records the region could ever
    /// hold. This keeps the index no larger than the region warrants, however
    /// sparse the ids in an untrusted region are.
    pub fn state_id_limit(&self, region_len: usize) -> StateId {
        let records = region_len.saturating_sub(HEADER_SIZE) / STATE_RECORD_SIZE;
        let densest = StateId::try_from(records.saturating_sub(1)).unwrap_or(StateId::MAX);
        self.max_state_id.min(densest)
    }

    /// Validate sizing
    pub fn validate(&self) -> Result<()> {
        if self.capacity < HEADER_SIZE {
            return Err(GuardError::Config(format!(
                "arena capacity {} is smaller than the {} byte header",
                self.capacity, HEADER_SIZE
            )));
        }

        if self.index_chunk == 0 {
            return Err(GuardError::Config(
                "indexChunk must be at least 1".to_string(),
            ));
        }

        if self.capacity < HEADER_SIZE + STATE_RECORD_SIZE {
            tracing::warn!("Arena capacity {} cannot hold any state", self.capacity);
        }

        Ok(())
    }
}

impl EnvironmentConfig {
    /// Instantiate the environment
    pub fn build(&self) -> Arc<dyn Environment> {
        match self {
            EnvironmentConfig::Host => Arc::new(HostEnv),
            EnvironmentConfig::Bounded { limit } => Arc::new(BoundedEnv::new(*limit)),
        }
    }
}

impl GuardConfig {
    /// Load configuration from a JSON file, or TOML when the extension says so
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.arena.validate()?;

        if let EnvironmentConfig::Bounded { limit } = self.environment {
            if limit < self.arena.capacity {
                return Err(GuardError::Config(format!(
                    "bounded environment limit {} is below arena capacity {}",
                    limit, self.arena.capacity
                )));
            }
        }

        Ok(())
    }

    /// Get default settings path
    pub fn default_settings_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".callguard.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serialization() {
        let config = GuardConfig {
            arena: ArenaConfig::default().with_capacity(64 * 1024),
            environment: EnvironmentConfig::Bounded { limit: 128 * 1024 },
        };

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"indexChunk\""));
        assert!(json.contains("\"kind\":\"bounded\""));

        let parsed: GuardConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.arena, config.arena);
        assert_eq!(parsed.environment, config.environment);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let parsed: GuardConfig = serde_json::from_str(r#"{"arena":{"capacity":4096}}"#).unwrap();
        assert_eq!(parsed.arena.capacity, 4096);
        assert_eq!(parsed.arena.index_chunk, DEFAULT_INDEX_CHUNK);
        assert_eq!(parsed.environment, EnvironmentConfig::Host);
    }

    #[test]
    fn test_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        std::fs::write(
            &path,
            "[arena]\ncapacity = 8192\n\n[environment]\nkind = \"bounded\"\nlimit = 16384\n",
        )
        .unwrap();

        let config = GuardConfig::from_file(&path).unwrap();
        assert_eq!(config.arena.capacity, 8192);
        assert_eq!(config.environment, EnvironmentConfig::Bounded { limit: 16384 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_state_id_limit_follows_capacity() {
        let config = ArenaConfig::default();
        assert_eq!(config.state_id_limit(HEADER_SIZE + 10 * STATE_RECORD_SIZE), 9);
        assert_eq!(config.state_id_limit(HEADER_SIZE), 0);
        assert_eq!(config.state_id_limit(usize::MAX), config.max_state_id);

        let strict = ArenaConfig {
            max_state_id: 3,
            ..ArenaConfig::default()
        };
        assert_eq!(strict.state_id_limit(DEFAULT_CAPACITY), 3);
    }

    #[test]
    fn test_validation_rejects_bad_sizes() {
        let tiny = GuardConfig {
            arena: ArenaConfig::default().with_capacity(HEADER_SIZE - 1),
            ..Default::default()
        };
        assert!(tiny.validate().is_err());

        let starved = GuardConfig {
            environment: EnvironmentConfig::Bounded { limit: 1024 },
            ..Default::default()
        };
        assert!(starved.validate().is_err());
    }
}
