//! Database configuration

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ChronoError, ChronoResult};
use crate::index::FieldIndexDefinition;
use crate::temporal::ClockKind;
use crate::tkvs::ConflictResolutionKind;

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Memory,
    File,
}

/// Database configuration, loaded from a JSON file or built in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChronoConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Required for the file backend
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// fsync every journal append (default: true)
    #[serde(default = "default_sync_writes")]
    pub sync_writes: bool,

    #[serde(default)]
    pub clock: ClockKind,

    /// Drop writes that would not change the stored value (default: true)
    #[serde(default = "default_duplicate_version_elimination")]
    pub duplicate_version_elimination: bool,

    /// Strategy for transactions that do not choose one
    #[serde(default)]
    pub conflict_resolution: ConflictResolutionKind,

    /// Field indexers registered on open
    #[serde(default)]
    pub indexes: Vec<FieldIndexDefinition>,
}

fn default_sync_writes() -> bool {
    true
}

fn default_duplicate_version_elimination() -> bool {
    true
}

impl Default for ChronoConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            data_dir: None,
            sync_writes: default_sync_writes(),
            clock: ClockKind::default(),
            duplicate_version_elimination: default_duplicate_version_elimination(),
            conflict_resolution: ConflictResolutionKind::default(),
            indexes: Vec::new(),
        }
    }
}

impl ChronoConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(data_dir: impl AsRef<Path>) -> Self {
        Self {
            backend: BackendKind::File,
            data_dir: Some(data_dir.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    pub fn with_clock(mut self, clock: ClockKind) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_index(mut self, definition: FieldIndexDefinition) -> Self {
        self.indexes.push(definition);
        self
    }

    /// Reads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> ChronoResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ChronoError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: ChronoConfig = serde_json::from_str(&text)
            .map_err(|e| ChronoError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ChronoResult<()> {
        if self.backend == BackendKind::File && self.data_dir.is_none() {
            return Err(ChronoError::Config(
                "the file backend requires data_dir".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for index in &self.indexes {
            if index.name.is_empty() || index.field.is_empty() {
                return Err(ChronoError::Config(
                    "index name and field must not be empty".to_string(),
                ));
            }
            if !seen.insert(index.name.as_str()) {
                return Err(ChronoError::Config(format!(
                    "index '{}' is defined twice",
                    index.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexValueType;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config: ChronoConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ChronoConfig::default());
        assert!(config.sync_writes);
        assert!(config.duplicate_version_elimination);
        assert_eq!(config.clock, ClockKind::Wall);
    }

    #[test]
    fn test_load_file_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chronodb.json");
        fs::write(
            &path,
            r#"{
                "backend": "file",
                "data_dir": "/var/lib/chronodb",
                "clock": "logical",
                "conflict_resolution": "overwrite_with_source",
                "indexes": [{"name": "name", "field": "name", "value_type": "string"}]
            }"#,
        )
        .unwrap();
        let config = ChronoConfig::load(&path).unwrap();
        assert_eq!(config.backend, BackendKind::File);
        assert_eq!(config.conflict_resolution, ConflictResolutionKind::OverwriteWithSource);
        assert_eq!(config.indexes[0].value_type, IndexValueType::String);
    }

    #[test]
    fn test_validation() {
        let mut config = ChronoConfig::default();
        config.backend = BackendKind::File;
        assert!(config.validate().is_err());

        let definition = FieldIndexDefinition {
            name: "n".into(),
            field: "name".into(),
            value_type: IndexValueType::String,
        };
        let config = ChronoConfig::in_memory()
            .with_index(definition.clone())
            .with_index(definition);
        assert_eq!(config.validate().unwrap_err().code(), "CHRONO_CONFIG");
    }
}
