//! Restore configuration.
//!
//! One immutable value carries the allow-list, the canonical dependency
//! order, the protected entity types and the operational knobs. It is read
//! from TOML and injected into the orchestrator at construction.
//!
//! # Example
//!
//! ```toml
//! allowed_apps = ["school"]
//! dependency_order = ["school.classroom", "school.student", "school.feedeposit"]
//! protected_entity_types = ["auth.user", "sessions.session"]
//! chunk_size = 500
//! snapshot_dir = "/var/lib/campus/snapshots"
//! snapshot_retention = 10
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::is_valid_entity_type;

/// Errors raised while loading or validating a [`RestoreConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// App labels whose entity types may be restored or exported.
    pub allowed_apps: BTreeSet<String>,
    /// Canonical restore order, parents before children.
    pub dependency_order: Vec<String>,
    /// Entity types a replace-mode clear must never delete.
    pub protected_entity_types: BTreeSet<String>,
    /// Records per reconciliation chunk.
    pub chunk_size: usize,
    /// Where rollback snapshots are written.
    pub snapshot_dir: PathBuf,
    /// How many rollback snapshots to keep.
    pub snapshot_retention: usize,
    /// Capture a snapshot before restoring and merge it back on failure.
    pub snapshot_before_restore: bool,
    /// Seconds a progress entry survives after its last update.
    pub progress_ttl_secs: u64,
}

const SCHOOL_ORDER: &[&str] = &[
    "school.academicyear",
    "school.classroom",
    "school.section",
    "school.subject",
    "school.staff",
    "school.student",
    "school.feetype",
    "school.feestructure",
    "school.feedeposit",
    "school.fine",
    "school.attendance",
];

const PROTECTED: &[&str] = &[
    "auth.user",
    "auth.group",
    "auth.permission",
    "sessions.session",
    "contenttypes.contenttype",
];

impl Default for RestoreConfig {
    fn default() -> Self {
        RestoreConfig {
            allowed_apps: BTreeSet::from(["school".to_string()]),
            dependency_order: SCHOOL_ORDER.iter().map(|s| s.to_string()).collect(),
            protected_entity_types: PROTECTED.iter().map(|s| s.to_string()).collect(),
            chunk_size: 1000,
            snapshot_dir: PathBuf::from(".campus/snapshots"),
            snapshot_retention: 5,
            snapshot_before_restore: true,
            progress_ttl_secs: 3600,
        }
    }
}

impl RestoreConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: RestoreConfig = toml::from_str(text)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Lower-case every entity type and app label.
    pub fn normalize(&mut self) {
        self.allowed_apps = self.allowed_apps.iter().map(|a| a.to_lowercase()).collect();
        for entry in &mut self.dependency_order {
            *entry = entry.to_lowercase();
        }
        self.protected_entity_types = self
            .protected_entity_types
            .iter()
            .map(|t| t.to_lowercase())
            .collect();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be at least 1".to_string()));
        }
        let bad = self
            .dependency_order
            .iter()
            .chain(&self.protected_entity_types)
            .find(|t| !is_valid_entity_type(t));
        if let Some(bad) = bad {
            return Err(ConfigError::Invalid(format!(
                "'{}' is not an <app>.<entity> type",
                bad
            )));
        }
        Ok(())
    }

    pub fn is_allowed(&self, entity_type: &str) -> bool {
        entity_type
            .split_once('.')
            .is_some_and(|(app, _)| self.allowed_apps.contains(app))
    }

    pub fn is_protected(&self, entity_type: &str) -> bool {
        self.protected_entity_types.contains(entity_type)
    }
}
