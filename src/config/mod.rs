//! Configuration of a reconciliation pass.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (varkb.toml)
//! ```toml
//! [clusters]
//! namespace = "pango"
//! over_merge = "abort"
//!
//! [references]
//! dangling = "report"
//!
//! [housekeeping]
//! dedupe_aa_changes = true
//! prune_protein_regions = true
//!
//! [storage]
//! data_dir = "/var/lib/varkb"
//! ```

mod defaults;

pub use defaults::*;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration of the reconciliation engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Variant cluster merging
    pub clusters: ClusterConfig,
    /// Handling of effect references found while rewriting
    pub references: ReferenceConfig,
    /// Normalization applied to records before grouping
    pub normalize: NormalizeConfig,
    /// Maintenance passes over the auxiliary collections
    pub housekeeping: HousekeepingConfig,
    /// RocksDB storage
    pub storage: StorageConfig,
}

impl ReconcileConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - CLI overrides to apply on top
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(ReconcileConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Environment variables with VARKB_ prefix
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR));

        // Layer 3: CLI overrides
        figment = figment.merge(Serialized::defaults(overrides));

        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.clusters.namespace.trim().is_empty() {
            return Err(ConfigError {
                message: "clusters.namespace must not be empty".to_string(),
            });
        }
        let buffer = self.storage.write_buffer_mb;
        if buffer == 0 || buffer > MAX_WRITE_BUFFER_MB {
            return Err(ConfigError {
                message: format!(
                    "storage.write_buffer_mb must be between 1 and {}, got {}",
                    MAX_WRITE_BUFFER_MB, buffer
                ),
            });
        }
        Ok(())
    }
}

/// What to do with a data-quality finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FindingPolicy {
    /// Log the finding and list it in the pass report
    #[default]
    Report,
    /// Abort the pass without committing anything
    Abort,
}

/// Variant cluster merging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Alias namespace used as merge key and post-merge filter
    pub namespace: String,
    /// Source clusters carrying several identifiers of the namespace
    pub over_merge: FindingPolicy,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            over_merge: FindingPolicy::Report,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    /// References to ids that are neither canonical nor eliminated
    pub dangling: FindingPolicy,
}

/// Ingestion-side normalization, applied when snapshots are loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Lower-case effect descriptors and replace underscores with spaces
    pub effects: bool,
    /// Lower-case evidence citation, type and publisher
    pub evidence: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    /// Collapse amino-acid changes sharing a change id
    pub dedupe_aa_changes: bool,
    /// Drop protein regions of proteins no structure describes
    pub prune_protein_regions: bool,
}

/// RocksDB storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory; an in-memory store is used when absent
    pub data_dir: Option<PathBuf>,
    /// Run repair before opening
    pub repair: bool,
    /// Write buffer size in MB
    pub write_buffer_mb: usize,
    /// Maximum number of background compaction threads
    pub max_background_jobs: i32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            repair: false,
            write_buffer_mb: DEFAULT_WRITE_BUFFER_MB,
            max_background_jobs: DEFAULT_BACKGROUND_JOBS,
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clusters: Option<ClusterOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub over_merge: Option<FindingPolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<bool>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ReconcileConfig::default();
        assert_eq!(config.clusters.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.clusters.over_merge, FindingPolicy::Report);
        assert_eq!(config.references.dangling, FindingPolicy::Report);
        assert!(!config.housekeeping.dedupe_aa_changes);
        assert!(config.storage.data_dir.is_none());
    }

    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&FindingPolicy::Abort).unwrap();
        assert_eq!(json, "\"abort\"");

        let policy: FindingPolicy = serde_json::from_str("\"report\"").unwrap();
        assert_eq!(policy, FindingPolicy::Report);
    }

    #[test]
    fn test_file_and_overrides_layering() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[clusters]\nnamespace = \"nextstrain\"\n\n[housekeeping]\ndedupe_aa_changes = true"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = ReconcileConfig::from_env(Some(&path)).unwrap();
        assert_eq!(config.clusters.namespace, "nextstrain");
        assert!(config.housekeeping.dedupe_aa_changes);
        assert!(!config.housekeeping.prune_protein_regions);

        let overrides = ConfigOverrides {
            clusters: Some(ClusterOverrides {
                over_merge: Some(FindingPolicy::Abort),
                ..ClusterOverrides::default()
            }),
            ..ConfigOverrides::default()
        };
        let config = ReconcileConfig::load(Some(&path), overrides).unwrap();
        assert_eq!(config.clusters.namespace, "nextstrain");
        assert_eq!(config.clusters.over_merge, FindingPolicy::Abort);
    }

    #[test]
    fn test_empty_namespace_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[clusters]\nnamespace = \"  \"").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let err = ReconcileConfig::from_env(Some(&path)).unwrap_err();
        assert!(err.message.contains("namespace"));
    }

    #[test]
    fn test_oversized_write_buffer_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\nwrite_buffer_mb = 1000000").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let err = ReconcileConfig::from_env(Some(&path)).unwrap_err();
        assert!(err.message.contains("write_buffer_mb"));
    }
}
