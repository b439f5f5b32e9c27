//! Default constants for reconciliation configuration.
//!
//! All tunable defaults are centralized here.

// =============================================================================
// Cluster Merging Defaults
// =============================================================================

/// Namespace whose aliases are treated as external lineage identifiers.
/// Matched case-insensitively against `Alias::org`.
pub const DEFAULT_NAMESPACE: &str = "pango";

// =============================================================================
// Environment
// =============================================================================

/// Prefix of environment variables read by `ReconcileConfig::load`
pub const ENV_PREFIX: &str = "VARKB_";

/// Separator between nested keys in environment variable names,
/// e.g. `VARKB_CLUSTERS__NAMESPACE`
pub const ENV_SEPARATOR: &str = "__";

// =============================================================================
// Storage Defaults (RocksDB)
// =============================================================================

/// Default write buffer size in MB
pub const DEFAULT_WRITE_BUFFER_MB: usize = 64;

/// Largest accepted write buffer size in MB
pub const MAX_WRITE_BUFFER_MB: usize = 4096;

/// Default number of background compaction jobs
pub const DEFAULT_BACKGROUND_JOBS: i32 = 2;
