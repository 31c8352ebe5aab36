//! Configuration loading for the index synchronization pipeline.
//!
//! Layered config: defaults -> config file -> explicit file -> env vars.
//! The default config file lives at ~/.config/index-sync/config.toml.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::operation::DeletionQueryKind;

/// Worker scope selecting the built-in transactional worker.
pub const DEFAULT_WORKER_SCOPE: &str = "transaction";

/// How backends apply batched work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Callers block until each unit has applied its batch (default)
    #[default]
    Sync,
    /// Batches are handed to a per-unit lane and applied in the background
    Async,
}

/// When an index unit durably commits applied work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Commit at the end of every applied change-set (default)
    #[default]
    PerChangeSet,
    /// Commit only on an explicit flush
    Manual,
    /// Commit only when the unit is closed
    OnClose,
}

/// Main pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Pending-work size at which a sub-batch is flushed early (0 = never)
    #[serde(default)]
    pub batch_size: usize,

    /// Dispatch inside the transaction boundary (before completion)
    /// instead of after the transaction committed
    #[serde(default)]
    pub enlist_in_transaction: bool,

    /// Worker implementation; "transaction" selects the built-in worker
    #[serde(default = "default_worker_scope")]
    pub worker_scope: String,

    /// Sync or async application of batches
    #[serde(default)]
    pub execution: ExecutionMode,

    /// Backend name: "tantivy", "ram", "blackhole", or a registered custom name
    #[serde(default = "default_backend")]
    pub backend: String,

    /// When index units durably commit
    #[serde(default)]
    pub commit_policy: CommitPolicy,

    /// Root directory for file-backed index units
    #[serde(default = "default_index_base_path")]
    pub index_base_path: String,

    /// Memory budget for each unit's index writer in MB
    #[serde(default = "default_writer_memory_mb")]
    pub writer_memory_mb: usize,

    /// Deletion query kinds the application issues ("term", "range")
    #[serde(default = "default_deletion_query_kinds")]
    pub deletion_query_kinds: Vec<String>,

    /// Only index units whose name starts with this prefix receive work
    #[serde(default)]
    pub unit_namespace: Option<String>,

    /// Cascade depth for contained-in relations that declare none
    #[serde(default = "default_max_depth")]
    pub default_max_depth: u32,

    /// Stop cascades that revisit an entity already reached in the same walk
    #[serde(default = "default_detect_cycles")]
    pub detect_containment_cycles: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_worker_scope() -> String {
    DEFAULT_WORKER_SCOPE.to_string()
}

fn default_backend() -> String {
    "tantivy".to_string()
}

fn default_index_base_path() -> String {
    ProjectDirs::from("", "", "index-sync")
        .map(|p| p.data_local_dir().join("indexes"))
        .unwrap_or_else(|| PathBuf::from("./indexes"))
        .to_string_lossy()
        .to_string()
}

fn default_writer_memory_mb() -> usize {
    50
}

fn default_deletion_query_kinds() -> Vec<String> {
    vec!["term".to_string()]
}

fn default_max_depth() -> u32 {
    u32::MAX
}

fn default_detect_cycles() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            batch_size: 0,
            enlist_in_transaction: false,
            worker_scope: default_worker_scope(),
            execution: ExecutionMode::default(),
            backend: default_backend(),
            commit_policy: CommitPolicy::default(),
            index_base_path: default_index_base_path(),
            writer_memory_mb: default_writer_memory_mb(),
            deletion_query_kinds: default_deletion_query_kinds(),
            unit_namespace: None,
            default_max_depth: default_max_depth(),
            detect_containment_cycles: default_detect_cycles(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/index-sync/config.toml)
    /// 3. Explicitly specified config file (optional)
    /// 4. Environment variables (INDEX_SYNC_*)
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir = ProjectDirs::from("", "", "index-sync")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("batch_size", 0_i64)
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("worker_scope", default_worker_scope())
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("backend", default_backend())
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("index_base_path", default_index_base_path())
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: INDEX_SYNC_BATCH_SIZE, INDEX_SYNC_BACKEND, ...
        builder = builder.add_source(
            Environment::with_prefix("INDEX_SYNC")
                .prefix_separator("_")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.trim().is_empty() {
            return Err(ConfigError::Invalid("backend must not be empty".to_string()));
        }
        if self.worker_scope.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "worker_scope must not be empty".to_string(),
            ));
        }
        // Tantivy refuses writer budgets under 15 MB per thread.
        if self.writer_memory_mb < 15 {
            return Err(ConfigError::Invalid(
                "writer_memory_mb must be >= 15".to_string(),
            ));
        }
        if self.default_max_depth == 0 {
            return Err(ConfigError::Invalid(
                "default_max_depth must be > 0".to_string(),
            ));
        }
        self.deletion_query_kinds()?;
        Ok(())
    }

    /// Parsed deletion query kinds.
    pub fn deletion_query_kinds(&self) -> Result<Vec<DeletionQueryKind>, ConfigError> {
        self.deletion_query_kinds
            .iter()
            .map(|kind| kind.parse())
            .collect()
    }

    /// Expand ~ in index_base_path to the home directory.
    pub fn expanded_index_base_path(&self) -> PathBuf {
        if let Some(rest) = self.index_base_path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        PathBuf::from(&self.index_base_path)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn with_enlist_in_transaction(mut self, enlist: bool) -> Self {
        self.enlist_in_transaction = enlist;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.commit_policy = policy;
        self
    }

    pub fn with_index_base_path(mut self, path: impl Into<String>) -> Self {
        self.index_base_path = path.into();
        self
    }

    pub fn with_unit_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.unit_namespace = Some(namespace.into());
        self
    }
}
