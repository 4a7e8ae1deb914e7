// crates/taskloom-config/src/lib.rs
// ============================================================================
// Module: Task Loom Configuration
// Description: Configuration loading and validation for the orchestration engine.
// Purpose: Provide strict, fail-closed config parsing with per-section limits.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with a hard size limit and
//! per-section `#[serde(default)]` fallbacks. Each section validates its own
//! invariants; `TaskLoomConfig::load` fails closed on any violation rather
//! than starting the engine with a partially sane configuration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "TASKLOOM_CONFIG";
/// Default configuration filename when no path or env var is set.
const DEFAULT_CONFIG_NAME: &str = "taskloom.toml";
/// Maximum configuration file size accepted.
const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config at {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file exceeded [`MAX_CONFIG_FILE_SIZE`].
    #[error("config file at {0} exceeds the {MAX_CONFIG_FILE_SIZE} byte limit")]
    TooLarge(PathBuf),
    /// The config file was not valid TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A section failed its own `validate()` check.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Store Config
// ============================================================================

/// Configuration for the durable `Store`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the `SQLite` database file.
    pub database_path: String,
    /// Busy timeout applied to the connection, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: "taskloom.db".to_string(),
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Validates the store section.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when `database_path` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.trim().is_empty() {
            return Err(ConfigError::Invalid("store.database_path must not be empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Engine Config
// ============================================================================

/// Configuration for the engine's scheduling behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSectionConfig {
    /// Poll loop cadence, in seconds.
    pub poll_interval_secs: u64,
    /// A claimed/running task untouched for this long is recovered to
    /// `pending`.
    pub stale_after_secs: i64,
    /// Default gate wait timeout, in seconds.
    pub gate_default_timeout_secs: i64,
    /// Confidence below which a dynamic review gate is inserted.
    pub confidence_review_threshold: f64,
    /// Cadence at which a blocked gate wait re-checks the store for a
    /// resolution, in seconds.
    pub gate_poll_interval_secs: u64,
    /// Upper bound on graph scheduling rounds per node, guarding against a
    /// non-terminating `on_failure` redirect loop.
    pub graph_max_loop_iterations: u64,
}

impl Default for EngineSectionConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            stale_after_secs: 15 * 60,
            gate_default_timeout_secs: 24 * 60 * 60,
            confidence_review_threshold: 0.5,
            gate_poll_interval_secs: 30,
            graph_max_loop_iterations: 50,
        }
    }
}

impl EngineSectionConfig {
    /// Validates the engine section.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when `confidence_review_threshold`
    /// is outside `[0.0, 1.0]`, or `poll_interval_secs`,
    /// `gate_poll_interval_secs`, or `graph_max_loop_iterations` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("engine.poll_interval_secs must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.confidence_review_threshold) {
            return Err(ConfigError::Invalid(
                "engine.confidence_review_threshold must be within [0.0, 1.0]".to_string(),
            ));
        }
        if self.gate_poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("engine.gate_poll_interval_secs must be > 0".to_string()));
        }
        if self.graph_max_loop_iterations == 0 {
            return Err(ConfigError::Invalid("engine.graph_max_loop_iterations must be > 0".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Circuit Breaker Config
// ============================================================================

/// Configuration for the cost/resource circuit breaker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Soft warning threshold, in cumulative cost cents.
    pub warn_cost_cents: u64,
    /// Hard halt threshold, in cumulative cost cents.
    pub halt_cost_cents: u64,
    /// Hard halt threshold, in cumulative tokens.
    pub halt_tokens: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            warn_cost_cents: 2_000,
            halt_cost_cents: 5_000,
            halt_tokens: 5_000_000,
        }
    }
}

impl CircuitBreakerConfig {
    /// Validates the circuit breaker section.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when `warn_cost_cents` is not less
    /// than `halt_cost_cents`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.warn_cost_cents >= self.halt_cost_cents {
            return Err(ConfigError::Invalid(
                "circuit_breaker.warn_cost_cents must be less than halt_cost_cents".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Executor Config
// ============================================================================

/// Configuration for the HTTP-delegated executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Base URL of the agent executor service.
    pub base_url: String,
    /// Extra timeout margin added to each stage's configured timeout.
    pub timeout_margin_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8700".to_string(),
            timeout_margin_secs: 5,
        }
    }
}

impl ExecutorConfig {
    /// Validates the executor section.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when `base_url` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("executor.base_url must not be empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Workspace Config
// ============================================================================

/// Configuration for git worktree and sandbox lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSectionConfig {
    /// Root directory under which per-task worktrees are created.
    pub worktrees_root: String,
    /// Path to the repository worktrees are added from.
    pub repo_path: String,
    /// Base URL of the sandbox control plane.
    pub sandbox_base_url: String,
    /// Remote name used for pushes and PR creation.
    pub remote_name: String,
}

impl Default for WorkspaceSectionConfig {
    fn default() -> Self {
        Self {
            worktrees_root: "/var/lib/taskloom/worktrees".to_string(),
            repo_path: ".".to_string(),
            sandbox_base_url: "http://127.0.0.1:8800".to_string(),
            remote_name: "origin".to_string(),
        }
    }
}

impl WorkspaceSectionConfig {
    /// Validates the workspace section.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when `worktrees_root` or
    /// `repo_path` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worktrees_root.trim().is_empty() || self.repo_path.trim().is_empty() {
            return Err(ConfigError::Invalid("workspace.worktrees_root and repo_path must not be empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Top-level configuration for a `taskloom` process.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TaskLoomConfig {
    /// Store section.
    pub store: StoreConfig,
    /// Engine section.
    pub engine: EngineSectionConfig,
    /// Circuit breaker section.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Executor section.
    pub executor: ExecutorConfig,
    /// Workspace section.
    pub workspace: WorkspaceSectionConfig,
}

impl TaskLoomConfig {
    /// Loads configuration from `path`, or from `$TASKLOOM_CONFIG`, or from
    /// `./taskloom.toml` if neither is given, validating every section.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read, exceeds the size
    /// limit, fails to parse, or fails section validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path);
        let raw = fs::read(&resolved).map_err(|source| ConfigError::Io { path: resolved.clone(), source })?;
        if raw.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge(resolved));
        }
        let text = String::from_utf8_lossy(&raw);
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    /// Returns the first [`ConfigError::Invalid`] encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.engine.validate()?;
        self.circuit_breaker.validate()?;
        self.executor.validate()?;
        self.workspace.validate()?;
        Ok(())
    }
}

fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        return PathBuf::from(env_path);
    }
    PathBuf::from(DEFAULT_CONFIG_NAME)
}
