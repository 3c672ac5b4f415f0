//! Quill configuration, read from `~/.quill/config.toml`.
//!
//! Every section is optional. `${VAR}` references in credential keys and the
//! tracker path are expanded from the environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use std::{env, fmt, fs};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use quill_engine::RunnerConfig;
use quill_engine::quill_providers::{
    CredentialRotator, PoolConfig, RetryConfig, RotatorError, WorkerPool,
};
use quill_types::{
    ConfigDigest, Credential, FailurePolicy, FatalConfigError, SizeUnit, SplitPolicy, TimeRange,
    WindowConfig,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config at {}: {source}", path.display())]
    Invalid {
        path: PathBuf,
        source: FatalConfigError,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::Invalid { path, .. } => path,
        }
    }
}

/// Human-facing step unit. Time units scale to seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepUnit {
    Messages,
    Minutes,
    Hours,
    Days,
    Bytes,
}

impl StepUnit {
    #[must_use]
    pub const fn size_unit(self) -> SizeUnit {
        match self {
            StepUnit::Messages => SizeUnit::Events,
            StepUnit::Minutes | StepUnit::Hours | StepUnit::Days => SizeUnit::Duration,
            StepUnit::Bytes => SizeUnit::Bytes,
        }
    }

    /// Size-unit amount per configured step unit.
    #[must_use]
    pub const fn multiplier(self) -> u64 {
        match self {
            StepUnit::Messages | StepUnit::Bytes => 1,
            StepUnit::Minutes => 60,
            StepUnit::Hours => 3_600,
            StepUnit::Days => 86_400,
        }
    }
}

impl FromStr for StepUnit {
    type Err = FatalConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "messages" => Ok(StepUnit::Messages),
            "minutes" => Ok(StepUnit::Minutes),
            "hours" => Ok(StepUnit::Hours),
            "days" => Ok(StepUnit::Days),
            "bytes" => Ok(StepUnit::Bytes),
            _ => Err(FatalConfigError::UnknownStepUnit(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowingSection {
    pub step_size: u64,
    pub step_unit: String,
    /// In step units.
    pub min_window_size: u64,
    pub overlap_ratio: f64,
    pub max_window_hours: Option<u64>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Default for WindowingSection {
    fn default() -> Self {
        Self {
            step_size: 100,
            step_unit: "messages".to_string(),
            min_window_size: 10,
            overlap_ratio: 0.2,
            max_window_hours: None,
            start: None,
            end: None,
        }
    }
}

impl WindowingSection {
    /// Resolve into a validated planner configuration.
    pub fn window_config(&self) -> Result<WindowConfig, FatalConfigError> {
        let unit: StepUnit = self.step_unit.parse()?;
        let scale = unit.multiplier();
        let mut config = WindowConfig::new(unit.size_unit(), self.step_size.saturating_mul(scale))
            .with_min_window_size(self.min_window_size.saturating_mul(scale))
            .with_overlap_ratio(self.overlap_ratio);
        if let Some(hours) = self.max_window_hours {
            config = config.with_max_window_duration(Duration::from_secs(hours.saturating_mul(3_600)));
        }
        if self.start.is_some() || self.end.is_some() {
            config = config.with_range(TimeRange {
                start: self.start,
                end: self.end,
            });
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    pub max_split_depth: u32,
    pub failure_policy: FailurePolicy,
    pub split_policy: SplitPolicy,
    pub call_timeout_seconds: Option<u64>,
    pub max_retries: u32,
    /// Bound on each worker-pool sub-task call.
    pub subtask_timeout_seconds: Option<u64>,
    /// Defaults to the crate version.
    pub code_ref: Option<String>,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            max_split_depth: 5,
            failure_policy: FailurePolicy::Continue,
            split_policy: SplitPolicy::Halve,
            call_timeout_seconds: None,
            max_retries: 2,
            subtask_timeout_seconds: None,
            code_ref: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackerSection {
    pub path: Option<String>,
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialsSection {
    pub keys: Vec<String>,
}

// Manual Debug impl to prevent leaking keys in logs.
impl fmt::Debug for CredentialsSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsSection")
            .field("keys", &format_args!("[{} REDACTED]", self.keys.len()))
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QuillConfig {
    pub windowing: WindowingSection,
    pub runner: RunnerSection,
    pub tracker: TrackerSection,
    pub credentials: CredentialsSection,
    /// Opaque generator settings. Only folded into the config digest.
    pub generator: toml::Table,
}

/// The settings that change what a window produces.
///
/// Credentials, retry and failure policy are left out: rotating a key or
/// raising a timeout must not invalidate completed work.
#[derive(Debug, Serialize)]
pub struct DigestInput<'a> {
    pub windowing: WindowingDigest<'a>,
    pub max_split_depth: u32,
    pub split_policy: SplitPolicy,
    pub generator: &'a toml::Table,
}

/// `[windowing]` without the `start`/`end` filter. The filter only decides
/// which events are loaded, and each window's fingerprint already covers its
/// events.
#[derive(Debug, Serialize)]
pub struct WindowingDigest<'a> {
    pub step_size: u64,
    pub step_unit: &'a str,
    pub min_window_size: u64,
    pub overlap_ratio: f64,
    pub max_window_hours: Option<u64>,
}

impl QuillConfig {
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load `~/.quill/config.toml`. `Ok(None)` if there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    /// Load and validate the file at `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!(path = %path.display(), error = %source, "Failed to read config");
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let config = Self::parse(&content).map_err(|source| {
            tracing::warn!(path = %path.display(), error = %source, "Failed to parse config");
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        config
            .windowing
            .window_config()
            .map_err(|source| ConfigError::Invalid {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(config)
    }

    pub fn window_config(&self) -> Result<WindowConfig, FatalConfigError> {
        self.windowing.window_config()
    }

    #[must_use]
    pub fn runner_config(&self, window: &WindowConfig, config_digest: ConfigDigest) -> RunnerConfig {
        let mut config = RunnerConfig::new(config_digest);
        config.max_split_depth = self.runner.max_split_depth;
        config.failure_policy = self.runner.failure_policy;
        config.split_policy = self.runner.split_policy;
        config.min_window_size = window.min_window_size.max(1);
        config.call_timeout = self.runner.call_timeout_seconds.map(Duration::from_secs);
        config.retry = config.retry.with_max_retries(self.runner.max_retries);
        if let Some(code_ref) = &self.runner.code_ref {
            config.code_ref.clone_from(code_ref);
        }
        config
    }

    #[must_use]
    pub fn digest_input(&self) -> DigestInput<'_> {
        let windowing = &self.windowing;
        DigestInput {
            windowing: WindowingDigest {
                step_size: windowing.step_size,
                step_unit: &windowing.step_unit,
                min_window_size: windowing.min_window_size,
                overlap_ratio: windowing.overlap_ratio,
                max_window_hours: windowing.max_window_hours,
            },
            max_split_depth: self.runner.max_split_depth,
            split_policy: self.runner.split_policy,
            generator: &self.generator,
        }
    }

    /// Credentials in file order, labelled `key-1`, `key-2`, ...
    ///
    /// Keys that expand to nothing are dropped.
    #[must_use]
    pub fn credentials(&self) -> Vec<Credential> {
        self.credentials
            .keys
            .iter()
            .enumerate()
            .filter_map(|(i, raw)| {
                let label = format!("key-{}", i + 1);
                let secret = expand_env_vars(raw);
                if secret.trim().is_empty() {
                    tracing::warn!(%label, "Credential is empty after expansion; ignoring");
                    return None;
                }
                Some(Credential::new(label, secret))
            })
            .collect()
    }

    /// Sub-task settings from `[runner]`. Siblings are cancelled on the first
    /// failure only under the fail-fast policy.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            call_timeout: self.runner.subtask_timeout_seconds.map(Duration::from_secs),
            retry: RetryConfig::default().with_max_retries(self.runner.max_retries),
            fail_fast: self.runner.failure_policy == FailurePolicy::FailFast,
        }
    }

    /// A worker pool over the configured credentials, one concurrent
    /// sub-task per key.
    pub fn worker_pool(&self) -> Result<WorkerPool, RotatorError> {
        let rotator = CredentialRotator::new(self.credentials())?;
        tracing::debug!(credentials = rotator.len(), "Built worker pool from config");
        Ok(WorkerPool::new(Arc::new(rotator), self.pool_config()))
    }

    /// Journal location: `[tracker] path`, else `~/.quill/runs.db`.
    #[must_use]
    pub fn tracker_path(&self) -> Option<PathBuf> {
        match &self.tracker.path {
            Some(raw) => Some(expand_home(&expand_env_vars(raw))),
            None => quill_dir().map(|dir| dir.join("runs.db")),
        }
    }
}

/// Replace `${VAR}` with the variable's value. Unset variables become empty;
/// an unclosed `${` is kept as is.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(open) = rest.find("${") {
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        let name = &after[..close];
        if !name.is_empty() {
            out.push_str(&env::var(name).unwrap_or_default());
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

#[must_use]
pub fn quill_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".quill"))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    quill_dir().map(|dir| dir.join("config.toml"))
}
