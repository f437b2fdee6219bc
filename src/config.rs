//! Configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::scheduler::FailurePolicy;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Run behavior
    pub run: RunOptions,

    /// External validator command; empty disables command validation
    pub validation: ValidationConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".codeforge.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("codeforge").join("codeforge.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "anthropic" supported)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Per-call wall-clock timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 16384,
            timeout_ms: 120_000,
        }
    }
}

/// Run behavior options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// LLM generation rounds per task
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Worker pool size; unset means one per core, minimum 2
    #[serde(rename = "worker-count")]
    pub worker_count: Option<usize>,

    /// Line budget above which a task is split
    #[serde(rename = "max-lines-per-task")]
    pub max_lines_per_task: u32,

    /// Score tasks and split oversize ones before scheduling
    #[serde(rename = "enable-complexity-analysis")]
    pub enable_complexity_analysis: bool,

    /// Generate and freeze shared contracts before execution
    #[serde(rename = "enable-contract-first")]
    pub enable_contract_first: bool,

    #[serde(rename = "output-directory")]
    pub output_directory: PathBuf,

    #[serde(rename = "failure-policy")]
    pub failure_policy: FailurePolicy,

    /// Checkpoint after every N task completions
    #[serde(rename = "checkpoint-every-n")]
    pub checkpoint_every_n: u32,

    /// Root namespace for generated types
    #[serde(rename = "project-name")]
    pub project_name: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            worker_count: None,
            max_lines_per_task: 300,
            enable_complexity_analysis: true,
            enable_contract_first: true,
            output_directory: PathBuf::from("codeforge-out"),
            failure_policy: FailurePolicy::SkipFailed,
            checkpoint_every_n: 1,
            project_name: "Generated".to_string(),
        }
    }
}

impl RunOptions {
    /// Resolved worker count: configured, or one per core with a floor of 2
    pub fn effective_worker_count(&self) -> usize {
        match self.worker_count {
            Some(n) => n.max(1),
            None => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2).max(2),
        }
    }
}

/// External validator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Shell command invoked with the fragment and reference paths
    pub command: String,

    /// Per-invocation timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            timeout_ms: 60_000,
        }
    }
}
