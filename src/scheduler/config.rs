//! Scheduler configuration

use serde::{Deserialize, Serialize};

/// What happens to the rest of the graph when a task fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Dependents stay pending until an operator retries the failure
    Block,
    /// Cancel all workers and abort the run
    FailFast,
    /// Transitive dependents of a failed task are skipped
    #[default]
    SkipFailed,
    /// Like skip-failed, but phantom dependencies are the trigger
    SkipMissing,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::FailFast => write!(f, "fail-fast"),
            Self::SkipFailed => write!(f, "skip-failed"),
            Self::SkipMissing => write!(f, "skip-missing"),
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(Self::Block),
            "fail-fast" => Ok(Self::FailFast),
            "skip-failed" => Ok(Self::SkipFailed),
            "skip-missing" => Ok(Self::SkipMissing),
            other => Err(format!(
                "unknown failure policy '{}'; expected block, fail-fast, skip-failed, or skip-missing",
                other
            )),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Parallel worker count
    pub worker_count: usize,
    pub failure_policy: FailurePolicy,
    /// Checkpoint after every N completions; 0 disables cadence checkpoints
    pub checkpoint_every_n: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2).max(2),
            failure_policy: FailurePolicy::default(),
            checkpoint_every_n: 1,
        }
    }
}
