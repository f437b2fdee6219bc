//! LlmClient trait definition

use async_trait::async_trait;

use crate::domain::{Contract, Task, TaskSummary};

use super::types::{Decomposition, DecomposedTaskSpec, GenerationContext, RegenerationContext};
use super::LlmError;

/// Language-model service boundary
///
/// Every call is independent; no conversation state is held between calls.
/// Callers own retries: the client reports transient failures as retryable
/// [`LlmError`] values and never retries internally.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Break a user request into a task DAG
    async fn decompose(&self, request: &str, context: &str) -> Result<Decomposition, LlmError>;

    /// Propose the shared type contracts a plan implies
    async fn generate_contracts(&self, request: &str, tasks: &[Task]) -> Result<Vec<Contract>, LlmError>;

    /// Generate source for a task (first attempt)
    async fn generate(&self, task: &Task, context: &GenerationContext) -> Result<String, LlmError>;

    /// Regenerate after failed validation, with structured error feedback
    async fn regenerate(&self, task: &Task, context: &RegenerationContext) -> Result<String, LlmError>;

    /// Summarize a validated task's output
    async fn summarize(&self, task: &Task, source: &str) -> Result<TaskSummary, LlmError>;

    /// Decompose an oversize task into smaller subtasks
    async fn decompose_complex(&self, task: &Task, max_lines: u32) -> Result<Vec<DecomposedTaskSpec>, LlmError>;
}
