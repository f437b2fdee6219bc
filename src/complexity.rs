//! Task complexity estimation and oversize splitting
//!
//! Every task is scored before scheduling. Oversize tasks are sent back to
//! the LLM for decomposition; the subtasks replace the original in the graph
//! with all external edges preserved.

use std::sync::Arc;

use eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::Task;
use crate::graph::TaskGraph;
use crate::llm::{with_retries, DecomposedTaskSpec, LlmClient, RetryPolicy};

/// Estimated size of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityScore {
    /// Normalized 0-100
    pub score: u8,
    pub estimated_lines: u32,
}

/// Estimate a task's output size from its declared shape
///
/// Weighted sum of expected type count, dependency count, and description
/// length. Deliberately coarse: the estimate only gates the splitter.
pub fn estimate(task: &Task) -> ComplexityScore {
    let type_count = task.expected_types.len() as u32;
    let dep_count = task.dependencies.len() as u32;
    let word_count = task.description.split_whitespace().count() as u32;

    let estimated_lines = 20 + type_count * 60 + dep_count * 15 + word_count;
    let score = (estimated_lines / 10).min(100) as u8;

    ComplexityScore {
        score,
        estimated_lines,
    }
}

/// What the splitter did to the graph
#[derive(Debug, Clone, Default)]
pub struct SplitOutcome {
    /// Original task id -> replacement subtask ids
    pub split: Vec<(String, Vec<String>)>,
    /// Oversize tasks kept intact after failed decomposition
    pub kept_oversize: Vec<String>,
    pub warnings: Vec<String>,
}

/// Splits oversize tasks via LLM decomposition
pub struct Splitter {
    llm: Arc<dyn LlmClient>,
    max_lines_per_task: u32,
    /// Split attempts per task before keeping the original
    max_attempts: u32,
    retry_policy: RetryPolicy,
}

impl Splitter {
    pub fn new(llm: Arc<dyn LlmClient>, max_lines_per_task: u32) -> Self {
        Self {
            llm,
            max_lines_per_task,
            max_attempts: 3,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Score every task and split the oversize ones in place
    pub async fn split_oversize(&self, graph: &mut TaskGraph) -> Result<SplitOutcome> {
        let oversize: Vec<String> = graph
            .tasks()
            .filter(|t| estimate(t).estimated_lines > self.max_lines_per_task)
            .map(|t| t.id.clone())
            .collect();

        let mut outcome = SplitOutcome::default();
        for id in oversize {
            let score = graph.task(&id).map(estimate).unwrap_or(ComplexityScore {
                score: 0,
                estimated_lines: 0,
            });
            info!(task = %id, lines = score.estimated_lines, budget = self.max_lines_per_task, "task exceeds line budget, splitting");
            match self.split_task(graph, &id).await {
                Ok(new_ids) => outcome.split.push((id, new_ids)),
                Err(reason) => {
                    warn!(task = %id, %reason, "keeping oversize task");
                    if let Some(task) = graph.task_mut(&id) {
                        task.oversize_warning = true;
                    }
                    outcome.warnings.push(format!("task '{}' kept oversize: {}", id, reason));
                    outcome.kept_oversize.push(id);
                }
            }
        }
        Ok(outcome)
    }

    /// Ask the LLM to split one task; up to `max_attempts` rounds
    ///
    /// A proposed cycle or a failed call counts as one attempt; the re-prompt
    /// carries an explicit acyclicity constraint.
    async fn split_task(&self, graph: &mut TaskGraph, id: &str) -> Result<Vec<String>, String> {
        let original = graph.task(id).cloned().ok_or_else(|| "task vanished".to_string())?;
        let mut prompt_task = original.clone();

        for attempt in 1..=self.max_attempts {
            let specs = match with_retries(self.retry_policy, "decompose_complex", || {
                self.llm.decompose_complex(&prompt_task, self.max_lines_per_task)
            })
            .await
            {
                Ok(specs) => specs,
                Err(e) => {
                    debug!(task = %id, attempt, error = %e, "split attempt failed");
                    continue;
                }
            };

            let subtasks = self.build_subtasks(&original, specs);
            if subtasks.len() < 2 {
                debug!(task = %id, attempt, "split produced fewer than two subtasks");
                continue;
            }
            let new_ids: Vec<String> = subtasks.iter().map(|t| t.id.clone()).collect();

            match graph.replace_with_subtasks(id, subtasks) {
                Ok(()) => {
                    info!(task = %id, subtasks = new_ids.len(), "task split");
                    return Ok(new_ids);
                }
                Err(e) => {
                    debug!(task = %id, attempt, error = %e, "split rejected by graph");
                    // Re-prompt with the constraint spelled out
                    if !prompt_task.description.contains("MUST be acyclic") {
                        prompt_task.description.push_str(
                            "\n\nIMPORTANT: the subtask dependencies MUST be acyclic and may only reference other subtasks.",
                        );
                    }
                }
            }
        }
        Err(format!("decomposition failed after {} attempts", self.max_attempts))
    }

    /// Turn LLM subtask specs into graph tasks namespaced under the original
    ///
    /// Subtask ids are prefixed with the original id; internal dependency
    /// references are remapped, references to existing graph tasks pass
    /// through.
    fn build_subtasks(&self, original: &Task, specs: Vec<DecomposedTaskSpec>) -> Vec<Task> {
        let local_ids: Vec<String> = specs.iter().map(|s| s.id.clone()).collect();
        let prefixed = |local: &str| format!("{}-{}", original.id, local);

        specs
            .into_iter()
            .map(|mut spec| {
                spec.dependencies = spec
                    .dependencies
                    .into_iter()
                    .map(|dep| if local_ids.contains(&dep) { prefixed(&dep) } else { dep })
                    .collect();
                spec.id = prefixed(&spec.id);
                let mut task = spec.into_task(&original.namespace);
                task.required_libraries = original.required_libraries.clone();
                task
            })
            .collect()
    }
}
