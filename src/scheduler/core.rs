//! Scheduler implementation
//!
//! Drives the task graph through a bounded worker pool in topological waves.
//! The only ordering constraint is that a dependency is validated before any
//! dependent starts; siblings run in any interleaving and share state only
//! through the symbol registry and the frozen catalog.

use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::sync::Arc;

use eyre::{eyre, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, Checkpointer, ExecutionStatus};
use crate::domain::{Task, TaskStatus};
use crate::executor::TaskExecutor;
use crate::graph::TaskGraph;
use crate::llm::DependencySignature;
use crate::registry::SymbolRegistry;

use super::config::{FailurePolicy, SchedulerConfig};

/// Final accounting of one scheduling run
#[derive(Debug, Clone, Default)]
pub struct SchedulerOutcome {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    /// Tasks left pending with the dependencies blocking them; non-empty
    /// means the run deadlocked under the block policy
    pub blocked: Vec<(String, Vec<String>)>,
    pub cancelled: bool,
    pub fatal: Option<String>,
}

impl SchedulerOutcome {
    /// Every task validated
    pub fn is_full_success(&self) -> bool {
        self.fatal.is_none()
            && !self.cancelled
            && self.failed.is_empty()
            && self.skipped.is_empty()
            && self.blocked.is_empty()
    }

    /// Some tasks validated, some failed or were skipped, nothing fatal
    pub fn is_partial(&self) -> bool {
        self.fatal.is_none() && !self.cancelled && !self.is_full_success()
    }
}

/// Parallel worker pool over the task graph
pub struct Scheduler {
    executor: Arc<TaskExecutor>,
    registry: Arc<SymbolRegistry>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(executor: Arc<TaskExecutor>, registry: Arc<SymbolRegistry>, config: SchedulerConfig) -> Self {
        Self {
            executor,
            registry,
            config,
        }
    }

    /// Run the graph to quiescence
    ///
    /// Checkpoints are emitted through `checkpointer` every
    /// `checkpoint_every_n` completions and once at the end; checkpoint I/O
    /// failures are logged and suppressed.
    pub async fn run(
        &self,
        graph: &mut TaskGraph,
        request: &str,
        checkpointer: Option<&Checkpointer>,
        cancel: &CancellationToken,
    ) -> Result<SchedulerOutcome> {
        let distances = graph.critical_distances()?;
        let mut join_set: JoinSet<Task> = JoinSet::new();
        let mut active: BTreeSet<String> = BTreeSet::new();
        let mut completions = 0u32;
        let mut fatal: Option<String> = None;

        info!(
            tasks = graph.len(),
            workers = self.config.worker_count,
            policy = %self.config.failure_policy,
            "scheduler starting"
        );

        loop {
            // Dispatch: longest critical-path distance first, id tie-break
            if fatal.is_none() && !cancel.is_cancelled() {
                let mut ready: Vec<String> = graph
                    .ready_set()
                    .into_iter()
                    .filter(|id| !active.contains(id))
                    .collect();
                ready.sort_by_key(|id| (Reverse(distances.get(id).copied().unwrap_or(0)), id.clone()));

                for id in ready {
                    if active.len() >= self.config.worker_count {
                        break;
                    }
                    graph.set_status(&id, TaskStatus::Running)?;
                    let task = graph
                        .task(&id)
                        .cloned()
                        .ok_or_else(|| eyre!("task '{}' vanished during dispatch", id))?;
                    let dependencies = self.dependency_signatures(graph, &task);
                    let executor = Arc::clone(&self.executor);
                    let worker_cancel = cancel.child_token();
                    debug!(task = %id, distance = distances.get(&id).copied().unwrap_or(0), "dispatching");
                    join_set.spawn(async move { executor.execute(task, dependencies, &worker_cancel).await });
                    active.insert(id);
                }
            }

            if active.is_empty() {
                break;
            }

            match join_set.join_next().await {
                Some(Ok(finished)) => {
                    let id = finished.id.clone();
                    active.remove(&id);
                    let failed = finished.status == TaskStatus::Failed;
                    if failed {
                        warn!(task = %id, attempts = finished.attempt_count, "task failed");
                    } else {
                        info!(task = %id, attempts = finished.attempt_count, "task completed");
                    }
                    graph.update(finished)?;

                    if failed {
                        self.apply_failure_policy(graph, &id, &mut fatal, cancel)?;
                    }

                    completions += 1;
                    if self.config.checkpoint_every_n > 0
                        && completions % self.config.checkpoint_every_n == 0
                        && let Some(checkpointer) = checkpointer
                    {
                        self.emit_checkpoint(graph, request, checkpointer, ExecutionStatus::Running).await;
                    }
                }
                Some(Err(join_error)) => {
                    // A worker panicked; the run cannot be trusted
                    fatal = Some(format!("worker crashed: {}", join_error));
                    cancel.cancel();
                }
                None => break,
            }
        }

        let outcome = self.collect_outcome(graph, fatal, cancel.is_cancelled());

        if let Some(checkpointer) = checkpointer {
            let status = if outcome.fatal.is_some() || outcome.cancelled {
                ExecutionStatus::Fatal
            } else if outcome.is_full_success() {
                ExecutionStatus::Complete
            } else {
                ExecutionStatus::Partial
            };
            self.emit_checkpoint(graph, request, checkpointer, status).await;
        }

        info!(
            completed = outcome.completed.len(),
            failed = outcome.failed.len(),
            skipped = outcome.skipped.len(),
            blocked = outcome.blocked.len(),
            "scheduler finished"
        );
        Ok(outcome)
    }

    /// Type signatures of every dependency's output, for context assembly
    fn dependency_signatures(&self, graph: &TaskGraph, task: &Task) -> Vec<DependencySignature> {
        task.dependencies
            .iter()
            .map(|dep_id| DependencySignature {
                task_id: dep_id.clone(),
                type_names: self.registry.symbols_for_task(dep_id),
                summary: graph.task(dep_id).and_then(|t| t.summary.clone()),
            })
            .collect()
    }

    fn apply_failure_policy(
        &self,
        graph: &mut TaskGraph,
        failed_id: &str,
        fatal: &mut Option<String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self.config.failure_policy {
            FailurePolicy::Block => {
                debug!(task = %failed_id, "dependents remain pending under block policy");
            }
            FailurePolicy::FailFast => {
                *fatal = Some(format!("task '{}' failed under fail-fast", failed_id));
                cancel.cancel();
            }
            FailurePolicy::SkipFailed | FailurePolicy::SkipMissing => {
                for descendant in graph.descendants(failed_id)? {
                    if let Some(task) = graph.task_mut(&descendant) {
                        if !task.is_terminal() && task.status != TaskStatus::Running {
                            debug!(task = %descendant, cause = %failed_id, "skipping dependent");
                            task.mark_skipped();
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn emit_checkpoint(
        &self,
        graph: &TaskGraph,
        request: &str,
        checkpointer: &Checkpointer,
        status: ExecutionStatus,
    ) {
        let checkpoint = Checkpoint::capture(request, graph, self.registry.snapshot(), status);
        if let Err(e) = checkpointer.write(&checkpoint).await {
            warn!(error = %e, "checkpoint write failed");
        }
    }

    fn collect_outcome(&self, graph: &TaskGraph, fatal: Option<String>, cancelled: bool) -> SchedulerOutcome {
        let blocked = graph.blocked_set();
        if !blocked.is_empty() && fatal.is_none() && !cancelled {
            warn!(blocked = blocked.len(), "run deadlocked: tasks blocked by failures");
        }
        SchedulerOutcome {
            completed: graph.ids_in_status(TaskStatus::Validated),
            failed: graph.ids_in_status(TaskStatus::Failed),
            skipped: graph.ids_in_status(TaskStatus::Skipped),
            blocked,
            cancelled,
            fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ContractCatalog;
    use crate::clarifier::mock::MockClarifier;
    use crate::executor::ExecutorConfig;
    use crate::llm::mock::MockLlmClient;
    use crate::llm::RetryPolicy;
    use crate::validator::mock::MockValidator;
    use std::time::Duration;

    fn scheduler_with(
        llm: Arc<MockLlmClient>,
        validator: Arc<MockValidator>,
        config: SchedulerConfig,
    ) -> (Scheduler, Arc<SymbolRegistry>) {
        let mut catalog = ContractCatalog::new();
        catalog.freeze();
        let registry = Arc::new(SymbolRegistry::new());
        let executor = Arc::new(TaskExecutor::new(
            llm,
            validator,
            Arc::new(MockClarifier::new()),
            Arc::new(catalog),
            Arc::clone(&registry),
            ExecutorConfig {
                retry_policy: RetryPolicy {
                    max_attempts: 2,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(2),
                },
                ..Default::default()
            },
        ));
        let scheduler = Scheduler::new(executor, Arc::clone(&registry), config);
        (scheduler, registry)
    }

    fn clean_source(name: &str) -> String {
        format!("namespace P\n{{\n    public class {}\n    {{\n    }}\n}}\n", name)
    }

    #[tokio::test]
    async fn test_diamond_executes_in_order() {
        let llm = Arc::new(MockLlmClient::new());
        for name in ["A", "B", "C", "D"] {
            llm.queue_generation(clean_source(name));
        }
        let validator = Arc::new(MockValidator::new());
        let (scheduler, _) = scheduler_with(
            llm,
            validator,
            SchedulerConfig {
                worker_count: 4,
                ..Default::default()
            },
        );

        let mut graph = TaskGraph::from_tasks(vec![
            Task::new("a", "root").in_namespace("P"),
            Task::new("b", "left").with_dependency("a").in_namespace("P"),
            Task::new("c", "right").with_dependency("a").in_namespace("P"),
            Task::new("d", "join").with_dependency("b").with_dependency("c").in_namespace("P"),
        ])
        .unwrap();

        let outcome = scheduler
            .run(&mut graph, "diamond", None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_full_success());
        assert_eq!(outcome.completed.len(), 4);
        // Bottom of the diamond completed after both middles
        let completed_at = |id: &str| graph.task(id).unwrap().completed_at.unwrap();
        assert!(completed_at("d") >= completed_at("b"));
        assert!(completed_at("d") >= completed_at("c"));
        assert!(completed_at("b") >= completed_at("a"));
    }

    #[tokio::test]
    async fn test_skip_failed_marks_descendants() {
        let llm = Arc::new(MockLlmClient::new());
        // a succeeds; b fails every attempt; c never runs
        llm.queue_generation(clean_source("A"));
        llm.queue_generation("broken");
        llm.queue_regeneration("broken");
        llm.queue_regeneration("broken");

        let validator = Arc::new(MockValidator::new());
        // a validates clean, then three failing rounds for b
        validator.queue_report(Default::default());
        for _ in 0..3 {
            validator.queue_errors(vec![crate::domain::Diagnostic::error("CS1002", "; expected")]);
        }

        let (scheduler, _) = scheduler_with(
            llm,
            validator,
            SchedulerConfig {
                worker_count: 2,
                failure_policy: FailurePolicy::SkipFailed,
                ..Default::default()
            },
        );

        let mut graph = TaskGraph::from_tasks(vec![
            Task::new("a", "ok").in_namespace("P"),
            Task::new("b", "bad").with_dependency("a").in_namespace("P"),
            Task::new("c", "downstream").with_dependency("b").in_namespace("P"),
        ])
        .unwrap();

        let outcome = scheduler
            .run(&mut graph, "chain", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.completed, vec!["a"]);
        assert_eq!(outcome.failed, vec!["b"]);
        assert_eq!(outcome.skipped, vec!["c"]);
        assert!(outcome.is_partial());
        assert_eq!(graph.task("c").unwrap().status, TaskStatus::Skipped);
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_run() {
        let llm = Arc::new(MockLlmClient::new());
        llm.queue_generation("broken");
        llm.queue_regeneration("broken");
        llm.queue_regeneration("broken");

        let validator = Arc::new(MockValidator::new());
        for _ in 0..3 {
            validator.queue_errors(vec![crate::domain::Diagnostic::error("CS1002", "; expected")]);
        }

        let (scheduler, _) = scheduler_with(
            llm,
            validator,
            SchedulerConfig {
                worker_count: 2,
                failure_policy: FailurePolicy::FailFast,
                ..Default::default()
            },
        );

        let mut graph = TaskGraph::from_tasks(vec![
            Task::new("a", "bad").in_namespace("P"),
            Task::new("b", "never runs").with_dependency("a").in_namespace("P"),
        ])
        .unwrap();

        let cancel = CancellationToken::new();
        let outcome = scheduler.run(&mut graph, "x", None, &cancel).await.unwrap();

        assert!(outcome.fatal.is_some());
        assert!(cancel.is_cancelled());
        assert_eq!(graph.task("b").unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_block_policy_reports_deadlock() {
        let llm = Arc::new(MockLlmClient::new());
        llm.queue_generation("broken");
        llm.queue_regeneration("broken");
        llm.queue_regeneration("broken");

        let validator = Arc::new(MockValidator::new());
        for _ in 0..3 {
            validator.queue_errors(vec![crate::domain::Diagnostic::error("CS1002", "; expected")]);
        }

        let (scheduler, _) = scheduler_with(
            llm,
            validator,
            SchedulerConfig {
                worker_count: 2,
                failure_policy: FailurePolicy::Block,
                ..Default::default()
            },
        );

        let mut graph = TaskGraph::from_tasks(vec![
            Task::new("a", "bad").in_namespace("P"),
            Task::new("b", "blocked").with_dependency("a").in_namespace("P"),
        ])
        .unwrap();

        let outcome = scheduler
            .run(&mut graph, "x", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.blocked.len(), 1);
        assert_eq!(outcome.blocked[0].0, "b");
        assert_eq!(outcome.blocked[0].1, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_single_task_run_with_checkpoints() {
        let llm = Arc::new(MockLlmClient::new());
        llm.queue_generation(clean_source("Solo"));
        let validator = Arc::new(MockValidator::new());
        let (scheduler, _) = scheduler_with(llm, validator, SchedulerConfig::default());

        let temp = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(temp.path());

        let mut graph = TaskGraph::from_tasks(vec![Task::new("solo", "one task").in_namespace("P")]).unwrap();
        let outcome = scheduler
            .run(&mut graph, "solo run", Some(&checkpointer), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_full_success());
        let loaded = checkpointer.load_latest().await.unwrap().unwrap();
        assert_eq!(loaded.total_tasks, 1);
        assert_eq!(loaded.completed_count, 1);
        assert_eq!(loaded.execution_status, ExecutionStatus::Complete);
    }

    #[tokio::test]
    async fn test_dependency_signatures_flow_to_dependents() {
        let llm = Arc::new(MockLlmClient::new());
        llm.queue_generation(clean_source("Base"));
        llm.queue_generation(clean_source("User"));
        let validator = Arc::new(MockValidator::new());
        let (scheduler, registry) = scheduler_with(
            llm,
            validator,
            SchedulerConfig {
                worker_count: 2,
                ..Default::default()
            },
        );

        let mut graph = TaskGraph::from_tasks(vec![
            Task::new("base", "base types").in_namespace("P"),
            Task::new("user", "uses base").with_dependency("base").in_namespace("P"),
        ])
        .unwrap();

        scheduler
            .run(&mut graph, "x", None, &CancellationToken::new())
            .await
            .unwrap();

        // The dependency's symbol was registered before the dependent ran
        assert_eq!(registry.symbols_for_task("base"), vec!["P.Base"]);
        assert_eq!(registry.len(), 2);
    }
}
