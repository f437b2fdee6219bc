//! Top-level orchestration
//!
//! Wires decomposition, splitting, contract generation, scheduling, merging,
//! and checkpointing behind a single `run` entry. Errors never escape the
//! public boundary: the report carries the full failure taxonomy.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::ContractCatalog;
use crate::checkpoint::Checkpointer;
use crate::clarifier::{Clarifier, ReviewDecision};
use crate::complexity::Splitter;
use crate::config::RunOptions;
use crate::domain::{Collision, Diagnostic, Task, TaskStatus};
use crate::executor::{ExecutorConfig, TaskExecutor};
use crate::graph::{GraphError, TaskGraph};
use crate::llm::{with_retries, LlmClient, RetryPolicy};
use crate::merger::{Conflict, Merger};
use crate::registry::SymbolRegistry;
use crate::scheduler::{FailurePolicy, Scheduler, SchedulerConfig};
use crate::validator::Validator;

/// Process exit mapping: 0 full success, 1 partial, 2 fatal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    Partial,
    Fatal,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Partial => 1,
            Self::Fatal => 2,
        }
    }
}

/// Per-task outcome in the final report
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: String,
    pub status: TaskStatus,
    pub attempt_count: u32,
    pub diagnostics: Vec<Diagnostic>,
    pub oversize_warning: bool,
}

/// Everything `run` produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub success: bool,
    pub exit_status: ExitStatus,
    pub merged_source: Option<String>,
    pub contract_manifest: Option<String>,
    pub tasks: Vec<TaskReport>,
    pub conflicts: Vec<Conflict>,
    pub collisions: Vec<Collision>,
    /// Ambiguous simple names with their suggested qualification
    pub aliases: Vec<(String, String)>,
    pub warnings: Vec<String>,
    pub fatal: Option<String>,
    pub duration_ms: u64,
    pub output_directory: PathBuf,
}

impl RunReport {
    fn fatal(reason: impl Into<String>, options: &RunOptions, started: Instant) -> Self {
        let reason = reason.into();
        Self {
            success: false,
            exit_status: ExitStatus::Fatal,
            merged_source: None,
            contract_manifest: None,
            tasks: Vec::new(),
            conflicts: Vec::new(),
            collisions: Vec::new(),
            aliases: Vec::new(),
            warnings: Vec::new(),
            fatal: Some(reason),
            duration_ms: started.elapsed().as_millis() as u64,
            output_directory: options.output_directory.clone(),
        }
    }
}

/// Owns the graph, catalog, registry, and checkpointer for one run
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    validator: Arc<dyn Validator>,
    clarifier: Arc<dyn Clarifier>,
    options: RunOptions,
    retry_policy: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        validator: Arc<dyn Validator>,
        clarifier: Arc<dyn Clarifier>,
        options: RunOptions,
    ) -> Self {
        Self {
            llm,
            validator,
            clarifier,
            options,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Run a request end to end
    pub async fn run(&self, request: &str) -> RunReport {
        self.run_cancellable(request, CancellationToken::new()).await
    }

    /// Run with an external cancellation signal
    pub async fn run_cancellable(&self, request: &str, cancel: CancellationToken) -> RunReport {
        let started = Instant::now();
        info!(request_len = request.len(), "run starting");

        // Plan: decompose with acyclicity re-prompts
        let mut graph = match self.plan(request).await {
            Ok(graph) => graph,
            Err(reason) => return RunReport::fatal(reason, &self.options, started),
        };
        info!(tasks = graph.len(), "request decomposed");

        // Plan review gate
        let plan_tasks: Vec<Task> = graph.tasks().cloned().collect();
        match self.clarifier.review(&plan_tasks).await {
            Ok(ReviewDecision::Accept) => {}
            Ok(ReviewDecision::Abort) => {
                return RunReport::fatal("plan review aborted by user", &self.options, started);
            }
            Err(e) => {
                return RunReport::fatal(format!("plan review failed: {}", e), &self.options, started);
            }
        }

        let mut warnings = Vec::new();

        // Split oversize tasks before anything executes
        if self.options.enable_complexity_analysis {
            let splitter = Splitter::new(Arc::clone(&self.llm), self.options.max_lines_per_task);
            match splitter.split_oversize(&mut graph).await {
                Ok(outcome) => warnings.extend(outcome.warnings),
                Err(e) => warnings.push(format!("complexity analysis failed: {}", e)),
            }
        }

        // Contract-first pass, then freeze unconditionally
        let (catalog, contract_warnings) = self.build_catalog(request, &graph).await;
        warnings.extend(contract_warnings);
        let catalog = Arc::new(catalog);
        let manifest = catalog.render_manifest();
        if let Err(e) = self.write_contract_artifacts(&catalog, &manifest).await {
            warnings.push(format!("failed to write contract artifacts: {}", e));
        }

        // Execute
        let registry = Arc::new(SymbolRegistry::new());
        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&self.llm),
            Arc::clone(&self.validator),
            Arc::clone(&self.clarifier),
            Arc::clone(&catalog),
            Arc::clone(&registry),
            ExecutorConfig {
                max_attempts: self.options.max_attempts,
                retry_policy: self.retry_policy,
                ..Default::default()
            },
        ));
        let scheduler = Scheduler::new(executor, Arc::clone(&registry), SchedulerConfig {
            worker_count: self.options.effective_worker_count(),
            failure_policy: self.options.failure_policy,
            checkpoint_every_n: self.options.checkpoint_every_n,
        });
        let checkpointer = Checkpointer::new(&self.options.output_directory);

        let outcome = match scheduler.run(&mut graph, request, Some(&checkpointer), &cancel).await {
            Ok(outcome) => outcome,
            Err(e) => return RunReport::fatal(format!("scheduler failed: {}", e), &self.options, started),
        };

        // Merge: frozen contracts first (ground truth), then validated
        // fragments in deterministic topological order
        let merger = Merger::new(Arc::clone(&catalog), Arc::clone(&registry));
        let mut fragments: Vec<(String, String)> = catalog
            .all()
            .map(|c| (format!("contracts/{}", c.fully_qualified_name()), c.render()))
            .collect();
        fragments.extend(self.validated_fragments(&graph));
        let merge_output = merger.merge(&fragments);
        if let Err(e) = self.write_corpus(&merge_output.corpus).await {
            warnings.push(format!("failed to write merged corpus: {}", e));
        }

        // Report
        let tasks: Vec<TaskReport> = graph
            .tasks()
            .map(|t| TaskReport {
                id: t.id.clone(),
                status: t.status,
                attempt_count: t.attempt_count,
                diagnostics: t.diagnostics.clone(),
                oversize_warning: t.oversize_warning,
            })
            .collect();

        let unresolved_conflicts = merge_output.unresolved().len();
        let fatal = outcome.fatal.clone().or_else(|| {
            outcome
                .cancelled
                .then(|| "run cancelled".to_string())
        });
        let exit_status = if fatal.is_some() {
            ExitStatus::Fatal
        } else if outcome.is_full_success() && unresolved_conflicts == 0 {
            ExitStatus::Success
        } else {
            ExitStatus::Partial
        };

        info!(
            exit = ?exit_status,
            completed = outcome.completed.len(),
            failed = outcome.failed.len(),
            skipped = outcome.skipped.len(),
            conflicts = merge_output.conflicts.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );

        RunReport {
            success: exit_status == ExitStatus::Success,
            exit_status,
            merged_source: Some(merge_output.corpus),
            contract_manifest: Some(manifest),
            tasks,
            conflicts: merge_output.conflicts,
            collisions: registry.collisions(),
            aliases: registry.alias_suggestions(&self.options.project_name),
            warnings,
            fatal,
            duration_ms: started.elapsed().as_millis() as u64,
            output_directory: self.options.output_directory.clone(),
        }
    }

    /// Decompose the request into a valid DAG, re-prompting on rejection
    async fn plan(&self, request: &str) -> Result<TaskGraph, String> {
        let mut feedback = String::new();
        let mut last_error = String::from("no decomposition produced");

        for attempt in 1..=3 {
            let decomposition = match with_retries(self.retry_policy, "decompose", || {
                self.llm.decompose(request, &feedback)
            })
            .await
            {
                Ok(decomposition) => decomposition,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            let mut tasks: Vec<Task> = decomposition
                .tasks
                .into_iter()
                .map(|spec| spec.into_task(&self.options.project_name))
                .collect();

            if self.options.failure_policy == FailurePolicy::SkipMissing {
                let skipped = sanitize_missing_dependencies(&mut tasks);
                if !skipped.is_empty() {
                    warn!(skipped = skipped.len(), "tasks with phantom dependencies skipped");
                }
            }

            match TaskGraph::from_tasks(tasks) {
                Ok(graph) => return Ok(graph),
                Err(e @ GraphError::Cycle { .. }) => {
                    warn!(attempt, error = %e, "decomposition rejected");
                    feedback = format!(
                        "The previous decomposition was rejected: {}. The task dependency graph MUST be acyclic.",
                        e
                    );
                    last_error = e.to_string();
                }
                Err(e @ GraphError::UnresolvedDependency { .. }) => {
                    warn!(attempt, error = %e, "decomposition rejected");
                    feedback = format!(
                        "The previous decomposition was rejected: {}. Every dependency id must reference a task defined in the same decomposition.",
                        e
                    );
                    last_error = e.to_string();
                }
                Err(e) => return Err(format!("decomposition-failure: {}", e)),
            }
        }

        Err(format!("decomposition-failure: {}", last_error))
    }

    /// Ask for shared contracts and freeze the catalog
    async fn build_catalog(&self, request: &str, graph: &TaskGraph) -> (ContractCatalog, Vec<String>) {
        let mut catalog = ContractCatalog::new();
        let mut warnings = Vec::new();

        if self.options.enable_contract_first {
            let tasks: Vec<Task> = graph.tasks().cloned().collect();
            match with_retries(self.retry_policy, "generate_contracts", || {
                self.llm.generate_contracts(request, &tasks)
            })
            .await
            {
                Ok(contracts) => {
                    for contract in contracts {
                        let name = contract.fully_qualified_name();
                        if let Err(e) = catalog.register(contract) {
                            warnings.push(format!("contract '{}' not registered: {}", name, e));
                        }
                    }
                }
                Err(e) => warnings.push(format!("contract generation failed, executing without contracts: {}", e)),
            }
        }

        catalog.freeze();
        (catalog, warnings)
    }

    /// Persist `contracts.manifest` and one artifact per contract
    async fn write_contract_artifacts(&self, catalog: &ContractCatalog, manifest: &str) -> std::io::Result<()> {
        let base = &self.options.output_directory;
        tokio::fs::create_dir_all(base.join("contracts")).await?;
        tokio::fs::write(base.join("contracts.manifest"), manifest).await?;
        for contract in catalog.all() {
            let path = base.join("contracts").join(&contract.name);
            tokio::fs::write(path, contract.render()).await?;
        }
        Ok(())
    }

    async fn write_corpus(&self, corpus: &str) -> std::io::Result<()> {
        let dir = self.options.output_directory.join("generated");
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join("merged.cs"), corpus).await
    }

    /// Validated fragments in topological order for deterministic merging
    fn validated_fragments(&self, graph: &TaskGraph) -> Vec<(String, String)> {
        let order = graph.topological_order().unwrap_or_else(|_| graph.ids().map(String::from).collect());
        order
            .into_iter()
            .filter_map(|id| {
                let task = graph.task(&id)?;
                if task.status != TaskStatus::Validated {
                    return None;
                }
                Some((id, task.generated_source.clone()?))
            })
            .collect()
    }
}

/// Drop phantom dependencies under skip-missing, skipping affected tasks
///
/// A task referencing an undefined dependency is skipped; dependents of a
/// skipped task are skipped transitively.
fn sanitize_missing_dependencies(tasks: &mut [Task]) -> Vec<String> {
    let known: std::collections::BTreeSet<String> = tasks.iter().map(|t| t.id.clone()).collect();
    let mut skipped: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();

    for task in tasks.iter_mut() {
        let phantoms: Vec<String> = task
            .dependencies
            .iter()
            .filter(|dep| !known.contains(*dep))
            .cloned()
            .collect();
        if !phantoms.is_empty() {
            for phantom in phantoms {
                task.dependencies.remove(&phantom);
            }
            task.mark_skipped();
            skipped.insert(task.id.clone());
        }
    }

    // Transitive closure over dependents of skipped tasks
    loop {
        let mut changed = false;
        for task in tasks.iter_mut() {
            if !skipped.contains(&task.id) && task.dependencies.iter().any(|dep| skipped.contains(dep)) {
                task.mark_skipped();
                skipped.insert(task.id.clone());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    skipped.into_iter().collect()
}
