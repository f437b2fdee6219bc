//! Task domain type
//!
//! A Task is one atomic code-generation unit produced by decomposition or by
//! the splitter. The graph owns tasks; the executor mutates exactly one at a
//! time; the scheduler transitions statuses.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::diagnostic::Diagnostic;
use super::id::now_ms;

/// Task status in the execution lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies
    #[default]
    Pending,
    /// All dependencies validated, eligible for dispatch
    Ready,
    /// A worker owns it
    Running,
    /// Generation passed validation and contract checks
    Validated,
    /// Attempts exhausted or cancelled
    Failed,
    /// Skipped under a skip-* failure policy
    Skipped,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Validated => write!(f, "validated"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// LLM-produced summary of a completed task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSummary {
    pub purpose: String,
    pub key_behaviors: Vec<String>,
    pub edge_cases: Vec<String>,
}

/// One atomic code-generation task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique id within the graph
    pub id: String,

    /// What the task should produce
    pub description: String,

    /// Ids of tasks whose output this task consumes
    pub dependencies: BTreeSet<String>,

    /// Type names this task is expected to define, in declaration order
    pub expected_types: Vec<String>,

    /// Map of dependency task id to the type names imported from it
    pub consumed_types: BTreeMap<String, Vec<String>>,

    /// Libraries the generated code may reference
    pub required_libraries: Vec<String>,

    /// Namespace the generated types belong to
    pub namespace: String,

    pub status: TaskStatus,

    /// Source produced by the most recent generation attempt
    pub generated_source: Option<String>,

    /// Diagnostics from the most recent validation
    pub diagnostics: Vec<Diagnostic>,

    /// LLM generation rounds consumed; the first generation counts as 1
    pub attempt_count: u32,

    pub summary: Option<TaskSummary>,

    /// Unix millis when the task reached a terminal state
    pub completed_at: Option<i64>,

    /// Set when the splitter gave up decomposing an oversize task
    pub oversize_warning: bool,

    /// Clarifier answer appended to the description, kept for checkpoints
    pub clarification: Option<String>,
}

impl Task {
    /// Create a new pending task
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            dependencies: BTreeSet::new(),
            expected_types: Vec::new(),
            consumed_types: BTreeMap::new(),
            required_libraries: Vec::new(),
            namespace: String::new(),
            status: TaskStatus::Pending,
            generated_source: None,
            diagnostics: Vec::new(),
            attempt_count: 0,
            summary: None,
            completed_at: None,
            oversize_warning: false,
            clarification: None,
        }
    }

    /// Builder-style dependency addition
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Builder-style expected type addition
    pub fn with_expected_type(mut self, name: impl Into<String>) -> Self {
        self.expected_types.push(name.into());
        self
    }

    /// Builder-style namespace
    pub fn in_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    pub fn add_dependency(&mut self, dep: impl Into<String>) {
        self.dependencies.insert(dep.into());
    }

    /// Record a clarifier answer by appending it to the description
    pub fn record_clarification(&mut self, answer: impl Into<String>) {
        let answer = answer.into();
        self.description.push_str("\n\nClarification: ");
        self.description.push_str(&answer);
        self.clarification = Some(answer);
    }

    /// Mark validated with the final source and summary
    pub fn mark_validated(&mut self, source: String, summary: TaskSummary) {
        self.generated_source = Some(source);
        self.summary = Some(summary);
        self.diagnostics.clear();
        self.status = TaskStatus::Validated;
        self.completed_at = Some(now_ms());
    }

    /// Mark failed, preserving the final diagnostics
    pub fn mark_failed(&mut self, diagnostics: Vec<Diagnostic>) {
        self.diagnostics = diagnostics;
        self.status = TaskStatus::Failed;
        self.completed_at = Some(now_ms());
    }

    /// Mark skipped under a skip-* failure policy
    pub fn mark_skipped(&mut self) {
        self.status = TaskStatus::Skipped;
        self.completed_at = Some(now_ms());
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Validated | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Rough line count of the most recent generated source
    pub fn generated_line_count(&self) -> usize {
        self.generated_source.as_deref().map(|s| s.lines().count()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_new_defaults() {
        let task = Task::new("t1", "Define the Color enum");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt_count, 0);
        assert!(task.dependencies.is_empty());
        assert!(!task.is_terminal());
    }

    #[test]
    fn test_builder_helpers() {
        let task = Task::new("t2", "Models")
            .with_dependency("t1")
            .with_expected_type("Order")
            .in_namespace("Shop.Models");
        assert!(task.dependencies.contains("t1"));
        assert_eq!(task.expected_types, vec!["Order"]);
        assert_eq!(task.namespace, "Shop.Models");
    }

    #[test]
    fn test_record_clarification_appends() {
        let mut task = Task::new("t1", "Do the thing");
        task.record_clarification("the thing is an HTTP handler");
        assert!(task.description.contains("Clarification: the thing is an HTTP handler"));
        assert!(task.clarification.is_some());
    }

    #[test]
    fn test_mark_validated_clears_diagnostics() {
        let mut task = Task::new("t1", "x");
        task.diagnostics.push(Diagnostic::error("CS0246", "missing"));
        task.mark_validated("class A {}".to_string(), TaskSummary::default());
        assert_eq!(task.status, TaskStatus::Validated);
        assert!(task.diagnostics.is_empty());
        assert!(task.completed_at.is_some());
        assert!(task.is_terminal());
    }

    #[test]
    fn test_mark_failed_preserves_diagnostics() {
        let mut task = Task::new("t1", "x");
        task.mark_failed(vec![Diagnostic::error("CS0535", "unimplemented member")]);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.diagnostics.len(), 1);
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Validated).unwrap();
        assert_eq!(json, "\"validated\"");
    }

    #[test]
    fn test_generated_line_count() {
        let mut task = Task::new("t1", "x");
        assert_eq!(task.generated_line_count(), 0);
        task.generated_source = Some("a\nb\nc".to_string());
        assert_eq!(task.generated_line_count(), 3);
    }
}
