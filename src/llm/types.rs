//! Wire types exchanged with the LLM service

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Diagnostic, Task, TaskSummary};

/// One task as proposed by decomposition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecomposedTaskSpec {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub expected_types: Vec<String>,
    /// Dependency task id -> type names imported from it
    #[serde(default)]
    pub consumed_types: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub required_libraries: Vec<String>,
}

impl DecomposedTaskSpec {
    /// Convert into a pending task in the given namespace
    pub fn into_task(self, namespace: &str) -> Task {
        let mut task = Task::new(self.id, self.description);
        task.dependencies = self.dependencies.into_iter().collect();
        task.expected_types = self.expected_types;
        task.consumed_types = self.consumed_types;
        task.required_libraries = self.required_libraries;
        task.namespace = namespace.to_string();
        task
    }
}

/// Full decomposition of a user request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Decomposition {
    /// One-paragraph restatement of the request
    pub description: String,
    pub tasks: Vec<DecomposedTaskSpec>,
}

/// Type-signature digest of one dependency's output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySignature {
    pub task_id: String,
    /// Types the dependency defined, as registered in the symbol registry
    pub type_names: Vec<String>,
    /// The dependency's summary, when available
    pub summary: Option<TaskSummary>,
}

/// Context document assembled for a first generation attempt
///
/// Opaque to the LLM client; the prompt library renders it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationContext {
    /// Rendered declarations of the contracts the task references
    pub contract_signatures: String,
    /// The registry's known-types block
    pub known_types: String,
    pub dependencies: Vec<DependencySignature>,
    pub guardrails: Vec<String>,
    pub required_libraries: Vec<String>,
    pub namespace: String,
}

/// Context for a regeneration attempt after failed validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegenerationContext {
    pub prior_source: String,
    pub diagnostics: Vec<Diagnostic>,
    /// Categorised fix suggestions, one line each
    pub suggestions: Vec<String>,
    /// Contract signatures plus the known-types block
    pub existing_types: String,
}

/// Strip surrounding markdown code fences from LLM output
///
/// Handles ```lang openers and trailing fences; returns the input unchanged
/// when no fence is present.
pub fn strip_code_fences(source: &str) -> String {
    let trimmed = source.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the language tag on the opening fence line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => return String::new(),
    };
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim_end().to_string()
}
