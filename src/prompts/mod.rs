//! Prompt library
//!
//! Renders the embedded handlebars templates with typed contexts. One
//! library instance is shared per LLM client.

use eyre::{Context, Result};
use handlebars::Handlebars;
use serde::Serialize;

use crate::domain::Task;
use crate::llm::{GenerationContext, RegenerationContext};

mod embedded;

pub use embedded::{CONTRACTS_SYSTEM, DECOMPOSE_SYSTEM, GENERATE_SYSTEM, SPLIT_SYSTEM, SUMMARIZE_SYSTEM};

/// Registered prompt templates
pub struct PromptLibrary {
    handlebars: Handlebars<'static>,
}

#[derive(Serialize)]
struct DecomposeCtx<'a> {
    request: &'a str,
    context: &'a str,
}

#[derive(Serialize)]
struct ContractsTaskCtx {
    id: String,
    description: String,
    expected: String,
}

#[derive(Serialize)]
struct ContractsCtx<'a> {
    request: &'a str,
    tasks: Vec<ContractsTaskCtx>,
}

#[derive(Serialize)]
struct DependencyCtx {
    task_id: String,
    types: String,
    purpose: Option<String>,
}

#[derive(Serialize)]
struct GenerateCtx<'a> {
    task_description: &'a str,
    namespace: &'a str,
    expected_types: String,
    required_libraries: String,
    contract_signatures: &'a str,
    known_types: &'a str,
    dependencies: Vec<DependencyCtx>,
    guardrails: &'a [String],
}

#[derive(Serialize)]
struct RegenerateCtx<'a> {
    task_description: &'a str,
    prior_source: &'a str,
    diagnostics: Vec<String>,
    suggestions: &'a [String],
    existing_types: &'a str,
}

#[derive(Serialize)]
struct SummarizeCtx<'a> {
    task_description: &'a str,
    source: &'a str,
}

#[derive(Serialize)]
struct SplitCtx<'a> {
    task_id: &'a str,
    task_description: &'a str,
    expected_types: String,
    max_lines: u32,
}

impl PromptLibrary {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        // Templates emit code and identifiers, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);
        for (name, source) in [
            ("decompose", embedded::DECOMPOSE_USER),
            ("contracts", embedded::CONTRACTS_USER),
            ("generate", embedded::GENERATE_USER),
            ("regenerate", embedded::REGENERATE_USER),
            ("summarize", embedded::SUMMARIZE_USER),
            ("split", embedded::SPLIT_USER),
        ] {
            handlebars
                .register_template_string(name, source)
                .unwrap_or_else(|e| panic!("embedded template '{}' failed to parse: {}", name, e));
        }
        Self { handlebars }
    }

    fn render<T: Serialize>(&self, name: &str, ctx: &T) -> Result<String> {
        self.handlebars
            .render(name, ctx)
            .context(format!("Failed to render prompt '{}'", name))
    }

    pub fn render_decompose(&self, request: &str, context: &str) -> Result<String> {
        self.render("decompose", &DecomposeCtx { request, context })
    }

    pub fn render_contracts(&self, request: &str, tasks: &[Task]) -> Result<String> {
        let tasks = tasks
            .iter()
            .map(|t| ContractsTaskCtx {
                id: t.id.clone(),
                description: t.description.clone(),
                expected: t.expected_types.join(", "),
            })
            .collect();
        self.render("contracts", &ContractsCtx { request, tasks })
    }

    pub fn render_generate(&self, task: &Task, ctx: &GenerationContext) -> Result<String> {
        let dependencies = ctx
            .dependencies
            .iter()
            .map(|d| DependencyCtx {
                task_id: d.task_id.clone(),
                types: d.type_names.join(", "),
                purpose: d.summary.as_ref().map(|s| s.purpose.clone()),
            })
            .collect();
        self.render(
            "generate",
            &GenerateCtx {
                task_description: &task.description,
                namespace: &ctx.namespace,
                expected_types: task.expected_types.join(", "),
                required_libraries: ctx.required_libraries.join(", "),
                contract_signatures: &ctx.contract_signatures,
                known_types: &ctx.known_types,
                dependencies,
                guardrails: &ctx.guardrails,
            },
        )
    }

    pub fn render_regenerate(&self, task: &Task, ctx: &RegenerationContext) -> Result<String> {
        self.render(
            "regenerate",
            &RegenerateCtx {
                task_description: &task.description,
                prior_source: &ctx.prior_source,
                diagnostics: ctx.diagnostics.iter().map(|d| d.to_string()).collect(),
                suggestions: &ctx.suggestions,
                existing_types: &ctx.existing_types,
            },
        )
    }

    pub fn render_summarize(&self, task: &Task, source: &str) -> Result<String> {
        self.render(
            "summarize",
            &SummarizeCtx {
                task_description: &task.description,
                source,
            },
        )
    }

    pub fn render_split(&self, task: &Task, max_lines: u32) -> Result<String> {
        self.render(
            "split",
            &SplitCtx {
                task_id: &task.id,
                task_description: &task.description,
                expected_types: task.expected_types.join(", "),
                max_lines,
            },
        )
    }
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::new()
    }
}
