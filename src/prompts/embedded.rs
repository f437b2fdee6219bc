//! Embedded prompt templates
//!
//! Handlebars sources compiled into the binary. The library registers them
//! once at startup; there is no file-based override path.

/// System prompt for request decomposition
pub const DECOMPOSE_SYSTEM: &str = r#"You are a software architect decomposing a code-generation request into atomic tasks.

Your job is to:
1. Understand the request
2. Break it into small, independently generatable tasks
3. Identify dependencies between tasks
4. List the types each task defines and consumes

Guidelines:
- Each task should produce one cohesive group of types
- Dependencies must form a DAG (no cycles)
- Reference dependencies by task id
- Every consumed type must be defined by a dependency
- Keep task ids short and stable (e.g. "models", "order-service")

Call submit_decomposition once with every task."#;

/// User template for decomposition
pub const DECOMPOSE_USER: &str = r#"Decompose this request into tasks.

## Request

{{request}}
{{#if context}}

## Additional context

{{context}}
{{/if}}"#;

/// System prompt for contract-first generation
pub const CONTRACTS_SYSTEM: &str = r#"You are defining the shared type contracts for a code-generation plan.

Identify the enums, interfaces, models, and abstract base classes that more
than one task will reference, and submit their exact shapes. These contracts
are frozen before generation starts: every task must conform to them and no
task may redefine them.

Call submit_contracts once."#;

/// User template for contract generation
pub const CONTRACTS_USER: &str = r#"Define the shared contracts for this plan.

## Request

{{request}}

## Planned tasks

{{#each tasks}}
- {{this.id}}: {{this.description}} (defines: {{this.expected}})
{{/each}}"#;

/// System prompt for source generation and regeneration
pub const GENERATE_SYSTEM: &str = r#"You are generating one source fragment of a larger program.

Rules:
- Output ONLY source code, no explanations
- Do not redefine any listed existing type
- Implement all interface members exactly as signed
- Only the listed enum members are valid
- Place types in the stated namespace"#;

/// User template for a first generation attempt
pub const GENERATE_USER: &str = r#"Generate the source for this task.

## Task

{{task_description}}

Namespace: {{namespace}}
{{#if expected_types}}
Types to define, in order: {{expected_types}}
{{/if}}
{{#if required_libraries}}
Available libraries: {{required_libraries}}
{{/if}}
{{#if contract_signatures}}

## Frozen contracts (authoritative, do not redefine)

{{contract_signatures}}
{{/if}}
{{#if known_types}}

## Existing types

{{known_types}}
{{/if}}
{{#each dependencies}}

## Output of dependency {{this.task_id}}

Types: {{this.types}}
{{#if this.purpose}}Purpose: {{this.purpose}}{{/if}}
{{/each}}

## Guardrails

{{#each guardrails}}
- {{this}}
{{/each}}"#;

/// User template for regeneration with error feedback
pub const REGENERATE_USER: &str = r#"The previous attempt failed validation. Produce a corrected version.

## Task

{{task_description}}

## Previous source

{{prior_source}}

## Diagnostics

{{#each diagnostics}}
- {{this}}
{{/each}}

## Suggestions

{{#each suggestions}}
- {{this}}
{{/each}}
{{#if existing_types}}

## Existing types (do not redefine)

{{existing_types}}
{{/if}}

Output the complete corrected source, nothing else."#;

/// System prompt for summarization
pub const SUMMARIZE_SYSTEM: &str = r#"Summarize what a generated source fragment does. Be concrete and terse.
Call submit_summary once."#;

/// User template for summarization
pub const SUMMARIZE_USER: &str = r#"Summarize this fragment.

## Task

{{task_description}}

## Source

{{source}}"#;

/// System prompt for splitting oversize tasks
pub const SPLIT_SYSTEM: &str = r#"You are splitting one oversize code-generation task into smaller subtasks.

Rules:
- Each subtask must be generatable within the line budget
- Subtask dependencies must form a DAG among the subtasks (no cycles)
- Together the subtasks must cover exactly the original task
- Distribute the original's expected types across the subtasks

Call submit_subtasks once."#;

/// User template for splitting
pub const SPLIT_USER: &str = r#"Split this task so each subtask stays under {{max_lines}} lines of output.

## Task {{task_id}}

{{task_description}}
{{#if expected_types}}
Expected types: {{expected_types}}
{{/if}}"#;
