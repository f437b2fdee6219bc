//! Per-task execution lifecycle
//!
//! Context assembly, generation, validation, the deterministic repair pass,
//! LLM regeneration, and summarization. One executor is shared by all
//! workers; each call owns exactly one task from dispatch to terminal state.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::ContractCatalog;
use crate::clarifier::Clarifier;
use crate::domain::{Diagnostic, Symbol, SymbolKind, Task, TaskSummary};
use crate::llm::{
    with_retries, DependencySignature, GenerationContext, LlmClient, RegenerationContext, RetryPolicy,
};
use crate::parse::{parse_fragment, TypeDeclKind};
use crate::registry::SymbolRegistry;
use crate::repair::Repairer;
use crate::validator::{ValidationReport, Validator};

/// Executor tuning knobs
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// LLM generation rounds per task (first generation included)
    pub max_attempts: u32,
    /// Terms that trigger a clarification request
    pub vague_terms: Vec<String>,
    pub retry_policy: RetryPolicy,
    pub validator_timeout: Duration,
    /// Grace period for in-flight calls after cancellation
    pub cancel_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            vague_terms: vec![
                "etc".to_string(),
                "somehow".to_string(),
                "as appropriate".to_string(),
                "as needed".to_string(),
                "and so on".to_string(),
                "various".to_string(),
            ],
            retry_policy: RetryPolicy::default(),
            validator_timeout: Duration::from_secs(60),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// Drives one task through generate/validate/repair/summarize
pub struct TaskExecutor {
    llm: Arc<dyn LlmClient>,
    validator: Arc<dyn Validator>,
    clarifier: Arc<dyn Clarifier>,
    catalog: Arc<ContractCatalog>,
    registry: Arc<SymbolRegistry>,
    repairer: Repairer,
    config: ExecutorConfig,
}

impl TaskExecutor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        validator: Arc<dyn Validator>,
        clarifier: Arc<dyn Clarifier>,
        catalog: Arc<ContractCatalog>,
        registry: Arc<SymbolRegistry>,
        config: ExecutorConfig,
    ) -> Self {
        let repairer = Repairer::new(Arc::clone(&catalog), Arc::clone(&registry));
        Self {
            llm,
            validator,
            clarifier,
            catalog,
            registry,
            repairer,
            config,
        }
    }

    /// Execute one task to a terminal state
    ///
    /// The returned task is `validated` or `failed`; the caller writes it
    /// back into the graph.
    pub async fn execute(
        &self,
        mut task: Task,
        dependencies: Vec<DependencySignature>,
        cancel: &CancellationToken,
    ) -> Task {
        if cancel.is_cancelled() {
            task.mark_failed(vec![Diagnostic::cancelled()]);
            return task;
        }

        if let Err(e) = self.clarify(&mut task).await {
            warn!(task = %task.id, error = %e, "clarification failed, continuing with original description");
        }

        let context = self.assemble_context(&task, dependencies);

        // First generation
        let generated = self
            .guarded(cancel, with_retries(self.config.retry_policy, "generate", || {
                self.llm.generate(&task, &context)
            }))
            .await;
        let mut source = match generated {
            Some(Ok(source)) => source,
            Some(Err(e)) => {
                task.attempt_count = 1;
                task.mark_failed(vec![Diagnostic::error("forge/llm", e.to_string())]);
                return task;
            }
            None => {
                task.mark_failed(vec![Diagnostic::cancelled()]);
                return task;
            }
        };
        task.attempt_count = 1;

        // Validate / repair / regenerate loop
        loop {
            if cancel.is_cancelled() {
                task.generated_source = Some(source);
                task.mark_failed(vec![Diagnostic::cancelled()]);
                return task;
            }

            let mut errors = match self.validate(&source, cancel).await {
                Some(Ok(report)) => report.errors,
                Some(Err(e)) => {
                    task.generated_source = Some(source);
                    task.mark_failed(vec![Diagnostic::error("forge/validator", e.to_string())]);
                    return task;
                }
                None => {
                    task.generated_source = Some(source);
                    task.mark_failed(vec![Diagnostic::cancelled()]);
                    return task;
                }
            };
            errors.extend(contract_checks(&source, &self.catalog));

            if errors.is_empty() {
                break;
            }
            debug!(task = %task.id, attempt = task.attempt_count, errors = errors.len(), "validation failed");

            // Deterministic auto-fix pass, then confirm with a re-validate
            let repair = self.repairer.repair_all(&source, &errors, &task.namespace);
            if repair.fixes_applied > 0 {
                source = repair.source;
                let recheck = match self.validate(&source, cancel).await {
                    Some(Ok(report)) => {
                        let mut errors = report.errors;
                        errors.extend(contract_checks(&source, &self.catalog));
                        errors
                    }
                    Some(Err(e)) => {
                        task.generated_source = Some(source);
                        task.mark_failed(vec![Diagnostic::error("forge/validator", e.to_string())]);
                        return task;
                    }
                    None => {
                        task.generated_source = Some(source);
                        task.mark_failed(vec![Diagnostic::cancelled()]);
                        return task;
                    }
                };
                if recheck.is_empty() {
                    info!(task = %task.id, fixes = repair.fixes_applied, "auto-fix cleared all diagnostics");
                    break;
                }
                errors = recheck;
            }

            if task.attempt_count >= self.config.max_attempts {
                info!(task = %task.id, attempts = task.attempt_count, "attempts exhausted");
                task.generated_source = Some(source);
                task.mark_failed(errors);
                return task;
            }

            // Re-prompt with structured error feedback
            let suggestions = errors
                .iter()
                .map(|d| self.repairer.suggestion_for(d, &task.namespace))
                .collect();
            let regen_context = RegenerationContext {
                prior_source: source.clone(),
                diagnostics: errors.clone(),
                suggestions,
                existing_types: format!("{}\n{}", context.contract_signatures, context.known_types),
            };
            let regenerated = self
                .guarded(cancel, with_retries(self.config.retry_policy, "regenerate", || {
                    self.llm.regenerate(&task, &regen_context)
                }))
                .await;
            source = match regenerated {
                Some(Ok(new_source)) => new_source,
                Some(Err(e)) => {
                    task.generated_source = Some(source);
                    task.mark_failed(vec![Diagnostic::error("forge/llm", e.to_string())]);
                    return task;
                }
                None => {
                    task.generated_source = Some(source);
                    task.mark_failed(vec![Diagnostic::cancelled()]);
                    return task;
                }
            };
            task.attempt_count += 1;
        }

        // Summarize; a failure here never fails the task
        let summary = match self
            .guarded(cancel, with_retries(self.config.retry_policy, "summarize", || {
                self.llm.summarize(&task, &source)
            }))
            .await
        {
            Some(Ok(summary)) => summary,
            _ => {
                warn!(task = %task.id, "summarization unavailable, using fallback");
                TaskSummary {
                    purpose: task.description.lines().next().unwrap_or_default().to_string(),
                    key_behaviors: Vec::new(),
                    edge_cases: Vec::new(),
                }
            }
        };

        self.register_symbols(&task, &source);
        info!(task = %task.id, attempts = task.attempt_count, "task validated");
        task.mark_validated(source, summary);
        task
    }

    /// Ask the clarifier when the description carries configured vague terms
    async fn clarify(&self, task: &mut Task) -> eyre::Result<()> {
        if task.clarification.is_some() {
            return Ok(());
        }
        let lower = task.description.to_lowercase();
        let Some(term) = self.config.vague_terms.iter().find(|t| lower.contains(t.as_str())) else {
            return Ok(());
        };
        let question = format!(
            "The task description contains '{}'. What exactly should this task produce?",
            term
        );
        let answer = self.clarifier.ask(&task.description, &question).await?;
        if !answer.trim().is_empty() {
            debug!(task = %task.id, "recorded clarification");
            task.record_clarification(answer.trim());
        }
        Ok(())
    }

    /// Gather contracts, known types, dependency signatures, and guardrails
    fn assemble_context(&self, task: &Task, dependencies: Vec<DependencySignature>) -> GenerationContext {
        let consumed: Vec<&str> = task
            .consumed_types
            .values()
            .flatten()
            .map(String::as_str)
            .chain(task.expected_types.iter().map(String::as_str))
            .collect();
        let contract_signatures = self
            .catalog
            .all()
            .filter(|c| consumed.contains(&c.name.as_str()) || task.description.contains(&c.name))
            .map(|c| c.render())
            .collect::<Vec<_>>()
            .join("\n");

        GenerationContext {
            contract_signatures,
            known_types: self.registry.known_types_block(),
            dependencies,
            guardrails: vec![
                "Do not redefine any listed type".to_string(),
                "Implement all interface members exactly as signed".to_string(),
                "Only the listed enum members are valid".to_string(),
            ],
            required_libraries: task.required_libraries.clone(),
            namespace: task.namespace.clone(),
        }
    }

    /// Run the validator with timeout and transient-retry handling
    async fn validate(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Option<Result<ValidationReport, crate::validator::ValidatorError>> {
        let references: Vec<String> = self.catalog.all().map(|c| c.render()).collect();
        let mut last_err = None;
        for attempt in 0..self.config.retry_policy.max_attempts {
            let run = tokio::time::timeout(self.config.validator_timeout, self.validator.validate(source, &references));
            match self.guarded(cancel, run).await {
                Some(Ok(result)) => match result {
                    Ok(report) => return Some(Ok(report)),
                    Err(e) if e.is_retryable() => {
                        warn!(attempt, error = %e, "validator transient failure");
                        last_err = Some(e);
                    }
                    Err(e) => return Some(Err(e)),
                },
                Some(Err(_elapsed)) => {
                    warn!(attempt, "validator timed out");
                    last_err = Some(crate::validator::ValidatorError::Timeout(self.config.validator_timeout));
                }
                None => return None,
            }
        }
        Some(Err(last_err.unwrap_or(crate::validator::ValidatorError::Timeout(
            self.config.validator_timeout,
        ))))
    }

    /// Register every type the final source declares
    fn register_symbols(&self, task: &Task, source: &str) {
        let fragment = parse_fragment(source);
        for decl in &fragment.types {
            let namespace = if decl.namespace.is_empty() {
                task.namespace.clone()
            } else {
                decl.namespace.clone()
            };
            let kind = match decl.kind {
                TypeDeclKind::Enum => SymbolKind::Enum,
                TypeDeclKind::Interface => SymbolKind::Interface,
                _ => SymbolKind::Type,
            };
            let symbol = Symbol::new(namespace, decl.name.clone(), kind, task.id.clone());
            for violation in self.registry.validate_conventions(&symbol) {
                debug!(task = %task.id, ?violation, "naming convention violation");
            }
            self.registry.try_register(symbol);
        }
    }

    /// Await a future, honoring cancellation with a bounded grace period
    ///
    /// Returns None when cancellation fired and the in-flight call did not
    /// finish within the grace window.
    async fn guarded<T>(&self, cancel: &CancellationToken, fut: impl std::future::Future<Output = T>) -> Option<T> {
        tokio::pin!(fut);
        tokio::select! {
            result = &mut fut => Some(result),
            _ = cancel.cancelled() => {
                match tokio::time::timeout(self.config.cancel_grace, &mut fut).await {
                    Ok(result) => Some(result),
                    Err(_) => None,
                }
            }
        }
    }
}

/// Deterministic in-process contract validation
///
/// Flags redefinitions of frozen contracts, inheritance from sealed
/// contracts, and access to enum members the contract does not define.
pub fn contract_checks(source: &str, catalog: &ContractCatalog) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let fragment = parse_fragment(source);

    for decl in &fragment.types {
        if let Some(contract) = catalog.resolve_simple_name(&decl.name) {
            diagnostics.push(Diagnostic::error(
                "contract/redefine",
                format!(
                    "type '{}' redefines frozen contract '{}'",
                    decl.name,
                    contract.fully_qualified_name()
                ),
            ));
        }
        for base in &decl.base_types {
            let base_simple = base.rsplit('.').next().unwrap_or(base);
            if let Some(contract) = catalog.resolve_simple_name(base_simple) {
                if contract.is_sealed() {
                    diagnostics.push(Diagnostic::error(
                        "contract/sealed-inheritance",
                        format!("type '{}' inherits from sealed contract '{}'", decl.name, base_simple),
                    ));
                }
            }
        }
    }

    for contract in catalog.all() {
        let members = contract.enum_member_names();
        if members.is_empty() {
            continue;
        }
        for access in enum_member_accesses(source, &contract.name) {
            if !members.contains(&access.as_str()) && !is_common_object_method(&access) {
                diagnostics.push(Diagnostic::error(
                    "contract/missing-enum-member",
                    format!(
                        "enum member '{}.{}' is not defined by contract '{}'",
                        contract.name,
                        access,
                        contract.fully_qualified_name()
                    ),
                ));
            }
        }
    }

    diagnostics
}

/// Identifiers accessed as `EnumName.Member` (excluding method calls)
fn enum_member_accesses(source: &str, enum_name: &str) -> Vec<String> {
    let needle = format!("{}.", enum_name);
    let bytes = source.as_bytes();
    let mut accesses = Vec::new();
    let mut start = 0;
    while let Some(pos) = source[start..].find(&needle) {
        let at = start + pos;
        start = at + needle.len();
        // Must be a bare occurrence of the enum name
        if at > 0 {
            let prev = bytes[at - 1] as char;
            if prev.is_alphanumeric() || prev == '_' || prev == '.' {
                continue;
            }
        }
        let member: String = source[at + needle.len()..]
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if member.is_empty() {
            continue;
        }
        // A following '(' means a method call, not member access
        let after = at + needle.len() + member.len();
        if source[after..].starts_with('(') {
            continue;
        }
        accesses.push(member);
    }
    accesses
}

fn is_common_object_method(name: &str) -> bool {
    matches!(name, "ToString" | "Equals" | "GetHashCode" | "GetType" | "HasFlag" | "CompareTo")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clarifier::mock::MockClarifier;
    use crate::domain::{Contract, ContractKind, EnumContract, EnumMember, InterfaceContract, MethodSignature};
    use crate::llm::mock::MockLlmClient;
    use crate::validator::mock::MockValidator;

    fn frozen_catalog(contracts: Vec<Contract>) -> Arc<ContractCatalog> {
        let mut catalog = ContractCatalog::new();
        for contract in contracts {
            catalog.register(contract).unwrap();
        }
        catalog.freeze();
        Arc::new(catalog)
    }

    fn color_contract() -> Contract {
        Contract::new(
            "P.Models",
            "Color",
            "plan",
            ContractKind::Enum(EnumContract {
                members: vec![
                    EnumMember::new("Red"),
                    EnumMember::new("Green"),
                    EnumMember::new("Blue"),
                ],
                is_flags: false,
            }),
        )
    }

    fn executor(
        llm: Arc<MockLlmClient>,
        validator: Arc<MockValidator>,
        catalog: Arc<ContractCatalog>,
    ) -> (TaskExecutor, Arc<SymbolRegistry>) {
        let registry = Arc::new(SymbolRegistry::new());
        let config = ExecutorConfig {
            retry_policy: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            ..Default::default()
        };
        let exec = TaskExecutor::new(
            llm,
            validator,
            Arc::new(MockClarifier::new()),
            catalog,
            Arc::clone(&registry),
            config,
        );
        (exec, registry)
    }

    #[tokio::test]
    async fn test_clean_first_attempt() {
        let llm = Arc::new(MockLlmClient::new());
        llm.queue_generation("namespace P\n{\n    public class Widget\n    {\n    }\n}\n");
        let validator = Arc::new(MockValidator::new());
        let (exec, registry) = executor(llm.clone(), validator, frozen_catalog(vec![]));

        let task = Task::new("t1", "Define Widget").in_namespace("P");
        let done = exec.execute(task, vec![], &CancellationToken::new()).await;

        assert_eq!(done.status, crate::domain::TaskStatus::Validated);
        assert_eq!(done.attempt_count, 1);
        assert!(done.summary.is_some());
        assert!(registry.get("P.Widget").is_some());
        assert_eq!(llm.generate_calls(), 1);
        assert_eq!(llm.regenerate_calls(), 0);
    }

    #[tokio::test]
    async fn test_repair_loop_converges_without_llm() {
        // Scenario: generated code misses one interface member; the auto-fix
        // inserts the stub verbatim, second validate is clean.
        let contract = Contract::new(
            "P.Services",
            "IShape",
            "plan",
            ContractKind::Interface(InterfaceContract {
                methods: vec![MethodSignature::new("Area", "double")],
                ..Default::default()
            }),
        );
        let llm = Arc::new(MockLlmClient::new());
        llm.queue_generation("public class Circle : IShape\n{\n}\n");

        let validator = Arc::new(MockValidator::new());
        validator.queue_errors(vec![Diagnostic::error(
            "CS0535",
            "'Circle' does not implement interface member 'IShape.Area()'",
        )]);
        // Second validate (post-fix) comes from the empty queue: clean

        let (exec, _) = executor(llm.clone(), validator.clone(), frozen_catalog(vec![contract]));
        let task = Task::new("t1", "Implement Circle").in_namespace("P");
        let done = exec.execute(task, vec![], &CancellationToken::new()).await;

        assert_eq!(done.status, crate::domain::TaskStatus::Validated);
        assert_eq!(done.attempt_count, 1);
        assert_eq!(llm.generate_calls(), 1);
        assert_eq!(llm.regenerate_calls(), 0);
        assert_eq!(validator.calls(), 2);
        assert!(done.generated_source.unwrap().contains("public double Area()"));
    }

    #[tokio::test]
    async fn test_regeneration_after_unfixable_diagnostic() {
        let llm = Arc::new(MockLlmClient::new());
        llm.queue_generation("broken");
        llm.queue_regeneration("namespace P\n{\n    public class Fixed\n    {\n    }\n}\n");

        let validator = Arc::new(MockValidator::new());
        validator.queue_errors(vec![Diagnostic::error("CS1002", "; expected")]);

        let (exec, _) = executor(llm.clone(), validator.clone(), frozen_catalog(vec![]));
        let task = Task::new("t1", "x").in_namespace("P");
        let done = exec.execute(task, vec![], &CancellationToken::new()).await;

        assert_eq!(done.status, crate::domain::TaskStatus::Validated);
        assert_eq!(done.attempt_count, 2);
        assert_eq!(llm.regenerate_calls(), 1);
    }

    #[tokio::test]
    async fn test_attempts_exhausted_marks_failed() {
        let llm = Arc::new(MockLlmClient::new());
        llm.queue_generation("broken");
        llm.queue_regeneration("still broken");
        llm.queue_regeneration("broken forever");

        let validator = Arc::new(MockValidator::new());
        for _ in 0..3 {
            validator.queue_errors(vec![Diagnostic::error("CS1002", "; expected")]);
        }

        let (exec, _) = executor(llm.clone(), validator, frozen_catalog(vec![]));
        let task = Task::new("t1", "x").in_namespace("P");
        let done = exec.execute(task, vec![], &CancellationToken::new()).await;

        assert_eq!(done.status, crate::domain::TaskStatus::Failed);
        assert_eq!(done.attempt_count, 3);
        assert_eq!(done.diagnostics.len(), 1);
        assert_eq!(llm.regenerate_calls(), 2);
    }

    #[tokio::test]
    async fn test_contract_redefinition_detected() {
        let llm = Arc::new(MockLlmClient::new());
        // Every attempt redefines Color; attempts exhaust with the
        // contract violation as the final diagnostics
        llm.queue_generation("public enum Color { Red }\n");
        llm.queue_regeneration("public enum Color { Red }\n");
        llm.queue_regeneration("public enum Color { Red }\n");

        let validator = Arc::new(MockValidator::new());
        let (exec, _) = executor(llm, validator, frozen_catalog(vec![color_contract()]));

        let mut task = Task::new("t1", "Use colors").in_namespace("P");
        task.consumed_types.insert("t0".to_string(), vec!["Color".to_string()]);
        let done = exec.execute(task, vec![], &CancellationToken::new()).await;

        assert_eq!(done.status, crate::domain::TaskStatus::Failed);
        assert!(done.diagnostics.iter().any(|d| d.code == "contract/redefine"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let llm = Arc::new(MockLlmClient::new());
        let validator = Arc::new(MockValidator::new());
        let (exec, _) = executor(llm, validator, frozen_catalog(vec![]));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let done = exec.execute(Task::new("t1", "x"), vec![], &cancel).await;

        assert_eq!(done.status, crate::domain::TaskStatus::Failed);
        assert_eq!(done.diagnostics[0].category, crate::domain::DiagnosticCategory::Cancelled);
    }

    #[tokio::test]
    async fn test_clarification_appended() {
        let llm = Arc::new(MockLlmClient::new());
        llm.queue_generation("namespace P\n{\n    public class A\n    {\n    }\n}\n");
        let validator = Arc::new(MockValidator::new());
        let registry = Arc::new(SymbolRegistry::new());
        let clarifier = Arc::new(MockClarifier::new());
        clarifier.queue_answer("produce a JSON serializer");

        let exec = TaskExecutor::new(
            llm,
            validator,
            clarifier.clone(),
            frozen_catalog(vec![]),
            registry,
            ExecutorConfig::default(),
        );

        let task = Task::new("t1", "Handle serialization somehow").in_namespace("P");
        let done = exec.execute(task, vec![], &CancellationToken::new()).await;

        assert_eq!(clarifier.ask_calls(), 1);
        assert!(done.description.contains("produce a JSON serializer"));
    }

    #[test]
    fn test_contract_checks_enum_member() {
        let catalog = frozen_catalog(vec![color_contract()]);
        let source = "class A\n{\n    var c = Color.Purple;\n    var ok = Color.Red;\n}\n";
        let diagnostics = contract_checks(source, &catalog);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, "contract/missing-enum-member");
        assert!(diagnostics[0].message.contains("Color.Purple"));
    }

    #[test]
    fn test_contract_checks_method_calls_ignored() {
        let catalog = frozen_catalog(vec![color_contract()]);
        let source = "class A\n{\n    var s = Color.Red.ToString();\n    var t = Color.ToString();\n}\n";
        let diagnostics = contract_checks(source, &catalog);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_contract_checks_sealed_inheritance() {
        use crate::domain::AbstractBaseContract;
        let sealed = Contract::new(
            "P",
            "Clock",
            "plan",
            ContractKind::AbstractBase(AbstractBaseContract {
                is_sealed: true,
                ..Default::default()
            }),
        );
        let catalog = frozen_catalog(vec![sealed]);
        let source = "public class Timer : Clock\n{\n}\n";
        let diagnostics = contract_checks(source, &catalog);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, "contract/sealed-inheritance");
    }
}
