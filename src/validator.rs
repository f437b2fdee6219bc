//! Validator boundary
//!
//! The compiler/linter is an external collaborator: it parses a source
//! fragment against reference sources and returns classified diagnostics.
//! Only the boundary is defined here; tests drive it with the scripted mock.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Diagnostic, Severity};

/// Validator invocation errors
#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("validator timed out after {0:?}")]
    Timeout(Duration),

    #[error("validator failed to run: {0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ValidatorError {
    /// Timeouts are transient and feed the retry mechanism
    pub fn is_retryable(&self) -> bool {
        matches!(self, ValidatorError::Timeout(_))
    }
}

/// Structured result of one validation pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl ValidationReport {
    /// Build a report from mixed diagnostics, splitting by severity
    pub fn from_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        let (errors, warnings) = diagnostics.into_iter().partition(|d| d.severity == Severity::Error);
        Self { errors, warnings }
    }

    /// Clean means zero errors; warnings do not block validation
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &Diagnostic> {
        self.errors.iter().chain(self.warnings.iter())
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// External compiler/linter boundary
#[async_trait]
pub trait Validator: Send + Sync {
    /// Validate a fragment against reference declarations
    ///
    /// `reference_sources` carries the rendered contracts and any dependency
    /// fragments the validator needs to resolve names.
    async fn validate(&self, source: &str, reference_sources: &[String]) -> Result<ValidationReport, ValidatorError>;
}

/// Validator that shells out to an external compiler command
///
/// The fragment is written to a scratch file and the command is invoked with
/// the fragment path followed by the reference paths. A zero exit is clean;
/// otherwise every non-empty output line becomes an error diagnostic, with a
/// leading `CODE:` prefix recognized as the diagnostic code.
pub struct CommandValidator {
    command: String,
    timeout: Duration,
}

impl CommandValidator {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    fn parse_line(line: &str) -> Diagnostic {
        match line.split_once(':') {
            Some((code, message)) if !code.contains(' ') && !code.is_empty() => {
                Diagnostic::error(code.trim(), message.trim())
            }
            _ => Diagnostic::error("external", line.trim()),
        }
    }
}

#[async_trait]
impl Validator for CommandValidator {
    async fn validate(&self, source: &str, reference_sources: &[String]) -> Result<ValidationReport, ValidatorError> {
        let scratch = std::env::temp_dir().join(format!("codeforge-validate-{}", crate::domain::now_ms()));
        tokio::fs::create_dir_all(&scratch).await?;
        let fragment_path = scratch.join("fragment.cs");
        tokio::fs::write(&fragment_path, source).await?;

        let mut reference_paths = Vec::new();
        for (idx, reference) in reference_sources.iter().enumerate() {
            let path = scratch.join(format!("reference-{}.cs", idx));
            tokio::fs::write(&path, reference).await?;
            reference_paths.push(path);
        }

        let mut full_command = format!("{} {}", self.command, fragment_path.display());
        for path in &reference_paths {
            full_command.push(' ');
            full_command.push_str(&path.display().to_string());
        }

        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new("sh").arg("-c").arg(&full_command).output(),
        )
        .await
        .map_err(|_| ValidatorError::Timeout(self.timeout))?
        .map_err(ValidatorError::Io)?;

        let _ = tokio::fs::remove_dir_all(&scratch).await;

        if output.status.success() {
            return Ok(ValidationReport::default());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let errors: Vec<Diagnostic> = stdout
            .lines()
            .chain(stderr.lines())
            .filter(|line| !line.trim().is_empty())
            .map(Self::parse_line)
            .collect();
        if errors.is_empty() {
            return Err(ValidatorError::Failed(format!(
                "validator exited with {} and no output",
                output.status.code().unwrap_or(-1)
            )));
        }
        Ok(ValidationReport::from_diagnostics(errors))
    }
}

/// Scripted validator for tests
pub mod mock {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Pops one scripted report per call; clean once the queue drains
    #[derive(Default)]
    pub struct MockValidator {
        reports: Mutex<VecDeque<Result<ValidationReport, ValidatorError>>>,
        calls: AtomicUsize,
    }

    impl MockValidator {
        pub fn new() -> Self {
            Self::default()
        }

        /// A validator that always reports clean
        pub fn always_clean() -> Self {
            Self::default()
        }

        pub fn queue_report(&self, report: ValidationReport) {
            self.reports.lock().push_back(Ok(report));
        }

        pub fn queue_errors(&self, errors: Vec<Diagnostic>) {
            self.reports.lock().push_back(Ok(ValidationReport {
                errors,
                warnings: Vec::new(),
            }));
        }

        pub fn queue_failure(&self, error: ValidatorError) {
            self.reports.lock().push_back(Err(error));
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Validator for MockValidator {
        async fn validate(
            &self,
            _source: &str,
            _reference_sources: &[String],
        ) -> Result<ValidationReport, ValidatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reports
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(ValidationReport::default()))
        }
    }
}
