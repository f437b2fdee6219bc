//! Validator diagnostics and their classification

use serde::{Deserialize, Serialize};

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Position of a diagnostic within a source fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// 1-based line number
    pub line: usize,
    /// 1-based column number
    pub column: usize,
}

/// Category a diagnostic code maps to
///
/// Categories drive the repair loop: each auto-fixable category has a
/// deterministic transform, the rest are fed back to the LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticCategory {
    MissingUsing,
    SymbolCollision,
    MissingInterfaceMember,
    SignatureMismatch,
    MissingEnumMember,
    SealedInheritance,
    AmbiguousReference,
    Cancelled,
    Other,
}

impl std::fmt::Display for DiagnosticCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MissingUsing => "missing-using",
            Self::SymbolCollision => "symbol-collision",
            Self::MissingInterfaceMember => "missing-interface-member",
            Self::SignatureMismatch => "signature-mismatch",
            Self::MissingEnumMember => "missing-enum-member",
            Self::SealedInheritance => "sealed-inheritance",
            Self::AmbiguousReference => "ambiguous-reference",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        };
        write!(f, "{}", s)
    }
}

impl DiagnosticCategory {
    /// Classify a validator diagnostic code
    ///
    /// Recognizes the in-process contract-check codes (`contract/...`),
    /// orchestrator codes (`forge/...`), and the common C#-family compiler
    /// codes the reference validator emits. Unknown codes are `Other`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "contract/redefine" => Self::SymbolCollision,
            "contract/sealed-inheritance" | "CS0509" => Self::SealedInheritance,
            "contract/missing-enum-member" | "CS0117" => Self::MissingEnumMember,
            "forge/cancelled" => Self::Cancelled,
            // Unresolved type or namespace: usually a missing import
            "CS0246" | "CS0103" => Self::MissingUsing,
            // Ambiguous reference between namespaces
            "CS0104" | "CS0121" => Self::AmbiguousReference,
            // Duplicate type or member definitions
            "CS0101" | "CS0111" | "CS0102" => Self::SymbolCollision,
            // Unimplemented interface member / missing abstract override
            "CS0535" | "CS0534" => Self::MissingInterfaceMember,
            // Signature does not match the declared contract
            "CS0508" | "CS0462" | "CS1715" => Self::SignatureMismatch,
            _ => Self::Other,
        }
    }

    /// Whether the repairer owns a deterministic transform for this category
    pub fn is_auto_fixable(&self) -> bool {
        matches!(
            self,
            Self::MissingUsing
                | Self::AmbiguousReference
                | Self::SymbolCollision
                | Self::MissingInterfaceMember
                | Self::SealedInheritance
        )
    }
}

/// A single validator or contract-check finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Validator-specific code, e.g. `CS0246` or `contract/redefine`
    pub code: String,
    pub message: String,
    pub location: Option<SourceLocation>,
    /// Derived from `code` at construction
    pub category: DiagnosticCategory,
}

impl Diagnostic {
    /// Create a diagnostic, deriving the category from the code
    pub fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let category = DiagnosticCategory::from_code(&code);
        Self {
            severity,
            code,
            message: message.into(),
            location: None,
            category,
        }
    }

    /// Create an error diagnostic
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    /// Create a warning diagnostic
    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    /// Attach a source location
    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.location = Some(SourceLocation { line, column });
        self
    }

    /// The diagnostic emitted for a task cancelled mid-flight
    pub fn cancelled() -> Self {
        Self::error("forge/cancelled", "task execution was cancelled")
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "{} {} at {}:{}: {}",
                self.severity, self.code, loc.line, loc.column, self.message
            ),
            None => write!(f, "{} {}: {}", self.severity, self.code, self.message),
        }
    }
}
