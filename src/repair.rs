//! Deterministic repair transforms
//!
//! Each fix is a pure function from (source, diagnostic) to a possibly
//! rewritten source. Fixes never consult the LLM; anything they cannot close
//! passes through to the regeneration step. Repeated application on already
//! clean input is the identity.

use std::sync::Arc;

use tracing::debug;

use crate::catalog::ContractCatalog;
use crate::domain::{Diagnostic, DiagnosticCategory};
use crate::parse::{parse_fragment, TypeDecl};
use crate::registry::SymbolRegistry;

/// Result of one fix attempt
#[derive(Debug, Clone)]
pub struct FixOutcome {
    pub source: String,
    pub applied: bool,
}

impl FixOutcome {
    fn unchanged(source: &str) -> Self {
        Self {
            source: source.to_string(),
            applied: false,
        }
    }

    fn rewritten(source: String) -> Self {
        Self { source, applied: true }
    }
}

/// Result of a full repair pass over one diagnostic set
#[derive(Debug, Clone)]
pub struct RepairResult {
    pub source: String,
    /// Diagnostics no fix applied to
    pub remaining: Vec<Diagnostic>,
    pub fixes_applied: u32,
}

/// Applies deterministic fixes using the frozen catalog and the registry
pub struct Repairer {
    catalog: Arc<ContractCatalog>,
    registry: Arc<SymbolRegistry>,
}

impl Repairer {
    pub fn new(catalog: Arc<ContractCatalog>, registry: Arc<SymbolRegistry>) -> Self {
        Self { catalog, registry }
    }

    /// Attempt one fix for one diagnostic
    pub fn try_fix(&self, source: &str, diagnostic: &Diagnostic, task_namespace: &str) -> FixOutcome {
        match diagnostic.category {
            DiagnosticCategory::MissingUsing => self.fix_missing_using(source, diagnostic),
            DiagnosticCategory::AmbiguousReference => self.fix_ambiguous_reference(source, diagnostic, task_namespace),
            DiagnosticCategory::SymbolCollision => fix_duplicate_declaration(source, diagnostic),
            DiagnosticCategory::MissingInterfaceMember => self.fix_missing_member(source, diagnostic),
            DiagnosticCategory::SealedInheritance => fix_sealed_inheritance(source, diagnostic),
            _ => FixOutcome::unchanged(source),
        }
    }

    /// Apply fixes for every auto-fixable diagnostic in order
    ///
    /// Returns the rewritten source, the diagnostics that had no applicable
    /// fix, and the number of fixes applied.
    pub fn repair_all(&self, source: &str, diagnostics: &[Diagnostic], task_namespace: &str) -> RepairResult {
        let mut current = source.to_string();
        let mut remaining = Vec::new();
        let mut fixes_applied = 0;

        for diagnostic in diagnostics {
            let outcome = self.try_fix(&current, diagnostic, task_namespace);
            if outcome.applied {
                debug!(code = %diagnostic.code, category = %diagnostic.category, "auto-fix applied");
                current = outcome.source;
                fixes_applied += 1;
            } else {
                remaining.push(diagnostic.clone());
            }
        }

        RepairResult {
            source: current,
            remaining,
            fixes_applied,
        }
    }

    /// One-line fix suggestion fed back to the LLM for residual diagnostics
    pub fn suggestion_for(&self, diagnostic: &Diagnostic, task_namespace: &str) -> String {
        let names = quoted_names(&diagnostic.message);
        match diagnostic.category {
            DiagnosticCategory::MissingUsing => match names.first() {
                Some(name) => format!("add a using directive for the namespace defining '{}'", name),
                None => "add the missing using directive".to_string(),
            },
            DiagnosticCategory::AmbiguousReference => match names.first() {
                Some(name) => {
                    let alias = self
                        .registry
                        .suggest_alias(name, task_namespace)
                        .unwrap_or_else(|| name.clone());
                    format!("qualify '{}' as '{}'", name, alias)
                }
                None => "fully qualify the ambiguous reference".to_string(),
            },
            DiagnosticCategory::MissingInterfaceMember => {
                format!("implement the missing member exactly as signed: {}", diagnostic.message)
            }
            DiagnosticCategory::SignatureMismatch => {
                format!("match the contract signature exactly: {}", diagnostic.message)
            }
            DiagnosticCategory::MissingEnumMember => {
                "use only the enum members defined by the frozen contract".to_string()
            }
            DiagnosticCategory::SealedInheritance => {
                "do not inherit from the sealed type; wrap it as a private field instead".to_string()
            }
            DiagnosticCategory::SymbolCollision => {
                "remove the duplicate definition; the first occurrence is authoritative".to_string()
            }
            _ => diagnostic.message.clone(),
        }
    }

    /// Insert the missing import, sorted and deduplicated
    fn fix_missing_using(&self, source: &str, diagnostic: &Diagnostic) -> FixOutcome {
        let Some(name) = quoted_names(&diagnostic.message).into_iter().next() else {
            return FixOutcome::unchanged(source);
        };
        let namespace = self
            .registry
            .suggest_alias(&name, "")
            .map(|fqn| parent_namespace(&fqn))
            .or_else(|| {
                self.catalog
                    .resolve_simple_name(&name)
                    .map(|c| c.namespace.clone())
            })
            .filter(|ns| !ns.is_empty());
        let Some(namespace) = namespace else {
            return FixOutcome::unchanged(source);
        };

        let fragment = parse_fragment(source);
        if fragment.usings.iter().any(|u| *u == namespace) {
            return FixOutcome::unchanged(source);
        }

        let mut usings = fragment.usings.clone();
        usings.push(namespace);
        usings.sort();
        usings.dedup();

        // Re-emit: new using block, then everything that is not a using line
        let body: Vec<&str> = source
            .lines()
            .filter(|line| parse_using_line(line).is_none())
            .collect();
        let mut out = String::new();
        for using in &usings {
            out.push_str(&format!("using {};\n", using));
        }
        let body_text = body.join("\n");
        let body_text = body_text.trim_start_matches('\n');
        if !body_text.trim().is_empty() {
            out.push('\n');
            out.push_str(body_text);
        }
        if !out.ends_with('\n') {
            out.push('\n');
        }
        FixOutcome::rewritten(out)
    }

    /// Replace a bare ambiguous name with its suggested fully-qualified form
    fn fix_ambiguous_reference(&self, source: &str, diagnostic: &Diagnostic, task_namespace: &str) -> FixOutcome {
        let Some(name) = quoted_names(&diagnostic.message).into_iter().next() else {
            return FixOutcome::unchanged(source);
        };
        let Some(alias) = self.registry.suggest_alias(&name, task_namespace) else {
            return FixOutcome::unchanged(source);
        };
        if alias == name {
            return FixOutcome::unchanged(source);
        }

        let mut changed = false;
        let rewritten: Vec<String> = source
            .lines()
            .map(|line| {
                // Leave imports and declarations of the name itself alone
                if parse_using_line(line).is_some() || is_declaration_of(line, &name) {
                    return line.to_string();
                }
                let (new_line, line_changed) = replace_bare_identifier(line, &name, &alias);
                changed |= line_changed;
                new_line
            })
            .collect();

        if changed {
            FixOutcome::rewritten(rewritten.join("\n") + "\n")
        } else {
            FixOutcome::unchanged(source)
        }
    }

    /// Insert a stub for a missing interface or abstract member
    ///
    /// The signature is copied verbatim from the contract; the body throws
    /// the not-implemented sentinel. Abstract overrides get the override
    /// modifier.
    fn fix_missing_member(&self, source: &str, diagnostic: &Diagnostic) -> FixOutcome {
        let names = quoted_names(&diagnostic.message);
        // Expected shape: 'TypeName' ... 'IContract.Member(...)'
        let Some(member_ref) = names.iter().find(|n| n.contains('.')) else {
            return FixOutcome::unchanged(source);
        };
        let (contract_name, member_part) = member_ref.split_once('.').unwrap_or(("", ""));
        let member_name = member_part.split('(').next().unwrap_or(member_part);

        let Some(contract) = self.catalog.resolve_simple_name(contract_name) else {
            return FixOutcome::unchanged(source);
        };
        let Some(signature) = contract.find_method(member_name) else {
            return FixOutcome::unchanged(source);
        };

        let fragment = parse_fragment(source);
        let target = names
            .first()
            .and_then(|type_name| fragment.types.iter().find(|t| t.name == *type_name))
            .or_else(|| fragment.types.first());
        let Some(target) = target else {
            return FixOutcome::unchanged(source);
        };

        let is_override = diagnostic.code == "CS0534" || diagnostic.message.contains("abstract");
        let modifier = if is_override { "public override" } else { "public" };
        let indent = member_indent(target, source);
        let stub = format!(
            "{}{} {} => throw new NotImplementedException();",
            indent,
            modifier,
            signature.render()
        );

        let mut lines: Vec<String> = source.lines().map(String::from).collect();
        if target.end_line >= lines.len() {
            return FixOutcome::unchanged(source);
        }
        lines.insert(target.end_line, stub);
        FixOutcome::rewritten(lines.join("\n") + "\n")
    }
}

/// Remove the second occurrence of a duplicated type or member
fn fix_duplicate_declaration(source: &str, diagnostic: &Diagnostic) -> FixOutcome {
    let Some(name) = quoted_names(&diagnostic.message).into_iter().next() else {
        return FixOutcome::unchanged(source);
    };
    let fragment = parse_fragment(source);

    // Duplicate type declarations: keep the first by lexical position
    let type_decls: Vec<&TypeDecl> = fragment.types.iter().filter(|t| t.name == name).collect();
    if type_decls.len() >= 2 {
        return FixOutcome::rewritten(remove_lines(source, type_decls[1].start_line, type_decls[1].end_line));
    }

    // Duplicate members within one type
    for type_decl in &fragment.types {
        let members: Vec<_> = type_decl.members.iter().filter(|m| m.name == name).collect();
        if members.len() >= 2 {
            return FixOutcome::rewritten(remove_lines(source, members[1].start_line, members[1].end_line));
        }
    }

    FixOutcome::unchanged(source)
}

/// Rewrite sealed-type inheritance into composition
///
/// `class X : Sealed` becomes `class X` with a private field of the sealed
/// type. No members are delegated; the caller adds delegation.
fn fix_sealed_inheritance(source: &str, diagnostic: &Diagnostic) -> FixOutcome {
    let names = quoted_names(&diagnostic.message);
    let Some(sealed_fqn) = names.last() else {
        return FixOutcome::unchanged(source);
    };
    let sealed_name = sealed_fqn.rsplit('.').next().unwrap_or(sealed_fqn);

    let fragment = parse_fragment(source);
    let Some(target) = fragment
        .types
        .iter()
        .find(|t| t.base_types.iter().any(|b| b == sealed_name || b.ends_with(&format!(".{}", sealed_name))))
    else {
        return FixOutcome::unchanged(source);
    };

    let mut lines: Vec<String> = source.lines().map(String::from).collect();
    let header = &lines[target.start_line];

    // Drop the sealed type from the base clause
    let Some((head, clause)) = header.split_once(':') else {
        return FixOutcome::unchanged(source);
    };
    let trailing_brace = clause.trim_end().ends_with('{');
    let kept: Vec<String> = clause
        .trim_end()
        .trim_end_matches('{')
        .split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| {
            !part.is_empty() && part != sealed_name && !part.ends_with(&format!(".{}", sealed_name))
        })
        .collect();
    let mut new_header = if kept.is_empty() {
        head.trim_end().to_string()
    } else {
        format!("{}: {}", head, kept.join(", "))
    };
    if trailing_brace {
        new_header.push_str(" {");
    }
    lines[target.start_line] = new_header;

    // Wrap the sealed type as a field after the opening brace
    let indent = member_indent(target, source);
    let field_name = format!("_{}", lowercase_first(sealed_name));
    let field = format!(
        "{}private readonly {} {} = new {}();",
        indent, sealed_name, field_name, sealed_name
    );
    let brace_line = (target.start_line..=target.end_line.min(lines.len() - 1))
        .find(|idx| lines[*idx].contains('{'))
        .unwrap_or(target.start_line);
    lines.insert(brace_line + 1, field);

    FixOutcome::rewritten(lines.join("\n") + "\n")
}

/// Names in single quotes within a diagnostic message
fn quoted_names(message: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = message;
    while let Some(start) = rest.find('\'') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('\'') else { break };
        names.push(after[..end].to_string());
        rest = &after[end + 1..];
    }
    names
}

fn parse_using_line(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix("using ")?;
    if rest.contains('=') || rest.starts_with('(') || rest.starts_with("var ") {
        return None;
    }
    Some(rest.trim_end_matches(';').trim())
}

fn parent_namespace(fqn: &str) -> String {
    match fqn.rsplit_once('.') {
        Some((ns, _)) => ns.to_string(),
        None => String::new(),
    }
}

fn lowercase_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn is_declaration_of(line: &str, name: &str) -> bool {
    let trimmed = line.trim();
    ["class", "interface", "enum", "record", "struct"].iter().any(|kw| {
        trimmed
            .split_whitespace()
            .collect::<Vec<_>>()
            .windows(2)
            .any(|w| w[0] == *kw && w[1].trim_start_matches(|c: char| !c.is_alphanumeric()).starts_with(name))
    })
}

/// Replace bare (unqualified) occurrences of an identifier in a line
fn replace_bare_identifier(line: &str, name: &str, replacement: &str) -> (String, bool) {
    let bytes = line.as_bytes();
    let mut out = String::with_capacity(line.len());
    let mut changed = false;
    let mut i = 0;
    while i < line.len() {
        if line[i..].starts_with(name) {
            let before_ok = i == 0 || {
                let prev = bytes[i - 1] as char;
                !prev.is_alphanumeric() && prev != '_' && prev != '.'
            };
            let after_idx = i + name.len();
            let after_ok = after_idx >= line.len() || {
                let next = bytes[after_idx] as char;
                !next.is_alphanumeric() && next != '_'
            };
            if before_ok && after_ok {
                out.push_str(replacement);
                changed = true;
                i += name.len();
                continue;
            }
        }
        // Advance one full character, not one byte
        let ch = line[i..].chars().next().unwrap_or('\0');
        out.push(ch);
        i += ch.len_utf8();
    }
    (out, changed)
}

/// Indentation for members inserted into a type
fn member_indent(target: &TypeDecl, source: &str) -> String {
    let header_indent = source
        .lines()
        .nth(target.start_line)
        .map(|line| line.len() - line.trim_start().len())
        .unwrap_or(0);
    " ".repeat(header_indent + 4)
}

fn remove_lines(source: &str, start: usize, end: usize) -> String {
    let kept: Vec<&str> = source
        .lines()
        .enumerate()
        .filter(|(idx, _)| *idx < start || *idx > end)
        .map(|(_, line)| line)
        .collect();
    kept.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Contract, ContractKind, InterfaceContract, MethodSignature, Symbol, SymbolKind,
    };

    fn repairer_with(symbols: &[(&str, &str)], contracts: Vec<Contract>) -> Repairer {
        let registry = Arc::new(SymbolRegistry::new());
        for (namespace, name) in symbols {
            registry.try_register(Symbol::new(*namespace, *name, SymbolKind::Type, "t"));
        }
        let mut catalog = ContractCatalog::new();
        for contract in contracts {
            catalog.register(contract).unwrap();
        }
        catalog.freeze();
        Repairer::new(Arc::new(catalog), registry)
    }

    #[test]
    fn test_quoted_names() {
        assert_eq!(
            quoted_names("type 'Foo' conflicts with 'Bar.Baz'"),
            vec!["Foo", "Bar.Baz"]
        );
        assert!(quoted_names("no quotes here").is_empty());
    }

    #[test]
    fn test_fix_missing_using_inserts_sorted() {
        let repairer = repairer_with(&[("Shop.Models", "Order")], vec![]);
        let source = "using System;\n\nnamespace Shop.Services\n{\n    public class S\n    {\n        Order o;\n    }\n}\n";
        let diagnostic = Diagnostic::error("CS0246", "The type or namespace name 'Order' could not be found");

        let outcome = repairer.try_fix(source, &diagnostic, "Shop.Services");
        assert!(outcome.applied);
        let first_two: Vec<&str> = outcome.source.lines().take(2).collect();
        assert_eq!(first_two, vec!["using Shop.Models;", "using System;"]);
    }

    #[test]
    fn test_fix_missing_using_idempotent() {
        let repairer = repairer_with(&[("Shop.Models", "Order")], vec![]);
        let source = "using Shop.Models;\n\nclass S { Order o; }\n";
        let diagnostic = Diagnostic::error("CS0246", "The type or namespace name 'Order' could not be found");
        let outcome = repairer.try_fix(source, &diagnostic, "Shop.Services");
        assert!(!outcome.applied);
        assert_eq!(outcome.source, source);
    }

    #[test]
    fn test_fix_missing_using_unknown_name_passthrough() {
        let repairer = repairer_with(&[], vec![]);
        let diagnostic = Diagnostic::error("CS0246", "The type or namespace name 'Mystery' could not be found");
        let outcome = repairer.try_fix("class A {}\n", &diagnostic, "P");
        assert!(!outcome.applied);
    }

    #[test]
    fn test_fix_ambiguous_reference() {
        let repairer = repairer_with(&[("P.Models", "Result"), ("P.Services", "Result")], vec![]);
        let source = "class Handler\n{\n    Result Run(Result input) { return input; }\n}\n";
        let diagnostic = Diagnostic::error("CS0104", "'Result' is an ambiguous reference");

        let outcome = repairer.try_fix(source, &diagnostic, "P.Services");
        assert!(outcome.applied);
        assert!(outcome.source.contains("P.Services.Result Run(P.Services.Result input)"));
    }

    #[test]
    fn test_ambiguous_reference_skips_qualified() {
        let repairer = repairer_with(&[("P.Models", "Result"), ("P.Services", "Result")], vec![]);
        let source = "class H\n{\n    P.Models.Result r;\n}\n";
        let diagnostic = Diagnostic::error("CS0104", "'Result' is an ambiguous reference");
        let outcome = repairer.try_fix(source, &diagnostic, "P.Services");
        // The only occurrence is already qualified
        assert!(!outcome.applied);
    }

    #[test]
    fn test_fix_duplicate_member_keeps_first() {
        let repairer = repairer_with(&[], vec![]);
        let source = "class A\n{\n    public int X() { return 1; }\n    public int X() { return 2; }\n}\n";
        let diagnostic = Diagnostic::error("CS0111", "member 'X' is already defined");

        let outcome = repairer.try_fix(source, &diagnostic, "P");
        assert!(outcome.applied);
        assert!(outcome.source.contains("return 1;"));
        assert!(!outcome.source.contains("return 2;"));
    }

    #[test]
    fn test_fix_duplicate_type_keeps_first() {
        let repairer = repairer_with(&[], vec![]);
        let source = "class A\n{\n    public int First() { return 1; }\n}\nclass A\n{\n    public int Second() { return 2; }\n}\n";
        let diagnostic = Diagnostic::error("CS0101", "the namespace already contains a definition for 'A'");

        let outcome = repairer.try_fix(source, &diagnostic, "P");
        assert!(outcome.applied);
        assert!(outcome.source.contains("First"));
        assert!(!outcome.source.contains("Second"));
    }

    #[test]
    fn test_fix_missing_interface_member_copies_signature() {
        let contract = Contract::new(
            "P.Services",
            "IShape",
            "t0",
            ContractKind::Interface(InterfaceContract {
                methods: vec![MethodSignature::new("Area", "double").with_parameter("scale", "double")],
                ..Default::default()
            }),
        );
        let repairer = repairer_with(&[], vec![contract]);
        let source = "public class Circle : IShape\n{\n    public double Radius { get; set; }\n}\n";
        let diagnostic = Diagnostic::error("CS0535", "'Circle' does not implement interface member 'IShape.Area(double)'");

        let outcome = repairer.try_fix(source, &diagnostic, "P");
        assert!(outcome.applied);
        assert!(outcome
            .source
            .contains("public double Area(double scale) => throw new NotImplementedException();"));
        // Stub lands inside the class body
        let area_line = outcome.source.lines().position(|l| l.contains("Area")).unwrap();
        let close_line = outcome.source.lines().position(|l| l.trim() == "}").unwrap();
        assert!(area_line < close_line);
    }

    #[test]
    fn test_fix_missing_abstract_override() {
        use crate::domain::AbstractBaseContract;
        let contract = Contract::new(
            "P",
            "BaseHandler",
            "t0",
            ContractKind::AbstractBase(AbstractBaseContract {
                abstract_methods: vec![MethodSignature::new("Handle", "void").with_parameter("input", "string")],
                ..Default::default()
            }),
        );
        let repairer = repairer_with(&[], vec![contract]);
        let source = "public class MyHandler : BaseHandler\n{\n}\n";
        let diagnostic = Diagnostic::error(
            "CS0534",
            "'MyHandler' does not implement inherited abstract member 'BaseHandler.Handle(string)'",
        );

        let outcome = repairer.try_fix(source, &diagnostic, "P");
        assert!(outcome.applied);
        assert!(outcome
            .source
            .contains("public override void Handle(string input) => throw new NotImplementedException();"));
    }

    #[test]
    fn test_fix_sealed_inheritance_composes() {
        let repairer = repairer_with(&[], vec![]);
        let source = "public class Scheduler : Clock\n{\n    public void Tick() { }\n}\n";
        let diagnostic = Diagnostic::error("CS0509", "'Scheduler': cannot derive from sealed type 'Clock'");

        let outcome = repairer.try_fix(source, &diagnostic, "P");
        assert!(outcome.applied);
        assert!(outcome.source.contains("public class Scheduler\n"));
        assert!(outcome.source.contains("private readonly Clock _clock = new Clock();"));
    }

    #[test]
    fn test_fix_sealed_inheritance_keeps_other_bases() {
        let repairer = repairer_with(&[], vec![]);
        let source = "public class S : Clock, IDisposable\n{\n}\n";
        let diagnostic = Diagnostic::error("CS0509", "'S': cannot derive from sealed type 'Clock'");

        let outcome = repairer.try_fix(source, &diagnostic, "P");
        assert!(outcome.applied);
        assert!(outcome.source.contains("public class S : IDisposable"));
    }

    #[test]
    fn test_repair_all_collects_remaining() {
        let repairer = repairer_with(&[("P.Models", "Order")], vec![]);
        let source = "class S\n{\n    Order o;\n}\n";
        let diagnostics = vec![
            Diagnostic::error("CS0246", "The type or namespace name 'Order' could not be found"),
            Diagnostic::error("CS9999", "something opaque"),
        ];

        let result = repairer.repair_all(source, &diagnostics, "P");
        assert_eq!(result.fixes_applied, 1);
        assert_eq!(result.remaining.len(), 1);
        assert_eq!(result.remaining[0].code, "CS9999");
        assert!(result.source.starts_with("using P.Models;"));
    }

    #[test]
    fn test_repair_idempotent_on_clean_input() {
        let repairer = repairer_with(&[], vec![]);
        let source = "class A\n{\n}\n";
        let result = repairer.repair_all(source, &[], "P");
        assert_eq!(result.source, source);
        assert_eq!(result.fixes_applied, 0);
    }

    #[test]
    fn test_suggestion_for_ambiguous_reference() {
        let repairer = repairer_with(&[("P.Models", "Result"), ("P.Services", "Result")], vec![]);
        let diagnostic = Diagnostic::error("CS0104", "'Result' is an ambiguous reference");
        let suggestion = repairer.suggestion_for(&diagnostic, "P.Services");
        assert!(suggestion.contains("P.Services.Result"));
    }
}
