//! Merge engine
//!
//! Combines validated per-task fragments into one corpus. Declared types are
//! parsed into a merge-scoped registry; colliding fully-qualified names
//! produce conflict records with a suggested resolution, applied
//! automatically in non-interactive runs. The merger is idempotent on its
//! own output.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::ContractCatalog;
use crate::domain::Diagnostic;
use crate::parse::{parse_fragment, MemberDecl, TypeDecl, TypeDeclKind};
use crate::registry::SymbolRegistry;
use crate::repair::Repairer;

/// Suggested resolution for a merge conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionKind {
    /// Identical shapes: the first definition stands
    KeepFirst,
    /// Disjoint members: re-emit one combined declaration
    MergeAsPartial,
    /// Same signatures, different bodies: drop the second
    RemoveDuplicate,
    /// Incompatible definitions: cannot be auto-merged
    FailFast,
}

impl std::fmt::Display for ResolutionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeepFirst => write!(f, "keep-first"),
            Self::MergeAsPartial => write!(f, "merge-as-partial"),
            Self::RemoveDuplicate => write!(f, "remove-duplicate"),
            Self::FailFast => write!(f, "fail-fast"),
        }
    }
}

/// A collision between two artifact definitions of one type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub fully_qualified_name: String,
    pub first_task_id: String,
    pub second_task_id: String,
    pub resolution: ResolutionKind,
    /// False when the suggestion was fail-fast and the second definition
    /// was dropped unmerged
    pub resolved: bool,
    pub detail: String,
}

/// Result of one merge pass
#[derive(Debug, Clone, Default)]
pub struct MergeOutput {
    pub corpus: String,
    pub conflicts: Vec<Conflict>,
}

impl MergeOutput {
    pub fn unresolved(&self) -> Vec<&Conflict> {
        self.conflicts.iter().filter(|c| !c.resolved).collect()
    }
}

struct Entry {
    decl: TypeDecl,
    task_id: String,
    /// Dedented declaration text
    text: String,
}

/// Combines fragments and resolves type-level conflicts
pub struct Merger {
    repairer: Repairer,
}

impl Merger {
    pub fn new(catalog: Arc<ContractCatalog>, registry: Arc<SymbolRegistry>) -> Self {
        Self {
            repairer: Repairer::new(catalog, registry),
        }
    }

    /// Merge fragments into one corpus
    ///
    /// `fragments` pairs each validated task id with its final source.
    pub fn merge(&self, fragments: &[(String, String)]) -> MergeOutput {
        let mut usings: BTreeSet<String> = BTreeSet::new();
        let mut order: Vec<String> = Vec::new();
        let mut by_fqn: BTreeMap<String, Entry> = BTreeMap::new();
        let mut conflicts = Vec::new();

        for (task_id, source) in fragments {
            let fragment = parse_fragment(source);
            usings.extend(fragment.usings);
            for decl in fragment.types {
                let text = dedent(&extract_lines(source, decl.start_line, decl.end_line));
                let fqn = decl.fully_qualified_name();
                let incoming = Entry {
                    decl,
                    task_id: task_id.clone(),
                    text,
                };
                match by_fqn.get_mut(&fqn) {
                    None => {
                        order.push(fqn.clone());
                        by_fqn.insert(fqn, incoming);
                    }
                    Some(existing) => {
                        let conflict = resolve_conflict(&fqn, existing, &incoming);
                        debug!(
                            type_name = %fqn,
                            resolution = %conflict.resolution,
                            resolved = conflict.resolved,
                            "merge conflict"
                        );
                        if conflict.resolution == ResolutionKind::MergeAsPartial {
                            merge_as_partial(existing, &incoming);
                        }
                        if !conflict.resolved {
                            warn!(type_name = %fqn, "unresolvable merge conflict; first definition kept");
                        }
                        conflicts.push(conflict);
                    }
                }
            }
        }

        let corpus = self.emit(&usings, &order, &by_fqn);
        let corpus = self.post_merge_fixes(corpus, &order, &by_fqn);

        info!(
            types = order.len(),
            conflicts = conflicts.len(),
            "merge complete"
        );
        MergeOutput { corpus, conflicts }
    }

    /// Emit fragments grouped by namespace, imports deduped and sorted
    fn emit(&self, usings: &BTreeSet<String>, order: &[String], by_fqn: &BTreeMap<String, Entry>) -> String {
        let mut out = String::new();
        for using in usings {
            out.push_str(&format!("using {};\n", using));
        }
        if !usings.is_empty() {
            out.push('\n');
        }

        // Namespaces in first-seen order, types in first-seen order within
        let mut namespace_order: Vec<&str> = Vec::new();
        let mut grouped: BTreeMap<&str, Vec<&Entry>> = BTreeMap::new();
        for fqn in order {
            let entry = &by_fqn[fqn];
            let namespace = entry.decl.namespace.as_str();
            if !grouped.contains_key(namespace) {
                namespace_order.push(namespace);
            }
            grouped.entry(namespace).or_default().push(entry);
        }

        let mut first_block = true;
        for namespace in namespace_order {
            if !first_block {
                out.push('\n');
            }
            first_block = false;
            let entries = &grouped[namespace];
            if namespace.is_empty() {
                for (idx, entry) in entries.iter().enumerate() {
                    if idx > 0 {
                        out.push('\n');
                    }
                    out.push_str(&entry.text);
                    if !entry.text.ends_with('\n') {
                        out.push('\n');
                    }
                }
            } else {
                out.push_str(&format!("namespace {}\n{{\n", namespace));
                for (idx, entry) in entries.iter().enumerate() {
                    if idx > 0 {
                        out.push('\n');
                    }
                    out.push_str(&indent(&entry.text, 4));
                }
                out.push_str("}\n");
            }
        }
        out
    }

    /// Qualify ambiguous simple names in the merged corpus
    fn post_merge_fixes(&self, corpus: String, order: &[String], by_fqn: &BTreeMap<String, Entry>) -> String {
        let mut by_simple: BTreeMap<&str, usize> = BTreeMap::new();
        for fqn in order {
            *by_simple.entry(by_fqn[fqn].decl.name.as_str()).or_default() += 1;
        }
        let mut current = corpus;
        for (simple, count) in by_simple {
            if count < 2 {
                continue;
            }
            let diagnostic = Diagnostic::error("CS0104", format!("'{}' is an ambiguous reference", simple));
            let outcome = self.repairer.try_fix(&current, &diagnostic, "");
            if outcome.applied {
                debug!(name = %simple, "qualified ambiguous references after merge");
                current = outcome.source;
            }
        }
        current
    }
}

/// Decide how two definitions of the same fully-qualified name combine
fn resolve_conflict(fqn: &str, first: &Entry, second: &Entry) -> Conflict {
    let conflict = |resolution: ResolutionKind, resolved: bool, detail: String| Conflict {
        fully_qualified_name: fqn.to_string(),
        first_task_id: first.task_id.clone(),
        second_task_id: second.task_id.clone(),
        resolution,
        resolved,
        detail,
    };

    if first.decl.kind != second.decl.kind {
        return conflict(
            ResolutionKind::FailFast,
            false,
            format!("kind mismatch: {:?} vs {:?}", first.decl.kind, second.decl.kind),
        );
    }

    match first.decl.kind {
        TypeDeclKind::Enum | TypeDeclKind::Interface => {
            if signatures(&first.decl) == signatures(&second.decl) {
                conflict(ResolutionKind::KeepFirst, true, "identical signature".to_string())
            } else {
                conflict(
                    ResolutionKind::FailFast,
                    false,
                    "member signatures differ".to_string(),
                )
            }
        }
        TypeDeclKind::Class | TypeDeclKind::Record | TypeDeclKind::Struct => {
            let first_names: BTreeSet<&str> = first.decl.members.iter().map(|m| m.name.as_str()).collect();
            let shared: Vec<&MemberDecl> = second
                .decl
                .members
                .iter()
                .filter(|m| first_names.contains(m.name.as_str()))
                .collect();
            if shared.is_empty() {
                return conflict(ResolutionKind::MergeAsPartial, true, "disjoint members".to_string());
            }
            let signatures_match = shared.iter().all(|second_member| {
                first
                    .decl
                    .members
                    .iter()
                    .any(|m| m.name == second_member.name && m.signature == second_member.signature)
            });
            if signatures_match {
                conflict(
                    ResolutionKind::RemoveDuplicate,
                    true,
                    "overlapping members share signatures".to_string(),
                )
            } else {
                conflict(
                    ResolutionKind::FailFast,
                    false,
                    "overlapping members with different signatures".to_string(),
                )
            }
        }
    }
}

/// Ordered member signatures of a declaration
fn signatures(decl: &TypeDecl) -> Vec<&str> {
    decl.members.iter().map(|m| m.signature.as_str()).collect()
}

/// Re-emit one combined declaration from two partial class definitions
fn merge_as_partial(first: &mut Entry, second: &Entry) {
    let header = first
        .text
        .lines()
        .next()
        .unwrap_or_default()
        .trim_end()
        .trim_end_matches('{')
        .trim_end()
        .to_string();

    let mut out = format!("{}\n{{\n", header);
    for member in &first.decl.members {
        out.push_str(&indent(&dedent(&member.text), 4));
    }
    let first_names: BTreeSet<&str> = first.decl.members.iter().map(|m| m.name.as_str()).collect();
    let mut added: Vec<MemberDecl> = Vec::new();
    for member in &second.decl.members {
        if !first_names.contains(member.name.as_str()) {
            out.push_str(&indent(&dedent(&member.text), 4));
            added.push(member.clone());
        }
    }
    out.push_str("}\n");

    first.text = out;
    first.decl.members.extend(added);
}

fn extract_lines(source: &str, start: usize, end: usize) -> String {
    source
        .lines()
        .skip(start)
        .take(end.saturating_sub(start) + 1)
        .collect::<Vec<_>>()
        .join("\n")
}

fn dedent(text: &str) -> String {
    let min_indent = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    text.lines()
        .map(|line| if line.len() >= min_indent { &line[min_indent..] } else { line.trim_start() })
        .collect::<Vec<_>>()
        .join("\n")
        + "\n"
}

fn indent(text: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    text.lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        + "\n"
}
