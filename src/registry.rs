//! Symbol registry
//!
//! Cross-task tracking of defined types and members. Workers register
//! symbols as tasks complete; readers get a consistent snapshot under a
//! multi-reader/single-writer lock. Registration and ambiguity indexing are
//! one atomic step.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Collision, CollisionKind, ConventionViolation, Symbol, SymbolKind};

/// Result of a registration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Symbol inserted; no simple-name collision
    Registered,
    /// Symbol inserted; a cross-namespace collision was recorded
    RegisteredWithCollision(CollisionKind),
    /// Fully-qualified name already taken; not inserted
    Rejected,
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_fqn: BTreeMap<String, Symbol>,
    /// Simple name -> fully-qualified names, in registration order
    by_simple: BTreeMap<String, Vec<String>>,
    by_task: BTreeMap<String, Vec<String>>,
    collisions: Vec<Collision>,
}

/// Serializable snapshot of the registry for checkpoints and reports
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub symbols: Vec<Symbol>,
    pub collisions: Vec<Collision>,
}

/// Concurrent registry of symbols defined across tasks
#[derive(Debug, Default)]
pub struct SymbolRegistry {
    inner: RwLock<RegistryInner>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a registry from a checkpoint snapshot
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        let registry = Self::new();
        {
            let mut inner = registry.inner.write();
            for symbol in snapshot.symbols {
                let fqn = symbol.fully_qualified_name.clone();
                inner
                    .by_simple
                    .entry(symbol.simple_name.clone())
                    .or_default()
                    .push(fqn.clone());
                inner
                    .by_task
                    .entry(symbol.source_task_id.clone())
                    .or_default()
                    .push(fqn.clone());
                inner.by_fqn.insert(fqn, symbol);
            }
            inner.collisions = snapshot.collisions;
        }
        registry
    }

    /// Insert a symbol unless its fully-qualified name is taken
    ///
    /// Simple-name collisions with other namespaces are classified and
    /// recorded but do not block the insert.
    pub fn try_register(&self, symbol: Symbol) -> RegisterOutcome {
        let mut inner = self.inner.write();

        if let Some(existing) = inner.by_fqn.get(&symbol.fully_qualified_name) {
            let collision = Collision {
                kind: CollisionKind::DuplicateDefinition,
                simple_name: symbol.simple_name.clone(),
                existing: existing.fully_qualified_name.clone(),
                existing_task_id: existing.source_task_id.clone(),
                incoming: symbol.fully_qualified_name.clone(),
                incoming_task_id: symbol.source_task_id.clone(),
            };
            debug!(symbol = %symbol.fully_qualified_name, "duplicate definition rejected");
            inner.collisions.push(collision);
            return RegisterOutcome::Rejected;
        }

        let collision_kind = inner
            .by_simple
            .get(&symbol.simple_name)
            .and_then(|fqns| fqns.first())
            .and_then(|fqn| inner.by_fqn.get(fqn))
            .map(|existing| classify_collision(existing, &symbol));

        let fqn = symbol.fully_qualified_name.clone();
        if let Some(kind) = collision_kind {
            let existing_fqn = inner.by_simple[&symbol.simple_name][0].clone();
            let existing_task = inner.by_fqn[&existing_fqn].source_task_id.clone();
            inner.collisions.push(Collision {
                kind,
                simple_name: symbol.simple_name.clone(),
                existing: existing_fqn,
                existing_task_id: existing_task,
                incoming: fqn.clone(),
                incoming_task_id: symbol.source_task_id.clone(),
            });
            debug!(symbol = %fqn, kind = %kind, "simple-name collision recorded");
        }

        inner
            .by_simple
            .entry(symbol.simple_name.clone())
            .or_default()
            .push(fqn.clone());
        inner
            .by_task
            .entry(symbol.source_task_id.clone())
            .or_default()
            .push(fqn.clone());
        inner.by_fqn.insert(fqn, symbol);

        match collision_kind {
            Some(kind) => RegisterOutcome::RegisteredWithCollision(kind),
            None => RegisterOutcome::Registered,
        }
    }

    /// Compact textual block of registered types for prompt injection
    ///
    /// Members (methods, properties) are excluded; the block lists what
    /// exists so generation does not redefine it.
    pub fn known_types_block(&self) -> String {
        let inner = self.inner.read();
        let mut by_namespace: BTreeMap<&str, Vec<&Symbol>> = BTreeMap::new();
        for symbol in inner.by_fqn.values() {
            if matches!(symbol.kind, SymbolKind::Type | SymbolKind::Interface | SymbolKind::Enum) {
                by_namespace.entry(symbol.namespace.as_str()).or_default().push(symbol);
            }
        }
        let mut out = String::new();
        for (namespace, symbols) in by_namespace {
            if namespace.is_empty() {
                out.push_str("namespace <global>:\n");
            } else {
                out.push_str(&format!("namespace {}:\n", namespace));
            }
            for symbol in symbols {
                out.push_str(&format!("  {} {}\n", symbol.kind, symbol.simple_name));
            }
        }
        out
    }

    /// Pick the fully-qualified name a bare simple name should resolve to
    ///
    /// Preference order: the preferred namespace, then a `Models` namespace,
    /// then the first registration.
    pub fn suggest_alias(&self, simple_name: &str, preferred_namespace: &str) -> Option<String> {
        let inner = self.inner.read();
        let fqns = inner.by_simple.get(simple_name)?;
        if let Some(preferred) = fqns
            .iter()
            .find(|fqn| inner.by_fqn[*fqn].namespace == preferred_namespace)
        {
            return Some(preferred.clone());
        }
        if let Some(models) = fqns.iter().find(|fqn| inner.by_fqn[*fqn].namespace_tail() == "Models") {
            return Some(models.clone());
        }
        fqns.first().cloned()
    }

    /// Naming-convention violations for a symbol
    pub fn validate_conventions(&self, symbol: &Symbol) -> Vec<ConventionViolation> {
        let mut violations = Vec::new();
        if symbol.kind == SymbolKind::Interface && !symbol.simple_name.starts_with('I') {
            violations.push(ConventionViolation::InterfaceWithoutPrefix {
                fully_qualified_name: symbol.fully_qualified_name.clone(),
            });
        }
        if symbol.looks_like_model() && !symbol.is_request_response() && symbol.namespace_tail() != "Models" {
            violations.push(ConventionViolation::ModelOutsideModels {
                fully_qualified_name: symbol.fully_qualified_name.clone(),
            });
        }
        violations
    }

    /// All recorded collisions
    pub fn collisions(&self) -> Vec<Collision> {
        self.inner.read().collisions.clone()
    }

    /// Distinct ambiguous simple names with their suggested resolution
    pub fn alias_suggestions(&self, preferred_namespace: &str) -> Vec<(String, String)> {
        let names: Vec<String> = {
            let inner = self.inner.read();
            let mut names: Vec<String> = inner
                .collisions
                .iter()
                .filter(|c| c.kind == CollisionKind::AmbiguousName)
                .map(|c| c.simple_name.clone())
                .collect();
            names.sort();
            names.dedup();
            names
        };
        names
            .into_iter()
            .filter_map(|name| self.suggest_alias(&name, preferred_namespace).map(|fqn| (name, fqn)))
            .collect()
    }

    /// Fully-qualified names registered by a task
    pub fn symbols_for_task(&self, task_id: &str) -> Vec<String> {
        self.inner.read().by_task.get(task_id).cloned().unwrap_or_default()
    }

    pub fn get(&self, fully_qualified_name: &str) -> Option<Symbol> {
        self.inner.read().by_fqn.get(fully_qualified_name).cloned()
    }

    pub fn contains_simple_name(&self, name: &str) -> bool {
        self.inner.read().by_simple.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_fqn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_fqn.is_empty()
    }

    /// Consistent snapshot for checkpointing
    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.read();
        RegistrySnapshot {
            symbols: inner.by_fqn.values().cloned().collect(),
            collisions: inner.collisions.clone(),
        }
    }
}

/// Classify a simple-name collision between two symbols in different namespaces
fn classify_collision(existing: &Symbol, incoming: &Symbol) -> CollisionKind {
    if existing.namespace == incoming.namespace {
        return CollisionKind::DuplicateDefinition;
    }
    let services_involved =
        existing.namespace.ends_with("Services") || incoming.namespace.ends_with("Services");
    if incoming.looks_like_model()
        && incoming.namespace_tail() != "Models"
        && services_involved
        && !incoming.is_request_response()
    {
        return CollisionKind::MisplacedModel;
    }
    CollisionKind::AmbiguousName
}
