//! Contract catalog
//!
//! Built once between decomposition and execution, then frozen. After the
//! freeze the catalog is read-only for the rest of the run, which is what
//! lets workers consult it concurrently without locks: every prompt embeds
//! contract signatures verbatim and the repair loop validates against them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{Contract, now_ms};

/// Catalog mutation errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog is frozen; cannot register '{0}'")]
    Frozen(String),

    #[error("contract '{0}' is already registered")]
    DuplicateContract(String),
}

/// Frozen registry of shared type contracts, indexed by fully-qualified name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractCatalog {
    contracts: BTreeMap<String, Contract>,
    /// Index from simple name to fully-qualified names carrying it
    simple_names: BTreeMap<String, Vec<String>>,
    frozen_at: Option<i64>,
}

impl ContractCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contract; fails once frozen or on a duplicate name
    pub fn register(&mut self, contract: Contract) -> Result<(), CatalogError> {
        let fqn = contract.fully_qualified_name();
        if self.frozen_at.is_some() {
            return Err(CatalogError::Frozen(fqn));
        }
        if self.contracts.contains_key(&fqn) {
            return Err(CatalogError::DuplicateContract(fqn));
        }
        debug!(contract = %fqn, variant = contract.kind.variant_name(), "registering contract");
        self.simple_names
            .entry(contract.name.clone())
            .or_default()
            .push(fqn.clone());
        self.contracts.insert(fqn, contract);
        Ok(())
    }

    /// Freeze the catalog, stamping every contract
    ///
    /// Idempotent: a second freeze keeps the original stamp.
    pub fn freeze(&mut self) -> i64 {
        if let Some(stamp) = self.frozen_at {
            return stamp;
        }
        let stamp = now_ms();
        self.frozen_at = Some(stamp);
        for contract in self.contracts.values_mut() {
            contract.frozen_at = Some(stamp);
        }
        info!(contracts = self.contracts.len(), "contract catalog frozen");
        stamp
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }

    pub fn frozen_at(&self) -> Option<i64> {
        self.frozen_at
    }

    pub fn contains(&self, fully_qualified_name: &str) -> bool {
        self.contracts.contains_key(fully_qualified_name)
    }

    /// Whether any contract carries this simple name
    pub fn contains_simple_name(&self, name: &str) -> bool {
        self.simple_names.contains_key(name)
    }

    pub fn get(&self, fully_qualified_name: &str) -> Option<&Contract> {
        self.contracts.get(fully_qualified_name)
    }

    /// Resolve a simple name to its contract, if unambiguous or first match
    pub fn resolve_simple_name(&self, name: &str) -> Option<&Contract> {
        self.simple_names
            .get(name)
            .and_then(|fqns| fqns.first())
            .and_then(|fqn| self.contracts.get(fqn))
    }

    pub fn all(&self) -> impl Iterator<Item = &Contract> {
        self.contracts.values()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// Signature block for prompt injection: every contract's rendered form
    pub fn render_all(&self) -> String {
        self.contracts
            .values()
            .map(|c| c.render())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Machine-readable manifest of the frozen catalog
    pub fn render_manifest(&self) -> String {
        let entries: Vec<serde_json::Value> = self
            .contracts
            .values()
            .map(|c| {
                serde_json::json!({
                    "name": c.name,
                    "namespace": c.namespace,
                    "fully_qualified_name": c.fully_qualified_name(),
                    "variant": c.kind.variant_name(),
                    "source_task_id": c.source_task_id,
                    "frozen_at": c.frozen_at,
                })
            })
            .collect();
        serde_json::to_string_pretty(&serde_json::json!({
            "frozen_at": self.frozen_at,
            "contracts": entries,
        }))
        .unwrap_or_default()
    }
}
