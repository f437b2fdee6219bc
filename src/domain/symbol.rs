//! Symbols and collisions tracked across tasks

use serde::{Deserialize, Serialize};

/// Kind of a registered symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Type,
    Interface,
    Enum,
    Method,
    Property,
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Type => write!(f, "type"),
            Self::Interface => write!(f, "interface"),
            Self::Enum => write!(f, "enum"),
            Self::Method => write!(f, "method"),
            Self::Property => write!(f, "property"),
        }
    }
}

/// A type or member defined by a completed task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub fully_qualified_name: String,
    pub simple_name: String,
    pub namespace: String,
    pub kind: SymbolKind,
    pub source_task_id: String,
    /// Signature text for methods and properties, empty for bare types
    pub signature: Option<String>,
}

impl Symbol {
    /// Create a symbol from namespace and simple name
    pub fn new(namespace: impl Into<String>, simple_name: impl Into<String>, kind: SymbolKind, task_id: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let simple_name = simple_name.into();
        let fully_qualified_name = if namespace.is_empty() {
            simple_name.clone()
        } else {
            format!("{}.{}", namespace, simple_name)
        };
        Self {
            fully_qualified_name,
            simple_name,
            namespace,
            kind,
            source_task_id: task_id.into(),
            signature: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// The last segment of the namespace, e.g. `Models` for `Shop.Models`
    pub fn namespace_tail(&self) -> &str {
        self.namespace.rsplit('.').next().unwrap_or("")
    }

    /// Whether the simple name looks like a DTO-style model type
    pub fn looks_like_model(&self) -> bool {
        ["Info", "Data", "Dto", "Model"]
            .iter()
            .any(|suffix| self.simple_name.ends_with(suffix))
    }

    /// Whether the name is a service-specific request/response shape
    pub fn is_request_response(&self) -> bool {
        self.simple_name.ends_with("Request") || self.simple_name.ends_with("Response")
    }
}

/// How two registered symbols collide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionKind {
    /// Same fully-qualified name registered twice
    DuplicateDefinition,
    /// DTO-like type registered under a Services namespace
    MisplacedModel,
    /// Same simple name in different namespaces
    AmbiguousName,
}

impl std::fmt::Display for CollisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateDefinition => write!(f, "duplicate-definition"),
            Self::MisplacedModel => write!(f, "misplaced-model"),
            Self::AmbiguousName => write!(f, "ambiguous-name"),
        }
    }
}

/// A recorded collision between two symbols
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collision {
    pub kind: CollisionKind,
    pub simple_name: String,
    /// Fully-qualified name already in the registry
    pub existing: String,
    pub existing_task_id: String,
    /// Fully-qualified name that triggered the collision
    pub incoming: String,
    pub incoming_task_id: String,
}

/// Naming-convention violation reported by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum ConventionViolation {
    /// Interface name does not start with `I`
    InterfaceWithoutPrefix { fully_qualified_name: String },
    /// Model-style type outside a Models namespace
    ModelOutsideModels { fully_qualified_name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_fqn() {
        let s = Symbol::new("Shop.Models", "Order", SymbolKind::Type, "t1");
        assert_eq!(s.fully_qualified_name, "Shop.Models.Order");
        assert_eq!(s.namespace_tail(), "Models");
    }

    #[test]
    fn test_symbol_empty_namespace() {
        let s = Symbol::new("", "Order", SymbolKind::Type, "t1");
        assert_eq!(s.fully_qualified_name, "Order");
        assert_eq!(s.namespace_tail(), "");
    }

    #[test]
    fn test_looks_like_model() {
        assert!(Symbol::new("A", "OrderDto", SymbolKind::Type, "t").looks_like_model());
        assert!(Symbol::new("A", "UserInfo", SymbolKind::Type, "t").looks_like_model());
        assert!(!Symbol::new("A", "OrderService", SymbolKind::Type, "t").looks_like_model());
    }

    #[test]
    fn test_is_request_response() {
        assert!(Symbol::new("A", "CreateOrderRequest", SymbolKind::Type, "t").is_request_response());
        assert!(Symbol::new("A", "CreateOrderResponse", SymbolKind::Type, "t").is_request_response());
        assert!(!Symbol::new("A", "OrderModel", SymbolKind::Type, "t").is_request_response());
    }

    #[test]
    fn test_collision_kind_display() {
        assert_eq!(CollisionKind::AmbiguousName.to_string(), "ambiguous-name");
        assert_eq!(CollisionKind::DuplicateDefinition.to_string(), "duplicate-definition");
    }
}
