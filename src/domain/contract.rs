//! Shared type contracts
//!
//! A contract is a frozen type shape that generated code must conform to.
//! The four variants are a tagged enum with a single `render` dispatching on
//! the tag; callers pattern-match instead of upcasting.

use serde::{Deserialize, Serialize};

/// One enum member, optionally with an explicit value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumMember {
    pub name: String,
    pub value: Option<i64>,
}

impl EnumMember {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn with_value(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
        }
    }
}

/// A method parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub type_name: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A method signature as it appears in a contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSignature {
    pub name: String,
    pub return_type: String,
    pub parameters: Vec<Parameter>,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, return_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            return_type: return_type.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.parameters.push(Parameter::new(name, type_name));
        self
    }

    /// Render as `ReturnType Name(Type name, ...)`
    pub fn render(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|p| format!("{} {}", p.type_name, p.name))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} {}({})", self.return_type, self.name, params)
    }
}

/// A property signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySignature {
    pub name: String,
    pub type_name: String,
    pub readable: bool,
    pub writable: bool,
}

impl PropertySignature {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            readable: true,
            writable: true,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    /// Render as `Type Name { get; set; }`
    pub fn render(&self) -> String {
        let mut accessors = Vec::new();
        if self.readable {
            accessors.push("get;");
        }
        if self.writable {
            accessors.push("set;");
        }
        format!("{} {} {{ {} }}", self.type_name, self.name, accessors.join(" "))
    }
}

/// Enum contract body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumContract {
    /// Ordered member list
    pub members: Vec<EnumMember>,
    /// Render with the flags attribute and power-of-two defaults
    pub is_flags: bool,
}

/// Interface contract body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceContract {
    pub methods: Vec<MethodSignature>,
    pub properties: Vec<PropertySignature>,
    pub generic_parameters: Vec<String>,
    /// Raw `where` clauses, e.g. `T : class`
    pub generic_constraints: Vec<String>,
    pub base_interfaces: Vec<String>,
}

/// Model (DTO) contract body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelContract {
    pub properties: Vec<PropertySignature>,
    pub is_record: bool,
    pub base_class: Option<String>,
    pub implemented_interfaces: Vec<String>,
}

/// Abstract base (or sealed concrete) contract body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbstractBaseContract {
    pub abstract_methods: Vec<MethodSignature>,
    pub virtual_methods: Vec<MethodSignature>,
    /// When set, the contract denotes a sealed concrete class; inheriting
    /// from it is a contract violation.
    pub is_sealed: bool,
}

/// Variant-specific contract shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "variant")]
pub enum ContractKind {
    Enum(EnumContract),
    Interface(InterfaceContract),
    Model(ModelContract),
    AbstractBase(AbstractBaseContract),
}

impl ContractKind {
    /// Short variant name for manifests and logs
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Enum(_) => "enum",
            Self::Interface(_) => "interface",
            Self::Model(_) => "model",
            Self::AbstractBase(_) => "abstract_base",
        }
    }
}

/// A frozen type contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub name: String,
    pub namespace: String,
    /// Task that introduced the contract, or `plan` for contract-first output
    pub source_task_id: String,
    /// Unix millis stamped by the catalog's freeze
    pub frozen_at: Option<i64>,
    pub kind: ContractKind,
}

impl Contract {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        source_task_id: impl Into<String>,
        kind: ContractKind,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            source_task_id: source_task_id.into(),
            frozen_at: None,
            kind,
        }
    }

    pub fn fully_qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }

    /// Whether this contract denotes a sealed class
    pub fn is_sealed(&self) -> bool {
        matches!(&self.kind, ContractKind::AbstractBase(b) if b.is_sealed)
    }

    /// Enum member names, empty for non-enum contracts
    pub fn enum_member_names(&self) -> Vec<&str> {
        match &self.kind {
            ContractKind::Enum(e) => e.members.iter().map(|m| m.name.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Look up an interface method by name
    pub fn find_method(&self, name: &str) -> Option<&MethodSignature> {
        match &self.kind {
            ContractKind::Interface(i) => i.methods.iter().find(|m| m.name == name),
            ContractKind::AbstractBase(b) => b
                .abstract_methods
                .iter()
                .chain(b.virtual_methods.iter())
                .find(|m| m.name == name),
            _ => None,
        }
    }

    /// Interface and abstract-base members a conforming type must declare
    pub fn required_members(&self) -> Vec<&MethodSignature> {
        match &self.kind {
            ContractKind::Interface(i) => i.methods.iter().collect(),
            ContractKind::AbstractBase(b) => b.abstract_methods.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Render the ground-truth declaration for the generated corpus
    pub fn render(&self) -> String {
        let body = match &self.kind {
            ContractKind::Enum(e) => self.render_enum(e),
            ContractKind::Interface(i) => self.render_interface(i),
            ContractKind::Model(m) => self.render_model(m),
            ContractKind::AbstractBase(b) => self.render_abstract_base(b),
        };
        if self.namespace.is_empty() {
            body
        } else {
            let indented = body
                .lines()
                .map(|l| {
                    if l.is_empty() {
                        String::new()
                    } else {
                        format!("    {}", l)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("namespace {}\n{{\n{}\n}}\n", self.namespace, indented)
        }
    }

    fn render_enum(&self, e: &EnumContract) -> String {
        let mut out = String::new();
        if e.is_flags {
            out.push_str("[Flags]\n");
        }
        out.push_str(&format!("public enum {}\n{{\n", self.name));
        for (idx, member) in e.members.iter().enumerate() {
            let value = match member.value {
                Some(v) => Some(v),
                // Flag sets default to power-of-two bits
                None if e.is_flags => Some(1i64 << idx),
                None => None,
            };
            match value {
                Some(v) => out.push_str(&format!("    {} = {},\n", member.name, v)),
                None => out.push_str(&format!("    {},\n", member.name)),
            }
        }
        out.push_str("}\n");
        out
    }

    fn render_interface(&self, i: &InterfaceContract) -> String {
        let generics = if i.generic_parameters.is_empty() {
            String::new()
        } else {
            format!("<{}>", i.generic_parameters.join(", "))
        };
        let bases = if i.base_interfaces.is_empty() {
            String::new()
        } else {
            format!(" : {}", i.base_interfaces.join(", "))
        };
        let mut header = format!("public interface {}{}{}", self.name, generics, bases);
        for constraint in &i.generic_constraints {
            header.push_str(&format!(" where {}", constraint));
        }
        let mut out = format!("{}\n{{\n", header);
        for prop in &i.properties {
            out.push_str(&format!("    {}\n", prop.render()));
        }
        for method in &i.methods {
            out.push_str(&format!("    {};\n", method.render()));
        }
        out.push_str("}\n");
        out
    }

    fn render_model(&self, m: &ModelContract) -> String {
        let keyword = if m.is_record { "record" } else { "class" };
        let mut bases: Vec<String> = Vec::new();
        if let Some(base) = &m.base_class {
            bases.push(base.clone());
        }
        bases.extend(m.implemented_interfaces.iter().cloned());
        let base_clause = if bases.is_empty() {
            String::new()
        } else {
            format!(" : {}", bases.join(", "))
        };
        let mut out = format!("public {} {}{}\n{{\n", keyword, self.name, base_clause);
        for prop in &m.properties {
            out.push_str(&format!("    public {}\n", prop.render()));
        }
        out.push_str("}\n");
        out
    }

    fn render_abstract_base(&self, b: &AbstractBaseContract) -> String {
        let keyword = if b.is_sealed { "sealed" } else { "abstract" };
        let mut out = format!("public {} class {}\n{{\n", keyword, self.name);
        for method in &b.abstract_methods {
            out.push_str(&format!("    public abstract {};\n", method.render()));
        }
        for method in &b.virtual_methods {
            out.push_str(&format!(
                "    public virtual {} => throw new NotImplementedException();\n",
                method.render()
            ));
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_enum() -> Contract {
        Contract::new(
            "Paint.Models",
            "Color",
            "t1",
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

    #[test]
    fn test_fully_qualified_name() {
        assert_eq!(color_enum().fully_qualified_name(), "Paint.Models.Color");
    }

    #[test]
    fn test_enum_render_order_preserved() {
        let rendered = color_enum().render();
        let red = rendered.find("Red").unwrap();
        let green = rendered.find("Green").unwrap();
        let blue = rendered.find("Blue").unwrap();
        assert!(red < green && green < blue);
        assert!(rendered.starts_with("namespace Paint.Models"));
    }

    #[test]
    fn test_enum_member_names() {
        let c = color_enum();
        assert_eq!(c.enum_member_names(), vec!["Red", "Green", "Blue"]);
    }

    #[test]
    fn test_flags_enum_defaults_to_bits() {
        let c = Contract::new(
            "",
            "Perm",
            "t1",
            ContractKind::Enum(EnumContract {
                members: vec![EnumMember::new("Read"), EnumMember::new("Write")],
                is_flags: true,
            }),
        );
        let rendered = c.render();
        assert!(rendered.contains("[Flags]"));
        assert!(rendered.contains("Read = 1"));
        assert!(rendered.contains("Write = 2"));
    }

    #[test]
    fn test_interface_render() {
        let c = Contract::new(
            "Shop.Services",
            "IOrderService",
            "t2",
            ContractKind::Interface(InterfaceContract {
                methods: vec![
                    MethodSignature::new("PlaceOrder", "OrderResult").with_parameter("order", "Order"),
                ],
                properties: vec![PropertySignature::new("Count", "int").read_only()],
                generic_parameters: vec![],
                generic_constraints: vec![],
                base_interfaces: vec!["IDisposable".to_string()],
            }),
        );
        let rendered = c.render();
        assert!(rendered.contains("public interface IOrderService : IDisposable"));
        assert!(rendered.contains("OrderResult PlaceOrder(Order order);"));
        assert!(rendered.contains("int Count { get; }"));
    }

    #[test]
    fn test_generic_interface_render() {
        let c = Contract::new(
            "",
            "IRepository",
            "t2",
            ContractKind::Interface(InterfaceContract {
                methods: vec![MethodSignature::new("Get", "T").with_parameter("id", "string")],
                generic_parameters: vec!["T".to_string()],
                generic_constraints: vec!["T : class".to_string()],
                ..Default::default()
            }),
        );
        let rendered = c.render();
        assert!(rendered.contains("public interface IRepository<T> where T : class"));
    }

    #[test]
    fn test_model_render_record() {
        let c = Contract::new(
            "Shop.Models",
            "OrderDto",
            "t3",
            ContractKind::Model(ModelContract {
                properties: vec![PropertySignature::new("Id", "string")],
                is_record: true,
                base_class: None,
                implemented_interfaces: vec![],
            }),
        );
        let rendered = c.render();
        assert!(rendered.contains("public record OrderDto"));
        assert!(rendered.contains("public string Id { get; set; }"));
    }

    #[test]
    fn test_sealed_contract() {
        let c = Contract::new(
            "",
            "Clock",
            "t4",
            ContractKind::AbstractBase(AbstractBaseContract {
                is_sealed: true,
                ..Default::default()
            }),
        );
        assert!(c.is_sealed());
        assert!(c.render().contains("public sealed class Clock"));
    }

    #[test]
    fn test_abstract_base_render() {
        let c = Contract::new(
            "",
            "BaseHandler",
            "t5",
            ContractKind::AbstractBase(AbstractBaseContract {
                abstract_methods: vec![MethodSignature::new("Handle", "void").with_parameter("input", "string")],
                virtual_methods: vec![MethodSignature::new("Reset", "void")],
                is_sealed: false,
            }),
        );
        let rendered = c.render();
        assert!(rendered.contains("public abstract class BaseHandler"));
        assert!(rendered.contains("public abstract void Handle(string input);"));
        assert!(rendered.contains("public virtual void Reset()"));
    }

    #[test]
    fn test_required_members() {
        let c = Contract::new(
            "",
            "IThing",
            "t",
            ContractKind::Interface(InterfaceContract {
                methods: vec![MethodSignature::new("A", "void"), MethodSignature::new("B", "int")],
                ..Default::default()
            }),
        );
        let names: Vec<_> = c.required_members().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_find_method() {
        let c = Contract::new(
            "",
            "IThing",
            "t",
            ContractKind::Interface(InterfaceContract {
                methods: vec![MethodSignature::new("Run", "void")],
                ..Default::default()
            }),
        );
        assert!(c.find_method("Run").is_some());
        assert!(c.find_method("Walk").is_none());
    }

    #[test]
    fn test_contract_serde_roundtrip() {
        let c = color_enum();
        let json = serde_json::to_string(&c).unwrap();
        let back: Contract = serde_json::from_str(&json).unwrap();
        assert_eq!(back.fully_qualified_name(), c.fully_qualified_name());
        assert_eq!(back.kind, c.kind);
    }
}
