//! Domain types for the orchestrator
//!
//! Tasks, contracts, symbols, and diagnostics. These are plain data: the
//! graph, catalog, and registry own the collections; the executor mutates a
//! single borrowed task at a time.

mod contract;
mod diagnostic;
mod id;
mod symbol;
mod task;

pub use contract::{
    AbstractBaseContract, Contract, ContractKind, EnumContract, EnumMember, InterfaceContract, MethodSignature,
    ModelContract, Parameter, PropertySignature,
};
pub use diagnostic::{Diagnostic, DiagnosticCategory, Severity, SourceLocation};
pub use id::{generate_id, now_ms};
pub use symbol::{Collision, CollisionKind, ConventionViolation, Symbol, SymbolKind};
pub use task::{Task, TaskStatus, TaskSummary};
