//! Core abstractions for the security workflow engine
//!
//! This crate provides the node contract and the data model that all other
//! components depend on. It performs no I/O.

mod error;
pub mod event;
pub mod events;
mod node;
mod schema;
mod value;
mod workflow;

pub use error::{GuardError, NodeError, WorkflowError};
pub use event::SecurityEvent;
pub use events::*;
pub use node::{
    ExecutionId, NodeCategory, NodeContext, NodeDescriptor, NodeExecutionResult, NodeMetadata,
    NodeOutput, SecurityNode,
};
pub use schema::{ConfigValidation, FieldType, NodeSchema, SchemaField};
pub use value::Value;
pub use workflow::{
    RunStatus, WorkflowEdge, WorkflowExecutionContext, WorkflowGraph, WorkflowNode,
    INPUT_NODE_TYPE,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, GuardError>;
