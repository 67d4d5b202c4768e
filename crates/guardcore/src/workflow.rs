use crate::{ExecutionId, NodeExecutionResult, SecurityEvent, Value, WorkflowError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Node type that seeds the execution order
pub const INPUT_NODE_TYPE: &str = "input";

/// Workflow definition: nodes plus directed edges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowGraph {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: WorkflowNode) -> String {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(&mut self, source: impl Into<String>, target: impl Into<String>) {
        self.edges.push(WorkflowEdge {
            source: source.into(),
            target: target.into(),
        });
    }

    pub fn find_node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Sources of the edges pointing at `id`, in edge declaration order
    pub fn predecessors<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.target == id)
            .map(|e| e.source.as_str())
    }

    /// Structural problems: duplicate node ids and edges to unknown nodes.
    ///
    /// Cycles are tolerated and not reported here.
    pub fn structural_errors(&self) -> Vec<WorkflowError> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                errors.push(WorkflowError::DuplicateNode(node.id.clone()));
            }
        }
        for edge in &self.edges {
            for end in [&edge.source, &edge.target] {
                if !seen.contains(end.as_str()) {
                    errors.push(WorkflowError::DanglingEdge(end.clone()));
                }
            }
        }
        errors
    }
}

/// Node placement in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Graph-local id, unique within the workflow
    pub id: String,
    /// Functional type such as "input" or "ml-scoring"
    #[serde(rename = "type")]
    pub node_type: String,
    /// Registry id of the node implementation; defaults to `node_type`
    #[serde(default)]
    pub node_ref: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            node_ref: None,
            name: None,
            config: HashMap::new(),
        }
    }

    pub fn with_ref(mut self, registry_id: impl Into<String>) -> Self {
        self.node_ref = Some(registry_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn registry_id(&self) -> &str {
        self.node_ref.as_deref().unwrap_or(&self.node_type)
    }

    pub fn is_input(&self) -> bool {
        self.node_type == INPUT_NODE_TYPE
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowEdge {
    pub source: String,
    pub target: String,
}

/// Lifecycle of one workflow run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// State owned by a single workflow run
#[derive(Debug, Clone)]
pub struct WorkflowExecutionContext {
    pub workflow_id: String,
    pub execution_id: ExecutionId,
    pub input: SecurityEvent,
    pub node_results: HashMap<String, NodeExecutionResult>,
    pub started_at: DateTime<Utc>,
}

impl WorkflowExecutionContext {
    pub fn new(workflow_id: impl Into<String>, input: SecurityEvent) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: ExecutionId::new_v4(),
            input,
            node_results: HashMap::new(),
            started_at: Utc::now(),
        }
    }

    /// Input for `node_id`: the original event merged with the successful
    /// outputs of its direct predecessors, in edge declaration order.
    pub fn input_for(&self, graph: &WorkflowGraph, node_id: &str) -> SecurityEvent {
        graph
            .predecessors(node_id)
            .filter_map(|source| self.node_results.get(source))
            .filter(|result| result.success)
            .fold(self.input.clone(), |event, result| event.merged(&result.data))
    }

    pub fn record(&mut self, result: NodeExecutionResult) {
        self.node_results.insert(result.node_id.clone(), result);
    }
}
