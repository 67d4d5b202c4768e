use crate::{events::EventEmitter, ConfigValidation, NodeError, NodeSchema, SecurityEvent, Value};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Core trait that all security nodes implement
#[async_trait]
pub trait SecurityNode: Send + Sync {
    /// Identity and classification of the node
    fn descriptor(&self) -> NodeDescriptor;

    /// Declared inputs, outputs and configuration. Must be side-effect free.
    fn schema(&self) -> NodeSchema;

    /// Validate a configuration before execution.
    ///
    /// The default checks required fields and primitive types against
    /// [`SecurityNode::schema`]; nodes layer their own rules on top.
    fn configure(&self, config: &HashMap<String, Value>) -> ConfigValidation {
        self.schema().validate_config(config)
    }

    /// Run the node against one event. The only place allowed to do I/O.
    async fn execute(
        &self,
        event: &SecurityEvent,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError>;
}

/// Fixed set of node categories
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum NodeCategory {
    Core,
    Soar,
    Cloud,
    AiMl,
    Integration,
    Mitre,
}

impl NodeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeCategory::Core => "core",
            NodeCategory::Soar => "soar",
            NodeCategory::Cloud => "cloud",
            NodeCategory::AiMl => "ai-ml",
            NodeCategory::Integration => "integration",
            NodeCategory::Mitre => "mitre",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "core" => Some(NodeCategory::Core),
            "soar" => Some(NodeCategory::Soar),
            "cloud" => Some(NodeCategory::Cloud),
            "ai-ml" | "aiml" | "ai_ml" => Some(NodeCategory::AiMl),
            "integration" => Some(NodeCategory::Integration),
            "mitre" => Some(NodeCategory::Mitre),
            _ => None,
        }
    }
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static identity a node reports about itself
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeDescriptor {
    pub id: String,
    pub category: NodeCategory,
    /// Functional type, e.g. "input", "ml-scoring", "ai-analysis"
    pub node_type: String,
    pub name: String,
    pub description: String,
    pub version: String,
}

/// Registry view of a node, derived at registration time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeMetadata {
    pub id: String,
    pub category: NodeCategory,
    pub node_type: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub schema: NodeSchema,
    pub tags: Vec<String>,
    pub icon: String,
    pub enabled: bool,
    pub enterprise: bool,
}

/// Execution context passed to each node invocation. Never reused.
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: String,

    /// Resolved configuration for this invocation
    pub config: HashMap<String, Value>,

    pub workflow_id: String,
    pub execution_id: ExecutionId,
    pub timestamp: DateTime<Utc>,

    /// Free-form metadata, e.g. sequence or parallel position
    pub metadata: HashMap<String, Value>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,
}

impl NodeContext {
    pub fn new(
        node_id: impl Into<String>,
        workflow_id: impl Into<String>,
        execution_id: ExecutionId,
        events: EventEmitter,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            config: HashMap::new(),
            workflow_id: workflow_id.into(),
            execution_id,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            events,
        }
    }

    pub fn with_config(mut self, config: HashMap<String, Value>) -> Self {
        self.config = config;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn config_f64(&self, name: &str) -> Option<f64> {
        self.config.get(name).and_then(Value::as_f64)
    }

    pub fn config_bool(&self, name: &str) -> Option<bool> {
        self.config.get(name).and_then(Value::as_bool)
    }

    pub fn config_str(&self, name: &str) -> Option<&str> {
        self.config.get(name).and_then(Value::as_str)
    }
}

/// Output from a successful node execution
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeOutput {
    pub data: HashMap<String, Value>,
    pub confidence: Option<f64>,
    pub recommendations: Vec<String>,
    pub metadata: HashMap<String, Value>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    pub fn with_recommendations(mut self, recommendations: Vec<String>) -> Self {
        self.recommendations = recommendations;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Recorded outcome of one node invocation. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeExecutionResult {
    pub node_id: String,
    pub success: bool,
    pub data: HashMap<String, Value>,
    pub error: Option<String>,
    pub confidence: Option<f64>,
    pub recommendations: Vec<String>,
    pub metadata: HashMap<String, Value>,
    pub execution_time_ms: u64,
}

impl NodeExecutionResult {
    pub fn succeeded(node_id: impl Into<String>, output: NodeOutput, execution_time_ms: u64) -> Self {
        Self {
            node_id: node_id.into(),
            success: true,
            data: output.data,
            error: None,
            confidence: output.confidence,
            recommendations: output.recommendations,
            metadata: output.metadata,
            execution_time_ms,
        }
    }

    pub fn failed(
        node_id: impl Into<String>,
        error: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            success: false,
            data: HashMap::new(),
            error: Some(error.into()),
            confidence: None,
            recommendations: Vec::new(),
            metadata: HashMap::new(),
            execution_time_ms,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}
