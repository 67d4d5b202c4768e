#![allow(dead_code)]

use async_trait::async_trait;
use guardcore::{
    ConfigValidation, NodeCategory, NodeContext, NodeDescriptor, NodeError, NodeOutput, NodeSchema, SecurityEvent,
    SecurityNode, Value,
};
use guardruntime::{CaseManagement, CaseManagementError, IncidentRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub enum Behavior {
    Succeed(HashMap<String, Value>),
    Fail(String),
    Panic,
}

/// Scriptable node that remembers what it was called with
pub struct TestNode {
    pub id: String,
    pub node_type: String,
    pub category: NodeCategory,
    pub schema: NodeSchema,
    pub behavior: Behavior,
    pub confidence: Option<f64>,
    pub recommendations: Vec<String>,
    pub panic_on_configure: bool,
    pub calls: Arc<AtomicUsize>,
    pub last_event: Arc<Mutex<Option<SecurityEvent>>>,
}

impl TestNode {
    pub fn ok(id: &str) -> Self {
        Self::new(id, Behavior::Succeed(HashMap::new()))
    }

    pub fn failing(id: &str, message: &str) -> Self {
        Self::new(id, Behavior::Fail(message.to_string()))
    }

    pub fn panicking(id: &str) -> Self {
        Self::new(id, Behavior::Panic)
    }

    pub fn new(id: &str, behavior: Behavior) -> Self {
        Self {
            id: id.to_string(),
            node_type: id.to_string(),
            category: NodeCategory::Core,
            schema: NodeSchema::new(),
            behavior,
            confidence: None,
            recommendations: Vec::new(),
            panic_on_configure: false,
            calls: Arc::new(AtomicUsize::new(0)),
            last_event: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_output(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Behavior::Succeed(data) = &mut self.behavior {
            data.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn with_type(mut self, node_type: &str) -> Self {
        self.node_type = node_type.to_string();
        self
    }

    pub fn with_category(mut self, category: NodeCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_schema(mut self, schema: NodeSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_recommendation(mut self, text: &str) -> Self {
        self.recommendations.push(text.to_string());
        self
    }

    pub fn with_configure_panic(mut self) -> Self {
        self.panic_on_configure = true;
        self
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn seen(&self) -> Arc<Mutex<Option<SecurityEvent>>> {
        self.last_event.clone()
    }
}

#[async_trait]
impl SecurityNode for TestNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            id: self.id.clone(),
            category: self.category,
            node_type: self.node_type.clone(),
            name: format!("Test {}", self.id),
            description: format!("Scripted node {}", self.id),
            version: "1.0.0".to_string(),
        }
    }

    fn schema(&self) -> NodeSchema {
        self.schema.clone()
    }

    fn configure(&self, config: &HashMap<String, Value>) -> ConfigValidation {
        if self.panic_on_configure {
            panic!("scripted configure panic in {}", self.id);
        }
        self.schema.validate_config(config)
    }

    async fn execute(
        &self,
        event: &SecurityEvent,
        _ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_event.lock().unwrap() = Some(event.clone());

        match &self.behavior {
            Behavior::Succeed(data) => {
                let mut output = NodeOutput::new().with_recommendations(self.recommendations.clone());
                output.data = data.clone();
                if let Some(c) = self.confidence {
                    output = output.with_confidence(c);
                }
                Ok(output)
            }
            Behavior::Fail(message) => Err(NodeError::ExecutionFailed(message.clone())),
            Behavior::Panic => panic!("scripted panic in {}", self.id),
        }
    }
}

/// Case management double that records incidents or refuses them
#[derive(Default)]
pub struct RecordingCases {
    pub incidents: Mutex<Vec<IncidentRecord>>,
    pub refuse: bool,
}

impl RecordingCases {
    pub fn refusing() -> Self {
        Self {
            incidents: Mutex::new(Vec::new()),
            refuse: true,
        }
    }

    pub fn count(&self) -> usize {
        self.incidents.lock().unwrap().len()
    }
}

#[async_trait]
impl CaseManagement for RecordingCases {
    async fn create_incident(&self, record: &IncidentRecord) -> Result<String, CaseManagementError> {
        if self.refuse {
            return Err(CaseManagementError::Unavailable("connection refused".to_string()));
        }
        self.incidents.lock().unwrap().push(record.clone());
        Ok(format!("CASE-{}", self.count()))
    }
}

/// Case management double whose service call panics
pub struct PanickingCases;

#[async_trait]
impl CaseManagement for PanickingCases {
    async fn create_incident(&self, _record: &IncidentRecord) -> Result<String, CaseManagementError> {
        panic!("case service client crashed");
    }
}

pub fn event() -> SecurityEvent {
    SecurityEvent::new("SQL Injection", 6.5).with_field("source_ip", "203.0.113.7")
}
