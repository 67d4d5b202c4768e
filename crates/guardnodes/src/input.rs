use async_trait::async_trait;
use guardcore::event::{EVENT_ID, RISK_SCORE, SEVERITY, THREAT_TYPE, TIMESTAMP};
use guardcore::{
    FieldType, NodeCategory, NodeContext, NodeDescriptor, NodeError, NodeOutput, NodeSchema,
    SchemaField, SecurityEvent, SecurityNode, Value,
};

pub const INPUT_NODE_ID: &str = "security-event-input";

/// Entry point of a workflow: checks the event carries what downstream
/// nodes rely on and re-emits the guaranteed fields.
pub struct SecurityEventInputNode;

#[async_trait]
impl SecurityNode for SecurityEventInputNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            id: INPUT_NODE_ID.to_string(),
            category: NodeCategory::Core,
            node_type: "input".to_string(),
            name: "Security Event Input".to_string(),
            description: "Receives a security event and validates its guaranteed fields"
                .to_string(),
            version: "1.0.0".to_string(),
        }
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new()
            .output(SchemaField::new(EVENT_ID, FieldType::String))
            .output(SchemaField::new(THREAT_TYPE, FieldType::String))
            .output(SchemaField::new(RISK_SCORE, FieldType::Number))
            .output(SchemaField::new(SEVERITY, FieldType::String))
            .output(SchemaField::new(TIMESTAMP, FieldType::String))
            .config_field(
                SchemaField::new("required_fields", FieldType::Array)
                    .with_description("Extra event fields that must be present"),
            )
    }

    async fn execute(
        &self,
        event: &SecurityEvent,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        if event.event_id().is_empty() {
            return Err(NodeError::MissingInput(EVENT_ID.to_string()));
        }

        let required = ctx
            .config
            .get("required_fields")
            .map(Value::string_list)
            .unwrap_or_default();
        if let Some(missing) = required
            .iter()
            .find(|field| event.get(field).map_or(true, Value::is_null))
        {
            return Err(NodeError::MissingInput(missing.clone()));
        }

        ctx.events.info(format!(
            "Received {} event {} (risk {:.1})",
            event.threat_type(),
            event.event_id(),
            event.risk_score()
        ));

        Ok(NodeOutput::new()
            .with_output(EVENT_ID, event.event_id())
            .with_output(THREAT_TYPE, event.threat_type())
            .with_output(RISK_SCORE, event.risk_score())
            .with_output(SEVERITY, event.severity())
            .with_output(TIMESTAMP, event.timestamp())
            .with_output("field_count", event.fields().len())
            .with_confidence(1.0))
    }
}
