mod common;

use common::TestNode;
use guardcore::{FieldType, NodeCategory, NodeSchema, SchemaField, WorkflowNode};
use guardruntime::NodeRegistry;
use std::sync::Arc;

fn scorer() -> TestNode {
    TestNode::ok("ml-threat-scoring")
        .with_type("ml-scoring")
        .with_category(NodeCategory::AiMl)
        .with_schema(
            NodeSchema::new()
                .input(SchemaField::new("event_id", FieldType::String).required())
                .output(SchemaField::new("threat_score", FieldType::Number))
                .output(SchemaField::new("confidence", FieldType::Number)),
        )
}

fn analyzer() -> TestNode {
    TestNode::ok("ai-threat-analysis")
        .with_type("ai-analysis")
        .with_category(NodeCategory::AiMl)
        .with_schema(
            NodeSchema::new()
                .input(SchemaField::new("threat_score", FieldType::Number).required())
                .input(SchemaField::new("notes", FieldType::String)),
        )
}

#[test]
fn test_register_derives_metadata() {
    let registry = NodeRegistry::new();
    assert!(registry.register(Arc::new(scorer())).is_none());

    let metadata = registry.metadata("ml-threat-scoring").unwrap();
    assert_eq!(metadata.category, NodeCategory::AiMl);
    assert!(metadata.enterprise);
    assert!(metadata.enabled);
    assert_eq!(metadata.icon, "brain");
    assert!(metadata.tags.contains(&"ai".to_string()));
    assert!(metadata.tags.contains(&"ml-scoring".to_string()));
    assert_eq!(metadata.schema.outputs.len(), 2);

    registry.register(Arc::new(TestNode::ok("input")));
    assert!(!registry.metadata("input").unwrap().enterprise);
}

#[test]
fn test_duplicate_registration_last_wins() {
    let registry = NodeRegistry::new();
    registry.register(Arc::new(scorer()));

    let replaced = registry.register(Arc::new(
        TestNode::ok("ml-threat-scoring").with_category(NodeCategory::Cloud),
    ));

    assert_eq!(replaced.unwrap().category, NodeCategory::AiMl);
    assert_eq!(registry.len(), 1);
    assert_eq!(
        registry.metadata("ml-threat-scoring").unwrap().category,
        NodeCategory::Cloud
    );
}

#[test]
fn test_lookups_signal_absence() {
    let registry = NodeRegistry::new();
    assert!(registry.get("missing").is_none());
    assert!(registry.metadata("missing").is_none());
    assert!(!registry.unregister("missing"));
    assert!(!registry.enable("missing"));
}

#[test]
fn test_unregister_removes_node() {
    let registry = NodeRegistry::new();
    registry.register(Arc::new(scorer()));
    assert!(registry.unregister("ml-threat-scoring"));
    assert!(registry.get("ml-threat-scoring").is_none());
    assert!(registry.is_empty());
}

#[test]
fn test_search_is_case_insensitive_over_name_description_and_tags() {
    let registry = NodeRegistry::new();
    registry.register(Arc::new(scorer()));
    registry.register(Arc::new(analyzer()));
    registry.register(Arc::new(
        TestNode::ok("block-ip").with_type("soar-action").with_category(NodeCategory::Soar),
    ));

    let by_tag = registry.search("AUTOMATION");
    assert_eq!(by_tag.len(), 1);
    assert_eq!(by_tag[0].id, "block-ip");

    let by_name = registry.search("test ai-threat");
    assert_eq!(by_name.len(), 1);

    let by_description = registry.search("scripted");
    assert_eq!(by_description.len(), 3);
    assert_eq!(by_description[0].id, "ai-threat-analysis");

    assert!(registry.search("kubernetes").is_empty());
}

#[test]
fn test_filters_by_category_and_type() {
    let registry = NodeRegistry::new();
    registry.register(Arc::new(scorer()));
    registry.register(Arc::new(analyzer()));
    registry.register(Arc::new(TestNode::ok("input")));

    assert_eq!(registry.by_category(NodeCategory::AiMl).len(), 2);
    assert_eq!(registry.by_category(NodeCategory::Mitre).len(), 0);
    assert_eq!(registry.by_type("ai-analysis")[0].id, "ai-threat-analysis");
}

#[test]
fn test_enable_disable_is_advisory() {
    let registry = NodeRegistry::new();
    registry.register(Arc::new(scorer()));

    assert!(registry.disable("ml-threat-scoring"));
    assert!(!registry.metadata("ml-threat-scoring").unwrap().enabled);
    assert!(registry.list_enabled().is_empty());
    assert_eq!(registry.list().len(), 1);
    assert!(registry.get("ml-threat-scoring").is_some());

    assert!(registry.enable("ml-threat-scoring"));
    assert_eq!(registry.list_enabled().len(), 1);
}

#[test]
fn test_compatibility_checks_required_inputs_by_name() {
    let registry = NodeRegistry::new();
    registry.register(Arc::new(scorer()));
    registry.register(Arc::new(analyzer()));

    assert!(registry.is_compatible("ml-threat-scoring", "ai-threat-analysis"));
    assert!(!registry.is_compatible("ai-threat-analysis", "ml-threat-scoring"));
    assert!(!registry.is_compatible("ml-threat-scoring", "missing"));

    // No required inputs: anything feeds it
    registry.register(Arc::new(TestNode::ok("sink")));
    assert!(registry.is_compatible("ai-threat-analysis", "sink"));
}

#[test]
fn test_resolve_workflow_node_to_registry_id() {
    let registry = NodeRegistry::new();
    registry.register(Arc::new(scorer()));
    registry.register(Arc::new(TestNode::ok("input")));

    let by_ref = WorkflowNode::new("ml", "ml-scoring").with_ref("custom-scorer");
    assert_eq!(registry.resolve(&by_ref), "custom-scorer");

    let by_id = WorkflowNode::new("in", "input");
    assert_eq!(registry.resolve(&by_id), "input");

    let by_type = WorkflowNode::new("ml", "ml-scoring");
    assert_eq!(registry.resolve(&by_type), "ml-threat-scoring");

    let unknown = WorkflowNode::new("x", "cloud-posture");
    assert_eq!(registry.resolve(&unknown), "cloud-posture");
}
