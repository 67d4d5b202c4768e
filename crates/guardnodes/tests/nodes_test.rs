use guardcore::{
    EventEmitter, ExecutionId, NodeContext, NodeError, RunStatus, SecurityEvent, SecurityNode,
    Value, WorkflowGraph, WorkflowNode,
};
use guardnodes::{
    register_all, AiThreatAnalysisNode, ClassifierClient, EventCorrelationNode,
    MitreAttackMapperNode, MlThreatScoringNode, NodesConfig, SecurityEventInputNode,
    SoarResponseActionNode, ThreatIntelLookupNode, AI_NODE_ID, INPUT_NODE_ID, ML_NODE_ID,
    CORRELATION_NODE_ID, SOAR_NODE_ID,
};
use guardruntime::{GuardRuntime, NodeRegistry, RateLimiter};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn ctx(node_id: &str, config: &[(&str, Value)]) -> NodeContext {
    let config: HashMap<String, Value> = config
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    NodeContext::new(
        node_id,
        "wf-test",
        ExecutionId::new_v4(),
        EventEmitter::detached(node_id),
    )
    .with_config(config)
}

fn offline(timeout: Duration) -> ClassifierClient {
    ClassifierClient::new(None, timeout)
}

fn brute_force() -> SecurityEvent {
    SecurityEvent::new("Brute Force", 8.0)
        .with_field("source_ip", "203.0.113.7")
        .with_field("user_id", "jdoe")
        .with_field("hostname", "ws-042")
}

#[tokio::test]
async fn test_input_node_checks_required_fields() {
    let node = SecurityEventInputNode;
    let event = brute_force();

    let output = node.execute(&event, &ctx(INPUT_NODE_ID, &[])).await.unwrap();
    assert_eq!(output.data["threat_type"], Value::from("Brute Force"));
    assert_eq!(output.data["severity"], Value::from("HIGH"));
    assert_eq!(output.confidence, Some(1.0));

    let strict = ctx(
        INPUT_NODE_ID,
        &[("required_fields", Value::from(vec!["asset_id".to_string()]))],
    );
    match node.execute(&event, &strict).await {
        Err(NodeError::MissingInput(field)) => assert_eq!(field, "asset_id"),
        other => panic!("expected missing input, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ml_scoring_falls_back_to_heuristic() {
    let node = MlThreatScoringNode::new(offline(Duration::from_secs(1)));

    let output = node
        .execute(&brute_force(), &ctx(ML_NODE_ID, &[]))
        .await
        .unwrap();

    // 0.7 * 0.8 + 0.3 * 0.75
    let score = output.data["threat_score"].as_f64().unwrap();
    assert!((score - 0.785).abs() < 1e-9);
    assert_eq!(output.data["risk_level"], Value::from("high"));
    assert_eq!(output.data["requires_ai_analysis"], Value::from(true));
    assert_eq!(output.data["fallback"], Value::from(true));
    assert_eq!(output.confidence, Some(0.5));
}

#[tokio::test]
async fn test_ml_scoring_unreachable_endpoint_is_bounded() {
    let node = MlThreatScoringNode::new(ClassifierClient::new(
        Some("http://127.0.0.1:1/predict".to_string()),
        Duration::from_millis(500),
    ));
    let low = SecurityEvent::new("Port Scan", 2.0);

    let output = node
        .execute(&low, &ctx(ML_NODE_ID, &[("threshold", Value::from(0.9))]))
        .await
        .unwrap();

    assert_eq!(output.data["fallback"], Value::from(true));
    assert_eq!(output.data["requires_ai_analysis"], Value::from(false));
    assert_eq!(output.data["risk_level"], Value::from("low"));
}

#[tokio::test]
async fn test_ai_analysis_rate_limited_per_workflow() {
    let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(60)));
    let node = AiThreatAnalysisNode::new(
        ClassifierClient::new(
            Some("http://127.0.0.1:1/analyze".to_string()),
            Duration::from_millis(500),
        ),
        limiter.clone(),
    );
    let event = brute_force();

    let first = node.execute(&event, &ctx(AI_NODE_ID, &[])).await.unwrap();
    assert_eq!(first.data["rate_limited"], Value::from(false));
    assert_eq!(first.data["fallback"], Value::from(true));
    assert_eq!(first.data["threat_level"], Value::from("high"));
    assert_eq!(first.recommendations.len(), 8);

    let second = node.execute(&event, &ctx(AI_NODE_ID, &[])).await.unwrap();
    assert_eq!(second.data["rate_limited"], Value::from(true));
    assert_eq!(second.data["model_used"], Value::from("fallback"));
    assert_eq!(limiter.remaining("wf-test"), 0);
    assert_eq!(limiter.remaining("another-workflow"), 1);
}

#[tokio::test]
async fn test_ai_analysis_without_endpoint_spends_no_budget() {
    let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(60)));
    let node = AiThreatAnalysisNode::new(offline(Duration::from_secs(1)), limiter.clone());
    let event = brute_force();

    for _ in 0..3 {
        let output = node.execute(&event, &ctx(AI_NODE_ID, &[])).await.unwrap();
        assert_eq!(output.data["rate_limited"], Value::from(false));
        assert_eq!(output.data["fallback"], Value::from(true));
    }
    assert_eq!(limiter.remaining("wf-test"), 1);
    assert_eq!(limiter.tracked_keys(), 0);
}

#[tokio::test]
async fn test_ai_analysis_indicators_come_from_event() {
    let limiter = Arc::new(RateLimiter::new(5, Duration::from_secs(60)));
    let node = AiThreatAnalysisNode::new(offline(Duration::from_secs(1)), limiter);

    let output = node
        .execute(&brute_force(), &ctx(AI_NODE_ID, &[]))
        .await
        .unwrap();

    let indicators = output.data["indicators"].string_list();
    assert!(indicators.contains(&"203.0.113.7".to_string()));
    assert!(indicators.contains(&"Brute Force".to_string()));
    assert_eq!(output.confidence, Some(0.6));
}

#[tokio::test]
async fn test_threat_intel_without_providers_uses_heuristic() {
    let node = ThreatIntelLookupNode::new(Vec::new());
    let private = SecurityEvent::new("Anomaly", 3.0).with_field("source_ip", "10.1.2.3");

    let output = node
        .execute(&private, &ctx("threat-intel-lookup", &[]))
        .await
        .unwrap();

    assert_eq!(output.data["reputation"], Value::from("clean"));
    assert_eq!(output.data["fallback"], Value::from(true));
    assert_eq!(output.data["providers_queried"], Value::from(0usize));

    let missing = SecurityEvent::new("Anomaly", 3.0);
    let output = node
        .execute(&missing, &ctx("threat-intel-lookup", &[]))
        .await
        .unwrap();
    assert_eq!(output.data["reputation"], Value::from("unknown"));
    assert_eq!(output.data["indicator"], Value::Null);
}

#[tokio::test]
async fn test_correlation_fallback_and_window_validation() {
    let node = EventCorrelationNode::new(offline(Duration::from_secs(1)));

    let output = node
        .execute(
            &brute_force(),
            &ctx(
                "event-correlation",
                &[(
                    "group_by",
                    Value::from(vec!["source_ip".to_string(), "user_id".to_string()]),
                )],
            ),
        )
        .await
        .unwrap();

    assert_eq!(
        output.data["correlation_key"],
        Value::from("source_ip:203.0.113.7|user_id:jdoe")
    );
    assert_eq!(output.data["related_events_count"], Value::from(0usize));
    assert_eq!(output.data["pattern"], Value::from("single_event"));
    assert_eq!(output.data["anomaly_score"], Value::from(0.5));
    assert_eq!(output.confidence, Some(0.3));

    let mut bad = HashMap::new();
    bad.insert("time_window".to_string(), Value::from("five minutes"));
    let validation = node.configure(&bad);
    assert!(!validation.valid);
}

#[tokio::test]
async fn test_oversized_correlation_window_fails_the_node() {
    let runtime = GuardRuntime::new();
    register_all(
        runtime.registry(),
        runtime.rate_limiter().clone(),
        &NodesConfig::default(),
    );

    let mut config = HashMap::new();
    config.insert("time_window".to_string(), Value::from("999999999999999999d"));
    let result = runtime
        .execute_node(CORRELATION_NODE_ID, &brute_force(), config)
        .await;

    assert!(!result.success);
    let error = result.error.unwrap_or_default();
    assert!(error.contains("time_window"), "unexpected error: {error}");
}

#[tokio::test]
async fn test_mitre_mapping_for_brute_force() {
    let output = MitreAttackMapperNode
        .execute(&brute_force(), &ctx("mitre-attack-mapper", &[]))
        .await
        .unwrap();

    assert_eq!(output.data["technique_ids"].string_list(), vec!["T1110"]);
    assert_eq!(output.data["tactics"].string_list(), vec!["Credential Access"]);
    assert_eq!(output.data["mapped"], Value::from(true));
}

#[tokio::test]
async fn test_soar_dry_run_plans_and_skips_missing_targets() {
    let node = SoarResponseActionNode::new(offline(Duration::from_secs(1)));
    let actions = Value::from(vec![
        "block_ip".to_string(),
        "disable_user".to_string(),
        "block_domain".to_string(),
    ]);

    let output = node
        .execute(&brute_force(), &ctx(SOAR_NODE_ID, &[("actions", actions)]))
        .await
        .unwrap();

    assert_eq!(output.data["dry_run"], Value::from(true));
    assert_eq!(output.data["planned"], Value::from(2usize));
    assert_eq!(output.data["skipped"], Value::from(1usize));
    assert_eq!(output.data["executed"], Value::from(0usize));
}

#[tokio::test]
async fn test_soar_live_dispatch_without_orchestrator_queues() {
    let node = SoarResponseActionNode::new(offline(Duration::from_secs(1)));

    let output = node
        .execute(
            &brute_force(),
            &ctx(SOAR_NODE_ID, &[("dry_run", Value::from(false))]),
        )
        .await
        .unwrap();

    assert_eq!(output.data["queued"], Value::from(1usize));
    let actions = output.data["actions"].as_array().unwrap();
    let first = actions[0].as_object().unwrap();
    assert_eq!(first["status"], Value::from("queued"));
    assert_eq!(first["fallback"], Value::from(true));
}

#[tokio::test]
async fn test_soar_respects_min_risk_and_rejects_unknown_actions() {
    let node = SoarResponseActionNode::new(offline(Duration::from_secs(1)));

    let output = node
        .execute(
            &brute_force(),
            &ctx(SOAR_NODE_ID, &[("min_risk_score", Value::from(9.0))]),
        )
        .await
        .unwrap();
    assert_eq!(output.data["below_threshold"], Value::from(true));
    assert_eq!(output.data["actions"], Value::Array(Vec::new()));

    let mut config = HashMap::new();
    config.insert(
        "actions".to_string(),
        Value::from(vec!["block_ip".to_string(), "format_disk".to_string()]),
    );
    let validation = node.configure(&config);
    assert!(!validation.valid);
    assert!(validation.errors[0].contains("format_disk"));
}

#[test]
fn test_register_all_registers_every_builtin() {
    let registry = NodeRegistry::new();
    let limiter = Arc::new(RateLimiter::new(5, Duration::from_secs(60)));

    register_all(&registry, limiter, &NodesConfig::default());

    assert_eq!(registry.len(), 7);
    assert!(registry.contains(INPUT_NODE_ID));
    assert_eq!(registry.by_type("soar-action")[0].id, SOAR_NODE_ID);
}

#[tokio::test]
async fn test_builtin_triage_workflow_raises_incident_offline() {
    let runtime = GuardRuntime::new();
    register_all(
        runtime.registry(),
        runtime.rate_limiter().clone(),
        &NodesConfig::default(),
    );

    let mut graph = WorkflowGraph::new("wf-builtin", "Built-in triage");
    graph.add_node(WorkflowNode::new("in", "input"));
    graph.add_node(WorkflowNode::new("ml", "ml-scoring"));
    graph.add_node(WorkflowNode::new("ai", "ai-analysis"));
    graph.add_node(WorkflowNode::new("mitre", "mitre-mapping"));
    graph.add_node(WorkflowNode::new("respond", "soar-action"));
    graph.connect("in", "ml");
    graph.connect("ml", "ai");
    graph.connect("ai", "mitre");
    graph.connect("mitre", "respond");

    assert!(runtime.validate_graph(&graph).valid);

    let event = SecurityEvent::new("Ransomware", 9.5).with_field("source_ip", "198.51.100.20");
    let result = runtime.execute_workflow(&graph, event).await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.summary.succeeded, 5);
    let ai = result.output["ai-analysis"].as_object().unwrap();
    assert_eq!(ai["threat_level"], Value::from("critical"));
    let mitre = result.output["mitre-mapping"].as_object().unwrap();
    assert_eq!(mitre["technique_ids"].string_list(), vec!["T1486"]);

    let incident = result.incident.expect("critical run raises an incident");
    assert_eq!(incident.severity, "critical");
    assert_eq!(incident.ai_threat_level.as_deref(), Some("critical"));
}
