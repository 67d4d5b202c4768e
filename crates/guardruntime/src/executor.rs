use crate::config::{IncidentPolicy, OrderingStrategy, RuntimeConfig};
use crate::factory::{configure_guarded, panic_message, NodeFactory, WorkflowValidation};
use crate::incident::{CaseManagement, IncidentRecord};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use guardcore::{
    event::severity_for, ExecutionEvent, ExecutionId, NodeExecutionResult, RunStatus,
    SecurityEvent, Value, WorkflowExecutionContext, WorkflowGraph,
};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub const ML_SCORING_TYPE: &str = "ml-scoring";
pub const AI_ANALYSIS_TYPE: &str = "ai-analysis";

/// Executes workflow graphs node by node against one event
pub struct WorkflowExecutor {
    factory: Arc<NodeFactory>,
    case_management: Arc<dyn CaseManagement>,
    config: RuntimeConfig,
}

impl WorkflowExecutor {
    pub fn new(
        factory: Arc<NodeFactory>,
        case_management: Arc<dyn CaseManagement>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            factory,
            case_management,
            config,
        }
    }

    pub fn execution_order(&self, graph: &WorkflowGraph) -> Vec<String> {
        execution_order(graph, self.config.ordering)
    }

    /// Execute a workflow and return the run outcome.
    ///
    /// Never fails: node faults are recorded in the result and a failed
    /// incident hand-off is only logged.
    pub async fn execute(&self, graph: &WorkflowGraph, input: SecurityEvent) -> WorkflowRunResult {
        let start = Instant::now();
        let mut ctx = WorkflowExecutionContext::new(&graph.id, input);
        let execution_id = ctx.execution_id;
        let event_bus = self.factory.event_bus();

        event_bus.emit(ExecutionEvent::WorkflowStarted {
            execution_id,
            workflow_id: graph.id.clone(),
            timestamp: Utc::now(),
        });
        self.transition(execution_id, RunStatus::Pending);

        for problem in graph.structural_errors() {
            tracing::warn!(workflow_id = %graph.id, "{}", problem);
        }

        let order = self.execution_order(graph);
        tracing::info!(
            workflow_id = %graph.id,
            %execution_id,
            nodes = order.len(),
            "Starting workflow execution"
        );
        self.transition(execution_id, RunStatus::Running);

        let mut results: Vec<NodeExecutionResult> = Vec::with_capacity(order.len());
        let mut node_types: HashMap<String, String> = HashMap::new();
        let mut critical_failure = false;

        for (position, node_id) in order.iter().enumerate() {
            let Some(node) = graph.find_node(node_id) else {
                continue;
            };

            let event = ctx.input_for(graph, node_id);
            let node_ctx = self
                .factory
                .context(node_id, &graph.id, execution_id, node.config.clone())
                .with_metadata("mode", "workflow")
                .with_metadata("position", position)
                .with_metadata("node_type", node.node_type.as_str());

            let registry_id = self.factory.registry().resolve(node);
            let result = self
                .factory
                .execute_node(&registry_id, &event, &node_ctx)
                .await;

            let failed = !result.success;
            node_types.insert(node_id.clone(), node.node_type.clone());
            ctx.record(result.clone());
            results.push(result);

            if failed && self.config.is_critical(&node.node_type) {
                tracing::error!(
                    workflow_id = %graph.id,
                    node_id = %node_id,
                    node_type = %node.node_type,
                    "Critical node failed, stopping workflow"
                );
                critical_failure = true;
                break;
            }
        }

        let status = final_status(&results, critical_failure);
        let summary = RunSummary::new(order.len(), &results);
        let output = collect_output(&results, &node_types);

        let mut incident = None;
        let mut incident_case_id = None;
        if let Some(record) = assess_risk(
            &self.config.incident,
            &ctx,
            graph,
            &results,
            &node_types,
        ) {
            incident_case_id = self.emit_incident(&record).await;
            incident = Some(record);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        self.transition(execution_id, status);
        event_bus.emit(ExecutionEvent::WorkflowCompleted {
            execution_id,
            status,
            duration_ms,
            timestamp: Utc::now(),
        });
        tracing::info!(
            workflow_id = %graph.id,
            %execution_id,
            %status,
            duration_ms,
            "Workflow execution finished"
        );

        WorkflowRunResult {
            workflow_id: graph.id.clone(),
            execution_id,
            status,
            execution_order: order,
            results,
            node_results: ctx.node_results,
            output,
            summary,
            incident,
            incident_case_id,
            started_at: ctx.started_at,
            completed_at: Utc::now(),
        }
    }

    /// Structural check of a graph: unknown registry nodes and invalid
    /// configurations are errors; cycles, dangling edges, missing `input`
    /// nodes and contract mismatches along edges are warnings.
    pub fn validate_graph(&self, graph: &WorkflowGraph) -> WorkflowValidation {
        let registry = self.factory.registry();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for problem in graph.structural_errors() {
            warnings.push(problem.to_string());
        }

        for node in &graph.nodes {
            let registry_id = registry.resolve(node);
            match registry.get(&registry_id) {
                None => errors.push(format!("Node '{}': Node not found: {}", node.id, registry_id)),
                Some(instance) => {
                    let node_errors = match configure_guarded(instance.as_ref(), &node.config) {
                        Ok(validation) => validation.errors,
                        Err(e) => vec![e.to_string()],
                    };
                    errors.extend(
                        node_errors
                            .into_iter()
                            .map(|e| format!("Node '{}': {}", node.id, e)),
                    );
                }
            }
        }

        if !graph.nodes.iter().any(|n| n.is_input()) {
            warnings.push("Workflow has no input node; nodes run in declaration order".to_string());
        }

        let indexed = IndexedGraph::build(graph);
        if is_cyclic_directed(&indexed.graph) {
            warnings.push("Workflow contains a cycle; each node still runs once".to_string());
        }

        for edge in &graph.edges {
            let source = graph.find_node(&edge.source);
            let target = graph.find_node(&edge.target);
            let (Some(source), Some(target)) = (source, target) else {
                continue;
            };
            let (source_id, target_id) = (registry.resolve(source), registry.resolve(target));
            if registry.contains(&source_id)
                && registry.contains(&target_id)
                && !registry.is_compatible(&source_id, &target_id)
            {
                warnings.push(format!(
                    "Node '{}' may not receive all required inputs from '{}'",
                    target.id, source.id
                ));
            }
        }

        WorkflowValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    fn transition(&self, execution_id: ExecutionId, status: RunStatus) {
        tracing::debug!(%execution_id, %status, "Run status changed");
        self.factory
            .event_bus()
            .emit(ExecutionEvent::WorkflowStatusChanged {
                execution_id,
                status,
                timestamp: Utc::now(),
            });
    }

    async fn emit_incident(&self, record: &IncidentRecord) -> Option<String> {
        let outcome = AssertUnwindSafe(self.case_management.create_incident(record))
            .catch_unwind()
            .await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => {
                tracing::error!(
                    incident_id = %record.id,
                    error = %panic_message(panic),
                    "Case management panicked while creating incident"
                );
                return None;
            }
        };

        match outcome {
            Ok(case_id) => {
                tracing::info!(
                    incident_id = %record.id,
                    case_id = %case_id,
                    severity = %record.severity,
                    "Incident created"
                );
                self.factory
                    .event_bus()
                    .emit(ExecutionEvent::IncidentRaised {
                        execution_id: record.execution_id,
                        incident_id: record.id.to_string(),
                        severity: record.severity.clone(),
                        timestamp: Utc::now(),
                    });
                Some(case_id)
            }
            Err(e) => {
                tracing::error!(incident_id = %record.id, error = %e, "Failed to create incident");
                None
            }
        }
    }
}

/// Outcome of one workflow run
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRunResult {
    pub workflow_id: String,
    pub execution_id: ExecutionId,
    pub status: RunStatus,
    pub execution_order: Vec<String>,
    /// Results in execution order
    pub results: Vec<NodeExecutionResult>,
    pub node_results: HashMap<String, NodeExecutionResult>,
    /// Successful outputs keyed by node type
    pub output: HashMap<String, Value>,
    pub summary: RunSummary,
    pub incident: Option<IncidentRecord>,
    /// Case id returned by case management, when the hand-off succeeded
    pub incident_case_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RunSummary {
    pub total_nodes: usize,
    pub executed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Nodes never started because a critical node failed
    pub skipped: usize,
    pub total_time_ms: u64,
    pub average_time_ms: f64,
}

impl RunSummary {
    fn new(total_nodes: usize, results: &[NodeExecutionResult]) -> Self {
        let executed = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        let total_time_ms: u64 = results.iter().map(|r| r.execution_time_ms).sum();
        Self {
            total_nodes,
            executed,
            succeeded,
            failed: executed - succeeded,
            skipped: total_nodes.saturating_sub(executed),
            total_time_ms,
            average_time_ms: if executed == 0 {
                0.0
            } else {
                total_time_ms as f64 / executed as f64
            },
        }
    }
}

/// Compute the order in which workflow nodes run.
///
/// Every distinct declared node id appears exactly once, whatever the
/// edges look like. Nodes not reached by the strategy are appended in
/// declaration order.
pub fn execution_order(graph: &WorkflowGraph, strategy: OrderingStrategy) -> Vec<String> {
    let indexed = IndexedGraph::build(graph);
    let order = match strategy {
        OrderingStrategy::BreadthFirst => indexed.breadth_first(graph),
        OrderingStrategy::Topological => indexed.kahn(),
    };
    indexed.complete(order)
}

struct IndexedGraph<'a> {
    graph: DiGraph<&'a str, ()>,
    index: HashMap<&'a str, NodeIndex>,
}

impl<'a> IndexedGraph<'a> {
    fn build(workflow: &'a WorkflowGraph) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for node in &workflow.nodes {
            index
                .entry(node.id.as_str())
                .or_insert_with(|| graph.add_node(node.id.as_str()));
        }
        for edge in &workflow.edges {
            if let (Some(&from), Some(&to)) =
                (index.get(edge.source.as_str()), index.get(edge.target.as_str()))
            {
                graph.add_edge(from, to, ());
            }
        }

        Self { graph, index }
    }

    /// Edge targets of `idx` in edge declaration order
    fn successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut edges: Vec<_> = self.graph.edges(idx).collect();
        edges.sort_by_key(|e| e.id());
        edges.into_iter().map(|e| e.target()).collect()
    }

    fn breadth_first(&self, workflow: &WorkflowGraph) -> Vec<NodeIndex> {
        let mut queue: VecDeque<NodeIndex> = workflow
            .nodes
            .iter()
            .filter(|n| n.is_input())
            .filter_map(|n| self.index.get(n.id.as_str()).copied())
            .collect();
        let mut visited = HashSet::new();
        let mut order = Vec::new();

        while let Some(idx) = queue.pop_front() {
            if !visited.insert(idx) {
                continue;
            }
            order.push(idx);
            queue.extend(self.successors(idx).into_iter().filter(|t| !visited.contains(t)));
        }
        order
    }

    fn kahn(&self) -> Vec<NodeIndex> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| self.graph.edges_directed(idx, Direction::Incoming).count())
            .collect();

        let mut queue: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .collect();
        let mut order = Vec::new();

        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            for target in self.successors(idx) {
                in_degree[target.index()] -= 1;
                if in_degree[target.index()] == 0 {
                    queue.push_back(target);
                }
            }
        }
        order
    }

    fn complete(&self, order: Vec<NodeIndex>) -> Vec<String> {
        let seen: HashSet<NodeIndex> = order.iter().copied().collect();
        order
            .into_iter()
            .chain(self.graph.node_indices().filter(|idx| !seen.contains(idx)))
            .map(|idx| self.graph[idx].to_string())
            .collect()
    }
}

fn final_status(results: &[NodeExecutionResult], critical_failure: bool) -> RunStatus {
    if critical_failure || results.is_empty() {
        RunStatus::Failed
    } else if results.iter().any(|r| !r.success) {
        RunStatus::Partial
    } else {
        RunStatus::Completed
    }
}

fn collect_output(
    results: &[NodeExecutionResult],
    node_types: &HashMap<String, String>,
) -> HashMap<String, Value> {
    let mut output = HashMap::new();
    for result in results.iter().filter(|r| r.success) {
        if let Some(node_type) = node_types.get(&result.node_id) {
            output.insert(node_type.clone(), Value::Object(result.data.clone()));
        }
    }
    output
}

fn latest_success<'r>(
    results: &'r [NodeExecutionResult],
    node_types: &HashMap<String, String>,
    node_type: &str,
) -> Option<&'r NodeExecutionResult> {
    results.iter().rev().find(|r| {
        r.success && node_types.get(&r.node_id).is_some_and(|t| t == node_type)
    })
}

/// Build an incident when the latest ML or AI result signals elevated risk
fn assess_risk(
    policy: &IncidentPolicy,
    ctx: &WorkflowExecutionContext,
    graph: &WorkflowGraph,
    results: &[NodeExecutionResult],
    node_types: &HashMap<String, String>,
) -> Option<IncidentRecord> {
    let ml = latest_success(results, node_types, ML_SCORING_TYPE);
    let ai = latest_success(results, node_types, AI_ANALYSIS_TYPE);

    let ml_score = ml.and_then(|r| r.get("threat_score").and_then(Value::as_f64));
    let ml_confidence = ml.and_then(|r| {
        r.get("confidence")
            .and_then(Value::as_f64)
            .or(r.confidence)
    });
    let threat_level = ai
        .and_then(|r| r.get("threat_level").and_then(Value::as_str))
        .map(str::to_lowercase);

    let scaled = ml_score.map(rescale_score);
    let probability = ml_score.map(|s| if s <= 1.0 { s } else { s / 10.0 });

    let by_score = scaled.is_some_and(|s| s >= policy.score_threshold);
    let by_level = threat_level
        .as_deref()
        .is_some_and(|level| policy.threat_levels.iter().any(|t| t.eq_ignore_ascii_case(level)));
    let by_confidence = probability.is_some_and(|p| p >= policy.probability_threshold)
        && ml_confidence.is_some_and(|c| c >= policy.confidence_threshold);

    if !(by_score || by_level || by_confidence) {
        return None;
    }

    let risk_score = scaled.unwrap_or_else(|| ctx.input.risk_score());
    let severity = if threat_level.as_deref() == Some("critical") {
        "critical".to_string()
    } else {
        severity_for(risk_score.max(7.0)).to_lowercase()
    };

    let mut recommendations: Vec<String> = Vec::new();
    for rec in ai.into_iter().chain(ml).flat_map(|r| r.recommendations.iter()) {
        if !recommendations.contains(rec) {
            recommendations.push(rec.clone());
        }
    }

    Some(IncidentRecord {
        id: Uuid::new_v4(),
        workflow_id: ctx.workflow_id.clone(),
        execution_id: ctx.execution_id,
        title: format!("{} detected by workflow '{}'", ctx.input.threat_type(), graph.name),
        severity,
        risk_score,
        threat_type: ctx.input.threat_type().to_string(),
        event_id: ctx.input.event_id().to_string(),
        ml_confidence,
        ai_threat_level: threat_level,
        recommendations,
        created_at: Utc::now(),
    })
}

/// Map an ML score onto the 1–10 scale; probabilities are multiplied by 10
fn rescale_score(score: f64) -> f64 {
    let scaled = if score <= 1.0 { score * 10.0 } else { score };
    scaled.clamp(1.0, 10.0)
}
