use crate::{
    CaseManagement, LoggingCaseManagement, NodeFactory, NodeInvocation, NodeRegistry,
    RateLimiter, RuntimeConfig, SequenceResult, WorkflowExecutor, WorkflowRunResult,
    WorkflowValidation,
};
use guardcore::{
    EventBus, ExecutionEvent, ExecutionId, NodeExecutionResult, SecurityEvent, Value,
    WorkflowGraph,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Workflow id used for single-node runs outside any workflow
pub const AD_HOC_WORKFLOW_ID: &str = "ad-hoc";

/// Entry point used by the boundary layer.
///
/// Owns the registry, the shared rate limiter and the event bus for the
/// lifetime of the process; each run gets its own execution context.
pub struct GuardRuntime {
    registry: Arc<NodeRegistry>,
    factory: Arc<NodeFactory>,
    executor: Arc<WorkflowExecutor>,
    rate_limiter: Arc<RateLimiter>,
    event_bus: Arc<EventBus>,
    config: RuntimeConfig,
}

impl GuardRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime that logs incidents instead of forwarding them
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_case_management(config, Arc::new(LoggingCaseManagement))
    }

    pub fn with_case_management(
        config: RuntimeConfig,
        case_management: Arc<dyn CaseManagement>,
    ) -> Self {
        let registry = Arc::new(NodeRegistry::new());
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let rate_limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let factory = Arc::new(NodeFactory::new(registry.clone(), event_bus.clone()));
        let executor = Arc::new(WorkflowExecutor::new(
            factory.clone(),
            case_management,
            config.clone(),
        ));

        Self {
            registry,
            factory,
            executor,
            rate_limiter,
            event_bus,
            config,
        }
    }

    /// Node registry, for registering node implementations
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Limiter shared by every node that makes budgeted calls
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn factory(&self) -> &Arc<NodeFactory> {
        &self.factory
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Single-node execution for ad-hoc testing
    pub async fn execute_node(
        &self,
        node_id: &str,
        event: &SecurityEvent,
        config: HashMap<String, Value>,
    ) -> NodeExecutionResult {
        let ctx = self
            .factory
            .context(node_id, AD_HOC_WORKFLOW_ID, ExecutionId::new_v4(), config)
            .with_metadata("mode", "single");
        self.factory.execute_node(node_id, event, &ctx).await
    }

    /// Full graph run
    pub async fn execute_workflow(
        &self,
        graph: &WorkflowGraph,
        input: SecurityEvent,
    ) -> WorkflowRunResult {
        self.executor.execute(graph, input).await
    }

    pub async fn execute_sequential(
        &self,
        invocations: &[NodeInvocation],
        initial: SecurityEvent,
        workflow_id: &str,
    ) -> SequenceResult {
        self.factory
            .execute_sequential(invocations, initial, workflow_id)
            .await
    }

    pub async fn execute_parallel(
        &self,
        invocations: &[NodeInvocation],
        event: &SecurityEvent,
        workflow_id: &str,
    ) -> Vec<NodeExecutionResult> {
        self.factory
            .execute_parallel(invocations, event, workflow_id)
            .await
    }

    /// Pre-flight check of a node list before persisting a workflow
    pub fn validate_workflow(&self, invocations: &[NodeInvocation]) -> WorkflowValidation {
        self.factory.validate_workflow(invocations)
    }

    /// Pre-flight check of a full graph definition
    pub fn validate_graph(&self, graph: &WorkflowGraph) -> WorkflowValidation {
        self.executor.validate_graph(graph)
    }

    pub fn execution_order(&self, graph: &WorkflowGraph) -> Vec<String> {
        self.executor.execution_order(graph)
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for GuardRuntime {
    fn default() -> Self {
        Self::new()
    }
}
