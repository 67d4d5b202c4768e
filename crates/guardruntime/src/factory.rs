use crate::registry::NodeRegistry;
use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use guardcore::{
    ConfigValidation, EventBus, ExecutionEvent, ExecutionId, NodeContext, NodeError,
    NodeExecutionResult, SecurityEvent, SecurityNode, Value,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// Config key that lets a node opt out of halting a sequential chain
pub const STOP_ON_ERROR: &str = "stopOnError";

/// A node id plus the configuration to run it with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInvocation {
    pub node_id: String,
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

impl NodeInvocation {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            config: HashMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    fn stop_on_error(&self) -> bool {
        self.config
            .get(STOP_ON_ERROR)
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }
}

/// Outcome of a sequential chain
#[derive(Debug, Clone)]
pub struct SequenceResult {
    pub results: Vec<NodeExecutionResult>,
    /// Initial event with every successful output folded in
    pub output: SecurityEvent,
    /// True when a failing node stopped the chain early
    pub halted: bool,
}

/// Pre-flight verdict for a list of node invocations
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Resolves nodes from the registry and runs them with timing and fault
/// capture. No error or panic raised by a node crosses this boundary.
pub struct NodeFactory {
    registry: Arc<NodeRegistry>,
    event_bus: Arc<EventBus>,
}

impl NodeFactory {
    pub fn new(registry: Arc<NodeRegistry>, event_bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            event_bus,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Context for one invocation, wired to the event bus
    pub fn context(
        &self,
        node_id: &str,
        workflow_id: &str,
        execution_id: ExecutionId,
        config: HashMap<String, Value>,
    ) -> NodeContext {
        NodeContext::new(
            node_id,
            workflow_id,
            execution_id,
            self.event_bus.create_emitter(execution_id, node_id),
        )
        .with_config(config)
    }

    /// Execute the registry node `node_id`.
    ///
    /// The result is labelled with `ctx.node_id`, which differs from the
    /// registry id when the node runs as part of a workflow graph.
    pub async fn execute_node(
        &self,
        node_id: &str,
        event: &SecurityEvent,
        ctx: &NodeContext,
    ) -> NodeExecutionResult {
        let start = Instant::now();

        let Some(node) = self.registry.get(node_id) else {
            tracing::warn!(node_id, "Node not found in registry");
            return self.fail(ctx, node_id, NodeError::NotFound(node_id.to_string()), start);
        };

        let validation = match configure_guarded(node.as_ref(), &ctx.config) {
            Ok(validation) => validation,
            Err(e) => return self.fail(ctx, node_id, e, start),
        };
        if !validation.valid {
            return self.fail(ctx, node_id, NodeError::InvalidConfig(validation.errors), start);
        }

        self.event_bus.emit(ExecutionEvent::NodeStarted {
            execution_id: ctx.execution_id,
            node_id: ctx.node_id.clone(),
            node_type: node.descriptor().node_type,
            timestamp: Utc::now(),
        });

        let outcome = AssertUnwindSafe(node.execute(event, ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(output)) => {
                let duration_ms = elapsed_ms(start);
                tracing::info!(node_id = %ctx.node_id, registry_id = node_id, duration_ms, "Node completed");
                self.event_bus.emit(ExecutionEvent::NodeCompleted {
                    execution_id: ctx.execution_id,
                    node_id: ctx.node_id.clone(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                NodeExecutionResult::succeeded(ctx.node_id.clone(), output, duration_ms)
            }
            Ok(Err(e)) => self.fail(ctx, node_id, e, start),
            Err(panic) => self.fail(ctx, node_id, NodeError::Panicked(panic_message(panic)), start),
        }
    }

    /// Run nodes one after another, folding each successful output into the
    /// next node's input. A failing node stops the chain unless its config
    /// sets `stopOnError` to false.
    pub async fn execute_sequential(
        &self,
        invocations: &[NodeInvocation],
        initial: SecurityEvent,
        workflow_id: &str,
    ) -> SequenceResult {
        let execution_id = ExecutionId::new_v4();
        let mut current = initial;
        let mut results = Vec::with_capacity(invocations.len());
        let mut halted = false;

        for (index, invocation) in invocations.iter().enumerate() {
            let ctx = self
                .context(&invocation.node_id, workflow_id, execution_id, invocation.config.clone())
                .with_metadata("mode", "sequential")
                .with_metadata("sequence_index", index);

            let result = self.execute_node(&invocation.node_id, &current, &ctx).await;

            if result.success {
                current = current.merged(&result.data);
            }

            let stop = !result.success && invocation.stop_on_error();
            results.push(result);

            if stop {
                tracing::warn!(
                    node_id = %invocation.node_id,
                    index,
                    "Sequential execution halted by failing node"
                );
                halted = true;
                break;
            }
        }

        SequenceResult {
            results,
            output: current,
            halted,
        }
    }

    /// Run all nodes concurrently against the same event and collect every
    /// result, in invocation order.
    pub async fn execute_parallel(
        &self,
        invocations: &[NodeInvocation],
        event: &SecurityEvent,
        workflow_id: &str,
    ) -> Vec<NodeExecutionResult> {
        let execution_id = ExecutionId::new_v4();

        let contexts: Vec<NodeContext> = invocations
            .iter()
            .enumerate()
            .map(|(index, invocation)| {
                self.context(&invocation.node_id, workflow_id, execution_id, invocation.config.clone())
                    .with_metadata("mode", "parallel")
                    .with_metadata("parallel_index", index)
            })
            .collect();

        join_all(
            invocations
                .iter()
                .zip(&contexts)
                .map(|(invocation, ctx)| self.execute_node(&invocation.node_id, event, ctx)),
        )
        .await
    }

    /// Missing nodes and invalid configurations are errors; adjacent pairs
    /// whose contracts do not line up are warnings.
    pub fn validate_workflow(&self, invocations: &[NodeInvocation]) -> WorkflowValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for invocation in invocations {
            match self.registry.get(&invocation.node_id) {
                None => errors.push(format!("Node not found: {}", invocation.node_id)),
                Some(node) => {
                    let node_errors = match configure_guarded(node.as_ref(), &invocation.config) {
                        Ok(validation) => validation.errors,
                        Err(e) => vec![e.to_string()],
                    };
                    errors.extend(
                        node_errors
                            .into_iter()
                            .map(|e| format!("Node '{}': {}", invocation.node_id, e)),
                    );
                }
            }
        }

        for pair in invocations.windows(2) {
            let (source, target) = (&pair[0].node_id, &pair[1].node_id);
            if self.registry.contains(source)
                && self.registry.contains(target)
                && !self.registry.is_compatible(source, target)
            {
                warnings.push(format!(
                    "Node '{}' may not receive all required inputs from '{}'",
                    target, source
                ));
            }
        }

        WorkflowValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    fn fail(
        &self,
        ctx: &NodeContext,
        node_id: &str,
        error: NodeError,
        start: Instant,
    ) -> NodeExecutionResult {
        let duration_ms = elapsed_ms(start);
        let message = error.to_string();
        tracing::error!(
            node_id = %ctx.node_id,
            registry_id = node_id,
            duration_ms,
            error = %message,
            "Node failed"
        );
        self.event_bus.emit(ExecutionEvent::NodeFailed {
            execution_id: ctx.execution_id,
            node_id: ctx.node_id.clone(),
            error: message.clone(),
            timestamp: Utc::now(),
        });
        NodeExecutionResult::failed(ctx.node_id.clone(), message, duration_ms)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Run `configure`, turning a panic into [`NodeError::Panicked`]
pub(crate) fn configure_guarded(
    node: &dyn SecurityNode,
    config: &HashMap<String, Value>,
) -> Result<ConfigValidation, NodeError> {
    std::panic::catch_unwind(AssertUnwindSafe(|| node.configure(config)))
        .map_err(|panic| NodeError::Panicked(panic_message(panic)))
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
