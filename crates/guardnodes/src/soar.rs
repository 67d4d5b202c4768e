use crate::classifier::{ClassifierClient, TIMEOUT_MS};
use crate::support::text;
use async_trait::async_trait;
use futures::future::join_all;
use guardcore::event::RISK_SCORE;
use guardcore::{
    ConfigValidation, FieldType, NodeCategory, NodeContext, NodeDescriptor, NodeError,
    NodeOutput, NodeSchema, SchemaField, SecurityEvent, SecurityNode, Value,
};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

pub const SOAR_NODE_ID: &str = "soar-response-action";
pub const SOAR_TIMEOUT: Duration = Duration::from_secs(10);

/// Supported response actions and the event fields that name their target,
/// in order of preference
const ACTION_TARGETS: &[(&str, &[&str])] = &[
    ("block_ip", &["source_ip"]),
    ("quarantine_host", &["hostname", "asset_id"]),
    ("disable_user", &["user_id", "username"]),
    ("isolate_network", &["network_segment"]),
    ("block_domain", &["domain"]),
    ("kill_process", &["process_id", "process_name"]),
    ("collect_forensics", &["hostname", "asset_id"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    /// Dry run: recorded, not sent
    Planned,
    Executed,
    Failed,
    /// Dispatch failed or no orchestrator; left for an operator
    Queued,
    /// No target on the event
    Skipped,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Planned => "planned",
            ActionStatus::Executed => "executed",
            ActionStatus::Failed => "failed",
            ActionStatus::Queued => "queued",
            ActionStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub action_id: String,
    pub action_type: String,
    pub target: Option<String>,
    pub status: ActionStatus,
    pub fallback: bool,
    pub detail: Option<String>,
}

impl ActionOutcome {
    fn new(action_type: &str, target: Option<String>, status: ActionStatus) -> Self {
        Self {
            action_id: Uuid::new_v4().to_string(),
            action_type: action_type.to_string(),
            target,
            status,
            fallback: false,
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        map.insert("action_id".to_string(), Value::from(self.action_id.as_str()));
        map.insert("action_type".to_string(), Value::from(self.action_type.as_str()));
        map.insert(
            "target".to_string(),
            self.target.as_deref().map_or(Value::Null, Value::from),
        );
        map.insert("status".to_string(), Value::from(self.status.as_str()));
        map.insert("fallback".to_string(), Value::from(self.fallback));
        if let Some(detail) = &self.detail {
            map.insert("detail".to_string(), Value::from(detail.as_str()));
        }
        Value::Object(map)
    }
}

/// Dispatches containment actions to a SOAR orchestrator, all at once.
///
/// Dry run is the default: actions are only recorded as planned.
pub struct SoarResponseActionNode {
    client: ClassifierClient,
}

impl SoarResponseActionNode {
    pub fn new(client: ClassifierClient) -> Self {
        Self { client }
    }

    async fn dispatch(
        &self,
        action_type: &str,
        target: String,
        event: &SecurityEvent,
        ctx: &NodeContext,
        timeout: Duration,
    ) -> ActionOutcome {
        #[derive(Serialize)]
        struct Request<'a> {
            action_type: &'a str,
            target: &'a str,
            event_id: &'a str,
            workflow_id: &'a str,
            execution_id: String,
        }

        let request = Request {
            action_type,
            target: &target,
            event_id: event.event_id(),
            workflow_id: &ctx.workflow_id,
            execution_id: ctx.execution_id.to_string(),
        };

        match self.client.classify(&request, timeout).await {
            Ok(response) => {
                let status = match text(&response, "status").map(str::to_ascii_lowercase) {
                    Some(s) if s == "failed" => ActionStatus::Failed,
                    _ => ActionStatus::Executed,
                };
                let mut outcome = ActionOutcome::new(action_type, Some(target), status);
                if let Some(id) = text(&response, "action_id") {
                    outcome.action_id = id.to_string();
                }
                if let Some(message) = text(&response, "message") {
                    outcome = outcome.with_detail(message);
                }
                outcome
            }
            Err(e) => {
                tracing::warn!(
                    node_id = %ctx.node_id,
                    action_type,
                    error = %e,
                    "Response action dispatch failed, queued for manual handling"
                );
                let mut outcome = ActionOutcome::new(action_type, Some(target), ActionStatus::Queued)
                    .with_detail(e.to_string());
                outcome.fallback = true;
                outcome
            }
        }
    }
}

#[async_trait]
impl SecurityNode for SoarResponseActionNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            id: SOAR_NODE_ID.to_string(),
            category: NodeCategory::Soar,
            node_type: "soar-action".to_string(),
            name: "SOAR Response Action".to_string(),
            description: "Dispatches containment actions such as IP blocks and host quarantine"
                .to_string(),
            version: "1.0.0".to_string(),
        }
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new()
            .input(SchemaField::new(RISK_SCORE, FieldType::Number).required())
            .output(SchemaField::new("actions", FieldType::Array))
            .output(SchemaField::new("executed", FieldType::Number))
            .output(SchemaField::new("queued", FieldType::Number))
            .config_field(
                SchemaField::new("actions", FieldType::Array)
                    .with_description("Action types to run; defaults to block_ip"),
            )
            .config_field(
                SchemaField::new("dry_run", FieldType::Boolean)
                    .with_description("Record planned actions without dispatching")
                    .with_default(true),
            )
            .config_field(
                SchemaField::new("min_risk_score", FieldType::Number)
                    .with_description("Skip all actions below this risk score")
                    .with_default(0.0),
            )
            .config_field(SchemaField::new(TIMEOUT_MS, FieldType::Number))
    }

    fn configure(&self, config: &HashMap<String, Value>) -> ConfigValidation {
        let mut validation = self.schema().validate_config(config);
        if let Some(actions) = config.get("actions").and_then(Value::as_array) {
            for action in actions {
                match action.as_str() {
                    Some(name) if target_fields(name).is_some() => {}
                    Some(name) => validation.push_error(format!("Unsupported action type: {name}")),
                    None => validation.push_error("Field 'actions' must contain strings"),
                }
            }
        }
        validation
    }

    async fn execute(
        &self,
        event: &SecurityEvent,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let dry_run = ctx.config_bool("dry_run").unwrap_or(true);
        let min_risk = ctx.config_f64("min_risk_score").unwrap_or(0.0);
        let mut actions = ctx
            .config
            .get("actions")
            .map(Value::string_list)
            .unwrap_or_default();
        if actions.is_empty() {
            actions.push("block_ip".to_string());
        }

        if event.risk_score() < min_risk {
            ctx.events.info(format!(
                "Risk {:.1} below {:.1}, no response actions",
                event.risk_score(),
                min_risk
            ));
            return Ok(summary_output(&[], dry_run, true));
        }

        let timeout = self.client.timeout_for(ctx);
        let mut outcomes: Vec<ActionOutcome> = Vec::with_capacity(actions.len());
        let mut pending = Vec::new();

        for action in &actions {
            let target = resolve_target(action, event);
            match (target, dry_run) {
                (None, _) => outcomes.push(
                    ActionOutcome::new(action, None, ActionStatus::Skipped)
                        .with_detail("no target on event"),
                ),
                (Some(target), true) => {
                    outcomes.push(ActionOutcome::new(action, Some(target), ActionStatus::Planned))
                }
                (Some(target), false) => {
                    pending.push(self.dispatch(action, target, event, ctx, timeout))
                }
            }
        }

        outcomes.extend(join_all(pending).await);

        tracing::info!(
            node_id = %ctx.node_id,
            dry_run,
            actions = outcomes.len(),
            "Response actions processed"
        );

        Ok(summary_output(&outcomes, dry_run, false))
    }
}

fn summary_output(outcomes: &[ActionOutcome], dry_run: bool, below_threshold: bool) -> NodeOutput {
    let count = |status: ActionStatus| outcomes.iter().filter(|o| o.status == status).count();
    NodeOutput::new()
        .with_output(
            "actions",
            Value::Array(outcomes.iter().map(ActionOutcome::to_value).collect()),
        )
        .with_output("executed", count(ActionStatus::Executed))
        .with_output("planned", count(ActionStatus::Planned))
        .with_output("queued", count(ActionStatus::Queued))
        .with_output("failed", count(ActionStatus::Failed))
        .with_output("skipped", count(ActionStatus::Skipped))
        .with_output("dry_run", dry_run)
        .with_output("below_threshold", below_threshold)
}

fn target_fields(action: &str) -> Option<&'static [&'static str]> {
    ACTION_TARGETS
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, fields)| *fields)
}

fn resolve_target(action: &str, event: &SecurityEvent) -> Option<String> {
    target_fields(action)?.iter().find_map(|field| {
        event.get(field).and_then(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_target_prefers_first_field() {
        let event = SecurityEvent::new("Malware", 8.0)
            .with_field("hostname", "ws-042")
            .with_field("asset_id", "A-17")
            .with_field("process_id", 4242.0);

        assert_eq!(resolve_target("quarantine_host", &event).as_deref(), Some("ws-042"));
        assert_eq!(resolve_target("kill_process", &event).as_deref(), Some("4242"));
        assert_eq!(resolve_target("block_ip", &event), None);
        assert_eq!(resolve_target("launch_missiles", &event), None);
    }
}
