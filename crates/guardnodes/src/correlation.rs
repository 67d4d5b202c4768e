use crate::classifier::{ClassifierClient, TIMEOUT_MS};
use crate::support::{number, strings, text};
use async_trait::async_trait;
use guardcore::{
    ConfigValidation, FieldType, NodeCategory, NodeContext, NodeDescriptor, NodeError,
    NodeOutput, NodeSchema, SchemaField, SecurityEvent, SecurityNode, Value,
};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

pub const CORRELATION_NODE_ID: &str = "event-correlation";
pub const CORRELATION_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_WINDOW: &str = "5m";
const FALLBACK_CONFIDENCE: f64 = 0.3;
const SINGLE_EVENT: &str = "single_event";

/// Finds events related to the current one within a time window, grouped
/// by configurable fields.
pub struct EventCorrelationNode {
    client: ClassifierClient,
}

impl EventCorrelationNode {
    pub fn new(client: ClassifierClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecurityNode for EventCorrelationNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            id: CORRELATION_NODE_ID.to_string(),
            category: NodeCategory::Core,
            node_type: "correlation".to_string(),
            name: "Event Correlation".to_string(),
            description: "Correlates the event with recent related events".to_string(),
            version: "1.0.0".to_string(),
        }
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new()
            .output(SchemaField::new("related_events_count", FieldType::Number))
            .output(SchemaField::new("related_event_ids", FieldType::Array))
            .output(SchemaField::new("pattern", FieldType::String))
            .output(SchemaField::new("anomaly_score", FieldType::Number))
            .output(SchemaField::new("correlation_strength", FieldType::String))
            .output(SchemaField::new("risk_adjustment", FieldType::Number))
            .config_field(
                SchemaField::new("time_window", FieldType::String)
                    .with_description("Window such as 30s, 5m, 1h or 2d")
                    .with_default(DEFAULT_WINDOW),
            )
            .config_field(
                SchemaField::new("group_by", FieldType::Array)
                    .with_description("Event fields that form the correlation key"),
            )
            .config_field(SchemaField::new(TIMEOUT_MS, FieldType::Number))
    }

    fn configure(&self, config: &HashMap<String, Value>) -> ConfigValidation {
        let mut validation = self.schema().validate_config(config);
        if let Some(window) = config.get("time_window").and_then(Value::as_str) {
            if parse_time_window(window).is_none() {
                validation.push_error(format!(
                    "Field 'time_window' must look like 30s, 5m, 1h or 2d, got '{window}'"
                ));
            }
        }
        validation
    }

    async fn execute(
        &self,
        event: &SecurityEvent,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let window_label = ctx.config_str("time_window").unwrap_or(DEFAULT_WINDOW);
        let window = parse_time_window(window_label).unwrap_or(Duration::from_secs(300));
        let mut group_by = ctx
            .config
            .get("group_by")
            .map(Value::string_list)
            .unwrap_or_default();
        if group_by.is_empty() {
            group_by.push("source_ip".to_string());
        }
        let key = correlation_key(event, &group_by);

        let payload = json!({
            "event": event.to_json(),
            "correlation_key": key,
            "group_by": group_by,
            "time_window": window_label,
            "time_window_secs": window.as_secs(),
        });

        let found = match self.client.classify(&payload, self.client.timeout_for(ctx)).await {
            Ok(response) => Correlation::from_response(&response),
            Err(e) => {
                tracing::warn!(node_id = %ctx.node_id, error = %e, "Correlation service unavailable, assuming no related events");
                ctx.events.warn("Correlation service unavailable");
                Correlation::none()
            }
        };

        let count = found.related_event_ids.len();
        let strength = correlation_strength(count, window);
        let adjustment = risk_adjustment(&found.pattern, found.anomaly_score, found.confidence);
        let summary = if count == 0 {
            format!(
                "No related events found within {} when grouped by {}",
                window_label,
                group_by.join(", ")
            )
        } else {
            format!(
                "Found {} related events ({}) within {} when grouped by {}",
                count,
                found.pattern,
                window_label,
                group_by.join(", ")
            )
        };

        Ok(NodeOutput::new()
            .with_output("correlation_key", key)
            .with_output("related_events_count", count)
            .with_output("related_event_ids", found.related_event_ids)
            .with_output("pattern", found.pattern)
            .with_output("anomaly_score", found.anomaly_score)
            .with_output("correlation_strength", strength)
            .with_output("risk_adjustment", adjustment)
            .with_output("summary", summary)
            .with_output("fallback", found.fallback)
            .with_confidence(found.confidence))
    }
}

struct Correlation {
    related_event_ids: Vec<String>,
    pattern: String,
    anomaly_score: f64,
    confidence: f64,
    fallback: bool,
}

impl Correlation {
    fn none() -> Self {
        Self {
            related_event_ids: Vec::new(),
            pattern: SINGLE_EVENT.to_string(),
            anomaly_score: 0.5,
            confidence: FALLBACK_CONFIDENCE,
            fallback: true,
        }
    }

    fn from_response(response: &HashMap<String, Value>) -> Self {
        let related_event_ids = strings(response, "related_event_ids");
        let pattern = text(response, "pattern")
            .filter(|p| !p.is_empty())
            .unwrap_or(SINGLE_EVENT)
            .to_string();
        Self {
            anomaly_score: number(response, "anomaly_score")
                .unwrap_or(0.5)
                .clamp(0.0, 1.0),
            confidence: number(response, "confidence")
                .or_else(|| number(response, "pattern_confidence"))
                .unwrap_or(0.5)
                .clamp(0.0, 1.0),
            related_event_ids,
            pattern,
            fallback: false,
        }
    }
}

/// Parse `<n><s|m|h|d>`; anything else is rejected
pub fn parse_time_window(window: &str) -> Option<Duration> {
    let window = window.trim().to_ascii_lowercase();
    let unit = window.chars().last()?;
    let amount: u64 = window[..window.len() - unit.len_utf8()].parse().ok()?;
    let multiplier: u64 = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86_400,
        _ => return None,
    };
    let secs = amount.checked_mul(multiplier)?;
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn correlation_key(event: &SecurityEvent, group_by: &[String]) -> String {
    group_by
        .iter()
        .map(|field| {
            let value = event
                .get(field)
                .filter(|v| !v.is_null())
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_json().to_string(),
                })
                .unwrap_or_else(|| "unknown".to_string());
            format!("{field}:{value}")
        })
        .collect::<Vec<_>>()
        .join("|")
}

pub fn correlation_strength(count: usize, window: Duration) -> &'static str {
    let hours = window.as_secs_f64() / 3600.0;
    let per_hour = count as f64 / hours;
    if per_hour >= 10.0 {
        "very_strong"
    } else if per_hour >= 5.0 {
        "strong"
    } else if per_hour >= 2.0 {
        "moderate"
    } else if per_hour >= 0.5 {
        "weak"
    } else {
        "very_weak"
    }
}

/// Multiplier in [0.5, 3.0] applied to risk by downstream consumers
pub fn risk_adjustment(pattern: &str, anomaly_score: f64, confidence: f64) -> f64 {
    let pattern_factor = match pattern {
        "repetitive_attack" => 1.5,
        "escalation" => 1.8,
        "burst_activity" => 1.3,
        "sequence" => 1.1,
        _ => 1.0,
    };
    (pattern_factor * (1.0 + anomaly_score * 0.5) * (1.0 + confidence * 0.3)).clamp(0.5, 3.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_window() {
        assert_eq!(parse_time_window("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_time_window("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_time_window("2H"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_time_window("1d"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_time_window("0m"), None);
        assert_eq!(parse_time_window("5w"), None);
        assert_eq!(parse_time_window("m"), None);
        assert_eq!(parse_time_window(""), None);
        assert_eq!(parse_time_window("999999999999999999d"), None);
        assert_eq!(parse_time_window("99999999999999999999s"), None);
    }

    #[test]
    fn test_correlation_strength_scales_with_window() {
        assert_eq!(correlation_strength(0, Duration::from_secs(300)), "very_weak");
        assert_eq!(correlation_strength(1, Duration::from_secs(300)), "very_strong");
        assert_eq!(correlation_strength(6, Duration::from_secs(3600)), "strong");
        assert_eq!(correlation_strength(1, Duration::from_secs(7200)), "weak");
    }

    #[test]
    fn test_risk_adjustment_is_capped() {
        assert!((risk_adjustment("single_event", 0.0, 0.0) - 1.0).abs() < 1e-9);
        assert_eq!(risk_adjustment("escalation", 1.0, 1.0), 3.0);
    }

    #[test]
    fn test_correlation_key_marks_missing_fields() {
        let event = SecurityEvent::new("Brute Force", 6.0).with_field("source_ip", "198.51.100.4");
        let key = correlation_key(&event, &["source_ip".to_string(), "user_id".to_string()]);
        assert_eq!(key, "source_ip:198.51.100.4|user_id:unknown");
    }
}
