use crate::classifier::{ClassifierClient, TIMEOUT_MS};
use crate::support::{extract_indicators, number, strings, text};
use async_trait::async_trait;
use guardcore::event::{RISK_SCORE, THREAT_TYPE};
use guardcore::{
    FieldType, NodeCategory, NodeContext, NodeDescriptor, NodeError, NodeOutput, NodeSchema,
    SchemaField, SecurityEvent, SecurityNode, Value,
};
use guardruntime::RateLimiter;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const AI_NODE_ID: &str = "ai-threat-analysis";
pub const AI_TIMEOUT: Duration = Duration::from_secs(15);

/// Confidence reported for rule-based analysis
pub const FALLBACK_CONFIDENCE: f64 = 0.6;

/// Threat analysis by an external language model, rate limited per workflow
pub struct AiThreatAnalysisNode {
    client: ClassifierClient,
    rate_limiter: Arc<RateLimiter>,
}

impl AiThreatAnalysisNode {
    pub fn new(client: ClassifierClient, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            rate_limiter,
        }
    }
}

#[async_trait]
impl SecurityNode for AiThreatAnalysisNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            id: AI_NODE_ID.to_string(),
            category: NodeCategory::AiMl,
            node_type: "ai-analysis".to_string(),
            name: "AI Threat Analysis".to_string(),
            description: "Explains a threat and recommends response steps using an AI model"
                .to_string(),
            version: "1.0.0".to_string(),
        }
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new()
            .input(SchemaField::new(THREAT_TYPE, FieldType::String))
            .input(SchemaField::new(RISK_SCORE, FieldType::Number))
            .input(SchemaField::new("threat_score", FieldType::Number))
            .output(SchemaField::new("analysis", FieldType::String))
            .output(SchemaField::new("threat_level", FieldType::String))
            .output(SchemaField::new("indicators", FieldType::Array))
            .output(SchemaField::new("model_used", FieldType::String))
            .config_field(
                SchemaField::new("analysis_type", FieldType::Select)
                    .with_options(["comprehensive", "quick"])
                    .with_default("comprehensive"),
            )
            .config_field(SchemaField::new(TIMEOUT_MS, FieldType::Number))
    }

    async fn execute(
        &self,
        event: &SecurityEvent,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        if self.client.endpoint().is_none() {
            tracing::debug!(node_id = %ctx.node_id, "No AI endpoint configured, using rule-based analysis");
            return Ok(fallback_output(event));
        }

        if !self.rate_limiter.try_acquire(&ctx.workflow_id) {
            tracing::warn!(
                workflow_id = %ctx.workflow_id,
                node_id = %ctx.node_id,
                "AI analysis rate limited, using rule-based analysis"
            );
            ctx.events.warn("Rate limit reached, rule-based analysis used");
            return Ok(fallback_output(event).with_output("rate_limited", true));
        }

        let payload = json!({
            "event": event.to_json(),
            "analysis_type": ctx.config_str("analysis_type").unwrap_or("comprehensive"),
        });

        match self.client.classify(&payload, self.client.timeout_for(ctx)).await {
            Ok(response) => Ok(model_output(&response, event)),
            Err(e) => {
                tracing::warn!(node_id = %ctx.node_id, error = %e, "AI analysis unavailable, using rule-based analysis");
                ctx.events.warn(format!("AI analysis unavailable: {e}"));
                Ok(fallback_output(event))
            }
        }
    }
}

fn model_output(response: &HashMap<String, Value>, event: &SecurityEvent) -> NodeOutput {
    let threat_level = text(response, "threat_level")
        .map(str::to_lowercase)
        .unwrap_or_else(|| level_for_risk(number(response, "risk_score").unwrap_or(5.0)).to_string());

    let mut recommendations = strings(response, "recommendations");
    if recommendations.is_empty() {
        recommendations = default_recommendations(&threat_level);
    }

    let confidence = number(response, "confidence")
        .unwrap_or_else(|| completeness_confidence(event))
        .clamp(0.0, 1.0);

    NodeOutput::new()
        .with_output(
            "analysis",
            text(response, "analysis").unwrap_or("No analysis available"),
        )
        .with_output("threat_level", threat_level)
        .with_output("indicators", extract_indicators(event))
        .with_output("model_used", text(response, "model").unwrap_or("external"))
        .with_output("rate_limited", false)
        .with_output("fallback", false)
        .with_confidence(confidence)
        .with_recommendations(recommendations)
}

/// Rule-based analysis used when the model is unavailable or rate limited
pub fn fallback_output(event: &SecurityEvent) -> NodeOutput {
    let threat_level = fallback_threat_level(event.risk_score(), event.severity());
    let source = event.get_str("source_ip").unwrap_or("Unknown");
    let risk = event.risk_score();

    let analysis = format!(
        "Rule-based analysis: {} from {} with risk score {:.1}/10 and severity {} is a {}-level concern that requires {}.",
        event.threat_type(),
        source,
        risk,
        event.severity(),
        threat_level,
        if risk >= 8.0 {
            "immediate attention"
        } else {
            "monitoring and investigation"
        }
    );

    NodeOutput::new()
        .with_output("analysis", analysis)
        .with_output("threat_level", threat_level)
        .with_output("indicators", extract_indicators(event))
        .with_output("model_used", "fallback")
        .with_output("rate_limited", false)
        .with_output("fallback", true)
        .with_confidence(FALLBACK_CONFIDENCE)
        .with_recommendations(default_recommendations(threat_level))
}

pub fn fallback_threat_level(risk_score: f64, severity: &str) -> &'static str {
    let severity = severity.to_ascii_uppercase();
    if risk_score >= 9.0 || severity == "CRITICAL" {
        "critical"
    } else if risk_score >= 7.0 || severity == "HIGH" {
        "high"
    } else if risk_score >= 5.0 || severity == "MEDIUM" {
        "medium"
    } else {
        "low"
    }
}

fn level_for_risk(risk_score: f64) -> &'static str {
    fallback_threat_level(risk_score, "")
}

pub fn default_recommendations(threat_level: &str) -> Vec<String> {
    let mut recommendations = vec![
        "Monitor network traffic for suspicious activity",
        "Review security logs for related events",
        "Verify user access permissions",
    ];

    match threat_level {
        "critical" | "high" => recommendations.extend([
            "Immediately isolate affected systems",
            "Escalate to security incident response team",
            "Collect forensic evidence",
            "Block suspicious IP addresses",
            "Reset potentially compromised credentials",
        ]),
        "medium" => recommendations.extend([
            "Increase monitoring for related indicators",
            "Validate security controls effectiveness",
            "Consider temporary access restrictions",
        ]),
        _ => {}
    }

    recommendations.into_iter().map(String::from).collect()
}

/// Confidence from how complete the event is, nudged by its risk score
fn completeness_confidence(event: &SecurityEvent) -> f64 {
    let present = ["source_ip", THREAT_TYPE, RISK_SCORE, "severity"]
        .iter()
        .filter(|field| event.get(field).is_some_and(|v| !v.is_null()))
        .count();
    let mut confidence = present as f64 / 4.0;
    if event.risk_score() >= 8.0 {
        confidence += 0.1;
    } else if event.risk_score() <= 3.0 {
        confidence -= 0.1;
    }
    confidence.clamp(0.3, 0.95)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_threat_level_rules() {
        assert_eq!(fallback_threat_level(9.0, "LOW"), "critical");
        assert_eq!(fallback_threat_level(1.0, "critical"), "critical");
        assert_eq!(fallback_threat_level(7.2, "LOW"), "high");
        assert_eq!(fallback_threat_level(2.0, "MEDIUM"), "medium");
        assert_eq!(fallback_threat_level(5.0, "LOW"), "medium");
        assert_eq!(fallback_threat_level(4.9, "LOW"), "low");
    }

    #[test]
    fn test_default_recommendations_by_level() {
        assert_eq!(default_recommendations("low").len(), 3);
        assert_eq!(default_recommendations("medium").len(), 6);
        let high = default_recommendations("high");
        assert_eq!(high.len(), 8);
        assert!(high.contains(&"Collect forensic evidence".to_string()));
        assert_eq!(high, default_recommendations("critical"));
    }

    #[test]
    fn test_model_output_derives_missing_fields() {
        let event = SecurityEvent::new("Malware", 8.5).with_field("source_ip", "203.0.113.9");
        let mut response = HashMap::new();
        response.insert("analysis".to_string(), Value::from("Beaconing to known C2"));
        response.insert("risk_score".to_string(), Value::from(9.3));

        let output = model_output(&response, &event);

        assert_eq!(output.data["threat_level"], Value::from("critical"));
        assert_eq!(output.recommendations.len(), 8);
        // all four fields present plus the high-risk nudge
        assert_eq!(output.confidence, Some(0.95));
    }
}
