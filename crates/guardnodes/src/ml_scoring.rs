use crate::classifier::{ClassifierClient, TIMEOUT_MS};
use crate::support::{is_private_ip, number};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use guardcore::event::{EVENT_ID, RISK_SCORE};
use guardcore::{
    FieldType, NodeCategory, NodeContext, NodeDescriptor, NodeError, NodeOutput, NodeSchema,
    SchemaField, SecurityEvent, SecurityNode, Value,
};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

pub const ML_NODE_ID: &str = "ml-threat-scoring";
pub const ML_TIMEOUT: Duration = Duration::from_secs(10);

/// Score above which the result asks for AI analysis
const DEFAULT_AI_THRESHOLD: f64 = 0.7;
const FALLBACK_CONFIDENCE: f64 = 0.5;

/// Ensemble weights per model; unlisted models weigh 0.2
const MODEL_WEIGHTS: &[(&str, f64)] = &[
    ("xgboost", 0.4),
    ("random_forest", 0.3),
    ("isolation_forest", 0.3),
];

/// Scores an event with the external model ensemble, falling back to a
/// weighted heuristic over risk score and severity.
pub struct MlThreatScoringNode {
    client: ClassifierClient,
}

impl MlThreatScoringNode {
    pub fn new(client: ClassifierClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecurityNode for MlThreatScoringNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            id: ML_NODE_ID.to_string(),
            category: NodeCategory::AiMl,
            node_type: "ml-scoring".to_string(),
            name: "ML Threat Scoring".to_string(),
            description: "Scores the threat probability of an event with an ML ensemble"
                .to_string(),
            version: "1.0.0".to_string(),
        }
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new()
            .input(SchemaField::new(EVENT_ID, FieldType::String).required())
            .input(SchemaField::new(RISK_SCORE, FieldType::Number).required())
            .output(SchemaField::new("threat_score", FieldType::Number))
            .output(SchemaField::new("confidence", FieldType::Number))
            .output(SchemaField::new("risk_level", FieldType::String))
            .output(SchemaField::new("requires_ai_analysis", FieldType::Boolean))
            .config_field(
                SchemaField::new("threshold", FieldType::Number)
                    .with_description("Score above which AI analysis is requested")
                    .with_default(DEFAULT_AI_THRESHOLD),
            )
            .config_field(SchemaField::new(TIMEOUT_MS, FieldType::Number))
    }

    async fn execute(
        &self,
        event: &SecurityEvent,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let threshold = ctx.config_f64("threshold").unwrap_or(DEFAULT_AI_THRESHOLD);
        let features = extract_features(event);
        let payload = json!({
            "event": event.to_json(),
            "features": Value::Object(features).to_json(),
        });

        let scored = match self.client.classify(&payload, self.client.timeout_for(ctx)).await {
            Ok(response) => parse_prediction(&response),
            Err(e) => {
                tracing::warn!(node_id = %ctx.node_id, error = %e, "ML scoring unavailable, using heuristic");
                None
            }
        };

        let (prediction, fallback) = match scored {
            Some(prediction) => (prediction, false),
            None => {
                ctx.events.warn("Model ensemble unavailable, heuristic score used");
                (heuristic_prediction(event), true)
            }
        };

        let requires_ai = prediction.threat_score > threshold;
        let mut output = NodeOutput::new()
            .with_output("threat_score", prediction.threat_score)
            .with_output("confidence", prediction.confidence)
            .with_output("risk_level", risk_level(prediction.threat_score))
            .with_output("requires_ai_analysis", requires_ai)
            .with_output("fallback", fallback)
            .with_confidence(prediction.confidence)
            .with_metadata("model_used", if fallback { "heuristic" } else { "ensemble" });

        if !prediction.model_predictions.is_empty() {
            let models: HashMap<String, Value> = prediction
                .model_predictions
                .into_iter()
                .map(|(model, score)| (model, Value::from(score)))
                .collect();
            output = output.with_output("model_predictions", Value::Object(models));
        }

        Ok(output)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub threat_score: f64,
    pub confidence: f64,
    pub model_predictions: Vec<(String, f64)>,
}

/// Accepts either per-model `predictions` or a direct `threat_score`
fn parse_prediction(response: &HashMap<String, Value>) -> Option<Prediction> {
    if let Some(models) = response.get("predictions").and_then(Value::as_object) {
        let mut predictions: Vec<(String, f64)> = models
            .iter()
            .filter_map(|(model, score)| score.as_f64().map(|s| (model.clone(), s.clamp(0.0, 1.0))))
            .collect();
        if predictions.is_empty() {
            return None;
        }
        predictions.sort_by(|a, b| a.0.cmp(&b.0));
        return Some(Prediction {
            threat_score: ensemble(&predictions),
            confidence: number(response, "confidence").unwrap_or_else(|| agreement(&predictions)),
            model_predictions: predictions,
        });
    }

    let score = number(response, "threat_score")?;
    Some(Prediction {
        threat_score: score.clamp(0.0, 1.0),
        confidence: number(response, "confidence")
            .unwrap_or(FALLBACK_CONFIDENCE)
            .clamp(0.0, 1.0),
        model_predictions: Vec::new(),
    })
}

pub fn ensemble(predictions: &[(String, f64)]) -> f64 {
    let (sum, total) = predictions.iter().fold((0.0, 0.0), |(sum, total), (model, score)| {
        let weight = MODEL_WEIGHTS
            .iter()
            .find(|(name, _)| name == model)
            .map_or(0.2, |(_, w)| *w);
        (sum + score * weight, total + weight)
    });
    if total > 0.0 {
        sum / total
    } else {
        0.5
    }
}

/// Confidence from model agreement: tighter spread means higher confidence
pub fn agreement(predictions: &[(String, f64)]) -> f64 {
    if predictions.len() < 2 {
        return FALLBACK_CONFIDENCE;
    }
    let n = predictions.len() as f64;
    let mean = predictions.iter().map(|(_, s)| s).sum::<f64>() / n;
    let variance = predictions.iter().map(|(_, s)| (s - mean).powi(2)).sum::<f64>() / n;
    (1.0 - variance.sqrt() * 2.0).clamp(0.1, 1.0)
}

pub fn heuristic_prediction(event: &SecurityEvent) -> Prediction {
    let risk = event.risk_score() / 10.0;
    let severity = match event.severity().to_ascii_uppercase().as_str() {
        "CRITICAL" => 0.95,
        "HIGH" => 0.75,
        "MEDIUM" => 0.5,
        _ => 0.2,
    };
    Prediction {
        threat_score: (0.7 * risk + 0.3 * severity).clamp(0.0, 1.0),
        confidence: FALLBACK_CONFIDENCE,
        model_predictions: Vec::new(),
    }
}

fn risk_level(score: f64) -> &'static str {
    if score >= 0.9 {
        "critical"
    } else if score >= 0.7 {
        "high"
    } else if score >= 0.5 {
        "medium"
    } else {
        "low"
    }
}

/// Network, temporal, user and asset features sent alongside the event
fn extract_features(event: &SecurityEvent) -> HashMap<String, Value> {
    let mut features = HashMap::new();

    for (field, prefix) in [("source_ip", "src"), ("destination_ip", "dst")] {
        if let Some(ip) = event.get_str(field) {
            features.insert(format!("{prefix}_ip_is_private"), Value::from(is_private_ip(ip)));
        }
    }
    for field in ["src_port", "dst_port", "bytes_sent", "bytes_received"] {
        let value = event.get(field).and_then(Value::as_f64).unwrap_or(0.0);
        features.insert(field.to_string(), Value::from(value));
    }
    features.insert(
        "protocol".to_string(),
        Value::from(event.get_str("protocol").unwrap_or("unknown")),
    );

    if let Ok(ts) = DateTime::parse_from_rfc3339(event.timestamp()) {
        let ts = ts.with_timezone(&Utc);
        let weekday = ts.weekday().num_days_from_monday();
        features.insert("hour_of_day".to_string(), Value::from(ts.hour() as f64));
        features.insert("day_of_week".to_string(), Value::from(weekday as f64));
        features.insert("is_weekend".to_string(), Value::from(weekday >= 5));
        features.insert(
            "is_business_hours".to_string(),
            Value::from((9..=17).contains(&ts.hour())),
        );
    }

    features.insert("has_user".to_string(), Value::from(event.get_str("user_id").is_some()));
    features.insert("has_asset".to_string(), Value::from(event.get_str("asset_id").is_some()));
    features.insert("risk_score".to_string(), Value::from(event.risk_score()));
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preds(items: &[(&str, f64)]) -> Vec<(String, f64)> {
        items.iter().map(|(m, s)| (m.to_string(), *s)).collect()
    }

    #[test]
    fn test_ensemble_weights() {
        let p = preds(&[("xgboost", 1.0), ("random_forest", 0.0), ("isolation_forest", 0.0)]);
        assert!((ensemble(&p) - 0.4).abs() < 1e-9);
        assert_eq!(ensemble(&[]), 0.5);
    }

    #[test]
    fn test_agreement_rewards_consensus() {
        assert_eq!(agreement(&preds(&[("xgboost", 0.8)])), 0.5);
        assert!((agreement(&preds(&[("a", 0.8), ("b", 0.8)])) - 1.0).abs() < 1e-9);
        assert_eq!(agreement(&preds(&[("a", 0.0), ("b", 1.0)])), 0.1);
    }

    #[test]
    fn test_heuristic_prediction() {
        let critical = SecurityEvent::new("Ransomware", 10.0);
        assert!((heuristic_prediction(&critical).threat_score - 0.985).abs() < 1e-9);

        let low = SecurityEvent::new("Port Scan", 2.0);
        let p = heuristic_prediction(&low);
        assert!((p.threat_score - 0.2).abs() < 1e-9);
        assert_eq!(p.confidence, 0.5);
    }

    #[test]
    fn test_parse_prediction_shapes() {
        let mut direct = HashMap::new();
        direct.insert("threat_score".to_string(), Value::from(0.91));
        direct.insert("confidence".to_string(), Value::from(0.8));
        let p = parse_prediction(&direct).unwrap();
        assert_eq!(p.threat_score, 0.91);
        assert_eq!(p.confidence, 0.8);

        let mut models = HashMap::new();
        models.insert("xgboost".to_string(), Value::from(0.9));
        models.insert("random_forest".to_string(), Value::from(0.9));
        let mut ensemble_response = HashMap::new();
        ensemble_response.insert("predictions".to_string(), Value::Object(models));
        let p = parse_prediction(&ensemble_response).unwrap();
        assert!((p.threat_score - 0.9).abs() < 1e-9);
        assert_eq!(p.model_predictions.len(), 2);

        assert!(parse_prediction(&HashMap::new()).is_none());
    }
}
