use crate::{GuardError, Value};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

pub const EVENT_ID: &str = "event_id";
pub const THREAT_TYPE: &str = "threat_type";
pub const RISK_SCORE: &str = "risk_score";
pub const SEVERITY: &str = "severity";
pub const TIMESTAMP: &str = "timestamp";

/// Security event flowing through a workflow.
///
/// Guaranteed fields are always present once an event is constructed
/// through [`SecurityEvent::new`] or [`SecurityEvent::from_json`]; every
/// other field is open-ended. Events are never mutated in place by nodes,
/// enrichment produces a new event through [`SecurityEvent::merged`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    from = "HashMap<String, Value>",
    into = "BTreeMap<String, Value>"
)]
pub struct SecurityEvent {
    fields: BTreeMap<String, Value>,
}

impl SecurityEvent {
    pub fn new(threat_type: impl Into<String>, risk_score: f64) -> Self {
        let risk_score = clamp_risk(risk_score);
        let mut fields = BTreeMap::new();
        fields.insert(EVENT_ID.to_string(), Value::from(Uuid::new_v4().to_string()));
        fields.insert(THREAT_TYPE.to_string(), Value::from(threat_type.into()));
        fields.insert(RISK_SCORE.to_string(), Value::from(risk_score));
        fields.insert(SEVERITY.to_string(), Value::from(severity_for(risk_score)));
        fields.insert(TIMESTAMP.to_string(), Value::from(Utc::now().to_rfc3339()));
        Self { fields }
    }

    /// Build an event from an arbitrary JSON object, filling in any
    /// missing guaranteed field.
    pub fn from_json(json: serde_json::Value) -> Result<Self, GuardError> {
        match Value::from(json) {
            Value::Object(map) => Ok(Self::from_fields(map)),
            other => Err(GuardError::InvalidEvent(format!(
                "expected a JSON object, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn from_fields(fields: HashMap<String, Value>) -> Self {
        let mut fields: BTreeMap<String, Value> = fields.into_iter().collect();

        let risk_score = clamp_risk(
            fields
                .get(RISK_SCORE)
                .and_then(numeric)
                .unwrap_or(0.0),
        );
        fields.insert(RISK_SCORE.to_string(), Value::from(risk_score));

        if !has_text(&fields, EVENT_ID) {
            fields.insert(EVENT_ID.to_string(), Value::from(Uuid::new_v4().to_string()));
        }
        if !has_text(&fields, THREAT_TYPE) {
            fields.insert(THREAT_TYPE.to_string(), Value::from("unknown"));
        }
        if !has_text(&fields, SEVERITY) {
            fields.insert(SEVERITY.to_string(), Value::from(severity_for(risk_score)));
        }
        if !has_text(&fields, TIMESTAMP) {
            fields.insert(TIMESTAMP.to_string(), Value::from(Utc::now().to_rfc3339()));
        }

        Self { fields }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn event_id(&self) -> &str {
        self.text(EVENT_ID)
    }

    pub fn threat_type(&self) -> &str {
        self.text(THREAT_TYPE)
    }

    pub fn risk_score(&self) -> f64 {
        self.fields
            .get(RISK_SCORE)
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    pub fn severity(&self) -> &str {
        self.text(SEVERITY)
    }

    pub fn timestamp(&self) -> &str {
        self.text(TIMESTAMP)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Shallow merge: keys in `data` replace keys of this event.
    ///
    /// Guaranteed fields keep their invariants, a node that emits a
    /// non-numeric `risk_score` does not erase the event's score.
    pub fn merged(&self, data: &HashMap<String, Value>) -> SecurityEvent {
        let mut fields = self.fields.clone();
        for (key, value) in data {
            if key == RISK_SCORE {
                if let Some(score) = numeric(value) {
                    fields.insert(key.clone(), Value::from(clamp_risk(score)));
                }
                continue;
            }
            fields.insert(key.clone(), value.clone());
        }
        SecurityEvent { fields }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    fn text(&self, key: &str) -> &str {
        self.fields.get(key).and_then(Value::as_str).unwrap_or("")
    }
}

impl From<HashMap<String, Value>> for SecurityEvent {
    fn from(fields: HashMap<String, Value>) -> Self {
        SecurityEvent::from_fields(fields)
    }
}

impl From<SecurityEvent> for BTreeMap<String, Value> {
    fn from(event: SecurityEvent) -> Self {
        event.fields
    }
}

/// Severity label for a 0–10 risk score
pub fn severity_for(risk_score: f64) -> &'static str {
    if risk_score >= 9.0 {
        "CRITICAL"
    } else if risk_score >= 7.0 {
        "HIGH"
    } else if risk_score >= 4.0 {
        "MEDIUM"
    } else {
        "LOW"
    }
}

fn clamp_risk(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 10.0)
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn has_text(fields: &BTreeMap<String, Value>, key: &str) -> bool {
    fields
        .get(key)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_fills_guaranteed_fields() {
        let event = SecurityEvent::from_json(json!({
            "source_ip": "192.168.1.100",
            "risk_score": 12.5
        }))
        .unwrap();

        assert!(!event.event_id().is_empty());
        assert_eq!(event.threat_type(), "unknown");
        assert_eq!(event.risk_score(), 10.0);
        assert_eq!(event.severity(), "CRITICAL");
        assert!(!event.timestamp().is_empty());
        assert_eq!(event.get_str("source_ip"), Some("192.168.1.100"));
    }

    #[test]
    fn test_from_json_keeps_given_fields() {
        let event = SecurityEvent::from_json(json!({
            "event_id": "evt-1",
            "threat_type": "SQL Injection",
            "risk_score": "9.2",
            "severity": "HIGH",
            "timestamp": "2025-08-02T12:00:00Z"
        }))
        .unwrap();

        assert_eq!(event.event_id(), "evt-1");
        assert_eq!(event.risk_score(), 9.2);
        assert_eq!(event.severity(), "HIGH");
        assert_eq!(event.timestamp(), "2025-08-02T12:00:00Z");
    }

    #[test]
    fn test_from_json_rejects_non_objects() {
        assert!(SecurityEvent::from_json(json!([1, 2])).is_err());
    }

    #[test]
    fn test_merged_returns_new_event() {
        let event = SecurityEvent::new("Port Scan", 3.0).with_field("stage", "raw");
        let mut data = HashMap::new();
        data.insert("stage".to_string(), Value::from("scored"));
        data.insert("risk_score".to_string(), Value::from("not a number"));
        data.insert("threat_score".to_string(), Value::from(0.8));

        let merged = event.merged(&data);
        assert_eq!(merged.get_str("stage"), Some("scored"));
        assert_eq!(merged.risk_score(), 3.0);
        assert_eq!(merged.get("threat_score"), Some(&Value::from(0.8)));
        assert_eq!(event.get_str("stage"), Some("raw"));
    }

    #[test]
    fn test_severity_bands() {
        assert_eq!(severity_for(9.5), "CRITICAL");
        assert_eq!(severity_for(7.0), "HIGH");
        assert_eq!(severity_for(4.0), "MEDIUM");
        assert_eq!(severity_for(1.0), "LOW");
    }
}
