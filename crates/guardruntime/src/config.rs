use guardcore::GuardError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    pub rate_limit: RateLimitConfig,
    pub ordering: OrderingStrategy,
    /// Node types whose failure stops the run
    pub critical_node_types: Vec<String>,
    pub incident: IncidentPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            rate_limit: RateLimitConfig::default(),
            ordering: OrderingStrategy::default(),
            critical_node_types: vec!["input".to_string(), "ml-scoring".to_string()],
            incident: IncidentPolicy::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load from a JSON file; absent keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GuardError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn is_critical(&self, node_type: &str) -> bool {
        self.critical_node_types.iter().any(|t| t == node_type)
    }
}

/// Sliding-window budget for expensive calls, per workflow id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_calls: usize,
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 5,
            window_secs: 60,
        }
    }
}

/// How the executor orders workflow nodes
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OrderingStrategy {
    /// Queue seeded with `input` nodes, first visit wins
    #[default]
    BreadthFirst,
    /// Kahn's algorithm: a node runs only after all its predecessors
    Topological,
}

/// Thresholds that turn a run into an incident
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentPolicy {
    /// Minimum ML score on the 1–10 scale
    pub score_threshold: f64,
    /// Minimum raw ML probability when paired with `confidence_threshold`
    pub probability_threshold: f64,
    pub confidence_threshold: f64,
    /// AI threat levels that always raise an incident
    pub threat_levels: Vec<String>,
}

impl Default for IncidentPolicy {
    fn default() -> Self {
        Self {
            score_threshold: 7.0,
            probability_threshold: 0.7,
            confidence_threshold: 0.8,
            threat_levels: vec!["high".to_string(), "critical".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RuntimeConfig = serde_json::from_str(
            r#"{ "ordering": "topological", "rate_limit": { "max_calls": 2 } }"#,
        )
        .unwrap();

        assert_eq!(config.ordering, OrderingStrategy::Topological);
        assert_eq!(config.rate_limit.max_calls, 2);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert!(config.is_critical("ml-scoring"));
        assert!(!config.is_critical("soar-action"));
        assert_eq!(config.incident.score_threshold, 7.0);
    }
}
