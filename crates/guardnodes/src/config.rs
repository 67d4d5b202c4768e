use serde::{Deserialize, Serialize};

/// Endpoints and providers used by the built-in nodes.
///
/// Every endpoint is optional: a node without an endpoint goes straight to
/// its local fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodesConfig {
    pub ml_scoring_url: Option<String>,
    pub ai_analysis_url: Option<String>,
    pub correlation_url: Option<String>,
    pub soar_url: Option<String>,
    pub case_management_url: Option<String>,
    pub threat_intel_providers: Vec<ProviderConfig>,
}

/// One threat-intel reputation provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub reliability: Option<f64>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            reliability: None,
        }
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = Some(reliability);
        self
    }
}
