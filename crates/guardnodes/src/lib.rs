//! Built-in security nodes
//!
//! Event input, ML scoring, AI analysis, threat-intel lookup, correlation,
//! MITRE ATT&CK mapping and SOAR response actions. Each node that calls an
//! external service falls back to a local answer when the call fails.

mod ai_analysis;
mod case_management;
mod classifier;
mod config;
mod correlation;
mod input;
mod mitre;
mod ml_scoring;
mod soar;
mod support;
mod threat_intel;

pub use ai_analysis::{
    default_recommendations, fallback_threat_level, AiThreatAnalysisNode, AI_NODE_ID, AI_TIMEOUT,
};
pub use case_management::{HttpCaseManagement, CASE_TIMEOUT};
pub use classifier::{ClassifierClient, ClassifierError, TIMEOUT_MS};
pub use config::{NodesConfig, ProviderConfig};
pub use correlation::{
    correlation_strength, parse_time_window, risk_adjustment, EventCorrelationNode,
    CORRELATION_NODE_ID, CORRELATION_TIMEOUT,
};
pub use input::{SecurityEventInputNode, INPUT_NODE_ID};
pub use mitre::{map_event, Mapping, MitreAttackMapperNode, Technique, MITRE_NODE_ID};
pub use ml_scoring::{MlThreatScoringNode, ML_NODE_ID, ML_TIMEOUT};
pub use soar::{ActionOutcome, ActionStatus, SoarResponseActionNode, SOAR_NODE_ID, SOAR_TIMEOUT};
pub use support::{extract_indicators, is_private_ip};
pub use threat_intel::{heuristic_verdict, ThreatIntelLookupNode, THREAT_INTEL_NODE_ID};

use guardruntime::{CaseManagement, LoggingCaseManagement, NodeRegistry, RateLimiter};
use std::sync::Arc;

/// Register all built-in nodes with a registry.
///
/// The AI node draws on `rate_limiter`, which should be the runtime's
/// shared limiter so budgets hold across runs.
pub fn register_all(registry: &NodeRegistry, rate_limiter: Arc<RateLimiter>, config: &NodesConfig) {
    registry.register(Arc::new(SecurityEventInputNode));
    registry.register(Arc::new(MlThreatScoringNode::new(ClassifierClient::new(
        config.ml_scoring_url.clone(),
        ML_TIMEOUT,
    ))));
    registry.register(Arc::new(AiThreatAnalysisNode::new(
        ClassifierClient::new(config.ai_analysis_url.clone(), AI_TIMEOUT),
        rate_limiter,
    )));
    registry.register(Arc::new(ThreatIntelLookupNode::new(
        config.threat_intel_providers.clone(),
    )));
    registry.register(Arc::new(EventCorrelationNode::new(ClassifierClient::new(
        config.correlation_url.clone(),
        CORRELATION_TIMEOUT,
    ))));
    registry.register(Arc::new(MitreAttackMapperNode));
    registry.register(Arc::new(SoarResponseActionNode::new(ClassifierClient::new(
        config.soar_url.clone(),
        SOAR_TIMEOUT,
    ))));
}

/// Case-management sink for the runtime: HTTP when a URL is configured,
/// log-only otherwise
pub fn case_management(config: &NodesConfig) -> Arc<dyn CaseManagement> {
    match &config.case_management_url {
        Some(url) => Arc::new(HttpCaseManagement::new(url.clone())),
        None => Arc::new(LoggingCaseManagement),
    }
}
