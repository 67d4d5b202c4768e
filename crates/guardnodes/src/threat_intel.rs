use crate::classifier::{ClassifierClient, TIMEOUT_MS};
use crate::config::ProviderConfig;
use crate::support::{is_private_ip, number, strings, text};
use async_trait::async_trait;
use futures::future::join_all;
use guardcore::{
    FieldType, NodeCategory, NodeContext, NodeDescriptor, NodeError, NodeOutput, NodeSchema,
    SchemaField, SecurityEvent, SecurityNode, Value,
};
use guardruntime::{aggregate, AggregatedVerdict, Geolocation, Reputation, ThreatIntelQueryResult};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

pub const THREAT_INTEL_NODE_ID: &str = "threat-intel-lookup";
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_INDICATOR_FIELD: &str = "source_ip";

/// Looks an indicator up at every configured reputation provider at once
/// and merges the answers into one verdict.
pub struct ThreatIntelLookupNode {
    client: ClassifierClient,
    providers: Vec<ProviderConfig>,
}

impl ThreatIntelLookupNode {
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        Self {
            client: ClassifierClient::new(None, PROVIDER_TIMEOUT),
            providers,
        }
    }

    async fn query(
        &self,
        provider: &ProviderConfig,
        indicator: &str,
        timeout: Duration,
        ctx: &NodeContext,
    ) -> Option<ThreatIntelQueryResult> {
        let payload = json!({ "indicator": indicator, "type": indicator_kind(indicator) });
        match self.client.post_json(&provider.url, &payload, timeout).await {
            Ok(response) => {
                let result = parse_provider_response(provider, &response);
                if result.is_none() {
                    tracing::warn!(provider = %provider.name, "Provider answer has no reputation");
                }
                result
            }
            Err(e) => {
                tracing::warn!(node_id = %ctx.node_id, provider = %provider.name, error = %e, "Threat intel provider failed");
                None
            }
        }
    }
}

#[async_trait]
impl SecurityNode for ThreatIntelLookupNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            id: THREAT_INTEL_NODE_ID.to_string(),
            category: NodeCategory::Integration,
            node_type: "threat-intel".to_string(),
            name: "Threat Intel Lookup".to_string(),
            description: "Checks indicator reputation across threat intelligence providers"
                .to_string(),
            version: "1.0.0".to_string(),
        }
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new()
            .input(SchemaField::new(DEFAULT_INDICATOR_FIELD, FieldType::String))
            .output(SchemaField::new("reputation", FieldType::String))
            .output(SchemaField::new("confidence", FieldType::Number))
            .output(SchemaField::new("sources", FieldType::Array))
            .output(SchemaField::new("malware_families", FieldType::Array))
            .output(SchemaField::new("threat_actors", FieldType::Array))
            .config_field(
                SchemaField::new("indicator_field", FieldType::String)
                    .with_description("Event field holding the indicator")
                    .with_default(DEFAULT_INDICATOR_FIELD),
            )
            .config_field(SchemaField::new(TIMEOUT_MS, FieldType::Number))
    }

    async fn execute(
        &self,
        event: &SecurityEvent,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let field = ctx.config_str("indicator_field").unwrap_or(DEFAULT_INDICATOR_FIELD);
        let Some(indicator) = event.get_str(field).map(str::trim).filter(|s| !s.is_empty()) else {
            ctx.events.warn(format!("Event has no '{field}' to look up"));
            return Ok(verdict_output(AggregatedVerdict::unknown(), None, 0, 0, true));
        };

        let timeout = self.client.timeout_for(ctx);
        let answers: Vec<ThreatIntelQueryResult> = join_all(
            self.providers
                .iter()
                .map(|provider| self.query(provider, indicator, timeout, ctx)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();

        let answered = answers.len();
        let (verdict, fallback) = if answers.is_empty() {
            if !self.providers.is_empty() {
                ctx.events.warn("No provider answered, local heuristic used");
            }
            (heuristic_verdict(indicator), true)
        } else {
            (aggregate(&answers), false)
        };

        tracing::info!(
            node_id = %ctx.node_id,
            indicator,
            reputation = %verdict.reputation,
            providers = self.providers.len(),
            answered,
            "Threat intel lookup finished"
        );

        Ok(verdict_output(
            verdict,
            Some(indicator),
            self.providers.len(),
            answered,
            fallback,
        ))
    }
}

fn verdict_output(
    verdict: AggregatedVerdict,
    indicator: Option<&str>,
    queried: usize,
    answered: usize,
    fallback: bool,
) -> NodeOutput {
    let confidence = verdict.confidence;
    let mut output = NodeOutput::new().with_confidence(confidence);
    output.data = verdict.to_output();
    output
        .with_output("indicator", indicator.map_or(Value::Null, Value::from))
        .with_output("providers_queried", queried)
        .with_output("providers_answered", answered)
        .with_output("fallback", fallback)
}

/// Verdict without any provider: private addresses are assumed clean
pub fn heuristic_verdict(indicator: &str) -> AggregatedVerdict {
    if is_private_ip(indicator) {
        AggregatedVerdict {
            reputation: Reputation::Clean,
            confidence: 0.3,
            sources: vec!["local-heuristic".to_string()],
            ..AggregatedVerdict::unknown()
        }
    } else {
        AggregatedVerdict::unknown()
    }
}

fn parse_provider_response(
    provider: &ProviderConfig,
    response: &HashMap<String, Value>,
) -> Option<ThreatIntelQueryResult> {
    let reputation = Reputation::parse(text(response, "reputation")?);
    let mut result = ThreatIntelQueryResult::new(
        provider.name.clone(),
        reputation,
        number(response, "confidence").unwrap_or(0.5),
    );
    result.reliability = provider.reliability;
    result.malware_families = strings(response, "malware_families");
    result.threat_actors = strings(response, "threat_actors");
    result.geolocation = response
        .get("geolocation")
        .and_then(|geo| serde_json::from_value::<Geolocation>(geo.to_json()).ok());
    Some(result)
}

fn indicator_kind(indicator: &str) -> &'static str {
    if indicator.parse::<std::net::IpAddr>().is_ok() {
        "ip"
    } else if indicator.contains("://") {
        "url"
    } else if indicator.len() >= 32 && indicator.chars().all(|c| c.is_ascii_hexdigit()) {
        "hash"
    } else {
        "domain"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_verdict() {
        let private = heuristic_verdict("192.168.1.20");
        assert_eq!(private.reputation, Reputation::Clean);
        assert_eq!(private.confidence, 0.3);

        let public = heuristic_verdict("203.0.113.7");
        assert_eq!(public.reputation, Reputation::Unknown);
        assert_eq!(public.confidence, 0.1);
    }

    #[test]
    fn test_indicator_kind() {
        assert_eq!(indicator_kind("203.0.113.7"), "ip");
        assert_eq!(indicator_kind("https://evil.example/x"), "url");
        assert_eq!(indicator_kind("d41d8cd98f00b204e9800998ecf8427e"), "hash");
        assert_eq!(indicator_kind("evil.example"), "domain");
    }

    #[test]
    fn test_parse_provider_response() {
        let provider = ProviderConfig::new("otx", "http://otx").with_reliability(0.8);
        let response: HashMap<String, Value> = match Value::from(serde_json::json!({
            "reputation": "malicious",
            "confidence": 0.9,
            "malware_families": ["Emotet"],
            "geolocation": {"country": "RU", "asn": "AS12345"}
        })) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        let result = parse_provider_response(&provider, &response).unwrap();

        assert_eq!(result.reputation, Reputation::Malicious);
        assert_eq!(result.reliability, Some(0.8));
        assert_eq!(result.malware_families, vec!["Emotet"]);
        assert_eq!(result.geolocation.unwrap().country.as_deref(), Some("RU"));

        assert!(parse_provider_response(&provider, &HashMap::new()).is_none());
    }
}
