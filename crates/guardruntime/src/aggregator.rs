//! Merging of independently sourced threat-intel verdicts.
//!
//! Every node that consults more than one reputation provider goes through
//! [`aggregate`]; the worst reputation wins and confidence is weighted by
//! each source's reliability.

use guardcore::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Reliability assumed for a source that does not declare one
pub const DEFAULT_RELIABILITY: f64 = 0.5;

/// Confidence reported when no source answered
pub const EMPTY_CONFIDENCE: f64 = 0.1;

/// Sources above this reliability may supply geolocation
pub const GEOLOCATION_MIN_RELIABILITY: f64 = 0.7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Reputation {
    Clean,
    Suspicious,
    Malicious,
    Unknown,
}

impl Reputation {
    /// Severity rank used to pick the worst verdict
    pub fn priority(&self) -> u8 {
        match self {
            Reputation::Malicious => 4,
            Reputation::Suspicious => 3,
            Reputation::Unknown => 2,
            Reputation::Clean => 1,
        }
    }

    /// Lenient parse of provider labels; unrecognised labels are `Unknown`
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "malicious" | "malware" | "bad" => Reputation::Malicious,
            "suspicious" | "suspect" => Reputation::Suspicious,
            "clean" | "benign" | "good" | "harmless" => Reputation::Clean,
            _ => Reputation::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Reputation::Clean => "clean",
            Reputation::Suspicious => "suspicious",
            Reputation::Malicious => "malicious",
            Reputation::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Reputation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Geolocation {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub asn: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl Geolocation {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        if let Some(country) = &self.country {
            map.insert("country".to_string(), Value::from(country.as_str()));
        }
        if let Some(city) = &self.city {
            map.insert("city".to_string(), Value::from(city.as_str()));
        }
        if let Some(asn) = &self.asn {
            map.insert("asn".to_string(), Value::from(asn.as_str()));
        }
        if let Some(lat) = self.latitude {
            map.insert("latitude".to_string(), Value::from(lat));
        }
        if let Some(lon) = self.longitude {
            map.insert("longitude".to_string(), Value::from(lon));
        }
        Value::Object(map)
    }
}

/// One provider's answer for one indicator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreatIntelQueryResult {
    pub source: String,
    pub reputation: Reputation,
    pub confidence: f64,
    #[serde(default)]
    pub reliability: Option<f64>,
    #[serde(default)]
    pub malware_families: Vec<String>,
    #[serde(default)]
    pub threat_actors: Vec<String>,
    #[serde(default)]
    pub geolocation: Option<Geolocation>,
}

impl ThreatIntelQueryResult {
    pub fn new(source: impl Into<String>, reputation: Reputation, confidence: f64) -> Self {
        Self {
            source: source.into(),
            reputation,
            confidence,
            reliability: None,
            malware_families: Vec::new(),
            threat_actors: Vec::new(),
            geolocation: None,
        }
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = Some(reliability);
        self
    }

    pub fn with_malware_family(mut self, family: impl Into<String>) -> Self {
        self.malware_families.push(family.into());
        self
    }

    pub fn with_threat_actor(mut self, actor: impl Into<String>) -> Self {
        self.threat_actors.push(actor.into());
        self
    }

    pub fn with_geolocation(mut self, geolocation: Geolocation) -> Self {
        self.geolocation = Some(geolocation);
        self
    }

    fn effective_reliability(&self) -> f64 {
        sanitize(self.reliability.unwrap_or(DEFAULT_RELIABILITY))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedVerdict {
    pub reputation: Reputation,
    pub confidence: f64,
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub malware_families: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub threat_actors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geolocation: Option<Geolocation>,
}

impl AggregatedVerdict {
    pub fn unknown() -> Self {
        Self {
            reputation: Reputation::Unknown,
            confidence: EMPTY_CONFIDENCE,
            sources: Vec::new(),
            malware_families: Vec::new(),
            threat_actors: Vec::new(),
            geolocation: None,
        }
    }

    /// Flatten into node output fields
    pub fn to_output(&self) -> HashMap<String, Value> {
        let mut data = HashMap::new();
        data.insert("reputation".to_string(), Value::from(self.reputation.as_str()));
        data.insert("confidence".to_string(), Value::from(self.confidence));
        data.insert("sources".to_string(), Value::from(self.sources.clone()));
        data.insert(
            "malware_families".to_string(),
            Value::from(self.malware_families.clone()),
        );
        data.insert(
            "threat_actors".to_string(),
            Value::from(self.threat_actors.clone()),
        );
        if let Some(geo) = &self.geolocation {
            data.insert("geolocation".to_string(), geo.to_value());
        }
        data
    }
}

/// Combine per-source results into one verdict.
///
/// Worst reputation wins (`malicious > suspicious > unknown > clean`);
/// confidence is `Σ(confidence × reliability) / Σ(reliability)` clamped to
/// [0, 1], falling back to the plain mean when every reliability is zero.
/// Names are collected as sets. Geolocation comes from the single most
/// reliable source above 0.7, the earliest one on ties.
pub fn aggregate(results: &[ThreatIntelQueryResult]) -> AggregatedVerdict {
    if results.is_empty() {
        return AggregatedVerdict::unknown();
    }

    let mut reputation = results[0].reputation;
    for result in &results[1..] {
        if result.reputation.priority() > reputation.priority() {
            reputation = result.reputation;
        }
    }

    let (weighted, total_weight) = results.iter().fold((0.0, 0.0), |(sum, weight), r| {
        let reliability = r.effective_reliability();
        (sum + sanitize(r.confidence) * reliability, weight + reliability)
    });
    let confidence = if total_weight > 0.0 {
        weighted / total_weight
    } else {
        results.iter().map(|r| sanitize(r.confidence)).sum::<f64>() / results.len() as f64
    };

    let sources: BTreeSet<&str> = results.iter().map(|r| r.source.as_str()).collect();
    let malware_families: BTreeSet<&str> = results
        .iter()
        .flat_map(|r| r.malware_families.iter().map(String::as_str))
        .collect();
    let threat_actors: BTreeSet<&str> = results
        .iter()
        .flat_map(|r| r.threat_actors.iter().map(String::as_str))
        .collect();

    let mut geolocation: Option<(f64, &Geolocation)> = None;
    for result in results {
        let reliability = result.effective_reliability();
        if let Some(geo) = &result.geolocation {
            if reliability > GEOLOCATION_MIN_RELIABILITY
                && geolocation.map_or(true, |(best, _)| reliability > best)
            {
                geolocation = Some((reliability, geo));
            }
        }
    }

    AggregatedVerdict {
        reputation,
        confidence: confidence.clamp(0.0, 1.0),
        sources: sources.into_iter().map(str::to_string).collect(),
        malware_families: malware_families.into_iter().map(str::to_string).collect(),
        threat_actors: threat_actors.into_iter().map(str::to_string).collect(),
        geolocation: geolocation.map(|(_, geo)| geo.clone()),
    }
}

fn sanitize(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
