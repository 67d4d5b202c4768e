use async_trait::async_trait;
use guardcore::event::THREAT_TYPE;
use guardcore::{
    FieldType, NodeCategory, NodeContext, NodeDescriptor, NodeError, NodeOutput, NodeSchema,
    SchemaField, SecurityEvent, SecurityNode, Value,
};
use std::collections::HashMap;

pub const MITRE_NODE_ID: &str = "mitre-attack-mapper";

/// Event fields scanned after the threat type, in order
const CONTEXT_FIELDS: &[&str] = &["event_type", "description", "category"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Technique {
    pub technique_id: &'static str,
    pub technique_name: &'static str,
    pub tactic_id: &'static str,
    pub tactic: &'static str,
}

const fn technique(
    technique_id: &'static str,
    technique_name: &'static str,
    tactic_id: &'static str,
    tactic: &'static str,
) -> Technique {
    Technique {
        technique_id,
        technique_name,
        tactic_id,
        tactic,
    }
}

/// Keyword table; every keyword is matched as a lowercase substring
const MAPPINGS: &[(&[&str], Technique)] = &[
    (
        &["sql injection", "sqli", "command injection", "remote code execution", "exploit"],
        technique("T1190", "Exploit Public-Facing Application", "TA0001", "Initial Access"),
    ),
    (
        &["xss", "cross-site scripting", "drive-by"],
        technique("T1189", "Drive-by Compromise", "TA0001", "Initial Access"),
    ),
    (
        &["phishing", "spearphishing"],
        technique("T1566", "Phishing", "TA0001", "Initial Access"),
    ),
    (
        &["brute force", "password spray", "credential stuffing", "failed login"],
        technique("T1110", "Brute Force", "TA0006", "Credential Access"),
    ),
    (
        &["credential dump", "mimikatz", "lsass"],
        technique("T1003", "OS Credential Dumping", "TA0006", "Credential Access"),
    ),
    (
        &["malware", "trojan", "malicious file"],
        technique("T1204", "User Execution", "TA0002", "Execution"),
    ),
    (
        &["powershell", "script execution"],
        technique("T1059", "Command and Scripting Interpreter", "TA0002", "Execution"),
    ),
    (
        &["privilege escalation"],
        technique("T1068", "Exploitation for Privilege Escalation", "TA0004", "Privilege Escalation"),
    ),
    (
        &["persistence", "scheduled task", "registry run key"],
        technique("T1053", "Scheduled Task/Job", "TA0003", "Persistence"),
    ),
    (
        &["lateral movement", "remote service", "rdp", "smb"],
        technique("T1021", "Remote Services", "TA0008", "Lateral Movement"),
    ),
    (
        &["port scan", "network scan", "reconnaissance"],
        technique("T1595", "Active Scanning", "TA0043", "Reconnaissance"),
    ),
    (
        &["command and control", "beacon", "c2 traffic"],
        technique("T1071", "Application Layer Protocol", "TA0011", "Command and Control"),
    ),
    (
        &["exfiltration", "data leak", "data theft"],
        technique("T1041", "Exfiltration Over C2 Channel", "TA0010", "Exfiltration"),
    ),
    (
        &["ransomware", "encrypted files"],
        technique("T1486", "Data Encrypted for Impact", "TA0040", "Impact"),
    ),
    (
        &["ddos", "denial of service", "dos attack"],
        technique("T1498", "Network Denial of Service", "TA0040", "Impact"),
    ),
];

/// Deterministic keyword mapping of an event onto MITRE ATT&CK
pub struct MitreAttackMapperNode;

#[async_trait]
impl SecurityNode for MitreAttackMapperNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            id: MITRE_NODE_ID.to_string(),
            category: NodeCategory::Mitre,
            node_type: "mitre-mapping".to_string(),
            name: "MITRE ATT&CK Mapper".to_string(),
            description: "Maps the event to ATT&CK tactics and techniques".to_string(),
            version: "1.0.0".to_string(),
        }
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new()
            .input(SchemaField::new(THREAT_TYPE, FieldType::String).required())
            .output(SchemaField::new("techniques", FieldType::Array))
            .output(SchemaField::new("technique_ids", FieldType::Array))
            .output(SchemaField::new("tactics", FieldType::Array))
            .output(SchemaField::new("mapped", FieldType::Boolean))
    }

    async fn execute(
        &self,
        event: &SecurityEvent,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let mapping = map_event(event);

        if mapping.techniques.is_empty() {
            ctx.events.info(format!("No ATT&CK mapping for '{}'", event.threat_type()));
        }

        let techniques: Vec<Value> = mapping.techniques.iter().map(technique_value).collect();
        let mut tactics: Vec<String> = Vec::new();
        for t in &mapping.techniques {
            if !tactics.iter().any(|known| known == t.tactic) {
                tactics.push(t.tactic.to_string());
            }
        }
        let ids: Vec<String> = mapping
            .techniques
            .iter()
            .map(|t| t.technique_id.to_string())
            .collect();

        Ok(NodeOutput::new()
            .with_output("techniques", Value::Array(techniques))
            .with_output("technique_ids", ids)
            .with_output("tactics", tactics)
            .with_output("mapped", !mapping.techniques.is_empty())
            .with_confidence(mapping.confidence))
    }
}

pub struct Mapping {
    pub techniques: Vec<Technique>,
    pub confidence: f64,
}

/// Threat type matches score 0.9, matches found only in context fields 0.6
pub fn map_event(event: &SecurityEvent) -> Mapping {
    let from_type = lookup(&event.threat_type().to_lowercase());
    if !from_type.is_empty() {
        return Mapping {
            techniques: from_type,
            confidence: 0.9,
        };
    }

    let context = CONTEXT_FIELDS
        .iter()
        .filter_map(|field| event.get_str(field))
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    let from_context = lookup(&context);
    let confidence = if from_context.is_empty() { 0.2 } else { 0.6 };
    Mapping {
        techniques: from_context,
        confidence,
    }
}

fn lookup(haystack: &str) -> Vec<Technique> {
    if haystack.is_empty() {
        return Vec::new();
    }
    MAPPINGS
        .iter()
        .filter(|(keywords, _)| keywords.iter().any(|k| haystack.contains(k)))
        .map(|(_, t)| *t)
        .collect()
}

fn technique_value(t: &Technique) -> Value {
    let mut map = HashMap::new();
    map.insert("technique_id".to_string(), Value::from(t.technique_id));
    map.insert("technique_name".to_string(), Value::from(t.technique_name));
    map.insert("tactic_id".to_string(), Value::from(t.tactic_id));
    map.insert("tactic".to_string(), Value::from(t.tactic));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threat_type_mapping() {
        let mapping = map_event(&SecurityEvent::new("SQL Injection", 7.0));
        assert_eq!(mapping.confidence, 0.9);
        assert_eq!(mapping.techniques.len(), 1);
        assert_eq!(mapping.techniques[0].technique_id, "T1190");
    }

    #[test]
    fn test_context_fields_are_second_choice() {
        let event = SecurityEvent::new("Anomaly", 5.0)
            .with_field("description", "Repeated failed login attempts followed by RDP session");
        let mapping = map_event(&event);
        let ids: Vec<&str> = mapping.techniques.iter().map(|t| t.technique_id).collect();
        assert_eq!(ids, vec!["T1110", "T1021"]);
        assert_eq!(mapping.confidence, 0.6);
    }

    #[test]
    fn test_unmapped_event() {
        let mapping = map_event(&SecurityEvent::new("Policy Violation", 3.0));
        assert!(mapping.techniques.is_empty());
        assert_eq!(mapping.confidence, 0.2);
    }
}
