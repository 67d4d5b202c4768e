use guardcore::{SecurityEvent, Value};
use std::collections::HashMap;
use std::net::IpAddr;

/// Event fields that can carry an indicator of compromise
pub const INDICATOR_FIELDS: &[&str] = &[
    "source_ip",
    "destination_ip",
    "target_ip",
    "user_id",
    "file_hash",
    "domain",
    "url",
];

/// RFC 1918, loopback, link-local and unique-local addresses
pub fn is_private_ip(raw: &str) -> bool {
    match raw.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ip.is_private() || ip.is_loopback() || ip.is_link_local(),
        Ok(IpAddr::V6(ip)) => {
            ip.is_loopback() || (ip.segments()[0] & 0xfe00) == 0xfc00 || (ip.segments()[0] & 0xffc0) == 0xfe80
        }
        Err(_) => false,
    }
}

/// Non-empty indicator values found on the event, deduplicated, followed
/// by the threat type
pub fn extract_indicators(event: &SecurityEvent) -> Vec<String> {
    let mut indicators: Vec<String> = Vec::new();
    let candidates = INDICATOR_FIELDS
        .iter()
        .filter_map(|field| event.get_str(field))
        .chain(std::iter::once(event.threat_type()));

    for value in candidates {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("unknown") {
            continue;
        }
        if !indicators.iter().any(|i| i == value) {
            indicators.push(value.to_string());
        }
    }
    indicators
}

pub fn number(map: &HashMap<String, Value>, key: &str) -> Option<f64> {
    map.get(key).and_then(Value::as_f64)
}

pub fn text<'a>(map: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

pub fn strings(map: &HashMap<String, Value>, key: &str) -> Vec<String> {
    map.get(key).map(Value::string_list).unwrap_or_default()
}
