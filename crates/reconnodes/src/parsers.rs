//! Turn raw tool output into structured payloads.

use regex::Regex;
use reconcore::value::display;
use reconcore::Value;
use serde_json::{json, Map};
use std::sync::OnceLock;

fn subdomain_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]*\.").ok())
        .as_ref()
}

fn non_empty_lines(raw: &str) -> impl Iterator<Item = &str> {
    raw.lines().map(str::trim).filter(|line| !line.is_empty())
}

/// One host name per line; anything that does not start like a domain label
/// (banners, progress output) is dropped.
pub fn parse_subdomains(raw: &str) -> Value {
    let subdomains: Vec<Value> = match subdomain_pattern() {
        Some(pattern) => non_empty_lines(raw)
            .filter(|line| pattern.is_match(line))
            .map(|line| Value::String(line.to_string()))
            .collect(),
        None => Vec::new(),
    };

    json!({
        "count": subdomains.len(),
        "subdomains": subdomains,
        "raw": raw,
    })
}

/// Line-delimited JSON findings. Lines that are not JSON, or lack template
/// info or a match location, are skipped.
pub fn parse_nuclei(raw: &str) -> Value {
    let findings: Vec<Value> = non_empty_lines(raw)
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|record| {
            let info = record.get("info").filter(|v| v.is_object())?;
            let target = record
                .get("matched")
                .or_else(|| record.get("matched-at"))
                .filter(|v| !v.is_null())?;
            let field = |key: &str| info.get(key).cloned().unwrap_or(Value::Null);
            Some(json!({
                "template": field("name"),
                "severity": field("severity"),
                "target": target,
                "description": field("description"),
                "reference": field("reference"),
                "tags": field("tags"),
            }))
        })
        .collect();

    json!({
        "count": findings.len(),
        "severityCounts": tally(&findings, "severity"),
        "findings": findings,
        "raw": raw,
    })
}

/// ffuf's JSON report. Falls back to the `Status:` lines of its text output
/// when the report does not parse.
pub fn parse_ffuf(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(report) => {
            let results: Vec<Value> = report
                .get("results")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .map(|r| {
                            let field = |key: &str| r.get(key).cloned().unwrap_or(Value::Null);
                            json!({
                                "url": field("url"),
                                "status": field("status"),
                                "length": field("length"),
                                "words": field("words"),
                                "lines": field("lines"),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();

            json!({
                "count": results.len(),
                "statusCounts": tally(&results, "status"),
                "results": results,
                "raw": raw,
            })
        }
        Err(_) => {
            let results: Vec<Value> = raw
                .lines()
                .filter(|line| line.contains("Status:"))
                .map(|line| json!({ "raw": line }))
                .collect();
            json!({
                "count": results.len(),
                "results": results,
                "raw": raw,
            })
        }
    }
}

const PARAMETER_MARKER: &str = "Parameter discovered:";

/// Parameter names reported by arjun.
pub fn parse_parameters(raw: &str) -> Value {
    let parameters: Vec<Value> = raw
        .lines()
        .filter_map(|line| line.split_once(PARAMETER_MARKER))
        .map(|(_, rest)| rest.trim())
        .filter(|param| !param.is_empty())
        .map(|param| Value::String(param.to_string()))
        .collect();

    json!({
        "count": parameters.len(),
        "parameters": parameters,
        "raw": raw,
    })
}

/// Count records by the display form of `key`; missing or empty values land
/// under `unknown`.
fn tally(records: &[Value], key: &str) -> Value {
    let mut counts = Map::new();
    for record in records {
        let label = record
            .get(key)
            .map(display)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let entry = counts.entry(label).or_insert(json!(0));
        *entry = json!(entry.as_u64().unwrap_or(0) + 1);
    }
    Value::Object(counts)
}
