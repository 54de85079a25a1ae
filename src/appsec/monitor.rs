//! Request body inspection against a small built-in rule set.

use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{error, warn};

use crate::apm::Span;
use crate::apm::context::priority;

/// Address under which parsed request bodies are evaluated.
pub const REQUEST_BODY_ADDRESS: &str = "server.request.body";

/// Address under which matched route parameters are evaluated.
pub const REQUEST_PATH_PARAMS_ADDRESS: &str = "server.request.path_params";

/// Nesting deeper than this is not inspected.
const MAX_DEPTH: usize = 20;

struct RuleDef {
    id: &'static str,
    name: &'static str,
    kind: &'static str,
    category: &'static str,
    pattern: &'static str,
}

const RULES: &[RuleDef] = &[
    RuleDef {
        id: "crs-942-100",
        name: "SQL Injection Attack Detected via libinjection",
        kind: "sql_injection",
        category: "attack_attempt",
        pattern: r"(?i)(\bunion\b[\s\S]+\bselect\b|'\s*or\s+'?\d+'?\s*=\s*'?\d+|;\s*drop\s+table\b)",
    },
    RuleDef {
        id: "crs-941-110",
        name: "XSS Filter - Category 1: Script Tag Vector",
        kind: "xss",
        category: "attack_attempt",
        pattern: r"(?i)<script[^>]*>",
    },
    RuleDef {
        id: "crs-930-100",
        name: "Obfuscated Path Traversal Attack (/../)",
        kind: "lfi",
        category: "attack_attempt",
        pattern: r"(?:\.\./|\.\.\\|%2e%2e%2f)",
    },
    RuleDef {
        id: "crs-930-120",
        name: "OS File Access Attempt",
        kind: "lfi",
        category: "attack_attempt",
        pattern: r"(?i)/etc/(?:passwd|shadow|hosts)\b",
    },
    RuleDef {
        id: "crs-932-160",
        name: "Remote Command Execution: Unix Shell Code Found",
        kind: "command_injection",
        category: "attack_attempt",
        pattern: r"(?i)(?:;|\||`|\$\()\s*(?:cat|ls|id|whoami|uname|curl|wget)\b",
    },
];

/// A compiled detection rule.
pub struct Rule {
    pub id: &'static str,
    pub name: &'static str,
    pub kind: &'static str,
    pub category: &'static str,
    regex: Regex,
}

/// One rule match inside the inspected value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Finding {
    pub rule_id: &'static str,
    pub rule_name: &'static str,
    pub kind: &'static str,
    pub category: &'static str,
    pub operator_value: String,
    pub address: &'static str,
    pub key_path: Vec<Value>,
    pub value: String,
    pub highlight: String,
}

/// Evaluates parsed request data against the rule set.
pub struct Monitor {
    enabled: bool,
    rules: Vec<Rule>,
}

impl Monitor {
    pub fn new(enabled: bool) -> Self {
        let rules = RULES
            .iter()
            .filter_map(|def| match Regex::new(def.pattern) {
                Ok(regex) => Some(Rule {
                    id: def.id,
                    name: def.name,
                    kind: def.kind,
                    category: def.category,
                    regex,
                }),
                Err(e) => {
                    error!(rule = def.id, "invalid rule pattern: {e}");
                    None
                }
            })
            .collect();
        Self { enabled, rules }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Runs every rule over the keys and scalar values of `value`.
    ///
    /// Each rule reports at most its first match.
    pub fn scan(&self, address: &'static str, value: &Value) -> Vec<Finding> {
        let mut findings = Vec::new();
        if !self.enabled {
            return findings;
        }
        for rule in &self.rules {
            let mut path = Vec::new();
            if let Some(finding) = scan_value(rule, address, value, &mut path, 0) {
                findings.push(finding);
            }
        }
        findings
    }
}

fn scan_value(
    rule: &Rule,
    address: &'static str,
    value: &Value,
    path: &mut Vec<Value>,
    depth: usize,
) -> Option<Finding> {
    if depth > MAX_DEPTH {
        return None;
    }
    match value {
        Value::String(s) => match_str(rule, address, s, path),
        Value::Number(n) => match_str(rule, address, &n.to_string(), path),
        Value::Array(items) => items.iter().enumerate().find_map(|(i, item)| {
            path.push(json!(i));
            let found = scan_value(rule, address, item, path, depth + 1);
            path.pop();
            found
        }),
        Value::Object(map) => map.iter().find_map(|(key, item)| {
            path.push(json!(key));
            let found = match_str(rule, address, key, path)
                .or_else(|| scan_value(rule, address, item, path, depth + 1));
            path.pop();
            found
        }),
        Value::Bool(_) | Value::Null => None,
    }
}

fn match_str(rule: &Rule, address: &'static str, s: &str, path: &[Value]) -> Option<Finding> {
    let m = rule.regex.find(s)?;
    Some(Finding {
        rule_id: rule.id,
        rule_name: rule.name,
        kind: rule.kind,
        category: rule.category,
        operator_value: rule.regex.as_str().to_owned(),
        address,
        key_path: path.to_vec(),
        value: s.to_owned(),
        highlight: m.as_str().to_owned(),
    })
}

/// Serialises findings the way the trace intake expects in `_dd.appsec.json`.
pub fn triggers_json(findings: &[Finding]) -> Value {
    let triggers: Vec<Value> = findings
        .iter()
        .map(|f| {
            json!({
                "rule": {
                    "id": f.rule_id,
                    "name": f.rule_name,
                    "tags": { "type": f.kind, "category": f.category },
                },
                "rule_matches": [{
                    "operator": "match_regex",
                    "operator_value": f.operator_value,
                    "parameters": [{
                        "address": f.address,
                        "key_path": f.key_path,
                        "value": f.value,
                        "highlight": [f.highlight],
                    }],
                }],
            })
        })
        .collect();
    json!({ "triggers": triggers })
}

/// Inspects a parsed request body in the context of `span`.
///
/// Findings are recorded on the local root span and never affect the HTTP
/// response. Without a span, or with the monitor disabled, nothing happens.
pub fn monitor_parsed_http_body(span: Option<&Span>, body: &Value) -> Vec<Finding> {
    record(span, REQUEST_BODY_ADDRESS, body)
}

/// Inspects the path parameters of the matched route, keyed by name.
///
/// Recorded the same way as body findings.
pub fn monitor_path_params<'a>(
    span: Option<&Span>,
    params: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Vec<Finding> {
    let params: serde_json::Map<String, Value> = params
        .into_iter()
        .map(|(name, value)| (name.to_owned(), Value::from(value)))
        .collect();
    record(span, REQUEST_PATH_PARAMS_ADDRESS, &Value::Object(params))
}

fn record(span: Option<&Span>, address: &'static str, value: &Value) -> Vec<Finding> {
    let Some(span) = span else {
        return Vec::new();
    };
    let findings = span.tracer().appsec().scan(address, value);
    if findings.is_empty() {
        return findings;
    }

    let root = span.local_root();
    root.set_tag("appsec.event", "true");
    root.set_tag("_dd.appsec.json", triggers_json(&findings).to_string());
    root.set_origin("appsec");
    root.set_sampling_priority(priority::USER_KEEP);

    for f in &findings {
        warn!(
            trace_id = %root.trace_id(),
            rule = f.rule_id,
            address = f.address,
            highlight = %f.highlight,
            "security finding"
        );
    }
    findings
}
