//! Field-level validation of frps/frpc TOML configs

use fleetkit::{Validation, Validator};
use std::collections::HashSet;
use toml::{Table, Value};

const PROXY_TYPES: &[&str] = &["tcp", "udp", "http", "https", "tcpmux", "stcp", "sudp", "xtcp"];
const AUTH_METHODS: &[&str] = &["token", "oidc"];

/// Validates FRP configs, reporting every problem in a file
#[derive(Debug, Default, Clone, Copy)]
pub struct FrpValidator;

impl Validator for FrpValidator {
    fn validate(&self, body: &str) -> Validation {
        let doc: Table = match body.parse() {
            Ok(doc) => doc,
            Err(e) => {
                let e: toml::de::Error = e;
                return Validation::from_errors(vec![format!("syntax error: {}", e.message().trim())]);
            }
        };

        let mut errors = Vec::new();

        if doc.contains_key("bindPort") {
            check_port(&doc, "bindPort", true, &mut errors);
        } else if doc.contains_key("serverAddr") {
            match doc.get("serverAddr").and_then(Value::as_str) {
                Some(addr) if !addr.trim().is_empty() => {}
                _ => errors.push("serverAddr must be a non-empty string".to_string()),
            }
            check_port(&doc, "serverPort", false, &mut errors);
        } else {
            errors.push("neither bindPort (server) nor serverAddr (client) is set".to_string());
        }

        check_auth(&doc, &mut errors);
        check_proxies(&doc, &mut errors);

        Validation::from_errors(errors)
    }
}

fn port_error(value: &Value) -> Option<String> {
    match value.as_integer() {
        Some(port) if (1..=65535).contains(&port) => None,
        Some(port) => Some(format!("{port} is out of range 1-65535")),
        None => Some(format!("expected an integer, found {}", value.type_str())),
    }
}

fn check_port(table: &Table, key: &str, required: bool, errors: &mut Vec<String>) {
    match table.get(key) {
        Some(value) => {
            if let Some(problem) = port_error(value) {
                errors.push(format!("{key}: {problem}"));
            }
        }
        None if required => errors.push(format!("{key} is required")),
        None => {}
    }
}

fn check_auth(doc: &Table, errors: &mut Vec<String>) {
    let Some(auth) = doc.get("auth") else {
        return;
    };
    let Some(auth) = auth.as_table() else {
        errors.push("auth must be a table".to_string());
        return;
    };

    if let Some(method) = auth.get("method") {
        if !method.as_str().is_some_and(|m| AUTH_METHODS.contains(&m)) {
            errors.push(format!("auth.method must be one of {}", AUTH_METHODS.join(", ")));
        }
    }

    if let Some(token) = auth.get("token") {
        if token.as_str().is_none_or(|t| t.trim().is_empty()) {
            errors.push("auth.token must be a non-empty string".to_string());
        }
    }
}

fn check_proxies(doc: &Table, errors: &mut Vec<String>) {
    let Some(proxies) = doc.get("proxies") else {
        return;
    };
    let Some(proxies) = proxies.as_array() else {
        errors.push("proxies must be an array of tables ([[proxies]])".to_string());
        return;
    };

    let mut seen = HashSet::new();
    for (i, proxy) in proxies.iter().enumerate() {
        let Some(proxy) = proxy.as_table() else {
            errors.push(format!("proxies[{i}] must be a table"));
            continue;
        };

        let label = match proxy.get("name").and_then(Value::as_str) {
            Some(name) if !name.trim().is_empty() => {
                if !seen.insert(name.to_string()) {
                    errors.push(format!("proxy name '{name}' is used more than once"));
                }
                format!("proxy '{name}'")
            }
            _ => {
                errors.push(format!("proxies[{i}] needs a non-empty name"));
                format!("proxies[{i}]")
            }
        };

        match proxy.get("type").and_then(Value::as_str) {
            Some(kind) if PROXY_TYPES.contains(&kind) => {}
            Some(kind) => errors.push(format!("{label}: unknown type '{kind}'")),
            None => errors.push(format!("{label}: type is required")),
        }

        for key in ["localPort", "remotePort"] {
            if let Some(problem) = proxy.get(key).and_then(port_error) {
                errors.push(format!("{label}: {key}: {problem}"));
            }
        }
    }
}
