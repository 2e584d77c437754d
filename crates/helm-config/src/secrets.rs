//! Secret handling: the config file stores env var NAMES, never values.
//! Resolution happens once at startup; error messages reference the NAME
//! only and the resolved value never reaches a log line.

use anyhow::{bail, Result};
use serde_json::Value;

use helm_broker::{Secret, SessionCredentials};

use crate::BrokerConfig;

/// Env var overriding the configured login (optional).
pub const LOGIN_ENV: &str = "HELM_BROKER_LOGIN";
/// Env var overriding the configured server (optional).
pub const SERVER_ENV: &str = "HELM_BROKER_SERVER";

/// Known secret-looking prefixes. A leaf string starting with any of these
/// aborts the load — secrets belong in the environment, not the file.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "sk_live",
    "sk_test",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "gho_",
    "glpat-",
    "xoxb-",
    "xoxp-",
];

/// Recursively scan all leaf strings for secret-like literals.
pub fn scan_for_secret_literals(v: &Value) -> Result<()> {
    scan_inner(v, "")
}

fn scan_inner(v: &Value, path: &str) -> Result<()> {
    match v {
        Value::Object(map) => {
            for (k, child) in map {
                let child_path = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{path}.{k}")
                };
                scan_inner(child, &child_path)?;
            }
        }
        Value::Array(arr) => {
            for (i, child) in arr.iter().enumerate() {
                scan_inner(child, &format!("{path}[{i}]"))?;
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if SECRET_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
                bail!(
                    "CONFIG_SECRET_DETECTED at '{path}': value starts with a known secret \
                     prefix (redacted). Store the env var NAME instead (e.g. \
                     password_env: \"HELM_BROKER_PASSWORD\")."
                );
            }
        }
        _ => {}
    }
    Ok(())
}

fn env_non_empty(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve broker credentials from the environment. The password env var is
/// required; login and server may be overridden by the well-known vars.
pub fn resolve_credentials(broker: &BrokerConfig) -> Result<SessionCredentials> {
    let Some(password) = env_non_empty(&broker.password_env) else {
        bail!(
            "SECRETS_MISSING: required env var '{}' (broker password) is not set or empty",
            broker.password_env
        );
    };

    let login = match env_non_empty(LOGIN_ENV) {
        Some(raw) => raw.trim().parse::<i64>().map_err(|_| {
            anyhow::anyhow!("SECRETS_INVALID: env var '{LOGIN_ENV}' is not a numeric login")
        })?,
        None => broker.login,
    };
    let server = env_non_empty(SERVER_ENV).unwrap_or_else(|| broker.server.clone());

    Ok(SessionCredentials {
        login,
        password: Secret::new(password),
        server,
        timeout_ms: broker.timeout_ms,
        terminal_path: broker.terminal_path.clone(),
    })
}
