//! Submit transports: where a validated payload goes.

use regex::Regex;
use serde_json::Value as JsonValue;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::{collections::HashMap, env};

/// Delivers a payload somewhere and reports what came back. A rejection is a
/// message for the user; it lands in the submission `Error` state.
pub trait SubmitTransport: Send + Sync {
    fn submit(&self, payload: &JsonValue) -> Result<JsonValue, String>;
}

/// Closure-backed transport, handy for embedding and tests.
pub struct FnTransport<F>(pub F);

impl<F> SubmitTransport for FnTransport<F>
where
    F: Fn(&JsonValue) -> Result<JsonValue, String> + Send + Sync,
{
    fn submit(&self, payload: &JsonValue) -> Result<JsonValue, String> {
        (self.0)(payload)
    }
}

fn env_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("static pattern"))
}

/// Expand `${VAR}` from the given environment. Values containing whitespace
/// are quoted so they stay a single argument after shell splitting.
pub fn expand_cmdline_env(cmdline: &str, env_map: &HashMap<String, String>) -> String {
    env_pattern()
        .replace_all(cmdline, |caps: &regex::Captures| {
            let v = env_map.get(&caps[1]).cloned().unwrap_or_default();
            if v.chars().any(|c| c.is_whitespace()) {
                format!("\"{}\"", v.replace('"', "\\\""))
            } else {
                v
            }
        })
        .to_string()
}

/// Runs a command line per submission with the JSON payload on stdin.
///
/// Exit status 0 is success; stdout is parsed as JSON when it can be and
/// returned as a string otherwise. A non-zero exit is a rejection carrying
/// stderr (or a JSON error envelope's `message`).
#[derive(Clone, Debug)]
pub struct CommandTransport {
    cmdline: String,
}

impl CommandTransport {
    pub fn new(cmdline: impl Into<String>) -> Self {
        Self {
            cmdline: cmdline.into(),
        }
    }

    pub fn cmdline(&self) -> &str {
        &self.cmdline
    }

    fn argv(&self) -> Result<Vec<String>, String> {
        let env_map: HashMap<String, String> = env::vars().collect();
        let expanded = expand_cmdline_env(&self.cmdline, &env_map);
        let parts = shlex::split(&expanded).ok_or_else(|| "Failed to parse command line".to_string())?;
        if parts.is_empty() {
            return Err("Empty command line".into());
        }
        Ok(parts)
    }
}

impl SubmitTransport for CommandTransport {
    fn submit(&self, payload: &JsonValue) -> Result<JsonValue, String> {
        let parts = self.argv()?;
        let body = serde_json::to_vec(payload).map_err(|e| format!("encode payload: {e}"))?;
        tracing::info!(program = %parts[0], bytes = body.len(), "submitting form");
        let mut child = Command::new(&parts[0])
            .args(&parts[1..])
            .env("DYNAFORM_JSON", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("spawn {}: {e}", parts[0]))?;
        if let Some(mut stdin) = child.stdin.take() {
            // A command that ignores stdin may close it early.
            if let Err(e) = stdin.write_all(&body) {
                tracing::debug!("stdin closed early: {e}");
            }
        }
        let output = child.wait_with_output().map_err(|e| format!("wait: {e}"))?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            return Ok(serde_json::from_str(&stdout).unwrap_or(JsonValue::String(stdout)));
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = serde_json::from_str::<JsonValue>(&stderr)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| {
                if stderr.is_empty() {
                    format!("Command failed: {}", self.cmdline)
                } else {
                    format!("Command failed: {}\n{stderr}", self.cmdline)
                }
            });
        tracing::warn!(status = ?output.status.code(), "submit command rejected payload");
        Err(message)
    }
}
