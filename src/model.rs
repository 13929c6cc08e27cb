use crate::error::{Error, Result};
use crate::form_core::descriptor::parse_fields;
use crate::form_core::{Diagnostics, FieldDescriptor, HiddenValuePolicy};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "DYNAFORM_CONFIG";
pub const CONFIG_FILE: &str = "form.yaml";

/// On-disk form definition.
#[derive(Debug, Deserialize, Clone)]
pub struct FormConfig {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    // Command line receiving the JSON payload on stdin
    #[serde(default)]
    pub submit_cmd: Option<String>,
    // Success → Idle delay; 0 disables the auto-reset
    #[serde(default = "default_auto_reset_ms")]
    pub auto_reset_ms: u64,
    #[serde(default)]
    pub hidden_values: HiddenValuePolicy,
    // Nested ({"items": [..]}) or flat ({"items.0.name": ..})
    #[serde(default)]
    pub defaults: JsonValue,
    #[serde(default)]
    pub fields: Vec<JsonValue>,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            title: None,
            description: None,
            submit_cmd: None,
            auto_reset_ms: default_auto_reset_ms(),
            hidden_values: HiddenValuePolicy::default(),
            defaults: JsonValue::Null,
            fields: vec![],
        }
    }
}

fn default_auto_reset_ms() -> u64 {
    3000
}

/// A parsed, immutable form definition shared by its instances.
#[derive(Debug, Clone)]
pub struct FormDefinition {
    pub title: String,
    pub description: Option<String>,
    pub fields: Vec<FieldDescriptor>,
    pub defaults: JsonValue,
    pub hidden_values: HiddenValuePolicy,
    pub auto_reset: Option<Duration>,
    pub submit_cmd: Option<String>,
    /// Problems found while parsing the descriptor trees.
    pub diagnostics: Diagnostics,
}

impl FormDefinition {
    pub fn new(title: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            title: title.into(),
            description: None,
            fields,
            defaults: JsonValue::Null,
            hidden_values: HiddenValuePolicy::default(),
            auto_reset: Some(Duration::from_millis(default_auto_reset_ms())),
            submit_cmd: None,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn with_defaults(mut self, defaults: JsonValue) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_hidden_values(mut self, policy: HiddenValuePolicy) -> Self {
        self.hidden_values = policy;
        self
    }

    pub fn with_auto_reset(mut self, delay: Option<Duration>) -> Self {
        self.auto_reset = delay;
        self
    }
}

impl FormConfig {
    pub fn build(&self) -> FormDefinition {
        let mut diagnostics = Diagnostics::new();
        let fields = parse_fields(&self.fields, "fields", &mut diagnostics);
        FormDefinition {
            title: self.title.clone().unwrap_or_else(|| "Form".to_string()),
            description: self.description.clone(),
            fields,
            defaults: self.defaults.clone(),
            hidden_values: self.hidden_values,
            auto_reset: (self.auto_reset_ms > 0).then(|| Duration::from_millis(self.auto_reset_ms)),
            submit_cmd: self.submit_cmd.clone().filter(|s| !s.trim().is_empty()),
            diagnostics,
        }
    }
}

pub fn parse_form_config(text: &str, origin: &str) -> Result<FormConfig> {
    serde_yaml::from_str(text).map_err(|e| {
        let message = match e.location() {
            Some(loc) => format!("{}:{}: {e}", loc.line(), loc.column()),
            None => e.to_string(),
        };
        Error::config(origin, message)
    })
}

pub fn load_form_config(path: &Path) -> Result<FormConfig> {
    if !path.exists() {
        return Err(Error::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let s = fs::read_to_string(path)?;
    let cfg = parse_form_config(&s, &path.display().to_string())?;
    tracing::info!(path = %path.display(), fields = cfg.fields.len(), "loaded form config");
    Ok(cfg)
}

/// `$DYNAFORM_CONFIG`, then `./form.yaml`, `./.dynaform/form.yaml` and
/// finally the user config dir.
pub fn discover_form_config() -> Result<(PathBuf, FormConfig)> {
    if let Ok(p) = std::env::var(CONFIG_ENV) {
        let p = PathBuf::from(p);
        let cfg = load_form_config(&p)?;
        return Ok((p, cfg));
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut candidates = vec![cwd.join(CONFIG_FILE), cwd.join(".dynaform").join(CONFIG_FILE)];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("dynaform").join(CONFIG_FILE));
    }
    for p in candidates {
        if p.exists() {
            let cfg = load_form_config(&p)?;
            return Ok((p, cfg));
        }
    }
    Err(Error::ConfigNotFound {
        path: cwd.join(CONFIG_FILE),
    })
}

/// Strict checks for the preview: problems the engine would otherwise only
/// contain and report.
pub fn validate_form_config(cfg: &FormConfig) -> Result<()> {
    let mut names = HashSet::new();
    check_level(&cfg.fields, "fields", &mut names)?;
    if let Some(cmd) = &cfg.submit_cmd {
        if !cmd.trim().is_empty() && shlex::split(cmd).is_none() {
            return Err(Error::config("submit_cmd", "cannot split command line"));
        }
    }
    Ok(())
}

// Conditionals and sections add no path segment, so their children share
// the enclosing namespace.
fn check_level<'a>(fields: &'a [JsonValue], at: &str, names: &mut HashSet<&'a str>) -> Result<()> {
    for (i, f) in fields.iter().enumerate() {
        let here = format!("{at}[{i}]");
        let kind = f.get("kind").and_then(|k| k.as_str()).unwrap_or("leaf");
        match kind {
            "conditional" => {
                if let Some(inner) = f.get("field") {
                    check_level(std::slice::from_ref(inner), &here, names)?;
                }
            }
            "dynamic_section" | "dynamicSection" | "section" => {
                if let Some(JsonValue::Array(children)) = f.get("fields") {
                    check_level(children, &here, names)?;
                }
            }
            "content" => {}
            _ => {
                let name = f.get("name").and_then(|n| n.as_str()).unwrap_or("");
                if !name.is_empty() && !names.insert(name) {
                    return Err(Error::config(here, format!("duplicate field name '{name}'")));
                }
                if matches!(kind, "field_array" | "fieldArray" | "array") {
                    let min = f.get("min").and_then(|v| v.as_u64());
                    let max = f.get("max").and_then(|v| v.as_u64());
                    if let (Some(min), Some(max)) = (min, max) {
                        if min > max {
                            return Err(Error::config(here, format!("min ({min}) exceeds max ({max})")));
                        }
                    }
                    if let Some(JsonValue::Array(children)) = f.get("fields").or_else(|| f.get("itemFields")) {
                        check_level(children, &format!("{here}.fields"), &mut HashSet::new())?;
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
title: Deploy
auto_reset_ms: 0
hidden_values: drop
defaults:
  items:
    - name: web
fields:
  - name: showAdvanced
    type: checkbox
  - kind: conditional
    when: { field: showAdvanced, equals: true }
    field: { name: retries, type: integer, default: 3 }
  - kind: field_array
    name: items
    min: 1
    max: 3
    fields:
      - { name: name, type: text, required: true }
"#;

    #[test]
    fn loads_and_builds_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("form.yaml");
        fs::File::create(&path)
            .unwrap()
            .write_all(SAMPLE.as_bytes())
            .unwrap();
        let cfg = load_form_config(&path).unwrap();
        assert!(validate_form_config(&cfg).is_ok());
        let def = cfg.build();
        assert_eq!(def.title, "Deploy");
        assert_eq!(def.fields.len(), 3);
        assert!(def.auto_reset.is_none());
        assert_eq!(def.hidden_values, HiddenValuePolicy::Drop);
        assert!(def.diagnostics.is_empty());
    }

    #[test]
    fn missing_file_is_config_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_form_config(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn yaml_errors_carry_location() {
        let err = parse_form_config("fields: [", "inline").unwrap_err();
        assert!(err.to_string().contains("inline"), "{err}");
    }

    #[test]
    fn validate_detects_duplicate_names_through_sections() {
        let cfg = parse_form_config(
            r#"
fields:
  - { name: host }
  - kind: section
    fields:
      - { name: host }
"#,
            "inline",
        )
        .unwrap();
        let err = validate_form_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("duplicate field name 'host'"));
    }

    #[test]
    fn bad_descriptor_is_contained_in_diagnostics() {
        let cfg = parse_form_config(
            r#"
fields:
  - { name: ok, type: text }
  - { name: grid, kind: grid }
"#,
            "inline",
        )
        .unwrap();
        let def = cfg.build();
        assert_eq!(def.fields.len(), 2);
        assert_eq!(def.diagnostics.len(), 1);
        assert_eq!(def.fields[1].kind_name(), "unsupported");
    }

    #[test]
    fn discovery_honours_env_var() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yaml");
        fs::write(&path, SAMPLE).unwrap();
        std::env::set_var(CONFIG_ENV, &path);
        let found = discover_form_config();
        std::env::remove_var(CONFIG_ENV);
        let (p, cfg) = found.unwrap();
        assert_eq!(p, path);
        assert_eq!(cfg.title.as_deref(), Some("Deploy"));
    }
}
