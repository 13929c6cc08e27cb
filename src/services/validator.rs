//! Validation contract and the built-in constraint checker.

use crate::error::FieldErrors;
use crate::form_core::defaults::DATE_FORMAT;
use crate::form_core::descriptor::{number_value, LeafField, LeafKind};
use crate::form_core::{FormValues, NodeKind, ResolvedNode};
use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value as JsonValue;

/// Snapshot handed to a validator: active values only, plus the active
/// resolved nodes (fields and array headers) they belong to.
#[derive(Clone, Debug, Default)]
pub struct ValidationInput {
    pub values: FormValues,
    pub nodes: Vec<ResolvedNode>,
}

impl ValidationInput {
    pub fn fields(&self) -> impl Iterator<Item = (&str, &LeafField)> {
        self.nodes.iter().filter_map(|n| n.leaf().map(|l| (n.path.as_str(), l)))
    }
}

/// Pluggable schema validation. Returns the (possibly coerced) values on
/// success, or messages keyed by canonical path.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, input: &ValidationInput) -> Result<FormValues, FieldErrors>;
}

impl<F> SchemaValidator for F
where
    F: Fn(&ValidationInput) -> Result<FormValues, FieldErrors> + Send + Sync,
{
    fn validate(&self, input: &ValidationInput) -> Result<FormValues, FieldErrors> {
        self(input)
    }
}

/// Checks the constraints declared on the descriptors themselves.
#[derive(Clone, Copy, Debug, Default)]
pub struct RulesValidator;

impl SchemaValidator for RulesValidator {
    fn validate(&self, input: &ValidationInput) -> Result<FormValues, FieldErrors> {
        let mut out = input.values.clone();
        let mut errors = FieldErrors::new();
        for node in &input.nodes {
            match &node.kind {
                NodeKind::Field(leaf) => {
                    let current = input.values.get(&node.path);
                    match check_field(leaf, current) {
                        Ok(Some(coerced)) => {
                            out.set(node.path.clone(), coerced);
                        }
                        Ok(None) => {}
                        Err(msg) => {
                            errors.insert(node.path.clone(), msg);
                        }
                    }
                }
                NodeKind::Array { min, max, len } => {
                    if len < min {
                        errors.insert(node.path.clone(), format!("At least {min} item(s) required"));
                    } else if len > max {
                        errors.insert(node.path.clone(), format!("At most {max} item(s) allowed"));
                    }
                }
                _ => {}
            }
        }
        if errors.is_empty() {
            Ok(out)
        } else {
            tracing::debug!(count = errors.len(), "validation failed");
            Err(errors)
        }
    }
}

fn is_blank(v: Option<&JsonValue>) -> bool {
    match v {
        None | Some(JsonValue::Null) => true,
        Some(JsonValue::String(s)) => s.trim().is_empty(),
        Some(JsonValue::Array(a)) => a.is_empty(),
        _ => false,
    }
}

/// `Ok(Some(v))` replaces the stored value with its coerced form.
fn check_field(leaf: &LeafField, value: Option<&JsonValue>) -> Result<Option<JsonValue>, String> {
    let c = &leaf.constraints;
    if is_blank(value) {
        if leaf.required {
            return Err(match leaf.kind {
                LeafKind::MultiSelect { .. } => "Please select at least one".into(),
                LeafKind::Select { .. } => "Please select one".into(),
                _ => "This field is required".into(),
            });
        }
        if leaf.kind.is_numeric() {
            return Ok(Some(JsonValue::Null));
        }
        return Ok(None);
    }
    let Some(value) = value else { return Ok(None) };
    match &leaf.kind {
        LeafKind::Text | LeafKind::Password | LeafKind::TextArea => {
            let s = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            let st = s.trim();
            let len = st.chars().count();
            if let Some(minl) = c.min_length {
                if len < minl {
                    return Err(format!("Must be at least {minl} characters"));
                }
            }
            if let Some(maxl) = c.max_length {
                if len > maxl {
                    return Err(format!("Must be at most {maxl} characters"));
                }
            }
            if let Some(pat) = &c.pattern {
                match Regex::new(pat) {
                    Ok(re) if !re.is_match(st) => return Err("Does not match required pattern".into()),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(field = %leaf.name, "ignoring invalid pattern: {e}"),
                }
            }
            Ok(None)
        }
        LeafKind::Number | LeafKind::Integer | LeafKind::Slider { .. } => {
            let n = match value {
                JsonValue::Number(n) => n.as_f64(),
                JsonValue::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            let integer = matches!(leaf.kind, LeafKind::Integer);
            let Some(n) = n else {
                return Err(if integer { "Invalid integer" } else { "Invalid number" }.into());
            };
            if integer && n.fract() != 0.0 {
                return Err("Invalid integer".into());
            }
            let (lo, hi) = match &leaf.kind {
                LeafKind::Slider { min, max, .. } => (Some(c.minimum.unwrap_or(*min)), Some(c.maximum.unwrap_or(*max))),
                _ => (c.minimum, c.maximum),
            };
            if let Some(m) = lo {
                if n < m {
                    return Err(format!("Must be at least {m}"));
                }
            }
            if let Some(m) = hi {
                if n > m {
                    return Err(format!("Must be at most {m}"));
                }
            }
            Ok(Some(number_value(n)))
        }
        LeafKind::Checkbox | LeafKind::Switch => match value {
            JsonValue::Bool(_) => Ok(None),
            JsonValue::String(s) if s == "true" || s == "false" => Ok(Some(JsonValue::Bool(s == "true"))),
            _ => Err("Expected true or false".into()),
        },
        LeafKind::Select { options } => {
            if options.iter().any(|o| &o.value == value) {
                Ok(None)
            } else {
                Err("Not one of the available options".into())
            }
        }
        LeafKind::MultiSelect { options } => {
            let Some(picked) = value.as_array() else {
                return Err("Expected a list of options".into());
            };
            if let Some(bad) = picked.iter().find(|v| !options.iter().any(|o| &o.value == *v)) {
                return Err(format!("Unknown option {bad}"));
            }
            if let Some(mi) = c.min_items {
                if picked.len() < mi {
                    return Err(format!("At least {mi} item(s) required"));
                }
            }
            if let Some(mx) = c.max_items {
                if picked.len() > mx {
                    return Err(format!("At most {mx} item(s) allowed"));
                }
            }
            Ok(None)
        }
        LeafKind::Date => parse_date(value).map(|_| None),
        LeafKind::DateRange => {
            let from = value.get("from").filter(|v| !is_blank(Some(v)));
            let to = value.get("to").filter(|v| !is_blank(Some(v)));
            match (from, to) {
                (Some(f), Some(t)) => {
                    if parse_date(f)? > parse_date(t)? {
                        return Err("Start date must not be after end date".into());
                    }
                    Ok(None)
                }
                (None, None) if !leaf.required => Ok(None),
                _ => Err("Both start and end dates are required".into()),
            }
        }
        LeafKind::Hidden => Ok(None),
    }
}

fn parse_date(v: &JsonValue) -> Result<NaiveDate, String> {
    v.as_str()
        .and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
        .ok_or_else(|| "Invalid date".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form_core::descriptor::SelectOption;
    use serde_json::json;

    fn node(path: &str, leaf: LeafField) -> ResolvedNode {
        ResolvedNode {
            path: path.into(),
            label: leaf.label.clone(),
            kind: NodeKind::Field(leaf),
            visible: true,
            depth: 0,
            error: None,
        }
    }

    fn input(nodes: Vec<ResolvedNode>, values: JsonValue) -> ValidationInput {
        let values = values
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ValidationInput { values, nodes }
    }

    #[test]
    fn required_and_length_rules() {
        let mut name = LeafField::new("name", LeafKind::Text).required();
        name.constraints.min_length = Some(3);
        let inp = input(vec![node("name", name.clone())], json!({"name": "  "}));
        let errs = RulesValidator.validate(&inp).unwrap_err();
        assert_eq!(errs["name"], "This field is required");

        let inp = input(vec![node("name", name)], json!({"name": "ab"}));
        let errs = RulesValidator.validate(&inp).unwrap_err();
        assert_eq!(errs["name"], "Must be at least 3 characters");
    }

    #[test]
    fn numbers_are_coerced_from_strings() {
        let mut port = LeafField::new("port", LeafKind::Integer);
        port.constraints.minimum = Some(1.0);
        port.constraints.maximum = Some(65535.0);
        let inp = input(vec![node("items.0.port", port.clone())], json!({"items.0.port": "8080"}));
        let out = RulesValidator.validate(&inp).unwrap();
        assert_eq!(out.get("items.0.port"), Some(&json!(8080)));

        let inp = input(vec![node("items.0.port", port.clone())], json!({"items.0.port": "80.5"}));
        assert_eq!(RulesValidator.validate(&inp).unwrap_err()["items.0.port"], "Invalid integer");

        let inp = input(vec![node("items.0.port", port)], json!({"items.0.port": 0}));
        assert_eq!(RulesValidator.validate(&inp).unwrap_err()["items.0.port"], "Must be at least 1");
    }

    #[test]
    fn pattern_and_select_membership() {
        let mut code = LeafField::new("code", LeafKind::Text);
        code.constraints.pattern = Some("^[A-Z]{3}$".into());
        let tier = LeafField::new(
            "tier",
            LeafKind::Select {
                options: vec![SelectOption {
                    label: "Gold".into(),
                    value: json!("gold"),
                }],
            },
        );
        let inp = input(
            vec![node("code", code), node("tier", tier)],
            json!({"code": "abc", "tier": "silver"}),
        );
        let errs = RulesValidator.validate(&inp).unwrap_err();
        assert_eq!(errs.len(), 2);
        assert_eq!(errs["code"], "Does not match required pattern");
    }

    #[test]
    fn date_range_order() {
        let window = LeafField::new("window", LeafKind::DateRange);
        let inp = input(
            vec![node("window", window)],
            json!({"window": {"from": "2024-05-02", "to": "2024-05-01"}}),
        );
        assert!(RulesValidator.validate(&inp).is_err());
    }

    #[test]
    fn array_bounds_are_checked() {
        let inp = ValidationInput {
            values: FormValues::new(),
            nodes: vec![ResolvedNode {
                path: "items".into(),
                label: "Items".into(),
                kind: NodeKind::Array { min: 2, max: 4, len: 1 },
                visible: true,
                depth: 0,
                error: None,
            }],
        };
        assert!(RulesValidator.validate(&inp).unwrap_err().contains_key("items"));
    }

    #[test]
    fn closures_are_validators() {
        let v = |_: &ValidationInput| -> Result<FormValues, FieldErrors> {
            let mut e = FieldErrors::new();
            e.insert("x".into(), "server says no".into());
            Err(e)
        };
        assert!(v.validate(&ValidationInput::default()).is_err());
    }
}
