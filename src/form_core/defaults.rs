//! Initial values: per-field defaults merged with form-level defaults.
//!
//! Runs once when a form instance is created and again on explicit reset.
//! Date-like fields are normalized to one canonical shape (`YYYY-MM-DD`)
//! before the merge so nothing downstream branches on representation.

use super::descriptor::{binding_at, Binding, FieldArrayField, FieldDescriptor, LeafKind};
use super::diagnostics::Diagnostics;
use super::path;
use super::values::FormValues;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{json, Map, Value as JsonValue};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// `normalize(field defaults) <- normalize(form defaults)`, form level wins.
///
/// `form_defaults` may be nested (`{"items": [{"name": ..}]}`) or flat
/// (`{"items.0.name": ..}`). Array lengths follow the form-level items,
/// clamped to each array's `[min, max]`.
pub fn merge_defaults(
    fields: &[FieldDescriptor],
    form_defaults: &JsonValue,
    diags: &mut Diagnostics,
) -> FormValues {
    let form = flatten_external(fields, form_defaults);
    let form = normalize(fields, &form, diags);
    let mut seeded = FormValues::new();
    seed_fields(fields, "", &form, &mut seeded);
    let seeded = normalize(fields, &seeded, diags);
    let mut merged = seeded.merged_with(&form);
    clamp_arrays(fields, "", &mut merged);
    merged
}

/// Flatten externally supplied values, keeping structured leaf values whole.
pub fn flatten_external(fields: &[FieldDescriptor], external: &JsonValue) -> FormValues {
    FormValues::flatten(external, |p| {
        matches!(binding_at(fields, p), Some(Binding::Leaf(_)))
    })
}

/// Canonicalize every date-like value; everything else passes through.
pub fn normalize(fields: &[FieldDescriptor], values: &FormValues, diags: &mut Diagnostics) -> FormValues {
    values
        .iter()
        .map(|(p, v)| {
            let kind = match binding_at(fields, p) {
                Some(Binding::Leaf(l)) => Some(&l.kind),
                _ => None,
            };
            let out = match kind {
                Some(LeafKind::Date) => normalize_date(v),
                Some(LeafKind::DateRange) => normalize_date_range(v),
                _ => Ok(v.clone()),
            };
            let out = out.unwrap_or_else(|msg| {
                diags.report(p.clone(), msg);
                v.clone()
            });
            (p.clone(), out)
        })
        .collect()
}

/// Values for item `index` of `array`: declared defaults or zero values,
/// overlaid by the template/factory, overlaid by `explicit`.
pub fn item_values(
    array: &FieldArrayField,
    array_path: &str,
    index: usize,
    explicit: Option<&Map<String, JsonValue>>,
) -> FormValues {
    let item = path::item_path(array_path, index);
    let mut out = FormValues::new();
    seed_fields(&array.item_fields, &item, &FormValues::new(), &mut out);
    let overlays = array
        .item_defaults
        .as_ref()
        .map(|d| d.produce())
        .into_iter()
        .chain(explicit.cloned());
    for overlay in overlays {
        let rel = FormValues::flatten(&JsonValue::Object(overlay), |p| {
            matches!(binding_at(&array.item_fields, p), Some(Binding::Leaf(_)))
        });
        for (k, v) in rel.iter() {
            out.set(path::resolve_path(&item, k, None), v.clone());
        }
    }
    out
}

/// Number of items already present for an array in flat values.
pub fn count_items(values: &FormValues, array_path: &str) -> usize {
    values
        .paths()
        .filter_map(|p| path::split_item(p, array_path).map(|(i, _)| i + 1))
        .max()
        .unwrap_or(0)
}

fn seed_fields(fields: &[FieldDescriptor], container: &str, form: &FormValues, out: &mut FormValues) {
    for d in fields {
        match d {
            FieldDescriptor::Leaf(l) => {
                out.set(path::resolve_path(container, &l.name, None), l.initial_value());
            }
            FieldDescriptor::Conditional(c) => {
                seed_fields(std::slice::from_ref(&*c.field), container, form, out);
            }
            FieldDescriptor::DynamicSection(s) => seed_fields(&s.fields, container, form, out),
            FieldDescriptor::FieldArray(a) => {
                let ap = path::resolve_path(container, &a.name, None);
                let n = count_items(form, &ap).max(a.min).min(a.max);
                for i in 0..n {
                    let item = item_values(a, &ap, i, None);
                    for (k, v) in item.iter() {
                        out.set(k.clone(), v.clone());
                    }
                    // nested arrays size themselves from the form level too
                    let ip = path::item_path(&ap, i);
                    let mut nested = FormValues::new();
                    seed_nested_arrays(&a.item_fields, &ip, form, &mut nested);
                    for (k, v) in nested.iter() {
                        out.set(k.clone(), v.clone());
                    }
                }
            }
            FieldDescriptor::Content(_) | FieldDescriptor::Unsupported(_) => {}
        }
    }
}

fn seed_nested_arrays(fields: &[FieldDescriptor], container: &str, form: &FormValues, out: &mut FormValues) {
    for d in fields {
        match d {
            FieldDescriptor::Conditional(c) => {
                seed_nested_arrays(std::slice::from_ref(&*c.field), container, form, out)
            }
            FieldDescriptor::DynamicSection(s) => seed_nested_arrays(&s.fields, container, form, out),
            FieldDescriptor::FieldArray(_) => seed_fields(std::slice::from_ref(d), container, form, out),
            _ => {}
        }
    }
}

/// Drop items beyond `max` that form-level defaults may have introduced.
fn clamp_arrays(fields: &[FieldDescriptor], container: &str, values: &mut FormValues) {
    for d in fields {
        match d {
            FieldDescriptor::Conditional(c) => {
                clamp_arrays(std::slice::from_ref(&*c.field), container, values)
            }
            FieldDescriptor::DynamicSection(s) => clamp_arrays(&s.fields, container, values),
            FieldDescriptor::FieldArray(a) => {
                let ap = path::resolve_path(container, &a.name, None);
                let n = count_items(values, &ap);
                if n > a.max {
                    tracing::debug!(array = %ap, n, max = a.max, "trimming default items beyond max");
                    values.retain(|p, _| match path::split_item(p, &ap) {
                        Some((i, _)) => i < a.max,
                        None => true,
                    });
                }
                for i in 0..count_items(values, &ap) {
                    clamp_arrays(&a.item_fields, &path::item_path(&ap, i), values);
                }
            }
            _ => {}
        }
    }
}

/// Canonical date: `"YYYY-MM-DD"`. Empty and null values pass through.
///
/// Accepts ISO dates, RFC 3339 / naive date-times, `{year, month, day}`
/// objects and epoch milliseconds.
pub fn normalize_date(v: &JsonValue) -> Result<JsonValue, String> {
    let date = match v {
        JsonValue::Null => return Ok(JsonValue::Null),
        JsonValue::String(s) if s.trim().is_empty() => return Ok(v.clone()),
        JsonValue::String(s) => parse_date_str(s.trim())?,
        JsonValue::Number(n) => {
            let millis = n.as_i64().ok_or_else(|| format!("invalid timestamp {n}"))?;
            DateTime::<Utc>::from_timestamp_millis(millis)
                .ok_or_else(|| format!("timestamp {millis} out of range"))?
                .date_naive()
        }
        JsonValue::Object(obj) => {
            let part = |k: &str| obj.get(k).and_then(|x| x.as_i64());
            match (part("year"), part("month"), part("day")) {
                (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32)
                    .ok_or_else(|| format!("invalid date {y}-{m}-{d}"))?,
                _ => return Err("date object needs year, month and day".into()),
            }
        }
        other => return Err(format!("unsupported date value {other}")),
    };
    Ok(JsonValue::String(date.format(DATE_FORMAT).to_string()))
}

fn parse_date_str(s: &str) -> Result<NaiveDate, String> {
    if let Ok(d) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
        return Ok(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.date_naive());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|dt| dt.date())
        .map_err(|_| format!("unrecognized date '{s}'"))
}

/// Canonical range: `{"from": date, "to": date}`.
pub fn normalize_date_range(v: &JsonValue) -> Result<JsonValue, String> {
    let (from, to) = match v {
        JsonValue::Null => return Ok(JsonValue::Null),
        JsonValue::String(s) if s.is_empty() => return Ok(v.clone()),
        JsonValue::Array(pair) if pair.len() == 2 => (pair[0].clone(), pair[1].clone()),
        JsonValue::Object(obj) => (
            obj.get("from").or_else(|| obj.get("start")).cloned().unwrap_or(JsonValue::Null),
            obj.get("to").or_else(|| obj.get("end")).cloned().unwrap_or(JsonValue::Null),
        ),
        other => return Err(format!("unsupported date range {other}")),
    };
    Ok(json!({"from": normalize_date(&from)?, "to": normalize_date(&to)?}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form_core::descriptor::{FieldArrayField, LeafField};

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::leaf(LeafField::new("title", LeafKind::Text).default_value(json!("Untitled"))),
            FieldDescriptor::leaf(LeafField::new("published", LeafKind::Checkbox)),
            FieldDescriptor::leaf(LeafField::new("due", LeafKind::Date)),
            FieldDescriptor::FieldArray(
                FieldArrayField::new(
                    "items",
                    vec![
                        FieldDescriptor::leaf(LeafField::new("name", LeafKind::Text)),
                        FieldDescriptor::leaf(LeafField::new("qty", LeafKind::Integer)),
                        FieldDescriptor::leaf(LeafField::new(
                            "tags",
                            LeafKind::MultiSelect { options: vec![] },
                        )),
                    ],
                )
                .bounds(1, 3),
            ),
        ]
    }

    #[test]
    fn field_defaults_fill_min_items_with_zero_values() {
        let mut d = Diagnostics::new();
        let v = merge_defaults(&fields(), &json!({}), &mut d);
        assert_eq!(v.get("title"), Some(&json!("Untitled")));
        assert_eq!(v.get("published"), Some(&json!(false)));
        assert_eq!(v.get("items.0.name"), Some(&json!("")));
        assert_eq!(v.get("items.0.qty"), Some(&json!(0)));
        assert_eq!(v.get("items.0.tags"), Some(&json!([])));
        assert_eq!(count_items(&v, "items"), 1);
        assert!(d.is_empty());
    }

    #[test]
    fn form_level_wins_and_sizes_arrays() {
        let mut d = Diagnostics::new();
        let v = merge_defaults(
            &fields(),
            &json!({
                "title": "Quarterly",
                "due": {"year": 2024, "month": 3, "day": 9},
                "items": [{"name": "a", "tags": ["x"]}, {"name": "b"}]
            }),
            &mut d,
        );
        assert_eq!(v.get("title"), Some(&json!("Quarterly")));
        assert_eq!(v.get("due"), Some(&json!("2024-03-09")));
        assert_eq!(v.get("items.0.tags"), Some(&json!(["x"])));
        assert_eq!(v.get("items.1.name"), Some(&json!("b")));
        // missing item leaves get zero values
        assert_eq!(v.get("items.1.qty"), Some(&json!(0)));
        assert_eq!(count_items(&v, "items"), 2);
    }

    #[test]
    fn form_level_items_beyond_max_are_trimmed() {
        let mut d = Diagnostics::new();
        let v = merge_defaults(
            &fields(),
            &json!({"items": [{"name": "a"}, {"name": "b"}, {"name": "c"}, {"name": "d"}]}),
            &mut d,
        );
        assert_eq!(count_items(&v, "items"), 3);
        assert!(!v.contains("items.3.name"));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut d = Diagnostics::new();
        let input = json!({"due": "2024-03-09T22:15:00+02:00", "items.0.name": "a"});
        let once = merge_defaults(&fields(), &input, &mut d);
        let twice = merge_defaults(&fields(), &once.to_nested(), &mut d);
        assert_eq!(once, twice);
        let again = merge_defaults(&fields(), &input, &mut d);
        assert_eq!(once, again);
    }

    #[test]
    fn date_representations_converge() {
        let canonical = json!("2024-03-09");
        assert_eq!(normalize_date(&json!("2024-03-09")).unwrap(), canonical);
        assert_eq!(normalize_date(&json!("2024-03-09T10:00:00Z")).unwrap(), canonical);
        assert_eq!(normalize_date(&json!("2024-03-09T10:00:00.250")).unwrap(), canonical);
        assert_eq!(
            normalize_date(&json!({"year": 2024, "month": 3, "day": 9})).unwrap(),
            canonical
        );
        // 2024-03-09T12:00:00Z
        assert_eq!(normalize_date(&json!(1709985600000i64)).unwrap(), canonical);
        assert_eq!(normalize_date(&json!("")).unwrap(), json!(""));
        assert!(normalize_date(&json!("next tuesday")).is_err());
    }

    #[test]
    fn bad_dates_are_kept_and_reported() {
        let mut d = Diagnostics::new();
        let v = merge_defaults(&fields(), &json!({"due": "soon"}), &mut d);
        assert_eq!(v.get("due"), Some(&json!("soon")));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn date_ranges_normalize_both_ends() {
        assert_eq!(
            normalize_date_range(&json!(["2024-01-01", {"year": 2024, "month": 1, "day": 31}])).unwrap(),
            json!({"from": "2024-01-01", "to": "2024-01-31"})
        );
        assert_eq!(
            normalize_date_range(&json!({"start": "2024-01-01"})).unwrap(),
            json!({"from": "2024-01-01", "to": null})
        );
    }

    #[test]
    fn item_values_layer_template_and_explicit() {
        let arr = FieldArrayField::new(
            "items",
            vec![
                FieldDescriptor::leaf(LeafField::new("name", LeafKind::Text)),
                FieldDescriptor::leaf(LeafField::new("qty", LeafKind::Integer)),
            ],
        )
        .item_factory(|| {
            let mut m = Map::new();
            m.insert("qty".into(), json!(1));
            m
        });
        let mut explicit = Map::new();
        explicit.insert("name".into(), json!("widget"));
        let v = item_values(&arr, "items", 4, Some(&explicit));
        assert_eq!(v.get("items.4.qty"), Some(&json!(1)));
        assert_eq!(v.get("items.4.name"), Some(&json!("widget")));
    }
}
