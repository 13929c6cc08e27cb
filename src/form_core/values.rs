use super::path::{self, SEPARATOR};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// Flat value store keyed by canonical path.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormValues {
    map: BTreeMap<String, JsonValue>,
}

impl FormValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        self.map.get(path)
    }

    pub fn set(&mut self, path: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        self.map.insert(path.into(), value)
    }

    pub fn remove(&mut self, path: &str) -> Option<JsonValue> {
        self.map.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.map.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.map.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.map.keys()
    }

    /// Everything stored at `prefix` or below it.
    pub fn subtree(&self, prefix: &str) -> Vec<(String, JsonValue)> {
        self.map
            .iter()
            .filter(|(k, _)| path::has_prefix(k, prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Remove everything at `prefix` or below it, returning what was removed.
    pub fn take_subtree(&mut self, prefix: &str) -> Vec<(String, JsonValue)> {
        let keys: Vec<String> = self
            .map
            .keys()
            .filter(|k| path::has_prefix(k, prefix))
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|k| self.map.remove(&k).map(|v| (k, v)))
            .collect()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, &JsonValue) -> bool) {
        self.map.retain(|k, v| keep(k, v));
    }

    /// Overlay `other` on top of `self`; `other` wins on conflicts.
    pub fn merged_with(&self, other: &FormValues) -> FormValues {
        let mut out = self.clone();
        for (k, v) in other.iter() {
            out.map.insert(k.clone(), v.clone());
        }
        out
    }

    /// Flatten a nested JSON object into canonical paths.
    ///
    /// `is_leaf` stops descent at paths bound to a single field, so structured
    /// leaf values (multi-select lists, date objects) stay whole.
    pub fn flatten(value: &JsonValue, is_leaf: impl Fn(&str) -> bool) -> FormValues {
        let mut out = FormValues::new();
        flatten_into(&mut out, "", value, &is_leaf);
        out
    }

    /// Rebuild the nested JSON shape, turning numeric segments into arrays.
    pub fn to_nested(&self) -> JsonValue {
        let mut root = JsonValue::Object(Map::new());
        for (k, v) in &self.map {
            let segs: Vec<&str> = path::segments(k).collect();
            insert_nested(&mut root, &segs, v.clone());
        }
        root
    }
}

impl FromIterator<(String, JsonValue)> for FormValues {
    fn from_iter<I: IntoIterator<Item = (String, JsonValue)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

fn flatten_into(
    out: &mut FormValues,
    prefix: &str,
    value: &JsonValue,
    is_leaf: &dyn Fn(&str) -> bool,
) {
    if !prefix.is_empty() && is_leaf(prefix) {
        out.set(prefix, value.clone());
        return;
    }
    match value {
        JsonValue::Object(obj) if !obj.is_empty() => {
            for (k, v) in obj {
                flatten_into(out, &path::resolve_path(prefix, k, None), v, is_leaf);
            }
        }
        JsonValue::Array(arr) if !arr.is_empty() && !prefix.is_empty() => {
            for (i, v) in arr.iter().enumerate() {
                flatten_into(out, &path::resolve_path(prefix, "", Some(i)), v, is_leaf);
            }
        }
        _ => {
            if !prefix.is_empty() {
                out.set(prefix, value.clone());
            }
        }
    }
}

fn insert_nested(node: &mut JsonValue, segs: &[&str], value: JsonValue) {
    let Some((head, rest)) = segs.split_first() else {
        *node = value;
        return;
    };
    let index = head.parse::<usize>().ok();
    if node.is_null() {
        *node = match index {
            Some(_) => JsonValue::Array(Vec::new()),
            None => JsonValue::Object(Map::new()),
        };
    }
    match (node, index) {
        (JsonValue::Array(arr), Some(i)) => {
            if arr.len() <= i {
                arr.resize(i + 1, JsonValue::Null);
            }
            insert_nested(&mut arr[i], rest, value);
        }
        (JsonValue::Object(obj), _) => {
            let slot = obj.entry(head.to_string()).or_insert(JsonValue::Null);
            insert_nested(slot, rest, value);
        }
        (other, _) => {
            // A scalar already sits where a container is needed; the deeper path wins.
            let mut obj = Map::new();
            let mut slot = JsonValue::Null;
            insert_nested(&mut slot, rest, value);
            obj.insert(head.to_string(), slot);
            *other = JsonValue::Object(obj);
        }
    }
}

/// Make sure a list of at least `len` entries sits at `path` in a nested
/// payload. Entries that are still missing become empty objects.
pub fn ensure_list(root: &mut JsonValue, path: &str, len: usize) {
    let segs: Vec<&str> = path::segments(path).collect();
    let slot = slot_at(root, &segs);
    if !slot.is_array() {
        *slot = JsonValue::Array(Vec::new());
    }
    if let JsonValue::Array(arr) = slot {
        if arr.len() < len {
            arr.resize(len, JsonValue::Null);
        }
        for item in arr.iter_mut().filter(|v| v.is_null()) {
            *item = JsonValue::Object(Map::new());
        }
    }
}

fn slot_at<'a>(node: &'a mut JsonValue, segs: &[&str]) -> &'a mut JsonValue {
    let Some((head, rest)) = segs.split_first() else {
        return node;
    };
    match head.parse::<usize>() {
        Ok(i) => {
            if !node.is_array() {
                *node = JsonValue::Array(Vec::new());
            }
            match node {
                JsonValue::Array(arr) => {
                    if arr.len() <= i {
                        arr.resize(i + 1, JsonValue::Null);
                    }
                    slot_at(&mut arr[i], rest)
                }
                other => other,
            }
        }
        Err(_) => {
            if !node.is_object() {
                *node = JsonValue::Object(Map::new());
            }
            match node {
                JsonValue::Object(obj) => {
                    slot_at(obj.entry(head.to_string()).or_insert(JsonValue::Null), rest)
                }
                other => other,
            }
        }
    }
}

/// Truthiness used by `depends_on` without an expected value and by
/// `Truthy`/`Falsy` conditions: absent, null, false, "", 0 and empty
/// containers are falsy.
pub fn is_truthy(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => false,
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::String(s)) => !s.is_empty(),
        Some(JsonValue::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(JsonValue::Array(a)) => !a.is_empty(),
        Some(JsonValue::Object(o)) => !o.is_empty(),
    }
}

/// Generalize a concrete path into its descriptor pattern (`items.2.name` → `items.*.name`).
pub fn path_pattern(path: &str) -> String {
    path::segments(path)
        .map(|s| {
            if s.chars().all(|c| c.is_ascii_digit()) {
                "*"
            } else {
                s
            }
        })
        .collect::<Vec<_>>()
        .join(&SEPARATOR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_round_trip_through_paths() {
        let mut v = FormValues::new();
        v.set("title", json!("Report"));
        v.set("items.0.name", json!("a"));
        v.set("items.1.name", json!("b"));
        v.set("items.1.tags", json!(["x", "y"]));
        let nested = v.to_nested();
        assert_eq!(
            nested,
            json!({"title":"Report","items":[{"name":"a"},{"name":"b","tags":["x","y"]}]})
        );
        let back = FormValues::flatten(&nested, |p| p.ends_with("tags"));
        assert_eq!(back, v);
    }

    #[test]
    fn flatten_accepts_flat_keys() {
        let v = FormValues::flatten(&json!({"items.0.name": "a", "title": "t"}), |_| false);
        assert_eq!(v.get("items.0.name"), Some(&json!("a")));
        assert_eq!(v.get("title"), Some(&json!("t")));
    }

    #[test]
    fn subtree_is_segment_bounded() {
        let mut v = FormValues::new();
        v.set("items.1.name", json!("a"));
        v.set("items.10.name", json!("b"));
        v.set("items.1", json!("weird"));
        let taken = v.take_subtree("items.1");
        assert_eq!(taken.len(), 2);
        assert!(v.contains("items.10.name"));
    }

    #[test]
    fn truthiness_rules() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&json!(null))));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&json!([]))));
        assert!(is_truthy(Some(&json!("x"))));
        assert!(is_truthy(Some(&json!(true))));
        assert!(is_truthy(Some(&json!(2.5))));
    }

    #[test]
    fn pattern_replaces_indices() {
        assert_eq!(path_pattern("items.12.lines.0.sku"), "items.*.lines.*.sku");
        assert_eq!(path_pattern("title"), "title");
    }
}
