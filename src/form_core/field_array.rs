//! Field array lifecycle: append, remove, move and reconcile.
//!
//! Each array keeps an ordered list of stable item identities. Positional
//! paths (`items.<i>.*`) are derived from an identity's current position, so a
//! mutation detaches every item's values by identity, reorders, and
//! re-attaches them at their new positions. Nested array state travels with
//! its enclosing item.

use super::defaults::{count_items, item_values};
use super::descriptor::FieldArrayField;
use super::path;
use super::values::FormValues;
use crate::error::ArrayOpError;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

pub type ItemId = u64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArrayState {
    pub items: Vec<ItemId>,
    pub min: usize,
    pub max: usize,
}

impl ArrayState {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn can_append(&self) -> bool {
        self.items.len() < self.max
    }

    pub fn can_remove(&self) -> bool {
        self.items.len() > self.min
    }
}

/// One detached item: its identity, its values and nested array states,
/// both keyed relative to the item path.
struct Detached {
    id: ItemId,
    values: Vec<(String, JsonValue)>,
    nested: Vec<(String, ArrayState)>,
}

/// Identity bookkeeping for every registered array of one form instance.
#[derive(Clone, Debug, Default)]
pub struct FieldArrays {
    states: BTreeMap<String, ArrayState>,
    next_id: ItemId,
}

impl FieldArrays {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, array_path: &str) -> Option<&ArrayState> {
        self.states.get(array_path)
    }

    pub fn len(&self, array_path: &str) -> usize {
        self.states.get(array_path).map(ArrayState::len).unwrap_or(0)
    }

    pub fn ids(&self, array_path: &str) -> &[ItemId] {
        self.states
            .get(array_path)
            .map(|s| s.items.as_slice())
            .unwrap_or(&[])
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.states.keys()
    }

    fn fresh_id(&mut self) -> ItemId {
        self.next_id += 1;
        self.next_id
    }

    /// Register an array or re-check a registered one against `min ≤ len ≤ max`.
    ///
    /// A registered array keeps its own length; only append and remove change
    /// it. An unregistered one (first resolution, after reset or after it was
    /// inactive) takes its length from the items present in `values`. Short
    /// arrays are topped up with item defaults; values past the end are pruned.
    pub fn reconcile(&mut self, array: &FieldArrayField, array_path: &str, values: &mut FormValues) -> &ArrayState {
        let present = count_items(values, array_path);
        let known = self.states.get(array_path).map(ArrayState::len);
        let current = known.unwrap_or(present);
        let target = current.max(array.min).min(array.max);
        for i in current..target {
            for (k, v) in item_values(array, array_path, i, None).iter() {
                values.set(k.clone(), v.clone());
            }
        }
        if present > target {
            tracing::debug!(array = %array_path, present, len = target, "pruning values past the last item");
            values.retain(|p, _| match path::split_item(p, array_path) {
                Some((i, _)) => i < target,
                None => true,
            });
        }
        if current > target {
            tracing::debug!(array = %array_path, current, max = array.max, "trimming items beyond max");
            self.forget_below(array_path, target);
        }
        let mut items = self
            .states
            .get(array_path)
            .map(|s| s.items.clone())
            .unwrap_or_default();
        items.truncate(target);
        while items.len() < target {
            items.push(self.fresh_id());
        }
        self.states.insert(
            array_path.to_string(),
            ArrayState {
                items,
                min: array.min,
                max: array.max,
            },
        );
        &self.states[array_path]
    }

    /// Append one item. Refused when the array is at `max`.
    pub fn append(
        &mut self,
        array: &FieldArrayField,
        array_path: &str,
        values: &mut FormValues,
        explicit: Option<&Map<String, JsonValue>>,
    ) -> Result<usize, ArrayOpError> {
        let len = self.registered(array_path)?.len();
        if len >= array.max {
            tracing::debug!(array = %array_path, max = array.max, "append refused at capacity");
            return Err(ArrayOpError::AtCapacity {
                path: array_path.to_string(),
                max: array.max,
            });
        }
        for (k, v) in item_values(array, array_path, len, explicit).iter() {
            values.set(k.clone(), v.clone());
        }
        let id = self.fresh_id();
        if let Some(st) = self.states.get_mut(array_path) {
            st.items.push(id);
        }
        tracing::debug!(array = %array_path, index = len, id, "item appended");
        Ok(len)
    }

    /// Remove the item at `index`; later items shift down one slot.
    pub fn remove(&mut self, array_path: &str, index: usize, values: &mut FormValues) -> Result<(), ArrayOpError> {
        let st = self.registered(array_path)?;
        if index >= st.len() {
            return Err(ArrayOpError::OutOfRange {
                path: array_path.to_string(),
                index,
                len: st.len(),
            });
        }
        if !st.can_remove() {
            tracing::debug!(array = %array_path, min = st.min, "remove refused at minimum");
            return Err(ArrayOpError::AtMinimum {
                path: array_path.to_string(),
                min: st.min,
            });
        }
        let mut items = self.detach(array_path, values);
        let gone = items.remove(index);
        tracing::debug!(array = %array_path, index, id = gone.id, "item removed");
        self.attach(array_path, items, values);
        Ok(())
    }

    /// Move the item at `from` to position `to`; its values travel with it.
    pub fn move_item(
        &mut self,
        array_path: &str,
        from: usize,
        to: usize,
        values: &mut FormValues,
    ) -> Result<(), ArrayOpError> {
        let len = self.registered(array_path)?.len();
        for index in [from, to] {
            if index >= len {
                return Err(ArrayOpError::OutOfRange {
                    path: array_path.to_string(),
                    index,
                    len,
                });
            }
        }
        if from == to {
            return Ok(());
        }
        let mut items = self.detach(array_path, values);
        let item = items.remove(from);
        items.insert(to, item);
        tracing::debug!(array = %array_path, from, to, "item moved");
        self.attach(array_path, items, values);
        Ok(())
    }

    /// Drop identities for an array and everything nested under it.
    pub fn forget(&mut self, array_path: &str) {
        self.states.retain(|k, _| !path::has_prefix(k, array_path));
    }

    /// Keep only arrays whose path satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.states.retain(|k, _| keep(k));
    }

    fn forget_below(&mut self, array_path: &str, len: usize) {
        self.states.retain(|k, _| match path::split_item(k, array_path) {
            Some((i, _)) => i < len,
            None => true,
        });
    }

    fn registered(&self, array_path: &str) -> Result<&ArrayState, ArrayOpError> {
        self.states
            .get(array_path)
            .ok_or_else(|| ArrayOpError::UnknownArray {
                path: array_path.to_string(),
            })
    }

    fn detach(&mut self, array_path: &str, values: &mut FormValues) -> Vec<Detached> {
        let ids = self.ids(array_path).to_vec();
        ids.into_iter()
            .enumerate()
            .map(|(i, id)| {
                let prefix = path::item_path(array_path, i);
                let values = values
                    .take_subtree(&prefix)
                    .into_iter()
                    .map(|(k, v)| (relative(&k, &prefix), v))
                    .collect();
                let nested_keys: Vec<String> = self
                    .states
                    .keys()
                    .filter(|k| path::has_prefix(k, &prefix))
                    .cloned()
                    .collect();
                let nested = nested_keys
                    .into_iter()
                    .filter_map(|k| {
                        let st = self.states.remove(&k)?;
                        Some((relative(&k, &prefix), st))
                    })
                    .collect();
                Detached { id, values, nested }
            })
            .collect()
    }

    fn attach(&mut self, array_path: &str, items: Vec<Detached>, values: &mut FormValues) {
        let mut ids = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let prefix = path::item_path(array_path, i);
            for (rel, v) in item.values {
                values.set(path::resolve_path(&prefix, &rel, None), v);
            }
            for (rel, st) in item.nested {
                self.states.insert(path::resolve_path(&prefix, &rel, None), st);
            }
            ids.push(item.id);
        }
        if let Some(st) = self.states.get_mut(array_path) {
            st.items = ids;
        }
    }
}

fn relative(full: &str, prefix: &str) -> String {
    path::strip_prefix(full, prefix).unwrap_or("").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form_core::descriptor::{FieldDescriptor, LeafField, LeafKind};
    use serde_json::json;

    fn array(min: usize, max: usize) -> FieldArrayField {
        FieldArrayField::new(
            "items",
            vec![
                FieldDescriptor::leaf(LeafField::new("name", LeafKind::Text)),
                FieldDescriptor::leaf(LeafField::new("done", LeafKind::Checkbox)),
            ],
        )
        .bounds(min, max)
    }

    fn setup(min: usize, max: usize) -> (FieldArrayField, FieldArrays, FormValues) {
        let a = array(min, max);
        let mut arrays = FieldArrays::new();
        let mut values = FormValues::new();
        arrays.reconcile(&a, "items", &mut values);
        (a, arrays, values)
    }

    fn names(values: &FormValues, n: usize) -> Vec<String> {
        (0..n)
            .map(|i| {
                values
                    .get(&format!("items.{i}.name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("?")
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn append_stops_at_max() {
        let (a, mut arrays, mut values) = setup(1, 3);
        assert_eq!(arrays.len("items"), 1);
        assert_eq!(arrays.append(&a, "items", &mut values, None), Ok(1));
        assert_eq!(arrays.append(&a, "items", &mut values, None), Ok(2));
        assert_eq!(
            arrays.append(&a, "items", &mut values, None),
            Err(ArrayOpError::AtCapacity {
                path: "items".into(),
                max: 3
            })
        );
        assert_eq!(arrays.len("items"), 3);
        assert!(!values.contains("items.3.name"));
        assert_eq!(values.get("items.2.done"), Some(&json!(false)));
    }

    #[test]
    fn remove_stops_at_min_and_shifts_followers() {
        let (a, mut arrays, mut values) = setup(1, 5);
        for n in ["b", "c", "d", "e"] {
            let mut m = Map::new();
            m.insert("name".into(), json!(n));
            arrays.append(&a, "items", &mut values, Some(&m)).unwrap();
        }
        values.set("items.0.name", json!("a"));
        let ids_before = arrays.ids("items").to_vec();

        arrays.remove("items", 2, &mut values).unwrap();
        assert_eq!(names(&values, 4), vec!["a", "b", "d", "e"]);
        assert!(!values.contains("items.4.name"));
        // identities follow their data
        assert_eq!(
            arrays.ids("items"),
            &[ids_before[0], ids_before[1], ids_before[3], ids_before[4]]
        );

        for _ in 0..3 {
            arrays.remove("items", 0, &mut values).unwrap();
        }
        assert_eq!(arrays.len("items"), 1);
        assert!(matches!(
            arrays.remove("items", 0, &mut values),
            Err(ArrayOpError::AtMinimum { .. })
        ));
        assert_eq!(names(&values, 1), vec!["e"]);
    }

    #[test]
    fn move_carries_values_with_identity() {
        let (a, mut arrays, mut values) = setup(0, 4);
        for n in ["a", "b", "c"] {
            let mut m = Map::new();
            m.insert("name".into(), json!(n));
            arrays.append(&a, "items", &mut values, Some(&m)).unwrap();
        }
        values.set("items.0.done", json!(true));
        let first = arrays.ids("items")[0];
        arrays.move_item("items", 0, 2, &mut values).unwrap();
        assert_eq!(names(&values, 3), vec!["b", "c", "a"]);
        assert_eq!(values.get("items.2.done"), Some(&json!(true)));
        assert_eq!(values.get("items.0.done"), Some(&json!(false)));
        assert_eq!(arrays.ids("items")[2], first);
        assert!(matches!(
            arrays.move_item("items", 0, 3, &mut values),
            Err(ArrayOpError::OutOfRange { index: 3, .. })
        ));
    }

    #[test]
    fn bounds_hold_under_mixed_operations() {
        let (a, mut arrays, mut values) = setup(2, 4);
        // deterministic pseudo-random op sequence
        let mut seed: u64 = 0x2545_f491;
        for _ in 0..200 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let len = arrays.len("items");
            match seed % 3 {
                0 => {
                    let _ = arrays.append(&a, "items", &mut values, None);
                }
                1 => {
                    let _ = arrays.remove("items", (seed as usize / 3) % len.max(1), &mut values);
                }
                _ => {
                    let from = (seed as usize / 7) % len;
                    let to = (seed as usize / 11) % len;
                    arrays.move_item("items", from, to, &mut values).unwrap();
                }
            }
            let len = arrays.len("items");
            assert!((2..=4).contains(&len), "len {len} out of bounds");
            assert_eq!(count_items(&values, "items"), len);
        }
    }

    #[test]
    fn nested_array_state_moves_with_outer_item() {
        let lines = FieldArrayField::new(
            "lines",
            vec![FieldDescriptor::leaf(LeafField::new("sku", LeafKind::Text))],
        )
        .bounds(1, 5);
        let orders = FieldArrayField::new("orders", vec![FieldDescriptor::FieldArray(lines.clone())]).bounds(0, 5);
        let mut arrays = FieldArrays::new();
        let mut values = FormValues::new();
        arrays.reconcile(&orders, "orders", &mut values);
        arrays.append(&orders, "orders", &mut values, None).unwrap();
        arrays.append(&orders, "orders", &mut values, None).unwrap();
        arrays.reconcile(&lines, "orders.0.lines", &mut values);
        arrays.reconcile(&lines, "orders.1.lines", &mut values);
        arrays.append(&lines, "orders.1.lines", &mut values, None).unwrap();
        values.set("orders.1.lines.1.sku", json!("X-1"));
        let nested_ids = arrays.ids("orders.1.lines").to_vec();

        arrays.remove("orders", 0, &mut values).unwrap();
        assert_eq!(arrays.ids("orders.0.lines"), nested_ids.as_slice());
        assert!(arrays.get("orders.1.lines").is_none());
        assert_eq!(values.get("orders.0.lines.1.sku"), Some(&json!("X-1")));
    }

    #[test]
    fn reconcile_tops_up_and_trims() {
        let a = array(2, 3);
        let mut arrays = FieldArrays::new();
        let mut values = FormValues::new();
        values.set("items.0.name", json!("kept"));
        let st = arrays.reconcile(&a, "items", &mut values).clone();
        assert_eq!(st.len(), 2);
        assert_eq!(values.get("items.1.name"), Some(&json!("")));
        let first = st.items[0];

        // stray values past a registered array's end are pruned, not adopted
        for i in 2..6 {
            values.set(format!("items.{i}.name"), json!("extra"));
        }
        arrays.reconcile(&a, "items", &mut values);
        assert_eq!(arrays.len("items"), 2);
        assert_eq!(arrays.ids("items")[0], first);
        assert!(!values.contains("items.2.name"));
    }

    #[test]
    fn unregistered_array_takes_length_from_values_clamped_to_max() {
        let a = array(0, 3);
        let mut arrays = FieldArrays::new();
        let mut values = FormValues::new();
        for i in 0..6 {
            values.set(format!("items.{i}.name"), json!(format!("n{i}")));
        }
        arrays.reconcile(&a, "items", &mut values);
        assert_eq!(arrays.len("items"), 3);
        assert_eq!(names(&values, 3), vec!["n0", "n1", "n2"]);
        assert!(!values.contains("items.3.name"));
    }

    #[test]
    fn appended_item_without_values_survives_reconcile() {
        let lines = FieldArrayField::new(
            "lines",
            vec![FieldDescriptor::leaf(LeafField::new("sku", LeafKind::Text))],
        )
        .bounds(0, 5);
        let orders = FieldArrayField::new("orders", vec![FieldDescriptor::FieldArray(lines)]).bounds(0, 5);
        let mut arrays = FieldArrays::new();
        let mut values = FormValues::new();
        arrays.reconcile(&orders, "orders", &mut values);
        assert_eq!(arrays.append(&orders, "orders", &mut values, None), Ok(0));
        assert_eq!(count_items(&values, "orders"), 0);
        arrays.reconcile(&orders, "orders", &mut values);
        assert_eq!(arrays.len("orders"), 1);
    }

    #[test]
    fn unknown_array_is_reported() {
        let mut arrays = FieldArrays::new();
        let mut values = FormValues::new();
        assert_eq!(
            arrays.remove("ghost", 0, &mut values),
            Err(ArrayOpError::UnknownArray {
                path: "ghost".into()
            })
        );
    }
}
