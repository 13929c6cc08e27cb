//! Visibility evaluation and whole-tree resolution.
//!
//! Every value change re-resolves the full descriptor tree against the
//! current snapshot. Resolution is also where field arrays are reconciled,
//! so it takes the values and array state mutably.

use super::descriptor::{FieldDescriptor, LeafField};
use super::diagnostics::Diagnostics;
use super::field_array::{FieldArrays, ItemId};
use super::path::{self, ArrayScope};
use super::values::{self, FormValues};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashSet};

/// What happens to stored values of fields that become inactive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HiddenValuePolicy {
    /// Keep them in storage; exclude them from enumeration and submission.
    #[default]
    Retain,
    /// Remove them from storage once hidden.
    Drop,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Field(LeafField),
    Array {
        min: usize,
        max: usize,
        len: usize,
    },
    Item {
        array_path: String,
        index: usize,
        id: ItemId,
    },
    Section {
        description: Option<String>,
    },
    Content {
        text: String,
    },
}

/// One entry of a resolved form, in render order.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedNode {
    pub path: String,
    pub label: String,
    pub kind: NodeKind,
    /// False only inside an always-registered array whose condition is off:
    /// bound and submitted, but not presented.
    pub visible: bool,
    pub depth: usize,
    pub error: Option<String>,
}

impl ResolvedNode {
    pub fn leaf(&self) -> Option<&LeafField> {
        match &self.kind {
            NodeKind::Field(l) => Some(l),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedForm {
    pub nodes: Vec<ResolvedNode>,
    bound: BTreeSet<String>,
}

impl ResolvedForm {
    /// Active value-bound fields, hidden always-registered items included.
    pub fn fields(&self) -> impl Iterator<Item = &ResolvedNode> {
        self.nodes.iter().filter(|n| matches!(n.kind, NodeKind::Field(_)))
    }

    /// Nodes a renderer should present.
    pub fn visible(&self) -> impl Iterator<Item = &ResolvedNode> {
        self.nodes.iter().filter(|n| n.visible)
    }

    pub fn find(&self, path: &str) -> Option<&ResolvedNode> {
        self.nodes.iter().find(|n| n.path == path)
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut ResolvedNode> {
        self.nodes.iter_mut().find(|n| n.path == path)
    }

    pub fn is_active(&self, path: &str) -> bool {
        self.bound.contains(path)
    }

    pub fn active_paths(&self) -> impl Iterator<Item = &String> {
        self.bound.iter()
    }

    /// The values that take part in validation and submission.
    pub fn active_values(&self, values: &FormValues) -> FormValues {
        values
            .iter()
            .filter(|(p, _)| self.bound.contains(p.as_str()))
            .map(|(p, v)| (p.clone(), v.clone()))
            .collect()
    }

    /// Nested submission payload for `active` values. Every active array is
    /// emitted as a list with one entry per item, so an empty array shows up
    /// as `[]` and an item without stored values as `{}`.
    pub fn to_payload(&self, active: &FormValues) -> JsonValue {
        let mut root = active.to_nested();
        // parents precede their nested arrays in render order
        for node in &self.nodes {
            if let NodeKind::Array { len, .. } = node.kind {
                values::ensure_list(&mut root, &node.path, len);
            }
        }
        root
    }
}

/// Whether a single descriptor is active under the current values.
///
/// A conditional wrapping an always-registered field array is always
/// structurally active; only its presentation follows the condition.
pub fn is_active(descriptor: &FieldDescriptor, values: &FormValues, scopes: &[ArrayScope]) -> bool {
    match descriptor {
        FieldDescriptor::Leaf(l) => l
            .depends_on
            .as_ref()
            .map(|dep| dep.is_satisfied(values, scopes))
            .unwrap_or(true),
        FieldDescriptor::Conditional(c) => {
            keeps_binding(descriptor) || c.condition.evaluate(values, scopes)
        }
        FieldDescriptor::DynamicSection(s) => s.condition.evaluate(values, scopes),
        FieldDescriptor::FieldArray(_) | FieldDescriptor::Content(_) => true,
        FieldDescriptor::Unsupported(_) => false,
    }
}

/// Whether the descriptor should be presented (as opposed to merely bound).
pub fn is_visible(descriptor: &FieldDescriptor, values: &FormValues, scopes: &[ArrayScope]) -> bool {
    match descriptor {
        FieldDescriptor::Conditional(c) => c.condition.evaluate(values, scopes),
        other => is_active(other, values, scopes),
    }
}

fn keeps_binding(descriptor: &FieldDescriptor) -> bool {
    match descriptor {
        FieldDescriptor::Conditional(c) => {
            c.always_registered && matches!(*c.field, FieldDescriptor::FieldArray(_))
        }
        _ => false,
    }
}

/// Resolve the whole tree into render order, reconciling arrays on the way.
pub fn resolve(
    fields: &[FieldDescriptor],
    values: &mut FormValues,
    arrays: &mut FieldArrays,
    diags: &mut Diagnostics,
    policy: HiddenValuePolicy,
) -> ResolvedForm {
    let mut r = Resolver {
        values,
        arrays,
        diags,
        nodes: Vec::new(),
        bound: BTreeSet::new(),
        live_arrays: HashSet::new(),
        inactive_roots: Vec::new(),
    };
    let mut scopes = Vec::new();
    r.walk(fields, "", &mut scopes, true, 0);

    let Resolver {
        values,
        arrays,
        nodes,
        bound,
        live_arrays,
        inactive_roots,
        ..
    } = r;
    arrays.retain(|p| live_arrays.contains(p));
    if policy == HiddenValuePolicy::Drop {
        for root in inactive_roots {
            if bound.contains(&root) || live_arrays.contains(&root) {
                continue;
            }
            let dropped = values.take_subtree(&root);
            if !dropped.is_empty() {
                tracing::debug!(root = %root, n = dropped.len(), "dropped hidden values");
            }
        }
    }
    ResolvedForm { nodes, bound }
}

struct Resolver<'a> {
    values: &'a mut FormValues,
    arrays: &'a mut FieldArrays,
    diags: &'a mut Diagnostics,
    nodes: Vec<ResolvedNode>,
    bound: BTreeSet<String>,
    live_arrays: HashSet<String>,
    inactive_roots: Vec<String>,
}

impl Resolver<'_> {
    fn walk(
        &mut self,
        fields: &[FieldDescriptor],
        container: &str,
        scopes: &mut Vec<ArrayScope>,
        visible: bool,
        depth: usize,
    ) {
        for d in fields {
            match d {
                FieldDescriptor::Leaf(l) => {
                    let p = path::resolve_path(container, &l.name, None);
                    if !is_active(d, &*self.values, scopes) {
                        self.inactive_roots.push(p);
                        continue;
                    }
                    if !self.claim(&p) {
                        continue;
                    }
                    self.nodes.push(ResolvedNode {
                        path: p,
                        label: l.label.clone(),
                        kind: NodeKind::Field(l.clone()),
                        visible,
                        depth,
                        error: None,
                    });
                }
                FieldDescriptor::Conditional(c) => {
                    let inner = std::slice::from_ref(&*c.field);
                    if c.condition.evaluate(&*self.values, scopes) {
                        self.walk(inner, container, scopes, visible, depth);
                    } else if keeps_binding(d) {
                        self.walk(inner, container, scopes, false, depth);
                    } else {
                        self.mark_inactive(inner, container);
                    }
                }
                FieldDescriptor::DynamicSection(s) => {
                    if !s.condition.evaluate(&*self.values, scopes) {
                        self.mark_inactive(&s.fields, container);
                        continue;
                    }
                    let mut child_depth = depth;
                    if let Some(title) = &s.title {
                        self.nodes.push(ResolvedNode {
                            path: path::resolve_path(container, &s.name, None),
                            label: title.clone(),
                            kind: NodeKind::Section {
                                description: s.description.clone(),
                            },
                            visible,
                            depth,
                            error: None,
                        });
                        child_depth += 1;
                    }
                    self.walk(&s.fields, container, scopes, visible, child_depth);
                }
                FieldDescriptor::FieldArray(a) => {
                    let ap = path::resolve_path(container, &a.name, None);
                    if !self.claim_array(&ap) {
                        continue;
                    }
                    let state = self.arrays.reconcile(a, &ap, self.values).clone();
                    self.live_arrays.insert(ap.clone());
                    self.nodes.push(ResolvedNode {
                        path: ap.clone(),
                        label: a.label.clone(),
                        kind: NodeKind::Array {
                            min: a.min,
                            max: a.max,
                            len: state.len(),
                        },
                        visible,
                        depth,
                        error: None,
                    });
                    for (i, id) in state.items.iter().enumerate() {
                        let ip = path::item_path(&ap, i);
                        self.nodes.push(ResolvedNode {
                            path: ip.clone(),
                            label: format!("{} #{}", a.label, i + 1),
                            kind: NodeKind::Item {
                                array_path: ap.clone(),
                                index: i,
                                id: *id,
                            },
                            visible,
                            depth: depth + 1,
                            error: None,
                        });
                        scopes.push(ArrayScope::new(ap.clone(), i));
                        self.walk(&a.item_fields, &ip, scopes, visible, depth + 2);
                        scopes.pop();
                    }
                }
                FieldDescriptor::Content(c) => {
                    self.nodes.push(ResolvedNode {
                        path: path::resolve_path(container, &c.name, None),
                        label: String::new(),
                        kind: NodeKind::Content {
                            text: c.text.clone(),
                        },
                        visible,
                        depth,
                        error: None,
                    });
                }
                // reported when parsed; renders nothing
                FieldDescriptor::Unsupported(_) => {}
            }
        }
    }

    fn claim(&mut self, p: &str) -> bool {
        if self.bound.contains(p) || self.live_arrays.contains(p) {
            self.diags
                .report(p, "duplicate field path; later descriptor ignored");
            return false;
        }
        self.bound.insert(p.to_string());
        true
    }

    fn claim_array(&mut self, p: &str) -> bool {
        if self.bound.contains(p) || self.live_arrays.contains(p) {
            self.diags
                .report(p, "duplicate field path; later descriptor ignored");
            return false;
        }
        true
    }

    /// Remember the paths a hidden subtree binds, for the drop policy.
    fn mark_inactive(&mut self, fields: &[FieldDescriptor], container: &str) {
        for d in fields {
            match d {
                FieldDescriptor::Leaf(l) => self
                    .inactive_roots
                    .push(path::resolve_path(container, &l.name, None)),
                FieldDescriptor::FieldArray(a) => self
                    .inactive_roots
                    .push(path::resolve_path(container, &a.name, None)),
                FieldDescriptor::Conditional(c) => {
                    self.mark_inactive(std::slice::from_ref(&*c.field), container)
                }
                FieldDescriptor::DynamicSection(s) => self.mark_inactive(&s.fields, container),
                FieldDescriptor::Content(_) | FieldDescriptor::Unsupported(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form_core::defaults::merge_defaults;
    use crate::form_core::descriptor::{Condition, FieldArrayField, LeafKind};
    use serde_json::json;

    fn text(name: &str) -> FieldDescriptor {
        FieldDescriptor::leaf(LeafField::new(name, LeafKind::Text))
    }

    fn resolve_with(fields: &[FieldDescriptor], values: &mut FormValues) -> ResolvedForm {
        let mut arrays = FieldArrays::new();
        let mut diags = Diagnostics::new();
        resolve(fields, values, &mut arrays, &mut diags, HiddenValuePolicy::Retain)
    }

    #[test]
    fn conditional_follows_show_advanced() {
        let fields = vec![
            FieldDescriptor::leaf(LeafField::new("showAdvanced", LeafKind::Checkbox)),
            FieldDescriptor::conditional(
                Condition::equals("showAdvanced", json!(true)),
                text("timeout"),
            ),
        ];
        let mut values = FormValues::new();
        assert!(!resolve_with(&fields, &mut values).is_active("timeout"));
        values.set("showAdvanced", json!(false));
        assert!(!resolve_with(&fields, &mut values).is_active("timeout"));
        values.set("showAdvanced", json!(true));
        assert!(resolve_with(&fields, &mut values).is_active("timeout"));
    }

    #[test]
    fn depends_on_resolves_within_item() {
        let fields = vec![FieldDescriptor::FieldArray(
            FieldArrayField::new(
                "items",
                vec![
                    FieldDescriptor::leaf(LeafField::new(
                        "slotType",
                        LeafKind::Select { options: vec![] },
                    )),
                    FieldDescriptor::leaf(
                        LeafField::new("slotName", LeafKind::Text)
                            .depends_on("slotType", Some(json!("STATIC"))),
                    ),
                ],
            )
            .bounds(3, 3),
        )];
        let mut diags = Diagnostics::new();
        let mut values = merge_defaults(&fields, &json!({}), &mut diags);
        values.set("items.0.slotType", json!("STATIC"));
        values.set("items.2.slotType", json!("DYNAMIC"));
        let r = resolve_with(&fields, &mut values);
        assert!(r.is_active("items.0.slotName"));
        assert!(!r.is_active("items.1.slotName"));
        assert!(!r.is_active("items.2.slotName"));

        values.set("items.2.slotType", json!("STATIC"));
        let r = resolve_with(&fields, &mut values);
        assert!(r.is_active("items.2.slotName"));
    }

    #[test]
    fn depends_on_without_value_uses_truthiness() {
        let fields = vec![
            text("company"),
            FieldDescriptor::leaf(LeafField::new("vatId", LeafKind::Text).depends_on("company", None)),
        ];
        let mut values = FormValues::new();
        values.set("company", json!(""));
        assert!(!resolve_with(&fields, &mut values).is_active("vatId"));
        values.set("company", json!("Acme"));
        assert!(resolve_with(&fields, &mut values).is_active("vatId"));
    }

    #[test]
    fn section_gates_all_children() {
        let fields = vec![FieldDescriptor::section(
            "shipping",
            Condition::Truthy {
                field: "ship".into(),
            },
            vec![text("street"), text("city")],
        )];
        let mut values = FormValues::new();
        let r = resolve_with(&fields, &mut values);
        assert_eq!(r.fields().count(), 0);
        values.set("ship", json!(true));
        let r = resolve_with(&fields, &mut values);
        assert!(r.is_active("street") && r.is_active("city"));
    }

    #[test]
    fn always_registered_array_stays_bound_while_hidden() {
        let arr = FieldArrayField::new("contacts", vec![text("email")]).bounds(1, 4);
        let fields = vec![FieldDescriptor::always_registered(
            Condition::Truthy {
                field: "notify".into(),
            },
            arr,
        )];
        let mut values = FormValues::new();
        values.set("notify", json!(true));
        let mut arrays = FieldArrays::new();
        let mut diags = Diagnostics::new();
        let r = resolve(&fields, &mut values, &mut arrays, &mut diags, HiddenValuePolicy::Drop);
        assert!(r.find("contacts.0.email").unwrap().visible);
        values.set("contacts.0.email", json!("a@b.c"));
        let id = arrays.ids("contacts")[0];

        values.set("notify", json!(false));
        let r = resolve(&fields, &mut values, &mut arrays, &mut diags, HiddenValuePolicy::Drop);
        let node = r.find("contacts.0.email").unwrap();
        assert!(!node.visible);
        assert!(r.is_active("contacts.0.email"));
        assert_eq!(arrays.ids("contacts"), &[id]);

        values.set("notify", json!(true));
        let r = resolve(&fields, &mut values, &mut arrays, &mut diags, HiddenValuePolicy::Drop);
        assert!(r.find("contacts.0.email").unwrap().visible);
        assert_eq!(values.get("contacts.0.email"), Some(&json!("a@b.c")));
        assert_eq!(arrays.ids("contacts"), &[id]);
    }

    #[test]
    fn plain_conditional_array_loses_identity_but_retains_values() {
        let arr = FieldArrayField::new("contacts", vec![text("email")]).bounds(1, 4);
        let fields = vec![FieldDescriptor::conditional(
            Condition::Truthy {
                field: "notify".into(),
            },
            FieldDescriptor::FieldArray(arr),
        )];
        let mut values = FormValues::new();
        values.set("notify", json!(true));
        let mut arrays = FieldArrays::new();
        let mut diags = Diagnostics::new();
        resolve(&fields, &mut values, &mut arrays, &mut diags, HiddenValuePolicy::Retain);
        values.set("contacts.0.email", json!("a@b.c"));

        values.set("notify", json!(false));
        let r = resolve(&fields, &mut values, &mut arrays, &mut diags, HiddenValuePolicy::Retain);
        assert!(!r.is_active("contacts.0.email"));
        assert!(arrays.get("contacts").is_none());
        assert!(r.active_values(&values).get("contacts.0.email").is_none());
        assert_eq!(values.get("contacts.0.email"), Some(&json!("a@b.c")));
    }

    #[test]
    fn drop_policy_removes_hidden_values_unless_rebound() {
        let fields = vec![
            FieldDescriptor::conditional(Condition::equals("mode", json!("a")), text("detail")),
            FieldDescriptor::conditional(Condition::equals("mode", json!("b")), text("detail")),
            FieldDescriptor::conditional(Condition::equals("mode", json!("a")), text("extra")),
        ];
        let mut values = FormValues::new();
        values.set("mode", json!("b"));
        values.set("detail", json!("kept"));
        values.set("extra", json!("gone"));
        let mut arrays = FieldArrays::new();
        let mut diags = Diagnostics::new();
        let r = resolve(&fields, &mut values, &mut arrays, &mut diags, HiddenValuePolicy::Drop);
        assert!(r.is_active("detail"));
        assert_eq!(values.get("detail"), Some(&json!("kept")));
        assert!(!values.contains("extra"));
        assert!(diags.is_empty());
    }

    #[test]
    fn duplicate_paths_are_reported_once_and_skipped() {
        let fields = vec![text("name"), text("name")];
        let mut values = FormValues::new();
        let mut arrays = FieldArrays::new();
        let mut diags = Diagnostics::new();
        for _ in 0..3 {
            let r = resolve(&fields, &mut values, &mut arrays, &mut diags, HiddenValuePolicy::Retain);
            assert_eq!(r.fields().count(), 1);
        }
        assert_eq!(diags.len(), 1);
    }
}
