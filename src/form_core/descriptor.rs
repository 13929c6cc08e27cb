//! Field descriptor model and its parser from JSON/YAML trees.
//!
//! A form is a tree of [`FieldDescriptor`]s built once, before any form
//! instance exists. Parsing never fails as a whole: a malformed node becomes
//! [`FieldDescriptor::Unsupported`] and a diagnostic, and resolves to nothing.

use super::diagnostics::Diagnostics;
use super::path::{self, ArrayScope};
use super::values::{is_truthy, FormValues};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub enum FieldDescriptor {
    Leaf(LeafField),
    Conditional(ConditionalField),
    FieldArray(FieldArrayField),
    DynamicSection(DynamicSection),
    Content(ContentBlock),
    Unsupported(UnsupportedField),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LeafField {
    pub name: String,
    pub label: String,
    pub kind: LeafKind,
    pub required: bool,
    pub default: Option<JsonValue>,
    pub depends_on: Option<DependsOn>,
    pub constraints: Constraints,
    pub help: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LeafKind {
    Text,
    Password,
    TextArea,
    Number,
    Integer,
    Slider { min: f64, max: f64, step: f64 },
    Checkbox,
    Switch,
    Select { options: Vec<SelectOption> },
    MultiSelect { options: Vec<SelectOption> },
    Date,
    DateRange,
    Hidden,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectOption {
    pub label: String,
    pub value: JsonValue,
}

/// Constraints consumed by the rules validator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Constraints {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DependsOn {
    pub field: String,
    /// `None` means "active while the dependency is truthy".
    pub value: Option<JsonValue>,
}

#[derive(Clone, Debug)]
pub struct ConditionalField {
    pub name: String,
    pub condition: Condition,
    pub field: Box<FieldDescriptor>,
    pub always_registered: bool,
}

#[derive(Clone, Debug)]
pub struct FieldArrayField {
    pub name: String,
    pub label: String,
    pub item_fields: Vec<FieldDescriptor>,
    pub min: usize,
    pub max: usize,
    pub item_defaults: Option<ItemDefaults>,
}

#[derive(Clone, Debug)]
pub struct DynamicSection {
    pub name: String,
    pub condition: Condition,
    pub fields: Vec<FieldDescriptor>,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ContentBlock {
    pub name: String,
    pub text: String,
}

#[derive(Clone, Debug)]
pub struct UnsupportedField {
    pub name: String,
    pub reason: String,
}

pub type ItemFactory = Arc<dyn Fn() -> Map<String, JsonValue> + Send + Sync>;

/// Values for a freshly appended array item, keyed by item-relative path.
#[derive(Clone)]
pub enum ItemDefaults {
    Template(Map<String, JsonValue>),
    Factory(ItemFactory),
}

impl ItemDefaults {
    pub fn produce(&self) -> Map<String, JsonValue> {
        match self {
            ItemDefaults::Template(t) => t.clone(),
            ItemDefaults::Factory(f) => f(),
        }
    }
}

impl fmt::Debug for ItemDefaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemDefaults::Template(t) => f.debug_tuple("Template").field(t).finish(),
            ItemDefaults::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// What a custom predicate sees: the whole snapshot plus the enclosing item.
pub struct ConditionContext<'a> {
    pub values: &'a FormValues,
    pub scopes: &'a [ArrayScope],
}

impl ConditionContext<'_> {
    /// Value of a reference, resolved relative to the enclosing array item.
    pub fn value(&self, reference: &str) -> Option<&JsonValue> {
        self.values
            .get(&path::resolve_reference(reference, self.scopes))
    }
}

pub type Predicate = Arc<dyn Fn(&ConditionContext<'_>) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum Condition {
    Always,
    Never,
    Equals { field: String, value: JsonValue },
    NotEquals { field: String, value: JsonValue },
    Truthy { field: String },
    Falsy { field: String },
    OneOf { field: String, values: Vec<JsonValue> },
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    Custom(Predicate),
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always => f.write_str("Always"),
            Condition::Never => f.write_str("Never"),
            Condition::Equals { field, value } => write!(f, "{field} == {value}"),
            Condition::NotEquals { field, value } => write!(f, "{field} != {value}"),
            Condition::Truthy { field } => write!(f, "truthy({field})"),
            Condition::Falsy { field } => write!(f, "falsy({field})"),
            Condition::OneOf { field, values } => write!(f, "{field} in {values:?}"),
            Condition::All(c) => f.debug_tuple("All").field(c).finish(),
            Condition::Any(c) => f.debug_tuple("Any").field(c).finish(),
            Condition::Not(c) => f.debug_tuple("Not").field(c).finish(),
            Condition::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Condition {
    pub fn custom(f: impl Fn(&ConditionContext<'_>) -> bool + Send + Sync + 'static) -> Self {
        Condition::Custom(Arc::new(f))
    }

    pub fn equals(field: impl Into<String>, value: JsonValue) -> Self {
        Condition::Equals {
            field: field.into(),
            value,
        }
    }

    pub fn evaluate(&self, values: &FormValues, scopes: &[ArrayScope]) -> bool {
        let lookup = |field: &str| values.get(&path::resolve_reference(field, scopes));
        match self {
            Condition::Always => true,
            Condition::Never => false,
            Condition::Equals { field, value } => lookup(field) == Some(value),
            Condition::NotEquals { field, value } => lookup(field) != Some(value),
            Condition::Truthy { field } => is_truthy(lookup(field)),
            Condition::Falsy { field } => !is_truthy(lookup(field)),
            Condition::OneOf { field, values: allowed } => lookup(field)
                .map(|v| allowed.iter().any(|a| a == v))
                .unwrap_or(false),
            Condition::All(cs) => cs.iter().all(|c| c.evaluate(values, scopes)),
            Condition::Any(cs) => cs.iter().any(|c| c.evaluate(values, scopes)),
            Condition::Not(c) => !c.evaluate(values, scopes),
            Condition::Custom(pred) => pred(&ConditionContext { values, scopes }),
        }
    }
}

impl DependsOn {
    /// Strict equality when a value is declared, truthiness otherwise.
    pub fn is_satisfied(&self, values: &FormValues, scopes: &[ArrayScope]) -> bool {
        let actual = values.get(&path::resolve_reference(&self.field, scopes));
        match &self.value {
            Some(expected) => actual == Some(expected),
            None => is_truthy(actual),
        }
    }
}

impl LeafKind {
    pub fn is_boolean(&self) -> bool {
        matches!(self, LeafKind::Checkbox | LeafKind::Switch)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            LeafKind::Number | LeafKind::Integer | LeafKind::Slider { .. }
        )
    }

    /// Date-like kinds go through default normalization.
    pub fn is_date_like(&self) -> bool {
        matches!(self, LeafKind::Date | LeafKind::DateRange)
    }

    /// Value of a freshly created field with no declared default.
    pub fn zero_value(&self) -> JsonValue {
        match self {
            LeafKind::Checkbox | LeafKind::Switch => JsonValue::Bool(false),
            LeafKind::Number | LeafKind::Integer => JsonValue::from(0),
            LeafKind::Slider { min, .. } => number_value(*min),
            LeafKind::MultiSelect { .. } => JsonValue::Array(Vec::new()),
            LeafKind::Text
            | LeafKind::Password
            | LeafKind::TextArea
            | LeafKind::Select { .. }
            | LeafKind::Date
            | LeafKind::DateRange
            | LeafKind::Hidden => JsonValue::String(String::new()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            LeafKind::Text => "text",
            LeafKind::Password => "password",
            LeafKind::TextArea => "textarea",
            LeafKind::Number => "number",
            LeafKind::Integer => "integer",
            LeafKind::Slider { .. } => "slider",
            LeafKind::Checkbox => "checkbox",
            LeafKind::Switch => "switch",
            LeafKind::Select { .. } => "select",
            LeafKind::MultiSelect { .. } => "multiselect",
            LeafKind::Date => "date",
            LeafKind::DateRange => "date_range",
            LeafKind::Hidden => "hidden",
        }
    }
}

/// Integral floats become JSON integers so `0` compares equal to `0`.
pub fn number_value(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        JsonValue::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

impl LeafField {
    pub fn new(name: impl Into<String>, kind: LeafKind) -> Self {
        let name = name.into();
        Self {
            label: humanize(&name),
            name,
            kind,
            required: false,
            default: None,
            depends_on: None,
            constraints: Constraints::default(),
            help: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: JsonValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn depends_on(mut self, field: impl Into<String>, value: Option<JsonValue>) -> Self {
        self.depends_on = Some(DependsOn {
            field: field.into(),
            value,
        });
        self
    }

    /// Declared default, else the kind's zero value.
    pub fn initial_value(&self) -> JsonValue {
        self.default.clone().unwrap_or_else(|| self.kind.zero_value())
    }
}

impl FieldArrayField {
    pub fn new(name: impl Into<String>, item_fields: Vec<FieldDescriptor>) -> Self {
        let name = name.into();
        Self {
            label: humanize(&name),
            name,
            item_fields,
            min: 0,
            max: usize::MAX,
            item_defaults: None,
        }
    }

    pub fn bounds(mut self, min: usize, max: usize) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn item_factory(
        mut self,
        f: impl Fn() -> Map<String, JsonValue> + Send + Sync + 'static,
    ) -> Self {
        self.item_defaults = Some(ItemDefaults::Factory(Arc::new(f)));
        self
    }

    /// Whether zero values can be inferred from the item's own leaves.
    pub fn can_infer_defaults(&self) -> bool {
        self.item_fields.iter().any(FieldDescriptor::binds_values)
    }
}

impl FieldDescriptor {
    pub fn leaf(field: LeafField) -> Self {
        FieldDescriptor::Leaf(field)
    }

    pub fn conditional(condition: Condition, field: FieldDescriptor) -> Self {
        FieldDescriptor::Conditional(ConditionalField {
            name: field.name().to_string(),
            condition,
            field: Box::new(field),
            always_registered: false,
        })
    }

    pub fn always_registered(condition: Condition, array: FieldArrayField) -> Self {
        FieldDescriptor::Conditional(ConditionalField {
            name: array.name.clone(),
            condition,
            field: Box::new(FieldDescriptor::FieldArray(array)),
            always_registered: true,
        })
    }

    pub fn section(
        name: impl Into<String>,
        condition: Condition,
        fields: Vec<FieldDescriptor>,
    ) -> Self {
        FieldDescriptor::DynamicSection(DynamicSection {
            name: name.into(),
            condition,
            fields,
            title: None,
            description: None,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            FieldDescriptor::Leaf(l) => &l.name,
            FieldDescriptor::Conditional(c) => &c.name,
            FieldDescriptor::FieldArray(a) => &a.name,
            FieldDescriptor::DynamicSection(s) => &s.name,
            FieldDescriptor::Content(c) => &c.name,
            FieldDescriptor::Unsupported(u) => &u.name,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldDescriptor::Leaf(_) => "leaf",
            FieldDescriptor::Conditional(_) => "conditional",
            FieldDescriptor::FieldArray(_) => "field_array",
            FieldDescriptor::DynamicSection(_) => "dynamic_section",
            FieldDescriptor::Content(_) => "content",
            FieldDescriptor::Unsupported(_) => "unsupported",
        }
    }

    /// True when this subtree owns at least one value in the store.
    pub fn binds_values(&self) -> bool {
        match self {
            FieldDescriptor::Leaf(_) | FieldDescriptor::FieldArray(_) => true,
            FieldDescriptor::Conditional(c) => c.field.binds_values(),
            FieldDescriptor::DynamicSection(s) => s.fields.iter().any(Self::binds_values),
            FieldDescriptor::Content(_) | FieldDescriptor::Unsupported(_) => false,
        }
    }
}

/// What a canonical path is bound to.
#[derive(Clone, Copy, Debug)]
pub enum Binding<'a> {
    Leaf(&'a LeafField),
    Array(&'a FieldArrayField),
}

/// Find the leaf or array a path addresses. Conditionals and sections add
/// no path segment and are looked through.
pub fn binding_at<'a>(fields: &'a [FieldDescriptor], path: &str) -> Option<Binding<'a>> {
    let segs: Vec<&str> = path::segments(path).collect();
    let mut scope = fields;
    let mut i = 0;
    while i < segs.len() {
        match find_named(scope, segs[i])? {
            FieldDescriptor::Leaf(l) => {
                return (i + 1 == segs.len()).then_some(Binding::Leaf(l));
            }
            FieldDescriptor::FieldArray(a) => {
                if i + 1 == segs.len() {
                    return Some(Binding::Array(a));
                }
                segs[i + 1].parse::<usize>().ok()?;
                scope = &a.item_fields;
                i += 2;
            }
            _ => return None,
        }
    }
    None
}

fn find_named<'a>(fields: &'a [FieldDescriptor], name: &str) -> Option<&'a FieldDescriptor> {
    for f in fields {
        let hit = match f {
            FieldDescriptor::Leaf(l) if l.name == name => Some(f),
            FieldDescriptor::FieldArray(a) if a.name == name => Some(f),
            FieldDescriptor::Conditional(c) => find_named(std::slice::from_ref(&*c.field), name),
            FieldDescriptor::DynamicSection(s) => find_named(&s.fields, name),
            _ => None,
        };
        if hit.is_some() {
            return hit;
        }
    }
    None
}

/// `slot_type` / `slotType` → `Slot type`.
pub fn humanize(name: &str) -> String {
    let mut out = String::new();
    for (i, ch) in name.chars().enumerate() {
        if ch == '_' || ch == '-' {
            out.push(' ');
        } else if ch.is_uppercase() && i > 0 {
            out.push(' ');
            out.extend(ch.to_lowercase());
        } else if i == 0 {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────

/// Parse a list of descriptor trees.
pub fn parse_fields(items: &[JsonValue], at: &str, diags: &mut Diagnostics) -> Vec<FieldDescriptor> {
    items
        .iter()
        .enumerate()
        .map(|(i, v)| parse_field(v, &format!("{at}[{i}]"), diags))
        .collect()
}

/// Parse one descriptor tree. Malformed input yields `Unsupported`.
pub fn parse_field(v: &JsonValue, at: &str, diags: &mut Diagnostics) -> FieldDescriptor {
    let name = str_field(v, "name").unwrap_or_default();
    let location = if name.is_empty() {
        at.to_string()
    } else {
        format!("{at}:{name}")
    };
    match parse_field_inner(v, &name, &location, diags) {
        Ok(d) => d,
        Err(reason) => {
            diags.report(location, reason.clone());
            FieldDescriptor::Unsupported(UnsupportedField { name, reason })
        }
    }
}

fn parse_field_inner(
    v: &JsonValue,
    name: &str,
    at: &str,
    diags: &mut Diagnostics,
) -> Result<FieldDescriptor, String> {
    if !v.is_object() {
        return Err("descriptor must be a mapping".into());
    }
    let kind = match str_field(v, "kind") {
        Some(k) => k,
        None if v.get("type").is_some() => "leaf".to_string(),
        None => return Err("descriptor has neither 'kind' nor 'type'".into()),
    };
    match kind.as_str() {
        "leaf" | "field" | "input" => parse_leaf(v, name).map(FieldDescriptor::Leaf),
        "conditional" => {
            let inner = v
                .get("field")
                .ok_or_else(|| "conditional needs a 'field'".to_string())?;
            let field = parse_field(inner, &format!("{at}.field"), diags);
            let condition = parse_condition(
                v.get("when")
                    .or_else(|| v.get("condition"))
                    .ok_or_else(|| "conditional needs a 'when' condition".to_string())?,
            )?;
            let always_registered = bool_field(v, &["always_registered", "alwaysRegistered"]);
            if always_registered && !matches!(field, FieldDescriptor::FieldArray(_)) {
                diags.report(at, "always_registered only applies to field arrays; ignored");
            }
            Ok(FieldDescriptor::Conditional(ConditionalField {
                name: if name.is_empty() {
                    field.name().to_string()
                } else {
                    name.to_string()
                },
                condition,
                field: Box::new(field),
                always_registered,
            }))
        }
        "field_array" | "fieldArray" | "array" => {
            require_name(name)?;
            let item_fields = match v.get("fields").or_else(|| v.get("itemFields")) {
                Some(JsonValue::Array(items)) => parse_fields(items, &format!("{at}.fields"), diags),
                Some(_) => return Err("'fields' must be a list".into()),
                None => Vec::new(),
            };
            let min = usize_field(v, &["min", "min_items"]).unwrap_or(0);
            let max = usize_field(v, &["max", "max_items"]).unwrap_or(usize::MAX);
            if min > max {
                return Err(format!("min ({min}) exceeds max ({max})"));
            }
            let item_defaults = match v.get("default_item").or_else(|| v.get("defaultItem")) {
                Some(JsonValue::Object(obj)) => Some(ItemDefaults::Template(obj.clone())),
                Some(_) => return Err("'default_item' must be a mapping".into()),
                None => None,
            };
            let arr = FieldArrayField {
                label: str_field(v, "label").unwrap_or_else(|| humanize(name)),
                name: name.to_string(),
                item_fields,
                min,
                max,
                item_defaults,
            };
            if arr.item_defaults.is_none() && !arr.can_infer_defaults() {
                return Err("item defaults cannot be inferred; provide 'default_item'".into());
            }
            Ok(FieldDescriptor::FieldArray(arr))
        }
        "dynamic_section" | "dynamicSection" | "section" => {
            let fields = match v.get("fields") {
                Some(JsonValue::Array(items)) => parse_fields(items, &format!("{at}.fields"), diags),
                _ => return Err("section needs a 'fields' list".into()),
            };
            let condition = match v.get("when").or_else(|| v.get("condition")) {
                Some(c) => parse_condition(c)?,
                None => Condition::Always,
            };
            Ok(FieldDescriptor::DynamicSection(DynamicSection {
                name: name.to_string(),
                condition,
                fields,
                title: str_field(v, "title"),
                description: str_field(v, "description"),
            }))
        }
        "content" => Ok(FieldDescriptor::Content(ContentBlock {
            name: name.to_string(),
            text: str_field(v, "text")
                .or_else(|| str_field(v, "content"))
                .unwrap_or_default(),
        })),
        other => Err(format!("unknown descriptor kind '{other}'")),
    }
}

fn parse_leaf(v: &JsonValue, name: &str) -> Result<LeafField, String> {
    require_name(name)?;
    let ty = str_field(v, "type").unwrap_or_else(|| "text".into());
    let options = parse_options(v.get("options"));
    let kind = match ty.to_ascii_lowercase().as_str() {
        "text" | "string" | "email" | "url" => LeafKind::Text,
        "password" => LeafKind::Password,
        "textarea" => LeafKind::TextArea,
        "number" | "float" => LeafKind::Number,
        "integer" | "int" => LeafKind::Integer,
        "slider" | "range" => LeafKind::Slider {
            min: num_field(v, "min").unwrap_or(0.0),
            max: num_field(v, "max").unwrap_or(100.0),
            step: num_field(v, "step").unwrap_or(1.0),
        },
        "checkbox" | "boolean" | "bool" => LeafKind::Checkbox,
        "switch" | "toggle" => LeafKind::Switch,
        "select" | "radio" | "combobox" => LeafKind::Select { options },
        "multiselect" | "multi_select" | "checkbox_group" => LeafKind::MultiSelect { options },
        "date" | "datepicker" => LeafKind::Date,
        "date_range" | "daterange" => LeafKind::DateRange,
        "hidden" => LeafKind::Hidden,
        other => return Err(format!("unknown field type '{other}'")),
    };
    let depends_on = match v.get("depends_on").or_else(|| v.get("dependsOn")) {
        Some(JsonValue::String(field)) => Some(DependsOn {
            field: field.clone(),
            value: v
                .get("depends_on_value")
                .or_else(|| v.get("dependsOnValue"))
                .cloned(),
        }),
        Some(obj @ JsonValue::Object(_)) => Some(DependsOn {
            field: str_field(obj, "field").ok_or_else(|| "depends_on needs a 'field'".to_string())?,
            value: obj.get("value").cloned(),
        }),
        Some(_) => return Err("'depends_on' must be a field name or mapping".into()),
        None => None,
    };
    let constraints = Constraints {
        min_length: usize_field(v, &["min_length", "minLength"]),
        max_length: usize_field(v, &["max_length", "maxLength"]),
        pattern: str_field(v, "pattern"),
        minimum: num_field(v, "minimum").or_else(|| match kind {
            LeafKind::Number | LeafKind::Integer => num_field(v, "min"),
            _ => None,
        }),
        maximum: num_field(v, "maximum").or_else(|| match kind {
            LeafKind::Number | LeafKind::Integer => num_field(v, "max"),
            _ => None,
        }),
        min_items: usize_field(v, &["min_items", "minItems"]),
        max_items: usize_field(v, &["max_items", "maxItems"]),
    };
    Ok(LeafField {
        label: str_field(v, "label").unwrap_or_else(|| humanize(name)),
        name: name.to_string(),
        kind,
        required: bool_field(v, &["required"]),
        default: v.get("default").cloned(),
        depends_on,
        constraints,
        help: str_field(v, "help").or_else(|| str_field(v, "description")),
    })
}

/// Parse a declarative condition.
///
/// Accepted shapes: `true`/`false`, `{field, equals}`, `{field, not_equals}`,
/// `{field, in: [..]}`, `{field, truthy|falsy: true}`, `{field}` (truthy),
/// `{all: [..]}`, `{any: [..]}`, `{not: ..}`.
pub fn parse_condition(v: &JsonValue) -> Result<Condition, String> {
    match v {
        JsonValue::Bool(true) => return Ok(Condition::Always),
        JsonValue::Bool(false) => return Ok(Condition::Never),
        JsonValue::Object(_) => {}
        _ => return Err("condition must be a boolean or mapping".into()),
    }
    let list = |key: &str| -> Result<Option<Vec<Condition>>, String> {
        match v.get(key) {
            Some(JsonValue::Array(items)) => items.iter().map(parse_condition).collect::<Result<Vec<_>, _>>().map(Some),
            Some(_) => Err(format!("'{key}' must be a list of conditions")),
            None => Ok(None),
        }
    };
    if let Some(cs) = list("all")? {
        return Ok(Condition::All(cs));
    }
    if let Some(cs) = list("any")? {
        return Ok(Condition::Any(cs));
    }
    if let Some(inner) = v.get("not") {
        return Ok(Condition::Not(Box::new(parse_condition(inner)?)));
    }
    let field = str_field(v, "field").ok_or_else(|| "condition needs a 'field'".to_string())?;
    if let Some(value) = v.get("equals").or_else(|| v.get("eq")) {
        return Ok(Condition::Equals {
            field,
            value: value.clone(),
        });
    }
    if let Some(value) = v.get("not_equals").or_else(|| v.get("ne")) {
        return Ok(Condition::NotEquals {
            field,
            value: value.clone(),
        });
    }
    if let Some(values) = v.get("in") {
        let values = values
            .as_array()
            .cloned()
            .ok_or_else(|| "'in' must be a list".to_string())?;
        return Ok(Condition::OneOf { field, values });
    }
    if bool_field(v, &["falsy"]) {
        return Ok(Condition::Falsy { field });
    }
    Ok(Condition::Truthy { field })
}

fn parse_options(v: Option<&JsonValue>) -> Vec<SelectOption> {
    let Some(JsonValue::Array(items)) = v else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|it| match it {
            JsonValue::Object(_) => {
                let value = it.get("value").cloned()?;
                let label = str_field(it, "label").unwrap_or_else(|| display_value(&value));
                Some(SelectOption { label, value })
            }
            JsonValue::Null => None,
            other => Some(SelectOption {
                label: display_value(other),
                value: other.clone(),
            }),
        })
        .collect()
}

/// Plain rendering of a value for labels and previews.
pub fn display_value(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn require_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("missing 'name'".into());
    }
    if name.contains(path::SEPARATOR) {
        return Err(format!("name '{name}' must not contain '{}'", path::SEPARATOR));
    }
    Ok(())
}

fn str_field(v: &JsonValue, key: &str) -> Option<String> {
    v.get(key).and_then(|s| s.as_str()).map(|s| s.to_string())
}

fn num_field(v: &JsonValue, key: &str) -> Option<f64> {
    v.get(key).and_then(|n| n.as_f64())
}

fn usize_field(v: &JsonValue, keys: &[&str]) -> Option<usize> {
    keys.iter()
        .find_map(|k| v.get(*k).and_then(|n| n.as_u64()))
        .map(|n| n as usize)
}

fn bool_field(v: &JsonValue, keys: &[&str]) -> bool {
    keys.iter()
        .find_map(|k| v.get(*k).and_then(|b| b.as_bool()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: JsonValue) -> (FieldDescriptor, Diagnostics) {
        let mut d = Diagnostics::new();
        let f = parse_field(&v, "fields[0]", &mut d);
        (f, d)
    }

    #[test]
    fn parses_leaf_with_depends_on_value() {
        let (f, d) = parse(json!({
            "name": "slotName", "type": "text",
            "depends_on": "slotType", "depends_on_value": "STATIC"
        }));
        assert!(d.is_empty());
        match f {
            FieldDescriptor::Leaf(l) => {
                assert_eq!(l.label, "Slot name");
                let dep = l.depends_on.unwrap();
                assert_eq!(dep.field, "slotType");
                assert_eq!(dep.value, Some(json!("STATIC")));
            }
            other => panic!("expected leaf, got {other:?}"),
        }
    }

    #[test]
    fn parses_always_registered_array() {
        let (f, d) = parse(json!({
            "kind": "conditional",
            "when": {"field": "hasItems", "equals": true},
            "always_registered": true,
            "field": {
                "kind": "field_array", "name": "items", "min": 1, "max": 3,
                "fields": [{"name": "title", "type": "text"}]
            }
        }));
        assert!(d.is_empty());
        match f {
            FieldDescriptor::Conditional(c) => {
                assert!(c.always_registered);
                assert_eq!(c.name, "items");
                match *c.field {
                    FieldDescriptor::FieldArray(a) => {
                        assert_eq!((a.min, a.max), (1, 3));
                        assert_eq!(a.item_fields.len(), 1);
                    }
                    other => panic!("expected array, got {other:?}"),
                }
            }
            other => panic!("expected conditional, got {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_contained() {
        let (f, d) = parse(json!({"kind": "grid", "name": "g"}));
        assert!(matches!(f, FieldDescriptor::Unsupported(_)));
        assert_eq!(d.len(), 1);
        assert!(d.entries()[0].message.contains("grid"));
    }

    #[test]
    fn array_without_inferable_defaults_is_rejected() {
        let (f, d) = parse(json!({
            "kind": "field_array", "name": "notes",
            "fields": [{"kind": "content", "name": "hint", "text": "..."}]
        }));
        assert!(matches!(f, FieldDescriptor::Unsupported(_)));
        assert!(d.entries()[0].message.contains("default_item"));

        let (f, d) = parse(json!({
            "kind": "field_array", "name": "notes",
            "default_item": {"body": "x"},
            "fields": [{"kind": "content", "name": "hint", "text": "..."}]
        }));
        assert!(matches!(f, FieldDescriptor::FieldArray(_)));
        assert!(d.is_empty());
    }

    #[test]
    fn bad_child_does_not_poison_parent() {
        let (f, d) = parse(json!({
            "kind": "section", "name": "extra",
            "fields": [{"name": "ok", "type": "text"}, {"name": "bad", "type": "hologram"}]
        }));
        match f {
            FieldDescriptor::DynamicSection(s) => {
                assert!(matches!(s.fields[0], FieldDescriptor::Leaf(_)));
                assert!(matches!(s.fields[1], FieldDescriptor::Unsupported(_)));
            }
            other => panic!("expected section, got {other:?}"),
        }
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn condition_shapes() {
        let values: FormValues = [
            ("mode".to_string(), json!("pro")),
            ("count".to_string(), json!(3)),
        ]
        .into_iter()
        .collect();
        let c = parse_condition(&json!({"all": [
            {"field": "mode", "in": ["pro", "team"]},
            {"not": {"field": "count", "equals": 0}},
            {"field": "count"}
        ]}))
        .unwrap();
        assert!(c.evaluate(&values, &[]));
        let c = parse_condition(&json!({"field": "missing", "falsy": true})).unwrap();
        assert!(c.evaluate(&values, &[]));
        assert!(parse_condition(&json!("yes")).is_err());
    }

    #[test]
    fn custom_condition_reads_item_relative_values() {
        let values: FormValues = [("items.1.qty".to_string(), json!(5))].into_iter().collect();
        let c = Condition::custom(|ctx| {
            ctx.value("qty").and_then(|v| v.as_i64()).unwrap_or(0) > 2
        });
        assert!(c.evaluate(&values, &[ArrayScope::new("items", 1)]));
        assert!(!c.evaluate(&values, &[ArrayScope::new("items", 0)]));
    }

    #[test]
    fn zero_values_follow_kind() {
        assert_eq!(LeafKind::Checkbox.zero_value(), json!(false));
        assert_eq!(LeafKind::Integer.zero_value(), json!(0));
        assert_eq!(
            LeafKind::Slider { min: 5.0, max: 10.0, step: 1.0 }.zero_value(),
            json!(5)
        );
        assert_eq!(LeafKind::Text.zero_value(), json!(""));
        assert_eq!(LeafKind::MultiSelect { options: vec![] }.zero_value(), json!([]));
    }

    #[test]
    fn options_accept_strings_and_pairs() {
        let (f, _) = parse(json!({
            "name": "slotType", "type": "select",
            "options": ["STATIC", {"label": "Dynamic", "value": "DYNAMIC"}]
        }));
        let FieldDescriptor::Leaf(l) = f else { panic!() };
        let LeafKind::Select { options } = l.kind else { panic!() };
        assert_eq!(options[0].label, "STATIC");
        assert_eq!(options[1].value, json!("DYNAMIC"));
    }
}
