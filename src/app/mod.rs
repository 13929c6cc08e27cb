//! A live form: values, array identities, resolution and submission, driven
//! one message at a time through [`update`].

pub mod runtime;
pub mod submission;

use crate::error::{ArrayOpError, Error, FieldErrors, Result};
use crate::form_core::defaults::{merge_defaults, normalize_date, normalize_date_range};
use crate::form_core::descriptor::{binding_at, Binding, FieldArrayField, LeafField, LeafKind};
use crate::form_core::values::is_truthy;
use crate::form_core::visibility::resolve;
use crate::form_core::{path, Diagnostics, FieldArrays, FormValues, NodeKind, ResolvedForm};
use crate::model::FormDefinition;
use crate::services::validator::ValidationInput;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Instant;
use submission::{SubmissionMachine, SubmissionState, Ticket};

pub struct FormInstance {
    definition: Arc<FormDefinition>,
    values: FormValues,
    initial: FormValues,
    arrays: FieldArrays,
    resolved: ResolvedForm,
    field_errors: FieldErrors,
    submission: SubmissionMachine,
    in_flight: Option<(Ticket, JsonValue)>,
    diagnostics: Diagnostics,
}

impl FormInstance {
    pub fn new(definition: Arc<FormDefinition>) -> Self {
        let mut form = Self {
            submission: SubmissionMachine::new(definition.auto_reset),
            diagnostics: definition.diagnostics.clone(),
            definition,
            values: FormValues::new(),
            initial: FormValues::new(),
            arrays: FieldArrays::new(),
            resolved: ResolvedForm::default(),
            field_errors: FieldErrors::new(),
            in_flight: None,
        };
        form.seed();
        tracing::debug!(
            title = %form.definition.title,
            values = form.values.len(),
            "form instance created"
        );
        form
    }

    fn seed(&mut self) {
        let def = Arc::clone(&self.definition);
        self.values = merge_defaults(&def.fields, &def.defaults, &mut self.diagnostics);
        self.arrays = FieldArrays::new();
        self.field_errors.clear();
        self.refresh();
        self.initial = self.values.clone();
    }

    /// Re-resolve the tree and re-attach per-field errors.
    fn refresh(&mut self) {
        let def = Arc::clone(&self.definition);
        let mut resolved = resolve(
            &def.fields,
            &mut self.values,
            &mut self.arrays,
            &mut self.diagnostics,
            def.hidden_values,
        );
        for (p, msg) in &self.field_errors {
            if let Some(node) = resolved.find_mut(p) {
                node.error = Some(msg.clone());
            }
        }
        self.resolved = resolved;
    }

    pub fn definition(&self) -> &FormDefinition {
        &self.definition
    }

    pub fn values(&self) -> &FormValues {
        &self.values
    }

    pub fn value(&self, path: &str) -> Option<&JsonValue> {
        self.values.get(path)
    }

    pub fn resolved(&self) -> &ResolvedForm {
        &self.resolved
    }

    pub fn arrays(&self) -> &FieldArrays {
        &self.arrays
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn field_errors(&self) -> &FieldErrors {
        &self.field_errors
    }

    pub fn submission(&self) -> &SubmissionState {
        self.submission.state()
    }

    pub fn is_submitting(&self) -> bool {
        self.submission.is_submitting()
    }

    pub fn is_current_submission(&self, ticket: Ticket) -> bool {
        self.submission.is_current(ticket)
    }

    pub fn is_disposed(&self) -> bool {
        self.submission.is_disposed()
    }

    /// Active values differ from the ones the form started with.
    pub fn is_dirty(&self) -> bool {
        self.resolved.active_values(&self.values) != self.resolved.active_values(&self.initial)
    }

    /// Nested JSON of the active values: what a submission sends.
    pub fn payload(&self) -> JsonValue {
        self.resolved
            .to_payload(&self.resolved.active_values(&self.values))
    }

    pub fn validation_input(&self) -> ValidationInput {
        ValidationInput {
            values: self.resolved.active_values(&self.values),
            nodes: self
                .resolved
                .nodes
                .iter()
                .filter(|n| matches!(n.kind, NodeKind::Field(_) | NodeKind::Array { .. }))
                .cloned()
                .collect(),
        }
    }

    fn leaf_at<'d>(def: &'d FormDefinition, path: &str) -> Result<&'d LeafField> {
        match binding_at(&def.fields, path) {
            Some(Binding::Leaf(l)) => Ok(l),
            _ => Err(Error::config(path, "no field is bound at this path")),
        }
    }

    /// Every item index along `p` must name an existing item; arrays only
    /// grow through `append`.
    fn check_items_exist(&self, p: &str) -> Result<()> {
        let mut prefix = String::new();
        for seg in path::segments(p) {
            if let Ok(index) = seg.parse::<usize>() {
                let len = match self.arrays.get(&prefix) {
                    Some(st) => st.len(),
                    None => {
                        return Err(ArrayOpError::UnknownArray { path: prefix }.into());
                    }
                };
                if index >= len {
                    return Err(ArrayOpError::OutOfRange {
                        path: prefix,
                        index,
                        len,
                    }
                    .into());
                }
            }
            if !prefix.is_empty() {
                prefix.push(path::SEPARATOR);
            }
            prefix.push_str(seg);
        }
        Ok(())
    }

    fn array_at<'d>(def: &'d FormDefinition, path: &str) -> Result<&'d FieldArrayField> {
        match binding_at(&def.fields, path) {
            Some(Binding::Array(a)) => Ok(a),
            _ => Err(ArrayOpError::UnknownArray {
                path: path.to_string(),
            }
            .into()),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Editing
    // ─────────────────────────────────────────────────────────────

    /// Store a value and re-resolve. Dates are canonicalized on the way in;
    /// input that does not parse is kept for the validator to flag.
    pub fn set_value(&mut self, path: &str, value: JsonValue) -> Result<()> {
        let def = Arc::clone(&self.definition);
        let leaf = Self::leaf_at(&def, path)?;
        self.check_items_exist(path)?;
        let value = match leaf.kind {
            LeafKind::Date => normalize_date(&value).unwrap_or(value),
            LeafKind::DateRange => normalize_date_range(&value).unwrap_or(value),
            _ => value,
        };
        self.values.set(path, value);
        self.field_errors.remove(path);
        self.refresh();
        Ok(())
    }

    /// Flip a checkbox or switch.
    pub fn toggle(&mut self, path: &str) -> Result<()> {
        let def = Arc::clone(&self.definition);
        let leaf = Self::leaf_at(&def, path)?;
        if !leaf.kind.is_boolean() {
            return Err(Error::config(path, format!("cannot toggle a {} field", leaf.kind.type_name())));
        }
        let next = !is_truthy(self.values.get(path));
        self.set_value(path, JsonValue::Bool(next))
    }

    /// Step a select to its next (or previous) option, wrapping around.
    pub fn cycle_option(&mut self, path: &str, forward: bool) -> Result<()> {
        let def = Arc::clone(&self.definition);
        let leaf = Self::leaf_at(&def, path)?;
        let LeafKind::Select { options } = &leaf.kind else {
            return Err(Error::config(path, format!("cannot cycle a {} field", leaf.kind.type_name())));
        };
        if options.is_empty() {
            return Err(Error::config(path, "select has no options"));
        }
        let n = options.len();
        let current = self
            .values
            .get(path)
            .and_then(|v| options.iter().position(|o| &o.value == v));
        let next = match (current, forward) {
            (None, true) => 0,
            (None, false) => n - 1,
            (Some(i), true) => (i + 1) % n,
            (Some(i), false) => (i + n - 1) % n,
        };
        self.set_value(path, options[next].value.clone())
    }

    /// Errors under an array no longer line up with positions after a
    /// structural change.
    fn clear_errors_under(&mut self, array_path: &str) {
        self.field_errors.retain(|p, _| !path::has_prefix(p, array_path));
    }

    pub fn append(&mut self, array_path: &str, item: Option<&Map<String, JsonValue>>) -> Result<usize> {
        let def = Arc::clone(&self.definition);
        let array = Self::array_at(&def, array_path)?;
        let index = self.arrays.append(array, array_path, &mut self.values, item)?;
        self.clear_errors_under(array_path);
        self.refresh();
        Ok(index)
    }

    pub fn remove(&mut self, array_path: &str, index: usize) -> Result<()> {
        self.arrays.remove(array_path, index, &mut self.values)?;
        self.clear_errors_under(array_path);
        self.refresh();
        Ok(())
    }

    pub fn move_item(&mut self, array_path: &str, from: usize, to: usize) -> Result<()> {
        self.arrays.move_item(array_path, from, to, &mut self.values)?;
        self.clear_errors_under(array_path);
        self.refresh();
        Ok(())
    }

    /// Back to the merged defaults: fresh array identities, no errors, `Idle`.
    pub fn reset(&mut self) {
        self.submission.reset();
        self.in_flight = None;
        self.seed();
        tracing::debug!(title = %self.definition.title, "form reset");
    }

    // ─────────────────────────────────────────────────────────────
    // Submission
    // ─────────────────────────────────────────────────────────────

    /// Enter `Submitting` and snapshot what the validator should see.
    pub fn begin_submit(&mut self) -> Option<(Ticket, ValidationInput)> {
        let ticket = self.submission.begin()?;
        self.in_flight = None;
        self.field_errors.clear();
        self.refresh();
        Some((ticket, self.validation_input()))
    }

    /// Apply a validator outcome. Returns the payload to transmit when the
    /// values passed and the ticket is still current.
    pub fn finish_validation(
        &mut self,
        ticket: Ticket,
        outcome: std::result::Result<FormValues, FieldErrors>,
    ) -> Option<JsonValue> {
        match outcome {
            Ok(values) => {
                if !self.submission.is_current(ticket) {
                    tracing::debug!(ticket, "validation result for a stale submission");
                    return None;
                }
                let payload = self.resolved.to_payload(&values);
                self.in_flight = Some((ticket, payload.clone()));
                Some(payload)
            }
            Err(errors) => {
                let message = Error::Validation(errors.clone()).user_message();
                if self.submission.fail(ticket, message, errors.clone()) {
                    self.field_errors = errors;
                    self.refresh();
                }
                None
            }
        }
    }

    /// Apply the transport's answer.
    pub fn finish_submission(
        &mut self,
        ticket: Ticket,
        outcome: std::result::Result<JsonValue, String>,
        now: Instant,
    ) -> bool {
        let payload = match self.in_flight.take() {
            Some((t, p)) if t == ticket => p,
            other => {
                self.in_flight = other;
                tracing::debug!(ticket, "transport result for a stale submission");
                return false;
            }
        };
        match outcome {
            Ok(response) => self.submission.succeed(ticket, payload, response, now),
            Err(message) => {
                let message = Error::submission(message).user_message();
                self.submission.fail(ticket, message, FieldErrors::new())
            }
        }
    }

    pub fn tick(&mut self, now: Instant) -> bool {
        self.submission.tick(now)
    }

    pub fn dispose(&mut self) {
        self.in_flight = None;
        self.submission.dispose();
    }
}

// ─────────────────────────────────────────────────────────────────
// Messages and effects
// ─────────────────────────────────────────────────────────────────

pub enum FormMsg {
    SetValue {
        path: String,
        value: JsonValue,
    },
    Toggle {
        path: String,
    },
    CycleOption {
        path: String,
        forward: bool,
    },
    Append {
        array: String,
        item: Option<Map<String, JsonValue>>,
    },
    Remove {
        array: String,
        index: usize,
    },
    Move {
        array: String,
        from: usize,
        to: usize,
    },
    Submit,
    Validated {
        ticket: Ticket,
        outcome: std::result::Result<FormValues, FieldErrors>,
    },
    Transmitted {
        ticket: Ticket,
        outcome: std::result::Result<JsonValue, String>,
    },
    Reset,
    Tick(Instant),
    Dispose,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warn,
    Error,
}

#[allow(clippy::large_enum_variant)]
pub enum Effect {
    Validate {
        ticket: Ticket,
        input: ValidationInput,
    },
    Transmit {
        ticket: Ticket,
        payload: JsonValue,
    },
    Notify {
        text: String,
        level: NoticeLevel,
    },
}

fn notify(err: Error) -> Effect {
    let level = match err {
        Error::ArrayOp(_) => NoticeLevel::Warn,
        _ => NoticeLevel::Error,
    };
    Effect::Notify {
        text: err.to_string(),
        level,
    }
}

pub fn update(form: &mut FormInstance, msg: FormMsg) -> Vec<Effect> {
    use FormMsg::*;
    let mut effects: Vec<Effect> = Vec::new();
    if form.is_disposed() {
        return effects;
    }
    let outcome = match msg {
        SetValue { path, value } => form.set_value(&path, value),
        Toggle { path } => form.toggle(&path),
        CycleOption { path, forward } => form.cycle_option(&path, forward),
        Append { array, item } => form.append(&array, item.as_ref()).map(|_| ()),
        Remove { array, index } => form.remove(&array, index),
        Move { array, from, to } => form.move_item(&array, from, to),
        Submit => {
            if let Some((ticket, input)) = form.begin_submit() {
                effects.push(Effect::Validate { ticket, input });
            }
            Ok(())
        }
        Validated { ticket, outcome } => {
            let current = form.is_current_submission(ticket);
            match form.finish_validation(ticket, outcome) {
                Some(payload) => effects.push(Effect::Transmit { ticket, payload }),
                None if current => {
                    if let SubmissionState::Error { message, .. } = form.submission() {
                        effects.push(Effect::Notify {
                            text: message.clone(),
                            level: NoticeLevel::Warn,
                        });
                    }
                }
                None => {}
            }
            Ok(())
        }
        Transmitted { ticket, outcome } => {
            if form.finish_submission(ticket, outcome, Instant::now()) {
                let (text, level) = match form.submission() {
                    SubmissionState::Success { .. } => ("Submitted".to_string(), NoticeLevel::Info),
                    SubmissionState::Error { message, .. } => (message.clone(), NoticeLevel::Error),
                    other => (other.label().to_string(), NoticeLevel::Info),
                };
                effects.push(Effect::Notify { text, level });
            }
            Ok(())
        }
        Reset => {
            form.reset();
            Ok(())
        }
        Tick(now) => {
            form.tick(now);
            Ok(())
        }
        Dispose => {
            form.dispose();
            Ok(())
        }
    };
    if let Err(e) = outcome {
        tracing::debug!("message refused: {e}");
        effects.push(notify(e));
    }
    effects
}
