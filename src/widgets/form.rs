//! Renders a resolved form and turns key presses into `FormMsg`s.

use crate::theme::Theme;
use crate::widgets::chrome::panel_block;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use dynaform::form_core::descriptor::{display_value, number_value, SelectOption};
use dynaform::form_core::{path, LeafField, LeafKind, NodeKind, ResolvedNode};
use dynaform::{FormInstance, FormMsg};
use ratatui::crossterm::event as rt_event;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use serde_json::{json, Value as JsonValue};
use tui_textarea::TextArea;

struct FieldEditor {
    path: String,
    label: String,
    kind: LeafKind,
    options: Vec<SelectOption>,
    ta: TextArea<'static>,
}

impl FieldEditor {
    fn multiline(&self) -> bool {
        matches!(self.kind, LeafKind::TextArea)
    }
}

#[derive(Default)]
pub struct FormView {
    /// Index into the selectable rows, not into the node list.
    selected: usize,
    editor: Option<FieldEditor>,
    // Reselect this path once the next resolution lands
    follow: Option<String>,
}

impl FormView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_editing(&self) -> bool {
        self.editor.is_some()
    }

    pub fn on_key(&mut self, form: &FormInstance, key: KeyEvent) -> Vec<FormMsg> {
        if self.editor.is_some() {
            return self.on_editor_key(key);
        }
        let rows = selectable_rows(form);
        if rows.is_empty() {
            return Vec::new();
        }
        self.selected = self.selected.min(rows.len() - 1);
        let idx = rows[self.selected];
        let node = &form.resolved().nodes[idx];
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
                Vec::new()
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.selected = (self.selected + 1).min(rows.len() - 1);
                Vec::new()
            }
            KeyCode::Enter => match &node.kind {
                NodeKind::Field(leaf) => self.activate(form, node, leaf),
                NodeKind::Array { .. } => vec![FormMsg::Append {
                    array: node.path.clone(),
                    item: None,
                }],
                _ => Vec::new(),
            },
            KeyCode::Char(' ') => match &node.kind {
                NodeKind::Field(leaf) if leaf.kind.is_boolean() => vec![FormMsg::Toggle {
                    path: node.path.clone(),
                }],
                NodeKind::Field(LeafField {
                    kind: LeafKind::Select { .. },
                    ..
                }) => vec![FormMsg::CycleOption {
                    path: node.path.clone(),
                    forward: true,
                }],
                _ => Vec::new(),
            },
            KeyCode::Left | KeyCode::Right => {
                let forward = key.code == KeyCode::Right;
                match &node.kind {
                    NodeKind::Field(LeafField {
                        kind: LeafKind::Select { .. },
                        ..
                    }) => vec![FormMsg::CycleOption {
                        path: node.path.clone(),
                        forward,
                    }],
                    NodeKind::Field(LeafField {
                        kind: LeafKind::Slider { min, max, step },
                        ..
                    }) => {
                        let cur = form
                            .value(&node.path)
                            .and_then(|v| v.as_f64())
                            .unwrap_or(*min);
                        let delta = if forward { *step } else { -*step };
                        let next = (cur + delta).clamp(*min, *max);
                        vec![FormMsg::SetValue {
                            path: node.path.clone(),
                            value: number_value(next),
                        }]
                    }
                    _ => Vec::new(),
                }
            }
            KeyCode::Char('a') => match enclosing_array(form, idx) {
                Some((array, _)) => vec![FormMsg::Append { array, item: None }],
                None => Vec::new(),
            },
            KeyCode::Char('d') => match enclosing_array(form, idx) {
                Some((array, Some(index))) => vec![FormMsg::Remove { array, index }],
                _ => Vec::new(),
            },
            KeyCode::Char('K') | KeyCode::Char('J') => match enclosing_array(form, idx) {
                Some((array, Some(from))) => {
                    let to = if key.code == KeyCode::Char('K') {
                        match from.checked_sub(1) {
                            Some(t) => t,
                            None => return Vec::new(),
                        }
                    } else {
                        from + 1
                    };
                    self.follow = Some(path::item_path(&array, to));
                    vec![FormMsg::Move { array, from, to }]
                }
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    fn activate(&mut self, form: &FormInstance, node: &ResolvedNode, leaf: &LeafField) -> Vec<FormMsg> {
        match &leaf.kind {
            k if k.is_boolean() => vec![FormMsg::Toggle {
                path: node.path.clone(),
            }],
            LeafKind::Select { .. } => vec![FormMsg::CycleOption {
                path: node.path.clone(),
                forward: true,
            }],
            LeafKind::Hidden => Vec::new(),
            kind => {
                let current = form.value(&node.path).cloned().unwrap_or(JsonValue::Null);
                let options = match kind {
                    LeafKind::MultiSelect { options } => options.clone(),
                    _ => Vec::new(),
                };
                let text = edit_text(kind, &current, &options);
                let mut ta = TextArea::default();
                ta.insert_str(&text);
                self.editor = Some(FieldEditor {
                    path: node.path.clone(),
                    label: node.label.clone(),
                    kind: kind.clone(),
                    options,
                    ta,
                });
                Vec::new()
            }
        }
    }

    fn on_editor_key(&mut self, key: KeyEvent) -> Vec<FormMsg> {
        let Some(ed) = self.editor.as_mut() else {
            return Vec::new();
        };
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let commit = match key.code {
            KeyCode::Esc => {
                self.editor = None;
                return Vec::new();
            }
            KeyCode::Char('s') if ctrl => true,
            KeyCode::Enter if !ed.multiline() => true,
            _ => false,
        };
        if commit {
            let text = ed.ta.lines().join("\n");
            let value = parse_input(&ed.kind, &text, &ed.options);
            let path = ed.path.clone();
            self.editor = None;
            return vec![FormMsg::SetValue { path, value }];
        }
        if let Some(k) = to_textarea_key(key) {
            let _ = ed.ta.input(k);
        }
        Vec::new()
    }

    pub fn render(
        &mut self,
        f: &mut Frame,
        area: Rect,
        form: &FormInstance,
        focused: bool,
        theme: &Theme,
    ) {
        let rows = selectable_rows(form);
        if let Some(p) = self.follow.take() {
            if let Some(pos) = rows.iter().position(|&i| form.resolved().nodes[i].path == p) {
                self.selected = pos;
            }
        }
        self.selected = self.selected.min(rows.len().saturating_sub(1));
        let current = rows.get(self.selected).copied();

        let mut lines: Vec<Line> = Vec::new();
        let mut cursor_line = 0usize;
        let mut skip_under: Option<String> = None;
        for (i, node) in form.resolved().nodes.iter().enumerate() {
            if let Some(p) = &skip_under {
                if path::has_prefix(&node.path, p) {
                    continue;
                }
                skip_under = None;
            }
            let is_sel = current == Some(i);
            if is_sel {
                cursor_line = lines.len();
            }
            let indent = "  ".repeat(node.depth);
            let sel = if is_sel { '›' } else { ' ' };
            match &node.kind {
                NodeKind::Field(leaf) => {
                    let req = if leaf.required { " *" } else { "" };
                    let value = form.value(&node.path).cloned().unwrap_or(JsonValue::Null);
                    let value_style = if is_sel {
                        if self.editor.is_some() {
                            theme.text_editing_bold()
                        } else {
                            theme.text_active_bold()
                        }
                    } else {
                        Style::default().fg(theme.fg)
                    };
                    lines.push(Line::from(vec![
                        Span::raw(format!("{indent}{sel} {}{req}: ", node.label)),
                        Span::styled(render_value(&leaf.kind, &value), value_style),
                    ]));
                    if let Some(help) = &leaf.help {
                        lines.push(Line::from(Span::styled(
                            format!("{indent}    {help}"),
                            theme.text_muted(),
                        )));
                    }
                }
                NodeKind::Array { min, max, len } if !node.visible => {
                    // Bound but not presented: its values still submit.
                    lines.push(Line::from(Span::styled(
                        format!("{indent}  ▸ {} (hidden, {len} kept, {min}..{max})", node.label),
                        theme.text_muted(),
                    )));
                    skip_under = Some(node.path.clone());
                }
                NodeKind::Array { min, max, len } => {
                    let bound = if *max == usize::MAX {
                        format!("{len} (min {min})")
                    } else {
                        format!("{len}/{max} (min {min})")
                    };
                    let style = if is_sel {
                        theme.text_active_bold()
                    } else {
                        Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD)
                    };
                    lines.push(Line::from(Span::styled(
                        format!("{indent}{sel} {} [{bound}]", node.label),
                        style,
                    )));
                }
                NodeKind::Item { index, id, .. } => {
                    let style = if is_sel {
                        theme.text_active_bold()
                    } else {
                        theme.text_muted()
                    };
                    lines.push(Line::from(Span::styled(
                        format!("{indent}{sel} #{} ({id})", index + 1),
                        style,
                    )));
                }
                NodeKind::Section { description } => {
                    lines.push(Line::from(Span::styled(
                        format!("{indent}-- {} --", node.label),
                        Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
                    )));
                    if let Some(d) = description {
                        lines.push(Line::from(Span::styled(
                            format!("{indent}   {d}"),
                            theme.text_muted(),
                        )));
                    }
                }
                NodeKind::Content { text } => {
                    for l in text.lines() {
                        lines.push(Line::from(Span::styled(
                            format!("{indent}  {l}"),
                            theme.text_muted(),
                        )));
                    }
                }
            }
            if let Some(err) = &node.error {
                lines.push(Line::from(Span::styled(
                    format!("{indent}    ! {err}"),
                    theme.text_error(),
                )));
            }
        }
        if lines.is_empty() {
            lines.push(Line::from(Span::styled("(no fields)", theme.text_muted())));
        }

        let title = format!(" {} ", form.definition().title);
        let block = panel_block(&title, focused, theme);
        let inner_h = block.inner(area).height as usize;
        let scroll = cursor_line.saturating_sub(inner_h.saturating_sub(2)) as u16;
        let p = Paragraph::new(lines)
            .block(block)
            .scroll((scroll, 0))
            .wrap(Wrap { trim: false });
        f.render_widget(p, area);

        if let Some(ed) = self.editor.as_mut() {
            let hint = if ed.multiline() {
                "Ctrl+S save • Esc cancel"
            } else {
                "Enter save • Esc cancel"
            };
            ed.ta.set_block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(theme.border_focused())
                    .title(format!(" {}: {} ", ed.label, hint)),
            );
            let rect = if ed.multiline() {
                centered_rect(80, 60, area)
            } else {
                centered_rect_h(80, 3, area)
            };
            f.render_widget(Clear, rect);
            f.render_widget(&ed.ta, rect);
        }
    }
}

/// Node indices the cursor can land on.
fn selectable_rows(form: &FormInstance) -> Vec<usize> {
    form.resolved()
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| {
            n.visible
                && matches!(
                    n.kind,
                    NodeKind::Field(_) | NodeKind::Array { .. } | NodeKind::Item { .. }
                )
                && !matches!(
                    n.kind,
                    NodeKind::Field(LeafField {
                        kind: LeafKind::Hidden,
                        ..
                    })
                )
        })
        .map(|(i, _)| i)
        .collect()
}

/// Innermost array the node at `idx` belongs to, with its item index when
/// the node sits inside an item.
fn enclosing_array(form: &FormInstance, idx: usize) -> Option<(String, Option<usize>)> {
    let nodes = &form.resolved().nodes;
    let target = &nodes[idx].path;
    if let NodeKind::Array { .. } = nodes[idx].kind {
        return Some((target.clone(), None));
    }
    nodes[..=idx].iter().rev().find_map(|n| match &n.kind {
        NodeKind::Item {
            array_path, index, ..
        } if path::has_prefix(target, &n.path) => Some((array_path.clone(), Some(*index))),
        _ => None,
    })
}

fn render_value(kind: &LeafKind, value: &JsonValue) -> String {
    match kind {
        LeafKind::Password => "•".repeat(display_value(value).chars().count()),
        k if k.is_boolean() => {
            if value.as_bool().unwrap_or(false) {
                "[x]".into()
            } else {
                "[ ]".into()
            }
        }
        LeafKind::Select { options } => options
            .iter()
            .find(|o| &o.value == value)
            .map(|o| format!("‹ {} ›", o.label))
            .unwrap_or_else(|| "‹ — ›".into()),
        LeafKind::MultiSelect { options } => {
            let picked: Vec<String> = value
                .as_array()
                .map(|a| a.iter().map(|v| option_label(options, v)).collect())
                .unwrap_or_default();
            format!("{{{}}}", picked.join(", "))
        }
        LeafKind::Slider { min, max, .. } => {
            let v = value.as_f64().unwrap_or(*min);
            let width = 20.0;
            let span = (max - min).max(f64::EPSILON);
            let filled = (((v - min) / span) * width).round().clamp(0.0, width) as usize;
            format!(
                "{}{} {}",
                "█".repeat(filled),
                "░".repeat(width as usize - filled),
                display_value(value)
            )
        }
        LeafKind::DateRange => match (value.get("from"), value.get("to")) {
            (Some(a), Some(b)) => format!("{} .. {}", display_value(a), display_value(b)),
            _ => display_value(value),
        },
        LeafKind::TextArea => {
            let s = display_value(value);
            let mut it = s.lines();
            match (it.next(), it.count()) {
                (Some(first), 0) => first.to_string(),
                (Some(first), more) => format!("{first} … (+{more} lines)"),
                (None, _) => String::new(),
            }
        }
        _ => display_value(value),
    }
}

fn option_label(options: &[SelectOption], v: &JsonValue) -> String {
    options
        .iter()
        .find(|o| &o.value == v)
        .map(|o| o.label.clone())
        .unwrap_or_else(|| display_value(v))
}

/// Text the editor starts with.
fn edit_text(kind: &LeafKind, value: &JsonValue, options: &[SelectOption]) -> String {
    match kind {
        LeafKind::MultiSelect { .. } => value
            .as_array()
            .map(|a| {
                a.iter()
                    .map(|v| option_label(options, v))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default(),
        LeafKind::DateRange => match (value.get("from"), value.get("to")) {
            (Some(a), Some(b)) => format!("{}..{}", display_value(a), display_value(b)),
            _ => String::new(),
        },
        _ => display_value(value),
    }
}

/// Editor text back to a value. Input that does not fit the kind is stored
/// as typed so the validator can report it.
pub(crate) fn parse_input(kind: &LeafKind, text: &str, options: &[SelectOption]) -> JsonValue {
    match kind {
        k if k.is_numeric() => {
            let t = text.trim();
            if t.is_empty() {
                JsonValue::Null
            } else if let Ok(i) = t.parse::<i64>() {
                json!(i)
            } else if let Ok(n) = t.parse::<f64>() {
                number_value(n)
            } else {
                JsonValue::String(t.to_string())
            }
        }
        LeafKind::MultiSelect { .. } => JsonValue::Array(
            text.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    options
                        .iter()
                        .find(|o| o.label.eq_ignore_ascii_case(s) || display_value(&o.value) == s)
                        .map(|o| o.value.clone())
                        .unwrap_or_else(|| JsonValue::String(s.to_string()))
                })
                .collect(),
        ),
        LeafKind::DateRange => match text.split_once("..") {
            Some((a, b)) => json!({"from": a.trim(), "to": b.trim()}),
            None if text.trim().is_empty() => JsonValue::Null,
            None => json!({"from": text.trim(), "to": ""}),
        },
        _ => JsonValue::String(text.to_string()),
    }
}

// tui-textarea speaks ratatui's crossterm, which may differ from ours.
fn to_textarea_key(key: KeyEvent) -> Option<rt_event::KeyEvent> {
    let code = match key.code {
        KeyCode::Char(c) => rt_event::KeyCode::Char(c),
        KeyCode::Backspace => rt_event::KeyCode::Backspace,
        KeyCode::Delete => rt_event::KeyCode::Delete,
        KeyCode::Enter => rt_event::KeyCode::Enter,
        KeyCode::Tab => rt_event::KeyCode::Tab,
        KeyCode::Left => rt_event::KeyCode::Left,
        KeyCode::Right => rt_event::KeyCode::Right,
        KeyCode::Up => rt_event::KeyCode::Up,
        KeyCode::Down => rt_event::KeyCode::Down,
        KeyCode::Home => rt_event::KeyCode::Home,
        KeyCode::End => rt_event::KeyCode::End,
        _ => return None,
    };
    let mut mods = rt_event::KeyModifiers::NONE;
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        mods |= rt_event::KeyModifiers::CONTROL;
    }
    if key.modifiers.contains(KeyModifiers::ALT) {
        mods |= rt_event::KeyModifiers::ALT;
    }
    if key.modifiers.contains(KeyModifiers::SHIFT) {
        mods |= rt_event::KeyModifiers::SHIFT;
    }
    Some(rt_event::KeyEvent::new(code, mods))
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let v = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    centered_rect_h(percent_x, v[1].height, v[1])
}

fn centered_rect_h(percent_x: u16, height: u16, area: Rect) -> Rect {
    let h = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(area);
    let height = height.min(area.height);
    let y = area.y + (area.height - height) / 2;
    Rect::new(h[1].x, y, h[1].width, height)
}
