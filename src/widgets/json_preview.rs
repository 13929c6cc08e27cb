use crate::theme::Theme;
use crate::widgets::chrome::panel_block;
use crossterm::event::KeyCode;
use dynaform::services::loader::{load_shared, Pending};
use dynaform::FormMsg;
use ratatui::prelude::*;
use ratatui::widgets::{Paragraph, Wrap};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use syntect::easy::HighlightLines;
use syntect::highlighting::{FontStyle, Style as SynStyle, ThemeSet};
use syntect::parsing::SyntaxSet;

const HIGHLIGHTER_ID: &str = "syntect:json";

/// Syntax definitions are slow to build; load once per process, off-thread.
pub struct Highlighter {
    syntaxes: SyntaxSet,
    theme: syntect::highlighting::Theme,
}

impl Highlighter {
    fn load() -> Result<Self, String> {
        let syntaxes = SyntaxSet::load_defaults_newlines();
        let ts = ThemeSet::load_defaults();
        let theme = ts
            .themes
            .get("base16-ocean.dark")
            .or_else(|| ts.themes.values().next())
            .cloned()
            .ok_or_else(|| "no syntect themes available".to_string())?;
        Ok(Self { syntaxes, theme })
    }

    fn highlight(&self, text: &str) -> Vec<Line<'static>> {
        let syn = self
            .syntaxes
            .find_syntax_by_extension("json")
            .unwrap_or_else(|| self.syntaxes.find_syntax_plain_text());
        let mut high = HighlightLines::new(syn, &self.theme);
        let mut out = Vec::new();
        for line in text.split('\n') {
            let regions: Vec<(SynStyle, &str)> =
                high.highlight_line(line, &self.syntaxes).unwrap_or_default();
            let spans: Vec<Span<'static>> = regions
                .into_iter()
                .map(|(st, seg)| {
                    let fg = st.foreground;
                    let mut style = Style::default().fg(Color::Rgb(fg.r, fg.g, fg.b));
                    if st.font_style.contains(FontStyle::BOLD) {
                        style = style.add_modifier(Modifier::BOLD);
                    }
                    if st.font_style.contains(FontStyle::ITALIC) {
                        style = style.add_modifier(Modifier::ITALIC);
                    }
                    Span::styled(seg.to_string(), style)
                })
                .collect();
            out.push(Line::from(spans));
        }
        out
    }
}

pub struct JsonPreview {
    title: String,
    source: String,
    lines: Vec<Line<'static>>,
    highlighter: Option<Arc<Highlighter>>,
    pending: Option<Pending<Highlighter>>,
    scroll_y: u16,
    last_viewport_h: u16,
}

impl JsonPreview {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source: String::new(),
            lines: Vec::new(),
            highlighter: None,
            pending: Some(load_shared(HIGHLIGHTER_ID, Highlighter::load)),
            scroll_y: 0,
            last_viewport_h: 0,
        }
    }

    pub fn text(&self) -> &str {
        &self.source
    }

    /// Re-highlights only when the pretty-printed text changed.
    pub fn set_value(&mut self, value: &JsonValue) {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        if text != self.source {
            self.source = text;
            self.rebuild();
        }
    }

    fn poll_highlighter(&mut self) {
        let Some(p) = &self.pending else { return };
        match p.try_take() {
            Some(Ok(h)) => {
                self.highlighter = Some(h);
                self.pending = None;
                self.rebuild();
            }
            Some(Err(e)) => {
                tracing::warn!("syntax highlighting unavailable: {e}");
                self.pending = None;
            }
            None => {}
        }
    }

    fn rebuild(&mut self) {
        self.lines = match &self.highlighter {
            Some(h) => h.highlight(&self.source),
            None => self
                .source
                .lines()
                .map(|l| Line::from(l.to_string()))
                .collect(),
        };
    }
}

impl crate::widgets::Widget for JsonPreview {
    fn render(&mut self, f: &mut Frame, area: Rect, focused: bool, theme: &Theme) {
        self.poll_highlighter();
        self.last_viewport_h = area.height.saturating_sub(2);
        let max_scroll = (self.lines.len() as u16).saturating_sub(self.last_viewport_h);
        self.scroll_y = self.scroll_y.min(max_scroll);
        let p = Paragraph::new(self.lines.clone())
            .block(panel_block(&self.title, focused, theme))
            .wrap(Wrap { trim: false })
            .scroll((self.scroll_y, 0));
        f.render_widget(p, area);
    }

    fn on_key(&mut self, key: KeyCode) -> Vec<FormMsg> {
        match key {
            KeyCode::Up | KeyCode::Char('k') => self.scroll_y = self.scroll_y.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => self.scroll_y = self.scroll_y.saturating_add(1),
            KeyCode::PageUp => self.scroll_y = self.scroll_y.saturating_sub(self.last_viewport_h),
            KeyCode::PageDown => self.scroll_y = self.scroll_y.saturating_add(self.last_viewport_h),
            KeyCode::Home => self.scroll_y = 0,
            KeyCode::End => self.scroll_y = u16::MAX,
            _ => {}
        }
        Vec::new()
    }
}
