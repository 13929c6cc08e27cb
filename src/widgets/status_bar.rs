use crate::theme::Theme;
use dynaform::{FormInstance, Notice, NoticeLevel, SubmissionState};
use ratatui::prelude::*;
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;

pub struct Toast {
    pub notice: Notice,
    pub expires_at_tick: u64,
}

pub fn draw_status(
    f: &mut Frame,
    area: Rect,
    form: &FormInstance,
    toast: Option<&Toast>,
    tick: u64,
    theme: &Theme,
) {
    let mut spans: Vec<Span> = Vec::new();
    match form.submission() {
        SubmissionState::Idle => spans.push(Span::styled(" idle", theme.text_muted())),
        SubmissionState::Submitting => {
            let spinner = ["⠋", "⠙", "⠸", "⠴", "⠦", "⠇"][tick as usize % 6];
            spans.push(Span::styled(
                format!(" {spinner} submitting"),
                theme.text_active_bold(),
            ));
        }
        SubmissionState::Success { .. } => spans.push(Span::styled(
            " ✓ submitted",
            Style::default()
                .fg(theme.success)
                .add_modifier(Modifier::BOLD),
        )),
        SubmissionState::Error { message, .. } => spans.push(Span::styled(
            format!(" ✗ {message}"),
            theme.text_error(),
        )),
    }
    if form.is_dirty() {
        spans.push(Span::styled("  • modified", theme.text_muted()));
    }
    if !form.diagnostics().is_empty() {
        spans.push(Span::styled(
            format!("  • {} descriptor issue(s)", form.diagnostics().len()),
            Style::default().fg(theme.warn),
        ));
    }
    if let Some(t) = toast {
        spans.push(Span::raw("  |  "));
        let color = theme.notice_color(t.notice.level);
        let tag = match t.notice.level {
            NoticeLevel::Info => "[OK]",
            NoticeLevel::Warn => "[WARN]",
            NoticeLevel::Error => "[ERROR]",
        };
        spans.push(Span::styled(
            format!("{tag} "),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::styled(t.notice.text.clone(), Style::default().fg(color)));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

pub fn draw_help(f: &mut Frame, area: Rect, editing: bool, theme: &Theme) {
    let text = if editing {
        " Enter/Ctrl+S save • Esc cancel"
    } else {
        " ↑↓ move • Enter edit • Space toggle • ←→ cycle • a add • d remove • K/J reorder • s submit • r reset • y copy • Tab focus • q quit"
    };
    f.render_widget(Paragraph::new(text).style(theme.text_muted()), area);
}
