use crate::theme::Theme;
use crate::widgets::form::FormView;
use crate::widgets::json_preview::JsonPreview;
use crate::widgets::status_bar::{draw_help, draw_status, Toast};
use crate::widgets::Widget;
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use dynaform::model::{discover_form_config, validate_form_config};
use dynaform::services::{CommandTransport, RulesValidator};
use dynaform::{FormInstance, FormMsg, FormRuntime, SubmissionState};
use ratatui::prelude::*;
use ratatui::widgets::Block;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

const TICK_RATE: Duration = Duration::from_millis(200);
// Ticks a toast stays up
const TOAST_TICKS: u64 = 15;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Focus {
    Form,
    Preview,
}

pub struct AppState {
    pub runtime: FormRuntime,
    pub view: FormView,
    pub preview: JsonPreview,
    pub focus: Focus,
    pub theme: Theme,
    pub toast: Option<Toast>,
    pub tick: u64,
    pub config_path: PathBuf,
    pub quit: bool,
}

impl AppState {
    fn form(&self) -> &FormInstance {
        self.runtime.form()
    }

    /// Pull finished work into the form and refresh derived panes.
    fn pump(&mut self) {
        self.runtime.pump();
        self.runtime.tick();
        for notice in self.runtime.take_notices() {
            self.toast = Some(Toast {
                notice,
                expires_at_tick: self.tick + TOAST_TICKS,
            });
        }
        if let Some(t) = &self.toast {
            if self.tick >= t.expires_at_tick {
                self.toast = None;
            }
        }
        let shown = match self.runtime.form().submission() {
            SubmissionState::Success { data, response } if !response.is_null() => {
                serde_json::json!({ "submitted": data, "response": response })
            }
            _ => self.runtime.form().payload(),
        };
        self.preview.set_value(&shown);
    }

    fn dispatch_all(&mut self, msgs: Vec<FormMsg>) {
        for m in msgs {
            self.runtime.dispatch(m);
        }
    }

    fn copy_payload(&mut self) {
        let text = self.preview.text().to_string();
        if let Ok(mut clipboard) = arboard::Clipboard::new() {
            let _ = clipboard.set_text(&text);
        }
    }

    fn on_key(&mut self, key: event::KeyEvent) {
        if self.view.is_editing() {
            let msgs = self.view.on_key(self.runtime.form(), key);
            self.dispatch_all(msgs);
            return;
        }
        match key.code {
            KeyCode::Char('q') => self.quit = true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.quit = true
            }
            KeyCode::Tab | KeyCode::BackTab => {
                self.focus = match self.focus {
                    Focus::Form => Focus::Preview,
                    Focus::Preview => Focus::Form,
                }
            }
            KeyCode::Char('s') => self.runtime.dispatch(FormMsg::Submit),
            KeyCode::Char('r') => self.runtime.dispatch(FormMsg::Reset),
            KeyCode::Char('y') => self.copy_payload(),
            _ => {
                let msgs = match self.focus {
                    Focus::Form => self.view.on_key(self.runtime.form(), key),
                    Focus::Preview => self.preview.on_key(key.code),
                };
                self.dispatch_all(msgs);
            }
        }
    }
}

/// Build the preview state from the discovered form file.
pub fn load_state() -> Result<AppState> {
    let (path, cfg) = discover_form_config().context("no form definition found")?;
    validate_form_config(&cfg).with_context(|| format!("invalid form {}", path.display()))?;
    let definition = Arc::new(cfg.build());
    for d in definition.diagnostics.entries() {
        tracing::warn!(path = %d.path, "{}", d.message);
    }
    let form = FormInstance::new(Arc::clone(&definition));
    let mut runtime = FormRuntime::new(form, Arc::new(RulesValidator));
    if let Some(cmd) = &definition.submit_cmd {
        runtime = runtime.with_transport(Arc::new(CommandTransport::new(cmd.clone())));
    }
    tracing::info!(path = %path.display(), "form preview ready");
    Ok(AppState {
        runtime,
        view: FormView::new(),
        preview: JsonPreview::new(" Payload "),
        focus: Focus::Form,
        theme: Theme::from_env(),
        toast: None,
        tick: 0,
        config_path: path,
        quit: false,
    })
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        .unwrap_or(false)
}

pub fn run() -> Result<()> {
    let mut state = load_state()?;
    if env_flag("DYNAFORM_HEADLESS") {
        return run_headless(&mut state);
    }
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let res = event_loop(&mut terminal, &mut state);
    // Restore
    disable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    res
}

fn event_loop<B: Backend>(terminal: &mut Terminal<B>, state: &mut AppState) -> Result<()> {
    let mut last_tick = Instant::now();
    while !state.quit {
        state.pump();
        terminal.draw(|f| ui(f, state))?;
        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    state.on_key(key);
                }
            }
        }
        if last_tick.elapsed() >= TICK_RATE {
            state.tick = state.tick.wrapping_add(1);
            last_tick = Instant::now();
        }
    }
    Ok(())
}

/// Smoke mode: render into a test backend for a number of ticks, optionally
/// submit, and print a JSON summary.
fn run_headless(state: &mut AppState) -> Result<()> {
    let ticks: u64 = std::env::var("DYNAFORM_TICKS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(10);
    let backend = ratatui::backend::TestBackend::new(100, 30);
    let mut terminal = Terminal::new(backend)?;
    if env_flag("DYNAFORM_HEADLESS_SUBMIT") {
        state.runtime.dispatch(FormMsg::Submit);
    }
    for _ in 0..ticks {
        state.pump();
        terminal.draw(|f| ui(f, state))?;
        state.tick = state.tick.wrapping_add(1);
        std::thread::sleep(TICK_RATE.min(Duration::from_millis(50)));
    }
    state.runtime.wait_settled(Duration::from_secs(5));
    state.pump();
    if env_flag("DYNAFORM_SMOKE_SUMMARY") {
        let form = state.form();
        let (ok, error) = match form.submission() {
            SubmissionState::Error { message, .. } => (false, Some(message.clone())),
            _ => (true, None),
        };
        let summary = serde_json::json!({
            "ok": ok,
            "error": error,
            "config": state.config_path.display().to_string(),
            "state": form.submission().label(),
            "dirty": form.is_dirty(),
            "visible_fields": form.resolved().visible().count(),
            "field_errors": form.field_errors(),
            "diagnostics": form.diagnostics().len(),
            "payload": form.payload(),
        });
        println!("{summary}");
    }
    Ok(())
}

fn ui(f: &mut Frame, state: &mut AppState) {
    let screen = f.area();
    f.render_widget(Block::default().style(state.theme.base_style()), screen);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(if state.form().definition().description.is_some() { 1 } else { 0 }),
            Constraint::Min(3),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(screen);
    if let Some(desc) = &state.form().definition().description {
        f.render_widget(
            ratatui::widgets::Paragraph::new(format!(" {desc}")).style(state.theme.text_muted()),
            rows[0],
        );
    }
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(rows[1]);

    let AppState {
        runtime,
        view,
        preview,
        focus,
        theme,
        toast,
        tick,
        ..
    } = state;
    view.render(f, cols[0], runtime.form(), *focus == Focus::Form, theme);
    preview.render(f, cols[1], *focus == Focus::Preview, theme);
    draw_status(f, rows[2], runtime.form(), toast.as_ref(), *tick, theme);
    draw_help(f, rows[3], view.is_editing(), theme);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEvent;
    use dynaform::form_core::{FieldDescriptor, LeafField, LeafKind};
    use dynaform::FormDefinition;
    use serde_json::json;

    fn state_for(def: FormDefinition) -> AppState {
        let form = FormInstance::new(Arc::new(def));
        AppState {
            runtime: FormRuntime::new(form, Arc::new(RulesValidator)),
            view: FormView::new(),
            preview: JsonPreview::new(" Payload "),
            focus: Focus::Form,
            theme: Theme::default(),
            toast: None,
            tick: 0,
            config_path: PathBuf::from("form.yaml"),
            quit: false,
        }
    }

    fn press(state: &mut AppState, code: KeyCode) {
        state.on_key(KeyEvent::new(code, KeyModifiers::NONE));
    }

    #[test]
    fn typing_into_a_text_field_updates_payload() {
        let def = FormDefinition::new(
            "t",
            vec![FieldDescriptor::leaf(LeafField::new("name", LeafKind::Text))],
        );
        let mut state = state_for(def);
        press(&mut state, KeyCode::Enter);
        assert!(state.view.is_editing());
        for c in "ada".chars() {
            press(&mut state, KeyCode::Char(c));
        }
        press(&mut state, KeyCode::Enter);
        assert!(!state.view.is_editing());
        assert_eq!(state.form().payload(), json!({"name": "ada"}));
    }

    #[test]
    fn quit_is_ignored_while_editing() {
        let def = FormDefinition::new(
            "t",
            vec![FieldDescriptor::leaf(LeafField::new("name", LeafKind::Text))],
        );
        let mut state = state_for(def);
        press(&mut state, KeyCode::Enter);
        press(&mut state, KeyCode::Char('q'));
        assert!(!state.quit);
        press(&mut state, KeyCode::Esc);
        press(&mut state, KeyCode::Char('q'));
        assert!(state.quit);
        assert_eq!(state.form().payload(), json!({"name": ""}));
    }

    #[test]
    fn renders_into_test_backend() {
        let def = FormDefinition::new(
            "Preview",
            vec![FieldDescriptor::leaf(
                LeafField::new("agree", LeafKind::Checkbox).required(),
            )],
        );
        let mut state = state_for(def);
        press(&mut state, KeyCode::Char(' '));
        state.pump();
        let mut terminal = Terminal::new(ratatui::backend::TestBackend::new(80, 20)).unwrap();
        terminal.draw(|f| ui(f, &mut state)).unwrap();
        let buf = terminal.backend().buffer();
        let text: String = buf.content().iter().map(|c| c.symbol()).collect();
        assert!(text.contains("Preview"));
        assert!(text.contains("[x]"));
    }
}
