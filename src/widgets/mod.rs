pub mod chrome;
pub mod form;
pub mod json_preview;
pub mod status_bar;

use crate::theme::Theme;
use crossterm::event::KeyCode;
use dynaform::FormMsg;
use ratatui::prelude::*;

/// A self-contained pane. Keys may produce messages for the form.
pub trait Widget {
    fn render(&mut self, f: &mut Frame, area: Rect, focused: bool, theme: &Theme);
    fn on_key(&mut self, key: KeyCode) -> Vec<FormMsg> {
        let _ = key;
        Vec::new()
    }
}
