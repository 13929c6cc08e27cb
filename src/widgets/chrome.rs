use crate::theme::Theme;
use ratatui::widgets::{Block, Borders};

pub fn panel_block<'a>(title: &'a str, focused: bool, theme: &Theme) -> Block<'a> {
    let b = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .title_style(theme.title_style());
    if focused {
        b.border_style(theme.border_focused())
    } else {
        b.border_style(theme.border_unfocused())
    }
}
