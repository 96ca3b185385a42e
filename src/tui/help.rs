use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn keybind(key: &'static str, pad: usize, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(what),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit (stops a running simulation)"),
        ]),
        keybind("r", 11, "Run simulation"),
        keybind("Enter", 7, "Run simulation"),
        keybind("s", 11, "Stop simulation"),
        keybind("c", 11, "Clear output panes"),
        keybind("?", 11, "Show this help"),
        Line::from(""),
        Line::from("Parameters:"),
        keybind("↑/↓", 9, "Previous / next field"),
        keybind("tab", 9, "Next field"),
        keybind("←/→", 9, "Change initial position"),
        keybind("0-9 .", 7, "Edit the focused field"),
        keybind("backspace", 3, "Delete last character"),
        Line::from(""),
        Line::from("Output:"),
        keybind("o", 11, "Switch selected pane (stdout/stderr)"),
        keybind("PgUp/PgDn", 3, "Scroll selected pane"),
        keybind("Home", 8, "Jump to oldest kept line"),
        keybind("End", 9, "Follow new output"),
        keybind("y", 11, "Copy selected pane to clipboard"),
        Line::from(""),
        Line::from(Span::styled(
            "Press any key to close.",
            Style::default().fg(Color::Gray),
        )),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
