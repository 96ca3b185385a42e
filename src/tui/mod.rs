mod clipboard;
mod help;
mod state;

use crate::cli::{build_launch, build_params, Cli};
use crate::model::{Channel, ExitOutcome, ProcessEvent};
use crate::orchestrator::{self, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Terminal,
};
use state::{FieldId, PanelAction, PanelState};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(args: Cli) -> Result<()> {
    let launch = build_launch(&args);
    // Validate up front so a bad default fails before the terminal is taken over.
    build_params(&args)?;

    // Unbounded channels avoid backpressure between the process readers and the UI.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<ProcessEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_args = args.clone();
    let ui_handle = std::thread::spawn(move || run_threaded(ui_args, event_rx, cmd_tx));

    let res = orchestrator::run_controller(launch, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
pub fn run_threaded(
    args: Cli,
    mut event_rx: UnboundedReceiver<ProcessEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    let defaults = build_params(&args)?;
    // PanelState is owned by the UI thread only; no cross-thread mutation.
    let mut state = PanelState::new(&defaults, args.max_pane_lines);

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match state.handle_key(k) {
                    PanelAction::None => {}
                    PanelAction::Command(cmd) => {
                        if cmd_tx.send(cmd).is_err() {
                            break Err(anyhow::anyhow!("process controller stopped"));
                        }
                    }
                    PanelAction::Copy(text) => {
                        state.status = match clipboard::copy_to_clipboard(&text) {
                            Ok(()) => format!(
                                "✓ Copied {} to clipboard ({} bytes)",
                                pane_name(state.selected_pane),
                                text.len()
                            ),
                            Err(e) => format!("Clipboard copy failed: {e:#}"),
                        };
                    }
                    PanelAction::Quit => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn pane_name(channel: Channel) -> &'static str {
    match channel {
        Channel::Stdout => "stdout",
        Channel::Stderr => "stderr",
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &PanelState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(4)].as_ref())
        .split(area);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(44), Constraint::Min(0)].as_ref())
        .split(chunks[0]);

    draw_form(body[0], f, state);
    if state.show_help {
        help::draw_help(body[1], f);
    } else {
        draw_panes(body[1], f, state);
    }
    draw_status(chunks[1], f, state);
}

fn button(label: &str, enabled: bool, color: Color) -> Span<'static> {
    let style = if enabled {
        Style::default().fg(Color::Black).bg(color)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    Span::styled(format!("[ {label} ]"), style)
}

fn draw_form(area: Rect, f: &mut ratatui::Frame, state: &PanelState) {
    let mut lines: Vec<Line> = Vec::new();
    for id in FieldId::ALL {
        let focused = state.focused() == id;
        let label_style = if focused {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        };
        lines.push(Line::from(Span::styled(id.label(), label_style)));

        let value = match state.field_text(id) {
            Some(text) if focused => format!("{text}_"),
            Some(text) => text.to_string(),
            None if focused => format!("< {} >", state.init_position.label()),
            None => state.init_position.label().to_string(),
        };
        let value_style = if focused {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        lines.push(Line::from(vec![
            Span::raw("  "),
            Span::styled(value, value_style),
        ]));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled("Actions", Style::default().fg(Color::Gray))));
    lines.push(Line::from(vec![
        Span::raw("  "),
        button("Run (r)", state.run_enabled, Color::Green),
        Span::raw("  "),
        button("Stop (s)", state.stop_enabled, Color::Red),
    ]));
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "? help  q quit",
        Style::default().fg(Color::DarkGray),
    )));

    let p = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("RiceBPH parameters"),
    );
    f.render_widget(p, area);
}

fn draw_panes(area: Rect, f: &mut ratatui::Frame, state: &PanelState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(area);

    for (rect, channel) in [(cols[0], Channel::Stderr), (cols[1], Channel::Stdout)] {
        let pane = state.pane(channel);
        let height = rect.height.saturating_sub(2) as usize;
        let lines: Vec<Line> = pane
            .visible(height)
            .map(|l| Line::from(l.to_string()))
            .collect();

        let mut title = format!(" {}: {} lines ", pane_name(channel), pane.line_count());
        if !pane.is_following() {
            title.push_str("(scrolled, End to follow) ");
        }
        let border_style = if state.selected_pane == channel {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default()
        };
        let p = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border_style)
                .title(title),
        );
        f.render_widget(p, rect);
    }
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &PanelState) {
    let status_style = match &state.last_outcome {
        Some(outcome) if outcome.is_success() => Style::default().fg(Color::Green),
        Some(ExitOutcome::Killed) => Style::default().fg(Color::Yellow),
        Some(_) => Style::default().fg(Color::Red),
        None => Style::default(),
    };

    let mut lines = vec![Line::from(Span::styled(state.status.clone(), status_style))];

    let mut detail: Vec<Span> = Vec::new();
    if let Some(pid) = state.pid {
        detail.push(Span::styled("pid ", Style::default().fg(Color::Gray)));
        detail.push(Span::raw(format!("{pid}  ")));
    }
    if let (Some(clock), Some(t0)) = (state.started_clock.as_ref(), state.started_at) {
        detail.push(Span::styled("started ", Style::default().fg(Color::Gray)));
        detail.push(Span::raw(format!(
            "{clock} ({} ago)  ",
            crate::text_summary::format_elapsed(Duration::from_secs(t0.elapsed().as_secs()))
        )));
    }
    if let Some(cmd) = state.command_line.as_ref() {
        detail.push(Span::styled("cmd ", Style::default().fg(Color::Gray)));
        detail.push(Span::raw(cmd.clone()));
    }
    lines.push(Line::from(detail));

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(format!(
        "ricebph-panel  stdout {}B  stderr {}B",
        state.stdout.bytes(),
        state.stderr.bytes()
    )));
    f.render_widget(p, area);
}
