use crate::input;
use crate::model::{
    Channel, ExitOutcome, InitialPosition, ProcessEvent, SimulationParameters, INIT_NUM_BPHS_MAX,
    MAP_SIZE_MAX, MAP_SIZE_MIN,
};
use crate::orchestrator::UiCommand;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::collections::VecDeque;
use std::time::Instant;

/// Input fields of the panel, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldId {
    MapSize,
    FlowerWidth,
    InitNumBphs,
    InitPosition,
    EnergyTransfer,
    InitPrEliminate,
    Seed,
}

impl FieldId {
    pub const ALL: [FieldId; 7] = [
        FieldId::MapSize,
        FieldId::FlowerWidth,
        FieldId::InitNumBphs,
        FieldId::InitPosition,
        FieldId::EnergyTransfer,
        FieldId::InitPrEliminate,
        FieldId::Seed,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FieldId::MapSize => "Map size",
            FieldId::FlowerWidth => "Flower width",
            FieldId::InitNumBphs => "Initial number of BPHs",
            FieldId::InitPosition => "Initial position",
            FieldId::EnergyTransfer => "Energy transfer",
            FieldId::InitPrEliminate => "Elimination probability",
            FieldId::Seed => "Seed",
        }
    }

    fn is_decimal(self) -> bool {
        matches!(self, FieldId::EnergyTransfer | FieldId::InitPrEliminate)
    }
}

/// Read-only output pane holding the tail of one channel.
pub struct TextPane {
    lines: VecDeque<String>,
    max_lines: usize,
    // Lines scrolled up from the tail; 0 follows new output.
    scroll_back: usize,
    pending_cr: bool,
    bytes: usize,
}

impl TextPane {
    pub fn new(max_lines: usize) -> Self {
        let mut lines = VecDeque::new();
        lines.push_back(String::new());
        Self {
            lines,
            max_lines: max_lines.max(1),
            scroll_back: 0,
            pending_cr: false,
            bytes: 0,
        }
    }

    /// Append a decoded chunk. A bare '\r' rewrites the current line.
    pub fn append(&mut self, text: &str) {
        self.bytes += text.len();
        let before = self.line_count();
        for c in text.chars() {
            if self.pending_cr {
                self.pending_cr = false;
                if c != '\n' {
                    self.current_line().clear();
                }
            }
            match c {
                '\n' => self.lines.push_back(String::new()),
                '\r' => self.pending_cr = true,
                c => self.current_line().push(c),
            }
        }
        let added = self.line_count().saturating_sub(before);
        while self.line_count() > self.max_lines {
            self.lines.pop_front();
        }
        if self.scroll_back > 0 {
            self.scroll_back = (self.scroll_back + added).min(self.max_scroll());
        }
    }

    fn current_line(&mut self) -> &mut String {
        if self.lines.is_empty() {
            self.lines.push_back(String::new());
        }
        let last = self.lines.len() - 1;
        &mut self.lines[last]
    }

    pub fn clear(&mut self) {
        *self = TextPane::new(self.max_lines);
    }

    pub fn line_count(&self) -> usize {
        // The trailing empty line after a final '\n' is not content.
        match self.lines.back() {
            Some(last) if last.is_empty() => self.lines.len() - 1,
            _ => self.lines.len(),
        }
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn is_following(&self) -> bool {
        self.scroll_back == 0
    }

    fn max_scroll(&self) -> usize {
        self.line_count().saturating_sub(1)
    }

    pub fn scroll_up(&mut self, n: usize) {
        self.scroll_back = (self.scroll_back + n).min(self.max_scroll());
    }

    pub fn scroll_down(&mut self, n: usize) {
        self.scroll_back = self.scroll_back.saturating_sub(n);
    }

    pub fn scroll_to_top(&mut self) {
        self.scroll_back = self.max_scroll();
    }

    pub fn follow(&mut self) {
        self.scroll_back = 0;
    }

    /// The lines to show in a viewport `height` rows tall.
    pub fn visible(&self, height: usize) -> impl Iterator<Item = &str> {
        let count = self.line_count();
        let end = count - self.scroll_back.min(count);
        let start = end.saturating_sub(height);
        self.lines.range(start..end).map(String::as_str)
    }

    pub fn contents(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// What the UI loop should do after a key press.
#[derive(Debug)]
pub enum PanelAction {
    None,
    Command(UiCommand),
    Copy(String),
    Quit,
}

pub struct PanelState {
    pub focus: usize,
    pub map_size: String,
    pub flower_width: String,
    pub init_num_bphs: String,
    pub init_position: InitialPosition,
    pub energy_transfer: String,
    pub init_pr_eliminate: String,
    pub seed: String,

    pub run_enabled: bool,
    pub stop_enabled: bool,
    pub status: String,
    pub show_help: bool,
    pub selected_pane: Channel,

    pub stdout: TextPane,
    pub stderr: TextPane,

    pub pid: Option<u32>,
    pub command_line: Option<String>,
    pub started_at: Option<Instant>,
    pub started_clock: Option<String>,
    pub last_outcome: Option<ExitOutcome>,
}

/// Local wall-clock time for the status line, UTC when the offset is unknown.
fn clock_now() -> String {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    now.format(time::macros::format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default()
}

impl PanelState {
    pub fn new(defaults: &SimulationParameters, max_pane_lines: usize) -> Self {
        Self {
            focus: 0,
            map_size: defaults.map_size.to_string(),
            flower_width: defaults.flower_width.to_string(),
            init_num_bphs: defaults.init_num_bphs.to_string(),
            init_position: defaults.init_position,
            energy_transfer: crate::model::format_decimal(defaults.energy_transfer),
            init_pr_eliminate: crate::model::format_decimal(defaults.init_pr_eliminate),
            seed: defaults.seed.to_string(),
            run_enabled: true,
            stop_enabled: true,
            status: "Ready".into(),
            show_help: false,
            selected_pane: Channel::Stdout,
            stdout: TextPane::new(max_pane_lines),
            stderr: TextPane::new(max_pane_lines),
            pid: None,
            command_line: None,
            started_at: None,
            started_clock: None,
            last_outcome: None,
        }
    }

    pub fn focused(&self) -> FieldId {
        FieldId::ALL[self.focus % FieldId::ALL.len()]
    }

    /// Text of a numeric field; `None` for the choice field.
    pub fn field_text(&self, id: FieldId) -> Option<&str> {
        let text = match id {
            FieldId::MapSize => &self.map_size,
            FieldId::FlowerWidth => &self.flower_width,
            FieldId::InitNumBphs => &self.init_num_bphs,
            FieldId::EnergyTransfer => &self.energy_transfer,
            FieldId::InitPrEliminate => &self.init_pr_eliminate,
            FieldId::Seed => &self.seed,
            FieldId::InitPosition => return None,
        };
        Some(text.as_str())
    }

    fn field_text_mut(&mut self, id: FieldId) -> Option<&mut String> {
        match id {
            FieldId::MapSize => Some(&mut self.map_size),
            FieldId::FlowerWidth => Some(&mut self.flower_width),
            FieldId::InitNumBphs => Some(&mut self.init_num_bphs),
            FieldId::EnergyTransfer => Some(&mut self.energy_transfer),
            FieldId::InitPrEliminate => Some(&mut self.init_pr_eliminate),
            FieldId::Seed => Some(&mut self.seed),
            FieldId::InitPosition => None,
        }
    }

    pub fn pane(&self, channel: Channel) -> &TextPane {
        match channel {
            Channel::Stdout => &self.stdout,
            Channel::Stderr => &self.stderr,
        }
    }

    fn selected_pane_mut(&mut self) -> &mut TextPane {
        match self.selected_pane {
            Channel::Stdout => &mut self.stdout,
            Channel::Stderr => &mut self.stderr,
        }
    }

    /// Type a character into the focused field. Characters the field does not
    /// accept are dropped.
    fn type_char(&mut self, c: char) {
        let id = self.focused();
        if let Some(text) = self.field_text_mut(id) {
            text.push(c);
            *text = if id.is_decimal() {
                input::filter_decimal(text)
            } else {
                input::filter_integer(text)
            };
        }
    }

    fn backspace(&mut self) {
        let id = self.focused();
        if let Some(text) = self.field_text_mut(id) {
            text.pop();
        }
    }

    /// Read the fields into validated parameters.
    pub fn parameters(&self) -> anyhow::Result<SimulationParameters> {
        let map_size = input::parse_bounded(
            FieldId::MapSize.label(),
            &self.map_size,
            MAP_SIZE_MIN,
            MAP_SIZE_MAX,
        )?;
        let flower_width =
            input::parse_bounded(FieldId::FlowerWidth.label(), &self.flower_width, 0, u32::MAX)?;
        let init_num_bphs = input::parse_bounded(
            FieldId::InitNumBphs.label(),
            &self.init_num_bphs,
            0,
            INIT_NUM_BPHS_MAX,
        )?;
        let params = SimulationParameters {
            map_size,
            flower_width,
            energy_transfer: input::parse_decimal(
                FieldId::EnergyTransfer.label(),
                &self.energy_transfer,
            )?,
            init_num_bphs,
            init_pr_eliminate: input::parse_decimal(
                FieldId::InitPrEliminate.label(),
                &self.init_pr_eliminate,
            )?,
            init_position: self.init_position,
            seed: input::parse_integer(FieldId::Seed.label(), &self.seed)?,
        };
        params.validate()?;
        Ok(params)
    }

    fn request_run(&mut self) -> PanelAction {
        if !self.run_enabled {
            self.status = "A simulation is already running.".into();
            return PanelAction::None;
        }
        match self.parameters() {
            Ok(params) => {
                self.status = "Please wait, starting simulation".into();
                PanelAction::Command(UiCommand::Run(params))
            }
            Err(e) => {
                self.status = format!("{e:#}");
                PanelAction::None
            }
        }
    }

    fn request_stop(&mut self) -> PanelAction {
        if !self.stop_enabled {
            return PanelAction::None;
        }
        if self.pid.is_some() {
            self.status = "Stopping simulation...".into();
        }
        PanelAction::Command(UiCommand::Stop)
    }

    pub fn handle_key(&mut self, k: KeyEvent) -> PanelAction {
        if self.show_help {
            match k.code {
                KeyCode::Char('q') => return PanelAction::Quit,
                KeyCode::Char('c') if k.modifiers.contains(KeyModifiers::CONTROL) => {
                    return PanelAction::Quit
                }
                _ => {
                    self.show_help = false;
                    return PanelAction::None;
                }
            }
        }

        match (k.modifiers, k.code) {
            (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                PanelAction::Quit
            }
            (_, KeyCode::Enter) | (_, KeyCode::Char('r')) => self.request_run(),
            (_, KeyCode::Char('s')) => self.request_stop(),
            (_, KeyCode::Char('c')) => {
                self.stdout.clear();
                self.stderr.clear();
                self.status = "Cleared output".into();
                PanelAction::None
            }
            (_, KeyCode::Char('o')) => {
                self.selected_pane = match self.selected_pane {
                    Channel::Stdout => Channel::Stderr,
                    Channel::Stderr => Channel::Stdout,
                };
                PanelAction::None
            }
            (_, KeyCode::Char('y')) => PanelAction::Copy(self.pane(self.selected_pane).contents()),
            (_, KeyCode::Char('?')) => {
                self.show_help = true;
                PanelAction::None
            }
            (_, KeyCode::Tab) | (_, KeyCode::Down) => {
                self.focus = (self.focus + 1) % FieldId::ALL.len();
                PanelAction::None
            }
            (_, KeyCode::BackTab) | (_, KeyCode::Up) => {
                self.focus = (self.focus + FieldId::ALL.len() - 1) % FieldId::ALL.len();
                PanelAction::None
            }
            (_, KeyCode::Left) => {
                if self.focused() == FieldId::InitPosition {
                    self.init_position = self.init_position.prev();
                }
                PanelAction::None
            }
            (_, KeyCode::Right) => {
                if self.focused() == FieldId::InitPosition {
                    self.init_position = self.init_position.next();
                }
                PanelAction::None
            }
            (_, KeyCode::PageUp) => {
                self.selected_pane_mut().scroll_up(10);
                PanelAction::None
            }
            (_, KeyCode::PageDown) => {
                self.selected_pane_mut().scroll_down(10);
                PanelAction::None
            }
            (_, KeyCode::Home) => {
                self.selected_pane_mut().scroll_to_top();
                PanelAction::None
            }
            (_, KeyCode::End) => {
                self.selected_pane_mut().follow();
                PanelAction::None
            }
            (_, KeyCode::Backspace) => {
                self.backspace();
                PanelAction::None
            }
            (_, KeyCode::Char(c)) => {
                self.type_char(c);
                PanelAction::None
            }
            _ => PanelAction::None,
        }
    }

    pub fn apply_event(&mut self, ev: ProcessEvent) {
        match ev {
            ProcessEvent::Started { pid, argv } => {
                self.run_enabled = false;
                self.stop_enabled = true;
                self.status = "Running simulation...".into();
                self.pid = pid;
                self.command_line = Some(crate::cli::shell_join(&argv));
                self.started_at = Some(Instant::now());
                self.started_clock = Some(clock_now());
                self.last_outcome = None;
            }
            ProcessEvent::Stdout(text) => self.stdout.append(&text),
            ProcessEvent::Stderr(text) => self.stderr.append(&text),
            ProcessEvent::Finished { outcome, elapsed } => {
                self.run_enabled = true;
                self.stop_enabled = true;
                self.status = match &outcome {
                    ExitOutcome::LaunchFailed { .. } => {
                        format!("Simulation stopped. ({})", outcome.to_message())
                    }
                    _ => format!(
                        "Simulation stopped. ({}, ran {})",
                        outcome.to_message(),
                        crate::text_summary::format_elapsed(elapsed)
                    ),
                };
                self.pid = None;
                self.started_at = None;
                self.last_outcome = Some(outcome);
            }
            ProcessEvent::Info(msg) => self.status = msg,
        }
    }
}
