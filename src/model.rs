use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const MAP_SIZE_MIN: u32 = 50;
pub const MAP_SIZE_MAX: u32 = 10_000;
pub const INIT_NUM_BPHS_MAX: u32 = 1_000;

/// Where the initial agents are placed on the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InitialPosition {
    Corner,
    Border,
    Random,
}

impl InitialPosition {
    /// Value passed to the simulation's `--init-position` flag.
    pub fn as_arg(self) -> &'static str {
        match self {
            InitialPosition::Corner => "corner",
            InitialPosition::Border => "border",
            InitialPosition::Random => "random",
        }
    }

    /// Label shown in the panel.
    pub fn label(self) -> &'static str {
        match self {
            InitialPosition::Corner => "Corner",
            InitialPosition::Border => "Border",
            InitialPosition::Random => "Random",
        }
    }

    pub fn next(self) -> Self {
        match self {
            InitialPosition::Corner => InitialPosition::Border,
            InitialPosition::Border => InitialPosition::Random,
            InitialPosition::Random => InitialPosition::Corner,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            InitialPosition::Corner => InitialPosition::Random,
            InitialPosition::Border => InitialPosition::Corner,
            InitialPosition::Random => InitialPosition::Border,
        }
    }
}

impl fmt::Display for InitialPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

/// Parameters for a single simulation run, built fresh for every run request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParameters {
    pub map_size: u32,
    pub flower_width: u32,
    pub energy_transfer: f64,
    pub init_num_bphs: u32,
    pub init_pr_eliminate: f64,
    pub init_position: InitialPosition,
    #[serde(default)]
    pub seed: u64,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            map_size: 125,
            flower_width: 0,
            energy_transfer: 0.032,
            init_num_bphs: 200,
            init_pr_eliminate: 0.0,
            init_position: InitialPosition::Corner,
            seed: 0,
        }
    }
}

impl SimulationParameters {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (MAP_SIZE_MIN..=MAP_SIZE_MAX).contains(&self.map_size),
            "Map size must be between {MAP_SIZE_MIN} and {MAP_SIZE_MAX} (got {})",
            self.map_size
        );
        ensure!(
            self.init_num_bphs <= INIT_NUM_BPHS_MAX,
            "Initial number of BPHs must be at most {INIT_NUM_BPHS_MAX} (got {})",
            self.init_num_bphs
        );
        ensure!(
            self.energy_transfer.is_finite() && self.energy_transfer >= 0.0,
            "Energy transfer must be a non-negative number"
        );
        ensure!(
            self.init_pr_eliminate.is_finite() && self.init_pr_eliminate >= 0.0,
            "Elimination probability must be a non-negative number"
        );
        Ok(())
    }

    /// Flags appended after the simulation entrypoint.
    pub fn to_args(&self, seed_mode: SeedMode) -> Vec<String> {
        let seed = match seed_mode {
            SeedMode::PassThrough => self.seed.to_string(),
            SeedMode::LegacyZero => "0".to_string(),
        };
        vec![
            "--seed".into(),
            seed,
            "--map-size".into(),
            self.map_size.to_string(),
            "--flower-width".into(),
            self.flower_width.to_string(),
            "--energy-transfer".into(),
            format_decimal(self.energy_transfer),
            "--init-num-bphs".into(),
            self.init_num_bphs.to_string(),
            "--init-pr-eliminate".into(),
            format_decimal(self.init_pr_eliminate),
            "--init-position".into(),
            self.init_position.as_arg().into(),
        ]
    }
}

/// Render a decimal for the command line. Whole numbers keep one fractional
/// digit ("0.0"), everything else uses the shortest round-trip form.
pub fn format_decimal(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

/// How the `--seed` flag is filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SeedMode {
    /// Use the seed from the parameters.
    #[default]
    PassThrough,
    /// Always pass "0", whatever seed was entered.
    LegacyZero,
}

/// How the external simulation is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub program: String,
    pub program_args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub seed_mode: SeedMode,
    /// How long to keep reading output after the child exited.
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for LaunchSpec {
    fn default() -> Self {
        Self {
            program: "julia".into(),
            program_args: vec!["--project".into(), "scripts/exploration.jl".into()],
            working_dir: None,
            seed_mode: SeedMode::PassThrough,
            drain_timeout: Duration::from_secs(2),
        }
    }
}

impl LaunchSpec {
    /// Arguments passed to `program`: entrypoint args followed by the simulation flags.
    pub fn args_for(&self, params: &SimulationParameters) -> Vec<String> {
        let mut args = self.program_args.clone();
        args.extend(params.to_args(self.seed_mode));
        args
    }

    /// The full argument vector, program first.
    pub fn command_line(&self, params: &SimulationParameters) -> Vec<String> {
        let mut argv = vec![self.program.clone()];
        argv.extend(self.args_for(params));
        argv
    }
}

/// Output channel of the external process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    pub fn event(self, text: String) -> ProcessEvent {
        match self {
            Channel::Stdout => ProcessEvent::Stdout(text),
            Channel::Stderr => ProcessEvent::Stderr(text),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitOutcome {
    /// The process exited on its own. `code` is absent when a signal ended it.
    Exited { code: Option<i32> },
    /// The process was terminated through `kill()`.
    Killed,
    /// The process never started.
    LaunchFailed { error: String },
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Exited { code: Some(0) })
    }

    pub fn to_message(&self) -> String {
        match self {
            ExitOutcome::Exited { code: Some(code) } => format!("exit code {code}"),
            ExitOutcome::Exited { code: None } => "terminated by signal".to_string(),
            ExitOutcome::Killed => "killed".to_string(),
            ExitOutcome::LaunchFailed { error } => format!("failed to launch: {error}"),
        }
    }
}

/// Notifications published by the process controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProcessEvent {
    Started {
        pid: Option<u32>,
        argv: Vec<String>,
    },
    Stdout(String),
    Stderr(String),
    Finished {
        outcome: ExitOutcome,
        #[serde(with = "humantime_serde")]
        elapsed: Duration,
    },
    Info(String),
}
