use crate::model::{
    ExitOutcome, InitialPosition, LaunchSpec, ProcessEvent, SeedMode, SimulationParameters,
    INIT_NUM_BPHS_MAX, MAP_SIZE_MAX, MAP_SIZE_MIN,
};
use crate::orchestrator::{ProcessController, StartOutcome};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::Write;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::info;

/// Output routing for the stdout/stderr writer.
enum OutputChunk {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputChunk>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputChunk>();
    let handle = tokio::task::spawn_blocking(move || {
        // Locks are taken per chunk: headless logging shares stderr with this thread.
        // Chunks are not line-aligned, so flush each one as it arrives.
        while let Some(chunk) = rx.blocking_recv() {
            match chunk {
                OutputChunk::Stdout(text) => {
                    let mut out = std::io::stdout().lock();
                    let _ = out.write_all(text.as_bytes());
                    let _ = out.flush();
                }
                OutputChunk::Stderr(text) => {
                    let mut err = std::io::stderr().lock();
                    let _ = err.write_all(text.as_bytes());
                    let _ = err.flush();
                }
            }
        }
    });
    (tx, handle)
}

fn parse_non_negative(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if !v.is_finite() || v < 0.0 {
        return Err(format!("expected a non-negative number, got {s}"));
    }
    Ok(v)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "ricebph-panel",
    version,
    about = "Launch the RiceBPH simulation and follow its output, with an optional TUI"
)]
pub struct Cli {
    /// Program that runs the simulation
    #[arg(long, default_value = "julia")]
    pub program: String,

    /// Argument passed to the program before the simulation flags (repeatable)
    #[arg(
        long = "program-arg",
        value_name = "ARG",
        allow_hyphen_values = true,
        default_values = ["--project", "scripts/exploration.jl"]
    )]
    pub program_args: Vec<String>,

    /// Working directory for the simulation process
    #[arg(long)]
    pub workdir: Option<std::path::PathBuf>,

    /// Always pass `--seed 0`, ignoring the seed parameter
    #[arg(long)]
    pub legacy_seed: bool,

    /// How long to keep reading output after the simulation exits
    #[arg(long, default_value = "2s")]
    pub drain_timeout: humantime::Duration,

    /// Map size
    #[arg(long, default_value_t = 125, value_parser = clap::value_parser!(u32).range(MAP_SIZE_MIN as i64..=MAP_SIZE_MAX as i64))]
    pub map_size: u32,

    /// Flower width
    #[arg(long, default_value_t = 0)]
    pub flower_width: u32,

    /// Energy transfer
    #[arg(long, default_value_t = 0.032, value_parser = parse_non_negative)]
    pub energy_transfer: f64,

    /// Initial number of BPHs
    #[arg(long, default_value_t = 200, value_parser = clap::value_parser!(u32).range(0..=INIT_NUM_BPHS_MAX as i64))]
    pub init_num_bphs: u32,

    /// Elimination probability
    #[arg(long, default_value_t = 0.0, value_parser = parse_non_negative)]
    pub init_pr_eliminate: f64,

    /// Initial position of the BPHs
    #[arg(long, value_enum, default_value_t = InitialPosition::Corner)]
    pub init_position: InitialPosition,

    /// Random seed
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Run once, stream the simulation's output and exit (no TUI)
    #[arg(long, conflicts_with = "json")]
    pub text: bool,

    /// Run once, print every event as a JSON line and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print the command line that would be run and exit
    #[arg(long)]
    pub print_args: bool,

    /// Lines kept per output pane in the TUI
    #[arg(long, default_value_t = 5000)]
    pub max_pane_lines: usize,

    /// Log file (TUI default: <cache dir>/ricebph-panel/panel.log)
    #[arg(long)]
    pub log_file: Option<std::path::PathBuf>,
}

pub async fn run(args: Cli) -> Result<()> {
    if args.print_args {
        let launch = build_launch(&args);
        let params = build_params(&args)?;
        println!("{}", shell_join(&launch.command_line(&params)));
        return Ok(());
    }

    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_headless(args, false).await;
        }
    }

    let json = args.json;
    run_headless(args, json).await
}

/// Build the launch description from CLI arguments.
pub fn build_launch(args: &Cli) -> LaunchSpec {
    LaunchSpec {
        program: args.program.clone(),
        program_args: args.program_args.clone(),
        working_dir: args.workdir.clone(),
        seed_mode: if args.legacy_seed {
            SeedMode::LegacyZero
        } else {
            SeedMode::PassThrough
        },
        drain_timeout: Duration::from(args.drain_timeout),
    }
}

/// Build validated simulation parameters from CLI arguments.
pub fn build_params(args: &Cli) -> Result<SimulationParameters> {
    let params = SimulationParameters {
        map_size: args.map_size,
        flower_width: args.flower_width,
        energy_transfer: args.energy_transfer,
        init_num_bphs: args.init_num_bphs,
        init_pr_eliminate: args.init_pr_eliminate,
        init_position: args.init_position,
        seed: args.seed,
    };
    params.validate().context("invalid simulation parameters")?;
    Ok(params)
}

/// Quote arguments containing whitespace or quotes for display.
pub fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|a| {
            if a.is_empty() || a.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
                format!("'{}'", a.replace('\'', r"'\''"))
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run one simulation without the TUI. `json` selects JSON-lines output; otherwise the
/// simulation's channels are passed through to ours.
async fn run_headless(args: Cli, json: bool) -> Result<()> {
    let launch = build_launch(&args);
    let params = build_params(&args)?;
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<ProcessEvent>();

    let mut process = ProcessController::new(launch, evt_tx);
    let run_start = Instant::now();
    if let StartOutcome::Started { pid } = process.start(&params) {
        info!(?pid, "headless run started");
    }

    let mut stdout_bytes = 0usize;
    let mut stderr_bytes = 0usize;
    let mut final_outcome: Option<(ExitOutcome, Duration)> = None;
    let mut interrupted = false;

    while final_outcome.is_none() {
        tokio::select! {
            ev = evt_rx.recv() => {
                let Some(ev) = ev else { break };
                if json {
                    let line = serde_json::to_string(&ev).context("serialize event")?;
                    let _ = out_tx.send(OutputChunk::Stdout(format!("{line}\n")));
                }
                match ev {
                    ProcessEvent::Started { pid, argv } => {
                        if !json {
                            let pid = pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
                            let _ = out_tx.send(OutputChunk::Stderr(format!(
                                "== Started (pid {pid}): {} ==\n",
                                shell_join(&argv)
                            )));
                        }
                    }
                    ProcessEvent::Stdout(text) => {
                        stdout_bytes += text.len();
                        if !json {
                            let _ = out_tx.send(OutputChunk::Stdout(text));
                        }
                    }
                    ProcessEvent::Stderr(text) => {
                        stderr_bytes += text.len();
                        if !json {
                            let _ = out_tx.send(OutputChunk::Stderr(text));
                        }
                    }
                    ProcessEvent::Info(msg) => {
                        if !json {
                            let _ = out_tx.send(OutputChunk::Stderr(format!("{msg}\n")));
                        }
                    }
                    ProcessEvent::Finished { outcome, elapsed } => {
                        final_outcome = Some((outcome, elapsed));
                    }
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if process.kill() {
                    let _ = out_tx.send(OutputChunk::Stderr("Interrupted, killing simulation…\n".into()));
                }
            }
        }
    }

    let (outcome, elapsed) = final_outcome
        .ok_or_else(|| anyhow!("event channel closed before the simulation finished"))?;

    if !json {
        let summary = crate::text_summary::build_text_summary(
            &outcome,
            elapsed,
            run_start.elapsed(),
            stdout_bytes,
            stderr_bytes,
        );
        for line in summary.lines {
            let _ = out_tx.send(OutputChunk::Stderr(format!("{line}\n")));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;

    if outcome.is_success() {
        Ok(())
    } else {
        Err(anyhow!("simulation {}", outcome.to_message()))
    }
}
