mod cli;
mod decode;
mod input;
mod logging;
mod model;
mod orchestrator;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_tui = cfg!(feature = "tui") && !(args.text || args.json || args.print_args);

    if let Some(path) = logging::init(args.log_file.as_deref(), is_tui)? {
        tracing::info!(log_file = %path.display(), "ricebph-panel starting");
    }

    cli::run(args).await
}
