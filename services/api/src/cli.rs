use crate::demo::{run_cycle_report, run_demo, CycleArgs, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use crisis_fusion::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Crisis Fusion",
    about = "Fuse hazard signals into zone risk scores and allocate response resources",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service and cycle scheduler (default command)
    Serve(ServeArgs),
    /// Run a single decision cycle from files and print scores and the plan
    Cycle(CycleArgs),
    /// Run the bundled flood scenario end to end
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Zone snapshot CSV; re-read each cycle when it changes. Defaults to the bundled zones.
    #[arg(long)]
    pub(crate) zones: Option<PathBuf>,
    /// Resource snapshot CSV; re-read each cycle when it changes. Defaults to the bundled units.
    #[arg(long)]
    pub(crate) resources: Option<PathBuf>,
    /// Disable the periodic cycle scheduler; cycles then run only via POST /api/v1/cycles
    #[arg(long)]
    pub(crate) no_scheduler: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Cycle(args) => run_cycle_report(args).await,
        Command::Demo(args) => run_demo(args).await,
    }
}
