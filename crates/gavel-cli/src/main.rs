use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod session;

use commands::Commands;

#[derive(Parser)]
#[command(name = "gavel", version, about = "Change integration engine: submit, staging and builds")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    cli.command.run()
}
