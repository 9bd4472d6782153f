mod args;
mod cmd_args;
mod cmd_up;

use args::{Cli, Commands};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Up { instance, busybox } => cmd_up::cmd_up(instance, busybox).await?,
        Commands::Args { instance } => cmd_args::cmd_args(instance)?,
    }

    Ok(())
}
