use clap::{Args, Parser, Subcommand};
use daemon_fixture::ConnectionMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "daemon-fixture")]
#[command(version)]
#[command(about = "Run sandboxed daemon instances for integration tests", long_about = None)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args)]
pub(crate) struct InstanceArgs {
    /// TOML config file (default: $DAEMON_FIXTURE_CONFIG, then environment only)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// How the fixture connects to the daemon
    #[arg(short, long, value_enum, default_value_t = ConnectionMode::UnixEphemeral)]
    pub mode: ConnectionMode,

    /// Extra daemon arguments, appended last
    #[arg(last = true, allow_hyphen_values = true)]
    pub daemon_args: Vec<String>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start a sandboxed daemon and keep it running until Ctrl+C
    Up {
        #[command(flatten)]
        instance: InstanceArgs,

        /// Import the seed image once the daemon is up
        #[arg(long)]
        busybox: bool,
    },

    /// Print the daemon command line without starting anything
    Args {
        #[command(flatten)]
        instance: InstanceArgs,
    },
}
