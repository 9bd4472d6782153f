use crate::args::InstanceArgs;
use anyhow::{Context, Result};
use daemon_fixture::{clienv, DaemonProcess, FixtureConfig};
use tracing::{info, warn};

/// Resolve the fixture config: explicit file, then $DAEMON_FIXTURE_CONFIG,
/// then defaults, with the environment overlaid last.
pub(crate) fn load_config(instance: &InstanceArgs) -> Result<FixtureConfig> {
    let base = match instance.config.clone().or_else(clienv::config_path) {
        Some(path) => FixtureConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => FixtureConfig::default(),
    };
    Ok(base.apply_env(clienv::env_opt))
}

pub(crate) async fn cmd_up(instance: InstanceArgs, busybox: bool) -> Result<()> {
    let config = load_config(&instance)?;
    let mut daemon = DaemonProcess::new(config)?.with_mode(instance.mode);

    let started = if busybox {
        daemon.start_with_busybox(&instance.daemon_args).await
    } else {
        daemon.start(&instance.daemon_args).await
    };
    if let Err(e) = started {
        if let Err(kill_err) = daemon.kill().await {
            warn!("[{}] cleanup after failed start: {}", daemon.id(), kill_err);
        }
        return Err(e).context("Failed to start daemon");
    }

    println!("id:     {}", daemon.id());
    println!("host:   {}", daemon.sock());
    println!("root:   {}", daemon.root().display());
    if let Some(log) = daemon.log_file_name() {
        println!("log:    {}", log.display());
    }
    println!();
    println!("Running (Ctrl+C to stop)");

    let mut exit = daemon
        .exit_watch()
        .context("Daemon handle missing after start")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("[{}] interrupted, stopping daemon", daemon.id());
        }
        outcome = exit.wait() => {
            warn!("[{}] daemon exited on its own ({})", daemon.id(), outcome);
        }
    }

    let outcome = daemon.stop().await.context("Failed to stop daemon")?;
    println!("Daemon stopped ({})", outcome);
    Ok(())
}
