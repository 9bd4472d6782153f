use crate::args::InstanceArgs;
use crate::cmd_up::load_config;
use anyhow::Result;
use daemon_fixture::DaemonProcess;

pub(crate) fn cmd_args(instance: InstanceArgs) -> Result<()> {
    let config = load_config(&instance)?;
    let binary = config.daemon_binary.clone();
    let daemon = DaemonProcess::new(config)?.with_mode(instance.mode);

    let argv = daemon.daemon_args(&instance.daemon_args);
    println!("{} {}", binary.display(), argv.join(" "));
    Ok(())
}
