use super::argv::{self, DaemonArgs, DEFAULT_DAEMON_COMMAND};
use super::command::CliRunner;
use super::exit::{spawn_exit_watcher, ExitOutcome, ExitWatch};
use super::health::HealthPoller;
use super::seed::{self, SeedSource};
use super::shutdown::{PidSignaller, ShutdownController, Signaller};
use crate::client::{self, ConnectionMode, ConnectionTarget};
use crate::config::FixtureConfig;
use crate::error::{FixtureError, Result};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::process::Command;
use tracing::{debug, info, warn};

const LOG_FILE: &str = "docker.log";
const INFO_PATH: &str = "/info";
const MAX_ID_ATTEMPTS: usize = 16;

#[derive(Deserialize)]
struct DaemonInfo {
    #[serde(rename = "DockerRootDir")]
    root_dir: PathBuf,
}

/// A spawned daemon. Owns the log handle for as long as the process runs.
struct RunningDaemon {
    signaller: Box<dyn Signaller>,
    exit: ExitWatch,
    _log: File,
}

/// One sandboxed daemon instance under test.
///
/// Each instance gets its own folder under the sandbox root holding its
/// socket, pid file, log, exec root and data root. Lifecycle methods take
/// `&mut self`, so a single caller drives the instance at a time.
pub struct DaemonProcess {
    id: String,
    folder: PathBuf,
    root: PathBuf,
    global_flags: Vec<String>,
    cli_flags: Vec<String>,
    command: String,
    mode: ConnectionMode,
    config: FixtureConfig,
    log_path: Option<PathBuf>,
    running: Option<RunningDaemon>,
}

impl DaemonProcess {
    /// Create the instance sandbox. Nothing is started.
    pub fn new(config: FixtureConfig) -> Result<Self> {
        let (id, folder) = create_instance_folder(&config.sandbox_root, new_instance_id)?;
        let root = folder.join("root");
        fs::create_dir_all(&root).map_err(|source| FixtureError::Sandbox {
            path: root.clone(),
            source,
        })?;
        debug!("[{}] created sandbox {}", id, folder.display());

        Ok(Self {
            id,
            folder,
            root,
            global_flags: Vec::new(),
            cli_flags: Vec::new(),
            command: DEFAULT_DAEMON_COMMAND.to_string(),
            mode: ConnectionMode::default(),
            config,
            log_path: None,
            running: None,
        })
    }

    /// Flags placed before the daemon subcommand
    pub fn with_global_flags(mut self, flags: Vec<String>) -> Self {
        self.global_flags = flags;
        self
    }

    /// Flags placed first on every companion CLI invocation
    pub fn with_cli_flags(mut self, flags: Vec<String>) -> Self {
        self.cli_flags = flags;
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_mode(mut self, mode: ConnectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Data root; reflects the daemon's own report once started
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn config(&self) -> &FixtureConfig {
        &self.config
    }

    /// `--host` value addressing this instance
    pub fn sock(&self) -> String {
        argv::host_flag(&self.folder)
    }

    pub fn pid_file(&self) -> PathBuf {
        argv::pid_file(&self.folder)
    }

    /// Path of the log the current or last run wrote to, when the fixture
    /// opened it
    pub fn log_file_name(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.running.as_ref().map(|r| r.signaller.pid())
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.exit.has_exited())
    }

    /// Exit signal of the current run
    pub fn exit_watch(&self) -> Option<ExitWatch> {
        self.running.as_ref().map(|r| r.exit.clone())
    }

    /// Argument vector `start` would use with `provided` appended.
    pub fn daemon_args(&self, provided: &[String]) -> Vec<String> {
        DaemonArgs {
            global_flags: &self.global_flags,
            command: &self.command,
            containerd_socket: &self.config.containerd_socket,
            root: &self.root,
            folder: &self.folder,
            userland_proxy: self.config.userland_proxy,
            mode: self.mode,
            userns_remap: self.config.userns_remap.as_deref(),
            storage_driver: self.config.storage_driver.as_deref(),
        }
        .build(provided)
    }

    pub fn connection_target(&self) -> ConnectionTarget {
        ConnectionTarget {
            mode: self.mode,
            folder: self.folder.clone(),
            tls_fixtures: self.config.tls_fixtures.clone(),
        }
    }

    /// Start the daemon, logging to `<folder>/docker.log`, and wait until it
    /// answers.
    pub async fn start(&mut self, args: &[String]) -> Result<()> {
        self.ensure_stopped()?;
        let path = self.folder.join(LOG_FILE);
        let log = open_log(&path).map_err(|source| FixtureError::LogFile {
            id: self.id.clone(),
            path: path.clone(),
            source,
        })?;
        self.log_path = Some(path);
        self.spawn_and_wait(log, args).await
    }

    /// Start the daemon with a caller-supplied log file.
    pub async fn start_with_log_file(&mut self, log: File, args: &[String]) -> Result<()> {
        self.ensure_stopped()?;
        self.log_path = None;
        self.spawn_and_wait(log, args).await
    }

    /// Start the daemon and import the seed image.
    pub async fn start_with_busybox(&mut self, args: &[String]) -> Result<()> {
        self.start(args).await?;
        self.load_busybox().await
    }

    /// A handle whose process has already exited counts as stopped and is
    /// cleared.
    fn ensure_stopped(&mut self) -> Result<()> {
        match &self.running {
            Some(running) if running.exit.has_exited() => {
                debug!("[{}] clearing handle of exited daemon", self.id);
                self.running = None;
                Ok(())
            }
            Some(_) => Err(FixtureError::AlreadyStarted { id: self.id.clone() }),
            None => Ok(()),
        }
    }

    async fn spawn_and_wait(&mut self, log: File, args: &[String]) -> Result<()> {
        let binary = which::which(&self.config.daemon_binary).map_err(|source| {
            FixtureError::BinaryNotFound {
                id: self.id.clone(),
                binary: self.config.daemon_binary.clone(),
                source,
            }
        })?;
        let argv = self.daemon_args(args);
        debug!("[{}] {} {}", self.id, binary.display(), argv.join(" "));

        let log_error = |source: io::Error| FixtureError::LogFile {
            id: self.id.clone(),
            path: self.folder.join(LOG_FILE),
            source,
        };
        let stdout = log.try_clone().map_err(log_error)?;
        let stderr = log.try_clone().map_err(log_error)?;

        let child = Command::new(&binary)
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|source| FixtureError::Spawn {
                id: self.id.clone(),
                source,
            })?;
        let pid = child.id().ok_or_else(|| FixtureError::Spawn {
            id: self.id.clone(),
            source: io::Error::other("daemon exited before its pid was read"),
        })?;
        info!("[{}] started daemon with pid {}", self.id, pid);

        let exit = spawn_exit_watcher(&self.id, child);
        self.running = Some(RunningDaemon {
            signaller: Box::new(PidSignaller::new(pid)),
            exit: exit.clone(),
            _log: log,
        });

        let target = self.connection_target();
        HealthPoller::new(&self.id, &target, self.config.timings)
            .wait_healthy(exit)
            .await?;

        self.root = self.query_root_dir(&target).await?;
        debug!("[{}] daemon root is {}", self.id, self.root.display());
        Ok(())
    }

    async fn query_root_dir(&self, target: &ConnectionTarget) -> Result<PathBuf> {
        let root_error = |reason: String| FixtureError::RootQuery {
            id: self.id.clone(),
            reason,
        };

        let config = client::resolve(target)?;
        let http = config.http_client()?;
        let resp = http
            .get(config.url(INFO_PATH))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .send()
            .await
            .map_err(|e| root_error(e.to_string()))?;

        if resp.status() != StatusCode::OK {
            return Err(root_error(format!("received status != 200 OK: {}", resp.status())));
        }

        let info: DaemonInfo = resp.json().await.map_err(|e| root_error(e.to_string()))?;
        Ok(info.root_dir)
    }

    /// Interrupt the daemon and wait for it to exit, escalating to a kill.
    pub async fn stop(&mut self) -> Result<ExitOutcome> {
        let running = self.running.take().ok_or(FixtureError::NotStarted)?;
        let pid_file = self.pid_file();
        ShutdownController::new(
            &self.id,
            running.signaller.as_ref(),
            running.exit.clone(),
            &pid_file,
            self.config.timings,
        )
        .graceful_stop()
        .await
    }

    /// Kill the daemon without asking first.
    pub async fn kill(&mut self) -> Result<ExitOutcome> {
        let running = self.running.take().ok_or(FixtureError::NotStarted)?;
        let pid_file = self.pid_file();
        ShutdownController::new(
            &self.id,
            running.signaller.as_ref(),
            running.exit.clone(),
            &pid_file,
            self.config.timings,
        )
        .force_kill()
        .await
    }

    /// Stop (ignoring failures) and start again.
    pub async fn restart(&mut self, args: &[String]) -> Result<()> {
        if let Err(e) = self.stop().await {
            debug!("[{}] ignoring stop failure on restart: {}", self.id, e);
        }
        if self.config.userns_remap.is_some() {
            // The reported root is nested one level below the one we pass in
            if let Some(parent) = self.root.parent() {
                self.root = parent.to_path_buf();
            }
        }
        self.start(args).await
    }

    /// Import the seed image, exporting it from the reference daemon if no
    /// archive is cached in the instance folder.
    pub async fn load_busybox(&self) -> Result<()> {
        let source = SeedSource {
            image: &self.config.seed_image,
            reference_host: self.config.reference_host.as_deref(),
        };
        seed::load_seed_image(&self.id, &self.cli(), &self.folder, source).await
    }

    /// Companion CLI bound to this instance
    pub fn cli(&self) -> CliRunner {
        CliRunner::new(self.config.cli_binary(), self.sock()).with_global_args(self.cli_flags.clone())
    }

    pub async fn cmd(&self, name: &str, args: &[&str]) -> Result<String> {
        self.cli().cmd(name, args).await
    }

    pub async fn cmd_with_args(&self, daemon_args: &[&str], name: &str, args: &[&str]) -> Result<String> {
        self.cli().cmd_with_args(daemon_args, name, args).await
    }

    pub async fn inspect_filter(&self, name: &str, filter: &str) -> Result<String> {
        self.cli().inspect_filter(name, filter).await
    }

    pub async fn inspect_field(&self, name: &str, field: &str) -> Result<String> {
        self.cli().inspect_field(name, field).await
    }

    pub async fn id_by_name(&self, name: &str) -> Result<String> {
        self.cli().id_by_name(name).await
    }

    pub async fn find_container_ip(&self, id: &str) -> Result<String> {
        self.cli().find_container_ip(id).await
    }

    pub async fn wait_run(&self, container: &str) -> Result<()> {
        self.cli().wait_run(container).await
    }

    pub async fn wait_inspect(
        &self,
        name: &str,
        expr: &str,
        expected: &str,
        timeout: std::time::Duration,
    ) -> Result<()> {
        self.cli().wait_inspect(name, expr, expected, timeout).await
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            if !running.exit.has_exited() {
                warn!("[{}] killing daemon left running", self.id);
                if let Err(e) = running.signaller.kill() {
                    warn!("[{}] could not kill daemon: {}", self.id, e);
                }
            }
        }
    }
}

/// Claim a fresh folder under `sandbox_root`. Ids whose folder already
/// exists are skipped, so two instances never share a sandbox.
fn create_instance_folder(
    sandbox_root: &Path,
    mut next_id: impl FnMut() -> String,
) -> Result<(String, PathBuf)> {
    let sandbox = |path: &Path, source| FixtureError::Sandbox {
        path: path.to_path_buf(),
        source,
    };
    fs::create_dir_all(sandbox_root).map_err(|e| sandbox(sandbox_root, e))?;

    let mut last_path = sandbox_root.to_path_buf();
    for _ in 0..MAX_ID_ATTEMPTS {
        let id = next_id();
        let path = sandbox_root.join(&id);
        let folder = std::path::absolute(&path).map_err(|e| sandbox(&path, e))?;
        match fs::create_dir(&folder) {
            Ok(()) => return Ok((id, folder)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("[{}] sandbox {} taken, picking another id", id, folder.display());
                last_path = folder;
            }
            Err(e) => return Err(sandbox(&folder, e)),
        }
    }
    Err(sandbox(
        &last_path,
        io::Error::new(io::ErrorKind::AlreadyExists, "no free instance id"),
    ))
}

fn new_instance_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("d{}", nanos % 100_000_000)
}

fn open_log(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}
