use crate::error::{FixtureError, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

const INSPECT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const WAIT_RUN_TIMEOUT: Duration = Duration::from_secs(10);
const CONTAINER_IP_FORMAT: &str = "--format='{{ .NetworkSettings.Networks.bridge.IPAddress }}'";

/// Runs the companion CLI against one daemon instance.
#[derive(Debug, Clone)]
pub struct CliRunner {
    binary: PathBuf,
    global_args: Vec<String>,
    host: String,
}

impl CliRunner {
    pub fn new(binary: impl Into<PathBuf>, host: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            global_args: Vec::new(),
            host: host.into(),
        }
    }

    /// Arguments placed before everything else on every invocation
    pub fn with_global_args(mut self, args: Vec<String>) -> Self {
        self.global_args = args;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run `<cli> --host <sock> name args...` and return its combined output.
    pub async fn cmd<S: AsRef<OsStr>>(&self, name: &str, args: &[S]) -> Result<String> {
        let host = ["--host", self.host.as_str()];
        self.cmd_with_args(&host, name, args).await
    }

    /// Like [`cmd`](Self::cmd) but with caller-chosen connection flags.
    pub async fn cmd_with_args<D, S>(&self, daemon_args: &[D], name: &str, args: &[S]) -> Result<String>
    where
        D: AsRef<OsStr>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.binary);
        command
            .args(&self.global_args)
            .args(daemon_args)
            .arg(name)
            .args(args);

        let (status, output) = run_combined(&self.binary, command).await?;
        if status.success() {
            Ok(output)
        } else {
            Err(FixtureError::Command {
                name: name.to_string(),
                status,
                output,
            })
        }
    }

    /// `inspect -f {{filter}} name`, trimmed.
    pub async fn inspect_filter(&self, name: &str, filter: &str) -> Result<String> {
        let format = format!("{{{{{}}}}}", filter);
        self.inspect_format(name, &format).await
    }

    pub async fn inspect_field(&self, name: &str, field: &str) -> Result<String> {
        self.inspect_filter(name, &format!(".{}", field)).await
    }

    pub async fn id_by_name(&self, name: &str) -> Result<String> {
        self.inspect_field(name, "Id").await
    }

    pub async fn find_container_ip(&self, id: &str) -> Result<String> {
        let out = self.cmd("inspect", &[CONTAINER_IP_FORMAT, id]).await?;
        Ok(out.trim_matches(|c| matches!(c, ' ' | '\r' | '\n' | '\'')).to_string())
    }

    /// Poll `inspect -f expr name` until it prints `expected`.
    pub async fn wait_inspect(
        &self,
        name: &str,
        expr: &str,
        expected: &str,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut last = String::new();

        loop {
            match self.inspect_format(name, expr).await {
                Ok(out) if out == expected => return Ok(()),
                Ok(out) => last = out,
                Err(e) => {
                    debug!("inspect {} failed while waiting: {}", name, e);
                    last = e.to_string();
                }
            }

            if Instant::now() >= deadline {
                return Err(FixtureError::InspectTimeout {
                    name: name.to_string(),
                    expr: expr.to_string(),
                    expected: expected.to_string(),
                    last,
                    timeout,
                });
            }
            time::sleep(INSPECT_POLL_INTERVAL).await;
        }
    }

    /// Wait for a container to report `State.Running == true`.
    pub async fn wait_run(&self, container: &str) -> Result<()> {
        self.wait_inspect(container, "{{.State.Running}}", "true", WAIT_RUN_TIMEOUT)
            .await
    }

    async fn inspect_format(&self, name: &str, format: &str) -> Result<String> {
        match self.cmd("inspect", &["-f", format, name]).await {
            Ok(out) => Ok(out.trim().to_string()),
            Err(FixtureError::Command { output, .. }) => Err(FixtureError::Inspect {
                name: name.to_string(),
                output,
            }),
            Err(e) => Err(e),
        }
    }
}

/// Run to completion, returning the status and stdout followed by stderr.
pub(crate) async fn run_combined(program: &Path, mut command: Command) -> Result<(ExitStatus, String)> {
    trace!(program = %program.display(), "Running command");

    let output = command
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| FixtureError::CommandSpawn {
            program: program.to_path_buf(),
            source,
        })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok((output.status, combined))
}
