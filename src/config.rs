use crate::clienv::{self, EnvVar};
use crate::error::{FixtureError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_BINARY: &str = "docker";
const DEFAULT_CONTAINERD_SOCKET: &str = "/var/run/docker/libcontainerd/docker-containerd.sock";
const DEFAULT_TLS_FIXTURES: &str = "fixtures/https";
const DEFAULT_SEED_IMAGE: &str = "busybox:latest";

/// Timing windows for readiness polling and shutdown escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Delay between liveness attempts
    pub poll_interval: Duration,
    /// Budget for a single liveness attempt (tick wait plus request)
    pub attempt_timeout: Duration,
    /// Overall startup budget
    pub startup_timeout: Duration,
    /// Window after the first interrupt before escalating
    pub shutdown_grace: Duration,
    /// Delay between escalation nudges
    pub escalation_interval: Duration,
    /// Nudges sent before falling back to a hard kill
    pub escalation_attempts: u32,
    /// How long to wait for the waiter to reap a killed process
    pub reap_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(2),
            startup_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(15),
            escalation_interval: Duration::from_secs(1),
            escalation_attempts: 4,
            reap_timeout: Duration::from_secs(10),
        }
    }
}

/// Everything a [`crate::DaemonProcess`] needs to know about its environment.
///
/// The harness populates this explicitly, from a TOML file, or from the
/// environment; the process controller never reads the environment itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureConfig {
    /// Parent directory of every per-instance sandbox
    pub sandbox_root: PathBuf,
    pub daemon_binary: PathBuf,
    /// Companion CLI used for `cmd` and image seeding; the daemon binary
    /// when unset
    pub cli_binary: Option<PathBuf>,
    pub containerd_socket: PathBuf,
    pub storage_driver: Option<String>,
    /// `--userns-remap` value; also switches root un-nesting on restart
    pub userns_remap: Option<String>,
    pub userland_proxy: bool,
    /// Directory holding `ca.pem`, `client-cert.pem` and `client-key.pem`
    pub tls_fixtures: PathBuf,
    pub seed_image: String,
    /// Host of the reference daemon the seed image is exported from
    pub reference_host: Option<String>,
    pub timings: Timings,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            sandbox_root: clienv::default_sandbox_root(),
            daemon_binary: PathBuf::from(DEFAULT_BINARY),
            cli_binary: None,
            containerd_socket: PathBuf::from(DEFAULT_CONTAINERD_SOCKET),
            storage_driver: None,
            userns_remap: None,
            userland_proxy: true,
            tls_fixtures: PathBuf::from(DEFAULT_TLS_FIXTURES),
            seed_image: DEFAULT_SEED_IMAGE.to_string(),
            reference_host: None,
            timings: Timings::default(),
        }
    }
}

/// On-disk shape of the config file. Every key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FileConfig {
    pub sandbox_root: Option<PathBuf>,
    pub daemon_binary: Option<PathBuf>,
    pub cli_binary: Option<PathBuf>,
    pub containerd_socket: Option<PathBuf>,
    pub storage_driver: Option<String>,
    pub userns_remap: Option<String>,
    pub userland_proxy: Option<bool>,
    pub tls_fixtures: Option<PathBuf>,
    pub seed_image: Option<String>,
    pub reference_host: Option<String>,
}

impl FixtureConfig {
    /// Defaults overlaid with the environment.
    pub fn from_env() -> Self {
        Self::default().apply_env(clienv::env_opt)
    }

    /// Defaults overlaid with a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading fixture config");

        let content = fs::read_to_string(path).map_err(|source| FixtureError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        let file: FileConfig =
            toml::from_str(&content).map_err(|source| FixtureError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self::default().apply_file(file))
    }

    pub fn apply_file(mut self, file: FileConfig) -> Self {
        if let Some(dir) = file.sandbox_root {
            self.sandbox_root = dir;
        }
        if let Some(binary) = file.daemon_binary {
            self.daemon_binary = binary;
        }
        if file.cli_binary.is_some() {
            self.cli_binary = file.cli_binary;
        }
        if let Some(sock) = file.containerd_socket {
            self.containerd_socket = sock;
        }
        if file.storage_driver.is_some() {
            self.storage_driver = file.storage_driver;
        }
        if file.userns_remap.is_some() {
            self.userns_remap = file.userns_remap;
        }
        if let Some(proxy) = file.userland_proxy {
            self.userland_proxy = proxy;
        }
        if let Some(dir) = file.tls_fixtures {
            self.tls_fixtures = dir;
        }
        if let Some(image) = file.seed_image {
            self.seed_image = image;
        }
        if file.reference_host.is_some() {
            self.reference_host = file.reference_host;
        }
        self
    }

    /// Overlay values from an environment lookup. Unparseable booleans keep
    /// the current value.
    pub fn apply_env(self, lookup: impl Fn(EnvVar) -> Option<String>) -> Self {
        let proxy = lookup(EnvVar::DockerUserlandProxy).and_then(|v| {
            let parsed = clienv::parse_bool(&v);
            if parsed.is_none() {
                tracing::warn!(value = %v, "Ignoring unparseable DOCKER_USERLANDPROXY");
            }
            parsed
        });

        let file = FileConfig {
            sandbox_root: lookup(EnvVar::Dest).map(PathBuf::from),
            daemon_binary: lookup(EnvVar::DockerBinary).map(PathBuf::from),
            cli_binary: lookup(EnvVar::DockerCliBinary).map(PathBuf::from),
            containerd_socket: lookup(EnvVar::DockerContainerdSocket).map(PathBuf::from),
            storage_driver: lookup(EnvVar::DockerGraphdriver),
            userns_remap: lookup(EnvVar::DockerRemapRoot),
            userland_proxy: proxy,
            tls_fixtures: lookup(EnvVar::DockerTlsFixtures).map(PathBuf::from),
            seed_image: lookup(EnvVar::DockerSeedImage),
            reference_host: lookup(EnvVar::DockerReferenceHost),
        };
        self.apply_file(file)
    }

    /// Binary run for CLI commands
    pub fn cli_binary(&self) -> &Path {
        self.cli_binary.as_deref().unwrap_or(&self.daemon_binary)
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }
}
