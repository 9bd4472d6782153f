use std::path::PathBuf;

/// Environment variables understood by [`crate::FixtureConfig::from_env`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvVar {
    Dest,
    DockerBinary,
    DockerCliBinary,
    DockerContainerdSocket,
    DockerGraphdriver,
    DockerRemapRoot,
    DockerUserlandProxy,
    DockerTlsFixtures,
    DockerSeedImage,
    DockerReferenceHost,
    FixtureConfig,
}

impl EnvVar {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dest => "DEST",
            Self::DockerBinary => "DOCKER_BINARY",
            Self::DockerCliBinary => "DOCKER_CLI_BINARY",
            Self::DockerContainerdSocket => "DOCKER_CONTAINERD_SOCKET",
            Self::DockerGraphdriver => "DOCKER_GRAPHDRIVER",
            Self::DockerRemapRoot => "DOCKER_REMAP_ROOT",
            Self::DockerUserlandProxy => "DOCKER_USERLANDPROXY",
            Self::DockerTlsFixtures => "DOCKER_TLS_FIXTURES",
            Self::DockerSeedImage => "DOCKER_SEED_IMAGE",
            Self::DockerReferenceHost => "DOCKER_REFERENCE_HOST",
            Self::FixtureConfig => "DAEMON_FIXTURE_CONFIG",
        }
    }
}

const FIXTURE_SUBDIR: &str = "daemon-fixture";

/// Non-empty value of an environment variable
pub fn env_opt(var: EnvVar) -> Option<String> {
    let val = std::env::var(var.as_str()).ok().filter(|v| !v.is_empty());
    tracing::trace!(var = var.as_str(), value = ?val, "Env var lookup");
    val
}

/// Parse a boolean the way the daemon's own flag parser does
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Default sandbox root (~/.cache/daemon-fixture, or the temp dir)
pub fn default_sandbox_root() -> PathBuf {
    let dir = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(FIXTURE_SUBDIR);
    tracing::trace!(dir = %dir.display(), "Resolved default sandbox root");
    dir
}

/// Config file path ($DAEMON_FIXTURE_CONFIG)
pub fn config_path() -> Option<PathBuf> {
    env_opt(EnvVar::FixtureConfig).map(PathBuf::from)
}
