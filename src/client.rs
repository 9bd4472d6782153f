//! Connection settings for talking to a daemon instance over HTTP.
//!
//! Resolution is a pure function of the instance's connection mode and paths.
//! Nothing is cached: callers resolve again whenever they need a client, so the
//! result always reflects the current instance state.

use crate::error::{FixtureError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Well-known socket a daemon listens on when no `--host` is given
pub const DEFAULT_UNIX_SOCKET: &str = "/var/run/docker.sock";
pub const DEFAULT_HTTP_HOST: &str = "localhost";
pub const DEFAULT_TLS_HTTP_PORT: u16 = 2376;

const SOCKET_NAME: &str = "docker.sock";
const CA_FILE: &str = "ca.pem";
const CERT_FILE: &str = "client-cert.pem";
const KEY_FILE: &str = "client-key.pem";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// How the fixture reaches its daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionMode {
    /// Per-instance socket inside the sandbox folder
    #[default]
    UnixEphemeral,
    /// Process-wide default socket, for testing default-host behaviour
    UnixDefault,
    /// Default TLS TCP endpoint with client certificates
    TlsDefault,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnixEphemeral => "unix-ephemeral",
            Self::UnixDefault => "unix-default",
            Self::TlsDefault => "tls-default",
        }
    }

    /// Whether the daemon is started without an explicit `--host`
    pub fn uses_default_host(&self) -> bool {
        !matches!(self, Self::UnixEphemeral)
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The inputs resolution depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub mode: ConnectionMode,
    /// Instance sandbox folder
    pub folder: PathBuf,
    /// Directory holding the TLS client fixtures
    pub tls_fixtures: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// PEM material for mutual TLS, validated at resolution time.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca", &self.ca.len())
            .field("cert", &self.cert.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Unix { socket: PathBuf },
    Tls { material: TlsMaterial },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub transport: Transport,
    pub scheme: Scheme,
    /// Socket path for unix transports, `host:port` for TCP
    pub addr: String,
}

pub fn resolve(target: &ConnectionTarget) -> Result<ConnectionConfig> {
    let config = match target.mode {
        ConnectionMode::TlsDefault => {
            let material = read_tls_material(&target.tls_fixtures)?;
            ConnectionConfig {
                transport: Transport::Tls { material },
                scheme: Scheme::Https,
                addr: format!("{}:{}", DEFAULT_HTTP_HOST, DEFAULT_TLS_HTTP_PORT),
            }
        }
        ConnectionMode::UnixDefault => unix_config(PathBuf::from(DEFAULT_UNIX_SOCKET)),
        ConnectionMode::UnixEphemeral => unix_config(target.folder.join(SOCKET_NAME)),
    };
    tracing::trace!(mode = %target.mode, addr = %config.addr, "Resolved client config");
    Ok(config)
}

fn unix_config(socket: PathBuf) -> ConnectionConfig {
    ConnectionConfig {
        addr: socket.display().to_string(),
        transport: Transport::Unix { socket },
        scheme: Scheme::Http,
    }
}

fn read_tls_material(dir: &Path) -> Result<TlsMaterial> {
    let read = |name: &str| {
        let path = dir.join(name);
        fs::read(&path).map_err(|source| FixtureError::TlsRead { path, source })
    };
    let material = TlsMaterial {
        ca: read(CA_FILE)?,
        cert: read(CERT_FILE)?,
        key: read(KEY_FILE)?,
    };

    // Parse once here so malformed fixtures fail at resolution, not mid-poll
    reqwest::Certificate::from_pem(&material.ca).map_err(|source| FixtureError::TlsMaterial {
        path: dir.join(CA_FILE),
        source,
    })?;
    reqwest::Identity::from_pkcs8_pem(&material.cert, &material.key).map_err(|source| {
        FixtureError::TlsMaterial {
            path: dir.join(KEY_FILE),
            source,
        }
    })?;

    Ok(material)
}

impl ConnectionConfig {
    /// URL for an API path. Unix transports ignore the host component.
    pub fn url(&self, path: &str) -> String {
        match &self.transport {
            Transport::Unix { .. } => format!("{}://{}{}", self.scheme.as_str(), DEFAULT_HTTP_HOST, path),
            Transport::Tls { .. } => format!("{}://{}{}", self.scheme.as_str(), self.addr, path),
        }
    }

    pub fn http_client(&self) -> Result<reqwest::Client> {
        let builder = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(CONNECT_TIMEOUT);

        let builder = match &self.transport {
            Transport::Unix { socket } => builder.unix_socket(socket.clone()),
            Transport::Tls { material } => {
                let ca = reqwest::Certificate::from_pem(&material.ca)
                    .map_err(FixtureError::Transport)?;
                let identity = reqwest::Identity::from_pkcs8_pem(&material.cert, &material.key)
                    .map_err(FixtureError::Transport)?;
                builder.add_root_certificate(ca).identity(identity)
            }
        };

        builder.build().map_err(FixtureError::Transport)
    }
}
