use crate::daemon::ExitOutcome;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Broad failure class, used by callers that only care whether a failure is
/// worth retrying on a fresh instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Startup,
    Shutdown,
    Command,
}

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("could not read TLS material {path}: {source}")]
    TlsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TLS material {path}: {source}")]
    TlsMaterial {
        path: PathBuf,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not build HTTP client: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("could not read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("could not create daemon sandbox {path}: {source}")]
    Sandbox {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[{id}] could not find daemon binary {binary}: {source}")]
    BinaryNotFound {
        id: String,
        binary: PathBuf,
        #[source]
        source: which::Error,
    },

    #[error("[{id}] could not create {path}: {source}")]
    LogFile {
        id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[{id}] could not start daemon: {source}")]
    Spawn {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[{id}] daemon already started")]
    AlreadyStarted { id: String },

    #[error("[{id}] timeout: daemon does not respond")]
    NoResponse { id: String },

    #[error("[{id}] daemon exited and never started")]
    NeverStarted { id: String },

    #[error("[{id}] daemon exited during startup ({outcome})")]
    ExitedDuringStartup { id: String, outcome: ExitOutcome },

    #[error("[{id}] error querying daemon for root directory: {reason}")]
    RootQuery { id: String, reason: String },

    #[error("daemon not started")]
    NotStarted,

    #[error("[{id}] could not send signal: {source}")]
    Signal {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[{id}] could not kill daemon: {source}")]
    Kill {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[{id}] could not remove {path}: {source}")]
    PidFile {
        id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not run {program}: {source}")]
    CommandSpawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("command '{name}' failed ({status}): {output}")]
    Command {
        name: String,
        status: ExitStatus,
        output: String,
    },

    #[error("failed to inspect {name}: {output}")]
    Inspect { name: String, output: String },

    #[error("timed out after {timeout:?} waiting for {name} {expr} to be '{expected}' (last: '{last}')")]
    InspectTimeout {
        name: String,
        expr: String,
        expected: String,
        last: String,
        timeout: Duration,
    },

    #[error("unexpected error on {path} stat: {source}")]
    SeedStat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not save {image} image: {reason}")]
    SeedExport { image: String, reason: String },

    #[error("could not load {image} image: {output}")]
    SeedImport { image: String, output: String },
}

impl FixtureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TlsRead { .. }
            | Self::TlsMaterial { .. }
            | Self::Transport(_)
            | Self::ConfigRead { .. }
            | Self::ConfigParse { .. }
            | Self::Sandbox { .. } => ErrorKind::Config,
            Self::BinaryNotFound { .. }
            | Self::LogFile { .. }
            | Self::Spawn { .. }
            | Self::AlreadyStarted { .. }
            | Self::NoResponse { .. }
            | Self::NeverStarted { .. }
            | Self::ExitedDuringStartup { .. }
            | Self::RootQuery { .. } => ErrorKind::Startup,
            Self::NotStarted | Self::Signal { .. } | Self::Kill { .. } | Self::PidFile { .. } => {
                ErrorKind::Shutdown
            }
            Self::CommandSpawn { .. }
            | Self::Command { .. }
            | Self::Inspect { .. }
            | Self::InspectTimeout { .. }
            | Self::SeedStat { .. }
            | Self::SeedExport { .. }
            | Self::SeedImport { .. } => ErrorKind::Command,
        }
    }
}

pub type Result<T> = std::result::Result<T, FixtureError>;
