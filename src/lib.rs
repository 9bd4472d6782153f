pub mod client;
pub mod clienv;
pub mod config;
pub mod daemon;
pub mod error;

#[cfg(all(test, unix))]
pub(crate) mod test_support;

pub use client::ConnectionMode;
pub use config::{FixtureConfig, Timings};
pub use daemon::{DaemonProcess, ExitOutcome, ExitWatch};
pub use error::{ErrorKind, FixtureError, Result};
