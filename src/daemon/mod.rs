//! Lifecycle control for one sandboxed daemon under test.
//!
//! ```text
//! DaemonProcess ──spawn──▶ child ──wait──▶ exit watcher ──▶ ExitWatch
//!      │                                                      │
//!      ├── HealthPoller (GET /_ping until reachable) ◀────────┤
//!      └── ShutdownController (SIGINT, nudges, SIGKILL) ◀─────┘
//! ```

pub mod argv;
pub mod command;
pub mod exit;
pub mod health;
pub mod process;
pub mod seed;
pub mod shutdown;

pub use command::CliRunner;
pub use exit::{ExitOutcome, ExitWatch};
pub use health::HealthPoller;
pub use process::DaemonProcess;
pub use shutdown::{PidSignaller, ShutdownController, Signaller};
