use std::fmt;
use std::process::ExitStatus;
use tokio::process::Child;
use tokio::sync::watch;
use tracing::info;

/// Terminal state of a daemon process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The process exited on its own (or in response to an interrupt)
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// Waiting on the process failed; its state is unknown
    WaitFailed { reason: String },
    /// The controller killed the process
    Terminated,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(
            self,
            Self::Exited { code: Some(0), .. } | Self::Terminated
        )
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self::Exited {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited {
                code: Some(code), ..
            } => write!(f, "exit status {}", code),
            Self::Exited {
                signal: Some(signal),
                ..
            } => write!(f, "killed by signal {}", signal),
            Self::Exited { .. } => f.write_str("exited"),
            Self::WaitFailed { reason } => write!(f, "wait failed: {}", reason),
            Self::Terminated => f.write_str("terminated"),
        }
    }
}

/// Publishing side of the exit signal. Consumed on use so the outcome is set
/// exactly once.
pub struct ExitNotifier {
    tx: watch::Sender<Option<ExitOutcome>>,
}

impl ExitNotifier {
    pub fn notify(self, outcome: ExitOutcome) {
        self.tx.send_replace(Some(outcome));
    }
}

/// Multi-reader view of a process exit. Every clone observes the same
/// outcome, no matter when it starts waiting.
#[derive(Debug, Clone)]
pub struct ExitWatch {
    rx: watch::Receiver<Option<ExitOutcome>>,
}

impl ExitWatch {
    pub fn channel() -> (ExitNotifier, ExitWatch) {
        let (tx, rx) = watch::channel(None);
        (ExitNotifier { tx }, ExitWatch { rx })
    }

    /// Outcome if the process already exited
    pub fn outcome(&self) -> Option<ExitOutcome> {
        self.rx.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Wait until the process exits. Cancel-safe.
    pub async fn wait(&mut self) -> ExitOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(ExitOutcome::WaitFailed {
                reason: "exit watcher published no outcome".to_string(),
            }),
            Err(_) => ExitOutcome::WaitFailed {
                reason: "exit watcher went away".to_string(),
            },
        }
    }
}

/// Spawn the background waiter that owns `child` until it exits.
pub fn spawn_exit_watcher(id: &str, mut child: Child) -> ExitWatch {
    let (notifier, watch) = ExitWatch::channel();
    let id = id.to_string();

    tokio::spawn(async move {
        let outcome = match child.wait().await {
            Ok(status) => ExitOutcome::from(status),
            Err(e) => ExitOutcome::WaitFailed {
                reason: e.to_string(),
            },
        };
        info!("[{}] exiting daemon ({})", id, outcome);
        notifier.notify(outcome);
    });

    watch
}
