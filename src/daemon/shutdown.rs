use super::exit::{ExitOutcome, ExitWatch};
use crate::config::Timings;
use crate::error::{FixtureError, Result};
use std::io;
use std::path::Path;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Signal delivery to a running daemon.
pub trait Signaller: Send + Sync {
    fn pid(&self) -> u32;
    /// Ask the process to shut down (SIGINT)
    fn interrupt(&self) -> io::Result<()>;
    /// Terminate the process unconditionally (SIGKILL)
    fn kill(&self) -> io::Result<()>;
}

/// Signals a process by pid.
#[derive(Debug, Clone, Copy)]
pub struct PidSignaller {
    pid: u32,
}

impl PidSignaller {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    #[cfg(unix)]
    fn send(&self, signal: libc::c_int) -> io::Result<()> {
        let result = unsafe { libc::kill(self.pid as libc::pid_t, signal) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

impl Signaller for PidSignaller {
    fn pid(&self) -> u32 {
        self.pid
    }

    #[cfg(unix)]
    fn interrupt(&self) -> io::Result<()> {
        self.send(libc::SIGINT)
    }

    #[cfg(unix)]
    fn kill(&self) -> io::Result<()> {
        self.send(libc::SIGKILL)
    }

    #[cfg(not(unix))]
    fn interrupt(&self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "signals are not supported on this platform",
        ))
    }

    #[cfg(not(unix))]
    fn kill(&self) -> io::Result<()> {
        self.interrupt()
    }
}

/// Drives a daemon from running to stopped.
///
/// Graceful stop: interrupt, wait out the grace window, then nudge with a
/// fresh interrupt on every escalation tick. Once the nudges are used up the
/// next tick sends a hard kill.
pub struct ShutdownController<'a> {
    id: &'a str,
    process: &'a dyn Signaller,
    exit: ExitWatch,
    pid_file: &'a Path,
    timings: Timings,
}

impl<'a> ShutdownController<'a> {
    pub fn new(
        id: &'a str,
        process: &'a dyn Signaller,
        exit: ExitWatch,
        pid_file: &'a Path,
        timings: Timings,
    ) -> Self {
        Self {
            id,
            process,
            exit,
            pid_file,
            timings,
        }
    }

    pub async fn graceful_stop(mut self) -> Result<ExitOutcome> {
        if let Some(outcome) = self.exit.outcome() {
            debug!("[{}] daemon already exited ({})", self.id, outcome);
            return self.finish(outcome);
        }

        self.interrupt()?;

        tokio::select! {
            biased;
            outcome = self.exit.wait() => return self.finish(outcome),
            _ = time::sleep(self.timings.shutdown_grace) => {
                info!("[{}] timeout", self.id);
            }
        }

        let interval = self.timings.escalation_interval;
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        let mut nudges = 0u32;

        loop {
            tokio::select! {
                biased;
                outcome = self.exit.wait() => return self.finish(outcome),
                _ = ticker.tick() => {
                    if nudges >= self.timings.escalation_attempts {
                        info!(
                            "[{}] tried to interrupt daemon for {} times, now try to kill it",
                            self.id,
                            nudges + 1
                        );
                        break;
                    }
                    nudges += 1;
                    info!(
                        "[{}] attempt #{}: daemon is still running with pid {}",
                        self.id,
                        nudges + 1,
                        self.process.pid()
                    );
                    self.interrupt()?;
                }
            }
        }

        self.force_kill().await
    }

    /// Kill the daemon. A process that already exited is not signalled; its
    /// own outcome is returned instead of `Terminated`.
    pub async fn force_kill(mut self) -> Result<ExitOutcome> {
        if let Some(outcome) = self.exit.outcome() {
            debug!("[{}] daemon already exited ({}), not killing", self.id, outcome);
            return self.finish(outcome);
        }

        if let Err(source) = self.process.kill() {
            warn!("[{}] could not kill daemon: {}", self.id, source);
            return Err(FixtureError::Kill {
                id: self.id.to_string(),
                source,
            });
        }

        match time::timeout(self.timings.reap_timeout, self.exit.wait()).await {
            Ok(outcome) => debug!("[{}] killed daemon reaped ({})", self.id, outcome),
            Err(_) => warn!(
                "[{}] killed daemon not reaped within {:?}",
                self.id, self.timings.reap_timeout
            ),
        }

        self.finish(ExitOutcome::Terminated)
    }

    /// Send SIGINT unless the exit was already observed; a reaped pid may
    /// belong to another process.
    fn interrupt(&self) -> Result<()> {
        if self.exit.has_exited() {
            return Ok(());
        }
        self.process
            .interrupt()
            .map_err(|source| FixtureError::Signal {
                id: self.id.to_string(),
                source,
            })
    }

    fn finish(&self, outcome: ExitOutcome) -> Result<ExitOutcome> {
        match std::fs::remove_file(self.pid_file) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(FixtureError::PidFile {
                    id: self.id.to_string(),
                    path: self.pid_file.to_path_buf(),
                    source,
                })
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::exit::ExitNotifier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Process double that exits after a given number of interrupts.
    struct FakeProcess {
        exit_after_interrupts: Option<usize>,
        kill_fails: bool,
        interrupts: AtomicUsize,
        kills: AtomicUsize,
        killed_at: Mutex<Option<Instant>>,
        notifier: Mutex<Option<ExitNotifier>>,
    }

    impl FakeProcess {
        fn new(exit_after_interrupts: Option<usize>) -> (Self, ExitWatch) {
            let (notifier, watch) = ExitWatch::channel();
            let process = Self {
                exit_after_interrupts,
                kill_fails: false,
                interrupts: AtomicUsize::new(0),
                kills: AtomicUsize::new(0),
                killed_at: Mutex::new(None),
                notifier: Mutex::new(Some(notifier)),
            };
            (process, watch)
        }

        fn exit(&self, outcome: ExitOutcome) {
            if let Some(notifier) = self.notifier.lock().unwrap().take() {
                notifier.notify(outcome);
            }
        }
    }

    impl Signaller for FakeProcess {
        fn pid(&self) -> u32 {
            4242
        }

        fn interrupt(&self) -> io::Result<()> {
            let count = self.interrupts.fetch_add(1, Ordering::SeqCst) + 1;
            if Some(count) == self.exit_after_interrupts {
                self.exit(ExitOutcome::Exited {
                    code: Some(0),
                    signal: None,
                });
            }
            Ok(())
        }

        fn kill(&self) -> io::Result<()> {
            if self.kill_fails {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            self.kills.fetch_add(1, Ordering::SeqCst);
            *self.killed_at.lock().unwrap() = Some(Instant::now());
            self.exit(ExitOutcome::Exited {
                code: None,
                signal: Some(9),
            });
            Ok(())
        }
    }

    fn pid_file(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("docker.pid");
        std::fs::write(&path, "4242\n").unwrap();
        path
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_on_first_interrupt() {
        let dir = TempDir::new().unwrap();
        let pid_path = pid_file(&dir);
        let (process, exit) = FakeProcess::new(Some(1));

        let outcome = ShutdownController::new("d1", &process, exit, &pid_path, Timings::default())
            .graceful_stop()
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ExitOutcome::Exited {
                code: Some(0),
                signal: None
            }
        );
        assert_eq!(process.interrupts.load(Ordering::SeqCst), 1);
        assert_eq!(process.kills.load(Ordering::SeqCst), 0);
        assert!(!pid_path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalates_then_kills_stubborn_process() {
        let dir = TempDir::new().unwrap();
        let pid_path = pid_file(&dir);
        let (process, exit) = FakeProcess::new(None);
        let started = Instant::now();

        let outcome = ShutdownController::new("d1", &process, exit, &pid_path, Timings::default())
            .graceful_stop()
            .await
            .unwrap();

        assert_eq!(outcome, ExitOutcome::Terminated);
        assert_eq!(process.kills.load(Ordering::SeqCst), 1);
        // Initial interrupt plus four nudges
        assert_eq!(process.interrupts.load(Ordering::SeqCst), 5);
        let killed_at = process.killed_at.lock().unwrap().unwrap();
        assert!(killed_at - started >= Duration::from_secs(15 + 4));
        assert!(!pid_path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_during_escalation_skips_kill() {
        let dir = TempDir::new().unwrap();
        let pid_path = pid_file(&dir);
        let (process, exit) = FakeProcess::new(Some(3));

        let outcome = ShutdownController::new("d1", &process, exit, &pid_path, Timings::default())
            .graceful_stop()
            .await
            .unwrap();

        assert!(outcome.success());
        assert_eq!(process.interrupts.load(Ordering::SeqCst), 3);
        assert_eq!(process.kills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_failure_is_surfaced() {
        let dir = TempDir::new().unwrap();
        let pid_path = pid_file(&dir);
        let (mut process, exit) = FakeProcess::new(None);
        process.kill_fails = true;

        let err = ShutdownController::new("d1", &process, exit, &pid_path, Timings::default())
            .graceful_stop()
            .await
            .unwrap_err();

        assert!(matches!(err, FixtureError::Kill { .. }), "{err}");
        assert!(pid_path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_exited_process_is_not_signalled() {
        let dir = TempDir::new().unwrap();
        let pid_path = dir.path().join("docker.pid");
        let (process, exit) = FakeProcess::new(None);
        process.exit(ExitOutcome::Exited {
            code: Some(2),
            signal: None,
        });

        let outcome = ShutdownController::new("d1", &process, exit, &pid_path, Timings::default())
            .graceful_stop()
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ExitOutcome::Exited {
                code: Some(2),
                signal: None
            }
        );
        assert_eq!(process.interrupts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pid_file_removal_failure_is_surfaced() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be removed with remove_file
        let pid_path = dir.path().join("docker.pid");
        std::fs::create_dir(&pid_path).unwrap();
        let (process, exit) = FakeProcess::new(Some(1));

        let err = ShutdownController::new("d1", &process, exit, &pid_path, Timings::default())
            .graceful_stop()
            .await
            .unwrap_err();

        assert!(matches!(err, FixtureError::PidFile { .. }), "{err}");
        assert_eq!(err.kind(), crate::ErrorKind::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_kill_skips_exited_process() {
        let dir = TempDir::new().unwrap();
        let pid_path = pid_file(&dir);
        let (process, exit) = FakeProcess::new(None);
        process.exit(ExitOutcome::Exited {
            code: Some(1),
            signal: None,
        });

        let outcome = ShutdownController::new("d1", &process, exit, &pid_path, Timings::default())
            .force_kill()
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ExitOutcome::Exited {
                code: Some(1),
                signal: None
            }
        );
        assert_eq!(process.kills.load(Ordering::SeqCst), 0);
        assert!(!pid_path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_kill_terminates_immediately() {
        let dir = TempDir::new().unwrap();
        let pid_path = pid_file(&dir);
        let (process, exit) = FakeProcess::new(None);
        let started = Instant::now();

        let outcome = ShutdownController::new("d1", &process, exit, &pid_path, Timings::default())
            .force_kill()
            .await
            .unwrap();

        assert_eq!(outcome, ExitOutcome::Terminated);
        assert_eq!(process.interrupts.load(Ordering::SeqCst), 0);
        assert_eq!(process.kills.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
