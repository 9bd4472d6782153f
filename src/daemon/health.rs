use super::exit::ExitWatch;
use crate::client::{self, ConnectionTarget};
use crate::config::Timings;
use crate::error::{FixtureError, Result};
use reqwest::StatusCode;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Liveness endpoint; any reachable response counts
pub const PING_PATH: &str = "/_ping";

/// Polls a freshly spawned daemon until it answers on its control socket.
pub struct HealthPoller<'a> {
    id: &'a str,
    target: &'a ConnectionTarget,
    timings: Timings,
}

impl<'a> HealthPoller<'a> {
    pub fn new(id: &'a str, target: &'a ConnectionTarget, timings: Timings) -> Self {
        Self { id, target, timings }
    }

    /// Wait until a liveness request completes at the transport level.
    ///
    /// Fails as soon as the process exits, when a single attempt stalls past
    /// the per-attempt budget, or when the overall startup budget runs out.
    /// Non-2xx responses are logged and accepted.
    pub async fn wait_healthy(&self, mut exit: ExitWatch) -> Result<()> {
        let started = Instant::now();
        let mut ticker = time::interval_at(
            started + self.timings.poll_interval,
            self.timings.poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            info!("[{}] waiting for daemon to start", self.id);
            if started.elapsed() > self.timings.startup_timeout {
                return Err(FixtureError::NeverStarted {
                    id: self.id.to_string(),
                });
            }

            let attempt = time::timeout(self.timings.attempt_timeout, async {
                ticker.tick().await;
                self.ping().await
            });

            tokio::select! {
                outcome = exit.wait() => {
                    return Err(FixtureError::ExitedDuringStartup {
                        id: self.id.to_string(),
                        outcome,
                    });
                }
                result = attempt => match result {
                    Err(_) => {
                        return Err(FixtureError::NoResponse {
                            id: self.id.to_string(),
                        });
                    }
                    Ok(Ok(status)) => {
                        if status != StatusCode::OK {
                            warn!("[{}] received status != 200 OK: {}", self.id, status);
                        }
                        info!("[{}] daemon started", self.id);
                        return Ok(());
                    }
                    Ok(Err(PingError::Config(e))) => return Err(e),
                    Ok(Err(PingError::Request(e))) => {
                        debug!("[{}] ping failed: {}", self.id, e);
                    }
                },
            }
        }
    }

    async fn ping(&self) -> std::result::Result<StatusCode, PingError> {
        let config = client::resolve(self.target).map_err(PingError::Config)?;
        let http = config.http_client().map_err(PingError::Config)?;
        let resp = http
            .get(config.url(PING_PATH))
            .send()
            .await
            .map_err(PingError::Request)?;
        Ok(resp.status())
    }
}

enum PingError {
    /// Resolution or client construction failed; retrying will not help
    Config(FixtureError),
    Request(reqwest::Error),
}
