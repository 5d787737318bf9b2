//! Server lifecycle.
//!
//! ```text
//! Idle -> Binding -> Running -> Stopped
//!          |
//!          +-> Idle (bind failed)
//! ```
//!
//! A stopped server never runs again. The acceptor and every receive loop
//! hold a token from [`Lifecycle::token`] and exit once it is cancelled.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{Result, ServerError};

/// How long the acceptor gets to exit before it is aborted.
pub const ACCEPTOR_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum Phase {
    Idle,
    Binding,
    Running(JoinHandle<()>),
    Stopped,
}

/// Start/stop state of one server plus the token its tasks watch.
#[derive(Debug)]
pub struct Lifecycle {
    phase: Mutex<Phase>,
    token: CancellationToken,
    grace: Duration,
}

impl Lifecycle {
    /// Idle lifecycle whose acceptor gets `grace` to exit on stop.
    pub fn new(grace: Duration) -> Self {
        Self {
            phase: Mutex::new(Phase::Idle),
            token: CancellationToken::new(),
            grace,
        }
    }

    /// Claim the right to bind. Only one caller wins.
    pub fn begin_start(&self) -> Result<()> {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Idle => {
                *phase = Phase::Binding;
                Ok(())
            }
            Phase::Binding | Phase::Running(_) => Err(ServerError::AlreadyStarted),
            Phase::Stopped => Err(ServerError::Stopped),
        }
    }

    /// Bind failed: back to idle so `start` can be retried.
    pub fn abort_start(&self) {
        let mut phase = self.phase.lock();
        if matches!(*phase, Phase::Binding) {
            *phase = Phase::Idle;
        }
    }

    /// Bind succeeded and `acceptor` is serving.
    pub fn running(&self, acceptor: JoinHandle<()>) {
        let mut phase = self.phase.lock();
        if matches!(*phase, Phase::Binding) {
            *phase = Phase::Running(acceptor);
        } else {
            acceptor.abort();
        }
    }

    /// Whether peers are being accepted.
    pub fn is_running(&self) -> bool {
        matches!(*self.phase.lock(), Phase::Running(_))
    }

    /// Move a running server to `Stopped`.
    ///
    /// `Ok(None)` when it was already stopped, so a second shutdown is a
    /// no-op. Otherwise returns the acceptor for [`stop_tasks`](Self::stop_tasks).
    pub fn begin_stop(&self) -> Result<Option<JoinHandle<()>>> {
        let mut phase = self.phase.lock();
        match std::mem::replace(&mut *phase, Phase::Stopped) {
            Phase::Running(acceptor) => Ok(Some(acceptor)),
            Phase::Stopped => Ok(None),
            previous @ (Phase::Idle | Phase::Binding) => {
                *phase = previous;
                Err(ServerError::NotStarted)
            }
        }
    }

    /// Token cancelled when the server stops.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel every task's token and wait for the acceptor, aborting it
    /// after the grace period.
    pub async fn stop_tasks(&self, acceptor: Option<JoinHandle<()>>) {
        self.token.cancel();
        let Some(acceptor) = acceptor else {
            return;
        };
        let abort = acceptor.abort_handle();
        match tokio::time::timeout(self.grace, acceptor).await {
            Ok(Ok(())) => debug!("acceptor exited"),
            Ok(Err(err)) => warn!(error = %err, "acceptor task failed"),
            Err(_elapsed) => {
                warn!(grace = ?self.grace, "acceptor did not exit, aborting it");
                abort.abort();
            }
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(ACCEPTOR_GRACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn parked(token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { token.cancelled().await })
    }

    #[tokio::test]
    async fn start_is_claimed_once() {
        let life = Lifecycle::default();
        life.begin_start().unwrap();
        assert_matches!(life.begin_start(), Err(ServerError::AlreadyStarted));
        assert!(!life.is_running());

        life.running(parked(life.token()));
        assert!(life.is_running());
        assert_matches!(life.begin_start(), Err(ServerError::AlreadyStarted));

        let acceptor = life.begin_stop().unwrap();
        life.stop_tasks(acceptor).await;
    }

    #[test]
    fn failed_bind_can_retry() {
        let life = Lifecycle::default();
        life.begin_start().unwrap();
        life.abort_start();
        assert!(life.begin_start().is_ok());
    }

    #[test]
    fn stop_before_start_is_refused() {
        let life = Lifecycle::default();
        assert_matches!(life.begin_stop(), Err(ServerError::NotStarted));
        life.begin_start().unwrap();
        assert_matches!(life.begin_stop(), Err(ServerError::NotStarted));
        assert!(life.begin_start().is_err());
    }

    #[tokio::test]
    async fn stopped_never_restarts() {
        let life = Lifecycle::default();
        life.begin_start().unwrap();
        life.running(parked(life.token()));

        let acceptor = life.begin_stop().unwrap();
        assert!(acceptor.is_some());
        life.stop_tasks(acceptor).await;
        assert!(life.token().is_cancelled());
        assert!(!life.is_running());

        assert_matches!(life.begin_stop(), Ok(None));
        assert_matches!(life.begin_start(), Err(ServerError::Stopped));
    }

    #[tokio::test]
    async fn stuck_acceptor_is_aborted() {
        let life = Lifecycle::new(Duration::from_millis(20));
        life.begin_start().unwrap();
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let abort = stuck.abort_handle();
        life.running(stuck);

        let acceptor = life.begin_stop().unwrap();
        life.stop_tasks(acceptor).await;
        for _ in 0..100 {
            if abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(abort.is_finished());
    }
}
