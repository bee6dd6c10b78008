//! Bounded polling on top of [`SubmissionApi`]: waiting for a submission to
//! settle and waiting for its log to be published.

use anyhow::Result;
use log::{debug, info};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::sired::{Estado, StatusSnapshot, SubmissionApi};

/// Default budget for waiting on a terminal state.
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(300);

/// Default budget for waiting on the log.
pub const DEFAULT_LOG_TIMEOUT: Duration = Duration::from_secs(90);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How a wait for a terminal state ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// `Exitosa`
    TerminalSuccess,
    /// `Fallido`: a normal outcome, not an error
    TerminalFailure,
    /// `Reemplazado`
    TerminalReplaced,
    /// Deadline passed while still in progress
    TimedOut,
    Cancelled,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::TerminalSuccess | PollState::TerminalFailure | PollState::TerminalReplaced
        )
    }
}

/// Final state plus the last snapshot fetched.
///
/// `snapshot` is `None` only when cancellation came before the first fetch
/// completed.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub state: PollState,
    pub snapshot: Option<StatusSnapshot>,
}

impl PollOutcome {
    pub fn estado(&self) -> Estado {
        self.snapshot
            .as_ref()
            .map(StatusSnapshot::estado)
            .unwrap_or_else(|| Estado::InProgress(String::new()))
    }
}

pub struct Poller<'a, A: SubmissionApi + ?Sized> {
    api: &'a A,
}

impl<'a, A: SubmissionApi + ?Sized> Poller<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Polls the status of `solicitud_id` every `poll_interval` until it is
    /// terminal, `timeout` has elapsed, or `cancel` fires.
    ///
    /// The status is fetched at least once unless `cancel` has already fired.
    /// Running out of time is not an error: the outcome is
    /// [`PollState::TimedOut`] with the last snapshot. Cancellation also
    /// interrupts a fetch in flight.
    #[tracing::instrument(skip(self, token, cancel))]
    pub async fn wait_for_terminal_state(
        &self,
        token: &str,
        solicitud_id: &str,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome> {
        let deadline = deadline_after(timeout);
        let mut last: Option<StatusSnapshot> = None;
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(PollOutcome {
                    state: PollState::Cancelled,
                    snapshot: last,
                });
            }
            attempt += 1;
            let snapshot =
                match until_cancelled(cancel, self.api.get_solicitud(token, solicitud_id)).await {
                    Some(result) => result?,
                    None => {
                        return Ok(PollOutcome {
                            state: PollState::Cancelled,
                            snapshot: last,
                        });
                    }
                };
            let estado = snapshot.estado();
            info!("Poll #{}: Estado {}", attempt, estado);

            let state = match estado {
                Estado::Exitosa => Some(PollState::TerminalSuccess),
                Estado::Fallido => Some(PollState::TerminalFailure),
                Estado::Reemplazado => Some(PollState::TerminalReplaced),
                Estado::InProgress(_) => None,
            };
            if let Some(state) = state {
                return Ok(PollOutcome {
                    state,
                    snapshot: Some(snapshot),
                });
            }

            if is_past(deadline) {
                info!(
                    "Gave up waiting for {} after {:?}, last Estado {}",
                    solicitud_id, timeout, estado
                );
                return Ok(PollOutcome {
                    state: PollState::TimedOut,
                    snapshot: Some(snapshot),
                });
            }
            last = Some(snapshot);

            if until_cancelled(cancel, tokio::time::sleep(poll_interval))
                .await
                .is_none()
            {
                return Ok(PollOutcome {
                    state: PollState::Cancelled,
                    snapshot: last,
                });
            }
        }
    }

    /// Tries to download the log every `poll_interval` until it is published
    /// or `timeout` has elapsed. Returns `None` when it never showed up or
    /// `cancel` fired, including during a download in flight.
    #[tracing::instrument(skip(self, token, cancel))]
    pub async fn try_download_log_with_retry(
        &self,
        token: &str,
        solicitud_id: &str,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>> {
        let deadline = deadline_after(timeout);

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let download = self.api.download_log(token, solicitud_id, None);
            match until_cancelled(cancel, download).await {
                Some(result) => {
                    if let Some(path) = result? {
                        return Ok(Some(path));
                    }
                }
                None => return Ok(None),
            }

            if is_past(deadline) {
                info!("Log for {} not published after {:?}", solicitud_id, timeout);
                return Ok(None);
            }

            if until_cancelled(cancel, tokio::time::sleep(poll_interval))
                .await
                .is_none()
            {
                return Ok(None);
            }
        }
    }
}

/// `None` means no deadline: `timeout` is too large to represent.
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

fn is_past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

/// Runs `future` unless `cancel` fires first, in which case `None` is
/// returned and `future` is dropped.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Polling cancelled");
            None
        }
        output = future => Some(output),
    }
}
