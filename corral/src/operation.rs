//! Waiting on long-running remote operations.
//!
//! Every mutating service call hands back an operation id. An
//! [`OperationTracker`] owns that id for its lifetime and turns it into a
//! typed terminal result, honouring a timeout and a cancellation signal.

use crate::options::PollOptions;
use crate::service::ServiceHandle;
use corral_shared::errors::{CorralError, CorralResult};
use corral_shared::{Operation, OperationId, OperationKind, OperationStatus, Timeout};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Tracks one remote operation until it reaches a terminal status.
///
/// Owned exclusively by the control flow that issued the operation. The
/// terminal snapshot is cached, so waiting again after completion returns the
/// same result without touching the service.
///
/// # Examples
///
/// ```rust,no_run
/// # async fn example(mut tracker: corral::OperationTracker) -> corral::CorralResult<()> {
/// use corral::Timeout;
/// use tokio_util::sync::CancellationToken;
///
/// let cancel = CancellationToken::new();
/// let op = tracker.wait(Timeout::from_secs(30), &cancel).await?;
/// println!("operation {} finished: {}", op.id, op.status);
/// # Ok(())
/// # }
/// ```
pub struct OperationTracker {
    id: OperationId,
    kind: OperationKind,
    service: ServiceHandle,
    poll: PollOptions,
    terminal: Option<Operation>,
    cancel_requested: bool,
}

impl OperationTracker {
    pub(crate) fn new(
        service: ServiceHandle,
        id: OperationId,
        kind: OperationKind,
        poll: PollOptions,
    ) -> Self {
        tracing::debug!(operation = %id, %kind, "Tracking operation");
        Self {
            id,
            kind,
            service,
            poll,
            terminal: None,
            cancel_requested: false,
        }
    }

    pub fn id(&self) -> &OperationId {
        &self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Terminal snapshot, once one has been observed.
    pub fn terminal(&self) -> Option<&Operation> {
        self.terminal.as_ref()
    }

    /// Fetch the current snapshot without waiting.
    pub async fn refresh(&mut self) -> CorralResult<Operation> {
        if let Some(op) = &self.terminal {
            return Ok(op.clone());
        }
        let op = self.service.get_operation(&self.id).await?;
        if op.is_terminal() {
            self.terminal = Some(op.clone());
        }
        Ok(op)
    }

    /// Ask the service to cancel the operation.
    ///
    /// Issued at most once per tracker and never for an operation already
    /// known to be terminal.
    pub async fn cancel(&mut self) -> CorralResult<()> {
        if self.cancel_requested || self.terminal.is_some() {
            return Ok(());
        }
        self.cancel_requested = true;
        tracing::info!(operation = %self.id, kind = %self.kind, "Requesting remote cancellation");
        self.service.cancel_operation(&self.id).await
    }

    /// Block until the operation is terminal, `timeout` elapses, or `cancel`
    /// fires, whichever comes first.
    ///
    /// - Success yields the terminal [`Operation`].
    /// - Remote failure yields [`CorralError::RemoteFailure`] with the remote reason.
    /// - Remote or local cancellation yields [`CorralError::Cancelled`].
    /// - An elapsed timeout yields [`CorralError::Timeout`].
    ///
    /// Local timeout and cancellation both send a best-effort cancellation
    /// request to the service. The deadline also bounds each status fetch, so
    /// a stalled service cannot stretch the wait. A fetch that answers
    /// immediately is still honoured with a zero timeout, which reports an
    /// already finished operation instead of cancelling it.
    pub async fn wait(
        &mut self,
        timeout: Timeout,
        cancel: &CancellationToken,
    ) -> CorralResult<Operation> {
        if let Some(op) = &self.terminal {
            return self.outcome(op);
        }

        let service = ServiceHandle::clone(&self.service);
        let id = self.id.clone();
        let started = Instant::now();
        let deadline = timeout.duration().map(|d| started + d);
        let mut interval = self.poll.initial_interval();
        let mut polls = 0u64;

        loop {
            // A fetch that completes without suspending wins over an elapsed
            // deadline, so a zero timeout still sees an already finished
            // operation. A slow fetch never outlives the deadline.
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => Fetch::Cancelled,
                result = service.get_operation(&id) => Fetch::Done(result),
                _ = deadline_elapsed(deadline) => Fetch::TimedOut,
            };
            let op = match fetched {
                Fetch::Done(result) => result?,
                Fetch::Cancelled => return self.abandon_cancelled().await,
                Fetch::TimedOut => return self.abandon_timed_out(started).await,
            };
            polls += 1;

            if op.is_terminal() {
                tracing::debug!(
                    operation = %id,
                    status = %op.status,
                    polls,
                    elapsed = ?started.elapsed(),
                    "Operation reached terminal status"
                );
                let outcome = self.outcome(&op);
                self.terminal = Some(op);
                return outcome;
            }

            let sleep_for = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return self.abandon_timed_out(started).await;
                    }
                    interval.min(deadline - now)
                }
                None => interval,
            };

            tracing::trace!(operation = %id, status = %op.status, ?sleep_for, "Operation pending");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.abandon_cancelled().await,
                _ = tokio::time::sleep(sleep_for) => {}
            }
            interval = self.poll.next_interval(interval);
        }
    }

    fn outcome(&self, op: &Operation) -> CorralResult<Operation> {
        match op.status {
            OperationStatus::Success => Ok(op.clone()),
            OperationStatus::Failure => Err(CorralError::RemoteFailure {
                operation: op.id.clone(),
                reason: op
                    .error
                    .clone()
                    .unwrap_or_else(|| "no reason given".to_string()),
            }),
            OperationStatus::Cancelled => Err(CorralError::Cancelled {
                operation: op.id.clone(),
            }),
            OperationStatus::Pending | OperationStatus::Running => Err(CorralError::Internal(
                format!("operation {} is not terminal ({})", op.id, op.status),
            )),
        }
    }

    async fn abandon_timed_out(&mut self, started: Instant) -> CorralResult<Operation> {
        let waited = started.elapsed();
        tracing::warn!(operation = %self.id, kind = %self.kind, ?waited, "Operation timed out");
        self.cancel_best_effort().await;
        Err(CorralError::Timeout {
            operation: self.id.clone(),
            waited,
        })
    }

    async fn abandon_cancelled(&mut self) -> CorralResult<Operation> {
        tracing::info!(operation = %self.id, kind = %self.kind, "Wait cancelled");
        self.cancel_best_effort().await;
        Err(CorralError::Cancelled {
            operation: self.id.clone(),
        })
    }

    async fn cancel_best_effort(&mut self) {
        if let Err(e) = self.cancel().await {
            tracing::warn!(
                operation = %self.id,
                error = %e,
                "Remote cancellation failed"
            );
        }
    }
}

enum Fetch {
    Done(CorralResult<Operation>),
    Cancelled,
    TimedOut,
}

/// Resolves once `deadline` has passed; never for `None`.
pub(crate) async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for OperationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationTracker")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("terminal", &self.terminal.as_ref().map(|op| op.status))
            .field("cancel_requested", &self.cancel_requested)
            .finish()
    }
}
