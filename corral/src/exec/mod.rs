//! Command execution
//!
//! Issues exec requests against a running instance and drains the command's
//! stdio while the caller waits for the operation to finish.
//!
//! Four paths run concurrently for every exec: stdout drain, stderr drain,
//! stdin feed and the operation wait. None of them waits on another, so a
//! command filling one pipe can never deadlock the others.

mod pump;
mod request;

pub use request::{ExecRequest, StdioSink};

use crate::identity::IdentityMapper;
use crate::operation::{OperationTracker, deadline_elapsed};
use crate::options::{CorralOptions, PollOptions};
use crate::service::{ExecPost, ServiceHandle};
use corral_shared::constants::metadata;
use corral_shared::errors::{CorralError, CorralResult};
use corral_shared::{Operation, OperationId, OperationKind, Timeout};
use pump::{DrainedOutput, StdioPumps};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of a finished command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecResult {
    /// Exit code reported by the remote side.
    pub exit_code: i32,
    /// Captured stdout, present only for [`StdioSink::Capture`].
    pub stdout: Option<Vec<u8>>,
    /// Captured stderr, present only for [`StdioSink::Capture`].
    pub stderr: Option<Vec<u8>>,
}

impl ExecResult {
    /// Returns true if the exit code was 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Captured stdout as text, lossily decoded.
    pub fn stdout_text(&self) -> Option<String> {
        self.stdout
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Captured stderr as text, lossily decoded.
    pub fn stderr_text(&self) -> Option<String> {
        self.stderr
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

/// Issues exec requests.
#[derive(Clone)]
pub struct ExecSession {
    service: ServiceHandle,
    poll: PollOptions,
}

impl ExecSession {
    pub fn new(service: ServiceHandle, options: &CorralOptions) -> Self {
        Self {
            service,
            poll: options.poll.clone(),
        }
    }

    /// Launch `request` inside `instance`.
    ///
    /// The identity is validated here even if the caller already did so; an
    /// invalid identity fails with [`CorralError::Identity`] before anything
    /// is sent. Stdio pumps start immediately and keep running while the
    /// caller waits on the returned [`Execution`]. With `wait_for_attach`
    /// this returns only once the remote side acknowledged the stdio attach;
    /// firing `cancel` meanwhile cancels the remote command and tears the
    /// pumps down.
    pub async fn execute(
        &self,
        instance: &str,
        request: ExecRequest,
        cancel: &CancellationToken,
    ) -> CorralResult<Execution> {
        request.validate()?;
        let identity = IdentityMapper::validate(
            request.identity.uid,
            request.identity.gid,
            &request.identity.group_mappings,
        )?;

        let ExecRequest {
            command,
            environment,
            interactive,
            wait_for_attach,
            stdin,
            stdout,
            stderr,
            ..
        } = request;

        tracing::debug!(
            instance,
            ?command,
            uid = identity.uid(),
            gid = identity.gid(),
            group_mappings = identity.group_mappings().len(),
            interactive,
            wait_for_attach,
            "Starting execution"
        );

        let post = ExecPost {
            command,
            environment,
            identity,
            interactive,
            wait_for_attach,
        };
        let channels = self.service.exec(instance, post).await?;
        let execution_id = channels.operation.clone();

        let mut pumps = StdioPumps::spawn(
            execution_id.clone(),
            channels.stdin,
            channels.stdout,
            channels.stderr,
            stdin,
            stdout,
            stderr,
        );

        let mut tracker = OperationTracker::new(
            self.service.clone(),
            execution_id.clone(),
            OperationKind::Exec,
            self.poll.clone(),
        );

        if wait_for_attach {
            let attached = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                attached = channels.attached => Some(attached),
            };
            match attached {
                Some(Ok(())) => {
                    tracing::debug!(execution_id = %execution_id, "Stdio attached");
                }
                Some(Err(_)) => {
                    pumps.shutdown();
                    return Err(CorralError::Connection(format!(
                        "stdio channel of execution {} closed before attaching",
                        execution_id
                    )));
                }
                None => {
                    tracing::info!(execution_id = %execution_id, "Cancelled while attaching");
                    pumps.shutdown();
                    if let Err(e) = tracker.cancel().await {
                        tracing::warn!(
                            execution_id = %execution_id,
                            error = %e,
                            "Remote cancellation failed"
                        );
                    }
                    return Err(CorralError::Cancelled {
                        operation: execution_id,
                    });
                }
            }
        }

        Ok(Execution {
            tracker,
            pumps,
            cached_result: None,
            drain_failure: None,
        })
    }
}

/// Handle to a running command.
///
/// Similar to `std::process::Child`, but the process lives in a remote
/// instance. Dropping it tears down the stdio pumps.
pub struct Execution {
    tracker: OperationTracker,
    pumps: StdioPumps,
    cached_result: Option<ExecResult>,
    /// Set once output was lost; later waits report it again.
    drain_failure: Option<CorralError>,
}

impl Execution {
    /// Operation id of this execution.
    pub fn id(&self) -> &OperationId {
        self.tracker.id()
    }

    pub fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    /// Wait for the command to finish and its output to be fully drained.
    ///
    /// `timeout` and `cancel` bound both phases. While the command runs, the
    /// remote operation is asked to cancel and the local stdio pumps are torn
    /// down right away. If the command finished but its stdio stays open, the
    /// pumps are torn down and the captured output is lost.
    ///
    /// Once a result has been returned, later calls return the same result.
    /// Once output was lost, later calls return the same error.
    pub async fn wait(
        &mut self,
        timeout: Timeout,
        cancel: &CancellationToken,
    ) -> CorralResult<ExecResult> {
        if let Some(result) = &self.cached_result {
            return Ok(result.clone());
        }
        if let Some(err) = &self.drain_failure {
            return Err(replay(err));
        }

        let started = Instant::now();
        let deadline = timeout.duration().map(|d| started + d);

        let op = match self.tracker.wait(timeout, cancel).await {
            Ok(op) => op,
            Err(e) => {
                self.pumps.shutdown();
                return Err(e);
            }
        };

        let exit_code = match exit_code(&op) {
            Ok(code) => code,
            Err(e) => {
                self.pumps.shutdown();
                return Err(e);
            }
        };

        let drained = match self.drain(started, deadline, cancel).await {
            Ok(drained) => drained,
            Err(e) => {
                self.pumps.shutdown();
                self.drain_failure = Some(replay(&e));
                return Err(e);
            }
        };
        let result = ExecResult {
            exit_code,
            stdout: drained.stdout,
            stderr: drained.stderr,
        };

        tracing::info!(execution_id = %self.id(), exit_code, "Execution finished");
        self.cached_result = Some(result.clone());
        Ok(result)
    }

    /// Data-done barrier, bounded by the same deadline and signal as the
    /// operation wait.
    async fn drain(
        &mut self,
        started: Instant,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> CorralResult<DrainedOutput> {
        let operation = self.tracker.id().clone();
        tokio::select! {
            biased;
            drained = self.pumps.finish() => drained,
            _ = cancel.cancelled() => {
                tracing::info!(execution_id = %operation, "Wait cancelled while draining stdio");
                Err(CorralError::Cancelled { operation })
            }
            _ = deadline_elapsed(deadline) => {
                let waited = started.elapsed();
                tracing::warn!(
                    execution_id = %operation,
                    ?waited,
                    "Stdio still open after the command finished"
                );
                Err(CorralError::Timeout { operation, waited })
            }
        }
    }

    /// Cancel the remote command and stop pumping its stdio.
    pub async fn cancel(&mut self) -> CorralResult<()> {
        self.pumps.shutdown();
        self.tracker.cancel().await
    }
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution")
            .field("tracker", &self.tracker)
            .field("cached_result", &self.cached_result)
            .finish()
    }
}

/// Rebuild a drain failure so it can be reported more than once.
fn replay(err: &CorralError) -> CorralError {
    match err {
        CorralError::Timeout { operation, waited } => CorralError::Timeout {
            operation: operation.clone(),
            waited: *waited,
        },
        CorralError::Cancelled { operation } => CorralError::Cancelled {
            operation: operation.clone(),
        },
        CorralError::Io(e) => CorralError::Io(std::io::Error::new(e.kind(), e.to_string())),
        other => CorralError::Internal(other.to_string()),
    }
}

/// Extract the exit code from exec operation metadata.
///
/// The metadata is loosely typed, so anything other than an integer that
/// fits in 32 bits is rejected rather than coerced.
pub fn exit_code(op: &Operation) -> CorralResult<i32> {
    let value = op.metadata.get(metadata::EXIT_CODE).ok_or_else(|| {
        CorralError::MalformedResult(format!(
            "operation {} has no '{}' metadata",
            op.id,
            metadata::EXIT_CODE
        ))
    })?;

    value
        .as_i64()
        .and_then(|code| i32::try_from(code).ok())
        .ok_or_else(|| {
            CorralError::MalformedResult(format!(
                "operation {} has non-integer exit code {}",
                op.id, value
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_shared::OperationStatus;
    use serde_json::json;

    fn finished_exec(metadata: serde_json::Value) -> Operation {
        let mut op = Operation::pending("op-exec", OperationKind::Exec);
        op.status = OperationStatus::Success;
        op.metadata = metadata.as_object().cloned().unwrap_or_default();
        op
    }

    #[test]
    fn test_exit_code_extracted() {
        assert_eq!(exit_code(&finished_exec(json!({"return": 0}))).unwrap(), 0);
        assert_eq!(exit_code(&finished_exec(json!({"return": 127}))).unwrap(), 127);
        assert_eq!(exit_code(&finished_exec(json!({"return": -9}))).unwrap(), -9);
    }

    #[test]
    fn test_missing_exit_code_is_malformed() {
        let err = exit_code(&finished_exec(json!({}))).unwrap_err();
        assert!(matches!(err, CorralError::MalformedResult(_)));
    }

    #[test]
    fn test_non_integer_exit_code_is_malformed() {
        for value in [json!("0"), json!(1.5), json!(null), json!(true), json!(1u64 << 40)] {
            let err = exit_code(&finished_exec(json!({ "return": value }))).unwrap_err();
            assert!(matches!(err, CorralError::MalformedResult(_)), "{value}");
        }
    }

    #[test]
    fn test_exec_result_text_accessors() {
        let result = ExecResult {
            exit_code: 0,
            stdout: Some(b"hi\n".to_vec()),
            stderr: None,
        };
        assert!(result.success());
        assert_eq!(result.stdout_text().as_deref(), Some("hi\n"));
        assert_eq!(result.stderr_text(), None);
    }
}
