//! Stdio pumps.
//!
//! One task per stream, each independent of the others and of the
//! operation wait. A full pipe on one stream can never stall another.

use super::request::StdioSink;
use crate::service::{BoxedReader, BoxedWriter};
use corral_shared::OperationId;
use corral_shared::errors::{CorralError, CorralResult};
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type OutputTask = JoinHandle<io::Result<Option<Vec<u8>>>>;

/// Captured bytes per output stream (`None` unless the sink was `Capture`).
pub(super) struct DrainedOutput {
    pub stdout: Option<Vec<u8>>,
    pub stderr: Option<Vec<u8>>,
}

/// Running stdio tasks of one exec.
pub(super) struct StdioPumps {
    execution_id: OperationId,
    stdout: Option<OutputTask>,
    stderr: Option<OutputTask>,
    stdin: Option<JoinHandle<io::Result<()>>>,
    shutdown: CancellationToken,
}

impl StdioPumps {
    /// Spawn the pumps. `stdin_source` is copied into the remote stdin; with
    /// no source the remote stdin is closed right away.
    pub(super) fn spawn(
        execution_id: OperationId,
        remote_stdin: BoxedWriter,
        remote_stdout: BoxedReader,
        remote_stderr: BoxedReader,
        stdin_source: Option<BoxedReader>,
        stdout_sink: StdioSink,
        stderr_sink: StdioSink,
    ) -> Self {
        let shutdown = CancellationToken::new();

        let stdout = Self::spawn_output(
            "stdout",
            execution_id.clone(),
            remote_stdout,
            stdout_sink,
            shutdown.clone(),
        );
        let stderr = Self::spawn_output(
            "stderr",
            execution_id.clone(),
            remote_stderr,
            stderr_sink,
            shutdown.clone(),
        );
        let stdin = Self::spawn_input(
            execution_id.clone(),
            stdin_source,
            remote_stdin,
            shutdown.clone(),
        );

        Self {
            execution_id,
            stdout: Some(stdout),
            stderr: Some(stderr),
            stdin: Some(stdin),
            shutdown,
        }
    }

    /// Wait until every stream is fully drained into its sink.
    pub(super) async fn finish(&mut self) -> CorralResult<DrainedOutput> {
        let (stdout, stderr) = futures::future::try_join(
            Self::join_output(self.stdout.take()),
            Self::join_output(self.stderr.take()),
        )
        .await?;

        // Output is complete, so the command is done with its input. A
        // source that is still producing (a terminal, say) is abandoned.
        if let Some(task) = self.stdin.take() {
            if !task.is_finished() {
                tracing::debug!(execution_id = %self.execution_id, "Abandoning unfinished stdin");
                task.abort();
            } else {
                match task.await {
                    Ok(Ok(())) => {}
                    // The command may exit without reading all of its input.
                    Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                        tracing::debug!(execution_id = %self.execution_id, "Remote stdin closed early");
                    }
                    Ok(Err(e)) => return Err(CorralError::Io(e)),
                    Err(e) => {
                        return Err(CorralError::Internal(format!("stdin pump failed: {}", e)));
                    }
                }
            }
        }

        tracing::debug!(execution_id = %self.execution_id, "Stdio drained");
        Ok(DrainedOutput { stdout, stderr })
    }

    /// Tear the pumps down without waiting for them, closing every handle.
    pub(super) fn shutdown(&mut self) {
        self.shutdown.cancel();
        if self.stdout.is_none() && self.stderr.is_none() && self.stdin.is_none() {
            return;
        }
        tracing::debug!(execution_id = %self.execution_id, "Tearing down stdio pumps");
        for task in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            task.abort();
        }
        if let Some(task) = self.stdin.take() {
            task.abort();
        }
    }

    async fn join_output(task: Option<OutputTask>) -> CorralResult<Option<Vec<u8>>> {
        match task {
            Some(task) => match task.await {
                Ok(result) => Ok(result?),
                Err(e) => Err(CorralError::Internal(format!("output pump failed: {}", e))),
            },
            None => Err(CorralError::Internal("output pump already consumed".into())),
        }
    }

    fn spawn_output(
        stream: &'static str,
        execution_id: OperationId,
        reader: BoxedReader,
        sink: StdioSink,
        shutdown: CancellationToken,
    ) -> OutputTask {
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(execution_id = %execution_id, stream, "Output pump interrupted");
                    Err(io::Error::new(io::ErrorKind::Interrupted, "stdio pump shut down"))
                }
                result = drain(reader, sink) => {
                    match &result {
                        Ok(captured) => tracing::trace!(
                            execution_id = %execution_id,
                            stream,
                            captured = captured.as_ref().map(Vec::len),
                            "Output stream ended"
                        ),
                        Err(e) => tracing::debug!(
                            execution_id = %execution_id,
                            stream,
                            error = %e,
                            "Output stream failed"
                        ),
                    }
                    result
                }
            }
        })
    }

    fn spawn_input(
        execution_id: OperationId,
        source: Option<BoxedReader>,
        mut remote: BoxedWriter,
        shutdown: CancellationToken,
    ) -> JoinHandle<io::Result<()>> {
        tokio::spawn(async move {
            let Some(mut source) = source else {
                // No input: signal EOF immediately.
                return remote.shutdown().await;
            };

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(execution_id = %execution_id, "Stdin pump interrupted");
                    Ok(())
                }
                result = async {
                    let bytes = tokio::io::copy(&mut source, &mut remote).await?;
                    tracing::trace!(execution_id = %execution_id, bytes, "Stdin forwarded");
                    remote.shutdown().await
                } => result,
            }
        })
    }
}

impl Drop for StdioPumps {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn drain(mut reader: BoxedReader, sink: StdioSink) -> io::Result<Option<Vec<u8>>> {
    match sink {
        StdioSink::Discard => {
            tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
            Ok(None)
        }
        StdioSink::Capture => {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await?;
            Ok(Some(buf))
        }
        StdioSink::Stream(mut writer) => {
            tokio::io::copy(&mut reader, &mut writer).await?;
            writer.flush().await?;
            Ok(None)
        }
    }
}
