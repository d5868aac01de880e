//! End-to-end flows composed from the lifecycle, exec and output layers.

use crate::exec::{ExecRequest, ExecResult, ExecSession};
use crate::lifecycle::InstanceLifecycleManager;
use crate::options::CorralOptions;
use crate::output::{OutputParser, OutputPattern};
use crate::service::ServiceHandle;
use corral_shared::InstanceSpec;
use corral_shared::errors::{CorralError, CorralResult};
use tokio_util::sync::CancellationToken;

/// Create and start a new instance, run `request` inside it and return the
/// command's result.
///
/// Each step is bounded by the matching timeout in `options`. The instance is
/// left running.
pub async fn run_in_new_instance(
    service: ServiceHandle,
    options: &CorralOptions,
    spec: InstanceSpec,
    request: ExecRequest,
    cancel: &CancellationToken,
) -> CorralResult<ExecResult> {
    let lifecycle = InstanceLifecycleManager::new(service.clone(), options);
    let instance = lifecycle.provision(spec, options, cancel).await?;

    let session = ExecSession::new(service, options);
    let mut execution = session.execute(instance.name(), request, cancel).await?;
    execution.wait(options.exec_timeout(), cancel).await
}

/// Look up the gid of `group` inside a running instance.
///
/// Runs `getent group <group>` under the identity configured in `options`.
pub async fn lookup_group_id(
    service: ServiceHandle,
    options: &CorralOptions,
    instance: &str,
    group: &str,
    cancel: &CancellationToken,
) -> CorralResult<u32> {
    let pattern = OutputPattern::group_line(group)?;
    let request = ExecRequest::new(["getent", "group", group])
        .identity(options.identity.to_identity());

    let session = ExecSession::new(service, options);
    let mut execution = session.execute(instance, request, cancel).await?;
    let result = execution.wait(options.exec_timeout(), cancel).await?;

    if !result.success() {
        return Err(CorralError::RemoteFailure {
            operation: execution.id().clone(),
            reason: format!("getent exited with {} for group '{}'", result.exit_code, group),
        });
    }

    let stdout = result.stdout.unwrap_or_default();
    let gid: u32 = OutputParser::parse_bytes(&pattern, &stdout)?;
    tracing::debug!(instance, group, gid, "Resolved group id");
    Ok(gid)
}
