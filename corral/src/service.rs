//! Instance management service interface.
//!
//! The orchestrator never talks to a virtualization backend directly. It
//! consumes this capability trait through an explicit [`ServiceHandle`]
//! that is created once at startup and passed into every component.

use crate::identity::ValidatedIdentity;
use async_trait::async_trait;
use corral_shared::{
    CorralResult, InstanceSpec, InstanceState, Operation, OperationId, StateChange,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

/// Read half of a stdio stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a stdio stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared, read-only handle to the service.
pub type ServiceHandle = Arc<dyn InstanceService>;

/// Exec request as submitted to the service.
///
/// Only carries an identity that already passed validation.
#[derive(Debug, Clone)]
pub struct ExecPost {
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub identity: ValidatedIdentity,
    pub interactive: bool,
    /// Hold the command until the stdio channel is attached.
    pub wait_for_attach: bool,
}

/// Stdio side channel of an exec, plus its operation.
pub struct ExecChannels {
    pub operation: OperationId,
    /// Remote stdin. Dropping or shutting it down signals EOF.
    pub stdin: BoxedWriter,
    pub stdout: BoxedReader,
    pub stderr: BoxedReader,
    /// Fires once the remote side considers the stdio channel attached.
    pub attached: oneshot::Receiver<()>,
}

/// Capabilities the orchestrator needs from the instance management service.
#[async_trait]
pub trait InstanceService: Send + Sync {
    /// Submit an instance for creation.
    async fn create_instance(&self, spec: &InstanceSpec) -> CorralResult<OperationId>;

    /// Request a state transition (start, stop, restart).
    async fn update_state(&self, name: &str, change: StateChange) -> CorralResult<OperationId>;

    /// Launch a command and open its stdio side channel.
    async fn exec(&self, name: &str, post: ExecPost) -> CorralResult<ExecChannels>;

    /// Current snapshot of an operation.
    async fn get_operation(&self, id: &OperationId) -> CorralResult<Operation>;

    /// Ask the service to cancel an operation. Best effort.
    async fn cancel_operation(&self, id: &OperationId) -> CorralResult<()>;

    /// Derived state of an instance.
    async fn instance_state(&self, name: &str) -> CorralResult<InstanceState>;
}
