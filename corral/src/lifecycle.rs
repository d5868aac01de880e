//! Instance lifecycle management
//!
//! Sequences create → start against the service. Ordering is enforced by
//! types rather than by polling: a start can only be requested for a
//! [`CreatedInstance`], and the only way to get one is a create operation
//! that finished successfully (or an explicit statement that the instance
//! already exists).

use crate::operation::OperationTracker;
use crate::options::{CorralOptions, PollOptions};
use crate::service::ServiceHandle;
use corral_shared::errors::CorralResult;
use corral_shared::{
    InstanceSpec, InstanceState, OperationId, OperationKind, StateAction, StateChange, Timeout,
};
use tokio_util::sync::CancellationToken;

/// Proof that an instance exists on the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CreatedInstance {
    name: String,
}

impl CreatedInstance {
    /// Refer to an instance that exists independently of this process.
    ///
    /// The caller vouches for its existence; nothing is checked.
    pub fn assume_existing(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Tracker for a create operation.
///
/// Waiting to success yields the [`CreatedInstance`] needed to start it.
#[derive(Debug)]
pub struct CreateTracker {
    name: String,
    tracker: OperationTracker,
}

impl CreateTracker {
    /// Name of the instance being created.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut OperationTracker {
        &mut self.tracker
    }

    /// Wait for the create to finish; see [`OperationTracker::wait`].
    ///
    /// On success the instance exists in the stopped state.
    pub async fn wait(
        &mut self,
        timeout: Timeout,
        cancel: &CancellationToken,
    ) -> CorralResult<CreatedInstance> {
        self.tracker.wait(timeout, cancel).await?;
        tracing::info!(instance = %self.name, "Instance created");
        Ok(CreatedInstance {
            name: self.name.clone(),
        })
    }

    pub fn into_tracker(self) -> OperationTracker {
        self.tracker
    }
}

/// Drives instance create / start / stop against the service.
#[derive(Clone)]
pub struct InstanceLifecycleManager {
    service: ServiceHandle,
    poll: PollOptions,
}

impl InstanceLifecycleManager {
    pub fn new(service: ServiceHandle, options: &CorralOptions) -> Self {
        Self {
            service,
            poll: options.poll.clone(),
        }
    }

    /// Submit an instance for creation.
    ///
    /// Fails fast with a validation error, before any remote call, if the
    /// name is empty or an image source has no alias.
    pub async fn create_instance(&self, spec: InstanceSpec) -> CorralResult<CreateTracker> {
        spec.validate()?;

        tracing::info!(
            instance = %spec.name,
            source = ?spec.source_type,
            alias = %spec.image_alias,
            kind = spec.instance_kind.as_str(),
            "Creating instance"
        );
        let id = self.service.create_instance(&spec).await?;

        Ok(CreateTracker {
            name: spec.name,
            tracker: self.track(id, OperationKind::Create),
        })
    }

    /// Request a start.
    ///
    /// `timeout` is handed to the remote side; [`Timeout::Infinite`] means it
    /// never auto-cancels the start on its own. Bounding the local wait is up
    /// to the caller of [`OperationTracker::wait`].
    pub async fn start_instance(
        &self,
        instance: &CreatedInstance,
        timeout: Timeout,
    ) -> CorralResult<OperationTracker> {
        self.change_state(instance, StateChange::new(StateAction::Start, timeout))
            .await
    }

    /// Request a stop. `force` kills the instance instead of shutting it down.
    pub async fn stop_instance(
        &self,
        instance: &CreatedInstance,
        timeout: Timeout,
        force: bool,
    ) -> CorralResult<OperationTracker> {
        self.change_state(
            instance,
            StateChange::new(StateAction::Stop, timeout).force(force),
        )
        .await
    }

    /// Request a restart.
    pub async fn restart_instance(
        &self,
        instance: &CreatedInstance,
        timeout: Timeout,
        force: bool,
    ) -> CorralResult<OperationTracker> {
        self.change_state(
            instance,
            StateChange::new(StateAction::Restart, timeout).force(force),
        )
        .await
    }

    /// Current state as reported by the service.
    pub async fn state(&self, instance: &CreatedInstance) -> CorralResult<InstanceState> {
        self.service.instance_state(instance.name()).await
    }

    /// Create and start in one go, waiting on each step.
    pub async fn provision(
        &self,
        spec: InstanceSpec,
        options: &CorralOptions,
        cancel: &CancellationToken,
    ) -> CorralResult<CreatedInstance> {
        let mut create = self.create_instance(spec).await?;
        let instance = create.wait(options.create_timeout(), cancel).await?;

        let mut start = self.start_instance(&instance, options.start_timeout()).await?;
        start.wait(options.start_timeout(), cancel).await?;
        tracing::info!(instance = %instance.name(), "Instance started");

        Ok(instance)
    }

    async fn change_state(
        &self,
        instance: &CreatedInstance,
        change: StateChange,
    ) -> CorralResult<OperationTracker> {
        tracing::info!(
            instance = %instance.name(),
            action = %change.action,
            timeout = change.timeout.as_secs(),
            force = change.force,
            "Updating instance state"
        );
        let id = self.service.update_state(instance.name(), change).await?;
        let kind = match change.action {
            StateAction::Start => OperationKind::Start,
            StateAction::Stop => OperationKind::Stop,
            StateAction::Restart => OperationKind::Restart,
        };
        Ok(self.track(id, kind))
    }

    fn track(&self, id: OperationId, kind: OperationKind) -> OperationTracker {
        OperationTracker::new(self.service.clone(), id, kind, self.poll.clone())
    }
}

