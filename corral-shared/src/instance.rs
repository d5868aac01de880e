//! Instance descriptions and state-change requests.

use crate::errors::{CorralError, CorralResult};
use crate::timeout::Timeout;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the root filesystem of a new instance comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Built from an image resolved by alias.
    Image,
    /// Copied from an existing snapshot.
    Snapshot,
    /// Empty instance, no root filesystem source.
    None,
}

/// Virtualization flavour of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceKind {
    #[default]
    Container,
    VirtualMachine,
}

impl InstanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceKind::Container => "container",
            InstanceKind::VirtualMachine => "virtual-machine",
        }
    }
}

/// Description of an instance to create.
///
/// Immutable once submitted: the lifecycle manager takes it by value.
///
/// # Examples
///
/// ```
/// use corral_shared::{InstanceKind, InstanceSpec};
///
/// let spec = InstanceSpec::from_image("c1", "ubuntu-22.04").kind(InstanceKind::Container);
/// assert!(spec.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    pub source_type: SourceType,
    /// Image alias, required when `source_type` is [`SourceType::Image`].
    #[serde(default)]
    pub image_alias: String,
    #[serde(default)]
    pub instance_kind: InstanceKind,
}

impl InstanceSpec {
    /// Spec for an instance built from an image alias.
    pub fn from_image(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: SourceType::Image,
            image_alias: alias.into(),
            instance_kind: InstanceKind::Container,
        }
    }

    /// Spec for an instance with no root filesystem source.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: SourceType::None,
            image_alias: String::new(),
            instance_kind: InstanceKind::Container,
        }
    }

    pub fn kind(mut self, kind: InstanceKind) -> Self {
        self.instance_kind = kind;
        self
    }

    /// Reject specs the service would refuse anyway.
    pub fn validate(&self) -> CorralResult<()> {
        if self.name.trim().is_empty() {
            return Err(CorralError::Validation(
                "instance name must not be empty".into(),
            ));
        }
        if self.source_type == SourceType::Image && self.image_alias.trim().is_empty() {
            return Err(CorralError::Validation(format!(
                "instance '{}' uses an image source but no image alias was given",
                self.name
            )));
        }
        Ok(())
    }
}

/// Observed state of an instance. Owned by the service, never stored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Stopped,
    Running,
    Unknown,
}

impl InstanceState {
    pub fn is_running(&self) -> bool {
        matches!(self, InstanceState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Stopped => "stopped",
            InstanceState::Running => "running",
            InstanceState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateAction {
    Start,
    Stop,
    Restart,
}

impl StateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateAction::Start => "start",
            StateAction::Stop => "stop",
            StateAction::Restart => "restart",
        }
    }
}

impl fmt::Display for StateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a state update request.
///
/// `timeout` bounds the remote side's own wait (e.g. for a clean shutdown);
/// [`Timeout::Infinite`] means the remote side never gives up on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub action: StateAction,
    pub timeout: Timeout,
    #[serde(default)]
    pub force: bool,
}

impl StateChange {
    pub fn new(action: StateAction, timeout: Timeout) -> Self {
        Self {
            action,
            timeout,
            force: false,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Contiguous range translation between container and host group ids.
///
/// Maps `[container_id, container_id + size)` onto `[host_id, host_id + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupMapping {
    pub container_id: u32,
    pub host_id: u32,
    pub size: u32,
}

impl GroupMapping {
    pub const fn new(container_id: u32, host_id: u32, size: u32) -> Self {
        Self {
            container_id,
            host_id,
            size,
        }
    }

    /// One-to-one mapping of a single id.
    pub const fn identity(id: u32) -> Self {
        Self::new(id, id, 1)
    }

    /// Exclusive end of the container range, widened so it cannot overflow.
    pub fn container_end(&self) -> u64 {
        u64::from(self.container_id) + u64::from(self.size)
    }

    /// Exclusive end of the host range, widened so it cannot overflow.
    pub fn host_end(&self) -> u64 {
        u64::from(self.host_id) + u64::from(self.size)
    }
}

impl fmt::Display for GroupMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}) -> [{}, {})",
            self.container_id,
            self.container_end(),
            self.host_id,
            self.host_end()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_validation() {
        assert!(InstanceSpec::from_image("c1", "ubuntu-22.04").validate().is_ok());
        assert!(InstanceSpec::empty("c1").validate().is_ok());

        let err = InstanceSpec::from_image("", "ubuntu-22.04")
            .validate()
            .unwrap_err();
        assert!(matches!(err, CorralError::Validation(_)));

        let err = InstanceSpec::from_image("c1", "  ").validate().unwrap_err();
        assert!(matches!(err, CorralError::Validation(_)));
    }

    #[test]
    fn test_snapshot_source_does_not_need_alias() {
        let spec = InstanceSpec {
            name: "c1".into(),
            source_type: SourceType::Snapshot,
            image_alias: String::new(),
            instance_kind: InstanceKind::VirtualMachine,
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_spec_serde_names() {
        let spec = InstanceSpec::from_image("c1", "alpine").kind(InstanceKind::VirtualMachine);
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["source_type"], "image");
        assert_eq!(json["instance_kind"], "virtual-machine");
    }

    #[test]
    fn test_state_change_timeout_serializes_as_seconds() {
        let change = StateChange::new(StateAction::Start, Timeout::Infinite);
        let json = serde_json::to_value(change).unwrap();
        assert_eq!(json["action"], "start");
        assert_eq!(json["timeout"], -1);
        assert_eq!(json["force"], false);
    }

    #[test]
    fn test_group_mapping_ends_do_not_overflow() {
        let m = GroupMapping::new(u32::MAX, u32::MAX, u32::MAX);
        assert_eq!(m.container_end(), 2 * u64::from(u32::MAX));
        assert_eq!(GroupMapping::identity(27).to_string(), "[27, 28) -> [27, 28)");
    }
}
