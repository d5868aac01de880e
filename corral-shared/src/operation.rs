//! Long-running remote operations.
//!
//! Every mutating call against the service returns an operation that moves
//! through a small state machine:
//!
//! ```text
//! Pending → Running → Success
//!                   → Failure
//!                   → Cancelled
//! ```
//!
//! Success, Failure and Cancelled are terminal.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Opaque operation identifier assigned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OperationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for OperationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the operation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Start,
    Stop,
    Restart,
    Exec,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Start => "start",
            OperationKind::Stop => "stop",
            OperationKind::Restart => "restart",
            OperationKind::Exec => "exec",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl OperationStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Success | OperationStatus::Failure | OperationStatus::Cancelled
        )
    }

    /// Check if the service may move an operation from `self` to `target`.
    pub fn can_transition_to(&self, target: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, target),
            (Pending, Running)
                | (Pending, Success)
                | (Pending, Failure)
                | (Pending, Cancelled)
                | (Running, Success)
                | (Running, Failure)
                | (Running, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Running => "running",
            OperationStatus::Success => "success",
            OperationStatus::Failure => "failure",
            OperationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OperationStatus::Pending),
            "running" => Ok(OperationStatus::Running),
            "success" => Ok(OperationStatus::Success),
            "failure" => Ok(OperationStatus::Failure),
            "cancelled" => Ok(OperationStatus::Cancelled),
            _ => Err(()),
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a remote operation as reported by the service.
///
/// `metadata` is loosely typed; consumers must extract fields through a
/// fallible step rather than assume their shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub status: OperationStatus,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Remote-provided failure reason.
    #[serde(default)]
    pub error: Option<String>,
}

impl Operation {
    /// A freshly submitted operation.
    pub fn pending(id: impl Into<OperationId>, kind: OperationKind) -> Self {
        Self {
            id: id.into(),
            kind,
            status: OperationStatus::Pending,
            metadata: Map::new(),
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!OperationStatus::Pending.is_terminal());
        assert!(!OperationStatus::Running.is_terminal());
        assert!(OperationStatus::Success.is_terminal());
        assert!(OperationStatus::Failure.is_terminal());
        assert!(OperationStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_terminal_statuses_are_final() {
        use OperationStatus::*;
        for terminal in [Success, Failure, Cancelled] {
            for target in [Pending, Running, Success, Failure, Cancelled] {
                assert!(!terminal.can_transition_to(target));
            }
        }
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Running.can_transition_to(Pending));
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("pending".parse(), Ok(OperationStatus::Pending));
        assert_eq!("cancelled".parse(), Ok(OperationStatus::Cancelled));
        assert!("done".parse::<OperationStatus>().is_err());
    }

    #[test]
    fn test_operation_deserializes_with_missing_metadata() {
        let op: Operation =
            serde_json::from_str(r#"{"id":"op-7","kind":"exec","status":"running"}"#).unwrap();
        assert_eq!(op.id.as_str(), "op-7");
        assert_eq!(op.kind, OperationKind::Exec);
        assert!(op.metadata.is_empty());
        assert!(!op.is_terminal());
    }
}
