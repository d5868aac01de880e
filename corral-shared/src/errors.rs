//! Error taxonomy for corral.
//!
//! Every failure is surfaced to the caller as a typed value. The core never
//! retries; [`CorralError::is_retryable`] only tells a higher layer which
//! failures are worth retrying.

use crate::instance::GroupMapping;
use crate::operation::OperationId;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for corral operations.
pub type CorralResult<T> = Result<T, CorralError>;

/// Errors that can occur while orchestrating an instance.
#[derive(Debug, Error)]
pub enum CorralError {
    /// The instance management service could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed instance spec or exec request (caller bug).
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid uid/gid or group mapping.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// The operation did not reach a terminal status in time.
    #[error("operation {operation} did not finish within {waited:?}")]
    Timeout {
        operation: OperationId,
        waited: Duration,
    },

    /// The wait was cancelled locally or the remote side cancelled the operation.
    #[error("operation {operation} was cancelled")]
    Cancelled { operation: OperationId },

    /// The remote side reported a failure.
    #[error("operation {operation} failed: {reason}")]
    RemoteFailure {
        operation: OperationId,
        reason: String,
    },

    /// Operation metadata did not have the expected shape.
    #[error("malformed operation result: {0}")]
    MalformedResult(String),

    /// Captured command output did not match the expected pattern.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Local stdio pumping failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant broken (closed channel, dead task).
    #[error("internal error: {0}")]
    Internal(String),
}

impl CorralError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CorralError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CorralError::Cancelled { .. })
    }

    /// Whether a caller may reasonably retry the failed step.
    ///
    /// Validation, identity and parse failures are caller bugs and will fail
    /// the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CorralError::Timeout { .. } | CorralError::Cancelled { .. } | CorralError::Connection(_)
        )
    }
}

// ============================================================================
// Identity errors
// ============================================================================

/// Which id space a group mapping range lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdSpace {
    Container,
    Host,
}

impl fmt::Display for IdSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdSpace::Container => f.write_str("container"),
            IdSpace::Host => f.write_str("host"),
        }
    }
}

/// Rejected uid/gid or group mapping configuration.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// A mapping covers no ids.
    #[error("group mapping #{index} has size 0")]
    EmptyRange { index: usize },

    /// A mapping runs past the end of the 32-bit id space.
    #[error("group mapping #{index} overflows the 32-bit id space")]
    RangeOverflow { index: usize },

    /// Two mappings claim overlapping ids in the same space.
    #[error("{space} id ranges overlap: {first} and {second}")]
    OverlappingRange {
        space: IdSpace,
        first: GroupMapping,
        second: GroupMapping,
    },
}

impl IdentityError {
    /// The two mappings that collide, if this is an overlap.
    pub fn offending_pair(&self) -> Option<(&GroupMapping, &GroupMapping)> {
        match self {
            IdentityError::OverlappingRange { first, second, .. } => Some((first, second)),
            _ => None,
        }
    }
}

// ============================================================================
// Parse errors
// ============================================================================

/// Category of output parsing failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParseErrorKind {
    /// The text does not have the expected shape.
    FormatMismatch,
    /// The matched field is not a valid number of the target width.
    NumericConversion,
    /// The pattern itself could not be compiled.
    InvalidPattern,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorKind::FormatMismatch => f.write_str("format mismatch"),
            ParseErrorKind::NumericConversion => f.write_str("numeric conversion failed"),
            ParseErrorKind::InvalidPattern => f.write_str("invalid pattern"),
        }
    }
}

/// Output text could not be turned into a typed value.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub input: String,
    pub detail: Option<String>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for input {:?}", self.kind, self.input)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

impl ParseError {
    pub fn format_mismatch(input: impl Into<String>) -> Self {
        Self {
            kind: ParseErrorKind::FormatMismatch,
            input: input.into(),
            detail: None,
        }
    }

    pub fn numeric_conversion(input: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: ParseErrorKind::NumericConversion,
            input: input.into(),
            detail: Some(detail.into()),
        }
    }

    pub fn invalid_pattern(pattern: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: ParseErrorKind::InvalidPattern,
            input: pattern.into(),
            detail: Some(detail.into()),
        }
    }
}
