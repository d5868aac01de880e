//! Corral shared types
//!
//! Wire-level types exchanged with the instance management service and the
//! error taxonomy used by every layer of the orchestrator.

pub mod constants;
pub mod errors;
pub mod instance;
pub mod operation;
pub mod timeout;

pub use errors::{CorralError, CorralResult, IdSpace, IdentityError, ParseError, ParseErrorKind};
pub use instance::{
    GroupMapping, InstanceKind, InstanceSpec, InstanceState, SourceType, StateAction, StateChange,
};
pub use operation::{Operation, OperationId, OperationKind, OperationStatus};
pub use timeout::Timeout;
