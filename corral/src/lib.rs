//! Corral - single-instance orchestration over a remote virtualization service
//!
//! Provisions an instance, starts it, runs a command inside it under a
//! validated identity while its stdio is drained concurrently, and parses
//! the captured output into typed values.
//!
//! ## Architecture
//!
//! - `service`: abstract capability interface of the instance management service
//! - `operation`: waiting on long-running remote operations
//! - `lifecycle`: create → start sequencing
//! - `identity`: uid/gid and supplementary group mapping validation
//! - `exec`: command execution and stdio pumping
//! - `output`: typed extraction from captured text
//! - `workflow`: the composed end-to-end flows
//!
//! ```rust,no_run
//! # async fn example(service: corral::ServiceHandle) -> corral::CorralResult<()> {
//! use corral::{CorralOptions, ExecRequest, InstanceSpec, workflow};
//! use tokio_util::sync::CancellationToken;
//!
//! let options = CorralOptions::default();
//! let spec = InstanceSpec::from_image("c1", "ubuntu-22.04");
//! let request = ExecRequest::new(["echo", "hi"]);
//!
//! let result =
//!     workflow::run_in_new_instance(service, &options, spec, request, &CancellationToken::new())
//!         .await?;
//! assert_eq!(result.stdout.as_deref(), Some(&b"hi\n"[..]));
//! # Ok(())
//! # }
//! ```

pub mod exec;
pub mod identity;
pub mod lifecycle;
pub mod logging;
pub mod operation;
pub mod options;
pub mod output;
pub mod service;
pub mod workflow;

pub use corral_shared::{
    CorralError, CorralResult, GroupMapping, IdSpace, IdentityError, InstanceKind, InstanceSpec,
    InstanceState, Operation, OperationId, OperationKind, OperationStatus, ParseError,
    ParseErrorKind, SourceType, StateAction, StateChange, Timeout,
};

pub use exec::{ExecRequest, ExecResult, ExecSession, Execution, StdioSink};
pub use identity::{Identity, IdentityMapper, ValidatedIdentity};
pub use lifecycle::{CreateTracker, CreatedInstance, InstanceLifecycleManager};
pub use logging::init_logging;
pub use operation::OperationTracker;
pub use options::{CorralOptions, IdentityOptions, LoggingOptions, PollOptions};
pub use output::{OutputParser, OutputPattern};
pub use service::{ExecChannels, ExecPost, InstanceService, ServiceHandle};
