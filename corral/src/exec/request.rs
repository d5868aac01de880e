//! Exec request builder.

use crate::identity::Identity;
use crate::service::{BoxedReader, BoxedWriter};
use corral_shared::GroupMapping;
use corral_shared::errors::{CorralError, CorralResult};
use std::collections::BTreeMap;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

/// Where a command's stdout or stderr goes.
pub enum StdioSink {
    /// Read and throw away.
    Discard,
    /// Collect in memory and return in [`ExecResult`](super::ExecResult).
    Capture,
    /// Forward to a caller-owned writer while the command runs.
    Stream(BoxedWriter),
}

impl StdioSink {
    pub fn stream<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        StdioSink::Stream(Box::new(writer))
    }

    pub fn is_capture(&self) -> bool {
        matches!(self, StdioSink::Capture)
    }
}

impl fmt::Debug for StdioSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StdioSink::Discard => f.write_str("Discard"),
            StdioSink::Capture => f.write_str("Capture"),
            StdioSink::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Command to run inside an instance.
///
/// Builder API in the spirit of `std::process::Command`. Output is captured
/// in memory unless a different sink is set.
///
/// # Examples
///
/// ```
/// use corral::{ExecRequest, GroupMapping, StdioSink};
///
/// let request = ExecRequest::new(["id", "ubuntu"])
///     .env("HOME", "/home/ubuntu")
///     .env("USER", "ubuntu")
///     .user(1000, 1000)
///     .group_mapping(GroupMapping::identity(27))
///     .stderr(StdioSink::Discard)
///     .wait_for_attach(true);
/// assert_eq!(request.command(), ["id", "ubuntu"]);
/// ```
pub struct ExecRequest {
    pub(crate) command: Vec<String>,
    pub(crate) environment: BTreeMap<String, String>,
    pub(crate) identity: Identity,
    pub(crate) interactive: bool,
    pub(crate) wait_for_attach: bool,
    pub(crate) stdin: Option<BoxedReader>,
    pub(crate) stdout: StdioSink,
    pub(crate) stderr: StdioSink,
}

impl ExecRequest {
    /// Create a request from the full argument vector (program first).
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            environment: BTreeMap::new(),
            identity: Identity::default(),
            interactive: false,
            wait_for_attach: true,
            stdin: None,
            stdout: StdioSink::Capture,
            stderr: StdioSink::Capture,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.command.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable. Setting a key twice keeps the last value.
    pub fn env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.environment.insert(key.into(), val.into());
        self
    }

    /// Replace the whole identity.
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    /// Set uid and primary gid, keeping any group mappings.
    pub fn user(mut self, uid: u32, gid: u32) -> Self {
        self.identity.uid = uid;
        self.identity.gid = gid;
        self
    }

    /// Add a supplementary group mapping.
    pub fn group_mapping(mut self, mapping: GroupMapping) -> Self {
        self.identity.group_mappings.push(mapping);
        self
    }

    /// Allocate a terminal for the command.
    pub fn interactive(mut self, enable: bool) -> Self {
        self.interactive = enable;
        self
    }

    /// Block [`ExecSession::execute`](super::ExecSession::execute) until the
    /// remote side has attached stdio. On by default.
    pub fn wait_for_attach(mut self, enable: bool) -> Self {
        self.wait_for_attach = enable;
        self
    }

    /// Feed the command's stdin from `reader`. Without one, stdin is closed.
    pub fn stdin<R>(mut self, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.stdin = Some(Box::new(reader));
        self
    }

    pub fn stdout(mut self, sink: StdioSink) -> Self {
        self.stdout = sink;
        self
    }

    pub fn stderr(mut self, sink: StdioSink) -> Self {
        self.stderr = sink;
        self
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn requested_identity(&self) -> &Identity {
        &self.identity
    }

    /// Shape checks that need no remote call.
    pub(crate) fn validate(&self) -> CorralResult<()> {
        match self.command.first() {
            None => {
                return Err(CorralError::Validation(
                    "exec command must not be empty".into(),
                ));
            }
            Some(program) if program.is_empty() => {
                return Err(CorralError::Validation(
                    "exec program name must not be empty".into(),
                ));
            }
            Some(_) => {}
        }
        if let Some(key) = self
            .environment
            .keys()
            .find(|k| k.is_empty() || k.contains('=') || k.contains('\0'))
        {
            return Err(CorralError::Validation(format!(
                "invalid environment variable name {:?}",
                key
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ExecRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecRequest")
            .field("command", &self.command)
            .field("environment", &self.environment)
            .field("identity", &self.identity)
            .field("interactive", &self.interactive)
            .field("wait_for_attach", &self.wait_for_attach)
            .field("stdin", &self.stdin.as_ref().map(|_| ".."))
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_arguments() {
        let request = ExecRequest::new(["getent"]).arg("group").args(["docker"]);
        assert_eq!(request.command(), ["getent", "group", "docker"]);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_empty_command_rejected() {
        let err = ExecRequest::new(Vec::<String>::new()).validate().unwrap_err();
        assert!(matches!(err, CorralError::Validation(_)));

        let err = ExecRequest::new([""]).validate().unwrap_err();
        assert!(matches!(err, CorralError::Validation(_)));
    }

    #[test]
    fn test_environment_keys_unique_and_checked() {
        let request = ExecRequest::new(["env"]).env("USER", "root").env("USER", "ubuntu");
        assert_eq!(request.environment().len(), 1);
        assert_eq!(request.environment()["USER"], "ubuntu");

        let err = ExecRequest::new(["env"]).env("A=B", "x").validate().unwrap_err();
        assert!(matches!(err, CorralError::Validation(_)));
    }

    #[test]
    fn test_identity_builders() {
        let request = ExecRequest::new(["id"])
            .group_mapping(GroupMapping::identity(4))
            .user(1000, 1001);
        let identity = request.requested_identity();
        assert_eq!((identity.uid, identity.gid), (1000, 1001));
        assert_eq!(identity.group_mappings, vec![GroupMapping::identity(4)]);
    }

    #[test]
    fn test_defaults_capture_output() {
        let request = ExecRequest::new(["true"]);
        assert!(request.stdout.is_capture());
        assert!(request.stderr.is_capture());
        assert!(request.wait_for_attach);
        assert!(!request.interactive);
    }
}
