//! Configuration for corral.

use crate::identity::Identity;
use corral_shared::constants::{poll as const_poll, timeout as const_timeout};
use corral_shared::errors::{CorralError, CorralResult};
use corral_shared::{GroupMapping, Timeout};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Top-level options
// ============================================================================

/// Orchestrator configuration.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use corral::CorralOptions;
///
/// let options = CorralOptions::from_json_str(r#"{"exec_timeout_secs": 30}"#).unwrap();
/// assert_eq!(options.exec_timeout().as_secs(), 30);
/// assert!(options.start_timeout().is_infinite());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorralOptions {
    /// Backoff between operation status polls.
    #[serde(default)]
    pub poll: PollOptions,

    /// Wait budget for instance creation. Negative waits indefinitely.
    #[serde(default = "default_timeout_secs")]
    pub create_timeout_secs: i64,

    /// Wait budget for instance start, also sent as the remote action
    /// timeout. Negative waits indefinitely.
    #[serde(default = "default_timeout_secs")]
    pub start_timeout_secs: i64,

    /// Wait budget for command execution. Negative waits indefinitely.
    #[serde(default = "default_timeout_secs")]
    pub exec_timeout_secs: i64,

    /// Identity commands run under unless the request overrides it.
    #[serde(default)]
    pub identity: IdentityOptions,

    #[serde(default)]
    pub logging: LoggingOptions,
}

fn default_timeout_secs() -> i64 {
    const_timeout::INFINITE_SECS
}

impl Default for CorralOptions {
    fn default() -> Self {
        Self {
            poll: PollOptions::default(),
            create_timeout_secs: default_timeout_secs(),
            start_timeout_secs: default_timeout_secs(),
            exec_timeout_secs: default_timeout_secs(),
            identity: IdentityOptions::default(),
            logging: LoggingOptions::default(),
        }
    }
}

impl CorralOptions {
    /// Parse and validate options from a JSON document.
    pub fn from_json_str(json: &str) -> CorralResult<Self> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| CorralError::Config(format!("invalid options JSON: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Read, parse and validate options from a JSON file.
    pub fn from_json_file(path: &Path) -> CorralResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CorralError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> CorralResult<()> {
        self.poll.validate()
    }

    pub fn create_timeout(&self) -> Timeout {
        Timeout::from_secs(self.create_timeout_secs)
    }

    pub fn start_timeout(&self) -> Timeout {
        Timeout::from_secs(self.start_timeout_secs)
    }

    pub fn exec_timeout(&self) -> Timeout {
        Timeout::from_secs(self.exec_timeout_secs)
    }
}

// ============================================================================
// Poll Options
// ============================================================================

/// Exponential backoff for operation polling.
///
/// The delay starts at `initial_interval_ms`, grows by `multiplier` after
/// every non-terminal poll and never exceeds `max_interval_ms`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollOptions {
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_initial_interval_ms() -> u64 {
    const_poll::DEFAULT_INITIAL_INTERVAL_MS
}

fn default_max_interval_ms() -> u64 {
    const_poll::DEFAULT_MAX_INTERVAL_MS
}

fn default_multiplier() -> f64 {
    const_poll::DEFAULT_MULTIPLIER
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl PollOptions {
    pub fn validate(&self) -> CorralResult<()> {
        if self.initial_interval_ms == 0 {
            return Err(CorralError::Config(
                "poll.initial_interval_ms must be greater than 0".into(),
            ));
        }
        if self.max_interval_ms < self.initial_interval_ms {
            return Err(CorralError::Config(format!(
                "poll.max_interval_ms ({}) must not be below poll.initial_interval_ms ({})",
                self.max_interval_ms, self.initial_interval_ms
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(CorralError::Config(format!(
                "poll.multiplier must be a finite value >= 1.0, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms.max(1))
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms.max(self.initial_interval_ms).max(1))
    }

    /// Delay to use after `current`, clamped to the configured bounds.
    pub fn next_interval(&self, current: Duration) -> Duration {
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let next = Duration::try_from_secs_f64(current.as_secs_f64() * multiplier)
            .unwrap_or_else(|_| self.max_interval());
        next.clamp(self.initial_interval(), self.max_interval())
    }
}

// ============================================================================
// Identity Options
// ============================================================================

/// Caller-supplied identity policy.
///
/// Which supplementary groups a command gets is a policy decision; nothing in
/// corral hardcodes a group table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityOptions {
    #[serde(default)]
    pub uid: u32,

    #[serde(default)]
    pub gid: u32,

    #[serde(default)]
    pub group_mappings: Vec<GroupMapping>,
}

impl IdentityOptions {
    /// Unvalidated identity; validation happens when it is used.
    pub fn to_identity(&self) -> Identity {
        Identity::new(self.uid, self.gid).group_mappings(self.group_mappings.iter().copied())
    }
}

// ============================================================================
// Logging Options
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingOptions {
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Write daily-rotated log files here instead of stderr.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_wait_indefinitely() {
        let options = CorralOptions::default();
        assert!(options.create_timeout().is_infinite());
        assert!(options.start_timeout().is_infinite());
        assert!(options.exec_timeout().is_infinite());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let options = CorralOptions::from_json_str("{}").unwrap();
        assert_eq!(options.poll, PollOptions::default());
        assert_eq!(options.logging.level, "info");
        assert_eq!(options.identity, IdentityOptions::default());
    }

    #[test]
    fn test_identity_policy_from_json() {
        let json = r#"{
            "identity": {
                "uid": 1000,
                "gid": 1000,
                "group_mappings": [
                    {"container_id": 27, "host_id": 27, "size": 1},
                    {"container_id": 44, "host_id": 44, "size": 1}
                ]
            }
        }"#;
        let options = CorralOptions::from_json_str(json).unwrap();
        let identity = options.identity.to_identity();
        assert_eq!(identity.uid, 1000);
        assert_eq!(identity.group_mappings.len(), 2);
        assert_eq!(identity.group_mappings[0], GroupMapping::identity(27));
    }

    #[test]
    fn test_invalid_poll_options_rejected() {
        let err = CorralOptions::from_json_str(r#"{"poll": {"initial_interval_ms": 0}}"#)
            .unwrap_err();
        assert!(matches!(err, CorralError::Config(_)));

        let err = CorralOptions::from_json_str(
            r#"{"poll": {"initial_interval_ms": 500, "max_interval_ms": 100}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CorralError::Config(_)));

        let err = CorralOptions::from_json_str(r#"{"poll": {"multiplier": 0.5}}"#).unwrap_err();
        assert!(matches!(err, CorralError::Config(_)));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = CorralOptions::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, CorralError::Config(_)));
    }

    #[test]
    fn test_options_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corral.json");
        std::fs::write(&path, r#"{"create_timeout_secs": 120}"#).unwrap();

        let options = CorralOptions::from_json_file(&path).unwrap();
        assert_eq!(options.create_timeout().as_secs(), 120);

        let missing = CorralOptions::from_json_file(&dir.path().join("missing.json"));
        assert!(matches!(missing, Err(CorralError::Config(_))));
    }

    #[test]
    fn test_next_interval_is_bounded() {
        let poll = PollOptions {
            initial_interval_ms: 10,
            max_interval_ms: 100,
            multiplier: 3.0,
        };
        let mut interval = poll.initial_interval();
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(interval.as_millis());
            interval = poll.next_interval(interval);
        }
        assert_eq!(seen, vec![10, 30, 90, 100, 100]);
    }
}
