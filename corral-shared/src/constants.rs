//! Shared constants
//!
//! Keys and defaults that must agree between the orchestrator and any
//! service backend it talks to.

/// Operation metadata keys.
pub mod metadata {
    /// Exit code of an exec operation, populated only on success.
    pub const EXIT_CODE: &str = "return";
}

/// Operation polling defaults.
pub mod poll {
    /// First delay between two status polls.
    pub const DEFAULT_INITIAL_INTERVAL_MS: u64 = 50;

    /// Upper bound for the backoff between polls.
    pub const DEFAULT_MAX_INTERVAL_MS: u64 = 1000;

    /// Growth factor applied to the delay after each non-terminal poll.
    pub const DEFAULT_MULTIPLIER: f64 = 2.0;
}

/// Timeout conventions.
pub mod timeout {
    /// Seconds value meaning "wait indefinitely". Every negative value is
    /// treated the same way.
    pub const INFINITE_SECS: i64 = -1;
}
