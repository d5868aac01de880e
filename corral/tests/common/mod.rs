//! Shared fixtures for integration tests.

#![allow(dead_code)]

use corral::{CorralOptions, PollOptions};
use corral_test_utils::{SimulatedConfig, SimulatedService};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Test context with a fresh simulated service and fast polling.
pub struct TestContext {
    pub service: Arc<SimulatedService>,
    pub options: CorralOptions,
    pub cancel: CancellationToken,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(SimulatedConfig::default())
    }

    pub fn with_config(config: SimulatedConfig) -> Self {
        let options = CorralOptions {
            poll: PollOptions {
                initial_interval_ms: 2,
                max_interval_ms: 20,
                multiplier: 2.0,
            },
            create_timeout_secs: 5,
            start_timeout_secs: 5,
            exec_timeout_secs: 5,
            ..Default::default()
        };
        Self {
            service: SimulatedService::with_config(config),
            options,
            cancel: CancellationToken::new(),
        }
    }
}
