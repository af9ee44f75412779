//! Shared constants for end-to-end tests

/// Owner used by most submissions
pub const AGENT_ID: &str = "agent-e2e";

/// Built-in work unit exercised by the suite
pub const SNAPSHOT_TASK: &str = "measurement_snapshot";

/// Secret configured on the test server for webhook signing
pub const WEBHOOK_SECRET: &str = "e2e-webhook-secret";

// ============================================================================
// Timeouts
// ============================================================================

pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Upper bound when waiting for a task to reach a status
pub const STATUS_WAIT_TIMEOUT_MS: u64 = 8000;
