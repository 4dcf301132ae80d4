//! Shared tuning constants

/// Streaming
pub mod stream {
    use std::time::Duration;

    /// Bounded delta-channel capacity; the producer blocks when the sink
    /// falls this far behind.
    pub const BUFFER_CHUNKS: usize = 1024;

    /// Abort a stream that goes silent for this long.
    pub const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

    /// Overall wall-clock limit for a single completion request.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);
}

/// Agent loop
pub mod agent {
    /// Upper bound on tool-result → completion round-trips in one user turn.
    pub const MAX_TOOL_TURNS: usize = 10;

    /// Rough bytes-per-token ratio used when the provider sends no usage.
    pub const ESTIMATE_BYTES_PER_TOKEN: usize = 4;
}

/// Workflow engine
pub mod workflow {
    use std::time::Duration;

    /// Attempts per step before the plan fails.
    pub const MAX_STEP_ATTEMPTS: u32 = 3;

    /// Back-off base; multiplied by the attempt number.
    pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

    /// Poll interval while paused.
    pub const PAUSE_POLL: Duration = Duration::from_millis(100);
}
