// Error types for device sessions and the resampler adapter
//
// Nothing here crosses the monitor API: the monitor logs these and degrades
// (inactive session, dropped frame) instead of returning them to the host.

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("format negotiation failed: {0}")]
    FormatNegotiation(String),

    #[error("unsupported sample rate {0}Hz")]
    UnsupportedSampleRate(u32),

    #[error("unsupported channel count {0}")]
    UnsupportedChannels(u16),

    #[error("failed to allocate native buffers: {0}")]
    BufferAllocation(String),

    #[error("{call} failed with code {code}")]
    System { call: &'static str, code: i64 },

    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("session not supported on this platform: {0}")]
    NotSupported(&'static str),

    #[error("device lost: {0}")]
    DeviceLost(String),

    #[error("session is not active")]
    Inactive,
}

impl SessionError {
    /// Wraps a non-zero native status code
    pub fn system(call: &'static str, code: impl Into<i64>) -> Self {
        SessionError::System {
            call,
            code: code.into(),
        }
    }

    /// Whether the session can no longer render and must be stopped
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::DeviceLost(_) | SessionError::System { .. } | SessionError::Inactive
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResampleError {
    #[error("failed to create resampler {from}Hz -> {to}Hz: {reason}")]
    Construction { from: u32, to: u32, reason: String },

    #[error("resampler processing failed: {0}")]
    Process(String),

    #[error("expected {expected} input planes, got {actual}")]
    PlaneMismatch { expected: usize, actual: usize },
}
