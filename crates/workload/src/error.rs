//! Error types for workload configuration and request transport.

use thiserror::Error;

/// Configuration errors. These are raised synchronously while a workload is
/// being built and never from inside the tick loop.
#[derive(Error, Debug)]
pub enum WorkloadError {
    /// No request templates were configured.
    #[error("at least one request template must be configured")]
    NoTemplates,

    /// A template weight is negative or not a finite number.
    #[error("invalid weight {weight} for request template {index}")]
    InvalidWeight { index: usize, weight: f64 },

    /// Every template weight is zero.
    #[error("template weights sum to zero")]
    ZeroTotalWeight,

    /// The requests-per-minute target cannot produce a tick interval.
    #[error("invalid request rate: {0} requests per minute")]
    InvalidRate(u32),

    /// A filter stage was configured with unusable parameters.
    #[error("invalid filter configuration: {0}")]
    InvalidFilter(String),

    /// A scenario field outside the workload itself is unusable.
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    /// A workload was started outside of a Tokio runtime.
    #[error("workload must be started from within a Tokio runtime")]
    NoRuntime,

    /// Scenario file could not be read.
    #[error("failed to read scenario: {0}")]
    Io(#[from] std::io::Error),

    /// Scenario file could not be parsed.
    #[error("failed to parse scenario: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl WorkloadError {
    /// Create an InvalidFilter error.
    pub fn invalid_filter(msg: impl Into<String>) -> Self {
        Self::InvalidFilter(msg.into())
    }
}

/// Failures reported by an HTTP transport for a single request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete within the transport timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection to the target could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request descriptor could not be turned into a request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Any other failure while sending the request.
    #[error("request failed: {0}")]
    Request(String),

    /// The response body could not be read.
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Result type for workload operations.
pub type Result<T> = std::result::Result<T, WorkloadError>;
