//! Error types for the gateway

use std::time::Duration;

use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-level error from the model API that carries no
    /// actionable classification
    #[error("model API error: {0}")]
    Api(#[from] async_openai::error::OpenAIError),

    /// The model declined to answer on content-policy grounds
    #[error("content policy refusal: {message}")]
    ContentPolicyRefusal { message: String },

    /// Explicit rate-limit signal from the model API
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    /// A response referenced a tool call whose result is missing from
    /// history, usually an artifact of aggressive trimming
    #[error("dangling tool reference: {message}")]
    DanglingToolReference { message: String },

    /// A decision payload that did not parse as `{"action": ...}`
    #[error("undecodable decision payload: {text}")]
    DecisionParse { text: String },

    /// Retries exhausted; wraps the failure seen on the last attempt
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<GatewayError>,
    },

    /// The review loop ran past its step limit without a final answer
    #[error("review did not converge within {max_steps} steps")]
    ReviewDiverged { max_steps: usize },

    /// Error while replaying the request against the upstream service
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Example store failure
    #[error("example store error: {0}")]
    ExampleStore(String),

    /// The per-request deadline elapsed
    #[error("request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}
