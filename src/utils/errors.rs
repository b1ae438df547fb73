// src/utils/errors.rs
//! Error types for the log pipeline
//!
//! These cover construction and configuration paths only. The producer-facing
//! `submit` path never returns an error; export failures are reported as
//! `SendOutcome` values and counted.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Top-level pipeline error
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration loaded but failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Payload encoding or decoding failed
    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    /// Payload compression failed
    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    /// Transport could not be constructed
    #[error("Transport error: {0}")]
    TransportFailed(String),

    /// Tracing subscriber or metrics recorder could not be installed
    #[error("Telemetry setup failed: {0}")]
    Telemetry(String),

    /// Pipeline started outside a tokio runtime
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Operation requires a started pipeline
    #[error("Pipeline not started")]
    NotStarted,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
