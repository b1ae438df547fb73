// src/exporter/mod.rs
//! Network export of encoded batches
//!
//! - `Transport`: one send of one payload, classified into a `SendOutcome`
//! - `HttpTransport`: OTLP/HTTP protobuf over reqwest
//! - `GrpcTransport`: OTLP/gRPC `LogsService.Export` over a tonic channel
//! - `RetryPolicy`: exponential backoff with jitter, bounded by attempts and
//!   elapsed time
//! - `Exporter`: bounded in-flight queue drained by a small worker pool
//!
//! ```text
//! batcher ──dispatch──▶ [in-flight queue] ──▶ worker 0 ──send/retry──▶ collector
//!                                          └─▶ worker N ──send/retry──▶ collector
//! ```
//!
//! Delivery is at-least-once: a send that timed out may still have been
//! accepted by the collector, and its retry then delivers the records twice.

pub mod grpc;
pub mod http;
pub mod pool;
pub mod retry;

pub use grpc::GrpcTransport;
pub use http::HttpTransport;
pub use pool::{DispatchOutcome, Exporter, ExporterDrain};
pub use retry::{ExportAttempt, RetryDecision, RetryPolicy};

use crate::utils::config::ExporterConfig;
use crate::utils::errors::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Wire transport used to reach the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// OTLP/HTTP with protobuf bodies
    #[default]
    Http,

    /// OTLP/gRPC
    Grpc,
}

/// What a full in-flight queue does with a newly sealed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InFlightOverflow {
    /// Evict the oldest queued batch
    #[default]
    DropOldest,

    /// Refuse the new batch
    Reject,
}

/// Classified result of one send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Collector accepted the payload; `rejected_records` came back in a
    /// partial-success response
    Success { rejected_records: u64 },

    /// Transient failure worth another attempt
    Retryable {
        reason: String,
        retry_after: Option<Duration>,
    },

    /// Permanent failure; retrying the same payload cannot succeed
    Fatal { reason: String },
}

impl SendOutcome {
    pub fn success() -> Self {
        SendOutcome::Success {
            rejected_records: 0,
        }
    }

    pub fn retryable(reason: impl Into<String>) -> Self {
        SendOutcome::Retryable {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        SendOutcome::Fatal {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Success { .. })
    }
}

/// One network send of an uncompressed OTLP payload.
///
/// Implementations must not block on other sends: the worker pool calls
/// `send` concurrently from several tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: Bytes) -> SendOutcome;

    /// Short name for diagnostics
    fn name(&self) -> &'static str;
}

/// Construct the transport selected by configuration
pub fn build_transport(config: &ExporterConfig) -> Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match config.transport {
        TransportKind::Http => Arc::new(HttpTransport::new(config)?),
        TransportKind::Grpc => Arc::new(GrpcTransport::new(config)?),
    };
    Ok(transport)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_names() {
        let kind: TransportKind = serde_json::from_str("\"grpc\"").unwrap();
        assert_eq!(kind, TransportKind::Grpc);
        let overflow: InFlightOverflow = serde_json::from_str("\"drop_oldest\"").unwrap();
        assert_eq!(overflow, InFlightOverflow::DropOldest);
    }

    #[test]
    fn test_outcome_constructors() {
        assert!(SendOutcome::success().is_success());
        assert_eq!(
            SendOutcome::retryable("503"),
            SendOutcome::Retryable {
                reason: "503".to_string(),
                retry_after: None
            }
        );
        assert!(!SendOutcome::fatal("401").is_success());
    }

    #[tokio::test]
    async fn test_build_http_transport() {
        let config = ExporterConfig::default();
        let transport = build_transport(&config).unwrap();
        assert_eq!(transport.name(), "http");
    }

    #[tokio::test]
    async fn test_build_grpc_transport() {
        let config = ExporterConfig {
            endpoint: "http://localhost:4317".to_string(),
            transport: TransportKind::Grpc,
            ..ExporterConfig::default()
        };
        let transport = build_transport(&config).unwrap();
        assert_eq!(transport.name(), "grpc");
    }
}
