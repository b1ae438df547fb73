// src/exporter/grpc.rs
//! OTLP/gRPC transport
//!
//! Calls `LogsService/Export` on a lazily connected tonic `Channel`. The
//! payload is already protobuf-encoded, so a pass-through codec writes it
//! verbatim and only the response is decoded.
//!
//! Plain `http://` endpoints only; TLS termination is left to a sidecar or
//! proxy.

use crate::encoding::proto::{ExportLogsServiceResponse, LOGS_SERVICE_EXPORT_PATH};
use crate::encoding::Compression;
use crate::exporter::{SendOutcome, Transport};
use crate::utils::config::ExporterConfig;
use crate::utils::errors::{PipelineError, Result};
use async_trait::async_trait;
use bytes::{BufMut, Bytes};
use prost::Message;
use tonic::codec::{Codec, CompressionEncoding, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use tracing::{debug, warn};

/// tonic-backed OTLP/gRPC transport
pub struct GrpcTransport {
    channel: Channel,
    gzip: bool,
    metadata: Vec<(AsciiMetadataKey, AsciiMetadataValue)>,
}

impl GrpcTransport {
    /// Build the transport. Must be called inside a tokio runtime; the
    /// connection itself is established on first send.
    pub fn new(config: &ExporterConfig) -> Result<Self> {
        let endpoint = Endpoint::from_shared(config.endpoint.clone())
            .map_err(|e| {
                PipelineError::InvalidConfig(format!("gRPC endpoint '{}': {}", config.endpoint, e))
            })?
            .timeout(config.timeout())
            .connect_timeout(config.timeout());

        let mut metadata = Vec::with_capacity(config.headers.len() + 1);
        for (name, value) in &config.headers {
            metadata.push(metadata_pair(name, value)?);
        }
        if let Some(api_key) = &config.api_key {
            metadata.push(metadata_pair(&config.api_key_header, api_key)?);
        }

        debug!("gRPC transport to {}", config.endpoint);

        Ok(Self {
            channel: endpoint.connect_lazy(),
            gzip: matches!(config.compression, Compression::Gzip),
            metadata,
        })
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn send(&self, payload: Bytes) -> SendOutcome {
        let mut client = tonic::client::Grpc::new(self.channel.clone());
        if self.gzip {
            client = client
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip);
        }

        if let Err(e) = client.ready().await {
            return SendOutcome::retryable(format!("channel not ready: {}", e));
        }

        let mut request = tonic::Request::new(payload);
        for (key, value) in &self.metadata {
            request.metadata_mut().insert(key.clone(), value.clone());
        }

        let path = PathAndQuery::from_static(LOGS_SERVICE_EXPORT_PATH);
        match client.unary(request, path, RawPayloadCodec).await {
            Ok(response) => match response.into_inner().partial_success {
                Some(partial) if partial.rejected_log_records > 0 => {
                    warn!(
                        "Collector rejected {} records: {}",
                        partial.rejected_log_records, partial.error_message
                    );
                    SendOutcome::Success {
                        rejected_records: partial.rejected_log_records as u64,
                    }
                }
                _ => SendOutcome::success(),
            },
            Err(status) => classify_status(&status),
        }
    }

    fn name(&self) -> &'static str {
        "grpc"
    }
}

/// Codes worth retrying per the OTLP exporter guidance
pub fn is_retryable_code(code: Code) -> bool {
    matches!(
        code,
        Code::Cancelled
            | Code::DeadlineExceeded
            | Code::ResourceExhausted
            | Code::Aborted
            | Code::OutOfRange
            | Code::Unavailable
            | Code::DataLoss
    )
}

fn classify_status(status: &Status) -> SendOutcome {
    let reason = format!("gRPC {:?}: {}", status.code(), status.message());
    if is_retryable_code(status.code()) {
        SendOutcome::retryable(reason)
    } else {
        SendOutcome::fatal(reason)
    }
}

fn metadata_pair(name: &str, value: &str) -> Result<(AsciiMetadataKey, AsciiMetadataValue)> {
    let key = AsciiMetadataKey::from_bytes(name.trim().to_ascii_lowercase().as_bytes())
        .map_err(|e| PipelineError::InvalidConfig(format!("metadata key '{}': {}", name, e)))?;
    let value = value
        .trim()
        .parse::<AsciiMetadataValue>()
        .map_err(|e| PipelineError::InvalidConfig(format!("metadata '{}' value: {}", name, e)))?;
    Ok((key, value))
}

/// Writes pre-encoded request bytes, decodes `ExportLogsServiceResponse`
#[derive(Debug, Clone, Copy, Default)]
struct RawPayloadCodec;

impl Codec for RawPayloadCodec {
    type Encode = Bytes;
    type Decode = ExportLogsServiceResponse;
    type Encoder = RawPayloadEncoder;
    type Decoder = ResponseDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        RawPayloadEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        ResponseDecoder
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RawPayloadEncoder;

impl Encoder for RawPayloadEncoder {
    type Item = Bytes;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> std::result::Result<(), Status> {
        dst.put_slice(&item);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ResponseDecoder;

impl Decoder for ResponseDecoder {
    type Item = ExportLogsServiceResponse;
    type Error = Status;

    fn decode(
        &mut self,
        src: &mut DecodeBuf<'_>,
    ) -> std::result::Result<Option<Self::Item>, Status> {
        ExportLogsServiceResponse::decode(src)
            .map(Some)
            .map_err(|e| Status::internal(format!("invalid ExportLogsServiceResponse: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_code_classification() {
        assert!(is_retryable_code(Code::Unavailable));
        assert!(is_retryable_code(Code::DeadlineExceeded));
        assert!(is_retryable_code(Code::ResourceExhausted));
        assert!(!is_retryable_code(Code::Unauthenticated));
        assert!(!is_retryable_code(Code::InvalidArgument));
        assert!(!is_retryable_code(Code::PermissionDenied));
        assert!(!is_retryable_code(Code::Unimplemented));
    }

    #[test]
    fn test_status_mapping() {
        let outcome = classify_status(&Status::unavailable("collector restarting"));
        assert!(matches!(outcome, SendOutcome::Retryable { .. }));

        let outcome = classify_status(&Status::unauthenticated("bad key"));
        match outcome {
            SendOutcome::Fatal { reason } => assert!(reason.contains("bad key")),
            other => panic!("expected fatal, got {:?}", other),
        }
    }

    #[test]
    fn test_metadata_pair_lowercases() {
        let (key, value) = metadata_pair("X-API-Key", "secret").unwrap();
        assert_eq!(key.as_str(), "x-api-key");
        assert_eq!(value, "secret");
        assert!(metadata_pair("bad key", "v").is_err());
    }

    #[tokio::test]
    async fn test_invalid_endpoint_rejected() {
        let config = ExporterConfig {
            endpoint: "not a uri".to_string(),
            ..ExporterConfig::default()
        };
        assert!(matches!(
            GrpcTransport::new(&config),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_metadata_collected() {
        let mut headers = BTreeMap::new();
        headers.insert("x-tenant".to_string(), "acme".to_string());
        let config = ExporterConfig {
            endpoint: "http://127.0.0.1:4317".to_string(),
            api_key: Some("k".to_string()),
            headers,
            ..ExporterConfig::default()
        };
        let transport = GrpcTransport::new(&config).unwrap();
        assert_eq!(transport.metadata.len(), 2);
        assert!(transport.gzip);
    }
}
