// src/exporter/http.rs
//! OTLP/HTTP protobuf transport
//!
//! `POST <endpoint>` with `Content-Type: application/x-protobuf`, the body
//! compressed per configuration. Status mapping:
//!
//! - 2xx: success; a partial-success body is reported, not retried
//! - 408, 429, 5xx, connect/timeout errors: retryable (`Retry-After` seconds honoured)
//! - any other status: fatal

use crate::encoding::proto::ExportLogsServiceResponse;
use crate::encoding::Compression;
use crate::exporter::{SendOutcome, Transport};
use crate::utils::config::ExporterConfig;
use crate::utils::errors::{PipelineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// Longest response body excerpt kept in a failure reason
const REASON_BODY_LIMIT: usize = 256;

/// reqwest-backed OTLP/HTTP transport
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    compression: Compression,
}

impl HttpTransport {
    pub fn new(config: &ExporterConfig) -> Result<Self> {
        let headers = build_headers(config)?;

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .user_agent(concat!("logsink/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::TransportFailed(format!("HTTP client: {}", e)))?;

        debug!(
            "HTTP transport to {} ({:?} compression, {:?} timeout)",
            config.endpoint,
            config.compression,
            config.timeout()
        );

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            compression: config.compression,
        })
    }

    async fn classify(&self, response: reqwest::Response) -> SendOutcome {
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.bytes().await.unwrap_or_default();

        if status.is_success() {
            return match ExportLogsServiceResponse::decode(body.as_ref()) {
                Ok(ExportLogsServiceResponse {
                    partial_success: Some(partial),
                }) if partial.rejected_log_records > 0 => {
                    warn!(
                        "Collector rejected {} records: {}",
                        partial.rejected_log_records, partial.error_message
                    );
                    SendOutcome::Success {
                        rejected_records: partial.rejected_log_records as u64,
                    }
                }
                Ok(_) => SendOutcome::success(),
                Err(e) => {
                    debug!("Ignoring undecodable {} response body: {}", status, e);
                    SendOutcome::success()
                }
            };
        }

        let reason = format!("HTTP {}: {}", status, excerpt(&body));
        if is_retryable_status(status) {
            SendOutcome::Retryable {
                reason,
                retry_after,
            }
        } else {
            SendOutcome::Fatal { reason }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: Bytes) -> SendOutcome {
        let body = match self.compression {
            Compression::None => payload,
            other => match other.compress(&payload) {
                Ok(compressed) => Bytes::from(compressed),
                Err(e) => return SendOutcome::fatal(e.to_string()),
            },
        };

        match self.client.post(&self.endpoint).body(body).send().await {
            Ok(response) => self.classify(response).await,
            Err(e) if e.is_builder() => SendOutcome::fatal(format!("invalid request: {}", e)),
            Err(e) => SendOutcome::retryable(format!("request failed: {}", e)),
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn build_headers(config: &ExporterConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(PROTOBUF_CONTENT_TYPE));
    if let Some(encoding) = config.compression.content_encoding() {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding));
    }

    for (name, value) in &config.headers {
        insert_header(&mut headers, name, value)?;
    }

    if let Some(api_key) = &config.api_key {
        insert_header(&mut headers, &config.api_key_header, api_key)?;
    }

    Ok(headers)
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|e| PipelineError::InvalidConfig(format!("header name '{}': {}", name, e)))?;
    let mut value = HeaderValue::from_str(value.trim())
        .map_err(|e| PipelineError::InvalidConfig(format!("header '{}' value: {}", name, e)))?;
    value.set_sensitive(true);
    headers.insert(name, value);
    Ok(())
}

/// Statuses worth retrying: request timeout, throttling, server errors
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// `Retry-After` in delta-seconds form; HTTP-date values are ignored
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    match trimmed.char_indices().nth(REASON_BODY_LIMIT) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
