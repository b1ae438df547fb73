// src/encoding/otlp.rs
//! Batch → `ExportLogsServiceRequest` encoder
//!
//! Pure and deterministic: the same batch always produces the same bytes.
//! The encoder holds no mutable state, so independent batches may be encoded
//! concurrently.

use crate::encoding::proto::{
    self, any_value, AnyValue, ExportLogsServiceRequest, InstrumentationScope, KeyValue,
    KeyValueList, LogRecord, ResourceLogs, ScopeLogs,
};
use crate::model::{AttributeValue, Batch, Record, Resource, Scope, MAX_ATTRIBUTE_DEPTH};
use crate::utils::errors::{PipelineError, Result};
use bytes::Bytes;
use prost::Message;
use std::sync::Arc;
use tracing::debug;

/// Encoded payload plus the facts the exporter accounts with
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    /// Sequence number of the source batch
    pub sequence: u64,

    /// Number of log records in the payload
    pub record_count: usize,

    /// Uncompressed protobuf bytes
    pub payload: Bytes,

    /// Attribute values coerced to strings during encoding
    pub coerced_fields: usize,
}

/// OTLP logs encoder
#[derive(Debug, Clone)]
pub struct OtlpEncoder {
    scope: InstrumentationScope,
}

impl OtlpEncoder {
    pub fn new(scope: &Scope) -> Self {
        Self {
            scope: InstrumentationScope {
                name: scope.name.clone(),
                version: scope.version.clone(),
                ..Default::default()
            },
        }
    }

    /// Serialize a batch into protobuf bytes
    pub fn encode(&self, batch: &Batch) -> EncodedBatch {
        let (request, coerced_fields) = self.to_request(batch);
        let payload = Bytes::from(request.encode_to_vec());

        debug!(
            "Encoded batch {} ({} records) into {} bytes",
            batch.sequence(),
            batch.len(),
            payload.len()
        );

        EncodedBatch {
            sequence: batch.sequence(),
            record_count: batch.len(),
            payload,
            coerced_fields,
        }
    }

    /// Build the request message.
    ///
    /// Consecutive records sharing a resource are grouped under one
    /// `ResourceLogs`, so a batch from a single process carries its resource
    /// exactly once.
    pub fn to_request(&self, batch: &Batch) -> (ExportLogsServiceRequest, usize) {
        let mut coerced = 0usize;
        let mut resource_logs: Vec<ResourceLogs> = Vec::new();
        let mut current: Option<&Arc<Resource>> = None;

        for record in batch.records() {
            let resource = record.resource.as_ref().unwrap_or_else(|| batch.resource());

            let same_group = current
                .map(|c| Arc::ptr_eq(c, resource) || **c == **resource)
                .unwrap_or(false);

            if !same_group {
                resource_logs.push(ResourceLogs {
                    resource: Some(encode_resource(resource)),
                    scope_logs: vec![ScopeLogs {
                        scope: Some(self.scope.clone()),
                        ..Default::default()
                    }],
                    ..Default::default()
                });
                current = Some(resource);
            }

            let log_record = encode_record(record, &mut coerced);
            if let Some(scope_logs) = resource_logs
                .last_mut()
                .and_then(|rl| rl.scope_logs.last_mut())
            {
                scope_logs.log_records.push(log_record);
            }
        }

        (ExportLogsServiceRequest { resource_logs }, coerced)
    }
}

/// Decode an uncompressed payload (used for verification and tests)
pub fn decode_request(payload: &[u8]) -> Result<ExportLogsServiceRequest> {
    ExportLogsServiceRequest::decode(payload)
        .map_err(|e| PipelineError::EncodingFailed(format!("Invalid OTLP payload: {}", e)))
}

fn encode_resource(resource: &Resource) -> proto::Resource {
    proto::Resource {
        attributes: resource
            .attributes()
            .iter()
            .map(|(k, v)| string_kv(k, v))
            .collect(),
        ..Default::default()
    }
}

fn encode_record(record: &Record, coerced: &mut usize) -> LogRecord {
    let (trace_id, span_id, flags) = match record.trace_context {
        Some(ctx) if ctx.is_valid() => (ctx.trace_id.to_vec(), ctx.span_id.to_vec(), ctx.flags as u32),
        _ => (Vec::new(), Vec::new(), 0),
    };

    LogRecord {
        time_unix_nano: record.time_unix_nano,
        observed_time_unix_nano: record.observed_time_unix_nano,
        severity_number: record.severity.number(),
        severity_text: record.severity_text().to_string(),
        body: Some(string_value(&record.body)),
        attributes: record
            .attributes
            .iter()
            .map(|(k, v)| KeyValue {
                key: k.clone(),
                value: Some(encode_value(v, 0, coerced)),
            })
            .collect(),
        flags,
        trace_id,
        span_id,
        ..Default::default()
    }
}

fn encode_value(value: &AttributeValue, depth: usize, coerced: &mut usize) -> AnyValue {
    let value = match value {
        AttributeValue::String(s) => any_value::Value::StringValue(s.clone()),
        AttributeValue::Int(i) => any_value::Value::IntValue(*i),
        AttributeValue::Double(d) => any_value::Value::DoubleValue(*d),
        AttributeValue::Bool(b) => any_value::Value::BoolValue(*b),
        AttributeValue::Map(_) if depth >= MAX_ATTRIBUTE_DEPTH => {
            *coerced += 1;
            any_value::Value::StringValue(value.to_string())
        }
        AttributeValue::Map(map) => any_value::Value::KvlistValue(KeyValueList {
            values: map
                .iter()
                .map(|(k, v)| KeyValue {
                    key: k.clone(),
                    value: Some(encode_value(v, depth + 1, coerced)),
                })
                .collect(),
        }),
    };
    AnyValue { value: Some(value) }
}

fn string_value(s: &str) -> AnyValue {
    AnyValue {
        value: Some(any_value::Value::StringValue(s.to_string())),
    }
}

fn string_kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(string_value(value)),
    }
}
