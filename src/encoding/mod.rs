// src/encoding/mod.rs
//! OTLP encoding
//!
//! - `proto`: protobuf message definitions for the logs export path
//! - `otlp`: batch → `ExportLogsServiceRequest`
//! - `compression`: gzip / zstd for HTTP payloads

pub mod compression;
pub mod otlp;
pub mod proto;

pub use compression::Compression;
pub use otlp::{decode_request, EncodedBatch, OtlpEncoder};
