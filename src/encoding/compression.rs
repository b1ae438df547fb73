// src/encoding/compression.rs
//! Payload compression for the HTTP transport
//!
//! gzip is what every OTLP collector accepts; zstd is offered for collectors
//! that advertise it. The gRPC transport negotiates gzip through tonic and
//! never calls into this module.

use crate::utils::errors::{PipelineError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::debug;

/// zstd level used for export payloads
const ZSTD_LEVEL: i32 = 3;

/// Wire compression applied to an encoded batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,

    #[default]
    Gzip,

    Zstd,
}

impl Compression {
    /// Value for the `Content-Encoding` header
    pub fn content_encoding(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("gzip"),
            Compression::Zstd => Some("zstd"),
        }
    }

    /// Compress data
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let compressed = match self {
            Compression::None => return Ok(data.to_vec()),
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder
                    .write_all(data)
                    .and_then(|_| encoder.finish())
                    .map_err(|e| PipelineError::CompressionFailed(format!("gzip: {}", e)))?
            }
            Compression::Zstd => zstd::encode_all(data, ZSTD_LEVEL)
                .map_err(|e| PipelineError::CompressionFailed(format!("zstd: {}", e)))?,
        };

        debug!(
            "Compressed {} bytes -> {} bytes ({:?})",
            data.len(),
            compressed.len(),
            self
        );

        Ok(compressed)
    }

    /// Decompress data
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut out = Vec::with_capacity(data.len() * 4);
                GzDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| PipelineError::CompressionFailed(format!("gunzip: {}", e)))?;
                Ok(out)
            }
            Compression::Zstd => zstd::decode_all(data)
                .map_err(|e| PipelineError::CompressionFailed(format!("zstd decode: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_encoding() {
        assert_eq!(Compression::None.content_encoding(), None);
        assert_eq!(Compression::Gzip.content_encoding(), Some("gzip"));
        assert_eq!(Compression::Zstd.content_encoding(), Some("zstd"));
    }

    #[test]
    fn test_gzip_roundtrip() {
        let data = b"2024-01-01 INFO request served in 3ms\n".repeat(200);
        let compressed = Compression::Gzip.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
        assert_eq!(Compression::Gzip.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_zstd_roundtrip() {
        let data = b"Hello, World! This is test data.".repeat(100);
        let compressed = Compression::Zstd.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(Compression::Zstd.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_none_is_passthrough() {
        let data = b"abc";
        assert_eq!(Compression::None.compress(data).unwrap(), data.to_vec());
    }

    #[test]
    fn test_serde_names() {
        let c: Compression = serde_json::from_str("\"zstd\"").unwrap();
        assert_eq!(c, Compression::Zstd);
        assert_eq!(serde_json::to_string(&Compression::None).unwrap(), "\"none\"");
        assert_eq!(Compression::default(), Compression::Gzip);
    }

    #[test]
    fn test_decompress_garbage_fails() {
        assert!(Compression::Gzip.decompress(b"not gzip").is_err());
    }
}
