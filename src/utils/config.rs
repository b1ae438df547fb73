// src/utils/config.rs
//! Pipeline configuration
//!
//! Layered with the `config` crate:
//!
//! 1. Built-in defaults (`PipelineConfig::default()`)
//! 2. Optional file (`--config <path>` or `LOGSINK_CONFIG`), any format `config` reads
//! 3. `LOGSINK_*` environment variables, `__` between nesting levels
//!    (e.g. `LOGSINK_BATCH__MAX_RECORDS=200`)
//! 4. Standard OpenTelemetry variables (`OTEL_SERVICE_NAME`,
//!    `OTEL_RESOURCE_ATTRIBUTES`, `OTEL_EXPORTER_OTLP_ENDPOINT`,
//!    `OTEL_EXPORTER_OTLP_LOGS_ENDPOINT`, `OTEL_EXPORTER_OTLP_HEADERS`)

use crate::buffer::OverflowPolicy;
use crate::encoding::Compression;
use crate::exporter::{InFlightOverflow, TransportKind};
use crate::model::{Resource, Scope};
use crate::utils::errors::{PipelineError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Service name used when nothing else is configured
pub const DEFAULT_SERVICE_NAME: &str = "unknown_service:logsink";

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// `service.name` resource attribute
    pub service_name: String,

    /// Additional resource attributes attached once per batch
    pub resource_attributes: BTreeMap<String, String>,

    /// Instrumentation scope name
    pub scope_name: String,

    /// Instrumentation scope version
    pub scope_version: String,

    /// Ring buffer settings
    pub buffer: BufferConfig,

    /// Batching settings
    pub batch: BatchConfig,

    /// Network exporter settings
    pub exporter: ExporterConfig,

    /// Retry policy for retryable export failures
    pub retry: RetryConfig,

    /// Default grace period for `LogPipeline::close` (milliseconds)
    pub shutdown_grace_ms: u64,
}

/// Ring buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum number of buffered records
    pub capacity: usize,

    /// What `submit` does when the buffer is full
    pub overflow_policy: OverflowPolicy,

    /// Upper bound a producer waits under `OverflowPolicy::Block` (milliseconds)
    pub block_timeout_ms: u64,
}

/// Batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Seal a batch once it holds this many records
    pub max_records: usize,

    /// Seal a batch before its estimated size exceeds this many bytes
    pub max_bytes: usize,

    /// Seal a non-empty batch this long after it was opened (milliseconds)
    pub flush_interval_ms: u64,
}

/// Exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Collector endpoint (full URL, e.g. `http://localhost:4318/v1/logs`)
    pub endpoint: String,

    /// Wire transport
    pub transport: TransportKind,

    /// API key sent with every request, if set
    pub api_key: Option<String>,

    /// Header (or gRPC metadata key) carrying the API key
    pub api_key_header: String,

    /// Extra request headers
    pub headers: BTreeMap<String, String>,

    /// Payload compression
    pub compression: Compression,

    /// Per-request timeout (milliseconds)
    pub timeout_ms: u64,

    /// Maximum concurrent in-flight sends
    pub concurrency: usize,

    /// Encoded batches allowed to wait for a free sender
    pub queue_capacity: usize,

    /// What happens when the waiting queue is full
    pub queue_overflow: InFlightOverflow,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum send attempts per batch, first attempt included
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    pub initial_backoff_ms: u64,

    /// Cap on any single delay (milliseconds)
    pub max_backoff_ms: u64,

    /// Growth factor between consecutive delays
    pub multiplier: f64,

    /// Give up once this much time has passed since the first attempt (milliseconds)
    pub max_elapsed_ms: u64,

    /// Randomise each delay within its upper half
    pub jitter: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            resource_attributes: BTreeMap::new(),
            scope_name: "logsink".to_string(),
            scope_version: env!("CARGO_PKG_VERSION").to_string(),
            buffer: BufferConfig::default(),
            batch: BatchConfig::default(),
            exporter: ExporterConfig::default(),
            retry: RetryConfig::default(),
            shutdown_grace_ms: 5_000,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 2048,
            overflow_policy: OverflowPolicy::DropOldest,
            block_timeout_ms: 50,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_records: 512,
            max_bytes: 1024 * 1024,
            flush_interval_ms: 1_000,
        }
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4318/v1/logs".to_string(),
            transport: TransportKind::Http,
            api_key: None,
            api_key_header: "x-api-key".to_string(),
            headers: BTreeMap::new(),
            compression: Compression::Gzip,
            timeout_ms: 15_000,
            concurrency: 2,
            queue_capacity: 8,
            queue_overflow: InFlightOverflow::DropOldest,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
            max_elapsed_ms: 30_000,
            jitter: true,
        }
    }
}

impl PipelineConfig {
    /// Load configuration, reading the file named by `LOGSINK_CONFIG` if set
    pub fn load() -> Result<Self> {
        let path = std::env::var("LOGSINK_CONFIG").ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Load configuration from defaults, an optional file and the environment
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            debug!("Loading configuration file {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("LOGSINK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: PipelineConfig = builder.build()?.try_deserialize()?;
        config.apply_otel_env(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Overlay the standard OpenTelemetry environment variables
    pub fn apply_otel_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(endpoint) = non_empty("OTEL_EXPORTER_OTLP_LOGS_ENDPOINT") {
            self.exporter.endpoint = endpoint;
        } else if let Some(base) = non_empty("OTEL_EXPORTER_OTLP_ENDPOINT") {
            self.exporter.endpoint = match self.exporter.transport {
                TransportKind::Http => format!("{}/v1/logs", base.trim_end_matches('/')),
                TransportKind::Grpc => base,
            };
        }

        let explicit_service = non_empty("OTEL_SERVICE_NAME");

        if let Some(raw) = non_empty("OTEL_RESOURCE_ATTRIBUTES") {
            let mut attributes = parse_key_value_list(&raw);
            if let Some(service) = attributes.remove("service.name") {
                if explicit_service.is_none() {
                    self.service_name = service;
                }
            }
            self.resource_attributes.extend(attributes);
        }

        if let Some(service) = explicit_service {
            self.service_name = service;
        }

        if let Some(raw) = non_empty("OTEL_EXPORTER_OTLP_HEADERS") {
            self.exporter.headers.extend(parse_key_value_list(&raw));
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(PipelineError::InvalidConfig(msg.to_string()));

        let endpoint = self.exporter.endpoint.trim();
        if endpoint.is_empty() {
            return invalid("exporter.endpoint must be provided");
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return invalid("exporter.endpoint must be an http:// or https:// URL");
        }
        if self.buffer.capacity == 0 {
            return invalid("buffer.capacity must be > 0");
        }
        if self.batch.max_records == 0 {
            return invalid("batch.max_records must be > 0");
        }
        if self.batch.max_bytes == 0 {
            return invalid("batch.max_bytes must be > 0");
        }
        if self.batch.flush_interval_ms == 0 {
            return invalid("batch.flush_interval_ms must be > 0");
        }
        if self.exporter.concurrency == 0 {
            return invalid("exporter.concurrency must be > 0");
        }
        if self.exporter.queue_capacity == 0 {
            return invalid("exporter.queue_capacity must be > 0");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be > 0");
        }
        if !(self.retry.multiplier >= 1.0) {
            return invalid("retry.multiplier must be >= 1.0");
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return invalid("retry.initial_backoff_ms must not exceed retry.max_backoff_ms");
        }
        if self.exporter.transport == TransportKind::Grpc
            && matches!(self.exporter.compression, Compression::Zstd)
        {
            return invalid("zstd compression is not supported with the grpc transport");
        }

        Ok(())
    }

    /// Resource identity shared by every record of this process
    pub fn resource(&self) -> Resource {
        let mut attributes = self.resource_attributes.clone();
        attributes.insert("service.name".to_string(), self.service_name.clone());
        Resource::new(attributes)
    }

    /// Instrumentation scope attached to every batch
    pub fn scope(&self) -> Scope {
        Scope::new(self.scope_name.clone(), self.scope_version.clone())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl BufferConfig {
    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }
}

impl BatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl ExporterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Parse `k1=v1,k2=v2` as used by `OTEL_RESOURCE_ATTRIBUTES` and `OTEL_EXPORTER_OTLP_HEADERS`
pub fn parse_key_value_list(raw: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();

    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                out.insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => warn!("Ignoring malformed key=value entry: {:?}", pair),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(config.exporter.timeout(), Duration::from_secs(15));
        assert_eq!(config.service_name, DEFAULT_SERVICE_NAME);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.exporter.endpoint = String::new();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.buffer.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.retry.initial_backoff_ms = 10_000;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.exporter.transport = TransportKind::Grpc;
        config.exporter.compression = Compression::Zstd;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.exporter.endpoint = "collector:4317".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_key_value_list() {
        let parsed = parse_key_value_list(" team=core, env = prod ,broken,=nokey,");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["team"], "core");
        assert_eq!(parsed["env"], "prod");
    }

    #[test]
    fn test_otel_env_overlay() {
        let mut config = PipelineConfig::default();
        config.apply_otel_env(lookup(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "https://otel.example.com:4318/"),
            ("OTEL_RESOURCE_ATTRIBUTES", "service.name=from-attrs,team=core"),
            ("OTEL_EXPORTER_OTLP_HEADERS", "authorization=Bearer abc"),
        ]));

        assert_eq!(config.exporter.endpoint, "https://otel.example.com:4318/v1/logs");
        assert_eq!(config.service_name, "from-attrs");
        assert_eq!(config.resource_attributes["team"], "core");
        assert!(!config.resource_attributes.contains_key("service.name"));
        assert_eq!(config.exporter.headers["authorization"], "Bearer abc");
    }

    #[test]
    fn test_otel_service_name_wins() {
        let mut config = PipelineConfig::default();
        config.apply_otel_env(lookup(&[
            ("OTEL_SERVICE_NAME", "payments"),
            ("OTEL_RESOURCE_ATTRIBUTES", "service.name=ignored"),
            ("OTEL_EXPORTER_OTLP_LOGS_ENDPOINT", "http://collector/custom"),
        ]));
        assert_eq!(config.service_name, "payments");
        assert_eq!(config.exporter.endpoint, "http://collector/custom");
    }

    #[test]
    fn test_grpc_endpoint_not_suffixed() {
        let mut config = PipelineConfig::default();
        config.exporter.transport = TransportKind::Grpc;
        config.apply_otel_env(lookup(&[("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317")]));
        assert_eq!(config.exporter.endpoint, "http://collector:4317");
    }

    #[test]
    fn test_resource_includes_service_name() {
        let mut config = PipelineConfig::default();
        config.service_name = "checkout".to_string();
        config
            .resource_attributes
            .insert("deployment.environment".to_string(), "prod".to_string());

        let resource = config.resource();
        assert_eq!(resource.get("service.name"), Some("checkout"));
        assert_eq!(resource.get("deployment.environment"), Some("prod"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
service_name = "billing"

[buffer]
capacity = 64
overflow_policy = "reject"

[batch]
max_records = 10

[exporter]
endpoint = "http://127.0.0.1:4318/v1/logs"
compression = "zstd"
"#
        )
        .unwrap();

        let config = PipelineConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.buffer.capacity, 64);
        assert_eq!(config.buffer.overflow_policy, OverflowPolicy::Reject);
        assert_eq!(config.batch.max_records, 10);
        assert_eq!(config.exporter.compression, Compression::Zstd);
        // untouched sections keep their defaults
        assert_eq!(config.retry.max_attempts, 5);
    }
}
