// src/model/record.rs
//! Normalized log record
//!
//! A `Record` is built by the logging adapter and moved into the pipeline by
//! `submit`. After that hand-off nothing downstream mutates it.

use crate::model::resource::Resource;
use crate::utils::clock::unix_nanos_now;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Nesting depth beyond which attribute maps are flattened to text on encode
pub const MAX_ATTRIBUTE_DEPTH: usize = 8;

/// Fixed per-record overhead used by the batch byte estimate
const RECORD_OVERHEAD_BYTES: usize = 64;

/// Log severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// OTLP `SeverityNumber` (first value of each range)
    pub fn number(self) -> i32 {
        match self {
            Severity::Trace => 1,
            Severity::Debug => 5,
            Severity::Info => 9,
            Severity::Warn => 13,
            Severity::Error => 17,
            Severity::Fatal => 21,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    /// Parse a level name, accepting common aliases (`WARNING`, `SEVERE`, `FINE`, ...)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "TRACE" | "FINEST" | "FINER" => Some(Severity::Trace),
            "DEBUG" | "FINE" => Some(Severity::Debug),
            "INFO" | "INFORMATION" | "NOTICE" => Some(Severity::Info),
            "WARN" | "WARNING" => Some(Severity::Warn),
            "ERROR" | "ERR" | "SEVERE" => Some(Severity::Error),
            "FATAL" | "CRITICAL" | "CRIT" | "PANIC" => Some(Severity::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    Map(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Nesting depth: scalars are 0, a map of scalars is 1
    pub fn depth(&self) -> usize {
        match self {
            AttributeValue::Map(map) => 1 + map.values().map(Self::depth).max().unwrap_or(0),
            _ => 0,
        }
    }

    /// Approximate encoded size in bytes
    pub fn estimated_size(&self) -> usize {
        match self {
            AttributeValue::String(s) => s.len() + 2,
            AttributeValue::Int(_) | AttributeValue::Double(_) => 10,
            AttributeValue::Bool(_) => 2,
            AttributeValue::Map(map) => map
                .iter()
                .map(|(k, v)| k.len() + v.estimated_size() + 4)
                .sum::<usize>()
                + 2,
        }
    }

    /// JSON rendering used when a value has to be coerced to text
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttributeValue::String(s) => serde_json::Value::String(s.clone()),
            AttributeValue::Int(i) => serde_json::Value::from(*i),
            AttributeValue::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(d.to_string())),
            AttributeValue::Bool(b) => serde_json::Value::Bool(*b),
            AttributeValue::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        AttributeValue::Int(v as i64)
    }
}

impl From<u32> for AttributeValue {
    fn from(v: u32) -> Self {
        AttributeValue::Int(v as i64)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Double(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<BTreeMap<String, AttributeValue>> for AttributeValue {
    fn from(v: BTreeMap<String, AttributeValue>) -> Self {
        AttributeValue::Map(v)
    }
}

/// Trace/span correlation carried by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceContext {
    pub trace_id: [u8; 16],
    pub span_id: [u8; 8],
    /// W3C trace flags (bit 0 = sampled)
    pub flags: u8,
}

impl TraceContext {
    pub fn new(trace_id: [u8; 16], span_id: [u8; 8], flags: u8) -> Self {
        Self {
            trace_id,
            span_id,
            flags,
        }
    }

    /// Parse lowercase or uppercase hex ids (32 and 16 characters)
    pub fn from_hex(trace_id: &str, span_id: &str, flags: u8) -> Option<Self> {
        let mut trace = [0u8; 16];
        let mut span = [0u8; 8];
        hex::decode_to_slice(trace_id, &mut trace).ok()?;
        hex::decode_to_slice(span_id, &mut span).ok()?;
        Some(Self::new(trace, span, flags))
    }

    /// All-zero ids are invalid per W3C trace context
    pub fn is_valid(&self) -> bool {
        self.trace_id.iter().any(|b| *b != 0) && self.span_id.iter().any(|b| *b != 0)
    }
}

/// One log event
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Event time, nanoseconds since Unix epoch (UTC)
    pub time_unix_nano: u64,

    /// Time the pipeline accepted the record; stamped on submit when zero
    pub observed_time_unix_nano: u64,

    pub severity: Severity,

    /// Original level text when it differs from `severity.as_str()`
    pub severity_text: Option<String>,

    pub body: String,

    pub attributes: BTreeMap<String, AttributeValue>,

    pub trace_context: Option<TraceContext>,

    /// Resource this record belongs to; `None` means the pipeline's resource
    pub resource: Option<Arc<Resource>>,
}

impl Record {
    /// Create a record timestamped now
    pub fn new(severity: Severity, body: impl Into<String>) -> Self {
        Self {
            time_unix_nano: unix_nanos_now(),
            observed_time_unix_nano: 0,
            severity,
            severity_text: None,
            body: body.into(),
            attributes: BTreeMap::new(),
            trace_context: None,
            resource: None,
        }
    }

    pub fn with_timestamp_nanos(mut self, time_unix_nano: u64) -> Self {
        self.time_unix_nano = time_unix_nano;
        self
    }

    /// Set the event time from a `chrono` timestamp; pre-epoch times clamp to 0
    pub fn with_datetime(mut self, time: DateTime<Utc>) -> Self {
        self.time_unix_nano = time
            .timestamp_nanos_opt()
            .map(|n| n.max(0) as u64)
            .unwrap_or(0);
        self
    }

    pub fn with_severity_text(mut self, text: impl Into<String>) -> Self {
        self.severity_text = Some(text.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_trace_context(mut self, trace_context: TraceContext) -> Self {
        self.trace_context = Some(trace_context);
        self
    }

    pub fn with_resource(mut self, resource: Arc<Resource>) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Text written as `severity_text`
    pub fn severity_text(&self) -> &str {
        self.severity_text
            .as_deref()
            .unwrap_or_else(|| self.severity.as_str())
    }

    /// Approximate encoded size, used to bound batch bytes
    pub fn estimated_size(&self) -> usize {
        RECORD_OVERHEAD_BYTES
            + self.body.len()
            + self.severity_text.as_ref().map_or(0, String::len)
            + self
                .attributes
                .iter()
                .map(|(k, v)| k.len() + v.estimated_size() + 4)
                .sum::<usize>()
            + if self.trace_context.is_some() { 28 } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Trace < Severity::Debug);
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
    }

    #[test]
    fn test_severity_numbers() {
        assert_eq!(Severity::Trace.number(), 1);
        assert_eq!(Severity::Info.number(), 9);
        assert_eq!(Severity::Fatal.number(), 21);
    }

    #[test]
    fn test_severity_aliases() {
        assert_eq!(Severity::from_name("warning"), Some(Severity::Warn));
        assert_eq!(Severity::from_name("SEVERE"), Some(Severity::Error));
        assert_eq!(Severity::from_name("fine"), Some(Severity::Debug));
        assert_eq!(Severity::from_name("verbose"), None);
    }

    #[test]
    fn test_attribute_depth() {
        let scalar = AttributeValue::from(1);
        assert_eq!(scalar.depth(), 0);

        let mut inner = BTreeMap::new();
        inner.insert("a".to_string(), AttributeValue::from("x"));
        let mut outer = BTreeMap::new();
        outer.insert("inner".to_string(), AttributeValue::Map(inner));
        assert_eq!(AttributeValue::Map(outer).depth(), 2);
    }

    #[test]
    fn test_attribute_display() {
        assert_eq!(AttributeValue::from("plain").to_string(), "plain");
        assert_eq!(AttributeValue::from(true).to_string(), "true");

        let mut map = BTreeMap::new();
        map.insert("k".to_string(), AttributeValue::from(3));
        assert_eq!(AttributeValue::Map(map).to_string(), r#"{"k":3}"#);
    }

    #[test]
    fn test_trace_context_from_hex() {
        let ctx = TraceContext::from_hex(
            "4bf92f3577b34da6a3ce929d0e0e4736",
            "00f067aa0ba902b7",
            1,
        )
        .unwrap();
        assert_eq!(ctx.trace_id[0], 0x4b);
        assert_eq!(ctx.span_id[7], 0xb7);
        assert!(ctx.is_valid());

        assert!(TraceContext::from_hex("abc", "00f067aa0ba902b7", 0).is_none());
        assert!(!TraceContext::new([0; 16], [0; 8], 0).is_valid());
    }

    #[test]
    fn test_record_builder() {
        let when = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let record = Record::new(Severity::Warn, "disk almost full")
            .with_datetime(when)
            .with_severity_text("WARNING")
            .with_attribute("disk", "/dev/sda1")
            .with_attribute("used_pct", 97.5);

        assert_eq!(record.time_unix_nano, 1_704_164_645_000_000_000);
        assert_eq!(record.severity_text(), "WARNING");
        assert_eq!(record.attributes.len(), 2);
        assert!(record.estimated_size() > record.body.len());
    }

    #[test]
    fn test_default_severity_text() {
        let record = Record::new(Severity::Error, "boom");
        assert_eq!(record.severity_text(), "ERROR");
        assert!(record.time_unix_nano > 0);
        assert_eq!(record.observed_time_unix_nano, 0);
    }
}
