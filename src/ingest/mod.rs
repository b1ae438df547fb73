// src/ingest/mod.rs
//! Plain-text line ingestion for the CLI
//!
//! - `severity_from_text`: first level token in a line → `Severity`
//! - `LineAssembler`: groups continuation lines (stack traces, wrapped
//!   messages) with the line that started the record
//! - `LossyLines`: newline-split reader that replaces invalid UTF-8 instead
//!   of failing

use crate::model::{Record, Severity};
use crate::utils::errors::{PipelineError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Default record-start pattern: an ISO-8601-ish date and time prefix
pub const DEFAULT_RECORD_START: &str = r"^\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}";

static LEVEL_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(TRACE|DEBUG|FINE|INFO|WARN|WARNING|ERROR|SEVERE|FATAL)\b")
        .expect("level pattern is valid")
});

/// Severity named by the first level token in `text`, with the token as written
pub fn severity_from_text(text: &str) -> Option<(Severity, &str)> {
    let token = LEVEL_TOKEN.find(text)?.as_str();
    Severity::from_name(token).map(|severity| (severity, token))
}

/// Build a record from one assembled text entry.
///
/// Unrecognised levels fall back to `INFO` without severity text.
pub fn record_from_text(text: impl Into<String>) -> Record {
    let text = text.into();
    let detected = severity_from_text(&text).map(|(severity, token)| (severity, token.to_string()));

    match detected {
        Some((severity, token)) => Record::new(severity, text).with_severity_text(token),
        None => Record::new(Severity::Info, text),
    }
}

/// Groups raw lines into multi-line entries.
///
/// A line matching the record-start pattern closes the pending entry and
/// opens a new one; any other line is appended to the pending entry. Lines
/// seen before the first match each form their own entry.
#[derive(Debug)]
pub struct LineAssembler {
    start: Regex,
    pending: Option<String>,
    seen_start: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::with_pattern(DEFAULT_RECORD_START).expect("default record start pattern is valid")
    }

    pub fn with_pattern(pattern: &str) -> Result<Self> {
        let start = Regex::new(pattern)
            .map_err(|e| PipelineError::InvalidConfig(format!("record start pattern: {}", e)))?;
        Ok(Self {
            start,
            pending: None,
            seen_start: false,
        })
    }

    /// Feed one line (without its newline); returns a completed entry if this
    /// line closed one
    pub fn feed(&mut self, line: &str) -> Option<String> {
        let line = line.trim_end_matches(['\r', '\n']);

        if self.start.is_match(line) {
            self.seen_start = true;
            return self.pending.replace(line.to_string());
        }

        if !self.seen_start {
            // no record boundary seen yet: every line stands alone
            return self.pending.replace(line.to_string());
        }

        match self.pending.as_mut() {
            Some(entry) => {
                entry.push('\n');
                entry.push_str(line);
                None
            }
            None => {
                self.pending = Some(line.to_string());
                None
            }
        }
    }

    /// Flush the pending entry at end of input
    pub fn finish(&mut self) -> Option<String> {
        self.pending.take()
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads input line by line, decoding each line lossily.
///
/// Invalid UTF-8 sequences become U+FFFD so a stray binary byte never stops
/// ingestion. `next_line` is cancel safe: a partial line survives a dropped
/// call and is completed by the next one.
pub struct LossyLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LossyLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Next line without its terminator, or `None` at end of input
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&self.buf)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.buf.clear();
        Ok(Some(line))
    }
}
