//! Core types for the durable event-stream service.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Fixed width of a zero-padded decimal [`Offset`]. Chosen so that
/// lexicographic string order equals numeric order for any offset a single
/// path could plausibly reach.
pub const OFFSET_WIDTH: usize = 16;

/// Sentinel meaning "before the beginning" — requests full history.
pub const BEFORE_START: &str = "-1";

/// Format a numeric offset as a zero-padded, fixed-width decimal string.
pub fn format_offset(offset: u64) -> String {
    format!("{:0width$}", offset, width = OFFSET_WIDTH)
}

/// Parse an offset string into its numeric value.
///
/// Returns `None` for anything that isn't exactly [`OFFSET_WIDTH`] ASCII
/// digits, including the `-1` sentinel (callers special-case that first).
pub fn parse_offset(offset: &str) -> Option<u64> {
    if offset.len() != OFFSET_WIDTH || !offset.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    offset.parse().ok()
}

/// What a client sends to append an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventInput {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(default = "default_version")]
    pub version: i64,
}

fn default_version() -> i64 {
    1
}

impl EventInput {
    /// Validate the envelope per spec: non-empty `type`, non-negative `version`.
    /// `payload` presence is enforced by serde (it has no `Option`/default).
    pub fn validate(&self) -> Result<(), crate::error::EnvelopeError> {
        if self.event_type.trim().is_empty() {
            return Err(crate::error::EnvelopeError::EmptyType);
        }
        if self.version < 0 {
            return Err(crate::error::EnvelopeError::NegativeVersion);
        }
        Ok(())
    }
}

/// A durably stored event: an [`EventInput`] plus system-assigned fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    pub offset: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub path: String,
    pub version: i64,
}

impl Event {
    /// Minified JSON for SSE `data:` frames.
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Millisecond-precision RFC3339, matching spec's wire format
/// (`2025-01-20T12:00:00.123Z`).
pub fn format_created_at(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Validate a stream path: non-empty, no empty segments.
///
/// Equality is byte-equality; the core never interprets segments beyond
/// this shape check.
pub fn validate_stream_path(path: &str) -> bool {
    !path.is_empty() && path.split('/').all(|segment| !segment.is_empty())
}

/// Which backend persists events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    File,
    Sql,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(BackendKind::Memory),
            "file" => Ok(BackendKind::File),
            "sql" | "sqlite" => Ok(BackendKind::Sql),
            other => Err(format!("unknown backend kind: {other}")),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Sql => "sql",
        };
        write!(f, "{name}")
    }
}

/// Server configuration options.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    /// Route prefix under which the two endpoints are mounted, e.g. `/agents`.
    pub path_prefix: String,
    pub backend: BackendKind,
    /// Storage root for the file and sql backends. Unused for memory.
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4437,
            path_prefix: "/agents".to_string(),
            backend: BackendKind::Memory,
            data_dir: None,
        }
    }
}
