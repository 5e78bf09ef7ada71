pub mod batcher;
pub mod probe;

pub use batcher::{Batcher, PendingBatch};
pub use probe::{resolve_hostname, MemoryProbe};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Platform tag stamped on every point this crate produces.
pub const PLATFORM: &str = "rust";

/// What a `MetricPoint::value` measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Handler wall time, nanoseconds.
    Latency,
    /// Process resident memory, bytes.
    Memory,
    /// HTTP status code written to the client.
    StatusCode,
}

impl MetricKind {
    /// Name used by the DEX servers, both in key details and payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Latency => "latency",
            Self::Memory => "memory",
            Self::StatusCode => "status_code",
        }
    }

    /// Parse a name from the key detail. Kinds this crate does not know
    /// yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "latency" => Some(Self::Latency),
            "memory" => Some(Self::Memory),
            "status_code" => Some(Self::StatusCode),
            _ => None,
        }
    }
}

/// A single observation shipped to DEX. Built once at request completion
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricPoint {
    /// Request start instant, shared by every point of the request.
    pub time: DateTime<Utc>,
    pub hostname: String,
    pub platform: &'static str,
    pub path: String,
    /// Virtual host without the port.
    pub host: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub value: i64,
}

impl MetricPoint {
    pub fn new(
        time: DateTime<Utc>,
        hostname: &str,
        path: &str,
        host: &str,
        kind: MetricKind,
        value: i64,
    ) -> Self {
        Self {
            time,
            hostname: hostname.to_owned(),
            platform: PLATFORM,
            path: path.to_owned(),
            host: host.to_owned(),
            kind,
            value,
        }
    }
}

/// Body of `POST /v1/metric`.
#[derive(Debug, Serialize)]
pub struct MetricEnvelope<'a> {
    pub payload: &'a [MetricPoint],
}
