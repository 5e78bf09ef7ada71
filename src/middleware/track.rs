use axum::{
    extract::{Request, State},
    http::{header::HOST, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use super::observer::ResponseObserver;
use crate::capabilities::Capabilities;
use crate::metrics::{MetricKind, MetricPoint};
use crate::Dex;

/// What the middleware knows about a request once its handler returns.
#[derive(Debug, Clone)]
pub struct Completion {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// `None` when no status was observed. Never the case behind `track`,
    /// where axum always has one.
    pub status: Option<StatusCode>,
    pub path: String,
    pub host: String,
}

/// axum middleware: time the inner handler, observe its status, and hand
/// the result to `Dex` for recording.
///
/// Recording happens on a separate task, so the response goes straight
/// back to the client.
pub async fn track(State(dex): State<Dex>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_owned();
    let host = request_host(&req);

    let started_at = Utc::now();
    let start = Instant::now();
    let observer = ResponseObserver::new();
    let response = observer.observe(next.run(req).await);
    let elapsed = start.elapsed();

    dex.record(Completion {
        started_at,
        elapsed,
        status: observer.status(),
        path,
        host,
    });

    response
}

/// The `Host` header (or URI authority) without any `:port`.
pub fn request_host(req: &Request) -> String {
    let raw = req
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .unwrap_or_default();
    strip_port(raw).to_owned()
}

fn strip_port(host: &str) -> &str {
    // [::1]:8080 keeps its brackets
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    host.split(':').next().unwrap_or(host)
}

/// Build the points for one request, in latency, memory, status order.
/// `memory` is only called when memory collection is on.
pub fn points_for(
    completion: &Completion,
    caps: Capabilities,
    hostname: &str,
    memory: impl FnOnce() -> u64,
) -> Vec<MetricPoint> {
    let mut points = Vec::with_capacity(3);
    let mut push = |kind, value| {
        points.push(MetricPoint::new(
            completion.started_at,
            hostname,
            &completion.path,
            &completion.host,
            kind,
            value,
        ))
    };

    if caps.allows(MetricKind::Latency) {
        let nanos = i64::try_from(completion.elapsed.as_nanos()).unwrap_or(i64::MAX);
        push(MetricKind::Latency, nanos);
    }
    if caps.allows(MetricKind::Memory) {
        let bytes = i64::try_from(memory()).unwrap_or(i64::MAX);
        push(MetricKind::Memory, bytes);
    }
    if caps.allows(MetricKind::StatusCode) {
        // Unknown status is not a code; leave it out.
        if let Some(status) = completion.status {
            push(MetricKind::StatusCode, i64::from(status.as_u16()));
        }
    }

    points
}
