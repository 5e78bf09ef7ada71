use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Response;

/// Records the status code a handler ends up writing. Headers and body
/// bytes pass through untouched.
///
/// `0` means nothing has been written yet; `status()` reports that as
/// `None`, never as a real code.
#[derive(Debug, Clone, Default)]
pub struct ResponseObserver {
    status: Arc<AtomicU16>,
}

impl ResponseObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit status write.
    pub fn write_status(&self, status: StatusCode) {
        self.status.store(status.as_u16(), Ordering::Release);
    }

    /// Body bytes are going out. With no status written yet the client
    /// gets an implicit 200, so that is what we record.
    pub fn write_body(&self) {
        let _ = self.status.compare_exchange(
            0,
            StatusCode::OK.as_u16(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self.status.load(Ordering::Acquire) {
            0 => None,
            code => StatusCode::from_u16(code).ok(),
        }
    }

    /// Record the head of `response` and hand it back unchanged.
    ///
    /// An axum response always carries a status by the time it leaves the
    /// handler (a bare body is already a 200), so the head status is final
    /// and the body is not wrapped.
    pub fn observe(&self, response: Response) -> Response {
        self.write_status(response.status());
        response
    }
}
