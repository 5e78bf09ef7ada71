//! Per-request latency, memory and status metrics for axum services,
//! batched and shipped to DEX.
//!
//! ```no_run
//! # async fn demo() -> dex::Result<()> {
//! use axum::{routing::get, Router};
//!
//! let dex = dex::Dex::start(dex::DexConfig::new("<service key>"))?;
//! let app: Router = dex.instrument(Router::new().route("/", get(|| async { "Hello" })));
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

pub mod capabilities;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;

pub use capabilities::{Capabilities, CapabilityFlags};
pub use client::DexClient;
pub use config::DexConfig;
pub use error::{DexError, Result};
pub use metrics::{MetricKind, MetricPoint};

use std::sync::Arc;

use axum::Router;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use metrics::{resolve_hostname, Batcher, MemoryProbe};
use middleware::track::{points_for, Completion};

/// Handle to a running metrics pipeline. Cheap to clone; every clone
/// feeds the same intake queue.
#[derive(Clone)]
pub struct Dex {
    inner: Arc<Inner>,
}

struct Inner {
    /// Stable per-process identifier stamped on every point.
    hostname: String,

    /// What the service key may collect right now. Written by the poller.
    flags: CapabilityFlags,

    /// Producer side of the intake queue. Held for all of one request's
    /// pushes so its points stay adjacent in the queue.
    intake: tokio::sync::Mutex<mpsc::Sender<MetricPoint>>,

    memory: MemoryProbe,

    /// Flipped to true by `shutdown`; both background loops watch it.
    shutdown: watch::Sender<bool>,

    /// Poller and batcher, joined on shutdown.
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Dex {
    /// Spawn the key-detail poller and the batcher. Must be called from
    /// inside a Tokio runtime.
    pub fn start(config: DexConfig) -> Result<Self> {
        let client = Arc::new(DexClient::new(&config)?);
        let (intake_tx, intake_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let flags = CapabilityFlags::new();

        let poller = tokio::spawn(capabilities::run_poller(
            Arc::clone(&client),
            flags.clone(),
            config.poll_interval,
            shutdown_rx.clone(),
        ));
        let batcher = tokio::spawn(
            Batcher::new(
                intake_rx,
                client,
                config.log_after,
                config.max_in_flight_dispatches,
                shutdown_rx,
            )
            .run(),
        );

        let hostname = resolve_hostname();
        info!(
            %hostname,
            host = %config.host,
            log_after = config.log_after,
            "dex: metrics pipeline started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                hostname,
                flags,
                intake: tokio::sync::Mutex::new(intake_tx),
                memory: MemoryProbe::new(),
                shutdown,
                tasks: parking_lot::Mutex::new(vec![poller, batcher]),
            }),
        })
    }

    /// Wrap every route of `router` with the metrics middleware.
    pub fn instrument<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(axum::middleware::from_fn_with_state(
            self.clone(),
            middleware::track,
        ))
    }

    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.flags.snapshot()
    }

    /// Queue the points for one finished request. The points, memory
    /// sample included, are built here at completion; only the pushes run
    /// on their own task, waiting there if the intake queue is full.
    pub fn record(&self, completion: Completion) {
        let caps = self.inner.flags.snapshot();
        if !caps.active {
            return;
        }

        let points = points_for(&completion, caps, &self.inner.hostname, || {
            self.inner.memory.resident_bytes()
        });
        if points.is_empty() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let intake = inner.intake.lock().await;
            for point in points {
                if intake.send(point).await.is_err() {
                    debug!(path = %completion.path, "dex: intake closed, points dropped");
                    return;
                }
            }
        });
    }

    /// Stop polling, flush what has been queued, and wait for in-flight
    /// uploads. Requests recorded afterwards are dropped.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);

        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!("dex: background task failed: {e}");
            }
        }
        info!("dex: metrics pipeline stopped");
    }

    /// A pipeline with no background tasks: whatever is recorded lands on
    /// `intake` for the test to inspect.
    #[cfg(test)]
    pub(crate) fn from_parts(
        hostname: &str,
        flags: CapabilityFlags,
        intake: mpsc::Sender<MetricPoint>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                hostname: hostname.to_owned(),
                flags,
                intake: tokio::sync::Mutex::new(intake),
                memory: MemoryProbe::new(),
                shutdown,
                tasks: parking_lot::Mutex::new(Vec::new()),
            }),
        }
    }
}
