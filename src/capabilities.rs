use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::client::{DexClient, KeyDetail};
use crate::metrics::MetricKind;

/// Which metric kinds the request path may currently emit.
///
/// The poller swaps the whole value under one write lock, so a reader
/// never sees half of one poll and half of another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Master switch: false until the first successful poll, and after
    /// any failed one.
    pub active: bool,
    pub latency: bool,
    pub memory: bool,
    pub status_code: bool,
}

impl Capabilities {
    pub fn from_detail(detail: &KeyDetail) -> Self {
        Self {
            active: true,
            latency: detail.allows(MetricKind::Latency),
            memory: detail.allows(MetricKind::Memory),
            status_code: detail.allows(MetricKind::StatusCode),
        }
    }

    pub fn allows(&self, kind: MetricKind) -> bool {
        self.active
            && match kind {
                MetricKind::Latency => self.latency,
                MetricKind::Memory => self.memory,
                MetricKind::StatusCode => self.status_code,
            }
    }
}

/// Shared handle to the current `Capabilities`.
#[derive(Debug, Clone, Default)]
pub struct CapabilityFlags {
    inner: Arc<RwLock<Capabilities>>,
}

impl CapabilityFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Capabilities {
        *self.inner.read()
    }

    pub fn replace(&self, caps: Capabilities) {
        *self.inner.write() = caps;
    }

    /// Drop the master switch, keeping the per-kind view for the next
    /// successful poll to overwrite.
    pub fn deactivate(&self) {
        self.inner.write().active = false;
    }
}

/// Apply one poll's outcome to `flags`.
pub async fn refresh(client: &DexClient, flags: &CapabilityFlags) {
    match client.fetch_key_detail().await {
        Ok(detail) => {
            let caps = Capabilities::from_detail(&detail);
            debug!(
                key = %detail.data.name,
                latency = caps.latency,
                memory = caps.memory,
                status_code = caps.status_code,
                "key detail refreshed"
            );
            flags.replace(caps);
        }
        Err(e) => {
            warn!("dex: key detail poll failed, collection disabled: {e}");
            flags.deactivate();
        }
    }
}

/// Poll the key detail every `interval`, starting immediately, until
/// `shutdown` flips to true or its sender (the last `Dex` handle) is gone.
pub async fn run_poller(
    client: Arc<DexClient>,
    flags: CapabilityFlags,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => refresh(&client, &flags).await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("dex: key detail poller stopped");
}
