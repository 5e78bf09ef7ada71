use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::MetricPoint;
use crate::client::DexClient;
use crate::config::DEFAULT_LOG_AFTER;

// ─── PendingBatch ────────────────────────────────────────────────

/// Points waiting for the next flush. Owned by the batcher loop alone.
#[derive(Debug)]
pub struct PendingBatch {
    points: Vec<MetricPoint>,
    log_after: usize,
}

impl PendingBatch {
    pub fn new(log_after: usize) -> Self {
        Self {
            points: Vec::with_capacity(preallocation(log_after)),
            log_after,
        }
    }

    /// Append a point. Once the batch holds more than `log_after` points
    /// the whole batch is handed back and the accumulator starts over, so
    /// every flushed batch carries exactly `log_after + 1` points.
    pub fn push(&mut self, point: MetricPoint) -> Option<Vec<MetricPoint>> {
        self.points.push(point);
        if self.points.len() > self.log_after {
            let next = Vec::with_capacity(preallocation(self.log_after));
            Some(std::mem::replace(&mut self.points, next))
        } else {
            None
        }
    }

    /// Whatever is left, for the final flush on shutdown.
    pub fn take(&mut self) -> Option<Vec<MetricPoint>> {
        if self.points.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.points))
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Room for one full batch, but never more than a default-sized one: the
/// threshold comes from user config and may be huge.
fn preallocation(log_after: usize) -> usize {
    log_after.saturating_add(1).min(DEFAULT_LOG_AFTER + 1)
}

// ─── Batcher ─────────────────────────────────────────────────────

/// Single consumer of the intake queue. Accumulates points and hands full
/// batches to short-lived upload tasks without waiting on them.
pub struct Batcher {
    intake: mpsc::Receiver<MetricPoint>,
    pending: PendingBatch,
    client: Arc<DexClient>,
    in_flight: JoinSet<()>,
    max_in_flight: usize,
    shutdown: watch::Receiver<bool>,
}

impl Batcher {
    pub fn new(
        intake: mpsc::Receiver<MetricPoint>,
        client: Arc<DexClient>,
        log_after: usize,
        max_in_flight: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            intake,
            pending: PendingBatch::new(log_after),
            client,
            in_flight: JoinSet::new(),
            max_in_flight: max_in_flight.max(1),
            shutdown,
        }
    }

    /// Consume the intake queue until shutdown is signalled or every
    /// producer is gone, then flush what is left and wait for uploads.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                received = self.intake.recv() => match received {
                    Some(point) => self.accept(point),
                    None => break,
                },
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!("dex: upload task failed: {e}");
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.drain().await;
        info!("dex: batcher stopped");
    }

    fn accept(&mut self, point: MetricPoint) {
        if let Some(batch) = self.pending.push(point) {
            self.dispatch(batch);
        }
    }

    /// Start an upload for `batch`. Returns false when the upload cap is
    /// reached and the batch was dropped instead.
    fn dispatch(&mut self, batch: Vec<MetricPoint>) -> bool {
        if self.in_flight.len() >= self.max_in_flight {
            warn!(
                dropped = batch.len(),
                in_flight = self.in_flight.len(),
                "dex: upload limit reached, dropping batch"
            );
            return false;
        }

        let client = Arc::clone(&self.client);
        self.in_flight.spawn(async move { send_batch(&client, batch).await });
        true
    }

    async fn drain(&mut self) {
        self.intake.close();
        while let Ok(point) = self.intake.try_recv() {
            if let Some(batch) = self.pending.push(point) {
                self.dispatch_when_free(batch).await;
            }
        }
        if let Some(rest) = self.pending.take() {
            self.dispatch_when_free(rest).await;
        }

        while let Some(joined) = self.in_flight.join_next().await {
            if let Err(e) = joined {
                error!("dex: upload task failed: {e}");
            }
        }
    }

    /// Shutdown path: wait for a free upload slot rather than drop.
    async fn dispatch_when_free(&mut self, batch: Vec<MetricPoint>) {
        while self.in_flight.len() >= self.max_in_flight {
            if self.in_flight.join_next().await.is_none() {
                break;
            }
        }
        self.dispatch(batch);
    }
}

/// Upload one batch. Failures are logged and the batch is gone.
async fn send_batch(client: &DexClient, batch: Vec<MetricPoint>) {
    let points = batch.len();
    match client.send_metrics(&batch).await {
        Ok(()) => debug!(points, "dex: batch delivered"),
        Err(e) => error!(points, "dex: batch discarded: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DexConfig;
    use crate::metrics::MetricKind;
    use chrono::Utc;
    use mockito::Matcher;
    use std::time::Duration;

    fn point(path: &str) -> MetricPoint {
        MetricPoint::new(Utc::now(), "test-host", path, "svc", MetricKind::Latency, 1)
    }

    /// Matches a `{"payload":[...]}` body holding exactly `n` flat objects.
    fn exactly(n: usize) -> Matcher {
        Matcher::Regex(format!(
            r#"^\{{"payload":\[\{{[^{{}}]*\}}(,\{{[^{{}}]*\}}){{{}}}\]\}}$"#,
            n - 1
        ))
    }

    async fn wait_for(mock: &mockito::Mock) {
        for _ in 0..300 {
            if mock.matched_async().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn batcher_for(
        server: &mockito::ServerGuard,
        log_after: usize,
        max_in_flight: usize,
    ) -> (Batcher, mpsc::Sender<MetricPoint>, watch::Sender<bool>) {
        let client = Arc::new(DexClient::new(&DexConfig::new("k").with_host(server.url())).unwrap());
        let (tx, rx) = mpsc::channel(50);
        let (stop_tx, stop_rx) = watch::channel(false);
        (Batcher::new(rx, client, log_after, max_in_flight, stop_rx), tx, stop_tx)
    }

    #[test]
    fn flush_fires_on_the_point_past_the_threshold() {
        let mut batch = PendingBatch::new(3);
        for i in 0..3 {
            assert!(batch.push(point(&format!("/{i}"))).is_none());
        }
        assert_eq!(batch.len(), 3);

        let flushed = batch.push(point("/3")).expect("fourth point flushes");
        assert_eq!(flushed.len(), 4);
        assert!(batch.is_empty());

        let paths: Vec<_> = flushed.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, ["/0", "/1", "/2", "/3"]);
    }

    #[test]
    fn zero_threshold_flushes_every_point() {
        let mut batch = PendingBatch::new(0);
        assert_eq!(batch.push(point("/a")).map(|b| b.len()), Some(1));
        assert_eq!(batch.push(point("/b")).map(|b| b.len()), Some(1));
    }

    #[test]
    fn huge_threshold_does_not_preallocate_it() {
        for log_after in [usize::MAX, 1usize << 40] {
            let mut batch = PendingBatch::new(log_after);
            assert!(batch.push(point("/a")).is_none());
            assert_eq!(batch.len(), 1);
            assert!(batch.points.capacity() <= DEFAULT_LOG_AFTER + 1);
        }
    }

    #[test]
    fn take_returns_leftovers_once() {
        let mut batch = PendingBatch::new(10);
        assert!(batch.take().is_none());
        batch.push(point("/x"));
        assert_eq!(batch.take().map(|b| b.len()), Some(1));
        assert!(batch.take().is_none());
    }

    #[tokio::test]
    async fn full_batch_is_uploaded_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/metric")
            .match_body(exactly(3))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let (batcher, tx, stop) = batcher_for(&server, 2, 4);
        let handle = tokio::spawn(batcher.run());

        for i in 0..3 {
            tx.send(point(&format!("/{i}"))).await.unwrap();
        }
        wait_for(&mock).await;

        stop.send(true).unwrap();
        handle.await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn failed_batch_is_not_requeued() {
        let mut server = mockito::Server::new_async().await;
        let lost = server
            .mock("POST", "/v1/metric")
            .match_body(Matcher::Regex("/lost-".into()))
            .with_status(500)
            .with_body("boom")
            .expect(1)
            .create_async()
            .await;
        let kept = server
            .mock("POST", "/v1/metric")
            .match_body(Matcher::AllOf(vec![
                exactly(3),
                Matcher::PartialJson(serde_json::json!({
                    "payload": [{"path": "/kept-0"}, {"path": "/kept-1"}, {"path": "/kept-2"}]
                })),
            ]))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let (batcher, tx, stop) = batcher_for(&server, 2, 4);
        let handle = tokio::spawn(batcher.run());

        for i in 0..3 {
            tx.send(point(&format!("/lost-{i}"))).await.unwrap();
        }
        wait_for(&lost).await;
        for i in 0..3 {
            tx.send(point(&format!("/kept-{i}"))).await.unwrap();
        }
        wait_for(&kept).await;

        stop.send(true).unwrap();
        handle.await.unwrap();
        lost.assert_async().await;
        kept.assert_async().await;
    }

    #[tokio::test]
    async fn shutdown_flushes_partial_batch() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/metric")
            .match_body(exactly(5))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let (batcher, tx, stop) = batcher_for(&server, 50, 4);
        let handle = tokio::spawn(batcher.run());

        for i in 0..5 {
            tx.send(point(&format!("/{i}"))).await.unwrap();
        }
        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("batcher did not stop")
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn closed_intake_flushes_and_stops_without_a_signal() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/metric")
            .match_body(exactly(2))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let (batcher, tx, stop) = batcher_for(&server, 50, 4);
        let handle = tokio::spawn(batcher.run());

        for i in 0..2 {
            tx.send(point(&format!("/{i}"))).await.unwrap();
        }
        drop(tx);
        drop(stop);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("batcher outlived its handle")
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn batch_is_dropped_when_upload_limit_is_reached() {
        let server = mockito::Server::new_async().await;
        let (mut batcher, _tx, _stop) = batcher_for(&server, 0, 1);

        batcher.in_flight.spawn(std::future::pending());
        assert!(!batcher.dispatch(vec![point("/busy")]));
        assert_eq!(batcher.in_flight.len(), 1);

        batcher.in_flight.abort_all();
    }
}
