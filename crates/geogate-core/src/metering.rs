//! In-memory coalescing of usage, flushed periodically to an [`EventSink`].
//!
//! Buckets live in a sharded [`DashMap`]. Increments go through the entry
//! API and the flush removes keys one at a time, so each increment lands in
//! exactly one flush cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::ids::{ResourceId, SubjectId};
use crate::metrics::{METERING_BUCKETS_RECORDED, METERING_EVENTS_DROPPED, METERING_EVENTS_FLUSHED};
use crate::traits::{bounded, EventSink};

/// Identity a usage bucket is accumulated under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregationKey {
    /// Effective subject (delegator for delegates).
    pub user_id: SubjectId,
    pub resource_id: ResourceId,
    pub resource_group: ResourceId,
    pub provider_id: SubjectId,
    /// Request path with trailing positional segments stripped.
    pub api_path: String,
}

/// Usage accumulated for one key since the last flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationBucket {
    pub bytes: u64,
    pub hits: u64,
}

/// Event published for one drained bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteringEvent {
    #[serde(flatten)]
    pub key: AggregationKey,
    pub bytes: u64,
    pub hits: u64,
    /// Flush time, epoch seconds.
    pub epoch_seconds: i64,
}

/// Result of one flush cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub published: usize,
    pub dropped: usize,
}

/// Strips the last `segments` path segments, e.g. tile matrix/row/col.
#[must_use]
pub fn base_path(path: &str, segments: usize) -> String {
    let trimmed = path.trim_end_matches('/');
    let mut parts: Vec<&str> = trimmed.split('/').collect();
    let keep = parts.len().saturating_sub(segments).max(1);
    parts.truncate(keep);
    let joined = parts.join("/");
    if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}

/// Process-local usage buffer.
pub struct MeteringAggregator {
    buckets: DashMap<AggregationKey, AggregationBucket>,
    sink: Arc<dyn EventSink>,
    publish_timeout: Duration,
}

impl MeteringAggregator {
    pub fn new(sink: Arc<dyn EventSink>, publish_timeout: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            sink,
            publish_timeout,
        }
    }

    /// Adds one qualifying response to the key's bucket.
    pub fn record(&self, key: AggregationKey, bytes: u64) {
        self.buckets
            .entry(key)
            .and_modify(|bucket| {
                bucket.bytes = bucket.bytes.saturating_add(bytes);
                bucket.hits += 1;
            })
            .or_insert(AggregationBucket { bytes, hits: 1 });
        METERING_BUCKETS_RECORDED.inc();
    }

    /// Number of buckets awaiting flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buckets.len()
    }

    /// Takes and removes every current bucket.
    pub fn drain(&self) -> Vec<(AggregationKey, AggregationBucket)> {
        let keys: Vec<AggregationKey> = self.buckets.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.buckets.remove(&key))
            .collect()
    }

    /// Drains and publishes. Failed events are logged and dropped.
    pub async fn flush(&self) -> FlushReport {
        let drained = self.drain();
        if drained.is_empty() {
            return FlushReport::default();
        }

        let epoch_seconds = Utc::now().timestamp();
        let mut report = FlushReport::default();
        for (key, bucket) in drained {
            let event = MeteringEvent {
                key,
                bytes: bucket.bytes,
                hits: bucket.hits,
                epoch_seconds,
            };
            match bounded("event_sink", self.publish_timeout, self.sink.publish(&event)).await {
                Ok(()) => {
                    report.published += 1;
                    METERING_EVENTS_FLUSHED.inc();
                }
                Err(e) => {
                    report.dropped += 1;
                    METERING_EVENTS_DROPPED.inc();
                    error!(
                        user_id = %event.key.user_id,
                        api_path = %event.key.api_path,
                        bytes = event.bytes,
                        error = %e,
                        "dropping metering event"
                    );
                }
            }
        }
        debug!(
            published = report.published,
            dropped = report.dropped,
            "metering flush complete"
        );
        report
    }

    /// Starts the periodic flusher. The returned handle performs a final
    /// flush when shut down.
    pub fn spawn_flusher(self: &Arc<Self>, period: Duration) -> MeteringFlusher {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let aggregator = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        aggregator.flush().await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            let report = aggregator.flush().await;
            info!(
                published = report.published,
                dropped = report.dropped,
                "metering flusher stopped"
            );
        });

        info!("Metering flusher started (interval: {:?})", period);
        MeteringFlusher {
            stop: stop_tx,
            handle,
        }
    }
}

/// Handle to a running flusher task.
pub struct MeteringFlusher {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MeteringFlusher {
    /// Stops the loop and waits for the final flush.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "metering flusher task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, CoreResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<MeteringEvent>>,
        failing: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, event: &MeteringEvent) -> CoreResult<()> {
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(CoreError::collaborator("event_sink", "unavailable"));
            }
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    fn key(path: &str) -> AggregationKey {
        let resource = ResourceId::new();
        AggregationKey {
            user_id: SubjectId::new(),
            resource_id: resource,
            resource_group: resource,
            provider_id: SubjectId::new(),
            api_path: path.to_string(),
        }
    }

    #[test]
    fn base_path_strips_tile_indices() {
        assert_eq!(
            base_path("/collections/abc/map/tiles/WebMercatorQuad/3/2/1", 3),
            "/collections/abc/map/tiles/WebMercatorQuad"
        );
        assert_eq!(base_path("/a/b/c/", 3), "/");
        assert_eq!(base_path("/collections/abc/items", 0), "/collections/abc/items");
    }

    #[test]
    fn record_coalesces_per_key() {
        let aggregator = MeteringAggregator::new(
            Arc::new(RecordingSink::default()),
            Duration::from_secs(1),
        );
        let k = key("/tiles");
        aggregator.record(k.clone(), 100);
        aggregator.record(k.clone(), 50);
        aggregator.record(key("/other"), 1);

        assert_eq!(aggregator.pending(), 2);
        let drained = aggregator.drain();
        let bucket = drained.iter().find(|(dk, _)| *dk == k).map(|(_, b)| *b);
        assert_eq!(bucket, Some(AggregationBucket { bytes: 150, hits: 2 }));
        assert_eq!(aggregator.pending(), 0);
    }

    #[tokio::test]
    async fn flush_publishes_and_empties() {
        let sink = Arc::new(RecordingSink::default());
        let aggregator = MeteringAggregator::new(sink.clone(), Duration::from_secs(1));
        aggregator.record(key("/a"), 10);
        aggregator.record(key("/b"), 20);

        let report = aggregator.flush().await;
        assert_eq!(report, FlushReport { published: 2, dropped: 0 });
        assert_eq!(sink.events.lock().len(), 2);
        assert_eq!(aggregator.flush().await, FlushReport::default());
    }

    #[tokio::test]
    async fn publish_failure_drops_event() {
        let sink = Arc::new(RecordingSink::default());
        sink.failing.store(true, std::sync::atomic::Ordering::SeqCst);
        let aggregator = MeteringAggregator::new(sink.clone(), Duration::from_secs(1));
        aggregator.record(key("/a"), 10);

        let report = aggregator.flush().await;
        assert_eq!(report.dropped, 1);
        assert_eq!(aggregator.pending(), 0);

        sink.failing.store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(aggregator.flush().await.published, 0);
    }

    #[tokio::test]
    async fn shutdown_performs_final_flush() {
        let sink = Arc::new(RecordingSink::default());
        let aggregator = Arc::new(MeteringAggregator::new(sink.clone(), Duration::from_secs(1)));
        let flusher = aggregator.spawn_flusher(Duration::from_secs(3600));

        aggregator.record(key("/late"), 7);
        flusher.shutdown().await;

        let events = sink.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bytes, 7);
    }
}
