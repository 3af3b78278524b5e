//! Live stream subscribers and per-tick fan-out
//!
//! Each subscriber owns a bounded outbound queue drained by its own
//! connection task. `broadcast` only ever does a non-blocking enqueue, so the
//! cycle loop never waits on a subscriber. A subscriber whose queue is closed
//! or full is dropped from the registry and never sent to again.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::model::CycleSnapshot;

/// One serialized stream message, shared by every subscriber of a tick
pub type Frame = Arc<str>;

pub type SubscriberId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("subscriber connection closed")]
    Closed,

    #[error("subscriber queue full")]
    Overflow,
}

/// Outbound side of one subscriber connection
pub trait SnapshotSink: Send + Sync {
    fn try_deliver(&self, frame: Frame) -> Result<(), DeliveryError>;
}

impl SnapshotSink for mpsc::Sender<Frame> {
    fn try_deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Overflow,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Outcome of one `broadcast`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: Vec<SubscriberId>,
}

#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<SubscriberId, Box<dyn SnapshotSink>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, sink: Box<dyn SnapshotSink>) -> SubscriberId {
        let id = Uuid::now_v7();
        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(id, sink);
        info!(subscriber = %id, total = subscribers.len(), "Subscriber registered");
        id
    }

    /// Create a bounded channel, register its sender and hand back the receiver
    pub async fn subscribe(&self, capacity: usize) -> (SubscriberId, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.register(Box::new(tx)).await;
        (id, rx)
    }

    /// Returns whether the subscriber was still registered
    pub async fn unregister(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let removed = subscribers.remove(&id).is_some();
        if removed {
            info!(subscriber = %id, total = subscribers.len(), "Subscriber unregistered");
        }
        removed
    }

    pub async fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscribers.read().await.is_empty()
    }

    /// Serialize the snapshot once and offer it to every subscriber
    pub async fn broadcast(&self, snapshot: &CycleSnapshot) -> BroadcastReport {
        match serde_json::to_string(&snapshot.to_message()) {
            Ok(json) => self.broadcast_frame(Frame::from(json)).await,
            Err(e) => {
                error!("Failed to serialize snapshot {}: {}", snapshot.timestamp, e);
                BroadcastReport::default()
            }
        }
    }

    pub async fn broadcast_frame(&self, frame: Frame) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        {
            let subscribers = self.subscribers.read().await;
            for (id, sink) in subscribers.iter() {
                match sink.try_deliver(frame.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        warn!(subscriber = %id, "Dropping subscriber: {}", e);
                        report.dropped.push(*id);
                    }
                }
            }
        }

        if !report.dropped.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in &report.dropped {
                subscribers.remove(id);
            }
        }

        debug!(
            delivered = report.delivered,
            dropped = report.dropped.len(),
            "Broadcast complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<Frame>>>);

    impl SnapshotSink for RecordingSink {
        fn try_deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
            self.0.lock().unwrap().push(frame);
            Ok(())
        }
    }

    struct BrokenSink;

    impl SnapshotSink for BrokenSink {
        fn try_deliver(&self, _: Frame) -> Result<(), DeliveryError> {
            Err(DeliveryError::Closed)
        }
    }

    fn snapshot() -> CycleSnapshot {
        CycleSnapshot::empty(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_broken_subscriber_is_isolated() {
        let registry = SubscriberRegistry::new();
        let first = RecordingSink::default();
        let third = RecordingSink::default();

        registry.register(Box::new(first.clone())).await;
        let broken = registry.register(Box::new(BrokenSink)).await;
        registry.register(Box::new(third.clone())).await;

        let report = registry.broadcast(&snapshot()).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped, vec![broken]);
        assert_eq!(first.0.lock().unwrap().len(), 1);
        assert_eq!(third.0.lock().unwrap().len(), 1);
        assert!(!registry.contains(broken).await);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_removed_subscriber_gets_nothing_more() {
        let registry = SubscriberRegistry::new();
        let sink = RecordingSink::default();
        let id = registry.register(Box::new(sink.clone())).await;

        registry.broadcast(&snapshot()).await;
        assert!(registry.unregister(id).await);
        assert!(!registry.unregister(id).await);
        registry.broadcast(&snapshot()).await;

        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_channel_is_dropped() {
        let registry = SubscriberRegistry::new();
        let (id, rx) = registry.subscribe(4).await;
        drop(rx);

        let report = registry.broadcast(&snapshot()).await;
        assert_eq!(report.dropped, vec![id]);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_full_queue_disconnects() {
        let registry = SubscriberRegistry::new();
        let (id, mut rx) = registry.subscribe(2).await;

        registry.broadcast(&snapshot()).await;
        registry.broadcast(&snapshot()).await;
        assert!(registry.contains(id).await);

        let report = registry.broadcast(&snapshot()).await;
        assert_eq!(report.dropped, vec![id]);

        // queued frames stay readable, in order, then the channel ends
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_frames_are_stream_messages() {
        let registry = SubscriberRegistry::new();
        let (_, mut rx) = registry.subscribe(4).await;
        registry.broadcast(&snapshot()).await;

        let frame = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["timestamp"], "2024-03-01T12:00:00.000000Z");
        assert_eq!(value["objects"], serde_json::json!([]));
        assert_eq!(value["alerts"], serde_json::json!([]));
    }
}
