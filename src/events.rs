//! Event subscription registry and fan-out.
//!
//! Callbacks are keyed by event name, with `"*"` as the reserved wildcard
//! key. Delivery is fire-and-forget: each invocation runs in its own spawned
//! task, so a slow or panicking callback can never stall the dispatch loop
//! or starve other subscribers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::record::Record;

/// Subscription key matching every event.
pub const WILDCARD: &str = "*";

pub(crate) type BoxedCallbackFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub(crate) type EventCallback = Arc<dyn Fn(Record) -> BoxedCallbackFuture + Send + Sync>;

/// Handle returned by `subscribe`, used to remove the callback again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub(crate) struct EventBus {
    callbacks: HashMap<String, Vec<(SubscriptionId, EventCallback)>>,
    broadcaster: broadcast::Sender<Record>,
    next_id: u64,
}

impl EventBus {
    pub(crate) fn new(buffer_size: usize) -> Self {
        let (broadcaster, _) = broadcast::channel(buffer_size);
        Self {
            callbacks: HashMap::new(),
            broadcaster,
            next_id: 0,
        }
    }

    /// Register `callback` under `event_name`; same-name callbacks keep
    /// their insertion order.
    pub(crate) fn subscribe(&mut self, event_name: String, callback: EventCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.callbacks
            .entry(event_name)
            .or_default()
            .push((id, callback));
        id
    }

    /// Remove a callback; returns whether it was still registered.
    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let mut removed = false;
        self.callbacks.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            removed |= entries.len() != before;
            !entries.is_empty()
        });
        removed
    }

    /// Fan `record` out to name-specific and wildcard subscribers, one
    /// spawned task per callback, and feed the broadcast stream.
    pub(crate) fn publish(&self, record: Record) {
        let _ = self.broadcaster.send(record.clone());

        let Some(name) = record.event_name() else {
            return;
        };
        let matching = self
            .callbacks
            .get(name)
            .into_iter()
            .chain(self.callbacks.get(WILDCARD))
            .flatten();

        let mut spawned = 0usize;
        for (_, callback) in matching {
            tokio::spawn(callback(record.clone()));
            spawned += 1;
        }
        if spawned > 0 {
            log::debug!("dispatched event '{name}' to {spawned} callback(s)");
        }
    }

    /// Fresh receiver on the broadcast feed.
    pub(crate) fn stream_receiver(&self) -> broadcast::Receiver<Record> {
        self.broadcaster.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn event(name: &str) -> Record {
        [("Event", name)].into_iter().collect()
    }

    fn collector(tx: mpsc::UnboundedSender<Record>) -> EventCallback {
        Arc::new(move |record| -> BoxedCallbackFuture {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(record);
            })
        })
    }

    async fn recv_one(rx: &mut mpsc::UnboundedReceiver<Record>) -> Record {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for callback delivery")
            .expect("collector channel closed")
    }

    #[tokio::test]
    async fn test_named_subscription_receives_matching_events_only() {
        let mut bus = EventBus::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe("Hangup".to_string(), collector(tx));

        bus.publish(event("Newchannel"));
        bus.publish(event("Hangup"));

        let got = recv_one(&mut rx).await;
        assert_eq!(got.event_name(), Some("Hangup"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wildcard_receives_every_event() {
        let mut bus = EventBus::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(WILDCARD.to_string(), collector(tx));

        bus.publish(event("Newchannel"));
        bus.publish(event("PeerStatus"));

        let mut names = vec![
            recv_one(&mut rx).await.event_name().unwrap().to_string(),
            recv_one(&mut rx).await.event_name().unwrap().to_string(),
        ];
        names.sort();
        assert_eq!(names, ["Newchannel", "PeerStatus"]);
    }

    #[tokio::test]
    async fn test_named_and_wildcard_both_delivered() {
        let mut bus = EventBus::new(16);
        let (named_tx, mut named_rx) = mpsc::unbounded_channel();
        let (wild_tx, mut wild_rx) = mpsc::unbounded_channel();
        bus.subscribe("Hangup".to_string(), collector(named_tx));
        bus.subscribe(WILDCARD.to_string(), collector(wild_tx));

        bus.publish(event("Hangup"));

        assert_eq!(recv_one(&mut named_rx).await.event_name(), Some("Hangup"));
        assert_eq!(recv_one(&mut wild_rx).await.event_name(), Some("Hangup"));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let mut bus = EventBus::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = bus.subscribe("Hangup".to_string(), collector(tx));

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));

        bus.publish(event("Hangup"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_block_others() {
        let mut bus = EventBus::new(16);
        bus.subscribe(
            "Hangup".to_string(),
            Arc::new(|_record| -> BoxedCallbackFuture {
                Box::pin(async {
                    panic!("subscriber bug");
                })
            }),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe("Hangup".to_string(), collector(tx));

        bus.publish(event("Hangup"));

        assert_eq!(recv_one(&mut rx).await.event_name(), Some("Hangup"));
    }

    #[tokio::test]
    async fn test_broadcast_stream_receives_published_events() {
        let bus = EventBus::new(16);
        let mut receiver = bus.stream_receiver();

        bus.publish(event("Newchannel"));

        let got = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.event_name(), Some("Newchannel"));
    }
}
