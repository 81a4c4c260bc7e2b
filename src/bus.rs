//! Event Bus (C9).
//!
//! In-process topic fan-out. Publish takes a short-lived lock only to
//! snapshot the current subscriber set for a subject, then releases it
//! before pushing to each subscriber's own bounded queue (§5) — so a slow
//! subscriber never holds up the publisher or other subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::envelope::Envelope;

const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct BusMessage {
    pub subject: String,
    pub envelope: Arc<Envelope>,
}

pub struct Subscription {
    pub id: u64,
    subject: String,
    receiver: mpsc::Receiver<BusMessage>,
    bus: Arc<EventBusInner>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.subject, self.id);
    }
}

struct EventBusInner {
    subscribers: Mutex<HashMap<String, Vec<(u64, mpsc::Sender<BusMessage>)>>>,
    next_id: AtomicU64,
}

impl EventBusInner {
    fn unsubscribe(&self, subject: &str, id: u64) {
        let mut subs = self.subscribers.lock();
        if let Some(list) = subs.get_mut(subject) {
            list.retain(|(existing_id, _)| *existing_id != id);
            if list.is_empty() {
                subs.remove(subject);
            }
        }
    }
}

/// In-process, exact-match topic fan-out. Subject matching is exact — no
/// wildcards in the core (§4.9).
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            inner: Arc::new(EventBusInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe(&self, subject: &str) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        self.inner
            .subscribers
            .lock()
            .entry(subject.to_string())
            .or_default()
            .push((id, tx));
        Subscription {
            id,
            subject: subject.to_string(),
            receiver: rx,
            bus: Arc::clone(&self.inner),
        }
    }

    /// Hand `envelope` to every current subscriber of `subject`. Never
    /// blocks: a subscriber whose queue is full is evicted (its sender
    /// dropped, which closes its stream) rather than slowing the publisher
    /// or dropping the message for anyone else (§4.9, §5).
    pub fn publish(&self, subject: &str, envelope: Arc<Envelope>) {
        let snapshot = {
            let subs = self.inner.subscribers.lock();
            subs.get(subject).cloned().unwrap_or_default()
        };

        let mut evicted = Vec::new();
        for (id, sender) in &snapshot {
            let message = BusMessage {
                subject: subject.to_string(),
                envelope: Arc::clone(&envelope),
            };
            if sender.try_send(message).is_err() {
                evicted.push(*id);
            }
        }

        if !evicted.is_empty() {
            let mut subs = self.inner.subscribers.lock();
            if let Some(list) = subs.get_mut(subject) {
                list.retain(|(id, _)| !evicted.contains(id));
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn envelope() -> Arc<Envelope> {
        Arc::new(Envelope {
            producer: "pub_ae".into(),
            subject: "fused.track".into(),
            payload: b"x".to_vec(),
            timestamp: Utc::now(),
            labels: vec![],
            signature: [0u8; 64],
        })
    }

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("fused.track");
        bus.publish("fused.track", envelope());
        let message = sub.recv().await.unwrap();
        assert_eq!(message.subject, "fused.track");
    }

    #[tokio::test]
    async fn subscriber_on_other_subject_does_not_receive() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("other.topic");
        bus.publish("fused.track", envelope());
        let result = tokio::time::timeout(std::time::Duration::from_millis(20), sub.recv()).await;
        assert!(result.is_err(), "subscriber should not have received anything");
    }

    #[tokio::test]
    async fn dropping_subscription_removes_it_from_the_registry() {
        let bus = EventBus::new();
        let sub = bus.subscribe("fused.track");
        drop(sub);
        // publish after the only subscriber dropped must not panic or block
        bus.publish("fused.track", envelope());
    }

    #[tokio::test]
    async fn full_queue_evicts_the_slow_subscriber_without_blocking_publish() {
        let bus = EventBus::new();
        let mut slow = bus.subscribe("fused.track");
        for _ in 0..SUBSCRIBER_QUEUE_CAPACITY + 1 {
            bus.publish("fused.track", envelope());
        }
        // the sender side was evicted once the queue filled, so the channel
        // closes once buffered messages are drained
        let mut received = 0;
        while let Some(_msg) = slow.recv().await {
            received += 1;
        }
        assert!(received <= SUBSCRIBER_QUEUE_CAPACITY);
    }
}
