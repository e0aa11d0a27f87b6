//! Event hub backing the WebSocket surface (spec §4.7): a bounded ring buffer
//! for replay plus per-subscriber fan-out. Publishing never blocks a slow
//! consumer — its channel fills and further events are dropped for it alone.

use phoenix_types::{Channel, Event, EventKind};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const RING_BUFFER_CAPACITY: usize = 10_000;
const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

struct Subscriber {
    id: u64,
    channels: HashSet<Channel>,
    sender: mpsc::Sender<Event>,
    slow: Arc<AtomicBool>,
}

pub struct EventHub {
    sequence: AtomicU64,
    ring: Mutex<VecDeque<Event>>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscriber_id: AtomicU64,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            ring: Mutex::new(VecDeque::with_capacity(RING_BUFFER_CAPACITY)),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    pub fn publish(&self, kind: EventKind, timestamp: chrono::DateTime<chrono::Utc>) -> Event {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = Event {
            sequence,
            timestamp,
            kind,
        };

        {
            let mut ring = self.ring.lock().unwrap();
            if ring.len() >= RING_BUFFER_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }

        let channel = event.kind.channel();
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|sub| {
            if !sub.channels.contains(&channel) {
                return true;
            }
            match sub.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(subscriber_id = sub.id, "dropping event for slow subscriber");
                    sub.slow.store(true, Ordering::SeqCst);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        event
    }

    /// Subscribes to the given channels; the receiver yields only events
    /// published after this call (no replay — callers use `events_since` for that).
    ///
    /// The third return value flips to `true` the moment this subscriber's
    /// channel overflows (spec §4.7 slow-consumer policy); a caller holding
    /// the socket open (e.g. the WebSocket writer) polls it to decide when
    /// to send `error: slow_consumer` and close, without the hub itself
    /// needing to know anything about WebSockets.
    pub fn subscribe(&self, channels: Vec<Channel>) -> (u64, mpsc::Receiver<Event>, Arc<AtomicBool>) {
        self.subscribe_with_capacity(channels, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn subscribe_with_capacity(
        &self,
        channels: Vec<Channel>,
        capacity: usize,
    ) -> (u64, mpsc::Receiver<Event>, Arc<AtomicBool>) {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(capacity);
        let slow = Arc::new(AtomicBool::new(false));
        self.subscribers.lock().unwrap().push(Subscriber {
            id,
            channels: channels.into_iter().collect(),
            sender: tx,
            slow: slow.clone(),
        });
        (id, rx, slow)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().unwrap().retain(|s| s.id != id);
    }

    /// Removes just `channels` from subscriber `id`'s channel set, leaving
    /// its receiver, any other subscribed channels, and its slow flag
    /// untouched.
    pub fn unsubscribe_channels(&self, id: u64, channels: &[Channel]) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(sub) = subscribers.iter_mut().find(|s| s.id == id) {
            for channel in channels {
                sub.channels.remove(channel);
            }
        }
    }

    /// Returns buffered events with `sequence > since`, for reconnect replay.
    pub fn events_since(&self, since: u64) -> Vec<Event> {
        self.ring
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.sequence > since)
            .cloned()
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc)
    }

    #[tokio::test]
    async fn subscriber_only_receives_matching_channel() {
        let hub = EventHub::new();
        let (_id, mut rx, _slow) = hub.subscribe(vec![Channel::Agents]);

        hub.publish(
            EventKind::TaskCreated {
                task_id: uuid::Uuid::new_v4(),
                host_id: "h1".into(),
            },
            now(),
        );
        hub.publish(
            EventKind::AgentConnected {
                host_id: "h1".into(),
            },
            now(),
        );

        let received = rx.recv().await.unwrap();
        assert!(matches!(received.kind, EventKind::AgentConnected { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sequence_numbers_are_monotonic() {
        let hub = EventHub::new();
        let e1 = hub.publish(EventKind::AgentConnected { host_id: "a".into() }, now());
        let e2 = hub.publish(EventKind::AgentConnected { host_id: "b".into() }, now());
        assert_eq!(e2.sequence, e1.sequence + 1);
    }

    #[tokio::test]
    async fn events_since_filters_replayed_history() {
        let hub = EventHub::new();
        hub.publish(EventKind::AgentConnected { host_id: "a".into() }, now());
        let e2 = hub.publish(EventKind::AgentConnected { host_id: "b".into() }, now());

        let replay = hub.events_since(e2.sequence - 1);
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].sequence, e2.sequence);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_events_instead_of_blocking_publish() {
        let hub = EventHub::new();
        let (_id, _rx, slow) = hub.subscribe_with_capacity(vec![Channel::Agents], 1);

        for _ in 0..5 {
            hub.publish(EventKind::AgentConnected { host_id: "a".into() }, now());
        }
        assert_eq!(hub.subscriber_count(), 1);
        assert!(slow.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unsubscribe_channels_narrows_without_dropping_subscriber() {
        let hub = EventHub::new();
        let (id, mut rx, _slow) = hub.subscribe(vec![Channel::Agents, Channel::Tasks]);
        hub.unsubscribe_channels(id, &[Channel::Agents]);

        hub.publish(EventKind::AgentConnected { host_id: "a".into() }, now());
        assert!(rx.try_recv().is_err());

        hub.publish(
            EventKind::TaskCreated {
                task_id: uuid::Uuid::new_v4(),
                host_id: "a".into(),
            },
            now(),
        );
        let received = rx.recv().await.unwrap();
        assert!(matches!(received.kind, EventKind::TaskCreated { .. }));
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_delivery() {
        let hub = EventHub::new();
        let (id, mut rx, _slow) = hub.subscribe(vec![Channel::Agents]);
        hub.unsubscribe(id);

        hub.publish(EventKind::AgentConnected { host_id: "a".into() }, now());
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.subscriber_count(), 0);
    }
}
