use bytes::Bytes;
use dashmap::DashMap;
use skywave_core::protocol::{event_json, Event};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

pub type SubscriberId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// General JSON events plus tagged binary (receiver audio).
    Main,
    /// Binary-only spectrum batches, isolated from JSON chatter.
    Signal,
    /// Demodulated scanner audio plus small JSON meta updates.
    ScannerAudio,
}

impl ChannelKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Signal => "signal",
            Self::ScannerAudio => "scanner_audio",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Payload {
    Json(Arc<str>),
    Binary(Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Self::Json(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }
}

struct SubscriberHandle {
    tx: tokio::sync::mpsc::Sender<Payload>,
    queued_bytes: Arc<AtomicUsize>,
}

/// Receiving side handed to the subscriber's writer task. Dropping it (or
/// the task finishing) is all the cleanup the writer needs; the next
/// broadcast evicts the dead handle.
pub struct SubscriberStream {
    pub id: SubscriberId,
    rx: tokio::sync::mpsc::Receiver<Payload>,
    queued_bytes: Arc<AtomicUsize>,
}

impl SubscriberStream {
    pub async fn recv(&mut self) -> Option<Payload> {
        let payload = self.rx.recv().await?;
        self.queued_bytes.fetch_sub(payload.len(), Ordering::Relaxed);
        Some(payload)
    }
}

/// One broadcast domain. Producers call `broadcast` from any thread and
/// never block: a subscriber that is full, over its byte budget, or gone
/// is evicted on the spot.
pub struct BroadcastChannel {
    kind: ChannelKind,
    subscribers: DashMap<SubscriberId, SubscriberHandle>,
    byte_limit: usize,
    evicted: AtomicU64,
}

impl BroadcastChannel {
    fn new(kind: ChannelKind, byte_limit: usize) -> Self {
        Self {
            kind,
            subscribers: DashMap::new(),
            byte_limit,
            evicted: AtomicU64::new(0),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn broadcast(&self, payload: &Payload) {
        let len = payload.len();
        let kind = self.kind;
        let evicted = &self.evicted;
        let byte_limit = self.byte_limit;
        self.subscribers.retain(|id, sub| {
            let queued = sub.queued_bytes.fetch_add(len, Ordering::Relaxed) + len;
            if queued > byte_limit {
                tracing::debug!(
                    channel = kind.name(),
                    subscriber = *id,
                    queued,
                    "subscriber over byte budget; evicting"
                );
                evicted.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            match sub.tx.try_send(payload.clone()) {
                Ok(()) => true,
                Err(e) => {
                    sub.queued_bytes.fetch_sub(len, Ordering::Relaxed);
                    tracing::debug!(
                        channel = kind.name(),
                        subscriber = *id,
                        full = matches!(e, tokio::sync::mpsc::error::TrySendError::Full(_)),
                        "subscriber send failed; evicting"
                    );
                    evicted.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        });
    }

    pub fn remove(&self, id: SubscriberId) {
        self.subscribers.remove(&id);
    }
}

/// The three-channel fan-out plane.
pub struct Hub {
    pub main: BroadcastChannel,
    pub signal: BroadcastChannel,
    pub scanner_audio: BroadcastChannel,
    queue_msgs: usize,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new(queue_msgs: usize, queue_bytes: usize) -> Self {
        Self {
            main: BroadcastChannel::new(ChannelKind::Main, queue_bytes),
            signal: BroadcastChannel::new(ChannelKind::Signal, queue_bytes),
            scanner_audio: BroadcastChannel::new(ChannelKind::ScannerAudio, queue_bytes),
            queue_msgs,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn channel(&self, kind: ChannelKind) -> &BroadcastChannel {
        match kind {
            ChannelKind::Main => &self.main,
            ChannelKind::Signal => &self.signal,
            ChannelKind::ScannerAudio => &self.scanner_audio,
        }
    }

    pub fn subscribe(&self, kind: ChannelKind) -> SubscriberStream {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = tokio::sync::mpsc::channel(self.queue_msgs);
        let queued_bytes = Arc::new(AtomicUsize::new(0));
        self.channel(kind).subscribers.insert(
            id,
            SubscriberHandle {
                tx,
                queued_bytes: queued_bytes.clone(),
            },
        );
        tracing::info!(channel = kind.name(), subscriber = id, "subscribed");
        SubscriberStream {
            id,
            rx,
            queued_bytes,
        }
    }

    pub fn unsubscribe(&self, kind: ChannelKind, id: SubscriberId) {
        self.channel(kind).remove(id);
        tracing::info!(channel = kind.name(), subscriber = id, "unsubscribed");
    }

    /// Serializes once, clones the `Arc<str>` per subscriber. Not valid on
    /// the binary-only signal channel.
    pub fn broadcast_event(&self, kind: ChannelKind, event: &Event) {
        debug_assert!(kind != ChannelKind::Signal, "signal channel is binary-only");
        let payload = Payload::Json(Arc::from(event_json(event)));
        self.channel(kind).broadcast(&payload);
    }

    pub fn broadcast_binary(&self, kind: ChannelKind, bytes: Bytes) {
        let payload = Payload::Binary(bytes);
        self.channel(kind).broadcast(&payload);
    }
}
