//! Pub/Sub Broker
//!
//! The broker tracks which client listens on which topic and owns one
//! bounded queue per connected client. A dedicated delivery task drains
//! each queue into the client's [`ReplyWriter`], so a client receives its
//! pushes in the order they were enqueued.
//!
//! `subscribe` waits until its confirmations have been written before it
//! returns. The connection task therefore cannot answer a later pipelined
//! request ahead of them.
//!
//! ## Locking
//!
//! Bookkeeping lives behind a single mutex that is never held across an
//! `.await`: `subscribe` and `publish` collect the queue handles they need,
//! release the lock, and only then enqueue.

use crate::connection::ReplyWriter;
use crate::pubsub::Message;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Default number of pending pushes per client.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PubSubError {
    #[error("client {0} is not connected")]
    UnknownClient(String),

    #[error("delivery queue for client {0} is closed")]
    QueueClosed(String),
}

/// One queued push. `written` fires once the push is on the wire.
struct Delivery {
    message: Message,
    written: Option<oneshot::Sender<()>>,
}

impl Delivery {
    fn push(message: Message) -> Self {
        Self {
            message,
            written: None,
        }
    }
}

struct ClientSession {
    tx: mpsc::Sender<Delivery>,
    delivery: JoinHandle<()>,
    topics: HashSet<Bytes>,
}

#[derive(Default)]
struct BrokerState {
    clients: HashMap<String, ClientSession>,
    subscriptions: HashMap<Bytes, HashSet<String>>,
}

/// Routes published messages to subscribed clients.
pub struct Broker {
    state: Mutex<BrokerState>,
    queue_capacity: usize,
}

impl Broker {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a client and starts its delivery task.
    ///
    /// Must be called from within a Tokio runtime. Reconnecting an id that
    /// is still registered replaces the old session.
    pub fn connect(&self, id: impl Into<String>, writer: ReplyWriter) {
        let id = id.into();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let delivery = tokio::spawn(deliver(id.clone(), rx, writer));

        let replaced = {
            let mut state = self.state();
            let previous = state.clients.insert(
                id.clone(),
                ClientSession {
                    tx,
                    delivery,
                    topics: HashSet::new(),
                },
            );
            previous.map(|old| {
                for topic in &old.topics {
                    remove_subscriber(&mut state.subscriptions, topic, &id);
                }
                old
            })
        };

        if replaced.is_some() {
            warn!(client = %id, "Client id reused, previous session replaced");
        }
        debug!(client = %id, "Client registered");
    }

    /// Subscribes a client to each topic in order.
    ///
    /// Every topic produces one `subscribed` confirmation carrying the
    /// number of topics the client holds after that topic was added.
    /// Subscribing twice to the same topic is harmless. A client that is
    /// not registered yet is connected with `writer` first.
    ///
    /// Returns once every confirmation has been written to the client.
    pub async fn subscribe(
        &self,
        id: &str,
        topics: &[Bytes],
        writer: &ReplyWriter,
    ) -> Result<usize, PubSubError> {
        if !self.is_connected(id) {
            self.connect(id, writer.clone());
        }

        let (tx, confirmations, active) = {
            let mut state = self.state();
            let BrokerState {
                clients,
                subscriptions,
            } = &mut *state;

            let session = clients
                .get_mut(id)
                .ok_or_else(|| PubSubError::UnknownClient(id.to_string()))?;

            let mut confirmations = Vec::with_capacity(topics.len());
            for topic in topics {
                session.topics.insert(topic.clone());
                subscriptions
                    .entry(topic.clone())
                    .or_default()
                    .insert(id.to_string());
                confirmations.push(Message::subscribed(topic.clone(), session.topics.len()));
            }
            (session.tx.clone(), confirmations, session.topics.len())
        };

        let closed = || PubSubError::QueueClosed(id.to_string());
        let (written_tx, written_rx) = oneshot::channel();
        let mut written_tx = Some(written_tx);
        let last = confirmations.len().saturating_sub(1);

        for (i, message) in confirmations.into_iter().enumerate() {
            let written = if i == last { written_tx.take() } else { None };
            tx.send(Delivery { message, written })
                .await
                .map_err(|_| closed())?;
        }
        if written_tx.is_none() {
            written_rx.await.map_err(|_| closed())?;
        }

        trace!(client = %id, topics = topics.len(), active, "Subscribed");
        Ok(active)
    }

    /// Removes a client from the given topics. Returns how many of them
    /// the client was actually subscribed to.
    pub fn unsubscribe(&self, id: &str, topics: &[Bytes]) -> usize {
        let mut state = self.state();
        let BrokerState {
            clients,
            subscriptions,
        } = &mut *state;

        let Some(session) = clients.get_mut(id) else {
            return 0;
        };

        let mut removed = 0;
        for topic in topics {
            if session.topics.remove(topic) {
                remove_subscriber(subscriptions, topic, id);
                removed += 1;
            }
        }
        removed
    }

    /// Enqueues `payload` for every subscriber of `topic`.
    ///
    /// Returns the number of subscriber sessions found. A subscriber id
    /// without a session is logged and skipped.
    pub async fn publish(&self, topic: &Bytes, payload: Bytes) -> usize {
        let targets: Vec<(String, mpsc::Sender<Delivery>)> = {
            let state = self.state();
            let Some(ids) = state.subscriptions.get(topic) else {
                return 0;
            };

            ids.iter()
                .filter_map(|id| match state.clients.get(id) {
                    Some(session) => Some((id.clone(), session.tx.clone())),
                    None => {
                        error!(client = %id, topic = ?topic, "Subscriber has no session");
                        None
                    }
                })
                .collect()
        };

        let message = Message::published(topic.clone(), payload);
        for (id, tx) in &targets {
            if tx.send(Delivery::push(message.clone())).await.is_err() {
                warn!(client = %id, "Delivery queue closed, message dropped");
            }
        }

        trace!(topic = ?topic, receivers = targets.len(), "Published");
        targets.len()
    }

    /// Forgets a client and all of its subscriptions.
    ///
    /// The client's queue is closed; its delivery task writes whatever is
    /// still queued and then ends. The returned handle resolves when it has.
    pub fn disconnect(&self, id: &str) -> Option<JoinHandle<()>> {
        let mut state = self.state();
        let session = state.clients.remove(id)?;

        for topic in &session.topics {
            remove_subscriber(&mut state.subscriptions, topic, id);
        }
        debug!(client = %id, topics = session.topics.len(), "Client unregistered");

        let ClientSession { tx, delivery, .. } = session;
        drop(tx);
        Some(delivery)
    }

    /// Disconnects a client and gives its delivery task `grace` to drain.
    ///
    /// Returns `false` when the task did not finish in time and was aborted,
    /// which happens when the peer stops reading.
    pub async fn close(&self, id: &str, grace: Duration) -> bool {
        let Some(mut delivery) = self.disconnect(id) else {
            return true;
        };

        match tokio::time::timeout(grace, &mut delivery).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(client = %id, error = %e, "Delivery task failed");
                true
            }
            Err(_) => {
                warn!(client = %id, grace = ?grace, "Delivery did not drain, aborting");
                delivery.abort();
                false
            }
        }
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.state().clients.contains_key(id)
    }

    pub fn subscriber_count(&self, topic: &[u8]) -> usize {
        self.state()
            .subscriptions
            .get(topic)
            .map_or(0, HashSet::len)
    }

    pub fn client_count(&self) -> usize {
        self.state().clients.len()
    }

    pub fn topic_count(&self) -> usize {
        self.state().subscriptions.len()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Broker")
            .field("clients", &state.clients.len())
            .field("topics", &state.subscriptions.len())
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

fn remove_subscriber(subscriptions: &mut HashMap<Bytes, HashSet<String>>, topic: &Bytes, id: &str) {
    if let Some(ids) = subscriptions.get_mut(topic) {
        ids.remove(id);
        if ids.is_empty() {
            subscriptions.remove(topic);
        }
    }
}

async fn deliver(id: String, mut rx: mpsc::Receiver<Delivery>, writer: ReplyWriter) {
    while let Some(Delivery { message, written }) = rx.recv().await {
        if let Err(e) = writer.send(&message.to_resp()).await {
            warn!(client = %id, error = %e, "Failed to deliver message");
            break;
        }
        if let Some(written) = written {
            let _ = written.send(());
        }
    }
    trace!(client = %id, "Delivery task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RespValue;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn client(broker: &Broker, id: &str) -> DuplexStream {
        let (near, far) = tokio::io::duplex(4096);
        broker.connect(id, ReplyWriter::new(far));
        near
    }

    /// Writer for calls on already-connected clients; never written to.
    fn unused_writer() -> ReplyWriter {
        ReplyWriter::new(tokio::io::sink())
    }

    async fn expect_frame(stream: &mut DuplexStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
            .await
            .expect("timed out waiting for push")
            .unwrap();
        assert_eq!(buf, expected, "got {:?}", String::from_utf8_lossy(&buf));
    }

    fn topic(name: &str) -> Bytes {
        Bytes::from(name.to_string())
    }

    #[tokio::test]
    async fn test_subscribe_confirms_each_topic() {
        let broker = Broker::new();
        let mut alice = client(&broker, "alice");

        let active = broker
            .subscribe("alice", &[topic("a"), topic("b")], &unused_writer())
            .await
            .unwrap();
        assert_eq!(active, 2);

        expect_frame(&mut alice, b"*3\r\n$10\r\nsubscribed\r\n$1\r\na\r\n:1\r\n").await;
        expect_frame(&mut alice, b"*3\r\n$10\r\nsubscribed\r\n$1\r\nb\r\n:2\r\n").await;
        assert_eq!(broker.subscriber_count(b"a"), 1);
    }

    #[tokio::test]
    async fn test_subscribe_connects_unknown_client() {
        let broker = Broker::new();
        let (mut near, far) = tokio::io::duplex(4096);

        broker
            .subscribe("carol", &[topic("a")], &ReplyWriter::new(far))
            .await
            .unwrap();

        assert!(broker.is_connected("carol"));
        expect_frame(&mut near, b"*3\r\n$10\r\nsubscribed\r\n$1\r\na\r\n:1\r\n").await;
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let broker = Broker::new();
        let mut alice = client(&broker, "alice");
        let mut bob = client(&broker, "bob");

        broker.subscribe("alice", &[topic("topicA")], &unused_writer()).await.unwrap();
        broker.subscribe("bob", &[topic("topicA")], &unused_writer()).await.unwrap();
        let confirm = b"*3\r\n$10\r\nsubscribed\r\n$6\r\ntopicA\r\n:1\r\n";
        expect_frame(&mut alice, confirm).await;
        expect_frame(&mut bob, confirm).await;

        let reached = broker.publish(&topic("topicA"), Bytes::from("hello")).await;
        assert_eq!(reached, 2);

        let push = b"*3\r\n$7\r\nmessage\r\n$6\r\ntopicA\r\n$5\r\nhello\r\n";
        expect_frame(&mut alice, push).await;
        expect_frame(&mut bob, push).await;
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let broker = Broker::new();
        assert_eq!(broker.publish(&topic("empty"), Bytes::from("x")).await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = Broker::new();
        let _alice = client(&broker, "alice");
        let mut bob = client(&broker, "bob");

        broker.subscribe("alice", &[topic("t")], &unused_writer()).await.unwrap();
        broker.subscribe("bob", &[topic("t")], &unused_writer()).await.unwrap();
        expect_frame(&mut bob, b"*3\r\n$10\r\nsubscribed\r\n$1\r\nt\r\n:1\r\n").await;

        assert_eq!(broker.unsubscribe("alice", &[topic("t"), topic("other")]), 1);
        assert_eq!(broker.subscriber_count(b"t"), 1);
        assert_eq!(broker.publish(&topic("t"), Bytes::from("m")).await, 1);
        expect_frame(&mut bob, b"*3\r\n$7\r\nmessage\r\n$1\r\nt\r\n$1\r\nm\r\n").await;
    }

    #[tokio::test]
    async fn test_messages_arrive_in_publish_order() {
        let broker = Broker::new();
        let mut alice = client(&broker, "alice");
        broker.subscribe("alice", &[topic("t")], &unused_writer()).await.unwrap();
        expect_frame(&mut alice, b"*3\r\n$10\r\nsubscribed\r\n$1\r\nt\r\n:1\r\n").await;

        for payload in ["1", "2", "3"] {
            broker.publish(&topic("t"), Bytes::from(payload)).await;
        }
        for payload in ["1", "2", "3"] {
            let expected = format!("*3\r\n$7\r\nmessage\r\n$1\r\nt\r\n$1\r\n{}\r\n", payload);
            expect_frame(&mut alice, expected.as_bytes()).await;
        }
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up_topics() {
        let broker = Broker::new();
        let _alice = client(&broker, "alice");
        broker
            .subscribe("alice", &[topic("a"), topic("b")], &unused_writer())
            .await
            .unwrap();
        assert_eq!(broker.topic_count(), 2);

        let delivery = broker.disconnect("alice").unwrap();
        delivery.await.unwrap();

        assert!(!broker.is_connected("alice"));
        assert_eq!(broker.topic_count(), 0);
        assert_eq!(broker.publish(&topic("a"), Bytes::from("x")).await, 0);
        assert!(broker.disconnect("alice").is_none());
    }

    #[tokio::test]
    async fn test_missing_session_is_skipped() {
        let broker = Broker::new();
        let mut bob = client(&broker, "bob");
        broker.subscribe("bob", &[topic("t")], &unused_writer()).await.unwrap();
        expect_frame(&mut bob, b"*3\r\n$10\r\nsubscribed\r\n$1\r\nt\r\n:1\r\n").await;

        broker
            .state()
            .subscriptions
            .get_mut(&topic("t"))
            .unwrap()
            .insert("ghost".to_string());

        assert_eq!(broker.publish(&topic("t"), Bytes::from("m")).await, 1);
        expect_frame(&mut bob, b"*3\r\n$7\r\nmessage\r\n$1\r\nt\r\n$1\r\nm\r\n").await;
    }

    #[tokio::test]
    async fn test_confirmation_written_before_subscribe_returns() {
        let broker = Broker::new();
        let (mut near, far) = tokio::io::duplex(4096);
        let writer = ReplyWriter::new(far);
        broker.connect("alice", writer.clone());

        broker
            .subscribe("alice", &[topic("a"), topic("b")], &writer)
            .await
            .unwrap();
        writer.send(&RespValue::simple_string("PONG")).await.unwrap();

        expect_frame(&mut near, b"*3\r\n$10\r\nsubscribed\r\n$1\r\na\r\n:1\r\n").await;
        expect_frame(&mut near, b"*3\r\n$10\r\nsubscribed\r\n$1\r\nb\r\n:2\r\n").await;
        expect_frame(&mut near, b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_failed_write_does_not_affect_other_subscribers() {
        let broker = Broker::new();
        let mut alice = client(&broker, "alice");
        let mut bob = client(&broker, "bob");

        broker.subscribe("alice", &[topic("t")], &unused_writer()).await.unwrap();
        broker.subscribe("bob", &[topic("t")], &unused_writer()).await.unwrap();
        let confirm = b"*3\r\n$10\r\nsubscribed\r\n$1\r\nt\r\n:1\r\n";
        expect_frame(&mut alice, confirm).await;
        expect_frame(&mut bob, confirm).await;

        drop(alice);

        assert_eq!(broker.publish(&topic("t"), Bytes::from("one")).await, 2);
        expect_frame(&mut bob, b"*3\r\n$7\r\nmessage\r\n$1\r\nt\r\n$3\r\none\r\n").await;

        assert_eq!(broker.publish(&topic("t"), Bytes::from("two")).await, 2);
        expect_frame(&mut bob, b"*3\r\n$7\r\nmessage\r\n$1\r\nt\r\n$3\r\ntwo\r\n").await;
        assert_eq!(broker.subscriber_count(b"t"), 2);
    }

    #[tokio::test]
    async fn test_close_drains_queue() {
        let broker = Broker::new();
        let mut alice = client(&broker, "alice");
        broker.subscribe("alice", &[topic("t")], &unused_writer()).await.unwrap();
        broker.publish(&topic("t"), Bytes::from("m")).await;

        assert!(broker.close("alice", Duration::from_secs(2)).await);
        assert!(!broker.is_connected("alice"));

        expect_frame(&mut alice, b"*3\r\n$10\r\nsubscribed\r\n$1\r\nt\r\n:1\r\n").await;
        expect_frame(&mut alice, b"*3\r\n$7\r\nmessage\r\n$1\r\nt\r\n$1\r\nm\r\n").await;
        assert!(broker.close("alice", Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_close_aborts_stalled_delivery() {
        let broker = Broker::new();
        let (_near, far) = tokio::io::duplex(64);
        broker.connect("alice", ReplyWriter::new(far));
        broker.subscribe("alice", &[topic("t")], &unused_writer()).await.unwrap();

        // Nobody reads `_near`, so this push cannot be written out.
        let payload = Bytes::from(vec![b'x'; 1000]);
        assert_eq!(broker.publish(&topic("t"), payload).await, 1);

        let closed = tokio::time::timeout(
            Duration::from_secs(2),
            broker.close("alice", Duration::from_millis(100)),
        )
        .await
        .expect("close should not hang");
        assert!(!closed);
        assert_eq!(broker.client_count(), 0);
    }

    #[tokio::test]
    async fn test_resubscribe_same_topic() {
        let broker = Broker::new();
        let _alice = client(&broker, "alice");
        broker.subscribe("alice", &[topic("t")], &unused_writer()).await.unwrap();
        let active = broker.subscribe("alice", &[topic("t")], &unused_writer()).await.unwrap();

        assert_eq!(active, 1);
        assert_eq!(broker.subscriber_count(b"t"), 1);
    }
}
