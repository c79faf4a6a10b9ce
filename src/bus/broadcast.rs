//! Topic-keyed broadcast hub
//!
//! One `tokio::sync::broadcast` channel per live topic. Publishing to a topic
//! nobody listens on is a no-op: there is no replay, so a subscriber only
//! sees events published after it subscribed.
//!
//! A topic lives exactly as long as its subscriptions. Dropping the last
//! [`BusSubscription`] of a topic removes the topic, whether or not anything
//! was ever published on it.

use crate::bus::events::{FinalStatus, IterationEvent, StreamEvent, Topic};
use crate::store::models::ExecutionStatus;
use futures_util::stream::{self, Stream};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default per-topic buffer
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

type TopicMap = HashMap<Topic, broadcast::Sender<Arc<StreamEvent>>>;

/// Publish/subscribe hub shared by the orchestrator and the socket handlers
///
/// The map lock is never held across an await point, so every operation is
/// synchronous and a subscription can prune its topic from `Drop`.
#[derive(Clone)]
pub struct BroadcastBus {
    topics: Arc<RwLock<TopicMap>>,
    capacity: usize,
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl BroadcastBus {
    /// Create a bus whose topics buffer up to `capacity` events per receiver
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Start receiving events published on `topic` from now on
    pub fn subscribe(&self, topic: Topic) -> BusSubscription {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let receiver = topics
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        debug!(topic = %topic, "Subscribed to topic");
        BusSubscription {
            topic,
            receiver: Some(receiver),
            topics: Arc::clone(&self.topics),
        }
    }

    /// Deliver `event` to every current subscriber of `topic`
    ///
    /// Returns the number of subscribers reached.
    pub fn publish(&self, topic: &Topic, event: impl Into<StreamEvent>) -> usize {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        match topics.get(topic) {
            Some(sender) => sender.send(Arc::new(event.into())).unwrap_or(0),
            None => 0,
        }
    }

    /// Publish an iteration event on the execution's iteration topic
    pub fn publish_iteration(&self, execution_id: &str, event: IterationEvent) -> usize {
        self.publish(&Topic::Iterations(execution_id.to_string()), event)
    }

    /// Publish the final status on the execution topic
    pub fn publish_final(&self, execution_id: &str, status: ExecutionStatus) -> usize {
        self.publish(
            &Topic::Execution(execution_id.to_string()),
            FinalStatus { status },
        )
    }

    /// Current receiver count of a topic
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of topics with a live channel
    pub fn topic_count(&self) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Receiving end of one topic
///
/// Dropping the last subscription of a topic removes the topic from the bus.
pub struct BusSubscription {
    topic: Topic,
    receiver: Option<broadcast::Receiver<Arc<StreamEvent>>>,
    topics: Arc<RwLock<TopicMap>>,
}

impl BusSubscription {
    /// Next event, or `None` once the topic is gone
    ///
    /// A receiver that fell behind skips the lost events and keeps going.
    pub async fn recv(&mut self) -> Option<Arc<StreamEvent>> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(topic = %self.topic, missed, "Subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Convert into a stream of events that ends when the topic closes
    pub fn into_stream(self) -> impl Stream<Item = Arc<StreamEvent>> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            let event = subscription.recv().await?;
            Some((event, subscription))
        })
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        // Release our receiver first so the count below excludes it
        drop(self.receiver.take());
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        if topics
            .get(&self.topic)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            topics.remove(&self.topic);
            debug!(topic = %self.topic, "Dropped topic without subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn chunk(iteration: u32, content: &str) -> IterationEvent {
        IterationEvent::Chunk {
            iteration,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = BroadcastBus::new(8);
        assert_eq!(bus.publish_iteration("e1", chunk(1, "x")), 0);
        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_fan_out_preserves_order() {
        let bus = BroadcastBus::new(16);
        let topic = Topic::Iterations("e1".to_string());
        let mut a = bus.subscribe(topic.clone());
        let mut b = bus.subscribe(topic.clone());
        assert_eq!(bus.subscriber_count(&topic), 2);

        for piece in ["a", "b", "c"] {
            assert_eq!(bus.publish(&topic, chunk(1, piece)), 2);
        }

        for sub in [&mut a, &mut b] {
            let mut seen = Vec::new();
            for _ in 0..3 {
                match sub.recv().await.as_deref() {
                    Some(StreamEvent::Iteration(IterationEvent::Chunk { content, .. })) => {
                        seen.push(content.clone())
                    }
                    other => panic!("unexpected event {:?}", other),
                }
            }
            assert_eq!(seen, vec!["a", "b", "c"]);
        }
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = BroadcastBus::default();
        let mut iterations = bus.subscribe(Topic::Iterations("e1".into()));
        let mut other = bus.subscribe(Topic::Iterations("e2".into()));

        bus.publish_iteration("e1", chunk(1, "only e1"));
        bus.publish_final("e1", ExecutionStatus::Completed);

        assert!(iterations.recv().await.is_some());
        let nothing =
            tokio::time::timeout(std::time::Duration::from_millis(50), other.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_no_history() {
        let bus = BroadcastBus::new(8);
        let topic = Topic::Execution("e1".to_string());
        let _early = bus.subscribe(topic.clone());
        bus.publish_final("e1", ExecutionStatus::Completed);

        let mut late = bus.subscribe(topic.clone());
        let nothing =
            tokio::time::timeout(std::time::Duration::from_millis(50), late.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_topic_removed_when_last_subscriber_drops() {
        let bus = BroadcastBus::new(8);
        let topic = Topic::Iterations("e1".to_string());
        let first = bus.subscribe(topic.clone());
        let second = bus.subscribe(topic.clone());

        drop(first);
        assert_eq!(bus.topic_count(), 1);
        assert_eq!(bus.subscriber_count(&topic), 1);

        drop(second);
        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_completed_executions_leave_no_topics_behind() {
        let bus = BroadcastBus::new(8);

        for n in 0..100 {
            let id = format!("done-{n}");
            let iterations = bus.subscribe(Topic::Iterations(id.clone()));
            let terminal = bus.subscribe(Topic::Execution(id.clone()));
            bus.publish_iteration(&id, chunk(1, "x"));
            bus.publish_final(&id, ExecutionStatus::Completed);
            drop(iterations);
            drop(terminal);
        }

        // Subscribers that never see a single publish
        for n in 0..50 {
            let id = format!("unknown-{n}");
            let _iterations = bus.subscribe(Topic::Iterations(id.clone()));
            let _terminal = bus.subscribe(Topic::Execution(id));
        }

        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_drop_removes_topic() {
        let bus = BroadcastBus::new(8);
        let stream = bus.subscribe(Topic::Execution("e1".into())).into_stream();
        assert_eq!(bus.topic_count(), 1);
        drop(stream);
        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_keeps_receiving() {
        let bus = BroadcastBus::new(2);
        let topic = Topic::Iterations("e1".to_string());
        let mut sub = bus.subscribe(topic.clone());

        for i in 0..5 {
            bus.publish(&topic, chunk(1, &i.to_string()));
        }

        match sub.recv().await.as_deref() {
            Some(StreamEvent::Iteration(IterationEvent::Chunk { content, .. })) => {
                assert_eq!(content, "3")
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_into_stream() {
        let bus = BroadcastBus::new(8);
        let topic = Topic::Execution("e1".to_string());
        let mut stream = Box::pin(bus.subscribe(topic.clone()).into_stream());
        bus.publish_final("e1", ExecutionStatus::Failed);

        let event = stream.next().await.unwrap();
        assert_eq!(
            *event,
            StreamEvent::Final(FinalStatus {
                status: ExecutionStatus::Failed
            })
        );
    }
}
