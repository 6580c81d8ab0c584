use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::bus::{EventBus, Subscription, partition_for_key};
use crate::{Delivery, EventBusError, EventEnvelope, RecordPosition, Result};

/// Settings for the in-memory bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Partitions created for every topic.
    pub partitions: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { partitions: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupPartition {
    group: String,
    topic: String,
    partition: u32,
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, Vec<Vec<EventEnvelope>>>,
    committed: HashMap<GroupPartition, u64>,
    claimed: HashSet<GroupPartition>,
}

impl BusState {
    fn topic_mut(&mut self, topic: &str, partitions: u32) -> &mut Vec<Vec<EventEnvelope>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| (0..partitions).map(|_| Vec::new()).collect())
    }
}

struct Shared {
    config: BusConfig,
    state: Mutex<BusState>,
    published: Notify,
    closed: AtomicBool,
}

impl Shared {
    // The state is never left half-updated, so a poisoned lock is still usable.
    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// In-process partitioned log.
///
/// Keeps every message for the life of the bus and tracks committed offsets
/// per consumer group, so a subscriber that joins after a crash resumes from
/// the first uncommitted message. Cloning shares the same log.
#[derive(Clone)]
pub struct InMemoryEventBus {
    shared: Arc<Shared>,
}

impl InMemoryEventBus {
    /// Creates a bus with the default partition count.
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(BusState::default()),
                published: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> BusConfig {
        self.shared.config
    }

    /// Rejects further publishes and wakes every waiting subscriber with
    /// [`EventBusError::Closed`].
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.published.notify_waiters();
    }

    /// Every message on `topic`, partition by partition.
    pub fn records(&self, topic: &str) -> Vec<EventEnvelope> {
        let state = self.shared.state();
        state
            .topics
            .get(topic)
            .map(|logs| logs.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Next offset `group` will read from on a partition, if it ever committed.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> Option<u64> {
        let key = GroupPartition {
            group: group.to_string(),
            topic: topic.to_string(),
            partition,
        };
        self.shared.state().committed.get(&key).copied()
    }

    /// Keyed messages hash to a partition; unkeyed ones go to partition 0.
    fn choose_partition(&self, key: Option<&str>) -> u32 {
        key.map(|key| partition_for_key(key, self.shared.config.partitions.max(1)))
            .unwrap_or(0)
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, envelope: EventEnvelope) -> Result<RecordPosition> {
        if self.shared.is_closed() {
            return Err(EventBusError::Closed);
        }

        let partition = self.choose_partition(envelope.key.as_deref());
        let partitions = self.shared.config.partitions.max(1);

        let position = {
            let mut state = self.shared.state();
            let topic = envelope.topic.clone();
            let log = state
                .topic_mut(&topic, partitions)
                .get_mut(partition as usize)
                .ok_or_else(|| EventBusError::UnknownPartition {
                    topic: topic.clone(),
                    partition,
                })?;
            let offset = log.len() as u64;
            log.push(envelope);
            RecordPosition {
                topic,
                partition,
                offset,
            }
        };

        self.shared.published.notify_waiters();

        metrics::counter!("event_bus_published_total", "topic" => position.topic.clone())
            .increment(1);
        tracing::debug!(
            topic = %position.topic,
            partition = position.partition,
            offset = position.offset,
            "event published"
        );

        Ok(position)
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>> {
        let all: Vec<u32> = (0..self.shared.config.partitions.max(1)).collect();
        self.subscribe_partitions(topic, group, &all).await
    }

    async fn subscribe_partitions(
        &self,
        topic: &str,
        group: &str,
        partitions: &[u32],
    ) -> Result<Box<dyn Subscription>> {
        if self.shared.is_closed() {
            return Err(EventBusError::Closed);
        }

        let partition_count = self.shared.config.partitions.max(1);
        let mut assigned: Vec<u32> = Vec::with_capacity(partitions.len());
        for &partition in partitions {
            if partition >= partition_count {
                return Err(EventBusError::UnknownPartition {
                    topic: topic.to_string(),
                    partition,
                });
            }
            if !assigned.contains(&partition) {
                assigned.push(partition);
            }
        }

        let cursors = {
            let mut state = self.shared.state();
            let keys: Vec<GroupPartition> = assigned
                .iter()
                .map(|&partition| GroupPartition {
                    group: group.to_string(),
                    topic: topic.to_string(),
                    partition,
                })
                .collect();

            if let Some(taken) = keys.iter().find(|key| state.claimed.contains(*key)) {
                return Err(EventBusError::PartitionClaimed {
                    topic: topic.to_string(),
                    group: group.to_string(),
                    partition: taken.partition,
                });
            }

            state.topic_mut(topic, partition_count);
            let cursors: Vec<u64> = keys
                .iter()
                .map(|key| state.committed.get(key).copied().unwrap_or(0))
                .collect();
            state.claimed.extend(keys);
            cursors
        };

        tracing::info!(topic, group, partitions = ?assigned, "subscription started");

        Ok(Box::new(MemorySubscription {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            group: group.to_string(),
            partitions: assigned,
            cursors,
            next_index: 0,
        }))
    }
}

struct MemorySubscription {
    shared: Arc<Shared>,
    topic: String,
    group: String,
    partitions: Vec<u32>,
    cursors: Vec<u64>,
    next_index: usize,
}

impl MemorySubscription {
    fn index_of(&self, partition: u32) -> Result<usize> {
        self.partitions
            .iter()
            .position(|&p| p == partition)
            .ok_or(EventBusError::NotAssigned { partition })
    }

    /// Takes the next unread message, rotating over partitions so a busy
    /// partition cannot starve the others.
    fn take_ready(&mut self) -> Option<Delivery> {
        let state = self.shared.state();
        let logs = state.topics.get(&self.topic)?;
        let count = self.partitions.len();

        for step in 0..count {
            let index = (self.next_index + step) % count;
            let partition = self.partitions[index];
            let offset = self.cursors[index];
            let Some(envelope) = logs
                .get(partition as usize)
                .and_then(|log| log.get(offset as usize))
            else {
                continue;
            };

            self.cursors[index] = offset + 1;
            self.next_index = (index + 1) % count;
            return Some(Delivery::new(envelope.clone(), partition, offset));
        }
        None
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn group(&self) -> &str {
        &self.group
    }

    fn partitions(&self) -> &[u32] {
        &self.partitions
    }

    async fn next(&mut self) -> Result<Delivery> {
        let shared = Arc::clone(&self.shared);
        loop {
            // Register before checking so a publish in between is not missed.
            let published = shared.published.notified();
            if shared.is_closed() {
                return Err(EventBusError::Closed);
            }
            if let Some(delivery) = self.take_ready() {
                return Ok(delivery);
            }
            published.await;
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<()> {
        self.index_of(delivery.partition)?;
        let key = GroupPartition {
            group: self.group.clone(),
            topic: self.topic.clone(),
            partition: delivery.partition,
        };

        let mut state = self.shared.state();
        let committed = state.committed.entry(key).or_insert(0);
        *committed = (*committed).max(delivery.offset + 1);
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery) -> Result<()> {
        let index = self.index_of(delivery.partition)?;
        self.cursors[index] = self.cursors[index].min(delivery.offset);
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        let mut state = self.shared.state();
        for &partition in &self.partitions {
            state.claimed.remove(&GroupPartition {
                group: self.group.clone(),
                topic: self.topic.clone(),
                partition,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::EventBusExt;
    use crate::TraceContext;

    const TOPIC: &str = "order_events";

    fn single_partition_bus() -> InMemoryEventBus {
        InMemoryEventBus::with_config(BusConfig { partitions: 1 })
    }

    async fn publish_n(bus: &InMemoryEventBus, n: u64) {
        for i in 0..n {
            bus.publish_json(
                TOPIC,
                Some("1"),
                &serde_json::json!({ "seq": i }),
                &TraceContext::empty(),
            )
            .await
            .unwrap();
        }
    }

    fn seq(delivery: &Delivery) -> u64 {
        let body: serde_json::Value = delivery.decode().unwrap();
        body["seq"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn same_key_goes_to_same_partition_in_order() {
        let bus = InMemoryEventBus::new();

        let first = bus
            .publish_json(TOPIC, Some("42"), &1, &TraceContext::empty())
            .await
            .unwrap();
        let second = bus
            .publish_json(TOPIC, Some("42"), &2, &TraceContext::empty())
            .await
            .unwrap();

        assert_eq!(first.partition, second.partition);
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);
        assert_eq!(bus.records(TOPIC).len(), 2);
    }

    #[tokio::test]
    async fn subscriber_reads_in_publish_order() {
        let bus = single_partition_bus();
        publish_n(&bus, 3).await;

        let mut sub = bus.subscribe(TOPIC, "payment-service").await.unwrap();
        for expected in 0..3 {
            let delivery = sub.next().await.unwrap();
            assert_eq!(seq(&delivery), expected);
            assert_eq!(delivery.offset, expected);
        }
    }

    #[tokio::test]
    async fn next_waits_for_publish() {
        let bus = single_partition_bus();
        let mut sub = bus.subscribe(TOPIC, "g").await.unwrap();

        let reader = tokio::spawn(async move { sub.next().await.map(|d| d.offset) });
        tokio::task::yield_now().await;
        publish_n(&bus, 1).await;

        assert_eq!(reader.await.unwrap().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_next_loses_nothing() {
        let bus = single_partition_bus();
        let mut sub = bus.subscribe(TOPIC, "g").await.unwrap();

        let timed_out = tokio::time::timeout(Duration::from_millis(10), sub.next()).await;
        assert!(timed_out.is_err());

        publish_n(&bus, 1).await;
        assert_eq!(sub.next().await.unwrap().offset, 0);
    }

    #[tokio::test]
    async fn uncommitted_message_is_redelivered_to_next_subscriber() {
        let bus = single_partition_bus();
        publish_n(&bus, 2).await;

        {
            let mut sub = bus.subscribe(TOPIC, "order-service").await.unwrap();
            let first = sub.next().await.unwrap();
            sub.commit(&first).await.unwrap();
            // Second message read but never committed.
            sub.next().await.unwrap();
        }

        let mut sub = bus.subscribe(TOPIC, "order-service").await.unwrap();
        let redelivered = sub.next().await.unwrap();
        assert_eq!(seq(&redelivered), 1);
        assert_eq!(bus.committed_offset("order-service", TOPIC, 0), Some(1));
    }

    #[tokio::test]
    async fn groups_track_offsets_independently() {
        let bus = single_partition_bus();
        publish_n(&bus, 1).await;

        let mut payments = bus.subscribe(TOPIC, "payment-service").await.unwrap();
        let delivery = payments.next().await.unwrap();
        payments.commit(&delivery).await.unwrap();

        let mut notifications = bus.subscribe(TOPIC, "notification-service").await.unwrap();
        assert_eq!(notifications.next().await.unwrap().offset, 0);
    }

    #[tokio::test]
    async fn nack_rewinds_partition() {
        let bus = single_partition_bus();
        publish_n(&bus, 2).await;

        let mut sub = bus.subscribe(TOPIC, "g").await.unwrap();
        let first = sub.next().await.unwrap();
        sub.nack(&first).await.unwrap();

        assert_eq!(sub.next().await.unwrap().offset, 0);
        assert_eq!(sub.next().await.unwrap().offset, 1);
    }

    #[tokio::test]
    async fn partition_cannot_be_claimed_twice_in_a_group() {
        let bus = InMemoryEventBus::new();
        let first = bus.subscribe_partitions(TOPIC, "g", &[0]).await.unwrap();

        let err = bus.subscribe_partitions(TOPIC, "g", &[0, 1]).await.err().unwrap();
        assert!(matches!(err, EventBusError::PartitionClaimed { partition: 0, .. }));

        // Other partitions and other groups are free.
        bus.subscribe_partitions(TOPIC, "g", &[1]).await.unwrap();
        bus.subscribe_partitions(TOPIC, "other", &[0]).await.unwrap();

        drop(first);
        bus.subscribe_partitions(TOPIC, "g", &[0]).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_partition_is_rejected() {
        let bus = InMemoryEventBus::new();
        let err = bus.subscribe_partitions(TOPIC, "g", &[7]).await.err().unwrap();
        assert!(matches!(err, EventBusError::UnknownPartition { partition: 7, .. }));
    }

    #[tokio::test]
    async fn commit_of_foreign_partition_is_rejected() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe_partitions(TOPIC, "g", &[0]).await.unwrap();
        let foreign = Delivery::new(
            EventEnvelope::builder()
                .topic(TOPIC)
                .payload_raw(b"{}".to_vec())
                .build()
                .unwrap(),
            2,
            0,
        );

        let err = sub.commit(&foreign).await.unwrap_err();
        assert!(matches!(err, EventBusError::NotAssigned { partition: 2 }));
    }

    #[tokio::test]
    async fn close_wakes_waiting_subscriber() {
        let bus = single_partition_bus();
        let mut sub = bus.subscribe(TOPIC, "g").await.unwrap();

        let reader = tokio::spawn(async move { sub.next().await });
        tokio::task::yield_now().await;
        bus.close();

        assert!(matches!(
            reader.await.unwrap(),
            Err(EventBusError::Closed)
        ));
        assert!(matches!(
            bus.publish_json(TOPIC, None, &1, &TraceContext::empty()).await,
            Err(EventBusError::Closed)
        ));
    }

    #[tokio::test]
    async fn trace_headers_survive_the_log() {
        let bus = single_partition_bus();
        let root = TraceContext::new_root();
        bus.publish_json(TOPIC, Some("5"), &5, &root).await.unwrap();

        let mut sub = bus.subscribe(TOPIC, "g").await.unwrap();
        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.trace().trace_id(), root.trace_id());
    }
}
