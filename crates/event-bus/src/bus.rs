use async_trait::async_trait;
use serde::Serialize;

use crate::{Delivery, EventEnvelope, RecordPosition, Result, TraceContext};

/// Core trait for bus implementations.
///
/// A bus is a set of named topics, each split into a fixed number of
/// partitions holding an append-only log. Consumers in the same group share
/// a topic's partitions; each group tracks its own committed offsets.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Appends a message to its topic.
    ///
    /// The partition is chosen from the envelope key, so messages with equal
    /// keys are delivered in publish order.
    async fn publish(&self, envelope: EventEnvelope) -> Result<RecordPosition>;

    /// Joins `group` on `topic`, claiming every partition.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>>;

    /// Joins `group` on `topic`, claiming only `partitions`.
    ///
    /// Fails with `PartitionClaimed` when another live subscription of the
    /// same group owns one of them.
    async fn subscribe_partitions(
        &self,
        topic: &str,
        group: &str,
        partitions: &[u32],
    ) -> Result<Box<dyn Subscription>>;
}

/// A group member's view of its assigned partitions.
#[async_trait]
pub trait Subscription: Send {
    fn topic(&self) -> &str;

    fn group(&self) -> &str;

    fn partitions(&self) -> &[u32];

    /// Waits for the next message.
    ///
    /// Cancel safe: dropping the future before it completes loses nothing.
    async fn next(&mut self) -> Result<Delivery>;

    /// Marks the delivery and everything before it on its partition as
    /// processed for the group. Uncommitted messages are redelivered to the
    /// next subscriber after this one goes away.
    async fn commit(&mut self, delivery: &Delivery) -> Result<()>;

    /// Rewinds the partition so the delivery is read again.
    async fn nack(&mut self, delivery: &Delivery) -> Result<()>;
}

/// Extension methods for event buses.
#[async_trait]
pub trait EventBusExt: EventBus {
    /// Serializes `payload` as JSON and publishes it with `trace` in the headers.
    async fn publish_json<T>(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &T,
        trace: &TraceContext,
    ) -> Result<RecordPosition>
    where
        T: Serialize + Sync + ?Sized,
    {
        let mut builder = EventEnvelope::builder()
            .topic(topic)
            .payload(payload)?
            .trace_context(trace);
        if let Some(key) = key {
            builder = builder.key(key);
        }
        self.publish(builder.build()?).await
    }
}

impl<T: EventBus + ?Sized> EventBusExt for T {}

/// Maps a key to a partition with 32-bit FNV-1a.
///
/// Stable across processes so that a key always lands on the same partition.
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    if partitions == 0 {
        return 0;
    }
    let mut hash: u32 = 0x811c_9dc5;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash % partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitioning_is_deterministic() {
        for key in ["1", "42", "order-9000"] {
            assert_eq!(partition_for_key(key, 3), partition_for_key(key, 3));
            assert!(partition_for_key(key, 3) < 3);
        }
    }

    #[test]
    fn single_partition_topic_takes_everything() {
        assert_eq!(partition_for_key("anything", 1), 0);
        assert_eq!(partition_for_key("anything", 0), 0);
    }

    #[test]
    fn keys_spread_over_partitions() {
        let mut seen = [false; 3];
        for id in 0..64 {
            seen[partition_for_key(&id.to_string(), 3) as usize] = true;
        }
        assert!(seen.iter().all(|hit| *hit));
    }
}
