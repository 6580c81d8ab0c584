use thiserror::Error;

/// Errors that can occur when publishing to or consuming from the bus.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// An envelope was built without a required field.
    #[error("Envelope is missing required field: {0}")]
    MissingField(&'static str),

    /// A payload could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested partition does not exist on the topic.
    #[error("Unknown partition {partition} for topic '{topic}'")]
    UnknownPartition { topic: String, partition: u32 },

    /// Another member of the same consumer group already owns the partition.
    #[error("Partition {partition} of topic '{topic}' is already claimed by group '{group}'")]
    PartitionClaimed {
        topic: String,
        group: String,
        partition: u32,
    },

    /// A commit or nack referenced a partition this subscription does not own.
    #[error("Partition {partition} is not assigned to this subscription")]
    NotAssigned { partition: u32 },

    /// The bus was shut down.
    #[error("Event bus is closed")]
    Closed,
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, EventBusError>;
