//! Partitioned, append-only event log with consumer groups.
//!
//! - [`EventBus`] / [`Subscription`] define the publish and consume contract
//! - [`InMemoryEventBus`] is the in-process log used by the services and tests
//! - [`Consumer`] drives one subscription through an [`EventHandler`],
//!   committing each message only after it has been fully processed
//! - [`TraceContext`] / [`TraceCarrier`] carry W3C trace context in headers

pub mod bus;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod trace;

pub use bus::{EventBus, EventBusExt, Subscription, partition_for_key};
pub use consumer::{Consumer, ConsumerConfig, ConsumerStats, EventHandler, HandlerError};
pub use envelope::{Delivery, EventEnvelope, EventEnvelopeBuilder, EventId, RecordPosition};
pub use error::{EventBusError, Result};
pub use memory::{BusConfig, InMemoryEventBus};
pub use trace::{TraceCarrier, TraceContext};
