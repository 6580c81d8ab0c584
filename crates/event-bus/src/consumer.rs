//! Consumer loop that feeds a subscription to a handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::Instrument;

use crate::bus::Subscription;
use crate::{Delivery, EventBusError, Result};

/// Why a handler did not finish a message.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The message can never be processed. It is logged and committed so it
    /// does not block the partition.
    #[error("Malformed event: {0}")]
    Malformed(String),

    /// Processing failed for a reason that may clear up. The message stays
    /// uncommitted and is read again after a backoff.
    #[error("Retryable failure: {0}")]
    Retryable(String),
}

/// Processes messages delivered from a subscription.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Handles one delivery. `Ok` means every side effect has completed.
    async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), HandlerError>;
}

#[async_trait]
impl<H: EventHandler + ?Sized> EventHandler for Arc<H> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), HandlerError> {
        (**self).handle(delivery).await
    }
}

/// Settings for a [`Consumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Pause before re-reading a message that failed with
    /// [`HandlerError::Retryable`].
    pub redelivery_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            redelivery_backoff: Duration::from_secs(1),
        }
    }
}

/// Counts of what a consumer did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Messages handled and committed.
    pub processed: u64,
    /// Malformed messages committed without processing.
    pub skipped: u64,
    /// Messages rewound for another attempt.
    pub redelivered: u64,
}

/// Drives one subscription through an [`EventHandler`].
///
/// A message is committed only after the handler returns, so a crash
/// mid-processing leads to redelivery rather than loss.
pub struct Consumer<H> {
    subscription: Box<dyn Subscription>,
    handler: H,
    config: ConsumerConfig,
    stats: ConsumerStats,
}

impl<H: EventHandler> Consumer<H> {
    pub fn new(subscription: Box<dyn Subscription>, handler: H, config: ConsumerConfig) -> Self {
        Self {
            subscription,
            handler,
            config,
            stats: ConsumerStats::default(),
        }
    }

    /// Consumes until `shutdown` becomes `true`, its sender is dropped, or
    /// the bus closes.
    ///
    /// A message already being handled when shutdown is signalled is
    /// finished and committed first.
    ///
    /// # Errors
    ///
    /// Returns an error if a commit or nack fails.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<ConsumerStats> {
        tracing::info!(
            handler = self.handler.name(),
            topic = self.subscription.topic(),
            group = self.subscription.group(),
            "consumer started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = self.subscription.next() => next,
            };

            match next {
                Ok(delivery) => self.process(delivery, &mut shutdown).await?,
                Err(EventBusError::Closed) => break,
                Err(err) => {
                    tracing::error!(
                        handler = self.handler.name(),
                        error = %err,
                        "failed to read from bus"
                    );
                    pause(self.config.redelivery_backoff, &mut shutdown).await;
                }
            }
        }

        tracing::info!(
            handler = self.handler.name(),
            processed = self.stats.processed,
            skipped = self.stats.skipped,
            redelivered = self.stats.redelivered,
            "consumer stopped"
        );
        Ok(self.stats)
    }

    async fn process(
        &mut self,
        delivery: Delivery,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let handler = self.handler.name();
        let span = tracing::info_span!(
            "bus.consume",
            handler,
            topic = %delivery.envelope.topic,
            partition = delivery.partition,
            offset = delivery.offset,
            trace_id = %delivery.trace().trace_id_hex(),
        );
        delivery.trace().attach_to(&span);

        let outcome = self
            .handler
            .handle(&delivery)
            .instrument(span.clone())
            .await;

        match outcome {
            Ok(()) => {
                self.subscription.commit(&delivery).await?;
                self.stats.processed += 1;
                metrics::counter!("bus_messages_processed_total", "handler" => handler)
                    .increment(1);
            }
            Err(HandlerError::Malformed(reason)) => {
                span.in_scope(|| tracing::warn!(%reason, "skipping malformed event"));
                self.subscription.commit(&delivery).await?;
                self.stats.skipped += 1;
                metrics::counter!("bus_messages_skipped_total", "handler" => handler).increment(1);
            }
            Err(HandlerError::Retryable(reason)) => {
                span.in_scope(|| {
                    tracing::error!(%reason, "event processing failed, will redeliver")
                });
                self.subscription.nack(&delivery).await?;
                self.stats.redelivered += 1;
                metrics::counter!("bus_messages_redelivered_total", "handler" => handler)
                    .increment(1);
                pause(self.config.redelivery_backoff, shutdown).await;
            }
        }
        Ok(())
    }
}

/// Sleeps for `backoff`, returning early on shutdown.
async fn pause(backoff: Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = shutdown.changed() => {}
        _ = tokio::time::sleep(backoff) => {}
    }
}

impl<H: EventHandler + 'static> Consumer<H> {
    /// Runs the consumer on a new task.
    pub fn spawn(
        self,
        shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<Result<ConsumerStats>> {
        tokio::spawn(self.run(shutdown))
    }
}
