//! Customer notifications for order and payment events.
//!
//! Delivery is best-effort. A failed send is retried with linear backoff
//! inside the handler and then dropped; the bus message is acknowledged
//! either way.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::SagaEvent;
use event_bus::{Delivery, EventHandler, HandlerError};
use resilience::{LinearBackoff, retry_with_backoff};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::error::decode_delivery;

/// A rendered message for one customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: String,
    pub subject: &'static str,
    pub body: String,
    /// The `event_type` that triggered it.
    pub kind: &'static str,
    pub order_id: OrderId,
}

impl Notification {
    /// Renders the notification for an event, or `None` when customers are
    /// not told about it. Payment outcomes without a `user_id` have no
    /// recipient and are skipped.
    pub fn for_event(event: &SagaEvent) -> Option<Self> {
        match event {
            SagaEvent::OrderCreated(e) => Some(Self {
                recipient: recipient(e.user_id),
                subject: "Order Confirmation",
                body: format!(
                    "Your order #{} has been placed successfully! \
                     We'll notify you once it's confirmed.",
                    e.order_id
                ),
                kind: domain::event_types::ORDER_CREATED,
                order_id: e.order_id,
            }),
            SagaEvent::PaymentSuccess(e) => e.user_id.map(|user_id| Self {
                recipient: recipient(user_id),
                subject: "Payment Successful",
                body: format!(
                    "Payment for order #{} was successful! Transaction ID: {}",
                    e.order_id, e.transaction_id
                ),
                kind: domain::event_types::PAYMENT_SUCCESS,
                order_id: e.order_id,
            }),
            SagaEvent::PaymentFailed(e) => e.user_id.map(|user_id| Self {
                recipient: recipient(user_id),
                subject: "Payment Failed",
                body: format!(
                    "Payment for order #{} failed. Please try again or contact support.",
                    e.order_id
                ),
                kind: domain::event_types::PAYMENT_FAILED,
                order_id: e.order_id,
            }),
            SagaEvent::OrderPaid(_) | SagaEvent::OrderFailed(_) | SagaEvent::Unknown { .. } => {
                None
            }
        }
    }
}

fn recipient(user_id: UserId) -> String {
    format!("user_{user_id}@example.com")
}

/// A delivery channel rejected a notification.
#[derive(Debug, Clone, Error)]
#[error("Notification delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Sends notifications over some channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        (**self).send(notification).await
    }
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        tracing::info!(
            to = %notification.recipient,
            subject = notification.subject,
            body = %notification.body,
            "email sent"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct NotifierLog {
    attempts: Vec<Notification>,
    delivered: Vec<Notification>,
    failing: bool,
    fail_next: u32,
}

/// Records notifications in memory and fails on request.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    log: Arc<Mutex<NotifierLog>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every send fail until switched back.
    pub async fn set_failing(&self, failing: bool) {
        self.log.lock().await.failing = failing;
    }

    /// Makes the next `times` sends fail.
    pub async fn fail_times(&self, times: u32) {
        self.log.lock().await.fail_next = times;
    }

    /// Every send attempt, including failed ones.
    pub async fn attempts(&self) -> Vec<Notification> {
        self.log.lock().await.attempts.clone()
    }

    /// Notifications that were accepted.
    pub async fn delivered(&self) -> Vec<Notification> {
        self.log.lock().await.delivered.clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let mut log = self.log.lock().await;
        log.attempts.push(notification.clone());

        if log.failing {
            return Err(DeliveryError("channel unavailable".to_string()));
        }
        if log.fail_next > 0 {
            log.fail_next -= 1;
            return Err(DeliveryError("transient channel error".to_string()));
        }

        log.delivered.push(notification.clone());
        Ok(())
    }
}

/// Retry settings for notification delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Wait after attempt `n` is `n * base_interval`.
    pub base_interval: Duration,
}

impl NotificationConfig {
    pub fn policy(&self) -> LinearBackoff {
        LinearBackoff::new(self.max_retries, self.base_interval)
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_interval: Duration::from_secs(1),
        }
    }
}

/// Consumes order and payment events and notifies the customer.
pub struct NotificationDispatcher<N> {
    notifier: N,
    config: NotificationConfig,
}

impl<N: Notifier> NotificationDispatcher<N> {
    pub fn new(notifier: N, config: NotificationConfig) -> Self {
        Self { notifier, config }
    }

    /// Sends one notification, retrying per the configured policy.
    ///
    /// Returns whether it was delivered. Exhausted retries are logged, never
    /// returned as an error.
    #[tracing::instrument(
        skip(self, notification),
        fields(order_id = %notification.order_id, kind = notification.kind)
    )]
    pub async fn dispatch(&self, notification: &Notification) -> bool {
        let outcome = retry_with_backoff(self.config.policy(), "send_notification", |_| {
            self.notifier.send(notification)
        })
        .await;

        match outcome {
            Ok(()) => {
                tracing::info!(to = %notification.recipient, "notification sent");
                metrics::counter!("notifications_sent_total", "kind" => notification.kind)
                    .increment(1);
                true
            }
            Err(err) => {
                tracing::error!(
                    attempts = err.attempts,
                    error = %err.last_error,
                    "giving up on notification"
                );
                metrics::counter!("notifications_failed_total", "kind" => notification.kind)
                    .increment(1);
                false
            }
        }
    }
}

#[async_trait]
impl<N: Notifier> EventHandler for NotificationDispatcher<N> {
    fn name(&self) -> &'static str {
        "notification-service"
    }

    async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), HandlerError> {
        let event = decode_delivery(delivery)?;
        match Notification::for_event(&event) {
            Some(notification) => {
                self.dispatch(&notification).await;
            }
            None => tracing::debug!(event_type = event.event_type(), "ignoring event"),
        }
        Ok(())
    }
}
