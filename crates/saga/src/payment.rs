//! Payment side of the saga.
//!
//! [`PaymentDecisionEngine`] simulates a payment processor: a random delay
//! followed by a weighted success draw. [`PaymentProcessor`] consumes
//! `order_created`, records one payment per order and publishes the outcome.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::OrderId;
use domain::{
    NewPayment, OrderEvent, Payment, PaymentEvent, PaymentRepository, PaymentStatus, SagaEvent,
    transaction_id,
};
use event_bus::{Delivery, EventBus, EventBusExt, EventHandler, HandlerError, TraceContext};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::Result;
use crate::error::decode_delivery;

/// Reason recorded for a non-positive amount.
pub const REASON_INVALID_AMOUNT: &str = "invalid payment amount";
/// Reason recorded when the success draw fails.
pub const REASON_DECLINED: &str = "payment declined";

/// Settings for the simulated processor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaymentConfig {
    /// Probability of success, within `[0, 1]`.
    pub success_rate: f64,
    /// Shortest processing delay.
    pub min_delay: Duration,
    /// Upper bound of the random delay added to `min_delay`.
    pub max_jitter: Duration,
}

impl PaymentConfig {
    /// Creates a config, clamping `success_rate` into `[0, 1]`.
    ///
    /// A NaN rate is treated as 0.
    pub fn new(success_rate: f64, min_delay: Duration, max_jitter: Duration) -> Self {
        let success_rate = if success_rate.is_nan() {
            0.0
        } else {
            success_rate.clamp(0.0, 1.0)
        };
        Self {
            success_rate,
            min_delay,
            max_jitter,
        }
    }

    /// Same delays, different success rate.
    pub fn with_success_rate(self, success_rate: f64) -> Self {
        Self::new(success_rate, self.min_delay, self.max_jitter)
    }

    /// No delay at all. Useful in tests.
    pub fn immediate(success_rate: f64) -> Self {
        Self::new(success_rate, Duration::ZERO, Duration::ZERO)
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            success_rate: 0.8,
            min_delay: Duration::from_millis(200),
            max_jitter: Duration::from_millis(800),
        }
    }
}

/// Outcome of one simulated payment.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentDecision {
    pub status: PaymentStatus,
    /// Set only on success.
    pub transaction_id: String,
    /// Time spent "processing".
    pub delay: Duration,
    /// Why the payment failed.
    pub reason: Option<&'static str>,
}

/// Simulated payment processor.
pub struct PaymentDecisionEngine {
    config: PaymentConfig,
    rng: Mutex<StdRng>,
}

impl PaymentDecisionEngine {
    /// Creates an engine seeded from the OS.
    pub fn new(config: PaymentConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Creates an engine with a deterministic random sequence.
    pub fn seeded(config: PaymentConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: PaymentConfig, rng: StdRng) -> Self {
        Self {
            config: PaymentConfig::new(config.success_rate, config.min_delay, config.max_jitter),
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> PaymentConfig {
        self.config
    }

    /// Draws a delay in `[min_delay, min_delay + max_jitter)` and a value in
    /// `[0, 1)` for the success check.
    fn draw(&self) -> (Duration, f64) {
        // The RNG holds no invariant a panic could break.
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let jitter_nanos = u64::try_from(self.config.max_jitter.as_nanos()).unwrap_or(u64::MAX);
        let jitter = if jitter_nanos == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(rng.gen_range(0..jitter_nanos))
        };
        (self.config.min_delay + jitter, rng.r#gen::<f64>())
    }

    /// Decides the outcome of charging `amount` for an order.
    ///
    /// Non-positive or non-finite amounts fail immediately. Otherwise the
    /// call sleeps for the drawn delay before returning.
    pub async fn decide(&self, order_id: OrderId, amount: f64) -> PaymentDecision {
        if !amount.is_finite() || amount <= 0.0 {
            return PaymentDecision {
                status: PaymentStatus::Failed,
                transaction_id: String::new(),
                delay: Duration::ZERO,
                reason: Some(REASON_INVALID_AMOUNT),
            };
        }

        let (delay, roll) = self.draw();
        tokio::time::sleep(delay).await;

        if roll < self.config.success_rate {
            PaymentDecision {
                status: PaymentStatus::Success,
                transaction_id: transaction_id(order_id, Utc::now()),
                delay,
                reason: None,
            }
        } else {
            PaymentDecision {
                status: PaymentStatus::Failed,
                transaction_id: String::new(),
                delay,
                reason: Some(REASON_DECLINED),
            }
        }
    }
}

/// Consumes `order_created` and records the payment outcome.
pub struct PaymentProcessor<P, B> {
    engine: PaymentDecisionEngine,
    payments: P,
    bus: B,
    topic: String,
}

impl<P, B> PaymentProcessor<P, B>
where
    P: PaymentRepository,
    B: EventBus,
{
    pub fn new(
        engine: PaymentDecisionEngine,
        payments: P,
        bus: B,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            payments,
            bus,
            topic: topic.into(),
        }
    }

    /// Processes one created order.
    ///
    /// When the order already has a settled payment (a redelivered message),
    /// no new payment is recorded; the existing outcome is published again.
    ///
    /// # Errors
    ///
    /// Returns a store error when the payment cannot be looked up or saved.
    /// A failed publish is logged and does not fail the call.
    #[tracing::instrument(
        skip(self, event, trace),
        fields(order_id = %event.order_id, trace_id = %trace.trace_id_hex())
    )]
    pub async fn process(&self, event: &OrderEvent, trace: &TraceContext) -> Result<Payment> {
        let existing = self.payments.find_by_order(event.order_id).await?;
        if let Some(payment) = existing.into_iter().find(|p| p.status.is_terminal()) {
            tracing::info!(
                payment_id = %payment.id,
                status = %payment.status,
                "order already has a payment, re-publishing outcome"
            );
            metrics::counter!("payments_duplicate_deliveries_total").increment(1);
            self.publish_outcome(&payment, trace).await;
            return Ok(payment);
        }

        let decision = self.engine.decide(event.order_id, event.total_price).await;
        metrics::histogram!("payment_processing_delay_seconds")
            .record(decision.delay.as_secs_f64());

        let payment = self
            .payments
            .insert(NewPayment {
                order_id: event.order_id,
                user_id: event.user_id,
                amount: event.total_price,
                status: decision.status,
                transaction_id: decision.transaction_id,
            })
            .await?;

        metrics::counter!("payments_processed_total", "status" => payment.status.as_str())
            .increment(1);
        match decision.reason {
            None => tracing::info!(
                payment_id = %payment.id,
                transaction_id = %payment.transaction_id,
                amount = payment.amount,
                "payment succeeded"
            ),
            Some(reason) => tracing::warn!(
                payment_id = %payment.id,
                amount = payment.amount,
                reason,
                "payment failed"
            ),
        }

        self.publish_outcome(&payment, trace).await;
        Ok(payment)
    }

    async fn publish_outcome(&self, payment: &Payment, trace: &TraceContext) {
        let event = PaymentEvent::outcome(payment);
        let key = payment.order_id.to_string();
        match self
            .bus
            .publish_json(&self.topic, Some(&key), &event, trace)
            .await
        {
            Ok(position) => tracing::debug!(
                event_type = %event.event_type,
                partition = position.partition,
                offset = position.offset,
                "payment outcome published"
            ),
            Err(err) => tracing::error!(
                event_type = %event.event_type,
                error = %err,
                "failed to publish payment outcome"
            ),
        }
    }
}

#[async_trait]
impl<P, B> EventHandler for PaymentProcessor<P, B>
where
    P: PaymentRepository,
    B: EventBus,
{
    fn name(&self) -> &'static str {
        "payment-service"
    }

    async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), HandlerError> {
        match decode_delivery(delivery)? {
            SagaEvent::OrderCreated(order) => {
                self.process(&order, &delivery.trace().child()).await?;
            }
            other => tracing::debug!(event_type = other.event_type(), "ignoring event"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ProductId, UserId};
    use domain::{InMemoryPaymentStore, OrderStatus, event_types};
    use event_bus::{BusConfig, InMemoryEventBus};
    use tokio::time::Instant;

    const TOPIC: &str = "order_events";

    fn order_created(order_id: i64, total_price: f64) -> OrderEvent {
        OrderEvent {
            order_id: OrderId::new(order_id),
            user_id: UserId::new(7),
            product_id: ProductId::new(3),
            quantity: 1,
            status: OrderStatus::Pending,
            total_price,
            event_type: event_types::ORDER_CREATED.to_string(),
        }
    }

    fn processor(
        config: PaymentConfig,
    ) -> (
        PaymentProcessor<InMemoryPaymentStore, InMemoryEventBus>,
        InMemoryPaymentStore,
        InMemoryEventBus,
    ) {
        let payments = InMemoryPaymentStore::new();
        let bus = InMemoryEventBus::with_config(BusConfig { partitions: 1 });
        let processor = PaymentProcessor::new(
            PaymentDecisionEngine::seeded(config, 7),
            payments.clone(),
            bus.clone(),
            TOPIC,
        );
        (processor, payments, bus)
    }

    #[test]
    fn success_rate_is_clamped() {
        assert_eq!(PaymentConfig::immediate(1.7).success_rate, 1.0);
        assert_eq!(PaymentConfig::immediate(-0.2).success_rate, 0.0);
        assert_eq!(PaymentConfig::immediate(f64::NAN).success_rate, 0.0);
        assert_eq!(PaymentConfig::default().success_rate, 0.8);
    }

    #[tokio::test(start_paused = true)]
    async fn certain_success_issues_transaction_id() {
        let config = PaymentConfig::default().with_success_rate(1.0);
        let engine = PaymentDecisionEngine::seeded(config, 1);
        let decision = engine.decide(OrderId::new(42), 100.0).await;

        assert_eq!(decision.status, PaymentStatus::Success);
        assert!(decision.transaction_id.starts_with("TXN-42-"));
        assert_eq!(decision.reason, None);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_rate_always_declines() {
        let engine = PaymentDecisionEngine::seeded(PaymentConfig::immediate(0.0), 1);
        for _ in 0..20 {
            let decision = engine.decide(OrderId::new(1), 10.0).await;
            assert_eq!(decision.status, PaymentStatus::Failed);
            assert!(decision.transaction_id.is_empty());
            assert_eq!(decision.reason, Some(REASON_DECLINED));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_positive_amount_fails_without_waiting() {
        let config = PaymentConfig::default().with_success_rate(1.0);
        let engine = PaymentDecisionEngine::seeded(config, 1);
        let started = Instant::now();

        for amount in [0.0, -5.0, f64::NAN] {
            let decision = engine.decide(OrderId::new(1), amount).await;
            assert_eq!(decision.status, PaymentStatus::Failed);
            assert_eq!(decision.reason, Some(REASON_INVALID_AMOUNT));
        }
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_stays_within_bounds() {
        let config =
            PaymentConfig::new(1.0, Duration::from_millis(200), Duration::from_millis(800));
        let engine = PaymentDecisionEngine::seeded(config, 99);

        for _ in 0..50 {
            let started = Instant::now();
            let decision = engine.decide(OrderId::new(1), 1.0).await;
            assert!(decision.delay >= Duration::from_millis(200));
            assert!(decision.delay < Duration::from_millis(1000));
            assert!(started.elapsed() >= decision.delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn same_seed_gives_same_outcomes() {
        let config = PaymentConfig::immediate(0.5);
        let a = PaymentDecisionEngine::seeded(config, 1234);
        let b = PaymentDecisionEngine::seeded(config, 1234);

        for _ in 0..10 {
            let left = a.decide(OrderId::new(1), 5.0).await;
            let right = b.decide(OrderId::new(1), 5.0).await;
            assert_eq!(left.status, right.status);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn process_records_and_publishes_success() {
        let (processor, payments, bus) = processor(PaymentConfig::immediate(1.0));

        let payment = processor
            .process(&order_created(42, 100.0), &TraceContext::new_root())
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payments.len().await, 1);

        let records = bus.records(TOPIC);
        assert_eq!(records.len(), 1);
        let published: PaymentEvent = records[0].decode().unwrap();
        assert_eq!(published.event_type, event_types::PAYMENT_SUCCESS);
        assert_eq!(published.order_id, OrderId::new(42));
        assert_eq!(published.payment_id, payment.id);
        assert_eq!(published.transaction_id, payment.transaction_id);
        assert_eq!(records[0].key.as_deref(), Some("42"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_amount_is_recorded_as_failed() {
        let (processor, _payments, bus) = processor(PaymentConfig::immediate(1.0));

        let payment = processor
            .process(&order_created(5, 0.0), &TraceContext::new_root())
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Failed);
        let published: PaymentEvent = bus.records(TOPIC)[0].decode().unwrap();
        assert_eq!(published.event_type, event_types::PAYMENT_FAILED);
    }

    #[tokio::test(start_paused = true)]
    async fn redelivered_order_is_not_charged_twice() {
        let (processor, payments, bus) = processor(PaymentConfig::immediate(1.0));
        let event = order_created(42, 100.0);

        let first = processor.process(&event, &TraceContext::new_root()).await.unwrap();
        let second = processor.process(&event, &TraceContext::new_root()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(payments.len().await, 1);
        // The outcome is published again so a lost publish gets repaired.
        assert_eq!(bus.records(TOPIC).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_is_retryable() {
        let (processor, payments, bus) = processor(PaymentConfig::immediate(1.0));
        payments.set_unavailable(true).await;

        let delivery = Delivery::new(
            event_bus::EventEnvelope::builder()
                .topic(TOPIC)
                .payload(&order_created(1, 10.0))
                .unwrap()
                .build()
                .unwrap(),
            0,
            0,
        );

        let err = processor.handle(&delivery).await.unwrap_err();
        assert!(matches!(err, HandlerError::Retryable(_)));
        assert!(bus.records(TOPIC).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failure_still_acknowledges() {
        let (processor, payments, bus) = processor(PaymentConfig::immediate(1.0));
        bus.close();

        let payment = processor
            .process(&order_created(8, 10.0), &TraceContext::new_root())
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payments.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn other_event_types_are_ignored() {
        let (processor, payments, _bus) = processor(PaymentConfig::immediate(1.0));
        let delivery = Delivery::new(
            event_bus::EventEnvelope::builder()
                .topic(TOPIC)
                .payload_raw(br#"{"event_type":"order_shipped","order_id":1}"#.to_vec())
                .build()
                .unwrap(),
            0,
            0,
        );

        processor.handle(&delivery).await.unwrap();
        assert!(payments.is_empty().await);
    }
}
