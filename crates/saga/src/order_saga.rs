//! Order side of the saga: projects payment outcomes onto order status.

use async_trait::async_trait;
use common::OrderId;
use domain::{OrderRepository, OrderStatus, SagaEvent};
use event_bus::{Delivery, EventHandler, HandlerError};

use crate::Result;
use crate::error::decode_delivery;

/// The status an event moves its order to, if any.
///
/// `Cancelled` is never produced here.
pub fn transition_for(event: &SagaEvent) -> Option<(OrderId, OrderStatus)> {
    match event {
        SagaEvent::OrderPaid(e) => Some((e.order_id, OrderStatus::Paid)),
        SagaEvent::PaymentSuccess(e) => Some((e.order_id, OrderStatus::Paid)),
        SagaEvent::OrderFailed(e) => Some((e.order_id, OrderStatus::Failed)),
        SagaEvent::PaymentFailed(e) => Some((e.order_id, OrderStatus::Failed)),
        SagaEvent::OrderCreated(_) | SagaEvent::Unknown { .. } => None,
    }
}

/// Applies status transitions to stored orders.
///
/// Every transition is a last-write-wins overwrite, so duplicate and
/// reordered deliveries converge on the status of the latest one applied.
pub struct OrderSagaStateMachine<O> {
    orders: O,
}

impl<O: OrderRepository> OrderSagaStateMachine<O> {
    pub fn new(orders: O) -> Self {
        Self { orders }
    }

    /// Sets the status of an order.
    ///
    /// Returns `false` when the order does not exist. That is logged and
    /// treated as done since there is nothing to project onto.
    ///
    /// # Errors
    ///
    /// Returns a store error when the update fails.
    #[tracing::instrument(skip(self), fields(order_id = %order_id, status = %status))]
    pub async fn apply(&self, order_id: OrderId, status: OrderStatus) -> Result<bool> {
        let updated = self.orders.update_status(order_id, status).await?;
        if updated {
            tracing::info!("order status updated");
            metrics::counter!("order_status_transitions_total", "status" => status.as_str())
                .increment(1);
        } else {
            tracing::warn!("order not found, nothing to update");
        }
        Ok(updated)
    }
}

#[async_trait]
impl<O: OrderRepository> EventHandler for OrderSagaStateMachine<O> {
    fn name(&self) -> &'static str {
        "order-service"
    }

    async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), HandlerError> {
        let event = decode_delivery(delivery)?;
        match transition_for(&event) {
            Some((order_id, status)) => {
                self.apply(order_id, status).await?;
            }
            None => tracing::debug!(event_type = event.event_type(), "ignoring event"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{PaymentId, ProductId, UserId};
    use domain::{
        InMemoryOrderStore, NewOrder, OrderEvent, PaymentEvent, PaymentStatus, event_types,
    };
    use event_bus::EventEnvelope;

    fn payment_event(order_id: i64, event_type: &str, status: PaymentStatus) -> PaymentEvent {
        PaymentEvent {
            payment_id: PaymentId::new(1),
            order_id: OrderId::new(order_id),
            user_id: UserId::new(7),
            amount: 100.0,
            status,
            event_type: event_type.to_string(),
            transaction_id: String::new(),
        }
    }

    fn delivery_of<T: serde::Serialize>(event: &T) -> Delivery {
        let envelope = EventEnvelope::builder()
            .topic("order_events")
            .payload(event)
            .unwrap()
            .build()
            .unwrap();
        Delivery::new(envelope, 0, 0)
    }

    fn raw_delivery(payload: &str) -> Delivery {
        let envelope = EventEnvelope::builder()
            .topic("order_events")
            .payload_raw(payload.as_bytes().to_vec())
            .build()
            .unwrap();
        Delivery::new(envelope, 0, 0)
    }

    async fn store_with_order(id: i64) -> InMemoryOrderStore {
        let store = InMemoryOrderStore::new();
        let order = NewOrder {
            user_id: UserId::new(7),
            product_id: ProductId::new(3),
            quantity: 1,
            total_price: 100.0,
        };
        store.put(order.into_order(OrderId::new(id), Utc::now())).await;
        store
    }

    #[test]
    fn transitions_follow_event_type() {
        let success = SagaEvent::PaymentSuccess(payment_event(
            1,
            event_types::PAYMENT_SUCCESS,
            PaymentStatus::Success,
        )
        .into());
        let failed = SagaEvent::PaymentFailed(payment_event(
            2,
            event_types::PAYMENT_FAILED,
            PaymentStatus::Failed,
        )
        .into());
        let unknown = SagaEvent::Unknown {
            event_type: "order_shipped".into(),
        };

        assert_eq!(
            transition_for(&success),
            Some((OrderId::new(1), OrderStatus::Paid))
        );
        assert_eq!(
            transition_for(&failed),
            Some((OrderId::new(2), OrderStatus::Failed))
        );
        assert_eq!(transition_for(&unknown), None);
    }

    #[test]
    fn order_events_map_like_payment_events() {
        let order = NewOrder {
            user_id: UserId::new(7),
            product_id: ProductId::new(3),
            quantity: 1,
            total_price: 10.0,
        }
        .into_order(OrderId::new(5), Utc::now());

        let created = OrderEvent::created(&order);
        let mut paid = created.clone();
        paid.event_type = event_types::ORDER_PAID.into();
        let mut failed = created.clone();
        failed.event_type = event_types::ORDER_FAILED.into();

        assert_eq!(transition_for(&SagaEvent::OrderCreated(created)), None);
        assert_eq!(
            transition_for(&SagaEvent::OrderPaid(paid)),
            Some((OrderId::new(5), OrderStatus::Paid))
        );
        assert_eq!(
            transition_for(&SagaEvent::OrderFailed(failed)),
            Some((OrderId::new(5), OrderStatus::Failed))
        );
    }

    #[tokio::test]
    async fn payment_success_marks_order_paid() {
        let orders = store_with_order(42).await;
        let machine = OrderSagaStateMachine::new(orders.clone());
        let event = payment_event(42, event_types::PAYMENT_SUCCESS, PaymentStatus::Success);

        machine.handle(&delivery_of(&event)).await.unwrap();

        let order = orders.get(OrderId::new(42)).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn payment_failed_in_order_shape_marks_order_failed() {
        let orders = store_with_order(42).await;
        let machine = OrderSagaStateMachine::new(orders.clone());
        let delivery = raw_delivery(
            r#"{"order_id":42,"user_id":7,"product_id":3,"quantity":1,
                "status":"failed","total_price":100.0,"event_type":"payment_failed"}"#,
        );

        machine.handle(&delivery).await.unwrap();

        let order = orders.get(OrderId::new(42)).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn payment_success_needs_only_order_id() {
        let orders = store_with_order(42).await;
        let machine = OrderSagaStateMachine::new(orders.clone());

        machine
            .handle(&raw_delivery(r#"{"event_type":"payment_success","order_id":42}"#))
            .await
            .unwrap();

        let order = orders.get(OrderId::new(42)).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn unexpected_payment_status_does_not_block_transition() {
        let orders = store_with_order(42).await;
        let machine = OrderSagaStateMachine::new(orders.clone());
        let delivery = raw_delivery(
            r#"{"event_type":"payment_success","payment_id":1,"order_id":42,
                "user_id":7,"amount":100.0,"status":"completed"}"#,
        );

        machine.handle(&delivery).await.unwrap();

        let order = orders.get(OrderId::new(42)).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn applying_twice_is_idempotent() {
        let orders = store_with_order(42).await;
        let machine = OrderSagaStateMachine::new(orders.clone());
        let delivery = delivery_of(&payment_event(
            42,
            event_types::PAYMENT_SUCCESS,
            PaymentStatus::Success,
        ));

        machine.handle(&delivery).await.unwrap();
        machine.handle(&delivery).await.unwrap();

        let order = orders.get(OrderId::new(42)).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn latest_applied_event_wins() {
        let orders = store_with_order(9).await;
        let machine = OrderSagaStateMachine::new(orders.clone());

        machine.apply(OrderId::new(9), OrderStatus::Failed).await.unwrap();
        machine.apply(OrderId::new(9), OrderStatus::Paid).await.unwrap();

        let order = orders.get(OrderId::new(9)).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn missing_order_is_acknowledged() {
        let machine = OrderSagaStateMachine::new(InMemoryOrderStore::new());
        let delivery = delivery_of(&payment_event(
            404,
            event_types::PAYMENT_FAILED,
            PaymentStatus::Failed,
        ));

        assert!(machine.handle(&delivery).await.is_ok());
        assert!(!machine.apply(OrderId::new(404), OrderStatus::Failed).await.unwrap());
    }

    #[tokio::test]
    async fn store_failure_is_retryable() {
        let orders = store_with_order(1).await;
        orders.set_unavailable(true).await;
        let machine = OrderSagaStateMachine::new(orders);
        let delivery = delivery_of(&payment_event(
            1,
            event_types::PAYMENT_SUCCESS,
            PaymentStatus::Success,
        ));

        let err = machine.handle(&delivery).await.unwrap_err();
        assert!(matches!(err, HandlerError::Retryable(_)));
    }

    #[tokio::test]
    async fn malformed_payload_is_not_retried() {
        let machine = OrderSagaStateMachine::new(InMemoryOrderStore::new());
        let envelope = EventEnvelope::builder()
            .topic("order_events")
            .payload_raw(b"{not json".to_vec())
            .build()
            .unwrap();

        let err = machine.handle(&Delivery::new(envelope, 0, 0)).await.unwrap_err();
        assert!(matches!(err, HandlerError::Malformed(_)));
    }
}
