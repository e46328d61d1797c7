//! # External Collaborators
//!
//! The services the engine calls but does not own.
//!
//! ## Seams
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   RedemptionManager ─────► OrderGateway   get / mark_paid              │
//! │          │          └────► Notifier       order administrators         │
//! │          └───────────────► Identity       current customer             │
//! │                                                                         │
//! │   PaymentReconciler ─────► OrderGateway   get / mark_paid              │
//! │                     ├────► PaymentGateway authorize (once per attempt) │
//! │                     └────► Notifier       sales staff + customer       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every seam is an `async_trait` object held as `Arc<dyn …>`. The in-memory
//! implementations at the bottom of this module back the seed binary and
//! the test suites.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use discount_core::{Money, Order, OrderStatus};

// =============================================================================
// Errors
// =============================================================================

/// Transport-level failure talking to a collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },

    #[error("{service} timed out")]
    Timeout { service: String },

    #[error("{service} rejected the request: {message}")]
    Rejected { service: String, message: String },

    #[error("Not authenticated")]
    Unauthenticated,
}

impl CollaboratorError {
    pub fn unavailable(service: &str, message: impl Into<String>) -> Self {
        CollaboratorError::Unavailable {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn rejected(service: &str, message: impl Into<String>) -> Self {
        CollaboratorError::Rejected {
            service: service.to_string(),
            message: message.into(),
        }
    }
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

// =============================================================================
// Order Gateway
// =============================================================================

/// The host's order service.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Fetches an order. `Ok(None)` when it does not exist.
    async fn get(&self, order_id: &str) -> CollaboratorResult<Option<Order>>;

    /// Moves an order to PAID.
    ///
    /// Must be idempotent: marking an already PAID order succeeds.
    async fn mark_paid(&self, order_id: &str) -> CollaboratorResult<()>;
}

// =============================================================================
// Payment Gateway
// =============================================================================

/// Result of a single authorization call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Success { transaction_ref: String },
    Failure { reason: String },
}

/// Mobile-money payment rails.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges `amount` to `msisdn`.
    ///
    /// `reference` identifies the attempt; a repeated reference must not be
    /// charged twice.
    async fn authorize(
        &self,
        amount: Money,
        currency: &str,
        msisdn: &str,
        reference: &str,
    ) -> CollaboratorResult<PaymentOutcome>;
}

// =============================================================================
// Notifier
// =============================================================================

/// Who should hear about an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    OrderAdministrators,
    SalesStaff,
    Customer(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    DiscountApplied,
    PaymentReceived,
}

/// Fire-and-forget messaging. Failures are logged by the caller and never
/// abort the operation that triggered them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        recipients: &[Recipient],
        subject_id: &str,
        kind: NotificationKind,
        message: &str,
    ) -> CollaboratorResult<()>;
}

// =============================================================================
// Identity
// =============================================================================

/// Resolves the authenticated customer behind a host request.
#[async_trait]
pub trait Identity: Send + Sync {
    /// The host's request type (headers, session, token...).
    type Request: Send + Sync;

    async fn current_customer(&self, request: &Self::Request) -> CollaboratorResult<String>;
}

// =============================================================================
// Collaborator Bundle
// =============================================================================

/// The shared collaborators an engine is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub orders: Arc<dyn OrderGateway>,
    pub payments: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

// =============================================================================
// In-Memory Implementations
// =============================================================================

/// Orders held in a map.
#[derive(Debug, Default)]
pub struct InMemoryOrders {
    orders: Mutex<HashMap<String, Order>>,
    mark_paid_calls: Mutex<u32>,
}

impl InMemoryOrders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped instance for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn put(&self, order: Order) {
        self.orders.lock().await.insert(order.id.clone(), order);
    }

    pub async fn status(&self, order_id: &str) -> Option<OrderStatus> {
        self.orders.lock().await.get(order_id).map(|o| o.status)
    }

    /// How many times `mark_paid` was called.
    pub async fn mark_paid_calls(&self) -> u32 {
        *self.mark_paid_calls.lock().await
    }
}

#[async_trait]
impl OrderGateway for InMemoryOrders {
    async fn get(&self, order_id: &str) -> CollaboratorResult<Option<Order>> {
        Ok(self.orders.lock().await.get(order_id).cloned())
    }

    async fn mark_paid(&self, order_id: &str) -> CollaboratorResult<()> {
        *self.mark_paid_calls.lock().await += 1;
        let mut orders = self.orders.lock().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| CollaboratorError::rejected("orders", format!("no order {order_id}")))?;
        match order.status {
            OrderStatus::AwaitingPayment | OrderStatus::Paid => {
                order.status = OrderStatus::Paid;
                Ok(())
            }
            other => Err(CollaboratorError::rejected(
                "orders",
                format!("order {order_id} cannot be paid from {other:?}"),
            )),
        }
    }
}

/// Gateway that approves or declines every charge and records each one.
///
/// A repeated reference replays the first outcome without charging again.
#[derive(Debug, Default)]
pub struct MockPaymentGateway {
    decline_with: Option<String>,
    charges: Mutex<Vec<(Money, String)>>,
    outcomes: Mutex<HashMap<String, PaymentOutcome>>,
}

impl MockPaymentGateway {
    /// A gateway that approves everything.
    pub fn approving() -> Self {
        Self::default()
    }

    /// A gateway that declines everything with `reason`.
    pub fn declining(reason: impl Into<String>) -> Self {
        MockPaymentGateway {
            decline_with: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Every `(amount, reference)` this gateway actually charged.
    pub async fn charges(&self) -> Vec<(Money, String)> {
        self.charges.lock().await.clone()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn authorize(
        &self,
        amount: Money,
        currency: &str,
        msisdn: &str,
        reference: &str,
    ) -> CollaboratorResult<PaymentOutcome> {
        let mut outcomes = self.outcomes.lock().await;
        if let Some(outcome) = outcomes.get(reference) {
            debug!(reference = %reference, "Mock payment replayed");
            return Ok(outcome.clone());
        }

        self.charges
            .lock()
            .await
            .push((amount, reference.to_string()));

        let outcome = match &self.decline_with {
            Some(reason) => {
                debug!(reference = %reference, reason = %reason, "Mock payment declined");
                PaymentOutcome::Failure {
                    reason: reason.clone(),
                }
            }
            None => {
                let transaction_ref = format!("mock_txn_{}", Uuid::new_v4());
                info!(
                    amount = amount.cents(),
                    currency = %currency,
                    msisdn = %msisdn,
                    transaction_ref = %transaction_ref,
                    "Mock payment processed"
                );
                PaymentOutcome::Success { transaction_ref }
            }
        };

        outcomes.insert(reference.to_string(), outcome.clone());
        Ok(outcome)
    }
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        recipients: &[Recipient],
        subject_id: &str,
        kind: NotificationKind,
        message: &str,
    ) -> CollaboratorResult<()> {
        info!(?recipients, subject_id = %subject_id, ?kind, message = %message, "Notification");
        Ok(())
    }
}

/// A notification captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub recipients: Vec<Recipient>,
    pub subject_id: String,
    pub kind: NotificationKind,
    pub message: String,
}

/// Notifier that keeps every message, optionally failing each call.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    fail: bool,
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every call fails after recording.
    pub fn failing() -> Self {
        RecordingNotifier {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        recipients: &[Recipient],
        subject_id: &str,
        kind: NotificationKind,
        message: &str,
    ) -> CollaboratorResult<()> {
        self.sent.lock().await.push(SentNotification {
            recipients: recipients.to_vec(),
            subject_id: subject_id.to_string(),
            kind,
            message: message.to_string(),
        });
        if self.fail {
            return Err(CollaboratorError::unavailable("notifier", "mailer down"));
        }
        Ok(())
    }
}

/// Identity over a bearer-token map.
#[derive(Debug, Clone, Default)]
pub struct TokenIdentity {
    tokens: HashMap<String, String>,
}

impl TokenIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` as authenticating `customer_id`.
    pub fn with_token(mut self, token: impl Into<String>, customer_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), customer_id.into());
        self
    }
}

#[async_trait]
impl Identity for TokenIdentity {
    type Request = String;

    async fn current_customer(&self, request: &String) -> CollaboratorResult<String> {
        self.tokens
            .get(request)
            .cloned()
            .ok_or(CollaboratorError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discount_core::OrderLine;

    fn order(status: OrderStatus) -> Order {
        Order {
            id: "order-1".to_string(),
            customer_id: "alice".to_string(),
            subtotal_cents: 10_000,
            status,
            lines: vec![OrderLine {
                product_id: "p-1".to_string(),
                category: "shoes".to_string(),
                quantity: 1,
                unit_weight: 1,
            }],
            delivery_rate_cents: 500,
        }
    }

    #[tokio::test]
    async fn test_mark_paid_is_idempotent() {
        let orders = InMemoryOrders::new();
        orders.put(order(OrderStatus::AwaitingPayment)).await;

        orders.mark_paid("order-1").await.unwrap();
        orders.mark_paid("order-1").await.unwrap();
        assert_eq!(orders.status("order-1").await, Some(OrderStatus::Paid));
        assert_eq!(orders.mark_paid_calls().await, 2);
    }

    #[tokio::test]
    async fn test_mark_paid_rejects_archived() {
        let orders = InMemoryOrders::new();
        orders.put(order(OrderStatus::Archived)).await;
        assert!(orders.mark_paid("order-1").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_gateway_records_charges() {
        let gateway = MockPaymentGateway::declining("insufficient funds");
        let outcome = gateway
            .authorize(Money::from_cents(8_500), "KES", "254712345678", "att-1")
            .await
            .unwrap();
        assert!(matches!(outcome, PaymentOutcome::Failure { .. }));
        assert_eq!(
            gateway.charges().await,
            vec![(Money::from_cents(8_500), "att-1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_mock_gateway_replays_repeated_reference() {
        let gateway = MockPaymentGateway::approving();
        let first = gateway
            .authorize(Money::from_cents(8_500), "KES", "254712345678", "order-1#1")
            .await
            .unwrap();
        let again = gateway
            .authorize(Money::from_cents(8_500), "KES", "254712345678", "order-1#1")
            .await
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(gateway.charges().await.len(), 1);

        gateway
            .authorize(Money::from_cents(8_500), "KES", "254712345678", "order-1#2")
            .await
            .unwrap();
        assert_eq!(gateway.charges().await.len(), 2);
    }

    #[tokio::test]
    async fn test_token_identity() {
        let identity = TokenIdentity::new().with_token("t-1", "alice");
        assert_eq!(identity.current_customer(&"t-1".to_string()).await.unwrap(), "alice");
        assert_eq!(
            identity.current_customer(&"nope".to_string()).await,
            Err(CollaboratorError::Unauthenticated)
        );
    }
}
