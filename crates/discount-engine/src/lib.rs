//! # discount-engine: Issuance, Redemption and Payment Reconciliation
//!
//! The services that issue coupons, apply them to orders and count them
//! against their ceilings only when payment succeeds.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Discount Engine                                  │
//! │                                                                         │
//! │  Host backend (HTTP handlers, admin tools)                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌──────────────────┐  ┌───────────────────┐  ┌──────────────────────┐ │
//! │  │ CouponLifecycle  │  │ RedemptionManager │  │  PaymentReconciler   │ │
//! │  │                  │  │                   │  │                      │ │
//! │  │ create / cancel  │◄─│ claim             │  │ compute_payable      │ │
//! │  │ lazy expiry      │◄─│ list_active       │  │ authorize (saga)     │ │
//! │  │ availability     │◄─┼───────────────────┼──│                      │ │
//! │  └────────┬─────────┘  └─────────┬─────────┘  └──────────┬───────────┘ │
//! │           │                      │                       │             │
//! │           ▼                      ▼                       ▼             │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              discount-db (coupons, claims, attempts)            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Collaborators (async traits): OrderGateway, PaymentGateway,           │
//! │  Notifier, Identity                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`lifecycle`] - Coupon issuance, cancellation, lazy status
//! - [`redemption`] - Claims of coupons against orders
//! - [`reconciler`] - Payable recomputation and the payment saga
//! - [`collaborators`] - External service traits and in-memory implementations
//! - [`applicability`] - Which orders a coupon may apply to
//! - [`codegen`] - Coupon code generation
//! - [`config`] - Engine configuration
//! - [`error`] - Engine error types
//!
//! ## Usage
//! ```rust,ignore
//! let config = EngineConfig::load(None)?;
//! let db = Database::new(config.db_config()).await?;
//! let engine = DiscountEngine::new(db, collaborators, &config);
//!
//! let claim = engine.redemptions.claim("alice", "order-1", &coupon_id, Utc::now()).await?;
//! ```

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use discount_db::Database;

pub mod applicability;
pub mod codegen;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod reconciler;
pub mod redemption;

// =============================================================================
// Re-exports
// =============================================================================

pub use applicability::{ApplicabilityRule, CategoryRule};
pub use codegen::{CodeGenerator, RandomCodeGenerator};
pub use collaborators::{
    CollaboratorError, Collaborators, Identity, NotificationKind, Notifier, OrderGateway,
    PaymentGateway, PaymentOutcome, Recipient,
};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, ErrorKind};
pub use lifecycle::CouponLifecycle;
pub use reconciler::{payment_reference, PaymentReceipt, PaymentReconciler, PaymentSubmission};
pub use redemption::RedemptionManager;

// =============================================================================
// Engine
// =============================================================================

/// The three services wired against one store and one set of collaborators.
#[derive(Debug, Clone)]
pub struct DiscountEngine {
    pub lifecycle: CouponLifecycle,
    pub redemptions: RedemptionManager,
    pub reconciler: PaymentReconciler,
}

impl DiscountEngine {
    /// Builds the engine with random codes and the category rule.
    pub fn new(db: Database, collaborators: Collaborators, config: &EngineConfig) -> Self {
        let codes = Arc::new(RandomCodeGenerator::new(config.coupons.code_length));
        Self::with_parts(db, collaborators, config, codes, Arc::new(CategoryRule))
    }

    /// Builds the engine with a custom code generator and applicability rule.
    pub fn with_parts(
        db: Database,
        collaborators: Collaborators,
        config: &EngineConfig,
        codes: Arc<dyn CodeGenerator>,
        rule: Arc<dyn ApplicabilityRule>,
    ) -> Self {
        let lifecycle = CouponLifecycle::new(db.clone(), codes, config.coupons.code_max_attempts);

        let redemptions = RedemptionManager::new(
            db.clone(),
            lifecycle.clone(),
            collaborators.orders.clone(),
            collaborators.notifier.clone(),
            rule,
        );

        let reconciler = PaymentReconciler::new(
            db,
            lifecycle.clone(),
            collaborators.orders,
            collaborators.payments,
            collaborators.notifier,
            config.msisdn_policy(),
            config.payment.currency.clone(),
        );

        DiscountEngine {
            lifecycle,
            redemptions,
            reconciler,
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Initializes the tracing subscriber for binaries.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,discount=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
