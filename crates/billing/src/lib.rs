// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! GaiYa Billing Module
//!
//! Handles payment gateways, entitlements, and quota accounting.
//!
//! ## Features
//!
//! - **Orders**: catalog-priced payment orders with a monotone state machine
//! - **Gateways**: Z-Pay (domestic, MD5-signed) and Stripe (international,
//!   Checkout Sessions with HMAC-verified webhooks)
//! - **Webhooks**: ledger-gated, exactly-once fulfillment under duplicate
//!   and replayed deliveries
//! - **Subscriptions**: tier/expiry entitlements, lifetime precedence
//! - **Quotas**: per-user per-feature windows with atomic decrements and
//!   local-midnight rollover
//! - **Invariants**: runnable read-only consistency checks

pub mod error;
pub mod invariants;
pub mod orders;
pub mod payments;
pub mod quota;
pub mod stripe;
pub mod subscriptions;
pub mod webhooks;
pub mod zpay;

#[cfg(test)]
mod edge_case_tests;

// Error
pub use error::{BillingError, BillingResult};

// Orders
pub use orders::{generate_out_trade_no, OrderRow, OrderState, PaymentGateway};

// Payments
pub use payments::{CreatedOrder, OrderView, PaymentService};

// Quota
pub use quota::{FeatureQuota, QuotaService, QuotaUse};

// Subscriptions
pub use subscriptions::{SubscriptionService, SubscriptionStatus};

// Gateways
pub use stripe::StripeGateway;
pub use zpay::{ZPayClient, ZPAY_ACK};

// Webhooks
pub use webhooks::{CallbackAck, WebhookHandler};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

use sqlx::PgPool;

/// Gateway and URL configuration for the billing service
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub zpay_pid: String,
    pub zpay_pkey: String,
    pub zpay_gateway: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_price_monthly: String,
    pub stripe_price_yearly: String,
    pub stripe_price_lifetime: String,
    pub public_base_url: String,
}

impl BillingConfig {
    /// Read gateway credentials from the environment
    pub fn from_env() -> BillingResult<Self> {
        let var = |key: &str| {
            std::env::var(key)
                .map_err(|_| BillingError::Internal(format!("missing environment variable {key}")))
        };
        Ok(Self {
            zpay_pid: var("ZPAY_PID")?,
            zpay_pkey: var("ZPAY_PKEY")?,
            zpay_gateway: std::env::var("ZPAY_GATEWAY")
                .unwrap_or_else(|_| "https://z-pay.cn".to_string()),
            stripe_secret_key: var("STRIPE_SECRET_KEY")?,
            stripe_webhook_secret: var("STRIPE_WEBHOOK_SECRET")?,
            stripe_price_monthly: var("STRIPE_PRICE_MONTHLY")?,
            stripe_price_yearly: var("STRIPE_PRICE_YEARLY")?,
            stripe_price_lifetime: var("STRIPE_PRICE_LIFETIME")?,
            public_base_url: var("PUBLIC_BASE_URL")?,
        })
    }
}

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub payments: PaymentService,
    pub quota: QuotaService,
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        Ok(Self::new(BillingConfig::from_env()?, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: BillingConfig, pool: PgPool) -> Self {
        let zpay = ZPayClient::new(
            config.zpay_pid.clone(),
            config.zpay_pkey.clone(),
            config.zpay_gateway.clone(),
        );
        let stripe = StripeGateway::new(
            config.stripe_secret_key.clone(),
            config.stripe_webhook_secret.clone(),
            config.stripe_price_monthly.clone(),
            config.stripe_price_yearly.clone(),
            config.stripe_price_lifetime.clone(),
        );
        let subscriptions = SubscriptionService::new(pool.clone());

        Self {
            payments: PaymentService::new(
                pool.clone(),
                zpay.clone(),
                stripe.clone(),
                config.public_base_url.clone(),
            ),
            quota: QuotaService::new(pool.clone()),
            subscriptions: subscriptions.clone(),
            webhooks: WebhookHandler::new(pool, subscriptions, zpay, stripe),
        }
    }
}
