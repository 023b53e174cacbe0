//! Billing error taxonomy

use gaiya_shared::Feature;
use time::OffsetDateTime;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("database error: {0}")]
    Database(String),

    #[error("unknown plan: {0}")]
    PlanUnknown(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("order {out_trade_no} is {state}, cannot fulfill")]
    OrderNotFulfillable { out_trade_no: String, state: String },

    #[error("webhook signature invalid")]
    SignatureInvalid,

    #[error("callback amount {received_cents} does not match catalog price {expected_cents}")]
    AmountMismatch {
        expected_cents: i64,
        received_cents: i64,
    },

    #[error("quota exceeded for {feature}")]
    QuotaExceeded {
        feature: Feature,
        reset_at: OffsetDateTime,
    },

    #[error("a pro purchase on top of a lifetime entitlement is redundant")]
    RedundantPurchase,

    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("gateway rejected request: {0}")]
    GatewayRejected(String),

    #[error("internal billing error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}
