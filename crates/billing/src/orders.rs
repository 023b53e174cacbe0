//! Payment order store
//!
//! Orders move `created → paid → refunded`, or `created → expired` on
//! timeout and `created → failed` on gateway rejection. Every transition is
//! a guarded conditional UPDATE; `rows_affected` tells the caller whether it
//! won the transition.

use gaiya_shared::catalog::Plan;
use rand::Rng;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Orders still `created` after this long are considered abandoned
const ORDER_TTL: Duration = Duration::hours(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentGateway {
    Zpay,
    Stripe,
}

impl PaymentGateway {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentGateway::Zpay => "zpay",
            PaymentGateway::Stripe => "stripe",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "zpay" => Some(PaymentGateway::Zpay),
            "stripe" => Some(PaymentGateway::Stripe),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Created,
    Paid,
    Failed,
    Expired,
    Refunded,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Created => "created",
            OrderState::Paid => "paid",
            OrderState::Failed => "failed",
            OrderState::Expired => "expired",
            OrderState::Refunded => "refunded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(OrderState::Created),
            "paid" => Some(OrderState::Paid),
            "failed" => Some(OrderState::Failed),
            "expired" => Some(OrderState::Expired),
            "refunded" => Some(OrderState::Refunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderRow {
    pub out_trade_no: String,
    pub user_id: Uuid,
    pub plan_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub gateway: String,
    pub state: String,
    pub gateway_trade_no: Option<String>,
    pub created_at: OffsetDateTime,
    pub paid_at: Option<OffsetDateTime>,
}

/// `"GAIYA" + unix-millis + 8-hex-random`, 26 ASCII characters
pub fn generate_out_trade_no(now: OffsetDateTime) -> String {
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    let suffix: u32 = rand::rng().random();
    format!("GAIYA{millis}{suffix:08x}")
}

pub async fn insert_order(
    pool: &PgPool,
    user_id: Uuid,
    plan: &Plan,
    gateway: PaymentGateway,
) -> BillingResult<OrderRow> {
    let out_trade_no = generate_out_trade_no(OffsetDateTime::now_utc());
    let row: OrderRow = sqlx::query_as(
        r#"
        INSERT INTO payment_orders
            (out_trade_no, user_id, plan_id, amount_cents, currency, gateway, state)
        VALUES ($1, $2, $3, $4, $5, $6, 'created')
        RETURNING out_trade_no, user_id, plan_id, amount_cents, currency, gateway,
                  state, gateway_trade_no, created_at, paid_at
        "#,
    )
    .bind(&out_trade_no)
    .bind(user_id)
    .bind(plan.id)
    .bind(plan.price_cents)
    .bind(plan.currency)
    .bind(gateway.as_str())
    .fetch_one(pool)
    .await?;

    tracing::info!(
        out_trade_no = %row.out_trade_no,
        user_id = %user_id,
        plan_id = %plan.id,
        gateway = gateway.as_str(),
        "Payment order created"
    );

    Ok(row)
}

pub async fn find_order(pool: &PgPool, out_trade_no: &str) -> BillingResult<Option<OrderRow>> {
    let row = sqlx::query_as(
        r#"
        SELECT out_trade_no, user_id, plan_id, amount_cents, currency, gateway,
               state, gateway_trade_no, created_at, paid_at
        FROM payment_orders
        WHERE out_trade_no = $1
        "#,
    )
    .bind(out_trade_no)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// `created → paid`. Returns false when the order was not in `created`;
/// the caller decides whether that is a replay or a real conflict.
pub async fn mark_paid(
    pool: &PgPool,
    out_trade_no: &str,
    gateway_trade_no: &str,
) -> BillingResult<bool> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE payment_orders
        SET state = 'paid',
            gateway_trade_no = $2,
            paid_at = NOW()
        WHERE out_trade_no = $1
          AND state = 'created'
        "#,
    )
    .bind(out_trade_no)
    .bind(gateway_trade_no)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected > 0)
}

/// `paid → refunded`. Operator action only.
pub async fn mark_refunded(pool: &PgPool, out_trade_no: &str) -> BillingResult<bool> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE payment_orders
        SET state = 'refunded'
        WHERE out_trade_no = $1
          AND state = 'paid'
        "#,
    )
    .bind(out_trade_no)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected > 0)
}

/// Lazily move an abandoned order to `expired`. Invoked from the query
/// path; a pending callback still loses to the `state = 'created'` guard
/// in `mark_paid` only if this ran first, which is the intended race.
pub async fn expire_if_stale(pool: &PgPool, out_trade_no: &str) -> BillingResult<bool> {
    let cutoff = OffsetDateTime::now_utc() - ORDER_TTL;
    let rows_affected = sqlx::query(
        r#"
        UPDATE payment_orders
        SET state = 'expired'
        WHERE out_trade_no = $1
          AND state = 'created'
          AND created_at < $2
        "#,
    )
    .bind(out_trade_no)
    .bind(cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected > 0)
}

impl OrderRow {
    pub fn state(&self) -> BillingResult<OrderState> {
        OrderState::from_str(&self.state)
            .ok_or_else(|| BillingError::Internal(format!("unknown order state: {}", self.state)))
    }
}
