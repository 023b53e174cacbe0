//! Order creation and client polling
//!
//! Amounts always come from the plan catalog; the client only names a plan
//! and a gateway. The poll path reads the local order row first — the
//! callback-populated cache — and only then asks the Z-Pay query API, so a
//! flaky gateway never blocks a client whose callback already landed.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use gaiya_shared::catalog::plan_by_id;

use crate::error::{BillingError, BillingResult};
use crate::orders::{self, OrderState, PaymentGateway};
use crate::stripe::StripeGateway;
use crate::zpay::ZPayClient;

/// Response of `create_order`
#[derive(Debug, Clone, serde::Serialize)]
pub struct CreatedOrder {
    pub order_id: String,
    pub payment_url: String,
}

/// Normalized order view for the client poll
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrderView {
    pub out_trade_no: String,
    pub plan_id: String,
    pub state: OrderState,
    pub money: String,
    pub currency: String,
    pub gateway: String,
    pub gateway_trade_no: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub paid_at: Option<OffsetDateTime>,
    /// True when the gateway reports the trade settled but our callback has
    /// not landed yet; the client should keep polling.
    pub gateway_reports_paid: bool,
}

#[derive(Clone)]
pub struct PaymentService {
    pool: PgPool,
    zpay: ZPayClient,
    stripe: StripeGateway,
    public_base_url: String,
}

impl PaymentService {
    pub fn new(
        pool: PgPool,
        zpay: ZPayClient,
        stripe: StripeGateway,
        public_base_url: String,
    ) -> Self {
        Self {
            pool,
            zpay,
            stripe,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create an order and a gateway payment URL for it
    pub async fn create_order(
        &self,
        user_id: Uuid,
        plan_id: &str,
        gateway: PaymentGateway,
    ) -> BillingResult<CreatedOrder> {
        let plan =
            plan_by_id(plan_id).ok_or_else(|| BillingError::PlanUnknown(plan_id.to_string()))?;

        let order = orders::insert_order(&self.pool, user_id, plan, gateway).await?;

        let payment_url = match gateway {
            PaymentGateway::Zpay => self.zpay.payment_url(
                &order,
                plan.display_name,
                &plan.price_decimal(),
                &format!("{}/payment-notify", self.public_base_url),
                &format!("{}/payment-return", self.public_base_url),
            ),
            PaymentGateway::Stripe => {
                self.stripe
                    .create_checkout_session(
                        plan.id,
                        &order.out_trade_no,
                        &format!("{}/payment-return?ok=1", self.public_base_url),
                        &format!("{}/payment-return?ok=0", self.public_base_url),
                    )
                    .await?
            }
        };

        Ok(CreatedOrder {
            order_id: order.out_trade_no,
            payment_url,
        })
    }

    /// Resolve an order for the client poll
    pub async fn query(&self, out_trade_no: &str) -> BillingResult<OrderView> {
        let mut order = orders::find_order(&self.pool, out_trade_no)
            .await?
            .ok_or_else(|| BillingError::OrderNotFound(out_trade_no.to_string()))?;

        let mut gateway_reports_paid = false;

        if order.state()? == OrderState::Created {
            if orders::expire_if_stale(&self.pool, out_trade_no).await? {
                order.state = OrderState::Expired.as_str().to_string();
            } else if order.gateway == PaymentGateway::Zpay.as_str() {
                // Best effort: the signed callback is the only thing that
                // fulfills, but the poll can still report gateway progress.
                match self.zpay.query_order(out_trade_no).await {
                    Ok(status) => gateway_reports_paid = status.paid,
                    Err(e) => {
                        tracing::warn!(
                            out_trade_no = out_trade_no,
                            error = %e,
                            "Z-Pay query failed; answering from the local order row"
                        );
                    }
                }
            }
        }

        let state = order.state()?;
        Ok(OrderView {
            out_trade_no: order.out_trade_no,
            plan_id: order.plan_id,
            state,
            money: format!(
                "{}.{:02}",
                order.amount_cents / 100,
                order.amount_cents % 100
            ),
            currency: order.currency,
            gateway: order.gateway,
            gateway_trade_no: order.gateway_trade_no,
            created_at: order.created_at,
            paid_at: order.paid_at,
            gateway_reports_paid,
        })
    }
}
