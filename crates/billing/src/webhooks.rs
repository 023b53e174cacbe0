//! Gateway callback handling
//!
//! Fulfillment is gated by the webhook ledger. The
//! `INSERT … ON CONFLICT … RETURNING` claim awards exclusive processing
//! rights to exactly one delivery: duplicates see no returned row and ack
//! without side effects. Rows stuck in `processing` for over 30 minutes
//! and rows whose processing failed are re-claimable, so provider retries
//! replay safely. An order already `paid` from an earlier partial failure
//! is not a conflict; the replay proceeds straight to the entitlement.

use std::collections::BTreeMap;

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use gaiya_shared::catalog::plan_by_id;
use gaiya_shared::validate::parse_amount_cents;

use crate::error::{BillingError, BillingResult};
use crate::orders::{self, OrderState, PaymentGateway};
use crate::stripe::StripeGateway;
use crate::subscriptions::SubscriptionService;
use crate::zpay::{ZPayCallback, ZPayClient};

/// Re-claim window for deliveries stuck in `processing`
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// What the HTTP handler should send back to Z-Pay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAck {
    /// Plain-text `"success"`; stops provider retries
    Success,
    /// Any other body; the provider will retry into the idempotent path
    Failure,
}

#[derive(Clone)]
pub struct WebhookHandler {
    pool: PgPool,
    subscriptions: SubscriptionService,
    zpay: ZPayClient,
    stripe: StripeGateway,
}

impl WebhookHandler {
    pub fn new(
        pool: PgPool,
        subscriptions: SubscriptionService,
        zpay: ZPayClient,
        stripe: StripeGateway,
    ) -> Self {
        Self {
            pool,
            subscriptions,
            zpay,
            stripe,
        }
    }

    /// Handle a Z-Pay notify callback (form parameters).
    ///
    /// Invalid signatures fail `unauthorized` with no side effects of any
    /// kind. Everything past the signature check answers with an ack.
    pub async fn handle_zpay(
        &self,
        params: &BTreeMap<String, String>,
    ) -> BillingResult<CallbackAck> {
        if !self.zpay.verify_callback(params) {
            tracing::warn!("Z-Pay callback with invalid signature rejected");
            return Err(BillingError::SignatureInvalid);
        }

        let callback = ZPayCallback::from_params(params)?;

        if callback.trade_status != "TRADE_SUCCESS" {
            // Nothing to fulfill; ack so the provider stops resending
            tracing::info!(
                out_trade_no = %callback.out_trade_no,
                trade_status = %callback.trade_status,
                "Z-Pay callback for non-success trade status ignored"
            );
            return Ok(CallbackAck::Success);
        }

        let amount_cents = parse_amount_cents(&callback.money).ok_or_else(|| {
            BillingError::GatewayRejected(format!("unparseable money field: {}", callback.money))
        })?;

        let payload = serde_json::to_value(params)
            .map_err(|e| BillingError::Internal(format!("payload serialization: {e}")))?;

        match self
            .fulfill(
                PaymentGateway::Zpay,
                &callback.trade_no,
                &callback.out_trade_no,
                Some(amount_cents),
                payload,
            )
            .await
        {
            Ok(()) => Ok(CallbackAck::Success),
            Err(e) => {
                tracing::error!(
                    out_trade_no = %callback.out_trade_no,
                    error = %e,
                    "Z-Pay fulfillment failed; answering non-success so the gateway retries"
                );
                Ok(CallbackAck::Failure)
            }
        }
    }

    /// Handle a Stripe webhook delivery (raw payload + signature header)
    pub async fn handle_stripe(&self, payload: &str, signature: &str) -> BillingResult<()> {
        self.stripe.verify_signature(payload, signature)?;

        let Some(event) = StripeGateway::parse_event(payload)? else {
            return Ok(());
        };

        let out_trade_no = event.client_reference_id.ok_or_else(|| {
            BillingError::GatewayRejected("checkout session has no client reference".to_string())
        })?;

        let raw = serde_json::from_str(payload)
            .unwrap_or_else(|_| serde_json::Value::String(payload.to_string()));

        self.fulfill(
            PaymentGateway::Stripe,
            &event.session_id,
            &out_trade_no,
            event.amount_total,
            raw,
        )
        .await
    }

    /// Ledger-gated fulfillment shared by both gateways:
    /// claim → order `created → paid` → entitlement → outcome.
    async fn fulfill(
        &self,
        gateway: PaymentGateway,
        gateway_trade_no: &str,
        out_trade_no: &str,
        amount_cents: Option<i64>,
        payload: serde_json::Value,
    ) -> BillingResult<()> {
        let order = orders::find_order(&self.pool, out_trade_no)
            .await?
            .ok_or_else(|| BillingError::OrderNotFound(out_trade_no.to_string()))?;

        let plan = plan_by_id(&order.plan_id)
            .ok_or_else(|| BillingError::PlanUnknown(order.plan_id.clone()))?;

        // Amounts come from the gateway, prices from the catalog
        if let Some(received) = amount_cents {
            if !plan.amount_acceptable(received) {
                return Err(BillingError::AmountMismatch {
                    expected_cents: plan.price_cents,
                    received_cents: received,
                });
            }
        }

        let Some(claim_id) = claim_delivery(
            &self.pool,
            gateway,
            gateway_trade_no,
            &payload,
        )
        .await?
        else {
            tracing::info!(
                gateway = gateway.as_str(),
                gateway_trade_no = gateway_trade_no,
                "Duplicate webhook delivery - atomic idempotency check"
            );
            return Ok(());
        };

        tracing::info!(
            gateway = gateway.as_str(),
            gateway_trade_no = gateway_trade_no,
            out_trade_no = out_trade_no,
            "Processing webhook delivery (claimed exclusive processing rights)"
        );

        let result = self
            .fulfill_claimed(&order.user_id, plan, gateway, gateway_trade_no, out_trade_no)
            .await;

        let (outcome, error_detail) = match &result {
            Ok(()) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };
        record_outcome(&self.pool, claim_id, outcome, error_detail.as_deref()).await;

        result
    }

    async fn fulfill_claimed(
        &self,
        user_id: &Uuid,
        plan: &gaiya_shared::catalog::Plan,
        gateway: PaymentGateway,
        gateway_trade_no: &str,
        out_trade_no: &str,
    ) -> BillingResult<()> {
        let transitioned = orders::mark_paid(&self.pool, out_trade_no, gateway_trade_no).await?;
        if !transitioned {
            // Replays land here when a prior attempt marked the order paid
            // and then failed; anything else is unfulfillable.
            let order = orders::find_order(&self.pool, out_trade_no)
                .await?
                .ok_or_else(|| BillingError::OrderNotFound(out_trade_no.to_string()))?;
            if order.state()? != OrderState::Paid {
                return Err(BillingError::OrderNotFulfillable {
                    out_trade_no: out_trade_no.to_string(),
                    state: order.state,
                });
            }
            tracing::info!(
                out_trade_no = out_trade_no,
                "Order already paid; replaying entitlement application"
            );
        }

        self.subscriptions
            .apply(*user_id, plan, gateway.as_str(), gateway_trade_no)
            .await?;

        Ok(())
    }
}

/// Atomically claim a delivery for processing. Returns `None` when another
/// delivery already holds or completed the claim.
async fn claim_delivery(
    pool: &PgPool,
    gateway: PaymentGateway,
    gateway_trade_no: &str,
    payload: &serde_json::Value,
) -> BillingResult<Option<Uuid>> {
    let claimed: Option<(Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO webhook_ledger
            (gateway, gateway_trade_no, payload, signature_ok, outcome, claimed_at)
        VALUES ($1, $2, $3, TRUE, 'processing', NOW())
        ON CONFLICT (gateway, gateway_trade_no) DO UPDATE SET
            outcome = 'processing',
            claimed_at = NOW(),
            error_detail = NULL
        WHERE webhook_ledger.outcome = 'error'
           OR (webhook_ledger.outcome = 'processing'
               AND webhook_ledger.claimed_at < NOW() - make_interval(mins => $4))
        RETURNING id
        "#,
    )
    .bind(gateway.as_str())
    .bind(gateway_trade_no)
    .bind(payload)
    .bind(PROCESSING_TIMEOUT_MINUTES)
    .fetch_optional(pool)
    .await?;

    Ok(claimed.map(|(id,)| id))
}

/// Record the processing outcome. Retried once; the ledger is what makes
/// replays safe, so losing the update is worth shouting about.
async fn record_outcome(pool: &PgPool, claim_id: Uuid, outcome: &str, error_detail: Option<&str>) {
    for attempt in 0..2 {
        let result = sqlx::query(
            r#"
            UPDATE webhook_ledger
            SET outcome = $2, error_detail = $3, processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(claim_id)
        .bind(outcome)
        .bind(error_detail)
        .execute(pool)
        .await;

        match result {
            Ok(_) => return,
            Err(e) if attempt == 0 => {
                tracing::warn!(
                    claim_id = %claim_id,
                    error = %e,
                    "First attempt to update ledger outcome failed, retrying..."
                );
            }
            Err(e) => {
                tracing::error!(
                    claim_id = %claim_id,
                    outcome = outcome,
                    error = %e,
                    "CRITICAL: Failed to update ledger outcome after retry. \
                     Delivery may appear stuck in 'processing' until the timeout recovery."
                );
            }
        }
    }
}

/// Read-only ledger lookup used by operator tooling
pub async fn delivery_outcome(
    pool: &PgPool,
    gateway: PaymentGateway,
    gateway_trade_no: &str,
) -> BillingResult<Option<(String, Option<OffsetDateTime>)>> {
    let row: Option<(String, Option<OffsetDateTime>)> = sqlx::query_as(
        r#"
        SELECT outcome, processed_at
        FROM webhook_ledger
        WHERE gateway = $1 AND gateway_trade_no = $2
        "#,
    )
    .bind(gateway.as_str())
    .bind(gateway_trade_no)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
