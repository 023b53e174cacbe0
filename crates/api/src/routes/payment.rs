//! Payment endpoints
//!
//! `/payment-notify` serves both gateways: Stripe deliveries carry a
//! `Stripe-Signature` header and a JSON body; everything else is treated
//! as Z-Pay form/query parameters. Callback responses are gateway-specific
//! (`"success"` plain text for Z-Pay), never the JSON envelope.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use gaiya_billing::{BillingError, CallbackAck, PaymentGateway, ZPAY_ACK};
use gaiya_shared::is_plan_id;

use crate::error::{ok, ApiError, ApiResult};
use crate::routes::{enforce_rate_limit, resolve_user, AppJson};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub plan_type: String,
    pub gateway: Option<String>,
}

pub async fn create_order(
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateOrderRequest>,
) -> ApiResult<impl IntoResponse> {
    enforce_rate_limit(&state, "payment-create-order", &body.user_id).await?;

    if !is_plan_id(&body.plan_type) {
        return Err(ApiError::InvalidArgument { field: "plan_type" });
    }
    let gateway = match body.gateway.as_deref() {
        None => PaymentGateway::Zpay,
        Some(raw) => PaymentGateway::from_str(raw)
            .ok_or(ApiError::InvalidArgument { field: "gateway" })?,
    };

    let (user, tier) = resolve_user(&state, &body.user_id).await?;

    // Reject obviously redundant purchases before creating an order; the
    // entitlement rules are enforced again at fulfillment.
    if tier == gaiya_shared::catalog::SubscriptionTier::Lifetime {
        return Err(ApiError::RedundantPurchase);
    }

    let created = state
        .billing
        .payments
        .create_order(user.id, &body.plan_type, gateway)
        .await?;

    Ok(ok(created))
}

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub out_trade_no: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct QueryResponse {
    pub order: gaiya_billing::OrderView,
}

pub async fn query(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<impl IntoResponse> {
    let out_trade_no = params
        .out_trade_no
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::InvalidArgument {
            field: "out_trade_no",
        })?;
    enforce_rate_limit(&state, "payment-query", out_trade_no).await?;

    let order = state.billing.payments.query(out_trade_no).await?;
    Ok(ok(QueryResponse { order }))
}

/// Z-Pay notifies via GET with query parameters
pub async fn notify_query(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    zpay_notify(&state, params).await
}

/// POST side of the callback endpoint: Stripe (JSON + signature header) or
/// Z-Pay form parameters.
pub async fn notify_body(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    if let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
    {
        return match state.billing.webhooks.handle_stripe(&body, signature).await {
            Ok(()) => (
                StatusCode::OK,
                axum::Json(serde_json::json!({ "received": true })),
            )
                .into_response(),
            Err(BillingError::SignatureInvalid) => {
                (StatusCode::UNAUTHORIZED, "invalid signature").into_response()
            }
            Err(e) => {
                tracing::error!(error = %e, "Stripe webhook processing failed");
                (StatusCode::BAD_GATEWAY, "processing failed").into_response()
            }
        };
    }

    let params: BTreeMap<String, String> = match serde_urlencoded::from_str(&body) {
        Ok(params) => params,
        Err(_) => return (StatusCode::BAD_REQUEST, "unparseable callback").into_response(),
    };
    zpay_notify(&state, params).await
}

async fn zpay_notify(state: &AppState, params: BTreeMap<String, String>) -> Response {
    match state.billing.webhooks.handle_zpay(&params).await {
        Ok(CallbackAck::Success) => (StatusCode::OK, ZPAY_ACK).into_response(),
        Ok(CallbackAck::Failure) => (StatusCode::OK, "fail").into_response(),
        Err(BillingError::SignatureInvalid) => {
            (StatusCode::UNAUTHORIZED, "fail").into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Z-Pay callback rejected");
            (StatusCode::OK, "fail").into_response()
        }
    }
}
