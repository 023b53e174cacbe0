//! HTTP handlers
//!
//! Every handler follows the same shape: parse, rate limit, validate,
//! delegate to exactly one manager, translate to the wire envelope.

pub mod auth;
pub mod pages;
pub mod payment;
pub mod quota;
pub mod styles;
pub mod subscription;

use axum::extract::{FromRequest, Request};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use gaiya_shared::catalog::SubscriptionTier;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::users::{self, UserRow};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth-signup", post(auth::signup))
        .route("/auth-send-otp", post(auth::send_otp))
        .route("/auth-verify-otp", post(auth::verify_otp))
        .route("/auth-signin", post(auth::signin))
        .route("/auth-refresh", post(auth::refresh))
        .route("/auth-signout", post(auth::signout))
        .route("/auth-reset-password", post(auth::reset_password))
        .route("/auth-check-verification", post(auth::check_verification))
        .route("/quota-status", get(quota::status))
        .route("/quota-use", post(quota::use_feature))
        .route("/subscription-status", get(subscription::status))
        .route("/subscription-cancel", post(subscription::cancel))
        .route("/styles-list", get(styles::list))
        .route("/payment-create-order", post(payment::create_order))
        .route("/payment-query", get(payment::query))
        .route(
            "/payment-notify",
            get(payment::notify_query).post(payment::notify_body),
        )
        .route("/payment-return", get(pages::payment_return))
        .route("/email-verified", get(pages::email_verified))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": timestamp,
    }))
}

/// JSON extractor that reports malformed bodies as `invalid_json` instead
/// of axum's default rejection.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(_) => Err(ApiError::InvalidJson),
        }
    }
}

/// Best-effort client address for rate limiting unauthenticated requests
pub fn extract_client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Apply the endpoint's rate-limit policy. Store failures deny nothing but
/// are surfaced as `store_unavailable` so they never pass silently.
pub async fn enforce_rate_limit(
    state: &AppState,
    endpoint: &str,
    principal: &str,
) -> ApiResult<()> {
    match state.rate_limiter.check(endpoint, principal).await {
        Ok(result) if result.allowed => Ok(()),
        Ok(result) => Err(ApiError::RateLimited {
            retry_after_seconds: result.retry_after_seconds.unwrap_or(60),
        }),
        Err(e) => {
            tracing::error!(endpoint = endpoint, error = %e, "Rate limit check failed");
            Err(ApiError::StoreUnavailable)
        }
    }
}

/// Parse a user id, load the row, and resolve the current tier in one go.
/// The subscription manager acts as a value oracle here; quota code only
/// ever sees the resolved tier.
pub(crate) async fn resolve_user(
    state: &AppState,
    user_id_raw: &str,
) -> ApiResult<(UserRow, SubscriptionTier)> {
    let user_id = Uuid::parse_str(user_id_raw)
        .map_err(|_| ApiError::InvalidArgument { field: "user_id" })?;

    let user = users::find_user_by_id(&state.pool, user_id)
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    let subscription = state.billing.subscriptions.status(user_id).await?;
    Ok((user, subscription.tier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_ip_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(extract_client_ip(&headers), "203.0.113.9");
    }

    #[test]
    fn missing_forwarded_header_is_unknown() {
        assert_eq!(extract_client_ip(&HeaderMap::new()), "unknown");
    }
}
