//! Subscription endpoints

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::error::{ok, ApiError, ApiResult};
use crate::routes::{enforce_rate_limit, resolve_user, AppJson};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub user_id: Option<String>,
}

pub async fn status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<impl IntoResponse> {
    let user_id_raw = query
        .user_id
        .as_deref()
        .ok_or(ApiError::InvalidArgument { field: "user_id" })?;
    enforce_rate_limit(&state, "subscription-status", user_id_raw).await?;
    let (user, _) = resolve_user(&state, user_id_raw).await?;

    let subscription = state.billing.subscriptions.status(user.id).await?;
    Ok(ok(subscription))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub user_id: String,
}

pub async fn cancel(
    State(state): State<AppState>,
    AppJson(body): AppJson<CancelRequest>,
) -> ApiResult<impl IntoResponse> {
    enforce_rate_limit(&state, "subscription-cancel", &body.user_id).await?;
    let (user, _) = resolve_user(&state, &body.user_id).await?;

    state.billing.subscriptions.cancel(user.id).await?;
    Ok(ok(serde_json::json!({})))
}
