//! Quota endpoints
//!
//! The tier always comes from the subscription row, never from the client;
//! the `user_tier` query parameter survives for wire compatibility but is
//! only echoed, never trusted.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

use gaiya_shared::catalog::Feature;

use crate::error::{ok, ApiError, ApiResult};
use crate::routes::{enforce_rate_limit, resolve_user, AppJson};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub user_id: Option<String>,
    #[allow(dead_code)]
    pub user_tier: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeatureStatus {
    pub used: i64,
    /// `null` means unbounded
    pub remaining: Option<i64>,
    pub reset_at: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub user_tier: String,
    pub remaining: BTreeMap<&'static str, FeatureStatus>,
}

pub async fn status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<impl IntoResponse> {
    let user_id_raw = query
        .user_id
        .as_deref()
        .ok_or(ApiError::InvalidArgument { field: "user_id" })?;
    enforce_rate_limit(&state, "quota-status", user_id_raw).await?;
    let (user, tier) = resolve_user(&state, user_id_raw).await?;

    let snapshot = state
        .billing
        .quota
        .status(user.id, tier, user.tz_offset_minutes)
        .await?;

    let mut remaining = BTreeMap::new();
    for entry in snapshot {
        remaining.insert(
            entry.feature.as_str(),
            FeatureStatus {
                used: entry.used,
                remaining: entry.remaining,
                reset_at: entry.reset_at.format(&Rfc3339).unwrap_or_default(),
            },
        );
    }

    Ok(ok(StatusResponse {
        user_tier: tier.as_str().to_string(),
        remaining,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UseRequest {
    pub user_id: String,
    pub feature: String,
    pub amount: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UseResponse {
    pub used: i64,
    pub remaining: Option<i64>,
    pub total: Option<i64>,
}

pub async fn use_feature(
    State(state): State<AppState>,
    AppJson(body): AppJson<UseRequest>,
) -> ApiResult<impl IntoResponse> {
    enforce_rate_limit(&state, "quota-use", &body.user_id).await?;

    let feature = Feature::from_str(&body.feature)
        .ok_or(ApiError::InvalidArgument { field: "feature" })?;
    let amount = body.amount.unwrap_or(1);
    if amount < 1 || amount > 100 {
        return Err(ApiError::InvalidArgument { field: "amount" });
    }

    let (user, tier) = resolve_user(&state, &body.user_id).await?;

    let outcome = state
        .billing
        .quota
        .use_feature(user.id, feature, amount, tier, user.tz_offset_minutes)
        .await?;

    Ok(ok(UseResponse {
        used: outcome.used,
        remaining: outcome.remaining,
        total: outcome.total,
    }))
}
