//! Theme style listing
//!
//! The catalog lives in code; the handler filters it by the resolved tier
//! and optional category/featured parameters.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use gaiya_shared::catalog::styles_for;

use crate::error::{ok, ApiError, ApiResult};
use crate::routes::{enforce_rate_limit, resolve_user};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub user_id: Option<String>,
    #[allow(dead_code)]
    pub user_tier: Option<String>,
    pub category: Option<String>,
    pub featured: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct StyleEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub featured: bool,
    pub min_tier: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub styles: Vec<StyleEntry>,
    pub count: usize,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let user_id_raw = query
        .user_id
        .as_deref()
        .ok_or(ApiError::InvalidArgument { field: "user_id" })?;
    enforce_rate_limit(&state, "styles-list", user_id_raw).await?;
    let (_, tier) = resolve_user(&state, user_id_raw).await?;

    let styles: Vec<StyleEntry> = styles_for(tier, query.category.as_deref(), query.featured)
        .into_iter()
        .map(|style| StyleEntry {
            id: style.id,
            name: style.name,
            category: style.category,
            featured: style.featured,
            min_tier: style.min_tier.as_str(),
        })
        .collect();

    let count = styles.len();
    Ok(ok(ListResponse { styles, count }))
}
