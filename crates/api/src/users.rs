//! User row store
//!
//! Users are unique by normalized email and never deleted; deactivation is
//! a timestamp. The caller normalizes emails before every lookup.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use gaiya_shared::clock::DEFAULT_TZ_OFFSET_MINUTES;

use crate::error::ApiResult;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub display_handle: Option<String>,
    pub verified: bool,
    pub tz_offset_minutes: i32,
    pub deactivated_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Client-facing profile snapshot
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub display_handle: Option<String>,
    pub verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&UserRow> for UserProfile {
    fn from(row: &UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email.clone(),
            display_handle: row.display_handle.clone(),
            verified: row.verified,
            created_at: row.created_at,
        }
    }
}

const USER_COLUMNS: &str = "id, email, password_hash, display_handle, verified, \
                            tz_offset_minutes, deactivated_at, created_at";

pub async fn find_user_by_email(pool: &PgPool, normalized: &str) -> ApiResult<Option<UserRow>> {
    let row = sqlx::query_as(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
    ))
    .bind(normalized)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn find_user_by_id(pool: &PgPool, id: Uuid) -> ApiResult<Option<UserRow>> {
    let row = sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Insert an unverified user. A unique violation on the email surfaces as
/// `already_exists` through the error conversion.
pub async fn insert_user(
    pool: &PgPool,
    normalized_email: &str,
    password_hash: &str,
    display_handle: Option<&str>,
) -> ApiResult<UserRow> {
    let row = sqlx::query_as(&format!(
        r#"
        INSERT INTO users (id, email, password_hash, display_handle, verified, tz_offset_minutes)
        VALUES ($1, $2, $3, $4, FALSE, $5)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(normalized_email)
    .bind(password_hash)
    .bind(display_handle)
    .bind(DEFAULT_TZ_OFFSET_MINUTES)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn mark_verified(pool: &PgPool, normalized_email: &str) -> ApiResult<bool> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE users
        SET verified = TRUE
        WHERE email = $1
          AND verified = FALSE
        "#,
    )
    .bind(normalized_email)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows_affected > 0)
}

pub async fn update_password(pool: &PgPool, user_id: Uuid, password_hash: &str) -> ApiResult<()> {
    sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
        .bind(user_id)
        .bind(password_hash)
        .execute(pool)
        .await?;
    Ok(())
}
