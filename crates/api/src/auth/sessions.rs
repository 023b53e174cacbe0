//! User session management for token revocation
//!
//! Sessions are tracked in the `user_sessions` table keyed by JTI so tokens
//! can be revoked before expiration. Refresh rotation is a one-winner
//! conditional UPDATE: the delivery that revokes the old refresh JTI owns
//! the rotation; a replayed token loses and takes the whole chain down.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::jwt::TokenPair;
use crate::error::ApiResult;

/// Maximum concurrent refresh sessions per user. Prevents session
/// accumulation and limits attack surface.
const MAX_SESSIONS_PER_USER: i64 = 10;

/// Save a freshly issued token pair
///
/// Called immediately after `issue_pair`. Both rows are created atomically;
/// when the user is at the session cap the oldest refresh session is
/// revoked first.
pub async fn save_session(
    pool: &PgPool,
    user_id: Uuid,
    chain_id: Uuid,
    pair: &TokenPair,
) -> ApiResult<()> {
    let mut tx = pool.begin().await?;

    let session_count: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM user_sessions
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND expires_at > NOW()
          AND token_type = 'refresh'
        "#,
    )
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    if session_count.0 >= MAX_SESSIONS_PER_USER {
        tracing::info!(
            user_id = %user_id,
            current_sessions = session_count.0,
            max_sessions = MAX_SESSIONS_PER_USER,
            "Revoking oldest session due to max sessions limit"
        );

        sqlx::query(
            r#"
            UPDATE user_sessions
            SET revoked_at = NOW(),
                revocation_reason = 'max_sessions_exceeded'
            WHERE id IN (
                SELECT id FROM user_sessions
                WHERE user_id = $1
                  AND revoked_at IS NULL
                  AND token_type = 'refresh'
                ORDER BY created_at ASC
                LIMIT 1
            )
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO user_sessions (user_id, chain_id, jti, token_type, expires_at)
        VALUES ($1, $2, $3, 'refresh', $4)
        "#,
    )
    .bind(user_id)
    .bind(chain_id)
    .bind(&pair.refresh_jti)
    .bind(pair.refresh_expires_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO user_sessions (user_id, chain_id, jti, token_type, expires_at)
        VALUES ($1, $2, $3, 'access', $4)
        "#,
    )
    .bind(user_id)
    .bind(chain_id)
    .bind(&pair.access_jti)
    .bind(pair.access_expires_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(())
}

/// Check whether a session (by JTI) is live: owned by the expected user,
/// not revoked, not expired.
pub async fn is_session_valid(pool: &PgPool, jti: &str, expected_user_id: Uuid) -> ApiResult<bool> {
    let result: Option<(bool,)> = sqlx::query_as(
        r#"
        SELECT TRUE
        FROM user_sessions
        WHERE jti = $1
          AND user_id = $2
          AND revoked_at IS NULL
          AND expires_at > NOW()
        "#,
    )
    .bind(jti)
    .bind(expected_user_id)
    .fetch_optional(pool)
    .await?;

    Ok(result.is_some())
}

/// Claim the rotation of a refresh token. Exactly one caller wins; the
/// loser is looking at a replayed token.
pub async fn claim_rotation(pool: &PgPool, refresh_jti: &str, user_id: Uuid) -> ApiResult<bool> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE user_sessions
        SET revoked_at = NOW(),
            revocation_reason = 'rotated'
        WHERE jti = $1
          AND user_id = $2
          AND token_type = 'refresh'
          AND revoked_at IS NULL
          AND expires_at > NOW()
        "#,
    )
    .bind(refresh_jti)
    .bind(user_id)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected > 0)
}

/// The rotation chain a JTI belongs to
pub async fn chain_of(pool: &PgPool, jti: &str) -> ApiResult<Option<Uuid>> {
    let row: Option<(Uuid,)> =
        sqlx::query_as("SELECT chain_id FROM user_sessions WHERE jti = $1")
            .bind(jti)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(chain_id,)| chain_id))
}

/// Revoke a specific session by JTI
///
/// Returns true if the session was found and revoked, false if not found.
pub async fn revoke_session(pool: &PgPool, jti: &str, reason: &str) -> ApiResult<bool> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE user_sessions
        SET revoked_at = NOW(),
            revocation_reason = $2
        WHERE jti = $1
          AND revoked_at IS NULL
        "#,
    )
    .bind(jti)
    .bind(reason)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected > 0)
}

/// Revoke every session in a rotation chain. Called when a rotated refresh
/// token is replayed.
pub async fn revoke_chain(pool: &PgPool, chain_id: Uuid, reason: &str) -> ApiResult<u64> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE user_sessions
        SET revoked_at = NOW(),
            revocation_reason = $2
        WHERE chain_id = $1
          AND revoked_at IS NULL
        "#,
    )
    .bind(chain_id)
    .bind(reason)
    .execute(pool)
    .await?
    .rows_affected();

    if rows_affected > 0 {
        tracing::warn!(
            chain_id = %chain_id,
            reason = reason,
            sessions_revoked = rows_affected,
            "Session chain revoked"
        );
    }

    Ok(rows_affected)
}

/// Revoke all sessions for a user
///
/// Called when the user changes their password or a security incident
/// requires force logout.
pub async fn revoke_all_sessions(pool: &PgPool, user_id: Uuid, reason: &str) -> ApiResult<u64> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE user_sessions
        SET revoked_at = NOW(),
            revocation_reason = $2
        WHERE user_id = $1
          AND revoked_at IS NULL
        "#,
    )
    .bind(user_id)
    .bind(reason)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected)
}

/// Delete sessions expired or revoked for more than a week. Hygiene only;
/// validity checks never depend on this running.
pub async fn prune_sessions(pool: &PgPool) -> ApiResult<u64> {
    let horizon = OffsetDateTime::now_utc() - time::Duration::days(7);
    let rows_affected = sqlx::query(
        r#"
        DELETE FROM user_sessions
        WHERE expires_at < $1
           OR revoked_at < $1
        "#,
    )
    .bind(horizon)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected)
}
