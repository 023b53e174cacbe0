//! Per-user quota accounting
//!
//! One row per (user, feature). Rows materialize lazily on first touch and
//! roll over lazily whenever `reset_at` has passed, so correctness never
//! depends on a scheduler. Ceilings are not stored; they come from the
//! catalog for the tier the caller resolved. The increment is a single
//! conditional UPDATE, which is what makes concurrent use safe: of two
//! racing requests for the last unit, exactly one matches the predicate.

use gaiya_shared::catalog::{ceiling, Feature, SubscriptionTier};
use gaiya_shared::clock::{next_reset, user_offset};
use sqlx::PgPool;
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Snapshot of one feature's window
#[derive(Debug, Clone, serde::Serialize)]
pub struct FeatureQuota {
    pub feature: Feature,
    pub used: i64,
    /// `None` means unbounded for the resolved tier
    pub remaining: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub reset_at: OffsetDateTime,
}

/// Result of a successful `use_feature`
#[derive(Debug, Clone, serde::Serialize)]
pub struct QuotaUse {
    pub feature: Feature,
    pub used: i64,
    pub remaining: Option<i64>,
    pub total: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub reset_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct QuotaRow {
    feature: String,
    used: i64,
    reset_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct QuotaService {
    pool: PgPool,
}

impl QuotaService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Full quota snapshot for a user. Materializes missing rows and rolls
    /// over any window whose boundary has passed.
    pub async fn status(
        &self,
        user_id: Uuid,
        tier: SubscriptionTier,
        tz_offset_minutes: i32,
    ) -> BillingResult<Vec<FeatureQuota>> {
        let offset = user_offset(tz_offset_minutes);
        let now = OffsetDateTime::now_utc();
        self.ensure_rows(user_id, offset, now).await?;
        self.rollover(user_id, offset, now).await?;

        let rows: Vec<QuotaRow> = sqlx::query_as(
            r#"
            SELECT feature, used, reset_at
            FROM quota_usage
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshot = Vec::with_capacity(Feature::ALL.len());
        for feature in Feature::ALL {
            let row = rows
                .iter()
                .find(|r| r.feature == feature.as_str())
                .ok_or_else(|| {
                    BillingError::Internal(format!("quota row missing for {feature}"))
                })?;
            let remaining = ceiling(tier, feature).map(|c| (c - row.used).max(0));
            snapshot.push(FeatureQuota {
                feature,
                used: row.used,
                remaining,
                reset_at: row.reset_at,
            });
        }
        Ok(snapshot)
    }

    /// Consume `amount` units of a feature. The tier is resolved by the
    /// caller (the subscription manager is a value oracle here, never a
    /// back-reference).
    pub async fn use_feature(
        &self,
        user_id: Uuid,
        feature: Feature,
        amount: i64,
        tier: SubscriptionTier,
        tz_offset_minutes: i32,
    ) -> BillingResult<QuotaUse> {
        let offset = user_offset(tz_offset_minutes);
        let now = OffsetDateTime::now_utc();
        self.ensure_rows(user_id, offset, now).await?;
        self.rollover(user_id, offset, now).await?;

        let total = ceiling(tier, feature);

        let updated: Option<(i64, OffsetDateTime)> = match total {
            // Unbounded tiers still record usage for visibility
            None => {
                sqlx::query_as(
                    r#"
                    UPDATE quota_usage
                    SET used = used + $3
                    WHERE user_id = $1 AND feature = $2 AND reset_at > $4
                    RETURNING used, reset_at
                    "#,
                )
                .bind(user_id)
                .bind(feature.as_str())
                .bind(amount)
                .bind(now)
                .fetch_optional(&self.pool)
                .await?
            }
            Some(limit) => {
                sqlx::query_as(
                    r#"
                    UPDATE quota_usage
                    SET used = used + $3
                    WHERE user_id = $1
                      AND feature = $2
                      AND reset_at > $4
                      AND used + $3 <= $5
                    RETURNING used, reset_at
                    "#,
                )
                .bind(user_id)
                .bind(feature.as_str())
                .bind(amount)
                .bind(now)
                .bind(limit)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        match updated {
            Some((used, reset_at)) => Ok(QuotaUse {
                feature,
                used,
                remaining: total.map(|c| (c - used).max(0)),
                total,
                reset_at,
            }),
            None => {
                let reset_at = self.current_reset(user_id, feature, offset, now).await?;
                tracing::info!(
                    user_id = %user_id,
                    feature = %feature,
                    amount = amount,
                    "Quota exceeded"
                );
                Err(BillingError::QuotaExceeded { feature, reset_at })
            }
        }
    }

    async fn ensure_rows(
        &self,
        user_id: Uuid,
        offset: UtcOffset,
        now: OffsetDateTime,
    ) -> BillingResult<()> {
        for feature in Feature::ALL {
            let reset_at = next_reset(now, offset, feature.window());
            sqlx::query(
                r#"
                INSERT INTO quota_usage (user_id, feature, used, reset_at)
                VALUES ($1, $2, 0, $3)
                ON CONFLICT (user_id, feature) DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(feature.as_str())
            .bind(reset_at)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn rollover(
        &self,
        user_id: Uuid,
        offset: UtcOffset,
        now: OffsetDateTime,
    ) -> BillingResult<()> {
        for feature in Feature::ALL {
            let reset_at = next_reset(now, offset, feature.window());
            let rolled = sqlx::query(
                r#"
                UPDATE quota_usage
                SET used = 0, reset_at = $3
                WHERE user_id = $1 AND feature = $2 AND reset_at <= $4
                "#,
            )
            .bind(user_id)
            .bind(feature.as_str())
            .bind(reset_at)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if rolled > 0 {
                tracing::debug!(
                    user_id = %user_id,
                    feature = %feature,
                    next_reset = %reset_at,
                    "Quota window rolled over"
                );
            }
        }
        Ok(())
    }

    async fn current_reset(
        &self,
        user_id: Uuid,
        feature: Feature,
        offset: UtcOffset,
        now: OffsetDateTime,
    ) -> BillingResult<OffsetDateTime> {
        let row: Option<(OffsetDateTime,)> = sqlx::query_as(
            r#"
            SELECT reset_at FROM quota_usage
            WHERE user_id = $1 AND feature = $2
            "#,
        )
        .bind(user_id)
        .bind(feature.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|(reset_at,)| reset_at)
            .unwrap_or_else(|| next_reset(now, offset, feature.window())))
    }
}
