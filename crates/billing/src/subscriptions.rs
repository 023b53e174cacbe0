//! Subscription management
//!
//! The subscriptions table is the source of truth for entitlement. Tier
//! transitions are monotone (`free → pro → lifetime`); the only downgrade
//! is an expiry crossing, persisted lazily the first time `status` observes
//! it. `apply` is idempotent by trade number through the webhook ledger.

use gaiya_shared::catalog::{Plan, SubscriptionTier};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Current entitlement snapshot
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubscriptionStatus {
    pub tier: SubscriptionTier,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub auto_renew: bool,
    pub source: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_upgraded_at: Option<OffsetDateTime>,
}

impl SubscriptionStatus {
    fn free() -> Self {
        Self {
            tier: SubscriptionTier::Free,
            expires_at: None,
            auto_renew: false,
            source: None,
            last_upgraded_at: None,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    tier: String,
    expires_at: Option<OffsetDateTime>,
    auto_renew: bool,
    source: Option<String>,
    last_upgraded_at: Option<OffsetDateTime>,
}

#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
}

impl SubscriptionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Read the current entitlement, synthesizing and persisting the free
    /// downgrade when an expiry has been crossed.
    pub async fn status(&self, user_id: Uuid) -> BillingResult<SubscriptionStatus> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT tier, expires_at, auto_renew, source, last_upgraded_at
            FROM subscriptions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(SubscriptionStatus::free());
        };

        let tier = SubscriptionTier::from_str(&row.tier)
            .ok_or_else(|| BillingError::Internal(format!("unknown tier: {}", row.tier)))?;

        let now = OffsetDateTime::now_utc();
        if tier != SubscriptionTier::Lifetime {
            if let Some(expires_at) = row.expires_at {
                if expires_at <= now {
                    // The guard repeats the expiry condition so a concurrent
                    // upgrade that already advanced expires_at is untouched.
                    sqlx::query(
                        r#"
                        UPDATE subscriptions
                        SET tier = 'free', expires_at = NULL, updated_at = NOW()
                        WHERE user_id = $1
                          AND tier <> 'lifetime'
                          AND expires_at IS NOT NULL
                          AND expires_at <= NOW()
                        "#,
                    )
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?;

                    tracing::info!(user_id = %user_id, "Subscription expired, downgraded to free");
                    return Ok(SubscriptionStatus::free());
                }
            }
        }

        Ok(SubscriptionStatus {
            tier,
            expires_at: row.expires_at,
            auto_renew: row.auto_renew,
            source: row.source,
            last_upgraded_at: row.last_upgraded_at,
        })
    }

    /// New (tier, expires_at) after purchasing `plan` on top of the current
    /// entitlement. Pure so the precedence rules are testable.
    pub fn compute_upgrade(
        current_tier: SubscriptionTier,
        current_expires_at: Option<OffsetDateTime>,
        plan: &Plan,
        now: OffsetDateTime,
    ) -> BillingResult<(SubscriptionTier, Option<OffsetDateTime>)> {
        match plan.duration_days {
            // Lifetime absorbs whatever was there
            None => Ok((SubscriptionTier::Lifetime, None)),
            Some(days) => {
                if current_tier == SubscriptionTier::Lifetime {
                    return Err(BillingError::RedundantPurchase);
                }
                let base = match current_expires_at {
                    Some(expires_at) if expires_at > now => expires_at,
                    _ => now,
                };
                Ok((plan.tier, Some(base + Duration::days(days))))
            }
        }
    }

    /// Apply a paid plan to the user's entitlement. Idempotent by
    /// `trade_no`: a ledger entry already marked successful short-circuits
    /// to the current status without touching the row again.
    pub async fn apply(
        &self,
        user_id: Uuid,
        plan: &Plan,
        source: &str,
        trade_no: &str,
    ) -> BillingResult<SubscriptionStatus> {
        let already_fulfilled: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM webhook_ledger
            WHERE gateway_trade_no = $1 AND outcome = 'success'
            "#,
        )
        .bind(trade_no)
        .fetch_optional(&self.pool)
        .await?;

        if already_fulfilled.is_some() {
            tracing::info!(
                user_id = %user_id,
                trade_no = trade_no,
                "Entitlement already applied for this trade, returning prior result"
            );
            return self.status(user_id).await;
        }

        let current = self.status(user_id).await?;
        let now = OffsetDateTime::now_utc();
        let (tier, expires_at) =
            Self::compute_upgrade(current.tier, current.expires_at, plan, now)?;

        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (user_id, tier, expires_at, source, auto_renew, last_upgraded_at, updated_at)
            VALUES ($1, $2, $3, $4, TRUE, NOW(), NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                tier = EXCLUDED.tier,
                expires_at = EXCLUDED.expires_at,
                source = EXCLUDED.source,
                auto_renew = TRUE,
                last_upgraded_at = NOW(),
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(tier.as_str())
        .bind(expires_at)
        .bind(source)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            tier = tier.as_str(),
            expires_at = ?expires_at,
            source = source,
            trade_no = trade_no,
            "Entitlement upgraded"
        );

        self.status(user_id).await
    }

    /// Mark non-renewing. The unexpired entitlement stays usable.
    pub async fn cancel(&self, user_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET auto_renew = FALSE, updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(user_id = %user_id, "Subscription marked non-renewing");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaiya_shared::plan_by_id;
    use time::macros::datetime;

    #[test]
    fn pro_purchase_from_free_starts_now() {
        let plan = plan_by_id("pro_monthly").unwrap();
        let now = datetime!(2024-03-01 00:00:00 UTC);
        let (tier, expires) =
            SubscriptionService::compute_upgrade(SubscriptionTier::Free, None, plan, now).unwrap();
        assert_eq!(tier, SubscriptionTier::Pro);
        assert_eq!(expires, Some(datetime!(2024-03-31 00:00:00 UTC)));
    }

    #[test]
    fn pro_renewal_extends_from_current_expiry() {
        let plan = plan_by_id("pro_monthly").unwrap();
        let now = datetime!(2024-03-01 00:00:00 UTC);
        let current = Some(datetime!(2024-03-11 00:00:00 UTC));
        let (_, expires) =
            SubscriptionService::compute_upgrade(SubscriptionTier::Pro, current, plan, now)
                .unwrap();
        // max(now, prior_expires_at) + 30 days
        assert_eq!(expires, Some(datetime!(2024-04-10 00:00:00 UTC)));
    }

    #[test]
    fn stale_expiry_extends_from_now() {
        let plan = plan_by_id("pro_monthly").unwrap();
        let now = datetime!(2024-03-01 00:00:00 UTC);
        let current = Some(datetime!(2024-02-01 00:00:00 UTC));
        let (_, expires) =
            SubscriptionService::compute_upgrade(SubscriptionTier::Free, current, plan, now)
                .unwrap();
        assert_eq!(expires, Some(datetime!(2024-03-31 00:00:00 UTC)));
    }

    #[test]
    fn lifetime_absorbs_unexpired_pro() {
        let plan = plan_by_id("team_partner").unwrap();
        let now = datetime!(2024-03-01 00:00:00 UTC);
        let current = Some(datetime!(2024-03-11 00:00:00 UTC));
        let (tier, expires) =
            SubscriptionService::compute_upgrade(SubscriptionTier::Pro, current, plan, now)
                .unwrap();
        assert_eq!(tier, SubscriptionTier::Lifetime);
        assert_eq!(expires, None);
    }

    #[test]
    fn pro_on_top_of_lifetime_is_redundant() {
        let plan = plan_by_id("pro_monthly").unwrap();
        let now = datetime!(2024-03-01 00:00:00 UTC);
        let result =
            SubscriptionService::compute_upgrade(SubscriptionTier::Lifetime, None, plan, now);
        assert!(matches!(result, Err(BillingError::RedundantPurchase)));
    }

    #[test]
    fn yearly_plan_adds_a_year() {
        let plan = plan_by_id("pro_yearly").unwrap();
        let now = datetime!(2024-03-01 00:00:00 UTC);
        let (_, expires) =
            SubscriptionService::compute_upgrade(SubscriptionTier::Free, None, plan, now).unwrap();
        assert_eq!(expires, Some(datetime!(2025-03-01 00:00:00 UTC)));
    }
}
