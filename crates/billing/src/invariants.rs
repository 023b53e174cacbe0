//! Billing Invariants Module
//!
//! Runnable consistency checks for the entitlement/billing data. Suitable
//! after any webhook replay or manual order surgery.
//!
//! Each invariant is a real query, checks only read, and violations carry
//! enough context to debug.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use gaiya_shared::catalog::{ceiling, Feature, SubscriptionTier};

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// User(s) affected
    pub user_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - entitlements may be wrong
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct DuplicateEmailRow {
    normalized_email: String,
    user_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct QuotaTierRow {
    user_id: Uuid,
    feature: String,
    used: i64,
    tier: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct PaidOrderRow {
    out_trade_no: String,
    user_id: Uuid,
    gateway: String,
    gateway_trade_no: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerOrphanRow {
    gateway: String,
    gateway_trade_no: String,
}

/// Service for running invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return a summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_unique_normalized_emails().await?);
        violations.extend(self.check_quota_within_ceiling().await?);
        violations.extend(self.check_paid_orders_complete().await?);
        violations.extend(self.check_ledger_success_has_paid_order().await?);

        let checks_run = 4;
        let checks_failed = violations
            .iter()
            .map(|v| v.invariant.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// No two users share a normalized email
    async fn check_unique_normalized_emails(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DuplicateEmailRow> = sqlx::query_as(
            r#"
            SELECT LOWER(TRIM(email)) AS normalized_email, COUNT(*) AS user_count
            FROM users
            GROUP BY LOWER(TRIM(email))
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "unique_normalized_email".to_string(),
                user_ids: vec![],
                description: format!(
                    "{} user rows share the normalized email {}",
                    row.user_count, row.normalized_email
                ),
                context: serde_json::json!({ "email": row.normalized_email }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Within a live window, `used` never exceeds the tier's ceiling
    async fn check_quota_within_ceiling(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<QuotaTierRow> = sqlx::query_as(
            r#"
            SELECT q.user_id, q.feature, q.used, s.tier
            FROM quota_usage q
            LEFT JOIN subscriptions s ON s.user_id = q.user_id
            WHERE q.reset_at > NOW()
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut violations = Vec::new();
        for row in rows {
            let tier = row
                .tier
                .as_deref()
                .and_then(SubscriptionTier::from_str)
                .unwrap_or(SubscriptionTier::Free);
            let Some(feature) = Feature::from_str(&row.feature) else {
                violations.push(InvariantViolation {
                    invariant: "quota_within_ceiling".to_string(),
                    user_ids: vec![row.user_id],
                    description: format!("unknown feature {} in quota_usage", row.feature),
                    context: serde_json::json!({ "feature": row.feature }),
                    severity: ViolationSeverity::Medium,
                });
                continue;
            };
            if let Some(limit) = ceiling(tier, feature) {
                if row.used > limit {
                    violations.push(InvariantViolation {
                        invariant: "quota_within_ceiling".to_string(),
                        user_ids: vec![row.user_id],
                        description: format!(
                            "{} used {} of {} ({} tier) for {}",
                            row.user_id, row.used, limit, tier, feature
                        ),
                        context: serde_json::json!({
                            "feature": feature.as_str(),
                            "used": row.used,
                            "ceiling": limit,
                            "tier": tier.as_str(),
                        }),
                        severity: ViolationSeverity::High,
                    });
                }
            }
        }
        Ok(violations)
    }

    /// Paid orders carry a paid_at and a gateway trade number
    async fn check_paid_orders_complete(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PaidOrderRow> = sqlx::query_as(
            r#"
            SELECT out_trade_no, user_id, gateway, gateway_trade_no
            FROM payment_orders
            WHERE state IN ('paid', 'refunded')
              AND (paid_at IS NULL OR gateway_trade_no IS NULL)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_order_complete".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "order {} is settled but missing paid_at or gateway trade number",
                    row.out_trade_no
                ),
                context: serde_json::json!({
                    "out_trade_no": row.out_trade_no,
                    "gateway": row.gateway,
                    "gateway_trade_no": row.gateway_trade_no,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Every successful ledger entry corresponds to a settled order
    async fn check_ledger_success_has_paid_order(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<LedgerOrphanRow> = sqlx::query_as(
            r#"
            SELECT l.gateway, l.gateway_trade_no
            FROM webhook_ledger l
            LEFT JOIN payment_orders o ON o.gateway_trade_no = l.gateway_trade_no
            WHERE l.outcome = 'success'
              AND (o.out_trade_no IS NULL OR o.state NOT IN ('paid', 'refunded'))
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "ledger_success_has_paid_order".to_string(),
                user_ids: vec![],
                description: format!(
                    "ledger records success for {}:{} but no settled order matches",
                    row.gateway, row.gateway_trade_no
                ),
                context: serde_json::json!({
                    "gateway": row.gateway,
                    "gateway_trade_no": row.gateway_trade_no,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }
}
