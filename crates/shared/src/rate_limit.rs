//! Sliding-window rate limiting
//!
//! Keyed by `(endpoint, principal)` where principal is the authenticated
//! user id when known, else the client IP. Two backends behind one API:
//! an in-memory log for tests and single-process deployments, and the
//! `rate_limit_events` table when requests may land on any instance.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use crate::clock::parse_store_timestamp;

/// Per-endpoint request budget
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
}

/// Budgets per endpoint. Unlisted endpoints get the default bucket.
pub fn policy_for(endpoint: &str) -> RateLimitConfig {
    let (max_requests, window_seconds) = match endpoint {
        "auth-signup" => (5, 3600),
        "auth-send-otp" => (3, 60),
        "auth-verify-otp" => (10, 600),
        "auth-signin" => (10, 60),
        "auth-refresh" => (30, 60),
        "auth-reset-password" => (5, 3600),
        "payment-create-order" => (10, 600),
        "quota-use" => (60, 60),
        _ => (60, 60),
    };
    RateLimitConfig {
        max_requests,
        window_seconds,
    }
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    /// When the oldest in-window request falls out of the window
    pub reset_at: Option<OffsetDateTime>,
    pub retry_after_seconds: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit store unavailable: {0}")]
    Store(String),
}

type MemoryLog = Arc<Mutex<HashMap<(String, String), Vec<OffsetDateTime>>>>;

#[derive(Clone)]
enum Backend {
    Memory(MemoryLog),
    Postgres(PgPool),
}

/// Sliding-window limiter
#[derive(Clone)]
pub struct RateLimiter {
    backend: Backend,
}

impl RateLimiter {
    pub fn new_in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    pub fn new_postgres(pool: PgPool) -> Self {
        Self {
            backend: Backend::Postgres(pool),
        }
    }

    /// Check and record a request under the endpoint's configured budget
    pub async fn check(
        &self,
        endpoint: &str,
        principal: &str,
    ) -> Result<RateLimitResult, RateLimitError> {
        self.check_with(endpoint, principal, policy_for(endpoint))
            .await
    }

    /// Check and record a request under an explicit budget
    pub async fn check_with(
        &self,
        endpoint: &str,
        principal: &str,
        config: RateLimitConfig,
    ) -> Result<RateLimitResult, RateLimitError> {
        let now = OffsetDateTime::now_utc();
        let window = Duration::seconds(config.window_seconds as i64);
        match &self.backend {
            Backend::Memory(log) => Ok(check_memory(log, endpoint, principal, config, now, window).await),
            Backend::Postgres(pool) => {
                check_postgres(pool, endpoint, principal, config, now, window).await
            }
        }
    }

    /// Drop windows with no recent activity (memory backend only; the
    /// Postgres log is pruned by the background hygiene task).
    pub async fn cleanup(&self) {
        if let Backend::Memory(log) = &self.backend {
            let horizon = OffsetDateTime::now_utc() - Duration::hours(1);
            let mut log = log.lock().await;
            log.retain(|_, stamps| stamps.iter().any(|t| *t > horizon));
        }
    }
}

fn denied(oldest: OffsetDateTime, window: Duration, now: OffsetDateTime) -> RateLimitResult {
    let reset_at = oldest + window;
    let retry_after = (reset_at - now).whole_seconds().max(1) as u64;
    RateLimitResult {
        allowed: false,
        remaining: 0,
        reset_at: Some(reset_at),
        retry_after_seconds: Some(retry_after),
    }
}

async fn check_memory(
    log: &MemoryLog,
    endpoint: &str,
    principal: &str,
    config: RateLimitConfig,
    now: OffsetDateTime,
    window: Duration,
) -> RateLimitResult {
    let mut log = log.lock().await;
    let stamps = log
        .entry((endpoint.to_string(), principal.to_string()))
        .or_default();
    stamps.retain(|t| *t > now - window);

    if stamps.len() >= config.max_requests as usize {
        // Non-empty: len >= max_requests >= 1
        let oldest = stamps.iter().min().copied().unwrap_or(now);
        return denied(oldest, window, now);
    }

    stamps.push(now);
    RateLimitResult {
        allowed: true,
        remaining: config.max_requests - stamps.len() as u32,
        reset_at: None,
        retry_after_seconds: None,
    }
}

async fn check_postgres(
    pool: &PgPool,
    endpoint: &str,
    principal: &str,
    config: RateLimitConfig,
    now: OffsetDateTime,
    window: Duration,
) -> Result<RateLimitResult, RateLimitError> {
    let window_start = now - window;

    // The oldest timestamp comes back as text; normalize before doing any
    // arithmetic so string and native representations behave identically.
    let row: (i64, Option<String>) = sqlx::query_as(
        r#"
        SELECT COUNT(*), MIN(requested_at)::TEXT
        FROM rate_limit_events
        WHERE endpoint = $1
          AND principal = $2
          AND requested_at > $3
        "#,
    )
    .bind(endpoint)
    .bind(principal)
    .bind(window_start)
    .fetch_one(pool)
    .await
    .map_err(|e| RateLimitError::Store(e.to_string()))?;

    let (count, oldest_raw) = row;

    if count >= i64::from(config.max_requests) {
        let oldest = oldest_raw
            .as_deref()
            .map(parse_store_timestamp)
            .transpose()
            .map_err(|e| RateLimitError::Store(e.to_string()))?
            .unwrap_or(now);
        return Ok(denied(oldest, window, now));
    }

    sqlx::query(
        r#"
        INSERT INTO rate_limit_events (endpoint, principal, requested_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(endpoint)
    .bind(principal)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| RateLimitError::Store(e.to_string()))?;

    Ok(RateLimitResult {
        allowed: true,
        remaining: (i64::from(config.max_requests) - count - 1).max(0) as u32,
        reset_at: None,
        retry_after_seconds: None,
    })
}

/// Delete events older than any window we serve. Called from the hourly
/// hygiene task.
pub async fn prune_events(pool: &PgPool) -> Result<u64, RateLimitError> {
    let horizon = OffsetDateTime::now_utc() - Duration::hours(2);
    let result = sqlx::query("DELETE FROM rate_limit_events WHERE requested_at < $1")
        .bind(horizon)
        .execute(pool)
        .await
        .map_err(|e| RateLimitError::Store(e.to_string()))?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_request_allowed() {
        let limiter = RateLimiter::new_in_memory();
        let result = limiter.check("auth-signin", "1.2.3.4").await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 9);
    }

    #[tokio::test]
    async fn exactly_at_limit_rejected() {
        let limiter = RateLimiter::new_in_memory();
        let config = RateLimitConfig {
            max_requests: 5,
            window_seconds: 60,
        };

        for i in 0..5 {
            let result = limiter.check_with("ep", "k", config).await.unwrap();
            assert!(result.allowed, "request {} should be allowed", i);
        }

        let result = limiter.check_with("ep", "k", config).await.unwrap();
        assert!(!result.allowed, "6th request should be rejected");
        assert!(result.retry_after_seconds.is_some());
        assert!(result.reset_at.is_some());
    }

    #[tokio::test]
    async fn principals_are_isolated() {
        let limiter = RateLimiter::new_in_memory();
        let config = RateLimitConfig {
            max_requests: 2,
            window_seconds: 60,
        };

        for _ in 0..2 {
            limiter.check_with("ep", "a", config).await.unwrap();
        }
        let blocked = limiter.check_with("ep", "a", config).await.unwrap();
        assert!(!blocked.allowed);

        let other = limiter.check_with("ep", "b", config).await.unwrap();
        assert!(other.allowed, "different principal should be unaffected");
    }

    #[tokio::test]
    async fn endpoints_are_isolated() {
        let limiter = RateLimiter::new_in_memory();
        let config = RateLimitConfig {
            max_requests: 1,
            window_seconds: 60,
        };

        limiter.check_with("ep1", "k", config).await.unwrap();
        assert!(!limiter.check_with("ep1", "k", config).await.unwrap().allowed);
        assert!(limiter.check_with("ep2", "k", config).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn concurrent_requests_respect_limit() {
        use tokio::sync::Barrier;

        let limiter = Arc::new(RateLimiter::new_in_memory());
        let config = RateLimitConfig {
            max_requests: 5,
            window_seconds: 60,
        };

        let barrier = Arc::new(Barrier::new(10));
        let mut handles = vec![];
        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                limiter.check_with("ep", "k", config).await.unwrap()
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5, "exactly the budget should be admitted");
    }

    #[tokio::test]
    async fn cleanup_keeps_live_windows() {
        let limiter = RateLimiter::new_in_memory();
        limiter.check("ep", "k").await.unwrap();
        limiter.cleanup().await;
        let result = limiter.check("ep", "k").await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 58);
    }
}
