//! One-time verification codes
//!
//! Codes are six digits, hashed at rest, bound to an email and a purpose,
//! and live ten minutes with a five-attempt budget. State machine:
//! `issued → (verified | exhausted | expired)`, all terminal states
//! absorbing; issuing a new code moves the prior row to `superseded`.
//!
//! The persistent store is authoritative. The in-memory variant exists
//! only as a test fake behind the same trait.

use sha2::{Digest, Sha256};
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::ApiResult;

pub const OTP_TTL: Duration = Duration::minutes(10);
pub const OTP_MAX_ATTEMPTS: i32 = 5;
pub const OTP_SEND_COOLDOWN: Duration = Duration::seconds(60);
pub const OTP_DAILY_SEND_CAP: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    Signup,
    PasswordReset,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Signup => "signup",
            OtpPurpose::PasswordReset => "password_reset",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "signup" => Some(OtpPurpose::Signup),
            "password_reset" => Some(OtpPurpose::PasswordReset),
            _ => None,
        }
    }
}

/// One OTP row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OtpRecord {
    pub id: Uuid,
    pub email: String,
    pub purpose: String,
    pub code_hash: String,
    pub attempts: i32,
    pub expires_at: OffsetDateTime,
    pub consumed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Outcome of issuing a code
#[derive(Debug, Clone)]
pub enum IssueOutcome {
    Issued {
        /// Plaintext code, handed to the mailer and then dropped
        code: String,
        expires_in_seconds: i64,
    },
    Cooldown {
        retry_after_seconds: i64,
    },
    DailyCapReached,
}

/// Outcome of a verification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified { purpose: OtpPurpose },
    Mismatch { attempts_left: i32 },
    Exhausted,
    /// No live code: never issued, expired, superseded, or already consumed
    Missing,
}

/// Codes are stored hashed; the hash binds the code to its email so a leak
/// of one table row cannot be replayed against another account.
pub fn hash_code(email: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update(b":");
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn generate_code() -> String {
    let n: u32 = rand::Rng::random_range(&mut rand::rng(), 0..1_000_000);
    format!("{n:06}")
}

/// The pure verification step shared by both store implementations
fn evaluate(record: &OtpRecord, email: &str, code: &str, now: OffsetDateTime) -> VerifyOutcome {
    if record.consumed_at.is_some() || record.expires_at <= now {
        return VerifyOutcome::Missing;
    }
    if record.attempts >= OTP_MAX_ATTEMPTS {
        return VerifyOutcome::Exhausted;
    }
    let expected = hash_code(email, code);
    if bool::from(expected.as_bytes().ct_eq(record.code_hash.as_bytes())) {
        let purpose = match OtpPurpose::from_str(&record.purpose) {
            Some(purpose) => purpose,
            None => return VerifyOutcome::Missing,
        };
        VerifyOutcome::Verified { purpose }
    } else {
        VerifyOutcome::Mismatch {
            attempts_left: OTP_MAX_ATTEMPTS - record.attempts - 1,
        }
    }
}

/// Store interface for OTP rows
pub trait OtpStore {
    fn issue(
        &self,
        email: &str,
        purpose: OtpPurpose,
        now: OffsetDateTime,
    ) -> impl std::future::Future<Output = ApiResult<IssueOutcome>> + Send;

    fn verify(
        &self,
        email: &str,
        code: &str,
        now: OffsetDateTime,
    ) -> impl std::future::Future<Output = ApiResult<VerifyOutcome>> + Send;
}

/// Authoritative store backed by the `otp_codes` table
#[derive(Clone)]
pub struct PgOtpStore {
    pool: PgPool,
}

impl PgOtpStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn latest_live(&self, email: &str) -> ApiResult<Option<OtpRecord>> {
        let record = sqlx::query_as(
            r#"
            SELECT id, email, purpose, code_hash, attempts, expires_at, consumed_at, created_at
            FROM otp_codes
            WHERE email = $1
              AND superseded = FALSE
              AND consumed_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }
}

impl OtpStore for PgOtpStore {
    async fn issue(
        &self,
        email: &str,
        purpose: OtpPurpose,
        now: OffsetDateTime,
    ) -> ApiResult<IssueOutcome> {
        let last_sent: Option<(OffsetDateTime,)> = sqlx::query_as(
            r#"
            SELECT created_at FROM otp_codes
            WHERE email = $1 AND purpose = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(email)
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some((created_at,)) = last_sent {
            let elapsed = now - created_at;
            if elapsed < OTP_SEND_COOLDOWN {
                return Ok(IssueOutcome::Cooldown {
                    retry_after_seconds: (OTP_SEND_COOLDOWN - elapsed).whole_seconds().max(1),
                });
            }
        }

        let sent_today: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM otp_codes
            WHERE email = $1 AND created_at > $2
            "#,
        )
        .bind(email)
        .bind(now - Duration::hours(24))
        .fetch_one(&self.pool)
        .await?;

        if sent_today.0 >= OTP_DAILY_SEND_CAP {
            tracing::warn!(email = email, "OTP daily send cap reached");
            return Ok(IssueOutcome::DailyCapReached);
        }

        let code = generate_code();
        let code_hash = hash_code(email, &code);
        let expires_at = now + OTP_TTL;

        let mut tx = self.pool.begin().await?;

        // The newer code supersedes any live one for the same purpose
        sqlx::query(
            r#"
            UPDATE otp_codes
            SET superseded = TRUE
            WHERE email = $1
              AND purpose = $2
              AND superseded = FALSE
              AND consumed_at IS NULL
            "#,
        )
        .bind(email)
        .bind(purpose.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO otp_codes
                (id, email, purpose, code_hash, attempts, expires_at, superseded, created_at)
            VALUES ($1, $2, $3, $4, 0, $5, FALSE, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(purpose.as_str())
        .bind(&code_hash)
        .bind(expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(IssueOutcome::Issued {
            code,
            expires_in_seconds: OTP_TTL.whole_seconds(),
        })
    }

    async fn verify(
        &self,
        email: &str,
        code: &str,
        now: OffsetDateTime,
    ) -> ApiResult<VerifyOutcome> {
        let Some(record) = self.latest_live(email).await? else {
            return Ok(VerifyOutcome::Missing);
        };

        match evaluate(&record, email, code, now) {
            VerifyOutcome::Verified { purpose } => {
                // Consume-at-most-once: the conditional update decides the
                // winner between concurrent verifications.
                let rows_affected = sqlx::query(
                    r#"
                    UPDATE otp_codes
                    SET consumed_at = $2
                    WHERE id = $1
                      AND consumed_at IS NULL
                    "#,
                )
                .bind(record.id)
                .bind(now)
                .execute(&self.pool)
                .await?
                .rows_affected();

                if rows_affected > 0 {
                    Ok(VerifyOutcome::Verified { purpose })
                } else {
                    Ok(VerifyOutcome::Missing)
                }
            }
            outcome @ VerifyOutcome::Mismatch { .. } => {
                sqlx::query(
                    r#"
                    UPDATE otp_codes
                    SET attempts = attempts + 1
                    WHERE id = $1
                    "#,
                )
                .bind(record.id)
                .execute(&self.pool)
                .await?;
                Ok(outcome)
            }
            outcome => Ok(outcome),
        }
    }
}

/// Test-only fake with identical semantics
#[cfg(test)]
pub mod memory {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    pub struct MemoryOtpStore {
        rows: Arc<Mutex<Vec<(OtpRecord, bool)>>>, // (record, superseded)
    }

    impl MemoryOtpStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl OtpStore for MemoryOtpStore {
        async fn issue(
            &self,
            email: &str,
            purpose: OtpPurpose,
            now: OffsetDateTime,
        ) -> ApiResult<IssueOutcome> {
            let mut rows = self.rows.lock().await;

            let last_sent = rows
                .iter()
                .filter(|(r, _)| r.email == email && r.purpose == purpose.as_str())
                .map(|(r, _)| r.created_at)
                .max();
            if let Some(created_at) = last_sent {
                let elapsed = now - created_at;
                if elapsed < OTP_SEND_COOLDOWN {
                    return Ok(IssueOutcome::Cooldown {
                        retry_after_seconds: (OTP_SEND_COOLDOWN - elapsed).whole_seconds().max(1),
                    });
                }
            }

            let sent_today = rows
                .iter()
                .filter(|(r, _)| r.email == email && r.created_at > now - Duration::hours(24))
                .count() as i64;
            if sent_today >= OTP_DAILY_SEND_CAP {
                return Ok(IssueOutcome::DailyCapReached);
            }

            for (record, superseded) in rows.iter_mut() {
                if record.email == email
                    && record.purpose == purpose.as_str()
                    && record.consumed_at.is_none()
                {
                    *superseded = true;
                }
            }

            let code = generate_code();
            rows.push((
                OtpRecord {
                    id: Uuid::new_v4(),
                    email: email.to_string(),
                    purpose: purpose.as_str().to_string(),
                    code_hash: hash_code(email, &code),
                    attempts: 0,
                    expires_at: now + OTP_TTL,
                    consumed_at: None,
                    created_at: now,
                },
                false,
            ));

            Ok(IssueOutcome::Issued {
                code,
                expires_in_seconds: OTP_TTL.whole_seconds(),
            })
        }

        async fn verify(
            &self,
            email: &str,
            code: &str,
            now: OffsetDateTime,
        ) -> ApiResult<VerifyOutcome> {
            let mut rows = self.rows.lock().await;

            let Some(index) = rows
                .iter()
                .enumerate()
                .filter(|(_, (r, superseded))| {
                    r.email == email && !*superseded && r.consumed_at.is_none()
                })
                .max_by_key(|(_, (r, _))| r.created_at)
                .map(|(i, _)| i)
            else {
                return Ok(VerifyOutcome::Missing);
            };

            let outcome = evaluate(&rows[index].0, email, code, now);
            match outcome {
                VerifyOutcome::Verified { .. } => rows[index].0.consumed_at = Some(now),
                VerifyOutcome::Mismatch { .. } => rows[index].0.attempts += 1,
                _ => {}
            }
            Ok(outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryOtpStore;
    use super::*;
    use time::macros::datetime;

    const EMAIL: &str = "a@b.com";
    const T0: OffsetDateTime = datetime!(2024-03-01 12:00:00 UTC);

    async fn issued_code(store: &MemoryOtpStore, purpose: OtpPurpose, now: OffsetDateTime) -> String {
        match store.issue(EMAIL, purpose, now).await.unwrap() {
            IssueOutcome::Issued { code, .. } => code,
            other => panic!("expected issued, got {other:?}"),
        }
    }

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..32 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn hash_binds_email_and_code() {
        assert_ne!(hash_code("a@b.com", "123456"), hash_code("x@y.com", "123456"));
        assert_ne!(hash_code("a@b.com", "123456"), hash_code("a@b.com", "654321"));
    }

    #[tokio::test]
    async fn issue_then_verify() {
        let store = MemoryOtpStore::new();
        let code = issued_code(&store, OtpPurpose::Signup, T0).await;

        let outcome = store.verify(EMAIL, &code, T0 + Duration::minutes(1)).await.unwrap();
        assert_eq!(
            outcome,
            VerifyOutcome::Verified {
                purpose: OtpPurpose::Signup
            }
        );
    }

    #[tokio::test]
    async fn consumed_code_cannot_be_replayed() {
        let store = MemoryOtpStore::new();
        let code = issued_code(&store, OtpPurpose::Signup, T0).await;

        store.verify(EMAIL, &code, T0).await.unwrap();
        let replay = store.verify(EMAIL, &code, T0).await.unwrap();
        assert_eq!(replay, VerifyOutcome::Missing);
    }

    #[tokio::test]
    async fn expired_code_is_missing() {
        let store = MemoryOtpStore::new();
        let code = issued_code(&store, OtpPurpose::Signup, T0).await;

        let outcome = store
            .verify(EMAIL, &code, T0 + OTP_TTL + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(outcome, VerifyOutcome::Missing);
    }

    #[tokio::test]
    async fn five_wrong_codes_exhaust_the_budget() {
        let store = MemoryOtpStore::new();
        let code = issued_code(&store, OtpPurpose::Signup, T0).await;
        let wrong = if code == "000000" { "000001" } else { "000000" };

        for i in 0..OTP_MAX_ATTEMPTS {
            let outcome = store.verify(EMAIL, wrong, T0).await.unwrap();
            assert_eq!(
                outcome,
                VerifyOutcome::Mismatch {
                    attempts_left: OTP_MAX_ATTEMPTS - i - 1
                }
            );
        }

        // Budget burned: even the right code is refused now
        assert_eq!(store.verify(EMAIL, &code, T0).await.unwrap(), VerifyOutcome::Exhausted);
        assert_eq!(store.verify(EMAIL, wrong, T0).await.unwrap(), VerifyOutcome::Exhausted);
    }

    #[tokio::test]
    async fn newer_code_supersedes_older() {
        let store = MemoryOtpStore::new();
        let first = issued_code(&store, OtpPurpose::Signup, T0).await;
        let second = issued_code(&store, OtpPurpose::Signup, T0 + Duration::minutes(2)).await;

        let now = T0 + Duration::minutes(3);
        if first != second {
            assert_eq!(store.verify(EMAIL, &first, now).await.unwrap(), VerifyOutcome::Missing);
        }
        assert_eq!(
            store.verify(EMAIL, &second, now).await.unwrap(),
            VerifyOutcome::Verified {
                purpose: OtpPurpose::Signup
            }
        );
    }

    #[tokio::test]
    async fn resend_within_cooldown_is_refused() {
        let store = MemoryOtpStore::new();
        issued_code(&store, OtpPurpose::Signup, T0).await;

        let outcome = store
            .issue(EMAIL, OtpPurpose::Signup, T0 + Duration::seconds(30))
            .await
            .unwrap();
        assert!(matches!(outcome, IssueOutcome::Cooldown { retry_after_seconds } if retry_after_seconds <= 30));
    }

    #[tokio::test]
    async fn daily_cap_is_enforced() {
        let store = MemoryOtpStore::new();
        for i in 0..OTP_DAILY_SEND_CAP {
            let now = T0 + Duration::minutes(2 * i);
            assert!(matches!(
                store.issue(EMAIL, OtpPurpose::Signup, now).await.unwrap(),
                IssueOutcome::Issued { .. }
            ));
        }

        let outcome = store
            .issue(EMAIL, OtpPurpose::Signup, T0 + Duration::hours(1))
            .await
            .unwrap();
        assert!(matches!(outcome, IssueOutcome::DailyCapReached));
    }

    #[tokio::test]
    async fn purposes_do_not_share_cooldown() {
        let store = MemoryOtpStore::new();
        issued_code(&store, OtpPurpose::Signup, T0).await;
        let outcome = store
            .issue(EMAIL, OtpPurpose::PasswordReset, T0 + Duration::seconds(5))
            .await
            .unwrap();
        assert!(matches!(outcome, IssueOutcome::Issued { .. }));
    }
}
