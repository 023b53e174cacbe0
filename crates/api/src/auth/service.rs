//! Authentication flows
//!
//! Signup, OTP verification, signin, refresh rotation, signout, and the
//! enumeration-safe password reset. Handlers validate shapes; this service
//! owns the semantics and the store traffic.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use gaiya_shared::normalize_email;

use crate::auth::jwt::{JwtManager, TokenType};
use crate::auth::otp::{IssueOutcome, OtpPurpose, OtpStore, PgOtpStore, VerifyOutcome};
use crate::auth::password::{generate_impossible_hash, hash_password, verify_password};
use crate::auth::sessions;
use crate::email::MailService;
use crate::error::{ApiError, ApiResult};
use crate::users::{self, UserProfile};

/// Tokens plus profile snapshot returned by signin
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserProfile,
}

/// New pair returned by refresh
#[derive(Debug, Clone, serde::Serialize)]
pub struct RotatedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct AuthService {
    pool: PgPool,
    jwt: JwtManager,
    otp: PgOtpStore,
    mailer: MailService,
    /// Verified against when the user does not exist, keeping the miss
    /// path as expensive as a real signin.
    impossible_hash: String,
}

impl AuthService {
    pub fn new(pool: PgPool, jwt: JwtManager, mailer: MailService) -> Self {
        let otp = PgOtpStore::new(pool.clone());
        Self {
            pool,
            jwt,
            otp,
            mailer,
            impossible_hash: generate_impossible_hash(),
        }
    }

    /// Create an unverified account and issue a signup OTP. Re-signup of an
    /// unverified account just re-issues the code.
    pub async fn signup(
        &self,
        email_raw: &str,
        password: &str,
        display_handle: Option<&str>,
    ) -> ApiResult<()> {
        let email = normalize_email(email_raw);

        match users::find_user_by_email(&self.pool, &email).await? {
            Some(user) if user.verified => return Err(ApiError::AlreadyExists),
            Some(_) => {
                tracing::info!(email = %email, "Signup for unverified account, re-issuing OTP");
            }
            None => {
                let password_hash = hash_password(password)?;
                users::insert_user(&self.pool, &email, &password_hash, display_handle).await?;
                tracing::info!(email = %email, "User created, pending verification");
            }
        }

        self.issue_and_send(&email, OtpPurpose::Signup).await?;
        Ok(())
    }

    /// Issue and dispatch a code; returns its lifetime in seconds
    pub async fn send_otp(&self, email_raw: &str, purpose: OtpPurpose) -> ApiResult<i64> {
        let email = normalize_email(email_raw);
        self.issue_and_send(&email, purpose).await
    }

    /// Verify the latest live code for the email. A signup code marks the
    /// account verified as part of the same call.
    pub async fn verify_otp(&self, email_raw: &str, code: &str) -> ApiResult<OtpPurpose> {
        let email = normalize_email(email_raw);
        let now = OffsetDateTime::now_utc();

        match self.otp.verify(&email, code, now).await? {
            VerifyOutcome::Verified { purpose } => {
                if purpose == OtpPurpose::Signup {
                    users::mark_verified(&self.pool, &email).await?;
                    tracing::info!(email = %email, "Email verified via signup OTP");
                }
                Ok(purpose)
            }
            VerifyOutcome::Mismatch { attempts_left } => {
                Err(ApiError::OtpInvalid { attempts_left })
            }
            VerifyOutcome::Exhausted => Err(ApiError::OtpExhausted),
            VerifyOutcome::Missing => Err(ApiError::OtpExpired),
        }
    }

    pub async fn signin(&self, email_raw: &str, password: &str) -> ApiResult<SessionTokens> {
        let email = normalize_email(email_raw);
        let user = users::find_user_by_email(&self.pool, &email).await?;

        let Some(user) = user else {
            // Burn the same work as a real verification
            verify_password(password, &self.impossible_hash);
            return Err(ApiError::InvalidCredentials);
        };

        if !verify_password(password, &user.password_hash) {
            return Err(ApiError::InvalidCredentials);
        }
        if user.deactivated_at.is_some() {
            return Err(ApiError::InvalidCredentials);
        }
        if !user.verified {
            return Err(ApiError::EmailUnverified);
        }

        let pair = self.jwt.issue_pair(user.id)?;
        let chain_id = Uuid::new_v4();
        sessions::save_session(&self.pool, user.id, chain_id, &pair).await?;

        tracing::info!(user_id = %user.id, "User signed in");

        Ok(SessionTokens {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            user: UserProfile::from(&user),
        })
    }

    /// Rotate a refresh token. Replay of an already-rotated token revokes
    /// the entire session chain.
    pub async fn refresh(&self, refresh_token: &str) -> ApiResult<RotatedTokens> {
        let claims = self.jwt.verify(refresh_token, TokenType::Refresh)?;

        if sessions::claim_rotation(&self.pool, &claims.jti, claims.sub).await? {
            let chain_id = sessions::chain_of(&self.pool, &claims.jti)
                .await?
                .unwrap_or_else(Uuid::new_v4);
            let pair = self.jwt.issue_pair(claims.sub)?;
            sessions::save_session(&self.pool, claims.sub, chain_id, &pair).await?;

            return Ok(RotatedTokens {
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            });
        }

        // Lost the claim: the token was already rotated or revoked. Treat
        // it as replay and take the chain down.
        if let Some(chain_id) = sessions::chain_of(&self.pool, &claims.jti).await? {
            sessions::revoke_chain(&self.pool, chain_id, "refresh_token_replay").await?;
        }
        Err(ApiError::SessionRevoked)
    }

    /// Revoke the session behind an access token. Idempotent: a second
    /// signout of the same token is still a success.
    pub async fn signout(&self, access_token: &str) -> ApiResult<()> {
        let claims = self.jwt.verify(access_token, TokenType::Access)?;

        sessions::revoke_session(&self.pool, &claims.jti, "signout").await?;
        if let Some(chain_id) = sessions::chain_of(&self.pool, &claims.jti).await? {
            sessions::revoke_chain(&self.pool, chain_id, "signout").await?;
        }

        tracing::info!(user_id = %claims.sub, "User signed out");
        Ok(())
    }

    /// Always succeeds so responses cannot be used to enumerate accounts.
    pub async fn request_password_reset(&self, email_raw: &str) -> ApiResult<()> {
        let email = normalize_email(email_raw);

        match users::find_user_by_email(&self.pool, &email).await {
            Ok(Some(_)) => {
                if let Err(e) = self.issue_and_send(&email, OtpPurpose::PasswordReset).await {
                    tracing::warn!(error = %e, "Password reset OTP not dispatched");
                }
            }
            Ok(None) => {
                tracing::info!("Password reset requested for unknown email");
            }
            Err(e) => {
                tracing::error!(error = %e, "Password reset lookup failed");
            }
        }
        Ok(())
    }

    /// Commit a password reset with a valid `password_reset` code. All
    /// sessions are revoked on success.
    pub async fn reset_password(
        &self,
        email_raw: &str,
        code: &str,
        new_password: &str,
    ) -> ApiResult<()> {
        let email = normalize_email(email_raw);
        let now = OffsetDateTime::now_utc();

        match self.otp.verify(&email, code, now).await? {
            VerifyOutcome::Verified {
                purpose: OtpPurpose::PasswordReset,
            } => {}
            VerifyOutcome::Verified { .. } => {
                return Err(ApiError::InvalidArgument { field: "otp_code" })
            }
            VerifyOutcome::Mismatch { attempts_left } => {
                return Err(ApiError::OtpInvalid { attempts_left })
            }
            VerifyOutcome::Exhausted => return Err(ApiError::OtpExhausted),
            VerifyOutcome::Missing => return Err(ApiError::OtpExpired),
        }

        let user = users::find_user_by_email(&self.pool, &email)
            .await?
            .ok_or(ApiError::NotFound("user"))?;

        let password_hash = hash_password(new_password)?;
        users::update_password(&self.pool, user.id, &password_hash).await?;
        sessions::revoke_all_sessions(&self.pool, user.id, "password_reset").await?;

        tracing::info!(user_id = %user.id, "Password reset committed, sessions revoked");
        Ok(())
    }

    pub async fn check_verification_by_email(&self, email_raw: &str) -> ApiResult<bool> {
        let email = normalize_email(email_raw);
        let user = users::find_user_by_email(&self.pool, &email)
            .await?
            .ok_or(ApiError::NotFound("user"))?;
        Ok(user.verified)
    }

    pub async fn check_verification_by_id(&self, user_id: Uuid) -> ApiResult<bool> {
        let user = users::find_user_by_id(&self.pool, user_id)
            .await?
            .ok_or(ApiError::NotFound("user"))?;
        Ok(user.verified)
    }

    async fn issue_and_send(&self, email: &str, purpose: OtpPurpose) -> ApiResult<i64> {
        let now = OffsetDateTime::now_utc();
        match self.otp.issue(email, purpose, now).await? {
            IssueOutcome::Issued {
                code,
                expires_in_seconds,
            } => {
                self.mailer.send_otp_email(email, &code, purpose).await?;
                Ok(expires_in_seconds)
            }
            IssueOutcome::Cooldown {
                retry_after_seconds,
            } => Err(ApiError::RateLimited {
                retry_after_seconds: retry_after_seconds.max(1) as u64,
            }),
            IssueOutcome::DailyCapReached => Err(ApiError::RateLimited {
                retry_after_seconds: 3600,
            }),
        }
    }
}
