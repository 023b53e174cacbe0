//! Transactional mail dispatch via Resend
//!
//! Mail is best-effort infrastructure: when the provider key is missing
//! (local development) the service logs and reports itself disabled rather
//! than failing every auth flow.

use std::time::Duration;

use crate::auth::otp::OtpPurpose;
use crate::error::{ApiError, ApiResult};

const MAIL_TIMEOUT: Duration = Duration::from_secs(15);
const RESEND_API_BASE: &str = "https://api.resend.com";

#[derive(Clone)]
pub struct MailService {
    api_key: Option<String>,
    from: String,
    http: reqwest::Client,
}

impl MailService {
    pub fn new(api_key: Option<String>, from: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(MAIL_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            from,
            http,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("RESEND_API_KEY").ok(),
            std::env::var("MAIL_FROM").unwrap_or_else(|_| "GaiYa <no-reply@gaiya.app>".to_string()),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Send a verification code. The code itself is never logged.
    pub async fn send_otp_email(
        &self,
        to: &str,
        code: &str,
        purpose: OtpPurpose,
    ) -> ApiResult<()> {
        let Some(api_key) = &self.api_key else {
            tracing::warn!(
                to = to,
                purpose = purpose.as_str(),
                "Mail dispatch skipped (missing RESEND_API_KEY)"
            );
            return Ok(());
        };

        let (subject, lead) = match purpose {
            OtpPurpose::Signup => ("Your GaiYa verification code", "Welcome to GaiYa!"),
            OtpPurpose::PasswordReset => (
                "Your GaiYa password reset code",
                "A password reset was requested for your account.",
            ),
        };

        let body = serde_json::json!({
            "from": self.from,
            "to": [to],
            "subject": subject,
            "html": format!(
                "<p>{lead}</p><p>Your code is <strong>{code}</strong>. \
                 It expires in 10 minutes.</p>\
                 <p>If you did not request this, you can ignore this email.</p>"
            ),
        });

        let resp = self
            .http
            .post(format!("{RESEND_API_BASE}/emails"))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Mail provider unreachable");
                ApiError::GatewayUnavailable
            })?;

        if !resp.status().is_success() {
            tracing::error!(
                status = resp.status().as_u16(),
                to = to,
                "Mail provider rejected the dispatch"
            );
            return Err(ApiError::GatewayUnavailable);
        }

        tracing::info!(to = to, purpose = purpose.as_str(), "Verification email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_api_key() {
        let mail = MailService::new(None, "GaiYa <no-reply@gaiya.app>".to_string());
        assert!(!mail.is_enabled());
    }

    #[tokio::test]
    async fn disabled_service_does_not_fail_dispatch() {
        let mail = MailService::new(None, "GaiYa <no-reply@gaiya.app>".to_string());
        let result = mail
            .send_otp_email("a@b.com", "123456", OtpPurpose::Signup)
            .await;
        assert!(result.is_ok());
    }
}
