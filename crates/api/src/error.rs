//! API error taxonomy and wire envelope
//!
//! Every non-callback response is `{"success": bool, …}`. Errors add a
//! human message and a machine `error_code`; store and gateway internals
//! never leak into either.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use gaiya_billing::BillingError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request body is not valid JSON")]
    InvalidJson,

    #[error("invalid {field}")]
    InvalidArgument { field: &'static str },

    #[error("{0}")]
    Unauthorized(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("email address is not verified")]
    EmailUnverified,

    #[error("session has been revoked")]
    SessionRevoked,

    #[error("quota exceeded for {feature}")]
    QuotaExceeded {
        feature: String,
        reset_at: OffsetDateTime,
    },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("an account with this email already exists")]
    AlreadyExists,

    #[error("verification code is incorrect")]
    OtpInvalid { attempts_left: i32 },

    #[error("verification code has expired")]
    OtpExpired,

    #[error("too many incorrect attempts, request a new code")]
    OtpExhausted,

    #[error("this purchase would not change the current entitlement")]
    RedundantPurchase,

    #[error("too many requests")]
    RateLimited { retry_after_seconds: u64 },

    #[error("storage backend unavailable")]
    StoreUnavailable,

    #[error("payment gateway unavailable")]
    GatewayUnavailable,

    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidJson
            | ApiError::InvalidArgument { .. }
            | ApiError::OtpInvalid { .. }
            | ApiError::OtpExpired
            | ApiError::OtpExhausted => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_)
            | ApiError::InvalidCredentials
            | ApiError::EmailUnverified
            | ApiError::SessionRevoked => StatusCode::UNAUTHORIZED,
            ApiError::QuotaExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::AlreadyExists | ApiError::RedundantPurchase => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::GatewayUnavailable => StatusCode::BAD_GATEWAY,
            ApiError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::InvalidJson => "invalid_json",
            ApiError::InvalidArgument { .. } => "invalid_argument",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::InvalidCredentials => "invalid_credentials",
            ApiError::EmailUnverified => "email_unverified",
            ApiError::SessionRevoked => "session_revoked",
            ApiError::QuotaExceeded { .. } => "quota_exceeded",
            ApiError::NotFound(_) => "not_found",
            ApiError::AlreadyExists => "already_exists",
            ApiError::OtpInvalid { .. } => "otp_invalid",
            ApiError::OtpExpired => "otp_expired",
            ApiError::OtpExhausted => "otp_exhausted",
            ApiError::RedundantPurchase => "redundant_purchase",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::StoreUnavailable => "store_unavailable",
            ApiError::GatewayUnavailable => "gateway_unavailable",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Internal detail goes to the log, never to the client
        if let ApiError::Internal(detail) = &self {
            tracing::error!(detail = %detail, "Internal error surfaced to handler");
        }

        let mut body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
        });

        match &self {
            ApiError::QuotaExceeded { reset_at, .. } => {
                if let Ok(formatted) = reset_at.format(&Rfc3339) {
                    body["reset_at"] = serde_json::Value::String(formatted);
                }
            }
            ApiError::OtpInvalid { attempts_left } => {
                body["attempts_left"] = serde_json::Value::from(*attempts_left);
            }
            ApiError::RateLimited {
                retry_after_seconds,
            } => {
                body["retry_after"] = serde_json::Value::from(*retry_after_seconds);
            }
            _ => {}
        }

        let mut response = (self.status(), Json(body)).into_response();
        if let ApiError::RateLimited {
            retry_after_seconds,
        } = self
        {
            if let Ok(value) = retry_after_seconds.to_string().parse() {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db) = e.as_database_error() {
            if db.code().as_deref() == Some("23505") {
                return ApiError::AlreadyExists;
            }
        }
        tracing::error!(error = %e, "Store operation failed");
        ApiError::StoreUnavailable
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::Database(detail) => {
                tracing::error!(detail = %detail, "Billing store operation failed");
                ApiError::StoreUnavailable
            }
            BillingError::PlanUnknown(_) => ApiError::InvalidArgument { field: "plan_type" },
            BillingError::OrderNotFound(_) => ApiError::NotFound("order"),
            BillingError::SignatureInvalid => {
                ApiError::Unauthorized("invalid callback signature".to_string())
            }
            BillingError::AmountMismatch { .. } => {
                ApiError::Unauthorized("callback amount mismatch".to_string())
            }
            BillingError::QuotaExceeded { feature, reset_at } => ApiError::QuotaExceeded {
                feature: feature.as_str().to_string(),
                reset_at,
            },
            BillingError::RedundantPurchase => ApiError::RedundantPurchase,
            BillingError::GatewayUnavailable(detail) | BillingError::GatewayRejected(detail) => {
                tracing::error!(detail = %detail, "Gateway call failed");
                ApiError::GatewayUnavailable
            }
            BillingError::OrderNotFulfillable { out_trade_no, state } => ApiError::Internal(
                format!("order {out_trade_no} not fulfillable from state {state}"),
            ),
            BillingError::Internal(detail) => ApiError::Internal(detail),
        }
    }
}

/// Success envelope: `{"success": true, …fields of T}`
#[derive(Debug, Serialize)]
pub struct Success<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

/// Wrap a response payload in the success envelope
pub fn ok<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success {
        success: true,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_table_matches_taxonomy() {
        assert_eq!(ApiError::InvalidJson.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::InvalidCredentials.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::QuotaExceeded {
                feature: "chat".to_string(),
                reset_at: OffsetDateTime::UNIX_EPOCH,
            }
            .status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(ApiError::NotFound("order").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::AlreadyExists.status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::RateLimited {
                retry_after_seconds: 30
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::StoreUnavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::GatewayUnavailable.status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::OtpExhausted.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn internal_detail_never_reaches_the_message() {
        let error = ApiError::Internal("connection string leaked".to_string());
        assert_eq!(error.to_string(), "internal error");
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(ApiError::InvalidJson.error_code(), "invalid_json");
        assert_eq!(ApiError::SessionRevoked.error_code(), "session_revoked");
        assert_eq!(
            ApiError::InvalidArgument { field: "email" }.error_code(),
            "invalid_argument"
        );
    }
}
