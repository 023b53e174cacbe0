//! Authentication endpoints

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use gaiya_shared::{is_email, is_otp_code, is_strong_password, is_uuid, normalize_email};

use crate::auth::otp::OtpPurpose;
use crate::error::{ok, ApiError, ApiResult};
use crate::routes::{enforce_rate_limit, extract_client_ip, AppJson};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub handle: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PendingVerificationResponse {
    pub pending_verification: bool,
}

pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(body): AppJson<SignupRequest>,
) -> ApiResult<impl IntoResponse> {
    enforce_rate_limit(&state, "auth-signup", &extract_client_ip(&headers)).await?;

    if !is_email(&body.email) {
        return Err(ApiError::InvalidArgument { field: "email" });
    }
    if !is_strong_password(&body.password) {
        return Err(ApiError::InvalidArgument { field: "password" });
    }

    state
        .auth
        .signup(&body.email, &body.password, body.handle.as_deref())
        .await?;

    Ok(ok(PendingVerificationResponse {
        pending_verification: true,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SendOtpRequest {
    pub email: String,
    pub purpose: String,
}

#[derive(Debug, Serialize)]
pub struct SendOtpResponse {
    pub expires_in: i64,
}

pub async fn send_otp(
    State(state): State<AppState>,
    AppJson(body): AppJson<SendOtpRequest>,
) -> ApiResult<impl IntoResponse> {
    // Keyed by email: the cooldown must follow the account, not the client
    enforce_rate_limit(&state, "auth-send-otp", &normalize_email(&body.email)).await?;

    if !is_email(&body.email) {
        return Err(ApiError::InvalidArgument { field: "email" });
    }
    let purpose = OtpPurpose::from_str(&body.purpose)
        .ok_or(ApiError::InvalidArgument { field: "purpose" })?;

    let expires_in = state.auth.send_otp(&body.email, purpose).await?;
    Ok(ok(SendOtpResponse { expires_in }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp_code: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyOtpResponse {
    pub purpose: OtpPurpose,
}

pub async fn verify_otp(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(body): AppJson<VerifyOtpRequest>,
) -> ApiResult<impl IntoResponse> {
    enforce_rate_limit(&state, "auth-verify-otp", &extract_client_ip(&headers)).await?;

    if !is_email(&body.email) {
        return Err(ApiError::InvalidArgument { field: "email" });
    }
    if !is_otp_code(&body.otp_code) {
        return Err(ApiError::InvalidArgument { field: "otp_code" });
    }

    let purpose = state.auth.verify_otp(&body.email, &body.otp_code).await?;
    Ok(ok(VerifyOtpResponse { purpose }))
}

#[derive(Debug, Deserialize)]
pub struct SigninRequest {
    pub email: String,
    pub password: String,
}

pub async fn signin(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(body): AppJson<SigninRequest>,
) -> ApiResult<impl IntoResponse> {
    enforce_rate_limit(&state, "auth-signin", &extract_client_ip(&headers)).await?;

    if !is_email(&body.email) {
        return Err(ApiError::InvalidArgument { field: "email" });
    }

    let tokens = state.auth.signin(&body.email, &body.password).await?;
    Ok(ok(tokens))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(body): AppJson<RefreshRequest>,
) -> ApiResult<impl IntoResponse> {
    enforce_rate_limit(&state, "auth-refresh", &extract_client_ip(&headers)).await?;

    if body.refresh_token.is_empty() {
        return Err(ApiError::InvalidArgument {
            field: "refresh_token",
        });
    }

    let tokens = state.auth.refresh(&body.refresh_token).await?;
    Ok(ok(tokens))
}

pub async fn signout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    enforce_rate_limit(&state, "auth-signout", &extract_client_ip(&headers)).await?;

    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    state.auth.signout(token).await?;
    Ok(ok(serde_json::json!({})))
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    /// Present together with `new_password` to commit the reset
    pub otp_code: Option<String>,
    pub new_password: Option<String>,
}

pub async fn reset_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(body): AppJson<ResetPasswordRequest>,
) -> ApiResult<impl IntoResponse> {
    enforce_rate_limit(&state, "auth-reset-password", &extract_client_ip(&headers)).await?;

    if !is_email(&body.email) {
        return Err(ApiError::InvalidArgument { field: "email" });
    }

    match (&body.otp_code, &body.new_password) {
        (Some(code), Some(new_password)) => {
            if !is_otp_code(code) {
                return Err(ApiError::InvalidArgument { field: "otp_code" });
            }
            if !is_strong_password(new_password) {
                return Err(ApiError::InvalidArgument {
                    field: "new_password",
                });
            }
            state
                .auth
                .reset_password(&body.email, code, new_password)
                .await?;
        }
        (None, None) => {
            // Request step: always succeeds to avoid account enumeration
            state.auth.request_password_reset(&body.email).await?;
        }
        _ => {
            return Err(ApiError::InvalidArgument {
                field: "new_password",
            })
        }
    }

    Ok(ok(serde_json::json!({})))
}

#[derive(Debug, Deserialize)]
pub struct CheckVerificationRequest {
    pub user_id: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckVerificationResponse {
    pub verified: bool,
}

pub async fn check_verification(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(body): AppJson<CheckVerificationRequest>,
) -> ApiResult<impl IntoResponse> {
    enforce_rate_limit(&state, "auth-check-verification", &extract_client_ip(&headers)).await?;
    let verified = match (&body.user_id, &body.email) {
        (Some(user_id), _) => {
            if !is_uuid(user_id) {
                return Err(ApiError::InvalidArgument { field: "user_id" });
            }
            let id = uuid::Uuid::parse_str(user_id)
                .map_err(|_| ApiError::InvalidArgument { field: "user_id" })?;
            state.auth.check_verification_by_id(id).await?
        }
        (None, Some(email)) => {
            if !is_email(email) {
                return Err(ApiError::InvalidArgument { field: "email" });
            }
            state.auth.check_verification_by_email(email).await?
        }
        (None, None) => return Err(ApiError::InvalidArgument { field: "user_id" }),
    };

    Ok(ok(CheckVerificationResponse { verified }))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}
