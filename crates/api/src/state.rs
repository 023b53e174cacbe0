//! Application state
//!
//! Every collaborator is constructed exactly once at cold start and passed
//! explicitly; handlers receive the state, never reach for globals.

use std::sync::Arc;

use sqlx::PgPool;

use gaiya_billing::BillingService;
use gaiya_shared::RateLimiter;

use crate::auth::{AuthService, JwtManager};
use crate::config::Config;
use crate::cors::OriginGuard;
use crate::email::MailService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub auth: AuthService,
    pub billing: Arc<BillingService>,
    pub rate_limiter: RateLimiter,
    pub origin_guard: OriginGuard,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret);

        let mailer = MailService::new(config.resend_api_key.clone(), config.mail_from.clone());
        if mailer.is_enabled() {
            tracing::info!("Mail dispatch enabled");
        } else {
            tracing::warn!("Mail dispatch not configured (missing RESEND_API_KEY)");
        }

        let auth = AuthService::new(pool.clone(), jwt_manager, mailer);

        let billing = Arc::new(BillingService::new(config.billing_config(), pool.clone()));
        tracing::info!("Billing service initialized");

        let rate_limiter = RateLimiter::new_postgres(pool.clone());
        tracing::info!("Rate limiter initialized");

        let origin_guard = OriginGuard::new(&config.environment, config.canonical_origin.clone());

        Self {
            pool,
            config,
            auth,
            billing,
            rate_limiter,
            origin_guard,
        }
    }
}
