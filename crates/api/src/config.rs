//! Environment-driven configuration
//!
//! Loaded once at cold start; credentials are held read-only for the life
//! of the process.

use gaiya_billing::BillingConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub database_url: String,
    pub jwt_secret: String,
    /// `production` restricts the origin whitelist to the canonical host
    pub environment: String,
    /// Origin answered to unlisted or absent Origin headers
    pub canonical_origin: String,
    /// Base URL for gateway notify/return links
    pub public_base_url: String,

    pub zpay_pid: String,
    pub zpay_pkey: String,
    pub zpay_gateway: String,

    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_price_monthly: String,
    pub stripe_price_yearly: String,
    pub stripe_price_lifetime: String,

    pub resend_api_key: Option<String>,
    pub mail_from: String,
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("missing environment variable {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Serverless platforms report the environment as VERCEL_ENV
        let environment = std::env::var("APP_ENV")
            .or_else(|_| std::env::var("VERCEL_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        Ok(Self {
            bind_address: optional("BIND_ADDRESS", "0.0.0.0:8080"),
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            environment,
            canonical_origin: optional("CANONICAL_ORIGIN", "https://gaiya.app"),
            public_base_url: optional("PUBLIC_BASE_URL", "https://api.gaiya.app"),
            zpay_pid: required("ZPAY_PID")?,
            zpay_pkey: required("ZPAY_PKEY")?,
            zpay_gateway: optional("ZPAY_GATEWAY", "https://z-pay.cn"),
            stripe_secret_key: required("STRIPE_SECRET_KEY")?,
            stripe_webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            stripe_price_monthly: required("STRIPE_PRICE_MONTHLY")?,
            stripe_price_yearly: required("STRIPE_PRICE_YEARLY")?,
            stripe_price_lifetime: required("STRIPE_PRICE_LIFETIME")?,
            resend_api_key: std::env::var("RESEND_API_KEY").ok(),
            mail_from: optional("MAIL_FROM", "GaiYa <no-reply@gaiya.app>"),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn billing_config(&self) -> BillingConfig {
        BillingConfig {
            zpay_pid: self.zpay_pid.clone(),
            zpay_pkey: self.zpay_pkey.clone(),
            zpay_gateway: self.zpay_gateway.clone(),
            stripe_secret_key: self.stripe_secret_key.clone(),
            stripe_webhook_secret: self.stripe_webhook_secret.clone(),
            stripe_price_monthly: self.stripe_price_monthly.clone(),
            stripe_price_yearly: self.stripe_price_yearly.clone(),
            stripe_price_lifetime: self.stripe_price_lifetime.clone(),
            public_base_url: self.public_base_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_required_env() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/gaiya_test");
        std::env::set_var("JWT_SECRET", "test-secret");
        std::env::set_var("ZPAY_PID", "1001");
        std::env::set_var("ZPAY_PKEY", "zkey");
        std::env::set_var("STRIPE_SECRET_KEY", "sk_test");
        std::env::set_var("STRIPE_WEBHOOK_SECRET", "whsec_test");
        std::env::set_var("STRIPE_PRICE_MONTHLY", "price_m");
        std::env::set_var("STRIPE_PRICE_YEARLY", "price_y");
        std::env::set_var("STRIPE_PRICE_LIFETIME", "price_l");
    }

    #[test]
    #[serial]
    fn loads_with_defaults() {
        set_required_env();
        std::env::remove_var("APP_ENV");
        std::env::remove_var("VERCEL_ENV");
        std::env::remove_var("ZPAY_GATEWAY");

        let config = Config::from_env().unwrap();
        assert_eq!(config.environment, "development");
        assert!(!config.is_production());
        assert_eq!(config.zpay_gateway, "https://z-pay.cn");
        assert_eq!(config.bind_address, "0.0.0.0:8080");
    }

    #[test]
    #[serial]
    fn vercel_env_is_the_fallback_environment() {
        set_required_env();
        std::env::remove_var("APP_ENV");
        std::env::set_var("VERCEL_ENV", "production");

        let config = Config::from_env().unwrap();
        assert!(config.is_production());
        std::env::remove_var("VERCEL_ENV");
    }

    #[test]
    #[serial]
    fn missing_required_variable_fails() {
        set_required_env();
        std::env::remove_var("JWT_SECRET");
        assert!(Config::from_env().is_err());
        std::env::set_var("JWT_SECRET", "test-secret");
    }
}
