// Shared crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! GaiYa shared types and utilities
//!
//! Everything that both the API server and the billing crate need:
//! the plan catalog with tier-aware quota ceilings, request validators,
//! window/rollover arithmetic, the sliding-window rate limiter, and
//! database pool construction.

pub mod catalog;
pub mod clock;
pub mod db;
pub mod rate_limit;
pub mod validate;

// Catalog
pub use catalog::{
    ceiling, plan_by_id, styles_for, Feature, Plan, SubscriptionTier, ThemeStyle, WindowKind,
    PLAN_CATALOG, THEME_STYLES,
};

// Clock
pub use clock::{
    next_reset, parse_store_timestamp, user_offset, TimestampError, DEFAULT_TZ_OFFSET_MINUTES,
};

// Database
pub use db::{create_pool, run_migrations};

// Rate limiting
pub use rate_limit::{policy_for, RateLimitConfig, RateLimitError, RateLimitResult, RateLimiter};

// Validation
pub use validate::{
    is_email, is_otp_code, is_plan_id, is_strong_password, is_uuid, normalize_email,
    parse_amount_cents,
};
