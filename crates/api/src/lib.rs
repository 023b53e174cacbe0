// API crate clippy configuration
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! GaiYa API Library
//!
//! The identity-entitlement control plane for the GaiYa desktop app:
//! authentication and sessions, OTP verification, quota accounting,
//! subscriptions, and payment endpoints.

pub mod auth;
pub mod config;
pub mod cors;
pub mod email;
pub mod error;
pub mod routes;
pub mod state;
pub mod users;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
