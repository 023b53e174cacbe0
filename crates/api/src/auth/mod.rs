//! Authentication module for the GaiYa control plane

pub mod jwt;
pub mod otp;
pub mod password;
pub mod service;
pub mod sessions;

pub use jwt::{Claims, JwtManager, TokenPair, TokenType};
pub use otp::{OtpPurpose, OtpStore, PgOtpStore};
pub use password::{generate_impossible_hash, hash_password, verify_password};
pub use service::{AuthService, RotatedTokens, SessionTokens};
