//! Request parameter validators
//!
//! Pure functions. Handlers call these before delegating to a manager and
//! translate `false` into an `invalid_argument` naming the field.

use crate::catalog::plan_by_id;
use uuid::Uuid;

/// Lowercase and trim; the unique key for user rows
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Shape check only. Deliverability is the mail provider's problem.
pub fn is_email(email: &str) -> bool {
    let email = email.trim();
    if email.is_empty() || email.len() > 254 {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    if local.len() > 64 || email.contains(char::is_whitespace) || domain.contains('@') {
        return false;
    }
    // Domain needs a dot with a label on each side
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()),
        None => false,
    }
}

/// At least 8 characters with at least one letter and one digit
pub fn is_strong_password(password: &str) -> bool {
    password.len() >= 8
        && password.chars().any(|c| c.is_ascii_alphabetic())
        && password.chars().any(|c| c.is_ascii_digit())
}

pub fn is_uuid(s: &str) -> bool {
    Uuid::parse_str(s).is_ok()
}

/// Six ASCII digits
pub fn is_otp_code(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())
}

/// Member of the plan catalog
pub fn is_plan_id(id: &str) -> bool {
    plan_by_id(id).is_some()
}

/// Parse a decimal money string into minor units. Rejects more than two
/// decimal places, non-positive values, and anything non-numeric.
pub fn parse_amount_cents(s: &str) -> Option<i64> {
    let s = s.trim();
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() || whole.len() > 12 || frac.len() > 2 {
        return None;
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let frac: i64 = if frac.is_empty() {
        0
    } else if frac.len() == 1 {
        frac.parse::<i64>().ok()? * 10
    } else {
        frac.parse().ok()?
    };
    let cents = whole.checked_mul(100)?.checked_add(frac)?;
    if cents > 0 {
        Some(cents)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email("  A@B.Com "), "a@b.com");
    }

    #[test]
    fn email_shapes() {
        assert!(is_email("a@b.com"));
        assert!(is_email("first.last+tag@sub.example.org"));
        assert!(!is_email(""));
        assert!(!is_email("no-at-sign"));
        assert!(!is_email("@missing-local.com"));
        assert!(!is_email("missing-domain@"));
        assert!(!is_email("two@@example.com"));
        assert!(!is_email("spaces in@example.com"));
        assert!(!is_email("nodot@example"));
        assert!(!is_email("numeric-tld@example.c0m"));
    }

    #[test]
    fn password_strength() {
        assert!(is_strong_password("Pa55word"));
        assert!(is_strong_password("aaaa1111"));
        assert!(!is_strong_password("short1"));
        assert!(!is_strong_password("allletters"));
        assert!(!is_strong_password("12345678"));
    }

    #[test]
    fn otp_code_shape() {
        assert!(is_otp_code("123456"));
        assert!(!is_otp_code("12345"));
        assert!(!is_otp_code("1234567"));
        assert!(!is_otp_code("12345a"));
        assert!(!is_otp_code("１２３４５６")); // full-width digits
    }

    #[test]
    fn plan_ids() {
        assert!(is_plan_id("pro_monthly"));
        assert!(is_plan_id("team_partner"));
        assert!(!is_plan_id("pro_weekly"));
    }

    #[test]
    fn amount_parsing() {
        assert_eq!(parse_amount_cents("29.00"), Some(2900));
        assert_eq!(parse_amount_cents("29"), Some(2900));
        assert_eq!(parse_amount_cents("29.5"), Some(2950));
        assert_eq!(parse_amount_cents("0.01"), Some(1));
        assert_eq!(parse_amount_cents("29.001"), None);
        assert_eq!(parse_amount_cents("0"), None);
        assert_eq!(parse_amount_cents("-1"), None);
        assert_eq!(parse_amount_cents("abc"), None);
        assert_eq!(parse_amount_cents(""), None);
    }

    #[test]
    fn uuid_shape() {
        assert!(is_uuid("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_uuid("not-a-uuid"));
    }
}
