// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing System
//!
//! Covers boundary conditions in:
//! - Z-Pay signing and callback verification
//! - Order id generation
//! - Gateway query robustness (non-JSON bodies)
//! - Entitlement precedence (lifetime absorbs pro)

#[cfg(test)]
mod zpay_signature_tests {
    use crate::zpay::ZPayClient;
    use std::collections::BTreeMap;

    fn client() -> ZPayClient {
        ZPayClient::new(
            "1001".to_string(),
            "testkey".to_string(),
            "https://z-pay.cn".to_string(),
        )
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // =========================================================================
    // Golden vector: md5("money=29.00&out_trade_no=GAIYA1&pid=1001" + key)
    // =========================================================================
    #[test]
    fn sign_matches_known_vector() {
        use md5::Digest;

        let client = client();
        let p = params(&[("pid", "1001"), ("out_trade_no", "GAIYA1"), ("money", "29.00")]);
        // Canonical string is sorted by key; the merchant key is appended raw
        let mut hasher = md5::Md5::new();
        hasher.update("money=29.00&out_trade_no=GAIYA1&pid=1001testkey");
        assert_eq!(client.sign(&p), hex::encode(hasher.finalize()));
    }

    #[test]
    fn sign_excludes_empty_and_signature_fields() {
        let client = client();
        let base = params(&[("pid", "1001"), ("money", "29.00")]);
        let mut noisy = base.clone();
        noisy.insert("param".to_string(), String::new());
        noisy.insert("sign".to_string(), "bogus".to_string());
        noisy.insert("sign_type".to_string(), "MD5".to_string());
        assert_eq!(client.sign(&base), client.sign(&noisy));
    }

    #[test]
    fn callback_roundtrip_verifies() {
        let client = client();
        let mut p = params(&[
            ("pid", "1001"),
            ("out_trade_no", "GAIYA1700000000000deadbeef"),
            ("trade_no", "ZT1"),
            ("money", "29.00"),
            ("trade_status", "TRADE_SUCCESS"),
        ]);
        let sign = client.sign(&p);
        p.insert("sign".to_string(), sign);
        p.insert("sign_type".to_string(), "MD5".to_string());
        assert!(client.verify_callback(&p));
    }

    #[test]
    fn tampered_callback_rejected() {
        let client = client();
        let mut p = params(&[
            ("pid", "1001"),
            ("out_trade_no", "GAIYA1"),
            ("money", "29.00"),
            ("trade_status", "TRADE_SUCCESS"),
        ]);
        let sign = client.sign(&p);
        p.insert("sign".to_string(), sign);
        p.insert("money".to_string(), "0.01".to_string());
        assert!(!client.verify_callback(&p));
    }

    #[test]
    fn missing_signature_rejected() {
        let client = client();
        let p = params(&[("pid", "1001"), ("money", "29.00")]);
        assert!(!client.verify_callback(&p));
    }

    #[test]
    fn payment_url_is_signed_and_encoded() {
        let client = client();
        let order = crate::orders::OrderRow {
            out_trade_no: "GAIYA1700000000000deadbeef".to_string(),
            user_id: uuid::Uuid::nil(),
            plan_id: "pro_monthly".to_string(),
            amount_cents: 2900,
            currency: "CNY".to_string(),
            gateway: "zpay".to_string(),
            state: "created".to_string(),
            gateway_trade_no: None,
            created_at: time::OffsetDateTime::UNIX_EPOCH,
            paid_at: None,
        };
        let url = client.payment_url(
            &order,
            "GaiYa Pro (monthly)",
            "29.00",
            "https://api.gaiya.app/payment-notify",
            "https://api.gaiya.app/payment-return",
        );
        assert!(url.starts_with("https://z-pay.cn/submit.php?"));
        assert!(url.contains("sign="));
        assert!(url.contains("sign_type=MD5"));
        assert!(url.contains("out_trade_no=GAIYA1700000000000deadbeef"));
        // Spaces in the display name are percent-encoded, never '+'
        assert!(url.contains("GaiYa%20Pro"));
        assert!(!url.contains('+'));
    }
}

#[cfg(test)]
mod order_id_tests {
    use crate::orders::generate_out_trade_no;
    use time::macros::datetime;

    #[test]
    fn format_is_prefix_millis_hex() {
        let now = datetime!(2023-11-14 22:13:20 UTC); // 1700000000000 ms
        let id = generate_out_trade_no(now);
        assert!(id.starts_with("GAIYA1700000000000"));
        assert_eq!(id.len(), "GAIYA1700000000000".len() + 8);
        assert!(id.len() <= 32);
        assert!(id.is_ascii());
        let suffix = &id[id.len() - 8..];
        assert!(suffix.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_do_not_collide() {
        let now = datetime!(2023-11-14 22:13:20 UTC);
        let a = generate_out_trade_no(now);
        let b = generate_out_trade_no(now);
        assert_ne!(a, b, "random suffix must differ within one millisecond");
    }
}

#[cfg(test)]
mod zpay_query_tests {
    use crate::error::BillingError;
    use crate::zpay::ZPayClient;

    fn client_for(server: &mockito::ServerGuard) -> ZPayClient {
        ZPayClient::new("1001".to_string(), "testkey".to_string(), server.url())
    }

    // =========================================================================
    // The gateway sometimes answers with HTML error pages; those must become
    // a typed rejection, not a parse panic.
    // =========================================================================
    #[tokio::test]
    async fn non_json_body_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body("<html><body>Service Temporarily Unavailable</body></html>")
            .create_async()
            .await;

        let result = client_for(&server).query_order("GAIYA1").await;
        mock.assert_async().await;
        assert!(matches!(result, Err(BillingError::GatewayRejected(_))));
    }

    #[tokio::test]
    async fn paid_order_is_normalized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"code":1,"msg":"ok","status":"1","money":"29.00","trade_no":"ZT1","param":"x"}"#,
            )
            .create_async()
            .await;

        let status = client_for(&server).query_order("GAIYA1").await.unwrap();
        assert!(status.paid);
        assert_eq!(status.money.as_deref(), Some("29.00"));
        assert_eq!(status.gateway_trade_no.as_deref(), Some("ZT1"));
    }

    #[tokio::test]
    async fn numeric_status_is_accepted() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":1,"status":0}"#)
            .create_async()
            .await;

        let status = client_for(&server).query_order("GAIYA1").await.unwrap();
        assert!(!status.paid);
    }

    #[tokio::test]
    async fn gateway_error_code_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":-1,"msg":"order not exists"}"#)
            .create_async()
            .await;

        let result = client_for(&server).query_order("GAIYA1").await;
        match result {
            Err(BillingError::GatewayRejected(msg)) => assert_eq!(msg, "order not exists"),
            other => panic!("expected GatewayRejected, got {other:?}"),
        }
    }
}

#[cfg(test)]
mod callback_field_tests {
    use crate::zpay::ZPayCallback;
    use std::collections::BTreeMap;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn complete_callback_parses() {
        let p = params(&[
            ("out_trade_no", "GAIYA1"),
            ("trade_no", "ZT1"),
            ("money", "29.00"),
            ("trade_status", "TRADE_SUCCESS"),
        ]);
        let cb = ZPayCallback::from_params(&p).unwrap();
        assert_eq!(cb.out_trade_no, "GAIYA1");
        assert_eq!(cb.trade_status, "TRADE_SUCCESS");
    }

    #[test]
    fn missing_field_is_rejected() {
        let p = params(&[("out_trade_no", "GAIYA1"), ("trade_no", "ZT1")]);
        assert!(ZPayCallback::from_params(&p).is_err());
    }

    #[test]
    fn empty_field_counts_as_missing() {
        let p = params(&[
            ("out_trade_no", "GAIYA1"),
            ("trade_no", ""),
            ("money", "29.00"),
            ("trade_status", "TRADE_SUCCESS"),
        ]);
        assert!(ZPayCallback::from_params(&p).is_err());
    }
}
