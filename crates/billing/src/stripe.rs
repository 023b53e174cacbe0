//! Stripe gateway (international purchases)
//!
//! Orders are paid through Checkout Sessions referencing the configured
//! price ids; the order's `out_trade_no` rides along as the session's
//! client reference so the webhook can find it again. Webhook signatures
//! are verified manually: parse the `Stripe-Signature` header, enforce the
//! timestamp tolerance, recompute the HMAC over `"{t}.{payload}"`.

use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Signature timestamp tolerance (5 minutes)
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct StripeGateway {
    secret_key: String,
    webhook_secret: String,
    price_monthly: String,
    price_yearly: String,
    price_lifetime: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    id: String,
    url: Option<String>,
}

/// The one event shape fulfillment cares about
#[derive(Debug, Clone)]
pub struct CheckoutCompleted {
    pub session_id: String,
    pub client_reference_id: Option<String>,
    pub amount_total: Option<i64>,
}

impl StripeGateway {
    pub fn new(
        secret_key: String,
        webhook_secret: String,
        price_monthly: String,
        price_yearly: String,
        price_lifetime: String,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            secret_key,
            webhook_secret,
            price_monthly,
            price_yearly,
            price_lifetime,
            http,
        }
    }

    pub fn price_for_plan(&self, plan_id: &str) -> Option<&str> {
        match plan_id {
            "pro_monthly" => Some(self.price_monthly.as_str()),
            "pro_yearly" => Some(self.price_yearly.as_str()),
            "team_partner" => Some(self.price_lifetime.as_str()),
            _ => None,
        }
    }

    /// Create a Checkout Session and return its hosted payment URL
    pub async fn create_checkout_session(
        &self,
        plan_id: &str,
        out_trade_no: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> BillingResult<String> {
        let price = self
            .price_for_plan(plan_id)
            .ok_or_else(|| BillingError::PlanUnknown(plan_id.to_string()))?;

        let form = [
            ("mode", "payment"),
            ("line_items[0][price]", price),
            ("line_items[0][quantity]", "1"),
            ("client_reference_id", out_trade_no),
            ("metadata[out_trade_no]", out_trade_no),
            ("success_url", success_url),
            ("cancel_url", cancel_url),
        ];

        let resp = self
            .http
            .post(format!("{STRIPE_API_BASE}/checkout/sessions"))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| BillingError::GatewayUnavailable(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| BillingError::GatewayUnavailable(e.to_string()))?;

        if !status.is_success() {
            tracing::error!(
                status = status.as_u16(),
                plan_id = plan_id,
                "Stripe checkout session creation rejected"
            );
            return Err(BillingError::GatewayRejected(format!(
                "checkout session creation failed with status {status}"
            )));
        }

        let session: CheckoutSessionResponse = serde_json::from_str(&body)
            .map_err(|e| BillingError::GatewayRejected(format!("unexpected session body: {e}")))?;

        tracing::info!(
            session_id = %session.id,
            out_trade_no = out_trade_no,
            "Stripe checkout session created"
        );

        session
            .url
            .ok_or_else(|| BillingError::GatewayRejected("session has no hosted url".to_string()))
    }

    /// Verify a `Stripe-Signature` header against the raw payload
    pub fn verify_signature(&self, payload: &str, signature: &str) -> BillingResult<()> {
        self.verify_signature_at(payload, signature, OffsetDateTime::now_utc().unix_timestamp())
    }

    fn verify_signature_at(&self, payload: &str, signature: &str, now: i64) -> BillingResult<()> {
        // Parse the signature header: t=timestamp,v1=signature,v0=signature
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<String> = None;

        for part in signature.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "t" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1].to_string()),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::error!("Missing timestamp in signature header");
            BillingError::SignatureInvalid
        })?;

        let v1_signature = v1_signature.ok_or_else(|| {
            tracing::error!("Missing v1 signature in signature header");
            BillingError::SignatureInvalid
        })?;

        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::error!(
                timestamp = timestamp,
                now = now,
                diff = (now - timestamp).abs(),
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::SignatureInvalid);
        }

        let secret_key = self
            .webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(&self.webhook_secret);
        let signed_payload = format!("{}.{}", timestamp, payload);

        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
            .map_err(|_| BillingError::SignatureInvalid)?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if !bool::from(computed.as_bytes().ct_eq(v1_signature.as_bytes())) {
            tracing::error!("Webhook signature mismatch");
            return Err(BillingError::SignatureInvalid);
        }

        Ok(())
    }

    /// Parse a verified event payload. Returns `None` for event types this
    /// control plane does not handle.
    pub fn parse_event(payload: &str) -> BillingResult<Option<CheckoutCompleted>> {
        #[derive(Deserialize)]
        struct Event {
            #[serde(rename = "type")]
            event_type: String,
            data: EventData,
        }
        #[derive(Deserialize)]
        struct EventData {
            object: serde_json::Value,
        }

        let event: Event = serde_json::from_str(payload)
            .map_err(|e| BillingError::GatewayRejected(format!("unparseable event: {e}")))?;

        if event.event_type != "checkout.session.completed" {
            tracing::info!(
                event_type = %event.event_type,
                "Received unhandled Stripe event type - no handler configured"
            );
            return Ok(None);
        }

        let object = event.data.object;
        let session_id = object
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BillingError::GatewayRejected("session missing id".to_string()))?
            .to_string();

        Ok(Some(CheckoutCompleted {
            session_id,
            client_reference_id: object
                .get("client_reference_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            amount_total: object.get("amount_total").and_then(|v| v.as_i64()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> StripeGateway {
        StripeGateway::new(
            "sk_test_key".to_string(),
            "whsec_testsecret".to_string(),
            "price_monthly".to_string(),
            "price_yearly".to_string(),
            "price_lifetime".to_string(),
        )
    }

    fn sign(payload: &str, timestamp: i64, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_accepted() {
        let gw = gateway();
        let payload = r#"{"type":"checkout.session.completed"}"#;
        let header = sign(payload, 1_700_000_000, "testsecret");
        assert!(gw
            .verify_signature_at(payload, &header, 1_700_000_000 + 10)
            .is_ok());
    }

    #[test]
    fn stale_timestamp_rejected() {
        let gw = gateway();
        let payload = "{}";
        let header = sign(payload, 1_700_000_000, "testsecret");
        let result = gw.verify_signature_at(payload, &header, 1_700_000_000 + 301);
        assert!(matches!(result, Err(BillingError::SignatureInvalid)));
    }

    #[test]
    fn tampered_payload_rejected() {
        let gw = gateway();
        let header = sign("{}", 1_700_000_000, "testsecret");
        let result = gw.verify_signature_at(r#"{"x":1}"#, &header, 1_700_000_000);
        assert!(matches!(result, Err(BillingError::SignatureInvalid)));
    }

    #[test]
    fn malformed_header_rejected() {
        let gw = gateway();
        assert!(gw.verify_signature_at("{}", "garbage", 0).is_err());
        assert!(gw.verify_signature_at("{}", "t=abc,v1=def", 0).is_err());
    }

    #[test]
    fn parses_checkout_completed() {
        let payload = r#"{
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_test_123",
                "client_reference_id": "GAIYA1700000000000deadbeef",
                "amount_total": 2900
            }}
        }"#;
        let event = StripeGateway::parse_event(payload).unwrap().unwrap();
        assert_eq!(event.session_id, "cs_test_123");
        assert_eq!(
            event.client_reference_id.as_deref(),
            Some("GAIYA1700000000000deadbeef")
        );
        assert_eq!(event.amount_total, Some(2900));
    }

    #[test]
    fn ignores_other_event_types() {
        let payload = r#"{"type":"invoice.paid","data":{"object":{"id":"in_1"}}}"#;
        assert!(StripeGateway::parse_event(payload).unwrap().is_none());
    }

    #[test]
    fn price_mapping_covers_catalog() {
        let gw = gateway();
        assert_eq!(gw.price_for_plan("pro_monthly"), Some("price_monthly"));
        assert_eq!(gw.price_for_plan("team_partner"), Some("price_lifetime"));
        assert!(gw.price_for_plan("unknown").is_none());
    }
}
