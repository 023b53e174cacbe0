//! Z-Pay gateway client
//!
//! Z-Pay signs every message with MD5 over the sorted `key=value` join of
//! all non-empty parameters (excluding `sign` and `sign_type`) followed by
//! the merchant key. The same algorithm covers outgoing submit URLs and
//! incoming callbacks. The order-query API occasionally answers with HTML
//! error pages instead of JSON; those surface as `GatewayRejected`, never
//! as a parse panic.

use std::collections::BTreeMap;
use std::time::Duration;

use md5::{Digest, Md5};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

use crate::error::{BillingError, BillingResult};
use crate::orders::OrderRow;

/// Ack body Z-Pay requires for a handled callback; anything else is retried
pub const ZPAY_ACK: &str = "success";

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ZPayClient {
    pid: String,
    key: String,
    gateway: String,
    http: reqwest::Client,
}

/// Normalized result of the order-query API
#[derive(Debug, Clone)]
pub struct ZPayOrderStatus {
    pub paid: bool,
    pub money: Option<String>,
    pub gateway_trade_no: Option<String>,
    pub param: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    code: i32,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    status: Option<serde_json::Value>,
    #[serde(default)]
    money: Option<String>,
    #[serde(default)]
    trade_no: Option<String>,
    #[serde(default)]
    param: Option<String>,
}

impl ZPayClient {
    pub fn new(pid: String, key: String, gateway: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            pid,
            key,
            gateway: gateway.trim_end_matches('/').to_string(),
            http,
        }
    }

    /// MD5 signature over the canonicalized parameter join
    pub fn sign(&self, params: &BTreeMap<String, String>) -> String {
        let joined: Vec<String> = params
            .iter()
            .filter(|(k, v)| !v.is_empty() && k.as_str() != "sign" && k.as_str() != "sign_type")
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let mut hasher = Md5::new();
        hasher.update(joined.join("&"));
        hasher.update(&self.key);
        hex::encode(hasher.finalize())
    }

    /// Recompute and compare the callback signature
    pub fn verify_callback(&self, params: &BTreeMap<String, String>) -> bool {
        let Some(provided) = params.get("sign") else {
            return false;
        };
        let expected = self.sign(params);
        expected.as_bytes().ct_eq(provided.as_bytes()).into()
    }

    /// Signed submit URL the desktop client opens in a browser
    pub fn payment_url(
        &self,
        order: &OrderRow,
        display_name: &str,
        money: &str,
        notify_url: &str,
        return_url: &str,
    ) -> String {
        let mut params = BTreeMap::new();
        params.insert("pid".to_string(), self.pid.clone());
        params.insert("type".to_string(), "alipay".to_string());
        params.insert("out_trade_no".to_string(), order.out_trade_no.clone());
        params.insert("notify_url".to_string(), notify_url.to_string());
        params.insert("return_url".to_string(), return_url.to_string());
        params.insert("name".to_string(), display_name.to_string());
        params.insert("money".to_string(), money.to_string());
        let sign = self.sign(&params);
        params.insert("sign".to_string(), sign);
        params.insert("sign_type".to_string(), "MD5".to_string());

        let query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencode(v)))
            .collect();
        format!("{}/submit.php?{}", self.gateway, query.join("&"))
    }

    /// Query the gateway for an order's state. Transport failures are
    /// retried twice with backoff; HTML error bodies are rejected.
    pub async fn query_order(&self, out_trade_no: &str) -> BillingResult<ZPayOrderStatus> {
        let url = format!(
            "{}/api.php?act=order&pid={}&key={}&out_trade_no={}",
            self.gateway, self.pid, self.key, out_trade_no
        );

        let strategy = FixedInterval::from_millis(300).take(2);
        let body = Retry::spawn(strategy, || async {
            let resp = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| BillingError::GatewayUnavailable(e.to_string()))?;
            resp.text()
                .await
                .map_err(|e| BillingError::GatewayUnavailable(e.to_string()))
        })
        .await?;

        let parsed: QueryResponse = serde_json::from_str(&body).map_err(|_| {
            let body_prefix: String = body.chars().take(120).collect();
            tracing::warn!(
                out_trade_no = out_trade_no,
                body_prefix = %body_prefix,
                "Z-Pay query returned a non-JSON body"
            );
            BillingError::GatewayRejected("gateway returned a non-JSON response".to_string())
        })?;

        if parsed.code != 1 {
            return Err(BillingError::GatewayRejected(
                parsed.msg.unwrap_or_else(|| format!("code {}", parsed.code)),
            ));
        }

        // The gateway reports status as either the string "1" or the number 1
        let paid = match &parsed.status {
            Some(serde_json::Value::String(s)) => s == "1",
            Some(serde_json::Value::Number(n)) => n.as_i64() == Some(1),
            _ => false,
        };

        Ok(ZPayOrderStatus {
            paid,
            money: parsed.money,
            gateway_trade_no: parsed.trade_no,
            param: parsed.param,
        })
    }
}

/// Minimal percent-encoding for query values; Z-Pay rejects '+' for spaces
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Fields of interest from a verified callback
#[derive(Debug, Clone)]
pub struct ZPayCallback {
    pub out_trade_no: String,
    pub trade_no: String,
    pub money: String,
    pub trade_status: String,
}

impl ZPayCallback {
    /// Extract required fields after signature verification
    pub fn from_params(params: &BTreeMap<String, String>) -> BillingResult<Self> {
        let get = |key: &str| -> BillingResult<String> {
            params
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| BillingError::GatewayRejected(format!("callback missing {key}")))
        };
        Ok(Self {
            out_trade_no: get("out_trade_no")?,
            trade_no: get("trade_no")?,
            money: get("money")?,
            trade_status: get("trade_status")?,
        })
    }
}
