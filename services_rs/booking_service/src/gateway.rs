use crate::store::Customer;
use serde_json::Value;
use uuid::Uuid;

/// Connection details for the external payment provider. Built once from
/// `Config` at startup and passed in; nothing here reads the environment.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_version: String,
}

/// What the provider reports for a charge when asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeStatus {
    Paid { txn_id: Option<String> },
    Open,
    Failed,
    Expired,
}

#[derive(Debug, Clone)]
pub struct ChargeSession {
    pub session_ref: String,
}

/// "The provider said no" and "we could not ask the provider" are different
/// failures: the reconciler must never treat an outage as a declined payment.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway unreachable: {0}")]
    Unreachable(String),
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
    #[error("gateway returned an unexpected response: {0}")]
    InvalidResponse(String),
}

/// HTTP client for the provider's order API. The only component allowed to
/// talk to the gateway is the reconciler, and it goes through this.
pub struct PaymentGateway {
    http: reqwest::Client,
    cfg: GatewayConfig,
}

fn error_detail(body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        for key in ["message", "detail"] {
            if let Some(msg) = v.get(key).and_then(|x| x.as_str()) {
                return msg.to_string();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no detail".to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

impl PaymentGateway {
    pub fn new(http: reqwest::Client, cfg: GatewayConfig) -> Self {
        Self { http, cfg }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    /// Opens a charge for `amount_minor` under the reconciler's order id and
    /// returns the session reference the client needs to complete payment.
    pub async fn open_charge(
        &self,
        order_id: &str,
        amount_minor: i64,
        currency: &str,
        customer: &Customer,
        note: &str,
    ) -> Result<ChargeSession, GatewayError> {
        let payload = serde_json::json!({
            "order_id": order_id,
            "order_amount": amount_minor as f64 / 100.0,
            "order_currency": currency,
            "customer_details": {
                "customer_id": format!("CUST-{}", Uuid::new_v4().simple()),
                "customer_name": customer.name,
                "customer_email": customer.email,
                "customer_phone": customer.phone,
            },
            "order_note": note,
        });

        let resp = self
            .http
            .post(self.url("/pg/orders"))
            .header("x-client-id", &self.cfg.client_id)
            .header("x-client-secret", &self.cfg.client_secret)
            .header("x-api-version", &self.cfg.api_version)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(GatewayError::Rejected(error_detail(&body)));
        }

        let v: Value = serde_json::from_str(&body)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let session_ref = v
            .get("payment_session_id")
            .and_then(|x| x.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                GatewayError::InvalidResponse("missing payment_session_id".to_string())
            })?;
        Ok(ChargeSession { session_ref })
    }

    /// Asks the provider for the charge's current state, keyed by order id.
    pub async fn charge_status(&self, order_id: &str) -> Result<ChargeStatus, GatewayError> {
        let resp = self
            .http
            .get(self.url(&format!("/pg/orders/{order_id}")))
            .header("x-client-id", &self.cfg.client_id)
            .header("x-client-secret", &self.cfg.client_secret)
            .header("x-api-version", &self.cfg.api_version)
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(GatewayError::Rejected(error_detail(&body)));
        }

        let v: Value = serde_json::from_str(&body)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let order_status = v
            .get("order_status")
            .and_then(|x| x.as_str())
            .ok_or_else(|| GatewayError::InvalidResponse("missing order_status".to_string()))?;

        // Provider vocabulary: ACTIVE means the payment session is still open.
        // Everything that is not paid, open, or expired counts as failed.
        Ok(match order_status {
            "PAID" => {
                let txn_id = v
                    .get("cf_order_id")
                    .map(|x| match x {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .filter(|s| !s.is_empty());
                ChargeStatus::Paid { txn_id }
            }
            "ACTIVE" | "OPEN" => ChargeStatus::Open,
            "EXPIRED" => ChargeStatus::Expired,
            _ => ChargeStatus::Failed,
        })
    }
}
