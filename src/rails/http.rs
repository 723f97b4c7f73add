use chrono::Utc;
use reqwest::StatusCode;
use serde_json::json;

use crate::rails::{RailCharge, RailChargeStatus, RailClient, RailError, RailReceipt};

/// Generic HTTP rail adapter. Speaks a simple charge/status JSON protocol
/// against a rail-operator endpoint; per-rail quirks live behind the base
/// URL, not in the core.
pub struct HttpRail {
    pub id: String,
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub client: reqwest::Client,
}

#[async_trait::async_trait]
impl RailClient for HttpRail {
    fn rail_id(&self) -> &str {
        &self.id
    }

    async fn authorize_and_capture(&self, charge: &RailCharge) -> Result<RailReceipt, RailError> {
        let body = json!({
            "reference": charge.idempotency_reference,
            "amount_minor": charge.amount_minor,
            "currency": charge.currency,
            "merchant_id": charge.merchant_id,
            "rail_data": charge.rail_data,
        });

        let resp = self
            .client
            .post(format!("{}/v1/charges", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => {
                let v: serde_json::Value = r
                    .json()
                    .await
                    .map_err(|e| RailError::transient("RAIL_BAD_RESPONSE", &e.to_string()))?;
                let external_ref = v
                    .get("id")
                    .and_then(|id| id.as_str())
                    .ok_or_else(|| RailError::transient("RAIL_BAD_RESPONSE", "missing charge id"))?
                    .to_string();
                Ok(RailReceipt {
                    external_ref,
                    processed_at: Utc::now(),
                })
            }
            Ok(r) => {
                let status = r.status();
                let text = r.text().await.unwrap_or_default();
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    Err(RailError::transient(&format!("RAIL_HTTP_{}", status.as_u16()), &text))
                } else {
                    Err(RailError::permanent(&format!("RAIL_HTTP_{}", status.as_u16()), &text))
                }
            }
            Err(e) if e.is_timeout() => Err(RailError::transient("RAIL_TIMEOUT", "charge timed out")),
            Err(e) => Err(RailError::transient("RAIL_UNREACHABLE", &e.to_string())),
        }
    }

    async fn query_status(&self, idempotency_reference: &str) -> Result<RailChargeStatus, RailError> {
        let resp = self
            .client
            .get(format!("{}/v1/charges/{}", self.base_url, idempotency_reference))
            .bearer_auth(&self.api_key)
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .send()
            .await
            .map_err(|e| RailError::transient("RAIL_UNREACHABLE", &e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            // The rail never saw the charge; the original request died in
            // flight and a retry is safe.
            return Ok(RailChargeStatus::Failed);
        }
        if !resp.status().is_success() {
            return Ok(RailChargeStatus::Unknown);
        }

        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RailError::transient("RAIL_BAD_RESPONSE", &e.to_string()))?;
        Ok(match v.get("status").and_then(|s| s.as_str()) {
            Some("SUCCEEDED") => RailChargeStatus::Succeeded,
            Some("FAILED") => RailChargeStatus::Failed,
            Some("PENDING") => RailChargeStatus::Pending,
            _ => RailChargeStatus::Unknown,
        })
    }

    async fn release(&self, idempotency_reference: &str) -> Result<(), RailError> {
        let resp = self
            .client
            .post(format!("{}/v1/charges/{}/release", self.base_url, idempotency_reference))
            .bearer_auth(&self.api_key)
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .send()
            .await
            .map_err(|e| RailError::transient("RAIL_UNREACHABLE", &e.to_string()))?;

        // 404 means nothing is held; release is idempotent by contract.
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(RailError::transient(
                &format!("RAIL_HTTP_{}", resp.status().as_u16()),
                "release failed",
            ))
        }
    }
}
