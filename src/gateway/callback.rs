use serde::{Deserialize, Serialize};

use crate::domain::TransactionStatus;
use crate::ports::RESULT_SUCCESS;

/// Form body the gateway posts to the callback endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCallback {
    #[serde(default)]
    pub merchant_code: Option<String>,
    pub merchant_order_id: String,
    /// Kept verbatim; the signature covers this exact text.
    pub amount: String,
    pub result_code: String,
    #[serde(default)]
    pub reference: Option<String>,
    pub signature: String,
    #[serde(default)]
    pub datetime: String,
    #[serde(default)]
    pub payment_code: Option<String>,
    #[serde(default)]
    pub publisher_order_id: Option<String>,
    #[serde(default)]
    pub settlement_date: Option<String>,
    #[serde(default)]
    pub additional_param: Option<String>,
}

impl GatewayCallback {
    /// Any code other than success settles the transaction as failed.
    pub fn resulting_status(&self) -> TransactionStatus {
        if self.result_code.trim() == RESULT_SUCCESS {
            TransactionStatus::Success
        } else {
            TransactionStatus::Failed
        }
    }

    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback(result_code: &str) -> GatewayCallback {
        GatewayCallback {
            merchant_code: Some("D0001".to_string()),
            merchant_order_id: "TRX-42-X7-1".to_string(),
            amount: "150000".to_string(),
            result_code: result_code.to_string(),
            reference: Some("GW-REF-1".to_string()),
            signature: "abc".to_string(),
            datetime: "2026-03-01 08:00:00".to_string(),
            payment_code: None,
            publisher_order_id: None,
            settlement_date: None,
            additional_param: None,
        }
    }

    #[test]
    fn maps_result_codes() {
        assert_eq!(callback("00").resulting_status(), TransactionStatus::Success);
        assert_eq!(callback("01").resulting_status(), TransactionStatus::Failed);
        assert_eq!(callback("02").resulting_status(), TransactionStatus::Failed);
    }

    #[test]
    fn payload_uses_gateway_field_names() {
        let payload = callback("00").to_payload();
        assert_eq!(payload["merchantOrderId"], "TRX-42-X7-1");
        assert_eq!(payload["resultCode"], "00");
    }
}
