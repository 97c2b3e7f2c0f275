//! Wire types and the mapping from domain values to them.
//!
//! 256-bit amounts always travel as decimal strings so no JSON consumer
//! truncates them to a double. Timestamps use RFC 3339 with second precision
//! in UTC, which sorts lexically.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use super::AddressInfo;

/// Envelope shared by every JSON response.
///
/// ```json
/// {"status":"success","data":{...}}
/// {"status":"error","message":"Invalid Ethereum address format"}
/// ```
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success",
            message: None,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: impl Into<String>, error: Option<String>) -> Self {
        Self {
            status: "error",
            message: Some(message.into()),
            data: None,
            error,
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Body of a successful `GET /api/ethereum/{address}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddressInfoResponse {
    pub address: String,
    pub gas_price: GasPriceResponse,
    pub current_block: u64,
    pub balance: BalanceResponse,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GasPriceResponse {
    pub wei: String,
    pub gwei: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BalanceResponse {
    pub wei: String,
    pub ether: f64,
}

impl From<&AddressInfo> for AddressInfoResponse {
    fn from(info: &AddressInfo) -> Self {
        Self {
            address: info.address().to_string(),
            gas_price: GasPriceResponse {
                wei: info.gas_price().wei.to_string(),
                gwei: info.gas_price().gwei,
            },
            current_block: info.current_block(),
            balance: BalanceResponse {
                wei: info.balance().wei.to_string(),
                ether: info.balance().ether,
            },
            timestamp: format_timestamp(info.timestamp()),
        }
    }
}

/// RFC 3339, UTC, whole seconds (`2024-01-15T10:30:00Z`).
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use alloy::primitives::U256;
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn sample_info() -> AddressInfo {
        AddressInfo::new(
            "0x742d35cc6634c0532925a3b844bc454e4438f44e".to_string(),
            "12000000000".parse().unwrap(),
            19_000_000,
            // Larger than u64::MAX and beyond f64's exact integer range
            "123456789012345678901234567890".parse().unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_amounts_serialize_as_strings() {
        let response = AddressInfoResponse::from(&sample_info());
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["gasPrice"]["wei"], json!("12000000000"));
        assert_eq!(value["gasPrice"]["gwei"], json!(12.0));
        assert_eq!(
            value["balance"]["wei"],
            json!("123456789012345678901234567890")
        );
        assert_eq!(value["currentBlock"], json!(19_000_000));
        assert_eq!(
            value["address"],
            json!("0x742d35cc6634c0532925a3b844bc454e4438f44e")
        );
    }

    #[test]
    fn test_timestamp_is_rfc3339_seconds() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(format_timestamp(ts), "2024-01-15T10:30:00Z");
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let earlier = format_timestamp(Utc.with_ymd_and_hms(2024, 1, 9, 23, 59, 59).unwrap());
        let later = format_timestamp(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap());
        assert!(earlier < later);
    }

    #[test]
    fn test_success_envelope() {
        let value = serde_json::to_value(ApiResponse::success(json!({"k": 1}))).unwrap();
        assert_eq!(value, json!({"status": "success", "data": {"k": 1}}));
    }

    #[test]
    fn test_error_envelope_omits_empty_fields() {
        let value = serde_json::to_value(ApiResponse::error("Request timed out", None)).unwrap();
        assert_eq!(
            value,
            json!({"status": "error", "message": "Request timed out"})
        );

        let value = serde_json::to_value(ApiResponse::error(
            "Payload too large",
            Some("limit is 10 bytes".to_string()),
        ))
        .unwrap();
        assert_eq!(value["error"], json!("limit is 10 bytes"));
    }

    #[test]
    fn test_zero_values() {
        let info = AddressInfo::new(
            "0x0000000000000000000000000000000000000000".to_string(),
            U256::ZERO,
            1,
            U256::ZERO,
        )
        .unwrap();
        let value = serde_json::to_value(AddressInfoResponse::from(&info)).unwrap();

        assert_eq!(value["gasPrice"]["wei"], json!("0"));
        assert_eq!(value["gasPrice"]["gwei"], json!(0.0));
        assert_eq!(value["balance"]["ether"], json!(0.0));
    }
}
