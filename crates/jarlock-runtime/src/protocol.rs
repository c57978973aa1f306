//! Validation request/response schema.
//!
//! Field names follow the wire format (`camelCase` JSON). Times are
//! milliseconds since the Unix epoch; an expiry of 0 means "never".

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub const MSG_INVALID_KEY: &str = "Invalid license key";
pub const MSG_WRONG_PRODUCT: &str = "License not valid for this product";
pub const MSG_DEACTIVATED: &str = "License has been deactivated";
pub const MSG_EXPIRED: &str = "License has expired";
pub const MSG_WRONG_HARDWARE: &str = "License bound to different hardware";
pub const MSG_VALID: &str = "License validated successfully";

/// Body of `POST {server}/validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    pub product_id: String,
    pub license_key: String,
    pub hwid: String,
    pub ip: String,
}

/// The authority's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub valid: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_features: Option<Vec<String>>,
}

impl ValidationResponse {
    pub fn rejected(message: &str) -> Self {
        Self {
            valid: false,
            message: message.to_string(),
            tier: None,
            expiry_time: None,
            allowed_features: None,
        }
    }
}

/// What the client keeps from a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub message: String,
    pub tier: Option<String>,
    pub features: Vec<String>,
    /// `None` when the license never expires.
    pub expiry: Option<i64>,
}

impl ValidationResult {
    pub fn from_response(response: ValidationResponse) -> Self {
        Self {
            valid: response.valid,
            message: response.message,
            tier: response.tier,
            features: response.allowed_features.unwrap_or_default(),
            expiry: response.expiry_time.filter(|&t| t > 0),
        }
    }

    /// Valid as reported and not past its expiry at `now_ms`.
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        self.valid && self.expiry.map_or(true, |t| now_ms < t)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_millis())
    }

    /// Features are only granted by a valid license with a tier.
    pub fn allows(&self, feature: &str, now_ms: i64) -> bool {
        self.is_valid_at(now_ms) && self.tier.is_some() && self.features.iter().any(|f| f == feature)
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        let req = ValidationRequest {
            product_id: "p".into(),
            license_key: "K".into(),
            hwid: "h".into(),
            ip: "10.0.0.1".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["productId"], "p");
        assert_eq!(json["licenseKey"], "K");

        let resp: ValidationResponse = serde_json::from_str(
            r#"{"valid":true,"message":"ok","tier":"Pro","expiryTime":0,"allowedFeatures":["a","b"]}"#,
        )
        .unwrap();
        assert_eq!(resp.allowed_features.as_deref(), Some(&["a".to_string(), "b".to_string()][..]));
    }

    #[test]
    fn test_rejection_omits_optional_fields() {
        let json = serde_json::to_string(&ValidationResponse::rejected(MSG_EXPIRED)).unwrap();
        assert_eq!(json, r#"{"valid":false,"message":"License has expired"}"#);
    }

    #[test]
    fn test_expiry_counts_client_side() {
        let result = ValidationResult::from_response(ValidationResponse {
            valid: true,
            message: MSG_VALID.into(),
            tier: Some("Pro".into()),
            expiry_time: Some(1_000),
            allowed_features: Some(vec!["export".into()]),
        });
        assert!(result.is_valid_at(999));
        assert!(!result.is_valid_at(1_000));
        assert!(result.allows("export", 500));
        assert!(!result.allows("import", 500));
        assert!(!result.allows("export", 2_000));
    }

    #[test]
    fn test_zero_expiry_never_expires() {
        let result = ValidationResult::from_response(ValidationResponse {
            valid: true,
            message: MSG_VALID.into(),
            tier: None,
            expiry_time: Some(0),
            allowed_features: None,
        });
        assert_eq!(result.expiry, None);
        assert!(result.is_valid_at(i64::MAX));
        assert!(!result.allows("anything", 0));
    }
}
