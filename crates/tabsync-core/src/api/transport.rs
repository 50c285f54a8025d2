//! Transport seam between the core and the platform's REST API.
//!
//! The core only ever sees an [`Envelope`]; how the request travels
//! (HTTP, a test double, ...) is the transport's business.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{ApiError, DEFAULT_REJECTION_MESSAGE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One call against the platform API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub endpoint: String,
    pub params: Map<String, Value>,
}

impl ApiRequest {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            endpoint: endpoint.into(),
            params: Map::new(),
        }
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            endpoint: endpoint.into(),
            params: Map::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// Homogeneous response shape of every platform endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }

    /// Collapse the envelope into typed data.
    /// `success = false` becomes [`ApiError::Rejected`] with the message untouched.
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        if !self.success {
            return Err(ApiError::Rejected(
                self.message
                    .unwrap_or_else(|| DEFAULT_REJECTION_MESSAGE.to_string()),
            ));
        }
        let data = self
            .data
            .ok_or_else(|| ApiError::InvalidResponse("envelope has no data".to_string()))?;
        serde_json::from_value(data).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Like [`Envelope::into_data`] for calls whose payload does not matter.
    pub fn into_unit(self) -> Result<(), ApiError> {
        if self.success {
            Ok(())
        } else {
            Err(ApiError::Rejected(
                self.message
                    .unwrap_or_else(|| DEFAULT_REJECTION_MESSAGE.to_string()),
            ))
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: &ApiRequest) -> Result<Envelope, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_builder() {
        let req = ApiRequest::get("contributors/search")
            .param("q", "ann")
            .param("limit", 10);
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.params["q"], json!("ann"));
        assert_eq!(req.params["limit"], json!(10));
    }

    #[test]
    fn test_envelope_parses_without_optional_fields() {
        let env: Envelope = serde_json::from_str(r#"{"success": false}"#).unwrap();
        assert!(!env.success);
        assert!(env.data.is_none());
        assert!(env.message.is_none());
    }

    #[test]
    fn test_into_data_success() {
        let env = Envelope::ok(json!([1, 2, 3]));
        let data: Vec<i32> = env.into_data().unwrap();
        assert_eq!(data, vec![1, 2, 3]);
    }

    #[test]
    fn test_into_data_rejected_keeps_message() {
        let env = Envelope::rejected("Session expired");
        match env.into_data::<Vec<i32>>() {
            Err(ApiError::Rejected(msg)) => assert_eq!(msg, "Session expired"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_into_data_missing_or_malformed() {
        let missing = Envelope {
            success: true,
            ..Default::default()
        };
        assert!(matches!(
            missing.into_data::<Vec<i32>>(),
            Err(ApiError::InvalidResponse(_))
        ));

        let malformed = Envelope::ok(json!({"not": "a list"}));
        assert!(matches!(
            malformed.into_data::<Vec<i32>>(),
            Err(ApiError::InvalidResponse(_))
        ));
    }
}
