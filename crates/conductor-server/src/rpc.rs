//! Wire types for the WebSocket JSON-RPC surface.

use serde::{Deserialize, Serialize};

/// Incoming request. `id` is echoed back verbatim so clients can correlate
/// responses with whatever id type they chose.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// Outgoing response: `{ id, success, result?, error? }`. Exactly one of
/// `result` and `error` is present.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<serde_json::Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

/// Machine-readable error codes; serialized as snake_case strings on the
/// wire, never as numbers.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ParseError,
    InvalidParams,
    MethodNotFound,
    SessionNotFound,
    InternalError,
}

impl RpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Unparseable frames have no usable id to echo.
    pub fn parse_error() -> Self {
        Self::error(None, ErrorCode::ParseError, "Parse error")
    }

    pub fn invalid_params(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, ErrorCode::InvalidParams, msg)
    }

    pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> Self {
        Self::error(
            id,
            ErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
        )
    }

    pub fn session_not_found(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, ErrorCode::SessionNotFound, msg)
    }

    pub fn internal_error(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, ErrorCode::InternalError, msg)
    }
}

// Param extraction. Handlers work on loosely typed params objects, so these
// keep the missing-key error message consistent across every method.

pub fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, String> {
    optional_str(params, key).ok_or_else(|| format!("Missing required parameter: {key}"))
}

pub fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(serde_json::Value::as_str)
}

pub fn optional_u64(params: &serde_json::Value, key: &str) -> Option<u64> {
    params.get(key).and_then(serde_json::Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_fields_deserialize() {
        let req: RpcRequest = serde_json::from_str(
            r#"{"method":"session.send","params":{"session_id":"sess_123","text":"hello"},"id":1}"#,
        )
        .unwrap();
        assert_eq!(req.method, "session.send");
        assert!(req.params.is_some());
        assert_eq!(req.id, Some(serde_json::json!(1)));

        let bare: RpcRequest = serde_json::from_str(r#"{"method":"ping"}"#).unwrap();
        assert!(bare.params.is_none());
        assert!(bare.id.is_none());
    }

    #[test]
    fn success_omits_the_error_field() {
        let resp =
            RpcResponse::success(Some(serde_json::json!(1)), serde_json::json!({"ok": true}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn error_codes_serialize_as_snake_case_strings() {
        let cases = [
            (RpcResponse::parse_error(), "parse_error"),
            (RpcResponse::invalid_params(None, "x"), "invalid_params"),
            (
                RpcResponse::method_not_found(None, "foo.bar"),
                "method_not_found",
            ),
            (
                RpcResponse::session_not_found(None, "gone"),
                "session_not_found",
            ),
            (RpcResponse::internal_error(None, "boom"), "internal_error"),
        ];
        for (resp, expected) in cases {
            let json = serde_json::to_value(&resp).unwrap();
            assert_eq!(json["success"], false, "for {expected}");
            assert_eq!(json["error"]["code"], expected);
            assert!(json.get("result").is_none());
        }
    }

    #[test]
    fn method_not_found_names_the_method() {
        let resp = RpcResponse::method_not_found(Some(serde_json::json!(7)), "foo.bar");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["message"], "Method not found: foo.bar");
        assert_eq!(json["id"], 7);
    }

    #[test]
    fn parse_error_carries_no_id() {
        let resp = RpcResponse::parse_error();
        assert!(resp.id.is_none());
        assert_eq!(resp.error.unwrap().code, ErrorCode::ParseError);
    }

    #[test]
    fn param_extraction() {
        let params = serde_json::json!({"name": "test", "count": 5});

        assert_eq!(require_str(&params, "name").unwrap(), "test");
        let missing = require_str(&params, "absent").unwrap_err();
        assert_eq!(missing, "Missing required parameter: absent");
        assert!(require_str(&params, "count").is_err());

        assert_eq!(optional_str(&params, "name"), Some("test"));
        assert_eq!(optional_str(&params, "absent"), None);
        assert_eq!(optional_u64(&params, "count"), Some(5));
        assert_eq!(optional_u64(&params, "absent"), None);
    }
}
