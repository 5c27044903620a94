//! JSON-RPC 2.0 message codec
//!
//! Incoming payloads are classified by their keys rather than by a tag: a
//! non-empty `method` makes a request, otherwise a `result` key makes a
//! result and an `error` key makes an error. Anything else is malformed.

use crate::error::{RpcError, RpcResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Protocol version carried by every message
pub const JSONRPC_VERSION: &str = "2.0";

/// Error code used when an error reply carries none
pub const DEFAULT_ERROR_CODE: i64 = -32000;

/// Reply code for a request naming an unregistered method
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Reply code for a handler that failed or panicked
pub const INTERNAL_ERROR: i64 = -32603;

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

fn default_error_code() -> i64 {
    DEFAULT_ERROR_CODE
}

/// A method invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: String,
}

impl Request {
    /// Build a request with a freshly minted id
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params,
            id: Uuid::new_v4().to_string(),
        }
    }
}

/// A successful reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub result: Value,
    pub id: String,
}

impl Response {
    pub fn new(id: impl Into<String>, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            result,
            id: id.into(),
        }
    }
}

/// Body of an error reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    #[serde(default = "default_error_code")]
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A failed reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub error: ErrorObject,
    #[serde(default)]
    pub id: Option<String>,
}

impl ErrorResponse {
    pub fn new(id: Option<String>, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            error: ErrorObject {
                code,
                message: message.into(),
                data,
            },
            id,
        }
    }
}

/// Any message exchanged on a session topic
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RpcMessage {
    Request(Request),
    Result(Response),
    Error(ErrorResponse),
}

impl RpcMessage {
    /// Decode and classify a raw payload
    pub fn parse(payload: &[u8]) -> RpcResult<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| RpcError::Malformed(format!("payload is not UTF-8: {}", e)))?;
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RpcError::Malformed(format!("invalid JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Classify an already-decoded JSON value
    pub fn from_value(value: Value) -> RpcResult<Self> {
        let Some(object) = value.as_object() else {
            return Err(RpcError::Malformed("top level is not an object".into()));
        };

        let is_request = object
            .get("method")
            .and_then(Value::as_str)
            .is_some_and(|m| !m.is_empty());

        let message = if is_request {
            serde_json::from_value(value).map(RpcMessage::Request)
        } else if object.contains_key("result") {
            serde_json::from_value(value).map(RpcMessage::Result)
        } else if object.contains_key("error") {
            serde_json::from_value(value).map(RpcMessage::Error)
        } else {
            return Err(RpcError::Malformed(
                "message is neither request, result nor error".into(),
            ));
        };

        message.map_err(|e| RpcError::Malformed(e.to_string()))
    }

    /// Encode to the wire form
    pub fn to_bytes(&self) -> RpcResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Correlation id, absent only on some error replies
    pub fn id(&self) -> Option<&str> {
        match self {
            RpcMessage::Request(r) => Some(&r.id),
            RpcMessage::Result(r) => Some(&r.id),
            RpcMessage::Error(e) => e.id.as_deref(),
        }
    }
}

impl From<Request> for RpcMessage {
    fn from(value: Request) -> Self {
        RpcMessage::Request(value)
    }
}

impl From<Response> for RpcMessage {
    fn from(value: Response) -> Self {
        RpcMessage::Result(value)
    }
}

impl From<ErrorResponse> for RpcMessage {
    fn from(value: ErrorResponse) -> Self {
        RpcMessage::Error(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_round_trip() {
        let request = Request::new("ping", json!({"n": 1}));
        assert!(Uuid::parse_str(&request.id).is_ok());

        let message = RpcMessage::from(request.clone());
        let bytes = message.to_bytes().unwrap();
        assert_eq!(RpcMessage::parse(&bytes).unwrap(), message);

        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "ping");
    }

    #[test]
    fn test_result_and_error_round_trip() {
        let result = RpcMessage::from(Response::new("abc", json!({"pong": null})));
        assert_eq!(RpcMessage::parse(&result.to_bytes().unwrap()).unwrap(), result);

        let error = RpcMessage::from(ErrorResponse::new(
            Some("abc".into()),
            INTERNAL_ERROR,
            "Internal error",
            Some(json!("boom")),
        ));
        assert_eq!(RpcMessage::parse(&error.to_bytes().unwrap()).unwrap(), error);
    }

    #[test]
    fn test_classification_defaults() {
        let msg = RpcMessage::parse(br#"{"jsonrpc":"2.0","method":"ping","id":"1"}"#).unwrap();
        match msg {
            RpcMessage::Request(r) => assert_eq!(r.params, Value::Null),
            other => panic!("expected request, got {:?}", other),
        }

        let msg = RpcMessage::parse(br#"{"error":{"message":"nope"}}"#).unwrap();
        match msg {
            RpcMessage::Error(e) => {
                assert_eq!(e.error.code, DEFAULT_ERROR_CODE);
                assert_eq!(e.id, None);
            }
            other => panic!("expected error, got {:?}", other),
        }

        // Empty method falls through to the result check
        let msg = RpcMessage::parse(br#"{"method":"","result":1,"id":"2"}"#).unwrap();
        assert!(matches!(msg, RpcMessage::Result(_)));
    }

    #[test]
    fn test_malformed_payloads() {
        let payloads: [&[u8]; 5] = [
            b"\xff\xfe",
            b"not json",
            b"[1, 2]",
            br#"{"id":"1"}"#,
            br#"{"method":"ping"}"#,
        ];
        for payload in payloads {
            let err = RpcMessage::parse(payload).unwrap_err();
            assert!(matches!(err, RpcError::Malformed(_)), "{:?}", payload);
        }
    }
}
