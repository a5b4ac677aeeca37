//! Request and response envelopes shared by every transport.
//!
//! ```json
//! → {"id": 7, "method": "semantic_search", "params": {"dataset_id": "ds1", "query": "refunds"}}
//! ← {"id": 7, "success": true, "result": {"results": [...]}}
//! ← {"id": 7, "success": false, "error": {"kind": "NotFound", "message": "...", "retriable": false}}
//! ```
//!
//! The `id` is opaque and echoed back unchanged; transports use it to match
//! responses that complete out of order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, ErrorKind};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    pub retriable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&ApiError> for ErrorBody {
    fn from(err: &ApiError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retriable: err.retriable(),
            details: err.details().cloned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub id: Value,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: &ApiError) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn from_result(id: Value, result: Result<Value, ApiError>) -> Self {
        match result {
            Ok(value) => Self::ok(id, value),
            Err(e) => Self::err(id, &e),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"id":null,"success":false,"error":{{"kind":"Transient","message":"failed to encode response: {}","retriable":true}}}}"#,
                e
            )
        })
    }
}

/// Decodes one request frame. Undecodable input yields the error response
/// to send back, with a null id since none could be read.
pub fn decode_request(text: &str) -> Result<Request, Response> {
    serde_json::from_str::<Request>(text).map_err(|e| {
        Response::err(
            Value::Null,
            &ApiError::invalid(format!("malformed request: {}", e)),
        )
    })
}

/// [`decode_request`] for binary frames, which must hold UTF-8 text.
pub fn decode_request_bytes(bytes: &[u8]) -> Result<Request, Response> {
    match std::str::from_utf8(bytes) {
        Ok(text) => decode_request(text),
        Err(e) => Err(Response::err(
            Value::Null,
            &ApiError::invalid(format!("frame is not valid UTF-8: {}", e)),
        )),
    }
}
