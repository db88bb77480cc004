//! Invoke Bridge Envelopes
//!
//! The data shapes exchanged across the native/scripting boundary: a call
//! carries a method name, a serialized parameter payload and a correlation
//! id; a reply carries the same id, a success flag, and either a result
//! payload or an error (message + numeric code).

use serde::{Deserialize, Serialize};

use super::codec::{self, ScriptValue};

/// Domain error codes carried by failure replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed or missing parameters
    Client,
    /// Operation disallowed by policy
    Forbidden,
    /// Unknown method or missing resource
    NotFound,
    /// Unexpected fault during handler execution
    Internal,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        match self {
            ErrorCode::Client => 400,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::Internal => 500,
        }
    }
}

/// Result of a typed parameter lookup on a request payload.
///
/// Handlers branch explicitly on the three cases instead of relying on
/// best-effort type coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum Param<T> {
    Found(T),
    WrongType,
    Missing,
}

impl<T> Param<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Param::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn found_or(self, default: T) -> T {
        match self {
            Param::Found(value) => value,
            _ => default,
        }
    }
}

/// An inbound call crossing the boundary, immutable after construction.
///
/// The payload is decoded once; a malformed payload degrades to an empty
/// parameter set so that individual lookups report `Missing`, pushing
/// validation responsibility to each handler.
#[derive(Debug)]
pub struct InvokeRequest {
    method: String,
    data: String,
    request_id: i64,
    params: ScriptValue,
}

impl InvokeRequest {
    pub fn new(method: impl Into<String>, data: impl Into<String>, request_id: i64) -> Self {
        let data = data.into();
        let params = codec::decode(&data);
        Self {
            method: method.into(),
            data,
            request_id,
            params,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn request_id(&self) -> i64 {
        self.request_id
    }

    /// Raw parameter lookup by key.
    pub fn param(&self, key: &str) -> Param<ScriptValue> {
        match self.params.get(key) {
            Some(value) => Param::Found(value.clone()),
            None => Param::Missing,
        }
    }

    pub fn param_str(&self, key: &str) -> Param<String> {
        match self.params.get(key) {
            Some(ScriptValue::String(s)) => Param::Found(s.clone()),
            Some(_) => Param::WrongType,
            None => Param::Missing,
        }
    }

    pub fn param_int(&self, key: &str) -> Param<i64> {
        match self.params.get(key) {
            Some(ScriptValue::Int(i)) => Param::Found(*i),
            Some(_) => Param::WrongType,
            None => Param::Missing,
        }
    }

    pub fn param_bool(&self, key: &str) -> Param<bool> {
        match self.params.get(key) {
            Some(ScriptValue::Bool(b)) => Param::Found(*b),
            Some(_) => Param::WrongType,
            None => Param::Missing,
        }
    }

    /// Integers widen losslessly to float.
    pub fn param_float(&self, key: &str) -> Param<f64> {
        match self.params.get(key) {
            Some(ScriptValue::Float(f)) => Param::Found(*f),
            Some(ScriptValue::Int(i)) => Param::Found(*i as f64),
            Some(_) => Param::WrongType,
            None => Param::Missing,
        }
    }
}

/// The mutable reply being built for one inbound call.
///
/// Invariant: exactly one of {data, error} is populated at any time;
/// setting one clears the other. `success` starts false, so a handler
/// that signals nothing produces a failure reply.
#[derive(Debug)]
pub struct InvokeResponse {
    request_id: i64,
    success: bool,
    data: String,
    error: String,
    error_code: i32,
}

impl InvokeResponse {
    pub fn new(request_id: i64) -> Self {
        Self {
            request_id,
            success: false,
            data: String::new(),
            error: String::new(),
            error_code: 0,
        }
    }

    pub fn set_success(&mut self, data: impl Into<String>) {
        self.success = true;
        self.data = data.into();
        self.error.clear();
        self.error_code = 0;
    }

    pub fn set_error(&mut self, error: impl Into<String>, code: ErrorCode) {
        self.success = false;
        self.error = error.into();
        self.error_code = code.as_i32();
        self.data.clear();
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn error_code(&self) -> i32 {
        self.error_code
    }

    pub fn request_id(&self) -> i64 {
        self.request_id
    }

    /// Serialize the full reply envelope.
    ///
    /// A `data` payload that itself parses as JSON is embedded as
    /// structured content, otherwise as a string literal, so handlers may
    /// return either raw scalars or pre-built structured payloads.
    pub fn to_json(&self) -> String {
        let mut root = serde_json::Map::new();
        root.insert("requestId".to_string(), serde_json::json!(self.request_id));
        root.insert("success".to_string(), serde_json::json!(self.success));
        if self.success {
            let data = serde_json::from_str::<serde_json::Value>(&self.data)
                .unwrap_or_else(|_| serde_json::Value::String(self.data.clone()));
            root.insert("data".to_string(), data);
        } else {
            root.insert("error".to_string(), serde_json::json!(self.error));
            root.insert("errorCode".to_string(), serde_json::json!(self.error_code));
        }
        serde_json::Value::Object(root).to_string()
    }
}

/// Raw message sent by the scripting-context adapter to the native side.
#[derive(Debug, Clone)]
pub struct BridgeMessage {
    pub method: String,
    pub data: String,
    pub request_id: i64,
}

/// Wire shape for a native-originated call into the scripting context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCall {
    pub method: String,
    pub data: String,
    pub request_id: i64,
}

/// Wire shape of a reply envelope coming back from the scripting context.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEnvelope {
    pub request_id: i64,
    pub success: bool,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<i32>,
}
