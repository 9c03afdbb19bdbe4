use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC error codes used in replies.
pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const SERVER_ERROR: i64 = -32000;

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Reply published on `.../<client_id>/reply`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: Value,
    pub result: Value,
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self { id, result, error: None }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self { id, result: Value::Null, error: Some(error) }
    }
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    params: Value,
}

/// A remotely callable method.
#[async_trait]
pub trait RpcMethod: Send + Sync {
    async fn call(&self, params: Value) -> Result<Value, RpcError>;
}

/// Table of RPC methods keyed by `(service, method)`.
///
/// Built once before the server starts and shared read-only afterwards.
#[derive(Default)]
pub struct Dispatcher {
    methods: BTreeMap<(String, String), Arc<dyn RpcMethod>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_method(&mut self, service: &str, method: &str, handler: Arc<dyn RpcMethod>) {
        self.methods
            .insert((service.to_string(), method.to_string()), handler);
    }

    /// Registered `(service, method)` pairs, sorted.
    pub fn keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.methods
            .keys()
            .map(|(service, method)| (service.as_str(), method.as_str()))
    }

    /// Decode a request payload, run the method and build the reply.
    ///
    /// Every failure, including a malformed payload, becomes a JSON-RPC
    /// error object in the reply.
    pub async fn handle(&self, payload: &[u8], service: &str, method: &str) -> RpcResponse {
        let request: RpcRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                return RpcResponse::failure(Value::Null, RpcError::new(PARSE_ERROR, format!("Parse error: {}", e)));
            }
        };

        let handler = match self.methods.get(&(service.to_string(), method.to_string())) {
            Some(handler) => Arc::clone(handler),
            None => {
                return RpcResponse::failure(
                    request.id,
                    RpcError::new(METHOD_NOT_FOUND, format!("Method not found: {}/{}", service, method)),
                );
            }
        };

        debug!("Method '{}' was called", method);
        match handler.call(request.params).await {
            Ok(result) => RpcResponse::success(request.id, result),
            Err(error) => RpcResponse::failure(request.id, error),
        }
    }
}
