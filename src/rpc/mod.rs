/// Peer RPC wire types (spec.md §4.7): length-prefixed JSON-RPC 2.0 over
/// TCP, one request/response pair per connection. Error codes follow the
/// JSON-RPC spec's reserved range plus the `-32000..-32099` server-error
/// band spec.md §4.7 reserves for peer-specific failures.
pub mod client;
pub mod server;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const CHUNK_NOT_FOUND: i64 = -32000;
pub const CHUNK_VALIDATION_FAILED: i64 = -32001;
pub const STORAGE_ERROR: i64 = -32002;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The method surface a peer exposes (spec.md §4.7).
pub const METHOD_PING: &str = "ping";
pub const METHOD_STORE_CHUNK: &str = "store_chunk";
pub const METHOD_GET_CHUNK: &str = "get_chunk";
pub const METHOD_DELETE_CHUNK: &str = "delete_chunk";
pub const METHOD_GET_CHUNK_INFO: &str = "get_chunk_info";
pub const METHOD_LIST_CHUNKS: &str = "list_chunks";
pub const METHOD_ANNOUNCE_FILE: &str = "announce_file";
pub const METHOD_SEARCH_FILE: &str = "search_file";
