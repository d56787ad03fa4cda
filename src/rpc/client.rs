use crate::error::{DecentralisError, DecentralisResult};
use crate::model::{ChunkRole, Sha256Digest};
use crate::rpc::{
    RpcRequest, RpcResponse, METHOD_ANNOUNCE_FILE, METHOD_DELETE_CHUNK, METHOD_GET_CHUNK, METHOD_GET_CHUNK_INFO,
    METHOD_LIST_CHUNKS, METHOD_PING, METHOD_SEARCH_FILE, METHOD_STORE_CHUNK,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use uuid::Uuid;

/// What `get_chunk_info` reports for a single remote chunk (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct RemoteChunkInfo {
    pub size: usize,
    pub sha256: Sha256Digest,
    pub stored_at: DateTime<Utc>,
}

/// Calls a peer's RPC surface with a per-call deadline. One connection per
/// call, matching the server's one-request-per-connection discipline
/// (spec.md §4.7).
pub struct RpcClient {
    timeout: Duration,
}

impl RpcClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn call(&self, address: &str, method: &str, params: Value) -> DecentralisResult<Value> {
        let fut = async {
            let mut stream = TcpStream::connect(address)
                .await
                .map_err(|e| DecentralisError::PeerCommunication(format!("connect to {address}: {e}")))?;
            let request = RpcRequest::new(method, params, json!(1));
            crate::framing::write_json(&mut stream, &request).await?;
            let response: RpcResponse = crate::framing::read_json(&mut stream).await?;
            match (response.result, response.error) {
                (Some(result), None) => Ok(result),
                (None, Some(err)) => Err(DecentralisError::PeerCommunication(format!(
                    "{address} {method}: [{}] {}",
                    err.code, err.message
                ))),
                _ => Err(DecentralisError::PeerCommunication(format!(
                    "{address} {method}: malformed response"
                ))),
            }
        };

        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(DecentralisError::PeerCommunication(format!(
                "{address} {method} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    pub async fn ping(&self, address: &str) -> DecentralisResult<()> {
        self.call(address, METHOD_PING, json!({})).await?;
        Ok(())
    }

    pub async fn store_chunk(
        &self,
        address: &str,
        owner: Uuid,
        file_uuid: Uuid,
        idx: usize,
        role: ChunkRole,
        bytes: &[u8],
    ) -> DecentralisResult<()> {
        self.call(
            address,
            METHOD_STORE_CHUNK,
            json!({
                "owner": owner,
                "file_uuid": file_uuid,
                "idx": idx,
                "role": role,
                "sha256": Sha256Digest::of(bytes).to_string(),
                "data_b64": BASE64.encode(bytes),
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn get_chunk(&self, address: &str, owner: Uuid, file_uuid: Uuid, idx: usize) -> DecentralisResult<Vec<u8>> {
        let result = self
            .call(address, METHOD_GET_CHUNK, json!({ "owner": owner, "file_uuid": file_uuid, "idx": idx }))
            .await?;
        let data_b64 = result
            .get("data_b64")
            .and_then(Value::as_str)
            .ok_or_else(|| DecentralisError::PeerCommunication("get_chunk response missing data_b64".to_string()))?;
        let bytes = BASE64
            .decode(data_b64)
            .map_err(|e| DecentralisError::PeerCommunication(e.to_string()))?;

        if let Some(expected) = result.get("sha256").and_then(Value::as_str) {
            if Sha256Digest::of(&bytes).to_string() != expected {
                return Err(DecentralisError::ChunkValidation(format!(
                    "{address} returned chunk {idx} with mismatched sha256"
                )));
            }
        }
        Ok(bytes)
    }

    pub async fn delete_chunk(&self, address: &str, owner: Uuid, file_uuid: Uuid, idx: usize) -> DecentralisResult<()> {
        self.call(address, METHOD_DELETE_CHUNK, json!({ "owner": owner, "file_uuid": file_uuid, "idx": idx }))
            .await?;
        Ok(())
    }

    pub async fn get_chunk_info(&self, address: &str, owner: Uuid, file_uuid: Uuid, idx: usize) -> DecentralisResult<RemoteChunkInfo> {
        let result = self
            .call(address, METHOD_GET_CHUNK_INFO, json!({ "owner": owner, "file_uuid": file_uuid, "idx": idx }))
            .await?;
        serde_json::from_value::<RemoteChunkInfoWire>(result)
            .map(RemoteChunkInfoWire::into_info)
            .map_err(DecentralisError::from)
    }

    pub async fn list_chunks(&self, address: &str, owner: Uuid, file_uuid: Uuid) -> DecentralisResult<Vec<usize>> {
        let result = self
            .call(address, METHOD_LIST_CHUNKS, json!({ "owner": owner, "file_uuid": file_uuid }))
            .await?;
        let indices = result
            .get("indices")
            .cloned()
            .ok_or_else(|| DecentralisError::PeerCommunication("list_chunks response missing indices".to_string()))?;
        serde_json::from_value(indices).map_err(DecentralisError::from)
    }

    pub async fn announce_file(&self, address: &str, metadata: &crate::model::FileMetadata) -> DecentralisResult<()> {
        let params = serde_json::to_value(metadata)?;
        self.call(address, METHOD_ANNOUNCE_FILE, params).await?;
        Ok(())
    }

    pub async fn search_file(&self, address: &str, owner: Uuid, name: &str) -> DecentralisResult<Option<crate::model::FileMetadata>> {
        let result = self
            .call(address, METHOD_SEARCH_FILE, json!({ "owner": owner, "name": name }))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let metadata = result
            .get("metadata")
            .cloned()
            .ok_or_else(|| DecentralisError::PeerCommunication("search_file response missing metadata".to_string()))?;
        Ok(Some(serde_json::from_value(metadata)?))
    }
}

#[derive(serde::Deserialize)]
struct RemoteChunkInfoWire {
    size: usize,
    sha256: Sha256Digest,
    stored_at: DateTime<Utc>,
}

impl RemoteChunkInfoWire {
    fn into_info(self) -> RemoteChunkInfo {
        RemoteChunkInfo {
            size: self.size,
            sha256: self.sha256,
            stored_at: self.stored_at,
        }
    }
}
