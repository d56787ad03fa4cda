use crate::chunk_store::ChunkStore;
use crate::database::Database;
use crate::model::{ChunkRole, FileMetadata, Sha256Digest, StoredChunk};
use crate::rpc::{
    RpcRequest, RpcResponse, CHUNK_NOT_FOUND, CHUNK_VALIDATION_FAILED, INVALID_PARAMS, METHOD_ANNOUNCE_FILE,
    METHOD_DELETE_CHUNK, METHOD_GET_CHUNK, METHOD_GET_CHUNK_INFO, METHOD_LIST_CHUNKS, METHOD_NOT_FOUND,
    METHOD_PING, METHOD_SEARCH_FILE, METHOD_STORE_CHUNK, STORAGE_ERROR,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Handles the storage side of peer RPC: stores, serves, and lists chunks
/// that other nodes have placed with this one. Grounded on the teacher's
/// `file_storage.rs` local-store operations, wired to length-prefixed
/// JSON-RPC instead of the teacher's direct method calls.
pub struct RpcServer {
    chunk_store: Arc<ChunkStore>,
    database: Arc<Database>,
    peer_uuid: Uuid,
}

impl RpcServer {
    pub fn new(chunk_store: Arc<ChunkStore>, database: Arc<Database>, peer_uuid: Uuid) -> Self {
        Self { chunk_store, database, peer_uuid }
    }

    pub async fn run(self: Arc<Self>, listen_port: u16, cancel: CancellationToken) -> crate::error::DecentralisResult<()> {
        let listener = TcpListener::bind(("0.0.0.0", listen_port))
            .await
            .map_err(|e| crate::error::DecentralisError::PeerCommunication(format!("bind {listen_port}: {e}")))?;
        info!(target: "decentralis::network", "rpc server listening on {listen_port}");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(target: "decentralis::network", "accept failed: {e}");
                            continue;
                        }
                    };
                    let this = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = this.handle_connection(stream).await {
                            warn!(target: "decentralis::network", "connection from {peer_addr} failed: {e}");
                        }
                    });
                }
                _ = cancel.cancelled() => {
                    info!(target: "decentralis::network", "rpc server stopping");
                    return Ok(());
                }
            }
        }
    }

    pub(crate) async fn handle_connection(&self, mut stream: TcpStream) -> crate::error::DecentralisResult<()> {
        let request: RpcRequest = crate::framing::read_json(&mut stream).await?;
        let response = self.dispatch(request).await;
        crate::framing::write_json(&mut stream, &response).await?;
        stream.shutdown().await.ok();
        Ok(())
    }

    async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();
        let result = match request.method.as_str() {
            METHOD_PING => self.handle_ping(),
            METHOD_STORE_CHUNK => self.handle_store_chunk(request.params),
            METHOD_GET_CHUNK => self.handle_get_chunk(request.params),
            METHOD_DELETE_CHUNK => self.handle_delete_chunk(request.params),
            METHOD_GET_CHUNK_INFO => self.handle_get_chunk_info(request.params),
            METHOD_LIST_CHUNKS => self.handle_list_chunks(request.params),
            METHOD_ANNOUNCE_FILE => self.handle_announce_file(request.params),
            METHOD_SEARCH_FILE => self.handle_search_file(request.params),
            other => Err((METHOD_NOT_FOUND, format!("unknown method: {other}"))),
        };
        match result {
            Ok(value) => RpcResponse::ok(id, value),
            Err((code, message)) => RpcResponse::err(id, code, message),
        }
    }

    fn handle_ping(&self) -> Result<Value, (i64, String)> {
        Ok(json!({ "peer_uuid": self.peer_uuid }))
    }

    fn handle_store_chunk(&self, params: Value) -> Result<Value, (i64, String)> {
        #[derive(Deserialize)]
        struct Params {
            owner: Uuid,
            file_uuid: Uuid,
            idx: usize,
            role: ChunkRole,
            sha256: Sha256Digest,
            data_b64: String,
        }
        let p: Params = serde_json::from_value(params).map_err(|e| (INVALID_PARAMS, e.to_string()))?;
        let bytes = BASE64.decode(&p.data_b64).map_err(|e| (INVALID_PARAMS, e.to_string()))?;

        let computed = Sha256Digest::of(&bytes);
        if computed != p.sha256 {
            return Err((CHUNK_VALIDATION_FAILED, "sha256 mismatch".to_string()));
        }

        self.chunk_store
            .store_chunk(p.owner, p.file_uuid, p.idx, &bytes)
            .map_err(|e| (STORAGE_ERROR, e.to_string()))?;

        self.database
            .insert_chunk(&StoredChunk {
                owner_uuid: p.owner,
                file_uuid: p.file_uuid,
                index: p.idx,
                size_bytes: bytes.len(),
                sha256: computed,
                stored_at: Utc::now(),
                role: p.role,
            })
            .map_err(|e| (STORAGE_ERROR, e.to_string()))?;

        Ok(json!({ "ok": true }))
    }

    fn handle_get_chunk(&self, params: Value) -> Result<Value, (i64, String)> {
        #[derive(Deserialize)]
        struct Params {
            owner: Uuid,
            file_uuid: Uuid,
            idx: usize,
        }
        let p: Params = serde_json::from_value(params).map_err(|e| (INVALID_PARAMS, e.to_string()))?;
        let bytes = self
            .chunk_store
            .load_chunk(p.owner, p.file_uuid, p.idx)
            .map_err(|e| (CHUNK_NOT_FOUND, e.to_string()))?;
        let sha256 = Sha256Digest::of(&bytes);
        Ok(json!({ "data_b64": BASE64.encode(&bytes), "sha256": sha256.to_string() }))
    }

    fn handle_delete_chunk(&self, params: Value) -> Result<Value, (i64, String)> {
        #[derive(Deserialize)]
        struct Params {
            owner: Uuid,
            file_uuid: Uuid,
            idx: usize,
        }
        let p: Params = serde_json::from_value(params).map_err(|e| (INVALID_PARAMS, e.to_string()))?;
        self.chunk_store
            .delete_chunk(p.owner, p.file_uuid, p.idx)
            .map_err(|e| (STORAGE_ERROR, e.to_string()))?;
        Ok(json!({ "ok": true }))
    }

    fn handle_get_chunk_info(&self, params: Value) -> Result<Value, (i64, String)> {
        #[derive(Deserialize)]
        struct Params {
            owner: Uuid,
            file_uuid: Uuid,
            idx: usize,
        }
        let p: Params = serde_json::from_value(params).map_err(|e| (INVALID_PARAMS, e.to_string()))?;
        let chunks = self
            .database
            .get_chunks_by_file(p.file_uuid)
            .map_err(|e| (STORAGE_ERROR, e.to_string()))?;
        let chunk = chunks
            .into_iter()
            .find(|c| c.index == p.idx && c.owner_uuid == p.owner)
            .ok_or_else(|| (CHUNK_NOT_FOUND, format!("no chunk {} for file {}", p.idx, p.file_uuid)))?;
        if let Err(e) = self.chunk_store.validate_chunk(chunk.owner_uuid, chunk.file_uuid, chunk.index, &chunk.sha256) {
            return Err((CHUNK_VALIDATION_FAILED, e.to_string()));
        }
        Ok(json!({
            "size": chunk.size_bytes,
            "sha256": chunk.sha256.to_string(),
            "stored_at": chunk.stored_at,
        }))
    }

    fn handle_list_chunks(&self, params: Value) -> Result<Value, (i64, String)> {
        #[derive(Deserialize)]
        struct Params {
            #[allow(dead_code)]
            owner: Uuid,
            file_uuid: Uuid,
        }
        let p: Params = serde_json::from_value(params).map_err(|e| (INVALID_PARAMS, e.to_string()))?;
        let chunks = self
            .database
            .get_chunks_by_file(p.file_uuid)
            .map_err(|e| (STORAGE_ERROR, e.to_string()))?;
        let indices: Vec<usize> = chunks.into_iter().map(|c| c.index).collect();
        Ok(json!({ "indices": indices }))
    }

    fn handle_announce_file(&self, params: Value) -> Result<Value, (i64, String)> {
        let meta: FileMetadata = serde_json::from_value(params).map_err(|e| (INVALID_PARAMS, e.to_string()))?;
        self.database
            .insert_file_metadata(&meta)
            .map_err(|e| (STORAGE_ERROR, e.to_string()))?;
        info!(
            target: "decentralis::network",
            "peer announced file {} ({}) owned by {}", meta.file_uuid, meta.original_name, meta.owner_uuid
        );
        Ok(json!({ "ok": true }))
    }

    fn handle_search_file(&self, params: Value) -> Result<Value, (i64, String)> {
        #[derive(Deserialize)]
        struct Params {
            #[allow(dead_code)]
            owner: Uuid,
            name: String,
        }
        let p: Params = serde_json::from_value(params).map_err(|e| (INVALID_PARAMS, e.to_string()))?;
        // Peers only expose metadata for files they happen to hold locally
        // (as owner or cached copy); this is a best-effort local match, not
        // a network-wide search.
        let matches = self
            .database
            .search_file_metadata_by_name(&p.name)
            .map_err(|e| (STORAGE_ERROR, e.to_string()))?;
        match matches.into_iter().next() {
            Some(meta) => Ok(json!({ "file_uuid": meta.file_uuid, "metadata": meta })),
            None => Ok(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::client::RpcClient;
    use std::time::Duration;

    async fn spawn_server() -> (String, Arc<ChunkStore>, Arc<Database>, CancellationToken) {
        let dir = tempfile::tempdir().unwrap();
        let chunk_store = Arc::new(ChunkStore::new(dir.path()));
        let database = Arc::new(Database::open_in_memory().unwrap());
        let server = Arc::new(RpcServer::new(chunk_store.clone(), database.clone(), Uuid::new_v4()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        if let Ok((stream, _)) = accepted {
                            let server = server.clone();
                            tokio::spawn(async move { let _ = server.handle_connection(stream).await; });
                        }
                    }
                    _ = cancel_clone.cancelled() => return,
                }
            }
        });
        (addr, chunk_store, database, cancel)
    }

    #[tokio::test]
    async fn ping_succeeds() {
        let (addr, _cs, _db, cancel) = spawn_server().await;
        let client = RpcClient::new(Duration::from_secs(1));
        client.ping(&addr).await.unwrap();
        cancel.cancel();
    }

    #[tokio::test]
    async fn store_then_get_chunk_round_trips() {
        let (addr, _cs, _db, cancel) = spawn_server().await;
        let client = RpcClient::new(Duration::from_secs(1));
        let owner = Uuid::new_v4();
        let file = Uuid::new_v4();
        client.store_chunk(&addr, owner, file, 0, ChunkRole::Data, b"hello").await.unwrap();
        let bytes = client.get_chunk(&addr, owner, file, 0).await.unwrap();
        assert_eq!(bytes, b"hello");
        cancel.cancel();
    }

    #[tokio::test]
    async fn get_missing_chunk_errors() {
        let (addr, _cs, _db, cancel) = spawn_server().await;
        let client = RpcClient::new(Duration::from_secs(1));
        let result = client.get_chunk(&addr, Uuid::new_v4(), Uuid::new_v4(), 0).await;
        assert!(result.is_err());
        cancel.cancel();
    }

    #[tokio::test]
    async fn delete_chunk_is_idempotent() {
        let (addr, _cs, _db, cancel) = spawn_server().await;
        let client = RpcClient::new(Duration::from_secs(1));
        let owner = Uuid::new_v4();
        let file = Uuid::new_v4();
        client.delete_chunk(&addr, owner, file, 0).await.unwrap();
        client.delete_chunk(&addr, owner, file, 0).await.unwrap();
        cancel.cancel();
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let (addr, _cs, _db, cancel) = spawn_server().await;
        let mut stream = TcpStream::connect(&addr).await.unwrap();
        let request = RpcRequest::new("bogus_method", json!({}), json!(1));
        crate::framing::write_json(&mut stream, &request).await.unwrap();
        let response: RpcResponse = crate::framing::read_json(&mut stream).await.unwrap();
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
        cancel.cancel();
    }
}
