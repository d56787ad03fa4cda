/// Tracker client (spec.md §4.6).
///
/// Announces this node and discovers peers over a small TCP/JSON protocol.
/// The background re-announce worker's doubling-delay-on-failure shape is
/// grounded on the teacher's `resilience.rs::retry_async` backoff math,
/// applied across loop iterations instead of within a single call; the rest
/// of this module has no teacher counterpart (datamesh discovers peers
/// through libp2p) and is newly authored in the same idiom.
use crate::error::{DecentralisError, DecentralisResult};
use crate::framing::{read_json, write_json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerAddr {
    pub uuid: Uuid,
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnnounceRequest {
    action: &'static str,
    ip: String,
    port: u16,
    uuid: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GetPeersRequest {
    action: &'static str,
    uuid: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
struct AnnounceResponse {
    #[allow(dead_code)]
    uuid: Option<Uuid>,
    status: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GetPeersResponse {
    peers: Option<Vec<PeerAddr>>,
    error: Option<String>,
}

pub struct TrackerClient {
    address: String,
    peer_uuid: Uuid,
    self_ip: String,
    self_port: u16,
}

impl TrackerClient {
    pub fn new(address: impl Into<String>, peer_uuid: Uuid, self_ip: impl Into<String>, self_port: u16) -> Self {
        Self {
            address: address.into(),
            peer_uuid,
            self_ip: self_ip.into(),
            self_port,
        }
    }

    async fn connect(&self) -> DecentralisResult<TcpStream> {
        TcpStream::connect(&self.address)
            .await
            .map_err(|e| DecentralisError::PeerCommunication(format!("connect to tracker {}: {e}", self.address)))
    }

    /// Announces (or re-announces) this node. The tracker worker calls this
    /// on every keepalive tick; there is no separate keepalive action on the
    /// wire (spec.md §4.6).
    pub async fn announce(&self) -> DecentralisResult<()> {
        let mut stream = self.connect().await?;
        let request = AnnounceRequest {
            action: "announce",
            ip: self.self_ip.clone(),
            port: self.self_port,
            uuid: self.peer_uuid,
        };
        write_json(&mut stream, &request).await?;
        let response: AnnounceResponse = read_json(&mut stream).await?;
        if let Some(message) = response.error {
            return Err(DecentralisError::PeerCommunication(message));
        }
        match response.status.as_deref() {
            Some("ok") => Ok(()),
            other => Err(DecentralisError::PeerCommunication(format!(
                "unexpected announce status: {other:?}"
            ))),
        }
    }

    pub async fn get_peers(&self) -> DecentralisResult<Vec<PeerAddr>> {
        let mut stream = self.connect().await?;
        let request = GetPeersRequest {
            action: "getpeers",
            uuid: self.peer_uuid,
        };
        write_json(&mut stream, &request).await?;
        let response: GetPeersResponse = read_json(&mut stream).await?;
        if let Some(message) = response.error {
            return Err(DecentralisError::PeerCommunication(message));
        }
        Ok(response.peers.unwrap_or_default())
    }

    /// Re-announces every `interval` on success. On failure, backs off
    /// exponentially from 1s (doubling each consecutive failure, capped at
    /// `interval`) instead of waiting a full `interval` before retrying;
    /// the delay resets to 1s as soon as an announce succeeds. Exits within
    /// one wait of cancellation (spec.md §4.6).
    pub fn spawn_keepalive_worker(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        const BASE_DELAY: Duration = Duration::from_secs(1);
        tokio::spawn(async move {
            let mut backoff = BASE_DELAY;
            loop {
                let wait = match self.announce().await {
                    Ok(()) => {
                        info!(target: "decentralis::network", "tracker keepalive ok");
                        backoff = BASE_DELAY;
                        interval
                    }
                    Err(e) => {
                        warn!(target: "decentralis::network", "tracker keepalive failed, retrying in {backoff:?}: {e}");
                        let wait = backoff;
                        backoff = std::cmp::min(backoff.saturating_mul(2), interval);
                        wait
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => {
                        info!(target: "decentralis::network", "tracker keepalive worker stopping");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn spy_tracker() -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let request: serde_json::Value = match read_json(&mut socket).await {
                        Ok(r) => r,
                        Err(_) => return,
                    };
                    let response = match request.get("action").and_then(serde_json::Value::as_str) {
                        Some("announce") => serde_json::json!({ "uuid": request.get("uuid"), "status": "ok" }),
                        Some("getpeers") => serde_json::json!({
                            "peers": [{ "uuid": Uuid::new_v4(), "ip": "127.0.0.1", "port": 9200 }]
                        }),
                        _ => serde_json::json!({ "error": "unknown action" }),
                    };
                    let _ = write_json(&mut socket, &response).await;
                });
            }
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn announce_succeeds() {
        let (addr, _handle) = spy_tracker().await;
        let client = TrackerClient::new(addr, Uuid::new_v4(), "127.0.0.1", 9100);
        client.announce().await.unwrap();
    }

    #[tokio::test]
    async fn get_peers_returns_peer_list() {
        let (addr, _handle) = spy_tracker().await;
        let client = TrackerClient::new(addr, Uuid::new_v4(), "127.0.0.1", 9100);
        let peers = client.get_peers().await.unwrap();
        assert_eq!(peers.len(), 1);
    }

    #[tokio::test]
    async fn connect_failure_is_peer_communication_error() {
        let client = TrackerClient::new("127.0.0.1:1", Uuid::new_v4(), "127.0.0.1", 9100);
        let result = client.announce().await;
        assert!(matches!(result, Err(DecentralisError::PeerCommunication(_))));
    }
}
