/// Replication manager (spec.md §4.9).
///
/// Reacts to lost peers and expired retention windows. Grounded on the
/// teacher's `resilience.rs` retry idiom and its own `database.rs` access
/// patterns; the relocation logic itself has no direct teacher counterpart
/// (datamesh relies on libp2p's DHT replication) and is newly authored in
/// the same style: small, fallible steps that record their outcome rather
/// than unwind the caller.
use crate::chunk_store::ChunkStore;
use crate::clock::Clock;
use crate::database::Database;
use crate::error::DecentralisResult;
use crate::model::{ChunkLocation, ReplicationState, ReplicationTask};
use crate::rpc::client::RpcClient;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct ReplicationManager {
    chunk_store: Arc<ChunkStore>,
    database: Arc<Database>,
    rpc_client: Arc<RpcClient>,
    clock: Arc<dyn Clock>,
}

impl ReplicationManager {
    pub fn new(chunk_store: Arc<ChunkStore>, database: Arc<Database>, rpc_client: Arc<RpcClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            chunk_store,
            database,
            rpc_client,
            clock,
        }
    }

    /// Every chunk this peer held becomes a pending relocation task.
    pub fn on_peer_disconnected(&self, peer_uuid: Uuid) -> DecentralisResult<()> {
        let now = self.clock.now();
        let locations = self.database.get_locations_by_peer(peer_uuid)?;
        for loc in locations {
            self.database.enqueue_replication_task(&ReplicationTask {
                file_uuid: loc.file_uuid,
                chunk_index: loc.chunk_index,
                lost_peer_uuid: peer_uuid,
                created_at: now,
                state: ReplicationState::Pending,
                attempts: 0,
            })?;
        }
        Ok(())
    }

    /// Works through every pending/in-progress relocation task: find a
    /// confirmed copy of the lost chunk, push it to a fresh eligible peer,
    /// and record the outcome. Never raises; failures are left as `failed`
    /// tasks that surface through `FileStatus::degraded`.
    pub async fn process_pending_relocations(&self) -> DecentralisResult<()> {
        let tasks = self.database.get_pending_replication_tasks()?;
        for task in tasks {
            self.database
                .update_replication_task_state(task.file_uuid, task.chunk_index, ReplicationState::InProgress, task.attempts + 1)?;
            match self.relocate(&task).await {
                Ok(new_peer) => {
                    self.database
                        .update_replication_task_state(task.file_uuid, task.chunk_index, ReplicationState::Done, task.attempts + 1)?;
                    self.database.record_replication_outcome(
                        task.file_uuid,
                        task.chunk_index,
                        task.lost_peer_uuid,
                        Some(new_peer),
                        "done",
                        self.clock.now(),
                    )?;
                    info!(
                        target: "decentralis::replication",
                        file_uuid = %task.file_uuid, chunk_index = task.chunk_index, new_peer = %new_peer,
                        "relocated chunk"
                    );
                }
                Err(e) => {
                    self.database
                        .update_replication_task_state(task.file_uuid, task.chunk_index, ReplicationState::Failed, task.attempts + 1)?;
                    self.database.record_replication_outcome(
                        task.file_uuid,
                        task.chunk_index,
                        task.lost_peer_uuid,
                        None,
                        "failed",
                        self.clock.now(),
                    )?;
                    warn!(
                        target: "decentralis::replication",
                        file_uuid = %task.file_uuid, chunk_index = task.chunk_index, error = %e,
                        "relocation failed, file is degraded until a future sweep retries it"
                    );
                }
            }
        }
        Ok(())
    }

    async fn relocate(&self, task: &ReplicationTask) -> DecentralisResult<Uuid> {
        let meta = self
            .database
            .get_file_metadata(task.file_uuid)?
            .ok_or_else(|| crate::error::DecentralisError::ChunkNotFound(task.file_uuid.to_string()))?;

        let holders = self.database.get_locations_by_chunk(task.file_uuid, task.chunk_index)?;
        let mut ranked_holders: Vec<(ChunkLocation, f64)> = Vec::new();
        for loc in &holders {
            if loc.peer_uuid == task.lost_peer_uuid || !loc.confirmed {
                continue;
            }
            if let Some(peer) = self.database.get_peer(loc.peer_uuid)? {
                ranked_holders.push((loc.clone(), peer.reliability()));
            }
        }
        ranked_holders.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut bytes: Option<Vec<u8>> = None;
        for (loc, _) in &ranked_holders {
            let Some(peer) = self.database.get_peer(loc.peer_uuid)? else { continue };
            match self.rpc_client.get_chunk(&peer.address(), meta.owner_uuid, task.file_uuid, task.chunk_index).await {
                Ok(fetched) if chunk_hash_matches(&meta, task.chunk_index, &fetched) => {
                    bytes = Some(fetched);
                    break;
                }
                _ => continue,
            }
        }

        let bytes = match bytes {
            Some(bytes) => bytes,
            None => self.reconstruct_chunk_locally(&meta, task.chunk_index).await?,
        };

        let eligible = self.eligible_replacement_peers(&holders, task.lost_peer_uuid)?;
        let replacement = eligible
            .first()
            .ok_or_else(|| crate::error::DecentralisError::NoPeersAvailable)?;

        self.rpc_client
            .store_chunk(&replacement.address(), meta.owner_uuid, task.file_uuid, task.chunk_index, meta.role_of(task.chunk_index), &bytes)
            .await?;

        self.database.upsert_chunk_location(&ChunkLocation {
            file_uuid: task.file_uuid,
            chunk_index: task.chunk_index,
            peer_uuid: replacement.peer_uuid,
            assigned_at: self.clock.now(),
            confirmed: true,
            last_seen_at: self.clock.now(),
        })?;
        self.database.remove_chunk_location(task.file_uuid, task.chunk_index, task.lost_peer_uuid)?;

        Ok(replacement.peer_uuid)
    }

    /// Rebuilds a single missing chunk by reconstructing the whole plaintext
    /// from whatever other chunks are reachable and re-running the encoder,
    /// used when no confirmed peer still holds a fetchable copy of it.
    async fn reconstruct_chunk_locally(&self, meta: &crate::model::FileMetadata, chunk_index: usize) -> DecentralisResult<Vec<u8>> {
        let total = meta.total_chunks();
        let mut available: Vec<Option<Vec<u8>>> = vec![None; total];
        for idx in 0..total {
            if idx == chunk_index {
                continue;
            }
            if let Some(local) = self.chunk_store.try_load_chunk(meta.owner_uuid, meta.file_uuid, idx) {
                available[idx] = Some(local);
                continue;
            }
            for loc in self.database.get_locations_by_chunk(meta.file_uuid, idx)? {
                if !loc.confirmed {
                    continue;
                }
                let Some(peer) = self.database.get_peer(loc.peer_uuid)? else { continue };
                if let Ok(bytes) = self.rpc_client.get_chunk(&peer.address(), meta.owner_uuid, meta.file_uuid, idx).await {
                    if chunk_hash_matches(meta, idx, &bytes) {
                        available[idx] = Some(bytes);
                        break;
                    }
                }
            }
        }

        let meta_clone = meta.clone();
        let plaintext = tokio::task::spawn_blocking(move || crate::codec::reconstruct(&meta_clone, available))
            .await
            .map_err(|e| crate::error::DecentralisError::Generic(format!("reconstruct task panicked: {e}")))??;

        let re_encoded = crate::codec::encode(&plaintext, meta.k, meta.m, meta.lrc_group_size)?;
        re_encoded
            .chunks
            .into_iter()
            .nth(chunk_index)
            .ok_or_else(|| crate::error::DecentralisError::ChunkDecoding(format!("chunk index {chunk_index} out of range after re-encode")))
    }

    fn eligible_replacement_peers(&self, holders: &[ChunkLocation], lost_peer_uuid: Uuid) -> DecentralisResult<Vec<crate::model::PeerInfo>> {
        let now = self.clock.now();
        let keepalive_window = chrono::Duration::seconds(60);
        let holder_ids: std::collections::HashSet<Uuid> = holders.iter().map(|l| l.peer_uuid).collect();
        let mut peers: Vec<crate::model::PeerInfo> = self
            .database
            .list_peers()?
            .into_iter()
            .filter(|p| p.peer_uuid != lost_peer_uuid && !holder_ids.contains(&p.peer_uuid))
            .filter(|p| p.is_eligible(now, keepalive_window))
            .collect();
        peers.sort_by(|a, b| b.reliability().total_cmp(&a.reliability()));
        Ok(peers)
    }

    /// Removes chunks (and metadata) whose retention window has passed, both
    /// locally and best-effort on whichever remote peers hold them.
    pub async fn cleanup_expired_chunks(&self) -> DecentralisResult<()> {
        let now = self.clock.now();
        let expired = self.database.get_expired_file_metadata(now)?;
        for meta in expired {
            for idx in 0..meta.total_chunks() {
                let locations = self.database.get_locations_by_chunk(meta.file_uuid, idx)?;
                for loc in locations {
                    if let Some(peer) = self.database.get_peer(loc.peer_uuid)? {
                        let _ = self.rpc_client.delete_chunk(&peer.address(), meta.owner_uuid, meta.file_uuid, idx).await;
                    }
                }
            }
            self.chunk_store.delete_file_chunks(meta.owner_uuid, meta.file_uuid)?;
            self.database.delete_file_metadata(meta.file_uuid)?;
            info!(target: "decentralis::replication", file_uuid = %meta.file_uuid, "expired file removed");
        }
        Ok(())
    }
}

fn chunk_hash_matches(meta: &crate::model::FileMetadata, idx: usize, bytes: &[u8]) -> bool {
    meta.chunk_hashes.get(idx) == Some(&crate::model::Sha256Digest::of(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::{FileMetadata, PeerInfo, Sha256Digest};
    use chrono::Utc;
    use std::time::Duration;

    fn sample_meta(owner: Uuid, file: Uuid) -> FileMetadata {
        FileMetadata {
            file_uuid: file,
            owner_uuid: owner,
            original_name: "x.bin".to_string(),
            original_size: 10,
            original_sha256: Sha256Digest::of(b"0123456789"),
            k: 2,
            m: 1,
            chunk_size: 5,
            lrc_group_size: 2,
            lrc_groups: vec![vec![0, 1]],
            created_at: Utc::now(),
            expires_at: Utc::now() - chrono::Duration::days(1),
            content_hash: Sha256Digest::of(b"0123456789"),
            chunk_hashes: vec![Sha256Digest::of(b"aaaaa"), Sha256Digest::of(b"bbbbb"), Sha256Digest::of(b"ccccc")],
        }
    }

    fn manager() -> (ReplicationManager, Arc<Database>, Arc<ChunkStore>) {
        let dir = tempfile::tempdir().unwrap();
        let database = Arc::new(Database::open_in_memory().unwrap());
        let chunk_store = Arc::new(ChunkStore::new(dir.path()));
        let rpc_client = Arc::new(RpcClient::new(Duration::from_millis(200)));
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let manager = ReplicationManager::new(chunk_store.clone(), database.clone(), rpc_client, clock);
        (manager, database, chunk_store)
    }

    #[test]
    fn peer_disconnect_enqueues_one_task_per_held_chunk() {
        let (manager, database, _store) = manager();
        let owner = Uuid::new_v4();
        let file = Uuid::new_v4();
        let meta = sample_meta(owner, file);
        database.insert_file_metadata(&meta).unwrap();
        let peer = Uuid::new_v4();
        database
            .upsert_chunk_location(&ChunkLocation {
                file_uuid: file,
                chunk_index: 0,
                peer_uuid: peer,
                assigned_at: Utc::now(),
                confirmed: true,
                last_seen_at: Utc::now(),
            })
            .unwrap();

        manager.on_peer_disconnected(peer).unwrap();

        let pending = database.get_pending_replication_tasks().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].chunk_index, 0);
    }

    #[tokio::test]
    async fn cleanup_removes_expired_file_and_metadata() {
        let (manager, database, store) = manager();
        let owner = Uuid::new_v4();
        let file = Uuid::new_v4();
        let meta = sample_meta(owner, file);
        database.insert_file_metadata(&meta).unwrap();
        store.store_chunk(owner, file, 0, b"aaaaa").unwrap();

        manager.cleanup_expired_chunks().await.unwrap();

        assert!(database.get_file_metadata(file).unwrap().is_none());
        assert!(store.try_load_chunk(owner, file, 0).is_none());
    }

    #[tokio::test]
    async fn relocation_without_any_holder_or_replacement_marks_task_failed() {
        let (manager, database, _store) = manager();
        let owner = Uuid::new_v4();
        let file = Uuid::new_v4();
        let mut meta = sample_meta(owner, file);
        meta.expires_at = Utc::now() + chrono::Duration::days(30);
        database.insert_file_metadata(&meta).unwrap();
        let lost_peer = Uuid::new_v4();
        database
            .enqueue_replication_task(&ReplicationTask {
                file_uuid: file,
                chunk_index: 0,
                lost_peer_uuid: lost_peer,
                created_at: Utc::now(),
                state: ReplicationState::Pending,
                attempts: 0,
            })
            .unwrap();

        manager.process_pending_relocations().await.unwrap();

        assert_eq!(database.count_failed_replication_tasks(file).unwrap(), 1);
    }
}
