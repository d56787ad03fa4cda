/// Chunking manager (spec.md §4.8).
///
/// The central orchestrator: turns a file into encoded chunks, spreads them
/// across peers, and pulls them back together on demand. Grounded on the
/// teacher's `file_storage.rs`/`concurrent_chunks.rs` division of labour
/// (CPU-bound codec work on `spawn_blocking`, I/O awaited directly) even
/// though the concrete operations here replace the teacher's own chunking
/// semantics end to end.
use crate::chunk_store::ChunkStore;
use crate::clock::Clock;
use crate::codec;
use crate::config::Config;
use crate::database::Database;
use crate::error::{DecentralisError, DecentralisResult};
use crate::model::{ChunkLocation, FileMetadata, PeerInfo, Sha256Digest, StoredChunk};
use crate::replication::ReplicationManager;
use crate::resilience::{retry_async, RetryConfig};
use crate::rpc::client::RpcClient;
use crate::tracker::TrackerClient;
use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of one `distribute_chunks` pass: chunks that made it to a peer,
/// and chunks left in local storage after exhausting retries (spec.md §4.8
/// - distribution never raises on a per-chunk failure).
#[derive(Debug, Clone, Default)]
pub struct DistributionReport {
    pub assigned: Vec<(usize, Uuid)>,
    pub left_local: Vec<usize>,
}

/// Point-in-time health of a file, assembled without side effects.
#[derive(Debug, Clone)]
pub struct FileStatus {
    pub file_uuid: Uuid,
    pub required: usize,
    pub total_chunks: usize,
    pub available_local: usize,
    pub available_remote: usize,
    pub reachable: bool,
    pub reconstructable: bool,
    pub degraded: bool,
}

pub struct ChunkingManager {
    config: Config,
    chunk_store: Arc<ChunkStore>,
    database: Arc<Database>,
    rpc_client: Arc<RpcClient>,
    tracker_client: Arc<TrackerClient>,
    replication: Arc<ReplicationManager>,
    clock: Arc<dyn Clock>,
}

impl ChunkingManager {
    pub fn new(
        config: Config,
        chunk_store: Arc<ChunkStore>,
        database: Arc<Database>,
        rpc_client: Arc<RpcClient>,
        tracker_client: Arc<TrackerClient>,
        replication: Arc<ReplicationManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            chunk_store,
            database,
            rpc_client,
            tracker_client,
            replication,
            clock,
        }
    }

    /// Reads `path`, erasure-encodes it, and persists every chunk locally
    /// plus its `FileMetadata`. Idempotent on `(owner, original_name)`: a
    /// prior record under the same name is fully removed first, which is
    /// also the container auto-sync entry point (spec.md §4.10).
    pub async fn chunk_file(&self, path: &Path, owner: Uuid) -> DecentralisResult<Uuid> {
        let original_name = path
            .file_name()
            .ok_or_else(|| DecentralisError::Configuration(format!("{path:?} has no file name")))?
            .to_string_lossy()
            .to_string();

        let data = tokio::fs::read(path).await?;
        let content_hash = Sha256Digest::of(&data);

        if let Some(existing) = self.database.get_file_metadata_by_name(owner, &original_name)? {
            if existing.content_hash == content_hash {
                info!(target: "decentralis::chunking", file_uuid = %existing.file_uuid, "content unchanged, skipping re-chunk");
                return Ok(existing.file_uuid);
            }
            self.remove_file_fully(existing.file_uuid, owner).await?;
        }

        let k = self.config.erasure.k;
        let m = self.config.erasure.m;
        let lrc_group_size = self.config.erasure.lrc_group_size;
        let original_size = data.len() as u64;

        let encoded = tokio::task::spawn_blocking(move || codec::encode(&data, k, m, lrc_group_size))
            .await
            .map_err(|e| DecentralisError::Generic(format!("encode task panicked: {e}")))??;

        let file_uuid = Uuid::new_v4();
        let now = self.clock.now();
        let meta = FileMetadata {
            file_uuid,
            owner_uuid: owner,
            original_name,
            original_size,
            original_sha256: content_hash,
            k,
            m,
            chunk_size: encoded.chunk_size,
            lrc_group_size,
            lrc_groups: encoded.lrc_groups.clone(),
            created_at: now,
            expires_at: now + chrono::Duration::days(self.config.storage.retention_days),
            content_hash,
            chunk_hashes: encoded.chunk_hashes.clone(),
        };

        for (index, chunk) in encoded.chunks.iter().enumerate() {
            let sha256 = self.chunk_store.store_chunk(owner, file_uuid, index, chunk)?;
            self.database.insert_chunk(&StoredChunk {
                owner_uuid: owner,
                file_uuid,
                index,
                size_bytes: chunk.len(),
                sha256,
                stored_at: now,
                role: meta.role_of(index),
            })?;
        }
        self.chunk_store.store_metadata(&meta)?;
        self.database.insert_file_metadata(&meta)?;

        Ok(file_uuid)
    }

    /// Spreads every locally-held chunk of `file_uuid` across the eligible
    /// peer set using round-robin assignment that spreads chunks across
    /// distinct peers before it duplicates one (spec.md §4.8). Per-chunk
    /// failures are retried 3 times with backoff and then left local; the
    /// call itself never fails unless there are no eligible peers at all.
    pub async fn distribute_chunks(&self, file_uuid: Uuid, owner: Uuid) -> DecentralisResult<DistributionReport> {
        let meta = self
            .database
            .get_file_metadata(file_uuid)?
            .ok_or_else(|| DecentralisError::ChunkNotFound(file_uuid.to_string()))?;
        let eligible = self.eligible_peers()?;
        if eligible.is_empty() {
            return Err(DecentralisError::NoPeersAvailable);
        }

        let total = meta.total_chunks();
        let mut assigned_peers: HashSet<Uuid> = HashSet::new();
        let mut report = DistributionReport::default();
        let mut cursor = 0usize;

        for index in 0..total {
            let Some(bytes) = self.chunk_store.try_load_chunk(owner, file_uuid, index) else {
                continue;
            };

            let peer = Self::pick_peer(&eligible, &mut cursor, total, &assigned_peers);
            assigned_peers.insert(peer.peer_uuid);

            let role = meta.role_of(index);
            let address = peer.address();
            let retry_config = RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(8),
                backoff_multiplier: 2.0,
            };
            let result = retry_async(
                || {
                    let client = self.rpc_client.clone();
                    let address = address.clone();
                    let bytes = bytes.clone();
                    let owner = owner;
                    let file_uuid = file_uuid;
                    let index = index;
                    let role = role;
                    async move { client.store_chunk(&address, owner, file_uuid, index, role, &bytes).await }
                },
                retry_config,
                "store_chunk",
            )
            .await;

            match result {
                Ok(()) => {
                    self.record_peer_outcome(peer.peer_uuid, true)?;
                    self.database.upsert_chunk_location(&ChunkLocation {
                        file_uuid,
                        chunk_index: index,
                        peer_uuid: peer.peer_uuid,
                        assigned_at: self.clock.now(),
                        confirmed: true,
                        last_seen_at: self.clock.now(),
                    })?;
                    self.chunk_store.delete_chunk(owner, file_uuid, index)?;
                    report.assigned.push((index, peer.peer_uuid));
                }
                Err(e) => {
                    self.record_peer_outcome(peer.peer_uuid, false)?;
                    warn!(target: "decentralis::chunking", file_uuid = %file_uuid, index, error = %e, "store_chunk exhausted retries, leaving chunk local");
                    report.left_local.push(index);
                }
            }
        }

        Ok(report)
    }

    /// Round-robin with spread-before-duplicate: walk the eligible list from
    /// `cursor`, skipping peers already assigned to this file only while
    /// there are more eligible peers than chunks (so duplication is only
    /// ever a fallback, not the common case).
    fn pick_peer<'a>(eligible: &'a [PeerInfo], cursor: &mut usize, total_chunks: usize, assigned: &HashSet<Uuid>) -> &'a PeerInfo {
        let spread = eligible.len() > total_chunks;
        let mut candidate = *cursor % eligible.len();
        if spread {
            for _ in 0..eligible.len() {
                if !assigned.contains(&eligible[candidate].peer_uuid) {
                    break;
                }
                candidate = (candidate + 1) % eligible.len();
            }
        }
        *cursor = (candidate + 1) % eligible.len();
        &eligible[candidate]
    }

    /// Reassembles `file_uuid` into `output_path`: prefers local chunks,
    /// fetches the rest from confirmed peers in descending reliability
    /// order, and stops fetching as soon as the codec reports reconstruction
    /// is already possible (spec.md §4.8).
    pub async fn reconstruct_file(&self, file_uuid: Uuid, owner: Uuid, output_path: &Path) -> DecentralisResult<()> {
        let meta = self
            .database
            .get_file_metadata(file_uuid)?
            .ok_or_else(|| DecentralisError::ChunkNotFound(file_uuid.to_string()))?;
        let total = meta.total_chunks();
        let mut available: Vec<Option<Vec<u8>>> = vec![None; total];

        for index in 0..total {
            available[index] = self.chunk_store.try_load_chunk(owner, file_uuid, index);
        }

        for index in 0..total {
            if available[index].is_some() {
                continue;
            }
            let present: Vec<bool> = available.iter().map(Option::is_some).collect();
            if codec::can_reconstruct(&meta, &present) {
                break;
            }

            let mut locations = self.database.get_locations_by_chunk(file_uuid, index)?;
            locations.retain(|l| l.confirmed);
            let mut ranked: Vec<(ChunkLocation, f64)> = Vec::new();
            for loc in locations {
                if let Some(peer) = self.database.get_peer(loc.peer_uuid)? {
                    ranked.push((loc, peer.reliability()));
                }
            }
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

            for (loc, _) in ranked {
                let Some(peer) = self.database.get_peer(loc.peer_uuid)? else { continue };
                match self.rpc_client.get_chunk(&peer.address(), owner, file_uuid, index).await {
                    Ok(bytes) if Sha256Digest::of(&bytes) == meta.chunk_hashes[index] => {
                        self.record_peer_outcome(peer.peer_uuid, true)?;
                        available[index] = Some(bytes);
                        break;
                    }
                    Ok(_) => {
                        self.record_peer_outcome(peer.peer_uuid, false)?;
                    }
                    Err(_) => {
                        self.record_peer_outcome(peer.peer_uuid, false)?;
                    }
                }
            }
        }

        let present: Vec<bool> = available.iter().map(Option::is_some).collect();
        if !codec::can_reconstruct(&meta, &present) {
            return Err(DecentralisError::InsufficientChunks(format!(
                "file {file_uuid}: exhausted all known chunk locations"
            )));
        }

        let meta_clone = meta.clone();
        let plaintext = tokio::task::spawn_blocking(move || codec::reconstruct(&meta_clone, available))
            .await
            .map_err(|e| DecentralisError::Generic(format!("reconstruct task panicked: {e}")))??;

        write_atomic_file(output_path, &plaintext).await?;
        Ok(())
    }

    /// Looks up a file's metadata by the name it was stored under.
    pub fn find_by_name(&self, owner: Uuid, name: &str) -> DecentralisResult<Option<FileMetadata>> {
        self.database.get_file_metadata_by_name(owner, name)
    }

    /// Pure read: how much of a file is locally/remotely present and
    /// whether it could currently be reconstructed, with no side effects.
    pub fn get_file_status(&self, file_uuid: Uuid) -> DecentralisResult<FileStatus> {
        let meta = self
            .database
            .get_file_metadata(file_uuid)?
            .ok_or_else(|| DecentralisError::ChunkNotFound(file_uuid.to_string()))?;
        let total = meta.total_chunks();
        let mut local = 0usize;
        let mut remote = 0usize;
        let mut present = Vec::with_capacity(total);

        for index in 0..total {
            let has_local = self.chunk_store.try_load_chunk(meta.owner_uuid, file_uuid, index).is_some();
            let has_remote = self
                .database
                .get_locations_by_chunk(file_uuid, index)?
                .iter()
                .any(|l| l.confirmed);
            if has_local {
                local += 1;
            }
            if has_remote {
                remote += 1;
            }
            present.push(has_local || has_remote);
        }

        let reconstructable = codec::can_reconstruct(&meta, &present);
        let degraded = self.database.count_failed_replication_tasks(file_uuid)? > 0;

        Ok(FileStatus {
            file_uuid,
            required: meta.k,
            total_chunks: total,
            available_local: local,
            available_remote: remote,
            reachable: local > 0 || remote > 0,
            reconstructable,
            degraded,
        })
    }

    /// Spawns the replication sweep (60s), expiry sweep (3600s), and tracker
    /// keepalive worker, all stoppable via `cancel` (spec.md §4.8).
    pub fn start_background_tasks(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let this = self.clone();
        let replication_cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = this.replication.process_pending_relocations().await {
                            warn!(target: "decentralis::chunking", error = %e, "replication sweep failed");
                        }
                    }
                    _ = replication_cancel.cancelled() => return,
                }
            }
        }));

        let this = self.clone();
        let expiry_cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = this.replication.cleanup_expired_chunks().await {
                            warn!(target: "decentralis::chunking", error = %e, "expiry sweep failed");
                        }
                    }
                    _ = expiry_cancel.cancelled() => return,
                }
            }
        }));

        let tracker_client = self.tracker_client.clone();
        handles.push(tracker_client.spawn_keepalive_worker(self.config.keepalive_interval(), cancel.clone()));

        let this = self.clone();
        let peer_refresh_cancel = cancel;
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.keepalive_interval());
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = this.refresh_peer_set().await {
                            warn!(target: "decentralis::chunking", error = %e, "peer-set refresh failed");
                        }
                    }
                    _ = peer_refresh_cancel.cancelled() => return,
                }
            }
        }));

        handles
    }

    /// Pulls the tracker's current peer list and upserts each sighting,
    /// touching `last_seen` without disturbing reliability counters for
    /// peers that merely showed up in the list. Previously-known peers that
    /// are absent from this sighting and already past the loss window are
    /// handed to the replication manager as disconnected (spec.md §4.9).
    async fn refresh_peer_set(&self) -> DecentralisResult<()> {
        let now = self.clock.now();
        let previously_known = self.database.list_peers()?;
        let sightings = self.tracker_client.get_peers().await?;
        let sighted: HashSet<Uuid> = sightings.iter().map(|s| s.uuid).collect();

        for sighting in sightings {
            let mut peer = self
                .database
                .get_peer(sighting.uuid)?
                .unwrap_or_else(|| PeerInfo::new(sighting.uuid, sighting.ip.clone(), sighting.port, now));
            peer.ip = sighting.ip;
            peer.port = sighting.port;
            peer.touch_seen(now);
            self.database.upsert_peer(&peer)?;
        }

        let window = self.loss_window();
        for peer in previously_known {
            if sighted.contains(&peer.peer_uuid) {
                continue;
            }
            if !peer.is_eligible(now, window) {
                if let Err(e) = self.replication.on_peer_disconnected(peer.peer_uuid) {
                    warn!(target: "decentralis::chunking", peer_uuid = %peer.peer_uuid, error = %e, "failed to enqueue relocation for lost peer");
                }
            }
        }
        Ok(())
    }

    /// Stops background tasks, giving in-flight work up to 5s to finish
    /// before the caller proceeds (spec.md §4.8).
    pub async fn shutdown(&self, cancel: CancellationToken, handles: Vec<JoinHandle<()>>) {
        cancel.cancel();
        let grace = tokio::time::sleep(Duration::from_secs(5));
        tokio::pin!(grace);
        let joined = futures::future::join_all(handles);
        tokio::select! {
            _ = joined => {}
            _ = &mut grace => {
                warn!(target: "decentralis::chunking", "background tasks did not stop within the 5s shutdown grace period");
            }
        }
    }

    fn loss_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            self.config.tracker.keepalive_interval_secs as i64 * self.config.tracker.peer_loss_threshold as i64,
        )
    }

    fn eligible_peers(&self) -> DecentralisResult<Vec<PeerInfo>> {
        let now = self.clock.now();
        let window = self.loss_window();
        Ok(self
            .database
            .list_peers()?
            .into_iter()
            .filter(|p| p.is_eligible(now, window))
            .collect())
    }

    /// Records a success/failure against `peer_uuid`'s reliability counters.
    /// A failure that drops reliability below 0.5 is treated as a peer-loss
    /// event and handed to the replication manager the same way an absence
    /// from the tracker's sighting list is (spec.md §4.9).
    fn record_peer_outcome(&self, peer_uuid: Uuid, success: bool) -> DecentralisResult<()> {
        if let Some(mut peer) = self.database.get_peer(peer_uuid)? {
            if success {
                peer.record_success(self.clock.now());
            } else {
                peer.record_failure();
            }
            let reliability = peer.reliability();
            self.database.upsert_peer(&peer)?;
            if !success && reliability < 0.5 {
                if let Err(e) = self.replication.on_peer_disconnected(peer_uuid) {
                    warn!(target: "decentralis::chunking", peer_uuid = %peer_uuid, error = %e, "failed to enqueue relocation for unreliable peer");
                }
            }
        }
        Ok(())
    }

    /// `(file_count, local_chunk_count, foreign_chunk_count)` for `owner`
    /// (spec.md §4.5), exposed for the CLI's status reporting.
    pub fn get_local_stats(&self, owner: Uuid) -> DecentralisResult<crate::database::LocalStats> {
        self.database.get_local_stats(owner)
    }

    /// Removes a file's chunks and metadata everywhere we know about: best-
    /// effort remote deletes followed by the all-or-nothing local subtree
    /// removal, then the database row (spec.md §4.10).
    async fn remove_file_fully(&self, file_uuid: Uuid, owner: Uuid) -> DecentralisResult<()> {
        if let Some(meta) = self.database.get_file_metadata(file_uuid)? {
            for index in 0..meta.total_chunks() {
                for loc in self.database.get_locations_by_chunk(file_uuid, index)? {
                    if let Some(peer) = self.database.get_peer(loc.peer_uuid)? {
                        let _ = self.rpc_client.delete_chunk(&peer.address(), owner, file_uuid, index).await;
                    }
                }
            }
        }
        self.chunk_store.delete_file_chunks(owner, file_uuid)?;
        self.database.delete_file_metadata(file_uuid)?;
        Ok(())
    }
}

async fn write_atomic_file(path: &Path, bytes: &[u8]) -> DecentralisResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::rpc::server::RpcServer;
    use tokio::net::TcpListener;

    async fn spawn_peer_server(database: Arc<Database>) -> (String, Arc<ChunkStore>, CancellationToken) {
        let dir = tempfile::tempdir().unwrap();
        let chunk_store = Arc::new(ChunkStore::new(dir.path()));
        let server = Arc::new(RpcServer::new(chunk_store.clone(), database, Uuid::new_v4()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let cancel = CancellationToken::new();
        let server_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { return };
                        let server = server.clone();
                        tokio::spawn(async move { let _ = server.handle_connection(stream).await; });
                    }
                    _ = server_cancel.cancelled() => return,
                }
            }
        });
        (addr, chunk_store, cancel)
    }

    fn manager_with(config: Config, database: Arc<Database>, tracker_address: String, clock: Arc<dyn Clock>) -> Arc<ChunkingManager> {
        let dir = tempfile::tempdir().unwrap();
        let chunk_store = Arc::new(ChunkStore::new(dir.path()));
        let rpc_client = Arc::new(RpcClient::new(config.call_timeout()));
        let tracker_client = Arc::new(TrackerClient::new(tracker_address, Uuid::new_v4(), "127.0.0.1", config.rpc.listen_port));
        let replication = Arc::new(ReplicationManager::new(chunk_store.clone(), database.clone(), rpc_client.clone(), clock.clone()));
        Arc::new(ChunkingManager::new(config, chunk_store, database, rpc_client, tracker_client, replication, clock))
    }

    #[tokio::test]
    async fn chunk_file_persists_metadata_and_all_chunks_locally() {
        let database = Arc::new(Database::open_in_memory().unwrap());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let mut config = Config::default();
        config.erasure = crate::config::ErasureConfig { k: 2, m: 1, chunk_size: 16, lrc_group_size: 2 };
        let manager = manager_with(config, database.clone(), "127.0.0.1:1".to_string(), clock);

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("report.pdf");
        tokio::fs::write(&input, b"hello world, this is a test file for chunking").await.unwrap();

        let owner = Uuid::new_v4();
        let file_uuid = manager.chunk_file(&input, owner).await.unwrap();

        let meta = database.get_file_metadata(file_uuid).unwrap().unwrap();
        for index in 0..meta.total_chunks() {
            assert!(manager.chunk_store.try_load_chunk(owner, file_uuid, index).is_some());
        }
    }

    #[tokio::test]
    async fn rechunking_same_content_is_a_noop() {
        let database = Arc::new(Database::open_in_memory().unwrap());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let mut config = Config::default();
        config.erasure = crate::config::ErasureConfig { k: 2, m: 1, chunk_size: 16, lrc_group_size: 2 };
        let manager = manager_with(config, database.clone(), "127.0.0.1:1".to_string(), clock);

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("report.pdf");
        tokio::fs::write(&input, b"identical contents").await.unwrap();

        let owner = Uuid::new_v4();
        let first = manager.chunk_file(&input, owner).await.unwrap();
        let second = manager.chunk_file(&input, owner).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn distribute_then_reconstruct_round_trips_via_rpc_peers() {
        let database = Arc::new(Database::open_in_memory().unwrap());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let mut config = Config::default();
        config.erasure = crate::config::ErasureConfig { k: 2, m: 1, chunk_size: 16, lrc_group_size: 2 };
        let manager = manager_with(config, database.clone(), "127.0.0.1:1".to_string(), clock.clone());

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("data.bin");
        tokio::fs::write(&input, b"data that will be erasure coded and spread across peers").await.unwrap();
        let owner = Uuid::new_v4();
        let file_uuid = manager.chunk_file(&input, owner).await.unwrap();

        let meta = database.get_file_metadata(file_uuid).unwrap().unwrap();
        let mut peer_cancels = Vec::new();
        for _ in 0..meta.total_chunks() {
            let (addr, _store, cancel) = spawn_peer_server(database.clone()).await;
            let (ip, port) = addr.rsplit_once(':').unwrap();
            let peer = PeerInfo::new(Uuid::new_v4(), ip.to_string(), port.parse().unwrap(), clock.now());
            database.upsert_peer(&peer).unwrap();
            peer_cancels.push(cancel);
        }

        let report = manager.distribute_chunks(file_uuid, owner).await.unwrap();
        assert_eq!(report.left_local.len(), 0);
        assert_eq!(report.assigned.len(), meta.total_chunks());

        let output = dir.path().join("restored.bin");
        manager.reconstruct_file(file_uuid, owner, &output).await.unwrap();
        let restored = tokio::fs::read(&output).await.unwrap();
        assert_eq!(restored, b"data that will be erasure coded and spread across peers");

        for cancel in peer_cancels {
            cancel.cancel();
        }
    }

    #[tokio::test]
    async fn distribute_without_any_peers_fails() {
        let database = Arc::new(Database::open_in_memory().unwrap());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let mut config = Config::default();
        config.erasure = crate::config::ErasureConfig { k: 2, m: 1, chunk_size: 16, lrc_group_size: 2 };
        let manager = manager_with(config, database.clone(), "127.0.0.1:1".to_string(), clock);

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("x.bin");
        tokio::fs::write(&input, b"no peers around").await.unwrap();
        let owner = Uuid::new_v4();
        let file_uuid = manager.chunk_file(&input, owner).await.unwrap();

        let result = manager.distribute_chunks(file_uuid, owner).await;
        assert!(matches!(result, Err(DecentralisError::NoPeersAvailable)));
    }

    #[tokio::test]
    async fn file_status_reports_fully_local_file_as_reconstructable() {
        let database = Arc::new(Database::open_in_memory().unwrap());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let mut config = Config::default();
        config.erasure = crate::config::ErasureConfig { k: 2, m: 1, chunk_size: 16, lrc_group_size: 2 };
        let manager = manager_with(config, database.clone(), "127.0.0.1:1".to_string(), clock);

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("x.bin");
        tokio::fs::write(&input, b"status check file contents").await.unwrap();
        let owner = Uuid::new_v4();
        let file_uuid = manager.chunk_file(&input, owner).await.unwrap();

        let status = manager.get_file_status(file_uuid).unwrap();
        assert!(status.reconstructable);
        assert!(!status.degraded);
        assert_eq!(status.available_local, status.total_chunks);
    }
}
