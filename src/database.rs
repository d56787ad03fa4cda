/// Chunk metadata database (spec.md §4.5).
///
/// Grounded on the teacher's `database.rs`: a single `rusqlite::Connection`,
/// `CREATE TABLE IF NOT EXISTS` schema setup, `params!`/`query_map` access.
/// Generalized from the teacher's single `files` table to the full
/// file/chunk/location/peer/replication schema this spec needs, and wrapped
/// in a `Mutex` since the chunking and replication managers share one
/// connection across tokio tasks (single-writer/multi-reader discipline).
use crate::error::{DecentralisError, DecentralisResult};
use crate::model::{
    ChunkLocation, ChunkRole, FileMetadata, PeerInfo, ReplicationState, ReplicationTask, Sha256Digest, StoredChunk,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use uuid::Uuid;

const SCHEMA_VERSION: i64 = 1;

pub struct Database {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStats {
    /// Files owned by the queried owner.
    pub file_count: i64,
    /// Chunks physically stored here that belong to the queried owner.
    pub local_chunk_count: i64,
    /// Chunks physically stored here on behalf of other owners (this node
    /// acting as a storage peer for them).
    pub foreign_chunk_count: i64,
}

impl Database {
    pub fn open(path: &Path) -> DecentralisResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Database { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> DecentralisResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> DecentralisResult<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);

             CREATE TABLE IF NOT EXISTS file_metadata (
                 file_uuid TEXT PRIMARY KEY,
                 owner_uuid TEXT NOT NULL,
                 original_name TEXT NOT NULL,
                 original_size INTEGER NOT NULL,
                 original_sha256 TEXT NOT NULL,
                 k INTEGER NOT NULL,
                 m INTEGER NOT NULL,
                 chunk_size INTEGER NOT NULL,
                 lrc_group_size INTEGER NOT NULL,
                 lrc_groups TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 expires_at TEXT NOT NULL,
                 content_hash TEXT NOT NULL,
                 chunk_hashes TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS chunks (
                 file_uuid TEXT NOT NULL,
                 chunk_index INTEGER NOT NULL,
                 owner_uuid TEXT NOT NULL,
                 size_bytes INTEGER NOT NULL,
                 sha256 TEXT NOT NULL,
                 stored_at TEXT NOT NULL,
                 role TEXT NOT NULL,
                 PRIMARY KEY (file_uuid, chunk_index)
             );

             CREATE TABLE IF NOT EXISTS chunk_locations (
                 file_uuid TEXT NOT NULL,
                 chunk_index INTEGER NOT NULL,
                 peer_uuid TEXT NOT NULL,
                 assigned_at TEXT NOT NULL,
                 confirmed INTEGER NOT NULL,
                 last_seen_at TEXT NOT NULL,
                 PRIMARY KEY (file_uuid, chunk_index, peer_uuid)
             );
             CREATE INDEX IF NOT EXISTS idx_locations_peer ON chunk_locations(peer_uuid);

             CREATE TABLE IF NOT EXISTS replication_history (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 file_uuid TEXT NOT NULL,
                 chunk_index INTEGER NOT NULL,
                 lost_peer_uuid TEXT NOT NULL,
                 new_peer_uuid TEXT,
                 outcome TEXT NOT NULL,
                 recorded_at TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS peers (
                 peer_uuid TEXT PRIMARY KEY,
                 ip TEXT NOT NULL,
                 port INTEGER NOT NULL,
                 first_seen TEXT NOT NULL,
                 last_seen TEXT NOT NULL,
                 success_count INTEGER NOT NULL,
                 failure_count INTEGER NOT NULL
             );

             CREATE TABLE IF NOT EXISTS replication_tasks (
                 file_uuid TEXT NOT NULL,
                 chunk_index INTEGER NOT NULL,
                 lost_peer_uuid TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 state TEXT NOT NULL,
                 attempts INTEGER NOT NULL,
                 PRIMARY KEY (file_uuid, chunk_index)
             );",
        )?;

        let version: Option<i64> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .optional()?;
        match version {
            None => {
                conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![SCHEMA_VERSION])?;
            }
            Some(v) if v < SCHEMA_VERSION => {
                conn.execute("UPDATE schema_version SET version = ?1", params![SCHEMA_VERSION])?;
            }
            _ => {}
        }
        Ok(())
    }

    // ---- file_metadata --------------------------------------------------

    pub fn insert_file_metadata(&self, meta: &FileMetadata) -> DecentralisResult<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let lrc_groups = serde_json::to_string(&meta.lrc_groups)?;
        let chunk_hashes: Vec<String> = meta.chunk_hashes.iter().map(|h| h.to_string()).collect();
        let chunk_hashes = serde_json::to_string(&chunk_hashes)?;
        conn.execute(
            "INSERT OR REPLACE INTO file_metadata
             (file_uuid, owner_uuid, original_name, original_size, original_sha256, k, m, chunk_size,
              lrc_group_size, lrc_groups, created_at, expires_at, content_hash, chunk_hashes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                meta.file_uuid.to_string(),
                meta.owner_uuid.to_string(),
                meta.original_name,
                meta.original_size as i64,
                meta.original_sha256.to_string(),
                meta.k as i64,
                meta.m as i64,
                meta.chunk_size as i64,
                meta.lrc_group_size as i64,
                lrc_groups,
                meta.created_at.to_rfc3339(),
                meta.expires_at.to_rfc3339(),
                meta.content_hash.to_string(),
                chunk_hashes,
            ],
        )?;
        Ok(())
    }

    pub fn get_file_metadata(&self, file_uuid: Uuid) -> DecentralisResult<Option<FileMetadata>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.query_row(
            "SELECT file_uuid, owner_uuid, original_name, original_size, original_sha256, k, m, chunk_size,
                    lrc_group_size, lrc_groups, created_at, expires_at, content_hash, chunk_hashes
             FROM file_metadata WHERE file_uuid = ?1",
            params![file_uuid.to_string()],
            row_to_file_metadata,
        )
        .optional()
        .map_err(DecentralisError::from)
    }

    pub fn get_file_metadata_by_name(&self, owner_uuid: Uuid, name: &str) -> DecentralisResult<Option<FileMetadata>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.query_row(
            "SELECT file_uuid, owner_uuid, original_name, original_size, original_sha256, k, m, chunk_size,
                    lrc_group_size, lrc_groups, created_at, expires_at, content_hash, chunk_hashes
             FROM file_metadata WHERE owner_uuid = ?1 AND original_name = ?2",
            params![owner_uuid.to_string(), name],
            row_to_file_metadata,
        )
        .optional()
        .map_err(DecentralisError::from)
    }

    /// Case-insensitive substring search over locally-held file metadata,
    /// regardless of owner. Used by the peer RPC `search_file` method,
    /// which only ever sees what this node happens to hold.
    pub fn search_file_metadata_by_name(&self, query: &str) -> DecentralisResult<Vec<FileMetadata>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = conn.prepare(
            "SELECT file_uuid, owner_uuid, original_name, original_size, original_sha256, k, m, chunk_size,
                    lrc_group_size, lrc_groups, created_at, expires_at, content_hash, chunk_hashes
             FROM file_metadata WHERE original_name LIKE ?1 ESCAPE '\\'",
        )?;
        let rows = stmt.query_map(params![pattern], row_to_file_metadata)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DecentralisError::from)
    }

    pub fn get_expired_file_metadata(&self, now: DateTime<Utc>) -> DecentralisResult<Vec<FileMetadata>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT file_uuid, owner_uuid, original_name, original_size, original_sha256, k, m, chunk_size,
                    lrc_group_size, lrc_groups, created_at, expires_at, content_hash, chunk_hashes
             FROM file_metadata WHERE expires_at <= ?1",
        )?;
        let rows = stmt.query_map(params![now.to_rfc3339()], row_to_file_metadata)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DecentralisError::from)
    }

    pub fn delete_file_metadata(&self, file_uuid: Uuid) -> DecentralisResult<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let id = file_uuid.to_string();
        conn.execute("DELETE FROM file_metadata WHERE file_uuid = ?1", params![id])?;
        conn.execute("DELETE FROM chunks WHERE file_uuid = ?1", params![id])?;
        conn.execute("DELETE FROM chunk_locations WHERE file_uuid = ?1", params![id])?;
        conn.execute("DELETE FROM replication_tasks WHERE file_uuid = ?1", params![id])?;
        Ok(())
    }

    // ---- chunks -----------------------------------------------------------

    pub fn insert_chunk(&self, chunk: &StoredChunk) -> DecentralisResult<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO chunks (file_uuid, chunk_index, owner_uuid, size_bytes, sha256, stored_at, role)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chunk.file_uuid.to_string(),
                chunk.index as i64,
                chunk.owner_uuid.to_string(),
                chunk.size_bytes as i64,
                chunk.sha256.to_string(),
                chunk.stored_at.to_rfc3339(),
                role_to_str(chunk.role),
            ],
        )?;
        Ok(())
    }

    pub fn get_chunks_by_file(&self, file_uuid: Uuid) -> DecentralisResult<Vec<StoredChunk>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT file_uuid, chunk_index, owner_uuid, size_bytes, sha256, stored_at, role
             FROM chunks WHERE file_uuid = ?1 ORDER BY chunk_index",
        )?;
        let rows = stmt.query_map(params![file_uuid.to_string()], row_to_stored_chunk)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DecentralisError::from)
    }

    // ---- chunk_locations ----------------------------------------------

    pub fn upsert_chunk_location(&self, loc: &ChunkLocation) -> DecentralisResult<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "INSERT INTO chunk_locations (file_uuid, chunk_index, peer_uuid, assigned_at, confirmed, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(file_uuid, chunk_index, peer_uuid) DO UPDATE SET
                confirmed = excluded.confirmed, last_seen_at = excluded.last_seen_at",
            params![
                loc.file_uuid.to_string(),
                loc.chunk_index as i64,
                loc.peer_uuid.to_string(),
                loc.assigned_at.to_rfc3339(),
                loc.confirmed as i64,
                loc.last_seen_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_locations_by_chunk(&self, file_uuid: Uuid, chunk_index: usize) -> DecentralisResult<Vec<ChunkLocation>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT file_uuid, chunk_index, peer_uuid, assigned_at, confirmed, last_seen_at
             FROM chunk_locations WHERE file_uuid = ?1 AND chunk_index = ?2",
        )?;
        let rows = stmt.query_map(params![file_uuid.to_string(), chunk_index as i64], row_to_chunk_location)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DecentralisError::from)
    }

    pub fn get_locations_by_peer(&self, peer_uuid: Uuid) -> DecentralisResult<Vec<ChunkLocation>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT file_uuid, chunk_index, peer_uuid, assigned_at, confirmed, last_seen_at
             FROM chunk_locations WHERE peer_uuid = ?1",
        )?;
        let rows = stmt.query_map(params![peer_uuid.to_string()], row_to_chunk_location)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DecentralisError::from)
    }

    pub fn remove_chunk_location(&self, file_uuid: Uuid, chunk_index: usize, peer_uuid: Uuid) -> DecentralisResult<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "DELETE FROM chunk_locations WHERE file_uuid = ?1 AND chunk_index = ?2 AND peer_uuid = ?3",
            params![file_uuid.to_string(), chunk_index as i64, peer_uuid.to_string()],
        )?;
        Ok(())
    }

    // ---- peers -----------------------------------------------------------

    pub fn upsert_peer(&self, peer: &PeerInfo) -> DecentralisResult<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "INSERT INTO peers (peer_uuid, ip, port, first_seen, last_seen, success_count, failure_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(peer_uuid) DO UPDATE SET
                ip = excluded.ip, port = excluded.port, last_seen = excluded.last_seen,
                success_count = excluded.success_count, failure_count = excluded.failure_count",
            params![
                peer.peer_uuid.to_string(),
                peer.ip,
                peer.port as i64,
                peer.first_seen.to_rfc3339(),
                peer.last_seen.to_rfc3339(),
                peer.success_count as i64,
                peer.failure_count as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_peer(&self, peer_uuid: Uuid) -> DecentralisResult<Option<PeerInfo>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.query_row(
            "SELECT peer_uuid, ip, port, first_seen, last_seen, success_count, failure_count
             FROM peers WHERE peer_uuid = ?1",
            params![peer_uuid.to_string()],
            row_to_peer_info,
        )
        .optional()
        .map_err(DecentralisError::from)
    }

    pub fn list_peers(&self) -> DecentralisResult<Vec<PeerInfo>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT peer_uuid, ip, port, first_seen, last_seen, success_count, failure_count FROM peers",
        )?;
        let rows = stmt.query_map([], row_to_peer_info)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DecentralisError::from)
    }

    // ---- replication -------------------------------------------------------

    pub fn enqueue_replication_task(&self, task: &ReplicationTask) -> DecentralisResult<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO replication_tasks (file_uuid, chunk_index, lost_peer_uuid, created_at, state, attempts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                task.file_uuid.to_string(),
                task.chunk_index as i64,
                task.lost_peer_uuid.to_string(),
                task.created_at.to_rfc3339(),
                state_to_str(task.state),
                task.attempts as i64,
            ],
        )?;
        Ok(())
    }

    pub fn count_failed_replication_tasks(&self, file_uuid: Uuid) -> DecentralisResult<i64> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.query_row(
            "SELECT COUNT(*) FROM replication_tasks WHERE file_uuid = ?1 AND state = 'failed'",
            params![file_uuid.to_string()],
            |row| row.get(0),
        )
        .map_err(DecentralisError::from)
    }

    pub fn get_pending_replication_tasks(&self) -> DecentralisResult<Vec<ReplicationTask>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT file_uuid, chunk_index, lost_peer_uuid, created_at, state, attempts
             FROM replication_tasks WHERE state IN ('pending', 'in_progress')",
        )?;
        let rows = stmt.query_map([], row_to_replication_task)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DecentralisError::from)
    }

    pub fn update_replication_task_state(
        &self,
        file_uuid: Uuid,
        chunk_index: usize,
        state: ReplicationState,
        attempts: u32,
    ) -> DecentralisResult<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "UPDATE replication_tasks SET state = ?1, attempts = ?2 WHERE file_uuid = ?3 AND chunk_index = ?4",
            params![state_to_str(state), attempts as i64, file_uuid.to_string(), chunk_index as i64],
        )?;
        Ok(())
    }

    pub fn record_replication_outcome(
        &self,
        file_uuid: Uuid,
        chunk_index: usize,
        lost_peer_uuid: Uuid,
        new_peer_uuid: Option<Uuid>,
        outcome: &str,
        recorded_at: DateTime<Utc>,
    ) -> DecentralisResult<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "INSERT INTO replication_history (file_uuid, chunk_index, lost_peer_uuid, new_peer_uuid, outcome, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                file_uuid.to_string(),
                chunk_index as i64,
                lost_peer_uuid.to_string(),
                new_peer_uuid.map(|u| u.to_string()),
                outcome,
                recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ---- stats -----------------------------------------------------------

    /// `(file_count, local_chunk_count, foreign_chunk_count)` for `owner`
    /// (spec.md §4.5): files the owner has chunked, chunks physically held
    /// here that belong to the owner, and chunks held here on behalf of
    /// other owners (this node acting as a storage peer for them).
    pub fn get_local_stats(&self, owner: Uuid) -> DecentralisResult<LocalStats> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let owner = owner.to_string();
        let file_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM file_metadata WHERE owner_uuid = ?1",
            params![owner],
            |r| r.get(0),
        )?;
        let local_chunk_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE owner_uuid = ?1",
            params![owner],
            |r| r.get(0),
        )?;
        let foreign_chunk_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE owner_uuid != ?1",
            params![owner],
            |r| r.get(0),
        )?;
        Ok(LocalStats {
            file_count,
            local_chunk_count,
            foreign_chunk_count,
        })
    }
}

fn role_to_str(role: ChunkRole) -> &'static str {
    match role {
        ChunkRole::Data => "data",
        ChunkRole::Parity => "parity",
        ChunkRole::Lrc => "lrc",
    }
}

fn role_from_str(s: &str) -> rusqlite::Result<ChunkRole> {
    match s {
        "data" => Ok(ChunkRole::Data),
        "parity" => Ok(ChunkRole::Parity),
        "lrc" => Ok(ChunkRole::Lrc),
        other => Err(rusqlite::Error::InvalidColumnName(format!("unknown chunk role: {other}"))),
    }
}

fn state_to_str(state: ReplicationState) -> &'static str {
    match state {
        ReplicationState::Pending => "pending",
        ReplicationState::InProgress => "in_progress",
        ReplicationState::Done => "done",
        ReplicationState::Failed => "failed",
    }
}

fn state_from_str(s: &str) -> rusqlite::Result<ReplicationState> {
    match s {
        "pending" => Ok(ReplicationState::Pending),
        "in_progress" => Ok(ReplicationState::InProgress),
        "done" => Ok(ReplicationState::Done),
        "failed" => Ok(ReplicationState::Failed),
        other => Err(rusqlite::Error::InvalidColumnName(format!("unknown replication state: {other}"))),
    }
}

fn parse_uuid(s: String) -> rusqlite::Result<Uuid> {
    Uuid::from_str(&s).map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))
}

fn parse_datetime(s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))
}

fn parse_digest(s: String) -> rusqlite::Result<Sha256Digest> {
    Sha256Digest::from_str(&s).map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))
}

fn row_to_file_metadata(row: &rusqlite::Row) -> rusqlite::Result<FileMetadata> {
    let lrc_groups_json: String = row.get(9)?;
    let lrc_groups: Vec<Vec<usize>> = serde_json::from_str(&lrc_groups_json)
        .map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))?;
    let chunk_hashes_json: String = row.get(13)?;
    let chunk_hash_strings: Vec<String> = serde_json::from_str(&chunk_hashes_json)
        .map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))?;
    let chunk_hashes = chunk_hash_strings
        .into_iter()
        .map(parse_digest)
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(FileMetadata {
        file_uuid: parse_uuid(row.get(0)?)?,
        owner_uuid: parse_uuid(row.get(1)?)?,
        original_name: row.get(2)?,
        original_size: row.get::<_, i64>(3)? as u64,
        original_sha256: parse_digest(row.get(4)?)?,
        k: row.get::<_, i64>(5)? as usize,
        m: row.get::<_, i64>(6)? as usize,
        chunk_size: row.get::<_, i64>(7)? as usize,
        lrc_group_size: row.get::<_, i64>(8)? as usize,
        lrc_groups,
        created_at: parse_datetime(row.get(10)?)?,
        expires_at: parse_datetime(row.get(11)?)?,
        content_hash: parse_digest(row.get(12)?)?,
        chunk_hashes,
    })
}

fn row_to_stored_chunk(row: &rusqlite::Row) -> rusqlite::Result<StoredChunk> {
    Ok(StoredChunk {
        file_uuid: parse_uuid(row.get(0)?)?,
        index: row.get::<_, i64>(1)? as usize,
        owner_uuid: parse_uuid(row.get(2)?)?,
        size_bytes: row.get::<_, i64>(3)? as usize,
        sha256: parse_digest(row.get(4)?)?,
        stored_at: parse_datetime(row.get(5)?)?,
        role: role_from_str(&row.get::<_, String>(6)?)?,
    })
}

fn row_to_chunk_location(row: &rusqlite::Row) -> rusqlite::Result<ChunkLocation> {
    Ok(ChunkLocation {
        file_uuid: parse_uuid(row.get(0)?)?,
        chunk_index: row.get::<_, i64>(1)? as usize,
        peer_uuid: parse_uuid(row.get(2)?)?,
        assigned_at: parse_datetime(row.get(3)?)?,
        confirmed: row.get::<_, i64>(4)? != 0,
        last_seen_at: parse_datetime(row.get(5)?)?,
    })
}

fn row_to_peer_info(row: &rusqlite::Row) -> rusqlite::Result<PeerInfo> {
    Ok(PeerInfo {
        peer_uuid: parse_uuid(row.get(0)?)?,
        ip: row.get(1)?,
        port: row.get::<_, i64>(2)? as u16,
        first_seen: parse_datetime(row.get(3)?)?,
        last_seen: parse_datetime(row.get(4)?)?,
        success_count: row.get::<_, i64>(5)? as u64,
        failure_count: row.get::<_, i64>(6)? as u64,
    })
}

fn row_to_replication_task(row: &rusqlite::Row) -> rusqlite::Result<ReplicationTask> {
    Ok(ReplicationTask {
        file_uuid: parse_uuid(row.get(0)?)?,
        chunk_index: row.get::<_, i64>(1)? as usize,
        lost_peer_uuid: parse_uuid(row.get(2)?)?,
        created_at: parse_datetime(row.get(3)?)?,
        state: state_from_str(&row.get::<_, String>(4)?)?,
        attempts: row.get::<_, i64>(5)? as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> FileMetadata {
        FileMetadata {
            file_uuid: Uuid::new_v4(),
            owner_uuid: Uuid::new_v4(),
            original_name: "report.pdf".to_string(),
            original_size: 4096,
            original_sha256: Sha256Digest::of(b"report contents"),
            k: 6,
            m: 4,
            chunk_size: 1024,
            lrc_group_size: 2,
            lrc_groups: vec![vec![0, 1], vec![2, 3], vec![4, 5]],
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::days(30),
            content_hash: Sha256Digest::of(b"report contents"),
            chunk_hashes: (0..10).map(|i| Sha256Digest::of(format!("chunk{i}").as_bytes())).collect(),
        }
    }

    #[test]
    fn file_metadata_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let meta = sample_meta();
        db.insert_file_metadata(&meta).unwrap();
        let loaded = db.get_file_metadata(meta.file_uuid).unwrap().unwrap();
        assert_eq!(loaded.file_uuid, meta.file_uuid);
        assert_eq!(loaded.lrc_groups, meta.lrc_groups);
        assert_eq!(loaded.chunk_hashes, meta.chunk_hashes);
    }

    #[test]
    fn lookup_by_name_finds_file() {
        let db = Database::open_in_memory().unwrap();
        let meta = sample_meta();
        db.insert_file_metadata(&meta).unwrap();
        let loaded = db.get_file_metadata_by_name(meta.owner_uuid, "report.pdf").unwrap();
        assert!(loaded.is_some());
    }

    #[test]
    fn delete_file_metadata_cascades() {
        let db = Database::open_in_memory().unwrap();
        let meta = sample_meta();
        db.insert_file_metadata(&meta).unwrap();
        db.insert_chunk(&StoredChunk {
            owner_uuid: meta.owner_uuid,
            file_uuid: meta.file_uuid,
            index: 0,
            size_bytes: 1024,
            sha256: meta.chunk_hashes[0],
            stored_at: Utc::now(),
            role: ChunkRole::Data,
        })
        .unwrap();

        db.delete_file_metadata(meta.file_uuid).unwrap();
        assert!(db.get_file_metadata(meta.file_uuid).unwrap().is_none());
        assert!(db.get_chunks_by_file(meta.file_uuid).unwrap().is_empty());
    }

    #[test]
    fn peer_upsert_updates_counters() {
        let db = Database::open_in_memory().unwrap();
        let mut peer = PeerInfo::new(Uuid::new_v4(), "10.0.0.1".to_string(), 9100, Utc::now());
        db.upsert_peer(&peer).unwrap();
        peer.record_success(Utc::now());
        db.upsert_peer(&peer).unwrap();

        let loaded = db.get_peer(peer.peer_uuid).unwrap().unwrap();
        assert_eq!(loaded.success_count, 2);
    }

    #[test]
    fn replication_tasks_filter_to_pending_and_in_progress() {
        let db = Database::open_in_memory().unwrap();
        let task = ReplicationTask {
            file_uuid: Uuid::new_v4(),
            chunk_index: 3,
            lost_peer_uuid: Uuid::new_v4(),
            created_at: Utc::now(),
            state: ReplicationState::Pending,
            attempts: 0,
        };
        db.enqueue_replication_task(&task).unwrap();
        db.update_replication_task_state(task.file_uuid, task.chunk_index, ReplicationState::Done, 1)
            .unwrap();

        let pending = db.get_pending_replication_tasks().unwrap();
        assert!(pending.is_empty());
    }

    #[test]
    fn expired_file_metadata_is_found_by_cutoff() {
        let db = Database::open_in_memory().unwrap();
        let mut meta = sample_meta();
        meta.expires_at = Utc::now() - chrono::Duration::days(1);
        db.insert_file_metadata(&meta).unwrap();

        let expired = db.get_expired_file_metadata(Utc::now()).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].file_uuid, meta.file_uuid);
    }

    #[test]
    fn local_stats_reflect_inserted_chunks() {
        let db = Database::open_in_memory().unwrap();
        let meta = sample_meta();
        db.insert_file_metadata(&meta).unwrap();
        db.insert_chunk(&StoredChunk {
            owner_uuid: meta.owner_uuid,
            file_uuid: meta.file_uuid,
            index: 0,
            size_bytes: 1024,
            sha256: meta.chunk_hashes[0],
            stored_at: Utc::now(),
            role: ChunkRole::Data,
        })
        .unwrap();
        let stats = db.get_local_stats(meta.owner_uuid).unwrap();
        assert_eq!(stats.file_count, 1);
        assert_eq!(stats.local_chunk_count, 1);
        assert_eq!(stats.foreign_chunk_count, 0);

        let stats_for_stranger = db.get_local_stats(Uuid::new_v4()).unwrap();
        assert_eq!(stats_for_stranger.file_count, 0);
        assert_eq!(stats_for_stranger.local_chunk_count, 0);
        assert_eq!(stats_for_stranger.foreign_chunk_count, 1);
    }
}
