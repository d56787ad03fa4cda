/// Data model
///
/// Entities and invariants from spec.md §3, shared by the chunk store,
/// chunk metadata database, chunking manager, and replication manager.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 32-byte SHA-256 digest, hex-encoded at every boundary (CLI, RPC wire,
/// on-disk JSON) the way the teacher hex-encodes its blake3/ECIES keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Digest(pub [u8; 32]);

impl Sha256Digest {
    pub fn of(data: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(data);
        let out = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&out);
        Sha256Digest(bytes)
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Sha256Digest {
    type Err = hex::FromHexError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let mut out = [0u8; 32];
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        out.copy_from_slice(&bytes);
        Ok(Sha256Digest(out))
    }
}

impl TryFrom<String> for Sha256Digest {
    type Error = hex::FromHexError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Sha256Digest> for String {
    fn from(d: Sha256Digest) -> String {
        d.to_string()
    }
}

/// What an index-range within `total_chunks` contains (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkRole {
    Data,
    Parity,
    Lrc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_uuid: uuid::Uuid,
    pub owner_uuid: uuid::Uuid,
    pub original_name: String,
    pub original_size: u64,
    pub original_sha256: Sha256Digest,
    pub k: usize,
    pub m: usize,
    pub chunk_size: usize,
    pub lrc_group_size: usize,
    pub lrc_groups: Vec<Vec<usize>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Hash of the plaintext prior to RS encoding, used to validate reconstruction.
    pub content_hash: Sha256Digest,
    /// Per-chunk SHA-256 recorded at encode time, indexed by chunk index.
    pub chunk_hashes: Vec<Sha256Digest>,
}

impl FileMetadata {
    pub fn total_chunks(&self) -> usize {
        self.k + self.m + self.lrc_groups.len()
    }

    pub fn role_of(&self, index: usize) -> ChunkRole {
        if index < self.k {
            ChunkRole::Data
        } else if index < self.k + self.m {
            ChunkRole::Parity
        } else {
            ChunkRole::Lrc
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub owner_uuid: uuid::Uuid,
    pub file_uuid: uuid::Uuid,
    pub index: usize,
    pub size_bytes: usize,
    pub sha256: Sha256Digest,
    pub stored_at: DateTime<Utc>,
    pub role: ChunkRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkLocation {
    pub file_uuid: uuid::Uuid,
    pub chunk_index: usize,
    pub peer_uuid: uuid::Uuid,
    pub assigned_at: DateTime<Utc>,
    pub confirmed: bool,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_uuid: uuid::Uuid,
    pub ip: String,
    pub port: u16,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Laplace-smoothed: both counters start at 1 (spec.md §3).
    pub success_count: u64,
    pub failure_count: u64,
}

impl PeerInfo {
    pub fn new(peer_uuid: uuid::Uuid, ip: String, port: u16, now: DateTime<Utc>) -> Self {
        Self {
            peer_uuid,
            ip,
            port,
            first_seen: now,
            last_seen: now,
            success_count: 1,
            failure_count: 1,
        }
    }

    pub fn reliability(&self) -> f64 {
        self.success_count as f64 / (self.success_count + self.failure_count) as f64
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.success_count += 1;
        self.last_seen = now;
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
    }

    /// Updates `last_seen` without touching the reliability counters, for
    /// plain tracker-list sightings that aren't themselves an RPC outcome.
    pub fn touch_seen(&mut self, now: DateTime<Utc>) {
        self.last_seen = now;
    }

    /// Eligible for placement iff reliability >= 0.5 and last seen within
    /// `keepalive_window` of `now` (spec.md §3).
    pub fn is_eligible(&self, now: DateTime<Utc>, keepalive_window: chrono::Duration) -> bool {
        self.reliability() >= 0.5 && now - self.last_seen <= keepalive_window
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationState {
    Pending,
    InProgress,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationTask {
    pub file_uuid: uuid::Uuid,
    pub chunk_index: usize,
    pub lost_peer_uuid: uuid::Uuid,
    pub created_at: DateTime<Utc>,
    pub state: ReplicationState,
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_round_trips_through_hex() {
        let digest = Sha256Digest::of(b"hello world");
        let text = digest.to_string();
        let parsed: Sha256Digest = text.parse().unwrap();
        assert_eq!(digest, parsed);
    }

    #[test]
    fn reliability_starts_at_half_with_laplace_smoothing() {
        let peer = PeerInfo::new(uuid::Uuid::new_v4(), "127.0.0.1".into(), 9100, Utc::now());
        assert_eq!(peer.reliability(), 0.5);
    }

    #[test]
    fn reliability_is_monotonic() {
        let mut peer = PeerInfo::new(uuid::Uuid::new_v4(), "127.0.0.1".into(), 9100, Utc::now());
        let before = peer.reliability();
        peer.record_success(Utc::now());
        assert!(peer.reliability() > before);

        let mut peer2 = PeerInfo::new(uuid::Uuid::new_v4(), "127.0.0.1".into(), 9100, Utc::now());
        let before2 = peer2.reliability();
        peer2.record_failure();
        assert!(peer2.reliability() < before2);
    }
}
