/// On-disk chunk store (spec.md §4.4).
///
/// Grounded on the teacher's file_storage.rs write discipline: every chunk
/// (and the metadata blob beside it) is written to a `.tmp` sibling and
/// `rename`d into place, so a crash mid-write never leaves a half-written
/// chunk visible under its real name.
use crate::error::{DecentralisError, DecentralisResult};
use crate::model::{FileMetadata, Sha256Digest};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: data_dir.into().join("chunks"),
        }
    }

    fn file_dir(&self, owner_uuid: Uuid, file_uuid: Uuid) -> PathBuf {
        self.root.join(owner_uuid.to_string()).join(file_uuid.to_string())
    }

    fn chunk_path(&self, owner_uuid: Uuid, file_uuid: Uuid, index: usize) -> PathBuf {
        self.file_dir(owner_uuid, file_uuid).join(format!("{index}.chunk"))
    }

    fn metadata_path(&self, owner_uuid: Uuid, file_uuid: Uuid) -> PathBuf {
        self.file_dir(owner_uuid, file_uuid).join("metadata.json")
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> DecentralisResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DecentralisError::ChunkStorage(format!("create dir {parent:?}: {e}")))?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)
            .map_err(|e| DecentralisError::ChunkStorage(format!("write {tmp:?}: {e}")))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| DecentralisError::ChunkStorage(format!("rename {tmp:?} -> {path:?}: {e}")))?;
        Ok(())
    }

    /// Writes a chunk's bytes, returning the chunk's SHA-256 digest.
    pub fn store_chunk(&self, owner_uuid: Uuid, file_uuid: Uuid, index: usize, bytes: &[u8]) -> DecentralisResult<Sha256Digest> {
        let path = self.chunk_path(owner_uuid, file_uuid, index);
        Self::write_atomic(&path, bytes)?;
        Ok(Sha256Digest::of(bytes))
    }

    pub fn load_chunk(&self, owner_uuid: Uuid, file_uuid: Uuid, index: usize) -> DecentralisResult<Vec<u8>> {
        let path = self.chunk_path(owner_uuid, file_uuid, index);
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DecentralisError::ChunkNotFound(format!("{owner_uuid}/{file_uuid}/{index}"))
            } else {
                DecentralisError::ChunkStorage(format!("read {path:?}: {e}"))
            }
        })
    }

    pub fn try_load_chunk(&self, owner_uuid: Uuid, file_uuid: Uuid, index: usize) -> Option<Vec<u8>> {
        self.load_chunk(owner_uuid, file_uuid, index).ok()
    }

    /// Re-reads the chunk from disk and compares against `expected`, the
    /// way a corrupt-disk scenario must be caught rather than trusted.
    pub fn validate_chunk(&self, owner_uuid: Uuid, file_uuid: Uuid, index: usize, expected: &Sha256Digest) -> DecentralisResult<()> {
        let bytes = self.load_chunk(owner_uuid, file_uuid, index)?;
        if &Sha256Digest::of(&bytes) != expected {
            return Err(DecentralisError::ChunkValidation(format!(
                "chunk {owner_uuid}/{file_uuid}/{index} hash mismatch"
            )));
        }
        Ok(())
    }

    /// Removes a single chunk file, leaving the rest of the file's chunks
    /// and its metadata untouched.
    pub fn delete_chunk(&self, owner_uuid: Uuid, file_uuid: Uuid, index: usize) -> DecentralisResult<()> {
        let path = self.chunk_path(owner_uuid, file_uuid, index);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DecentralisError::ChunkStorage(format!("remove {path:?}: {e}"))),
        }
    }

    pub fn store_metadata(&self, meta: &FileMetadata) -> DecentralisResult<()> {
        let path = self.metadata_path(meta.owner_uuid, meta.file_uuid);
        let bytes = serde_json::to_vec_pretty(meta)?;
        Self::write_atomic(&path, &bytes)
    }

    pub fn load_metadata(&self, owner_uuid: Uuid, file_uuid: Uuid) -> DecentralisResult<FileMetadata> {
        let path = self.metadata_path(owner_uuid, file_uuid);
        let bytes = std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DecentralisError::ChunkNotFound(format!("metadata for {owner_uuid}/{file_uuid}"))
            } else {
                DecentralisError::ChunkStorage(format!("read {path:?}: {e}"))
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Removes every chunk and the metadata blob for a file in one shot:
    /// the subtree is renamed out of the way before being deleted, so
    /// readers never observe a partially-deleted file.
    pub fn delete_file_chunks(&self, owner_uuid: Uuid, file_uuid: Uuid) -> DecentralisResult<()> {
        let dir = self.file_dir(owner_uuid, file_uuid);
        if !dir.exists() {
            return Ok(());
        }
        let trash = dir.with_extension(format!("deleted-{}", Uuid::new_v4()));
        std::fs::rename(&dir, &trash)
            .map_err(|e| DecentralisError::ChunkStorage(format!("rename {dir:?} -> {trash:?}: {e}")))?;
        std::fs::remove_dir_all(&trash)
            .map_err(|e| DecentralisError::ChunkStorage(format!("remove {trash:?}: {e}")))?;
        Ok(())
    }
}
