/// Error Handling
///
/// Flat, semantic error taxonomy for the Decentralis core, mapped directly
/// from the error table in spec.md §7. Each variant is a distinct failure
/// category so callers can match on kind rather than parse strings.
use std::fmt;

#[derive(Debug)]
pub enum DecentralisError {
    /// File system I/O failures.
    Io(String),
    /// RS/LRC encode failures.
    ChunkEncoding(String),
    /// RS/LRC decode or reconstruction failures.
    ChunkDecoding(String),
    /// Too few usable chunks to reconstruct a file.
    InsufficientChunks(String),
    /// A requested chunk does not exist locally or remotely.
    ChunkNotFound(String),
    /// A stored chunk's bytes do not match its recorded hash.
    ChunkValidation(String),
    /// Chunk store (on-disk) operation failed before any partial state was written.
    ChunkStorage(String),
    /// Chunk metadata database failure; the enclosing transaction is rolled back.
    ChunkDatabase(String),
    /// RPC to a peer failed (timeout, dial error, framing/JSON error).
    PeerCommunication(String),
    /// A replication task could not be completed.
    Replication(String),
    /// Passphrase did not decrypt the retention file's verify blob.
    WrongPassphrase,
    /// Startup/config error; fatal.
    Configuration(String),
    /// No eligible peers were available for distribution.
    NoPeersAvailable,
    /// AEAD encryption or decryption failed, or produced invalid data.
    InvalidKeyOrCipher(String),
    /// Serialization/deserialization of wire or on-disk structures failed.
    Serialization(String),
    /// Catch-all for errors that don't merit their own variant.
    Generic(String),
}

impl fmt::Display for DecentralisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecentralisError::Io(e) => write!(f, "I/O error: {e}"),
            DecentralisError::ChunkEncoding(e) => write!(f, "chunk encoding error: {e}"),
            DecentralisError::ChunkDecoding(e) => write!(f, "chunk decoding error: {e}"),
            DecentralisError::InsufficientChunks(e) => write!(f, "insufficient chunks: {e}"),
            DecentralisError::ChunkNotFound(e) => write!(f, "chunk not found: {e}"),
            DecentralisError::ChunkValidation(e) => write!(f, "chunk validation failed: {e}"),
            DecentralisError::ChunkStorage(e) => write!(f, "chunk storage error: {e}"),
            DecentralisError::ChunkDatabase(e) => write!(f, "chunk database error: {e}"),
            DecentralisError::PeerCommunication(e) => write!(f, "peer communication error: {e}"),
            DecentralisError::Replication(e) => write!(f, "replication error: {e}"),
            DecentralisError::WrongPassphrase => write!(f, "wrong passphrase"),
            DecentralisError::Configuration(e) => write!(f, "configuration error: {e}"),
            DecentralisError::NoPeersAvailable => write!(f, "no peers available"),
            DecentralisError::InvalidKeyOrCipher(e) => write!(f, "invalid key or cipher: {e}"),
            DecentralisError::Serialization(e) => write!(f, "serialization error: {e}"),
            DecentralisError::Generic(e) => write!(f, "error: {e}"),
        }
    }
}

impl std::error::Error for DecentralisError {}

impl From<std::io::Error> for DecentralisError {
    fn from(e: std::io::Error) -> Self {
        DecentralisError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for DecentralisError {
    fn from(e: serde_json::Error) -> Self {
        DecentralisError::Serialization(e.to_string())
    }
}

impl From<rusqlite::Error> for DecentralisError {
    fn from(e: rusqlite::Error) -> Self {
        DecentralisError::ChunkDatabase(e.to_string())
    }
}

impl From<reed_solomon_erasure::Error> for DecentralisError {
    fn from(e: reed_solomon_erasure::Error) -> Self {
        DecentralisError::ChunkDecoding(format!("{e:?}"))
    }
}

impl From<hex::FromHexError> for DecentralisError {
    fn from(e: hex::FromHexError) -> Self {
        DecentralisError::Serialization(format!("hex decode error: {e}"))
    }
}

pub type DecentralisResult<T> = Result<T, DecentralisError>;
