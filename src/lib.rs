// Core Storage and File Management
pub mod chunk_store; // On-disk chunk storage with atomic write discipline
pub mod chunking_manager; // Central orchestrator: chunk_file/distribute_chunks/reconstruct_file
pub mod codec; // Reed-Solomon + LRC erasure codec
pub mod replication; // Peer-loss and retention-expiry replication

// Network and Peer Communication
pub mod framing; // Length-prefixed JSON framing shared by tracker + RPC
pub mod rpc; // Peer RPC client/server (JSON-RPC 2.0)
pub mod tracker; // Tracker client: announce/getpeers, keepalive worker

// Security and Cryptography
pub mod cipher; // AEAD file cipher (AES-256-GCM / ChaCha20-Poly1305)
pub mod keystore; // PBKDF2-derived retention record

// System Configuration and Management
pub mod config; // Configuration loading, defaults, env overrides
pub mod database; // Chunk metadata database (rusqlite)
pub mod logging; // Structured logging setup

// Shared Foundations
pub mod clock; // Injectable time source
pub mod error; // Error taxonomy
pub mod model; // Entities shared across modules
pub mod resilience; // Retry with exponential backoff

// Command Line Interface
pub mod cli;
