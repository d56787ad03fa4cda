/// Binary entry point (spec.md §6): parses the CLI, wires the storage,
/// network, and replication collaborators together, and maps every failure
/// onto the three documented exit codes.
use clap::Parser;
use decentralis_core::chunk_store::ChunkStore;
use decentralis_core::chunking_manager::ChunkingManager;
use decentralis_core::cipher::CipherAlgorithm;
use decentralis_core::cli::{Cli, Commands};
use decentralis_core::clock::SystemClock;
use decentralis_core::config::Config;
use decentralis_core::database::Database;
use decentralis_core::error::{DecentralisError, DecentralisResult};
use decentralis_core::keystore::{self, RetentionRecord};
use decentralis_core::logging;
use decentralis_core::replication::ReplicationManager;
use decentralis_core::rpc::client::RpcClient;
use decentralis_core::rpc::server::RpcServer;
use decentralis_core::tracker::TrackerClient;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Identity {
    owner_uuid: Uuid,
    peer_uuid: Uuid,
}

impl Identity {
    fn load_or_create(data_dir: &Path) -> DecentralisResult<Self> {
        let path = data_dir.join("identity.json");
        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text).map_err(DecentralisError::from)
        } else {
            std::fs::create_dir_all(data_dir)?;
            let identity = Identity {
                owner_uuid: Uuid::new_v4(),
                peer_uuid: Uuid::new_v4(),
            };
            std::fs::write(&path, serde_json::to_string_pretty(&identity)?)?;
            Ok(identity)
        }
    }
}

fn key_path(data_dir: &Path) -> PathBuf {
    data_dir.join("key.json")
}

fn load_retention(data_dir: &Path) -> DecentralisResult<RetentionRecord> {
    let text = std::fs::read_to_string(key_path(data_dir)).map_err(|_| {
        DecentralisError::Configuration("no retention record found, run `init` first".to_string())
    })?;
    serde_json::from_str(&text).map_err(DecentralisError::from)
}

fn read_passphrase(given: Option<String>) -> DecentralisResult<String> {
    if let Some(p) = given {
        return Ok(p);
    }
    eprint!("passphrase: ");
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map_err(DecentralisError::from)?;
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging_safe(cli.debug);

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(%err, "command failed");
            eprintln!("error: {err}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &DecentralisError) -> i32 {
    match err {
        DecentralisError::Configuration(_)
        | DecentralisError::WrongPassphrase
        | DecentralisError::ChunkNotFound(_)
        | DecentralisError::InsufficientChunks(_)
        | DecentralisError::NoPeersAvailable
        | DecentralisError::ChunkValidation(_)
        | DecentralisError::InvalidKeyOrCipher(_) => 1,
        _ => 2,
    }
}

async fn run(cli: Cli) -> DecentralisResult<()> {
    match cli.command {
        Commands::Init { passphrase, cipher } => cmd_init(cli.config, passphrase, cipher.into()).await,
        Commands::Put { path, passphrase, name } => cmd_put(cli.config, path, passphrase, name).await,
        Commands::Distribute { name } => cmd_distribute(cli.config, name).await,
        Commands::Get { name, output, passphrase } => cmd_get(cli.config, name, output, passphrase).await,
        Commands::Status { name } => cmd_status(cli.config, name).await,
        Commands::Serve => cmd_serve(cli.config).await,
        Commands::Sync => cmd_sync(cli.config).await,
    }
}

fn container_path(data_dir: &Path) -> PathBuf {
    data_dir.join("storage").join("container.dat")
}

async fn cmd_init(config_path: Option<PathBuf>, passphrase: Option<String>, cipher: CipherAlgorithm) -> DecentralisResult<()> {
    let config = Config::load_or_default(config_path.clone())?;
    config.validate()?;
    std::fs::create_dir_all(&config.storage.data_dir)?;

    let passphrase = read_passphrase(passphrase)?;
    let (_key, record) = keystore::generate_retention(&passphrase, cipher, None)?;
    std::fs::write(key_path(&config.storage.data_dir), serde_json::to_string_pretty(&record)?)?;

    let saved_config_path = config_path.unwrap_or_else(|| config.storage.data_dir.join("config.toml"));
    config.save(&saved_config_path)?;

    let identity = Identity::load_or_create(&config.storage.data_dir)?;
    println!("initialised vault at {:?} (peer {})", config.storage.data_dir, identity.peer_uuid);
    Ok(())
}

struct Collaborators {
    config: Config,
    identity: Identity,
    chunking: Arc<ChunkingManager>,
}

fn build_collaborators(config_path: Option<PathBuf>) -> DecentralisResult<Collaborators> {
    let config = Config::load_or_default(config_path)?;
    config.validate()?;
    std::fs::create_dir_all(&config.storage.data_dir)?;

    let identity = Identity::load_or_create(&config.storage.data_dir)?;
    let chunk_store = Arc::new(ChunkStore::new(config.storage.data_dir.clone()));
    let database = Arc::new(Database::open(&config.storage.data_dir.join("chunk_metadata.db"))?);
    let rpc_client = Arc::new(RpcClient::new(config.call_timeout()));
    let tracker_client = Arc::new(TrackerClient::new(
        config.tracker.address.clone(),
        identity.peer_uuid,
        "127.0.0.1",
        config.rpc.listen_port,
    ));
    let clock = Arc::new(SystemClock);
    let replication = Arc::new(ReplicationManager::new(
        chunk_store.clone(),
        database.clone(),
        rpc_client.clone(),
        clock.clone(),
    ));
    let chunking = Arc::new(ChunkingManager::new(
        config.clone(),
        chunk_store,
        database,
        rpc_client,
        tracker_client,
        replication,
        clock,
    ));

    Ok(Collaborators { config, identity, chunking })
}

async fn cmd_put(config_path: Option<PathBuf>, path: PathBuf, passphrase: Option<String>, name: Option<String>) -> DecentralisResult<()> {
    let collaborators = build_collaborators(config_path)?;
    let record = load_retention(&collaborators.config.storage.data_dir)?;
    let passphrase = read_passphrase(passphrase)?;
    let key = decentralis_core::cipher::FileKey::from_hex(&keystore::verify_passphrase(&passphrase, &record)?)?;

    let plaintext = tokio::fs::read(&path).await?;
    let ciphertext = decentralis_core::cipher::encrypt(record.algorithm, &key, &plaintext)?;

    let staged_name = name.unwrap_or_else(|| path.file_name().unwrap().to_string_lossy().into_owned());
    let staged_path = std::env::temp_dir().join(format!("decentralis-put-{}", Uuid::new_v4()));
    tokio::fs::write(&staged_path, &ciphertext).await?;
    let renamed = staged_path.with_file_name(staged_name);
    tokio::fs::rename(&staged_path, &renamed).await?;

    let result = collaborators.chunking.chunk_file(&renamed, collaborators.identity.owner_uuid).await;
    let _ = tokio::fs::remove_file(&renamed).await;

    let file_uuid = result?;
    println!("stored {file_uuid}");
    Ok(())
}

async fn cmd_distribute(config_path: Option<PathBuf>, name: String) -> DecentralisResult<()> {
    let collaborators = build_collaborators(config_path)?;
    let file_uuid = resolve_name(&collaborators, &name)?;
    let report = collaborators.chunking.distribute_chunks(file_uuid, collaborators.identity.owner_uuid).await?;
    println!("assigned {} chunk(s) to peers, {} left local", report.assigned.len(), report.left_local.len());
    Ok(())
}

async fn cmd_get(config_path: Option<PathBuf>, name: String, output: PathBuf, passphrase: Option<String>) -> DecentralisResult<()> {
    let collaborators = build_collaborators(config_path)?;
    let record = load_retention(&collaborators.config.storage.data_dir)?;
    let passphrase = read_passphrase(passphrase)?;
    let key = decentralis_core::cipher::FileKey::from_hex(&keystore::verify_passphrase(&passphrase, &record)?)?;

    let file_uuid = resolve_name(&collaborators, &name)?;
    let staged_path = std::env::temp_dir().join(format!("decentralis-get-{file_uuid}"));
    collaborators.chunking.reconstruct_file(file_uuid, collaborators.identity.owner_uuid, &staged_path).await?;

    let ciphertext = tokio::fs::read(&staged_path).await?;
    let _ = tokio::fs::remove_file(&staged_path).await;
    let plaintext = decentralis_core::cipher::decrypt(record.algorithm, &key, &ciphertext)?;
    tokio::fs::write(&output, &plaintext).await?;
    println!("recovered {name} -> {output:?}");
    Ok(())
}

async fn cmd_status(config_path: Option<PathBuf>, name: String) -> DecentralisResult<()> {
    let collaborators = build_collaborators(config_path)?;
    let file_uuid = resolve_name(&collaborators, &name)?;
    let status = collaborators.chunking.get_file_status(file_uuid)?;
    println!(
        "{name}: {}/{} required shards, {} local, {} remote, reconstructable={}, degraded={}",
        status.required, status.total_chunks, status.available_local, status.available_remote, status.reconstructable, status.degraded
    );

    let stats = collaborators.chunking.get_local_stats(collaborators.identity.owner_uuid)?;
    println!(
        "node: {} file(s) owned, {} local chunk(s), {} chunk(s) held for peers",
        stats.file_count, stats.local_chunk_count, stats.foreign_chunk_count
    );
    Ok(())
}

/// Re-chunks and re-distributes the encrypted container (spec.md §4.10).
/// `chunk_file` already implements the hash-compare no-op and remove-prior
/// steps via its idempotent-by-name behaviour; this adds the distribute step
/// the auto-sync flow also requires.
async fn cmd_sync(config_path: Option<PathBuf>) -> DecentralisResult<()> {
    let collaborators = build_collaborators(config_path)?;
    let container = container_path(&collaborators.config.storage.data_dir);
    if !container.exists() {
        return Err(DecentralisError::Configuration(
            "no container.dat to sync under the storage directory".to_string(),
        ));
    }

    let file_uuid = collaborators.chunking.chunk_file(&container, collaborators.identity.owner_uuid).await?;
    let report = collaborators.chunking.distribute_chunks(file_uuid, collaborators.identity.owner_uuid).await?;
    println!("synced container: {} chunk(s) distributed, {} left local", report.assigned.len(), report.left_local.len());
    Ok(())
}

async fn cmd_serve(config_path: Option<PathBuf>) -> DecentralisResult<()> {
    let collaborators = build_collaborators(config_path)?;
    let cancel = CancellationToken::new();

    let container = container_path(&collaborators.config.storage.data_dir);
    if !container.exists() {
        if let Some(meta) = collaborators
            .chunking
            .find_by_name(collaborators.identity.owner_uuid, "container.dat")?
        {
            let chunking = collaborators.chunking.clone();
            let owner = collaborators.identity.owner_uuid;
            tokio::spawn(async move {
                if let Err(e) = chunking.reconstruct_file(meta.file_uuid, owner, &container).await {
                    tracing::warn!(%e, "failed to restore container.dat on startup");
                }
            });
        }
    }

    let database = Arc::new(Database::open(&collaborators.config.storage.data_dir.join("chunk_metadata.db"))?);
    let chunk_store = Arc::new(ChunkStore::new(collaborators.config.storage.data_dir.clone()));
    let server = Arc::new(RpcServer::new(chunk_store, database, collaborators.identity.peer_uuid));
    let server_task = tokio::spawn({
        let server = server.clone();
        let cancel = cancel.clone();
        let listen_port = collaborators.config.rpc.listen_port;
        async move {
            if let Err(err) = server.run(listen_port, cancel).await {
                tracing::error!(%err, "rpc server stopped");
            }
        }
    });

    let background = collaborators.chunking.start_background_tasks(cancel.clone());

    tokio::signal::ctrl_c().await.map_err(DecentralisError::from)?;
    println!("shutting down");
    collaborators.chunking.shutdown(cancel.clone(), background).await;
    cancel.cancel();
    let _ = server_task.await;
    Ok(())
}

fn resolve_name(collaborators: &Collaborators, name: &str) -> DecentralisResult<Uuid> {
    let meta = collaborators
        .chunking
        .find_by_name(collaborators.identity.owner_uuid, name)?
        .ok_or_else(|| DecentralisError::ChunkNotFound(name.to_string()))?;
    Ok(meta.file_uuid)
}
